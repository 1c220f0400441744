// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Batched uploads, copies and readbacks recorded into the current frame.

use std::fmt;

use super::resources::check_range;
use super::{RenderBackend, StagingBuffer};
use crate::driver::{GpuCommand, NativeDevice, NativeResource};
use crate::error::{BackendError, DriverError, FrameError, ResourceError};
use crate::frame::PassKind;
use crate::pool::Handle;
use crate::resource::{PooledResource, ResourceKind, ResourceState, ResourceUsage};
use crate::staging::{StagingAllocation, StagingArena};

/// Receives the bytes of a readback once the GPU wrote them, or the driver error
/// that prevented reading them.
pub type ReadbackCallback = Box<dyn FnOnce(Result<Vec<u8>, DriverError>)>;

enum ResourceUpdate {
    Upload {
        dst: Handle<PooledResource>,
        offset: u64,
        data: Vec<u8>,
    },
    UploadTexture {
        dst: Handle<PooledResource>,
        data: Vec<u8>,
    },
    CopyBuffer {
        src: Handle<PooledResource>,
        src_offset: u64,
        dst: Handle<PooledResource>,
        dst_offset: u64,
        size: u64,
    },
    CopyFromStaging {
        src: StagingAllocation,
        src_offset: u64,
        dst: Handle<PooledResource>,
        dst_offset: u64,
        size: u64,
    },
    CopyToStaging {
        src: Handle<PooledResource>,
        src_offset: u64,
        dst: StagingAllocation,
        dst_offset: u64,
        size: u64,
    },
    Readback {
        src: Handle<PooledResource>,
        offset: u64,
        size: u64,
        callback: ReadbackCallback,
    },
    ReadbackTexture {
        src: Handle<PooledResource>,
        callback: ReadbackCallback,
    },
}

impl fmt::Debug for ResourceUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceUpdate::Upload { dst, offset, data } => f
                .debug_struct("Upload")
                .field("dst", dst)
                .field("offset", offset)
                .field("len", &data.len())
                .finish(),
            ResourceUpdate::UploadTexture { dst, data } => f
                .debug_struct("UploadTexture")
                .field("dst", dst)
                .field("len", &data.len())
                .finish(),
            ResourceUpdate::CopyBuffer { src, dst, size, .. } => f
                .debug_struct("CopyBuffer")
                .field("src", src)
                .field("dst", dst)
                .field("size", size)
                .finish(),
            ResourceUpdate::CopyFromStaging { dst, size, .. } => f
                .debug_struct("CopyFromStaging")
                .field("dst", dst)
                .field("size", size)
                .finish(),
            ResourceUpdate::CopyToStaging { src, size, .. } => f
                .debug_struct("CopyToStaging")
                .field("src", src)
                .field("size", size)
                .finish(),
            ResourceUpdate::Readback { src, offset, size, .. } => f
                .debug_struct("Readback")
                .field("src", src)
                .field("offset", offset)
                .field("size", size)
                .finish(),
            ResourceUpdate::ReadbackTexture { src, .. } => f
                .debug_struct("ReadbackTexture")
                .field("src", src)
                .finish(),
        }
    }
}

/// The extent of a texture taking part in a copy.
struct TextureCopy {
    native: NativeResource,
    width: u32,
    height: u32,
    bytes_per_row: u32,
    size: u64,
}

/// Uploads, copies and readbacks applied in order by
/// [`RenderBackend::enqueue_resource_updates`].
///
/// Upload data is copied into the batch, so the caller's memory can be reused
/// right away.
#[derive(Debug, Default)]
pub struct ResourceUpdateBatch {
    updates: Vec<ResourceUpdate>,
}

impl ResourceUpdateBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes `data` into a buffer at `offset`.
    ///
    /// Buffers in upload memory are written directly; the others go through the
    /// upload staging arena and need `COPY_DST` usage.
    pub fn upload(&mut self, dst: Handle<PooledResource>, offset: u64, data: &[u8]) -> &mut Self {
        self.updates.push(ResourceUpdate::Upload {
            dst,
            offset,
            data: data.to_vec(),
        });
        self
    }

    /// Writes a slice of plain values into a buffer at `offset`.
    pub fn upload_pod<T: bytemuck::Pod>(
        &mut self,
        dst: Handle<PooledResource>,
        offset: u64,
        values: &[T],
    ) -> &mut Self {
        self.upload(dst, offset, bytemuck::cast_slice(values))
    }

    /// Replaces the whole contents of a texture. `data` holds tightly packed rows.
    pub fn upload_texture(&mut self, dst: Handle<PooledResource>, data: &[u8]) -> &mut Self {
        self.updates.push(ResourceUpdate::UploadTexture {
            dst,
            data: data.to_vec(),
        });
        self
    }

    /// Copies `size` bytes between two buffers.
    pub fn copy_buffer(
        &mut self,
        src: Handle<PooledResource>,
        src_offset: u64,
        dst: Handle<PooledResource>,
        dst_offset: u64,
        size: u64,
    ) -> &mut Self {
        self.updates.push(ResourceUpdate::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        });
        self
    }

    /// Copies from an upload staging buffer owned by the caller into a buffer.
    pub fn copy_from_staging(
        &mut self,
        src: &StagingBuffer,
        src_offset: u64,
        dst: Handle<PooledResource>,
        dst_offset: u64,
        size: u64,
    ) -> &mut Self {
        self.updates.push(ResourceUpdate::CopyFromStaging {
            src: src.allocation,
            src_offset,
            dst,
            dst_offset,
            size,
        });
        self
    }

    /// Copies from a buffer into a readback staging buffer owned by the caller.
    pub fn copy_to_staging(
        &mut self,
        src: Handle<PooledResource>,
        src_offset: u64,
        dst: &StagingBuffer,
        dst_offset: u64,
        size: u64,
    ) -> &mut Self {
        self.updates.push(ResourceUpdate::CopyToStaging {
            src,
            src_offset,
            dst: dst.allocation,
            dst_offset,
            size,
        });
        self
    }

    /// Reads `size` bytes of a buffer back to the CPU.
    ///
    /// The callback runs once the frame that copied the data has completed on
    /// the GPU, from the `begin_frame` that reuses its slot.
    pub fn readback(
        &mut self,
        src: Handle<PooledResource>,
        offset: u64,
        size: u64,
        callback: impl FnOnce(Result<Vec<u8>, DriverError>) + 'static,
    ) -> &mut Self {
        self.updates.push(ResourceUpdate::Readback {
            src,
            offset,
            size,
            callback: Box::new(callback),
        });
        self
    }

    /// Reads a whole texture back to the CPU as tightly packed rows.
    pub fn readback_texture(
        &mut self,
        src: Handle<PooledResource>,
        callback: impl FnOnce(Result<Vec<u8>, DriverError>) + 'static,
    ) -> &mut Self {
        self.updates.push(ResourceUpdate::ReadbackTexture {
            src,
            callback: Box::new(callback),
        });
        self
    }

    /// Number of queued updates.
    pub fn len(&self) -> usize {
        self.updates.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

impl<D: NativeDevice> RenderBackend<D> {
    /// Records every update of `batch` into the current frame, in order.
    ///
    /// Staging memory comes from the current slot's slice of the upload or
    /// readback arena; a dedicated buffer is used when the slice is full.
    /// ## Errors
    /// * `FrameError::InvalidState` - If no frame is recorded or a render pass is open.
    /// * `ResourceError` - On the first invalid update. The updates before it are
    ///   already recorded.
    pub fn enqueue_resource_updates(
        &mut self,
        batch: ResourceUpdateBatch,
    ) -> Result<(), BackendError> {
        self.ensure_recording()?;
        if self.frames.open_pass() == Some(PassKind::Render) {
            return Err(FrameError::InvalidState("resource updates inside a render pass").into());
        }
        for update in batch.updates {
            self.apply_update(update)?;
        }
        Ok(())
    }

    fn apply_update(&mut self, update: ResourceUpdate) -> Result<(), ResourceError> {
        match update {
            ResourceUpdate::Upload { dst, offset, data } => self.upload_buffer(dst, offset, &data),
            ResourceUpdate::UploadTexture { dst, data } => self.upload_texture(dst, &data),
            ResourceUpdate::CopyBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let src = self.copy_source(src, src_offset, size)?;
                let dst = self.copy_destination(dst, dst_offset, size)?;
                self.flush_barriers();
                self.record(GpuCommand::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                });
                Ok(())
            }
            ResourceUpdate::CopyFromStaging {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                check_range(src_offset, size, src.size)?;
                let dst = self.copy_destination(dst, dst_offset, size)?;
                self.flush_barriers();
                self.record(GpuCommand::CopyBuffer {
                    src: src.buffer,
                    src_offset: src.offset + src_offset,
                    dst,
                    dst_offset,
                    size,
                });
                Ok(())
            }
            ResourceUpdate::CopyToStaging {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                check_range(dst_offset, size, dst.size)?;
                let src = self.copy_source(src, src_offset, size)?;
                self.flush_barriers();
                self.record(GpuCommand::CopyBuffer {
                    src,
                    src_offset,
                    dst: dst.buffer,
                    dst_offset: dst.offset + dst_offset,
                    size,
                });
                Ok(())
            }
            ResourceUpdate::Readback {
                src,
                offset,
                size,
                callback,
            } => self.readback_buffer(src, offset, size, callback),
            ResourceUpdate::ReadbackTexture { src, callback } => {
                self.readback_texture(src, callback)
            }
        }
    }

    fn upload_buffer(
        &mut self,
        dst: Handle<PooledResource>,
        offset: u64,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        if data.is_empty() {
            return Ok(());
        }
        let resource = self
            .resources
            .lookup(dst)
            .ok_or(ResourceError::InvalidHandle)?;
        check_range(offset, data.len() as u64, resource.size())?;
        if Self::is_host_writable(resource) {
            self.device.write_mapped(resource.native(), offset, data)?;
            return Ok(());
        }

        let size = data.len() as u64;
        let dst = self.copy_destination(dst, offset, size)?;
        let slot = self.frames.current_slot();
        let staging = self
            .upload
            .get_or_dedicated(&self.device, &mut self.releases, slot, size)?;
        StagingArena::write(&self.device, &staging, data)?;
        self.flush_barriers();
        self.record(GpuCommand::CopyBuffer {
            src: staging.buffer,
            src_offset: staging.offset,
            dst,
            dst_offset: offset,
            size,
        });
        Ok(())
    }

    fn upload_texture(
        &mut self,
        dst: Handle<PooledResource>,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        let texture = self.texture_endpoint(dst, ResourceUsage::COPY_DST, "COPY_DST")?;
        if data.len() as u64 != texture.size {
            return Err(ResourceError::InvalidDescription(format!(
                "texture upload of {} bytes, expected {}",
                data.len(),
                texture.size
            )));
        }

        let slot = self.frames.current_slot();
        let staging =
            self.upload
                .get_or_dedicated(&self.device, &mut self.releases, slot, data.len() as u64)?;
        StagingArena::write(&self.device, &staging, data)?;
        self.barriers
            .add_transition(&mut self.resources, dst, ResourceState::CopyDest);
        self.flush_barriers();
        self.record(GpuCommand::CopyBufferToTexture {
            src: staging.buffer,
            src_offset: staging.offset,
            bytes_per_row: texture.bytes_per_row,
            dst: texture.native,
            width: texture.width,
            height: texture.height,
        });
        Ok(())
    }

    fn readback_buffer(
        &mut self,
        src: Handle<PooledResource>,
        offset: u64,
        size: u64,
        callback: ReadbackCallback,
    ) -> Result<(), ResourceError> {
        let src = self.copy_source(src, offset, size)?;
        let slot = self.frames.current_slot();
        let (staging, dedicated) = self.readback.get_or_create(&self.device, slot, size)?;
        self.flush_barriers();
        self.record(GpuCommand::CopyBuffer {
            src,
            src_offset: offset,
            dst: staging.buffer,
            dst_offset: staging.offset,
            size,
        });
        self.defer_readback(staging, dedicated, callback);
        Ok(())
    }

    fn readback_texture(
        &mut self,
        src: Handle<PooledResource>,
        callback: ReadbackCallback,
    ) -> Result<(), ResourceError> {
        let texture = self.texture_endpoint(src, ResourceUsage::COPY_SRC, "COPY_SRC")?;
        let slot = self.frames.current_slot();
        let (staging, dedicated) = self
            .readback
            .get_or_create(&self.device, slot, texture.size)?;
        self.barriers
            .add_transition(&mut self.resources, src, ResourceState::CopySource);
        self.flush_barriers();
        self.record(GpuCommand::CopyTextureToBuffer {
            src: texture.native,
            dst: staging.buffer,
            dst_offset: staging.offset,
            bytes_per_row: texture.bytes_per_row,
            width: texture.width,
            height: texture.height,
        });
        self.defer_readback(staging, dedicated, callback);
        Ok(())
    }

    /// Hands the staged bytes to `callback` once the current slot completes.
    /// A dedicated staging buffer is destroyed after the read.
    fn defer_readback(
        &mut self,
        staging: StagingAllocation,
        dedicated: bool,
        callback: ReadbackCallback,
    ) {
        self.releases.defer_callback(move |ctx| {
            let mut data = vec![0; staging.size as usize];
            let result = StagingArena::read(ctx.device, &staging, &mut data).map(|()| data);
            if dedicated {
                ctx.device.destroy_resource(staging.buffer);
            }
            callback(result);
        });
    }

    /// Validates a buffer read by a copy and transitions it to `CopySource`.
    fn copy_source(
        &mut self,
        src: Handle<PooledResource>,
        offset: u64,
        size: u64,
    ) -> Result<NativeResource, ResourceError> {
        self.copy_endpoint(src, offset, size, ResourceUsage::COPY_SRC, "COPY_SRC")?;
        self.barriers
            .add_transition(&mut self.resources, src, ResourceState::CopySource);
        self.native_of(src)
    }

    /// Validates a buffer written by a copy and transitions it to `CopyDest`.
    fn copy_destination(
        &mut self,
        dst: Handle<PooledResource>,
        offset: u64,
        size: u64,
    ) -> Result<NativeResource, ResourceError> {
        self.copy_endpoint(dst, offset, size, ResourceUsage::COPY_DST, "COPY_DST")?;
        self.barriers
            .add_transition(&mut self.resources, dst, ResourceState::CopyDest);
        self.native_of(dst)
    }

    fn copy_endpoint(
        &self,
        handle: Handle<PooledResource>,
        offset: u64,
        size: u64,
        usage: ResourceUsage,
        usage_name: &'static str,
    ) -> Result<(), ResourceError> {
        let resource = self
            .resources
            .lookup(handle)
            .ok_or(ResourceError::InvalidHandle)?;
        if resource.desc().kind != ResourceKind::Buffer {
            return Err(ResourceError::InvalidDescription(format!(
                "'{}' is not a buffer",
                resource.desc().label_or_default()
            )));
        }
        if !resource.desc().usage.contains(usage) {
            return Err(ResourceError::MissingUsage(usage_name));
        }
        check_range(offset, size, resource.size())
    }

    fn texture_endpoint(
        &self,
        handle: Handle<PooledResource>,
        usage: ResourceUsage,
        usage_name: &'static str,
    ) -> Result<TextureCopy, ResourceError> {
        let resource = self
            .resources
            .lookup(handle)
            .ok_or(ResourceError::InvalidHandle)?;
        let ResourceKind::Texture2D {
            width,
            height,
            format,
        } = resource.desc().kind
        else {
            return Err(ResourceError::InvalidDescription(format!(
                "'{}' is not a texture",
                resource.desc().label_or_default()
            )));
        };
        if !resource.desc().usage.contains(usage) {
            return Err(ResourceError::MissingUsage(usage_name));
        }
        Ok(TextureCopy {
            native: resource.native(),
            width,
            height,
            bytes_per_row: width * format.bytes_per_texel(),
            size: resource.size(),
        })
    }

    fn native_of(
        &self,
        handle: Handle<PooledResource>,
    ) -> Result<NativeResource, ResourceError> {
        self.resources
            .lookup(handle)
            .map(PooledResource::native)
            .ok_or(ResourceError::InvalidHandle)
    }
}
