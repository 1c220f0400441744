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

use super::{
    ComputePipelineDesc, GraphicsPipelineDesc, PipelineKind, PooledPipeline, PooledSampler,
    RenderBackend, StagingBuffer,
};
use crate::binding::{BindingLayoutDesc, RootLayoutBuilder, ShaderStage, StageRegisters};
use crate::descriptor::ViewKind;
use crate::driver::{
    NativeDevice, NativePipelineDesc, NativeResource, SamplerDesc, ShaderBytecode, ViewDesc,
};
use crate::error::{PipelineError, ResourceError};
use crate::pool::Handle;
use crate::resource::{
    MemoryLocation, PooledResource, ResourceDesc, ResourceKind, ResourceState, ResourceUsage,
    TextureFormat,
};
use crate::staging::StagingDirection;

struct PipelineParts<'a> {
    kind: PipelineKind,
    label: Option<&'a str>,
    shaders: &'a [ShaderBytecode],
    bindings: &'a BindingLayoutDesc,
    registers: &'a StageRegisters,
    vertex_strides: &'a [u32],
    fixed_function_state: &'a [u8],
}

fn validate(desc: &ResourceDesc) -> Result<(), ResourceError> {
    if desc.size == 0 {
        return Err(ResourceError::InvalidDescription(format!(
            "'{}' has a size of 0",
            desc.label_or_default()
        )));
    }
    match desc.kind {
        ResourceKind::Buffer => {
            if desc.usage.contains(ResourceUsage::RENDER_TARGET)
                || desc.usage.contains(ResourceUsage::DEPTH_STENCIL)
            {
                return Err(ResourceError::InvalidDescription(
                    "buffers cannot be attachments".to_string(),
                ));
            }
        }
        ResourceKind::Texture2D { format, .. } => {
            if desc.usage.contains(ResourceUsage::DEPTH_STENCIL) && !format.is_depth() {
                return Err(ResourceError::InvalidDescription(format!(
                    "{format:?} is not a depth format"
                )));
            }
            if desc.usage.contains(ResourceUsage::RENDER_TARGET) && format.is_depth() {
                return Err(ResourceError::InvalidDescription(format!(
                    "{format:?} cannot be a color attachment"
                )));
            }
        }
    }
    Ok(())
}

/// The views a resource of `desc` gets, in creation order.
fn views_for(native: NativeResource, desc: &ResourceDesc) -> Vec<(ViewKind, ViewDesc)> {
    let mut views = Vec::new();
    if desc.usage.contains(ResourceUsage::SHADER_READ) {
        views.push((
            ViewKind::ShaderResource,
            ViewDesc::ShaderResource {
                resource: native,
                kind: desc.kind,
            },
        ));
    }
    if desc.usage.contains(ResourceUsage::STORAGE) {
        views.push((
            ViewKind::UnorderedAccess,
            ViewDesc::UnorderedAccess {
                resource: native,
                kind: desc.kind,
            },
        ));
    }
    if let Some(format) = desc.format() {
        if desc.usage.contains(ResourceUsage::RENDER_TARGET) {
            views.push((
                ViewKind::RenderTarget,
                ViewDesc::RenderTarget {
                    resource: native,
                    format,
                },
            ));
        }
        if desc.usage.contains(ResourceUsage::DEPTH_STENCIL) {
            views.push((
                ViewKind::DepthStencil,
                ViewDesc::DepthStencil {
                    resource: native,
                    format,
                },
            ));
        }
    }
    views
}

impl<D: NativeDevice> RenderBackend<D> {
    /// Creates a buffer.
    /// ## Errors
    /// * `ResourceError::InvalidDescription` - If `desc` is not a valid buffer.
    /// * `ResourceError::Driver` - If the allocation failed.
    /// * `ResourceError::Descriptor` - If a view could not be allocated.
    pub fn create_buffer(
        &mut self,
        desc: &ResourceDesc,
    ) -> Result<Handle<PooledResource>, ResourceError> {
        if desc.kind != ResourceKind::Buffer {
            return Err(ResourceError::InvalidDescription(
                "create_buffer expects a buffer description".to_string(),
            ));
        }
        self.create_owned(desc)
    }

    /// Creates a 2D texture.
    /// ## Errors
    /// Same as [`RenderBackend::create_buffer`].
    pub fn create_texture(
        &mut self,
        desc: &ResourceDesc,
    ) -> Result<Handle<PooledResource>, ResourceError> {
        if desc.kind == ResourceKind::Buffer {
            return Err(ResourceError::InvalidDescription(
                "create_texture expects a texture description".to_string(),
            ));
        }
        self.create_owned(desc)
    }

    /// Creates a texture usable as a pass attachment and as a shader input.
    ///
    /// Depth formats get a depth-stencil view, the others a render-target view.
    pub fn create_render_target(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<Handle<PooledResource>, ResourceError> {
        let attachment = if format.is_depth() {
            ResourceUsage::DEPTH_STENCIL
        } else {
            ResourceUsage::RENDER_TARGET
        };
        let desc = ResourceDesc::texture(
            label,
            width,
            height,
            format,
            attachment | ResourceUsage::SHADER_READ,
        );
        self.create_texture(&desc)
    }

    /// Wraps a native object created outside of the backend.
    ///
    /// The backend tracks its state and views but never destroys the native object.
    pub fn import_resource(
        &mut self,
        native: NativeResource,
        desc: ResourceDesc,
        state: ResourceState,
    ) -> Result<Handle<PooledResource>, ResourceError> {
        validate(&desc)?;
        let mut resource = PooledResource::borrowed(native, desc, state);
        self.create_views(&mut resource)?;
        Ok(self.resources.add(resource))
    }

    /// Destroys a buffer or texture once the GPU is done with it.
    ///
    /// The handle is invalid as soon as this returns. Returns `false` for stale
    /// handles and for swapchain images, which belong to the swapchain.
    pub fn destroy_resource(&mut self, handle: Handle<PooledResource>) -> bool {
        if self.back_buffers.contains(&handle) {
            log::warn!("Refusing to destroy swapchain image {handle:?}");
            return false;
        }
        let Some(resource) = self.resources.take(handle) else {
            log::warn!("destroy_resource called with invalid handle {handle:?}");
            return false;
        };
        self.barriers.forget(handle);
        self.releases.defer_pooled_resource(resource);
        true
    }

    /// The pooled resource behind `handle`.
    pub fn resource(&self, handle: Handle<PooledResource>) -> Option<&PooledResource> {
        self.resources.lookup(handle)
    }

    /// Creates a sampler.
    pub fn create_sampler(
        &mut self,
        desc: SamplerDesc,
    ) -> Result<Handle<PooledSampler>, ResourceError> {
        let view = self
            .cpu_descriptors
            .allocate(&self.device, ViewKind::Sampler, 1)?;
        self.device
            .write_view(view.descriptor, &ViewDesc::Sampler(desc));
        Ok(self.samplers.add(PooledSampler::new(desc, view)))
    }

    /// Destroys a sampler once the GPU is done with it.
    pub fn destroy_sampler(&mut self, handle: Handle<PooledSampler>) -> bool {
        match self.samplers.take(handle) {
            Some(sampler) => {
                self.releases.defer_views(vec![sampler.view()]);
                true
            }
            None => false,
        }
    }

    /// Builds the binding layout of a graphics pipeline and compiles it.
    /// ## Errors
    /// * `PipelineError::MissingStage` - If there is no vertex shader.
    /// * `PipelineError::LayoutCreationFailed` - If the binding layout was rejected.
    /// * `PipelineError::CompilationFailed` - If the pipeline did not compile.
    pub fn create_graphics_pipeline(
        &mut self,
        desc: &GraphicsPipelineDesc,
    ) -> Result<Handle<PooledPipeline>, PipelineError> {
        if !desc.shaders.iter().any(|s| s.stage == ShaderStage::Vertex) {
            return Err(PipelineError::MissingStage("vertex"));
        }
        self.create_pipeline(PipelineParts {
            kind: PipelineKind::Graphics,
            label: desc.label.as_deref(),
            shaders: &desc.shaders,
            bindings: &desc.bindings,
            registers: &desc.registers,
            vertex_strides: &desc.vertex_strides,
            fixed_function_state: &desc.fixed_function_state,
        })
    }

    /// Builds the binding layout of a compute pipeline and compiles it.
    /// ## Errors
    /// * `PipelineError::MissingStage` - If the shader is not a compute shader.
    /// * `PipelineError::LayoutCreationFailed` / `CompilationFailed` - As for graphics.
    pub fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDesc,
    ) -> Result<Handle<PooledPipeline>, PipelineError> {
        if desc.shader.stage != ShaderStage::Compute {
            return Err(PipelineError::MissingStage("compute"));
        }
        self.create_pipeline(PipelineParts {
            kind: PipelineKind::Compute,
            label: desc.label.as_deref(),
            shaders: std::slice::from_ref(&desc.shader),
            bindings: &desc.bindings,
            registers: &desc.registers,
            vertex_strides: &[],
            fixed_function_state: &[],
        })
    }

    /// Destroys a pipeline and its binding layout once the GPU is done with them.
    pub fn destroy_pipeline(&mut self, handle: Handle<PooledPipeline>) -> bool {
        let Some(pipeline) = self.pipelines.take(handle) else {
            return false;
        };
        if self.bound_pipeline == Some(handle) {
            self.bound_pipeline = None;
        }
        self.releases.defer_pipeline(pipeline.native);
        self.releases.defer_binding_layout(pipeline.layout);
        true
    }

    /// The pooled pipeline behind `handle`.
    pub fn pipeline(&self, handle: Handle<PooledPipeline>) -> Option<&PooledPipeline> {
        self.pipelines.lookup(handle)
    }

    /// Creates a host-visible buffer owned by the caller.
    pub fn create_staging_buffer(
        &mut self,
        size: u64,
        direction: StagingDirection,
    ) -> Result<StagingBuffer, ResourceError> {
        let arena = match direction {
            StagingDirection::Upload => &self.upload,
            StagingDirection::Readback => &self.readback,
        };
        let allocation = arena.create_dedicated(&self.device, size)?;
        Ok(StagingBuffer {
            allocation,
            direction,
        })
    }

    /// Writes into an upload staging buffer.
    pub fn write_staging_buffer(
        &self,
        buffer: &StagingBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), ResourceError> {
        if buffer.direction != StagingDirection::Upload {
            return Err(ResourceError::MissingUsage("COPY_SRC"));
        }
        check_range(offset, data.len() as u64, buffer.size())?;
        let allocation = &buffer.allocation;
        self.device
            .write_mapped(allocation.buffer, allocation.offset + offset, data)?;
        Ok(())
    }

    /// Reads from a readback staging buffer. Only meaningful once the copies into
    /// it completed.
    pub fn read_staging_buffer(
        &self,
        buffer: &StagingBuffer,
        offset: u64,
        out: &mut [u8],
    ) -> Result<(), ResourceError> {
        if buffer.direction != StagingDirection::Readback {
            return Err(ResourceError::MissingUsage("COPY_DST"));
        }
        check_range(offset, out.len() as u64, buffer.size())?;
        let allocation = &buffer.allocation;
        self.device
            .read_mapped(allocation.buffer, allocation.offset + offset, out)?;
        Ok(())
    }

    /// Destroys a staging buffer once the GPU is done with it.
    pub fn destroy_staging_buffer(&mut self, buffer: StagingBuffer) {
        self.releases.defer_resource(buffer.allocation.buffer);
    }

    pub(super) fn import_back_buffers(&mut self) -> Result<(), ResourceError> {
        for (index, image) in self.device.swapchain_images().into_iter().enumerate() {
            let desc = ResourceDesc::texture(
                &format!("back buffer {index}"),
                image.width,
                image.height,
                image.format,
                ResourceUsage::RENDER_TARGET,
            );
            let handle = self.import_resource(image.resource, desc, ResourceState::Present)?;
            self.back_buffers.push(handle);
        }
        Ok(())
    }

    fn create_pipeline(
        &mut self,
        parts: PipelineParts<'_>,
    ) -> Result<Handle<PooledPipeline>, PipelineError> {
        let (root, map) = RootLayoutBuilder::build(parts.bindings, parts.registers);
        let layout = self.device.create_binding_layout(&root).map_err(|err| {
            log::error!(
                "Failed to create binding layout for '{}': {err}",
                parts.label.unwrap_or("<unnamed>")
            );
            PipelineError::LayoutCreationFailed(err)
        })?;

        let native_desc = NativePipelineDesc {
            label: parts.label,
            layout,
            shaders: parts.shaders,
            fixed_function_state: parts.fixed_function_state,
            vertex_strides: parts.vertex_strides,
        };
        let compute = parts.kind == PipelineKind::Compute;
        let native = match self.device.create_pipeline(&native_desc, compute) {
            Ok(native) => native,
            Err(source) => {
                log::error!(
                    "Failed to compile pipeline '{}': {source}",
                    parts.label.unwrap_or("<unnamed>")
                );
                // Not referenced by any recorded work yet.
                self.device.destroy_binding_layout(layout);
                return Err(PipelineError::CompilationFailed {
                    label: parts.label.map(str::to_string),
                    source,
                });
            }
        };

        log::debug!(
            "Created {:?} pipeline '{}' with {} root parameters",
            parts.kind,
            parts.label.unwrap_or("<unnamed>"),
            root.parameters.len()
        );
        Ok(self.pipelines.add(PooledPipeline {
            kind: parts.kind,
            label: parts.label.map(str::to_string),
            native,
            layout,
            bindings: parts.bindings.clone(),
            registers: parts.registers.clone(),
            root,
            map,
            vertex_strides: parts.vertex_strides.to_vec(),
        }))
    }

    fn create_owned(&mut self, desc: &ResourceDesc) -> Result<Handle<PooledResource>, ResourceError> {
        validate(desc)?;
        let allocation = self.device.create_resource(desc).map_err(|err| {
            log::error!(
                "Failed to allocate '{}' ({} bytes): {err}",
                desc.label_or_default(),
                desc.size
            );
            ResourceError::Driver(err)
        })?;
        let mut resource =
            PooledResource::owned(allocation, desc.clone(), desc.initial_state());
        if let Err(err) = self.create_views(&mut resource) {
            self.device.destroy_resource(allocation.resource);
            return Err(err);
        }
        log::trace!(
            "Created '{}' ({:?}, {} bytes)",
            desc.label_or_default(),
            desc.kind,
            desc.size
        );
        Ok(self.resources.add(resource))
    }

    /// Allocates and writes every view the resource's usage asks for.
    /// On failure, the views allocated so far are freed again.
    fn create_views(&mut self, resource: &mut PooledResource) -> Result<(), ResourceError> {
        for (kind, view) in views_for(resource.native(), resource.desc()) {
            match self.cpu_descriptors.allocate(&self.device, kind, 1) {
                Ok(allocation) => {
                    self.device.write_view(allocation.descriptor, &view);
                    resource.attach_view(allocation);
                }
                Err(err) => {
                    log::error!(
                        "Failed to allocate a {kind:?} view for '{}': {err}",
                        resource.desc().label_or_default()
                    );
                    for allocation in resource.take_views() {
                        self.cpu_descriptors.release(&allocation);
                    }
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    pub(super) fn is_host_writable(resource: &PooledResource) -> bool {
        resource.is_persistently_mapped() && resource.desc().memory == MemoryLocation::Upload
    }
}

/// Checks that `[offset, offset + len)` lies inside `size` bytes.
pub(super) fn check_range(offset: u64, len: u64, size: u64) -> Result<(), ResourceError> {
    let end = offset.checked_add(len).unwrap_or(u64::MAX);
    if end > size {
        return Err(ResourceError::OutOfBounds { end, size });
    }
    Ok(())
}
