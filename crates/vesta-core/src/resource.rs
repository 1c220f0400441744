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

//! GPU resources as stored in the backend's object pool.
//!
//! A [`PooledResource`] bundles the native object with everything the core tracks
//! about it: the barrier state it was last transitioned to, the read/write usage
//! mask used for hazard barriers, the CPU-pool views it owns and whether the native
//! object is owned by the backend or merely borrowed (imported).

use crate::descriptor::{CpuDescriptor, ViewAllocation, ViewKind};
use crate::driver::{NativeAllocation, NativeResource};
use crate::pool::Release;
use crate::release::ReleaseContext;

/// The usage state a resource is in from the GPU's point of view.
///
/// Switching between states requires a transition barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResourceState {
    /// Generic state, usable for copies and presentation on most APIs.
    #[default]
    Common,
    /// Bound as vertex or constant buffer.
    VertexAndConstantBuffer,
    /// Bound as index buffer.
    IndexBuffer,
    /// Written as a color attachment.
    RenderTarget,
    /// Read and written by shaders through unordered access.
    UnorderedAccess,
    /// Written as a depth/stencil attachment.
    DepthWrite,
    /// Read-only depth/stencil.
    DepthRead,
    /// Read by shaders.
    ShaderResource,
    /// Destination of a copy.
    CopyDest,
    /// Source of a copy.
    CopySource,
    /// Ready to be presented by the swapchain.
    Present,
    /// Read by the CPU after a GPU write (readback heaps).
    HostRead,
}

/// Flags declaring how a resource may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ResourceUsage {
    bits: u32,
}

impl ResourceUsage {
    /// No usage.
    pub const NONE: Self = Self { bits: 0 };
    /// Bound as vertex buffer.
    pub const VERTEX: Self = Self { bits: 1 << 0 };
    /// Bound as index buffer.
    pub const INDEX: Self = Self { bits: 1 << 1 };
    /// Bound as uniform (constant) buffer.
    pub const UNIFORM: Self = Self { bits: 1 << 2 };
    /// Read by shaders (sampled texture or read-only buffer).
    pub const SHADER_READ: Self = Self { bits: 1 << 3 };
    /// Read and written by shaders.
    pub const STORAGE: Self = Self { bits: 1 << 4 };
    /// Color attachment.
    pub const RENDER_TARGET: Self = Self { bits: 1 << 5 };
    /// Depth/stencil attachment.
    pub const DEPTH_STENCIL: Self = Self { bits: 1 << 6 };
    /// Source of copies.
    pub const COPY_SRC: Self = Self { bits: 1 << 7 };
    /// Destination of copies.
    pub const COPY_DST: Self = Self { bits: 1 << 8 };

    /// Returns the raw bits.
    pub const fn bits(&self) -> u32 {
        self.bits
    }

    /// Combines two sets of flags.
    pub const fn union(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
        }
    }

    /// Checks whether all flags in `other` are set.
    pub const fn contains(&self, other: Self) -> bool {
        (self.bits & other.bits) == other.bits
    }

    /// Checks if no flag is set.
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }
}

impl std::ops::BitOr for ResourceUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for ResourceUsage {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

/// The kind of access the last unordered-access use performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AccessFlags {
    bits: u8,
}

impl AccessFlags {
    /// No access recorded since the last synchronization.
    pub const NONE: Self = Self { bits: 0 };
    /// Shader read.
    pub const READ: Self = Self { bits: 1 << 0 };
    /// Shader write.
    pub const WRITE: Self = Self { bits: 1 << 1 };
    /// Read and write.
    pub const READ_WRITE: Self = Self {
        bits: Self::READ.bits | Self::WRITE.bits,
    };

    /// Combines two sets of flags.
    pub const fn union(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
        }
    }

    /// Checks whether all flags in `other` are set.
    pub const fn contains(&self, other: Self) -> bool {
        (self.bits & other.bits) == other.bits
    }

    /// Checks if no access is recorded.
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }
}

impl std::ops::BitOr for AccessFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

/// Where the memory of a resource lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MemoryLocation {
    /// Device-local memory, not CPU visible.
    #[default]
    GpuOnly,
    /// CPU-writable, GPU-readable memory (persistently mapped).
    Upload,
    /// GPU-writable, CPU-readable memory (persistently mapped).
    Readback,
}

impl MemoryLocation {
    /// Whether resources in this location stay mapped for their whole lifetime.
    pub const fn is_host_visible(&self) -> bool {
        matches!(self, MemoryLocation::Upload | MemoryLocation::Readback)
    }
}

/// Texel formats understood by the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// 8-bit RGBA, normalized.
    Rgba8Unorm,
    /// 8-bit BGRA, normalized. Common swapchain format.
    Bgra8Unorm,
    /// 16-bit float RGBA.
    Rgba16Float,
    /// 32-bit float single channel.
    R32Float,
    /// 32-bit float depth.
    Depth32Float,
    /// 24-bit depth with 8-bit stencil.
    Depth24Stencil8,
}

impl TextureFormat {
    /// Size of one texel in bytes.
    pub const fn bytes_per_texel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm
            | TextureFormat::Bgra8Unorm
            | TextureFormat::R32Float
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24Stencil8 => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }

    /// Whether the format holds depth (and possibly stencil) data.
    pub const fn is_depth(&self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24Stencil8
        )
    }
}

/// The shape of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Linear memory.
    Buffer,
    /// Two-dimensional image.
    Texture2D {
        /// Width in texels.
        width: u32,
        /// Height in texels.
        height: u32,
        /// Texel format.
        format: TextureFormat,
    },
}

/// Describes a resource to create.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDesc {
    /// Debug label.
    pub label: Option<String>,
    /// Buffer or texture.
    pub kind: ResourceKind,
    /// Size in bytes. For textures this is derived from the extent and format.
    pub size: u64,
    /// Allowed usages.
    pub usage: ResourceUsage,
    /// Memory placement.
    pub memory: MemoryLocation,
}

impl ResourceDesc {
    /// Describes a device-local buffer.
    pub fn buffer(label: &str, size: u64, usage: ResourceUsage) -> Self {
        Self {
            label: Some(label.to_string()),
            kind: ResourceKind::Buffer,
            size,
            usage,
            memory: MemoryLocation::GpuOnly,
        }
    }

    /// Describes a device-local 2D texture.
    pub fn texture(
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: ResourceUsage,
    ) -> Self {
        Self {
            label: Some(label.to_string()),
            kind: ResourceKind::Texture2D {
                width,
                height,
                format,
            },
            size: width as u64 * height as u64 * format.bytes_per_texel() as u64,
            usage,
            memory: MemoryLocation::GpuOnly,
        }
    }

    /// Returns the same description placed in `memory`.
    pub fn in_memory(mut self, memory: MemoryLocation) -> Self {
        self.memory = memory;
        self
    }

    /// The texture format, if this describes a texture.
    pub fn format(&self) -> Option<TextureFormat> {
        match self.kind {
            ResourceKind::Texture2D { format, .. } => Some(format),
            ResourceKind::Buffer => None,
        }
    }

    /// The state a freshly created resource of this description starts in.
    pub fn initial_state(&self) -> ResourceState {
        match self.memory {
            MemoryLocation::Upload => ResourceState::CopySource,
            MemoryLocation::Readback => ResourceState::CopyDest,
            MemoryLocation::GpuOnly => ResourceState::Common,
        }
    }

    pub(crate) fn label_or_default(&self) -> &str {
        self.label.as_deref().unwrap_or("<unnamed>")
    }
}

/// A native object together with who is responsible for destroying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeOwnership {
    /// Created by the backend; destroyed when released.
    Owned(NativeResource),
    /// Created elsewhere (swapchain image, interop); never destroyed by the backend.
    Borrowed(NativeResource),
}

impl NativeOwnership {
    /// The wrapped native object.
    pub fn native(&self) -> NativeResource {
        match *self {
            NativeOwnership::Owned(native) | NativeOwnership::Borrowed(native) => native,
        }
    }

    /// Whether the backend destroys the object on release.
    pub fn is_owned(&self) -> bool {
        matches!(self, NativeOwnership::Owned(_))
    }
}

/// A GPU resource stored in the backend's resource pool.
#[derive(Debug)]
pub struct PooledResource {
    native: NativeOwnership,
    desc: ResourceDesc,
    allocation: Option<NativeAllocation>,
    pub(crate) state: ResourceState,
    pub(crate) access: AccessFlags,
    pub(crate) views: Vec<ViewAllocation>,
}

impl PooledResource {
    /// Wraps a resource the backend created.
    pub fn owned(allocation: NativeAllocation, desc: ResourceDesc, state: ResourceState) -> Self {
        Self {
            native: NativeOwnership::Owned(allocation.resource),
            desc,
            allocation: Some(allocation),
            state,
            access: AccessFlags::NONE,
            views: Vec::new(),
        }
    }

    /// Wraps a resource owned by someone else.
    pub fn borrowed(native: NativeResource, desc: ResourceDesc, state: ResourceState) -> Self {
        Self {
            native: NativeOwnership::Borrowed(native),
            desc,
            allocation: None,
            state,
            access: AccessFlags::NONE,
            views: Vec::new(),
        }
    }

    /// The native object.
    pub fn native(&self) -> NativeResource {
        self.native.native()
    }

    /// Ownership of the native object.
    pub fn ownership(&self) -> NativeOwnership {
        self.native
    }

    /// The description the resource was created from.
    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.desc.size
    }

    /// The backing allocation, `None` for imported resources.
    pub fn allocation(&self) -> Option<&NativeAllocation> {
        self.allocation.as_ref()
    }

    /// Device address of the first byte, or 0 when unknown.
    pub fn gpu_address(&self) -> u64 {
        self.allocation.map(|a| a.gpu_address).unwrap_or(0)
    }

    /// Whether the resource stays CPU-mapped for its whole lifetime.
    pub fn is_persistently_mapped(&self) -> bool {
        self.allocation.is_some() && self.desc.memory.is_host_visible()
    }

    /// The currently tracked barrier state.
    pub fn state(&self) -> ResourceState {
        self.state
    }

    /// The accesses recorded since the last barrier.
    pub fn access(&self) -> AccessFlags {
        self.access
    }

    /// Returns the CPU descriptor of the view of `kind`, if the resource has one.
    pub fn view(&self, kind: ViewKind) -> Option<CpuDescriptor> {
        self.views
            .iter()
            .find(|v| v.kind == kind)
            .map(|v| v.descriptor)
    }

    /// Records a view owned by this resource.
    pub(crate) fn attach_view(&mut self, view: ViewAllocation) {
        self.views.push(view);
    }

    /// Detaches the owned views so they can be released separately.
    pub(crate) fn take_views(&mut self) -> Vec<ViewAllocation> {
        std::mem::take(&mut self.views)
    }
}

impl Release<ReleaseContext<'_>> for PooledResource {
    fn release(mut self, ctx: &mut ReleaseContext<'_>) {
        for view in self.take_views() {
            ctx.cpu_descriptors.release(&view);
        }
        match self.native {
            NativeOwnership::Owned(native) => {
                log::trace!(
                    "Destroying resource '{}' ({native:?})",
                    self.desc.label_or_default()
                );
                ctx.device.destroy_resource(native);
            }
            NativeOwnership::Borrowed(native) => {
                log::trace!(
                    "Dropping borrowed resource '{}' ({native:?})",
                    self.desc.label_or_default()
                );
            }
        }
    }
}
