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

//! Opaque native object identifiers and the descriptions passed to the driver.

use crate::binding::ShaderStage;
use crate::resource::{ResourceKind, TextureFormat};

/// Opaque handle to a native buffer or texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeResource(pub u64);

/// Opaque handle to a native descriptor heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeHeap(pub u64);

/// Opaque handle to a native fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeFence(pub u64);

/// Opaque handle to a compiled pipeline state object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativePipeline(pub u64);

/// Opaque handle to a native binding layout (root signature / pipeline layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeBindingLayout(pub u64);

/// Opaque handle to a command allocator and its command list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeCommandList(pub u64);

/// The result of a successful native resource creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeAllocation {
    /// The created object.
    pub resource: NativeResource,
    /// Device address of the first byte.
    pub gpu_address: u64,
    /// Allocated size in bytes, at least the requested size.
    pub size: u64,
}

/// The result of a successful native descriptor heap creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeHeapInfo {
    /// The created heap.
    pub heap: NativeHeap,
    /// CPU handle of descriptor 0.
    pub cpu_base: u64,
    /// GPU handle of descriptor 0, only for shader-visible heaps.
    pub gpu_base: Option<u64>,
    /// Distance in bytes between two descriptors.
    pub stride: u32,
}

/// Texture filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    /// Nearest texel.
    Nearest,
    /// Bilinear interpolation.
    #[default]
    Linear,
}

/// Texture addressing outside of `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressMode {
    /// Tile the texture.
    #[default]
    Repeat,
    /// Clamp to the edge texel.
    ClampToEdge,
    /// Tile with mirroring.
    MirrorRepeat,
}

/// Describes a sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SamplerDesc {
    /// Minification and magnification filter.
    pub filter: FilterMode,
    /// Addressing mode for all coordinates.
    pub address_mode: AddressMode,
    /// Maximum anisotropy; 1 disables anisotropic filtering.
    pub max_anisotropy: u8,
}

/// What a descriptor written by [`crate::NativeDevice::write_view`] describes.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewDesc {
    /// Read-only shader view.
    ShaderResource {
        /// Viewed resource.
        resource: NativeResource,
        /// Buffer or texture shape.
        kind: ResourceKind,
    },
    /// Read/write shader view.
    UnorderedAccess {
        /// Viewed resource.
        resource: NativeResource,
        /// Buffer or texture shape.
        kind: ResourceKind,
    },
    /// Color attachment view.
    RenderTarget {
        /// Viewed texture.
        resource: NativeResource,
        /// Attachment format.
        format: TextureFormat,
    },
    /// Depth/stencil attachment view.
    DepthStencil {
        /// Viewed texture.
        resource: NativeResource,
        /// Attachment format.
        format: TextureFormat,
    },
    /// Sampler state.
    Sampler(SamplerDesc),
}

/// Compiled shader bytecode for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderBytecode {
    /// Stage the bytecode was compiled for.
    pub stage: ShaderStage,
    /// Backend-specific bytecode.
    pub code: Vec<u8>,
    /// Entry point name.
    pub entry_point: String,
}

/// Describes a pipeline to the driver once its binding layout exists.
#[derive(Debug, Clone, Copy)]
pub struct NativePipelineDesc<'a> {
    /// Debug label.
    pub label: Option<&'a str>,
    /// The native binding layout built for the pipeline.
    pub layout: NativeBindingLayout,
    /// Shader stages.
    pub shaders: &'a [ShaderBytecode],
    /// Opaque fixed-function state produced by the frontend.
    pub fixed_function_state: &'a [u8],
    /// Vertex buffer strides per slot (graphics only).
    pub vertex_strides: &'a [u32],
}

/// One image of the swapchain owned by the windowing layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainImage {
    /// The native image.
    pub resource: NativeResource,
    /// Its format.
    pub format: TextureFormat,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// What happened when presenting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// The image was queued for presentation.
    Presented,
    /// Presentation was skipped (occluded window, no swapchain, ...).
    Skipped,
}
