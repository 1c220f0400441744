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

//! Descriptor heaps and the allocators built on top of them.
//!
//! Two families of allocators exist:
//! - [`CpuDescriptorPool`]: long-lived, CPU-only descriptors (render-target and
//!   depth-stencil views, and the staging copies of shader views), reusable through
//!   an occupancy bitmap.
//! - [`ShaderVisibleHeap`]: per-frame bump allocation of the descriptors shaders
//!   read during a draw, split into one slice per frame in flight.

mod cpu_pool;
mod gpu_heap;
mod heap;

pub use self::cpu_pool::{CpuDescriptorAllocators, CpuDescriptorPool};
pub use self::gpu_heap::{HeapGrowth, ShaderVisibleHeap};
pub use self::heap::DescriptorHeap;

/// The kinds of descriptor heaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorHeapKind {
    /// Constant buffer, shader resource and unordered access views.
    CbvSrvUav,
    /// Samplers.
    Sampler,
    /// Render-target views. Never shader visible.
    RenderTarget,
    /// Depth-stencil views. Never shader visible.
    DepthStencil,
}

impl DescriptorHeapKind {
    /// All kinds, in the order used to index per-kind tables.
    pub const ALL: [DescriptorHeapKind; 4] = [
        DescriptorHeapKind::CbvSrvUav,
        DescriptorHeapKind::Sampler,
        DescriptorHeapKind::RenderTarget,
        DescriptorHeapKind::DepthStencil,
    ];

    pub(crate) const fn index(&self) -> usize {
        match self {
            DescriptorHeapKind::CbvSrvUav => 0,
            DescriptorHeapKind::Sampler => 1,
            DescriptorHeapKind::RenderTarget => 2,
            DescriptorHeapKind::DepthStencil => 3,
        }
    }

    /// Whether heaps of this kind can be bound for shader access.
    pub const fn can_be_shader_visible(&self) -> bool {
        matches!(
            self,
            DescriptorHeapKind::CbvSrvUav | DescriptorHeapKind::Sampler
        )
    }
}

/// CPU handle of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CpuDescriptor(pub u64);

impl CpuDescriptor {
    /// The descriptor `index` strides further.
    pub const fn offset(self, index: u32, stride: u32) -> Self {
        Self(self.0 + index as u64 * stride as u64)
    }
}

/// GPU handle of a descriptor in a shader-visible heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuDescriptor(pub u64);

impl GpuDescriptor {
    /// The descriptor `index` strides further.
    pub const fn offset(self, index: u32, stride: u32) -> Self {
        Self(self.0 + index as u64 * stride as u64)
    }
}

/// The first descriptor of a contiguous allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// CPU handle.
    pub cpu: CpuDescriptor,
    /// GPU handle, only for shader-visible heaps.
    pub gpu: Option<GpuDescriptor>,
    /// Position of the descriptor in its native heap.
    pub index: u32,
}

/// The kind of a view a resource owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    /// Read-only shader view.
    ShaderResource,
    /// Read/write shader view.
    UnorderedAccess,
    /// Color attachment view.
    RenderTarget,
    /// Depth-stencil attachment view.
    DepthStencil,
    /// Sampler state.
    Sampler,
}

impl ViewKind {
    /// The heap kind the view is allocated from.
    pub const fn heap_kind(&self) -> DescriptorHeapKind {
        match self {
            ViewKind::ShaderResource | ViewKind::UnorderedAccess => DescriptorHeapKind::CbvSrvUav,
            ViewKind::RenderTarget => DescriptorHeapKind::RenderTarget,
            ViewKind::DepthStencil => DescriptorHeapKind::DepthStencil,
            ViewKind::Sampler => DescriptorHeapKind::Sampler,
        }
    }
}

/// A CPU-pool allocation backing one or more views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewAllocation {
    /// The kind of view.
    pub kind: ViewKind,
    /// The first descriptor.
    pub descriptor: CpuDescriptor,
    /// Number of consecutive descriptors.
    pub count: u32,
}
