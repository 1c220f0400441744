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

//! The commands the core records into native command lists.

use super::types::{NativeHeap, NativePipeline, NativeResource, NativeBindingLayout};
use crate::descriptor::{CpuDescriptor, GpuDescriptor};
use crate::resource::ResourceState;

/// A single barrier as handed to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeBarrier {
    /// The resource changes usage state.
    Transition {
        /// Transitioned resource.
        resource: NativeResource,
        /// State before the barrier.
        before: ResourceState,
        /// State after the barrier.
        after: ResourceState,
    },
    /// Orders unordered-access work on the resource without a state change.
    Hazard {
        /// Synchronized resource.
        resource: NativeResource,
    },
}

/// A vertex buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBufferView {
    /// Device address of the first vertex.
    pub gpu_address: u64,
    /// Bytes visible from the address.
    pub size: u32,
    /// Bytes between two vertices.
    pub stride: u32,
}

/// Width of index buffer elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    /// 16-bit indices.
    Uint16,
    /// 32-bit indices.
    Uint32,
}

/// An index buffer binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBufferView {
    /// Device address of the first index.
    pub gpu_address: u64,
    /// Bytes visible from the address.
    pub size: u32,
    /// Index width.
    pub format: IndexFormat,
}

/// A color attachment of a render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorAttachment {
    /// Render-target view.
    pub view: CpuDescriptor,
    /// Clear color, `None` to load the previous contents.
    pub clear: Option<[f32; 4]>,
}

/// The depth attachment of a render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthAttachment {
    /// Depth-stencil view.
    pub view: CpuDescriptor,
    /// Clear depth, `None` to load the previous contents.
    pub clear: Option<f32>,
}

/// A command recorded into a native command list.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    /// A batch of barriers issued in one call.
    Barriers(Vec<NativeBarrier>),
    /// Binds the shader-visible descriptor heaps.
    SetDescriptorHeaps {
        /// CBV/SRV/UAV heap.
        resources: NativeHeap,
        /// Sampler heap.
        samplers: NativeHeap,
    },
    /// Binds a pipeline state object.
    SetPipeline(NativePipeline),
    /// Binds the binding layout of the following draws or dispatches.
    SetBindingLayout {
        /// The layout.
        layout: NativeBindingLayout,
        /// Whether it is bound on the compute slot.
        compute: bool,
    },
    /// Binds a constant buffer directly in a root parameter.
    SetRootConstantBuffer {
        /// Root parameter index.
        parameter: u32,
        /// Device address of the buffer data.
        gpu_address: u64,
        /// Whether it is bound on the compute slot.
        compute: bool,
    },
    /// Binds a descriptor table in a root parameter.
    SetDescriptorTable {
        /// Root parameter index.
        parameter: u32,
        /// First descriptor of the table.
        base: GpuDescriptor,
        /// Whether it is bound on the compute slot.
        compute: bool,
    },
    /// Binds vertex buffers starting at a slot.
    SetVertexBuffers {
        /// First slot.
        first_slot: u32,
        /// Buffers for consecutive slots.
        buffers: Vec<VertexBufferView>,
    },
    /// Binds the index buffer.
    SetIndexBuffer(IndexBufferView),
    /// Starts rendering into attachments.
    BeginRenderPass {
        /// Color attachments.
        color: Vec<ColorAttachment>,
        /// Optional depth attachment.
        depth: Option<DepthAttachment>,
    },
    /// Ends the current render pass.
    EndRenderPass,
    /// Non-indexed draw.
    Draw {
        /// Vertices per instance.
        vertex_count: u32,
        /// Instances.
        instance_count: u32,
        /// First vertex.
        first_vertex: u32,
        /// First instance.
        first_instance: u32,
    },
    /// Indexed draw.
    DrawIndexed {
        /// Indices per instance.
        index_count: u32,
        /// Instances.
        instance_count: u32,
        /// First index.
        first_index: u32,
        /// Value added to each index.
        base_vertex: i32,
        /// First instance.
        first_instance: u32,
    },
    /// Compute dispatch.
    Dispatch {
        /// Groups in X.
        x: u32,
        /// Groups in Y.
        y: u32,
        /// Groups in Z.
        z: u32,
    },
    /// Buffer to buffer copy.
    CopyBuffer {
        /// Source buffer.
        src: NativeResource,
        /// Source offset.
        src_offset: u64,
        /// Destination buffer.
        dst: NativeResource,
        /// Destination offset.
        dst_offset: u64,
        /// Bytes to copy.
        size: u64,
    },
    /// Buffer to texture copy of a whole texture.
    CopyBufferToTexture {
        /// Source buffer.
        src: NativeResource,
        /// Source offset.
        src_offset: u64,
        /// Row pitch in the source.
        bytes_per_row: u32,
        /// Destination texture.
        dst: NativeResource,
        /// Copied width.
        width: u32,
        /// Copied height.
        height: u32,
    },
    /// Texture to buffer copy of a whole texture.
    CopyTextureToBuffer {
        /// Source texture.
        src: NativeResource,
        /// Destination buffer.
        dst: NativeResource,
        /// Destination offset.
        dst_offset: u64,
        /// Row pitch in the destination.
        bytes_per_row: u32,
        /// Copied width.
        width: u32,
        /// Copied height.
        height: u32,
    },
}
