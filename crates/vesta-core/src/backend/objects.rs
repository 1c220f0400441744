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

use crate::binding::{BindingLayoutDesc, BindingMap, RootLayoutDesc, StageRegisters};
use crate::descriptor::{CpuDescriptor, ViewAllocation};
use crate::driver::{NativeBindingLayout, NativePipeline, SamplerDesc, ShaderBytecode};
use crate::pool::Release;
use crate::release::ReleaseContext;
use crate::staging::{StagingAllocation, StagingDirection};

/// A sampler stored in the backend's sampler pool.
#[derive(Debug)]
pub struct PooledSampler {
    desc: SamplerDesc,
    view: ViewAllocation,
}

impl PooledSampler {
    pub(crate) fn new(desc: SamplerDesc, view: ViewAllocation) -> Self {
        Self { desc, view }
    }

    /// The sampler state.
    pub fn desc(&self) -> &SamplerDesc {
        &self.desc
    }

    /// The CPU descriptor copied into sampler tables.
    pub fn descriptor(&self) -> CpuDescriptor {
        self.view.descriptor
    }

    pub(crate) fn view(&self) -> ViewAllocation {
        self.view
    }
}

impl Release<ReleaseContext<'_>> for PooledSampler {
    fn release(self, ctx: &mut ReleaseContext<'_>) {
        ctx.cpu_descriptors.release(&self.view);
    }
}

/// Whether a pipeline draws or dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    /// Rasterization pipeline.
    Graphics,
    /// Compute pipeline.
    Compute,
}

/// Describes a graphics pipeline.
#[derive(Debug, Clone, Default)]
pub struct GraphicsPipelineDesc {
    /// Debug label.
    pub label: Option<String>,
    /// Compiled shaders. A vertex shader is required.
    pub shaders: Vec<ShaderBytecode>,
    /// The abstract bindings.
    pub bindings: BindingLayoutDesc,
    /// Reflected registers of every stage.
    pub registers: StageRegisters,
    /// Stride of each vertex buffer slot.
    pub vertex_strides: Vec<u32>,
    /// Opaque fixed-function state from the frontend.
    pub fixed_function_state: Vec<u8>,
}

/// Describes a compute pipeline.
#[derive(Debug, Clone)]
pub struct ComputePipelineDesc {
    /// Debug label.
    pub label: Option<String>,
    /// The compute shader.
    pub shader: ShaderBytecode,
    /// The abstract bindings.
    pub bindings: BindingLayoutDesc,
    /// Reflected registers of the compute stage.
    pub registers: StageRegisters,
}

/// A pipeline stored in the backend's pipeline pool.
#[derive(Debug)]
pub struct PooledPipeline {
    pub(crate) kind: PipelineKind,
    pub(crate) label: Option<String>,
    pub(crate) native: NativePipeline,
    pub(crate) layout: NativeBindingLayout,
    pub(crate) bindings: BindingLayoutDesc,
    pub(crate) registers: StageRegisters,
    pub(crate) root: RootLayoutDesc,
    pub(crate) map: BindingMap,
    pub(crate) vertex_strides: Vec<u32>,
}

impl PooledPipeline {
    /// Graphics or compute.
    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    /// Debug label.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// The root layout built from the bindings.
    pub fn root_layout(&self) -> &RootLayoutDesc {
        &self.root
    }

    /// Where every binding lives in the root layout.
    pub fn binding_map(&self) -> &BindingMap {
        &self.map
    }
}

impl Release<ReleaseContext<'_>> for PooledPipeline {
    fn release(self, ctx: &mut ReleaseContext<'_>) {
        ctx.device.destroy_pipeline(self.native);
        ctx.device.destroy_binding_layout(self.layout);
    }
}

/// A host-visible buffer owned by the caller until
/// [`crate::RenderBackend::destroy_staging_buffer`].
#[derive(Debug, PartialEq, Eq)]
pub struct StagingBuffer {
    pub(crate) allocation: StagingAllocation,
    pub(crate) direction: StagingDirection,
}

impl StagingBuffer {
    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.allocation.size
    }

    /// Upload or readback.
    pub fn direction(&self) -> StagingDirection {
        self.direction
    }
}
