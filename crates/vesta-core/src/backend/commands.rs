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

//! Passes, pipeline and resource binding, draws and dispatches.

use super::resources::check_range;
use super::{PipelineKind, PooledPipeline, RenderBackend};
use crate::binding::{visit_bindings, DescriptorWriter, ShaderResources, TableAllocation};
use crate::descriptor::{CpuDescriptor, DescriptorHeapKind, HeapGrowth, ViewKind};
use crate::driver::{
    ColorAttachment, DepthAttachment, GpuCommand, IndexBufferView, IndexFormat, NativeDevice,
    VertexBufferView,
};
use crate::error::{BackendError, DescriptorError, FrameError, ResourceError};
use crate::frame::PassKind;
use crate::pool::Handle;
use crate::resource::{PooledResource, ResourceState, ResourceUsage};

/// A color attachment of a render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorTarget {
    /// A texture created with `RENDER_TARGET` usage, or the back buffer.
    pub texture: Handle<PooledResource>,
    /// Clear color, `None` to keep the previous contents.
    pub clear: Option<[f32; 4]>,
}

/// The depth attachment of a render pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthTarget {
    /// A texture created with `DEPTH_STENCIL` usage.
    pub texture: Handle<PooledResource>,
    /// Clear depth, `None` to keep the previous contents.
    pub clear: Option<f32>,
}

/// The attachments of a render pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderPassDesc {
    /// Color attachments in slot order.
    pub color: Vec<ColorTarget>,
    /// Optional depth attachment.
    pub depth: Option<DepthTarget>,
}

/// A vertex buffer bound to the slot of its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBinding {
    /// A buffer created with `VERTEX` usage.
    pub buffer: Handle<PooledResource>,
    /// Byte offset of the first vertex.
    pub offset: u64,
}

/// The index buffer of the next indexed draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexBinding {
    /// A buffer created with `INDEX` usage.
    pub buffer: Handle<PooledResource>,
    /// Byte offset of the first index.
    pub offset: u64,
    /// Index width.
    pub format: IndexFormat,
}

/// Reports misuse of the recording API. Panics in debug builds.
fn contract_violation(message: &'static str) -> FrameError {
    log::error!("{message}");
    if cfg!(debug_assertions) {
        panic!("{message}");
    }
    FrameError::InvalidState(message)
}

fn attachment_view(
    resource: Option<&PooledResource>,
    kind: ViewKind,
    usage: &'static str,
) -> Result<CpuDescriptor, ResourceError> {
    resource
        .ok_or(ResourceError::InvalidHandle)?
        .view(kind)
        .ok_or(ResourceError::MissingUsage(usage))
}

impl<D: NativeDevice> RenderBackend<D> {
    /// Opens a render pass on the given attachments.
    ///
    /// The attachments are transitioned to their attachment states first.
    /// ## Errors
    /// * `ResourceError::InvalidHandle` / `MissingUsage` - If an attachment has no
    ///   matching view. Nothing is recorded in that case.
    /// * `FrameError::InvalidState` - If no frame is recorded or a pass is open.
    pub fn begin_pass(&mut self, desc: &RenderPassDesc) -> Result<(), BackendError> {
        self.ensure_recording()?;
        if self.frames.open_pass().is_some() {
            return Err(FrameError::InvalidState("a pass is already open").into());
        }

        let mut color = Vec::with_capacity(desc.color.len());
        for target in &desc.color {
            let view = attachment_view(
                self.resources.lookup(target.texture),
                ViewKind::RenderTarget,
                "RENDER_TARGET",
            )?;
            color.push(ColorAttachment {
                view,
                clear: target.clear,
            });
        }
        let depth = match &desc.depth {
            Some(target) => Some(DepthAttachment {
                view: attachment_view(
                    self.resources.lookup(target.texture),
                    ViewKind::DepthStencil,
                    "DEPTH_STENCIL",
                )?,
                clear: target.clear,
            }),
            None => None,
        };

        for target in &desc.color {
            self.barriers
                .add_transition(&mut self.resources, target.texture, ResourceState::RenderTarget);
        }
        if let Some(target) = &desc.depth {
            self.barriers
                .add_transition(&mut self.resources, target.texture, ResourceState::DepthWrite);
        }
        self.flush_barriers();

        self.frames.begin_pass(PassKind::Render)?;
        self.record(GpuCommand::BeginRenderPass { color, depth });
        Ok(())
    }

    /// Closes the open render pass.
    pub fn end_pass(&mut self) -> Result<(), FrameError> {
        self.frames.end_pass(PassKind::Render)?;
        self.record(GpuCommand::EndRenderPass);
        Ok(())
    }

    /// Opens a compute pass.
    pub fn begin_compute_pass(&mut self) -> Result<(), FrameError> {
        self.ensure_recording()?;
        self.frames.begin_pass(PassKind::Compute)
    }

    /// Closes the open compute pass.
    pub fn end_compute_pass(&mut self) -> Result<(), FrameError> {
        self.frames.end_pass(PassKind::Compute)
    }

    /// Binds a graphics pipeline and its binding layout.
    pub fn set_graphics_pipeline(
        &mut self,
        handle: Handle<PooledPipeline>,
    ) -> Result<(), FrameError> {
        self.set_pipeline(handle, PipelineKind::Graphics)
    }

    /// Binds a compute pipeline and its binding layout.
    pub fn set_compute_pipeline(&mut self, handle: Handle<PooledPipeline>) -> Result<(), FrameError> {
        self.set_pipeline(handle, PipelineKind::Compute)
    }

    /// Resolves `bound` against the bound pipeline and binds it.
    ///
    /// Descriptors are copied into tables allocated from the current frame's
    /// slice of the shader-visible heaps, which grow when the slice is too small.
    /// Bound resources are transitioned to the states their bindings need, and
    /// storage resources get a hazard barrier when their accesses conflict.
    /// ## Errors
    /// * `ResourceError::InvalidHandle` - If a binding the pipeline uses has no
    ///   valid resource. Nothing is recorded in that case.
    /// * `DescriptorError::HeapCreationFailed` - If a heap had to grow and could not.
    pub fn set_shader_resources(&mut self, bound: &ShaderResources) -> Result<(), BackendError> {
        self.ensure_recording()?;
        let Some(handle) = self.bound_pipeline else {
            return Err(contract_violation("set_shader_resources without a bound pipeline").into());
        };
        let slot = self.frames.current_slot();
        let list = self.frames.command_list();
        let pipeline = self
            .pipelines
            .lookup(handle)
            .ok_or(ResourceError::InvalidHandle)?;
        let compute = pipeline.kind == PipelineKind::Compute;

        let missing = DescriptorWriter::missing_bindings(
            &self.resources,
            &self.samplers,
            bound,
            &pipeline.map,
            &pipeline.bindings,
            &pipeline.registers,
        );
        if !missing.is_empty() {
            log::error!(
                "Pipeline '{}' has nothing valid bound at bindings {missing:?}",
                pipeline.label().unwrap_or("<unnamed>")
            );
            return Err(ResourceError::InvalidHandle.into());
        }

        let mut grown = false;
        for heap in [&mut self.gpu_resources, &mut self.gpu_samplers] {
            let needed = pipeline.map.descriptors_needed(heap.kind());
            if needed > 0 {
                let growth = heap.ensure_capacity(&self.device, &mut self.releases, slot, needed)?;
                grown |= growth == HeapGrowth::Grown;
            }
        }
        if grown {
            self.device.record(
                list,
                GpuCommand::SetDescriptorHeaps {
                    resources: self.gpu_resources.native(),
                    samplers: self.gpu_samplers.native(),
                },
            );
        }

        let mut tables = Vec::with_capacity(pipeline.map.tables().len());
        for table in pipeline.map.tables() {
            let heap = match table.heap {
                DescriptorHeapKind::Sampler => &mut self.gpu_samplers,
                _ => &mut self.gpu_resources,
            };
            let base = heap
                .allocate(slot, table.size)
                .ok_or(DescriptorError::Exhausted {
                    requested: table.size,
                })?;
            tables.push(TableAllocation {
                parameter: table.parameter,
                heap: table.heap,
                base,
                stride: heap.stride(),
            });
        }

        let mut writer =
            DescriptorWriter::new(&self.resources, &self.samplers, bound, &pipeline.map, &tables);
        visit_bindings(&pipeline.bindings, &pipeline.registers, &mut writer);
        let writes = writer.into_writes();
        debug_assert!(writes.missing.is_empty());

        for copy in &writes.copies {
            self.device.copy_descriptors(copy.heap, copy.dst, copy.src, 1);
        }
        for (resource, state) in writes.transitions {
            self.barriers
                .add_transition(&mut self.resources, resource, state);
        }
        for (resource, access) in writes.hazards {
            self.barriers
                .enqueue_hazard_barrier(&mut self.resources, resource, access);
        }
        self.barriers.flush(&self.device, list);

        for table in &tables {
            if let Some(base) = table.base.gpu {
                self.device.record(
                    list,
                    GpuCommand::SetDescriptorTable {
                        parameter: table.parameter,
                        base,
                        compute,
                    },
                );
            }
        }
        for (parameter, gpu_address) in writes.root_buffers {
            self.device.record(
                list,
                GpuCommand::SetRootConstantBuffer {
                    parameter,
                    gpu_address,
                    compute,
                },
            );
        }
        Ok(())
    }

    /// Binds vertex buffers from slot 0 and an optional index buffer.
    ///
    /// Strides come from the bound graphics pipeline.
    pub fn set_vertex_input(
        &mut self,
        vertex_buffers: &[VertexBinding],
        index: Option<IndexBinding>,
    ) -> Result<(), BackendError> {
        self.ensure_recording()?;
        let strides = match self.bound_pipeline.and_then(|h| self.pipelines.lookup(h)) {
            Some(pipeline) if pipeline.kind == PipelineKind::Graphics => {
                pipeline.vertex_strides.clone()
            }
            _ => {
                return Err(
                    contract_violation("set_vertex_input without a graphics pipeline").into(),
                )
            }
        };

        let mut views = Vec::with_capacity(vertex_buffers.len());
        for (slot, binding) in vertex_buffers.iter().enumerate() {
            let (gpu_address, size) = self.buffer_range(
                binding.buffer,
                binding.offset,
                ResourceUsage::VERTEX,
                "VERTEX",
            )?;
            views.push(VertexBufferView {
                gpu_address,
                size,
                stride: strides.get(slot).copied().unwrap_or(0),
            });
        }
        let index_view = match index {
            Some(binding) => {
                let (gpu_address, size) = self.buffer_range(
                    binding.buffer,
                    binding.offset,
                    ResourceUsage::INDEX,
                    "INDEX",
                )?;
                Some(IndexBufferView {
                    gpu_address,
                    size,
                    format: binding.format,
                })
            }
            None => None,
        };

        for binding in vertex_buffers {
            self.barriers.add_transition(
                &mut self.resources,
                binding.buffer,
                ResourceState::VertexAndConstantBuffer,
            );
        }
        if let Some(binding) = index {
            self.barriers
                .add_transition(&mut self.resources, binding.buffer, ResourceState::IndexBuffer);
        }
        self.flush_barriers();

        if !views.is_empty() {
            self.record(GpuCommand::SetVertexBuffers {
                first_slot: 0,
                buffers: views,
            });
        }
        if let Some(view) = index_view {
            self.record(GpuCommand::SetIndexBuffer(view));
        }
        Ok(())
    }

    /// Draws non-indexed primitives. Requires an open render pass and a bound
    /// graphics pipeline.
    pub fn draw(
        &mut self,
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    ) -> Result<(), FrameError> {
        self.ensure_drawable(PassKind::Render)?;
        self.flush_barriers();
        self.record(GpuCommand::Draw {
            vertex_count,
            instance_count,
            first_vertex,
            first_instance,
        });
        Ok(())
    }

    /// Draws indexed primitives from the bound index buffer.
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        base_vertex: i32,
        first_instance: u32,
    ) -> Result<(), FrameError> {
        self.ensure_drawable(PassKind::Render)?;
        self.flush_barriers();
        self.record(GpuCommand::DrawIndexed {
            index_count,
            instance_count,
            first_index,
            base_vertex,
            first_instance,
        });
        Ok(())
    }

    /// Dispatches compute work groups. Requires an open compute pass and a bound
    /// compute pipeline.
    pub fn dispatch(&mut self, x: u32, y: u32, z: u32) -> Result<(), FrameError> {
        self.ensure_drawable(PassKind::Compute)?;
        self.flush_barriers();
        self.record(GpuCommand::Dispatch { x, y, z });
        Ok(())
    }

    fn set_pipeline(
        &mut self,
        handle: Handle<PooledPipeline>,
        kind: PipelineKind,
    ) -> Result<(), FrameError> {
        self.ensure_recording()?;
        match self.pipelines.lookup(handle) {
            Some(pipeline) if pipeline.kind == kind => {}
            Some(_) => return Err(contract_violation("pipeline bound with the wrong kind")),
            None => return Err(contract_violation("binding a null or destroyed pipeline")),
        }
        self.bound_pipeline = Some(handle);
        self.bind_pipeline_state(handle);
        Ok(())
    }

    pub(super) fn bind_pipeline_state(&self, handle: Handle<PooledPipeline>) {
        if let Some(pipeline) = self.pipelines.lookup(handle) {
            let compute = pipeline.kind == PipelineKind::Compute;
            self.record(GpuCommand::SetPipeline(pipeline.native));
            self.record(GpuCommand::SetBindingLayout {
                layout: pipeline.layout,
                compute,
            });
        }
    }

    fn ensure_drawable(&self, pass: PassKind) -> Result<(), FrameError> {
        self.ensure_recording()?;
        if self.frames.open_pass() != Some(pass) {
            return Err(contract_violation("draw or dispatch outside of a matching pass"));
        }
        let expected = match pass {
            PassKind::Render => PipelineKind::Graphics,
            PassKind::Compute => PipelineKind::Compute,
        };
        match self.bound_pipeline.and_then(|h| self.pipelines.lookup(h)) {
            Some(pipeline) if pipeline.kind == expected => Ok(()),
            _ => Err(contract_violation("draw or dispatch without a matching pipeline")),
        }
    }

    /// Device address and visible size of a buffer bound from `offset`.
    fn buffer_range(
        &self,
        buffer: Handle<PooledResource>,
        offset: u64,
        usage: ResourceUsage,
        usage_name: &'static str,
    ) -> Result<(u64, u32), ResourceError> {
        let resource = self
            .resources
            .lookup(buffer)
            .ok_or(ResourceError::InvalidHandle)?;
        if !resource.desc().usage.contains(usage) {
            return Err(ResourceError::MissingUsage(usage_name));
        }
        check_range(offset, 0, resource.size())?;
        let size = u32::try_from(resource.size() - offset).unwrap_or(u32::MAX);
        Ok((resource.gpu_address() + offset, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::GraphicsPipelineDesc;
    use crate::binding::{
        BindingKind, BindingLayoutDesc, ResourceBinding, ShaderResource, ShaderStage,
        ShaderStageFlags, StageRegisters,
    };
    use crate::config::BackendConfig;
    use crate::driver::mock::MockDevice;
    use crate::driver::{NativeBarrier, SamplerDesc, ShaderBytecode};
    use crate::resource::{AccessFlags, ResourceDesc, TextureFormat};

    fn backend() -> RenderBackend<MockDevice> {
        RenderBackend::new(MockDevice::with_swapchain(2), BackendConfig::default()).unwrap()
    }

    fn shader(stage: ShaderStage) -> ShaderBytecode {
        ShaderBytecode {
            stage,
            code: Vec::new(),
            entry_point: "main".to_string(),
        }
    }

    fn textured_pipeline(backend: &mut RenderBackend<MockDevice>) -> Handle<PooledPipeline> {
        backend
            .create_graphics_pipeline(&GraphicsPipelineDesc {
                label: Some("textured".to_string()),
                shaders: vec![shader(ShaderStage::Vertex), shader(ShaderStage::Fragment)],
                bindings: BindingLayoutDesc::new(vec![
                    ResourceBinding::new(BindingKind::UniformBuffer, ShaderStageFlags::VERTEX),
                    ResourceBinding::new(BindingKind::SampledTexture, ShaderStageFlags::FRAGMENT),
                    ResourceBinding::new(BindingKind::Sampler, ShaderStageFlags::FRAGMENT),
                ]),
                registers: StageRegisters::new()
                    .with_stage(ShaderStage::Vertex, &[(0, 0)])
                    .with_stage(ShaderStage::Fragment, &[(1, 0), (2, 0)]),
                vertex_strides: vec![24],
                fixed_function_state: Vec::new(),
            })
            .unwrap()
    }

    #[test]
    fn render_pass_transitions_the_back_buffer() {
        let mut backend = backend();
        backend.begin_frame().unwrap();
        let back_buffer = backend.back_buffer().unwrap();
        backend.device().clear_commands();

        backend
            .begin_pass(&RenderPassDesc {
                color: vec![ColorTarget {
                    texture: back_buffer,
                    clear: Some([0.0, 0.0, 0.0, 1.0]),
                }],
                depth: None,
            })
            .unwrap();
        backend.end_pass().unwrap();
        backend.end_frame().unwrap();

        let commands = backend.device().commands();
        let native = backend.resource(back_buffer).unwrap().native();
        assert_eq!(
            commands[0],
            GpuCommand::Barriers(vec![NativeBarrier::Transition {
                resource: native,
                before: ResourceState::Present,
                after: ResourceState::RenderTarget,
            }])
        );
        assert!(matches!(commands[1], GpuCommand::BeginRenderPass { .. }));
        assert_eq!(commands[2], GpuCommand::EndRenderPass);
        assert_eq!(
            commands[3],
            GpuCommand::Barriers(vec![NativeBarrier::Transition {
                resource: native,
                before: ResourceState::RenderTarget,
                after: ResourceState::Present,
            }])
        );
    }

    #[test]
    fn attachment_without_view_records_nothing() {
        let mut backend = backend();
        let texture = backend
            .create_texture(&ResourceDesc::texture(
                "albedo",
                4,
                4,
                TextureFormat::Rgba8Unorm,
                ResourceUsage::SHADER_READ,
            ))
            .unwrap();
        backend.begin_frame().unwrap();
        backend.device().clear_commands();

        let result = backend.begin_pass(&RenderPassDesc {
            color: vec![ColorTarget {
                texture,
                clear: None,
            }],
            depth: None,
        });

        assert!(matches!(
            result,
            Err(BackendError::Resource(ResourceError::MissingUsage("RENDER_TARGET")))
        ));
        assert!(backend.device().commands().is_empty());
        assert_eq!(backend.frames().open_pass(), None);
    }

    #[test]
    fn shader_resources_are_copied_into_tables() {
        // ARRANGE
        let mut backend = backend();
        let pipeline = textured_pipeline(&mut backend);
        let uniforms = backend
            .create_buffer(&ResourceDesc::buffer("camera", 256, ResourceUsage::UNIFORM))
            .unwrap();
        let texture = backend
            .create_texture(&ResourceDesc::texture(
                "albedo",
                4,
                4,
                TextureFormat::Rgba8Unorm,
                ResourceUsage::SHADER_READ,
            ))
            .unwrap();
        let sampler = backend.create_sampler(SamplerDesc::default()).unwrap();
        let srv = backend
            .resource(texture)
            .unwrap()
            .view(ViewKind::ShaderResource)
            .unwrap();
        let bound = ShaderResources::new()
            .bind(
                0,
                ShaderResource::UniformBuffer {
                    buffer: uniforms,
                    offset: 64,
                },
            )
            .bind(1, ShaderResource::Texture(texture))
            .bind(2, ShaderResource::Sampler(sampler));

        // ACT
        backend.begin_frame().unwrap();
        backend.set_graphics_pipeline(pipeline).unwrap();
        backend.set_shader_resources(&bound).unwrap();

        // ASSERT
        let copies = backend.device().descriptor_copies();
        assert_eq!(copies.len(), 2);
        assert!(copies.iter().any(|(_, src, _)| *src == srv));
        assert_eq!(
            backend.resource(texture).unwrap().state(),
            ResourceState::ShaderResource
        );
        let address = backend.resource(uniforms).unwrap().gpu_address() + 64;
        let commands = backend.device().commands();
        assert!(commands.contains(&GpuCommand::SetRootConstantBuffer {
            parameter: 0,
            gpu_address: address,
            compute: false,
        }));
        let tables = commands
            .iter()
            .filter(|c| matches!(c, GpuCommand::SetDescriptorTable { .. }))
            .count();
        assert_eq!(tables, 2);
        assert_eq!(backend.gpu_resources.slice_head(0), 1);
        assert_eq!(backend.gpu_samplers.slice_head(0), 1);
    }

    #[test]
    fn missing_binding_is_an_error() {
        let mut backend = backend();
        let pipeline = textured_pipeline(&mut backend);
        backend.begin_frame().unwrap();
        backend.set_graphics_pipeline(pipeline).unwrap();

        let result = backend.set_shader_resources(&ShaderResources::new());

        assert!(matches!(
            result,
            Err(BackendError::Resource(ResourceError::InvalidHandle))
        ));
    }

    #[test]
    fn missing_binding_neither_grows_nor_allocates() {
        // ARRANGE
        let config = BackendConfig {
            gpu_resource_descriptors_per_frame: 1,
            gpu_sampler_descriptors_per_frame: 1,
            ..Default::default()
        };
        let mut backend = RenderBackend::new(MockDevice::new(), config).unwrap();
        let pipeline = backend
            .create_graphics_pipeline(&GraphicsPipelineDesc {
                shaders: vec![shader(ShaderStage::Fragment)],
                bindings: BindingLayoutDesc::new(vec![
                    ResourceBinding::new(BindingKind::SampledTexture, ShaderStageFlags::FRAGMENT),
                    ResourceBinding::new(BindingKind::SampledTexture, ShaderStageFlags::FRAGMENT),
                ]),
                registers: StageRegisters::new()
                    .with_stage(ShaderStage::Fragment, &[(0, 0), (1, 1)]),
                ..Default::default()
            })
            .unwrap();
        let texture = backend
            .create_texture(&ResourceDesc::texture(
                "albedo",
                4,
                4,
                TextureFormat::Rgba8Unorm,
                ResourceUsage::SHADER_READ,
            ))
            .unwrap();
        backend.begin_frame().unwrap();
        backend.set_graphics_pipeline(pipeline).unwrap();
        backend.device().clear_commands();
        let heap = backend.gpu_resources.native();
        let copies = backend.device().descriptor_copies().len();

        // ACT
        // The table needs two descriptors, more than the slice holds; binding 1 is unbound.
        let result = backend
            .set_shader_resources(&ShaderResources::new().bind(0, ShaderResource::Texture(texture)));

        // ASSERT
        assert!(matches!(
            result,
            Err(BackendError::Resource(ResourceError::InvalidHandle))
        ));
        assert!(backend.device().commands().is_empty());
        assert_eq!(backend.device().descriptor_copies().len(), copies);
        assert_eq!(backend.gpu_resources.native(), heap);
        assert_eq!(backend.gpu_resources.slice_head(0), 0);
        assert_eq!(backend.stats().descriptor_heap_growths, 0);
        assert_eq!(
            backend.resource(texture).unwrap().state(),
            ResourceState::Common
        );
    }

    #[test]
    fn heap_growth_rebinds_the_heaps() {
        let config = BackendConfig {
            gpu_sampler_descriptors_per_frame: 1,
            ..Default::default()
        };
        let mut backend = RenderBackend::new(MockDevice::new(), config).unwrap();
        let pipeline = backend
            .create_graphics_pipeline(&GraphicsPipelineDesc {
                shaders: vec![shader(ShaderStage::Vertex)],
                bindings: BindingLayoutDesc::new(vec![
                    ResourceBinding::new(BindingKind::Sampler, ShaderStageFlags::VERTEX),
                    ResourceBinding::new(BindingKind::Sampler, ShaderStageFlags::VERTEX),
                ]),
                registers: StageRegisters::new().with_stage(ShaderStage::Vertex, &[(0, 0), (1, 1)]),
                ..Default::default()
            })
            .unwrap();
        let sampler = backend.create_sampler(SamplerDesc::default()).unwrap();
        let bound = ShaderResources::new()
            .bind(0, ShaderResource::Sampler(sampler))
            .bind(1, ShaderResource::Sampler(sampler));
        backend.begin_frame().unwrap();
        backend.set_graphics_pipeline(pipeline).unwrap();
        backend.device().clear_commands();

        backend.set_shader_resources(&bound).unwrap();

        assert_eq!(backend.stats().descriptor_heap_growths, 1);
        assert!(matches!(
            backend.device().commands().first(),
            Some(GpuCommand::SetDescriptorHeaps { .. })
        ));
        assert_eq!(backend.gpu_samplers.slice_size(), 2);
        assert_eq!(backend.gpu_samplers.slice_head(0), 2);
    }

    #[test]
    fn storage_read_after_write_gets_a_hazard_barrier() {
        let mut backend = backend();
        let pipeline = backend
            .create_compute_pipeline(&crate::backend::ComputePipelineDesc {
                label: Some("blur".to_string()),
                shader: shader(ShaderStage::Compute),
                bindings: BindingLayoutDesc::new(vec![ResourceBinding::new(
                    BindingKind::StorageBuffer,
                    ShaderStageFlags::COMPUTE,
                )]),
                registers: StageRegisters::new().with_stage(ShaderStage::Compute, &[(0, 0)]),
            })
            .unwrap();
        let buffer = backend
            .create_buffer(&ResourceDesc::buffer("particles", 1024, ResourceUsage::STORAGE))
            .unwrap();
        let native = backend.resource(buffer).unwrap().native();
        let bind = |access| {
            ShaderResources::new().bind(0, ShaderResource::StorageBuffer { buffer, access })
        };

        backend.begin_frame().unwrap();
        backend.begin_compute_pass().unwrap();
        backend.set_compute_pipeline(pipeline).unwrap();
        backend.set_shader_resources(&bind(AccessFlags::WRITE)).unwrap();
        backend.dispatch(8, 1, 1).unwrap();
        backend.device().clear_commands();
        backend.set_shader_resources(&bind(AccessFlags::READ)).unwrap();
        backend.dispatch(8, 1, 1).unwrap();
        backend.end_compute_pass().unwrap();

        assert!(backend
            .device()
            .commands()
            .contains(&GpuCommand::Barriers(vec![NativeBarrier::Hazard { resource: native }])));
    }

    #[test]
    fn vertex_input_uses_pipeline_strides() {
        let mut backend = backend();
        let pipeline = textured_pipeline(&mut backend);
        let vertices = backend
            .create_buffer(&ResourceDesc::buffer("mesh", 240, ResourceUsage::VERTEX))
            .unwrap();
        let indices = backend
            .create_buffer(&ResourceDesc::buffer("indices", 60, ResourceUsage::INDEX))
            .unwrap();
        backend.begin_frame().unwrap();
        backend.set_graphics_pipeline(pipeline).unwrap();

        backend
            .set_vertex_input(
                &[VertexBinding {
                    buffer: vertices,
                    offset: 48,
                }],
                Some(IndexBinding {
                    buffer: indices,
                    offset: 0,
                    format: IndexFormat::Uint16,
                }),
            )
            .unwrap();

        let address = backend.resource(vertices).unwrap().gpu_address();
        assert!(backend
            .device()
            .commands()
            .contains(&GpuCommand::SetVertexBuffers {
                first_slot: 0,
                buffers: vec![VertexBufferView {
                    gpu_address: address + 48,
                    size: 192,
                    stride: 24,
                }],
            }));
        assert_eq!(
            backend.resource(indices).unwrap().state(),
            ResourceState::IndexBuffer
        );
    }

    #[test]
    fn vertex_input_checks_usage() {
        let mut backend = backend();
        let pipeline = textured_pipeline(&mut backend);
        let buffer = backend
            .create_buffer(&ResourceDesc::buffer("uniforms", 64, ResourceUsage::UNIFORM))
            .unwrap();
        backend.begin_frame().unwrap();
        backend.set_graphics_pipeline(pipeline).unwrap();

        let result = backend.set_vertex_input(&[VertexBinding { buffer, offset: 0 }], None);

        assert!(matches!(
            result,
            Err(BackendError::Resource(ResourceError::MissingUsage("VERTEX")))
        ));
    }

    #[test]
    fn draw_inside_a_pass_is_recorded() {
        let mut backend = backend();
        let pipeline = textured_pipeline(&mut backend);
        backend.begin_frame().unwrap();
        let back_buffer = backend.back_buffer().unwrap();
        backend.set_graphics_pipeline(pipeline).unwrap();
        backend
            .begin_pass(&RenderPassDesc {
                color: vec![ColorTarget {
                    texture: back_buffer,
                    clear: None,
                }],
                depth: None,
            })
            .unwrap();

        backend.draw(3, 1, 0, 0).unwrap();
        backend.draw_indexed(6, 2, 0, -1, 0).unwrap();
        backend.end_pass().unwrap();

        let commands = backend.device().commands();
        assert!(commands.contains(&GpuCommand::Draw {
            vertex_count: 3,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        }));
        assert!(commands.contains(&GpuCommand::DrawIndexed {
            index_count: 6,
            instance_count: 2,
            first_index: 0,
            base_vertex: -1,
            first_instance: 0,
        }));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "outside of a matching pass"))]
    fn draw_outside_a_pass_is_a_contract_violation() {
        let mut backend = backend();
        let pipeline = textured_pipeline(&mut backend);
        backend.begin_frame().unwrap();
        backend.set_graphics_pipeline(pipeline).unwrap();

        let result = backend.draw(3, 1, 0, 0);

        assert!(matches!(result, Err(FrameError::InvalidState(_))));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "null or destroyed pipeline"))]
    fn binding_a_null_pipeline_is_a_contract_violation() {
        let mut backend = backend();
        backend.begin_frame().unwrap();

        let result = backend.set_graphics_pipeline(Handle::NULL);

        assert!(matches!(result, Err(FrameError::InvalidState(_))));
    }
}
