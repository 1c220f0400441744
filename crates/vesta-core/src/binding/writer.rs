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

//! Draw-time resolution of bound resources into descriptor writes.

use super::{
    visit_bindings, BindingLayoutDesc, BindingLocation, BindingMap, BindingVisitor, ShaderStage,
    StageRegisters,
};
use crate::backend::PooledSampler;
use crate::descriptor::{CpuDescriptor, Descriptor, DescriptorHeapKind, ViewKind};
use crate::pool::{Handle, ObjectPool};
use crate::resource::{AccessFlags, PooledResource, ResourceState};

/// A resource bound to one binding index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderResource {
    /// A uniform buffer bound from `offset`.
    UniformBuffer {
        /// The buffer.
        buffer: Handle<PooledResource>,
        /// Byte offset of the bound data.
        offset: u64,
    },
    /// A sampled texture.
    Texture(Handle<PooledResource>),
    /// A sampler.
    Sampler(Handle<PooledSampler>),
    /// A read/write buffer and how the next GPU work accesses it.
    StorageBuffer {
        /// The buffer.
        buffer: Handle<PooledResource>,
        /// Accesses performed by the shaders.
        access: AccessFlags,
    },
    /// A read/write image and how the next GPU work accesses it.
    StorageImage {
        /// The texture.
        texture: Handle<PooledResource>,
        /// Accesses performed by the shaders.
        access: AccessFlags,
    },
}

/// The resources to bind for the next draws or dispatches, by binding index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderResources {
    entries: Vec<Option<ShaderResource>>,
}

impl ShaderResources {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `resource` at `binding`, replacing any previous resource.
    pub fn bind(mut self, binding: u32, resource: ShaderResource) -> Self {
        let index = binding as usize;
        if self.entries.len() <= index {
            self.entries.resize(index + 1, None);
        }
        self.entries[index] = Some(resource);
        self
    }

    /// The resource bound at `binding`.
    pub fn get(&self, binding: u32) -> Option<ShaderResource> {
        self.entries.get(binding as usize).copied().flatten()
    }
}

/// The shader-visible region allocated for one descriptor table of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableAllocation {
    /// Root parameter index of the table.
    pub parameter: u32,
    /// The heap the table lives in.
    pub heap: DescriptorHeapKind,
    /// First descriptor of the table.
    pub base: Descriptor,
    /// Distance in bytes between two descriptors of the heap.
    pub stride: u32,
}

/// A descriptor copy from a CPU pool into a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorCopy {
    /// Heap kind of both descriptors.
    pub heap: DescriptorHeapKind,
    /// Destination in the shader-visible heap.
    pub dst: CpuDescriptor,
    /// Source in a CPU pool.
    pub src: CpuDescriptor,
}

/// Everything a bind operation has to apply, accumulated during the traversal.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DescriptorWrites {
    /// Root constant buffers as `(parameter, device address)`.
    pub root_buffers: Vec<(u32, u64)>,
    /// Descriptors to copy into tables.
    pub copies: Vec<DescriptorCopy>,
    /// States the bound resources must be in.
    pub transitions: Vec<(Handle<PooledResource>, ResourceState)>,
    /// Unordered accesses to check for hazards.
    pub hazards: Vec<(Handle<PooledResource>, AccessFlags)>,
    /// Binding indices that had nothing valid bound.
    pub missing: Vec<u32>,
}

/// A [`BindingVisitor`] resolving bound resources against a pipeline's binding map.
pub struct DescriptorWriter<'a> {
    resources: &'a ObjectPool<PooledResource>,
    samplers: &'a ObjectPool<PooledSampler>,
    bound: &'a ShaderResources,
    map: &'a BindingMap,
    tables: &'a [TableAllocation],
    writes: DescriptorWrites,
}

impl<'a> DescriptorWriter<'a> {
    /// Creates a writer over the pools and the tables allocated for this bind.
    pub fn new(
        resources: &'a ObjectPool<PooledResource>,
        samplers: &'a ObjectPool<PooledSampler>,
        bound: &'a ShaderResources,
        map: &'a BindingMap,
        tables: &'a [TableAllocation],
    ) -> Self {
        Self {
            resources,
            samplers,
            bound,
            map,
            tables,
            writes: DescriptorWrites::default(),
        }
    }

    /// Binding indices of `layout` that have nothing valid bound in `bound`.
    ///
    /// Resolves against placeholder tables, so it can run before any descriptor
    /// of the frame is allocated.
    pub fn missing_bindings(
        resources: &ObjectPool<PooledResource>,
        samplers: &ObjectPool<PooledSampler>,
        bound: &ShaderResources,
        map: &BindingMap,
        layout: &BindingLayoutDesc,
        registers: &StageRegisters,
    ) -> Vec<u32> {
        let tables: Vec<TableAllocation> = map
            .tables()
            .iter()
            .map(|table| TableAllocation {
                parameter: table.parameter,
                heap: table.heap,
                base: Descriptor {
                    cpu: CpuDescriptor(0),
                    gpu: None,
                    index: 0,
                },
                stride: 0,
            })
            .collect();
        let mut writer = DescriptorWriter::new(resources, samplers, bound, map, &tables);
        visit_bindings(layout, registers, &mut writer);
        writer.writes.missing
    }

    /// Consumes the writer and returns the accumulated writes.
    pub fn into_writes(self) -> DescriptorWrites {
        self.writes
    }

    fn missing(&mut self, binding: u32) {
        if !self.writes.missing.contains(&binding) {
            log::warn!("Nothing valid is bound at binding {binding}");
            self.writes.missing.push(binding);
        }
    }

    fn table_destination(
        &self,
        stage: ShaderStage,
        binding: u32,
    ) -> Option<(DescriptorHeapKind, CpuDescriptor)> {
        let BindingLocation::Table { parameter, offset } = self.map.location(stage, binding)?
        else {
            return None;
        };
        let table = self.tables.iter().find(|t| t.parameter == parameter)?;
        Some((table.heap, table.base.cpu.offset(offset, table.stride)))
    }

    fn write_view(
        &mut self,
        stage: ShaderStage,
        binding: u32,
        resource: Handle<PooledResource>,
        kind: ViewKind,
    ) -> bool {
        let source = self.resources.lookup(resource).and_then(|r| r.view(kind));
        match (source, self.table_destination(stage, binding)) {
            (Some(src), Some((heap, dst))) => {
                self.writes.copies.push(DescriptorCopy { heap, dst, src });
                true
            }
            _ => {
                self.missing(binding);
                false
            }
        }
    }

    fn write_storage(&mut self, stage: ShaderStage, binding: u32) {
        let (resource, access) = match self.bound.get(binding) {
            Some(ShaderResource::StorageBuffer { buffer, access }) => (buffer, access),
            Some(ShaderResource::StorageImage { texture, access }) => (texture, access),
            _ => return self.missing(binding),
        };
        if self.write_view(stage, binding, resource, ViewKind::UnorderedAccess) {
            self.writes
                .transitions
                .push((resource, ResourceState::UnorderedAccess));
            // One entry per resource, even when several stages see it.
            match self.writes.hazards.iter_mut().find(|(h, _)| *h == resource) {
                Some((_, merged)) => *merged = *merged | access,
                None => self.writes.hazards.push((resource, access)),
            }
        }
    }
}

impl BindingVisitor for DescriptorWriter<'_> {
    fn on_uniform_buffer(&mut self, stage: ShaderStage, _register: u32, binding: u32) {
        let Some(ShaderResource::UniformBuffer { buffer, offset }) = self.bound.get(binding) else {
            return self.missing(binding);
        };
        let address = self.resources.lookup(buffer).map(|r| r.gpu_address() + offset);
        match (address, self.map.location(stage, binding)) {
            (Some(address), Some(BindingLocation::Root { parameter })) => {
                self.writes.root_buffers.push((parameter, address));
                self.writes
                    .transitions
                    .push((buffer, ResourceState::VertexAndConstantBuffer));
            }
            _ => self.missing(binding),
        }
    }

    fn on_texture(&mut self, stage: ShaderStage, _register: u32, binding: u32) {
        let Some(ShaderResource::Texture(texture)) = self.bound.get(binding) else {
            return self.missing(binding);
        };
        if self.write_view(stage, binding, texture, ViewKind::ShaderResource) {
            self.writes
                .transitions
                .push((texture, ResourceState::ShaderResource));
        }
    }

    fn on_sampler(&mut self, stage: ShaderStage, _register: u32, binding: u32) {
        let Some(ShaderResource::Sampler(sampler)) = self.bound.get(binding) else {
            return self.missing(binding);
        };
        let source = self.samplers.lookup(sampler).map(|s| s.descriptor());
        match (source, self.table_destination(stage, binding)) {
            (Some(src), Some((heap, dst))) => {
                self.writes.copies.push(DescriptorCopy { heap, dst, src });
            }
            _ => self.missing(binding),
        }
    }

    fn on_storage_buffer(&mut self, stage: ShaderStage, _register: u32, binding: u32) {
        self.write_storage(stage, binding);
    }

    fn on_storage_image(&mut self, stage: ShaderStage, _register: u32, binding: u32) {
        self.write_storage(stage, binding);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{
        visit_bindings, BindingKind, BindingLayoutDesc, ResourceBinding, RootLayoutBuilder,
        ShaderStageFlags, StageRegisters,
    };
    use crate::descriptor::ViewAllocation;
    use crate::driver::{NativeAllocation, NativeResource, SamplerDesc};
    use crate::resource::{ResourceDesc, ResourceUsage};

    const STRIDE: u32 = 32;

    struct Fixture {
        resources: ObjectPool<PooledResource>,
        samplers: ObjectPool<PooledSampler>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                resources: ObjectPool::new("resources", 4),
                samplers: ObjectPool::new("samplers", 1),
            }
        }

        fn resource(&mut self, id: u64, views: &[ViewKind]) -> Handle<PooledResource> {
            let mut resource = PooledResource::owned(
                NativeAllocation {
                    resource: NativeResource(id),
                    gpu_address: id << 32,
                    size: 256,
                },
                ResourceDesc::buffer("buf", 256, ResourceUsage::STORAGE),
                ResourceState::Common,
            );
            for (i, kind) in views.iter().enumerate() {
                resource.attach_view(ViewAllocation {
                    kind: *kind,
                    descriptor: CpuDescriptor(id * 100 + i as u64),
                    count: 1,
                });
            }
            self.resources.add(resource)
        }

        fn sampler(&mut self) -> Handle<PooledSampler> {
            self.samplers.add(PooledSampler::new(
                SamplerDesc::default(),
                ViewAllocation {
                    kind: ViewKind::Sampler,
                    descriptor: CpuDescriptor(7),
                    count: 1,
                },
            ))
        }
    }

    fn tables_for(map: &BindingMap) -> Vec<TableAllocation> {
        map.tables()
            .iter()
            .enumerate()
            .map(|(i, table)| TableAllocation {
                parameter: table.parameter,
                heap: table.heap,
                base: Descriptor {
                    cpu: CpuDescriptor(1_000_000 * (i as u64 + 1)),
                    gpu: None,
                    index: 0,
                },
                stride: STRIDE,
            })
            .collect()
    }

    fn write(
        fixture: &Fixture,
        layout: &BindingLayoutDesc,
        registers: &StageRegisters,
        bound: &ShaderResources,
    ) -> DescriptorWrites {
        let (_, map) = RootLayoutBuilder::build(layout, registers);
        let tables = tables_for(&map);
        let mut writer =
            DescriptorWriter::new(&fixture.resources, &fixture.samplers, bound, &map, &tables);
        visit_bindings(layout, registers, &mut writer);
        writer.into_writes()
    }

    #[test]
    fn uniform_buffers_go_to_root_and_views_to_tables() {
        let mut fixture = Fixture::new();
        let ubo = fixture.resource(1, &[]);
        let texture = fixture.resource(2, &[ViewKind::ShaderResource]);
        let sampler = fixture.sampler();
        let layout = BindingLayoutDesc::new(vec![
            ResourceBinding::new(BindingKind::UniformBuffer, ShaderStageFlags::VERTEX),
            ResourceBinding::new(BindingKind::SampledTexture, ShaderStageFlags::FRAGMENT),
            ResourceBinding::new(BindingKind::Sampler, ShaderStageFlags::FRAGMENT),
        ]);
        let registers = StageRegisters::new()
            .with_stage(ShaderStage::Vertex, &[(0, 0)])
            .with_stage(ShaderStage::Fragment, &[(1, 0), (2, 0)]);
        let bound = ShaderResources::new()
            .bind(0, ShaderResource::UniformBuffer { buffer: ubo, offset: 16 })
            .bind(1, ShaderResource::Texture(texture))
            .bind(2, ShaderResource::Sampler(sampler));

        let writes = write(&fixture, &layout, &registers, &bound);

        assert_eq!(writes.root_buffers, vec![(0, (1 << 32) + 16)]);
        assert_eq!(
            writes.copies,
            vec![
                DescriptorCopy {
                    heap: DescriptorHeapKind::CbvSrvUav,
                    dst: CpuDescriptor(1_000_000),
                    src: CpuDescriptor(200),
                },
                DescriptorCopy {
                    heap: DescriptorHeapKind::Sampler,
                    dst: CpuDescriptor(2_000_000),
                    src: CpuDescriptor(7),
                },
            ]
        );
        assert_eq!(
            writes.transitions,
            vec![
                (ubo, ResourceState::VertexAndConstantBuffer),
                (texture, ResourceState::ShaderResource),
            ]
        );
        assert!(writes.missing.is_empty());
    }

    #[test]
    fn missing_bindings_are_found_before_allocation() {
        let mut fixture = Fixture::new();
        let texture = fixture.resource(2, &[ViewKind::ShaderResource]);
        let bare = fixture.resource(3, &[]);
        let layout = BindingLayoutDesc::new(vec![
            ResourceBinding::new(BindingKind::UniformBuffer, ShaderStageFlags::VERTEX),
            ResourceBinding::new(BindingKind::SampledTexture, ShaderStageFlags::FRAGMENT),
            ResourceBinding::new(BindingKind::SampledTexture, ShaderStageFlags::FRAGMENT),
        ]);
        let registers = StageRegisters::new()
            .with_stage(ShaderStage::Vertex, &[(0, 0)])
            .with_stage(ShaderStage::Fragment, &[(1, 0), (2, 1)]);
        let bound = ShaderResources::new()
            .bind(1, ShaderResource::Texture(texture))
            .bind(2, ShaderResource::Texture(bare));
        let (_, map) = RootLayoutBuilder::build(&layout, &registers);

        let missing = DescriptorWriter::missing_bindings(
            &fixture.resources,
            &fixture.samplers,
            &bound,
            &map,
            &layout,
            &registers,
        );

        assert_eq!(missing, vec![0, 2]);
    }

    #[test]
    fn storage_seen_by_two_stages_yields_one_hazard_entry() {
        let mut fixture = Fixture::new();
        let buffer = fixture.resource(3, &[ViewKind::UnorderedAccess]);
        let layout = BindingLayoutDesc::new(vec![ResourceBinding::new(
            BindingKind::StorageBuffer,
            ShaderStageFlags::VERTEX_FRAGMENT,
        )]);
        let registers = StageRegisters::new()
            .with_stage(ShaderStage::Vertex, &[(0, 0)])
            .with_stage(ShaderStage::Fragment, &[(0, 0)]);
        let bound = ShaderResources::new().bind(
            0,
            ShaderResource::StorageBuffer {
                buffer,
                access: AccessFlags::READ_WRITE,
            },
        );

        let writes = write(&fixture, &layout, &registers, &bound);

        assert_eq!(writes.copies.len(), 2);
        assert_eq!(writes.hazards, vec![(buffer, AccessFlags::READ_WRITE)]);
    }

    #[test]
    fn wrong_or_dead_resources_are_reported_missing() {
        let mut fixture = Fixture::new();
        let texture = fixture.resource(4, &[ViewKind::ShaderResource]);
        let no_view = fixture.resource(5, &[]);
        let layout = BindingLayoutDesc::new(vec![
            ResourceBinding::new(BindingKind::Sampler, ShaderStageFlags::FRAGMENT),
            ResourceBinding::new(BindingKind::SampledTexture, ShaderStageFlags::FRAGMENT),
            ResourceBinding::new(BindingKind::UniformBuffer, ShaderStageFlags::FRAGMENT),
        ]);
        let registers =
            StageRegisters::new().with_stage(ShaderStage::Fragment, &[(0, 0), (1, 0), (2, 0)]);
        let bound = ShaderResources::new()
            .bind(0, ShaderResource::Texture(texture))
            .bind(1, ShaderResource::Texture(no_view));

        let writes = write(&fixture, &layout, &registers, &bound);

        assert_eq!(writes.missing, vec![0, 1, 2]);
        assert!(writes.copies.is_empty());
        assert!(writes.transitions.is_empty());
    }
}
