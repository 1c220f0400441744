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

//! Builds the native binding layout of a pipeline from its abstract bindings.
//!
//! Uniform buffers become one root constant-buffer parameter per stage. Textures,
//! read/write resources and samplers are grouped, per stage, into a resource table
//! and a sampler table whose ranges cover contiguous registers.

use super::{
    visit_bindings, BindingKind, BindingLayoutDesc, BindingVisitor, ShaderStage, StageRegisters,
};
use crate::descriptor::DescriptorHeapKind;

/// The register class of a descriptor range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DescriptorRangeType {
    /// Read-only shader views.
    ShaderResource,
    /// Read/write shader views.
    UnorderedAccess,
    /// Samplers.
    Sampler,
}

impl DescriptorRangeType {
    fn heap_kind(&self) -> DescriptorHeapKind {
        match self {
            DescriptorRangeType::ShaderResource | DescriptorRangeType::UnorderedAccess => {
                DescriptorHeapKind::CbvSrvUav
            }
            DescriptorRangeType::Sampler => DescriptorHeapKind::Sampler,
        }
    }
}

/// Consecutive registers of one class inside a descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorRange {
    /// Register class.
    pub range_type: DescriptorRangeType,
    /// First register.
    pub base_register: u32,
    /// Number of registers.
    pub count: u32,
    /// Position of the first descriptor in the table.
    pub table_offset: u32,
}

/// One parameter of a native binding layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootParameter {
    /// A constant buffer bound by device address.
    ConstantBuffer {
        /// The only stage that sees it.
        stage: ShaderStage,
        /// Its register.
        register: u32,
    },
    /// A table of descriptors in a shader-visible heap.
    DescriptorTable {
        /// The only stage that sees it.
        stage: ShaderStage,
        /// The heap the table lives in.
        heap: DescriptorHeapKind,
        /// Its ranges, in table order.
        ranges: Vec<DescriptorRange>,
    },
}

/// The native binding layout handed to [`crate::NativeDevice::create_binding_layout`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootLayoutDesc {
    /// Parameters in index order.
    pub parameters: Vec<RootParameter>,
}

/// Where a binding of a stage ends up in the root layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingLocation {
    /// A root constant buffer parameter.
    Root {
        /// Parameter index.
        parameter: u32,
    },
    /// A descriptor inside a table.
    Table {
        /// Parameter index of the table.
        parameter: u32,
        /// Position inside the table.
        offset: u32,
    },
}

/// A binding resolved for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundSlot {
    /// The stage.
    pub stage: ShaderStage,
    /// The binding index.
    pub binding: u32,
    /// The binding kind.
    pub kind: BindingKind,
    /// Its location.
    pub location: BindingLocation,
}

/// A descriptor table of the root layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorTableInfo {
    /// Parameter index.
    pub parameter: u32,
    /// The stage that reads it.
    pub stage: ShaderStage,
    /// The heap the table lives in.
    pub heap: DescriptorHeapKind,
    /// Number of descriptors.
    pub size: u32,
}

/// Maps every (stage, binding) pair to its location in the root layout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingMap {
    slots: Vec<BoundSlot>,
    tables: Vec<DescriptorTableInfo>,
}

impl BindingMap {
    /// Every resolved binding.
    pub fn slots(&self) -> &[BoundSlot] {
        &self.slots
    }

    /// Every descriptor table.
    pub fn tables(&self) -> &[DescriptorTableInfo] {
        &self.tables
    }

    /// The location of `binding` in `stage`.
    pub fn location(&self, stage: ShaderStage, binding: u32) -> Option<BindingLocation> {
        self.slots
            .iter()
            .find(|s| s.stage == stage && s.binding == binding)
            .map(|s| s.location)
    }

    /// Descriptors of `heap` needed to bind every table once.
    pub fn descriptors_needed(&self, heap: DescriptorHeapKind) -> u32 {
        self.tables
            .iter()
            .filter(|t| t.heap == heap)
            .map(|t| t.size)
            .sum()
    }
}

#[derive(Debug, Clone, Copy)]
struct TableEntry {
    stage: ShaderStage,
    range_type: DescriptorRangeType,
    register: u32,
    binding: u32,
    kind: BindingKind,
}

/// Accumulates visitor callbacks into a [`RootLayoutDesc`] and its [`BindingMap`].
#[derive(Debug, Default)]
pub struct RootLayoutBuilder {
    constant_buffers: Vec<(ShaderStage, u32, u32)>,
    table_entries: Vec<TableEntry>,
}

impl RootLayoutBuilder {
    /// Builds the root layout of `layout` for the stages in `registers`.
    pub fn build(
        layout: &BindingLayoutDesc,
        registers: &StageRegisters,
    ) -> (RootLayoutDesc, BindingMap) {
        let mut builder = Self::default();
        visit_bindings(layout, registers, &mut builder);
        builder.finish()
    }

    fn push_table_entry(
        &mut self,
        stage: ShaderStage,
        range_type: DescriptorRangeType,
        register: u32,
        binding: u32,
        kind: BindingKind,
    ) {
        self.table_entries.push(TableEntry {
            stage,
            range_type,
            register,
            binding,
            kind,
        });
    }

    fn finish(self) -> (RootLayoutDesc, BindingMap) {
        let mut desc = RootLayoutDesc::default();
        let mut map = BindingMap::default();

        for (stage, register, binding) in self.constant_buffers {
            let parameter = desc.parameters.len() as u32;
            desc.parameters
                .push(RootParameter::ConstantBuffer { stage, register });
            map.slots.push(BoundSlot {
                stage,
                binding,
                kind: BindingKind::UniformBuffer,
                location: BindingLocation::Root { parameter },
            });
        }

        let mut stages: Vec<ShaderStage> = self.table_entries.iter().map(|e| e.stage).collect();
        stages.sort();
        stages.dedup();

        for stage in stages {
            for heap in [DescriptorHeapKind::CbvSrvUav, DescriptorHeapKind::Sampler] {
                let mut entries: Vec<TableEntry> = self
                    .table_entries
                    .iter()
                    .filter(|e| e.stage == stage && e.range_type.heap_kind() == heap)
                    .copied()
                    .collect();
                if entries.is_empty() {
                    continue;
                }
                entries.sort_by_key(|e| (e.range_type, e.register));

                let parameter = desc.parameters.len() as u32;
                let mut ranges: Vec<DescriptorRange> = Vec::new();
                for (offset, entry) in entries.iter().enumerate() {
                    let offset = offset as u32;
                    let extends_last = ranges.last().is_some_and(|last| {
                        last.range_type == entry.range_type
                            && last.base_register + last.count == entry.register
                    });
                    if let Some(last) = ranges.last_mut().filter(|_| extends_last) {
                        last.count += 1;
                    } else {
                        ranges.push(DescriptorRange {
                            range_type: entry.range_type,
                            base_register: entry.register,
                            count: 1,
                            table_offset: offset,
                        });
                    }
                    map.slots.push(BoundSlot {
                        stage,
                        binding: entry.binding,
                        kind: entry.kind,
                        location: BindingLocation::Table { parameter, offset },
                    });
                }

                map.tables.push(DescriptorTableInfo {
                    parameter,
                    stage,
                    heap,
                    size: entries.len() as u32,
                });
                desc.parameters.push(RootParameter::DescriptorTable {
                    stage,
                    heap,
                    ranges,
                });
            }
        }

        (desc, map)
    }
}

impl BindingVisitor for RootLayoutBuilder {
    fn on_uniform_buffer(&mut self, stage: ShaderStage, register: u32, binding: u32) {
        self.constant_buffers.push((stage, register, binding));
    }

    fn on_texture(&mut self, stage: ShaderStage, register: u32, binding: u32) {
        self.push_table_entry(
            stage,
            DescriptorRangeType::ShaderResource,
            register,
            binding,
            BindingKind::SampledTexture,
        );
    }

    fn on_sampler(&mut self, stage: ShaderStage, register: u32, binding: u32) {
        self.push_table_entry(
            stage,
            DescriptorRangeType::Sampler,
            register,
            binding,
            BindingKind::Sampler,
        );
    }

    fn on_storage_buffer(&mut self, stage: ShaderStage, register: u32, binding: u32) {
        self.push_table_entry(
            stage,
            DescriptorRangeType::UnorderedAccess,
            register,
            binding,
            BindingKind::StorageBuffer,
        );
    }

    fn on_storage_image(&mut self, stage: ShaderStage, register: u32, binding: u32) {
        self.push_table_entry(
            stage,
            DescriptorRangeType::UnorderedAccess,
            register,
            binding,
            BindingKind::StorageImage,
        );
    }
}
