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

use std::collections::HashMap;

use super::{ShaderStage, ShaderStageFlags};

/// The kind of resource a binding expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Uniform (constant) buffer.
    UniformBuffer,
    /// Sampled texture.
    SampledTexture,
    /// Sampler.
    Sampler,
    /// Read/write buffer.
    StorageBuffer,
    /// Read/write image.
    StorageImage,
}

/// One entry of a binding layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceBinding {
    /// What is bound.
    pub kind: BindingKind,
    /// Which stages may access it.
    pub visibility: ShaderStageFlags,
}

impl ResourceBinding {
    /// Creates a binding.
    pub fn new(kind: BindingKind, visibility: ShaderStageFlags) -> Self {
        Self { kind, visibility }
    }
}

/// The ordered bindings of a pipeline. The position of a binding is its index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindingLayoutDesc {
    /// The bindings.
    pub bindings: Vec<ResourceBinding>,
}

impl BindingLayoutDesc {
    /// Creates a layout from bindings in index order.
    pub fn new(bindings: Vec<ResourceBinding>) -> Self {
        Self { bindings }
    }
}

/// Per stage, the native register assigned to each binding index.
///
/// Produced by shader reflection. A binding missing from a stage's table is not
/// used by that stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageRegisters {
    stages: Vec<(ShaderStage, HashMap<u32, u32>)>,
}

impl StageRegisters {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the `(binding index, register)` pairs of an active stage.
    pub fn with_stage(mut self, stage: ShaderStage, registers: &[(u32, u32)]) -> Self {
        let map = registers.iter().copied().collect();
        match self.stages.iter_mut().find(|(s, _)| *s == stage) {
            Some((_, existing)) => *existing = map,
            None => self.stages.push((stage, map)),
        }
        self.stages.sort_by_key(|(s, _)| *s);
        self
    }

    /// The register of `binding` in `stage`.
    pub fn register(&self, stage: ShaderStage, binding: u32) -> Option<u32> {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .and_then(|(_, map)| map.get(&binding).copied())
    }

    /// The active stages, in pipeline order.
    pub fn stages(&self) -> impl Iterator<Item = ShaderStage> + '_ {
        self.stages.iter().map(|(s, _)| *s)
    }

    /// Whether `stage` is active.
    pub fn has_stage(&self, stage: ShaderStage) -> bool {
        self.stages.iter().any(|(s, _)| *s == stage)
    }
}

/// Callbacks invoked by [`visit_bindings`], one per binding kind.
///
/// Every method receives the stage, the resolved register and the binding index.
/// Unimplemented methods ignore the binding.
#[allow(unused_variables)]
pub trait BindingVisitor {
    /// A uniform buffer visible in `stage`.
    fn on_uniform_buffer(&mut self, stage: ShaderStage, register: u32, binding: u32) {}
    /// A sampled texture visible in `stage`.
    fn on_texture(&mut self, stage: ShaderStage, register: u32, binding: u32) {}
    /// A sampler visible in `stage`.
    fn on_sampler(&mut self, stage: ShaderStage, register: u32, binding: u32) {}
    /// A read/write buffer visible in `stage`.
    fn on_storage_buffer(&mut self, stage: ShaderStage, register: u32, binding: u32) {}
    /// A read/write image visible in `stage`.
    fn on_storage_image(&mut self, stage: ShaderStage, register: u32, binding: u32) {}
}

/// Walks bindings × active stages and calls `visitor` for every binding visible
/// in a stage whose register resolves.
///
/// Bindings without a register in a stage are skipped: a binding may be declared
/// for more stages than the shaders actually read it from.
pub fn visit_bindings<V: BindingVisitor + ?Sized>(
    layout: &BindingLayoutDesc,
    registers: &StageRegisters,
    visitor: &mut V,
) {
    for (index, binding) in layout.bindings.iter().enumerate() {
        let index = index as u32;
        for stage in registers.stages() {
            if !binding.visibility.contains(stage) {
                continue;
            }
            let Some(register) = registers.register(stage, index) else {
                continue;
            };
            match binding.kind {
                BindingKind::UniformBuffer => visitor.on_uniform_buffer(stage, register, index),
                BindingKind::SampledTexture => visitor.on_texture(stage, register, index),
                BindingKind::Sampler => visitor.on_sampler(stage, register, index),
                BindingKind::StorageBuffer => visitor.on_storage_buffer(stage, register, index),
                BindingKind::StorageImage => visitor.on_storage_image(stage, register, index),
            }
        }
    }
}
