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

use super::{Descriptor, DescriptorHeap, DescriptorHeapKind};
use crate::driver::{NativeDevice, NativeHeap};
use crate::error::DescriptorError;
use crate::frame::FrameSlot;
use crate::release::ReleaseQueue;

/// Whether [`ShaderVisibleHeap::ensure_capacity`] replaced the native heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapGrowth {
    /// The current slice had room.
    Unchanged,
    /// A larger heap replaced the old one, which must be re-bound.
    Grown,
}

/// A shader-visible descriptor heap split into one slice per frame in flight.
///
/// Each slice is an independent bump allocator, reset when its frame slot is
/// reused. Growing replaces the whole native heap: the old heap is deferred-released
/// so the descriptors written into it stay valid until the GPU is done with them.
#[derive(Debug)]
pub struct ShaderVisibleHeap {
    kind: DescriptorHeapKind,
    heap: DescriptorHeap,
    slices: Vec<DescriptorHeap>,
    slice_size: u32,
    growth_count: u32,
}

impl ShaderVisibleHeap {
    /// Creates a heap of `frames * slice_size` descriptors.
    pub fn new(
        device: &dyn NativeDevice,
        kind: DescriptorHeapKind,
        slice_size: u32,
        frames: usize,
    ) -> Result<Self, DescriptorError> {
        debug_assert!(kind.can_be_shader_visible());
        let total = Self::total_size(slice_size, frames)?;
        let heap = DescriptorHeap::create(device, kind, total, true)?;
        let slices = Self::split(&heap, slice_size, frames);
        Ok(Self {
            kind,
            heap,
            slices,
            slice_size,
            growth_count: 0,
        })
    }

    fn total_size(slice_size: u32, frames: usize) -> Result<u32, DescriptorError> {
        u32::try_from(frames)
            .ok()
            .and_then(|frames| slice_size.checked_mul(frames))
            .ok_or(DescriptorError::Exhausted {
                requested: slice_size,
            })
    }

    fn split(heap: &DescriptorHeap, slice_size: u32, frames: usize) -> Vec<DescriptorHeap> {
        (0..frames as u32)
            .map(|i| heap.slice(i * slice_size, slice_size))
            .collect()
    }

    /// Makes sure the slice of `slot` can serve `needed` more descriptors.
    ///
    /// On growth every slice of the new heap starts empty and the caller must
    /// bind the new heap before recording commands that use it.
    /// ## Errors
    /// * `DescriptorError::HeapCreationFailed` - If the larger heap could not be created.
    ///   The current heap is kept in that case.
    /// * `DescriptorError::Exhausted` - If a heap holding `needed` descriptors per frame
    ///   cannot be addressed.
    pub fn ensure_capacity(
        &mut self,
        device: &dyn NativeDevice,
        releases: &mut ReleaseQueue,
        slot: FrameSlot,
        needed: u32,
    ) -> Result<HeapGrowth, DescriptorError> {
        if self.slices[slot].remaining() >= needed {
            return Ok(HeapGrowth::Unchanged);
        }

        let frames = self.slices.len();
        let new_slice_size = self.slice_size.saturating_mul(2).max(needed);
        let total = Self::total_size(new_slice_size, frames).map_err(|err| {
            log::error!(
                "Shader-visible {:?} heap cannot grow to {new_slice_size} descriptors per frame",
                self.kind
            );
            err
        })?;
        let heap = DescriptorHeap::create(device, self.kind, total, true)?;
        log::info!(
            "Growing shader-visible {:?} heap: {} -> {} descriptors per frame",
            self.kind,
            self.slice_size,
            new_slice_size
        );

        releases.defer_descriptor_heap(self.heap.native());
        self.slices = Self::split(&heap, new_slice_size, frames);
        self.heap = heap;
        self.slice_size = new_slice_size;
        self.growth_count += 1;
        Ok(HeapGrowth::Grown)
    }

    /// Bump-allocates `count` descriptors from the slice of `slot`.
    ///
    /// Returns `None` if the slice is exhausted; call
    /// [`ShaderVisibleHeap::ensure_capacity`] first.
    pub fn allocate(&mut self, slot: FrameSlot, count: u32) -> Option<Descriptor> {
        self.slices[slot].allocate(count)
    }

    /// Resets the slice of `slot`. Only valid once its previous GPU work completed.
    pub fn reset_slice(&mut self, slot: FrameSlot) {
        self.slices[slot].reset();
    }

    /// The bump cursor of the slice of `slot`.
    pub fn slice_head(&self, slot: FrameSlot) -> u32 {
        self.slices[slot].head()
    }

    /// Descriptors per frame slice.
    pub fn slice_size(&self) -> u32 {
        self.slice_size
    }

    /// How many times the heap was replaced by a larger one.
    pub fn growth_count(&self) -> u32 {
        self.growth_count
    }

    /// Distance in bytes between two descriptors.
    pub fn stride(&self) -> u32 {
        self.heap.stride()
    }

    /// The kind of descriptors stored.
    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    /// The current native heap.
    pub fn native(&self) -> NativeHeap {
        self.heap.native()
    }

    /// Destroys the current native heap. Only valid once the GPU is idle.
    pub fn destroy(&self, device: &dyn NativeDevice) {
        device.destroy_descriptor_heap(self.heap.native());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::CpuDescriptorAllocators;
    use crate::driver::mock::MockDevice;
    use crate::release::ReleaseContext;

    #[test]
    fn slices_are_disjoint_per_frame() {
        let device = MockDevice::new();
        let mut heap =
            ShaderVisibleHeap::new(&device, DescriptorHeapKind::CbvSrvUav, 8, 2).unwrap();

        let a = heap.allocate(0, 8).unwrap();
        let b = heap.allocate(1, 8).unwrap();

        assert_eq!(a.index, 0);
        assert_eq!(b.index, 8);
        assert!(heap.allocate(0, 1).is_none());
        assert_eq!(heap.slice_head(0), 8);
    }

    #[test]
    fn reset_only_touches_one_slice() {
        let device = MockDevice::new();
        let mut heap =
            ShaderVisibleHeap::new(&device, DescriptorHeapKind::Sampler, 4, 2).unwrap();
        heap.allocate(0, 3).unwrap();
        heap.allocate(1, 2).unwrap();

        heap.reset_slice(0);

        assert_eq!(heap.slice_head(0), 0);
        assert_eq!(heap.slice_head(1), 2);
    }

    #[test]
    fn growth_is_reported_and_old_heap_deferred() {
        // ARRANGE
        let device = MockDevice::new();
        let mut releases = ReleaseQueue::new();
        let mut heap =
            ShaderVisibleHeap::new(&device, DescriptorHeapKind::CbvSrvUav, 4, 2).unwrap();
        let old = heap.native();
        heap.allocate(0, 3).unwrap();

        // ACT
        let unchanged = heap.ensure_capacity(&device, &mut releases, 0, 1).unwrap();
        let grown = heap.ensure_capacity(&device, &mut releases, 0, 2).unwrap();

        // ASSERT
        assert_eq!(unchanged, HeapGrowth::Unchanged);
        assert_eq!(grown, HeapGrowth::Grown);
        assert_ne!(heap.native(), old);
        assert_eq!(heap.slice_size(), 8);
        assert_eq!(heap.slice_head(0), 0);
        assert_eq!(heap.growth_count(), 1);
        assert!(device.destroyed_heaps().is_empty());

        releases.activate_pending(0);
        let mut descriptors = CpuDescriptorAllocators::new(4);
        let mut ctx = ReleaseContext {
            device: &device,
            cpu_descriptors: &mut descriptors,
        };
        releases.execute(0, &mut ctx);
        assert_eq!(device.destroyed_heaps(), vec![old]);
    }

    #[test]
    fn growth_covers_requests_larger_than_double() {
        let device = MockDevice::new();
        let mut releases = ReleaseQueue::new();
        let mut heap =
            ShaderVisibleHeap::new(&device, DescriptorHeapKind::CbvSrvUav, 4, 3).unwrap();

        heap.ensure_capacity(&device, &mut releases, 2, 20).unwrap();

        assert_eq!(heap.slice_size(), 20);
        assert!(heap.allocate(2, 20).is_some());
    }

    #[test]
    fn failed_growth_keeps_current_heap() {
        let device = MockDevice::new();
        let mut releases = ReleaseQueue::new();
        let mut heap =
            ShaderVisibleHeap::new(&device, DescriptorHeapKind::CbvSrvUav, 2, 2).unwrap();
        let old = heap.native();
        device.fail_next_heap();

        assert!(heap.ensure_capacity(&device, &mut releases, 0, 4).is_err());
        assert_eq!(heap.native(), old);
        assert!(releases.is_empty());
    }

    #[test]
    fn unaddressable_growth_is_an_error() {
        let device = MockDevice::new();
        let mut releases = ReleaseQueue::new();
        let mut heap =
            ShaderVisibleHeap::new(&device, DescriptorHeapKind::CbvSrvUav, 4, 2).unwrap();
        let old = heap.native();

        let result = heap.ensure_capacity(&device, &mut releases, 0, u32::MAX);

        assert!(matches!(result, Err(DescriptorError::Exhausted { .. })));
        assert_eq!(heap.native(), old);
        assert_eq!(heap.slice_size(), 4);
        assert!(releases.is_empty());
    }
}
