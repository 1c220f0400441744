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

use super::{CpuDescriptor, Descriptor, DescriptorHeapKind, GpuDescriptor};
use crate::driver::{NativeDevice, NativeHeap, NativeHeapInfo};
use crate::error::DescriptorError;

/// A bump allocator over a range of a native descriptor heap.
///
/// The range is either a whole native heap or one slice of it. The allocator never
/// lets `head` exceed `capacity`; a request that does not fit fails without
/// touching any state.
#[derive(Debug, Clone)]
pub struct DescriptorHeap {
    info: NativeHeapInfo,
    kind: DescriptorHeapKind,
    first: u32,
    capacity: u32,
    head: u32,
}

impl DescriptorHeap {
    /// Creates a native heap and an allocator covering all of it.
    /// ## Errors
    /// * `DescriptorError::HeapCreationFailed` - If the driver refused the heap.
    pub fn create(
        device: &dyn NativeDevice,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<Self, DescriptorError> {
        if capacity == 0 {
            return Err(DescriptorError::EmptyRequest);
        }
        let info = device
            .create_descriptor_heap(kind, capacity, shader_visible)
            .map_err(|err| {
                log::error!("Failed to create {kind:?} descriptor heap of {capacity} descriptors: {err}");
                DescriptorError::HeapCreationFailed(err)
            })?;
        log::debug!(
            "Created {kind:?} descriptor heap {:?} ({capacity} descriptors, shader visible: {shader_visible})",
            info.heap
        );
        Ok(Self {
            info,
            kind,
            first: 0,
            capacity,
            head: 0,
        })
    }

    /// Returns an allocator over `capacity` descriptors starting at `first`,
    /// sharing the native heap.
    pub fn slice(&self, first: u32, capacity: u32) -> Self {
        debug_assert!(first + capacity <= self.first + self.capacity);
        Self {
            info: self.info,
            kind: self.kind,
            first: self.first + first,
            capacity,
            head: 0,
        }
    }

    /// Bump-allocates `count` contiguous descriptors.
    ///
    /// Returns `None` and logs if the range is exhausted; the head is left untouched.
    pub fn allocate(&mut self, count: u32) -> Option<Descriptor> {
        let end = self
            .head
            .checked_add(count)
            .filter(|end| count != 0 && *end <= self.capacity);
        let Some(end) = end else {
            log::warn!(
                "{:?} descriptor heap exhausted: requested {count}, {} of {} left.",
                self.kind,
                self.remaining(),
                self.capacity
            );
            return None;
        };
        let descriptor = self.descriptor_at(self.head);
        self.head = end;
        Some(descriptor)
    }

    /// The descriptor at `index`, relative to the start of the range.
    pub fn descriptor_at(&self, index: u32) -> Descriptor {
        Descriptor {
            cpu: self.cpu_at(index),
            gpu: self.gpu_at(index),
            index: self.first + index,
        }
    }

    /// CPU handle of the descriptor at `index`, relative to the start of the range.
    pub fn cpu_at(&self, index: u32) -> CpuDescriptor {
        CpuDescriptor(self.info.cpu_base).offset(self.first + index, self.info.stride)
    }

    /// GPU handle of the descriptor at `index`, if the heap is shader visible.
    pub fn gpu_at(&self, index: u32) -> Option<GpuDescriptor> {
        self.info
            .gpu_base
            .map(|base| GpuDescriptor(base).offset(self.first + index, self.info.stride))
    }

    /// Whether `cpu` points into this range.
    pub fn contains(&self, cpu: CpuDescriptor) -> bool {
        self.index_of(cpu).is_some()
    }

    /// Position of `cpu` relative to the start of the range.
    pub fn index_of(&self, cpu: CpuDescriptor) -> Option<u32> {
        let start = self.cpu_at(0).0;
        let end = self.cpu_at(self.capacity).0;
        if cpu.0 < start || cpu.0 >= end {
            return None;
        }
        let delta = cpu.0 - start;
        if delta % self.info.stride as u64 != 0 {
            return None;
        }
        Some((delta / self.info.stride as u64) as u32)
    }

    /// Moves the head forward to `end` if it is behind.
    pub(crate) fn advance_to(&mut self, end: u32) {
        self.head = self.head.max(end.min(self.capacity));
    }

    /// Forgets every allocation of the range.
    pub fn reset(&mut self) {
        self.head = 0;
    }

    /// The bump cursor.
    pub fn head(&self) -> u32 {
        self.head
    }

    /// Number of descriptors in the range.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of descriptors still available to [`DescriptorHeap::allocate`].
    pub fn remaining(&self) -> u32 {
        self.capacity - self.head
    }

    /// Distance in bytes between two descriptors.
    pub fn stride(&self) -> u32 {
        self.info.stride
    }

    /// The kind of descriptors stored.
    pub fn kind(&self) -> DescriptorHeapKind {
        self.kind
    }

    /// The underlying native heap.
    pub fn native(&self) -> NativeHeap {
        self.info.heap
    }

    /// Whether the heap can be bound for shader access.
    pub fn is_shader_visible(&self) -> bool {
        self.info.gpu_base.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDevice;

    #[test]
    fn bump_allocations_never_overlap() {
        let device = MockDevice::new();
        let mut heap =
            DescriptorHeap::create(&device, DescriptorHeapKind::CbvSrvUav, 16, true).unwrap();

        let mut ranges = Vec::new();
        for count in [3, 1, 4, 1, 5] {
            let d = heap.allocate(count).unwrap();
            ranges.push((d.index, d.index + count));
            assert!(heap.head() <= heap.capacity());
        }
        for (i, a) in ranges.iter().enumerate() {
            for b in &ranges[i + 1..] {
                assert!(a.1 <= b.0 || b.1 <= a.0, "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn exhaustion_fails_soft_without_moving_head() {
        let device = MockDevice::new();
        let mut heap =
            DescriptorHeap::create(&device, DescriptorHeapKind::Sampler, 8, false).unwrap();
        heap.allocate(6).unwrap();

        assert!(heap.allocate(3).is_none());
        assert_eq!(heap.head(), 6);
        assert!(heap.allocate(2).is_some());
        assert_eq!(heap.head(), heap.capacity());
    }

    #[test]
    fn oversized_request_does_not_wrap_the_head() {
        let device = MockDevice::new();
        let mut heap =
            DescriptorHeap::create(&device, DescriptorHeapKind::CbvSrvUav, 8, true).unwrap();
        heap.allocate(6).unwrap();

        assert!(heap.allocate(u32::MAX - 2).is_none());
        assert!(heap.allocate(u32::MAX).is_none());
        assert_eq!(heap.head(), 6);
        assert_eq!(heap.allocate(2).unwrap().index, 6);
    }

    #[test]
    fn cpu_only_heaps_have_no_gpu_handles() {
        let device = MockDevice::new();
        let mut heap =
            DescriptorHeap::create(&device, DescriptorHeapKind::RenderTarget, 4, false).unwrap();
        let d = heap.allocate(1).unwrap();
        assert!(d.gpu.is_none());
        assert!(!heap.is_shader_visible());
    }

    #[test]
    fn slices_address_their_own_range() {
        let device = MockDevice::new();
        let heap =
            DescriptorHeap::create(&device, DescriptorHeapKind::CbvSrvUav, 8, true).unwrap();
        let mut second = heap.slice(4, 4);

        let d = second.allocate(1).unwrap();
        assert_eq!(d.index, 4);
        assert_eq!(d.cpu, heap.cpu_at(4));
        assert!(second.contains(heap.cpu_at(7)));
        assert!(!second.contains(heap.cpu_at(3)));
        assert_eq!(second.index_of(heap.cpu_at(5)), Some(1));
    }

    #[test]
    fn creation_failure_is_reported() {
        let device = MockDevice::new();
        device.fail_next_heap();
        let err = DescriptorHeap::create(&device, DescriptorHeapKind::CbvSrvUav, 8, true);
        assert!(matches!(err, Err(DescriptorError::HeapCreationFailed(_))));
    }
}
