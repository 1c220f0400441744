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

use super::{CpuDescriptor, DescriptorHeap, DescriptorHeapKind, ViewAllocation, ViewKind};
use crate::driver::NativeDevice;
use crate::error::DescriptorError;

/// A CPU-only heap paired with the occupancy bitmap of its descriptors.
#[derive(Debug)]
struct BitmapHeap {
    heap: DescriptorHeap,
    occupied: Vec<u64>,
}

impl BitmapHeap {
    fn new(heap: DescriptorHeap) -> Self {
        let words = (heap.capacity() as usize).div_ceil(64);
        Self {
            heap,
            occupied: vec![0; words],
        }
    }

    fn is_set(&self, bit: u32) -> bool {
        self.occupied[(bit / 64) as usize] & (1 << (bit % 64)) != 0
    }

    fn set_range(&mut self, start: u32, count: u32, value: bool) {
        for bit in start..start + count {
            let word = &mut self.occupied[(bit / 64) as usize];
            if value {
                *word |= 1 << (bit % 64);
            } else {
                *word &= !(1 << (bit % 64));
            }
        }
    }

    fn is_range_free(&self, start: u32, count: u32) -> bool {
        (start..start + count).all(|bit| !self.is_set(bit))
    }

    /// Finds the first run of `count` clear bits.
    fn find_free_run(&self, count: u32) -> Option<u32> {
        let capacity = self.heap.capacity();
        let mut run_start = 0;
        let mut run_len = 0;
        for bit in 0..capacity {
            if self.is_set(bit) {
                run_len = 0;
                run_start = bit + 1;
            } else {
                run_len += 1;
                if run_len == count {
                    return Some(run_start);
                }
            }
        }
        None
    }

    fn occupied_count(&self) -> u32 {
        self.occupied.iter().map(|w| w.count_ones()).sum()
    }
}

/// A growable pool of CPU-only descriptors of one kind.
///
/// Allocation tries, in order: the bump region of the most recent heap, a run of
/// free descriptors in any heap, and finally a new heap.
#[derive(Debug)]
pub struct CpuDescriptorPool {
    kind: DescriptorHeapKind,
    heap_size: u32,
    heaps: Vec<BitmapHeap>,
}

impl CpuDescriptorPool {
    /// Creates an empty pool whose heaps hold `heap_size` descriptors by default.
    pub fn new(kind: DescriptorHeapKind, heap_size: u32) -> Self {
        Self {
            kind,
            heap_size: heap_size.max(1),
            heaps: Vec::new(),
        }
    }

    /// Allocates `count` contiguous descriptors.
    /// ## Errors
    /// * `DescriptorError::EmptyRequest` - If `count` is 0.
    /// * `DescriptorError::HeapCreationFailed` - If a new heap was needed and could not be created.
    pub fn allocate(
        &mut self,
        device: &dyn NativeDevice,
        count: u32,
    ) -> Result<CpuDescriptor, DescriptorError> {
        if count == 0 {
            return Err(DescriptorError::EmptyRequest);
        }

        // Fast path: purely incremental allocation from the newest heap.
        if let Some(last) = self.heaps.last_mut() {
            let head = last.heap.head();
            if head + count <= last.heap.capacity() && last.is_range_free(head, count) {
                last.set_range(head, count, true);
                last.heap.advance_to(head + count);
                return Ok(last.heap.cpu_at(head));
            }
        }

        for entry in &mut self.heaps {
            if let Some(start) = entry.find_free_run(count) {
                entry.set_range(start, count, true);
                entry.heap.advance_to(start + count);
                return Ok(entry.heap.cpu_at(start));
            }
        }

        let size = self.heap_size.max(count);
        let heap = DescriptorHeap::create(device, self.kind, size, false)?;
        log::debug!(
            "{:?} CPU descriptor pool grew to {} heaps",
            self.kind,
            self.heaps.len() + 1
        );
        let mut entry = BitmapHeap::new(heap);
        entry.set_range(0, count, true);
        entry.heap.advance_to(count);
        let descriptor = entry.heap.cpu_at(0);
        self.heaps.push(entry);
        Ok(descriptor)
    }

    /// Frees `count` descriptors starting at `descriptor`.
    pub fn release(&mut self, descriptor: CpuDescriptor, count: u32) {
        for entry in &mut self.heaps {
            if let Some(start) = entry.heap.index_of(descriptor) {
                let end = (start + count).min(entry.heap.capacity());
                debug_assert!(
                    (start..end).all(|bit| entry.is_set(bit)),
                    "double release of {:?} descriptors",
                    self.kind
                );
                entry.set_range(start, end - start, false);
                return;
            }
        }
        log::warn!(
            "Released {:?} descriptor {descriptor:?} that belongs to no heap of the pool.",
            self.kind
        );
    }

    /// Number of descriptors currently allocated.
    pub fn allocated(&self) -> u32 {
        self.heaps.iter().map(BitmapHeap::occupied_count).sum()
    }

    /// Number of native heaps backing the pool.
    pub fn heap_count(&self) -> usize {
        self.heaps.len()
    }

    /// Destroys every native heap. Only valid once the GPU is idle.
    pub fn destroy(&mut self, device: &dyn NativeDevice) {
        for entry in self.heaps.drain(..) {
            device.destroy_descriptor_heap(entry.heap.native());
        }
    }
}

/// One CPU descriptor pool per heap kind.
#[derive(Debug)]
pub struct CpuDescriptorAllocators {
    pools: [CpuDescriptorPool; 4],
}

impl CpuDescriptorAllocators {
    /// Creates empty pools whose heaps hold `heap_size` descriptors by default.
    pub fn new(heap_size: u32) -> Self {
        Self {
            pools: DescriptorHeapKind::ALL.map(|kind| CpuDescriptorPool::new(kind, heap_size)),
        }
    }

    /// The pool of `kind`.
    pub fn pool(&self, kind: DescriptorHeapKind) -> &CpuDescriptorPool {
        &self.pools[kind.index()]
    }

    /// Allocates `count` descriptors for views of `kind`.
    pub fn allocate(
        &mut self,
        device: &dyn NativeDevice,
        kind: ViewKind,
        count: u32,
    ) -> Result<ViewAllocation, DescriptorError> {
        let descriptor = self.pools[kind.heap_kind().index()].allocate(device, count)?;
        Ok(ViewAllocation {
            kind,
            descriptor,
            count,
        })
    }

    /// Frees a view allocation.
    pub fn release(&mut self, view: &ViewAllocation) {
        self.pools[view.kind.heap_kind().index()].release(view.descriptor, view.count);
    }

    /// Destroys every native heap of every pool.
    pub fn destroy(&mut self, device: &dyn NativeDevice) {
        for pool in &mut self.pools {
            pool.destroy(device);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::mock::MockDevice;

    #[test]
    fn incremental_allocations_come_from_the_newest_heap() {
        let device = MockDevice::new();
        let mut pool = CpuDescriptorPool::new(DescriptorHeapKind::RenderTarget, 8);

        let a = pool.allocate(&device, 2).unwrap();
        let b = pool.allocate(&device, 3).unwrap();

        assert_eq!(b.0 - a.0, 2 * 32);
        assert_eq!(pool.heap_count(), 1);
        assert_eq!(pool.allocated(), 5);
    }

    #[test]
    fn released_runs_are_reused() {
        let device = MockDevice::new();
        let mut pool = CpuDescriptorPool::new(DescriptorHeapKind::DepthStencil, 4);
        let a = pool.allocate(&device, 2).unwrap();
        let _b = pool.allocate(&device, 2).unwrap();

        pool.release(a, 2);
        let c = pool.allocate(&device, 2).unwrap();

        assert_eq!(c, a);
        assert_eq!(pool.heap_count(), 1);
    }

    #[test]
    fn fragmented_heap_grows_when_no_run_fits() {
        let device = MockDevice::new();
        let mut pool = CpuDescriptorPool::new(DescriptorHeapKind::CbvSrvUav, 4);
        let a = pool.allocate(&device, 1).unwrap();
        let _b = pool.allocate(&device, 1).unwrap();
        let c = pool.allocate(&device, 1).unwrap();
        let _d = pool.allocate(&device, 1).unwrap();
        pool.release(a, 1);
        pool.release(c, 1);

        // Two free descriptors, but not contiguous.
        let e = pool.allocate(&device, 2).unwrap();

        assert_eq!(pool.heap_count(), 2);
        assert_eq!(pool.allocated(), 4);
        assert!(e != a && e != c);
    }

    #[test]
    fn oversized_request_gets_a_dedicated_heap() {
        let device = MockDevice::new();
        let mut pool = CpuDescriptorPool::new(DescriptorHeapKind::Sampler, 4);
        pool.allocate(&device, 10).unwrap();
        assert_eq!(pool.allocated(), 10);
        assert_eq!(pool.heap_count(), 1);
    }

    #[test]
    fn allocators_route_views_by_kind() {
        let device = MockDevice::new();
        let mut allocators = CpuDescriptorAllocators::new(16);

        let rtv = allocators.allocate(&device, ViewKind::RenderTarget, 1).unwrap();
        let srv = allocators.allocate(&device, ViewKind::ShaderResource, 1).unwrap();
        let uav = allocators.allocate(&device, ViewKind::UnorderedAccess, 1).unwrap();

        assert_eq!(allocators.pool(DescriptorHeapKind::RenderTarget).allocated(), 1);
        assert_eq!(allocators.pool(DescriptorHeapKind::CbvSrvUav).allocated(), 2);

        allocators.release(&rtv);
        allocators.release(&srv);
        allocators.release(&uav);
        assert_eq!(allocators.pool(DescriptorHeapKind::CbvSrvUav).allocated(), 0);

        allocators.destroy(&device);
        assert_eq!(device.destroyed_heaps().len(), 2);
    }

    #[test]
    fn zero_sized_request_is_rejected() {
        let device = MockDevice::new();
        let mut pool = CpuDescriptorPool::new(DescriptorHeapKind::CbvSrvUav, 4);
        assert_eq!(
            pool.allocate(&device, 0),
            Err(DescriptorError::EmptyRequest)
        );
    }
}
