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

//! Host-visible staging memory for uploads and readbacks.
//!
//! A [`StagingArena`] owns one persistently mapped buffer split into a slice per
//! frame in flight. Each slice is a [`StagingArea`] bump allocator reset when its
//! frame slot is reused. When a slice cannot serve a request, a dedicated buffer
//! sized to the request is created and its release deferred right away, so it
//! lives exactly as long as the copy recorded into the current frame.

use crate::driver::{NativeAllocation, NativeDevice, NativeResource};
use crate::error::{DriverError, ResourceError};
use crate::frame::FrameSlot;
use crate::release::ReleaseQueue;
use crate::resource::{MemoryLocation, ResourceDesc, ResourceUsage};

/// Direction of the data moved through a staging arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingDirection {
    /// CPU writes, GPU reads.
    Upload,
    /// GPU writes, CPU reads.
    Readback,
}

impl StagingDirection {
    fn memory(&self) -> MemoryLocation {
        match self {
            StagingDirection::Upload => MemoryLocation::Upload,
            StagingDirection::Readback => MemoryLocation::Readback,
        }
    }

    fn usage(&self) -> ResourceUsage {
        match self {
            StagingDirection::Upload => ResourceUsage::COPY_SRC,
            StagingDirection::Readback => ResourceUsage::COPY_DST,
        }
    }
}

/// A region of a staging buffer handed out by [`StagingArea::get`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingAllocation {
    /// The host-visible buffer.
    pub buffer: NativeResource,
    /// Offset of the region in the buffer.
    pub offset: u64,
    /// Requested size in bytes.
    pub size: u64,
    /// Device address of the region.
    pub gpu_address: u64,
}

/// Rounds `value` up to a power-of-two `alignment`, or `None` if that overflows.
pub(crate) const fn align_up(value: u64, alignment: u64) -> Option<u64> {
    match value.checked_add(alignment - 1) {
        Some(bumped) => Some(bumped & !(alignment - 1)),
        None => None,
    }
}

/// A bump allocator over a range of a mapped buffer.
#[derive(Debug, Clone)]
pub struct StagingArea {
    buffer: NativeResource,
    base_offset: u64,
    gpu_base: u64,
    capacity: u64,
    head: u64,
    alignment: u64,
}

impl StagingArea {
    /// Covers `capacity` bytes of `allocation` starting at `base_offset`.
    pub fn new(
        allocation: &NativeAllocation,
        base_offset: u64,
        capacity: u64,
        alignment: u64,
    ) -> Self {
        debug_assert!(alignment.is_power_of_two());
        Self {
            buffer: allocation.resource,
            base_offset,
            gpu_base: allocation.gpu_address + base_offset,
            capacity,
            head: 0,
            alignment,
        }
    }

    /// Allocates `size` bytes, keeping every allocation aligned.
    ///
    /// Returns `None` when the area is exhausted; the head is left untouched.
    pub fn get(&mut self, size: u64) -> Option<StagingAllocation> {
        let end = align_up(size.max(1), self.alignment)
            .and_then(|aligned| self.head.checked_add(aligned))
            .filter(|end| *end <= self.capacity)?;
        let offset = self.head;
        self.head = end;
        Some(StagingAllocation {
            buffer: self.buffer,
            offset: self.base_offset + offset,
            size,
            gpu_address: self.gpu_base + offset,
        })
    }

    /// Forgets every allocation.
    pub fn reset(&mut self) {
        self.head = 0;
    }

    /// The bump cursor.
    pub fn head(&self) -> u64 {
        self.head
    }

    /// Size of the area in bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }
}

/// Per-frame staging memory of one direction.
#[derive(Debug)]
pub struct StagingArena {
    direction: StagingDirection,
    allocation: NativeAllocation,
    slices: Vec<StagingArea>,
    alignment: u64,
    dedicated_count: u64,
}

impl StagingArena {
    /// Creates one mapped buffer holding `frames` slices of `bytes_per_frame`.
    /// ## Errors
    /// * `ResourceError::Driver` - If the buffer could not be allocated.
    pub fn new(
        device: &dyn NativeDevice,
        direction: StagingDirection,
        bytes_per_frame: u64,
        frames: usize,
        alignment: u64,
    ) -> Result<Self, ResourceError> {
        let too_large = || {
            ResourceError::InvalidDescription(format!(
                "{direction:?} staging arena of {frames} x {bytes_per_frame} bytes overflows"
            ))
        };
        let slice_size = align_up(bytes_per_frame, alignment).ok_or_else(too_large)?;
        let total = slice_size
            .checked_mul(frames as u64)
            .ok_or_else(too_large)?;
        let desc = ResourceDesc::buffer("staging arena", total, direction.usage())
        .in_memory(direction.memory());
        let allocation = device.create_resource(&desc).map_err(|err| {
            log::error!("Failed to allocate {direction:?} staging arena: {err}");
            ResourceError::Driver(err)
        })?;
        let slices = (0..frames as u64)
            .map(|i| StagingArea::new(&allocation, i * slice_size, slice_size, alignment))
            .collect();
        Ok(Self {
            direction,
            allocation,
            slices,
            alignment,
            dedicated_count: 0,
        })
    }

    /// Bump-allocates from the slice of `slot`.
    pub fn get(&mut self, slot: FrameSlot, size: u64) -> Option<StagingAllocation> {
        self.slices[slot].get(size)
    }

    /// Allocates from the slice of `slot`, or from a dedicated buffer when it is full.
    ///
    /// The dedicated buffer's release is deferred immediately; it is stamped with the
    /// frame the copy is submitted in.
    pub fn get_or_dedicated(
        &mut self,
        device: &dyn NativeDevice,
        releases: &mut ReleaseQueue,
        slot: FrameSlot,
        size: u64,
    ) -> Result<StagingAllocation, ResourceError> {
        let (allocation, dedicated) = self.get_or_create(device, slot, size)?;
        if dedicated {
            releases.defer_resource(allocation.buffer);
        }
        Ok(allocation)
    }

    /// Like [`StagingArena::get_or_dedicated`], but a dedicated buffer is returned
    /// to the caller, who must destroy it. The flag tells whether it is dedicated.
    pub fn get_or_create(
        &mut self,
        device: &dyn NativeDevice,
        slot: FrameSlot,
        size: u64,
    ) -> Result<(StagingAllocation, bool), ResourceError> {
        if let Some(allocation) = self.get(slot, size) {
            return Ok((allocation, false));
        }
        let allocation = self.create_dedicated(device, size)?;
        self.dedicated_count += 1;
        log::debug!(
            "{:?} staging slice {slot} exhausted, using a dedicated buffer of {size} bytes",
            self.direction
        );
        Ok((allocation, true))
    }

    /// Creates a standalone buffer of this arena's direction, sized to `size`
    /// rounded to the alignment. The caller owns it.
    pub fn create_dedicated(
        &self,
        device: &dyn NativeDevice,
        size: u64,
    ) -> Result<StagingAllocation, ResourceError> {
        let aligned = align_up(size.max(1), self.alignment).ok_or_else(|| {
            ResourceError::InvalidDescription(format!(
                "Dedicated staging buffer of {size} bytes is too large"
            ))
        })?;
        let desc = ResourceDesc::buffer("dedicated staging", aligned, self.direction.usage())
        .in_memory(self.direction.memory());
        let native = device.create_resource(&desc).map_err(|err| {
            log::error!("Failed to allocate dedicated staging buffer of {size} bytes: {err}");
            ResourceError::Driver(err)
        })?;
        Ok(StagingAllocation {
            buffer: native.resource,
            offset: 0,
            size,
            gpu_address: native.gpu_address,
        })
    }

    /// Copies `data` into an upload allocation.
    pub fn write(
        device: &dyn NativeDevice,
        allocation: &StagingAllocation,
        data: &[u8],
    ) -> Result<(), DriverError> {
        debug_assert!(data.len() as u64 <= allocation.size);
        device.write_mapped(allocation.buffer, allocation.offset, data)
    }

    /// Copies a readback allocation into `out`.
    pub fn read(
        device: &dyn NativeDevice,
        allocation: &StagingAllocation,
        out: &mut [u8],
    ) -> Result<(), DriverError> {
        debug_assert!(out.len() as u64 <= allocation.size);
        device.read_mapped(allocation.buffer, allocation.offset, out)
    }

    /// Resets the slice of `slot`. Only valid once its previous GPU work completed.
    pub fn reset_slice(&mut self, slot: FrameSlot) {
        self.slices[slot].reset();
    }

    /// The slice of `slot`.
    pub fn slice(&self, slot: FrameSlot) -> &StagingArea {
        &self.slices[slot]
    }

    /// Number of dedicated fallback buffers created so far.
    pub fn dedicated_count(&self) -> u64 {
        self.dedicated_count
    }

    /// The direction of the arena.
    pub fn direction(&self) -> StagingDirection {
        self.direction
    }

    /// Destroys the arena's buffer. Only valid once the GPU is idle.
    pub fn destroy(&self, device: &dyn NativeDevice) {
        device.destroy_resource(self.allocation.resource);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::CpuDescriptorAllocators;
    use crate::driver::mock::MockDevice;
    use crate::release::ReleaseContext;

    #[test]
    fn allocations_are_aligned_and_disjoint() {
        let device = MockDevice::new();
        let mut arena =
            StagingArena::new(&device, StagingDirection::Upload, 1024, 2, 256).unwrap();

        let a = arena.get(0, 10).unwrap();
        let b = arena.get(0, 300).unwrap();
        let c = arena.get(1, 10).unwrap();

        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, 256);
        assert_eq!(c.offset, 1024);
        assert_eq!(arena.slice(0).head(), 256 + 512);
    }

    #[test]
    fn round_trip_reproduces_bytes() {
        let device = MockDevice::new();
        let mut arena =
            StagingArena::new(&device, StagingDirection::Upload, 4096, 2, 512).unwrap();
        let data: Vec<u8> = (0..=255).cycle().take(700).collect();

        arena.get(1, 5).unwrap();
        let allocation = arena.get(1, data.len() as u64).unwrap();
        StagingArena::write(&device, &allocation, &data).unwrap();
        let mut out = vec![0u8; data.len()];
        StagingArena::read(&device, &allocation, &mut out).unwrap();

        assert_eq!(out, data);
    }

    #[test]
    fn exhaustion_keeps_head_intact() {
        let device = MockDevice::new();
        let mut arena =
            StagingArena::new(&device, StagingDirection::Readback, 1024, 1, 256).unwrap();
        arena.get(0, 700).unwrap();
        let head = arena.slice(0).head();

        assert!(arena.get(0, 300).is_none());
        assert_eq!(arena.slice(0).head(), head);
        assert!(arena.get(0, 200).is_some());
    }

    #[test]
    fn overflow_falls_back_to_deferred_dedicated_buffer() {
        // ARRANGE
        let device = MockDevice::new();
        let mut releases = ReleaseQueue::new();
        let mut arena =
            StagingArena::new(&device, StagingDirection::Upload, 256, 2, 256).unwrap();

        // ACT
        let allocation = arena
            .get_or_dedicated(&device, &mut releases, 0, 1000)
            .unwrap();

        // ASSERT
        assert_eq!(allocation.offset, 0);
        assert_eq!(arena.dedicated_count(), 1);
        assert_eq!(releases.pending_count(), 1);
        assert_eq!(arena.slice(0).head(), 0);

        releases.activate_pending(0);
        let mut descriptors = CpuDescriptorAllocators::new(4);
        let mut ctx = ReleaseContext {
            device: &device,
            cpu_descriptors: &mut descriptors,
        };
        releases.execute(0, &mut ctx);
        assert_eq!(device.destroyed_resources(), vec![allocation.buffer]);
    }

    #[test]
    fn reset_rewinds_only_the_slot() {
        let device = MockDevice::new();
        let mut arena =
            StagingArena::new(&device, StagingDirection::Upload, 512, 2, 256).unwrap();
        arena.get(0, 256).unwrap();
        arena.get(1, 256).unwrap();

        arena.reset_slice(1);

        assert_eq!(arena.slice(0).head(), 256);
        assert_eq!(arena.slice(1).head(), 0);
    }

    #[test]
    fn align_up_rounds_to_power_of_two() {
        assert_eq!(align_up(0, 512), Some(0));
        assert_eq!(align_up(1, 512), Some(512));
        assert_eq!(align_up(512, 512), Some(512));
        assert_eq!(align_up(513, 256), Some(768));
        assert_eq!(align_up(u64::MAX - 100, 256), None);
    }

    #[test]
    fn huge_request_fails_without_moving_head() {
        let device = MockDevice::new();
        let mut arena =
            StagingArena::new(&device, StagingDirection::Upload, 1024, 1, 256).unwrap();
        arena.get(0, 10).unwrap();

        assert!(arena.get(0, u64::MAX - 100).is_none());
        assert!(arena.get(0, u64::MAX - 300).is_none());
        assert_eq!(arena.slice(0).head(), 256);
        assert_eq!(arena.get(0, 10).unwrap().offset, 256);
    }

    #[test]
    fn huge_dedicated_buffer_is_rejected() {
        let device = MockDevice::new();
        let arena = StagingArena::new(&device, StagingDirection::Readback, 256, 1, 256).unwrap();

        let result = arena.create_dedicated(&device, u64::MAX);

        assert!(matches!(result, Err(ResourceError::InvalidDescription(_))));
    }
}
