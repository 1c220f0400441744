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

//! Frame slots, their fences and the recording state machine.
//!
//! The scheduler owns one fence and one command list per frame in flight. Slot `i`
//! may only be reused once the CPU observed the fence value signaled by the
//! previous use of slot `i`; [`FrameScheduler::begin`] enforces that wait.

use std::time::Duration;

use crate::driver::{NativeCommandList, NativeDevice, NativeFence};
use crate::error::{DriverError, FrameError};

/// Index of a frame slot, in `[0, frames_in_flight)`.
pub type FrameSlot = usize;

/// The kind of pass being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    /// A render pass with attachments.
    Render,
    /// A compute pass.
    Compute,
}

/// Whether a frame ends with a present or with a full wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Renders to the swapchain and presents.
    Swapchain,
    /// Renders off screen and waits for the GPU at the end.
    Offscreen,
}

/// State of the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// No frame is being recorded.
    Idle,
    /// Commands are being recorded, optionally inside a pass.
    Recording(Option<PassKind>),
    /// The frame's commands were submitted; the frame is being closed.
    Submitted,
}

#[derive(Debug)]
struct SlotSync {
    fence: NativeFence,
    /// Value signaled by the most recent submission of this slot. 0 if never used.
    fence_value: u64,
    list: NativeCommandList,
}

/// Drives frame slots through `Idle -> Recording -> Submitted`.
#[derive(Debug)]
pub struct FrameScheduler {
    slots: Vec<SlotSync>,
    current: FrameSlot,
    state: FrameState,
    kind: FrameKind,
    wait_timeout: Duration,
    device_lost: bool,
    frames_submitted: u64,
}

impl FrameScheduler {
    /// Creates the fences and command lists of `frames` slots.
    pub fn new(
        device: &dyn NativeDevice,
        frames: usize,
        wait_timeout: Duration,
    ) -> Result<Self, DriverError> {
        let mut slots = Vec::with_capacity(frames);
        for _ in 0..frames {
            let fence = device.create_fence(0)?;
            let list = device.create_command_list()?;
            slots.push(SlotSync {
                fence,
                fence_value: 0,
                list,
            });
        }
        Ok(Self {
            slots,
            current: 0,
            state: FrameState::Idle,
            kind: FrameKind::Swapchain,
            wait_timeout,
            device_lost: false,
            frames_submitted: 0,
        })
    }

    fn check<T>(&mut self, result: Result<T, DriverError>) -> Result<T, FrameError> {
        result.map_err(|err| {
            if err == DriverError::DeviceLost && !self.device_lost {
                log::error!("Graphics device lost during frame {}", self.frames_submitted);
                self.device_lost = true;
            }
            FrameError::from(err)
        })
    }

    fn ensure_alive(&self) -> Result<(), FrameError> {
        if self.device_lost {
            Err(FrameError::DeviceLost)
        } else {
            Ok(())
        }
    }

    /// Waits for the previous use of the current slot and reopens its command list.
    ///
    /// The wait is bounded by the configured timeout. On success the caller may
    /// reset every per-slot allocator of the returned slot.
    pub fn begin(
        &mut self,
        device: &dyn NativeDevice,
        kind: FrameKind,
    ) -> Result<FrameSlot, FrameError> {
        self.ensure_alive()?;
        if self.state != FrameState::Idle {
            return Err(FrameError::InvalidState("a frame is already being recorded"));
        }

        let slot = &self.slots[self.current];
        let (fence, value, list) = (slot.fence, slot.fence_value, slot.list);
        if value > 0 {
            let completed = self.check(device.fence_completed_value(fence))?;
            if completed < value {
                log::trace!("Frame slot {} waits for fence value {value}", self.current);
                let timeout = self.wait_timeout;
                self.check(device.wait_for_fence(fence, value, Some(timeout)))?;
            }
        }
        self.check(device.reset_command_list(list))?;

        self.kind = kind;
        self.state = FrameState::Recording(None);
        Ok(self.current)
    }

    /// Opens a pass. Passes do not nest.
    pub fn begin_pass(&mut self, pass: PassKind) -> Result<(), FrameError> {
        self.ensure_alive()?;
        match self.state {
            FrameState::Recording(None) => {
                self.state = FrameState::Recording(Some(pass));
                Ok(())
            }
            FrameState::Recording(Some(_)) => {
                Err(FrameError::InvalidState("a pass is already open"))
            }
            _ => Err(FrameError::InvalidState("no frame is being recorded")),
        }
    }

    /// Closes the open pass of kind `pass`.
    pub fn end_pass(&mut self, pass: PassKind) -> Result<(), FrameError> {
        self.ensure_alive()?;
        if self.state != FrameState::Recording(Some(pass)) {
            return Err(FrameError::InvalidState("no matching pass is open"));
        }
        self.state = FrameState::Recording(None);
        Ok(())
    }

    /// Closes and submits the current list, then signals the slot's fence.
    pub fn submit(&mut self, device: &dyn NativeDevice) -> Result<FrameSlot, FrameError> {
        self.ensure_alive()?;
        if self.state != FrameState::Recording(None) {
            return Err(FrameError::InvalidState(
                "submission requires a frame without an open pass",
            ));
        }
        let slot = self.current;
        let (fence, list) = (self.slots[slot].fence, self.slots[slot].list);
        let value = self.slots[slot].fence_value + 1;

        self.check(device.close_command_list(list))?;
        self.check(device.execute_command_list(list))?;
        self.check(device.signal(fence, value))?;

        self.slots[slot].fence_value = value;
        self.frames_submitted += 1;
        self.state = FrameState::Submitted;
        Ok(slot)
    }

    /// Blocks until the last submission of the current slot completed.
    pub fn wait_for_current(&mut self, device: &dyn NativeDevice) -> Result<(), FrameError> {
        let slot = &self.slots[self.current];
        let (fence, value) = (slot.fence, slot.fence_value);
        self.check(device.wait_for_fence(fence, value, None))
    }

    /// Reopens the current list after a mid-frame submission.
    pub fn resume(&mut self, device: &dyn NativeDevice) -> Result<(), FrameError> {
        if self.state != FrameState::Submitted {
            return Err(FrameError::InvalidState("nothing was submitted"));
        }
        let list = self.slots[self.current].list;
        self.check(device.reset_command_list(list))?;
        self.state = FrameState::Recording(None);
        Ok(())
    }

    /// Ends the frame. The slot only advances if a present happened, so skipped
    /// presents keep reusing the same slot.
    pub fn complete(&mut self, advance: bool) {
        if advance {
            self.current = (self.current + 1) % self.slots.len();
        }
        self.state = FrameState::Idle;
    }

    /// Latches device loss reported outside of the scheduler's own calls.
    pub fn record_driver_error(&mut self, err: DriverError) -> FrameError {
        self.check::<()>(Err(err)).err().unwrap_or(FrameError::DeviceLost)
    }

    /// The slot being recorded or the next one to record.
    pub fn current_slot(&self) -> FrameSlot {
        self.current
    }

    /// The command list of the current slot.
    pub fn command_list(&self) -> NativeCommandList {
        self.slots[self.current].list
    }

    /// The fence value signaled by the latest submission of `slot`.
    pub fn slot_fence_value(&self, slot: FrameSlot) -> u64 {
        self.slots[slot].fence_value
    }

    /// The fence of `slot`.
    pub fn slot_fence(&self, slot: FrameSlot) -> NativeFence {
        self.slots[slot].fence
    }

    /// The current state.
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// The kind of the frame being recorded.
    pub fn frame_kind(&self) -> FrameKind {
        self.kind
    }

    /// The open pass, if any.
    pub fn open_pass(&self) -> Option<PassKind> {
        match self.state {
            FrameState::Recording(pass) => pass,
            _ => None,
        }
    }

    /// Whether commands may be recorded.
    pub fn is_recording(&self) -> bool {
        matches!(self.state, FrameState::Recording(_))
    }

    /// Number of frame slots.
    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Total submissions so far.
    pub fn frames_submitted(&self) -> u64 {
        self.frames_submitted
    }

    /// Whether the device was lost. Terminal for this scheduler.
    pub fn is_device_lost(&self) -> bool {
        self.device_lost
    }

    /// Destroys fences and command lists. Only valid once the GPU is idle.
    pub fn destroy(&mut self, device: &dyn NativeDevice) {
        for slot in self.slots.drain(..) {
            device.destroy_command_list(slot.list);
            device.destroy_fence(slot.fence);
        }
    }
}
