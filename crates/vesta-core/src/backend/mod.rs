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

//! The backend context tying every allocator to one [`NativeDevice`].
//!
//! [`RenderBackend`] is created with [`RenderBackend::new`] and torn down with
//! [`RenderBackend::destroy`]. Between the two, the frontend only holds handles:
//! - resources, samplers and pipelines are created in `resources.rs`,
//! - copies, uploads and readbacks are batched in `updates.rs`,
//! - passes, bindings and draws are recorded in `commands.rs`,
//! - the frame lifecycle lives here.

mod commands;
mod objects;
mod resources;
mod updates;

pub use self::commands::*;
pub use self::objects::*;
pub use self::updates::*;

use crate::barrier::BarrierGenerator;
use crate::config::BackendConfig;
use crate::descriptor::{CpuDescriptorAllocators, DescriptorHeapKind, ShaderVisibleHeap};
use crate::driver::{GpuCommand, NativeDevice, PresentOutcome};
use crate::error::{BackendError, FrameError};
use crate::frame::{FrameKind, FrameScheduler, FrameSlot, FrameState};
use crate::pool::{Handle, ObjectPool};
use crate::release::{ReleaseContext, ReleaseQueue};
use crate::resource::{PooledResource, ResourceState};
use crate::staging::{StagingArena, StagingDirection};

/// A snapshot of the backend's bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Live buffers and textures, swapchain images included.
    pub live_resources: usize,
    /// Live samplers.
    pub live_samplers: usize,
    /// Live pipelines.
    pub live_pipelines: usize,
    /// Objects waiting in the release queue.
    pub pending_releases: usize,
    /// Times a shader-visible descriptor heap had to grow.
    pub descriptor_heap_growths: u32,
    /// Staging requests served by a dedicated buffer.
    pub dedicated_staging_allocations: u64,
    /// Command lists submitted so far.
    pub frames_submitted: u64,
}

/// An explicit graphics API backend over a [`NativeDevice`].
#[derive(Debug)]
pub struct RenderBackend<D: NativeDevice> {
    device: D,
    config: BackendConfig,
    resources: ObjectPool<PooledResource>,
    samplers: ObjectPool<PooledSampler>,
    pipelines: ObjectPool<PooledPipeline>,
    cpu_descriptors: CpuDescriptorAllocators,
    gpu_resources: ShaderVisibleHeap,
    gpu_samplers: ShaderVisibleHeap,
    releases: ReleaseQueue,
    barriers: BarrierGenerator,
    upload: StagingArena,
    readback: StagingArena,
    frames: FrameScheduler,
    back_buffers: Vec<Handle<PooledResource>>,
    current_back_buffer: Option<Handle<PooledResource>>,
    bound_pipeline: Option<Handle<PooledPipeline>>,
    destroyed: bool,
}

impl<D: NativeDevice> RenderBackend<D> {
    /// Creates the backend and every per-frame allocator.
    /// ## Arguments
    /// * `device` - The native device. The backend owns it until dropped.
    /// * `config` - Allocator sizes and frame count.
    /// ## Errors
    /// * `BackendError::Config` - If the configuration is invalid.
    /// * `BackendError::Driver` / `Descriptor` / `Resource` - If a startup object
    ///   could not be created. Everything created before the failure is destroyed.
    pub fn new(device: D, config: BackendConfig) -> Result<Self, BackendError> {
        config.validate()?;
        let count = config.frames_in_flight;

        let mut frames = FrameScheduler::new(&device, count, config.frame_wait_timeout())?;
        let gpu_resources = ShaderVisibleHeap::new(
            &device,
            DescriptorHeapKind::CbvSrvUav,
            config.gpu_resource_descriptors_per_frame,
            count,
        )
        .inspect_err(|_| frames.destroy(&device))?;
        let gpu_samplers = ShaderVisibleHeap::new(
            &device,
            DescriptorHeapKind::Sampler,
            config.gpu_sampler_descriptors_per_frame,
            count,
        )
        .inspect_err(|_| {
            gpu_resources.destroy(&device);
            frames.destroy(&device);
        })?;
        let upload = StagingArena::new(
            &device,
            StagingDirection::Upload,
            config.upload_bytes_per_frame,
            count,
            config.staging_alignment,
        )
        .inspect_err(|_| {
            gpu_samplers.destroy(&device);
            gpu_resources.destroy(&device);
            frames.destroy(&device);
        })?;
        let readback = StagingArena::new(
            &device,
            StagingDirection::Readback,
            config.readback_bytes_per_frame,
            count,
            config.staging_alignment,
        )
        .inspect_err(|_| {
            upload.destroy(&device);
            gpu_samplers.destroy(&device);
            gpu_resources.destroy(&device);
            frames.destroy(&device);
        })?;

        let mut backend = Self {
            cpu_descriptors: CpuDescriptorAllocators::new(config.cpu_descriptor_heap_size),
            resources: ObjectPool::new("resources", 256),
            samplers: ObjectPool::new("samplers", 32),
            pipelines: ObjectPool::new("pipelines", 64),
            gpu_resources,
            gpu_samplers,
            releases: ReleaseQueue::new(),
            barriers: BarrierGenerator::new(),
            upload,
            readback,
            frames,
            back_buffers: Vec::new(),
            current_back_buffer: None,
            bound_pipeline: None,
            destroyed: false,
            device,
            config,
        };
        if let Err(err) = backend.import_back_buffers() {
            backend.destroy();
            return Err(err.into());
        }

        log::info!(
            "Render backend created: {} frames in flight, {} swapchain images",
            backend.config.frames_in_flight,
            backend.back_buffers.len()
        );
        Ok(backend)
    }

    /// Waits for the GPU and releases every object the backend still owns.
    ///
    /// Objects the application did not destroy are reported as leaks in debug
    /// builds. Calling this twice is a no-op; dropping the backend calls it.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        if let Err(err) = self.device.wait_idle() {
            log::error!("Failed to wait for the GPU before teardown: {err}");
        }

        let mut ctx = ReleaseContext {
            device: &self.device,
            cpu_descriptors: &mut self.cpu_descriptors,
        };
        let released = self.releases.release_all(&mut ctx);
        for handle in self.back_buffers.drain(..) {
            self.resources.remove(handle, &mut ctx);
        }
        self.resources.destroy(&mut ctx);
        self.samplers.destroy(&mut ctx);
        self.pipelines.destroy(&mut ctx);

        self.gpu_resources.destroy(&self.device);
        self.gpu_samplers.destroy(&self.device);
        self.upload.destroy(&self.device);
        self.readback.destroy(&self.device);
        self.frames.destroy(&self.device);
        self.cpu_descriptors.destroy(&self.device);
        log::info!("Render backend destroyed ({released} deferred releases flushed)");
    }

    /// The native device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// The configuration the backend was created with.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// A snapshot of the bookkeeping counters.
    pub fn stats(&self) -> BackendStats {
        BackendStats {
            live_resources: self.resources.len(),
            live_samplers: self.samplers.len(),
            live_pipelines: self.pipelines.len(),
            pending_releases: self.releases.len(),
            descriptor_heap_growths: self.gpu_resources.growth_count()
                + self.gpu_samplers.growth_count(),
            dedicated_staging_allocations: self.upload.dedicated_count()
                + self.readback.dedicated_count(),
            frames_submitted: self.frames.frames_submitted(),
        }
    }

    /// The frame scheduler.
    pub fn frames(&self) -> &FrameScheduler {
        &self.frames
    }

    /// The swapchain image the current frame renders into, if any.
    pub fn back_buffer(&self) -> Option<Handle<PooledResource>> {
        self.current_back_buffer
    }

    /// Starts recording a frame that ends with a present.
    ///
    /// Waits (bounded) for the previous use of the slot, then frees what the slot
    /// deferred and resets its staging and descriptor slices.
    /// ## Errors
    /// * `FrameError::Driver(DriverError::Timeout)` - If the slot is still in use
    ///   after the configured timeout. Nothing was reset; the call can be retried.
    /// * `FrameError::DeviceLost` - If the device was lost.
    pub fn begin_frame(&mut self) -> Result<FrameSlot, FrameError> {
        self.begin(FrameKind::Swapchain)
    }

    /// Submits the frame, presents and moves to the next slot if a present happened.
    pub fn end_frame(&mut self) -> Result<(), FrameError> {
        self.ensure_can_end(FrameKind::Swapchain)?;
        if let Some(back_buffer) = self.current_back_buffer.take() {
            self.barriers
                .add_transition(&mut self.resources, back_buffer, ResourceState::Present);
        }
        self.flush_barriers();
        let slot = self.frames.submit(&self.device)?;
        self.releases.activate_pending(slot);

        match self.device.present() {
            Ok(outcome) => {
                if outcome == PresentOutcome::Skipped {
                    log::debug!("Present skipped, frame slot {slot} is reused");
                }
                self.frames.complete(outcome == PresentOutcome::Presented);
                Ok(())
            }
            Err(err) => {
                let err = self.frames.record_driver_error(err);
                self.frames.complete(false);
                Err(err)
            }
        }
    }

    /// Starts recording a frame without a swapchain image.
    pub fn begin_offscreen_frame(&mut self) -> Result<FrameSlot, FrameError> {
        self.begin(FrameKind::Offscreen)
    }

    /// Submits the offscreen frame and blocks until the GPU finished it.
    ///
    /// Readback callbacks recorded in the frame have been invoked on return.
    pub fn end_offscreen_frame(&mut self) -> Result<(), FrameError> {
        self.ensure_can_end(FrameKind::Offscreen)?;
        self.flush_barriers();
        let slot = self.frames.submit(&self.device)?;
        self.releases.activate_pending(slot);
        self.frames.wait_for_current(&self.device)?;
        self.execute_releases(slot);
        // The GPU is idle, the same slot can be reused right away.
        self.frames.complete(false);
        Ok(())
    }

    /// Submits what was recorded so far, waits for it and resumes recording.
    ///
    /// The logical frame continues, but the native list is reopened: the
    /// descriptor heaps and the bound pipeline are bound again, shader resources
    /// and vertex input must be set again before the next draw.
    pub fn finish(&mut self) -> Result<(), FrameError> {
        if self.frames.state() != FrameState::Recording(None) {
            return Err(FrameError::InvalidState(
                "finish requires a frame without an open pass",
            ));
        }
        self.flush_barriers();
        let slot = self.frames.submit(&self.device)?;
        self.releases.activate_pending(slot);
        self.frames.wait_for_current(&self.device)?;
        self.execute_releases(slot);
        self.reset_slot_allocators(slot);
        self.frames.resume(&self.device)?;

        self.bind_descriptor_heaps();
        if let Some(pipeline) = self.bound_pipeline {
            self.bind_pipeline_state(pipeline);
        }
        Ok(())
    }

    fn begin(&mut self, kind: FrameKind) -> Result<FrameSlot, FrameError> {
        let slot = self.frames.begin(&self.device, kind)?;
        let released = self.execute_releases(slot);
        self.reset_slot_allocators(slot);
        self.bound_pipeline = None;
        self.bind_descriptor_heaps();

        self.current_back_buffer = match kind {
            FrameKind::Swapchain => self
                .device
                .current_swapchain_index()
                .and_then(|index| self.back_buffers.get(index).copied()),
            FrameKind::Offscreen => None,
        };
        log::trace!("Frame slot {slot} begins ({kind:?}), {released} objects released");
        Ok(slot)
    }

    fn ensure_can_end(&self, kind: FrameKind) -> Result<(), FrameError> {
        if self.frames.is_device_lost() {
            return Err(FrameError::DeviceLost);
        }
        if self.frames.state() != FrameState::Recording(None) {
            return Err(FrameError::InvalidState(
                "ending a frame requires a frame without an open pass",
            ));
        }
        if self.frames.frame_kind() != kind {
            return Err(FrameError::InvalidState(
                "the frame was begun with the other begin call",
            ));
        }
        Ok(())
    }

    fn ensure_recording(&self) -> Result<(), FrameError> {
        if self.frames.is_device_lost() {
            return Err(FrameError::DeviceLost);
        }
        if !self.frames.is_recording() {
            return Err(FrameError::InvalidState("no frame is being recorded"));
        }
        Ok(())
    }

    fn execute_releases(&mut self, slot: FrameSlot) -> usize {
        let mut ctx = ReleaseContext {
            device: &self.device,
            cpu_descriptors: &mut self.cpu_descriptors,
        };
        self.releases.execute(slot, &mut ctx)
    }

    fn reset_slot_allocators(&mut self, slot: FrameSlot) {
        self.upload.reset_slice(slot);
        self.readback.reset_slice(slot);
        self.gpu_resources.reset_slice(slot);
        self.gpu_samplers.reset_slice(slot);
    }

    fn record(&self, command: GpuCommand) {
        self.device.record(self.frames.command_list(), command);
    }

    fn flush_barriers(&mut self) {
        let list = self.frames.command_list();
        self.barriers.flush(&self.device, list);
    }

    fn bind_descriptor_heaps(&self) {
        self.record(GpuCommand::SetDescriptorHeaps {
            resources: self.gpu_resources.native(),
            samplers: self.gpu_samplers.native(),
        });
    }
}

impl<D: NativeDevice> Drop for RenderBackend<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}
