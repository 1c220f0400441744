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

//! A software [`NativeDevice`] without a GPU.
//!
//! Every resource is backed by host memory. Submitted command lists are queued
//! and executed in order by a simulated GPU: copies move bytes, render pass
//! clears fill attachments, barriers are checked against the state the GPU
//! tracks for each resource, and fence signals complete when the queue reaches
//! them. In auto-complete mode (the default) the queue drains on every
//! submission; otherwise it only drains on [`HeadlessDevice::complete_all`],
//! [`HeadlessDevice::step`] or an unbounded wait.

mod device;
mod queue;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use vesta_core::binding::RootLayoutDesc;
use vesta_core::descriptor::{CpuDescriptor, DescriptorHeapKind};
use vesta_core::driver::{
    GpuCommand, NativeBindingLayout, NativeCommandList, NativeDevice, NativeFence, NativeHeap,
    NativePipeline, NativeResource, SwapchainImage, ViewDesc,
};
use vesta_core::resource::{ResourceDesc, ResourceState, ResourceUsage, TextureFormat};
use vesta_core::DriverError;

use self::queue::QueueItem;

/// Distance between two descriptors of any heap.
pub const DESCRIPTOR_STRIDE: u32 = 32;

/// Something the simulated device did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeadlessEvent {
    /// A command list was queued.
    Submitted {
        /// The list.
        list: NativeCommandList,
        /// Number of recorded commands.
        commands: usize,
    },
    /// The GPU reached a fence signal.
    FenceCompleted {
        /// The fence.
        fence: NativeFence,
        /// The value it now holds.
        value: u64,
    },
    /// The CPU waited on a fence that had not reached `value` yet.
    Waited {
        /// The fence.
        fence: NativeFence,
        /// The awaited value.
        value: u64,
    },
    /// A swapchain image was presented.
    Presented {
        /// Index of the image.
        image: usize,
    },
    /// A present was skipped.
    PresentSkipped,
    /// The device was lost.
    DeviceLost,
}

/// Number of native objects alive on the device, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveObjects {
    /// Buffers and textures, swapchain images included.
    pub resources: usize,
    /// Descriptor heaps.
    pub descriptor_heaps: usize,
    /// Binding layouts.
    pub binding_layouts: usize,
    /// Pipelines.
    pub pipelines: usize,
    /// Fences.
    pub fences: usize,
    /// Command lists.
    pub command_lists: usize,
}

#[derive(Debug)]
struct HostResource {
    desc: ResourceDesc,
    memory: Vec<u8>,
    /// State on the GPU timeline, updated when barriers execute.
    gpu_state: ResourceState,
}

#[derive(Debug, Default)]
struct CommandListState {
    open: bool,
    commands: Vec<GpuCommand>,
    /// Submissions of this list not executed yet.
    in_flight: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct FenceState {
    completed: u64,
    signaled: u64,
}

#[derive(Debug, Default)]
struct HeadlessState {
    auto_complete: bool,
    device_lost: bool,
    skip_presents: bool,
    fail_next_allocation: bool,
    resources: HashMap<NativeResource, HostResource>,
    heaps: HashMap<NativeHeap, (DescriptorHeapKind, u32)>,
    descriptors: HashMap<CpuDescriptor, ViewDesc>,
    layouts: HashMap<NativeBindingLayout, RootLayoutDesc>,
    pipelines: HashMap<NativePipeline, bool>,
    fences: HashMap<NativeFence, FenceState>,
    lists: HashMap<NativeCommandList, CommandListState>,
    queue: VecDeque<QueueItem>,
    swapchain: Vec<SwapchainImage>,
    swapchain_index: usize,
    draws: u64,
    dispatches: u64,
    events: Vec<HeadlessEvent>,
    validation_errors: Vec<String>,
}

impl HeadlessState {
    fn validation_error(&mut self, message: String) {
        log::warn!("Headless validation: {message}");
        self.validation_errors.push(message);
    }

    fn check_lost(&self) -> Result<(), DriverError> {
        if self.device_lost {
            Err(DriverError::DeviceLost)
        } else {
            Ok(())
        }
    }
}

/// A device that runs the whole backend on the CPU.
#[derive(Debug)]
pub struct HeadlessDevice {
    state: Mutex<HeadlessState>,
    next_id: AtomicU64,
}

impl HeadlessDevice {
    /// Creates a device without a swapchain, in auto-complete mode.
    pub fn new() -> anyhow::Result<Self> {
        let device = Self {
            state: Mutex::new(HeadlessState {
                auto_complete: true,
                ..Default::default()
            }),
            next_id: AtomicU64::new(1),
        };
        log::info!("Headless device created");
        Ok(device)
    }

    /// Creates a device presenting to `images` swapchain images of the given size.
    pub fn with_swapchain(images: usize, width: u32, height: u32) -> anyhow::Result<Self> {
        anyhow::ensure!(images > 0, "a swapchain needs at least one image");
        anyhow::ensure!(
            width > 0 && height > 0,
            "swapchain extent {width}x{height} is empty"
        );
        let device = Self::new()?;
        let format = TextureFormat::Bgra8Unorm;
        for index in 0..images {
            let desc = ResourceDesc::texture(
                &format!("swapchain image {index}"),
                width,
                height,
                format,
                ResourceUsage::RENDER_TARGET,
            );
            let allocation = device
                .create_resource(&desc)
                .with_context(|| format!("Failed to create swapchain image {index}"))?;
            let mut state = device.lock();
            if let Some(resource) = state.resources.get_mut(&allocation.resource) {
                resource.gpu_state = ResourceState::Present;
            }
            state.swapchain.push(SwapchainImage {
                resource: allocation.resource,
                format,
                width,
                height,
            });
        }
        log::info!("Headless swapchain: {images} images of {width}x{height}");
        Ok(device)
    }

    fn lock(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Chooses whether submissions complete immediately.
    pub fn set_auto_complete(&self, enabled: bool) {
        let mut state = self.lock();
        state.auto_complete = enabled;
        if enabled {
            queue::drain(&mut state);
        }
    }

    /// Executes every queued submission and signal.
    pub fn complete_all(&self) {
        queue::drain(&mut self.lock());
    }

    /// Executes the oldest queued item. Returns `false` if the queue was empty.
    pub fn step(&self) -> bool {
        queue::step(&mut self.lock())
    }

    /// Number of queued submissions and signals.
    pub fn pending_work(&self) -> usize {
        self.lock().queue.len()
    }

    /// Makes every present report [`vesta_core::driver::PresentOutcome::Skipped`].
    pub fn skip_presents(&self, skip: bool) {
        self.lock().skip_presents = skip;
    }

    /// Makes the next resource allocation fail with `OutOfMemory`.
    pub fn fail_next_allocation(&self) {
        self.lock().fail_next_allocation = true;
    }

    /// Loses the device. Every fallible call fails with `DeviceLost` afterwards.
    pub fn lose_device(&self) {
        let mut state = self.lock();
        if !state.device_lost {
            log::warn!("Headless device lost");
            state.device_lost = true;
            state.queue.clear();
            state.events.push(HeadlessEvent::DeviceLost);
        }
    }

    /// Contents of a resource, whatever its memory location.
    pub fn read_resource(&self, resource: NativeResource) -> Option<Vec<u8>> {
        self.lock().resources.get(&resource).map(|r| r.memory.clone())
    }

    /// The state the simulated GPU last saw for a resource.
    pub fn gpu_state(&self, resource: NativeResource) -> Option<ResourceState> {
        self.lock().resources.get(&resource).map(|r| r.gpu_state)
    }

    /// The view written at a CPU descriptor, if any.
    pub fn descriptor(&self, cpu: CpuDescriptor) -> Option<ViewDesc> {
        self.lock().descriptors.get(&cpu).cloned()
    }

    /// Draw calls executed so far.
    pub fn draws(&self) -> u64 {
        self.lock().draws
    }

    /// Dispatches executed so far.
    pub fn dispatches(&self) -> u64 {
        self.lock().dispatches
    }

    /// Everything the device did, in order.
    pub fn events(&self) -> Vec<HeadlessEvent> {
        self.lock().events.clone()
    }

    /// Misuse detected by the simulated GPU: barriers with a wrong `before`
    /// state, copies out of bounds, destroys of unknown objects, ...
    pub fn validation_errors(&self) -> Vec<String> {
        self.lock().validation_errors.clone()
    }

    /// Counts of live native objects.
    pub fn live_objects(&self) -> LiveObjects {
        let state = self.lock();
        LiveObjects {
            resources: state.resources.len(),
            descriptor_heaps: state.heaps.len(),
            binding_layouts: state.layouts.len(),
            pipelines: state.pipelines.len(),
            fences: state.fences.len(),
            command_lists: state.lists.len(),
        }
    }

    /// Resources that are still alive. Used by leak checks.
    pub fn live_resources(&self) -> HashSet<NativeResource> {
        self.lock().resources.keys().copied().collect()
    }
}
