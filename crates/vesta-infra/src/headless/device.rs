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

use std::time::Duration;

use vesta_core::binding::RootLayoutDesc;
use vesta_core::descriptor::{CpuDescriptor, DescriptorHeapKind};
use vesta_core::driver::{
    GpuCommand, NativeAllocation, NativeBindingLayout, NativeCommandList, NativeDevice,
    NativeFence, NativeHeap, NativeHeapInfo, NativePipeline, NativePipelineDesc, NativeResource,
    PresentOutcome, SwapchainImage, ViewDesc,
};
use vesta_core::resource::ResourceDesc;
use vesta_core::DriverError;

use super::queue::{self, QueueItem};
use super::{
    CommandListState, FenceState, HeadlessDevice, HeadlessEvent, HostResource, DESCRIPTOR_STRIDE,
};

/// Largest allocation the simulated device accepts.
const MAX_ALLOCATION: u64 = 256 * 1024 * 1024;

impl NativeDevice for HeadlessDevice {
    fn create_resource(&self, desc: &ResourceDesc) -> Result<NativeAllocation, DriverError> {
        let mut state = self.lock();
        state.check_lost()?;
        if std::mem::take(&mut state.fail_next_allocation) || desc.size > MAX_ALLOCATION {
            log::error!("Headless allocation of {} bytes failed", desc.size);
            return Err(DriverError::OutOfMemory);
        }
        let id = self.next_id();
        let resource = NativeResource(id);
        state.resources.insert(
            resource,
            HostResource {
                desc: desc.clone(),
                memory: vec![0; desc.size as usize],
                gpu_state: desc.initial_state(),
            },
        );
        Ok(NativeAllocation {
            resource,
            gpu_address: id << 32,
            size: desc.size,
        })
    }

    fn destroy_resource(&self, resource: NativeResource) {
        let mut state = self.lock();
        if state.resources.remove(&resource).is_none() {
            state.validation_error(format!("destroy of unknown resource {resource:?}"));
        }
    }

    fn write_mapped(
        &self,
        resource: NativeResource,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.check_lost()?;
        let host = state
            .resources
            .get_mut(&resource)
            .filter(|r| r.desc.memory.is_host_visible())
            .ok_or(DriverError::InvalidObject)?;
        let end = offset as usize + data.len();
        host.memory
            .get_mut(offset as usize..end)
            .ok_or(DriverError::InvalidObject)?
            .copy_from_slice(data);
        Ok(())
    }

    fn read_mapped(
        &self,
        resource: NativeResource,
        offset: u64,
        out: &mut [u8],
    ) -> Result<(), DriverError> {
        let state = self.lock();
        state.check_lost()?;
        let host = state
            .resources
            .get(&resource)
            .filter(|r| r.desc.memory.is_host_visible())
            .ok_or(DriverError::InvalidObject)?;
        let end = offset as usize + out.len();
        out.copy_from_slice(
            host.memory
                .get(offset as usize..end)
                .ok_or(DriverError::InvalidObject)?,
        );
        Ok(())
    }

    fn create_descriptor_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<NativeHeapInfo, DriverError> {
        let mut state = self.lock();
        state.check_lost()?;
        if shader_visible && !kind.can_be_shader_visible() {
            return Err(DriverError::Backend(format!(
                "{kind:?} heaps cannot be shader visible"
            )));
        }
        let id = self.next_id();
        let heap = NativeHeap(id);
        state.heaps.insert(heap, (kind, capacity));
        Ok(NativeHeapInfo {
            heap,
            cpu_base: id << 32,
            gpu_base: shader_visible.then_some(id << 40),
            stride: DESCRIPTOR_STRIDE,
        })
    }

    fn destroy_descriptor_heap(&self, heap: NativeHeap) {
        let mut state = self.lock();
        if state.heaps.remove(&heap).is_none() {
            state.validation_error(format!("destroy of unknown heap {heap:?}"));
            return;
        }
        state.descriptors.retain(|cpu, _| cpu.0 >> 32 != heap.0);
    }

    fn write_view(&self, dst: CpuDescriptor, view: &ViewDesc) {
        self.lock().descriptors.insert(dst, view.clone());
    }

    fn copy_descriptors(
        &self,
        _kind: DescriptorHeapKind,
        dst: CpuDescriptor,
        src: CpuDescriptor,
        count: u32,
    ) {
        let mut state = self.lock();
        for i in 0..count {
            let from = src.offset(i, DESCRIPTOR_STRIDE);
            let to = dst.offset(i, DESCRIPTOR_STRIDE);
            match state.descriptors.get(&from).cloned() {
                Some(view) => {
                    state.descriptors.insert(to, view);
                }
                None => state.validation_error(format!("copy of unwritten descriptor {from:?}")),
            }
        }
    }

    fn create_binding_layout(
        &self,
        desc: &RootLayoutDesc,
    ) -> Result<NativeBindingLayout, DriverError> {
        let mut state = self.lock();
        state.check_lost()?;
        let layout = NativeBindingLayout(self.next_id());
        state.layouts.insert(layout, desc.clone());
        Ok(layout)
    }

    fn destroy_binding_layout(&self, layout: NativeBindingLayout) {
        let mut state = self.lock();
        if state.layouts.remove(&layout).is_none() {
            state.validation_error(format!("destroy of unknown binding layout {layout:?}"));
        }
    }

    fn create_pipeline(
        &self,
        desc: &NativePipelineDesc<'_>,
        compute: bool,
    ) -> Result<NativePipeline, DriverError> {
        let mut state = self.lock();
        state.check_lost()?;
        if !state.layouts.contains_key(&desc.layout) {
            return Err(DriverError::InvalidObject);
        }
        if desc.shaders.is_empty() {
            return Err(DriverError::Backend(format!(
                "pipeline '{}' has no shader",
                desc.label.unwrap_or("<unnamed>")
            )));
        }
        let pipeline = NativePipeline(self.next_id());
        state.pipelines.insert(pipeline, compute);
        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: NativePipeline) {
        let mut state = self.lock();
        if state.pipelines.remove(&pipeline).is_none() {
            state.validation_error(format!("destroy of unknown pipeline {pipeline:?}"));
        }
    }

    fn create_fence(&self, initial_value: u64) -> Result<NativeFence, DriverError> {
        let mut state = self.lock();
        state.check_lost()?;
        let fence = NativeFence(self.next_id());
        state.fences.insert(
            fence,
            FenceState {
                completed: initial_value,
                signaled: initial_value,
            },
        );
        Ok(fence)
    }

    fn destroy_fence(&self, fence: NativeFence) {
        let mut state = self.lock();
        let pending = state
            .fences
            .remove(&fence)
            .map(|f| f.signaled > f.completed);
        match pending {
            Some(true) => state.validation_error(format!("{fence:?} destroyed with pending signals")),
            Some(false) => {}
            None => state.validation_error(format!("destroy of unknown fence {fence:?}")),
        }
    }

    fn fence_completed_value(&self, fence: NativeFence) -> Result<u64, DriverError> {
        let state = self.lock();
        state.check_lost()?;
        state
            .fences
            .get(&fence)
            .map(|f| f.completed)
            .ok_or(DriverError::InvalidObject)
    }

    fn wait_for_fence(
        &self,
        fence: NativeFence,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.check_lost()?;
        let completed = state
            .fences
            .get(&fence)
            .map(|f| f.completed)
            .ok_or(DriverError::InvalidObject)?;
        if completed >= value {
            return Ok(());
        }
        state.events.push(HeadlessEvent::Waited { fence, value });
        // A stalled GPU only makes progress on an unbounded wait.
        if timeout.is_some() && !state.auto_complete {
            return Err(DriverError::Timeout);
        }
        if queue::drain_until(&mut state, fence, value) {
            Ok(())
        } else {
            log::warn!("Wait on {fence:?} for {value} can never complete");
            Err(DriverError::Timeout)
        }
    }

    fn create_command_list(&self) -> Result<NativeCommandList, DriverError> {
        let mut state = self.lock();
        state.check_lost()?;
        let list = NativeCommandList(self.next_id());
        state.lists.insert(list, CommandListState::default());
        Ok(list)
    }

    fn destroy_command_list(&self, list: NativeCommandList) {
        let mut state = self.lock();
        let in_flight = state.lists.remove(&list).map(|l| l.in_flight > 0);
        match in_flight {
            Some(true) => state.validation_error(format!("{list:?} destroyed while in flight")),
            Some(false) => {}
            None => state.validation_error(format!("destroy of unknown command list {list:?}")),
        }
    }

    fn reset_command_list(&self, list: NativeCommandList) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.check_lost()?;
        let entry = state.lists.get_mut(&list).ok_or(DriverError::InvalidObject)?;
        let in_flight = entry.in_flight > 0;
        entry.open = true;
        entry.commands.clear();
        if in_flight {
            state.validation_error(format!("{list:?} reset while the GPU still executes it"));
        }
        Ok(())
    }

    fn record(&self, list: NativeCommandList, command: GpuCommand) {
        let mut state = self.lock();
        match state.lists.get_mut(&list) {
            Some(entry) if entry.open => entry.commands.push(command),
            _ => state.validation_error(format!("record into closed or unknown {list:?}")),
        }
    }

    fn close_command_list(&self, list: NativeCommandList) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.check_lost()?;
        let entry = state.lists.get_mut(&list).ok_or(DriverError::InvalidObject)?;
        entry.open = false;
        Ok(())
    }

    fn execute_command_list(&self, list: NativeCommandList) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.check_lost()?;
        let entry = state.lists.get_mut(&list).ok_or(DriverError::InvalidObject)?;
        if entry.open {
            return Err(DriverError::Backend(format!("{list:?} is still open")));
        }
        entry.in_flight += 1;
        let commands = entry.commands.clone();
        log::trace!("Headless queue: {} commands from {list:?}", commands.len());
        state.events.push(HeadlessEvent::Submitted {
            list,
            commands: commands.len(),
        });
        state.queue.push_back(QueueItem::Execute { list, commands });
        if state.auto_complete {
            queue::drain(&mut state);
        }
        Ok(())
    }

    fn signal(&self, fence: NativeFence, value: u64) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.check_lost()?;
        let entry = state.fences.get_mut(&fence).ok_or(DriverError::InvalidObject)?;
        entry.signaled = entry.signaled.max(value);
        state.queue.push_back(QueueItem::Signal { fence, value });
        if state.auto_complete {
            queue::drain(&mut state);
        }
        Ok(())
    }

    fn swapchain_images(&self) -> Vec<SwapchainImage> {
        self.lock().swapchain.clone()
    }

    fn current_swapchain_index(&self) -> Option<usize> {
        let state = self.lock();
        (!state.swapchain.is_empty()).then_some(state.swapchain_index)
    }

    fn present(&self) -> Result<PresentOutcome, DriverError> {
        let mut state = self.lock();
        state.check_lost()?;
        if state.skip_presents {
            state.events.push(HeadlessEvent::PresentSkipped);
            return Ok(PresentOutcome::Skipped);
        }
        // Without a swapchain a present only paces the frames.
        if !state.swapchain.is_empty() {
            let image = state.swapchain_index;
            state.events.push(HeadlessEvent::Presented { image });
            state.swapchain_index = (image + 1) % state.swapchain.len();
        }
        Ok(PresentOutcome::Presented)
    }

    fn wait_idle(&self) -> Result<(), DriverError> {
        let mut state = self.lock();
        state.check_lost()?;
        queue::drain(&mut state);
        Ok(())
    }
}
