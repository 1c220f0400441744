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

//! A recording mock of [`NativeDevice`] for the unit tests of this crate.
//!
//! Fences only advance when the test says so (or immediately in auto-complete
//! mode), which gives the tests a fake GPU clock.

use super::*;
use crate::resource::TextureFormat;
use std::collections::HashMap;
use std::sync::Mutex;

const DESCRIPTOR_STRIDE: u32 = 32;

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    auto_complete: bool,
    device_lost: bool,
    fail_next_heap: bool,
    fail_next_resource: bool,
    present_outcome: Option<PresentOutcome>,
    memory: HashMap<NativeResource, Vec<u8>>,
    live_resources: Vec<NativeResource>,
    destroyed_resources: Vec<NativeResource>,
    destroyed_heaps: Vec<NativeHeap>,
    destroyed_pipelines: Vec<NativePipeline>,
    destroyed_layouts: Vec<NativeBindingLayout>,
    layouts: Vec<RootLayoutDesc>,
    fences: HashMap<NativeFence, (u64, u64)>,
    waits: Vec<(NativeFence, u64)>,
    commands: Vec<(NativeCommandList, GpuCommand)>,
    views: HashMap<CpuDescriptor, ViewDesc>,
    descriptor_copies: Vec<(CpuDescriptor, CpuDescriptor, u32)>,
    submissions: usize,
    swapchain: Vec<SwapchainImage>,
    swapchain_index: usize,
}

impl MockState {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Recording device with a manually driven fence clock.
#[derive(Debug, Default)]
pub(crate) struct MockDevice {
    state: Mutex<MockState>,
}

impl MockDevice {
    pub fn new() -> Self {
        let device = Self::default();
        device.state.lock().unwrap().auto_complete = true;
        device
    }

    fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn with_swapchain(images: u32) -> Self {
        let device = Self::new();
        device.with(|s| {
            for _ in 0..images {
                let id = s.next();
                s.swapchain.push(SwapchainImage {
                    resource: NativeResource(1000 + id),
                    format: TextureFormat::Bgra8Unorm,
                    width: 64,
                    height: 64,
                });
            }
        });
        device
    }

    pub fn set_auto_complete(&self, enabled: bool) {
        self.with(|s| s.auto_complete = enabled);
    }

    /// Lets the GPU catch up with every signal submitted so far.
    pub fn complete_all(&self) {
        self.with(|s| {
            for (completed, signaled) in s.fences.values_mut() {
                *completed = *signaled;
            }
        });
    }

    pub fn fail_next_heap(&self) {
        self.with(|s| s.fail_next_heap = true);
    }

    pub fn fail_next_resource(&self) {
        self.with(|s| s.fail_next_resource = true);
    }

    pub fn lose_device(&self) {
        self.with(|s| s.device_lost = true);
    }

    pub fn skip_presents(&self, skip: bool) {
        self.with(|s| {
            s.present_outcome = skip.then_some(PresentOutcome::Skipped);
        });
    }

    pub fn destroyed_resources(&self) -> Vec<NativeResource> {
        self.with(|s| s.destroyed_resources.clone())
    }

    pub fn destroyed_heaps(&self) -> Vec<NativeHeap> {
        self.with(|s| s.destroyed_heaps.clone())
    }

    pub fn destroyed_pipelines(&self) -> Vec<NativePipeline> {
        self.with(|s| s.destroyed_pipelines.clone())
    }

    pub fn destroyed_layouts(&self) -> Vec<NativeBindingLayout> {
        self.with(|s| s.destroyed_layouts.clone())
    }

    pub fn live_resource_count(&self) -> usize {
        self.with(|s| s.live_resources.len())
    }

    pub fn layouts(&self) -> Vec<RootLayoutDesc> {
        self.with(|s| s.layouts.clone())
    }

    pub fn waits(&self) -> Vec<(NativeFence, u64)> {
        self.with(|s| s.waits.clone())
    }

    pub fn commands(&self) -> Vec<GpuCommand> {
        self.with(|s| s.commands.iter().map(|(_, c)| c.clone()).collect())
    }

    pub fn clear_commands(&self) {
        self.with(|s| s.commands.clear());
    }

    pub fn view_at(&self, dst: CpuDescriptor) -> Option<ViewDesc> {
        self.with(|s| s.views.get(&dst).cloned())
    }

    pub fn descriptor_copies(&self) -> Vec<(CpuDescriptor, CpuDescriptor, u32)> {
        self.with(|s| s.descriptor_copies.clone())
    }

    pub fn submissions(&self) -> usize {
        self.with(|s| s.submissions)
    }

    fn check_lost(&self) -> Result<(), DriverError> {
        if self.with(|s| s.device_lost) {
            Err(DriverError::DeviceLost)
        } else {
            Ok(())
        }
    }
}

impl NativeDevice for MockDevice {
    fn create_resource(&self, desc: &ResourceDesc) -> Result<NativeAllocation, DriverError> {
        self.with(|s| {
            if std::mem::take(&mut s.fail_next_resource) {
                return Err(DriverError::OutOfMemory);
            }
            let id = s.next();
            let resource = NativeResource(id);
            if desc.memory.is_host_visible() {
                s.memory.insert(resource, vec![0; desc.size as usize]);
            }
            s.live_resources.push(resource);
            Ok(NativeAllocation {
                resource,
                gpu_address: id << 32,
                size: desc.size,
            })
        })
    }

    fn destroy_resource(&self, resource: NativeResource) {
        self.with(|s| {
            s.memory.remove(&resource);
            s.live_resources.retain(|r| *r != resource);
            s.destroyed_resources.push(resource);
        });
    }

    fn write_mapped(
        &self,
        resource: NativeResource,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DriverError> {
        self.with(|s| {
            let memory = s.memory.get_mut(&resource).ok_or(DriverError::InvalidObject)?;
            let start = offset as usize;
            memory[start..start + data.len()].copy_from_slice(data);
            Ok(())
        })
    }

    fn read_mapped(
        &self,
        resource: NativeResource,
        offset: u64,
        out: &mut [u8],
    ) -> Result<(), DriverError> {
        self.with(|s| {
            let memory = s.memory.get(&resource).ok_or(DriverError::InvalidObject)?;
            let start = offset as usize;
            out.copy_from_slice(&memory[start..start + out.len()]);
            Ok(())
        })
    }

    fn create_descriptor_heap(
        &self,
        _kind: DescriptorHeapKind,
        _capacity: u32,
        shader_visible: bool,
    ) -> Result<NativeHeapInfo, DriverError> {
        self.with(|s| {
            if std::mem::take(&mut s.fail_next_heap) {
                return Err(DriverError::OutOfMemory);
            }
            let id = s.next();
            Ok(NativeHeapInfo {
                heap: NativeHeap(id),
                cpu_base: id << 24,
                gpu_base: shader_visible.then_some(id << 40),
                stride: DESCRIPTOR_STRIDE,
            })
        })
    }

    fn destroy_descriptor_heap(&self, heap: NativeHeap) {
        self.with(|s| s.destroyed_heaps.push(heap));
    }

    fn write_view(&self, dst: CpuDescriptor, view: &ViewDesc) {
        self.with(|s| {
            s.views.insert(dst, view.clone());
        });
    }

    fn copy_descriptors(
        &self,
        _kind: DescriptorHeapKind,
        dst: CpuDescriptor,
        src: CpuDescriptor,
        count: u32,
    ) {
        self.with(|s| {
            s.descriptor_copies.push((dst, src, count));
            for i in 0..count {
                if let Some(view) = s.views.get(&src.offset(i, DESCRIPTOR_STRIDE)).cloned() {
                    s.views.insert(dst.offset(i, DESCRIPTOR_STRIDE), view);
                }
            }
        });
    }

    fn create_binding_layout(
        &self,
        desc: &RootLayoutDesc,
    ) -> Result<NativeBindingLayout, DriverError> {
        self.with(|s| {
            s.layouts.push(desc.clone());
            Ok(NativeBindingLayout(s.next()))
        })
    }

    fn destroy_binding_layout(&self, layout: NativeBindingLayout) {
        self.with(|s| s.destroyed_layouts.push(layout));
    }

    fn create_pipeline(
        &self,
        _desc: &NativePipelineDesc<'_>,
        _compute: bool,
    ) -> Result<NativePipeline, DriverError> {
        self.with(|s| Ok(NativePipeline(s.next())))
    }

    fn destroy_pipeline(&self, pipeline: NativePipeline) {
        self.with(|s| s.destroyed_pipelines.push(pipeline));
    }

    fn create_fence(&self, initial_value: u64) -> Result<NativeFence, DriverError> {
        self.with(|s| {
            let fence = NativeFence(s.next());
            s.fences.insert(fence, (initial_value, initial_value));
            Ok(fence)
        })
    }

    fn destroy_fence(&self, fence: NativeFence) {
        self.with(|s| {
            s.fences.remove(&fence);
        });
    }

    fn fence_completed_value(&self, fence: NativeFence) -> Result<u64, DriverError> {
        self.check_lost()?;
        self.with(|s| {
            s.fences
                .get(&fence)
                .map(|(completed, _)| *completed)
                .ok_or(DriverError::InvalidObject)
        })
    }

    fn wait_for_fence(
        &self,
        fence: NativeFence,
        value: u64,
        _timeout: Option<Duration>,
    ) -> Result<(), DriverError> {
        self.check_lost()?;
        self.with(|s| {
            s.waits.push((fence, value));
            let (completed, _) = s.fences.get(&fence).ok_or(DriverError::InvalidObject)?;
            if *completed >= value {
                Ok(())
            } else {
                Err(DriverError::Timeout)
            }
        })
    }

    fn create_command_list(&self) -> Result<NativeCommandList, DriverError> {
        self.with(|s| Ok(NativeCommandList(s.next())))
    }

    fn destroy_command_list(&self, _list: NativeCommandList) {}

    fn reset_command_list(&self, _list: NativeCommandList) -> Result<(), DriverError> {
        self.check_lost()
    }

    fn record(&self, list: NativeCommandList, command: GpuCommand) {
        self.with(|s| s.commands.push((list, command)));
    }

    fn close_command_list(&self, _list: NativeCommandList) -> Result<(), DriverError> {
        Ok(())
    }

    fn execute_command_list(&self, _list: NativeCommandList) -> Result<(), DriverError> {
        self.check_lost()?;
        self.with(|s| s.submissions += 1);
        Ok(())
    }

    fn signal(&self, fence: NativeFence, value: u64) -> Result<(), DriverError> {
        self.check_lost()?;
        self.with(|s| {
            let auto = s.auto_complete;
            let entry = s.fences.get_mut(&fence).ok_or(DriverError::InvalidObject)?;
            entry.1 = value;
            if auto {
                entry.0 = value;
            }
            Ok(())
        })
    }

    fn swapchain_images(&self) -> Vec<SwapchainImage> {
        self.with(|s| s.swapchain.clone())
    }

    fn current_swapchain_index(&self) -> Option<usize> {
        self.with(|s| (!s.swapchain.is_empty()).then_some(s.swapchain_index))
    }

    fn present(&self) -> Result<PresentOutcome, DriverError> {
        self.check_lost()?;
        self.with(|s| {
            let outcome = s.present_outcome.unwrap_or(PresentOutcome::Presented);
            if outcome == PresentOutcome::Presented && !s.swapchain.is_empty() {
                s.swapchain_index = (s.swapchain_index + 1) % s.swapchain.len();
            }
            Ok(outcome)
        })
    }

    fn wait_idle(&self) -> Result<(), DriverError> {
        self.check_lost()?;
        self.complete_all();
        Ok(())
    }
}
