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

//! The contract between the backend core and a native explicit graphics API.
//!
//! Everything the core needs from the driver goes through [`NativeDevice`]. The
//! core never holds native pointers: every native object is an opaque id that is
//! only meaningful to the device that created it.

mod command;
#[cfg(test)]
pub(crate) mod mock;
mod types;

pub use self::command::*;
pub use self::types::*;

use crate::binding::RootLayoutDesc;
use crate::descriptor::{CpuDescriptor, DescriptorHeapKind};
use crate::error::DriverError;
use crate::resource::ResourceDesc;
use std::fmt::Debug;
use std::time::Duration;

/// A native graphics device together with its direct queue.
pub trait NativeDevice: Send + Sync + Debug + 'static {
    /// Creates a buffer or texture.
    /// ## Arguments
    /// * `desc` - Shape, size, usage and memory placement of the resource.
    /// ## Returns
    /// The native allocation. Host-visible resources stay mapped until destroyed.
    /// ## Errors
    /// * `DriverError::OutOfMemory` - If the memory could not be allocated.
    fn create_resource(&self, desc: &ResourceDesc) -> Result<NativeAllocation, DriverError>;

    /// Destroys a resource created by [`NativeDevice::create_resource`].
    fn destroy_resource(&self, resource: NativeResource);

    /// Writes bytes into a persistently mapped resource.
    fn write_mapped(
        &self,
        resource: NativeResource,
        offset: u64,
        data: &[u8],
    ) -> Result<(), DriverError>;

    /// Reads bytes from a persistently mapped resource.
    fn read_mapped(
        &self,
        resource: NativeResource,
        offset: u64,
        out: &mut [u8],
    ) -> Result<(), DriverError>;

    /// Creates a descriptor heap.
    /// ## Arguments
    /// * `kind` - The kind of descriptors the heap stores.
    /// * `capacity` - Number of descriptors.
    /// * `shader_visible` - Whether shaders can read the heap. Only those heaps have GPU handles.
    /// ## Errors
    /// * `DriverError` - If the heap could not be created.
    fn create_descriptor_heap(
        &self,
        kind: DescriptorHeapKind,
        capacity: u32,
        shader_visible: bool,
    ) -> Result<NativeHeapInfo, DriverError>;

    /// Destroys a descriptor heap.
    fn destroy_descriptor_heap(&self, heap: NativeHeap);

    /// Writes a view or sampler descriptor at `dst`.
    fn write_view(&self, dst: CpuDescriptor, view: &ViewDesc);

    /// Copies `count` consecutive descriptors from `src` to `dst`.
    fn copy_descriptors(
        &self,
        kind: DescriptorHeapKind,
        dst: CpuDescriptor,
        src: CpuDescriptor,
        count: u32,
    );

    /// Creates a native binding layout (root signature).
    fn create_binding_layout(
        &self,
        desc: &RootLayoutDesc,
    ) -> Result<NativeBindingLayout, DriverError>;

    /// Destroys a native binding layout.
    fn destroy_binding_layout(&self, layout: NativeBindingLayout);

    /// Compiles a graphics or compute pipeline state object.
    fn create_pipeline(
        &self,
        desc: &NativePipelineDesc<'_>,
        compute: bool,
    ) -> Result<NativePipeline, DriverError>;

    /// Destroys a pipeline state object.
    fn destroy_pipeline(&self, pipeline: NativePipeline);

    /// Creates a fence with an initial completed value.
    fn create_fence(&self, initial_value: u64) -> Result<NativeFence, DriverError>;

    /// Destroys a fence.
    fn destroy_fence(&self, fence: NativeFence);

    /// Returns the last value the GPU signaled on the fence.
    /// ## Errors
    /// * `DriverError::DeviceLost` - If the device was removed.
    fn fence_completed_value(&self, fence: NativeFence) -> Result<u64, DriverError>;

    /// Blocks until the fence reaches `value`.
    /// ## Arguments
    /// * `timeout` - Upper bound of the wait. `None` waits forever.
    /// ## Errors
    /// * `DriverError::Timeout` - If the bound expired first.
    /// * `DriverError::DeviceLost` - If the device was removed while waiting.
    fn wait_for_fence(
        &self,
        fence: NativeFence,
        value: u64,
        timeout: Option<Duration>,
    ) -> Result<(), DriverError>;

    /// Creates a command allocator and its command list, closed.
    fn create_command_list(&self) -> Result<NativeCommandList, DriverError>;

    /// Destroys a command list and its allocator.
    fn destroy_command_list(&self, list: NativeCommandList);

    /// Resets the allocator and reopens the list for recording.
    ///
    /// Only valid once the GPU finished executing the previous recording.
    fn reset_command_list(&self, list: NativeCommandList) -> Result<(), DriverError>;

    /// Records a command into an open list.
    fn record(&self, list: NativeCommandList, command: GpuCommand);

    /// Closes the list so it can be submitted.
    fn close_command_list(&self, list: NativeCommandList) -> Result<(), DriverError>;

    /// Submits a closed list to the queue.
    fn execute_command_list(&self, list: NativeCommandList) -> Result<(), DriverError>;

    /// Enqueues a signal of `value` on the fence after all submitted work.
    fn signal(&self, fence: NativeFence, value: u64) -> Result<(), DriverError>;

    /// The images of the swapchain, empty when rendering headless.
    fn swapchain_images(&self) -> Vec<SwapchainImage>;

    /// Index of the swapchain image the next frame renders into.
    fn current_swapchain_index(&self) -> Option<usize>;

    /// Presents the current swapchain image.
    /// ## Errors
    /// * `DriverError::DeviceLost` - If the device was removed.
    fn present(&self) -> Result<PresentOutcome, DriverError>;

    /// Blocks until the queue is idle.
    fn wait_idle(&self) -> Result<(), DriverError>;
}
