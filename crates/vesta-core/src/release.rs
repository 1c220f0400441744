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

//! Deferred destruction of GPU-resident objects.
//!
//! Releasing an object the GPU may still be using is a two-phase operation:
//! 1. `defer_*` queues the object with no target frame slot.
//! 2. [`ReleaseQueue::activate_pending`], called once per frame after submission,
//!    stamps every unstamped entry with the slot that was just submitted.
//! 3. [`ReleaseQueue::execute`], called when that slot is reused and its fence was
//!    observed, destroys every entry stamped with it.
//!
//! An entry therefore always outlives the last submission that could reference it.

use std::fmt;

use crate::descriptor::{CpuDescriptorAllocators, ViewAllocation};
use crate::driver::{NativeBindingLayout, NativeDevice, NativeHeap, NativePipeline, NativeResource};
use crate::frame::FrameSlot;
use crate::pool::Release;
use crate::resource::PooledResource;

/// What a release needs access to.
pub struct ReleaseContext<'a> {
    /// The device that created the objects.
    pub device: &'a dyn NativeDevice,
    /// The pools owning the CPU descriptors of views.
    pub cpu_descriptors: &'a mut CpuDescriptorAllocators,
}

/// A callback run when its frame slot is known to be idle.
pub type ReleaseCallback = Box<dyn FnOnce(&mut ReleaseContext<'_>)>;

/// The payload of a deferred release.
pub enum ReleasePayload {
    /// A bare native resource owned by the backend, such as a dedicated staging buffer.
    Resource(NativeResource),
    /// A pooled resource with the views it owns.
    ResourceWithViews(PooledResource),
    /// A pipeline state object.
    Pipeline(NativePipeline),
    /// A binding layout (root signature).
    BindingLayout(NativeBindingLayout),
    /// A whole native descriptor heap.
    DescriptorHeap(NativeHeap),
    /// CPU descriptors no longer referenced by any resource.
    Views(Vec<ViewAllocation>),
    /// Arbitrary work, such as delivering readback results.
    Callback(ReleaseCallback),
}

impl fmt::Debug for ReleasePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleasePayload::Resource(native) => f.debug_tuple("Resource").field(native).finish(),
            ReleasePayload::ResourceWithViews(resource) => f
                .debug_tuple("ResourceWithViews")
                .field(&resource.native())
                .finish(),
            ReleasePayload::Pipeline(p) => f.debug_tuple("Pipeline").field(p).finish(),
            ReleasePayload::BindingLayout(l) => f.debug_tuple("BindingLayout").field(l).finish(),
            ReleasePayload::DescriptorHeap(h) => f.debug_tuple("DescriptorHeap").field(h).finish(),
            ReleasePayload::Views(views) => f.debug_tuple("Views").field(&views.len()).finish(),
            ReleasePayload::Callback(_) => f.write_str("Callback"),
        }
    }
}

impl Release<ReleaseContext<'_>> for ReleasePayload {
    fn release(self, ctx: &mut ReleaseContext<'_>) {
        match self {
            ReleasePayload::Resource(native) => ctx.device.destroy_resource(native),
            ReleasePayload::ResourceWithViews(resource) => resource.release(ctx),
            ReleasePayload::Pipeline(pipeline) => ctx.device.destroy_pipeline(pipeline),
            ReleasePayload::BindingLayout(layout) => ctx.device.destroy_binding_layout(layout),
            ReleasePayload::DescriptorHeap(heap) => ctx.device.destroy_descriptor_heap(heap),
            ReleasePayload::Views(views) => {
                for view in &views {
                    ctx.cpu_descriptors.release(view);
                }
            }
            ReleasePayload::Callback(callback) => callback(ctx),
        }
    }
}

#[derive(Debug)]
struct DeferredRelease {
    payload: ReleasePayload,
    target: Option<FrameSlot>,
}

/// Queue of objects waiting for the GPU to stop using them.
#[derive(Debug, Default)]
pub struct ReleaseQueue {
    entries: Vec<DeferredRelease>,
}

impl ReleaseQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a payload. It is not stamped until the next activation.
    pub fn defer(&mut self, payload: ReleasePayload) {
        log::trace!("Deferring release of {payload:?}");
        self.entries.push(DeferredRelease {
            payload,
            target: None,
        });
    }

    /// Queues a bare native resource.
    pub fn defer_resource(&mut self, resource: NativeResource) {
        self.defer(ReleasePayload::Resource(resource));
    }

    /// Queues a pooled resource and its views.
    pub fn defer_pooled_resource(&mut self, resource: PooledResource) {
        self.defer(ReleasePayload::ResourceWithViews(resource));
    }

    /// Queues a pipeline state object.
    pub fn defer_pipeline(&mut self, pipeline: NativePipeline) {
        self.defer(ReleasePayload::Pipeline(pipeline));
    }

    /// Queues a binding layout.
    pub fn defer_binding_layout(&mut self, layout: NativeBindingLayout) {
        self.defer(ReleasePayload::BindingLayout(layout));
    }

    /// Queues a native descriptor heap.
    pub fn defer_descriptor_heap(&mut self, heap: NativeHeap) {
        self.defer(ReleasePayload::DescriptorHeap(heap));
    }

    /// Queues CPU descriptor allocations.
    pub fn defer_views(&mut self, views: Vec<ViewAllocation>) {
        if !views.is_empty() {
            self.defer(ReleasePayload::Views(views));
        }
    }

    /// Queues a callback.
    pub fn defer_callback(&mut self, callback: impl FnOnce(&mut ReleaseContext<'_>) + 'static) {
        self.defer(ReleasePayload::Callback(Box::new(callback)));
    }

    /// Stamps every unstamped entry with `slot`. Returns how many were stamped.
    pub fn activate_pending(&mut self, slot: FrameSlot) -> usize {
        let mut stamped = 0;
        for entry in self.entries.iter_mut().filter(|e| e.target.is_none()) {
            entry.target = Some(slot);
            stamped += 1;
        }
        if stamped > 0 {
            log::trace!("Activated {stamped} deferred releases for frame slot {slot}");
        }
        stamped
    }

    /// Releases every entry stamped with `slot`, in the order they were deferred.
    ///
    /// Must only be called once the fence of the slot's previous submission was observed.
    pub fn execute(&mut self, slot: FrameSlot, ctx: &mut ReleaseContext<'_>) -> usize {
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.target == Some(slot));
        self.entries = waiting;

        let count = ready.len();
        for entry in ready {
            entry.payload.release(ctx);
        }
        if count > 0 {
            log::debug!("Executed {count} deferred releases for frame slot {slot}");
        }
        count
    }

    /// Releases everything, stamped or not. Only valid after a full GPU drain.
    pub fn release_all(&mut self, ctx: &mut ReleaseContext<'_>) -> usize {
        let count = self.entries.len();
        for entry in self.entries.drain(..) {
            entry.payload.release(ctx);
        }
        count
    }

    /// Entries waiting for activation.
    pub fn pending_count(&self) -> usize {
        self.entries.iter().filter(|e| e.target.is_none()).count()
    }

    /// Entries stamped with `slot`.
    pub fn activated_count(&self, slot: FrameSlot) -> usize {
        self.entries
            .iter()
            .filter(|e| e.target == Some(slot))
            .count()
    }

    /// All queued entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
