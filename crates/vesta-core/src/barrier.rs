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

//! Batches resource barriers between GPU operations.
//!
//! The tracked state of a resource is updated as soon as a transition is requested,
//! so later requests in the same batch see the post-transition state. Only the net
//! `before -> after` change of each resource reaches the command list.

use crate::driver::{GpuCommand, NativeBarrier, NativeCommandList, NativeDevice};
use crate::pool::{Handle, ObjectPool};
use crate::resource::{AccessFlags, PooledResource, ResourceState};

#[derive(Debug, Clone, Copy)]
enum PendingBarrier {
    Transition {
        handle: Handle<PooledResource>,
        barrier: NativeBarrier,
    },
    Hazard {
        handle: Handle<PooledResource>,
        barrier: NativeBarrier,
    },
}

/// Collects transition and hazard barriers until the next flush.
#[derive(Debug, Default)]
pub struct BarrierGenerator {
    pending: Vec<PendingBarrier>,
}

impl BarrierGenerator {
    /// Creates an empty generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests that `handle` be in `new_state` for the next GPU operation.
    ///
    /// Returns `true` if the batch changed. Requesting the current state is a no-op.
    pub fn add_transition(
        &mut self,
        resources: &mut ObjectPool<PooledResource>,
        handle: Handle<PooledResource>,
        new_state: ResourceState,
    ) -> bool {
        let Some(resource) = resources.lookup_mut(handle) else {
            log::warn!("Transition requested for invalid resource {handle:?}");
            return false;
        };
        // Upload and readback heaps never leave their initial state.
        if resource.desc().memory.is_host_visible() {
            return false;
        }
        let current = resource.state;
        if current == new_state {
            return false;
        }
        resource.state = new_state;
        // A state change synchronizes every earlier access.
        resource.access = AccessFlags::NONE;
        let native = resource.native();

        let existing = self.pending.iter().position(|p| {
            matches!(p, PendingBarrier::Transition { handle: h, .. } if *h == handle)
        });
        match existing {
            Some(index) => {
                let cancels = matches!(
                    self.pending[index],
                    PendingBarrier::Transition {
                        barrier: NativeBarrier::Transition { before, .. },
                        ..
                    } if before == new_state
                );
                if cancels {
                    self.pending.remove(index);
                } else if let PendingBarrier::Transition {
                    barrier: NativeBarrier::Transition { after, .. },
                    ..
                } = &mut self.pending[index]
                {
                    *after = new_state;
                }
            }
            None => self.pending.push(PendingBarrier::Transition {
                handle,
                barrier: NativeBarrier::Transition {
                    resource: native,
                    before: current,
                    after: new_state,
                },
            }),
        }
        true
    }

    /// Records an unordered access of `handle` and queues a hazard barrier when it
    /// conflicts with the accesses since the last synchronization.
    ///
    /// A write after any access, or a read after a write, needs a barrier. Reads
    /// after reads do not. Returns whether a barrier was queued.
    pub fn enqueue_hazard_barrier(
        &mut self,
        resources: &mut ObjectPool<PooledResource>,
        handle: Handle<PooledResource>,
        access: AccessFlags,
    ) -> bool {
        let Some(resource) = resources.lookup_mut(handle) else {
            log::warn!("Hazard barrier requested for invalid resource {handle:?}");
            return false;
        };
        let previous = resource.access;
        let conflict = (access.contains(AccessFlags::WRITE) && !previous.is_empty())
            || (access.contains(AccessFlags::READ) && previous.contains(AccessFlags::WRITE));
        if !conflict {
            resource.access = previous | access;
            return false;
        }
        resource.access = access;

        let already_queued = self
            .pending
            .iter()
            .any(|p| matches!(p, PendingBarrier::Hazard { handle: h, .. } if *h == handle));
        if !already_queued {
            self.pending.push(PendingBarrier::Hazard {
                handle,
                barrier: NativeBarrier::Hazard {
                    resource: resource.native(),
                },
            });
        }
        true
    }

    /// Records every queued barrier in one call and clears the batch.
    ///
    /// Returns the number of barriers recorded.
    pub fn flush(&mut self, device: &dyn NativeDevice, list: NativeCommandList) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let barriers: Vec<NativeBarrier> = self
            .pending
            .drain(..)
            .map(|p| match p {
                PendingBarrier::Transition { barrier, .. } | PendingBarrier::Hazard { barrier, .. } => {
                    barrier
                }
            })
            .collect();
        let count = barriers.len();
        device.record(list, GpuCommand::Barriers(barriers));
        count
    }

    /// Number of barriers waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Drops queued barriers of a resource that is about to be released.
    pub fn forget(&mut self, handle: Handle<PooledResource>) {
        self.pending.retain(|p| match p {
            PendingBarrier::Transition { handle: h, .. } | PendingBarrier::Hazard { handle: h, .. } => {
                *h != handle
            }
        });
    }
}
