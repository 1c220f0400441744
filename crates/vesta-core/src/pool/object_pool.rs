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

use std::collections::BTreeSet;

use super::Handle;

/// Releases the native objects held by a pooled payload.
///
/// `release` consumes the payload, so it runs at most once per object.
pub trait Release<Ctx: ?Sized> {
    /// Destroys the native objects owned by `self`.
    fn release(self, ctx: &mut Ctx);
}

#[derive(Debug)]
struct Slot<T> {
    payload: Option<T>,
    generation: u32,
}

/// A growable arena of objects addressed by generational [`Handle`]s.
///
/// Slot 0 is permanently reserved so that the null handle never resolves.
/// `add` reuses the lowest free slot, or appends one. The generation of a reused
/// slot is bumped so stale handles fail validation. A slot whose generation is
/// exhausted is retired instead of wrapping around.
#[derive(Debug)]
pub struct ObjectPool<T> {
    name: &'static str,
    slots: Vec<Slot<T>>,
    free_slots: BTreeSet<u32>,
    live: usize,
}

impl<T> ObjectPool<T> {
    /// Creates an empty pool with room for `capacity` objects.
    ///
    /// A capacity of 0 is valid; the pool grows lazily.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity + 1);
        slots.push(Slot {
            payload: None,
            generation: 0,
        });
        Self {
            name,
            slots,
            free_slots: BTreeSet::new(),
            live: 0,
        }
    }

    /// Stores `payload` and returns a handle to it.
    pub fn add(&mut self, payload: T) -> Handle<T> {
        self.live += 1;
        if let Some(index) = self.free_slots.pop_first() {
            let slot = &mut self.slots[index as usize];
            slot.generation += 1;
            slot.payload = Some(payload);
            return Handle::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            payload: Some(payload),
            generation: 1,
        });
        Handle::new(index, 1)
    }

    /// Removes the object and runs its release hook.
    ///
    /// Returns `false` if the handle was already stale, in which case nothing happens.
    pub fn remove<Ctx: ?Sized>(&mut self, handle: Handle<T>, ctx: &mut Ctx) -> bool
    where
        T: Release<Ctx>,
    {
        match self.take(handle) {
            Some(payload) => {
                payload.release(ctx);
                true
            }
            None => false,
        }
    }

    /// Removes the object without releasing it and hands it to the caller.
    ///
    /// Used to move payloads into the deferred release queue.
    pub fn take(&mut self, handle: Handle<T>) -> Option<T> {
        if !self.is_valid(handle) {
            return None;
        }
        let slot = &mut self.slots[handle.index as usize];
        let payload = slot.payload.take();
        if payload.is_some() {
            self.live -= 1;
            Self::recycle(&mut self.free_slots, self.name, handle.index, slot.generation);
        }
        payload
    }

    /// Resolves a handle.
    pub fn lookup(&self, handle: Handle<T>) -> Option<&T> {
        self.slot(handle).and_then(|slot| slot.payload.as_ref())
    }

    /// Resolves a handle mutably.
    pub fn lookup_mut(&mut self, handle: Handle<T>) -> Option<&mut T> {
        if handle.index == 0 {
            return None;
        }
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.payload.as_mut())
    }

    /// Checks index range, generation match and occupancy.
    pub fn is_valid(&self, handle: Handle<T>) -> bool {
        self.lookup(handle).is_some()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether the pool holds no live object.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Iterates over the live objects and their handles.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(index, slot)| {
                slot.payload
                    .as_ref()
                    .map(|payload| (Handle::new(index as u32, slot.generation), payload))
            })
    }

    /// Force-releases every remaining object.
    ///
    /// Remaining objects are leaks of the caller; they are reported in debug builds.
    pub fn destroy<Ctx: ?Sized>(&mut self, ctx: &mut Ctx)
    where
        T: Release<Ctx>,
    {
        for (index, slot) in self.slots.iter_mut().enumerate().skip(1) {
            if let Some(payload) = slot.payload.take() {
                if cfg!(debug_assertions) {
                    log::warn!(
                        "Leaked object in pool '{}' at {:?}, releasing it.",
                        self.name,
                        Handle::<T>::new(index as u32, slot.generation)
                    );
                }
                payload.release(ctx);
                Self::recycle(&mut self.free_slots, self.name, index as u32, slot.generation);
            }
        }
        self.live = 0;
    }

    fn recycle(free_slots: &mut BTreeSet<u32>, name: &str, index: u32, generation: u32) {
        if generation == u32::MAX {
            log::debug!("Retiring slot {index} of pool '{name}': generations exhausted.");
            return;
        }
        free_slots.insert(index);
    }

    fn slot(&self, handle: Handle<T>) -> Option<&Slot<T>> {
        if handle.index == 0 {
            return None;
        }
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
    }
}

impl<T> Drop for ObjectPool<T> {
    fn drop(&mut self) {
        if self.live > 0 {
            log::error!(
                "Pool '{}' dropped with {} live objects; their native objects are leaked.",
                self.name,
                self.live
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Tracked(u32);

    impl Release<Vec<u32>> for Tracked {
        fn release(self, released: &mut Vec<u32>) {
            released.push(self.0);
        }
    }

    #[test]
    fn null_handle_never_resolves() {
        let mut pool = ObjectPool::new("test", 4);
        pool.add(Tracked(1));
        assert!(!pool.is_valid(Handle::NULL));
        assert!(pool.lookup(Handle::default()).is_none());
    }

    #[test]
    fn remove_runs_release_hook_exactly_once() {
        let mut pool = ObjectPool::new("test", 0);
        let mut released = Vec::new();
        let handle = pool.add(Tracked(7));

        assert!(pool.remove(handle, &mut released));
        assert!(!pool.remove(handle, &mut released));
        assert_eq!(released, vec![7]);
        assert!(pool.is_empty());
    }

    #[test]
    fn lazy_pool_reuses_freed_slot_with_new_generation() {
        // ARRANGE
        let mut pool = ObjectPool::new("test", 0);
        let mut released = Vec::new();
        let first = pool.add(Tracked(1));
        let second = pool.add(Tracked(2));
        let third = pool.add(Tracked(3));

        // ACT
        pool.remove(second, &mut released);
        let fourth = pool.add(Tracked(4));

        // ASSERT
        assert_eq!(fourth.index(), second.index());
        assert_eq!(fourth.generation(), second.generation() + 1);
        assert!(!pool.is_valid(second));
        assert!(pool.lookup(second).is_none());
        assert_eq!(pool.lookup(fourth), Some(&Tracked(4)));
        assert!(pool.is_valid(first) && pool.is_valid(third));
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn add_reuses_the_lowest_free_slot() {
        let mut pool = ObjectPool::new("test", 0);
        let mut released = Vec::new();
        let _a = pool.add(Tracked(1));
        let b = pool.add(Tracked(2));
        let c = pool.add(Tracked(3));

        pool.remove(b, &mut released);
        pool.remove(c, &mut released);
        let d = pool.add(Tracked(4));
        let e = pool.add(Tracked(5));

        assert_eq!(d.index(), b.index());
        assert_eq!(e.index(), c.index());
    }

    #[test]
    fn slot_with_exhausted_generation_is_retired() {
        let mut pool = ObjectPool::new("test", 0);
        let mut released = Vec::new();
        let handle = pool.add(Tracked(1));
        pool.slots[handle.index() as usize].generation = u32::MAX;
        let last = Handle::new(handle.index(), u32::MAX);

        assert!(pool.remove(last, &mut released));
        let next = pool.add(Tracked(2));

        assert_ne!(next.index(), handle.index());
        assert!(!pool.is_valid(last));
        assert!(!pool.is_valid(handle));
        assert_eq!(pool.lookup(next), Some(&Tracked(2)));
    }

    #[test]
    fn stale_handles_never_alias_across_many_reuses() {
        let mut pool = ObjectPool::new("test", 1);
        let mut released = Vec::new();
        let mut stale = Vec::new();
        for i in 0..32 {
            let handle = pool.add(Tracked(i));
            for old in &stale {
                assert!(!pool.is_valid(*old));
            }
            assert_eq!(pool.lookup(handle), Some(&Tracked(i)));
            pool.remove(handle, &mut released);
            stale.push(handle);
        }
        assert_eq!(released.len(), 32);
    }

    #[test]
    fn take_hands_payload_out_without_release() {
        let mut pool = ObjectPool::new("test", 0);
        let handle = pool.add(Tracked(9));
        assert_eq!(pool.take(handle), Some(Tracked(9)));
        assert!(pool.take(handle).is_none());
    }

    #[test]
    fn destroy_force_releases_remaining_objects() {
        let mut pool = ObjectPool::new("test", 0);
        let mut released = Vec::new();
        let a = pool.add(Tracked(1));
        pool.add(Tracked(2));
        pool.add(Tracked(3));
        pool.remove(a, &mut released);

        pool.destroy(&mut released);

        released.sort();
        assert_eq!(released, vec![1, 2, 3]);
        assert!(pool.is_empty());
        assert_eq!(pool.iter().count(), 0);
    }

    #[test]
    fn iter_yields_live_handles() {
        let mut pool = ObjectPool::new("test", 0);
        let mut released = Vec::new();
        let a = pool.add(Tracked(1));
        let b = pool.add(Tracked(2));
        pool.remove(a, &mut released);

        let live: Vec<_> = pool.iter().map(|(h, _)| h).collect();
        assert_eq!(live, vec![b]);
        pool.destroy(&mut released);
    }
}
