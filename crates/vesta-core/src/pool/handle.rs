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

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// A weak, copyable reference to an object stored in an [`super::ObjectPool`].
///
/// A `Handle` is composed of an `index` into the pool's slots and a `generation`
/// counter. The generation ensures that a handle to a removed object can never
/// resolve to a new object that later reuses the same slot.
///
/// The default handle has index 0, which the pool never hands out, so it never
/// resolves.
pub struct Handle<T> {
    pub(crate) index: u32,
    pub(crate) generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    /// The handle that never resolves.
    pub const NULL: Self = Self::new(0, 0);

    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }

    /// The slot index of the handle.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// The generation of the slot this handle was issued for.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Whether this is the null handle.
    pub fn is_null(&self) -> bool {
        self.index == 0
    }
}

// Manual impls: deriving would put bounds on `T`.

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::NULL
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}v{})", self.index, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_handle_is_null() {
        let handle: Handle<u8> = Handle::default();
        assert!(handle.is_null());
        assert_eq!(handle, Handle::NULL);
    }

    #[test]
    fn equality_uses_index_and_generation() {
        let a: Handle<u8> = Handle::new(3, 1);
        let b: Handle<u8> = Handle::new(3, 2);
        assert_ne!(a, b);
        assert_eq!(a, Handle::new(3, 1));
        assert_eq!(format!("{a:?}"), "Handle(3v1)");
    }
}
