// Copyright 2025 coScene
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

// Pool of reusable, reference-counted slots.
//
// A slot is free when the pool's own `SlotHandle` is the only live handle
// to it. Callers receive a clone of that handle from `SlotPool::next`; the
// slot becomes reusable as soon as every clone has been dropped. There is no
// explicit release call and no free list.
//
// The pool grows lazily in steps of `capacity_increase` up to
// `max_capacity`. Once every slot is in use and the cap is reached,
// `SlotPool::next` returns `None` instead of waiting.

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Default growth step.
pub const DEFAULT_CAPACITY_INCREASE: usize = 4;

/// Default hard ceiling on the number of slots.
pub const DEFAULT_MAX_CAPACITY: usize = DEFAULT_CAPACITY_INCREASE * 5;

type FactoryFn<T> = Box<dyn Fn() -> T + Send + Sync>;

struct SlotCell<T> {
    index: usize,
    value: RwLock<T>,
}

/// Shared handle to a pooled slot.
///
/// Cloning the handle extends the time the slot stays in use. The holder has
/// logical ownership of the contents; the pool never reads or writes them
/// after handing the handle out.
pub struct SlotHandle<T> {
    cell: Arc<SlotCell<T>>,
}

impl<T> Clone for SlotHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T> std::fmt::Debug for SlotHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotHandle")
            .field("index", &self.index())
            .field("use_count", &self.use_count())
            .finish()
    }
}

impl<T> SlotHandle<T> {
    fn new(index: usize, value: T) -> Self {
        Self {
            cell: Arc::new(SlotCell {
                index,
                value: RwLock::new(value),
            }),
        }
    }

    /// Position of the slot inside its pool.
    pub fn index(&self) -> usize {
        self.cell.index
    }

    /// Number of live handles to this slot, including the pool's own.
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.cell)
    }

    /// True when this is the only live handle to the slot.
    pub fn is_uniquely_held(&self) -> bool {
        if Arc::strong_count(&self.cell) != 1 {
            return false;
        }
        // Pairs with the release decrement of the last dropped handle, so
        // writes made through it happen-before the next holder's access.
        fence(Ordering::Acquire);
        true
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.cell.value.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.cell.value.write()
    }
}

struct PoolState<T> {
    slots: Vec<SlotHandle<T>>,
    cursor: usize,
}

impl<T> PoolState<T> {
    /// Round-robin scan over every slot, starting after the cursor.
    fn scan(&mut self) -> Option<SlotHandle<T>> {
        let len = self.slots.len();
        for _ in 0..len {
            self.cursor = (self.cursor + 1) % len;
            let slot = &self.slots[self.cursor];
            if slot.is_uniquely_held() {
                return Some(slot.clone());
            }
        }
        None
    }
}

/// Generic pool of reusable slots with lazy growth up to a hard cap.
pub struct SlotPool<T> {
    state: Mutex<PoolState<T>>,
    factory: FactoryFn<T>,
    capacity_increase: usize,
    max_capacity: usize,
}

impl<T> SlotPool<T> {
    /// Create a pool, pre-allocating `initial_capacity` slots (clamped to
    /// `max_capacity`).
    ///
    /// # Panics
    /// Panics if `capacity_increase` or `max_capacity` is 0.
    pub fn new<F>(
        factory: F,
        initial_capacity: usize,
        capacity_increase: usize,
        max_capacity: usize,
    ) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        assert!(capacity_increase > 0, "capacity_increase must be greater than 0");
        assert!(max_capacity > 0, "max_capacity must be greater than 0");

        let initial = initial_capacity.min(max_capacity);
        let slots = (0..initial).map(|i| SlotHandle::new(i, factory())).collect();

        Self {
            state: Mutex::new(PoolState { slots, cursor: 0 }),
            factory: Box::new(factory),
            capacity_increase,
            max_capacity,
        }
    }

    /// Hand out a currently unused slot.
    ///
    /// Returns `None` when the pool is at `max_capacity` and every slot is
    /// held elsewhere. Callers treat that as backpressure.
    pub fn next(&self) -> Option<SlotHandle<T>> {
        self.next_with(|| (self.factory)())
    }

    /// Same as [`next`](Self::next), but slots added by growth come from `make`.
    pub(crate) fn next_with(&self, mut make: impl FnMut() -> T) -> Option<SlotHandle<T>> {
        let mut state = self.state.lock();
        if state.slots.is_empty() {
            self.grow(&mut state, &mut make);
        }
        loop {
            if let Some(slot) = state.scan() {
                return Some(slot);
            }
            if !self.grow(&mut state, &mut make) {
                return None;
            }
        }
    }

    fn grow(&self, state: &mut PoolState<T>, make: &mut impl FnMut() -> T) -> bool {
        let old_size = state.slots.len();
        if old_size >= self.max_capacity {
            return false;
        }
        let new_size = (old_size + self.capacity_increase).min(self.max_capacity);
        state
            .slots
            .extend((old_size..new_size).map(|i| SlotHandle::new(i, make())));

        debug!(
            old_size,
            new_size,
            max_capacity = self.max_capacity,
            "Slot pool grown"
        );
        true
    }

    /// Current number of slots.
    pub fn size(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Number of slots not held outside the pool right now.
    pub fn available(&self) -> usize {
        self.state
            .lock()
            .slots
            .iter()
            .filter(|slot| slot.is_uniquely_held())
            .count()
    }

    pub fn max_capacity(&self) -> usize {
        self.max_capacity
    }
}
