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

// Slot pool for pixel buffers whose shape is chosen per request.

use super::slot::{SlotHandle, SlotPool};
use crate::types::{Image, ImageShape, PixelFormat};
use tracing::debug;

/// Handle to a pooled image buffer.
pub type ImageSlot = SlotHandle<Image>;

/// Image buffer pool used for frames in flight to the video writers.
///
/// Growth allocates buffers of the shape requested by the call that triggered
/// it. A free slot of a different shape is still handed out; its storage is
/// reallocated to the requested shape while the caller holds it exclusively.
/// Workloads mixing resolutions should size `max_capacity` with that churn in
/// mind.
pub struct ImageSlotPool {
    pool: SlotPool<Image>,
}

impl ImageSlotPool {
    /// # Panics
    /// Panics if `capacity_increase` or `max_capacity` is 0.
    pub fn new(capacity_increase: usize, max_capacity: usize) -> Self {
        Self::with_initial_shape(None, 0, capacity_increase, max_capacity)
    }

    /// Pool with `initial_capacity` buffers pre-allocated at `shape`.
    pub fn with_initial_shape(
        shape: Option<ImageShape>,
        initial_capacity: usize,
        capacity_increase: usize,
        max_capacity: usize,
    ) -> Self {
        let shape = shape.unwrap_or(ImageShape::new(0, 0, PixelFormat::Gray8));
        let initial_capacity = if shape.byte_len() == 0 {
            0
        } else {
            initial_capacity
        };
        Self {
            pool: SlotPool::new(
                move || Image::new(shape),
                initial_capacity,
                capacity_increase,
                max_capacity,
            ),
        }
    }

    /// Return an unused buffer of `shape`, or `None` if the pool is saturated.
    pub fn next(&self, shape: ImageShape) -> Option<ImageSlot> {
        let slot = self.pool.next_with(|| Image::new(shape))?;
        if slot.write().reshape(shape) {
            debug!(
                index = slot.index(),
                width = shape.width,
                height = shape.height,
                format = ?shape.format,
                "Reallocated pooled image buffer for new shape"
            );
        }
        Some(slot)
    }

    pub fn size(&self) -> usize {
        self.pool.size()
    }

    pub fn available(&self) -> usize {
        self.pool.available()
    }

    pub fn max_capacity(&self) -> usize {
        self.pool.max_capacity()
    }
}
