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

// Reusable buffer pools
//
// Slots are handed out as shared handles and become free again when every
// handle outside the pool has been dropped.

pub mod image;
pub mod slot;

pub use image::{ImageSlot, ImageSlotPool};
pub use slot::{SlotHandle, SlotPool, DEFAULT_CAPACITY_INCREASE, DEFAULT_MAX_CAPACITY};
