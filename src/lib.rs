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

// JSONL Sensor Recorder
//
// Asynchronous recorder for sensor and camera data that:
// - Accepts IMU, GPS, pose, frame and free-form JSON events from any thread
// - Formats and writes every event as one JSON line on a background worker
// - Encodes camera frames to one MJPEG AVI file per camera
// - Bounds frames in flight with a reusable buffer pool and records drops
//   instead of blocking the producer

pub mod config;
pub mod error;
pub mod pool;
pub mod queue;
pub mod recorder;
pub mod sink;
pub mod types;

// Re-export main types
pub use config::{load_config, load_config_with_env, RecorderConfig};
pub use error::{RecorderError, Result};
pub use pool::{ImageSlot, ImageSlotPool, SlotHandle, SlotPool};
pub use queue::TaskQueue;
pub use recorder::{Recorder, RecorderBuilder, RecorderStats};
pub use sink::{
    video_output_path, JsonlWriter, MjpegAviFactory, MjpegAviWriter, SharedBuffer, VideoWriter,
    VideoWriterFactory,
};
pub use types::{
    AccelerometerData, FrameData, GpsData, GyroscopeData, Image, ImageShape, PixelFormat, Pose,
    Quaternion, Vector3d,
};
