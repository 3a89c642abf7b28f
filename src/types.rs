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

use crate::pool::ImageSlot;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3d {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Orientation quaternion. Serialized in `w, x, y, z` order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self {
            w: 1.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }
}

/// Pose from an external tracker, ground truth source or odometry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    /// Timestamp in seconds. Monotonically increasing
    pub time: f64,
    /// 3D position in a right-handed metric coordinate system, z-axis up
    pub position: Vector3d,
    /// Orientation in the same coordinate system as `position`
    pub orientation: Option<Quaternion>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GyroscopeData {
    pub t: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AccelerometerData {
    pub t: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GpsData {
    pub t: f64,
    pub latitude: f64,
    pub longitude: f64,
    /// Horizontal uncertainty in meters, recorded as "accuracy"
    pub horizontal_uncertainty: f64,
    pub altitude: f64,
}

/// Pixel layout of an [`Image`]. All formats are 8 bits per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
        }
    }
}

/// Dimensions and pixel type of an image buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageShape {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl ImageShape {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.channels()
    }
}

/// Tightly packed, row-major pixel buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    shape: ImageShape,
    data: Vec<u8>,
}

impl Image {
    /// Zero-filled image of the given shape.
    pub fn new(shape: ImageShape) -> Self {
        Self {
            shape,
            data: vec![0u8; shape.byte_len()],
        }
    }

    /// Wrap existing pixel data. Returns `None` if the length does not match the shape.
    pub fn from_vec(shape: ImageShape, data: Vec<u8>) -> Option<Self> {
        (data.len() == shape.byte_len()).then_some(Self { shape, data })
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn width(&self) -> u32 {
        self.shape.width
    }

    pub fn height(&self) -> u32 {
        self.shape.height
    }

    pub fn format(&self) -> PixelFormat {
        self.shape.format
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Reallocate to `shape` if it differs from the current one.
    ///
    /// Returns `true` when the storage was replaced.
    pub fn reshape(&mut self, shape: ImageShape) -> bool {
        if self.shape == shape {
            return false;
        }
        self.shape = shape;
        self.data = vec![0u8; shape.byte_len()];
        true
    }

    /// Deep copy `other` into this buffer, reshaping first if needed.
    pub fn copy_from(&mut self, other: &Image) {
        self.reshape(other.shape);
        self.data.copy_from_slice(&other.data);
    }
}

/// One camera frame. Pixel data is optional; without it only the metadata is
/// recorded.
#[derive(Debug, Clone, Default)]
pub struct FrameData {
    /// Timestamp in seconds. Monotonically increasing
    pub t: f64,
    /// Index to separate multiple cameras. 0, 1, …
    pub camera_ind: usize,
    pub focal_length_x: f64,
    pub focal_length_y: f64,
    /// Principal point
    pub px: f64,
    pub py: f64,
    pub image: Option<Arc<Image>>,
    /// Pixels already held in a recorder buffer (see
    /// `Recorder::get_empty_frames`). Used instead of `image` when set, without
    /// taking another buffer. Do not write to the slot after adding the frame.
    pub pooled: Option<ImageSlot>,
}

impl FrameData {
    pub fn new(t: f64, camera_ind: usize) -> Self {
        Self {
            t,
            camera_ind,
            ..Default::default()
        }
    }

    pub fn with_intrinsics(mut self, focal_length_x: f64, focal_length_y: f64, px: f64, py: f64) -> Self {
        self.focal_length_x = focal_length_x;
        self.focal_length_y = focal_length_y;
        self.px = px;
        self.py = py;
        self
    }

    pub fn with_image(mut self, image: Arc<Image>) -> Self {
        self.image = Some(image);
        self
    }

    /// Attach pixels written into a buffer from `Recorder::get_empty_frames`.
    pub fn with_pooled_image(mut self, slot: ImageSlot) -> Self {
        self.pooled = Some(slot);
        self
    }

    /// Shape of the pixels that would go to the video writer, if any.
    pub(crate) fn pixel_shape(&self) -> Option<ImageShape> {
        match (&self.pooled, &self.image) {
            (Some(slot), _) => Some(slot.read().shape()),
            (None, Some(image)) => Some(image.shape()),
            (None, None) => None,
        }
    }

    pub(crate) fn meta(&self) -> FrameMeta {
        FrameMeta {
            t: self.t,
            camera_ind: self.camera_ind,
            focal_length_x: self.focal_length_x,
            focal_length_y: self.focal_length_y,
            px: self.px,
            py: self.py,
        }
    }
}

/// Pixel-free part of a frame, moved onto the JSONL worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct FrameMeta {
    pub t: f64,
    pub camera_ind: usize,
    pub focal_length_x: f64,
    pub focal_length_y: f64,
    pub px: f64,
    pub py: f64,
}
