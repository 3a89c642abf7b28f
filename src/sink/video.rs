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

// Video writer traits and per-camera stream state

use super::avi::MjpegAviWriter;
use crate::error::{RecorderError, Result};
use crate::types::{Image, ImageShape};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Encoder + container for one camera's frames.
///
/// Implementations are driven from a single worker thread, one frame at a
/// time.
pub trait VideoWriter: Send {
    /// Append one frame.
    fn write(&mut self, frame: &Image) -> Result<()>;

    /// Finalize the container. Called once, after the last frame.
    fn finish(&mut self) -> Result<()>;

    fn frames_written(&self) -> u64;
}

/// Creates video writers for cameras as they are first seen.
pub trait VideoWriterFactory: Send + Sync {
    /// Open the writer for `camera_ind`. `model_frame` is the shape of the
    /// first frame the stream will receive.
    fn open(
        &self,
        camera_ind: usize,
        fps: f32,
        model_frame: ImageShape,
    ) -> Result<Box<dyn VideoWriter>>;

    /// Check that output can be created at all. Called once when the recorder
    /// is constructed.
    fn probe(&self) -> Result<()> {
        Ok(())
    }
}

/// Derive a camera's file name from the output prefix.
///
/// Camera 0 records to `{prefix}.avi`, camera `i > 0` to `{prefix}{i+1}.avi`.
/// A prefix that already ends in `.avi` is treated as the camera 0 file name.
pub fn video_output_path(prefix: &str, camera_ind: usize) -> PathBuf {
    let stem = prefix.strip_suffix(".avi").unwrap_or(prefix);
    if camera_ind == 0 {
        PathBuf::from(format!("{}.avi", stem))
    } else {
        PathBuf::from(format!("{}{}.avi", stem, camera_ind + 1))
    }
}

/// Factory for motion-JPEG AVI files named by [`video_output_path`].
pub struct MjpegAviFactory {
    prefix: String,
    jpeg_quality: u8,
}

impl MjpegAviFactory {
    pub fn new(prefix: impl Into<String>, jpeg_quality: u8) -> Self {
        Self {
            prefix: prefix.into(),
            jpeg_quality,
        }
    }
}

impl VideoWriterFactory for MjpegAviFactory {
    fn open(
        &self,
        camera_ind: usize,
        fps: f32,
        model_frame: ImageShape,
    ) -> Result<Box<dyn VideoWriter>> {
        let path = video_output_path(&self.prefix, camera_ind);
        let writer = MjpegAviWriter::create(&path, fps, model_frame, self.jpeg_quality)?;
        info!(
            camera = camera_ind,
            width = model_frame.width,
            height = model_frame.height,
            fps,
            "Recording video stream to {}",
            path.display()
        );
        Ok(Box::new(writer))
    }

    fn probe(&self) -> Result<()> {
        // Video writers open lazily, so test the camera 0 file up front.
        let path = video_output_path(&self.prefix, 0);
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map(|_| ())
            .map_err(|source| RecorderError::OpenVideo { path, source })
    }
}

/// State owned by one camera's video worker.
///
/// The writer is opened on the first frame so its dimensions come from the
/// actual data. If opening fails the stream discards its frames.
pub(crate) struct VideoStream {
    camera_ind: usize,
    fps: f32,
    factory: Arc<dyn VideoWriterFactory>,
    writer: Option<Box<dyn VideoWriter>>,
    failed: bool,
}

impl VideoStream {
    pub(crate) fn new(camera_ind: usize, fps: f32, factory: Arc<dyn VideoWriterFactory>) -> Self {
        Self {
            camera_ind,
            fps,
            factory,
            writer: None,
            failed: false,
        }
    }

    pub(crate) fn write(&mut self, frame: &Image) {
        if self.failed {
            return;
        }
        if self.writer.is_none() {
            match self.factory.open(self.camera_ind, self.fps, frame.shape()) {
                Ok(writer) => self.writer = Some(writer),
                Err(e) => {
                    error!(
                        camera = self.camera_ind,
                        "Failed to open video writer, discarding this camera's frames: {}", e
                    );
                    self.failed = true;
                    return;
                }
            }
        }
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(e) = writer.write(frame) {
            error!(
                camera = self.camera_ind,
                frames = writer.frames_written(),
                "Failed to write video frame, closing this camera's stream: {}",
                e
            );
            self.failed = true;
            if let Err(e) = self.finish() {
                warn!(camera = self.camera_ind, "Failed to finalize video stream: {}", e);
            }
        }
    }

    pub(crate) fn finish(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.finish()?;
            info!(
                camera = self.camera_ind,
                frames = writer.frames_written(),
                "Video stream finished"
            );
        }
        Ok(())
    }
}

impl Drop for VideoStream {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            error!(camera = self.camera_ind, "Failed to finalize video stream: {}", e);
        }
    }
}
