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

// Configuration types for jsonl-recorder

use crate::pool::{DEFAULT_CAPACITY_INCREASE, DEFAULT_MAX_CAPACITY};
use crate::recorder::{DEFAULT_FPS, DEFAULT_JPEG_QUALITY};
use crate::types::ImageShape;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RecorderConfig {
    pub recorder: RecorderSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Recorder-specific settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecorderSettings {
    /// JSONL output file
    pub output_path: String,

    #[serde(default)]
    pub video: VideoConfig,

    #[serde(default)]
    pub frame_pool: FramePoolConfig,

    /// Log a warning when a queue backlog exceeds this many jobs
    #[serde(default)]
    pub queue_warn_depth: Option<usize>,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            output_path: "recording.jsonl".to_string(),
            video: VideoConfig::default(),
            frame_pool: FramePoolConfig::default(),
            queue_warn_depth: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VideoConfig {
    /// Video is recorded only when a prefix is set
    #[serde(default)]
    pub output_prefix: Option<String>,

    #[serde(default = "default_fps")]
    pub fps: f32,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8, // 1-100
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            output_prefix: None,
            fps: default_fps(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

/// Bounds on frame buffers in flight to the video workers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FramePoolConfig {
    /// Buffers allocated up front; needs `initial_shape`
    #[serde(default)]
    pub initial_capacity: usize,

    #[serde(default)]
    pub initial_shape: Option<ImageShape>,

    #[serde(default = "default_capacity_increase")]
    pub capacity_increase: usize,

    #[serde(default = "default_max_capacity")]
    pub max_capacity: usize,
}

impl Default for FramePoolConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 0,
            initial_shape: None,
            capacity_increase: default_capacity_increase(),
            max_capacity: default_max_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_fps() -> f32 { DEFAULT_FPS }
fn default_jpeg_quality() -> u8 { DEFAULT_JPEG_QUALITY }
fn default_capacity_increase() -> usize { DEFAULT_CAPACITY_INCREASE }
fn default_max_capacity() -> usize { DEFAULT_MAX_CAPACITY }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
