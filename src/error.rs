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

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the recorder library.
///
/// Frame drops are not errors: they are reported through the boolean result
/// of the frame ingestion calls and a drop record in the JSONL output.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("failed to open output file {path}: {source}")]
    OpenOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to open video file {path}: {source}")]
    OpenVideo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame encoding failed: {0}")]
    Encode(String),

    #[error("failed to spawn worker '{name}': {source}")]
    WorkerSpawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker '{0}' terminated abnormally")]
    WorkerFailed(String),
}

pub type Result<T> = std::result::Result<T, RecorderError>;
