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

// Newline-delimited JSON output for recorder events
//
// Every record is serialized into a reused line buffer and written as one
// complete line, so a reader never observes a partial record even if the
// process stops between writes.
//
// Record layout:
//
// {"time":0.1,"sensor":{"type":"gyroscope","values":[0.2,0.3,0.4]}}
// {"time":0.2,"gps":{"latitude":60.1,"longitude":24.9,"accuracy":3.0,"altitude":12.0}}
// {"time":0.3,"number":0,"frames":[{"time":0.3,"cameraInd":0,"number":0,"cameraParameters":{...}}]}
// {"time":0.4,"droppedFrame":true}
//
// `JsonlWriter` is not synchronized. It lives inside the JSONL task queue
// worker, which also makes it the single owner of the frame counters.

use crate::error::{RecorderError, Result};
use crate::types::{AccelerometerData, FrameMeta, GpsData, GyroscopeData, Pose, Quaternion, Vector3d};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Serialize)]
struct SensorRecord<'a> {
    time: f64,
    sensor: SensorValues<'a>,
}

#[derive(Serialize)]
struct SensorValues<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    values: [f64; 3],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Serialize)]
struct GpsRecord {
    time: f64,
    gps: GpsValues,
}

#[derive(Serialize)]
struct GpsValues {
    latitude: f64,
    longitude: f64,
    accuracy: f64,
    altitude: f64,
}

#[derive(Serialize)]
struct PoseRecord {
    time: f64,
    #[serde(flatten)]
    body: PoseBody,
}

#[derive(Serialize)]
enum PoseBody {
    #[serde(rename = "ARKit")]
    ArKit(PoseValues),
    #[serde(rename = "groundTruth")]
    GroundTruth(PoseValues),
    #[serde(rename = "output")]
    Output(PoseValues),
}

#[derive(Serialize)]
struct PoseValues {
    position: Vector3d,
    #[serde(skip_serializing_if = "Option::is_none")]
    orientation: Option<Quaternion>,
    #[serde(skip_serializing_if = "Option::is_none")]
    velocity: Option<Vector3d>,
}

impl PoseValues {
    fn new(pose: &Pose, velocity: Option<Vector3d>) -> Self {
        Self {
            position: pose.position,
            orientation: pose.orientation,
            velocity,
        }
    }
}

#[derive(Serialize)]
struct FrameGroupRecord<'a> {
    time: f64,
    number: u64,
    frames: &'a [FrameRecord],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FrameRecord {
    time: f64,
    camera_ind: usize,
    number: u64,
    #[serde(skip_serializing_if = "CameraParameters::is_empty")]
    camera_parameters: CameraParameters,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct CameraParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    focal_length_x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    focal_length_y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    principal_point_x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    principal_point_y: Option<f64>,
}

impl CameraParameters {
    fn from_meta(meta: &FrameMeta) -> Self {
        let positive = |v: f64| (v > 0.0).then_some(v);
        let has_principal_point = meta.px > 0.0 && meta.py > 0.0;
        Self {
            focal_length_x: positive(meta.focal_length_x),
            focal_length_y: positive(meta.focal_length_y),
            principal_point_x: has_principal_point.then_some(meta.px),
            principal_point_y: has_principal_point.then_some(meta.py),
        }
    }

    fn is_empty(&self) -> bool {
        self.focal_length_x.is_none()
            && self.focal_length_y.is_none()
            && self.principal_point_x.is_none()
            && self.principal_point_y.is_none()
    }
}

impl FrameRecord {
    fn new(meta: &FrameMeta, number: u64) -> Self {
        Self {
            time: meta.t,
            camera_ind: meta.camera_ind,
            number,
            camera_parameters: CameraParameters::from_meta(meta),
        }
    }
}

#[derive(Serialize)]
struct DroppedFrameRecord {
    time: f64,
    #[serde(rename = "droppedFrame")]
    dropped_frame: bool,
}

/// Serialized-line output with a reused buffer.
struct LineSink {
    output: Box<dyn Write + Send>,
    line: Vec<u8>,
    lines_written: u64,
}

impl LineSink {
    fn write_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        self.line.clear();
        serde_json::to_writer(&mut self.line, record)?;
        self.line.push(b'\n');
        self.output.write_all(&self.line)?;
        self.lines_written += 1;
        Ok(())
    }

    fn write_raw(&mut self, text: &str, append_newline: bool) -> Result<()> {
        self.line.clear();
        self.line.extend_from_slice(text.as_bytes());
        if append_newline {
            self.line.push(b'\n');
        }
        self.output.write_all(&self.line)?;
        self.lines_written += 1;
        Ok(())
    }
}

/// Per-recording scratch state, reset field by field on every record.
#[derive(Default)]
struct Workspace {
    frames: Vec<FrameRecord>,
    frame_numbers: HashMap<usize, u64>,
    frame_group_number: u64,
}

impl Workspace {
    /// First sight of a camera yields 0, every later group increments.
    fn next_camera_number(&mut self, camera_ind: usize) -> u64 {
        match self.frame_numbers.entry(camera_ind) {
            Entry::Occupied(mut entry) => {
                *entry.get_mut() += 1;
                *entry.get()
            }
            Entry::Vacant(entry) => *entry.insert(0),
        }
    }
}

/// JSONL formatter and writer.
pub struct JsonlWriter {
    sink: LineSink,
    workspace: Workspace,
}

impl JsonlWriter {
    /// Create (truncate) `path` and write records to it.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| RecorderError::OpenOutput {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Opened JSONL output {}", path.display());
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    pub fn from_writer<W: Write + Send + 'static>(output: W) -> Self {
        Self {
            sink: LineSink {
                output: Box::new(output),
                line: Vec::with_capacity(512),
                lines_written: 0,
            },
            workspace: Workspace::default(),
        }
    }

    pub fn write_gyroscope(&mut self, d: &GyroscopeData) -> Result<()> {
        self.write_sensor("gyroscope", d.t, [d.x, d.y, d.z], d.temperature)
    }

    pub fn write_accelerometer(&mut self, d: &AccelerometerData) -> Result<()> {
        self.write_sensor("accelerometer", d.t, [d.x, d.y, d.z], d.temperature)
    }

    fn write_sensor(
        &mut self,
        kind: &str,
        time: f64,
        values: [f64; 3],
        temperature: Option<f64>,
    ) -> Result<()> {
        self.sink.write_record(&SensorRecord {
            time,
            sensor: SensorValues {
                kind,
                values,
                temperature,
            },
        })
    }

    pub fn write_gps(&mut self, d: &GpsData) -> Result<()> {
        self.sink.write_record(&GpsRecord {
            time: d.t,
            gps: GpsValues {
                latitude: d.latitude,
                longitude: d.longitude,
                // No agreed definition beyond "horizontal uncertainty"
                accuracy: d.horizontal_uncertainty,
                altitude: d.altitude,
            },
        })
    }

    pub fn write_ar_kit(&mut self, pose: &Pose) -> Result<()> {
        self.sink.write_record(&PoseRecord {
            time: pose.time,
            body: PoseBody::ArKit(PoseValues::new(pose, None)),
        })
    }

    pub fn write_ground_truth(&mut self, pose: &Pose) -> Result<()> {
        self.sink.write_record(&PoseRecord {
            time: pose.time,
            body: PoseBody::GroundTruth(PoseValues::new(pose, None)),
        })
    }

    pub fn write_odometry_output(&mut self, pose: &Pose, velocity: Option<Vector3d>) -> Result<()> {
        self.sink.write_record(&PoseRecord {
            time: pose.time,
            body: PoseBody::Output(PoseValues::new(pose, velocity)),
        })
    }

    /// Single frame, recorded as a one-frame group numbered by the group counter.
    pub(crate) fn write_frame(&mut self, frame: &FrameMeta) -> Result<()> {
        let number = self.workspace.frame_group_number;
        self.workspace.frames.clear();
        self.workspace.frames.push(FrameRecord::new(frame, number));
        self.emit_frame_group(frame.t)
    }

    /// Frame group with independent per-camera numbering.
    pub(crate) fn write_frame_group(&mut self, time: f64, frames: &[FrameMeta]) -> Result<()> {
        self.workspace.frames.clear();
        for frame in frames {
            let number = self.workspace.next_camera_number(frame.camera_ind);
            self.workspace.frames.push(FrameRecord::new(frame, number));
        }
        self.emit_frame_group(time)
    }

    fn emit_frame_group(&mut self, time: f64) -> Result<()> {
        let record = FrameGroupRecord {
            time,
            number: self.workspace.frame_group_number,
            frames: &self.workspace.frames,
        };
        self.workspace.frame_group_number += 1;
        self.sink.write_record(&record)
    }

    pub fn write_dropped_frame(&mut self, time: f64) -> Result<()> {
        self.sink.write_record(&DroppedFrameRecord {
            time,
            dropped_frame: true,
        })
    }

    /// Write caller-serialized JSON as exactly one line.
    ///
    /// Returns `Ok(false)` when `line` is not valid JSON and was skipped.
    pub fn write_json_string(&mut self, line: &str) -> Result<bool> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Skipping invalid JSON: {}", line);
                return Ok(false);
            }
        };

        match line.find('\n') {
            None => self.sink.write_raw(line, true)?,
            // Multi-line input is re-serialized compactly
            Some(n) if n + 1 < line.len() => self.sink.write_record(&value)?,
            Some(_) => self.sink.write_raw(line, false)?,
        }
        Ok(true)
    }

    pub fn write_json(&mut self, value: &Value) -> Result<()> {
        self.sink.write_record(value)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.sink.output.flush()?;
        Ok(())
    }

    pub fn lines_written(&self) -> u64 {
        self.sink.lines_written
    }

    /// Number of frame groups recorded so far (dropped frames excluded).
    pub fn frame_groups_written(&self) -> u64 {
        self.workspace.frame_group_number
    }
}

impl Drop for JsonlWriter {
    fn drop(&mut self) {
        if let Err(e) = self.sink.output.flush() {
            warn!("Failed to flush JSONL output on drop: {}", e);
        }
    }
}

/// Cloneable in-memory output target.
///
/// Useful for embedding the recorder where the JSONL stream is consumed in
/// process, and for tests.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.inner.lock()).into_owned()
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents().lines().map(str::to_owned).collect()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
