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

// Recording pipeline
//
// Producers call the `add_*` methods from any thread. Each call formats
// nothing itself: it moves the event into a job on the JSONL queue and, for
// frames with pixel data, into a job on that camera's video queue. Frame
// buffers in flight are bounded by the image slot pool; when it is saturated
// the frame is recorded as dropped instead.
//
// Admission, video dispatch and the JSONL submit of one call happen under a
// single lock, so the n-th frame in a camera's video is the frame numbered n
// in the log even with several producers.

use crate::config::RecorderSettings;
use crate::error::Result;
use crate::pool::{ImageSlot, ImageSlotPool, DEFAULT_CAPACITY_INCREASE, DEFAULT_MAX_CAPACITY};
use crate::queue::TaskQueue;
use crate::sink::jsonl::JsonlWriter;
use crate::sink::video::{MjpegAviFactory, VideoStream, VideoWriterFactory};
use crate::types::{
    AccelerometerData, FrameData, FrameMeta, GpsData, GyroscopeData, Image, ImageShape, Pose,
    Vector3d,
};
use dashmap::mapref::one::RefMut;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

pub const DEFAULT_FPS: f32 = 30.0;
pub const DEFAULT_JPEG_QUALITY: u8 = 90;

const DROP_WINDOW: Duration = Duration::from_secs(5);
const DROP_RATE_WARN_PCT: f64 = 5.0;

/// Counters reported by [`Recorder::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    /// Frame and frame-group calls that were accepted.
    pub frames_recorded: u64,
    /// Frame and frame-group calls rejected because the pool was saturated or
    /// a camera's frame size changed, plus failed `get_empty_frames` requests.
    pub frames_dropped: u64,
    /// Jobs waiting on the JSONL worker.
    pub pending_json_jobs: usize,
    /// Cameras with an open video worker.
    pub video_streams: usize,
}

enum Output {
    Path(PathBuf),
    Writer(Box<dyn Write + Send>),
}

/// Configures and creates a [`Recorder`].
pub struct RecorderBuilder {
    output: Output,
    video_prefix: Option<String>,
    video_factory: Option<Arc<dyn VideoWriterFactory>>,
    fps: f32,
    jpeg_quality: u8,
    initial_shape: Option<ImageShape>,
    initial_capacity: usize,
    capacity_increase: usize,
    max_capacity: usize,
    queue_warn_depth: Option<usize>,
}

impl RecorderBuilder {
    fn new(output: Output) -> Self {
        Self {
            output,
            video_prefix: None,
            video_factory: None,
            fps: DEFAULT_FPS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            initial_shape: None,
            initial_capacity: 0,
            capacity_increase: DEFAULT_CAPACITY_INCREASE,
            max_capacity: DEFAULT_MAX_CAPACITY,
            queue_warn_depth: None,
        }
    }

    /// Builder initialized from the `recorder` section of the config file.
    pub fn from_settings(settings: &RecorderSettings) -> Self {
        let mut builder = Self::new(Output::Path(PathBuf::from(&settings.output_path)))
            .fps(settings.video.fps)
            .jpeg_quality(settings.video.jpeg_quality)
            .frame_pool(
                settings.frame_pool.capacity_increase,
                settings.frame_pool.max_capacity,
            );
        if let Some(prefix) = &settings.video.output_prefix {
            builder = builder.video_prefix(prefix.clone());
        }
        if let Some(shape) = settings.frame_pool.initial_shape {
            builder = builder.preallocate_frames(shape, settings.frame_pool.initial_capacity);
        }
        if let Some(depth) = settings.queue_warn_depth {
            builder = builder.queue_warn_depth(depth);
        }
        builder
    }

    /// Record video to `{prefix}.avi`, `{prefix}2.avi`, ... as MJPEG AVI.
    pub fn video_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.video_prefix = Some(prefix.into());
        self
    }

    /// Record video through a custom writer factory. Takes precedence over
    /// [`video_prefix`](Self::video_prefix).
    pub fn video_factory(mut self, factory: Arc<dyn VideoWriterFactory>) -> Self {
        self.video_factory = Some(factory);
        self
    }

    pub fn fps(mut self, fps: f32) -> Self {
        if fps > 0.0 && fps.is_finite() {
            self.fps = fps;
        } else {
            warn!(fps, "Ignoring invalid video fps, keeping {}", self.fps);
        }
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    /// Growth step and ceiling of the in-flight frame pool.
    pub fn frame_pool(mut self, capacity_increase: usize, max_capacity: usize) -> Self {
        self.capacity_increase = capacity_increase;
        self.max_capacity = max_capacity;
        self
    }

    /// Pre-allocate `count` frame buffers of `shape`.
    pub fn preallocate_frames(mut self, shape: ImageShape, count: usize) -> Self {
        self.initial_shape = Some(shape);
        self.initial_capacity = count;
        self
    }

    /// Warn when a queue backlog exceeds `depth` jobs.
    pub fn queue_warn_depth(mut self, depth: usize) -> Self {
        self.queue_warn_depth = Some(depth);
        self
    }

    /// Open the outputs and start the JSONL worker.
    ///
    /// Fails if the JSONL output or the first video file cannot be created.
    ///
    /// # Panics
    /// Panics if a frame pool capacity is 0.
    pub fn build(self) -> Result<Recorder> {
        let writer = match self.output {
            Output::Path(path) => JsonlWriter::create(&path)?,
            Output::Writer(output) => JsonlWriter::from_writer(output),
        };

        let factory = match (self.video_factory, self.video_prefix) {
            (Some(factory), _) => Some(factory),
            (None, Some(prefix)) => Some(Arc::new(MjpegAviFactory::new(prefix, self.jpeg_quality))
                as Arc<dyn VideoWriterFactory>),
            (None, None) => None,
        };

        let video = match factory {
            Some(factory) => {
                factory.probe()?;
                Some(VideoPipeline {
                    streams: DashMap::new(),
                    factory,
                    fps: Mutex::new(self.fps),
                    warn_depth: self.queue_warn_depth,
                })
            }
            None => None,
        };

        let pool = ImageSlotPool::with_initial_shape(
            self.initial_shape,
            self.initial_capacity,
            self.capacity_increase,
            self.max_capacity,
        );

        let mut jsonl = TaskQueue::create_worker("jsonl", writer)?;
        if let Some(depth) = self.queue_warn_depth {
            jsonl = jsonl.with_warn_depth(depth);
        }

        info!(
            video = video.is_some(),
            fps = self.fps,
            max_frames_in_flight = self.max_capacity,
            "Recorder started"
        );

        Ok(Recorder {
            video,
            jsonl,
            pool,
            frame_sizes: Mutex::new(HashMap::new()),
            frames_recorded: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            drops: Mutex::new(DropWindow::new()),
        })
    }
}

/// Frame pixels travelling to a video worker.
enum PendingImage {
    /// Pixels held in a pool slot, copied by the recorder or written by the
    /// caller into a slot from `get_empty_frames`.
    Pooled(ImageSlot),
    /// The caller's image, kept alive until written. The slot only counts the
    /// frame against the in-flight limit.
    Aliased { image: Arc<Image>, _token: ImageSlot },
}

impl PendingImage {
    fn write_to(&self, stream: &mut VideoStream) {
        match self {
            PendingImage::Pooled(slot) => stream.write(&slot.read()),
            PendingImage::Aliased { image, .. } => stream.write(image),
        }
    }
}

/// A frame's pixels accepted for one camera's video.
struct Admitted {
    camera_ind: usize,
    shape: ImageShape,
    image: PendingImage,
}

struct VideoPipeline {
    streams: DashMap<usize, TaskQueue<VideoStream>>,
    factory: Arc<dyn VideoWriterFactory>,
    fps: Mutex<f32>,
    warn_depth: Option<usize>,
}

impl VideoPipeline {
    fn stream(&self, camera_ind: usize) -> Result<RefMut<'_, usize, TaskQueue<VideoStream>>> {
        self.streams.entry(camera_ind).or_try_insert_with(|| {
            let fps = *self.fps.lock();
            let stream = VideoStream::new(camera_ind, fps, Arc::clone(&self.factory));
            let queue = TaskQueue::create_worker(format!("video-{}", camera_ind), stream)?;
            info!(camera = camera_ind, fps, "Started video worker");
            Ok(match self.warn_depth {
                Some(depth) => queue.with_warn_depth(depth),
                None => queue,
            })
        })
    }

    fn dispatch(&self, camera_ind: usize, image: PendingImage) {
        match self.stream(camera_ind) {
            Ok(queue) => queue.enqueue(move |stream| image.write_to(stream)),
            Err(e) => error!(camera = camera_ind, "Failed to start video worker: {}", e),
        }
    }

    fn finish(self) -> Result<()> {
        let mut result = Ok(());
        for (camera, queue) in self.streams {
            let finished = queue.finish().and_then(|mut stream| stream.finish());
            if let Err(e) = finished {
                error!(camera, "Failed to finalize video stream: {}", e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

/// Accepted and dropped frames over the current window.
struct DropWindow {
    frames: u64,
    drops: u64,
    started: Instant,
}

impl DropWindow {
    fn new() -> Self {
        Self {
            frames: 0,
            drops: 0,
            started: Instant::now(),
        }
    }

    fn record(&mut self, dropped: bool) {
        if dropped {
            self.drops += 1;
        } else {
            self.frames += 1;
        }
        if self.started.elapsed() < DROP_WINDOW {
            return;
        }
        let total = self.frames + self.drops;
        let drop_rate = 100.0 * self.drops as f64 / total as f64;
        if drop_rate > DROP_RATE_WARN_PCT {
            warn!(
                frames = self.frames,
                drops = self.drops,
                drop_rate_pct = format!("{:.1}%", drop_rate),
                "Frame drop rate exceeds {}%, video writers are not keeping up",
                DROP_RATE_WARN_PCT
            );
        }
        *self = Self::new();
    }
}

/// Asynchronous recorder for sensor events and camera frames.
///
/// All ingestion methods take `&self` and return without waiting for I/O, so
/// a recorder can be shared between capture threads behind an `Arc`.
/// Dropping the recorder drains every queue and finalizes the outputs;
/// [`close`](Self::close) does the same and reports errors.
pub struct Recorder {
    // Field order is drop order: video streams finish before the JSONL log,
    // and both before the frame buffers are released.
    video: Option<VideoPipeline>,
    jsonl: TaskQueue<JsonlWriter>,
    pool: ImageSlotPool,
    /// Frame size of each camera's video. Also serializes frame ingestion.
    frame_sizes: Mutex<HashMap<usize, (u32, u32)>>,
    frames_recorded: AtomicU64,
    frames_dropped: AtomicU64,
    drops: Mutex<DropWindow>,
}

impl Recorder {
    pub fn builder(output_path: impl Into<PathBuf>) -> RecorderBuilder {
        RecorderBuilder::new(Output::Path(output_path.into()))
    }

    /// Builder writing JSONL to an arbitrary sink instead of a file.
    pub fn builder_with_writer<W: Write + Send + 'static>(output: W) -> RecorderBuilder {
        RecorderBuilder::new(Output::Writer(Box::new(output)))
    }

    /// Record JSONL only.
    pub fn create(output_path: impl Into<PathBuf>) -> Result<Self> {
        Self::builder(output_path).build()
    }

    /// Record JSONL and one MJPEG AVI file per camera.
    pub fn create_with_video(
        output_path: impl Into<PathBuf>,
        video_prefix: impl Into<String>,
    ) -> Result<Self> {
        Self::builder(output_path).video_prefix(video_prefix).build()
    }

    pub fn from_writer<W: Write + Send + 'static>(output: W) -> Result<Self> {
        Self::builder_with_writer(output).build()
    }

    pub fn add_gyroscope(&self, data: &GyroscopeData) {
        let data = *data;
        self.submit("gyroscope", move |w| w.write_gyroscope(&data));
    }

    pub fn add_gyroscope_values(&self, t: f64, x: f64, y: f64, z: f64) {
        self.add_gyroscope(&GyroscopeData {
            t,
            x,
            y,
            z,
            temperature: None,
        });
    }

    pub fn add_accelerometer(&self, data: &AccelerometerData) {
        let data = *data;
        self.submit("accelerometer", move |w| w.write_accelerometer(&data));
    }

    pub fn add_accelerometer_values(&self, t: f64, x: f64, y: f64, z: f64) {
        self.add_accelerometer(&AccelerometerData {
            t,
            x,
            y,
            z,
            temperature: None,
        });
    }

    pub fn add_ar_kit(&self, pose: &Pose) {
        let pose = *pose;
        self.submit("ARKit", move |w| w.write_ar_kit(&pose));
    }

    pub fn add_ground_truth(&self, pose: &Pose) {
        let pose = *pose;
        self.submit("groundTruth", move |w| w.write_ground_truth(&pose));
    }

    /// Odometry estimate, optionally with velocity.
    pub fn add_odometry_output(&self, pose: &Pose, velocity: Option<Vector3d>) {
        let pose = *pose;
        self.submit("output", move |w| w.write_odometry_output(&pose, velocity));
    }

    pub fn add_gps(&self, data: &GpsData) {
        let data = *data;
        self.submit("gps", move |w| w.write_gps(&data));
    }

    /// Take `count` frame buffers of `shape` for the caller to fill and pass
    /// back through [`FrameData::with_pooled_image`]. Their contents are
    /// unspecified.
    ///
    /// Either every buffer is returned or none: when the pool cannot supply
    /// them all, a drop record for time `t` is written and `None` is
    /// returned.
    pub fn get_empty_frames(&self, count: usize, t: f64, shape: ImageShape) -> Option<Vec<ImageSlot>> {
        let slots: Option<Vec<ImageSlot>> = (0..count).map(|_| self.pool.next(shape)).collect();
        if slots.is_none() {
            self.record_drop(t, "no free frame buffers");
        }
        slots
    }

    /// Record one frame. Returns `false` if it was dropped; a drop record is
    /// written instead. Frames are dropped when the buffer pool is saturated
    /// or when the camera's pixels differ in size from its first frame.
    ///
    /// With `clone_image` the pixels are copied into a pooled buffer and the
    /// caller may reuse its image right away. Without it the recorder keeps a
    /// reference to the caller's image until the video worker has written it.
    /// Pixels from [`get_empty_frames`](Self::get_empty_frames) are used as
    /// they are in either mode.
    pub fn add_frame(&self, frame: &FrameData, clone_image: bool) -> bool {
        let meta = frame.meta();
        self.ingest(
            frame.t,
            std::slice::from_ref(frame),
            clone_image,
            "frame",
            move |w| w.write_frame(&meta),
        )
    }

    /// Record frames captured together, one per camera. The group is accepted
    /// or dropped as a whole.
    pub fn add_frame_group(&self, t: f64, frames: &[FrameData], clone_image: bool) -> bool {
        let metas: Vec<FrameMeta> = frames.iter().map(FrameData::meta).collect();
        self.ingest(t, frames, clone_image, "frame group", move |w| {
            w.write_frame_group(t, &metas)
        })
    }

    /// Record a caller-serialized JSON object as one line. Invalid JSON is
    /// logged and skipped.
    pub fn add_json_string(&self, line: &str) {
        let line = line.to_owned();
        self.jsonl.enqueue(move |w| {
            if let Err(e) = w.write_json_string(&line) {
                error!("Failed to write JSON line: {}", e);
            }
        });
    }

    pub fn add_json(&self, value: &Value) {
        let value = value.clone();
        self.submit("json", move |w| w.write_json(&value));
    }

    /// Frame rate stored in video files opened after this call.
    pub fn set_video_recording_fps(&self, fps: f32) {
        let Some(video) = &self.video else {
            debug!(fps, "Video disabled, ignoring fps");
            return;
        };
        if !(fps > 0.0 && fps.is_finite()) {
            warn!(fps, "Ignoring invalid video fps");
            return;
        }
        *video.fps.lock() = fps;
    }

    pub fn stats(&self) -> RecorderStats {
        RecorderStats {
            frames_recorded: self.frames_recorded.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            pending_json_jobs: self.jsonl.pending(),
            video_streams: self.video.as_ref().map_or(0, |v| v.streams.len()),
        }
    }

    /// Drain every queue, finalize the video files and flush the JSONL output.
    pub fn close(self) -> Result<()> {
        let Recorder {
            video,
            jsonl,
            frames_recorded,
            frames_dropped,
            ..
        } = self;

        let video_result = video.map_or(Ok(()), VideoPipeline::finish);

        let mut writer = jsonl.finish()?;
        writer.flush()?;
        info!(
            frames_recorded = frames_recorded.into_inner(),
            frames_dropped = frames_dropped.into_inner(),
            lines = writer.lines_written(),
            "Recorder closed"
        );
        video_result
    }

    fn ingest<F>(
        &self,
        t: f64,
        frames: &[FrameData],
        clone_image: bool,
        kind: &'static str,
        write: F,
    ) -> bool
    where
        F: FnOnce(&mut JsonlWriter) -> Result<()> + Send + 'static,
    {
        let mut frame_sizes = self.frame_sizes.lock();
        let Some(video) = &self.video else {
            self.submit(kind, write);
            self.record_accepted();
            return true;
        };
        let admitted = match self.admit(frames, clone_image, &frame_sizes) {
            Ok(admitted) => admitted,
            Err(reason) => {
                self.record_drop(t, reason);
                return false;
            }
        };

        for Admitted {
            camera_ind,
            shape,
            image,
        } in admitted
        {
            frame_sizes
                .entry(camera_ind)
                .or_insert((shape.width, shape.height));
            video.dispatch(camera_ind, image);
        }
        self.submit(kind, write);
        self.record_accepted();
        true
    }

    /// Acquire a slot for every frame with pixels, or none at all.
    fn admit(
        &self,
        frames: &[FrameData],
        clone_image: bool,
        frame_sizes: &HashMap<usize, (u32, u32)>,
    ) -> std::result::Result<Vec<Admitted>, &'static str> {
        let mut admitted: Vec<Admitted> = Vec::with_capacity(frames.len());
        for frame in frames {
            let Some(shape) = frame.pixel_shape() else {
                continue;
            };
            let size = (shape.width, shape.height);
            let expected = frame_sizes.get(&frame.camera_ind).copied().or_else(|| {
                admitted
                    .iter()
                    .find(|a| a.camera_ind == frame.camera_ind)
                    .map(|a| (a.shape.width, a.shape.height))
            });
            if expected.is_some_and(|expected| expected != size) {
                debug!(
                    camera = frame.camera_ind,
                    width = shape.width,
                    height = shape.height,
                    "Frame size differs from the camera's video"
                );
                return Err("frame size changed");
            }

            // Returning early releases the slots taken so far
            let image = match (&frame.pooled, &frame.image) {
                (Some(slot), _) => PendingImage::Pooled(slot.clone()),
                (None, Some(image)) => {
                    let slot = self.pool.next(shape).ok_or("frame pool saturated")?;
                    if clone_image {
                        slot.write().copy_from(image);
                        PendingImage::Pooled(slot)
                    } else {
                        PendingImage::Aliased {
                            image: Arc::clone(image),
                            _token: slot,
                        }
                    }
                }
                (None, None) => continue,
            };
            admitted.push(Admitted {
                camera_ind: frame.camera_ind,
                shape,
                image,
            });
        }
        Ok(admitted)
    }

    fn submit<F>(&self, kind: &'static str, write: F)
    where
        F: FnOnce(&mut JsonlWriter) -> Result<()> + Send + 'static,
    {
        self.jsonl.enqueue(move |w| {
            if let Err(e) = write(w) {
                error!(record = kind, "Failed to write record: {}", e);
            }
        });
    }

    fn record_accepted(&self) {
        self.frames_recorded.fetch_add(1, Ordering::Relaxed);
        self.drops.lock().record(false);
    }

    fn record_drop(&self, t: f64, reason: &'static str) {
        let dropped = self.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(time = t, dropped, reason, "Dropping frame");
        self.submit("dropped frame", move |w| w.write_dropped_frame(t));
        self.drops.lock().record(true);
    }
}
