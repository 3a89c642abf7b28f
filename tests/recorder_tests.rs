// Recording pipeline integration tests

use crossbeam::channel::{unbounded, Receiver};
use jsonl_recorder::{
    FrameData, Image, ImageShape, PixelFormat, Pose, Recorder, RecorderError, SharedBuffer,
    Vector3d, VideoWriter, VideoWriterFactory,
};
use serde_json::{json, Value};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

/// Video factory whose writers block on every frame until the gate opens.
struct GatedFactory {
    gate: Receiver<()>,
    writes: Arc<AtomicUsize>,
}

struct GatedWriter {
    gate: Receiver<()>,
    writes: Arc<AtomicUsize>,
    written: u64,
}

impl GatedFactory {
    fn new(gate: Receiver<()>) -> Self {
        Self {
            gate,
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl VideoWriterFactory for GatedFactory {
    fn open(
        &self,
        _camera_ind: usize,
        _fps: f32,
        _model_frame: ImageShape,
    ) -> jsonl_recorder::Result<Box<dyn VideoWriter>> {
        Ok(Box::new(GatedWriter {
            gate: self.gate.clone(),
            writes: Arc::clone(&self.writes),
            written: 0,
        }))
    }
}

impl VideoWriter for GatedWriter {
    fn write(&mut self, _frame: &Image) -> jsonl_recorder::Result<()> {
        // Returns Err once the sender is dropped, which opens the gate
        let _ = self.gate.recv();
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> jsonl_recorder::Result<()> {
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.written
    }
}

fn image(shape: ImageShape) -> Arc<Image> {
    Arc::new(Image::new(shape))
}

fn frame(t: f64, camera_ind: usize) -> FrameData {
    FrameData::new(t, camera_ind).with_image(image(ImageShape::new(8, 6, PixelFormat::Bgr8)))
}

fn parse_lines(buffer: &SharedBuffer) -> Vec<Value> {
    buffer
        .lines()
        .iter()
        .map(|line| serde_json::from_str(line).expect("every line is complete JSON"))
        .collect()
}

fn frame_numbers(group: &Value) -> Vec<(u64, u64)> {
    group["frames"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| (f["cameraInd"].as_u64().unwrap(), f["number"].as_u64().unwrap()))
        .collect()
}

#[test]
fn test_per_camera_numbering() {
    let buffer = SharedBuffer::new();
    let recorder = Recorder::from_writer(buffer.clone()).unwrap();

    assert!(recorder.add_frame_group(1.0, &[frame(1.0, 0), frame(1.0, 1)], true));
    assert!(recorder.add_frame_group(2.0, &[frame(2.0, 1)], true));
    assert!(recorder.add_frame_group(3.0, &[frame(3.0, 1), frame(3.0, 0)], true));
    recorder.close().unwrap();

    let records = parse_lines(&buffer);
    assert_eq!(records.len(), 3);

    let group_numbers: Vec<u64> = records.iter().map(|r| r["number"].as_u64().unwrap()).collect();
    assert_eq!(group_numbers, vec![0, 1, 2]);

    assert_eq!(frame_numbers(&records[0]), vec![(0, 0), (1, 0)]);
    assert_eq!(frame_numbers(&records[1]), vec![(1, 1)]);
    assert_eq!(frame_numbers(&records[2]), vec![(1, 2), (0, 1)]);
}

#[test]
fn test_single_frames_use_group_number() {
    let buffer = SharedBuffer::new();
    let recorder = Recorder::from_writer(buffer.clone()).unwrap();

    recorder.add_frame(&frame(0.0, 3), true);
    recorder.add_frame_group(0.5, &[frame(0.5, 0)], true);
    recorder.add_frame(&frame(1.0, 3), true);
    recorder.close().unwrap();

    let records = parse_lines(&buffer);
    assert_eq!(frame_numbers(&records[0]), vec![(3, 0)]);
    assert_eq!(frame_numbers(&records[1]), vec![(0, 0)]);
    assert_eq!(frame_numbers(&records[2]), vec![(3, 2)]);
}

#[test]
fn test_saturated_pool_drops_frames() {
    let (release, gate) = unbounded::<()>();
    let factory = Arc::new(GatedFactory::new(gate));
    let buffer = SharedBuffer::new();
    let recorder = Recorder::builder_with_writer(buffer.clone())
        .video_factory(factory.clone())
        .frame_pool(1, 1)
        .build()
        .unwrap();

    assert!(recorder.add_frame(&frame(0.0, 0), true));
    assert!(!recorder.add_frame(&frame(0.1, 0), true));
    assert!(!recorder.add_frame_group(0.2, &[frame(0.2, 0), frame(0.2, 1)], false));

    let stats = recorder.stats();
    assert_eq!(stats.frames_recorded, 1);
    assert_eq!(stats.frames_dropped, 2);

    drop(release);
    recorder.close().unwrap();

    // Only the accepted frame reached a video writer
    assert_eq!(factory.writes.load(Ordering::SeqCst), 1);

    let records = parse_lines(&buffer);
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["number"], json!(0));
    assert_eq!(records[1], json!({"time": 0.1, "droppedFrame": true}));
    assert_eq!(records[2], json!({"time": 0.2, "droppedFrame": true}));
}

#[test]
fn test_released_slot_is_reused() {
    let (release, gate) = unbounded::<()>();
    let factory = Arc::new(GatedFactory::new(gate));
    let recorder = Recorder::builder_with_writer(SharedBuffer::new())
        .video_factory(factory.clone())
        .frame_pool(1, 1)
        .build()
        .unwrap();

    assert!(recorder.add_frame(&frame(0.0, 0), true));
    release.send(()).unwrap();

    // The slot frees once the worker has written the frame
    let mut accepted = false;
    for i in 0..500 {
        if recorder.add_frame(&frame(1.0 + i as f64, 0), true) {
            accepted = true;
            break;
        }
        thread::sleep(std::time::Duration::from_millis(2));
    }
    assert!(accepted);

    drop(release);
    recorder.close().unwrap();
    assert_eq!(factory.writes.load(Ordering::SeqCst), 2);
}

#[test]
fn test_clone_and_alias_modes() {
    let (release, gate) = unbounded::<()>();
    let recorder = Recorder::builder_with_writer(SharedBuffer::new())
        .video_factory(Arc::new(GatedFactory::new(gate)))
        .build()
        .unwrap();

    let cloned = image(ImageShape::new(4, 4, PixelFormat::Rgb8));
    assert!(recorder.add_frame(&FrameData::new(0.0, 0).with_image(Arc::clone(&cloned)), true));
    // The frame was copied, nothing else references the caller's image
    assert_eq!(Arc::strong_count(&cloned), 1);

    let aliased = image(ImageShape::new(4, 4, PixelFormat::Rgb8));
    let aliased_frame = FrameData::new(0.1, 0).with_image(Arc::clone(&aliased));
    assert!(recorder.add_frame(&aliased_frame, false));
    drop(aliased_frame);
    // The pending video job still holds the caller's image
    assert_eq!(Arc::strong_count(&aliased), 2);

    drop(release);
    recorder.close().unwrap();
    assert_eq!(Arc::strong_count(&aliased), 1);
}

#[test]
fn test_concurrent_producers_write_complete_lines() {
    let buffer = SharedBuffer::new();
    let recorder = Arc::new(Recorder::from_writer(buffer.clone()).unwrap());

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let recorder = Arc::clone(&recorder);
            thread::spawn(move || {
                for i in 0..500 {
                    let t = (p * 1000 + i) as f64;
                    recorder.add_gyroscope_values(t, 0.1, 0.2, 0.3);
                    recorder.add_frame(&FrameData::new(t, p), true);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let recorder = Arc::try_unwrap(recorder).ok().expect("producers finished");
    recorder.close().unwrap();

    let records = parse_lines(&buffer);
    assert_eq!(records.len(), 4 * 500 * 2);

    // Group numbers stay gapless regardless of producer interleaving
    let mut numbers: Vec<u64> = records
        .iter()
        .filter_map(|r| r.get("frames").and(r["number"].as_u64()))
        .collect();
    numbers.sort_unstable();
    assert_eq!(numbers, (0..2000).collect::<Vec<_>>());
}

/// Video factory whose writers log the id stored in each frame's pixels.
struct IdLoggingFactory {
    ids: Arc<parking_lot::Mutex<Vec<u32>>>,
}

struct IdLoggingWriter {
    ids: Arc<parking_lot::Mutex<Vec<u32>>>,
    written: u64,
}

impl VideoWriterFactory for IdLoggingFactory {
    fn open(
        &self,
        _camera_ind: usize,
        _fps: f32,
        _model_frame: ImageShape,
    ) -> jsonl_recorder::Result<Box<dyn VideoWriter>> {
        Ok(Box::new(IdLoggingWriter {
            ids: Arc::clone(&self.ids),
            written: 0,
        }))
    }
}

impl VideoWriter for IdLoggingWriter {
    fn write(&mut self, frame: &Image) -> jsonl_recorder::Result<()> {
        let bytes: [u8; 4] = frame.data()[..4].try_into().unwrap();
        self.ids.lock().push(u32::from_le_bytes(bytes));
        self.written += 1;
        Ok(())
    }

    fn finish(&mut self) -> jsonl_recorder::Result<()> {
        Ok(())
    }

    fn frames_written(&self) -> u64 {
        self.written
    }
}

#[test]
fn test_concurrent_producers_keep_video_in_log_order() {
    let ids = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let factory = Arc::new(IdLoggingFactory {
        ids: Arc::clone(&ids),
    });
    let buffer = SharedBuffer::new();
    let recorder = Arc::new(
        Recorder::builder_with_writer(buffer.clone())
            .video_factory(factory)
            .frame_pool(4, 64)
            .build()
            .unwrap(),
    );

    let shape = ImageShape::new(4, 1, PixelFormat::Gray8);
    let producers: Vec<_> = (0..4u32)
        .map(|p| {
            let recorder = Arc::clone(&recorder);
            thread::spawn(move || {
                for i in 0..1000u32 {
                    let id = p * 1000 + i;
                    let image = Image::from_vec(shape, id.to_le_bytes().to_vec()).unwrap();
                    let frame = FrameData::new(f64::from(id), 0).with_image(Arc::new(image));
                    recorder.add_frame_group(f64::from(id), &[frame], i % 2 == 0);
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let recorder = Arc::try_unwrap(recorder).ok().expect("producers finished");
    let recorded = recorder.stats().frames_recorded;
    recorder.close().unwrap();

    // The frame numbered n in the log is the n-th frame of the video
    let logged: Vec<(u64, u32)> = parse_lines(&buffer)
        .iter()
        .filter_map(|r| r.get("frames"))
        .map(|frames| {
            let frame = &frames[0];
            (frame["number"].as_u64().unwrap(), frame["time"].as_f64().unwrap() as u32)
        })
        .collect();
    let ids = ids.lock();
    assert_eq!(logged.len() as u64, recorded);
    assert_eq!(ids.len(), logged.len());
    for (number, id) in logged {
        assert_eq!(ids[number as usize], id, "frame number {}", number);
    }
}

#[test]
fn test_drop_without_close_drains() {
    let buffer = SharedBuffer::new();
    {
        let recorder = Recorder::from_writer(buffer.clone()).unwrap();
        for i in 0..100 {
            recorder.add_accelerometer_values(i as f64, 0.0, 0.0, 9.81);
        }
    }
    assert_eq!(buffer.lines().len(), 100);
}

#[test]
fn test_pose_and_json_events() {
    let buffer = SharedBuffer::new();
    let recorder = Recorder::from_writer(buffer.clone()).unwrap();

    let pose = Pose {
        time: 1.5,
        position: Vector3d::new(1.0, 2.0, 3.0),
        orientation: None,
    };
    recorder.add_ground_truth(&pose);
    recorder.add_odometry_output(&pose, Some(Vector3d::new(0.5, 0.0, 0.0)));
    recorder.add_json_string("{\"time\":2.0,\"marker\":\"a\"}");
    recorder.add_json_string("{\"time\":2.1,\"marker\":\"b\"}\n");
    recorder.add_json_string("{\n  \"time\": 2.2,\n  \"marker\": \"c\"\n}");
    recorder.add_json_string("not json");
    recorder.close().unwrap();

    let lines = buffer.lines();
    assert_eq!(lines.len(), 5);
    assert_eq!(
        lines[0],
        r#"{"time":1.5,"groundTruth":{"position":{"x":1.0,"y":2.0,"z":3.0}}}"#
    );
    let output: Value = serde_json::from_str(&lines[1]).unwrap();
    assert_eq!(output["output"]["velocity"]["x"], json!(0.5));
    assert_eq!(lines[2], r#"{"time":2.0,"marker":"a"}"#);
    assert_eq!(lines[3], r#"{"time":2.1,"marker":"b"}"#);
    assert_eq!(lines[4], r#"{"marker":"c","time":2.2}"#);
}

#[test]
fn test_video_files_per_camera() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("session.jsonl");
    let prefix = dir.path().join("cam").to_string_lossy().into_owned();

    let recorder = Recorder::create_with_video(&output, prefix).unwrap();
    recorder.set_video_recording_fps(20.0);
    let shape = ImageShape::new(32, 24, PixelFormat::Bgr8);
    for i in 0..3 {
        let t = i as f64 * 0.05;
        let frames = [
            FrameData::new(t, 0).with_image(image(shape)),
            FrameData::new(t, 1).with_image(image(shape)),
        ];
        assert!(recorder.add_frame_group(t, &frames, i % 2 == 0));
    }
    recorder.close().unwrap();

    assert_eq!(fs::read_to_string(&output).unwrap().lines().count(), 3);
    for name in ["cam.avi", "cam2.avi"] {
        let bytes = fs::read(dir.path().join(name)).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"AVI ");
        let total_frames = u32::from_le_bytes(bytes[48..52].try_into().unwrap());
        assert_eq!(total_frames, 3, "{}", name);
    }
}

#[test]
fn test_unwritable_outputs_fail_construction() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");

    let result = Recorder::create(missing.join("out.jsonl"));
    assert!(matches!(result, Err(RecorderError::OpenOutput { .. })));

    let result = Recorder::create_with_video(
        dir.path().join("out.jsonl"),
        missing.join("video").to_string_lossy(),
    );
    assert!(matches!(result, Err(RecorderError::OpenVideo { .. })));
}
