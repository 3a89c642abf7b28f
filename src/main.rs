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

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use jsonl_recorder::config::{apply_env_overrides, LoggingConfig};
use jsonl_recorder::{
    load_config_with_env, FrameData, GpsData, Image, ImageShape, PixelFormat, Recorder,
    RecorderBuilder, RecorderConfig,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tokio::time::{interval, sleep};
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

/// JSONL Recorder - Record sensor events and camera frames to JSONL and video
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// JSONL output file (overrides config file)
    #[arg(short, long)]
    output: Option<String>,

    /// Video file prefix (overrides config file)
    #[arg(long)]
    video_prefix: Option<String>,

    /// Stop after this many seconds instead of waiting for Ctrl+C
    #[arg(short, long)]
    duration_secs: Option<u64>,

    /// Number of synthetic cameras
    #[arg(long, default_value_t = 1)]
    cameras: usize,

    /// Camera frame rate (overrides config file)
    #[arg(long)]
    fps: Option<f32>,

    /// Synthetic frame width
    #[arg(long, default_value_t = 320)]
    width: u32,

    /// Synthetic frame height
    #[arg(long, default_value_t = 240)]
    height: u32,

    /// Copy frames into pooled buffers instead of sharing them with the writer
    #[arg(long)]
    clone_images: bool,

    /// Re-record the JSON lines of an existing file instead of generating data
    #[arg(long)]
    replay: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Load configuration from file, or start from defaults
    let mut config = match &args.config {
        Some(path) => load_config_with_env(path)?,
        None => {
            let mut config = RecorderConfig::default();
            config.recorder.output_path = default_output_path();
            apply_env_overrides(&mut config);
            config
        }
    };

    // Apply CLI overrides
    if let Some(output) = &args.output {
        config.recorder.output_path = output.clone();
    }
    if let Some(prefix) = &args.video_prefix {
        config.recorder.video.output_prefix = Some(prefix.clone());
    }
    if let Some(fps) = args.fps {
        config.recorder.video.fps = fps;
    }

    init_tracing(&config.logging)?;

    info!("Starting JSONL Recorder");
    if let Some(path) = &args.config {
        info!("Loaded configuration from: {:?}", path);
    }
    info!("Output: {}", config.recorder.output_path);
    if let Some(prefix) = &config.recorder.video.output_prefix {
        info!("Video prefix: {}", prefix);
    }

    let recorder = RecorderBuilder::from_settings(&config.recorder)
        .build()
        .with_context(|| format!("Failed to start recorder for {}", config.recorder.output_path))?;
    let recorder = Arc::new(recorder);

    let result = match &args.replay {
        Some(path) => replay(&recorder, path).await,
        None => record_synthetic(&recorder, &args, config.recorder.video.fps).await,
    };

    let stats = recorder.stats();
    let recorder = Arc::try_unwrap(recorder)
        .map_err(|_| anyhow!("Recorder still in use at shutdown"))?;

    // Draining the queues blocks until every pending write is done
    tokio::task::spawn_blocking(move || recorder.close())
        .await
        .context("Recorder shutdown task failed")??;

    info!(
        frames_recorded = stats.frames_recorded,
        frames_dropped = stats.frames_dropped,
        "JSONL Recorder shut down successfully"
    );

    result
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let log_level = match logging.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    if logging.format == "json" {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

fn default_output_path() -> String {
    chrono::Local::now()
        .format("recording-%Y%m%d-%H%M%S.jsonl")
        .to_string()
}

/// Feed IMU, GPS and camera data from timers until Ctrl+C or the duration ends.
async fn record_synthetic(recorder: &Arc<Recorder>, args: &Args, fps: f32) -> Result<()> {
    let start = Instant::now();
    let mut tasks = JoinSet::<()>::new();

    let imu = Arc::clone(recorder);
    tasks.spawn(async move {
        let mut tick = interval(Duration::from_millis(10));
        loop {
            tick.tick().await;
            let t = start.elapsed().as_secs_f64();
            imu.add_gyroscope_values(t, 0.01 * t.sin(), 0.02 * t.cos(), 0.001);
            imu.add_accelerometer_values(t, 0.1 * t.cos(), 0.1 * t.sin(), 9.81);
        }
    });

    let gps = Arc::clone(recorder);
    tasks.spawn(async move {
        let mut tick = interval(Duration::from_secs(1));
        loop {
            tick.tick().await;
            let t = start.elapsed().as_secs_f64();
            gps.add_gps(&GpsData {
                t,
                latitude: 60.1699 + 1e-5 * t,
                longitude: 24.9384,
                horizontal_uncertainty: 3.0,
                altitude: 12.0,
            });
        }
    });

    let camera = Arc::clone(recorder);
    let shape = ImageShape::new(args.width, args.height, PixelFormat::Bgr8);
    let cameras = args.cameras.max(1);
    let clone_images = args.clone_images;
    let period = Duration::from_secs_f64(1.0 / f64::from(fps.max(1.0)));
    tasks.spawn(async move {
        let mut tick = interval(period);
        let mut index = 0u64;
        loop {
            tick.tick().await;
            let t = start.elapsed().as_secs_f64();
            let frames: Vec<FrameData> = (0..cameras)
                .map(|camera_ind| {
                    let image = synthetic_image(shape, index, camera_ind);
                    FrameData::new(t, camera_ind)
                        .with_intrinsics(
                            f64::from(shape.width),
                            f64::from(shape.width),
                            f64::from(shape.width) / 2.0,
                            f64::from(shape.height) / 2.0,
                        )
                        .with_image(Arc::new(image))
                })
                .collect();

            let accepted = match frames.as_slice() {
                [frame] => camera.add_frame(frame, clone_images),
                group => camera.add_frame_group(t, group, clone_images),
            };
            if !accepted {
                debug!(frame = index, "Frame dropped");
            }
            index += 1;
        }
    });

    let deadline = async {
        match args.duration_secs {
            Some(secs) => sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = deadline => {
            info!("Recording duration reached");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    tasks.abort_all();
    while tasks.join_next().await.is_some() {}
    Ok(())
}

/// Moving gradient, shifted per camera so streams are distinguishable.
fn synthetic_image(shape: ImageShape, index: u64, camera_ind: usize) -> Image {
    let mut image = Image::new(shape);
    let width = shape.width as usize;
    let channels = shape.format.channels();
    let offset = (index as usize * 4 + camera_ind * 64) % 256;
    for (i, px) in image.data_mut().chunks_exact_mut(channels).enumerate() {
        let (x, y) = (i % width, i / width);
        px[0] = ((x + offset) % 256) as u8;
        px[1] = ((y + offset) % 256) as u8;
        px[2] = offset as u8;
    }
    image
}

/// Record every non-empty line of `path` through `add_json_string`.
async fn replay(recorder: &Recorder, path: &Path) -> Result<()> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open replay file {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut count = 0u64;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read replay file")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => {
                        recorder.add_json_string(&line);
                        count += 1;
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping replay");
                break;
            }
        }
    }

    info!(lines = count, "Replay finished: {}", path.display());
    Ok(())
}
