// Configuration module for jsonl-recorder
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

pub mod types;
mod loader;

pub use types::*;
pub use loader::ConfigLoader;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
    let mut config = load_config(path)?;
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Let `RECORDER_OUTPUT_PATH` and `RECORDER_VIDEO_PREFIX` override the file.
pub fn apply_env_overrides(config: &mut RecorderConfig) {
    if let Ok(output_path) = std::env::var("RECORDER_OUTPUT_PATH") {
        config.recorder.output_path = output_path;
    }

    if let Ok(prefix) = std::env::var("RECORDER_VIDEO_PREFIX") {
        config.recorder.video.output_prefix = (!prefix.is_empty()).then_some(prefix);
    }
}
