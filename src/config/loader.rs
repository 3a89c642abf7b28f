// Configuration loader with environment variable substitution

use super::types::*;
use anyhow::{bail, Context, Result};
use regex::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RecorderConfig> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::load_str(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn load_str(content: &str) -> Result<RecorderConfig> {
        let content = Self::substitute_env_vars(content);

        let config: RecorderConfig =
            serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${OUTPUT_DIR:-/tmp} -> /tmp (if OUTPUT_DIR not set)
    fn substitute_env_vars(content: &str) -> String {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| {
            Regex::new(r"\$\{([^}:]+)(?::-([^}]+))?\}").expect("env var pattern is valid")
        });

        re.replace_all(content, |caps: &Captures| {
            let var_name = &caps[1];
            match (std::env::var(var_name), caps.get(2)) {
                (Ok(value), _) => value,
                (Err(_), Some(default)) => default.as_str().to_string(),
                // Keep original if no default and var not found
                (Err(_), None) => caps[0].to_string(),
            }
        })
        .into_owned()
    }

    /// Validate configuration
    fn validate(config: &RecorderConfig) -> Result<()> {
        let recorder = &config.recorder;

        if recorder.output_path.trim().is_empty() {
            bail!("recorder.output_path cannot be empty");
        }

        if let Some(prefix) = &recorder.video.output_prefix {
            if prefix.trim().is_empty() {
                bail!("video.output_prefix cannot be empty when set");
            }
        }

        if !(recorder.video.fps.is_finite() && recorder.video.fps > 0.0) {
            bail!("video.fps must be > 0");
        }

        if !(1..=100).contains(&recorder.video.jpeg_quality) {
            bail!("video.jpeg_quality must be 1-100");
        }

        let pool = &recorder.frame_pool;
        if pool.capacity_increase == 0 {
            bail!("frame_pool.capacity_increase must be > 0");
        }

        if pool.max_capacity == 0 {
            bail!("frame_pool.max_capacity must be > 0");
        }

        if pool.initial_capacity > 0 && pool.initial_shape.is_none() {
            bail!("frame_pool.initial_capacity requires frame_pool.initial_shape");
        }

        if recorder.queue_warn_depth == Some(0) {
            bail!("recorder.queue_warn_depth must be > 0");
        }

        if !LOG_LEVELS.contains(&config.logging.level.to_lowercase().as_str()) {
            bail!(
                "Unknown log level: '{}'. Supported: {}",
                config.logging.level,
                LOG_LEVELS.join(", ")
            );
        }

        match config.logging.format.as_str() {
            "text" | "json" => {}
            unknown => bail!("Unknown log format: '{}'. Supported: text, json", unknown),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("JSONL_RECORDER_TEST_VAR", "test_value");

        let input = "output_path: ${JSONL_RECORDER_TEST_VAR}";
        let output = ConfigLoader::substitute_env_vars(input);
        assert_eq!(output, "output_path: test_value");

        std::env::remove_var("JSONL_RECORDER_TEST_VAR");
    }

    #[test]
    fn test_env_var_with_default() {
        std::env::remove_var("JSONL_RECORDER_TEST_VAR2");

        let input = "output_prefix: ${JSONL_RECORDER_TEST_VAR2:-/tmp/video}";
        let output = ConfigLoader::substitute_env_vars(input);
        assert_eq!(output, "output_prefix: /tmp/video");
    }

    #[test]
    fn test_unset_var_without_default_is_kept() {
        std::env::remove_var("JSONL_RECORDER_TEST_VAR3");

        let input = "output_path: ${JSONL_RECORDER_TEST_VAR3}";
        assert_eq!(ConfigLoader::substitute_env_vars(input), input);
    }

    #[test]
    fn test_validation_zero_pool_increase() {
        let mut config = RecorderConfig::default();
        config.recorder.frame_pool.capacity_increase = 0;

        let result = ConfigLoader::validate(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("capacity_increase"));
    }

    #[test]
    fn test_validation_invalid_jpeg_quality() {
        let mut config = RecorderConfig::default();
        config.recorder.video.jpeg_quality = 0;

        let result = ConfigLoader::validate(&config);
        assert!(result.unwrap_err().to_string().contains("jpeg_quality"));
    }

    #[test]
    fn test_validation_initial_capacity_needs_shape() {
        let mut config = RecorderConfig::default();
        config.recorder.frame_pool.initial_capacity = 4;

        let result = ConfigLoader::validate(&config);
        assert!(result.unwrap_err().to_string().contains("initial_shape"));
    }

    #[test]
    fn test_validation_invalid_fps() {
        let mut config = RecorderConfig::default();
        config.recorder.video.fps = 0.0;
        assert!(ConfigLoader::validate(&config).is_err());

        config.recorder.video.fps = f32::NAN;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConfigLoader::validate(&RecorderConfig::default()).is_ok());
    }
}
