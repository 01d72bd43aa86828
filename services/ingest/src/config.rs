//! Service configuration loaded from `INGEST_*` environment variables

use crate::policy::IngestPolicy;
use config::{Config, ConfigError, Environment};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Number of assets processed concurrently
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Capacity of the in-process job queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Cron schedule (with seconds) of the stale asset sweeper
    #[serde(default = "default_sweep_schedule")]
    pub sweep_schedule: String,
    /// Age in seconds after which an unfinished asset is dispatched again
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: i64,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Resolve `s3://` sources and store media in S3 with the AWS SDK
    #[serde(default)]
    pub s3_enabled: bool,
    /// Bucket holding originals and previews when S3 is enabled
    #[serde(default = "default_media_bucket")]
    pub media_bucket: String,
    /// Directory holding originals and previews when S3 is disabled
    #[serde(default = "default_storage_root")]
    pub storage_root: String,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_max_image_resolution")]
    pub max_image_resolution: u64,
    #[serde(default = "default_max_video_duration")]
    pub max_video_duration: f64,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_max_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_sweep_schedule() -> String {
    "0 */5 * * * *".to_string() // every 5 minutes
}

fn default_stale_after_secs() -> i64 {
    900
}

fn default_http_timeout_secs() -> u64 {
    60
}

fn default_media_bucket() -> String {
    "media-bucket".to_string()
}

fn default_storage_root() -> String {
    "./data/media".to_string()
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}

fn default_max_image_resolution() -> u64 {
    15_000 * 15_000
}

fn default_max_video_duration() -> f64 {
    140.0
}

fn default_allowed_extensions() -> Vec<String> {
    ["jpg", "gif", "png", "swf", "webm", "mp4", "zip"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            queue_capacity: default_queue_capacity(),
            sweep_schedule: default_sweep_schedule(),
            stale_after_secs: default_stale_after_secs(),
            http_timeout_secs: default_http_timeout_secs(),
            s3_enabled: false,
            media_bucket: default_media_bucket(),
            storage_root: default_storage_root(),
            max_file_size: default_max_file_size(),
            max_image_resolution: default_max_image_resolution(),
            max_video_duration: default_max_video_duration(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from the environment.
    ///
    /// `INGEST_ALLOWED_EXTENSIONS` is a comma separated list.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("INGEST")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("allowed_extensions"),
            )
            .build()?
            .try_deserialize::<IngestConfig>()?;

        if config.max_workers == 0 {
            return Err(ConfigError::Message(
                "INGEST_MAX_WORKERS must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn policy(&self) -> IngestPolicy {
        IngestPolicy {
            max_file_size: self.max_file_size,
            max_image_resolution: self.max_image_resolution,
            max_video_duration: self.max_video_duration,
            allowed_extensions: self.allowed_extensions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 5] = [
        "INGEST_MAX_WORKERS",
        "INGEST_MEDIA_BUCKET",
        "INGEST_MAX_FILE_SIZE",
        "INGEST_ALLOWED_EXTENSIONS",
        "INGEST_S3_ENABLED",
    ];

    fn clear_env() {
        for var in VARS {
            unsafe {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();

        let config = IngestConfig::from_env().unwrap();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.max_file_size, 100 * 1024 * 1024);
        assert!(!config.s3_enabled);
        assert_eq!(config.storage_root, "./data/media");
        assert_eq!(config.allowed_extensions, default_allowed_extensions());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        unsafe {
            std::env::set_var("INGEST_MAX_WORKERS", "8");
            std::env::set_var("INGEST_MAX_FILE_SIZE", "1024");
            std::env::set_var("INGEST_ALLOWED_EXTENSIONS", "jpg,png");
            std::env::set_var("INGEST_S3_ENABLED", "true");
            std::env::set_var("INGEST_MEDIA_BUCKET", "uploads");
        }

        let config = IngestConfig::from_env().unwrap();
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.max_file_size, 1024);
        assert_eq!(config.allowed_extensions, vec!["jpg", "png"]);
        assert!(config.s3_enabled);
        assert_eq!(config.media_bucket, "uploads");

        let policy = config.policy();
        assert_eq!(policy.max_file_size, 1024);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_rejects_zero_workers() {
        clear_env();
        unsafe {
            std::env::set_var("INGEST_MAX_WORKERS", "0");
        }

        assert!(IngestConfig::from_env().is_err());

        clear_env();
    }
}
