use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::retry::RetryConfig;

/// Default budget for inflated archive contents, relative to the upload limit
const EXTRACTION_RATIO: u64 = 4;

/// What to do with an upload whose name is not a `.zip`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonArchivePolicy {
    /// Treat the staged file itself as the raster candidate when its extension
    /// is an accepted raster extension.
    DirectRaster,
    /// Report every non-archive upload as unsupported input.
    Reject,
}

impl NonArchivePolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "direct" | "direct_raster" | "raster" => Some(Self::DirectRaster),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

/// Configuration for the ingestion and conversion pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum upload size in bytes (default: 512 MB)
    pub max_file_size: usize,

    /// Maximum inflated size of one archive's contents in bytes
    /// (default: 4x `max_file_size`)
    pub max_extracted_size: u64,

    /// Parent directory for per-upload working sets (default: system temp dir)
    pub work_dir: Option<PathBuf>,

    /// Upper bound for extraction + decoding + artifact production of one file
    pub conversion_timeout: Duration,

    /// Files of one batch processed at the same time (default: 2)
    pub max_concurrent_files: usize,

    /// Handling of uploads that are not archives (default: direct raster)
    pub non_archive_policy: NonArchivePolicy,

    /// Accepted raster extensions, lowercase without dot (default: tif, tiff)
    pub raster_extensions: Vec<String>,

    /// Max width/height of the PNG preview in pixels (default: 256)
    pub thumbnail_size: u32,

    /// Backoff applied to blob store calls
    pub upload_retry: RetryConfig,

    /// JWT Secret Key (Required in production)
    pub jwt_secret: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_file_size: 512 * 1024 * 1024, // 512 MB
            max_extracted_size: EXTRACTION_RATIO * 512 * 1024 * 1024, // 2 GB
            work_dir: None,
            conversion_timeout: Duration::from_secs(300),
            max_concurrent_files: 2,
            non_archive_policy: NonArchivePolicy::DirectRaster,
            raster_extensions: vec!["tif".to_string(), "tiff".to_string()],
            thumbnail_size: 256,
            upload_retry: RetryConfig::default(),
            jwt_secret: "secret".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();
        let max_file_size = env::var("MAX_FILE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default.max_file_size);

        Self {
            max_file_size,

            max_extracted_size: env::var("MAX_EXTRACTED_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(EXTRACTION_RATIO * max_file_size as u64),

            work_dir: env::var("WORK_DIR").ok().map(PathBuf::from),

            conversion_timeout: env::var("CONVERSION_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(default.conversion_timeout),

            max_concurrent_files: env::var("MAX_CONCURRENT_FILES")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(default.max_concurrent_files),

            non_archive_policy: env::var("NON_ARCHIVE_POLICY")
                .ok()
                .and_then(|v| NonArchivePolicy::parse(&v))
                .unwrap_or(default.non_archive_policy),

            raster_extensions: env::var("RASTER_EXTENSIONS")
                .ok()
                .map(|v| parse_extensions(&v))
                .filter(|exts| !exts.is_empty())
                .unwrap_or(default.raster_extensions),

            thumbnail_size: env::var("THUMBNAIL_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(default.thumbnail_size),

            upload_retry: RetryConfig {
                max_attempts: env::var("UPLOAD_MAX_ATTEMPTS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default.upload_retry.max_attempts),
                base_delay: env::var("UPLOAD_BASE_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(default.upload_retry.base_delay),
                max_delay: env::var("UPLOAD_MAX_DELAY_MS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(default.upload_retry.max_delay),
                jitter: default.upload_retry.jitter,
            },

            jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| "secret".to_string()), // Fallback for dev convenience, strictly enforced in production method
        }
    }

    /// Create config for development (short timeouts, no backoff jitter)
    pub fn development() -> Self {
        Self {
            conversion_timeout: Duration::from_secs(60),
            upload_retry: RetryConfig {
                max_attempts: 2,
                base_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                jitter: false,
            },
            ..Self::default()
        }
    }

    /// Create config for production (secret required)
    pub fn production() -> Self {
        Self {
            jwt_secret: env::var("JWT_SECRET").expect("CRITICAL: JWT_SECRET must be set"),
            ..Self::from_env()
        }
    }
}

fn parse_extensions(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
