//! Observability hook handed to every pipeline component.
//!
//! Components report what happened as [`PipelineEvent`]s instead of logging
//! directly, so tests can assert on the event stream and deployments can route
//! events wherever they like. [`TracingObserver`] is the production default.

use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    BatchReceived {
        owner_id: String,
        files: usize,
    },
    FileStaged {
        file_name: String,
        size: u64,
    },
    EmptyFileSkipped {
        file_name: String,
    },
    ArchiveExtracted {
        file_name: String,
        entries: usize,
    },
    RasterSelected {
        file_name: String,
        raster: String,
    },
    NoRasterFound {
        file_name: String,
    },
    UnsupportedInput {
        file_name: String,
    },
    BundleProduced {
        file_name: String,
        artifact_key: String,
        width: u32,
        height: u32,
    },
    ArtifactUploaded {
        blob: String,
    },
    ArtifactReused {
        blob: String,
    },
    UploadRetry {
        blob: String,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    RolledBack {
        artifact_key: String,
        removed: usize,
    },
    CatalogAppended {
        owner_id: String,
        artifact_key: String,
    },
    AlreadyPublished {
        owner_id: String,
        artifact_key: String,
    },
    FileFailed {
        file_name: String,
        error: String,
    },
    CleanupFailed {
        path: String,
        error: String,
    },
}

pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: PipelineEvent);
}

/// Forwards pipeline events to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_event(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::BatchReceived { owner_id, files } => {
                info!("📦 Upload called with {} files for {}", files, owner_id)
            }
            PipelineEvent::FileStaged { file_name, size } => {
                debug!("Staged {} ({} bytes)", file_name, size)
            }
            PipelineEvent::EmptyFileSkipped { file_name } => {
                debug!("Skipping empty upload {}", file_name)
            }
            PipelineEvent::ArchiveExtracted { file_name, entries } => {
                info!("🗜️  Extracted {} entries from {}", entries, file_name)
            }
            PipelineEvent::RasterSelected { file_name, raster } => {
                info!("🗺️  Found raster {} in {}, converting", raster, file_name)
            }
            PipelineEvent::NoRasterFound { file_name } => {
                warn!("No raster found in {}", file_name)
            }
            PipelineEvent::UnsupportedInput { file_name } => {
                warn!("Unsupported upload {}", file_name)
            }
            PipelineEvent::BundleProduced {
                file_name,
                artifact_key,
                width,
                height,
            } => info!(
                "✅ Converted {} ({}x{}) into bundle {}",
                file_name, width, height, artifact_key
            ),
            PipelineEvent::ArtifactUploaded { blob } => info!("☁️  Moved to blob store: {}", blob),
            PipelineEvent::ArtifactReused { blob } => {
                debug!("Blob {} already stored, skipping upload", blob)
            }
            PipelineEvent::UploadRetry {
                blob,
                attempt,
                delay,
                error,
            } => warn!(
                "Storage call for {} failed (attempt {}): {}. Retrying in {:?}",
                blob, attempt, error, delay
            ),
            PipelineEvent::RolledBack {
                artifact_key,
                removed,
            } => warn!(
                "↩️  Rolled back bundle {} ({} blobs removed)",
                artifact_key, removed
            ),
            PipelineEvent::CatalogAppended {
                owner_id,
                artifact_key,
            } => info!("🗂️  Catalogued {} for {}", artifact_key, owner_id),
            PipelineEvent::AlreadyPublished {
                owner_id,
                artifact_key,
            } => info!(
                "Bundle {} already catalogued for {}, nothing to publish",
                artifact_key, owner_id
            ),
            PipelineEvent::FileFailed { file_name, error } => {
                error!("❌ Failed to process upload {}: {}", file_name, error)
            }
            PipelineEvent::CleanupFailed { path, error } => {
                warn!("Failed to remove working set {}: {}", path, error)
            }
        }
    }
}

/// Keeps every event in memory. Handy in tests and diagnostics endpoints.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl PipelineObserver for RecordingObserver {
    fn on_event(&self, event: PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
