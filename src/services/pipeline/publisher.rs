use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::error::PipelineError;
use super::types::ArtifactBundle;
use crate::services::catalog::{CatalogRecord, ProjectCatalog};
use crate::services::observer::{PipelineEvent, PipelineObserver};
use crate::services::storage::StorageService;
use crate::utils::keyed_mutex::KeyedMutex;
use crate::utils::retry::{RetryConfig, retry_with_backoff};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishReceipt {
    /// Blobs are stored and a new catalog record exists.
    Published,
    /// The owner already had this bundle catalogued.
    AlreadyPublished,
}

/// Moves a bundle into the blob store and records it in the catalog.
///
/// A publish either ends with all three blobs stored and one catalog record,
/// or with neither: blobs written by a failed publish are deleted again.
/// Blobs that were already stored beforehand are never touched.
#[derive(Clone)]
pub struct ArtifactPublisher {
    storage: Arc<dyn StorageService>,
    catalog: Arc<dyn ProjectCatalog>,
    retry: RetryConfig,
    locks: KeyedMutex,
    observer: Arc<dyn PipelineObserver>,
}

impl ArtifactPublisher {
    pub fn new(
        storage: Arc<dyn StorageService>,
        catalog: Arc<dyn ProjectCatalog>,
        retry: RetryConfig,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            storage,
            catalog,
            retry,
            locks: KeyedMutex::new(),
            observer,
        }
    }

    pub async fn publish(
        &self,
        owner_id: &str,
        display_name: &str,
        bundle: &ArtifactBundle,
    ) -> Result<PublishReceipt, PipelineError> {
        let guard = self.locks.lock(&bundle.artifact_key).await;
        let result = self.publish_locked(owner_id, display_name, bundle).await;
        drop(guard);
        self.locks.cleanup();
        result
    }

    async fn publish_locked(
        &self,
        owner_id: &str,
        display_name: &str,
        bundle: &ArtifactBundle,
    ) -> Result<PublishReceipt, PipelineError> {
        let key = &bundle.artifact_key;

        let catalogued = retry_with_backoff(
            &self.retry,
            || self.catalog.contains(owner_id, key),
            self.report_retry("catalog"),
        )
        .await
        .map_err(|e| PipelineError::Publish(format!("Catalog unavailable: {}", e)))?;

        if catalogued {
            self.observer.on_event(PipelineEvent::AlreadyPublished {
                owner_id: owner_id.to_string(),
                artifact_key: key.clone(),
            });
            return Ok(PublishReceipt::AlreadyPublished);
        }

        let mut uploaded = Vec::new();
        let result = self
            .store_and_record(owner_id, display_name, bundle, &mut uploaded)
            .await;

        if result.is_err() {
            self.rollback(key, &uploaded).await;
        }
        result
    }

    async fn store_and_record(
        &self,
        owner_id: &str,
        display_name: &str,
        bundle: &ArtifactBundle,
        uploaded: &mut Vec<String>,
    ) -> Result<PublishReceipt, PipelineError> {
        for (blob, path) in bundle.blob_names().into_iter().zip(bundle.paths()) {
            if self.store_blob(&blob, path).await? {
                uploaded.push(blob);
            }
        }

        let record = CatalogRecord {
            owner_id: owner_id.to_string(),
            display_name: display_name.to_string(),
            artifact_key: bundle.artifact_key.clone(),
        };
        let appended = retry_with_backoff(
            &self.retry,
            || self.catalog.append(record.clone()),
            self.report_retry("catalog"),
        )
        .await
        .map_err(|e| PipelineError::Publish(format!("Failed to record project: {}", e)))?;

        if appended {
            self.observer.on_event(PipelineEvent::CatalogAppended {
                owner_id: owner_id.to_string(),
                artifact_key: bundle.artifact_key.clone(),
            });
            Ok(PublishReceipt::Published)
        } else {
            // Another writer recorded the same bundle first; its record uses these blobs.
            self.observer.on_event(PipelineEvent::AlreadyPublished {
                owner_id: owner_id.to_string(),
                artifact_key: bundle.artifact_key.clone(),
            });
            Ok(PublishReceipt::AlreadyPublished)
        }
    }

    /// Uploads `path` as `blob` unless the store already holds it.
    /// Returns whether this call wrote the blob.
    async fn store_blob(&self, blob: &str, path: &Path) -> Result<bool, PipelineError> {
        let exists = retry_with_backoff(
            &self.retry,
            || self.storage.file_exists(blob),
            self.report_retry(blob),
        )
        .await
        .map_err(|e| PipelineError::Publish(format!("Storage unavailable: {}", e)))?;

        if exists {
            self.observer.on_event(PipelineEvent::ArtifactReused {
                blob: blob.to_string(),
            });
            return Ok(false);
        }

        retry_with_backoff(
            &self.retry,
            || self.storage.upload_from_path(blob, path),
            self.report_retry(blob),
        )
        .await
        .map_err(|e| PipelineError::Publish(format!("Failed to upload {}: {}", blob, e)))?;

        self.observer.on_event(PipelineEvent::ArtifactUploaded {
            blob: blob.to_string(),
        });
        Ok(true)
    }

    async fn rollback(&self, artifact_key: &str, uploaded: &[String]) {
        let mut removed = 0;
        for blob in uploaded {
            let deleted = retry_with_backoff(
                &self.retry,
                || self.storage.delete_file(blob),
                self.report_retry(blob),
            )
            .await;
            if deleted.is_ok() {
                removed += 1;
            }
        }

        self.observer.on_event(PipelineEvent::RolledBack {
            artifact_key: artifact_key.to_string(),
            removed,
        });
    }

    fn report_retry<'a>(&'a self, target: &'a str) -> impl FnMut(u32, &anyhow::Error, Duration) + 'a {
        move |attempt, error, delay| {
            self.observer.on_event(PipelineEvent::UploadRetry {
                blob: target.to_string(),
                attempt,
                delay,
                error: error.to_string(),
            })
        }
    }
}
