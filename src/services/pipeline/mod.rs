//! Upload ingestion and conversion.
//!
//! Every submitted file runs through the same stages inside its own
//! [`WorkingSet`]:
//!
//! 1. [`UploadReceiver`] stages the bytes on disk.
//! 2. [`ArchiveExtractor`] unpacks zip uploads.
//! 3. [`RasterLocator`] picks the raster to convert.
//! 4. [`HeightmapConverter`] produces the `.dat`/`.json`/`.png` bundle.
//! 5. [`ArtifactPublisher`] stores the bundle and records it in the catalog.
//!
//! Files never affect each other: each one ends in its own [`FileOutcome`].

pub mod archive;
pub mod converter;
pub mod error;
pub mod locator;
pub mod publisher;
pub mod staging;
pub mod types;

pub use archive::ArchiveExtractor;
pub use converter::{HeightmapConverter, HeightmapMetadata};
pub use error::PipelineError;
pub use locator::RasterLocator;
pub use publisher::{ArtifactPublisher, PublishReceipt};
pub use staging::{UploadReceiver, WorkingSet};
pub use types::{
    ArtifactBundle, BatchResult, ConversionOutcome, FileOutcome, StagedUpload, UploadedFile,
};

use futures::StreamExt;
use std::path::Path;
use std::sync::Arc;

use crate::config::{NonArchivePolicy, PipelineConfig};
use crate::services::catalog::ProjectCatalog;
use crate::services::observer::{PipelineEvent, PipelineObserver};
use crate::services::raster::RasterDecoder;
use crate::services::storage::StorageService;
use crate::utils::validation::is_archive_name;

/// What the blocking half of a file's processing produced.
enum Prepared {
    Bundle(ArtifactBundle),
    NoRasterFound,
    UnsupportedInput,
}

pub struct ConversionPipeline {
    config: PipelineConfig,
    receiver: UploadReceiver,
    extractor: ArchiveExtractor,
    locator: RasterLocator,
    converter: HeightmapConverter,
    publisher: ArtifactPublisher,
    observer: Arc<dyn PipelineObserver>,
}

impl ConversionPipeline {
    pub fn new(
        config: PipelineConfig,
        storage: Arc<dyn StorageService>,
        catalog: Arc<dyn ProjectCatalog>,
        decoder: Arc<dyn RasterDecoder>,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            receiver: UploadReceiver::new(
                config.work_dir.clone(),
                config.max_file_size,
                observer.clone(),
            ),
            extractor: ArchiveExtractor::new(config.max_extracted_size, observer.clone()),
            locator: RasterLocator::new(config.raster_extensions.clone()),
            converter: HeightmapConverter::new(decoder, config.thumbnail_size, observer.clone()),
            publisher: ArtifactPublisher::new(
                storage,
                catalog,
                config.upload_retry.clone(),
                observer.clone(),
            ),
            observer,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Stages streamed uploads; see [`ConversionPipeline::process_batch`].
    pub fn receiver(&self) -> &UploadReceiver {
        &self.receiver
    }

    /// Processes files already held in memory.
    pub async fn ingest(&self, owner_id: &str, files: Vec<UploadedFile>) -> BatchResult {
        let mut staged = Vec::with_capacity(files.len());
        for file in files {
            if file.is_empty() {
                self.observer.on_event(PipelineEvent::EmptyFileSkipped {
                    file_name: file.file_name,
                });
                continue;
            }
            match self.receiver.stage(&file.file_name, file.data.as_ref()).await {
                Ok(Some(upload)) => staged.push(Ok(upload)),
                Ok(None) => {}
                Err(e) => staged.push(Err(self.failure(&file.file_name, e))),
            }
        }
        self.process_batch(owner_id, staged).await
    }

    /// Builds the outcome for a file that failed before it could be processed.
    pub fn failure(&self, file_name: &str, error: PipelineError) -> FileOutcome {
        self.observer.on_event(PipelineEvent::FileFailed {
            file_name: file_name.to_string(),
            error: error.to_string(),
        });
        FileOutcome::Failure {
            name: file_name.to_string(),
            error,
        }
    }

    /// Processes staged uploads concurrently, keeping submission order.
    ///
    /// `Err` entries are files that already failed while staging; they are
    /// passed through so the result lists every submitted file.
    pub async fn process_batch(
        &self,
        owner_id: &str,
        staged: Vec<Result<StagedUpload, FileOutcome>>,
    ) -> BatchResult {
        self.observer.on_event(PipelineEvent::BatchReceived {
            owner_id: owner_id.to_string(),
            files: staged.len(),
        });

        let outcomes = futures::stream::iter(staged)
            .map(|item| async move {
                match item {
                    Ok(upload) => self.process_upload(owner_id, upload).await,
                    Err(outcome) => outcome,
                }
            })
            .buffered(self.config.max_concurrent_files.max(1))
            .collect::<Vec<_>>()
            .await;

        BatchResult { outcomes }
    }

    /// Runs one staged upload to completion and deletes its working set.
    pub async fn process_upload(&self, owner_id: &str, upload: StagedUpload) -> FileOutcome {
        let name = upload.source_name.clone();

        let outcome = match self.convert_and_publish(owner_id, &upload).await {
            Ok(outcome) => FileOutcome::Success { name, outcome },
            Err(error) => self.failure(&name, error),
        };

        let StagedUpload { working_set, .. } = upload;
        self.discard(working_set).await;

        outcome
    }

    /// Removes a working set on the blocking pool; extracted trees can be large.
    async fn discard(&self, working_set: WorkingSet) {
        let path = working_set.path().display().to_string();
        let result = match tokio::task::spawn_blocking(move || working_set.close()).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(e) => Err(format!("Cleanup task failed: {}", e)),
        };
        if let Err(error) = result {
            self.observer
                .on_event(PipelineEvent::CleanupFailed { path, error });
        }
    }

    async fn convert_and_publish(
        &self,
        owner_id: &str,
        upload: &StagedUpload,
    ) -> Result<ConversionOutcome, PipelineError> {
        let file_name = upload.source_name.as_str();

        match self.prepare(upload).await? {
            Prepared::NoRasterFound => {
                self.observer.on_event(PipelineEvent::NoRasterFound {
                    file_name: file_name.to_string(),
                });
                Ok(ConversionOutcome::NoRasterFound)
            }
            Prepared::UnsupportedInput => {
                self.observer.on_event(PipelineEvent::UnsupportedInput {
                    file_name: file_name.to_string(),
                });
                Ok(ConversionOutcome::UnsupportedInput)
            }
            Prepared::Bundle(bundle) => {
                let receipt = self.publisher.publish(owner_id, file_name, &bundle).await?;
                let artifact_key = bundle.artifact_key;
                Ok(match receipt {
                    PublishReceipt::Published => ConversionOutcome::Converted { artifact_key },
                    PublishReceipt::AlreadyPublished => {
                        ConversionOutcome::AlreadyPublished { artifact_key }
                    }
                })
            }
        }
    }

    /// Extraction, location and conversion, on the blocking pool and bounded
    /// by `conversion_timeout`. Publishing happens outside the timeout so a
    /// started publish always finishes or rolls back.
    async fn prepare(&self, upload: &StagedUpload) -> Result<Prepared, PipelineError> {
        let extractor = self.extractor.clone();
        let locator = self.locator.clone();
        let converter = self.converter.clone();
        let observer = self.observer.clone();
        let policy = self.config.non_archive_policy;

        let file_name = upload.source_name.clone();
        let staged_path = upload.path.clone();
        let extraction_dir = upload.working_set.extraction_dir();
        let artifacts_dir = upload.working_set.artifacts_dir();

        let task = tokio::task::spawn_blocking(move || -> Result<Prepared, PipelineError> {
            let raster = if is_archive_name(&file_name) {
                extractor.extract(&file_name, &staged_path, &extraction_dir)?;
                match locator.locate(&extraction_dir)? {
                    Some(raster) => raster,
                    None => return Ok(Prepared::NoRasterFound),
                }
            } else {
                match policy {
                    NonArchivePolicy::DirectRaster if locator.accepts(&file_name) => {
                        staged_path.clone()
                    }
                    _ => return Ok(Prepared::UnsupportedInput),
                }
            };

            observer.on_event(PipelineEvent::RasterSelected {
                file_name: file_name.clone(),
                raster: display_name_of(&raster, &staged_path, &file_name),
            });

            converter
                .convert(&file_name, &raster, &artifacts_dir)
                .map(Prepared::Bundle)
        });

        match tokio::time::timeout(self.config.conversion_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(PipelineError::Internal(format!("Conversion task failed: {}", e))),
            Err(_) => Err(PipelineError::Timeout(self.config.conversion_timeout)),
        }
    }
}

/// The staged file has a generated name, so report the declared one instead.
fn display_name_of(raster: &Path, staged_path: &Path, file_name: &str) -> String {
    if raster == staged_path {
        return file_name.to_string();
    }
    raster
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::catalog::{CatalogEntry, CatalogRecord};
    use crate::services::observer::RecordingObserver;
    use crate::services::raster::GeoTiffDecoder;
    use async_trait::async_trait;

    struct NoStorage;

    #[async_trait]
    impl StorageService for NoStorage {
        async fn upload_file(&self, _key: &str, _data: Vec<u8>) -> anyhow::Result<()> {
            anyhow::bail!("unused")
        }

        async fn delete_file(&self, _key: &str) -> anyhow::Result<()> {
            anyhow::bail!("unused")
        }

        async fn file_exists(&self, _key: &str) -> anyhow::Result<bool> {
            anyhow::bail!("unused")
        }
    }

    struct NoCatalog;

    #[async_trait]
    impl ProjectCatalog for NoCatalog {
        async fn append(&self, _record: CatalogRecord) -> anyhow::Result<bool> {
            anyhow::bail!("unused")
        }

        async fn contains(&self, _owner_id: &str, _artifact_key: &str) -> anyhow::Result<bool> {
            anyhow::bail!("unused")
        }

        async fn list(&self, _owner_id: &str) -> anyhow::Result<Vec<CatalogEntry>> {
            anyhow::bail!("unused")
        }
    }

    fn pipeline() -> (ConversionPipeline, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::new());
        let pipeline = ConversionPipeline::new(
            PipelineConfig::development(),
            Arc::new(NoStorage),
            Arc::new(NoCatalog),
            Arc::new(GeoTiffDecoder::default()),
            observer.clone(),
        );
        (pipeline, observer)
    }

    #[tokio::test]
    async fn test_discard_removes_extracted_tree() {
        let root = tempfile::tempdir().unwrap();
        let working_set = WorkingSet::create(Some(root.path())).unwrap();
        let nested = working_set.extraction_dir().join("a/b/c");
        std::fs::create_dir_all(&nested).unwrap();
        for i in 0..50 {
            std::fs::write(nested.join(format!("{}.bin", i)), vec![0u8; 1024]).unwrap();
        }
        let path = working_set.path().to_path_buf();

        let (pipeline, observer) = pipeline();
        pipeline.discard(working_set).await;

        assert!(!path.exists());
        assert!(observer.events().is_empty());
    }

    #[tokio::test]
    async fn test_discard_reports_cleanup_failure() {
        let root = tempfile::tempdir().unwrap();
        let working_set = WorkingSet::create(Some(root.path())).unwrap();
        std::fs::remove_dir_all(working_set.path()).unwrap();

        let (pipeline, observer) = pipeline();
        pipeline.discard(working_set).await;

        let events = observer.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], PipelineEvent::CleanupFailed { .. }));
    }

    #[test]
    fn test_display_name_prefers_declared_name_for_direct_rasters() {
        let staged = Path::new("/tmp/ws/upload-1");
        assert_eq!(display_name_of(staged, staged, "dem.tif"), "dem.tif");
        assert_eq!(
            display_name_of(Path::new("/tmp/ws/extracted/a/b.tif"), staged, "x.zip"),
            "b.tif"
        );
    }
}
