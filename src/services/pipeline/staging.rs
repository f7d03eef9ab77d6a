use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

use super::error::PipelineError;
use super::types::StagedUpload;
use crate::services::observer::{PipelineEvent, PipelineObserver};
use crate::utils::validation::sanitize_filename;

const EXTRACTED_DIR: &str = "extracted";
const ARTIFACTS_DIR: &str = "artifacts";

/// Request scoped scratch directory. Removed from disk when dropped.
#[derive(Debug)]
pub struct WorkingSet {
    dir: TempDir,
}

impl WorkingSet {
    /// Creates a uniquely named directory under `parent` (or the system temp dir).
    pub fn create(parent: Option<&Path>) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("terrainflow-");
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent)?,
            None => builder.tempdir()?,
        };
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Where archive entries are unpacked. Not created up front.
    pub fn extraction_dir(&self) -> PathBuf {
        self.dir.path().join(EXTRACTED_DIR)
    }

    /// Where the artifact bundle is written. Not created up front.
    pub fn artifacts_dir(&self) -> PathBuf {
        self.dir.path().join(ARTIFACTS_DIR)
    }

    /// Removes the directory now, reporting any failure.
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// Writes submitted files into fresh working sets.
#[derive(Clone)]
pub struct UploadReceiver {
    work_dir: Option<PathBuf>,
    max_file_size: usize,
    observer: Arc<dyn PipelineObserver>,
}

impl UploadReceiver {
    pub fn new(
        work_dir: Option<PathBuf>,
        max_file_size: usize,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            work_dir,
            max_file_size,
            observer,
        }
    }

    /// Streams one submitted file to disk.
    ///
    /// Returns `Ok(None)` for zero-length files, which are skipped. On any
    /// error the working set is already gone when this returns.
    pub async fn stage<R>(
        &self,
        file_name: &str,
        reader: R,
    ) -> Result<Option<StagedUpload>, PipelineError>
    where
        R: AsyncRead + Unpin,
    {
        let source_name = sanitize_filename(file_name)
            .map_err(|e| PipelineError::InvalidFileName(e.to_string()))?;

        let working_set = WorkingSet::create(self.work_dir.as_deref())?;
        let path = working_set.path().join(format!("upload-{}", Uuid::new_v4()));

        let mut file = tokio::fs::File::create(&path).await?;
        let mut limited = reader.take(self.max_file_size as u64 + 1);
        let size = tokio::io::copy(&mut limited, &mut file).await?;
        file.flush().await?;
        drop(file);

        if size > self.max_file_size as u64 {
            return Err(PipelineError::TooLarge {
                limit: self.max_file_size,
            });
        }

        if size == 0 {
            self.observer.on_event(PipelineEvent::EmptyFileSkipped {
                file_name: source_name,
            });
            return Ok(None);
        }

        self.observer.on_event(PipelineEvent::FileStaged {
            file_name: source_name.clone(),
            size,
        });

        Ok(Some(StagedUpload {
            working_set,
            source_name,
            path,
            size,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::observer::RecordingObserver;

    fn receiver(root: &Path, limit: usize) -> (UploadReceiver, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::new());
        (
            UploadReceiver::new(Some(root.to_path_buf()), limit, observer.clone()),
            observer,
        )
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_stages_into_unique_working_sets() {
        let root = tempfile::tempdir().unwrap();
        let (receiver, _) = receiver(root.path(), 1024);

        let a = receiver.stage("a.zip", &b"first"[..]).await.unwrap().unwrap();
        let b = receiver.stage("a.zip", &b"second"[..]).await.unwrap().unwrap();

        assert_ne!(a.working_dir(), b.working_dir());
        assert_eq!(std::fs::read(&a.path).unwrap(), b"first");
        assert_eq!(b.size, 6);
        assert_eq!(entries(root.path()), 2);

        drop(a);
        drop(b);
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_empty_file_is_skipped_and_cleaned() {
        let root = tempfile::tempdir().unwrap();
        let (receiver, observer) = receiver(root.path(), 1024);

        let staged = receiver.stage("empty.zip", &b""[..]).await.unwrap();
        assert!(staged.is_none());
        assert_eq!(entries(root.path()), 0);
        assert!(matches!(
            observer.events()[0],
            PipelineEvent::EmptyFileSkipped { .. }
        ));
    }

    #[tokio::test]
    async fn test_oversized_file_is_rejected_and_cleaned() {
        let root = tempfile::tempdir().unwrap();
        let (receiver, _) = receiver(root.path(), 4);

        let err = receiver.stage("big.zip", &b"12345"[..]).await.unwrap_err();
        assert!(matches!(err, PipelineError::TooLarge { limit: 4 }));
        assert_eq!(entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_declared_name_is_sanitized() {
        let root = tempfile::tempdir().unwrap();
        let (receiver, _) = receiver(root.path(), 1024);

        let staged = receiver
            .stage("C:\\maps\\terrain.zip", &b"x"[..])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(staged.source_name, "terrain.zip");

        let err = receiver.stage(".hidden", &b"x"[..]).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidFileName(_)));
    }

    #[test]
    fn test_working_set_close_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let set = WorkingSet::create(Some(root.path())).unwrap();
        std::fs::create_dir(set.extraction_dir()).unwrap();
        std::fs::write(set.extraction_dir().join("x.tif"), b"x").unwrap();

        let path = set.path().to_path_buf();
        set.close().unwrap();
        assert!(!path.exists());
    }
}
