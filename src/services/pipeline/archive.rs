use std::fs;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use super::error::PipelineError;
use crate::services::observer::{PipelineEvent, PipelineObserver};

/// Unpacks zip archives into a directory. Blocking; run on the blocking pool.
#[derive(Clone)]
pub struct ArchiveExtractor {
    /// Budget for the inflated size of all entries of one archive
    max_extracted_size: u64,
    observer: Arc<dyn PipelineObserver>,
}

impl ArchiveExtractor {
    pub fn new(max_extracted_size: u64, observer: Arc<dyn PipelineObserver>) -> Self {
        Self {
            max_extracted_size,
            observer,
        }
    }

    /// Extracts every entry of `archive` into `dest`, which must not exist yet.
    ///
    /// Returns the number of regular files written. On failure `dest` is
    /// removed again, so callers never see a half-extracted tree.
    pub fn extract(
        &self,
        file_name: &str,
        archive: &Path,
        dest: &Path,
    ) -> Result<usize, PipelineError> {
        // Fails if the working set is gone, e.g. after a timeout.
        fs::create_dir(dest).map_err(|e| io_error("create extraction directory", e))?;

        match self.unpack(archive, dest) {
            Ok(entries) => {
                self.observer.on_event(PipelineEvent::ArchiveExtracted {
                    file_name: file_name.to_string(),
                    entries,
                });
                Ok(entries)
            }
            Err(e) => {
                let _ = fs::remove_dir_all(dest);
                Err(e)
            }
        }
    }

    fn unpack(&self, archive: &Path, dest: &Path) -> Result<usize, PipelineError> {
        let file = fs::File::open(archive).map_err(|e| io_error("open archive", e))?;
        let mut zip = zip::ZipArchive::new(BufReader::new(file))
            .map_err(|e| PipelineError::Extraction(format!("Failed to parse ZIP: {}", e)))?;

        let mut remaining = self.max_extracted_size;
        let mut written = 0;
        for i in 0..zip.len() {
            let entry = zip
                .by_index(i)
                .map_err(|e| PipelineError::Extraction(format!("Failed to read entry: {}", e)))?;

            // Absolute paths and `..` components are refused
            let relative = entry.enclosed_name().map(Path::to_path_buf).ok_or_else(|| {
                PipelineError::Extraction(format!("Unsafe entry path: {}", entry.name()))
            })?;
            let target = dest.join(&relative);

            if entry.is_dir() {
                create_within(dest, &relative).map_err(|e| io_error("create directory", e))?;
                continue;
            }

            // Declared sizes are checked up front, actual sizes while inflating
            if entry.size() > remaining {
                return Err(self.too_large());
            }

            if let Some(parent) = relative.parent() {
                create_within(dest, parent).map_err(|e| io_error("create directory", e))?;
            }
            let name = entry.name().to_string();
            let mut out = fs::File::create(&target).map_err(|e| io_error("create file", e))?;
            let copied = io::copy(&mut entry.take(remaining + 1), &mut out).map_err(|e| {
                PipelineError::Extraction(format!("Failed to inflate {}: {}", name, e))
            })?;
            if copied > remaining {
                return Err(self.too_large());
            }
            remaining -= copied;
            written += 1;
        }

        Ok(written)
    }

    fn too_large(&self) -> PipelineError {
        PipelineError::Extraction(format!(
            "Archive contents exceed the {} byte limit",
            self.max_extracted_size
        ))
    }
}

fn io_error(action: &str, e: io::Error) -> PipelineError {
    PipelineError::Extraction(format!("Failed to {}: {}", action, e))
}

/// Creates `relative` below `root` one level at a time. Unlike
/// `create_dir_all` this never recreates `root` itself.
fn create_within(root: &Path, relative: &Path) -> io::Result<()> {
    let mut current = root.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::create_dir(&current) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
