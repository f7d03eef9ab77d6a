use std::fs;
use std::path::{Path, PathBuf};

use super::error::PipelineError;
use crate::utils::validation::extension_of;

/// macOS zip metadata, never real rasters.
const MACOS_METADATA_DIR: &str = "__MACOSX";
const RESOURCE_FORK_PREFIX: &str = "._";

/// Finds the raster to convert inside an extracted archive.
#[derive(Debug, Clone)]
pub struct RasterLocator {
    extensions: Vec<String>,
}

impl RasterLocator {
    /// `extensions` are lowercase, without the leading dot.
    pub fn new(extensions: Vec<String>) -> Self {
        Self { extensions }
    }

    pub fn accepts(&self, name: &str) -> bool {
        extension_of(name).is_some_and(|ext| self.extensions.contains(&ext))
    }

    /// Returns the first regular file under `dir` with an accepted extension.
    ///
    /// Nested directories are searched. Which match is "first" depends on
    /// directory enumeration order and is not stable across filesystems.
    pub fn locate(&self, dir: &Path) -> Result<Option<PathBuf>, PipelineError> {
        let mut pending = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            for entry in fs::read_dir(&current).map_err(scan_error)? {
                let entry = entry.map_err(scan_error)?;
                let name = entry.file_name();
                let name = name.to_string_lossy();
                let file_type = entry.file_type().map_err(scan_error)?;

                if file_type.is_dir() {
                    if name != MACOS_METADATA_DIR {
                        pending.push(entry.path());
                    }
                } else if file_type.is_file()
                    && !name.starts_with(RESOURCE_FORK_PREFIX)
                    && self.accepts(&name)
                {
                    return Ok(Some(entry.path()));
                }
            }
        }

        Ok(None)
    }
}

fn scan_error(e: std::io::Error) -> PipelineError {
    PipelineError::Extraction(format!("Failed to scan extracted files: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locator() -> RasterLocator {
        RasterLocator::new(vec!["tif".to_string(), "tiff".to_string()])
    }

    #[test]
    fn test_finds_raster_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme.txt"), b"x").unwrap();
        fs::write(dir.path().join("TERRAIN.TIFF"), b"x").unwrap();

        let found = locator().locate(dir.path()).unwrap().unwrap();
        assert_eq!(found.file_name().unwrap(), "TERRAIN.TIFF");
    }

    #[test]
    fn test_searches_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/dem.tif"), b"x").unwrap();

        let found = locator().locate(dir.path()).unwrap().unwrap();
        assert!(found.ends_with("a/b/dem.tif"));
    }

    #[test]
    fn test_skips_macos_metadata() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("__MACOSX")).unwrap();
        fs::write(dir.path().join("__MACOSX/dem.tif"), b"x").unwrap();
        fs::write(dir.path().join("._dem.tif"), b"x").unwrap();

        assert_eq!(locator().locate(dir.path()).unwrap(), None);
    }

    #[test]
    fn test_no_match_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::create_dir(dir.path().join("tif")).unwrap();

        assert_eq!(locator().locate(dir.path()).unwrap(), None);
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = locator().locate(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, PipelineError::Extraction(_)));
    }
}
