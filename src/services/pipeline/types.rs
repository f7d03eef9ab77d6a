use bytes::Bytes;
use std::path::{Path, PathBuf};

use super::error::PipelineError;
use super::staging::WorkingSet;

/// A file as submitted by the client, held in memory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// An upload written to disk inside its own working set.
///
/// Dropping it removes the working set and everything extracted or produced
/// inside it.
#[derive(Debug)]
pub struct StagedUpload {
    pub(crate) working_set: WorkingSet,
    pub source_name: String,
    pub path: PathBuf,
    pub size: u64,
}

impl StagedUpload {
    pub fn working_dir(&self) -> &Path {
        self.working_set.path()
    }
}

pub const BINARY_EXTENSION: &str = "dat";
pub const METADATA_EXTENSION: &str = "json";
pub const THUMBNAIL_EXTENSION: &str = "png";

/// The three artifacts produced from one raster. They share `artifact_key`
/// and differ only by extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactBundle {
    pub artifact_key: String,
    pub binary_path: PathBuf,
    pub metadata_path: PathBuf,
    pub thumbnail_path: PathBuf,
}

impl ArtifactBundle {
    pub fn in_dir(dir: &Path, artifact_key: &str) -> Self {
        Self {
            artifact_key: artifact_key.to_string(),
            binary_path: dir.join(format!("{}.{}", artifact_key, BINARY_EXTENSION)),
            metadata_path: dir.join(format!("{}.{}", artifact_key, METADATA_EXTENSION)),
            thumbnail_path: dir.join(format!("{}.{}", artifact_key, THUMBNAIL_EXTENSION)),
        }
    }

    pub fn paths(&self) -> [&Path; 3] {
        [&self.binary_path, &self.metadata_path, &self.thumbnail_path]
    }

    /// Blob names are the file names: `<key>.dat`, `<key>.json`, `<key>.png`.
    pub fn blob_names(&self) -> [String; 3] {
        [BINARY_EXTENSION, METADATA_EXTENSION, THUMBNAIL_EXTENSION]
            .map(|ext| format!("{}.{}", self.artifact_key, ext))
    }
}

/// Result of running one file through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// A bundle was published and catalogued.
    Converted { artifact_key: String },
    /// Identical content was already catalogued for this owner; nothing written.
    AlreadyPublished { artifact_key: String },
    /// The archive held no file with an accepted raster extension.
    NoRasterFound,
    /// The upload is neither an archive nor an accepted direct raster.
    UnsupportedInput,
}

impl ConversionOutcome {
    pub fn artifact_key(&self) -> Option<&str> {
        match self {
            ConversionOutcome::Converted { artifact_key }
            | ConversionOutcome::AlreadyPublished { artifact_key } => Some(artifact_key),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum FileOutcome {
    Success {
        name: String,
        outcome: ConversionOutcome,
    },
    Failure {
        name: String,
        error: PipelineError,
    },
}

impl FileOutcome {
    /// The identifier reported back for this file: its declared name.
    pub fn name(&self) -> &str {
        match self {
            FileOutcome::Success { name, .. } | FileOutcome::Failure { name, .. } => name,
        }
    }
}

/// Per-file outcomes of one upload request, in submission order.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub outcomes: Vec<FileOutcome>,
}

impl BatchResult {
    pub fn identifiers(&self) -> Vec<String> {
        self.outcomes.iter().map(|o| o.name().to_string()).collect()
    }

    /// True when at least one file failed because storage was unavailable.
    pub fn has_service_failure(&self) -> bool {
        self.outcomes.iter().any(|o| match o {
            FileOutcome::Failure { error, .. } => error.is_service_failure(),
            FileOutcome::Success { .. } => false,
        })
    }

    pub fn artifact_keys(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                FileOutcome::Success { outcome, .. } => outcome.artifact_key(),
                FileOutcome::Failure { .. } => None,
            })
            .collect()
    }
}
