use image::{DynamicImage, GrayImage, ImageFormat};
use serde::Serialize;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::error::PipelineError;
use super::types::ArtifactBundle;
use crate::services::observer::{PipelineEvent, PipelineObserver};
use crate::services::raster::{DecodedRaster, GeoBounds, RasterDecoder, Resolution};
use crate::utils::hash::calculate_file_hash;

pub const SAMPLE_FORMAT: &str = "f32le";
pub const GRID_ORIGIN: &str = "top-left";

/// Contents of `<key>.json`.
///
/// Cell `(row, col)` of the `.dat` grid covers
/// `x = bounds.min_x + col * resolution.x`, `y = bounds.max_y - row * resolution.y`.
#[derive(Debug, Clone, Serialize)]
pub struct HeightmapMetadata {
    pub artifact_key: String,
    pub width: u32,
    pub height: u32,
    pub bounds: GeoBounds,
    pub resolution: Resolution,
    pub min_elevation: Option<f32>,
    pub max_elevation: Option<f32>,
    pub no_data: Option<f32>,
    pub sample_format: &'static str,
    pub origin: &'static str,
}

/// Turns one raster into an [`ArtifactBundle`]. Blocking.
#[derive(Clone)]
pub struct HeightmapConverter {
    decoder: Arc<dyn RasterDecoder>,
    thumbnail_size: u32,
    observer: Arc<dyn PipelineObserver>,
}

impl HeightmapConverter {
    pub fn new(
        decoder: Arc<dyn RasterDecoder>,
        thumbnail_size: u32,
        observer: Arc<dyn PipelineObserver>,
    ) -> Self {
        Self {
            decoder,
            thumbnail_size,
            observer,
        }
    }

    /// Decodes `raster` and writes `<key>.dat`, `<key>.json` and `<key>.png`
    /// into `output_dir`, which must not exist yet.
    ///
    /// Either all three files exist afterwards or none do.
    pub fn convert(
        &self,
        file_name: &str,
        raster: &Path,
        output_dir: &Path,
    ) -> Result<ArtifactBundle, PipelineError> {
        let artifact_key = calculate_file_hash(raster)
            .map_err(|e| PipelineError::Conversion(format!("Failed to hash raster: {}", e)))?;
        let decoded = self.decoder.decode(raster)?;

        let binary = encode_grid(&decoded);
        let metadata = serde_json::to_vec_pretty(&build_metadata(&artifact_key, &decoded))
            .map_err(|e| PipelineError::Conversion(format!("Failed to encode metadata: {}", e)))?;
        let thumbnail = encode_preview(&decoded, self.thumbnail_size)?;

        fs::create_dir(output_dir).map_err(|e| {
            PipelineError::Conversion(format!("Failed to create artifact directory: {}", e))
        })?;
        let bundle = ArtifactBundle::in_dir(output_dir, &artifact_key);
        write_all_or_nothing(&[
            (&bundle.binary_path, &binary),
            (&bundle.metadata_path, &metadata),
            (&bundle.thumbnail_path, &thumbnail),
        ])?;

        self.observer.on_event(PipelineEvent::BundleProduced {
            file_name: file_name.to_string(),
            artifact_key,
            width: decoded.width,
            height: decoded.height,
        });

        Ok(bundle)
    }
}

fn write_all_or_nothing(files: &[(&PathBuf, &Vec<u8>)]) -> Result<(), PipelineError> {
    for (i, (path, data)) in files.iter().enumerate() {
        if let Err(e) = fs::write(path, data) {
            for (written, _) in &files[..=i] {
                let _ = fs::remove_file(written);
            }
            return Err(PipelineError::Conversion(format!(
                "Failed to write {}: {}",
                path.display(),
                e
            )));
        }
    }
    Ok(())
}

fn build_metadata(artifact_key: &str, raster: &DecodedRaster) -> HeightmapMetadata {
    let range = raster.elevation_range();
    HeightmapMetadata {
        artifact_key: artifact_key.to_string(),
        width: raster.width,
        height: raster.height,
        bounds: raster.bounds,
        resolution: raster.resolution,
        min_elevation: range.map(|(lo, _)| lo),
        max_elevation: range.map(|(_, hi)| hi),
        no_data: raster.no_data,
        sample_format: SAMPLE_FORMAT,
        origin: GRID_ORIGIN,
    }
}

/// Little-endian f32 samples, row-major from the top-left corner.
pub fn encode_grid(raster: &DecodedRaster) -> Vec<u8> {
    let mut out = Vec::with_capacity(raster.samples.len() * 4);
    for sample in &raster.samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Elevation mapped onto 0..=255, no-data as 0. A flat raster is mid gray.
pub fn normalize(raster: &DecodedRaster) -> Vec<u8> {
    let range = raster.elevation_range();
    raster
        .samples
        .iter()
        .map(|&v| {
            if raster.is_no_data(v) {
                return 0;
            }
            match range {
                Some((lo, hi)) if hi > lo => (((v - lo) / (hi - lo)) * 255.0).round() as u8,
                _ => 128,
            }
        })
        .collect()
}

fn encode_preview(raster: &DecodedRaster, max_size: u32) -> Result<Vec<u8>, PipelineError> {
    let gray = GrayImage::from_raw(raster.width, raster.height, normalize(raster))
        .ok_or_else(|| PipelineError::Conversion("Sample count does not match size".into()))?;
    let mut image = DynamicImage::ImageLuma8(gray);

    if raster.width > max_size || raster.height > max_size {
        image = image.thumbnail(max_size, max_size);
    }

    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| PipelineError::Conversion(format!("Failed to encode preview: {}", e)))?;
    Ok(buf.into_inner())
}
