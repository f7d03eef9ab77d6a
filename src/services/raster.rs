//! Raster decoding boundary.
//!
//! The pipeline only ever sees [`DecodedRaster`]; how a file format is turned
//! into one lives behind [`RasterDecoder`]. [`GeoTiffDecoder`] handles
//! single-band GeoTIFF elevation models.

use serde::Serialize;
use std::io::{Read, Seek};
use std::path::Path;
use thiserror::Error;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;

const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_MODEL_TRANSFORMATION: u16 = 34264;
const TAG_GDAL_NODATA: u16 = 42113;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF decode error: {0}")]
    Tiff(#[from] tiff::TiffError),

    /// Georeferencing tags are missing or unusable.
    #[error("Invalid GeoTIFF: {0}")]
    InvalidGeoreference(String),

    /// Only single-band grids are supported.
    #[error("Unsupported raster layout: {0}")]
    UnsupportedLayout(String),

    #[error("Raster has no samples")]
    Empty,
}

/// Geographic extent of a raster in its native CRS units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GeoBounds {
    /// West edge.
    pub min_x: f64,
    /// South edge.
    pub min_y: f64,
    /// East edge.
    pub max_x: f64,
    /// North edge.
    pub max_y: f64,
}

/// Size of one grid cell in CRS units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Resolution {
    pub x: f64,
    pub y: f64,
}

/// A decoded elevation grid.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRaster {
    pub width: u32,
    pub height: u32,
    /// Row-major samples, north to south, west to east.
    pub samples: Vec<f32>,
    pub bounds: GeoBounds,
    pub resolution: Resolution,
    pub no_data: Option<f32>,
}

impl DecodedRaster {
    /// True when `value` is the no-data marker or not a number.
    pub fn is_no_data(&self, value: f32) -> bool {
        value.is_nan() || self.no_data.is_some_and(|nd| (value - nd).abs() < 1e-3)
    }

    /// Min and max over valid samples, `None` if every sample is no-data.
    pub fn elevation_range(&self) -> Option<(f32, f32)> {
        self.samples
            .iter()
            .copied()
            .filter(|v| !self.is_no_data(*v))
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Turns a raster file into an elevation grid. Blocking.
pub trait RasterDecoder: Send + Sync {
    fn decode(&self, path: &Path) -> Result<DecodedRaster, DecodeError>;
}

/// Decoder for single-band GeoTIFF elevation rasters.
#[derive(Debug, Clone)]
pub struct GeoTiffDecoder {
    max_buffer_size: usize,
}

impl Default for GeoTiffDecoder {
    fn default() -> Self {
        Self {
            max_buffer_size: 1024 * 1024 * 1024, // 1 GB
        }
    }
}

impl GeoTiffDecoder {
    fn read_bounds<R: Read + Seek>(
        decoder: &mut Decoder<R>,
        width: u32,
        height: u32,
    ) -> Result<(GeoBounds, Resolution), DecodeError> {
        let tiepoint = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_TIEPOINT));
        let pixel_scale = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_PIXEL_SCALE));

        let (origin_x, origin_y, scale_x, scale_y) = match (tiepoint, pixel_scale) {
            (Ok(tie), Ok(scale)) if tie.len() >= 6 && scale.len() >= 2 => {
                // Tiepoint: [i, j, k, x, y, z], raster (i, j) maps to model (x, y)
                let origin_x = tie[3] - tie[0] * scale[0];
                let origin_y = tie[4] + tie[1] * scale[1];
                (origin_x, origin_y, scale[0], scale[1])
            }
            _ => {
                let matrix = decoder
                    .get_tag_f64_vec(Tag::from_u16_exhaustive(TAG_MODEL_TRANSFORMATION))
                    .map_err(|_| {
                        DecodeError::InvalidGeoreference(
                            "no ModelTiepoint/ModelPixelScale or ModelTransformation tags"
                                .to_string(),
                        )
                    })?;
                if matrix.len() < 16 || matrix[1] != 0.0 || matrix[4] != 0.0 {
                    return Err(DecodeError::InvalidGeoreference(
                        "rotated or malformed ModelTransformation".to_string(),
                    ));
                }
                (matrix[3], matrix[7], matrix[0], -matrix[5])
            }
        };

        if !(scale_x.is_finite() && scale_y.is_finite()) || scale_x <= 0.0 || scale_y <= 0.0 {
            return Err(DecodeError::InvalidGeoreference(format!(
                "pixel scale must be positive, got ({}, {})",
                scale_x, scale_y
            )));
        }

        // Top-left corner is the origin, data goes south and east
        let bounds = GeoBounds {
            min_x: origin_x,
            max_x: origin_x + width as f64 * scale_x,
            max_y: origin_y,
            min_y: origin_y - height as f64 * scale_y,
        };

        Ok((
            bounds,
            Resolution {
                x: scale_x,
                y: scale_y,
            },
        ))
    }

    fn decode_samples<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Vec<f32>, DecodeError> {
        let result = decoder.read_image()?;

        Ok(match result {
            DecodingResult::F32(data) => data,
            DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
            DecodingResult::I16(data) => data.into_iter().map(|v| v as f32).collect(),
            DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
            DecodingResult::U16(data) => data.into_iter().map(|v| v as f32).collect(),
            DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
            DecodingResult::U8(data) => data.into_iter().map(|v| v as f32).collect(),
            DecodingResult::I8(data) => data.into_iter().map(|v| v as f32).collect(),
            DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
            DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
        })
    }

    /// GDAL_NODATA is stored as an ASCII string.
    fn read_no_data<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f32> {
        decoder
            .get_tag_ascii_string(Tag::from_u16_exhaustive(TAG_GDAL_NODATA))
            .ok()
            .and_then(|s| s.trim_matches('\0').trim().parse().ok())
    }
}

impl RasterDecoder for GeoTiffDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedRaster, DecodeError> {
        let file = std::fs::File::open(path)?;
        let mut limits = Limits::default();
        limits.decoding_buffer_size = self.max_buffer_size;
        limits.intermediate_buffer_size = self.max_buffer_size;
        limits.ifd_value_size = self.max_buffer_size;
        let mut decoder = Decoder::new(std::io::BufReader::new(file))?.with_limits(limits);

        match decoder.colortype()? {
            tiff::ColorType::Gray(_) => {}
            other => {
                return Err(DecodeError::UnsupportedLayout(format!(
                    "expected a single band, got {:?}",
                    other
                )));
            }
        }

        let (width, height) = decoder.dimensions()?;
        if width == 0 || height == 0 {
            return Err(DecodeError::Empty);
        }

        let (bounds, resolution) = Self::read_bounds(&mut decoder, width, height)?;
        let no_data = Self::read_no_data(&mut decoder);
        let samples = Self::decode_samples(&mut decoder)?;

        if samples.len() != width as usize * height as usize {
            return Err(DecodeError::UnsupportedLayout(format!(
                "expected {} samples, decoded {}",
                width as usize * height as usize,
                samples.len()
            )));
        }

        Ok(DecodedRaster {
            width,
            height,
            samples,
            bounds,
            resolution,
            no_data,
        })
    }
}
