//! Pure per-image corrections.
//!
//! Every function returns a new image (or geometry handle) and leaves its
//! inputs untouched, so a failed correction never corrupts the caller's data.
use crate::error::{ensure_shape, ReductionError, Result};
use crate::geometry::{Geometry, GeometryHandle, PixelMap};
use crate::image::{ImageF32, ImageView};
use log::debug;

/// `image - dark`, or a copy of `image` when no dark frame is given.
pub fn subtract_dark(image: &ImageF32, dark: Option<&ImageF32>) -> Result<ImageF32> {
    match dark {
        Some(dark) => image.zip_map(dark, "dark subtraction", |a, b| a - b),
        None => Ok(image.clone()),
    }
}

/// Background ready for subtraction: `(background - background_dark) * scale`.
pub fn prepare_background(
    background: &ImageF32,
    background_dark: Option<&ImageF32>,
    scale: f64,
) -> Result<ImageF32> {
    ensure_scale(scale)?;
    let dark_corrected = subtract_dark(background, background_dark)?;
    Ok(scale_image(&dark_corrected, scale))
}

/// `image - scale * background`.
pub fn subtract_background(
    image: &ImageF32,
    background: &ImageF32,
    scale: f64,
) -> Result<ImageF32> {
    ensure_scale(scale)?;
    let s = scale as f32;
    image.zip_map(background, "background subtraction", |a, b| a - s * b)
}

/// `image + scale * background`; the inverse of [`subtract_background`].
pub fn add_background(image: &ImageF32, background: &ImageF32, scale: f64) -> Result<ImageF32> {
    ensure_scale(scale)?;
    let s = scale as f32;
    image.zip_map(background, "background addition", |a, b| a + s * b)
}

pub fn scale_image(image: &ImageF32, factor: f64) -> ImageF32 {
    let f = factor as f32;
    image.map(|v| v * f)
}

/// Per-pixel polarization factors for `geometry` on an image of `shape`.
pub fn polarization_factors(
    geometry: &Geometry,
    shape: (usize, usize),
    factor: f64,
) -> Result<Vec<f64>> {
    ensure_polarization_factor(factor)?;
    ensure_shape("polarization", geometry.detector_shape, shape)?;
    Ok(PixelMap::new(geometry, shape).polarization(factor))
}

/// Divide every pixel by its precomputed polarization factor.
///
/// Pixels whose factor is not positive cannot be corrected and become NaN,
/// which the threshold step of masking always excludes.
pub fn apply_polarization(image: &ImageF32, factors: &[f64]) -> Result<ImageF32> {
    if factors.len() != image.len() {
        return Err(ReductionError::config(format!(
            "{} polarization factors supplied for {} pixels",
            factors.len(),
            image.len()
        )));
    }
    Ok(ImageF32 {
        w: image.w,
        h: image.h,
        data: image
            .data
            .iter()
            .zip(factors)
            .map(|(&v, &p)| if p > 0.0 { (v as f64 / p) as f32 } else { f32::NAN })
            .collect(),
    })
}

/// Rescale intensities by the beam polarization factor of each pixel.
///
/// `factor` must lie in `[-1, 1]`.
pub fn polarization_correction(
    image: &ImageF32,
    geometry: &Geometry,
    factor: f64,
) -> Result<ImageF32> {
    let factors = polarization_factors(geometry, image.shape(), factor)?;
    debug!("Polarization correction f={factor} over {} pixels", factors.len());
    apply_polarization(image, &factors)
}

/// Re-centre the beam for downstream lookups; the image is not involved.
pub fn move_center(geometry: &GeometryHandle, offset: [f64; 2]) -> Result<GeometryHandle> {
    geometry.with_center_offset(offset)
}

pub(crate) fn ensure_polarization_factor(factor: f64) -> Result<()> {
    if (-1.0..=1.0).contains(&factor) {
        Ok(())
    } else {
        Err(ReductionError::config(format!(
            "polarization factor must lie in [-1, 1], got {factor}"
        )))
    }
}

fn ensure_scale(scale: f64) -> Result<()> {
    if scale.is_finite() {
        Ok(())
    } else {
        Err(ReductionError::config(format!(
            "background scale must be finite, got {scale}"
        )))
    }
}
