//! I/O helpers for detector images, masks and JSON.
//!
//! - `load_detector_image`: read a TIFF/PNG/etc. into raw 16-bit counts as f32.
//! - `load_mask_image`: read an image where non-zero pixels are excluded.
//! - `write_json_file`: pretty-print a serializable value to disk.
use super::{ImageF32, Mask};
use crate::error::{ReductionError, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;

fn io_error(path: &Path, message: impl std::fmt::Display) -> ReductionError {
    ReductionError::Io {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

/// Load an image from disk keeping raw detector counts (up to 16 bits).
pub fn load_detector_image(path: &Path) -> Result<ImageF32> {
    let img = image::open(path)
        .map_err(|e| io_error(path, format!("failed to open: {e}")))?
        .into_luma16();
    let w = img.width() as usize;
    let h = img.height() as usize;
    let data = img.into_raw().into_iter().map(f32::from).collect();
    ImageF32::from_vec(w, h, data)
}

/// Load a mask image; any non-zero pixel marks an excluded pixel.
pub fn load_mask_image(path: &Path) -> Result<Mask> {
    let img = image::open(path)
        .map_err(|e| io_error(path, format!("failed to open: {e}")))?
        .into_luma8();
    let w = img.width() as usize;
    let h = img.height() as usize;
    let data = img.into_raw().into_iter().map(|v| v != 0).collect();
    Mask::from_vec(w, h, data)
}

/// Serialize a value as pretty JSON to `path`, creating parent directories.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent_dir(path)?;
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| io_error(path, format!("failed to serialize JSON: {e}")))?;
    fs::write(path, json).map_err(|e| io_error(path, format!("failed to write: {e}")))
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| io_error(parent, e))?;
        }
    }
    Ok(())
}
