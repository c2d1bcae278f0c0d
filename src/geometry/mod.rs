//! Calibrated detector geometry.
//!
//! A [`Geometry`] describes where every detector pixel sits relative to the
//! sample and the incident beam. It is an immutable value: recalibration
//! replaces it wholesale through the [`GeometryStore`], which stamps each
//! installed geometry with a monotonically increasing version.
//!
//! Conventions
//! - `detector_shape` is `(rows, cols)`, matching image shapes.
//! - `beam_center` is `[x, y]` in pixels with the origin at the outer corner
//!   of pixel (0, 0); the centre of pixel (x, y) is at `(x + 0.5, y + 0.5)`.
//! - `pixel_size` and `sample_distance` are metres, `wavelength` is Å.
//! - `rotation` holds roll/pitch/yaw (rad) of the detector about the lab
//!   x (columns), y (rows) and z (beam) axes.
//!
//! Modules
//! - `pixels` – per-pixel 2θ, χ, radius and Q maps plus polarization factors.
//! - `store` – shared, versioned holder of the current geometry.

mod pixels;
mod store;

pub use pixels::{q_to_two_theta_deg, two_theta_deg_to_q, PixelMap};
pub use store::{GeometryHandle, GeometryStore};

use crate::error::{ReductionError, Result};
use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    /// Physical pixel pitch `[x, y]` in metres.
    pub pixel_size: [f64; 2],
    /// Detector dimensions `(rows, cols)`.
    pub detector_shape: (usize, usize),
    /// Point of normal incidence `[x, y]` in pixels.
    pub beam_center: [f64; 2],
    /// Sample to detector distance in metres.
    pub sample_distance: f64,
    /// Incident wavelength in Å.
    pub wavelength: f64,
    /// Detector roll/pitch/yaw in radians.
    #[serde(default)]
    pub rotation: [f64; 3],
}

/// Bit-exact identity of a geometry, used as part of cache keys.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GeometryKey {
    shape: (usize, usize),
    bits: [u64; 9],
}

impl Geometry {
    /// Rejects degenerate or non-finite calibrations.
    pub fn validate(&self) -> Result<()> {
        let (rows, cols) = self.detector_shape;
        if rows == 0 || cols == 0 {
            return Err(ReductionError::config(format!(
                "detector shape must be non-empty, got {rows}x{cols}"
            )));
        }
        for (label, value) in [
            ("pixel_size[x]", self.pixel_size[0]),
            ("pixel_size[y]", self.pixel_size[1]),
            ("sample_distance", self.sample_distance),
            ("wavelength", self.wavelength),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ReductionError::config(format!(
                    "{label} must be positive and finite, got {value}"
                )));
            }
        }
        if !self
            .beam_center
            .iter()
            .chain(self.rotation.iter())
            .all(|v| v.is_finite())
        {
            return Err(ReductionError::config(
                "beam center and rotation angles must be finite",
            ));
        }
        Ok(())
    }

    pub fn key(&self) -> GeometryKey {
        GeometryKey {
            shape: self.detector_shape,
            bits: [
                self.pixel_size[0].to_bits(),
                self.pixel_size[1].to_bits(),
                self.beam_center[0].to_bits(),
                self.beam_center[1].to_bits(),
                self.sample_distance.to_bits(),
                self.wavelength.to_bits(),
                self.rotation[0].to_bits(),
                self.rotation[1].to_bits(),
                self.rotation[2].to_bits(),
            ],
        }
    }

    /// Returns a copy whose beam centre is shifted by `offset` pixels.
    ///
    /// Used when the detector is translated by a motor after calibration;
    /// the image itself is not touched.
    pub fn with_center_offset(&self, offset: [f64; 2]) -> Result<Geometry> {
        if !offset.iter().all(|v| v.is_finite()) {
            return Err(ReductionError::config(format!(
                "center offset must be finite, got {offset:?}"
            )));
        }
        let mut moved = self.clone();
        moved.beam_center[0] += offset[0];
        moved.beam_center[1] += offset[1];
        Ok(moved)
    }

    /// Lab-frame position (metres) of the centre of pixel `(x, y)`, with the
    /// sample at the origin and the beam along +z.
    pub fn pixel_position(&self, x: usize, y: usize) -> Vector3<f64> {
        let dx = (x as f64 + 0.5 - self.beam_center[0]) * self.pixel_size[0];
        let dy = (y as f64 + 0.5 - self.beam_center[1]) * self.pixel_size[1];
        self.rotation_matrix() * Vector3::new(dx, dy, self.sample_distance)
    }

    pub fn rotation_matrix(&self) -> Rotation3<f64> {
        let [roll, pitch, yaw] = self.rotation;
        Rotation3::from_euler_angles(roll, pitch, yaw)
    }

    /// Half the pixel diagonal (metres): the finest radial step a pixel resolves.
    pub fn pixel_resolution(&self) -> f64 {
        0.5 * self.pixel_size[0].hypot(self.pixel_size[1])
    }
}
