//! Per-pixel scattering quantities derived from a geometry.
//!
//! Computing these maps touches every pixel and a rotation per pixel, which
//! is why the binner that consumes them is cached.
use super::Geometry;
use std::f64::consts::PI;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Row-major maps of radius (m), 2θ (rad) and χ (rad) for every pixel.
#[derive(Clone, Debug)]
pub struct PixelMap {
    pub shape: (usize, usize),
    pub wavelength: f64,
    pub radius: Vec<f64>,
    pub two_theta: Vec<f64>,
    pub chi: Vec<f64>,
}

impl PixelMap {
    pub fn new(geometry: &Geometry, shape: (usize, usize)) -> Self {
        let (rows, cols) = shape;
        let mut radius = vec![0.0; rows * cols];
        let mut two_theta = vec![0.0; rows * cols];
        let mut chi = vec![0.0; rows * cols];

        let fill_row = |y: usize, r_row: &mut [f64], t_row: &mut [f64], c_row: &mut [f64]| {
            for x in 0..cols {
                let p = geometry.pixel_position(x, y);
                let transverse = p.x.hypot(p.y);
                r_row[x] = transverse;
                t_row[x] = transverse.atan2(p.z);
                c_row[x] = p.y.atan2(p.x);
            }
        };

        if cols > 0 {
            #[cfg(feature = "parallel")]
            {
                radius
                    .par_chunks_mut(cols)
                    .zip(two_theta.par_chunks_mut(cols))
                    .zip(chi.par_chunks_mut(cols))
                    .enumerate()
                    .for_each(|(y, ((r, t), c))| fill_row(y, r, t, c));
            }
            #[cfg(not(feature = "parallel"))]
            {
                radius
                    .chunks_mut(cols)
                    .zip(two_theta.chunks_mut(cols))
                    .zip(chi.chunks_mut(cols))
                    .enumerate()
                    .for_each(|(y, ((r, t), c))| fill_row(y, r, t, c));
            }
        }

        Self {
            shape,
            wavelength: geometry.wavelength,
            radius,
            two_theta,
            chi,
        }
    }

    pub fn len(&self) -> usize {
        self.radius.len()
    }

    pub fn is_empty(&self) -> bool {
        self.radius.is_empty()
    }

    /// Scattering vector magnitude (Å⁻¹) of every pixel.
    pub fn q(&self) -> Vec<f64> {
        self.two_theta
            .iter()
            .map(|&tth| two_theta_rad_to_q(tth, self.wavelength))
            .collect()
    }

    /// Polarization factor of every pixel for the given beam polarization.
    ///
    /// `P = ½ (1 + cos²2θ − f·cos2χ·sin²2θ)`; `f = 0` is an unpolarized beam
    /// and `f = 1` is fully polarized in the horizontal plane.
    pub fn polarization(&self, factor: f64) -> Vec<f64> {
        self.two_theta
            .iter()
            .zip(&self.chi)
            .map(|(&tth, &chi)| {
                let cos2 = tth.cos().powi(2);
                let sin2 = tth.sin().powi(2);
                0.5 * (1.0 + cos2 - factor * (2.0 * chi).cos() * sin2)
            })
            .collect()
    }
}

fn two_theta_rad_to_q(two_theta: f64, wavelength: f64) -> f64 {
    4.0 * PI * (0.5 * two_theta).sin() / wavelength
}

/// Convert Q (Å⁻¹) to 2θ in degrees for a wavelength in Å.
pub fn q_to_two_theta_deg(q: f64, wavelength: f64) -> f64 {
    let s = (q * wavelength / (4.0 * PI)).clamp(-1.0, 1.0);
    (2.0 * s.asin()).to_degrees()
}

/// Convert 2θ in degrees to Q (Å⁻¹) for a wavelength in Å.
pub fn two_theta_deg_to_q(two_theta_deg: f64, wavelength: f64) -> f64 {
    two_theta_rad_to_q(two_theta_deg.to_radians(), wavelength)
}
