//! Pixel → 1-D bin assignment derived from detector geometry.
//!
//! Overview
//! - Every pixel gets a coordinate in the requested [`BinUnit`] (Q, 2θ or
//!   detector radius) computed from the [`PixelMap`].
//! - The coordinate range is split into uniform bins; bin edges and centres
//!   are strictly increasing.
//! - Pixels are grouped by bin in a CSR layout (`order` + `offsets`) so the
//!   masking and reduction stages can walk one ring at a time.
//!
//! A binner depends only on geometry, image shape, resolution and unit. It
//! never looks at the mask: exclusion is applied when a mask is combined with
//! the binner at reduction time, which is what makes a binner reusable across
//! an entire image series.
//!
//! Modules
//! - `cache` – [`BinnerCache`], the memoizing, stampede-guarded store.

mod cache;

pub use cache::{BinnerCache, BinnerKey};

use crate::error::{ensure_shape, ReductionError, Result};
use crate::geometry::{Geometry, PixelMap};
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Instant;

const UNASSIGNED: u32 = u32::MAX;

/// Coordinate system of the reduced curve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinUnit {
    /// Scattering vector magnitude in Å⁻¹.
    Q,
    /// Scattering angle 2θ in degrees.
    TwoTheta,
    /// Distance from the beam centre on the detector in millimetres.
    Radius,
}

/// How finely the coordinate range is divided.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinResolution {
    /// Fixed number of uniform bins.
    Bins(usize),
    /// One bin per half pixel diagonal of radial span.
    PixelSize,
}

impl BinResolution {
    pub fn validate(&self) -> Result<()> {
        match self {
            BinResolution::Bins(0) => Err(ReductionError::config("bin count must be >= 1")),
            _ => Ok(()),
        }
    }
}

#[derive(Debug)]
pub struct Binner {
    shape: (usize, usize),
    unit: BinUnit,
    resolution: BinResolution,
    coordinates: Vec<f64>,
    assignment: Vec<u32>,
    edges: Vec<f64>,
    order: Vec<u32>,
    offsets: Vec<usize>,
    build_ms: f64,
}

impl Binner {
    /// Compute the bin assignment for `geometry` on an image of `shape`.
    pub fn build(
        geometry: &Geometry,
        shape: (usize, usize),
        resolution: BinResolution,
        unit: BinUnit,
    ) -> Result<Self> {
        geometry.validate()?;
        resolution.validate()?;
        ensure_shape("binner", geometry.detector_shape, shape)?;
        let start = Instant::now();

        let map = PixelMap::new(geometry, shape);
        let coordinates: Vec<f64> = match unit {
            BinUnit::Q => map.q(),
            BinUnit::TwoTheta => map.two_theta.iter().map(|t| t.to_degrees()).collect(),
            BinUnit::Radius => map.radius.iter().map(|r| r * 1e3).collect(),
        };
        let bins = match resolution {
            BinResolution::Bins(n) => n,
            BinResolution::PixelSize => pixel_resolution_bins(geometry, &map),
        };

        let mut binner = Self::from_coordinates(shape, coordinates, bins, unit)?;
        binner.resolution = resolution;
        binner.build_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "Binner built shape={:?} unit={:?} bins={} in {:.3} ms",
            shape,
            unit,
            binner.bin_count(),
            binner.build_ms
        );
        Ok(binner)
    }

    /// Bin precomputed per-pixel coordinates into `bins` uniform bins.
    pub fn from_coordinates(
        shape: (usize, usize),
        coordinates: Vec<f64>,
        bins: usize,
        unit: BinUnit,
    ) -> Result<Self> {
        if bins == 0 {
            return Err(ReductionError::config("bin count must be >= 1"));
        }
        let (rows, cols) = shape;
        if coordinates.len() != rows * cols {
            return Err(ReductionError::config(format!(
                "{} pixel coordinates supplied for a {}x{} image",
                coordinates.len(),
                rows,
                cols
            )));
        }
        let (lo, hi) = coordinates
            .iter()
            .copied()
            .filter(|c| c.is_finite())
            .fold(None, |acc: Option<(f64, f64)>, c| match acc {
                None => Some((c, c)),
                Some((lo, hi)) => Some((lo.min(c), hi.max(c))),
            })
            .ok_or_else(|| ReductionError::config("no pixel has a finite bin coordinate"))?;

        let span = if hi > lo {
            hi - lo
        } else {
            1e-9 * lo.abs().max(1.0)
        };
        let width = span / bins as f64;
        let edges: Vec<f64> = (0..=bins)
            .map(|i| if i == bins { lo + span } else { lo + width * i as f64 })
            .collect();

        let mut assignment = vec![UNASSIGNED; coordinates.len()];
        let mut counts = vec![0usize; bins];
        for (slot, &c) in assignment.iter_mut().zip(&coordinates) {
            if !c.is_finite() {
                continue;
            }
            let b = (((c - lo) / width) as usize).min(bins - 1);
            *slot = b as u32;
            counts[b] += 1;
        }

        let mut offsets = Vec::with_capacity(bins + 1);
        offsets.push(0);
        for count in &counts {
            let last = *offsets.last().unwrap_or(&0);
            offsets.push(last + count);
        }
        let mut cursor = offsets[..bins].to_vec();
        let mut order = vec![0u32; offsets[bins]];
        for (pixel, &b) in assignment.iter().enumerate() {
            if b == UNASSIGNED {
                continue;
            }
            let b = b as usize;
            order[cursor[b]] = pixel as u32;
            cursor[b] += 1;
        }

        Ok(Self {
            shape,
            unit,
            resolution: BinResolution::Bins(bins),
            coordinates,
            assignment,
            edges,
            order,
            offsets,
            build_ms: 0.0,
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn unit(&self) -> BinUnit {
        self.unit
    }

    pub fn resolution(&self) -> BinResolution {
        self.resolution
    }

    pub fn bin_count(&self) -> usize {
        self.edges.len() - 1
    }

    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Midpoints between consecutive edges, strictly increasing.
    pub fn centers(&self) -> Vec<f64> {
        self.edges.windows(2).map(|e| 0.5 * (e[0] + e[1])).collect()
    }

    /// Bin coordinate of a pixel (row-major index).
    pub fn coordinate(&self, pixel: usize) -> f64 {
        self.coordinates[pixel]
    }

    pub fn coordinates(&self) -> &[f64] {
        &self.coordinates
    }

    /// Bin index of a pixel, `None` when its coordinate is not finite.
    pub fn bin_of(&self, pixel: usize) -> Option<usize> {
        match self.assignment[pixel] {
            UNASSIGNED => None,
            b => Some(b as usize),
        }
    }

    /// Row-major indices of all pixels assigned to bin `b`.
    pub fn pixels_in_bin(&self, b: usize) -> &[u32] {
        &self.order[self.offsets[b]..self.offsets[b + 1]]
    }

    /// Wall time spent building this binner.
    pub fn build_ms(&self) -> f64 {
        self.build_ms
    }
}

/// Number of bins that resolves the detector's radial span at half-pixel steps.
fn pixel_resolution_bins(geometry: &Geometry, map: &PixelMap) -> usize {
    let (lo, hi) = map
        .radius
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
            (lo.min(r), hi.max(r))
        });
    let step = geometry.pixel_resolution();
    if !(hi > lo) || step <= 0.0 {
        return 1;
    }
    (((hi - lo) / step).ceil() as usize).max(1)
}
