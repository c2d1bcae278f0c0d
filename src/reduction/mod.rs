//! Azimuthal reduction of a 2-D image into a 1-D curve.
//!
//! [`reduce`] walks the binner's pixel groups, drops pixels the mask
//! excludes (and non-finite values), and aggregates the rest with the chosen
//! [`Statistic`]. A bin without contributing pixels yields a point whose
//! intensity is `None`; it is never dropped and never reported as zero.
//!
//! Modules
//! - `zscore` – per-bin z-score image used to inspect outlier rejection.

mod zscore;

pub use zscore::z_score_image;

use crate::binner::{BinUnit, Binner};
use crate::error::{ensure_shape, ReductionError, Result};
use crate::geometry::q_to_two_theta_deg;
use crate::image::{ImageF32, ImageView, Mask};
use crate::stats::{mean_std, median_in_place, trimmed_mean};
use log::debug;
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Per-bin aggregate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    #[default]
    Mean,
    Median,
    /// Population standard deviation of the bin.
    Std,
    /// Mean after discarding `fraction` of the samples from each tail.
    TrimmedMean { fraction: f64 },
}

impl Statistic {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Statistic::TrimmedMean { fraction } if !(0.0..0.5).contains(&fraction) => {
                Err(ReductionError::config(format!(
                    "trimmed mean fraction must lie in [0, 0.5), got {fraction}"
                )))
            }
            _ => Ok(()),
        }
    }

    fn aggregate(&self, values: &mut [f64]) -> Option<f64> {
        match *self {
            Statistic::Mean => mean_std(values).map(|(m, _)| m),
            Statistic::Median => median_in_place(values),
            Statistic::Std => mean_std(values).map(|(_, s)| s),
            Statistic::TrimmedMean { fraction } => trimmed_mean(values, fraction),
        }
    }
}

/// One bin of a reduced curve.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Bin centre in the curve's unit.
    pub coordinate: f64,
    /// Aggregated intensity; `None` marks a bin with no contributing pixels.
    pub intensity: Option<f64>,
    /// Standard error of the bin (`std / sqrt(count)`).
    pub uncertainty: Option<f64>,
    /// Number of pixels that contributed.
    pub count: usize,
}

impl CurvePoint {
    pub fn has_data(&self) -> bool {
        self.intensity.is_some()
    }
}

/// Ordered `(coordinate, intensity, uncertainty)` triples; coordinates
/// strictly increase.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReducedCurve {
    pub unit: BinUnit,
    pub points: Vec<CurvePoint>,
}

impl ReducedCurve {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn coordinates(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.coordinate).collect()
    }

    pub fn intensities(&self) -> Vec<Option<f64>> {
        self.points.iter().map(|p| p.intensity).collect()
    }

    pub fn no_data_count(&self) -> usize {
        self.points.iter().filter(|p| !p.has_data()).count()
    }

    /// Re-express a Q curve on a 2θ (degrees) axis.
    pub fn to_two_theta(&self, wavelength: f64) -> Result<ReducedCurve> {
        if !(wavelength.is_finite() && wavelength > 0.0) {
            return Err(ReductionError::config(format!(
                "wavelength must be positive, got {wavelength}"
            )));
        }
        match self.unit {
            BinUnit::TwoTheta => Ok(self.clone()),
            BinUnit::Q => Ok(ReducedCurve {
                unit: BinUnit::TwoTheta,
                points: self
                    .points
                    .iter()
                    .map(|p| CurvePoint {
                        coordinate: q_to_two_theta_deg(p.coordinate, wavelength),
                        ..*p
                    })
                    .collect(),
            }),
            BinUnit::Radius => Err(ReductionError::config(
                "a radius curve cannot be converted to 2θ without geometry",
            )),
        }
    }
}

/// Reduce `image` to a curve using `binner`'s groups and `mask`'s exclusions.
pub fn reduce(
    image: &ImageF32,
    mask: &Mask,
    binner: &Binner,
    statistic: Statistic,
) -> Result<ReducedCurve> {
    statistic.validate()?;
    ensure_shape("reduction mask", image.shape(), mask.shape())?;
    ensure_shape("reduction binner", image.shape(), binner.shape())?;

    let centers = binner.centers();
    let reduce_bin = |b: usize| -> CurvePoint {
        let mut values: Vec<f64> = binner
            .pixels_in_bin(b)
            .iter()
            .map(|&p| p as usize)
            .filter(|&p| !mask.data[p])
            .map(|p| image.data[p] as f64)
            .filter(|v| v.is_finite())
            .collect();
        let count = values.len();
        let uncertainty = mean_std(&values).map(|(_, std)| std / (count as f64).sqrt());
        CurvePoint {
            coordinate: centers[b],
            intensity: statistic.aggregate(&mut values),
            uncertainty,
            count,
        }
    };

    #[cfg(feature = "parallel")]
    let points: Vec<CurvePoint> = (0..binner.bin_count()).into_par_iter().map(reduce_bin).collect();
    #[cfg(not(feature = "parallel"))]
    let points: Vec<CurvePoint> = (0..binner.bin_count()).map(reduce_bin).collect();

    let curve = ReducedCurve {
        unit: binner.unit(),
        points,
    };
    debug!(
        "Reduced {} bins ({:?}, {:?}), {} without data",
        curve.len(),
        curve.unit,
        statistic,
        curve.no_data_count()
    );
    Ok(curve)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binner::BinResolution;
    use crate::geometry::tests::flat_geometry;
    use approx::assert_abs_diff_eq;

    fn binner(rows: usize, cols: usize, bins: usize) -> Binner {
        Binner::build(
            &flat_geometry(rows, cols),
            (rows, cols),
            BinResolution::Bins(bins),
            BinUnit::Q,
        )
        .unwrap()
    }

    #[test]
    fn uniform_image_reduces_to_flat_curve() {
        let b = binner(10, 10, 5);
        let img = ImageF32::filled(10, 10, 100.0);
        let curve = reduce(&img, &Mask::included(10, 10), &b, Statistic::Mean).unwrap();
        assert_eq!(curve.len(), 5);
        assert_eq!(curve.no_data_count(), 0);
        for p in &curve.points {
            assert_abs_diff_eq!(p.intensity.unwrap(), 100.0, epsilon = 1e-9);
            assert_abs_diff_eq!(p.uncertainty.unwrap(), 0.0, epsilon = 1e-9);
        }
        assert!(curve.coordinates().windows(2).all(|c| c[1] > c[0]));
    }

    #[test]
    fn empty_bins_are_marked_not_dropped() {
        let b = binner(10, 10, 5);
        let img = ImageF32::filled(10, 10, 1.0);
        let mut mask = Mask::included(10, 10);
        for &p in b.pixels_in_bin(0) {
            mask.exclude_index(p as usize);
        }
        let curve = reduce(&img, &mask, &b, Statistic::Median).unwrap();
        assert_eq!(curve.len(), 5);
        assert_eq!(curve.points[0].intensity, None);
        assert_eq!(curve.points[0].count, 0);
        assert_eq!(curve.no_data_count(), 1);
    }

    #[test]
    fn statistics_differ_on_skewed_bins() {
        let b = binner(12, 12, 1);
        let mut img = ImageF32::filled(12, 12, 2.0);
        img.set(5, 5, 1002.0);
        let mask = Mask::included(12, 12);
        let mean = reduce(&img, &mask, &b, Statistic::Mean).unwrap().points[0];
        let median = reduce(&img, &mask, &b, Statistic::Median).unwrap().points[0];
        let trimmed = reduce(&img, &mask, &b, Statistic::TrimmedMean { fraction: 0.1 })
            .unwrap()
            .points[0];
        let std = reduce(&img, &mask, &b, Statistic::Std).unwrap().points[0];
        assert_abs_diff_eq!(mean.intensity.unwrap(), 2.0 + 1000.0 / 144.0, epsilon = 1e-9);
        assert_eq!(median.intensity, Some(2.0));
        assert_eq!(trimmed.intensity, Some(2.0));
        assert!(std.intensity.unwrap() > 50.0);
    }

    #[test]
    fn shape_mismatches_are_rejected() {
        let b = binner(10, 10, 3);
        let img = ImageF32::filled(10, 10, 1.0);
        assert!(matches!(
            reduce(&img, &Mask::included(9, 10), &b, Statistic::Mean),
            Err(ReductionError::ShapeMismatch { .. })
        ));
        let other = binner(8, 8, 3);
        assert!(matches!(
            reduce(&img, &Mask::included(10, 10), &other, Statistic::Mean),
            Err(ReductionError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn invalid_trim_fraction_is_config_error() {
        let b = binner(4, 4, 2);
        let img = ImageF32::filled(4, 4, 1.0);
        assert!(matches!(
            reduce(&img, &Mask::included(4, 4), &b, Statistic::TrimmedMean { fraction: 0.5 }),
            Err(ReductionError::Config(_))
        ));
    }

    #[test]
    fn q_curve_converts_to_increasing_two_theta() {
        let b = binner(16, 16, 6);
        let img = ImageF32::filled(16, 16, 3.0);
        let curve = reduce(&img, &Mask::included(16, 16), &b, Statistic::Mean).unwrap();
        let tth = curve.to_two_theta(0.1823).unwrap();
        assert_eq!(tth.unit, BinUnit::TwoTheta);
        assert!(tth.coordinates().windows(2).all(|c| c[1] > c[0]));
        assert_eq!(tth.intensities(), curve.intensities());
    }
}
