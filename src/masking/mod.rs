//! Pixel mask construction.
//!
//! Overview
//! - Starts from the static mask (if any) and the detector edge margin.
//! - Applies lower/upper intensity thresholds, absolute or in units of the
//!   standard deviation of the currently included pixels. Non-finite pixels
//!   are always excluded here.
//! - Runs per-bin sigma clipping over the binner's rings, grouping only the
//!   pixels the mask-so-far still includes.
//! - Excludes configured rings (in binner units) and rectangular regions.
//!
//! Every step only adds exclusions, so the excluded set after step N is a
//! superset of the one after step N-1. A mask that excludes every pixel is an
//! error rather than an empty reduction.
//!
//! Binned clipping needs a binner while the binner's usefulness depends on
//! the mask. The binner here is mask-independent, and clipping runs a fixed
//! number of passes ([`OUTLIER_PASSES`]) against the mask as it stood before
//! clipping, instead of iterating to a fixed point. A single pass is the
//! intended behaviour, not an unfinished convergence loop.
//!
//! Modules
//! - [`outliers`] – per-ring clipping kernels (median single pass, mean
//!   iterative).

pub mod outliers;

use crate::binner::Binner;
use crate::diagnostics::MaskingReport;
use crate::error::{ensure_shape, ReductionError, Result};
use crate::image::{ImageF32, ImageView, Mask};
use crate::stats::mean_std;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Instant;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Number of binned clipping passes.
pub const OUTLIER_PASSES: usize = 1;

/// When masks are generated across an image series.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskSetting {
    /// Build a fresh mask for every image.
    #[default]
    Auto,
    /// Build a mask for the first image and reuse it while the shape holds.
    First,
    /// Include every pixel.
    None,
}

/// An intensity bound.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    /// Fixed intensity value.
    Absolute(f64),
    /// `n` standard deviations from the mean of the included pixels.
    Sigma(f64),
}

/// Clipping threshold in spreads, constant or ramped linearly across bins.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alpha {
    Constant(f64),
    Ramp { start: f64, end: f64 },
}

impl Alpha {
    pub fn for_bin(&self, bin: usize, bins: usize) -> f64 {
        match *self {
            Alpha::Constant(a) => a,
            Alpha::Ramp { start, end } => {
                if bins <= 1 {
                    start
                } else {
                    start + (end - start) * bin as f64 / (bins - 1) as f64
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        let ok = match *self {
            Alpha::Constant(a) => a.is_finite() && a > 0.0,
            Alpha::Ramp { start, end } => {
                start.is_finite() && end.is_finite() && start > 0.0 && end > 0.0
            }
        };
        if ok {
            Ok(())
        } else {
            Err(ReductionError::config(format!(
                "outlier alpha must be positive and finite, got {self:?}"
            )))
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    /// Single pass against the ring median; fast.
    #[default]
    Median,
    /// Iterative worst-pixel removal against the ring mean; slower, tighter.
    Mean,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierOptions {
    pub alpha: Alpha,
    pub method: OutlierMethod,
}

impl Default for OutlierOptions {
    fn default() -> Self {
        Self {
            alpha: Alpha::Constant(3.0),
            method: OutlierMethod::Median,
        }
    }
}

/// Rectangular pixel region `[start, end)` in rows and columns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRegion {
    pub rows: [usize; 2],
    pub cols: [usize; 2],
}

/// Mask construction parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskOptions {
    pub setting: MaskSetting,
    /// Pixels to exclude along every detector border.
    pub edge: Option<usize>,
    /// Exclude pixels below this bound.
    pub lower: Option<Threshold>,
    /// Exclude pixels above this bound.
    pub upper: Option<Threshold>,
    /// Binned sigma clipping; `None` disables it.
    pub outliers: Option<OutlierOptions>,
    /// Closed coordinate ranges (binner units) to exclude.
    pub ring_exclusions: Vec<[f64; 2]>,
    pub region_exclusions: Vec<PixelRegion>,
}

impl Default for MaskOptions {
    fn default() -> Self {
        Self {
            setting: MaskSetting::Auto,
            edge: Some(30),
            lower: None,
            upper: None,
            outliers: Some(OutlierOptions::default()),
            ring_exclusions: Vec::new(),
            region_exclusions: Vec::new(),
        }
    }
}

impl MaskOptions {
    /// Options that include every pixel of the static mask (no dynamic steps).
    pub fn passthrough() -> Self {
        Self {
            setting: MaskSetting::Auto,
            edge: None,
            lower: None,
            upper: None,
            outliers: None,
            ring_exclusions: Vec::new(),
            region_exclusions: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (label, bound) in [("lower", self.lower), ("upper", self.upper)] {
            match bound {
                Some(Threshold::Absolute(v)) if !v.is_finite() => {
                    return Err(ReductionError::config(format!(
                        "{label} threshold must be finite"
                    )))
                }
                Some(Threshold::Sigma(n)) if !(n.is_finite() && n >= 0.0) => {
                    return Err(ReductionError::config(format!(
                        "{label} sigma threshold must be non-negative, got {n}"
                    )))
                }
                _ => {}
            }
        }
        if let (Some(Threshold::Absolute(lo)), Some(Threshold::Absolute(hi))) =
            (self.lower, self.upper)
        {
            if lo > hi {
                return Err(ReductionError::config(format!(
                    "lower threshold {lo} exceeds upper threshold {hi}"
                )));
            }
        }
        if let Some(outliers) = &self.outliers {
            outliers.alpha.validate()?;
        }
        for ring in &self.ring_exclusions {
            if !(ring[0].is_finite() && ring[1].is_finite() && ring[0] <= ring[1]) {
                return Err(ReductionError::config(format!(
                    "ring exclusion must be an ordered finite range, got {ring:?}"
                )));
            }
        }
        for region in &self.region_exclusions {
            if region.rows[0] > region.rows[1] || region.cols[0] > region.cols[1] {
                return Err(ReductionError::config(format!(
                    "region exclusion must have start <= end, got {region:?}"
                )));
            }
        }
        Ok(())
    }

    fn needs_binner(&self) -> bool {
        self.outliers.is_some() || !self.ring_exclusions.is_empty()
    }
}

/// Build the mask for `image`; see [`build_mask_with_report`].
pub fn build_mask(
    image: &ImageF32,
    static_mask: Option<&Mask>,
    binner: Option<&Binner>,
    options: &MaskOptions,
) -> Result<Mask> {
    build_mask_with_report(image, static_mask, binner, options).map(|(mask, _)| mask)
}

/// Build the mask for `image` and report the excluded count after each step.
pub fn build_mask_with_report(
    image: &ImageF32,
    static_mask: Option<&Mask>,
    binner: Option<&Binner>,
    options: &MaskOptions,
) -> Result<(Mask, MaskingReport)> {
    options.validate()?;
    let start = Instant::now();
    let shape = image.shape();
    let mut report = MaskingReport::new(image.len());

    let mut mask = match static_mask {
        Some(m) => {
            ensure_shape("static mask", shape, m.shape())?;
            m.clone()
        }
        None => Mask::included(image.w, image.h),
    };
    report.push("static", mask.excluded_count());

    if let Some(edge) = options.edge {
        apply_edge(&mut mask, edge);
        report.push("edge", mask.excluded_count());
    }

    apply_thresholds(&mut mask, image, options.lower, options.upper);
    report.push("threshold", mask.excluded_count());

    let binner = match binner {
        Some(b) => {
            ensure_shape("mask binner", shape, b.shape())?;
            Some(b)
        }
        None if options.needs_binner() => {
            return Err(ReductionError::config(
                "outlier or ring masking requires a binner",
            ))
        }
        None => None,
    };

    if let (Some(outliers), Some(binner)) = (&options.outliers, binner) {
        for _ in 0..OUTLIER_PASSES {
            apply_binned_outliers(&mut mask, image, binner, outliers);
        }
        report.push("outliers", mask.excluded_count());
    }

    if let Some(binner) = binner {
        if !options.ring_exclusions.is_empty() {
            apply_rings(&mut mask, binner, &options.ring_exclusions);
            report.push("rings", mask.excluded_count());
        }
    }
    if !options.region_exclusions.is_empty() {
        apply_regions(&mut mask, &options.region_exclusions);
        report.push("regions", mask.excluded_count());
    }

    report.elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    debug!(
        "Mask built: {}/{} pixels excluded ({:?}) in {:.3} ms",
        report.excluded(),
        report.total_pixels,
        report
            .steps
            .iter()
            .map(|s| (s.label.as_str(), s.excluded))
            .collect::<Vec<_>>(),
        report.elapsed_ms
    );

    if mask.is_fully_excluded() {
        return Err(ReductionError::EmptyMask { total: mask.len() });
    }
    Ok((mask, report))
}

fn apply_edge(mask: &mut Mask, edge: usize) {
    if edge == 0 {
        return;
    }
    let (w, h) = (mask.w, mask.h);
    for y in 0..h {
        for x in 0..w {
            if x < edge || y < edge || edge >= w - x || edge >= h - y {
                mask.exclude(x, y);
            }
        }
    }
}

fn apply_thresholds(
    mask: &mut Mask,
    image: &ImageF32,
    lower: Option<Threshold>,
    upper: Option<Threshold>,
) {
    let sigma_stats = if matches!(lower, Some(Threshold::Sigma(_)))
        || matches!(upper, Some(Threshold::Sigma(_)))
    {
        let included: Vec<f64> = image
            .data
            .iter()
            .zip(&mask.data)
            .filter(|&(v, excluded)| !*excluded && v.is_finite())
            .map(|(&v, _)| v as f64)
            .collect();
        mean_std(&included)
    } else {
        None
    };
    let resolve = |bound: Option<Threshold>, sign: f64| -> Option<f64> {
        match bound? {
            Threshold::Absolute(v) => Some(v),
            Threshold::Sigma(n) => sigma_stats.map(|(mean, std)| mean + sign * n * std),
        }
    };
    let lo = resolve(lower, -1.0);
    let hi = resolve(upper, 1.0);

    for (i, &v) in image.data.iter().enumerate() {
        let v = v as f64;
        let out = !v.is_finite()
            || lo.is_some_and(|lo| v < lo)
            || hi.is_some_and(|hi| v > hi);
        if out {
            mask.exclude_index(i);
        }
    }
}

fn apply_binned_outliers(
    mask: &mut Mask,
    image: &ImageF32,
    binner: &Binner,
    options: &OutlierOptions,
) {
    let bins = binner.bin_count();
    let snapshot: &Mask = mask;
    let ring_removals = |b: usize| -> Vec<u32> {
        let (values, positions): (Vec<f64>, Vec<u32>) = binner
            .pixels_in_bin(b)
            .iter()
            .filter(|&&p| !snapshot.data[p as usize])
            .map(|&p| (image.data[p as usize] as f64, p))
            .unzip();
        if values.len() < 2 {
            return Vec::new();
        }
        let alpha = options.alpha.for_bin(b, bins);
        match options.method {
            OutlierMethod::Median => outliers::ring_outliers_median(&values, &positions, alpha),
            OutlierMethod::Mean => outliers::ring_outliers_mean(&values, &positions, alpha),
        }
    };

    #[cfg(feature = "parallel")]
    let removals: Vec<u32> = (0..bins).into_par_iter().flat_map_iter(ring_removals).collect();
    #[cfg(not(feature = "parallel"))]
    let removals: Vec<u32> = (0..bins).flat_map(ring_removals).collect();

    for p in removals {
        mask.exclude_index(p as usize);
    }
}

fn apply_rings(mask: &mut Mask, binner: &Binner, rings: &[[f64; 2]]) {
    for (i, &c) in binner.coordinates().iter().enumerate() {
        if rings.iter().any(|r| c >= r[0] && c <= r[1]) {
            mask.exclude_index(i);
        }
    }
}

fn apply_regions(mask: &mut Mask, regions: &[PixelRegion]) {
    for region in regions {
        let rows = region.rows[0].min(mask.h)..region.rows[1].min(mask.h);
        let cols = region.cols[0].min(mask.w)..region.cols[1].min(mask.w);
        for y in rows {
            for x in cols.clone() {
                mask.exclude(x, y);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binner::{BinResolution, BinUnit};
    use crate::geometry::tests::flat_geometry;

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
    fn edge_margin_excludes_border() {
        let img = ImageF32::filled(6, 5, 1.0);
        let opts = MaskOptions {
            edge: Some(1),
            ..MaskOptions::passthrough()
        };
        let mask = build_mask(&img, None, None, &opts).unwrap();
        assert_eq!(mask.excluded_count(), 6 * 5 - 4 * 3);
        assert!(mask.is_excluded(0, 2));
        assert!(!mask.is_excluded(1, 1));
    }

    #[test]
    fn oversized_edge_excludes_everything_without_overflow() {
        let img = ImageF32::filled(6, 5, 1.0);
        let opts = MaskOptions {
            edge: Some(usize::MAX),
            ..MaskOptions::passthrough()
        };
        assert!(matches!(
            build_mask(&img, None, None, &opts),
            Err(ReductionError::EmptyMask { total: 30 })
        ));
    }

    #[test]
    fn absolute_and_sigma_thresholds() {
        let mut img = ImageF32::filled(4, 4, 10.0);
        img.set(0, 0, -5.0);
        img.set(3, 3, 1000.0);
        let absolute = MaskOptions {
            lower: Some(Threshold::Absolute(0.0)),
            upper: Some(Threshold::Absolute(500.0)),
            ..MaskOptions::passthrough()
        };
        let mask = build_mask(&img, None, None, &absolute).unwrap();
        assert_eq!(mask.excluded_count(), 2);

        let sigma = MaskOptions {
            upper: Some(Threshold::Sigma(2.0)),
            ..MaskOptions::passthrough()
        };
        let mask = build_mask(&img, None, None, &sigma).unwrap();
        assert!(mask.is_excluded(3, 3));
        assert!(!mask.is_excluded(0, 0));
    }

    #[test]
    fn non_finite_pixels_are_excluded() {
        let mut img = ImageF32::filled(3, 3, 1.0);
        img.set(1, 1, f32::NAN);
        let mask = build_mask(&img, None, None, &MaskOptions::passthrough()).unwrap();
        assert_eq!(mask.excluded_count(), 1);
        assert!(mask.is_excluded(1, 1));
    }

    #[test]
    fn binned_outliers_flag_hot_pixel() {
        let b = binner(16, 16, 4);
        let mut img = ImageF32::filled(16, 16, 100.0);
        // Small ripple so rings have a non-zero spread.
        for (i, v) in img.data.iter_mut().enumerate() {
            *v += (i % 3) as f32;
        }
        img.set(2, 3, 10_000.0);
        let opts = MaskOptions {
            outliers: Some(OutlierOptions::default()),
            ..MaskOptions::passthrough()
        };
        let (mask, report) = build_mask_with_report(&img, None, Some(&b), &opts).unwrap();
        assert!(mask.is_excluded(2, 3));
        assert_eq!(mask.excluded_count(), 1);
        assert_eq!(report.steps.last().unwrap().label, "outliers");
    }

    #[test]
    fn every_step_only_widens_the_mask() {
        let b = binner(20, 20, 6);
        let mut img = ImageF32::from_fn(20, 20, |x, y| ((x * 7 + y * 13) % 11) as f32 + 50.0);
        img.set(10, 10, 5000.0);
        img.set(4, 15, -100.0);
        let mut static_mask = Mask::included(20, 20);
        static_mask.exclude(12, 12);
        let opts = MaskOptions {
            setting: MaskSetting::Auto,
            edge: Some(2),
            lower: Some(Threshold::Absolute(0.0)),
            upper: Some(Threshold::Sigma(4.0)),
            outliers: Some(OutlierOptions {
                alpha: Alpha::Ramp { start: 2.0, end: 3.0 },
                method: OutlierMethod::Mean,
            }),
            ring_exclusions: vec![[b.edges()[2], b.edges()[3]]],
            region_exclusions: vec![PixelRegion {
                rows: [0, 4],
                cols: [8, 12],
            }],
        };
        let (mask, report) =
            build_mask_with_report(&img, Some(&static_mask), Some(&b), &opts).unwrap();
        assert!(report.is_monotonic(), "{report:?}");
        assert!(mask.is_superset_of(&static_mask));
        assert_eq!(report.excluded(), mask.excluded_count());
        assert_eq!(
            report.steps.iter().map(|s| s.label.as_str()).collect::<Vec<_>>(),
            ["static", "edge", "threshold", "outliers", "rings", "regions"]
        );
    }

    #[test]
    fn fully_excluded_mask_is_an_error() {
        let img = ImageF32::filled(4, 4, 1.0);
        let all = Mask::excluded(4, 4);
        let err = build_mask(&img, Some(&all), None, &MaskOptions::passthrough()).unwrap_err();
        assert!(matches!(err, ReductionError::EmptyMask { total: 16 }));

        let opts = MaskOptions {
            edge: Some(2),
            ..MaskOptions::passthrough()
        };
        assert!(matches!(
            build_mask(&img, None, None, &opts),
            Err(ReductionError::EmptyMask { .. })
        ));
    }

    #[test]
    fn static_mask_shape_is_checked() {
        let img = ImageF32::filled(4, 4, 1.0);
        let wrong = Mask::included(4, 5);
        assert!(matches!(
            build_mask(&img, Some(&wrong), None, &MaskOptions::passthrough()),
            Err(ReductionError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn outliers_without_binner_is_config_error() {
        let img = ImageF32::filled(4, 4, 1.0);
        let opts = MaskOptions {
            outliers: Some(OutlierOptions::default()),
            ..MaskOptions::passthrough()
        };
        assert!(matches!(
            build_mask(&img, None, None, &opts),
            Err(ReductionError::Config(_))
        ));
    }

    #[test]
    fn alpha_ramp_interpolates_across_bins() {
        let ramp = Alpha::Ramp { start: 1.0, end: 3.0 };
        assert_eq!(ramp.for_bin(0, 5), 1.0);
        assert_eq!(ramp.for_bin(2, 5), 2.0);
        assert_eq!(ramp.for_bin(4, 5), 3.0);
        assert_eq!(Alpha::Constant(2.5).for_bin(3, 5), 2.5);
    }
}
