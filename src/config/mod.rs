//! Reduction parameters.
//!
//! [`PipelineConfig`] bundles one enumerated option struct per stage. Every
//! field has a default so a partial JSON file is enough, and
//! [`PipelineConfig::validate`] rejects out-of-range values before any stage
//! runs.
//!
//! Modules
//! - [`runtime`] – file locations used by the `reduce_image` tool.

pub mod runtime;

use crate::binner::{BinResolution, BinUnit};
use crate::corrections::ensure_polarization_factor;
use crate::error::{ReductionError, Result};
use crate::masking::MaskOptions;
use crate::reduction::Statistic;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionOptions {
    /// Beam polarization in `[-1, 1]`; `None` skips the correction.
    pub polarization_factor: Option<f64>,
    /// Multiplier applied to the (dark-corrected) background.
    pub background_scale: f64,
    /// Beam-centre shift in pixels `[x, y]` applied to the stored geometry.
    pub center_offset: [f64; 2],
}

impl Default for CorrectionOptions {
    fn default() -> Self {
        Self {
            polarization_factor: Some(0.99),
            background_scale: 1.0,
            center_offset: [0.0, 0.0],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningOptions {
    pub unit: BinUnit,
    pub resolution: BinResolution,
}

impl Default for BinningOptions {
    fn default() -> Self {
        Self {
            unit: BinUnit::Q,
            resolution: BinResolution::PixelSize,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationOptions {
    pub statistic: Statistic,
}

/// All tunable parameters of a reduction run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub corrections: CorrectionOptions,
    pub binning: BinningOptions,
    pub mask: MaskOptions,
    pub integration: IntegrationOptions,
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(f) = self.corrections.polarization_factor {
            ensure_polarization_factor(f)?;
        }
        if !self.corrections.background_scale.is_finite() {
            return Err(ReductionError::config(format!(
                "background scale must be finite, got {}",
                self.corrections.background_scale
            )));
        }
        if !self.corrections.center_offset.iter().all(|v| v.is_finite()) {
            return Err(ReductionError::config(format!(
                "center offset must be finite, got {:?}",
                self.corrections.center_offset
            )));
        }
        self.binning.resolution.validate()?;
        self.mask.validate()?;
        self.integration.statistic.validate()
    }
}

/// Read and validate a [`PipelineConfig`] from a JSON file.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    let config: PipelineConfig = load_json(path)?;
    config.validate()?;
    Ok(config)
}

pub(crate) fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path).map_err(|e| {
        ReductionError::config(format!("Failed to read config {}: {e}", path.display()))
    })?;
    serde_json::from_str(&data).map_err(|e| {
        ReductionError::config(format!("Failed to parse config {}: {e}", path.display()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masking::{Alpha, MaskSetting, OutlierMethod, Threshold};

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: PipelineConfig = serde_json::from_str(
            r#"{
                "binning": { "unit": "two_theta", "resolution": { "bins": 500 } },
                "mask": {
                    "setting": "first",
                    "upper": { "sigma": 5.0 },
                    "outliers": { "alpha": { "ramp": { "start": 2.0, "end": 4.0 } }, "method": "mean" }
                },
                "integration": { "statistic": { "trimmed_mean": { "fraction": 0.1 } } }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.binning.unit, BinUnit::TwoTheta);
        assert_eq!(cfg.binning.resolution, BinResolution::Bins(500));
        assert_eq!(cfg.mask.setting, MaskSetting::First);
        assert_eq!(cfg.mask.edge, Some(30));
        assert_eq!(cfg.mask.upper, Some(Threshold::Sigma(5.0)));
        let outliers = cfg.mask.outliers.unwrap();
        assert_eq!(outliers.alpha, Alpha::Ramp { start: 2.0, end: 4.0 });
        assert_eq!(outliers.method, OutlierMethod::Mean);
        assert_eq!(cfg.corrections, CorrectionOptions::default());
        assert_eq!(
            cfg.integration.statistic,
            Statistic::TrimmedMean { fraction: 0.1 }
        );
        cfg.validate().unwrap();
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.corrections.polarization_factor = Some(1.2);
        assert!(matches!(cfg.validate(), Err(ReductionError::Config(_))));

        let mut cfg = PipelineConfig::default();
        cfg.binning.resolution = BinResolution::Bins(0);
        assert!(matches!(cfg.validate(), Err(ReductionError::Config(_))));

        let mut cfg = PipelineConfig::default();
        cfg.mask.lower = Some(Threshold::Absolute(10.0));
        cfg.mask.upper = Some(Threshold::Absolute(1.0));
        assert!(matches!(cfg.validate(), Err(ReductionError::Config(_))));
    }

    #[test]
    fn load_config_reports_missing_and_malformed_files() {
        let dir = std::env::temp_dir().join(format!("xray_reduce_cfg_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let missing = dir.join("missing.json");
        assert!(matches!(load_config(&missing), Err(ReductionError::Config(_))));

        let broken = dir.join("broken.json");
        fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(load_config(&broken), Err(ReductionError::Config(_))));

        let good = dir.join("good.json");
        fs::write(&good, r#"{ "corrections": { "polarization_factor": null } }"#).unwrap();
        let cfg = load_config(&good).unwrap();
        assert_eq!(cfg.corrections.polarization_factor, None);
        fs::remove_dir_all(&dir).ok();
    }
}
