use super::{load_json, PipelineConfig};
use crate::error::Result;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Inputs and outputs of one `reduce_image` invocation.
#[derive(Debug, Deserialize)]
pub struct RuntimeConfig {
    /// Detector image to reduce.
    pub input: PathBuf,
    /// Calibration JSON read by the geometry store.
    pub geometry: PathBuf,
    #[serde(default)]
    pub dark: Option<PathBuf>,
    #[serde(default)]
    pub background: Option<PathBuf>,
    #[serde(default)]
    pub background_dark: Option<PathBuf>,
    /// Image whose non-zero pixels are excluded.
    #[serde(default)]
    pub static_mask: Option<PathBuf>,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    pub output: RuntimeOutputConfig,
}

#[derive(Debug, Deserialize)]
pub struct RuntimeOutputConfig {
    pub curve_json: PathBuf,
    #[serde(default)]
    pub trace_json: Option<PathBuf>,
    /// Write the curve on a 2θ axis (only for Q reductions).
    #[serde(default)]
    pub two_theta: bool,
}

pub fn load_runtime_config(path: &Path) -> Result<RuntimeConfig> {
    let config: RuntimeConfig = load_json(path)?;
    config.pipeline.validate()?;
    Ok(config)
}
