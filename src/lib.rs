#![doc = include_str!("../README.md")]

// Public modules (stable-ish surface)
pub mod binner;
pub mod config;
pub mod corrections;
pub mod diagnostics;
pub mod error;
pub mod geometry;
pub mod image;
pub mod masking;
pub mod pipeline;
pub mod reduction;

// Shared numeric helpers.
pub mod stats;

// --- High-level re-exports -------------------------------------------------

pub use crate::binner::{BinResolution, BinUnit, Binner, BinnerCache};
pub use crate::config::{load_config, PipelineConfig};
pub use crate::error::{ReductionError, Result};
pub use crate::geometry::{Geometry, GeometryHandle, GeometryStore};
pub use crate::image::{ImageF32, Mask};
pub use crate::masking::{build_mask, MaskOptions};
pub use crate::pipeline::{
    raw_pipeline, PipelineGraph, PipelineInputs, PipelineOutputs, ReductionContext, RAW_PIPELINE,
};
pub use crate::reduction::{reduce, CurvePoint, ReducedCurve, Statistic};

// High-level diagnostics returned by pipeline runs.
pub use crate::diagnostics::{MaskingReport, RunTrace};

// --- Prelude ---------------------------------------------------------------

/// Small prelude for quick experiments.
///
/// ```no_run
/// use xray_reduce::prelude::*;
///
/// # fn main() -> xray_reduce::Result<()> {
/// let context = ReductionContext::new();
/// context.geometry.install(Geometry {
///     pixel_size: [2e-4, 2e-4],
///     detector_shape: (2048, 2048),
///     beam_center: [1024.0, 1024.0],
///     sample_distance: 0.2,
///     wavelength: 0.1823,
///     rotation: [0.0; 3],
/// })?;
///
/// let mut graph = PipelineGraph::new(context);
/// graph.register(RAW_PIPELINE, raw_pipeline())?;
///
/// let image = ImageF32::filled(2048, 2048, 100.0);
/// let out = graph.run(RAW_PIPELINE, PipelineInputs::new(image, PipelineConfig::default()))?;
/// if let Some(curve) = out.reduced_curve() {
///     println!("bins={} total_ms={:.3}", curve.len(), out.trace.timings.total_ms);
/// }
/// # Ok(())
/// # }
/// ```
pub mod prelude {
    pub use crate::image::{ImageF32, Mask};
    pub use crate::{
        raw_pipeline, Geometry, PipelineConfig, PipelineGraph, PipelineInputs, ReductionContext,
        RAW_PIPELINE,
    };
}
