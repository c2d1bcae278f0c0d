//! Explicit DAG executor wiring the reduction stages together.
//!
//! Overview
//! - A [`Stage`] declares the keys it consumes and the single key it
//!   produces. [`PipelineGraph::register`] turns an ordered stage list into a
//!   named DAG (Kahn topological order, registration order breaks ties) and
//!   rejects duplicate names, duplicate outputs and cycles up front.
//! - [`PipelineGraph::run`] validates the `config` input, executes the stages
//!   in order handing each only its declared keys, and returns every produced
//!   value plus a [`RunTrace`](crate::diagnostics::RunTrace).
//! - Shared state lives in an injected [`ReductionContext`]: the geometry
//!   store and the binner cache. Several graphs with different contexts can
//!   coexist in one process.
//!
//! Modules
//! - `stage` – [`Stage`] trait, [`Value`], [`StageInputs`], [`StageContext`].
//! - `graph` – [`PipelineGraph`], [`PipelineInputs`], [`PipelineOutputs`].
//! - [`stages`] – the standard correction/mask/integration stages and
//!   [`raw_pipeline`](stages::raw_pipeline).

mod graph;
mod stage;
pub mod stages;

pub use graph::{PipelineGraph, PipelineInputs, PipelineOutputs};
pub use stage::{Stage, StageContext, StageInput, StageInputs, Value};
pub use stages::raw_pipeline;

use crate::binner::BinnerCache;
use crate::geometry::GeometryStore;
use std::sync::Arc;

/// Name under which [`raw_pipeline`] is conventionally registered.
pub const RAW_PIPELINE: &str = "raw_pipeline";

/// Well-known value keys used by the standard stages.
pub mod keys {
    pub const IMAGE: &str = "image";
    pub const CONFIG: &str = "config";
    pub const DARK: &str = "dark";
    pub const BACKGROUND: &str = "background";
    pub const BACKGROUND_DARK: &str = "background_dark";
    pub const STATIC_MASK: &str = "static_mask";
    pub const DARK_CORRECTED: &str = "dark_corrected_img";
    pub const BG_CORRECTED: &str = "bg_corrected_img";
    pub const GEOMETRY: &str = "geometry";
    pub const BINNER: &str = "binner";
    pub const POL_CORRECTED: &str = "pol_corrected_img";
    pub const MASK: &str = "mask";
    pub const REDUCED_CURVE: &str = "reduced_curve";
    pub const Z_SCORE: &str = "z_score";
}

/// Shared calibration state and caches for a family of pipelines.
#[derive(Clone, Default)]
pub struct ReductionContext {
    pub geometry: Arc<GeometryStore>,
    pub binners: Arc<BinnerCache>,
}

impl ReductionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_geometry(geometry: Arc<GeometryStore>) -> Self {
        Self {
            geometry,
            binners: Arc::new(BinnerCache::new()),
        }
    }
}
