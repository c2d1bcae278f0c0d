use crate::diagnostics::{MaskingReport, TimingBreakdown};
use serde::Serialize;

/// Binner cache counters observed across one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheActivity {
    pub hits: u64,
    pub misses: u64,
}

/// End-to-end trace of a single `PipelineGraph::run` call.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunTrace {
    pub pipeline: String,
    pub timings: TimingBreakdown,
    /// Stage names in the order they executed.
    pub executed: Vec<String>,
    pub binner_cache: CacheActivity,
    /// Present when a mask stage built a fresh mask during the run.
    pub masking: Option<MaskingReport>,
}
