//! Serializable diagnostics emitted while reducing images.
//!
//! `RunTrace` is returned with every pipeline run and records per-stage
//! timings plus binner cache activity. `MaskingReport` describes how many
//! pixels each masking step excluded.

pub mod masking;
pub mod pipeline;
pub mod timing;

pub use masking::{MaskStep, MaskingReport};
pub use pipeline::{CacheActivity, RunTrace};
pub use timing::{StageTiming, TimingBreakdown};
