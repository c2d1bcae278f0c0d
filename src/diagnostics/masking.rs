use serde::{Deserialize, Serialize};

/// Cumulative exclusion count after one masking step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskStep {
    pub label: String,
    pub excluded: usize,
}

/// Step-by-step account of a mask build.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskingReport {
    pub total_pixels: usize,
    pub steps: Vec<MaskStep>,
    pub elapsed_ms: f64,
}

impl MaskingReport {
    pub fn new(total_pixels: usize) -> Self {
        Self {
            total_pixels,
            ..Default::default()
        }
    }

    pub fn push(&mut self, label: impl Into<String>, excluded: usize) {
        self.steps.push(MaskStep {
            label: label.into(),
            excluded,
        });
    }

    /// Excluded count after the last step (0 before any step ran).
    pub fn excluded(&self) -> usize {
        self.steps.last().map_or(0, |s| s.excluded)
    }

    /// True when no step reduced the excluded count.
    pub fn is_monotonic(&self) -> bool {
        self.steps.windows(2).all(|w| w[1].excluded >= w[0].excluded)
    }
}
