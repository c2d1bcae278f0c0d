//! Error taxonomy shared by every reduction stage.
//!
//! All errors are request-scoped: returning one of these never leaves the
//! geometry store or the binner cache in a modified state.
use thiserror::Error;

/// Errors produced while configuring or running a reduction.
#[derive(Debug, Error)]
pub enum ReductionError {
    /// Malformed or out-of-range parameters. The caller must fix the
    /// configuration before trying again.
    #[error("configuration error: {0}")]
    Config(String),

    /// Two arrays that must share a shape do not.
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// Masking excluded every pixel of the image.
    #[error("mask excludes all {total} pixels")]
    EmptyMask { total: usize },

    /// A resource was requested before it was loaded.
    #[error("{0} requested before it was initialised")]
    NotInitialized(&'static str),

    /// A pipeline stage failed; `source` holds the underlying cause.
    #[error("stage `{stage}` failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<ReductionError>,
    },

    /// File access failed in one of the I/O helpers.
    #[error("i/o error for {path}: {message}")]
    Io { path: String, message: String },
}

impl ReductionError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Wraps `self` as the cause of a failure in `stage`.
    pub fn in_stage(self, stage: impl Into<String>) -> Self {
        Self::Stage {
            stage: stage.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, unwrapping any stage layers.
    pub fn root_cause(&self) -> &ReductionError {
        match self {
            Self::Stage { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, ReductionError>;

/// Fails with [`ReductionError::ShapeMismatch`] unless both shapes agree.
pub fn ensure_shape(
    context: &'static str,
    expected: (usize, usize),
    actual: (usize, usize),
) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(ReductionError::ShapeMismatch {
            context,
            expected,
            actual,
        })
    }
}
