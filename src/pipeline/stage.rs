use super::ReductionContext;
use crate::binner::Binner;
use crate::config::PipelineConfig;
use crate::diagnostics::MaskingReport;
use crate::error::{ReductionError, Result};
use crate::geometry::GeometryHandle;
use crate::image::{ImageF32, Mask};
use crate::reduction::ReducedCurve;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

/// A value flowing along a pipeline edge. Payloads are shared, never copied.
#[derive(Clone, Debug)]
pub enum Value {
    Image(Arc<ImageF32>),
    Mask(Arc<Mask>),
    Geometry(GeometryHandle),
    Binner(Arc<Binner>),
    Curve(Arc<ReducedCurve>),
    Config(Arc<PipelineConfig>),
}

impl Value {
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Image(_) => "image",
            Value::Mask(_) => "mask",
            Value::Geometry(_) => "geometry",
            Value::Binner(_) => "binner",
            Value::Curve(_) => "curve",
            Value::Config(_) => "config",
        }
    }
}

impl From<ImageF32> for Value {
    fn from(image: ImageF32) -> Self {
        Value::Image(Arc::new(image))
    }
}

impl From<Mask> for Value {
    fn from(mask: Mask) -> Self {
        Value::Mask(Arc::new(mask))
    }
}

impl From<PipelineConfig> for Value {
    fn from(config: PipelineConfig) -> Self {
        Value::Config(Arc::new(config))
    }
}

impl From<ReducedCurve> for Value {
    fn from(curve: ReducedCurve) -> Self {
        Value::Curve(Arc::new(curve))
    }
}

/// Declared input of a stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageInput {
    pub key: &'static str,
    pub required: bool,
}

impl StageInput {
    pub const fn required(key: &'static str) -> Self {
        Self {
            key,
            required: true,
        }
    }

    pub const fn optional(key: &'static str) -> Self {
        Self {
            key,
            required: false,
        }
    }
}

/// The subset of run values a stage declared.
#[derive(Debug, Default)]
pub struct StageInputs {
    values: HashMap<&'static str, Value>,
}

macro_rules! typed_accessors {
    ($get:ident, $get_opt:ident, $variant:ident, $ty:ty) => {
        pub fn $get(&self, key: &str) -> Result<$ty> {
            self.$get_opt(key)?
                .ok_or_else(|| ReductionError::config(format!("missing input `{key}`")))
        }

        pub fn $get_opt(&self, key: &str) -> Result<Option<$ty>> {
            match self.values.get(key) {
                None => Ok(None),
                Some(Value::$variant(v)) => Ok(Some(v.clone())),
                Some(other) => Err(ReductionError::config(format!(
                    "input `{key}` is a {}, expected {}",
                    other.kind(),
                    stringify!($variant).to_lowercase()
                ))),
            }
        }
    };
}

impl StageInputs {
    pub(crate) fn insert(&mut self, key: &'static str, value: Value) {
        self.values.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    typed_accessors!(image, optional_image, Image, Arc<ImageF32>);
    typed_accessors!(mask, optional_mask, Mask, Arc<Mask>);
    typed_accessors!(geometry, optional_geometry, Geometry, GeometryHandle);
    typed_accessors!(binner, optional_binner, Binner, Arc<Binner>);
    typed_accessors!(config, optional_config, Config, Arc<PipelineConfig>);
}

/// Per-run view handed to every stage.
pub struct StageContext<'a> {
    pub pipeline: &'a str,
    pub reduction: &'a ReductionContext,
    masking: RefCell<Option<MaskingReport>>,
}

impl<'a> StageContext<'a> {
    pub(crate) fn new(pipeline: &'a str, reduction: &'a ReductionContext) -> Self {
        Self {
            pipeline,
            reduction,
            masking: RefCell::new(None),
        }
    }

    /// Attach a masking report to this run's trace.
    pub fn record_masking(&self, report: MaskingReport) {
        *self.masking.borrow_mut() = Some(report);
    }

    pub(crate) fn take_masking(&self) -> Option<MaskingReport> {
        self.masking.borrow_mut().take()
    }
}

/// One node of a pipeline graph.
///
/// A stage reads only the keys it declares in [`Stage::inputs`] and produces
/// exactly one value stored under [`Stage::output`]. Stages may keep internal
/// state (e.g. a reused mask) but must be safe to share between threads.
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;
    fn inputs(&self) -> &[StageInput];
    fn output(&self) -> &str;
    fn run(&self, ctx: &StageContext<'_>, inputs: &StageInputs) -> Result<Value>;
}
