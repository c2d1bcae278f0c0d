//! Standard reduction stages.
//!
//! [`raw_pipeline`] wires them as
//! `image → dark → background → (geometry, binner) → polarization → mask →
//! integration`. Optional inputs (`dark`, `background`, `background_dark`,
//! `static_mask`) may simply be left out of the run inputs.
use super::keys;
use super::stage::{Stage, StageContext, StageInput, StageInputs, Value};
use crate::binner::Binner;
use crate::corrections;
use crate::error::Result;
use crate::geometry::{GeometryHandle, GeometryKey};
use crate::image::{ImageView, Mask};
use crate::masking::{build_mask_with_report, MaskOptions, MaskSetting};
use crate::reduction::{reduce, z_score_image};
use log::debug;
use std::sync::{Arc, Mutex, PoisonError};

/// Standard stage list for a raw detector image.
pub fn raw_pipeline() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(DarkSubtractionStage),
        Box::new(BackgroundSubtractionStage),
        Box::new(GeometryStage),
        Box::new(BinnerStage),
        Box::new(PolarizationStage::default()),
        Box::new(MaskStage::default()),
        Box::new(IntegrationStage),
    ]
}

/// `image - dark`.
pub struct DarkSubtractionStage;

impl Stage for DarkSubtractionStage {
    fn name(&self) -> &str {
        "dark_subtraction"
    }

    fn inputs(&self) -> &[StageInput] {
        const INPUTS: &[StageInput] = &[
            StageInput::required(keys::IMAGE),
            StageInput::optional(keys::DARK),
        ];
        INPUTS
    }

    fn output(&self) -> &str {
        keys::DARK_CORRECTED
    }

    fn run(&self, _ctx: &StageContext<'_>, inputs: &StageInputs) -> Result<Value> {
        let image = inputs.image(keys::IMAGE)?;
        match inputs.optional_image(keys::DARK)? {
            Some(dark) => Ok(corrections::subtract_dark(&image, Some(dark.as_ref()))?.into()),
            None => Ok(Value::Image(image)),
        }
    }
}

/// `image - (background - background_dark) * background_scale`.
pub struct BackgroundSubtractionStage;

impl Stage for BackgroundSubtractionStage {
    fn name(&self) -> &str {
        "background_subtraction"
    }

    fn inputs(&self) -> &[StageInput] {
        const INPUTS: &[StageInput] = &[
            StageInput::required(keys::DARK_CORRECTED),
            StageInput::optional(keys::BACKGROUND),
            StageInput::optional(keys::BACKGROUND_DARK),
            StageInput::required(keys::CONFIG),
        ];
        INPUTS
    }

    fn output(&self) -> &str {
        keys::BG_CORRECTED
    }

    fn run(&self, _ctx: &StageContext<'_>, inputs: &StageInputs) -> Result<Value> {
        let image = inputs.image(keys::DARK_CORRECTED)?;
        let Some(background) = inputs.optional_image(keys::BACKGROUND)? else {
            return Ok(Value::Image(image));
        };
        let config = inputs.config(keys::CONFIG)?;
        let background_dark = inputs.optional_image(keys::BACKGROUND_DARK)?;
        let scale = config.corrections.background_scale;
        let prepared =
            corrections::prepare_background(&background, background_dark.as_deref(), scale)?;
        Ok(corrections::subtract_background(&image, &prepared, 1.0)?.into())
    }
}

/// Current calibration from the context's store, shifted by the configured
/// centre offset.
pub struct GeometryStage;

impl Stage for GeometryStage {
    fn name(&self) -> &str {
        "geometry"
    }

    fn inputs(&self) -> &[StageInput] {
        const INPUTS: &[StageInput] = &[StageInput::required(keys::CONFIG)];
        INPUTS
    }

    fn output(&self) -> &str {
        keys::GEOMETRY
    }

    fn run(&self, ctx: &StageContext<'_>, inputs: &StageInputs) -> Result<Value> {
        let config = inputs.config(keys::CONFIG)?;
        let current = ctx.reduction.geometry.current()?;
        let moved = corrections::move_center(&current, config.corrections.center_offset)?;
        Ok(Value::Geometry(moved))
    }
}

/// Cached binner for the run's geometry, image shape and binning options.
pub struct BinnerStage;

impl Stage for BinnerStage {
    fn name(&self) -> &str {
        "binner"
    }

    fn inputs(&self) -> &[StageInput] {
        const INPUTS: &[StageInput] = &[
            StageInput::required(keys::GEOMETRY),
            StageInput::required(keys::BG_CORRECTED),
            StageInput::required(keys::CONFIG),
        ];
        INPUTS
    }

    fn output(&self) -> &str {
        keys::BINNER
    }

    fn run(&self, ctx: &StageContext<'_>, inputs: &StageInputs) -> Result<Value> {
        let geometry = inputs.geometry(keys::GEOMETRY)?;
        let image = inputs.image(keys::BG_CORRECTED)?;
        let config = inputs.config(keys::CONFIG)?;
        let binner = ctx.reduction.binners.get_binner(
            &geometry,
            image.shape(),
            config.binning.resolution,
            config.binning.unit,
        )?;
        Ok(Value::Binner(binner))
    }
}

struct PolarizationFactors {
    geometry: GeometryKey,
    version: u64,
    shape: (usize, usize),
    factor_bits: u64,
    factors: Arc<Vec<f64>>,
}

/// Divides by per-pixel polarization factors; skipped when the configured
/// factor is `None`. The last factor map is kept for the next image.
#[derive(Default)]
pub struct PolarizationStage {
    last: Mutex<Option<PolarizationFactors>>,
}

impl PolarizationStage {
    fn factors(
        &self,
        geometry: &GeometryHandle,
        shape: (usize, usize),
        factor: f64,
    ) -> Result<Arc<Vec<f64>>> {
        let key = geometry.geometry.key();
        {
            let last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = last.as_ref() {
                if cached.geometry == key
                    && cached.version == geometry.version
                    && cached.shape == shape
                    && cached.factor_bits == factor.to_bits()
                {
                    return Ok(Arc::clone(&cached.factors));
                }
            }
        }
        let factors = Arc::new(corrections::polarization_factors(
            &geometry.geometry,
            shape,
            factor,
        )?);
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(PolarizationFactors {
            geometry: key,
            version: geometry.version,
            shape,
            factor_bits: factor.to_bits(),
            factors: Arc::clone(&factors),
        });
        Ok(factors)
    }
}

impl Stage for PolarizationStage {
    fn name(&self) -> &str {
        "polarization"
    }

    fn inputs(&self) -> &[StageInput] {
        const INPUTS: &[StageInput] = &[
            StageInput::required(keys::BG_CORRECTED),
            StageInput::required(keys::GEOMETRY),
            StageInput::required(keys::CONFIG),
        ];
        INPUTS
    }

    fn output(&self) -> &str {
        keys::POL_CORRECTED
    }

    fn run(&self, _ctx: &StageContext<'_>, inputs: &StageInputs) -> Result<Value> {
        let image = inputs.image(keys::BG_CORRECTED)?;
        let config = inputs.config(keys::CONFIG)?;
        let Some(factor) = config.corrections.polarization_factor else {
            return Ok(Value::Image(image));
        };
        let geometry = inputs.geometry(keys::GEOMETRY)?;
        let factors = self.factors(&geometry, image.shape(), factor)?;
        Ok(corrections::apply_polarization(&image, &factors)?.into())
    }
}

struct FirstMask {
    binner: Arc<Binner>,
    options: MaskOptions,
    static_mask: Option<Arc<Mask>>,
    mask: Arc<Mask>,
}

/// Builds the pixel mask according to the configured [`MaskSetting`].
///
/// With [`MaskSetting::First`] the first mask is reused for later images as
/// long as they are binned by the same binner and the mask options and static
/// mask are unchanged. A recalibration or centre move yields a new binner and
/// therefore a fresh mask.
#[derive(Default)]
pub struct MaskStage {
    first: Mutex<Option<FirstMask>>,
}

impl Stage for MaskStage {
    fn name(&self) -> &str {
        "mask"
    }

    fn inputs(&self) -> &[StageInput] {
        const INPUTS: &[StageInput] = &[
            StageInput::required(keys::POL_CORRECTED),
            StageInput::required(keys::BINNER),
            StageInput::optional(keys::STATIC_MASK),
            StageInput::required(keys::CONFIG),
        ];
        INPUTS
    }

    fn output(&self) -> &str {
        keys::MASK
    }

    fn run(&self, ctx: &StageContext<'_>, inputs: &StageInputs) -> Result<Value> {
        let image = inputs.image(keys::POL_CORRECTED)?;
        let binner = inputs.binner(keys::BINNER)?;
        let static_mask = inputs.optional_mask(keys::STATIC_MASK)?;
        let config = inputs.config(keys::CONFIG)?;
        let options = &config.mask;

        let build = || -> Result<Arc<Mask>> {
            let (mask, report) =
                build_mask_with_report(&image, static_mask.as_deref(), Some(binner.as_ref()), options)?;
            ctx.record_masking(report);
            Ok(Arc::new(mask))
        };

        let mask = match options.setting {
            MaskSetting::None => Arc::new(Mask::included(image.w, image.h)),
            MaskSetting::Auto => build()?,
            MaskSetting::First => {
                let mut first = self.first.lock().unwrap_or_else(PoisonError::into_inner);
                let reusable = first
                    .as_ref()
                    .filter(|f| {
                        Arc::ptr_eq(&f.binner, &binner)
                            && f.mask.shape() == image.shape()
                            && f.options == *options
                            && f.static_mask.as_deref() == static_mask.as_deref()
                    })
                    .map(|f| Arc::clone(&f.mask));
                match reusable {
                    Some(mask) => {
                        debug!("[{}] reusing first mask", ctx.pipeline);
                        mask
                    }
                    None => {
                        let mask = build()?;
                        *first = Some(FirstMask {
                            binner: Arc::clone(&binner),
                            options: options.clone(),
                            static_mask: static_mask.clone(),
                            mask: Arc::clone(&mask),
                        });
                        mask
                    }
                }
            }
        };
        Ok(Value::Mask(mask))
    }
}

/// Reduces the corrected image with the configured statistic.
pub struct IntegrationStage;

impl Stage for IntegrationStage {
    fn name(&self) -> &str {
        "integration"
    }

    fn inputs(&self) -> &[StageInput] {
        const INPUTS: &[StageInput] = &[
            StageInput::required(keys::POL_CORRECTED),
            StageInput::required(keys::MASK),
            StageInput::required(keys::BINNER),
            StageInput::required(keys::CONFIG),
        ];
        INPUTS
    }

    fn output(&self) -> &str {
        keys::REDUCED_CURVE
    }

    fn run(&self, _ctx: &StageContext<'_>, inputs: &StageInputs) -> Result<Value> {
        let image = inputs.image(keys::POL_CORRECTED)?;
        let mask = inputs.mask(keys::MASK)?;
        let binner = inputs.binner(keys::BINNER)?;
        let config = inputs.config(keys::CONFIG)?;
        Ok(reduce(&image, &mask, &binner, config.integration.statistic)?.into())
    }
}

/// Per-bin z-score of the corrected image; not part of [`raw_pipeline`].
pub struct ZScoreStage;

impl Stage for ZScoreStage {
    fn name(&self) -> &str {
        "z_score"
    }

    fn inputs(&self) -> &[StageInput] {
        const INPUTS: &[StageInput] = &[
            StageInput::required(keys::POL_CORRECTED),
            StageInput::required(keys::BINNER),
            StageInput::required(keys::MASK),
        ];
        INPUTS
    }

    fn output(&self) -> &str {
        keys::Z_SCORE
    }

    fn run(&self, _ctx: &StageContext<'_>, inputs: &StageInputs) -> Result<Value> {
        let image = inputs.image(keys::POL_CORRECTED)?;
        let binner = inputs.binner(keys::BINNER)?;
        let mask = inputs.mask(keys::MASK)?;
        Ok(z_score_image(&image, &mask, &binner)?.into())
    }
}
