use crate::binner::Binner;
use crate::error::{ensure_shape, Result};
use crate::image::{ImageF32, ImageView, Mask};
use crate::stats::mean_std;

/// Per-pixel z-score against its bin's included pixels.
///
/// Excluded pixels, pixels outside every bin and non-finite values are NaN.
/// Bins with zero spread score 0.
pub fn z_score_image(image: &ImageF32, mask: &Mask, binner: &Binner) -> Result<ImageF32> {
    let visible = mask.overlay(image)?;
    ensure_shape("z-score binner", image.shape(), binner.shape())?;

    let mut out = ImageF32::filled(image.w, image.h, f32::NAN);
    for b in 0..binner.bin_count() {
        let included: Vec<usize> = binner
            .pixels_in_bin(b)
            .iter()
            .map(|&p| p as usize)
            .filter(|&p| visible.data[p].is_finite())
            .collect();
        let values: Vec<f64> = included.iter().map(|&p| visible.data[p] as f64).collect();
        let Some((mean, std)) = mean_std(&values) else {
            continue;
        };
        for (&p, &v) in included.iter().zip(&values) {
            out.data[p] = if std > 0.0 {
                ((v - mean) / std) as f32
            } else {
                0.0
            };
        }
    }
    Ok(out)
}
