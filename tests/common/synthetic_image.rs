use xray_reduce::{Geometry, ImageF32};

/// Untilted detector with 100 µm pixels, 0.2 m from the sample, beam at the
/// image centre.
pub fn flat_geometry(rows: usize, cols: usize) -> Geometry {
    Geometry {
        pixel_size: [1e-4, 1e-4],
        detector_shape: (rows, cols),
        beam_center: [cols as f64 / 2.0, rows as f64 / 2.0],
        sample_distance: 0.2,
        wavelength: 0.1823,
        rotation: [0.0; 3],
    }
}

/// Constant-valued image.
pub fn uniform_image(rows: usize, cols: usize, value: f32) -> ImageF32 {
    ImageF32::filled(cols, rows, value)
}

/// Flat background plus one Gaussian ring of `radius` pixels around the
/// image centre.
pub fn ring_image(rows: usize, cols: usize, radius: f32, width: f32, peak: f32) -> ImageF32 {
    assert!(width > 0.0, "ring width must be positive");
    let (cx, cy) = (cols as f32 / 2.0, rows as f32 / 2.0);
    ImageF32::from_fn(cols, rows, |x, y| {
        let r = (x as f32 + 0.5 - cx).hypot(y as f32 + 0.5 - cy);
        let d = (r - radius) / width;
        10.0 + peak * (-0.5 * d * d).exp()
    })
}

/// Deterministic pseudo-random values in `[base - amplitude, base + amplitude]`.
pub fn noisy_image(rows: usize, cols: usize, base: f32, amplitude: f32, seed: u64) -> ImageF32 {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    ImageF32::from_fn(cols, rows, |_, _| {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let unit = (state >> 40) as f32 / (1u64 << 24) as f32;
        base + amplitude * (2.0 * unit - 1.0)
    })
}
