use xray_reduce::prelude::*;
use xray_reduce::BinResolution;

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

// Demo: reduces a few synthetic frames with one Debye-Scherrer ring and shows
// that the binner is built once for the whole series.
fn run() -> xray_reduce::Result<()> {
    let (rows, cols) = (256usize, 256usize);
    let context = ReductionContext::new();
    context.geometry.install(Geometry {
        pixel_size: [2e-4, 2e-4],
        detector_shape: (rows, cols),
        beam_center: [cols as f64 / 2.0, rows as f64 / 2.0],
        sample_distance: 0.1,
        wavelength: 0.1823,
        rotation: [0.0; 3],
    })?;

    let mut graph = PipelineGraph::new(context);
    graph.register(RAW_PIPELINE, raw_pipeline())?;

    let mut config = PipelineConfig::default();
    config.binning.resolution = BinResolution::Bins(64);
    config.mask.edge = Some(4);

    for frame in 0..3 {
        let scale = 1.0 + 0.1 * frame as f32;
        let image = ring_image(rows, cols, 60.0, 4.0, scale);
        let out = graph.run(RAW_PIPELINE, PipelineInputs::new(image, config.clone()))?;
        let Some(curve) = out.reduced_curve() else {
            continue;
        };
        let peak = curve
            .points
            .iter()
            .filter_map(|p| p.intensity.map(|i| (p.coordinate, i)))
            .fold((0.0, f64::NEG_INFINITY), |best, p| if p.1 > best.1 { p } else { best });
        println!(
            "frame={frame} bins={} no_data={} peak_q={:.3} peak={:.1} cache_misses={} total_ms={:.3}",
            curve.len(),
            curve.no_data_count(),
            peak.0,
            peak.1,
            out.trace.binner_cache.misses,
            out.trace.timings.total_ms
        );
    }
    Ok(())
}

fn ring_image(rows: usize, cols: usize, radius: f32, width: f32, scale: f32) -> ImageF32 {
    let (cx, cy) = (cols as f32 / 2.0, rows as f32 / 2.0);
    ImageF32::from_fn(cols, rows, |x, y| {
        let r = (x as f32 + 0.5 - cx).hypot(y as f32 + 0.5 - cy);
        let d = (r - radius) / width;
        scale * (10.0 + 1000.0 * (-0.5 * d * d).exp())
    })
}
