use serde::Serialize;
use std::env;
use std::path::Path;
use std::sync::Arc;
use xray_reduce::config::runtime::load_runtime_config;
use xray_reduce::diagnostics::RunTrace;
use xray_reduce::image::io::{load_detector_image, load_mask_image, write_json_file};
use xray_reduce::pipeline::keys;
use xray_reduce::{
    raw_pipeline, GeometryStore, PipelineGraph, PipelineInputs, ReducedCurve, ReductionContext,
    RAW_PIPELINE,
};

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let config_path = env::args().nth(1).ok_or_else(usage)?;
    let config = load_runtime_config(Path::new(&config_path)).map_err(|e| e.to_string())?;

    let store = Arc::new(GeometryStore::new());
    let geometry = store.load(&config.geometry).map_err(|e| e.to_string())?;
    let mut graph = PipelineGraph::new(ReductionContext::with_geometry(store));
    graph
        .register(RAW_PIPELINE, raw_pipeline())
        .map_err(|e| e.to_string())?;

    let image = load_detector_image(&config.input).map_err(|e| e.to_string())?;
    let mut inputs = PipelineInputs::new(image, config.pipeline.clone());
    let optional_images = [
        (keys::DARK, &config.dark),
        (keys::BACKGROUND, &config.background),
        (keys::BACKGROUND_DARK, &config.background_dark),
    ];
    for (key, path) in optional_images {
        if let Some(path) = path {
            inputs = inputs.with(key, load_detector_image(path).map_err(|e| e.to_string())?);
        }
    }
    if let Some(path) = &config.static_mask {
        inputs = inputs.with(
            keys::STATIC_MASK,
            load_mask_image(path).map_err(|e| e.to_string())?,
        );
    }

    let outputs = graph
        .run(RAW_PIPELINE, inputs)
        .map_err(|e| e.to_string())?;
    let curve = outputs
        .reduced_curve()
        .ok_or("pipeline produced no reduced curve")?;
    let curve: ReducedCurve = if config.output.two_theta {
        curve
            .to_two_theta(geometry.geometry.wavelength)
            .map_err(|e| e.to_string())?
    } else {
        (*curve).clone()
    };
    let excluded = outputs.mask().map(|m| m.excluded_count()).unwrap_or(0);

    let summary = CurveSummary {
        unit: format!("{:?}", curve.unit),
        bins: curve.len(),
        no_data_bins: curve.no_data_count(),
        excluded_pixels: excluded,
        curve: &curve,
    };
    write_json_file(&config.output.curve_json, &summary).map_err(|e| e.to_string())?;
    println!(
        "Saved {} bins ({} without data) to {}",
        summary.bins,
        summary.no_data_bins,
        config.output.curve_json.display()
    );

    if let Some(trace_path) = &config.output.trace_json {
        write_trace(trace_path, &outputs.trace)?;
    }
    Ok(())
}

fn write_trace(path: &Path, trace: &RunTrace) -> Result<(), String> {
    write_json_file(path, trace).map_err(|e| e.to_string())?;
    println!(
        "Saved run trace to {} (total {:.3} ms, binner cache misses {})",
        path.display(),
        trace.timings.total_ms,
        trace.binner_cache.misses
    );
    Ok(())
}

fn usage() -> String {
    "Usage: reduce_image <config.json>".to_string()
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CurveSummary<'a> {
    unit: String,
    bins: usize,
    no_data_bins: usize,
    excluded_pixels: usize,
    curve: &'a ReducedCurve,
}
