mod common;

use common::synthetic_image::{flat_geometry, noisy_image};
use std::sync::Arc;
use xray_reduce::{
    raw_pipeline, BinResolution, BinUnit, GeometryStore, MaskOptions, PipelineConfig,
    PipelineGraph, PipelineInputs, ReductionContext, ReductionError, RAW_PIPELINE,
};

fn config(bins: usize) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.binning.resolution = BinResolution::Bins(bins);
    config.mask = MaskOptions::passthrough();
    config
}

fn graph(rows: usize, cols: usize) -> PipelineGraph {
    let context = ReductionContext::new();
    context
        .geometry
        .install(flat_geometry(rows, cols))
        .expect("valid geometry");
    let mut graph = PipelineGraph::new(context);
    graph
        .register(RAW_PIPELINE, raw_pipeline())
        .expect("raw pipeline registers");
    graph
}

#[test]
fn image_series_reuses_one_binner() {
    let graph = graph(32, 32);
    let mut binners = Vec::new();
    for seed in 0..4 {
        let out = graph
            .run(
                RAW_PIPELINE,
                PipelineInputs::new(noisy_image(32, 32, 100.0, 10.0, seed), config(16)),
            )
            .unwrap();
        let expected_misses = u64::from(seed == 0);
        assert_eq!(out.trace.binner_cache.misses, expected_misses);
        binners.push(out.binner().unwrap());
    }
    assert!(binners.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(graph.context().binners.misses(), 1);
    assert_eq!(graph.context().binners.hits(), 3);
}

#[test]
fn changed_binning_or_center_rebuilds() {
    let graph = graph(32, 32);
    let image = noisy_image(32, 32, 100.0, 10.0, 1);
    let base = graph
        .run(RAW_PIPELINE, PipelineInputs::new(image.clone(), config(16)))
        .unwrap()
        .binner()
        .unwrap();

    let finer = graph
        .run(RAW_PIPELINE, PipelineInputs::new(image.clone(), config(24)))
        .unwrap()
        .binner()
        .unwrap();
    assert_eq!(finer.bin_count(), 24);

    let mut by_angle = config(16);
    by_angle.binning.unit = BinUnit::TwoTheta;
    let angle = graph
        .run(RAW_PIPELINE, PipelineInputs::new(image.clone(), by_angle))
        .unwrap()
        .binner()
        .unwrap();

    let mut shifted = config(16);
    shifted.corrections.center_offset = [2.0, -1.0];
    let moved = graph
        .run(RAW_PIPELINE, PipelineInputs::new(image.clone(), shifted))
        .unwrap()
        .binner()
        .unwrap();

    for other in [&finer, &angle, &moved] {
        assert!(!Arc::ptr_eq(&base, other));
    }
    assert_eq!(graph.context().binners.misses(), 4);

    // Mask content never invalidates the binner.
    let mut masked = config(16);
    masked.mask.edge = Some(3);
    let again = graph
        .run(RAW_PIPELINE, PipelineInputs::new(image, masked))
        .unwrap()
        .binner()
        .unwrap();
    assert!(Arc::ptr_eq(&base, &again));
}

#[test]
fn recalibration_invalidates_cached_binners() {
    let graph = graph(16, 16);
    let image = noisy_image(16, 16, 10.0, 1.0, 2);
    let before = graph
        .run(RAW_PIPELINE, PipelineInputs::new(image.clone(), config(8)))
        .unwrap();
    let old_version = graph.context().geometry.version();

    let mut recalibrated = flat_geometry(16, 16);
    recalibrated.sample_distance = 0.25;
    graph.context().geometry.install(recalibrated).unwrap();
    assert!(graph.context().geometry.version() > old_version);

    let after = graph
        .run(RAW_PIPELINE, PipelineInputs::new(image, config(8)))
        .unwrap();
    assert_eq!(after.trace.binner_cache.misses, 1);
    assert!(!Arc::ptr_eq(
        &before.binner().unwrap(),
        &after.binner().unwrap()
    ));
    assert_eq!(graph.context().binners.len(), 1);
}

#[test]
fn failed_request_leaves_shared_state_usable() {
    let graph = graph(16, 16);
    let good = PipelineInputs::new(noisy_image(16, 16, 10.0, 1.0, 4), config(8));
    graph.run(RAW_PIPELINE, good.clone()).unwrap();

    let mut bad = config(8);
    bad.corrections.polarization_factor = Some(-2.0);
    assert!(matches!(
        graph.run(RAW_PIPELINE, PipelineInputs::new(noisy_image(16, 16, 10.0, 1.0, 5), bad)),
        Err(ReductionError::Config(_))
    ));
    assert!(graph
        .run(RAW_PIPELINE, PipelineInputs::new(noisy_image(12, 16, 10.0, 1.0, 5), config(8)))
        .is_err());

    let out = graph.run(RAW_PIPELINE, good).unwrap();
    assert_eq!(out.trace.binner_cache.hits, 1);
    assert_eq!(graph.context().binners.misses(), 1);
}

#[test]
fn failed_geometry_load_keeps_previous_calibration() {
    let dir = std::env::temp_dir().join(format!("xray_reduce_geo_{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let good = dir.join("good.json");
    std::fs::write(&good, serde_json::to_string(&flat_geometry(8, 8)).unwrap()).unwrap();
    let bad = dir.join("bad.json");
    std::fs::write(
        &bad,
        r#"{"pixel_size":[0.0,1e-4],"detector_shape":[8,8],"beam_center":[4,4],"sample_distance":0.2,"wavelength":0.18}"#,
    )
    .unwrap();

    let store = GeometryStore::new();
    assert!(matches!(
        store.current(),
        Err(ReductionError::NotInitialized(_))
    ));
    let loaded = store.load(&good).unwrap();
    assert!(matches!(store.load(&bad), Err(ReductionError::Config(_))));
    assert!(matches!(
        store.load(&dir.join("missing.json")),
        Err(ReductionError::Config(_))
    ));
    let current = store.current().unwrap();
    assert_eq!(current.version, loaded.version);
    assert_eq!(*current.geometry, flat_geometry(8, 8));
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn concurrent_workers_share_one_build() {
    let graph = graph(48, 48);
    let curves: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..6)
            .map(|seed| {
                let graph = &graph;
                scope.spawn(move || {
                    graph
                        .run(
                            RAW_PIPELINE,
                            PipelineInputs::new(noisy_image(48, 48, 100.0, 5.0, seed), config(20)),
                        )
                        .unwrap()
                        .reduced_curve()
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(curves.len(), 6);
    assert!(curves.iter().all(|c| c.len() == 20 && c.no_data_count() == 0));
    assert_eq!(graph.context().binners.misses(), 1);
    assert_eq!(graph.context().binners.hits(), 5);
}

#[test]
fn per_frame_center_moves_do_not_grow_the_cache() {
    let graph = graph(16, 16);
    let image = noisy_image(16, 16, 10.0, 1.0, 9);
    let capacity = graph.context().binners.capacity();
    for i in 0..40 {
        let mut moved = config(8);
        moved.corrections.center_offset = [i as f64 * 0.01, 0.0];
        graph
            .run(RAW_PIPELINE, PipelineInputs::new(image.clone(), moved))
            .unwrap();
        assert!(graph.context().binners.len() <= capacity);
    }
    assert_eq!(graph.context().binners.misses(), 40);
}
