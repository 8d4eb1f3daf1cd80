//! Instrument-level Kuiper analysis runs over a stored tile schedule.

use athena::{
    Athena, ConstructionParams, GoldenSpiral, KeplerOrbit, ProjectRoot, TileFootprint,
    TileSchedule, XraySource,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn build_with_schedule(root: &ProjectRoot, schedule: TileSchedule) -> Athena {
    let propagator = KeplerOrbit {
        samples_per_period: 4,
    };
    let mut instrument = Athena::new(
        root.clone(),
        ConstructionParams::default(),
        &propagator,
        &GoldenSpiral,
    )
    .unwrap();
    instrument.tile_struct = Some(schedule);
    instrument.save().unwrap();
    instrument
}

fn modulated_source(n: usize) -> XraySource {
    // One day of data ending at merger; the winding GW phase gives photons a
    // strongly non-uniform orbital phase distribution within each window.
    let time: Vec<f64> = (0..n)
        .map(|i| -86_400.0 + i as f64 * 86_400.0 / n as f64)
        .collect();
    let ctr = vec![0.05; n];
    let gw_phase: Vec<f64> = time.iter().map(|t| 1.0e-4 * (t + 86_400.0)).collect();
    XraySource {
        beta: 5.0,
        lambda: 15.0,
        time,
        ctr,
        gw_phase,
    }
}

fn on_source_tile() -> TileFootprint {
    TileFootprint {
        beta_range: (-10.0, 10.0),
        lambda_range: (0.0, 30.0),
    }
}

fn off_source_tile() -> TileFootprint {
    TileFootprint {
        beta_range: (50.0, 60.0),
        lambda_range: (100.0, 130.0),
    }
}

#[test]
fn trace_covers_every_consumed_tile() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let root = ProjectRoot::new(tmp.path().join("athena_root"));

    // Tiles 0..6 alternate on- and off-source; default latency is 10 ks, so
    // all six fit into the day before merger.
    let schedule: TileSchedule = (0..6u32)
        .map(|i| {
            let fp = if i % 2 == 0 {
                on_source_tile()
            } else {
                off_source_tile()
            };
            (i, fp)
        })
        .collect();
    let instrument = build_with_schedule(&root, schedule);

    let source = modulated_source(2048);
    let mut rng = StdRng::seed_from_u64(42);
    let run = instrument.kuiper_run(&source, &mut rng).unwrap();

    assert_eq!(run.trace.len(), 6);
    assert_eq!(run.n_exposures, 3);
    assert_eq!(run.exposure_tiles, vec![0, 2, 4]);
    assert!(run.accumulated_photons > 0);
    assert_eq!(
        run.trace.last().unwrap().accumulated_photons,
        run.accumulated_photons
    );
}

#[test]
fn all_p_values_are_probabilities() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let root = ProjectRoot::new(tmp.path().join("athena_root"));

    let schedule: TileSchedule = (0..8u32).map(|i| (i, on_source_tile())).collect();
    let instrument = build_with_schedule(&root, schedule);

    let source = modulated_source(2048);
    let mut rng = StdRng::seed_from_u64(7);
    let run = instrument.kuiper_run(&source, &mut rng).unwrap();

    for record in &run.trace {
        for p in [
            record.tile_p,
            record.exposure_p,
            record.detection_p,
            record.tile_detection_p,
        ] {
            assert!((0.0..=1.0).contains(&p), "p-value {p} out of range");
        }
        assert!(record.tile_kuiper >= 0.0 && record.tile_kuiper <= 2.0);
        assert!(record.exposure_kuiper >= 0.0 && record.exposure_kuiper <= 2.0);
    }
}

#[test]
fn schedule_survives_a_resurrection_round_trip() {
    init_logging();
    let tmp = TempDir::new().unwrap();
    let root = ProjectRoot::new(tmp.path().join("athena_root"));

    let schedule: TileSchedule = (0..4u32).map(|i| (i, on_source_tile())).collect();
    let instrument = build_with_schedule(&root, schedule.clone());

    // Resurrect with no changes: the stored schedule is intact and the
    // analysis still runs against it.
    let propagator = KeplerOrbit {
        samples_per_period: 4,
    };
    let resurrected = Athena::new(
        root.clone(),
        ConstructionParams {
            save_file: Some(instrument.save_file.clone()),
            ..Default::default()
        },
        &propagator,
        &GoldenSpiral,
    )
    .unwrap();
    assert_eq!(resurrected.tile_struct, Some(schedule));

    let source = modulated_source(1024);
    let mut rng = StdRng::seed_from_u64(3);
    let run = resurrected.kuiper_run(&source, &mut rng).unwrap();
    assert_eq!(run.trace.len(), 4);
    assert_eq!(run.n_exposures, 4);
}
