// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use lattice_core::demo::{build_triangular_arb_engine, ARB_SPREAD_EWMA, EURUSD};
use lattice_core::kernels::Sma;
use lattice_core::{
    Cutoff, GraphSnapshot, ScalarComputed, ScalarSource, SnapshotError, StabilizationEngine,
    TopologyBuilder,
};

fn scalar_of(engine: &StabilizationEngine, name: &str) -> f64 {
    let idx = engine.topo_index(name).unwrap();
    engine.node(idx).unwrap().scalar().unwrap()
}

fn feed(engine: &mut StabilizationEngine, name: &str, value: f64) {
    let idx = engine.topo_index(name).unwrap();
    engine.source_mut(idx).unwrap().update_scalar(value).unwrap();
    engine.mark_dirty(idx).unwrap();
    let _ = engine.stabilize();
}

#[test]
fn demo_state_round_trips_through_bytes() {
    let mut engine = build_triangular_arb_engine(Cutoff::Exact).unwrap();
    let _ = engine.stabilize();
    for px in [1.0851, 1.0853, 1.0849] {
        feed(&mut engine, EURUSD, px);
    }

    let snap = GraphSnapshot::capture(&engine);
    let wire = snap.as_bytes().to_vec();

    let mut restored = build_triangular_arb_engine(Cutoff::Exact).unwrap();
    GraphSnapshot::from_bytes(wire).restore(&mut restored).unwrap();
    assert_eq!(restored.epoch(), engine.epoch());

    // One flush, then node values agree with the original.
    let _ = restored.stabilize();
    for name in [EURUSD, ARB_SPREAD_EWMA] {
        assert_eq!(scalar_of(&restored, name), scalar_of(&engine, name), "{name}");
    }

    // Identical state must keep evolving identically.
    feed(&mut engine, EURUSD, 1.0901);
    feed(&mut restored, EURUSD, 1.0901);
    assert_eq!(
        scalar_of(&restored, ARB_SPREAD_EWMA),
        scalar_of(&engine, ARB_SPREAD_EWMA)
    );
}

#[test]
fn rolling_window_survives_restore() {
    let build = || {
        let mut b = TopologyBuilder::new();
        b.add_source(Box::new(ScalarSource::new("px", 0.0, Cutoff::Exact)))
            .unwrap();
        b.add_computed(
            Box::new(ScalarComputed::new(
                "px.sma",
                Box::new(Sma::new(3)),
                Cutoff::Exact,
            )),
            vec!["px".to_owned()],
        )
        .unwrap();
        StabilizationEngine::new(b.build().unwrap())
    };

    let mut engine = build();
    let _ = engine.stabilize();
    for px in [10.0, 20.0, 30.0, 40.0] {
        feed(&mut engine, "px", px);
    }

    let snap = GraphSnapshot::capture(&engine);
    let mut restored = build();
    snap.restore(&mut restored).unwrap();
    let _ = restored.stabilize();

    // The partially rolled window came across: the next sample produces the
    // same average on both engines.
    feed(&mut engine, "px", 50.0);
    feed(&mut restored, "px", 50.0);
    assert_eq!(scalar_of(&restored, "px.sma"), scalar_of(&engine, "px.sma"));
}

#[test]
fn snapshot_from_wrong_topology_is_rejected_atomically() {
    let mut arb = build_triangular_arb_engine(Cutoff::Exact).unwrap();
    let _ = arb.stabilize();
    let snap = GraphSnapshot::capture(&arb);

    let mut b = TopologyBuilder::new();
    b.add_source(Box::new(ScalarSource::new("solo", 7.0, Cutoff::Exact)))
        .unwrap();
    let mut other = StabilizationEngine::new(b.build().unwrap());
    let _ = other.stabilize();
    let before = GraphSnapshot::capture(&other);

    assert!(matches!(
        snap.restore(&mut other),
        Err(SnapshotError::SizeMismatch { .. })
    ));
    assert_eq!(GraphSnapshot::capture(&other), before);
    assert_eq!(other.epoch(), 1);
}
