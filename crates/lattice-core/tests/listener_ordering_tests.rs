// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use lattice_core::demo::build_triangular_arb_engine;
use lattice_core::test_support::{event_log, ListenerEvent, RecordingListener};
use lattice_core::{CompositeListener, Cutoff};

#[test]
fn composite_preserves_per_event_child_order() {
    let log = event_log();
    let mut composite = CompositeListener::new();
    composite.add(Box::new(RecordingListener::new("L1", log.clone())));
    composite.add(Box::new(RecordingListener::new("L2", log.clone())));

    let mut engine = build_triangular_arb_engine(Cutoff::Exact).unwrap();
    engine.set_listener(Box::new(composite));
    let count = engine.stabilize();
    assert_eq!(count, 5);

    let events = log.borrow().clone();
    // start(L1), start(L2), 5 × (node L1, node L2), end(L1), end(L2)
    assert_eq!(events.len(), 2 + 2 * 5 + 2);
    assert!(matches!(events[0], ListenerEvent::Start { label: "L1", epoch: 1 }));
    assert!(matches!(events[1], ListenerEvent::Start { label: "L2", epoch: 1 }));
    assert!(matches!(
        events[events.len() - 2],
        ListenerEvent::End { label: "L1", epoch: 1, count: 5 }
    ));
    assert!(matches!(
        events[events.len() - 1],
        ListenerEvent::End { label: "L2", epoch: 1, count: 5 }
    ));

    // Node events alternate L1/L2 per stabilized node, same node each pair,
    // and the pairs arrive in topological order.
    let mut last_index = None;
    for pair in events[2..events.len() - 2].chunks(2) {
        let (ListenerEvent::Node { label: l1, index: i1, name: n1, .. },
             ListenerEvent::Node { label: l2, index: i2, name: n2, .. }) = (&pair[0], &pair[1])
        else {
            panic!("expected node event pair, got {pair:?}");
        };
        assert_eq!(*l1, "L1");
        assert_eq!(*l2, "L2");
        assert_eq!(i1, i2);
        assert_eq!(n1, n2);
        if let Some(prev) = last_index {
            assert!(*i1 > prev, "node callbacks must follow topological order");
        }
        last_index = Some(*i1);
    }
}

#[test]
fn panicking_child_does_not_starve_later_children() {
    let log = event_log();
    let mut composite = CompositeListener::new();
    composite.add(Box::new(
        RecordingListener::new("L1", log.clone()).panicking_on_node(),
    ));
    composite.add(Box::new(RecordingListener::new("L2", log.clone())));

    let mut engine = build_triangular_arb_engine(Cutoff::Exact).unwrap();
    engine.set_listener(Box::new(composite));
    let _ = engine.stabilize();

    let events = log.borrow().clone();
    let l2_nodes = events
        .iter()
        .filter(|e| matches!(e, ListenerEvent::Node { label: "L2", .. }))
        .count();
    assert_eq!(l2_nodes, 5, "L2 must see every node event despite L1 panicking");

    // End events still arrive for both children.
    assert!(events
        .iter()
        .any(|e| matches!(e, ListenerEvent::End { label: "L2", .. })));
}

#[test]
fn start_and_end_share_the_cycle_epoch() {
    let log = event_log();
    let mut composite = CompositeListener::new();
    composite.add(Box::new(RecordingListener::new("L1", log.clone())));

    let mut engine = build_triangular_arb_engine(Cutoff::Exact).unwrap();
    engine.set_listener(Box::new(composite));
    let _ = engine.stabilize();
    let _ = engine.stabilize();

    let events = log.borrow().clone();
    let mut seen = Vec::new();
    for e in &events {
        match e {
            ListenerEvent::Start { epoch, .. } => seen.push(("start", *epoch)),
            ListenerEvent::End { epoch, .. } => seen.push(("end", *epoch)),
            ListenerEvent::Node { .. } | ListenerEvent::Error { .. } => {}
        }
    }
    assert_eq!(seen, vec![("start", 1), ("end", 1), ("start", 2), ("end", 2)]);
}
