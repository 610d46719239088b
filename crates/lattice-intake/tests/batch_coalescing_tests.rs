// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>

#![allow(missing_docs)]
use lattice_core::kernels::WeightedMid;
use lattice_core::test_support::{event_log, ListenerEvent, RecordingListener};
use lattice_core::{Cutoff, ScalarComputed, ScalarSource, StabilizationEngine, TopologyBuilder};
use lattice_intake::{channel, IntakeError, UpdateEvent};

fn book_engine() -> StabilizationEngine {
    let mut b = TopologyBuilder::new();
    for (name, value) in [
        ("bid", 0.0),
        ("bid_qty", 0.0),
        ("ask", 0.0),
        ("ask_qty", 0.0),
    ] {
        b.add_source(Box::new(ScalarSource::new(name, value, Cutoff::Exact)))
            .unwrap();
    }
    b.add_computed(
        Box::new(ScalarComputed::new(
            "book.mid",
            Box::new(WeightedMid),
            Cutoff::Exact,
        )),
        ["bid", "bid_qty", "ask", "ask_qty"]
            .into_iter()
            .map(str::to_owned)
            .collect(),
    )
    .unwrap();
    StabilizationEngine::new(b.build().unwrap())
}

fn index_of(engine: &StabilizationEngine, name: &str) -> u32 {
    engine.topo_index(name).unwrap().value()
}

#[test]
fn burst_coalesces_into_one_cycle() {
    let mut engine = book_engine();
    // Flush initial zeros so the burst is the only pending work.
    let _ = engine.stabilize();

    let log = event_log();
    engine.set_listener(Box::new(RecordingListener::new("L", log.clone())));

    let (producer, mut consumer) = channel(16).unwrap();
    let updates = [
        UpdateEvent::scalar(index_of(&engine, "bid"), 100.0),
        UpdateEvent::scalar(index_of(&engine, "bid_qty"), 1000.0),
        UpdateEvent::scalar(index_of(&engine, "ask"), 100.5),
        UpdateEvent::scalar(index_of(&engine, "ask_qty"), 1000.0).with_batch_end(),
    ];
    for u in updates {
        producer.try_send(u).unwrap();
    }

    let epoch_before = engine.epoch();
    let stats = consumer.pump(&mut engine);

    assert_eq!(stats.events, 4);
    assert_eq!(stats.applied, 4);
    assert_eq!(stats.cycles, 1);
    assert_eq!(engine.epoch(), epoch_before + 1);
    assert_eq!(consumer.last_epoch_events(), 4);
    assert_eq!(consumer.total_events_processed(), 4);

    // One start/end pair, and the cycle covered all four sources + the mid.
    let events = log.borrow().clone();
    let ends: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            ListenerEvent::End { count, .. } => Some(*count),
            _ => None,
        })
        .collect();
    assert_eq!(ends, vec![5]);

    let mid = engine.topo_index("book.mid").unwrap();
    assert!((engine.node(mid).unwrap().scalar().unwrap() - 100.25).abs() < 1e-12);
}

#[test]
fn queue_drain_triggers_stabilization_without_marker() {
    let mut engine = book_engine();
    let _ = engine.stabilize();

    let (producer, mut consumer) = channel(8).unwrap();
    producer
        .try_send(UpdateEvent::scalar(index_of(&engine, "bid"), 99.0))
        .unwrap();
    producer
        .try_send(UpdateEvent::scalar(index_of(&engine, "ask"), 101.0))
        .unwrap();

    let stats = consumer.pump(&mut engine);
    // No batch_end flag anywhere: the drain boundary coalesces both updates
    // into a single cycle.
    assert_eq!(stats.cycles, 1);
    assert_eq!(consumer.last_epoch_events(), 2);
}

#[test]
fn batch_end_splits_cycles_mid_stream() {
    let mut engine = book_engine();
    let _ = engine.stabilize();

    let (producer, mut consumer) = channel(8).unwrap();
    producer
        .try_send(UpdateEvent::scalar(index_of(&engine, "bid"), 99.0).with_batch_end())
        .unwrap();
    producer
        .try_send(UpdateEvent::scalar(index_of(&engine, "ask"), 101.0))
        .unwrap();

    let stats = consumer.pump(&mut engine);
    assert_eq!(stats.cycles, 2);
    assert_eq!(consumer.last_epoch_events(), 1);
}

#[test]
fn later_writes_to_the_same_source_win() {
    let mut engine = book_engine();
    let _ = engine.stabilize();

    let (producer, mut consumer) = channel(8).unwrap();
    let bid = index_of(&engine, "bid");
    producer.try_send(UpdateEvent::scalar(bid, 98.0)).unwrap();
    producer
        .try_send(UpdateEvent::scalar(bid, 99.5).with_batch_end())
        .unwrap();

    let _ = consumer.pump(&mut engine);
    let idx = engine.topo_index("bid").unwrap();
    assert_eq!(engine.node(idx).unwrap().scalar(), Some(99.5));
}

#[test]
fn bad_events_are_dropped_and_the_stream_continues() {
    let mut engine = book_engine();
    let _ = engine.stabilize();

    let (producer, mut consumer) = channel(8).unwrap();
    // Out-of-range index.
    producer.try_send(UpdateEvent::scalar(999, 1.0)).unwrap();
    // Computed node is not a source.
    producer
        .try_send(UpdateEvent::scalar(index_of(&engine, "book.mid"), 1.0))
        .unwrap();
    // Vector update against a scalar source.
    producer
        .try_send(UpdateEvent::vector_element(index_of(&engine, "bid"), 0, 1.0))
        .unwrap();
    // A good event after the bad ones still lands.
    producer
        .try_send(UpdateEvent::scalar(index_of(&engine, "bid"), 42.0).with_batch_end())
        .unwrap();

    let stats = consumer.pump(&mut engine);
    assert_eq!(stats.events, 4);
    assert_eq!(stats.dropped, 3);
    assert_eq!(stats.applied, 1);
    assert_eq!(consumer.dropped_events(), 3);

    let idx = engine.topo_index("bid").unwrap();
    assert_eq!(engine.node(idx).unwrap().scalar(), Some(42.0));
}

#[test]
fn producers_can_enqueue_from_other_threads() {
    let mut engine = book_engine();
    let _ = engine.stabilize();

    let (producer, mut consumer) = channel(64).unwrap();
    let bid = index_of(&engine, "bid");

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let producer = producer.clone();
            std::thread::spawn(move || {
                for i in 0..8 {
                    producer
                        .try_send(UpdateEvent::scalar(bid, f64::from(t * 8 + i)))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let stats = consumer.pump(&mut engine);
    assert_eq!(stats.events, 32);
    assert_eq!(stats.applied, 32);
}

#[test]
fn full_queue_pushes_back() {
    let (producer, _consumer) = channel(2).unwrap();
    producer.try_send(UpdateEvent::scalar(0, 1.0)).unwrap();
    producer.try_send(UpdateEvent::scalar(0, 2.0)).unwrap();
    assert_eq!(
        producer.try_send(UpdateEvent::scalar(0, 3.0)),
        Err(IntakeError::QueueFull { capacity: 2 })
    );
    assert_eq!(producer.queued(), 2);
}
