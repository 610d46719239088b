// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Producer/consumer split over the event ring.
//!
//! Producers may live on any thread; each enqueue takes the ring lock for an
//! O(1) copy into a pre-allocated cell. The consumer is single: it drains
//! events in arrival order, applies them to source nodes, and triggers one
//! stabilization per coalesced batch — at a `batch_end` marker or when the
//! queue runs dry.
//!
//! Per-event faults (bad index, non-source target, wrong update kind) are
//! recoverable: the event is dropped, a rate-limited warning is logged, and
//! the queue sequence is preserved.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use lattice_core::{EngineError, NodeIndex, SourceError, StabilizationEngine};

use crate::event::UpdateEvent;
use crate::ring::{EventRing, IntakeError};

/// Why an accepted event could not be applied to the engine.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The event's node index did not resolve to a source node.
    #[error(transparent)]
    Address(#[from] EngineError),
    /// The target source rejected the write.
    #[error(transparent)]
    Write(#[from] SourceError),
}

/// Dropped-event warnings logged individually before sampling kicks in.
const DROP_LOG_LIMIT: u64 = 8;
/// Sampling interval for dropped-event warnings past the initial burst.
const DROP_LOG_EVERY: u64 = 1024;

/// Creates a bounded intake channel, returning the cloneable producer handle
/// and the single consumer.
pub fn channel(capacity: usize) -> Result<(IntakeProducer, IntakeConsumer), IntakeError> {
    let ring = Arc::new(Mutex::new(EventRing::with_capacity(capacity)?));
    Ok((
        IntakeProducer { ring: ring.clone() },
        IntakeConsumer {
            ring,
            total_events: 0,
            last_epoch_events: 0,
            dropped_events: 0,
            batch_events: 0,
        },
    ))
}

/// Enqueue handle; clone freely across producer threads.
#[derive(Debug, Clone)]
pub struct IntakeProducer {
    ring: Arc<Mutex<EventRing>>,
}

impl IntakeProducer {
    /// Enqueues an event, returning its stamped sequence number.
    ///
    /// Fails with [`IntakeError::QueueFull`] when the ring is at capacity;
    /// nothing already queued is disturbed.
    pub fn try_send(&self, event: UpdateEvent) -> Result<u64, IntakeError> {
        self.ring.lock().try_push(event)
    }

    /// Events currently waiting in the ring.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.ring.lock().len()
    }
}

/// Counters describing one [`IntakeConsumer::pump`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpStats {
    /// Events dequeued.
    pub events: u64,
    /// Events applied to sources.
    pub applied: u64,
    /// Events dropped by per-event errors.
    pub dropped: u64,
    /// Stabilization cycles triggered.
    pub cycles: u64,
}

/// The single consumer: drains the ring and drives the engine.
#[derive(Debug)]
pub struct IntakeConsumer {
    ring: Arc<Mutex<EventRing>>,
    total_events: u64,
    last_epoch_events: u64,
    dropped_events: u64,
    batch_events: u64,
}

impl IntakeConsumer {
    /// Drains every queued event into `engine`, stabilizing at batch
    /// boundaries, and returns the pump counters.
    pub fn pump(&mut self, engine: &mut StabilizationEngine) -> PumpStats {
        let mut stats = PumpStats::default();
        loop {
            let (event, drained) = {
                let mut ring = self.ring.lock();
                let event = ring.pop();
                let drained = ring.is_empty();
                (event, drained)
            };
            let Some(event) = event else { break };

            stats.events += 1;
            self.total_events += 1;
            match apply(engine, &event) {
                Ok(()) => {
                    stats.applied += 1;
                    self.batch_events += 1;
                }
                Err(error) => {
                    stats.dropped += 1;
                    self.dropped_events += 1;
                    if self.dropped_events <= DROP_LOG_LIMIT
                        || self.dropped_events % DROP_LOG_EVERY == 0
                    {
                        tracing::warn!(
                            sequence = event.sequence,
                            node_index = event.node_index,
                            %error,
                            total_dropped = self.dropped_events,
                            "dropping update event"
                        );
                    }
                }
            }

            if event.batch_end || drained {
                let _ = engine.stabilize();
                stats.cycles += 1;
                self.last_epoch_events = self.batch_events;
                self.batch_events = 0;
            }
        }
        stats
    }

    /// Events applied across the consumer's lifetime.
    #[must_use]
    pub fn total_events_processed(&self) -> u64 {
        self.total_events
    }

    /// Events coalesced into the most recent stabilization cycle.
    #[must_use]
    pub fn last_epoch_events(&self) -> u64 {
        self.last_epoch_events
    }

    /// Events dropped by per-event errors across the consumer's lifetime.
    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }
}

fn apply(engine: &mut StabilizationEngine, event: &UpdateEvent) -> Result<(), ApplyError> {
    let index = NodeIndex::from_raw(event.node_index);
    let source = engine.source_mut(index)?;
    if event.vector_index >= 0 {
        source.update_element(event.vector_index as usize, event.value)?;
    } else {
        source.update_scalar(event.value)?;
    }
    // The address resolved above; marking cannot fail.
    let _ = engine.mark_dirty(index);
    Ok(())
}
