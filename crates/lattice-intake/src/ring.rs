// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Bounded FIFO ring of pre-allocated event cells.
//!
//! Cells are allocated once at construction and overwritten in place: steady-
//! state enqueue/dequeue performs zero allocation. Back-pressure is a
//! [`IntakeError::QueueFull`] at enqueue time; events are never dropped once
//! accepted.

use thiserror::Error;

use crate::event::UpdateEvent;

/// Errors raised at the channel boundary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IntakeError {
    /// The ring is at capacity; the producer must retry or shed load.
    #[error("intake queue full ({capacity} events)")]
    QueueFull {
        /// Configured ring capacity.
        capacity: usize,
    },
    /// A channel was constructed with zero capacity.
    #[error("intake queue capacity must be at least 1")]
    ZeroCapacity,
}

/// Fixed-capacity FIFO over pre-allocated [`UpdateEvent`] cells.
#[derive(Debug)]
pub struct EventRing {
    cells: Vec<UpdateEvent>,
    head: usize,
    len: usize,
    next_sequence: u64,
}

impl EventRing {
    /// Creates a ring holding up to `capacity` events.
    pub fn with_capacity(capacity: usize) -> Result<Self, IntakeError> {
        if capacity == 0 {
            return Err(IntakeError::ZeroCapacity);
        }
        Ok(Self {
            cells: vec![UpdateEvent::default(); capacity],
            head: 0,
            len: 0,
            next_sequence: 0,
        })
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Events currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when no events are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` when the ring is at capacity.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.len == self.cells.len()
    }

    /// Enqueues `event`, stamping and returning its sequence number.
    ///
    /// The caller's `sequence` field is overwritten; ordering is owned by the
    /// ring.
    pub fn try_push(&mut self, mut event: UpdateEvent) -> Result<u64, IntakeError> {
        if self.is_full() {
            return Err(IntakeError::QueueFull {
                capacity: self.cells.len(),
            });
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        event.sequence = sequence;
        let slot = (self.head + self.len) % self.cells.len();
        self.cells[slot] = event;
        self.len += 1;
        Ok(sequence)
    }

    /// Dequeues the oldest event, if any.
    pub fn pop(&mut self) -> Option<UpdateEvent> {
        if self.len == 0 {
            return None;
        }
        let event = self.cells[self.head];
        self.head = (self.head + 1) % self.cells.len();
        self.len -= 1;
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order_and_sequence_stamping() {
        let mut ring = EventRing::with_capacity(4).unwrap();
        for i in 0..3u32 {
            let seq = ring.try_push(UpdateEvent::scalar(i, f64::from(i))).unwrap();
            assert_eq!(seq, u64::from(i));
        }
        for i in 0..3u32 {
            let e = ring.pop().unwrap();
            assert_eq!(e.node_index, i);
            assert_eq!(e.sequence, u64::from(i));
        }
        assert!(ring.pop().is_none());
    }

    #[test]
    fn full_ring_rejects_without_dropping() {
        let mut ring = EventRing::with_capacity(2).unwrap();
        ring.try_push(UpdateEvent::scalar(0, 1.0)).unwrap();
        ring.try_push(UpdateEvent::scalar(1, 2.0)).unwrap();
        assert_eq!(
            ring.try_push(UpdateEvent::scalar(2, 3.0)),
            Err(IntakeError::QueueFull { capacity: 2 })
        );
        // The queued events are intact.
        assert_eq!(ring.pop().unwrap().node_index, 0);
        assert_eq!(ring.pop().unwrap().node_index, 1);
    }

    #[test]
    fn wrap_around_preserves_order() {
        let mut ring = EventRing::with_capacity(2).unwrap();
        ring.try_push(UpdateEvent::scalar(0, 0.0)).unwrap();
        let _ = ring.pop();
        ring.try_push(UpdateEvent::scalar(1, 0.0)).unwrap();
        ring.try_push(UpdateEvent::scalar(2, 0.0)).unwrap();
        assert_eq!(ring.pop().unwrap().node_index, 1);
        assert_eq!(ring.pop().unwrap().node_index, 2);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(
            EventRing::with_capacity(0).unwrap_err(),
            IntakeError::ZeroCapacity
        );
    }
}
