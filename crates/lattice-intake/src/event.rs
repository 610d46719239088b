// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The pre-allocated update event cell.

use serde::{Deserialize, Serialize};

/// One external update addressed to a source node.
///
/// A vector update is distinguished by `vector_index ≥ 0`; scalar updates
/// carry `-1`. `sequence` is stamped by the ring at enqueue time and is
/// strictly monotonic per channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    /// Topological index of the target source node.
    pub node_index: u32,
    /// The new value.
    pub value: f64,
    /// Element index for vector updates; `-1` for scalar updates.
    pub vector_index: i32,
    /// When set, the consumer stabilizes immediately after applying this
    /// event instead of waiting for the queue to drain.
    pub batch_end: bool,
    /// Monotonic enqueue sequence number.
    pub sequence: u64,
}

impl UpdateEvent {
    /// A scalar update for the source at `node_index`.
    #[must_use]
    pub fn scalar(node_index: u32, value: f64) -> Self {
        Self {
            node_index,
            value,
            vector_index: -1,
            batch_end: false,
            sequence: 0,
        }
    }

    /// A single-element update for the vector source at `node_index`.
    #[must_use]
    pub fn vector_element(node_index: u32, element: u32, value: f64) -> Self {
        Self {
            node_index,
            value,
            vector_index: element as i32,
            batch_end: false,
            sequence: 0,
        }
    }

    /// Marks this event as the end of a coalesced batch.
    #[must_use]
    pub fn with_batch_end(mut self) -> Self {
        self.batch_end = true;
        self
    }

    /// Returns `true` when this event addresses a vector element.
    #[must_use]
    pub fn is_vector(&self) -> bool {
        self.vector_index >= 0
    }
}

impl Default for UpdateEvent {
    fn default() -> Self {
        Self::scalar(0, 0.0)
    }
}
