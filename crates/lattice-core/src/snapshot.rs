// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Binary state capture and restore.
//!
//! Wire format
//! - Bytes 0..8: the engine epoch, big-endian `u64`.
//! - Bytes 8..: each snapshotable node's self-sized payload, concatenated in
//!   topological order.
//!
//! Payload sizes are fixed once the topology is built, so the whole buffer is
//! validated against the target engine before any node state is touched; a
//! failed restore leaves the engine exactly as it was.
//!
//! A successful restore re-dirties every source plus every node without
//! restorable state, so the next stabilization re-derives anything the
//! snapshot did not carry. Nodes whose caches and rolling state were restored
//! are deliberately *not* re-evaluated: their upstreams report no change, and
//! a re-evaluation would push a duplicate sample into rolling kernels.
//!
//! Stateless computed nodes opt out of the contract entirely; their values
//! are re-derived on the pass after restore.

use thiserror::Error;

use crate::engine::StabilizationEngine;
use crate::ident::NodeIndex;

const HEADER_BYTES: usize = 8;

/// Errors raised while restoring binary state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SnapshotError {
    /// The buffer is shorter than the epoch header.
    #[error("snapshot shorter than its {HEADER_BYTES}-byte header")]
    MissingHeader,
    /// The payload length does not match the target topology.
    #[error("snapshot payload is {actual} bytes, topology needs {expected}")]
    SizeMismatch {
        /// Bytes the topology's snapshotable nodes require.
        expected: usize,
        /// Bytes actually present after the header.
        actual: usize,
    },
    /// A read ran past the end of a node's payload slice.
    #[error("payload truncated: need {need} bytes, have {have}")]
    Truncated {
        /// Bytes required by the read.
        need: usize,
        /// Bytes available.
        have: usize,
    },
}

/// Per-node binary state contract.
///
/// `snapshot_to` and `restore_from` operate on a caller-positioned slice and
/// return the byte count written or consumed, which must equal
/// `snapshot_size_bytes` for the node's current shape.
pub trait Snapshotable {
    /// Fixed payload size for this node.
    fn snapshot_size_bytes(&self) -> usize;

    /// Writes the payload into `buf` and returns the bytes written.
    fn snapshot_to(&self, buf: &mut [u8]) -> usize;

    /// Reads the payload from `buf` and returns the bytes consumed.
    fn restore_from(&mut self, buf: &[u8]) -> Result<usize, SnapshotError>;
}

/// An immutable capture of an engine's restorable state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSnapshot {
    bytes: Vec<u8>,
}

impl GraphSnapshot {
    /// Captures the epoch and every snapshotable node, in topological order.
    #[must_use]
    pub fn capture(engine: &StabilizationEngine) -> Self {
        let topology = engine.topology();
        let count = topology.node_count();

        let mut total = HEADER_BYTES;
        for i in 0..count {
            if let Some(state) = topology
                .node(NodeIndex::from_raw(i as u32))
                .and_then(|n| n.snapshot())
            {
                total += state.snapshot_size_bytes();
            }
        }

        let mut bytes = vec![0u8; total];
        bytes[..HEADER_BYTES].copy_from_slice(&engine.epoch().to_be_bytes());
        let mut offset = HEADER_BYTES;
        for i in 0..count {
            if let Some(state) = topology
                .node(NodeIndex::from_raw(i as u32))
                .and_then(|n| n.snapshot())
            {
                let need = state.snapshot_size_bytes();
                let written = state.snapshot_to(&mut bytes[offset..offset + need]);
                debug_assert_eq!(written, need, "node payload size drifted during capture");
                offset += need;
            }
        }
        Self { bytes }
    }

    /// Wraps raw bytes previously produced by [`GraphSnapshot::capture`].
    ///
    /// No validation happens here; [`GraphSnapshot::restore`] checks the
    /// buffer against the target engine.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// The raw wire bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total size in bytes, header included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` for a zero-length buffer (never produced by capture).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Restores this snapshot into `engine`.
    ///
    /// Validates the whole buffer first: on any error the engine state is
    /// untouched. On success the epoch is seeded from the header, sources are
    /// re-dirtied, and nodes that carried no payload are marked for
    /// re-derivation.
    pub fn restore(&self, engine: &mut StabilizationEngine) -> Result<(), SnapshotError> {
        let header = self
            .bytes
            .get(..HEADER_BYTES)
            .ok_or(SnapshotError::MissingHeader)?;
        let mut raw = [0u8; HEADER_BYTES];
        raw.copy_from_slice(header);
        let epoch = u64::from_be_bytes(raw);

        // Validation pass: payload sizes are fixed post-build, so a total
        // match guarantees each node's slice is exactly right.
        let count = engine.topology().node_count();
        let mut expected = 0usize;
        for i in 0..count {
            if let Some(state) = engine
                .topology()
                .node(NodeIndex::from_raw(i as u32))
                .and_then(|n| n.snapshot())
            {
                expected += state.snapshot_size_bytes();
            }
        }
        let actual = self.bytes.len() - HEADER_BYTES;
        if expected != actual {
            return Err(SnapshotError::SizeMismatch { expected, actual });
        }

        engine.seed_epoch(epoch);
        let mut offset = HEADER_BYTES;
        let mut underived: Vec<NodeIndex> = Vec::new();
        for i in 0..count {
            let index = NodeIndex::from_raw(i as u32);
            let Some(state) = engine
                .topology_mut()
                .node_mut(index)
                .and_then(|n| n.snapshot_mut())
            else {
                underived.push(index);
                continue;
            };
            let need = state.snapshot_size_bytes();
            let consumed = state.restore_from(&self.bytes[offset..offset + need])?;
            debug_assert_eq!(consumed, need, "node consumed a different payload size");
            offset += need;
        }

        let sources: Vec<NodeIndex> = engine.topology().source_indices().collect();
        for index in sources.into_iter().chain(underived) {
            // Indices came from the walks above; marking cannot fail.
            let _ = engine.mark_dirty(index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computed::ScalarComputed;
    use crate::cutoff::Cutoff;
    use crate::kernels::Ewma;
    use crate::source::ScalarSource;
    use crate::topology::TopologyBuilder;

    fn smoother_engine() -> StabilizationEngine {
        let mut b = TopologyBuilder::new();
        b.add_source(Box::new(ScalarSource::new("px", 100.0, Cutoff::Exact)))
            .unwrap();
        b.add_computed(
            Box::new(ScalarComputed::new(
                "px.ewma",
                Box::new(Ewma::new(0.5)),
                Cutoff::Exact,
            )),
            vec!["px".to_owned()],
        )
        .unwrap();
        StabilizationEngine::new(b.build().unwrap())
    }

    #[test]
    fn capture_restore_round_trips_values_and_epoch() {
        let mut engine = smoother_engine();
        let _ = engine.stabilize();
        let _ = engine.stabilize();
        let snap = GraphSnapshot::capture(&engine);

        let mut other = smoother_engine();
        snap.restore(&mut other).unwrap();
        assert_eq!(other.epoch(), engine.epoch());

        let idx = other.topo_index("px.ewma").unwrap();
        let want = engine.node(idx).unwrap().scalar().unwrap();
        assert_eq!(other.node(idx).unwrap().scalar().unwrap(), want);
    }

    #[test]
    fn restore_redirties_sources_but_not_restored_state() {
        let mut engine = smoother_engine();
        let _ = engine.stabilize();
        let snap = GraphSnapshot::capture(&engine);

        let mut other = smoother_engine();
        let _ = other.stabilize();
        assert_eq!(other.stabilize(), 0);

        snap.restore(&mut other).unwrap();
        // The source is revisited (and reports no change, since its
        // previous-stabilized cache came across too); the smoother keeps its
        // restored state untouched.
        assert_eq!(other.stabilize(), 1);

        let idx = other.topo_index("px.ewma").unwrap();
        let want = engine.node(idx).unwrap().scalar().unwrap();
        assert_eq!(other.node(idx).unwrap().scalar().unwrap(), want);
    }

    #[test]
    fn size_mismatch_leaves_engine_untouched() {
        let mut engine = smoother_engine();
        let _ = engine.stabilize();
        let before = GraphSnapshot::capture(&engine);

        let bad = GraphSnapshot::from_bytes(vec![0u8; 11]);
        assert!(matches!(
            bad.restore(&mut engine),
            Err(SnapshotError::SizeMismatch { .. })
        ));
        assert_eq!(GraphSnapshot::capture(&engine), before);
    }

    #[test]
    fn missing_header_is_rejected() {
        let mut engine = smoother_engine();
        let bad = GraphSnapshot::from_bytes(vec![1, 2, 3]);
        assert_eq!(bad.restore(&mut engine), Err(SnapshotError::MissingHeader));
    }

    #[test]
    fn epoch_header_is_big_endian() {
        let mut engine = smoother_engine();
        engine.seed_epoch(0x0102_0304_0506_0708);
        let snap = GraphSnapshot::capture(&engine);
        assert_eq!(
            &snap.as_bytes()[..8],
            &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]
        );
    }
}
