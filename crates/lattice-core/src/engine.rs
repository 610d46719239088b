// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The stabilization engine: one linear dirty-propagation pass per cycle.
//!
//! The engine owns the frozen [`Topology`], the per-node dirty bitmap, and
//! the epoch counter. A cycle walks the arena once in topological order,
//! recomputing only dirty nodes; a node that reports a meaningful change
//! dirties its children, which — by the monotone index invariant — are always
//! visited later in the same pass. No node is stabilized twice per cycle and
//! there is no fixed-point iteration.

use std::time::Instant;

use fixedbitset::FixedBitSet;
use thiserror::Error;

use crate::ident::NodeIndex;
use crate::listener::{NullListener, StabilizationListener};
use crate::node::{Node, SourceNode};
use crate::topology::Topology;

/// Errors surfaced by engine operations.
///
/// Stabilization itself never fails: per-node compute errors are routed to
/// the listener and recovered locally.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A node index was outside `[0, node_count)`.
    #[error("node index {index} out of range ({count} nodes)")]
    IndexOutOfRange {
        /// The offending index.
        index: NodeIndex,
        /// Number of nodes in the topology.
        count: usize,
    },
    /// A node name did not resolve.
    #[error("unknown node: {0}")]
    UnknownNode(String),
    /// The addressed node does not accept external writes.
    #[error("node {0} is not a source")]
    NotASource(NodeIndex),
}

/// Drives dirty propagation over a frozen topology.
pub struct StabilizationEngine {
    topology: Topology,
    dirty: FixedBitSet,
    epoch: u64,
    listener: Box<dyn StabilizationListener>,
    last_stabilized_count: u32,
}

impl StabilizationEngine {
    /// Wraps a topology, marking every source dirty so the first call to
    /// [`StabilizationEngine::stabilize`] flushes initial values into their
    /// dependents.
    #[must_use]
    pub fn new(topology: Topology) -> Self {
        let mut dirty = FixedBitSet::with_capacity(topology.node_count());
        for source in topology.source_indices() {
            dirty.insert(source.as_usize());
        }
        Self {
            topology,
            dirty,
            epoch: 0,
            listener: Box::new(NullListener),
            last_stabilized_count: 0,
        }
    }

    /// Shared access to the frozen topology.
    #[must_use]
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Current epoch: the number of completed stabilization cycles, offset by
    /// any seed applied via [`StabilizationEngine::seed_epoch`].
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Number of nodes in the topology.
    #[must_use]
    pub fn node_count(&self) -> u32 {
        self.topology.node_count() as u32
    }

    /// Nodes recomputed by the most recent cycle.
    #[must_use]
    pub fn last_stabilized_count(&self) -> u32 {
        self.last_stabilized_count
    }

    /// Seeds the epoch counter, e.g. when resuming from a recorded state.
    ///
    /// Must not be called between a cycle's start and end; epochs observed by
    /// listeners always increase strictly.
    pub fn seed_epoch(&mut self, epoch: u64) {
        self.epoch = epoch;
    }

    /// Installs (or replaces) the engine's single listener.
    ///
    /// Fan-out to multiple observers is the job of
    /// [`crate::CompositeListener`].
    pub fn set_listener(&mut self, listener: Box<dyn StabilizationListener>) {
        self.listener = listener;
    }

    /// Shared access to a node by topological index.
    #[must_use]
    pub fn node(&self, index: NodeIndex) -> Option<&dyn Node> {
        self.topology.node(index)
    }

    /// Resolves a node name to its topological index.
    #[must_use]
    pub fn topo_index(&self, name: &str) -> Option<NodeIndex> {
        self.topology.topo_index(name)
    }

    /// Marks the node at `index` dirty for the next cycle.
    pub fn mark_dirty(&mut self, index: NodeIndex) -> Result<(), EngineError> {
        if index.as_usize() >= self.topology.node_count() {
            return Err(EngineError::IndexOutOfRange {
                index,
                count: self.topology.node_count(),
            });
        }
        self.dirty.insert(index.as_usize());
        Ok(())
    }

    /// Marks a node dirty by name.
    pub fn mark_dirty_by_name(&mut self, name: &str) -> Result<(), EngineError> {
        let index = self
            .topology
            .topo_index(name)
            .ok_or_else(|| EngineError::UnknownNode(name.to_owned()))?;
        self.mark_dirty(index)
    }

    /// Returns `true` when the node at `index` is currently marked dirty.
    #[must_use]
    pub fn is_dirty(&self, index: NodeIndex) -> bool {
        self.dirty.contains(index.as_usize())
    }

    /// Exclusive access to the external-write surface of a source node.
    ///
    /// The caller owns the follow-up [`StabilizationEngine::mark_dirty`];
    /// writing without marking leaves the value invisible until something
    /// else dirties the node.
    pub fn source_mut(&mut self, index: NodeIndex) -> Result<&mut dyn SourceNode, EngineError> {
        let count = self.topology.node_count();
        if index.as_usize() >= count {
            return Err(EngineError::IndexOutOfRange { index, count });
        }
        if !self.topology.is_source(index) {
            return Err(EngineError::NotASource(index));
        }
        self.topology
            .node_mut(index)
            .and_then(|n| n.as_source())
            .ok_or(EngineError::NotASource(index))
    }

    /// Runs one stabilization cycle and returns the number of nodes
    /// recomputed.
    ///
    /// Exactly one `on_stabilization_start` / `on_stabilization_end` pair is
    /// emitted per call, with a strictly increased epoch. A node whose
    /// stabilization fails is reported via `on_node_error`, keeps its dirty
    /// bit cleared, is excluded from the returned count, and does not halt
    /// the pass.
    pub fn stabilize(&mut self) -> u32 {
        self.epoch += 1;
        let epoch = self.epoch;
        self.listener.on_stabilization_start(epoch);

        let mut count: u32 = 0;
        let node_count = self.topology.node_count();
        for i in 0..node_count {
            if !self.dirty.contains(i) {
                continue;
            }
            // Clear before the call: a node re-dirtying itself must not run
            // twice within this pass.
            self.dirty.set(i, false);
            let index = NodeIndex::from_raw(i as u32);

            let started = Instant::now();
            let outcome = {
                let (view, node) = self.topology.split_for_stabilize(i);
                node.stabilize(&view)
            };
            let duration_nanos = started.elapsed().as_nanos() as u64;

            match outcome {
                Ok(changed) => {
                    count += 1;
                    if let Some(node) = self.topology.node(index) {
                        self.listener.on_node_stabilized(
                            epoch,
                            index,
                            node.name(),
                            changed,
                            duration_nanos,
                        );
                    }
                    if changed {
                        let (start, end) = self.topology.children_range(index);
                        for k in start..end {
                            // Children sit strictly after `i`; they are
                            // visited later in this same pass.
                            self.dirty.insert(self.topology.child_at(k).as_usize());
                        }
                    }
                }
                Err(error) => {
                    if let Some(node) = self.topology.node(index) {
                        self.listener
                            .on_node_error(epoch, index, node.name(), &error);
                    }
                }
            }
        }

        // End-of-cycle source hook; a no-op for the built-in sources.
        for i in 0..node_count {
            let index = NodeIndex::from_raw(i as u32);
            if self.topology.is_source(index) {
                if let Some(source) = self.topology.node_mut(index).and_then(|n| n.as_source()) {
                    source.clear_dirty();
                }
            }
        }

        self.last_stabilized_count = count;
        self.listener.on_stabilization_end(epoch, count);
        count
    }

    /// Exclusive topology access for same-crate collaborators (snapshot).
    pub(crate) fn topology_mut(&mut self) -> &mut Topology {
        &mut self.topology
    }
}

impl core::fmt::Debug for StabilizationEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StabilizationEngine")
            .field("epoch", &self.epoch)
            .field("node_count", &self.topology.node_count())
            .field("last_stabilized_count", &self.last_stabilized_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::computed::ScalarComputed;
    use crate::cutoff::Cutoff;
    use crate::kernels::{Difference, Sum};
    use crate::source::ScalarSource;
    use crate::topology::TopologyBuilder;

    fn two_level_engine() -> StabilizationEngine {
        let mut b = TopologyBuilder::new();
        b.add_source(Box::new(ScalarSource::new("a", 10.0, Cutoff::Exact)))
            .unwrap();
        b.add_source(Box::new(ScalarSource::new("b", 4.0, Cutoff::Exact)))
            .unwrap();
        b.add_computed(
            Box::new(ScalarComputed::new("a-b", Box::new(Difference), Cutoff::Exact)),
            vec!["a".to_owned(), "b".to_owned()],
        )
        .unwrap();
        b.add_computed(
            Box::new(ScalarComputed::new("sum", Box::new(Sum), Cutoff::Exact)),
            vec!["a-b".to_owned(), "a".to_owned()],
        )
        .unwrap();
        StabilizationEngine::new(b.build().unwrap())
    }

    fn scalar_of(engine: &StabilizationEngine, name: &str) -> f64 {
        let idx = engine.topo_index(name).unwrap();
        engine.node(idx).unwrap().scalar().unwrap()
    }

    #[test]
    fn initial_stabilize_flushes_all_sources() {
        let mut engine = two_level_engine();
        assert_eq!(engine.stabilize(), 4);
        assert_eq!(scalar_of(&engine, "a-b"), 6.0);
        assert_eq!(scalar_of(&engine, "sum"), 16.0);
        assert_eq!(engine.epoch(), 1);
        // Nothing dirty: the next cycle recomputes nothing.
        assert_eq!(engine.stabilize(), 0);
        assert_eq!(engine.epoch(), 2);
    }

    #[test]
    fn only_dependents_of_dirty_sources_recompute() {
        let mut engine = two_level_engine();
        let _ = engine.stabilize();

        let b = engine.topo_index("b").unwrap();
        engine.source_mut(b).unwrap().update_scalar(5.0).unwrap();
        engine.mark_dirty(b).unwrap();

        // b → a-b → sum; `a` stays untouched.
        assert_eq!(engine.stabilize(), 3);
        assert_eq!(scalar_of(&engine, "a-b"), 5.0);
        assert_eq!(scalar_of(&engine, "sum"), 15.0);
    }

    #[test]
    fn unchanged_recompute_prunes_children() {
        let mut engine = two_level_engine();
        let _ = engine.stabilize();

        // Re-dirty `a` without changing its value: `a` recomputes, reports no
        // change, and neither computed node runs.
        let a = engine.topo_index("a").unwrap();
        engine.mark_dirty(a).unwrap();
        assert_eq!(engine.stabilize(), 1);
    }

    #[test]
    fn mark_dirty_rejects_bad_addresses() {
        let mut engine = two_level_engine();
        assert!(matches!(
            engine.mark_dirty(NodeIndex::from_raw(99)),
            Err(EngineError::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            engine.mark_dirty_by_name("ghost"),
            Err(EngineError::UnknownNode(_))
        ));
    }

    #[test]
    fn source_mut_rejects_computed_nodes() {
        let mut engine = two_level_engine();
        let computed = engine.topo_index("sum").unwrap();
        assert!(matches!(
            engine.source_mut(computed),
            Err(EngineError::NotASource(_))
        ));
    }
}
