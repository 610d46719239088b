// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Immutable CSR topology and its builder.
//!
//! The topology is frozen at build time: nodes live in a flat arena ordered
//! topologically, forward edges are a compressed-sparse-row pair of arrays,
//! and the name index gives O(1) lookup. Because the builder is consumed by
//! [`TopologyBuilder::build`], structural mutation after the freeze is
//! unrepresentable.
//!
//! Determinism contract
//! - Kahn's algorithm runs over an array-backed queue seeded in insertion
//!   order; ties among in-degree-zero nodes resolve to whichever was
//!   registered first. Identical builder inputs therefore produce identical
//!   `topo_index` assignments.
//! - For every edge `u → v`, `topo_index(u) < topo_index(v)`.

use fixedbitset::FixedBitSet;
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::ident::NodeIndex;
use crate::node::Node;
use crate::node::UpstreamView;

/// Structural errors reported while assembling a topology.
#[derive(Debug, Error)]
pub enum TopologyError {
    /// Two nodes were registered under the same name.
    #[error("duplicate node name: {0}")]
    DuplicateName(String),
    /// An upstream reference does not resolve to a registered node.
    #[error("unknown upstream `{upstream}` for node `{node}`")]
    UnknownUpstream {
        /// Node that declared the dangling reference.
        node: String,
        /// The unresolved upstream name.
        upstream: String,
    },
    /// The edge set contains a cycle.
    #[error("cycle detected: only {processed} of {total} nodes could be ordered")]
    CycleDetected {
        /// Nodes emitted before the sort stalled.
        processed: usize,
        /// Total nodes registered.
        total: usize,
    },
}

/// Immutable post-build store: nodes in topological order plus the CSR edge
/// arrays. Read-only except for the engine's stabilization access.
pub struct Topology {
    nodes: Vec<Box<dyn Node>>,
    is_source: FixedBitSet,
    child_offsets: Vec<u32>,
    child_list: Vec<u32>,
    parent_count: Vec<u32>,
    name_index: FxHashMap<String, NodeIndex>,
}

impl Topology {
    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Shared access to a node by topological index.
    #[must_use]
    pub fn node(&self, index: NodeIndex) -> Option<&dyn Node> {
        self.nodes.get(index.as_usize()).map(AsRef::as_ref)
    }

    /// Returns `true` when the node at `index` is a source.
    #[must_use]
    pub fn is_source(&self, index: NodeIndex) -> bool {
        self.is_source.contains(index.as_usize())
    }

    /// Iterates the topological indices of all source nodes, ascending.
    pub fn source_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.is_source.ones().map(|i| NodeIndex::from_raw(i as u32))
    }

    /// Half-open `[start, end)` range into the child list for `index`.
    #[must_use]
    pub fn children_range(&self, index: NodeIndex) -> (usize, usize) {
        let i = index.as_usize();
        (
            self.child_offsets[i] as usize,
            self.child_offsets[i + 1] as usize,
        )
    }

    /// Child index at flat position `k` of the child list.
    #[must_use]
    pub fn child_at(&self, k: usize) -> NodeIndex {
        NodeIndex::from_raw(self.child_list[k])
    }

    /// Iterates the direct children of `index` in edge-installation order.
    pub fn children(&self, index: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        let (start, end) = self.children_range(index);
        self.child_list[start..end]
            .iter()
            .map(|&c| NodeIndex::from_raw(c))
    }

    /// Resolves a node name to its topological index.
    #[must_use]
    pub fn topo_index(&self, name: &str) -> Option<NodeIndex> {
        self.name_index.get(name).copied()
    }

    /// In-degree of the node at `index` (diagnostics).
    #[must_use]
    pub fn parent_count(&self, index: NodeIndex) -> u32 {
        self.parent_count[index.as_usize()]
    }

    /// Splits the arena for one stabilization: a read-only view of the strict
    /// topological prefix plus exclusive access to the node itself.
    pub(crate) fn split_for_stabilize(
        &mut self,
        index: usize,
    ) -> (UpstreamView<'_>, &mut Box<dyn Node>) {
        let (prefix, rest) = self.nodes.split_at_mut(index);
        (UpstreamView::new(prefix), &mut rest[0])
    }

    /// Exclusive access to a node by topological index.
    pub(crate) fn node_mut(&mut self, index: NodeIndex) -> Option<&mut Box<dyn Node>> {
        self.nodes.get_mut(index.as_usize())
    }
}

impl core::fmt::Debug for Topology {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Topology")
            .field("node_count", &self.nodes.len())
            .field("edge_count", &self.child_list.len())
            .finish_non_exhaustive()
    }
}

/// Registration record kept per node until the freeze.
struct Registered {
    node: Box<dyn Node>,
    upstreams: Vec<String>,
    is_source: bool,
}

/// Accumulates nodes and edges, then freezes them into a [`Topology`].
#[derive(Default)]
pub struct TopologyBuilder {
    entries: Vec<Registered>,
    names: FxHashMap<String, usize>,
}

impl TopologyBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes registered so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no nodes have been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers a source node.
    pub fn add_source(&mut self, node: Box<dyn Node>) -> Result<(), TopologyError> {
        self.add(node, Vec::new(), true)
    }

    /// Registers a computed node together with its ordered upstream names.
    ///
    /// One edge is installed per upstream reference; the same order is handed
    /// back to the node as resolved indices at build time.
    pub fn add_computed(
        &mut self,
        node: Box<dyn Node>,
        upstreams: Vec<String>,
    ) -> Result<(), TopologyError> {
        self.add(node, upstreams, false)
    }

    fn add(
        &mut self,
        node: Box<dyn Node>,
        upstreams: Vec<String>,
        is_source: bool,
    ) -> Result<(), TopologyError> {
        let name = node.name().to_owned();
        if self.names.contains_key(&name) {
            return Err(TopologyError::DuplicateName(name));
        }
        self.names.insert(name, self.entries.len());
        self.entries.push(Registered {
            node,
            upstreams,
            is_source,
        });
        Ok(())
    }

    /// Freezes the registered nodes into an immutable topology.
    ///
    /// Fails with [`TopologyError::UnknownUpstream`] on a dangling reference
    /// and [`TopologyError::CycleDetected`] when Kahn's algorithm cannot order
    /// every node.
    pub fn build(self) -> Result<Topology, TopologyError> {
        let total = self.entries.len();

        // Resolve upstream names to registration indices.
        let mut resolved_upstreams: Vec<Vec<usize>> = Vec::with_capacity(total);
        for entry in &self.entries {
            let mut resolved = Vec::with_capacity(entry.upstreams.len());
            for upstream in &entry.upstreams {
                let &idx = self.names.get(upstream).ok_or_else(|| {
                    TopologyError::UnknownUpstream {
                        node: entry.node.name().to_owned(),
                        upstream: upstream.clone(),
                    }
                })?;
                resolved.push(idx);
            }
            resolved_upstreams.push(resolved);
        }

        // Forward adjacency and in-degrees in registration indexing.
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); total];
        let mut in_degree: Vec<u32> = vec![0; total];
        for (downstream, ups) in resolved_upstreams.iter().enumerate() {
            for &upstream in ups {
                children[upstream].push(downstream);
                in_degree[downstream] += 1;
            }
        }

        // Kahn with an array-backed queue; FIFO over insertion order makes
        // the permutation deterministic for identical inputs.
        let mut queue: Vec<usize> = Vec::with_capacity(total);
        let mut head = 0usize;
        for (i, &d) in in_degree.iter().enumerate() {
            if d == 0 {
                queue.push(i);
            }
        }
        let mut topo_of: Vec<u32> = vec![u32::MAX; total];
        let mut order: Vec<usize> = Vec::with_capacity(total);
        while head < queue.len() {
            let current = queue[head];
            head += 1;
            topo_of[current] = order.len() as u32;
            order.push(current);
            for &child in &children[current] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    queue.push(child);
                }
            }
        }
        if order.len() != total {
            return Err(TopologyError::CycleDetected {
                processed: order.len(),
                total,
            });
        }

        // Remap everything into topological indexing.
        let mut is_source = FixedBitSet::with_capacity(total);
        let mut parent_count: Vec<u32> = vec![0; total];
        let mut child_offsets: Vec<u32> = Vec::with_capacity(total + 1);
        let mut child_list: Vec<u32> = Vec::new();
        child_offsets.push(0);
        for &old in &order {
            for &child in &children[old] {
                child_list.push(topo_of[child]);
            }
            child_offsets.push(child_list.len() as u32);
        }

        let mut slots: Vec<Option<Registered>> = self.entries.into_iter().map(Some).collect();
        let mut nodes: Vec<Box<dyn Node>> = Vec::with_capacity(total);
        let mut name_index: FxHashMap<String, NodeIndex> = FxHashMap::default();
        for (new, &old) in order.iter().enumerate() {
            let Some(entry) = slots[old].take() else {
                debug_assert!(false, "topological order visited slot {old} twice");
                continue;
            };
            let mut node = entry.node;
            let bindings: Vec<NodeIndex> = resolved_upstreams[old]
                .iter()
                .map(|&u| NodeIndex::from_raw(topo_of[u]))
                .collect();
            if !bindings.is_empty() {
                node.bind_upstreams(&bindings);
            }
            if entry.is_source {
                is_source.insert(new);
            }
            parent_count[new] = resolved_upstreams[old].len() as u32;
            name_index.insert(node.name().to_owned(), NodeIndex::from_raw(new as u32));
            nodes.push(node);
        }

        Ok(Topology {
            nodes,
            is_source,
            child_offsets,
            child_list,
            parent_count,
            name_index,
        })
    }
}

impl core::fmt::Debug for TopologyBuilder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TopologyBuilder")
            .field("registered", &self.entries.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cutoff::Cutoff;
    use crate::kernels::{Difference, Sum};
    use crate::computed::ScalarComputed;
    use crate::source::ScalarSource;

    fn source(name: &str, value: f64) -> Box<dyn Node> {
        Box::new(ScalarSource::new(name, value, Cutoff::Exact))
    }

    fn sum(name: &str) -> Box<dyn Node> {
        Box::new(ScalarComputed::new(name, Box::new(Sum), Cutoff::Exact))
    }

    #[test]
    fn upstreams_precede_downstreams() {
        let mut b = TopologyBuilder::new();
        // Register downstream-first to force the sort to reorder.
        b.add_computed(
            sum("total"),
            vec!["a".to_owned(), "b".to_owned(), "mid".to_owned()],
        )
        .unwrap();
        b.add_computed(sum("mid"), vec!["a".to_owned()]).unwrap();
        b.add_source(source("a", 1.0)).unwrap();
        b.add_source(source("b", 2.0)).unwrap();

        let topo = b.build().unwrap();
        assert_eq!(topo.node_count(), 4);
        let idx = |name: &str| topo.topo_index(name).unwrap();
        for (u, v) in [("a", "mid"), ("a", "total"), ("b", "total"), ("mid", "total")] {
            assert!(idx(u) < idx(v), "{u} must precede {v}");
        }
        assert_eq!(topo.parent_count(idx("total")), 3);
        assert!(topo.is_source(idx("a")));
        assert!(!topo.is_source(idx("total")));
    }

    #[test]
    fn csr_children_match_edges() {
        let mut b = TopologyBuilder::new();
        b.add_source(source("x", 0.0)).unwrap();
        b.add_computed(sum("y"), vec!["x".to_owned()]).unwrap();
        b.add_computed(sum("z"), vec!["x".to_owned(), "y".to_owned()])
            .unwrap();
        let topo = b.build().unwrap();

        let x = topo.topo_index("x").unwrap();
        let kids: Vec<NodeIndex> = topo.children(x).collect();
        assert_eq!(kids.len(), 2);
        assert!(kids.contains(&topo.topo_index("y").unwrap()));
        assert!(kids.contains(&topo.topo_index("z").unwrap()));

        let (start, end) = topo.children_range(x);
        assert_eq!(end - start, 2);
        assert_eq!(topo.child_at(start), kids[0]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut b = TopologyBuilder::new();
        b.add_source(source("a", 1.0)).unwrap();
        let err = b.add_source(source("a", 2.0)).unwrap_err();
        assert!(matches!(err, TopologyError::DuplicateName(n) if n == "a"));
    }

    #[test]
    fn unknown_upstream_is_rejected() {
        let mut b = TopologyBuilder::new();
        b.add_computed(sum("y"), vec!["ghost".to_owned()]).unwrap();
        let err = b.build().unwrap_err();
        assert!(
            matches!(err, TopologyError::UnknownUpstream { ref node, ref upstream }
                if node == "y" && upstream == "ghost")
        );
    }

    #[test]
    fn cycle_is_rejected_with_progress_count() {
        let mut b = TopologyBuilder::new();
        b.add_source(source("root", 0.0)).unwrap();
        b.add_computed(
            Box::new(ScalarComputed::new("a", Box::new(Difference), Cutoff::Exact)),
            vec!["root".to_owned(), "c".to_owned()],
        )
        .unwrap();
        b.add_computed(sum("b"), vec!["a".to_owned()]).unwrap();
        b.add_computed(sum("c"), vec!["b".to_owned()]).unwrap();

        let err = b.build().unwrap_err();
        match err {
            TopologyError::CycleDetected { processed, total } => {
                assert_eq!(processed, 1); // only `root` ordered
                assert_eq!(total, 4);
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn identical_inputs_build_identical_orderings() {
        let build = || {
            let mut b = TopologyBuilder::new();
            b.add_source(source("s1", 1.0)).unwrap();
            b.add_source(source("s2", 2.0)).unwrap();
            b.add_computed(sum("c1"), vec!["s1".to_owned(), "s2".to_owned()])
                .unwrap();
            b.add_computed(sum("c2"), vec!["s2".to_owned()]).unwrap();
            b.add_computed(sum("c3"), vec!["c1".to_owned(), "c2".to_owned()])
                .unwrap();
            b.build().unwrap()
        };
        let a = build();
        let b = build();
        for name in ["s1", "s2", "c1", "c2", "c3"] {
            assert_eq!(a.topo_index(name), b.topo_index(name), "node {name}");
        }
    }
}
