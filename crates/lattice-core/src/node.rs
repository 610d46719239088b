// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Node traits and the read-only upstream view.
//!
//! The engine sees every node through [`Node`]: a name, a `stabilize` call
//! that reports whether the value changed, and optional capability accessors
//! (scalar / vector / boolean, external writes, snapshot bytes). Everything
//! else — kernels, cutoffs, rolling state — is private to the node.
//!
//! Upstream reads go through [`UpstreamView`], a borrow of the topological
//! prefix `[0, i)` while node `i` stabilizes. Upstream indices are strictly
//! smaller than the reader's own index, so the split is always clean and no
//! node can observe itself or a downstream mid-cycle.

use thiserror::Error;

use crate::ident::NodeIndex;
use crate::kernel::KernelError;
use crate::snapshot::Snapshotable;

/// Error surfaced when a node's stabilization fails.
///
/// Stabilization failures are recovered locally by the engine: the failing
/// node keeps its previous value, the listener sees `on_node_error`, and the
/// pass continues with the next dirty node.
#[derive(Debug, Error)]
pub enum StabilizeError {
    /// The node's kernel reported an evaluation failure.
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),
}

/// Error returned when an external write does not fit the target source.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceError {
    /// A scalar write was applied to a vector source or vice versa.
    #[error("wrong update kind: node accepts {expected} updates")]
    WrongKind {
        /// The update kind the source accepts.
        expected: &'static str,
    },
    /// A vector element write was out of range.
    #[error("element {element} out of range for vector of size {size}")]
    ElementOutOfRange {
        /// Requested element index.
        element: usize,
        /// Size of the vector source.
        size: usize,
    },
    /// A bulk vector write had the wrong length.
    #[error("expected {expected} values, got {actual}")]
    SizeMismatch {
        /// Size of the vector source.
        expected: usize,
        /// Length of the supplied slice.
        actual: usize,
    },
}

/// A unit of computation or data input addressable by the engine.
///
/// The only method every node must do real work in is [`Node::stabilize`];
/// the capability accessors default to `None` so each kind implements exactly
/// the surface it has.
pub trait Node {
    /// Unique name of this node within its topology.
    fn name(&self) -> &str;

    /// Recomputes (or re-reads) the node's value and reports whether it
    /// changed meaningfully per the node's cutoff.
    fn stabilize(&mut self, view: &UpstreamView<'_>) -> Result<bool, StabilizeError>;

    /// Current scalar value, for nodes with the scalar capability.
    fn scalar(&self) -> Option<f64> {
        None
    }

    /// Current vector contents, for nodes with the vector capability.
    fn vector_values(&self) -> Option<&[f64]> {
        None
    }

    /// Per-element headers, when the vector node carries them.
    fn vector_headers(&self) -> Option<&[String]> {
        None
    }

    /// Current boolean value, for nodes with the boolean capability.
    fn boolean(&self) -> Option<bool> {
        None
    }

    /// Installs the resolved topological indices of this node's upstreams, in
    /// the order they were declared at registration.
    ///
    /// Called exactly once by the topology builder after the topological sort
    /// assigns final indices. Sources have no upstreams and keep the default
    /// no-op.
    fn bind_upstreams(&mut self, resolved: &[NodeIndex]) {
        debug_assert!(
            resolved.is_empty(),
            "node `{}` received upstream bindings but does not accept them",
            self.name()
        );
    }

    /// External-write surface, for source nodes.
    fn as_source(&mut self) -> Option<&mut dyn SourceNode> {
        None
    }

    /// Binary-state surface, for stateful nodes.
    fn snapshot(&self) -> Option<&dyn Snapshotable> {
        None
    }

    /// Mutable binary-state surface, for stateful nodes.
    fn snapshot_mut(&mut self) -> Option<&mut dyn Snapshotable> {
        None
    }
}

/// A node whose value is written from outside the engine.
pub trait SourceNode {
    /// Stores a new scalar value.
    fn update_scalar(&mut self, value: f64) -> Result<(), SourceError>;

    /// Stores one vector element.
    fn update_element(&mut self, element: usize, value: f64) -> Result<(), SourceError>;

    /// Stores all vector elements at once.
    fn update_all(&mut self, values: &[f64]) -> Result<(), SourceError>;

    /// End-of-cycle hook invoked after every stabilization pass.
    ///
    /// The built-in sources track their "previous stabilized" state inside
    /// [`Node::stabilize`], so this is a no-op for them; it exists for sources
    /// that keep an unread flag.
    fn clear_dirty(&mut self) {}
}

/// Read-only view over the topological prefix `[0, i)` handed to node `i`
/// while it stabilizes.
///
/// Reads are by [`NodeIndex`]; a read of a node that lacks the requested
/// capability is a wiring bug, flagged with a debug assertion and answered
/// with a neutral fallback (NaN / empty / `false`) in release builds.
#[derive(Clone, Copy)]
pub struct UpstreamView<'a> {
    nodes: &'a [Box<dyn Node>],
}

impl<'a> UpstreamView<'a> {
    /// Wraps the prefix slice of nodes preceding the stabilizing node.
    #[must_use]
    pub fn new(nodes: &'a [Box<dyn Node>]) -> Self {
        Self { nodes }
    }

    /// Number of upstream slots visible through this view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` when no upstream slots are visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Reads the scalar value of an upstream node.
    #[must_use]
    pub fn scalar(&self, index: NodeIndex) -> f64 {
        let value = self
            .nodes
            .get(index.as_usize())
            .and_then(|n| n.scalar());
        debug_assert!(
            value.is_some(),
            "upstream {index} is not a scalar node or is out of range"
        );
        value.unwrap_or(f64::NAN)
    }

    /// Reads the vector contents of an upstream node.
    #[must_use]
    pub fn vector(&self, index: NodeIndex) -> &'a [f64] {
        let values = self
            .nodes
            .get(index.as_usize())
            .and_then(|n| n.vector_values());
        debug_assert!(
            values.is_some(),
            "upstream {index} is not a vector node or is out of range"
        );
        values.unwrap_or(&[])
    }

    /// Reads the boolean value of an upstream node.
    #[must_use]
    pub fn boolean(&self, index: NodeIndex) -> bool {
        let value = self
            .nodes
            .get(index.as_usize())
            .and_then(|n| n.boolean());
        debug_assert!(
            value.is_some(),
            "upstream {index} is not a boolean node or is out of range"
        );
        value.unwrap_or(false)
    }
}

impl core::fmt::Debug for UpstreamView<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UpstreamView")
            .field("len", &self.nodes.len())
            .finish()
    }
}
