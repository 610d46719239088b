// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Node identity: the topological index handle.

/// Position of a node in topological order, used as its O(1) handle.
///
/// Indices are assigned by [`crate::TopologyBuilder::build`] such that for
/// every edge `u → v`, `u`'s index is strictly less than `v`'s. The index is
/// immutable for the lifetime of the topology; external layers (intake,
/// snapshots, listeners) address nodes exclusively through it.
///
/// # Invariants
/// - Valid indices lie in `[0, node_count)` for the owning topology.
/// - A `NodeIndex` is only meaningful against the topology that issued it;
///   indices are not portable across builds.
///
/// The `#[repr(transparent)]` attribute keeps the wrapper layout-identical to
/// `u32` so index arrays stay dense.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct NodeIndex(u32);

impl NodeIndex {
    /// Constructs a `NodeIndex` from a raw `u32` position.
    #[must_use]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Returns the underlying raw position.
    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    /// Returns the position widened to `usize` for slice addressing.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeIndex {
    fn from(value: u32) -> Self {
        Self(value)
    }
}
