// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Kernel traits: the callable a computed node evaluates.
//!
//! A kernel is a plain struct with an `eval` method. It may own rolling state
//! (moving windows, smoothers); that state belongs to the kernel and travels
//! with the node through snapshot/restore via the byte hooks on
//! [`KernelState`]. The engine never sees kernels — only the owning node does.

use thiserror::Error;

use crate::ident::NodeIndex;
use crate::node::UpstreamView;
use crate::snapshot::SnapshotError;

/// Error raised by a kernel during evaluation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KernelError {
    /// The number of bound upstreams does not match the kernel's arity.
    #[error("expected {expected} upstream(s), got {actual}")]
    Arity {
        /// Arity the kernel was built for.
        expected: usize,
        /// Number of upstreams actually bound.
        actual: usize,
    },
    /// A vector read addressed an element past the end of the input.
    #[error("element {element} out of range for vector of length {len}")]
    ElementOutOfRange {
        /// Requested element.
        element: usize,
        /// Length of the vector input.
        len: usize,
    },
    /// Kernel-specific evaluation failure.
    #[error("evaluation failed: {0}")]
    Eval(String),
}

/// Accessor over the upstreams bound to a computed node, in declaration order.
///
/// `k` below is the position in the node's upstream list, not a topological
/// index; the args resolve it through the bindings installed at build time.
pub struct KernelArgs<'v, 'a> {
    view: &'v UpstreamView<'a>,
    upstreams: &'v [NodeIndex],
}

impl<'v, 'a> KernelArgs<'v, 'a> {
    /// Binds a view and an ordered upstream list for one evaluation.
    #[must_use]
    pub fn new(view: &'v UpstreamView<'a>, upstreams: &'v [NodeIndex]) -> Self {
        Self { view, upstreams }
    }

    /// Number of bound upstreams.
    #[must_use]
    pub fn arity(&self) -> usize {
        self.upstreams.len()
    }

    /// Scalar value of the `k`-th bound upstream.
    #[must_use]
    pub fn scalar(&self, k: usize) -> f64 {
        debug_assert!(k < self.upstreams.len(), "upstream slot {k} not bound");
        self.upstreams
            .get(k)
            .map_or(f64::NAN, |&i| self.view.scalar(i))
    }

    /// Vector contents of the `k`-th bound upstream.
    #[must_use]
    pub fn vector(&self, k: usize) -> &'a [f64] {
        debug_assert!(k < self.upstreams.len(), "upstream slot {k} not bound");
        self.upstreams
            .get(k)
            .map_or(&[] as &[f64], |&i| self.view.vector(i))
    }

    /// Boolean value of the `k`-th bound upstream.
    #[must_use]
    pub fn boolean(&self, k: usize) -> bool {
        debug_assert!(k < self.upstreams.len(), "upstream slot {k} not bound");
        self.upstreams
            .get(k)
            .is_some_and(|&i| self.view.boolean(i))
    }

    /// Ensures the kernel was bound with exactly `expected` upstreams.
    pub fn require_arity(&self, expected: usize) -> Result<(), KernelError> {
        let actual = self.upstreams.len();
        if actual == expected {
            Ok(())
        } else {
            Err(KernelError::Arity { expected, actual })
        }
    }
}

/// Binary-state hooks shared by all kernel shapes.
///
/// Stateless kernels keep the defaults (zero bytes). Stateful kernels report a
/// fixed size and read/write exactly that many bytes; the owning node splices
/// the kernel's bytes into its own snapshot payload.
pub trait KernelState {
    /// Number of state bytes this kernel persists.
    fn state_size_bytes(&self) -> usize {
        0
    }

    /// Writes exactly [`KernelState::state_size_bytes`] bytes into `buf`.
    fn write_state(&self, buf: &mut [u8]) {
        debug_assert!(buf.is_empty(), "stateless kernel handed a state buffer");
    }

    /// Restores state from exactly [`KernelState::state_size_bytes`] bytes.
    fn read_state(&mut self, buf: &[u8]) -> Result<(), SnapshotError> {
        debug_assert!(buf.is_empty(), "stateless kernel handed a state buffer");
        Ok(())
    }
}

/// Kernel reducing its upstreams to a scalar.
pub trait ScalarKernel: KernelState {
    /// Evaluates the kernel against the bound upstreams.
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<f64, KernelError>;
}

/// Kernel writing a full vector into a pre-allocated output buffer.
pub trait VectorKernel: KernelState {
    /// Evaluates the kernel, filling `out` (sized by the owning node).
    fn eval(&mut self, args: &KernelArgs<'_, '_>, out: &mut [f64]) -> Result<(), KernelError>;
}

/// Kernel reducing its upstreams to a boolean.
pub trait PredicateKernel: KernelState {
    /// Evaluates the predicate against the bound upstreams.
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<bool, KernelError>;
}
