// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Computed nodes: values derived from upstream nodes each stabilization.
//!
//! A computed node owns a kernel and a cached output. Stabilizing evaluates
//! the kernel against the bound upstream handles, applies the node's cutoff
//! against the cached value, and publishes the new value. Upstream handles
//! are installed once by the topology builder; at run time they are plain
//! index reads through the [`UpstreamView`].

use crate::cutoff::{any_element_changed, Cutoff};
use crate::ident::NodeIndex;
use crate::kernel::{KernelArgs, PredicateKernel, ScalarKernel, VectorKernel};
use crate::node::{Node, StabilizeError, UpstreamView};
use crate::snapshot::{SnapshotError, Snapshotable};

const F64_BYTES: usize = 8;

/// A scalar derived from any number of upstreams.
///
/// Covers the 1-ary through N-ary shapes: arity is fixed by the upstream list
/// declared at registration, and the kernel checks it at evaluation.
pub struct ScalarComputed {
    name: String,
    upstreams: Vec<NodeIndex>,
    kernel: Box<dyn ScalarKernel>,
    cutoff: Cutoff,
    value: f64,
}

impl ScalarComputed {
    /// Creates a scalar computed node around `kernel`.
    #[must_use]
    pub fn new(name: impl Into<String>, kernel: Box<dyn ScalarKernel>, cutoff: Cutoff) -> Self {
        Self {
            name: name.into(),
            upstreams: Vec::new(),
            kernel,
            cutoff,
            value: f64::NAN,
        }
    }
}

impl Node for ScalarComputed {
    fn name(&self) -> &str {
        &self.name
    }

    fn stabilize(&mut self, view: &UpstreamView<'_>) -> Result<bool, StabilizeError> {
        let args = KernelArgs::new(view, &self.upstreams);
        let next = self.kernel.eval(&args)?;
        let changed = self.cutoff.changed(self.value, next);
        self.value = next;
        Ok(changed)
    }

    fn scalar(&self) -> Option<f64> {
        Some(self.value)
    }

    fn bind_upstreams(&mut self, resolved: &[NodeIndex]) {
        self.upstreams = resolved.to_vec();
    }

    fn snapshot(&self) -> Option<&dyn Snapshotable> {
        Some(self)
    }

    fn snapshot_mut(&mut self) -> Option<&mut dyn Snapshotable> {
        Some(self)
    }
}

impl Snapshotable for ScalarComputed {
    fn snapshot_size_bytes(&self) -> usize {
        F64_BYTES + self.kernel.state_size_bytes()
    }

    fn snapshot_to(&self, buf: &mut [u8]) -> usize {
        buf[..F64_BYTES].copy_from_slice(&self.value.to_be_bytes());
        let state = self.kernel.state_size_bytes();
        self.kernel.write_state(&mut buf[F64_BYTES..F64_BYTES + state]);
        F64_BYTES + state
    }

    fn restore_from(&mut self, buf: &[u8]) -> Result<usize, SnapshotError> {
        let bytes = buf.get(..F64_BYTES).ok_or(SnapshotError::Truncated {
            need: F64_BYTES,
            have: buf.len(),
        })?;
        let mut raw = [0u8; F64_BYTES];
        raw.copy_from_slice(bytes);
        self.value = f64::from_be_bytes(raw);

        let state = self.kernel.state_size_bytes();
        let rest = buf
            .get(F64_BYTES..F64_BYTES + state)
            .ok_or(SnapshotError::Truncated {
                need: F64_BYTES + state,
                have: buf.len(),
            })?;
        self.kernel.read_state(rest)?;
        Ok(F64_BYTES + state)
    }
}

impl core::fmt::Debug for ScalarComputed {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScalarComputed")
            .field("name", &self.name)
            .field("upstreams", &self.upstreams)
            .field("cutoff", &self.cutoff)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}

/// A fixed-size vector derived from upstreams.
///
/// The kernel writes into a pre-allocated scratch buffer; the node publishes
/// it only after the element-wise tolerance comparison, so readers never see
/// a half-written vector.
pub struct VectorComputed {
    name: String,
    upstreams: Vec<NodeIndex>,
    kernel: Box<dyn VectorKernel>,
    tolerance: f64,
    values: Vec<f64>,
    scratch: Vec<f64>,
}

impl VectorComputed {
    /// Creates a vector computed node producing `size` elements.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        kernel: Box<dyn VectorKernel>,
        size: usize,
        tolerance: f64,
    ) -> Self {
        Self {
            name: name.into(),
            upstreams: Vec::new(),
            kernel,
            tolerance,
            values: vec![f64::NAN; size],
            scratch: vec![0.0; size],
        }
    }

    /// Number of elements produced.
    #[must_use]
    pub fn size(&self) -> usize {
        self.values.len()
    }
}

impl Node for VectorComputed {
    fn name(&self) -> &str {
        &self.name
    }

    fn stabilize(&mut self, view: &UpstreamView<'_>) -> Result<bool, StabilizeError> {
        let args = KernelArgs::new(view, &self.upstreams);
        self.kernel.eval(&args, &mut self.scratch)?;
        let changed = any_element_changed(&self.values, &self.scratch, self.tolerance);
        self.values.copy_from_slice(&self.scratch);
        Ok(changed)
    }

    fn vector_values(&self) -> Option<&[f64]> {
        Some(&self.values)
    }

    fn bind_upstreams(&mut self, resolved: &[NodeIndex]) {
        self.upstreams = resolved.to_vec();
    }

    fn snapshot(&self) -> Option<&dyn Snapshotable> {
        Some(self)
    }

    fn snapshot_mut(&mut self) -> Option<&mut dyn Snapshotable> {
        Some(self)
    }
}

impl Snapshotable for VectorComputed {
    fn snapshot_size_bytes(&self) -> usize {
        self.values.len() * F64_BYTES + self.kernel.state_size_bytes()
    }

    fn snapshot_to(&self, buf: &mut [u8]) -> usize {
        for (i, &v) in self.values.iter().enumerate() {
            buf[i * F64_BYTES..(i + 1) * F64_BYTES].copy_from_slice(&v.to_be_bytes());
        }
        let base = self.values.len() * F64_BYTES;
        let state = self.kernel.state_size_bytes();
        self.kernel.write_state(&mut buf[base..base + state]);
        base + state
    }

    fn restore_from(&mut self, buf: &[u8]) -> Result<usize, SnapshotError> {
        let base = self.values.len() * F64_BYTES;
        for i in 0..self.values.len() {
            let bytes = buf
                .get(i * F64_BYTES..(i + 1) * F64_BYTES)
                .ok_or(SnapshotError::Truncated {
                    need: base,
                    have: buf.len(),
                })?;
            let mut raw = [0u8; F64_BYTES];
            raw.copy_from_slice(bytes);
            self.values[i] = f64::from_be_bytes(raw);
        }
        let state = self.kernel.state_size_bytes();
        let rest = buf
            .get(base..base + state)
            .ok_or(SnapshotError::Truncated {
                need: base + state,
                have: buf.len(),
            })?;
        self.kernel.read_state(rest)?;
        Ok(base + state)
    }
}

impl core::fmt::Debug for VectorComputed {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("VectorComputed")
            .field("name", &self.name)
            .field("size", &self.values.len())
            .finish_non_exhaustive()
    }
}

/// A boolean derived from upstreams.
///
/// Reports *changed* on its first stabilization regardless of the produced
/// value, thereafter only on a flip — downstream wiring always observes the
/// initial state.
pub struct BooleanComputed {
    name: String,
    upstreams: Vec<NodeIndex>,
    kernel: Box<dyn PredicateKernel>,
    value: bool,
    first: bool,
}

impl BooleanComputed {
    /// Creates a boolean computed node around `kernel`.
    #[must_use]
    pub fn new(name: impl Into<String>, kernel: Box<dyn PredicateKernel>) -> Self {
        Self {
            name: name.into(),
            upstreams: Vec::new(),
            kernel,
            value: false,
            first: true,
        }
    }
}

impl Node for BooleanComputed {
    fn name(&self) -> &str {
        &self.name
    }

    fn stabilize(&mut self, view: &UpstreamView<'_>) -> Result<bool, StabilizeError> {
        let args = KernelArgs::new(view, &self.upstreams);
        let next = self.kernel.eval(&args)?;
        let changed = self.first || next != self.value;
        self.first = false;
        self.value = next;
        Ok(changed)
    }

    fn boolean(&self) -> Option<bool> {
        Some(self.value)
    }

    fn bind_upstreams(&mut self, resolved: &[NodeIndex]) {
        self.upstreams = resolved.to_vec();
    }

    fn snapshot(&self) -> Option<&dyn Snapshotable> {
        Some(self)
    }

    fn snapshot_mut(&mut self) -> Option<&mut dyn Snapshotable> {
        Some(self)
    }
}

impl Snapshotable for BooleanComputed {
    fn snapshot_size_bytes(&self) -> usize {
        2 + self.kernel.state_size_bytes()
    }

    fn snapshot_to(&self, buf: &mut [u8]) -> usize {
        buf[0] = u8::from(self.value);
        buf[1] = u8::from(self.first);
        let state = self.kernel.state_size_bytes();
        self.kernel.write_state(&mut buf[2..2 + state]);
        2 + state
    }

    fn restore_from(&mut self, buf: &[u8]) -> Result<usize, SnapshotError> {
        if buf.len() < 2 {
            return Err(SnapshotError::Truncated {
                need: 2,
                have: buf.len(),
            });
        }
        self.value = buf[0] != 0;
        self.first = buf[1] != 0;
        let state = self.kernel.state_size_bytes();
        let rest = buf.get(2..2 + state).ok_or(SnapshotError::Truncated {
            need: 2 + state,
            have: buf.len(),
        })?;
        self.kernel.read_state(rest)?;
        Ok(2 + state)
    }
}

impl core::fmt::Debug for BooleanComputed {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BooleanComputed")
            .field("name", &self.name)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}
