// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Source nodes: values written from outside the engine.
//!
//! A source owns its latest value. External writers (the intake layer) mutate
//! it through [`SourceNode`] and then mark the node dirty; the next
//! stabilization compares against the previous stabilized state to decide
//! whether the write propagates.

use crate::cutoff::{any_element_changed, Cutoff};
use crate::node::{Node, SourceNode, SourceError, StabilizeError, UpstreamView};
use crate::snapshot::{SnapshotError, Snapshotable};

const F64_BYTES: usize = 8;

fn write_f64(buf: &mut [u8], at: usize, value: f64) {
    buf[at..at + F64_BYTES].copy_from_slice(&value.to_be_bytes());
}

fn read_f64(buf: &[u8], at: usize) -> Result<f64, SnapshotError> {
    let bytes = buf
        .get(at..at + F64_BYTES)
        .ok_or(SnapshotError::Truncated {
            need: at + F64_BYTES,
            have: buf.len(),
        })?;
    let mut raw = [0u8; F64_BYTES];
    raw.copy_from_slice(bytes);
    Ok(f64::from_be_bytes(raw))
}

/// A single externally written `f64`.
///
/// The previous-stabilized cache starts at NaN, so the first stabilization
/// reports *changed* under every cutoff except [`Cutoff::Never`] — this is
/// what flushes initial values into dependents on the first pass.
#[derive(Debug)]
pub struct ScalarSource {
    name: String,
    value: f64,
    prev: f64,
    cutoff: Cutoff,
}

impl ScalarSource {
    /// Creates a scalar source holding `initial`.
    #[must_use]
    pub fn new(name: impl Into<String>, initial: f64, cutoff: Cutoff) -> Self {
        Self {
            name: name.into(),
            value: initial,
            prev: f64::NAN,
            cutoff,
        }
    }

    /// Current (possibly not yet stabilized) value.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Node for ScalarSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn stabilize(&mut self, _view: &UpstreamView<'_>) -> Result<bool, StabilizeError> {
        let changed = self.cutoff.changed(self.prev, self.value);
        self.prev = self.value;
        Ok(changed)
    }

    fn scalar(&self) -> Option<f64> {
        Some(self.value)
    }

    fn as_source(&mut self) -> Option<&mut dyn SourceNode> {
        Some(self)
    }

    fn snapshot(&self) -> Option<&dyn Snapshotable> {
        Some(self)
    }

    fn snapshot_mut(&mut self) -> Option<&mut dyn Snapshotable> {
        Some(self)
    }
}

impl SourceNode for ScalarSource {
    fn update_scalar(&mut self, value: f64) -> Result<(), SourceError> {
        self.value = value;
        Ok(())
    }

    fn update_element(&mut self, _element: usize, _value: f64) -> Result<(), SourceError> {
        Err(SourceError::WrongKind { expected: "scalar" })
    }

    fn update_all(&mut self, _values: &[f64]) -> Result<(), SourceError> {
        Err(SourceError::WrongKind { expected: "scalar" })
    }
}

impl Snapshotable for ScalarSource {
    fn snapshot_size_bytes(&self) -> usize {
        2 * F64_BYTES
    }

    fn snapshot_to(&self, buf: &mut [u8]) -> usize {
        write_f64(buf, 0, self.value);
        write_f64(buf, F64_BYTES, self.prev);
        2 * F64_BYTES
    }

    fn restore_from(&mut self, buf: &[u8]) -> Result<usize, SnapshotError> {
        self.value = read_f64(buf, 0)?;
        self.prev = read_f64(buf, F64_BYTES)?;
        Ok(2 * F64_BYTES)
    }
}

/// A fixed-size externally written vector with optional per-element headers
/// and an element-wise absolute tolerance.
#[derive(Debug)]
pub struct VectorSource {
    name: String,
    values: Vec<f64>,
    prev: Vec<f64>,
    headers: Option<Vec<String>>,
    tolerance: f64,
}

impl VectorSource {
    /// Creates a vector source from its initial contents.
    ///
    /// `headers`, when present, must match the vector's size — this is the
    /// constructor's caller contract, checked with a debug assertion.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        initial: Vec<f64>,
        headers: Option<Vec<String>>,
        tolerance: f64,
    ) -> Self {
        debug_assert!(
            headers.as_ref().is_none_or(|h| h.len() == initial.len()),
            "header count must match vector size"
        );
        let size = initial.len();
        Self {
            name: name.into(),
            values: initial,
            prev: vec![f64::NAN; size],
            headers,
            tolerance,
        }
    }

    /// Number of elements.
    #[must_use]
    pub fn size(&self) -> usize {
        self.values.len()
    }
}

impl Node for VectorSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn stabilize(&mut self, _view: &UpstreamView<'_>) -> Result<bool, StabilizeError> {
        let changed = any_element_changed(&self.prev, &self.values, self.tolerance);
        self.prev.copy_from_slice(&self.values);
        Ok(changed)
    }

    fn vector_values(&self) -> Option<&[f64]> {
        Some(&self.values)
    }

    fn vector_headers(&self) -> Option<&[String]> {
        self.headers.as_deref()
    }

    fn as_source(&mut self) -> Option<&mut dyn SourceNode> {
        Some(self)
    }

    fn snapshot(&self) -> Option<&dyn Snapshotable> {
        Some(self)
    }

    fn snapshot_mut(&mut self) -> Option<&mut dyn Snapshotable> {
        Some(self)
    }
}

impl SourceNode for VectorSource {
    fn update_scalar(&mut self, _value: f64) -> Result<(), SourceError> {
        Err(SourceError::WrongKind { expected: "vector" })
    }

    fn update_element(&mut self, element: usize, value: f64) -> Result<(), SourceError> {
        let size = self.values.len();
        let slot = self
            .values
            .get_mut(element)
            .ok_or(SourceError::ElementOutOfRange { element, size })?;
        *slot = value;
        Ok(())
    }

    fn update_all(&mut self, values: &[f64]) -> Result<(), SourceError> {
        if values.len() != self.values.len() {
            return Err(SourceError::SizeMismatch {
                expected: self.values.len(),
                actual: values.len(),
            });
        }
        self.values.copy_from_slice(values);
        Ok(())
    }
}

impl Snapshotable for VectorSource {
    fn snapshot_size_bytes(&self) -> usize {
        2 * self.values.len() * F64_BYTES
    }

    fn snapshot_to(&self, buf: &mut [u8]) -> usize {
        for (i, &v) in self.values.iter().enumerate() {
            write_f64(buf, i * F64_BYTES, v);
        }
        let base = self.values.len() * F64_BYTES;
        for (i, &v) in self.prev.iter().enumerate() {
            write_f64(buf, base + i * F64_BYTES, v);
        }
        2 * self.values.len() * F64_BYTES
    }

    fn restore_from(&mut self, buf: &[u8]) -> Result<usize, SnapshotError> {
        for i in 0..self.values.len() {
            self.values[i] = read_f64(buf, i * F64_BYTES)?;
        }
        let base = self.values.len() * F64_BYTES;
        for i in 0..self.prev.len() {
            self.prev[i] = read_f64(buf, base + i * F64_BYTES)?;
        }
        Ok(2 * self.values.len() * F64_BYTES)
    }
}
