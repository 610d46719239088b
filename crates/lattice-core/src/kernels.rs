// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Built-in kernel library.
//!
//! Arithmetic reducers, book/curve helpers, and the rolling indicators the
//! node-type registry wires up. Rolling kernels own their state and persist it
//! through the [`KernelState`] byte hooks; everything is fixed-size and
//! big-endian on the wire.

use crate::kernel::{KernelArgs, KernelError, KernelState, PredicateKernel, ScalarKernel, VectorKernel};
use crate::snapshot::SnapshotError;

const F64_BYTES: usize = 8;

fn put_f64(buf: &mut [u8], at: usize, value: f64) {
    buf[at..at + F64_BYTES].copy_from_slice(&value.to_be_bytes());
}

fn get_f64(buf: &[u8], at: usize) -> Result<f64, SnapshotError> {
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

fn put_u64(buf: &mut [u8], at: usize, value: u64) {
    buf[at..at + 8].copy_from_slice(&value.to_be_bytes());
}

fn get_u64(buf: &[u8], at: usize) -> Result<u64, SnapshotError> {
    let bytes = buf.get(at..at + 8).ok_or(SnapshotError::Truncated {
        need: at + 8,
        have: buf.len(),
    })?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_be_bytes(raw))
}

// ============================================================================
// Stateless arithmetic
// ============================================================================

/// Forwards its single upstream unchanged.
#[derive(Debug, Default)]
pub struct Passthrough;

impl KernelState for Passthrough {}

impl ScalarKernel for Passthrough {
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<f64, KernelError> {
        args.require_arity(1)?;
        Ok(args.scalar(0))
    }
}

/// Sum of all upstreams (any arity ≥ 1).
#[derive(Debug, Default)]
pub struct Sum;

impl KernelState for Sum {}

impl ScalarKernel for Sum {
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<f64, KernelError> {
        if args.arity() == 0 {
            return Err(KernelError::Arity {
                expected: 1,
                actual: 0,
            });
        }
        Ok((0..args.arity()).map(|k| args.scalar(k)).sum())
    }
}

/// First upstream minus the second.
#[derive(Debug, Default)]
pub struct Difference;

impl KernelState for Difference {}

impl ScalarKernel for Difference {
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<f64, KernelError> {
        args.require_arity(2)?;
        Ok(args.scalar(0) - args.scalar(1))
    }
}

/// Product of all upstreams (any arity ≥ 1).
#[derive(Debug, Default)]
pub struct Product;

impl KernelState for Product {}

impl ScalarKernel for Product {
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<f64, KernelError> {
        if args.arity() == 0 {
            return Err(KernelError::Arity {
                expected: 1,
                actual: 0,
            });
        }
        Ok((0..args.arity()).map(|k| args.scalar(k)).product())
    }
}

/// First upstream divided by the second. Division by zero follows IEEE 754.
#[derive(Debug, Default)]
pub struct Quotient;

impl KernelState for Quotient {}

impl ScalarKernel for Quotient {
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<f64, KernelError> {
        args.require_arity(2)?;
        Ok(args.scalar(0) / args.scalar(1))
    }
}

/// Triangular spread over `(direct, leg_a, leg_b)`: the direct quote minus
/// the synthetic cross `leg_a · leg_b`.
#[derive(Debug, Default)]
pub struct TriangularSpread;

impl KernelState for TriangularSpread {}

impl ScalarKernel for TriangularSpread {
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<f64, KernelError> {
        args.require_arity(3)?;
        Ok(args.scalar(0) - args.scalar(1) * args.scalar(2))
    }
}

/// Quantity-weighted mid price over `(bid, bid_qty, ask, ask_qty)`.
///
/// `mid = (bid·ask_qty + ask·bid_qty) / (bid_qty + ask_qty)`; the heavier
/// side pulls the mid toward the opposite quote. Zero total quantity yields
/// the plain midpoint.
#[derive(Debug, Default)]
pub struct WeightedMid;

impl KernelState for WeightedMid {}

impl ScalarKernel for WeightedMid {
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<f64, KernelError> {
        args.require_arity(4)?;
        let (bid, bid_qty) = (args.scalar(0), args.scalar(1));
        let (ask, ask_qty) = (args.scalar(2), args.scalar(3));
        let total = bid_qty + ask_qty;
        if total == 0.0 {
            return Ok((bid + ask) * 0.5);
        }
        Ok(bid.mul_add(ask_qty, ask * bid_qty) / total)
    }
}

/// `(cond, a, b) → a if cond else b`.
///
/// Both branches are read on every evaluation; there is no short-circuit, so
/// the observed value is always current regardless of which branch last
/// changed.
#[derive(Debug, Default)]
pub struct Select;

impl KernelState for Select {}

impl ScalarKernel for Select {
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<f64, KernelError> {
        args.require_arity(3)?;
        let cond = args.boolean(0);
        let a = args.scalar(1);
        let b = args.scalar(2);
        Ok(if cond { a } else { b })
    }
}

// ============================================================================
// Vector reads
// ============================================================================

/// Selects one element of a vector upstream.
#[derive(Debug)]
pub struct VectorElement {
    element: usize,
}

impl VectorElement {
    /// Creates a selector for `element`.
    #[must_use]
    pub fn new(element: usize) -> Self {
        Self { element }
    }
}

impl KernelState for VectorElement {}

impl ScalarKernel for VectorElement {
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<f64, KernelError> {
        args.require_arity(1)?;
        let values = args.vector(0);
        values
            .get(self.element)
            .copied()
            .ok_or(KernelError::ElementOutOfRange {
                element: self.element,
                len: values.len(),
            })
    }
}

/// Difference of two elements of a single vector upstream
/// (`values[minuend] − values[subtrahend]`), e.g. a curve spread.
#[derive(Debug)]
pub struct ElementDifference {
    minuend: usize,
    subtrahend: usize,
}

impl ElementDifference {
    /// Creates a spread over `values[minuend] − values[subtrahend]`.
    #[must_use]
    pub fn new(minuend: usize, subtrahend: usize) -> Self {
        Self {
            minuend,
            subtrahend,
        }
    }
}

impl KernelState for ElementDifference {}

impl ScalarKernel for ElementDifference {
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<f64, KernelError> {
        args.require_arity(1)?;
        let values = args.vector(0);
        let pick = |element: usize| {
            values
                .get(element)
                .copied()
                .ok_or(KernelError::ElementOutOfRange {
                    element,
                    len: values.len(),
                })
        };
        Ok(pick(self.minuend)? - pick(self.subtrahend)?)
    }
}

/// Max − min over a vector upstream. Empty input yields NaN.
#[derive(Debug, Default)]
pub struct VectorSpread;

impl KernelState for VectorSpread {}

impl ScalarKernel for VectorSpread {
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<f64, KernelError> {
        args.require_arity(1)?;
        let values = args.vector(0);
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for &v in values {
            lo = lo.min(v);
            hi = hi.max(v);
        }
        if values.is_empty() {
            return Ok(f64::NAN);
        }
        Ok(hi - lo)
    }
}

// ============================================================================
// Rolling indicators
// ============================================================================

/// Exponentially weighted moving average, zero-seeded.
///
/// `state ← α·x + (1−α)·state` with `state` starting at 0, so early outputs
/// ramp toward the input rather than jumping to it.
#[derive(Debug)]
pub struct Ewma {
    alpha: f64,
    state: f64,
}

impl Ewma {
    /// Creates a smoother with factor `alpha` in `(0, 1]`.
    #[must_use]
    pub fn new(alpha: f64) -> Self {
        Self { alpha, state: 0.0 }
    }

    /// Creates a smoother from a span `n` via `α = 2 / (n + 1)`.
    #[must_use]
    pub fn from_span(span: usize) -> Self {
        Self::new(2.0 / (span as f64 + 1.0))
    }

    fn update(&mut self, x: f64) -> f64 {
        self.state = self.alpha.mul_add(x, (1.0 - self.alpha) * self.state);
        self.state
    }
}

impl KernelState for Ewma {
    fn state_size_bytes(&self) -> usize {
        F64_BYTES
    }

    fn write_state(&self, buf: &mut [u8]) {
        put_f64(buf, 0, self.state);
    }

    fn read_state(&mut self, buf: &[u8]) -> Result<(), SnapshotError> {
        self.state = get_f64(buf, 0)?;
        Ok(())
    }
}

impl ScalarKernel for Ewma {
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<f64, KernelError> {
        args.require_arity(1)?;
        Ok(self.update(args.scalar(0)))
    }
}

/// Simple moving average over a fixed window.
///
/// Before the window fills, the mean of the samples seen so far is returned.
#[derive(Debug)]
pub struct Sma {
    ring: Vec<f64>,
    next: usize,
    filled: usize,
}

impl Sma {
    /// Creates an averager over `window` samples (window ≥ 1).
    #[must_use]
    pub fn new(window: usize) -> Self {
        debug_assert!(window >= 1, "SMA window must be at least 1");
        Self {
            ring: vec![0.0; window.max(1)],
            next: 0,
            filled: 0,
        }
    }

    fn update(&mut self, x: f64) -> f64 {
        self.ring[self.next] = x;
        self.next = (self.next + 1) % self.ring.len();
        self.filled = (self.filled + 1).min(self.ring.len());
        // Live slots are exactly ring[0..filled]: `next` cannot wrap before
        // the window fills.
        let sum: f64 = self.ring[..self.filled].iter().sum();
        sum / self.filled as f64
    }
}

impl KernelState for Sma {
    fn state_size_bytes(&self) -> usize {
        self.ring.len() * F64_BYTES + 16
    }

    fn write_state(&self, buf: &mut [u8]) {
        for (i, &v) in self.ring.iter().enumerate() {
            put_f64(buf, i * F64_BYTES, v);
        }
        let base = self.ring.len() * F64_BYTES;
        put_u64(buf, base, self.next as u64);
        put_u64(buf, base + 8, self.filled as u64);
    }

    fn read_state(&mut self, buf: &[u8]) -> Result<(), SnapshotError> {
        for i in 0..self.ring.len() {
            self.ring[i] = get_f64(buf, i * F64_BYTES)?;
        }
        let base = self.ring.len() * F64_BYTES;
        self.next = get_u64(buf, base)? as usize % self.ring.len();
        self.filled = (get_u64(buf, base + 8)? as usize).min(self.ring.len());
        Ok(())
    }
}

impl ScalarKernel for Sma {
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<f64, KernelError> {
        args.require_arity(1)?;
        Ok(self.update(args.scalar(0)))
    }
}

/// Wilder's relative strength index over a fixed window.
///
/// Returns the neutral 50 until `window + 1` samples have arrived, then the
/// smoothed RSI in `[0, 100]`.
#[derive(Debug)]
pub struct Rsi {
    window: usize,
    prev: f64,
    avg_gain: f64,
    avg_loss: f64,
    seen: u64,
}

impl Rsi {
    /// Creates an RSI over `window` deltas (window ≥ 1).
    #[must_use]
    pub fn new(window: usize) -> Self {
        debug_assert!(window >= 1, "RSI window must be at least 1");
        Self {
            window: window.max(1),
            prev: 0.0,
            avg_gain: 0.0,
            avg_loss: 0.0,
            seen: 0,
        }
    }

    fn update(&mut self, x: f64) -> f64 {
        if self.seen == 0 {
            self.prev = x;
            self.seen = 1;
            return 50.0;
        }
        let delta = x - self.prev;
        self.prev = x;
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        let w = self.window as f64;

        if (self.seen as usize) <= self.window {
            self.avg_gain += gain;
            self.avg_loss += loss;
            self.seen += 1;
            if (self.seen as usize) <= self.window {
                return 50.0;
            }
            self.avg_gain /= w;
            self.avg_loss /= w;
        } else {
            self.avg_gain = self.avg_gain.mul_add(w - 1.0, gain) / w;
            self.avg_loss = self.avg_loss.mul_add(w - 1.0, loss) / w;
            self.seen = self.seen.saturating_add(1);
        }

        if self.avg_loss == 0.0 {
            return 100.0;
        }
        let rs = self.avg_gain / self.avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }
}

impl KernelState for Rsi {
    fn state_size_bytes(&self) -> usize {
        32
    }

    fn write_state(&self, buf: &mut [u8]) {
        put_f64(buf, 0, self.prev);
        put_f64(buf, 8, self.avg_gain);
        put_f64(buf, 16, self.avg_loss);
        put_u64(buf, 24, self.seen);
    }

    fn read_state(&mut self, buf: &[u8]) -> Result<(), SnapshotError> {
        self.prev = get_f64(buf, 0)?;
        self.avg_gain = get_f64(buf, 8)?;
        self.avg_loss = get_f64(buf, 16)?;
        self.seen = get_u64(buf, 24)?;
        Ok(())
    }
}

impl ScalarKernel for Rsi {
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<f64, KernelError> {
        args.require_arity(1)?;
        Ok(self.update(args.scalar(0)))
    }
}

/// MACD line: fast EWMA minus slow EWMA of the same input, both zero-seeded
/// with `α = 2 / (span + 1)`.
#[derive(Debug)]
pub struct Macd {
    fast: Ewma,
    slow: Ewma,
}

impl Macd {
    /// Creates a MACD with the given fast/slow spans (fast < slow).
    #[must_use]
    pub fn new(fast_span: usize, slow_span: usize) -> Self {
        debug_assert!(fast_span < slow_span, "MACD fast span must beat slow");
        Self {
            fast: Ewma::from_span(fast_span),
            slow: Ewma::from_span(slow_span),
        }
    }
}

impl KernelState for Macd {
    fn state_size_bytes(&self) -> usize {
        2 * F64_BYTES
    }

    fn write_state(&self, buf: &mut [u8]) {
        self.fast.write_state(&mut buf[..F64_BYTES]);
        self.slow.write_state(&mut buf[F64_BYTES..]);
    }

    fn read_state(&mut self, buf: &[u8]) -> Result<(), SnapshotError> {
        if buf.len() < 2 * F64_BYTES {
            return Err(SnapshotError::Truncated {
                need: 2 * F64_BYTES,
                have: buf.len(),
            });
        }
        self.fast.read_state(&buf[..F64_BYTES])?;
        self.slow.read_state(&buf[F64_BYTES..])?;
        Ok(())
    }
}

impl ScalarKernel for Macd {
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<f64, KernelError> {
        args.require_arity(1)?;
        let x = args.scalar(0);
        Ok(self.fast.update(x) - self.slow.update(x))
    }
}

// ============================================================================
// Vector kernels
// ============================================================================

/// Element-wise zero-seeded EWMA over a vector upstream.
#[derive(Debug)]
pub struct VectorEwma {
    alpha: f64,
    state: Vec<f64>,
}

impl VectorEwma {
    /// Creates a smoother for vectors of `size` elements.
    #[must_use]
    pub fn new(alpha: f64, size: usize) -> Self {
        Self {
            alpha,
            state: vec![0.0; size],
        }
    }
}

impl KernelState for VectorEwma {
    fn state_size_bytes(&self) -> usize {
        self.state.len() * F64_BYTES
    }

    fn write_state(&self, buf: &mut [u8]) {
        for (i, &v) in self.state.iter().enumerate() {
            put_f64(buf, i * F64_BYTES, v);
        }
    }

    fn read_state(&mut self, buf: &[u8]) -> Result<(), SnapshotError> {
        for i in 0..self.state.len() {
            self.state[i] = get_f64(buf, i * F64_BYTES)?;
        }
        Ok(())
    }
}

impl VectorKernel for VectorEwma {
    fn eval(&mut self, args: &KernelArgs<'_, '_>, out: &mut [f64]) -> Result<(), KernelError> {
        args.require_arity(1)?;
        let input = args.vector(0);
        if input.len() != self.state.len() || out.len() != self.state.len() {
            return Err(KernelError::Eval(format!(
                "vector size mismatch: state {}, input {}, out {}",
                self.state.len(),
                input.len(),
                out.len()
            )));
        }
        for (i, (&x, slot)) in input.iter().zip(self.state.iter_mut()).enumerate() {
            *slot = self.alpha.mul_add(x, (1.0 - self.alpha) * *slot);
            out[i] = *slot;
        }
        Ok(())
    }
}

// ============================================================================
// Predicates
// ============================================================================

/// `a > b` over two scalar upstreams.
#[derive(Debug, Default)]
pub struct GreaterThan;

impl KernelState for GreaterThan {}

impl PredicateKernel for GreaterThan {
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<bool, KernelError> {
        args.require_arity(2)?;
        Ok(args.scalar(0) > args.scalar(1))
    }
}

/// `a < b` over two scalar upstreams.
#[derive(Debug, Default)]
pub struct LessThan;

impl KernelState for LessThan {}

impl PredicateKernel for LessThan {
    fn eval(&mut self, args: &KernelArgs<'_, '_>) -> Result<bool, KernelError> {
        args.require_arity(2)?;
        Ok(args.scalar(0) < args.scalar(1))
    }
}
