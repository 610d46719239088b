// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Stabilization listeners and the composite fan-out.
//!
//! The engine carries a single listener slot. To feed several observers
//! (broadcasters, persisters, trackers), install a [`CompositeListener`] and
//! append children to it; callbacks are forwarded in registration order and a
//! panicking child never hides an event from the children after it.
//!
//! Listeners observe only: they must not mutate nodes or call back into the
//! engine.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::ident::NodeIndex;
use crate::node::StabilizeError;

/// Observer of stabilization lifecycle events.
///
/// Within one cycle the callback order is `start`, one `node`/`error` per
/// visited node in topological order, then `end`; `start` and `end` carry the
/// same epoch, and epochs strictly increase across cycles.
pub trait StabilizationListener {
    /// A stabilization cycle is beginning.
    fn on_stabilization_start(&mut self, epoch: u64) {
        let _ = epoch;
    }

    /// A node was stabilized. `duration_nanos` may be zero when timing is off.
    fn on_node_stabilized(
        &mut self,
        epoch: u64,
        index: NodeIndex,
        name: &str,
        changed: bool,
        duration_nanos: u64,
    ) {
        let _ = (epoch, index, name, changed, duration_nanos);
    }

    /// A node's stabilization failed; the cycle continues without it.
    fn on_node_error(&mut self, epoch: u64, index: NodeIndex, name: &str, error: &StabilizeError) {
        let _ = (epoch, index, name, error);
    }

    /// The cycle finished after recomputing `count` nodes.
    fn on_stabilization_end(&mut self, epoch: u64, count: u32) {
        let _ = (epoch, count);
    }
}

/// Listener that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl StabilizationListener for NullListener {}

/// How many child panics are logged individually before switching to a
/// sampled warning.
const PANIC_LOG_LIMIT: u64 = 8;
/// Sampling interval for panic warnings past the initial burst.
const PANIC_LOG_EVERY: u64 = 1024;

/// Ordered fan-out over any number of child listeners.
///
/// A panic in one child is caught, counted, and logged through a rate-limited
/// `tracing` warning; the remaining children still see the event.
#[derive(Default)]
pub struct CompositeListener {
    children: Vec<Box<dyn StabilizationListener>>,
    panics: u64,
}

impl CompositeListener {
    /// Creates an empty composite.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a child listener. Children cannot be removed.
    pub fn add(&mut self, child: Box<dyn StabilizationListener>) {
        self.children.push(child);
    }

    /// Number of registered children.
    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Returns `true` when no children are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Total child panics swallowed so far.
    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.panics
    }

    fn dispatch(&mut self, event: &str, f: impl Fn(&mut dyn StabilizationListener)) {
        for (i, child) in self.children.iter_mut().enumerate() {
            let outcome = catch_unwind(AssertUnwindSafe(|| f(child.as_mut())));
            if outcome.is_err() {
                self.panics += 1;
                if self.panics <= PANIC_LOG_LIMIT || self.panics % PANIC_LOG_EVERY == 0 {
                    tracing::warn!(
                        child = i,
                        event,
                        total = self.panics,
                        "listener child panicked; event delivery continues"
                    );
                }
            }
        }
    }
}

impl StabilizationListener for CompositeListener {
    fn on_stabilization_start(&mut self, epoch: u64) {
        self.dispatch("start", |l| l.on_stabilization_start(epoch));
    }

    fn on_node_stabilized(
        &mut self,
        epoch: u64,
        index: NodeIndex,
        name: &str,
        changed: bool,
        duration_nanos: u64,
    ) {
        self.dispatch("node", |l| {
            l.on_node_stabilized(epoch, index, name, changed, duration_nanos);
        });
    }

    fn on_node_error(&mut self, epoch: u64, index: NodeIndex, name: &str, error: &StabilizeError) {
        self.dispatch("error", |l| l.on_node_error(epoch, index, name, error));
    }

    fn on_stabilization_end(&mut self, epoch: u64, count: u32) {
        self.dispatch("end", |l| l.on_stabilization_end(epoch, count));
    }
}

impl core::fmt::Debug for CompositeListener {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CompositeListener")
            .field("children", &self.children.len())
            .field("panics", &self.panics)
            .finish()
    }
}
