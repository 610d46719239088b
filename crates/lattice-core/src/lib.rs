// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! lattice-core: deterministic incremental DAG stabilization engine.
//!
//! Pricing, risk, and signal pipelines are expressed as a directed acyclic
//! graph of scalar/vector/boolean nodes. External producers write source
//! nodes; one linear stabilization pass per cycle recomputes exactly the
//! nodes that transitively depend on dirty inputs, in topological order, with
//! per-node cutoffs pruning propagation and a single listener slot observing
//! the lifecycle.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::unreadable_literal,
    clippy::missing_const_for_fn,
    clippy::suboptimal_flops,
    clippy::redundant_pub_crate,
    clippy::many_single_char_names,
    clippy::module_name_repetitions,
    clippy::use_self,
    clippy::float_cmp,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]

mod computed;
mod cutoff;
/// Demo graph builders showcasing engine wiring (triangular arbitrage).
pub mod demo;
mod engine;
mod ident;
mod kernel;
/// Built-in kernel library (arithmetic, rolling indicators, predicates).
pub mod kernels;
mod listener;
mod node;
mod snapshot;
mod source;
/// Recording listeners shared by the test suites.
pub mod test_support;
mod topology;

// Re-exports for stable public API
/// Computed node kinds (scalar, vector, boolean).
pub use computed::{BooleanComputed, ScalarComputed, VectorComputed};
/// Change-detection policies and the vector element tolerance helper.
pub use cutoff::{any_element_changed, Cutoff, RELATIVE_EPSILON};
/// The stabilization engine and its operational errors.
pub use engine::{EngineError, StabilizationEngine};
/// Topological index handle.
pub use ident::NodeIndex;
/// Kernel traits, arguments, and errors.
pub use kernel::{KernelArgs, KernelError, KernelState, PredicateKernel, ScalarKernel, VectorKernel};
/// Listener contract, null listener, and composite fan-out.
pub use listener::{CompositeListener, NullListener, StabilizationListener};
/// Node traits and the upstream view.
pub use node::{Node, SourceError, SourceNode, StabilizeError, UpstreamView};
/// Binary state contract and whole-graph snapshots.
pub use snapshot::{GraphSnapshot, SnapshotError, Snapshotable};
/// Source node kinds.
pub use source::{ScalarSource, VectorSource};
/// Immutable CSR topology and its builder.
pub use topology::{Topology, TopologyBuilder, TopologyError};
