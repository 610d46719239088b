// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! lattice-compile: declarative graph loader for the stabilization engine.
//!
//! Turns a portable [`GraphDefinition`] — typed nodes, positional or named
//! inputs, reusable templates — into a fully wired
//! [`lattice_core::StabilizationEngine`] via a node-type registry of
//! factories.
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
    clippy::missing_const_for_fn,
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation
)]

mod compile;
mod definition;
mod error;
mod registry;
mod template;

// Re-exports for stable public API
/// The compiler entry point and its output.
pub use compile::{compile, CompiledGraph};
/// The declarative data model.
pub use definition::{GraphDefinition, NodeDef, TemplateDef, TEMPLATE_PROPERTY, TEMPLATE_TYPE};
/// Compiler error kinds.
pub use error::CompileError;
/// Factory registry types.
pub use registry::{FactoryContext, NodeFactory, NodeSpec, NodeTypeEntry, NodeTypeRegistry};
/// Template expansion (exposed for tooling that inspects expanded graphs).
pub use template::expand_templates;
