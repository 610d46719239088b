// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! lattice-intake: bounded update-event channel for the stabilization engine.
//!
//! Translates external updates into source-node mutations and triggers one
//! stabilization per coalesced batch. The queue is a pre-allocated ring:
//! FIFO, zero per-event allocation, back-pressure as queue-full at enqueue.
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
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

mod channel;
mod event;
mod ring;

// Re-exports for stable public API
/// Producer/consumer construction and the pump counters.
pub use channel::{channel, ApplyError, IntakeConsumer, IntakeProducer, PumpStats};
/// The pre-allocated event cell.
pub use event::UpdateEvent;
/// The bounded ring and channel-boundary errors.
pub use ring::{EventRing, IntakeError};
