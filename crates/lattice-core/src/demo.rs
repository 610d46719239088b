// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Demo graph: FX triangular arbitrage monitor.
//!
//! Three externally fed quotes, the spread of the direct EURJPY quote against
//! the synthetic cross, and an EWMA smoother over that spread. Used by tests
//! and the CLI as a ready-made engine.

use crate::computed::ScalarComputed;
use crate::cutoff::Cutoff;
use crate::engine::StabilizationEngine;
use crate::kernels::{Ewma, TriangularSpread};
use crate::source::ScalarSource;
use crate::topology::{TopologyBuilder, TopologyError};

/// EUR/USD source node name.
pub const EURUSD: &str = "EURUSD";
/// USD/JPY source node name.
pub const USDJPY: &str = "USDJPY";
/// EUR/JPY source node name.
pub const EURJPY: &str = "EURJPY";
/// Spread node name: `EURJPY − EURUSD·USDJPY`.
pub const ARB_SPREAD: &str = "Arb.Spread";
/// Smoothed spread node name.
pub const ARB_SPREAD_EWMA: &str = "Arb.Spread.Ewma";

/// Smoothing factor of the demo's EWMA node.
pub const DEMO_EWMA_ALPHA: f64 = 0.1;

/// Builds the demo engine with the given cutoff on the spread node.
///
/// Initial quotes: EURUSD 1.0850, USDJPY 145.20, EURJPY 157.55. The first
/// stabilization recomputes all five nodes.
pub fn build_triangular_arb_engine(
    spread_cutoff: Cutoff,
) -> Result<StabilizationEngine, TopologyError> {
    let mut builder = TopologyBuilder::new();
    builder.add_source(Box::new(ScalarSource::new(EURUSD, 1.0850, Cutoff::Exact)))?;
    builder.add_source(Box::new(ScalarSource::new(USDJPY, 145.20, Cutoff::Exact)))?;
    builder.add_source(Box::new(ScalarSource::new(EURJPY, 157.55, Cutoff::Exact)))?;
    builder.add_computed(
        Box::new(ScalarComputed::new(
            ARB_SPREAD,
            Box::new(TriangularSpread),
            spread_cutoff,
        )),
        vec![EURJPY.to_owned(), EURUSD.to_owned(), USDJPY.to_owned()],
    )?;
    builder.add_computed(
        Box::new(ScalarComputed::new(
            ARB_SPREAD_EWMA,
            Box::new(Ewma::new(DEMO_EWMA_ALPHA)),
            Cutoff::Exact,
        )),
        vec![ARB_SPREAD.to_owned()],
    )?;
    Ok(StabilizationEngine::new(builder.build()?))
}
