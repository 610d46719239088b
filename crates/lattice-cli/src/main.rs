// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Lattice CLI
//!
//! Compiles declarative graph definitions and replays scripted update streams
//! through the intake channel, printing per-cycle stats and final node values.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use lattice_compile::{compile, GraphDefinition, NodeTypeRegistry};
use lattice_core::{NodeIndex, StabilizationEngine};
use lattice_intake::{channel, UpdateEvent};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Log verbosity (error, warn, info, debug, trace)
    #[clap(long, default_value = "warn")]
    log_level: Level,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Compile a graph definition and print its topological order
    Check {
        /// Path to the graph definition (JSON)
        #[clap(long)]
        graph: PathBuf,
    },
    /// Compile a graph, replay a scripted update stream, print results
    Run {
        /// Path to the graph definition (JSON)
        #[clap(long)]
        graph: PathBuf,
        /// Path to the update script (JSON array of steps)
        #[clap(long)]
        script: PathBuf,
        /// Intake queue capacity
        #[clap(long, default_value_t = 1024)]
        capacity: usize,
    },
}

/// One scripted update, addressed by node name.
#[derive(Debug, Deserialize)]
struct ScriptStep {
    node: String,
    value: f64,
    /// Element index for vector sources.
    #[serde(default)]
    element: Option<u32>,
    /// Force a stabilization after this step.
    #[serde(default)]
    batch_end: bool,
}

fn load_graph(path: &PathBuf) -> Result<GraphDefinition> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading graph definition {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("parsing graph definition {}", path.display()))
}

fn print_values(engine: &StabilizationEngine) {
    for i in 0..engine.node_count() {
        let index = NodeIndex::from_raw(i);
        let Some(node) = engine.node(index) else {
            continue;
        };
        if let Some(v) = node.scalar() {
            println!("  [{i:>3}] {:<32} {v}", node.name());
        } else if let Some(values) = node.vector_values() {
            println!("  [{i:>3}] {:<32} {values:?}", node.name());
        } else if let Some(b) = node.boolean() {
            println!("  [{i:>3}] {:<32} {b}", node.name());
        }
    }
}

fn check(graph: &PathBuf) -> Result<()> {
    let definition = load_graph(graph)?;
    let registry = NodeTypeRegistry::with_builtins();
    let compiled = compile(&definition, &registry)
        .with_context(|| format!("compiling graph `{}`", definition.name))?;

    println!(
        "graph `{}` v{}: {} node(s)",
        definition.name,
        definition.version,
        compiled.engine.node_count()
    );
    let topology = compiled.engine.topology();
    for i in 0..compiled.engine.node_count() {
        let index = NodeIndex::from_raw(i);
        let Some(node) = compiled.engine.node(index) else {
            continue;
        };
        let kind = if topology.is_source(index) {
            "source"
        } else {
            "computed"
        };
        println!(
            "  [{i:>3}] {:<32} {kind:<8} parents={}",
            node.name(),
            topology.parent_count(index)
        );
    }
    if !compiled.edge_labels.is_empty() {
        println!("named edges:");
        for ((upstream, downstream), role) in &compiled.edge_labels {
            println!("  {upstream} -> {downstream} ({role})");
        }
    }
    Ok(())
}

fn run(graph: &PathBuf, script: &PathBuf, capacity: usize) -> Result<()> {
    let definition = load_graph(graph)?;
    let registry = NodeTypeRegistry::with_builtins();
    let mut compiled = compile(&definition, &registry)
        .with_context(|| format!("compiling graph `{}`", definition.name))?;

    let text = fs::read_to_string(script)
        .with_context(|| format!("reading update script {}", script.display()))?;
    let steps: Vec<ScriptStep> = serde_json::from_str(&text)
        .with_context(|| format!("parsing update script {}", script.display()))?;

    // Flush initial source values before the replay.
    let initial = compiled.engine.stabilize();
    println!("initial flush: {initial} node(s) stabilized");

    let (producer, mut consumer) = channel(capacity)?;
    for step in &steps {
        let Some(index) = compiled.engine.topo_index(&step.node) else {
            bail!("script references unknown node `{}`", step.node);
        };
        let mut event = match step.element {
            Some(element) => UpdateEvent::vector_element(index.value(), element, step.value),
            None => UpdateEvent::scalar(index.value(), step.value),
        };
        event.batch_end = step.batch_end;
        producer
            .try_send(event)
            .with_context(|| format!("enqueueing update for `{}`", step.node))?;
    }

    let stats = consumer.pump(&mut compiled.engine);
    println!(
        "replayed {} event(s): {} applied, {} dropped, {} cycle(s), epoch {}",
        stats.events,
        stats.applied,
        stats.dropped,
        stats.cycles,
        compiled.engine.epoch()
    );
    println!("final values:");
    print_values(&compiled.engine);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("installing tracing subscriber")?;

    match &args.cmd {
        Command::Check { graph } => check(graph),
        Command::Run {
            graph,
            script,
            capacity,
        } => run(graph, script, *capacity),
    }
}
