// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The graph compiler: definition in, runnable engine out.
//!
//! Phases: template expansion, topological pre-sort (deterministic
//! instantiation order), factory instantiation, edge installation, topology
//! freeze. Named inputs are reordered into the factory's declared role order
//! and recorded in an edge-label map for display layers.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use lattice_core::{StabilizationEngine, TopologyBuilder};

use crate::definition::{GraphDefinition, NodeDef};
use crate::error::CompileError;
use crate::registry::{FactoryContext, NodeTypeEntry, NodeTypeRegistry};
use crate::template::expand_templates;

/// A compiled graph: the engine plus display metadata.
pub struct CompiledGraph {
    /// The runnable engine, sources pre-marked dirty.
    pub engine: StabilizationEngine,
    /// `(upstream, downstream) → role` for edges installed via named inputs.
    pub edge_labels: BTreeMap<(String, String), String>,
}

impl core::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("node_count", &self.engine.node_count())
            .field("labeled_edges", &self.edge_labels.len())
            .finish()
    }
}

/// Ordered upstream names plus the role labels contributed by named inputs.
struct ResolvedInputs {
    upstreams: Vec<String>,
    labels: Vec<(String, String)>,
}

fn resolve_inputs(def: &NodeDef, entry: &NodeTypeEntry) -> Result<ResolvedInputs, CompileError> {
    if !def.dependencies.is_empty() {
        if !def.inputs.is_empty() {
            return Err(CompileError::InvalidProperty {
                node: def.name.clone(),
                key: "inputs".to_owned(),
                reason: "positional dependencies and named inputs are mutually exclusive"
                    .to_owned(),
            });
        }
        return Ok(ResolvedInputs {
            upstreams: def.dependencies.clone(),
            labels: Vec::new(),
        });
    }

    if def.inputs.is_empty() {
        return Ok(ResolvedInputs {
            upstreams: Vec::new(),
            labels: Vec::new(),
        });
    }

    let roles = entry.named_roles();
    if roles.is_empty() {
        return Err(CompileError::InvalidProperty {
            node: def.name.clone(),
            key: "inputs".to_owned(),
            reason: format!("type `{}` does not accept named inputs", def.node_type),
        });
    }
    for role in def.inputs.keys() {
        if !roles.contains(&role.as_str()) {
            return Err(CompileError::InvalidProperty {
                node: def.name.clone(),
                key: "inputs".to_owned(),
                reason: format!("unknown input role `{role}`"),
            });
        }
    }

    let mut upstreams = Vec::with_capacity(roles.len());
    let mut labels = Vec::with_capacity(roles.len());
    for &role in roles {
        let upstream = def
            .inputs
            .get(role)
            .ok_or_else(|| CompileError::MissingNamedInput {
                node: def.name.clone(),
                role: role.to_owned(),
            })?;
        upstreams.push(upstream.clone());
        labels.push((role.to_owned(), upstream.clone()));
    }
    Ok(ResolvedInputs { upstreams, labels })
}

/// Compiles `definition` against `registry` into a runnable engine.
pub fn compile(
    definition: &GraphDefinition,
    registry: &NodeTypeRegistry,
) -> Result<CompiledGraph, CompileError> {
    tracing::debug!(
        graph = %definition.name,
        version = %definition.version,
        "compiling graph definition"
    );
    let nodes = expand_templates(&definition.templates, &definition.nodes)?;
    let total = nodes.len();

    // Name map + duplicate rejection on the expanded node set.
    let mut index_of: FxHashMap<&str, usize> = FxHashMap::default();
    for (i, def) in nodes.iter().enumerate() {
        if index_of.insert(def.name.as_str(), i).is_some() {
            return Err(CompileError::DuplicateNodeName(def.name.clone()));
        }
    }

    // Resolve per-node inputs up front; this also surfaces unknown types and
    // dangling upstream references with the offending node named.
    let mut resolved: Vec<ResolvedInputs> = Vec::with_capacity(total);
    for def in &nodes {
        let entry = registry
            .get(&def.node_type)
            .ok_or_else(|| CompileError::UnknownType {
                node: def.name.clone(),
                type_name: def.node_type.clone(),
            })?;
        let inputs = resolve_inputs(def, entry)?;
        for upstream in &inputs.upstreams {
            if !index_of.contains_key(upstream.as_str()) {
                return Err(CompileError::UnknownDependency {
                    node: def.name.clone(),
                    dependency: upstream.clone(),
                });
            }
        }
        resolved.push(inputs);
    }

    // Topological pre-sort (Kahn, declaration-order tie-break) so that
    // instantiation order is deterministic and upstream-first.
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); total];
    let mut in_degree: Vec<u32> = vec![0; total];
    for (i, inputs) in resolved.iter().enumerate() {
        for upstream in &inputs.upstreams {
            let u = index_of[upstream.as_str()];
            children[u].push(i);
            in_degree[i] += 1;
        }
    }
    let mut queue: Vec<usize> = (0..total).filter(|&i| in_degree[i] == 0).collect();
    let mut head = 0;
    let mut order: Vec<usize> = Vec::with_capacity(total);
    while head < queue.len() {
        let current = queue[head];
        head += 1;
        order.push(current);
        for &child in &children[current] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                queue.push(child);
            }
        }
    }
    if order.len() != total {
        return Err(CompileError::CycleDetected {
            processed: order.len(),
            total,
        });
    }

    // Instantiate and wire.
    let mut builder = TopologyBuilder::new();
    let mut edge_labels: BTreeMap<(String, String), String> = BTreeMap::new();
    for &i in &order {
        let def = &nodes[i];
        let inputs = &resolved[i];
        let entry = registry
            .get(&def.node_type)
            .ok_or_else(|| CompileError::UnknownType {
                node: def.name.clone(),
                type_name: def.node_type.clone(),
            })?;
        let ctx = FactoryContext {
            name: &def.name,
            properties: &def.properties,
            arity: inputs.upstreams.len(),
        };
        let spec = entry.instantiate(&ctx)?;
        tracing::debug!(node = %def.name, node_type = %def.node_type, "instantiated node");
        if spec.is_source {
            builder.add_source(spec.node)?;
        } else {
            builder.add_computed(spec.node, inputs.upstreams.clone())?;
        }
        for (role, upstream) in &inputs.labels {
            edge_labels.insert((upstream.clone(), def.name.clone()), role.clone());
        }
    }

    let topology = builder.build()?;
    let mut engine = StabilizationEngine::new(topology);
    if let Some(epoch) = definition.epoch {
        engine.seed_epoch(epoch);
    }
    tracing::debug!(
        graph = %definition.name,
        nodes = engine.node_count(),
        "graph compiled"
    );
    Ok(CompiledGraph {
        engine,
        edge_labels,
    })
}
