// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Declarative graph definition data model.
//!
//! A [`GraphDefinition`] is the portable description the compiler consumes:
//! a list of typed node definitions plus reusable sub-graph templates.
//! Transport and on-disk encoding are a caller concern; the model only fixes
//! the shape (serde round-trips through any self-describing format).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Node type that triggers template expansion instead of instantiation.
pub const TEMPLATE_TYPE: &str = "template";

/// Property naming the template to expand for [`TEMPLATE_TYPE`] nodes.
pub const TEMPLATE_PROPERTY: &str = "template";

/// A complete declarative graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    /// Graph name, for diagnostics and tooling.
    pub name: String,
    /// Free-form version tag.
    pub version: String,
    /// Optional epoch seed applied to the compiled engine, for resuming a
    /// recorded stream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
    /// Reusable sub-graph templates referenced by [`TEMPLATE_TYPE`] nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub templates: Vec<TemplateDef>,
    /// The graph's nodes, in declaration order.
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
}

impl GraphDefinition {
    /// Creates an empty definition.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            epoch: None,
            templates: Vec::new(),
            nodes: Vec::new(),
        }
    }
}

/// A named, parameterized sub-graph expanded textually at compile time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDef {
    /// Template name referenced by [`TEMPLATE_PROPERTY`].
    pub name: String,
    /// Body nodes; `{{var}}` placeholders are substituted on expansion.
    pub nodes: Vec<NodeDef>,
}

/// One node in a graph or template body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    /// Unique node name.
    pub name: String,
    /// Registered node type (or [`TEMPLATE_TYPE`]).
    #[serde(rename = "type")]
    pub node_type: String,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Named upstream references: role → upstream node name. Ordered by the
    /// factory's declared roles, not by this map.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, String>,
    /// Positional upstream references, in kernel argument order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// Untyped configuration bag; factories coerce what they need.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Value>,
}

impl NodeDef {
    /// Creates a bare node definition.
    #[must_use]
    pub fn new(name: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_type: node_type.into(),
            description: None,
            inputs: BTreeMap::new(),
            dependencies: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Appends a positional upstream reference.
    #[must_use]
    pub fn with_dependency(mut self, upstream: impl Into<String>) -> Self {
        self.dependencies.push(upstream.into());
        self
    }

    /// Sets a named upstream reference.
    #[must_use]
    pub fn with_input(mut self, role: impl Into<String>, upstream: impl Into<String>) -> Self {
        self.inputs.insert(role.into(), upstream.into());
        self
    }

    /// Sets a property value.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_round_trips_through_json() {
        let def = GraphDefinition {
            name: "fx".to_owned(),
            version: "1".to_owned(),
            epoch: Some(42),
            templates: vec![TemplateDef {
                name: "smoothed_pair".to_owned(),
                nodes: vec![NodeDef::new("{{pair}}", "scalar_source")
                    .with_property("initial_value", 1.0)],
            }],
            nodes: vec![
                NodeDef::new("EURUSD", "scalar_source").with_property("initial_value", 1.085),
                NodeDef::new("mid", "weighted_mid")
                    .with_input("bid", "EURUSD")
                    .with_input("ask", "EURUSD"),
            ],
        };
        let json = serde_json::to_string_pretty(&def).unwrap();
        let back: GraphDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, def);
    }

    #[test]
    fn optional_fields_default_cleanly() {
        let json = r#"{
            "name": "g",
            "version": "0",
            "nodes": [{ "name": "a", "type": "scalar_source" }]
        }"#;
        let def: GraphDefinition = serde_json::from_str(json).unwrap();
        assert!(def.epoch.is_none());
        assert!(def.templates.is_empty());
        assert!(def.nodes[0].dependencies.is_empty());
        assert!(def.nodes[0].properties.is_empty());
    }
}
