// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Compiler error kinds.

use lattice_core::TopologyError;
use thiserror::Error;

/// Errors raised while compiling a graph definition. All are fatal to the
/// build; no engine is produced.
#[derive(Debug, Error)]
pub enum CompileError {
    /// A node referenced a type absent from the registry.
    #[error("node `{node}`: unknown type `{type_name}`")]
    UnknownType {
        /// The declaring node.
        node: String,
        /// The unresolved type.
        type_name: String,
    },
    /// An upstream reference did not resolve to a defined node.
    #[error("node `{node}`: unknown dependency `{dependency}`")]
    UnknownDependency {
        /// The declaring node.
        node: String,
        /// The unresolved upstream name.
        dependency: String,
    },
    /// Two nodes share a name after template expansion.
    #[error("duplicate node name: {0}")]
    DuplicateNodeName(String),
    /// A factory-declared input role was not supplied.
    #[error("node `{node}`: missing named input `{role}`")]
    MissingNamedInput {
        /// The declaring node.
        node: String,
        /// The absent role.
        role: String,
    },
    /// The node graph contains a cycle.
    #[error("cycle detected: only {processed} of {total} nodes could be ordered")]
    CycleDetected {
        /// Nodes ordered before the sort stalled.
        processed: usize,
        /// Total nodes after expansion.
        total: usize,
    },
    /// A template node referenced an undefined template.
    #[error("node `{node}`: template `{template}` not found")]
    TemplateNotFound {
        /// The declaring node.
        node: String,
        /// The unresolved template name.
        template: String,
    },
    /// Template expansion recursed into itself.
    #[error("template cycle through `{0}`")]
    TemplateCycle(String),
    /// A property failed validation or coercion.
    #[error("node `{node}`: invalid property `{key}`: {reason}")]
    InvalidProperty {
        /// The declaring node.
        node: String,
        /// The offending property key.
        key: String,
        /// Why it was rejected.
        reason: String,
    },
    /// A node type was registered twice.
    #[error("duplicate node type: {0}")]
    DuplicateType(String),
}

impl From<TopologyError> for CompileError {
    fn from(err: TopologyError) -> Self {
        match err {
            TopologyError::DuplicateName(name) => Self::DuplicateNodeName(name),
            TopologyError::UnknownUpstream { node, upstream } => Self::UnknownDependency {
                node,
                dependency: upstream,
            },
            TopologyError::CycleDetected { processed, total } => {
                Self::CycleDetected { processed, total }
            }
        }
    }
}
