// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Template expansion.
//!
//! Substitution is purely textual: every `{{var}}` occurrence in node names,
//! upstream references, and string-valued properties is replaced by the
//! variable's rendering. Template bodies may themselves contain template
//! nodes; expansion re-queues them and terminates because templates must form
//! a DAG (an expansion chain revisiting a template is rejected).

use std::collections::BTreeMap;

use serde_json::Value;

use crate::definition::{NodeDef, TemplateDef, TEMPLATE_PROPERTY, TEMPLATE_TYPE};
use crate::error::CompileError;

/// Renders a substitution value: strings verbatim, everything else in its
/// JSON form (so `window = 5` splices as `5`).
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn substitute(text: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = text.to_owned();
    for (key, replacement) in vars {
        let placeholder = format!("{{{{{key}}}}}");
        if out.contains(&placeholder) {
            out = out.replace(&placeholder, replacement);
        }
    }
    out
}

fn substitute_node(def: &NodeDef, vars: &BTreeMap<String, String>) -> NodeDef {
    let mut out = def.clone();
    out.name = substitute(&out.name, vars);
    out.dependencies = out
        .dependencies
        .iter()
        .map(|d| substitute(d, vars))
        .collect();
    out.inputs = out
        .inputs
        .iter()
        .map(|(role, upstream)| (role.clone(), substitute(upstream, vars)))
        .collect();
    out.properties = out
        .properties
        .iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => Value::String(substitute(s, vars)),
                other => other.clone(),
            };
            (key.clone(), value)
        })
        .collect();
    out
}

/// One expansion work item: a node plus the chain of templates that produced
/// it (for cycle detection).
struct Pending {
    def: NodeDef,
    ancestry: Vec<String>,
}

/// Expands every template reference in `nodes`, returning the flat node list
/// in a deterministic order (declaration order, with template bodies spliced
/// at the reference point).
pub fn expand_templates(
    templates: &[TemplateDef],
    nodes: &[NodeDef],
) -> Result<Vec<NodeDef>, CompileError> {
    let mut by_name: BTreeMap<&str, &TemplateDef> = BTreeMap::new();
    for t in templates {
        if by_name.insert(t.name.as_str(), t).is_some() {
            return Err(CompileError::DuplicateNodeName(format!(
                "template {}",
                t.name
            )));
        }
    }

    let mut queue: std::collections::VecDeque<Pending> = nodes
        .iter()
        .map(|def| Pending {
            def: def.clone(),
            ancestry: Vec::new(),
        })
        .collect();
    let mut out = Vec::new();

    while let Some(Pending { def, ancestry }) = queue.pop_front() {
        if def.node_type != TEMPLATE_TYPE {
            out.push(def);
            continue;
        }

        let template_name = def
            .properties
            .get(TEMPLATE_PROPERTY)
            .and_then(Value::as_str)
            .ok_or_else(|| CompileError::InvalidProperty {
                node: def.name.clone(),
                key: TEMPLATE_PROPERTY.to_owned(),
                reason: "template nodes need a string `template` property".to_owned(),
            })?
            .to_owned();
        if ancestry.contains(&template_name) {
            return Err(CompileError::TemplateCycle(template_name));
        }
        let template =
            by_name
                .get(template_name.as_str())
                .ok_or_else(|| CompileError::TemplateNotFound {
                    node: def.name.clone(),
                    template: template_name.clone(),
                })?;

        let vars: BTreeMap<String, String> = def
            .properties
            .iter()
            .filter(|(key, _)| key.as_str() != TEMPLATE_PROPERTY)
            .map(|(key, value)| (key.clone(), render(value)))
            .collect();

        let mut ancestry = ancestry;
        ancestry.push(template_name);
        // Splice the body at the reference point, preserving body order.
        for body_def in template.nodes.iter().rev() {
            queue.push_front(Pending {
                def: substitute_node(body_def, &vars),
                ancestry: ancestry.clone(),
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::NodeDef;

    fn pair_template() -> TemplateDef {
        TemplateDef {
            name: "smoothed_pair".to_owned(),
            nodes: vec![
                NodeDef::new("{{pair}}", "scalar_source").with_property("initial_value", 1.0),
                NodeDef::new("{{pair}}.ewma", "ewma")
                    .with_dependency("{{pair}}")
                    .with_property("alpha", 0.2),
            ],
        }
    }

    #[test]
    fn expands_names_dependencies_and_string_properties() {
        let nodes = vec![NodeDef::new("fx", TEMPLATE_TYPE)
            .with_property("template", "smoothed_pair")
            .with_property("pair", "EURUSD")];
        let out = expand_templates(&[pair_template()], &nodes).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "EURUSD");
        assert_eq!(out[1].name, "EURUSD.ewma");
        assert_eq!(out[1].dependencies, vec!["EURUSD".to_owned()]);
    }

    #[test]
    fn numeric_variables_splice_textually() {
        let template = TemplateDef {
            name: "windowed".to_owned(),
            nodes: vec![NodeDef::new("sma{{window}}", "sma").with_dependency("px")],
        };
        let nodes = vec![NodeDef::new("w", TEMPLATE_TYPE)
            .with_property("template", "windowed")
            .with_property("window", 20)];
        let out = expand_templates(&[template], &nodes).unwrap();
        assert_eq!(out[0].name, "sma20");
    }

    #[test]
    fn nested_templates_expand() {
        let inner = pair_template();
        let outer = TemplateDef {
            name: "desk".to_owned(),
            nodes: vec![NodeDef::new("{{pair}}-book", TEMPLATE_TYPE)
                .with_property("template", "smoothed_pair")
                .with_property("pair", "{{pair}}")],
        };
        let nodes = vec![NodeDef::new("g7", TEMPLATE_TYPE)
            .with_property("template", "desk")
            .with_property("pair", "USDJPY")];
        let out = expand_templates(&[inner, outer], &nodes).unwrap();
        assert_eq!(out[0].name, "USDJPY");
        assert_eq!(out[1].name, "USDJPY.ewma");
    }

    #[test]
    fn self_referential_template_is_rejected() {
        let looping = TemplateDef {
            name: "loop".to_owned(),
            nodes: vec![NodeDef::new("{{x}}", TEMPLATE_TYPE)
                .with_property("template", "loop")
                .with_property("x", "again")],
        };
        let nodes = vec![NodeDef::new("start", TEMPLATE_TYPE)
            .with_property("template", "loop")
            .with_property("x", "first")];
        let err = expand_templates(&[looping], &nodes).unwrap_err();
        assert!(matches!(err, CompileError::TemplateCycle(name) if name == "loop"));
    }

    #[test]
    fn missing_template_is_reported_with_the_referencing_node() {
        let nodes = vec![NodeDef::new("orphan", TEMPLATE_TYPE).with_property("template", "ghost")];
        let err = expand_templates(&[], &nodes).unwrap_err();
        assert!(matches!(
            err,
            CompileError::TemplateNotFound { node, template }
                if node == "orphan" && template == "ghost"
        ));
    }

    #[test]
    fn plain_nodes_pass_through_in_order() {
        let nodes = vec![
            NodeDef::new("a", "scalar_source"),
            NodeDef::new("b", "scalar_source"),
        ];
        let out = expand_templates(&[], &nodes).unwrap();
        let names: Vec<&str> = out.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
