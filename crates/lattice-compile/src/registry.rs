// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Node-type registry: from declarative `type` strings to node factories.
//!
//! Each entry pairs a factory with the ordered input roles it accepts when a
//! definition uses named inputs. Domain indicators (EWMA, SMA, RSI, MACD) are
//! thin wrappers that configure a scalar computed node with the matching
//! kernel and property-derived parameters.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use serde_json::Value;

use lattice_core::kernels::{
    Difference, ElementDifference, Ewma, GreaterThan, LessThan, Macd, Passthrough, Product,
    Quotient, Rsi, Select, Sma, Sum, TriangularSpread, VectorElement, VectorEwma, VectorSpread,
    WeightedMid,
};
use lattice_core::{
    BooleanComputed, Cutoff, Node, ScalarComputed, ScalarKernel, ScalarSource, VectorComputed,
    VectorSource,
};

use crate::error::CompileError;

/// A constructed node plus its source flag.
pub struct NodeSpec {
    /// The instantiated node.
    pub node: Box<dyn Node>,
    /// Whether the node accepts external writes.
    pub is_source: bool,
}

impl NodeSpec {
    /// Wraps a source node.
    #[must_use]
    pub fn source(node: Box<dyn Node>) -> Self {
        Self {
            node,
            is_source: true,
        }
    }

    /// Wraps a computed node.
    #[must_use]
    pub fn computed(node: Box<dyn Node>) -> Self {
        Self {
            node,
            is_source: false,
        }
    }
}

impl core::fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.node.name())
            .field("is_source", &self.is_source)
            .finish()
    }
}

/// What a factory sees: the node's name, its property bag, and how many
/// upstreams the compiler resolved for it.
#[derive(Debug)]
pub struct FactoryContext<'a> {
    /// Name of the node being instantiated.
    pub name: &'a str,
    /// The definition's property bag.
    pub properties: &'a BTreeMap<String, Value>,
    /// Number of resolved upstreams.
    pub arity: usize,
}

impl FactoryContext<'_> {
    fn invalid(&self, key: &str, reason: impl Into<String>) -> CompileError {
        CompileError::InvalidProperty {
            node: self.name.to_owned(),
            key: key.to_owned(),
            reason: reason.into(),
        }
    }

    /// Coerces an optional numeric property to `f64`.
    pub fn f64_prop(&self, key: &str) -> Result<Option<f64>, CompileError> {
        match self.properties.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.invalid(key, "not representable as f64")),
            Some(other) => Err(self.invalid(key, format!("expected number, got {other}"))),
        }
    }

    /// Requires a numeric property.
    pub fn require_f64(&self, key: &str) -> Result<f64, CompileError> {
        self.f64_prop(key)?
            .ok_or_else(|| self.invalid(key, "missing required property"))
    }

    /// Coerces an optional numeric property to `usize`.
    pub fn usize_prop(&self, key: &str) -> Result<Option<usize>, CompileError> {
        match self.properties.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(|v| Some(v as usize))
                .ok_or_else(|| self.invalid(key, "expected a non-negative integer")),
            Some(other) => Err(self.invalid(key, format!("expected integer, got {other}"))),
        }
    }

    /// Requires a `usize` property.
    pub fn require_usize(&self, key: &str) -> Result<usize, CompileError> {
        self.usize_prop(key)?
            .ok_or_else(|| self.invalid(key, "missing required property"))
    }

    /// Reads an optional string property.
    pub fn str_prop(&self, key: &str) -> Result<Option<&str>, CompileError> {
        match self.properties.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(self.invalid(key, format!("expected string, got {other}"))),
        }
    }

    /// Reads an optional numeric-array property.
    pub fn f64_list(&self, key: &str) -> Result<Option<Vec<f64>>, CompileError> {
        match self.properties.get(key) {
            None => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_f64()
                        .ok_or_else(|| self.invalid(key, format!("non-numeric element {v}")))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(other) => Err(self.invalid(key, format!("expected array, got {other}"))),
        }
    }

    /// Reads an optional string-array property.
    pub fn string_list(&self, key: &str) -> Result<Option<Vec<String>>, CompileError> {
        match self.properties.get(key) {
            None => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_owned)
                        .ok_or_else(|| self.invalid(key, format!("non-string element {v}")))
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Some),
            Some(other) => Err(self.invalid(key, format!("expected array, got {other}"))),
        }
    }

    /// Selects the node's cutoff from `cutoff` / `tolerance`.
    ///
    /// Defaults to `exact` when absent; `absolute`/`relative` read the
    /// `tolerance` property (default 0).
    pub fn cutoff(&self) -> Result<Cutoff, CompileError> {
        let tolerance = self.f64_prop("tolerance")?.unwrap_or(0.0);
        match self.str_prop("cutoff")? {
            None | Some("exact") => Ok(Cutoff::Exact),
            Some("absolute") => Ok(Cutoff::Absolute(tolerance)),
            Some("relative") => Ok(Cutoff::Relative(tolerance)),
            Some("always") => Ok(Cutoff::Always),
            Some("never") => Ok(Cutoff::Never),
            Some(other) => Err(self.invalid("cutoff", format!("unknown cutoff `{other}`"))),
        }
    }

    /// Requires exactly `expected` resolved upstreams.
    pub fn require_arity(&self, expected: usize) -> Result<(), CompileError> {
        if self.arity == expected {
            Ok(())
        } else {
            Err(self.invalid(
                "dependencies",
                format!("expected {expected} upstream(s), got {}", self.arity),
            ))
        }
    }

    /// Requires at least `min` resolved upstreams.
    pub fn require_min_arity(&self, min: usize) -> Result<(), CompileError> {
        if self.arity >= min {
            Ok(())
        } else {
            Err(self.invalid(
                "dependencies",
                format!("expected at least {min} upstream(s), got {}", self.arity),
            ))
        }
    }
}

/// Factory signature: context in, constructed node out.
pub type NodeFactory = Box<dyn Fn(&FactoryContext<'_>) -> Result<NodeSpec, CompileError>>;

/// One registry entry: the factory plus its declared named-input roles (empty
/// for positional-only types).
pub struct NodeTypeEntry {
    factory: NodeFactory,
    named_roles: Vec<&'static str>,
}

impl NodeTypeEntry {
    /// Ordered roles accepted as named inputs.
    #[must_use]
    pub fn named_roles(&self) -> &[&'static str] {
        &self.named_roles
    }

    /// Runs the factory.
    pub fn instantiate(&self, ctx: &FactoryContext<'_>) -> Result<NodeSpec, CompileError> {
        (self.factory)(ctx)
    }
}

impl core::fmt::Debug for NodeTypeEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NodeTypeEntry")
            .field("named_roles", &self.named_roles)
            .finish_non_exhaustive()
    }
}

/// Mapping from `type` strings to factories: the closed built-in set plus any
/// user-registered kinds.
#[derive(Debug, Default)]
pub struct NodeTypeRegistry {
    entries: FxHashMap<String, NodeTypeEntry>,
}

fn scalar_node(
    ctx: &FactoryContext<'_>,
    kernel: Box<dyn ScalarKernel>,
) -> Result<NodeSpec, CompileError> {
    Ok(NodeSpec::computed(Box::new(ScalarComputed::new(
        ctx.name,
        kernel,
        ctx.cutoff()?,
    ))))
}

impl NodeTypeRegistry {
    /// An empty registry (no types at all).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The built-in type set.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut reg = Self::default();

        reg.add("scalar_source", &[], |ctx| {
            ctx.require_arity(0)?;
            let value = match ctx.f64_prop("initial_value")? {
                Some(v) => v,
                None => ctx.f64_prop("value")?.unwrap_or(0.0),
            };
            Ok(NodeSpec::source(Box::new(ScalarSource::new(
                ctx.name,
                value,
                ctx.cutoff()?,
            ))))
        });

        reg.add("vector_source", &[], |ctx| {
            ctx.require_arity(0)?;
            let size = ctx.require_usize("size")?;
            if size == 0 {
                return Err(CompileError::InvalidProperty {
                    node: ctx.name.to_owned(),
                    key: "size".to_owned(),
                    reason: "vector size must be positive".to_owned(),
                });
            }
            let values = ctx.f64_list("values")?.unwrap_or_else(|| vec![0.0; size]);
            if values.len() != size {
                return Err(CompileError::InvalidProperty {
                    node: ctx.name.to_owned(),
                    key: "values".to_owned(),
                    reason: format!("expected {size} values, got {}", values.len()),
                });
            }
            let headers = ctx.string_list("headers")?;
            if let Some(h) = &headers {
                if h.len() != size {
                    return Err(CompileError::InvalidProperty {
                        node: ctx.name.to_owned(),
                        key: "headers".to_owned(),
                        reason: format!("expected {size} headers, got {}", h.len()),
                    });
                }
            }
            let tolerance = ctx.f64_prop("tolerance")?.unwrap_or(0.0);
            Ok(NodeSpec::source(Box::new(VectorSource::new(
                ctx.name, values, headers, tolerance,
            ))))
        });

        reg.add("passthrough", &[], |ctx| {
            ctx.require_arity(1)?;
            scalar_node(ctx, Box::new(Passthrough))
        });
        reg.add("sum", &[], |ctx| {
            ctx.require_min_arity(1)?;
            scalar_node(ctx, Box::new(Sum))
        });
        reg.add("difference", &["minuend", "subtrahend"], |ctx| {
            ctx.require_arity(2)?;
            scalar_node(ctx, Box::new(Difference))
        });
        reg.add("product", &[], |ctx| {
            ctx.require_min_arity(1)?;
            scalar_node(ctx, Box::new(Product))
        });
        reg.add("quotient", &["numerator", "denominator"], |ctx| {
            ctx.require_arity(2)?;
            scalar_node(ctx, Box::new(Quotient))
        });
        reg.add("triangular_spread", &["direct", "leg_a", "leg_b"], |ctx| {
            ctx.require_arity(3)?;
            scalar_node(ctx, Box::new(TriangularSpread))
        });
        reg.add(
            "weighted_mid",
            &["bid", "bid_qty", "ask", "ask_qty"],
            |ctx| {
                ctx.require_arity(4)?;
                scalar_node(ctx, Box::new(WeightedMid))
            },
        );

        reg.add("sma", &[], |ctx| {
            ctx.require_arity(1)?;
            let window = ctx.require_usize("window")?;
            if window == 0 {
                return Err(CompileError::InvalidProperty {
                    node: ctx.name.to_owned(),
                    key: "window".to_owned(),
                    reason: "window must be at least 1".to_owned(),
                });
            }
            scalar_node(ctx, Box::new(Sma::new(window)))
        });
        reg.add("ewma", &[], |ctx| {
            ctx.require_arity(1)?;
            let alpha = ctx.require_f64("alpha")?;
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(CompileError::InvalidProperty {
                    node: ctx.name.to_owned(),
                    key: "alpha".to_owned(),
                    reason: "alpha must lie in (0, 1]".to_owned(),
                });
            }
            scalar_node(ctx, Box::new(Ewma::new(alpha)))
        });
        reg.add("rsi", &[], |ctx| {
            ctx.require_arity(1)?;
            let window = ctx.require_usize("window")?;
            if window == 0 {
                return Err(CompileError::InvalidProperty {
                    node: ctx.name.to_owned(),
                    key: "window".to_owned(),
                    reason: "window must be at least 1".to_owned(),
                });
            }
            scalar_node(ctx, Box::new(Rsi::new(window)))
        });
        reg.add("macd", &[], |ctx| {
            ctx.require_arity(1)?;
            let fast = ctx.require_usize("fast")?;
            let slow = ctx.require_usize("slow")?;
            if fast == 0 || fast >= slow {
                return Err(CompileError::InvalidProperty {
                    node: ctx.name.to_owned(),
                    key: "fast".to_owned(),
                    reason: format!("need 0 < fast < slow, got fast={fast} slow={slow}"),
                });
            }
            scalar_node(ctx, Box::new(Macd::new(fast, slow)))
        });

        reg.add("vector_element", &[], |ctx| {
            ctx.require_arity(1)?;
            let element = ctx.require_usize("element")?;
            scalar_node(ctx, Box::new(VectorElement::new(element)))
        });
        reg.add("element_difference", &[], |ctx| {
            ctx.require_arity(1)?;
            let minuend = ctx.require_usize("minuend")?;
            let subtrahend = ctx.require_usize("subtrahend")?;
            scalar_node(ctx, Box::new(ElementDifference::new(minuend, subtrahend)))
        });
        reg.add("vector_spread", &[], |ctx| {
            ctx.require_arity(1)?;
            scalar_node(ctx, Box::new(VectorSpread))
        });
        reg.add("vector_ewma", &[], |ctx| {
            ctx.require_arity(1)?;
            let alpha = ctx.require_f64("alpha")?;
            let size = ctx.require_usize("size")?;
            if size == 0 {
                return Err(CompileError::InvalidProperty {
                    node: ctx.name.to_owned(),
                    key: "size".to_owned(),
                    reason: "vector size must be positive".to_owned(),
                });
            }
            let tolerance = ctx.f64_prop("tolerance")?.unwrap_or(0.0);
            Ok(NodeSpec::computed(Box::new(VectorComputed::new(
                ctx.name,
                Box::new(VectorEwma::new(alpha, size)),
                size,
                tolerance,
            ))))
        });

        reg.add("greater_than", &["left", "right"], |ctx| {
            ctx.require_arity(2)?;
            Ok(NodeSpec::computed(Box::new(BooleanComputed::new(
                ctx.name,
                Box::new(GreaterThan),
            ))))
        });
        reg.add("less_than", &["left", "right"], |ctx| {
            ctx.require_arity(2)?;
            Ok(NodeSpec::computed(Box::new(BooleanComputed::new(
                ctx.name,
                Box::new(LessThan),
            ))))
        });
        reg.add("select", &["condition", "if_true", "if_false"], |ctx| {
            ctx.require_arity(3)?;
            scalar_node(ctx, Box::new(Select))
        });

        reg
    }

    /// Registers a user-defined node type.
    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        named_roles: &[&'static str],
        factory: NodeFactory,
    ) -> Result<(), CompileError> {
        let type_name = type_name.into();
        if self.entries.contains_key(&type_name) {
            return Err(CompileError::DuplicateType(type_name));
        }
        self.entries.insert(
            type_name,
            NodeTypeEntry {
                factory,
                named_roles: named_roles.to_vec(),
            },
        );
        Ok(())
    }

    /// Looks up a type.
    #[must_use]
    pub fn get(&self, type_name: &str) -> Option<&NodeTypeEntry> {
        self.entries.get(type_name)
    }

    /// Returns `true` when `type_name` is registered.
    #[must_use]
    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    fn add(
        &mut self,
        type_name: &str,
        named_roles: &[&'static str],
        factory: impl Fn(&FactoryContext<'_>) -> Result<NodeSpec, CompileError> + 'static,
    ) {
        let prev = self.entries.insert(
            type_name.to_owned(),
            NodeTypeEntry {
                factory: Box::new(factory),
                named_roles: named_roles.to_vec(),
            },
        );
        debug_assert!(prev.is_none(), "builtin type registered twice");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(props: &'a BTreeMap<String, Value>, arity: usize) -> FactoryContext<'a> {
        FactoryContext {
            name: "n",
            properties: props,
            arity,
        }
    }

    #[test]
    fn cutoff_selection_from_properties() {
        let mut props = BTreeMap::new();
        assert_eq!(ctx(&props, 0).cutoff().unwrap(), Cutoff::Exact);

        props.insert("cutoff".to_owned(), Value::from("absolute"));
        props.insert("tolerance".to_owned(), Value::from(1e-6));
        assert_eq!(ctx(&props, 0).cutoff().unwrap(), Cutoff::Absolute(1e-6));

        props.insert("cutoff".to_owned(), Value::from("banana"));
        assert!(matches!(
            ctx(&props, 0).cutoff(),
            Err(CompileError::InvalidProperty { .. })
        ));
    }

    #[test]
    fn numeric_coercions() {
        let mut props = BTreeMap::new();
        props.insert("window".to_owned(), Value::from(14));
        props.insert("alpha".to_owned(), Value::from(0.1));
        let c = ctx(&props, 0);
        assert_eq!(c.require_usize("window").unwrap(), 14);
        assert_eq!(c.require_f64("alpha").unwrap(), 0.1);
        assert!(c.f64_prop("missing").unwrap().is_none());
        assert!(matches!(
            c.require_f64("missing"),
            Err(CompileError::InvalidProperty { .. })
        ));
    }

    #[test]
    fn vector_source_rejects_non_positive_size() {
        let reg = NodeTypeRegistry::with_builtins();
        let mut props = BTreeMap::new();
        props.insert("size".to_owned(), Value::from(0));
        let err = reg
            .get("vector_source")
            .unwrap()
            .instantiate(&ctx(&props, 0))
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidProperty { key, .. } if key == "size"));
    }

    #[test]
    fn ewma_validates_alpha_range() {
        let reg = NodeTypeRegistry::with_builtins();
        let mut props = BTreeMap::new();
        props.insert("alpha".to_owned(), Value::from(1.5));
        let err = reg
            .get("ewma")
            .unwrap()
            .instantiate(&ctx(&props, 1))
            .unwrap_err();
        assert!(matches!(err, CompileError::InvalidProperty { key, .. } if key == "alpha"));
    }

    #[test]
    fn named_roles_are_declared_in_kernel_order() {
        let reg = NodeTypeRegistry::with_builtins();
        assert_eq!(
            reg.get("weighted_mid").unwrap().named_roles(),
            ["bid", "bid_qty", "ask", "ask_qty"]
        );
        assert_eq!(
            reg.get("select").unwrap().named_roles(),
            ["condition", "if_true", "if_false"]
        );
    }

    #[test]
    fn user_types_register_once() {
        let mut reg = NodeTypeRegistry::with_builtins();
        reg.register(
            "custom",
            &[],
            Box::new(|ctx: &FactoryContext<'_>| {
                ctx.require_arity(1)?;
                scalar_node(ctx, Box::new(Passthrough))
            }),
        )
        .unwrap();
        assert!(reg.contains("custom"));
        let err = reg
            .register(
                "custom",
                &[],
                Box::new(|_: &FactoryContext<'_>| unreachable!()),
            )
            .unwrap_err();
        assert!(matches!(err, CompileError::DuplicateType(t) if t == "custom"));
    }
}
