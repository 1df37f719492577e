use std::fmt;

use serde_json::Value;

use crate::error::{ExprError, ExprResult};
use crate::functions::FunctionRegistry;
use crate::value::{ExprType, ExprValue};

/// Expression tree parsed from the JSON wire format
/// `["functionName", arg, ...]`. Bare scalars are literals.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(ExprValue),
    Call { function: String, args: Vec<Expr> },
}

/// An expression together with the type its property expects.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedExpr {
    pub expr: Expr,
    pub expected: ExprType,
}

impl Expr {
    /// Parses and validates an expression against `registry`. Unknown
    /// functions, arity violations and statically malformed data model
    /// paths are rejected here, before anything is evaluated.
    pub fn parse(raw: &Value, registry: &FunctionRegistry) -> ExprResult<Expr> {
        Self::parse_at(raw, registry, "$")
    }

    fn parse_at(raw: &Value, registry: &FunctionRegistry, at: &str) -> ExprResult<Expr> {
        let items = match raw {
            Value::Array(items) => items,
            Value::Object(_) => {
                return Err(ExprError::Malformed {
                    at: at.to_string(),
                    reason: "objects are not valid expressions".into(),
                });
            }
            scalar => {
                let value = ExprValue::from_json(scalar).unwrap_or_default();
                return Ok(Expr::Literal(value));
            }
        };

        let Some((head, rest)) = items.split_first() else {
            return Err(ExprError::Malformed {
                at: at.to_string(),
                reason: "empty array".into(),
            });
        };
        let Some(name) = head.as_str() else {
            return Err(ExprError::Malformed {
                at: at.to_string(),
                reason: "first element must be a function name".into(),
            });
        };

        let def = registry
            .get(name)
            .ok_or_else(|| ExprError::UnknownFunction {
                name: name.to_string(),
                at: at.to_string(),
            })?;

        let args = rest
            .iter()
            .enumerate()
            .map(|(position, arg)| {
                Self::parse_at(arg, registry, &format!("{}[{}]", at, position + 1))
            })
            .collect::<ExprResult<Vec<_>>>()?;

        def.validate_args(&args, at)?;

        Ok(Expr::Call {
            function: name.to_string(),
            args,
        })
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Expr::Literal(_))
    }

    pub fn as_literal(&self) -> Option<&ExprValue> {
        match self {
            Expr::Literal(value) => Some(value),
            Expr::Call { .. } => None,
        }
    }

    /// Serializes back into the wire format.
    pub fn to_json(&self) -> Value {
        match self {
            Expr::Literal(value) => value.to_json(),
            Expr::Call { function, args } => {
                let mut items = Vec::with_capacity(args.len() + 1);
                items.push(Value::String(function.clone()));
                items.extend(args.iter().map(Expr::to_json));
                Value::Array(items)
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl TypedExpr {
    pub fn parse(raw: &Value, registry: &FunctionRegistry, expected: ExprType) -> ExprResult<Self> {
        Ok(Self {
            expr: Expr::parse(raw, registry)?,
            expected,
        })
    }

    pub fn literal(value: impl Into<ExprValue>, expected: ExprType) -> Self {
        Self {
            expr: Expr::Literal(value.into()),
            expected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> FunctionRegistry {
        FunctionRegistry::with_builtins()
    }

    #[test]
    fn scalars_are_literals() {
        let registry = registry();
        assert_eq!(
            Expr::parse(&json!(true), &registry),
            Ok(Expr::Literal(ExprValue::Bool(true)))
        );
        assert_eq!(
            Expr::parse(&json!("text"), &registry),
            Ok(Expr::Literal(ExprValue::from("text")))
        );
        assert_eq!(
            Expr::parse(&json!(null), &registry),
            Ok(Expr::Literal(ExprValue::Null))
        );
    }

    #[test]
    fn nested_calls_round_trip_to_json() {
        let raw = json!(["equals", ["dataModel", "Person.Name"], "Ola"]);
        let expr = Expr::parse(&raw, &registry()).expect("parse");
        assert_eq!(expr.to_json(), raw);
    }

    #[test]
    fn unknown_function_reports_location() {
        let raw = json!(["and", true, ["frobnicate", 1]]);
        let error = Expr::parse(&raw, &registry()).expect_err("unknown");
        assert_eq!(
            error,
            ExprError::UnknownFunction {
                name: "frobnicate".into(),
                at: "$[2]".into(),
            }
        );
    }

    #[test]
    fn arity_is_checked_at_parse_time() {
        let error = Expr::parse(&json!(["not", true, false]), &registry()).expect_err("arity");
        assert!(matches!(error, ExprError::ArgumentCount { actual: 2, .. }));
        let error = Expr::parse(&json!(["equals", 1]), &registry()).expect_err("arity");
        assert!(matches!(error, ExprError::ArgumentCount { actual: 1, .. }));
    }

    #[test]
    fn malformed_shapes_are_rejected() {
        let registry = registry();
        for raw in [json!([]), json!([1, 2]), json!({ "function": "equals" })] {
            assert!(matches!(
                Expr::parse(&raw, &registry),
                Err(ExprError::Malformed { .. })
            ));
        }
    }

    #[test]
    fn static_data_model_paths_are_validated() {
        let error =
            Expr::parse(&json!(["dataModel", "Group[x].Name"]), &registry()).expect_err("path");
        assert!(matches!(error, ExprError::InvalidPath { .. }));
    }

    #[test]
    fn if_requires_else_keyword() {
        let registry = registry();
        assert!(Expr::parse(&json!(["if", true, 1]), &registry).is_ok());
        assert!(Expr::parse(&json!(["if", true, 1, "else", 2]), &registry).is_ok());
        assert!(matches!(
            Expr::parse(&json!(["if", true, 1, "otherwise", 2]), &registry),
            Err(ExprError::Malformed { .. })
        ));
        assert!(matches!(
            Expr::parse(&json!(["if", true, 1, "else"]), &registry),
            Err(ExprError::ArgumentCount { .. })
        ));
    }
}
