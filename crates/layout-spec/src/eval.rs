use crate::context::EvalContext;
use crate::error::{ExprError, ExprResult};
use crate::expr::{Expr, TypedExpr};
use crate::functions::{FunctionKind, FunctionRegistry, Invocation};
use crate::value::{ExprType, ExprValue};

/// Evaluates parsed expressions against a context. Holds nothing but the
/// registry, so one evaluator can serve every node of a pass.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator<'r> {
    registry: &'r FunctionRegistry,
}

impl<'r> Evaluator<'r> {
    pub fn new(registry: &'r FunctionRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r FunctionRegistry {
        self.registry
    }

    pub fn evaluate(&self, expr: &TypedExpr, ctx: &EvalContext<'_>) -> ExprResult<ExprValue> {
        self.evaluate_as(&expr.expr, ctx, expr.expected)
    }

    pub fn evaluate_as(
        &self,
        expr: &Expr,
        ctx: &EvalContext<'_>,
        expected: ExprType,
    ) -> ExprResult<ExprValue> {
        self.eval_at(expr, ctx, "$")?.cast(expected)
    }

    fn eval_at(&self, expr: &Expr, ctx: &EvalContext<'_>, at: &str) -> ExprResult<ExprValue> {
        let (function, args) = match expr {
            Expr::Literal(value) => return Ok(value.clone()),
            Expr::Call { function, args } => (function, args),
        };

        let def = self
            .registry
            .get(function)
            .ok_or_else(|| ExprError::UnknownFunction {
                name: function.clone(),
                at: at.to_string(),
            })?;
        def.validate_args(args, at)?;

        let child = |position: usize| format!("{}[{}]", at, position + 1);

        match def.kind {
            FunctionKind::Conditional => {
                let condition = self
                    .eval_at(&args[0], ctx, &child(0))?
                    .cast(def.arg_type(0))?;
                if condition == ExprValue::Bool(true) {
                    self.eval_at(&args[1], ctx, &child(1))
                } else if let Some(otherwise) = args.get(3) {
                    self.eval_at(otherwise, ctx, &child(3))
                } else {
                    Ok(ExprValue::Null)
                }
            }
            FunctionKind::Eager(implementation) => {
                let values = args
                    .iter()
                    .enumerate()
                    .map(|(position, arg)| {
                        self.eval_at(arg, ctx, &child(position))?
                            .cast(def.arg_type(position))
                    })
                    .collect::<ExprResult<Vec<_>>>()?;
                let call = Invocation {
                    ctx,
                    function: def.name,
                    at,
                };
                implementation(&call, &values)?.cast(def.returns)
            }
        }
    }
}

/// Parses and evaluates a raw expression in one step.
pub fn evaluate_json(
    raw: &serde_json::Value,
    registry: &FunctionRegistry,
    ctx: &EvalContext<'_>,
    expected: ExprType,
) -> ExprResult<ExprValue> {
    let expr = Expr::parse(raw, registry)?;
    Evaluator::new(registry).evaluate_as(&expr, ctx, expected)
}
