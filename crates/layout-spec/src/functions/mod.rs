//! Function registry for the expression language.
//!
//! The registry is built once at startup and shared by reference with the
//! parser and the evaluator. Each entry declares its argument signature so
//! arity problems are reported when a layout is loaded instead of when a
//! user happens to trigger the expression.

mod builtins;

use std::collections::BTreeMap;

use crate::context::EvalContext;
use crate::error::{ExprError, ExprResult};
use crate::expr::Expr;
use crate::value::{ExprType, ExprValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgVariant {
    Required,
    Optional,
    /// Zero or more trailing arguments of the same type.
    Rest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgDef {
    pub ty: ExprType,
    pub variant: ArgVariant,
}

/// Call site handed to a function implementation.
pub struct Invocation<'a, 'c> {
    pub ctx: &'a EvalContext<'c>,
    pub function: &'a str,
    pub at: &'a str,
}

impl Invocation<'_, '_> {
    pub fn fail(&self, message: impl Into<String>) -> ExprError {
        ExprError::Runtime {
            function: self.function.to_string(),
            at: self.at.to_string(),
            message: message.into(),
        }
    }
}

pub type FunctionImpl = fn(&Invocation<'_, '_>, &[ExprValue]) -> ExprResult<ExprValue>;

/// Extra parse-time check run after arity validation.
pub type ArgValidator = fn(&[Expr], &str) -> ExprResult<()>;

#[derive(Debug, Clone, Copy)]
pub enum FunctionKind {
    /// Arguments are evaluated and cast before the implementation runs.
    Eager(FunctionImpl),
    /// `if`: the evaluator picks the branch itself.
    Conditional,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: &'static str,
    pub args: Vec<ArgDef>,
    pub returns: ExprType,
    pub kind: FunctionKind,
    validator: Option<ArgValidator>,
    check_arity: bool,
}

impl FunctionDef {
    pub fn new(name: &'static str, returns: ExprType, implementation: FunctionImpl) -> Self {
        Self {
            name,
            args: Vec::new(),
            returns,
            kind: FunctionKind::Eager(implementation),
            validator: None,
            check_arity: true,
        }
    }

    pub fn conditional(name: &'static str, returns: ExprType) -> Self {
        Self {
            name,
            args: Vec::new(),
            returns,
            kind: FunctionKind::Conditional,
            validator: None,
            check_arity: true,
        }
    }

    pub fn required(mut self, ty: ExprType) -> Self {
        self.args.push(ArgDef {
            ty,
            variant: ArgVariant::Required,
        });
        self
    }

    pub fn optional(mut self, ty: ExprType) -> Self {
        self.args.push(ArgDef {
            ty,
            variant: ArgVariant::Optional,
        });
        self
    }

    pub fn rest(mut self, ty: ExprType) -> Self {
        self.args.push(ArgDef {
            ty,
            variant: ArgVariant::Rest,
        });
        self
    }

    pub fn with_validator(mut self, validator: ArgValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Leaves the argument count entirely to the validator.
    pub fn without_arity_check(mut self) -> Self {
        self.check_arity = false;
        self
    }

    pub fn min_args(&self) -> usize {
        self.args
            .iter()
            .filter(|arg| arg.variant == ArgVariant::Required)
            .count()
    }

    /// `None` when the last argument is variadic.
    pub fn max_args(&self) -> Option<usize> {
        if self
            .args
            .iter()
            .any(|arg| arg.variant == ArgVariant::Rest)
        {
            None
        } else {
            Some(self.args.len())
        }
    }

    /// Declared type of the argument at `position`; rest arguments repeat.
    pub fn arg_type(&self, position: usize) -> ExprType {
        match self.args.get(position) {
            Some(arg) => arg.ty,
            None => match self.args.last() {
                Some(last) if last.variant == ArgVariant::Rest => last.ty,
                _ => ExprType::Any,
            },
        }
    }

    fn arity_label(&self) -> String {
        let min = self.min_args();
        match self.max_args() {
            Some(max) if max == min => format!("exactly {}", min),
            Some(max) => format!("{} to {}", min, max),
            None => format!("at least {}", min),
        }
    }

    pub fn validate_args(&self, args: &[Expr], at: &str) -> ExprResult<()> {
        if self.check_arity {
            let actual = args.len();
            let too_many = self.max_args().is_some_and(|max| actual > max);
            if actual < self.min_args() || too_many {
                return Err(ExprError::ArgumentCount {
                    name: self.name.to_string(),
                    at: at.to_string(),
                    expected: self.arity_label(),
                    actual,
                });
            }
        }
        if let Some(validator) = self.validator {
            validator(args, at)?;
        }
        Ok(())
    }
}

/// Named set of functions available to expressions.
#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    functions: BTreeMap<&'static str, FunctionDef>,
}

impl FunctionRegistry {
    pub fn empty() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        builtins::register(&mut registry);
        registry
    }

    /// Adds or replaces a function.
    pub fn register(&mut self, def: FunctionDef) -> &mut Self {
        self.functions.insert(def.name, def);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.functions.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
