use thiserror::Error;

use crate::validate::LayoutIssue;
use crate::value::ExprType;

pub type ExprResult<T> = Result<T, ExprError>;

/// Failures raised while parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("unknown function '{name}' at {at}")]
    UnknownFunction { name: String, at: String },
    #[error("function '{name}' at {at} expects {expected} argument(s), got {actual}")]
    ArgumentCount {
        name: String,
        at: String,
        expected: String,
        actual: usize,
    },
    #[error("invalid data model path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("cannot convert {value} to {expected}")]
    InvalidType { value: String, expected: ExprType },
    #[error("malformed expression at {at}: {reason}")]
    Malformed { at: String, reason: String },
    #[error("{function} at {at}: {message}")]
    Runtime {
        function: String,
        at: String,
        message: String,
    },
}

impl ExprError {
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Errors that make a layout unusable when found while loading configuration.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            ExprError::UnknownFunction { .. }
                | ExprError::ArgumentCount { .. }
                | ExprError::InvalidPath { .. }
                | ExprError::Malformed { .. }
        )
    }

    /// Stable machine-readable code, used in layout validation reports.
    pub fn code(&self) -> &'static str {
        match self {
            ExprError::UnknownFunction { .. } => "unknown_function",
            ExprError::ArgumentCount { .. } => "argument_count",
            ExprError::InvalidPath { .. } => "invalid_path",
            ExprError::InvalidType { .. } => "invalid_type",
            ExprError::Malformed { .. } => "malformed_expression",
            ExprError::Runtime { .. } => "runtime_error",
        }
    }
}

/// Errors raised while loading a layout definition.
#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("failed to parse layout: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("layout has {} problem(s), first: {}", .0.len(), first_issue(.0))]
    Invalid(Vec<LayoutIssue>),
}

fn first_issue(issues: &[LayoutIssue]) -> String {
    issues
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "<none>".into())
}

/// Errors raised by structural operations on a generated tree.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("node '{0}' does not exist in the current tree")]
    UnknownNode(String),
    #[error("node '{0}' is not a repeating group")]
    NotRepeating(String),
    #[error("row {index} is out of range for '{group}' ({len} row(s))")]
    RowOutOfRange {
        group: String,
        index: usize,
        len: usize,
    },
    #[error(transparent)]
    Expr(#[from] ExprError),
}
