use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ExprError, ExprResult};

static NUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^-?\d+(\.\d+)?$").expect("numeric pattern compiles"));

/// Type an expression argument or result is coerced to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ExprType {
    Boolean,
    Number,
    String,
    Any,
}

impl fmt::Display for ExprType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExprType::Boolean => "boolean",
            ExprType::Number => "number",
            ExprType::String => "string",
            ExprType::Any => "any",
        };
        f.write_str(label)
    }
}

/// Scalar produced by evaluating an expression.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExprValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl ExprValue {
    /// Converts a JSON scalar. Objects and arrays have no expression value.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(ExprValue::Null),
            Value::Bool(flag) => Some(ExprValue::Bool(*flag)),
            Value::Number(number) => number.as_f64().map(ExprValue::Number),
            Value::String(text) => Some(ExprValue::String(text.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            ExprValue::Null => Value::Null,
            ExprValue::Bool(flag) => Value::Bool(*flag),
            ExprValue::Number(number) => serde_json::Number::from_f64(*number)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ExprValue::String(text) => Value::String(text.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ExprValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ExprValue::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ExprValue::Number(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ExprValue::String(text) => Some(text),
            _ => None,
        }
    }

    /// Coerces the value following the fixed scalar order
    /// `Boolean < Number < String`: widening succeeds except boolean to
    /// string, narrowing parses and fails with `InvalidType`.
    pub fn cast(self, to: ExprType) -> ExprResult<ExprValue> {
        match (to, self) {
            (ExprType::Any, value) => Ok(value),
            (_, ExprValue::Null) => Ok(ExprValue::Null),

            (ExprType::Boolean, ExprValue::Bool(flag)) => Ok(ExprValue::Bool(flag)),
            (ExprType::Boolean, ExprValue::Number(number)) => {
                if number == 1.0 {
                    Ok(ExprValue::Bool(true))
                } else if number == 0.0 {
                    Ok(ExprValue::Bool(false))
                } else {
                    Err(invalid(&ExprValue::Number(number), to))
                }
            }
            (ExprType::Boolean, ExprValue::String(text)) => {
                if text.is_empty() {
                    Ok(ExprValue::Null)
                } else if text.eq_ignore_ascii_case("true") || text == "1" {
                    Ok(ExprValue::Bool(true))
                } else if text.eq_ignore_ascii_case("false") || text == "0" {
                    Ok(ExprValue::Bool(false))
                } else {
                    Err(invalid(&ExprValue::String(text), to))
                }
            }

            (ExprType::Number, ExprValue::Bool(flag)) => {
                Ok(ExprValue::Number(if flag { 1.0 } else { 0.0 }))
            }
            (ExprType::Number, ExprValue::Number(number)) => Ok(ExprValue::Number(number)),
            (ExprType::Number, ExprValue::String(text)) => {
                if text.is_empty() {
                    return Ok(ExprValue::Null);
                }
                if !NUMERIC.is_match(&text) {
                    return Err(invalid(&ExprValue::String(text), to));
                }
                text.parse::<f64>()
                    .map(ExprValue::Number)
                    .map_err(|_| invalid(&ExprValue::String(text.clone()), to))
            }

            (ExprType::String, ExprValue::Bool(flag)) => Err(invalid(&ExprValue::Bool(flag), to)),
            (ExprType::String, ExprValue::Number(number)) => {
                Ok(ExprValue::String(format_number(number)))
            }
            (ExprType::String, ExprValue::String(text)) => Ok(ExprValue::String(text)),
        }
    }

    /// Key used by `equals`/`notEquals`. `None` stands for null.
    pub fn equality_key(&self) -> Option<String> {
        match self {
            ExprValue::Null => None,
            ExprValue::Bool(flag) => Some(flag.to_string()),
            ExprValue::Number(number) => Some(format_number(*number)),
            ExprValue::String(text) => {
                if text.eq_ignore_ascii_case("true") {
                    Some("true".into())
                } else if text.eq_ignore_ascii_case("false") {
                    Some("false".into())
                } else if text.eq_ignore_ascii_case("null") {
                    None
                } else {
                    Some(text.clone())
                }
            }
        }
    }

    /// Text form used when a value is shown to a human (logs, CLI output).
    pub fn display_text(&self) -> String {
        match self {
            ExprValue::Null => "null".into(),
            ExprValue::Bool(flag) => flag.to_string(),
            ExprValue::Number(number) => format_number(*number),
            ExprValue::String(text) => text.clone(),
        }
    }
}

impl From<bool> for ExprValue {
    fn from(value: bool) -> Self {
        ExprValue::Bool(value)
    }
}

impl From<f64> for ExprValue {
    fn from(value: f64) -> Self {
        ExprValue::Number(value)
    }
}

impl From<&str> for ExprValue {
    fn from(value: &str) -> Self {
        ExprValue::String(value.to_string())
    }
}

impl From<String> for ExprValue {
    fn from(value: String) -> Self {
        ExprValue::String(value)
    }
}

impl<T: Into<ExprValue>> From<Option<T>> for ExprValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ExprValue::Null)
    }
}

/// Integral numbers print without a fraction, everything else in shortest
/// round-trip form.
pub fn format_number(number: f64) -> String {
    if number == 0.0 {
        return "0".into();
    }
    number.to_string()
}

fn invalid(value: &ExprValue, expected: ExprType) -> ExprError {
    let value = match value {
        ExprValue::String(text) => format!("string '{}'", text),
        ExprValue::Number(number) => format!("number {}", format_number(*number)),
        ExprValue::Bool(flag) => format!("boolean {}", flag),
        ExprValue::Null => "null".into(),
    };
    ExprError::InvalidType { value, expected }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cast(value: impl Into<ExprValue>, to: ExprType) -> ExprResult<ExprValue> {
        value.into().cast(to)
    }

    #[test]
    fn null_stays_null_for_every_target() {
        for ty in [
            ExprType::Boolean,
            ExprType::Number,
            ExprType::String,
            ExprType::Any,
        ] {
            assert_eq!(ExprValue::Null.cast(ty), Ok(ExprValue::Null));
        }
    }

    #[test]
    fn any_is_identity() {
        assert_eq!(cast(true, ExprType::Any), Ok(ExprValue::Bool(true)));
        assert_eq!(cast(2.5, ExprType::Any), Ok(ExprValue::Number(2.5)));
        assert_eq!(cast("x", ExprType::Any), Ok(ExprValue::from("x")));
    }

    #[test]
    fn boolean_targets() {
        assert_eq!(cast(true, ExprType::Boolean), Ok(ExprValue::Bool(true)));
        assert_eq!(cast(1.0, ExprType::Boolean), Ok(ExprValue::Bool(true)));
        assert_eq!(cast(0.0, ExprType::Boolean), Ok(ExprValue::Bool(false)));
        assert!(matches!(
            cast(2.0, ExprType::Boolean),
            Err(ExprError::InvalidType { .. })
        ));
        assert_eq!(cast("TRUE", ExprType::Boolean), Ok(ExprValue::Bool(true)));
        assert_eq!(cast("false", ExprType::Boolean), Ok(ExprValue::Bool(false)));
        assert_eq!(cast("1", ExprType::Boolean), Ok(ExprValue::Bool(true)));
        assert_eq!(cast("0", ExprType::Boolean), Ok(ExprValue::Bool(false)));
        assert_eq!(cast("", ExprType::Boolean), Ok(ExprValue::Null));
        assert!(matches!(
            cast("yes", ExprType::Boolean),
            Err(ExprError::InvalidType { .. })
        ));
    }

    #[test]
    fn number_targets() {
        assert_eq!(cast(true, ExprType::Number), Ok(ExprValue::Number(1.0)));
        assert_eq!(cast(false, ExprType::Number), Ok(ExprValue::Number(0.0)));
        assert_eq!(cast(4.0, ExprType::Number), Ok(ExprValue::Number(4.0)));
        assert_eq!(cast("-12.5", ExprType::Number), Ok(ExprValue::Number(-12.5)));
        assert_eq!(cast("", ExprType::Number), Ok(ExprValue::Null));
        for bad in ["1e3", "abc", "1.", ".5", " 1"] {
            assert!(
                matches!(cast(bad, ExprType::Number), Err(ExprError::InvalidType { .. })),
                "{bad} should not parse"
            );
        }
    }

    #[test]
    fn string_targets() {
        assert!(matches!(
            cast(true, ExprType::String),
            Err(ExprError::InvalidType { .. })
        ));
        assert_eq!(cast(3.0, ExprType::String), Ok(ExprValue::from("3")));
        assert_eq!(cast(0.25, ExprType::String), Ok(ExprValue::from("0.25")));
        assert_eq!(cast(-0.0, ExprType::String), Ok(ExprValue::from("0")));
        assert_eq!(cast("same", ExprType::String), Ok(ExprValue::from("same")));
    }

    #[test]
    fn equality_keys_normalise_literals() {
        assert_eq!(ExprValue::from("TrUe").equality_key(), Some("true".into()));
        assert_eq!(ExprValue::from("null").equality_key(), None);
        assert_eq!(ExprValue::Number(5.0).equality_key(), Some("5".into()));
        assert_eq!(ExprValue::Bool(false).equality_key(), Some("false".into()));
    }

    #[test]
    fn json_conversion_rejects_containers() {
        assert_eq!(ExprValue::from_json(&serde_json::json!([1])), None);
        assert_eq!(
            ExprValue::from_json(&serde_json::json!(7)),
            Some(ExprValue::Number(7.0))
        );
    }
}
