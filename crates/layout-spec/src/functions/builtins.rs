use super::{FunctionDef, FunctionRegistry, Invocation};
use crate::context::{InstanceContext, TaskContext};
use crate::error::{ExprError, ExprResult};
use crate::expr::Expr;
use crate::path::DataModelPath;
use crate::value::{ExprType, ExprValue};

use ExprType::{Any, Boolean, Number, String as Text};

pub(super) fn register(registry: &mut FunctionRegistry) {
    registry
        .register(FunctionDef::new("equals", Boolean, equals).required(Any).required(Any))
        .register(FunctionDef::new("notEquals", Boolean, not_equals).required(Any).required(Any))
        .register(FunctionDef::new("not", Boolean, not).required(Boolean))
        .register(compare("greaterThan", greater_than))
        .register(compare("greaterThanEq", greater_than_eq))
        .register(compare("lessThan", less_than))
        .register(compare("lessThanEq", less_than_eq))
        .register(FunctionDef::new("concat", Text, concat).rest(Text))
        .register(FunctionDef::new("and", Boolean, and).required(Boolean).rest(Boolean))
        .register(FunctionDef::new("or", Boolean, or).required(Boolean).rest(Boolean))
        .register(
            FunctionDef::conditional("if", Any)
                .required(Boolean)
                .required(Any)
                .optional(Text)
                .optional(Any)
                .without_arity_check()
                .with_validator(validate_if),
        )
        .register(FunctionDef::new("instanceContext", Text, instance_context).required(Text))
        .register(FunctionDef::new("frontendSettings", Any, frontend_settings).required(Text))
        .register(FunctionDef::new("authContext", Boolean, auth_context).required(Text))
        .register(FunctionDef::new("component", Any, component).required(Text))
        .register(
            FunctionDef::new("dataModel", Any, data_model)
                .required(Text)
                .optional(Text)
                .with_validator(validate_data_model),
        )
        .register(FunctionDef::new("hasRole", Boolean, has_role).required(Text))
        .register(strings("contains", contains))
        .register(strings("notContains", not_contains))
        .register(strings("startsWith", starts_with))
        .register(strings("endsWith", ends_with))
        .register(FunctionDef::new("stringLength", Number, string_length).required(Text))
        .register(strings("commaContains", comma_contains))
        .register(FunctionDef::new("lowerCase", Text, lower_case).required(Text))
        .register(FunctionDef::new("upperCase", Text, upper_case).required(Text))
        .register(FunctionDef::new("round", Text, round).required(Number).optional(Number))
        .register(FunctionDef::new("language", Text, language))
        .register(FunctionDef::new("argv", Any, argv).required(Number));
}

type Impl = super::FunctionImpl;

fn compare(name: &'static str, implementation: Impl) -> FunctionDef {
    FunctionDef::new(name, Boolean, implementation)
        .required(Number)
        .required(Number)
}

fn strings(name: &'static str, implementation: Impl) -> FunctionDef {
    FunctionDef::new(name, Boolean, implementation)
        .required(Text)
        .required(Text)
}

static NULL: ExprValue = ExprValue::Null;

fn arg(args: &[ExprValue], position: usize) -> &ExprValue {
    args.get(position).unwrap_or(&NULL)
}

fn number_pair(args: &[ExprValue]) -> Option<(f64, f64)> {
    Some((arg(args, 0).as_f64()?, arg(args, 1).as_f64()?))
}

fn string_pair(args: &[ExprValue]) -> Option<(&str, &str)> {
    Some((arg(args, 0).as_str()?, arg(args, 1).as_str()?))
}

fn truthy(value: &ExprValue) -> bool {
    value.as_bool().unwrap_or(false)
}

fn equals(_: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    Ok(ExprValue::Bool(
        arg(args, 0).equality_key() == arg(args, 1).equality_key(),
    ))
}

fn not_equals(_: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    Ok(ExprValue::Bool(
        arg(args, 0).equality_key() != arg(args, 1).equality_key(),
    ))
}

fn not(_: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    Ok(ExprValue::Bool(!truthy(arg(args, 0))))
}

fn greater_than(_: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    Ok(ExprValue::Bool(number_pair(args).is_some_and(|(a, b)| a > b)))
}

fn greater_than_eq(_: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    Ok(ExprValue::Bool(number_pair(args).is_some_and(|(a, b)| a >= b)))
}

fn less_than(_: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    Ok(ExprValue::Bool(number_pair(args).is_some_and(|(a, b)| a < b)))
}

fn less_than_eq(_: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    Ok(ExprValue::Bool(number_pair(args).is_some_and(|(a, b)| a <= b)))
}

fn concat(_: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    let joined: String = args.iter().filter_map(ExprValue::as_str).collect();
    Ok(ExprValue::String(joined))
}

fn and(_: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    Ok(ExprValue::Bool(args.iter().all(truthy)))
}

fn or(_: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    Ok(ExprValue::Bool(args.iter().any(truthy)))
}

fn validate_if(args: &[Expr], at: &str) -> ExprResult<()> {
    match args.len() {
        2 => Ok(()),
        4 => {
            let keyword = args[2].as_literal().and_then(ExprValue::as_str);
            if keyword == Some("else") {
                Ok(())
            } else {
                Err(ExprError::Malformed {
                    at: format!("{}[3]", at),
                    reason: "expected the literal \"else\"".into(),
                })
            }
        }
        actual => Err(ExprError::ArgumentCount {
            name: "if".into(),
            at: at.to_string(),
            expected: "2 or 4".into(),
            actual,
        }),
    }
}

fn instance_context(call: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    let key = arg(args, 0).as_str().unwrap_or_default();
    let value = call.ctx.sources.instance.get(key).ok_or_else(|| {
        call.fail(format!(
            "unknown instance context property '{}', expected one of {}",
            key,
            InstanceContext::KEYS.join(", ")
        ))
    })?;
    Ok(value.into())
}

fn frontend_settings(call: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    let key = arg(args, 0)
        .as_str()
        .ok_or_else(|| call.fail("setting key cannot be null"))?;
    Ok(call
        .ctx
        .sources
        .application_settings
        .get(key)
        .and_then(ExprValue::from_json)
        .unwrap_or_default())
}

fn auth_context(call: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    let key = arg(args, 0).as_str().unwrap_or_default();
    if !TaskContext::AUTH_KEYS.contains(&key) {
        return Err(call.fail(format!("unknown auth context property '{}'", key)));
    }
    let allowed = call
        .ctx
        .sources
        .process
        .current_task
        .as_ref()
        .is_some_and(|task| task.allows(key));
    Ok(ExprValue::Bool(allowed))
}

fn component(call: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    let id = arg(args, 0)
        .as_str()
        .ok_or_else(|| call.fail("cannot look up component null"))?;
    let Some(node) = call.ctx.nodes.closest(id, call.ctx.row_path, call.ctx.row_uuids) else {
        log::debug!("component '{}' not found from {}, reading as null", id, call.at);
        return Ok(ExprValue::Null);
    };
    if node.hidden {
        return Ok(ExprValue::Null);
    }
    match node.binding {
        Some(binding) => call.ctx.sources.read(&binding),
        None => Ok(ExprValue::Null),
    }
}

fn validate_data_model(args: &[Expr], at: &str) -> ExprResult<()> {
    if let Some(ExprValue::String(path)) = args.first().and_then(Expr::as_literal) {
        DataModelPath::parse(path)?;
    }
    if let Some(data_type) = args.get(1) {
        match data_type.as_literal() {
            Some(ExprValue::String(_)) | Some(ExprValue::Null) => {}
            _ => {
                return Err(ExprError::Malformed {
                    at: format!("{}[2]", at),
                    reason: "data type must be a literal string".into(),
                });
            }
        }
    }
    Ok(())
}

fn data_model(call: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    let path = arg(args, 0)
        .as_str()
        .ok_or_else(|| call.fail("cannot look up dataModel null"))?;
    let reference = call.ctx.resolve_reference(path, arg(args, 1).as_str())?;
    call.ctx.sources.read(&reference)
}

fn has_role(call: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    let held = arg(args, 0)
        .as_str()
        .is_some_and(|role| call.ctx.sources.roles.iter().any(|held| held == role));
    Ok(ExprValue::Bool(held))
}

fn contains(_: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    Ok(ExprValue::Bool(
        string_pair(args).is_some_and(|(text, needle)| text.contains(needle)),
    ))
}

fn not_contains(_: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    Ok(ExprValue::Bool(
        string_pair(args).is_none_or(|(text, needle)| !text.contains(needle)),
    ))
}

fn starts_with(_: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    Ok(ExprValue::Bool(
        string_pair(args).is_some_and(|(text, prefix)| text.starts_with(prefix)),
    ))
}

fn ends_with(_: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    Ok(ExprValue::Bool(
        string_pair(args).is_some_and(|(text, suffix)| text.ends_with(suffix)),
    ))
}

fn string_length(_: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    let length = arg(args, 0).as_str().map_or(0, |text| text.chars().count());
    Ok(ExprValue::Number(length as f64))
}

fn comma_contains(_: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    Ok(ExprValue::Bool(string_pair(args).is_some_and(|(list, needle)| {
        list.split(',').map(str::trim).any(|part| part == needle)
    })))
}

fn lower_case(_: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    Ok(arg(args, 0).as_str().map(str::to_lowercase).into())
}

fn upper_case(_: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    Ok(arg(args, 0).as_str().map(str::to_uppercase).into())
}

const MAX_DECIMALS: f64 = 100.0;

fn round(call: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    let number = arg(args, 0).as_f64().unwrap_or(0.0);
    let decimals = arg(args, 1).as_f64().unwrap_or(0.0).trunc();
    if !(0.0..=MAX_DECIMALS).contains(&decimals) {
        return Err(call.fail(format!(
            "decimal points must be between 0 and {}, got {}",
            MAX_DECIMALS, decimals
        )));
    }
    let decimals = decimals as usize;
    let factor = 10f64.powi(decimals as i32);
    let scaled = (number * factor).round() / factor;
    let rounded = if scaled.is_finite() { scaled } else { number };
    Ok(ExprValue::String(format!("{:.*}", decimals, rounded)))
}

fn language(call: &Invocation<'_, '_>, _: &[ExprValue]) -> ExprResult<ExprValue> {
    Ok(ExprValue::String(call.ctx.sources.language.clone()))
}

fn argv(call: &Invocation<'_, '_>, args: &[ExprValue]) -> ExprResult<ExprValue> {
    let positional = call.ctx.positional;
    if positional.is_empty() {
        return Err(call.fail("no positional arguments available"));
    }
    let index = arg(args, 0).as_f64();
    match index {
        Some(index) if index >= 0.0 && index.fract() == 0.0 && (index as usize) < positional.len() => {
            Ok(positional[index as usize].clone())
        }
        _ => Err(call.fail(format!(
            "index {} out of range",
            arg(args, 0).display_text()
        ))),
    }
}
