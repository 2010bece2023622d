//! The fixed allow-list of pure functions callable from rule expressions.
//!
//! Methods are called on a receiver (`auth.email.endsWith('@x.io')`), global
//! functions by name (`exists(data)`). Names outside these lists are rejected
//! when the expression is compiled.

use std::borrow::Cow;

use regex::RegexBuilder;
use serde_json::Value;

use super::{type_name, ExprError};

/// Compiled-program size cap for patterns passed to `matches()`.
const REGEX_SIZE_LIMIT: usize = 1 << 16;

const METHODS: &[&str] = &[
    "startsWith",
    "endsWith",
    "includes",
    "contains",
    "matches",
    "toLowerCase",
    "toUpperCase",
    "trim",
    "hasChild",
    "hasChildren",
];

const FUNCTIONS: &[&str] = &[
    "exists",
    "isString",
    "isNumber",
    "isBoolean",
    "isObject",
    "isArray",
];

pub(crate) fn is_method(name: &str) -> bool {
    METHODS.contains(&name)
}

pub(crate) fn is_function(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

pub(crate) fn call_method(
    receiver: &Value,
    name: &str,
    args: &[Cow<'_, Value>],
) -> Result<Value, ExprError> {
    match (receiver, name) {
        (Value::Null, _) => Err(ExprError::NullAccess {
            property: name.to_string(),
        }),
        (Value::String(s), "startsWith") => {
            let [prefix] = string_args::<1>(name, args)?;
            Ok(Value::Bool(s.starts_with(prefix)))
        }
        (Value::String(s), "endsWith") => {
            let [suffix] = string_args::<1>(name, args)?;
            Ok(Value::Bool(s.ends_with(suffix)))
        }
        (Value::String(s), "includes" | "contains") => {
            let [needle] = string_args::<1>(name, args)?;
            Ok(Value::Bool(s.contains(needle)))
        }
        (Value::String(s), "matches") => {
            let [pattern] = string_args::<1>(name, args)?;
            let re = RegexBuilder::new(pattern)
                .size_limit(REGEX_SIZE_LIMIT)
                .build()
                .map_err(|e| ExprError::Pattern(e.to_string()))?;
            Ok(Value::Bool(re.is_match(s)))
        }
        (Value::String(s), "toLowerCase") => {
            arity(name, args, 0)?;
            Ok(Value::String(s.to_lowercase()))
        }
        (Value::String(s), "toUpperCase") => {
            arity(name, args, 0)?;
            Ok(Value::String(s.to_uppercase()))
        }
        (Value::String(s), "trim") => {
            arity(name, args, 0)?;
            Ok(Value::String(s.trim().to_string()))
        }
        (Value::Array(items), "includes" | "contains") => {
            arity(name, args, 1)?;
            let needle = args[0].as_ref();
            Ok(Value::Bool(
                items.iter().any(|item| super::values_equal(item, needle)),
            ))
        }
        (Value::Object(map), "hasChild") => {
            let [key] = string_args::<1>(name, args)?;
            Ok(Value::Bool(has_child(map.get(key))))
        }
        (Value::Object(map), "hasChildren") => {
            arity(name, args, 1)?;
            let Value::Array(keys) = args[0].as_ref() else {
                return Err(ExprError::Type(format!(
                    "hasChildren() expects a list of keys, found {}",
                    type_name(&args[0])
                )));
            };
            let mut all = true;
            for key in keys {
                let Value::String(key) = key else {
                    return Err(ExprError::Type(format!(
                        "hasChildren() keys must be strings, found {}",
                        type_name(key)
                    )));
                };
                all &= has_child(map.get(key));
            }
            Ok(Value::Bool(all))
        }
        (other, _) => Err(ExprError::Type(format!(
            "{} has no method '{name}'",
            type_name(other)
        ))),
    }
}

pub(crate) fn call_function(name: &str, args: &[Cow<'_, Value>]) -> Result<Value, ExprError> {
    arity(name, args, 1)?;
    let value = args[0].as_ref();
    let result = match name {
        "exists" => !value.is_null(),
        "isString" => value.is_string(),
        "isNumber" => value.is_number(),
        "isBoolean" => value.is_boolean(),
        "isObject" => value.is_object(),
        "isArray" => value.is_array(),
        _ => {
            return Err(ExprError::UnknownFunction {
                name: name.to_string(),
            })
        }
    };
    Ok(Value::Bool(result))
}

fn has_child(child: Option<&Value>) -> bool {
    child.is_some_and(|v| !v.is_null())
}

fn arity(name: &str, args: &[Cow<'_, Value>], expected: usize) -> Result<(), ExprError> {
    if args.len() != expected {
        return Err(ExprError::Arity {
            name: name.to_string(),
            expected,
            got: args.len(),
        });
    }
    Ok(())
}

fn string_args<'v, const N: usize>(
    name: &str,
    args: &'v [Cow<'_, Value>],
) -> Result<[&'v str; N], ExprError> {
    arity(name, args, N)?;
    let mut out = [""; N];
    for (slot, arg) in out.iter_mut().zip(args) {
        *slot = arg.as_str().ok_or_else(|| {
            ExprError::Type(format!(
                "{name}() expects a string argument, found {}",
                type_name(arg)
            ))
        })?;
    }
    Ok(out)
}
