//! The rule expression language.
//!
//! Directives such as `"auth != null && auth.uid == uid"` are compiled once
//! when the rule tree is loaded and evaluated per check against a [`Scope`]
//! that exposes only the names the gate chooses to bind. The language has no
//! assignment, no loops and no access to anything outside the scope; every
//! evaluation is bounded by a step budget.

mod functions;
mod interp;
mod lexer;
mod parser;

use serde_json::Value;
use thiserror::Error;

use interp::Interpreter;
pub(crate) use interp::MAX_STEPS;

pub use parser::{BinaryOp, Expr, LogicalOp, UnaryOp};

/// Longest expression source accepted by [`Expression::compile`].
pub const MAX_SOURCE_LEN: usize = 4096;

/// Errors raised while compiling or evaluating an expression.
///
/// The permission gate never surfaces these; any of them means "deny".
#[derive(Debug, Clone, Error)]
pub enum ExprError {
    #[error("expression is longer than {limit} bytes")]
    TooLong { limit: usize },

    #[error("expression has more than {limit} tokens")]
    TooManyTokens { limit: usize },

    #[error("unexpected character {ch:?} at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated string starting at offset {offset}")]
    UnterminatedString { offset: usize },

    #[error("invalid escape sequence at offset {offset}")]
    InvalidEscape { offset: usize },

    #[error("invalid number literal at offset {offset}")]
    InvalidNumber { offset: usize },

    #[error("expected {expected} at offset {offset}, found {found}")]
    Expected {
        expected: &'static str,
        found: String,
        offset: usize,
    },

    #[error("expression nests deeper than {limit} levels")]
    TooDeep { limit: usize },

    #[error("unknown function '{name}'")]
    UnknownFunction { name: String },

    #[error("unknown identifier '{name}'")]
    UnknownIdentifier { name: String },

    #[error("cannot read '{property}' of null")]
    NullAccess { property: String },

    #[error("'{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("type error: {0}")]
    Type(String),

    #[error("arithmetic produced a non-finite number")]
    NonFinite,

    #[error("invalid pattern: {0}")]
    Pattern(String),

    #[error("evaluation exceeded {limit} steps")]
    BudgetExhausted { limit: usize },

    #[error("expression evaluated to {found}, expected a boolean")]
    NotBoolean { found: &'static str },
}

/// Name resolution for a running expression. Identifiers that the scope does
/// not know are evaluation errors.
pub trait Scope {
    fn lookup(&self, name: &str) -> Option<&Value>;
}

/// A compiled rule expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    ast: Expr,
}

impl Expression {
    /// Parse `source` into an evaluable expression.
    pub fn compile(source: &str) -> Result<Self, ExprError> {
        if source.len() > MAX_SOURCE_LEN {
            return Err(ExprError::TooLong {
                limit: MAX_SOURCE_LEN,
            });
        }
        let ast = parser::parse(source)?;
        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against `scope` and return the resulting value.
    pub fn evaluate<S: Scope + ?Sized>(&self, scope: &S) -> Result<Value, ExprError> {
        Interpreter::new(scope)
            .eval(&self.ast)
            .map(|value| value.into_owned())
    }

    /// Evaluate against `scope`; anything but a boolean result is an error.
    pub fn evaluate_bool<S: Scope + ?Sized>(&self, scope: &S) -> Result<bool, ExprError> {
        self.evaluate_bool_with_budget(scope, MAX_STEPS)
    }

    pub(crate) fn evaluate_bool_with_budget<S: Scope + ?Sized>(
        &self,
        scope: &S,
        budget: usize,
    ) -> Result<bool, ExprError> {
        match Interpreter::with_budget(scope, budget).eval(&self.ast)?.as_ref() {
            Value::Bool(b) => Ok(*b),
            other => Err(ExprError::NotBoolean {
                found: type_name(other),
            }),
        }
    }
}

/// JavaScript-style truthiness: `null`, `false`, `0` and `""` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Structural equality where numbers compare by value (`2 == 2.0`).
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(k, v)| b.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => left == right,
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
