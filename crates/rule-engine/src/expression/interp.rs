use std::borrow::Cow;
use std::cmp::Ordering;

use serde_json::{Number, Value};

use super::functions;
use super::parser::{BinaryOp, Expr, LogicalOp, UnaryOp};
use super::{is_truthy, type_name, values_equal, ExprError, Scope};

/// Maximum number of nodes visited while evaluating one expression.
pub(crate) const MAX_STEPS: usize = 10_000;

/// Tree-walking evaluator. Values borrowed from the scope stay borrowed
/// through member chains so `root.a.b` never copies the data root.
pub(crate) struct Interpreter<'s, S: Scope + ?Sized> {
    scope: &'s S,
    steps: usize,
    budget: usize,
}

impl<'s, S: Scope + ?Sized> Interpreter<'s, S> {
    pub(crate) fn new(scope: &'s S) -> Self {
        Self::with_budget(scope, MAX_STEPS)
    }

    pub(crate) fn with_budget(scope: &'s S, budget: usize) -> Self {
        Self {
            scope,
            steps: 0,
            budget,
        }
    }

    pub(crate) fn eval(&mut self, expr: &Expr) -> Result<Cow<'s, Value>, ExprError> {
        self.steps += 1;
        if self.steps > self.budget {
            return Err(ExprError::BudgetExhausted { limit: self.budget });
        }

        match expr {
            Expr::Literal(value) => Ok(Cow::Owned(value.clone())),
            Expr::Ident(name) => {
                let scope: &'s S = self.scope;
                scope
                    .lookup(name)
                    .map(Cow::Borrowed)
                    .ok_or_else(|| ExprError::UnknownIdentifier { name: name.clone() })
            }
            Expr::Member { object, property } => {
                let target = self.eval(object)?;
                property_of(target, property)
            }
            Expr::Index { object, index } => {
                let target = self.eval(object)?;
                let index = self.eval(index)?;
                index_of(target, &index)
            }
            Expr::Method {
                receiver,
                name,
                args,
            } => {
                let receiver = self.eval(receiver)?;
                let args = self.eval_all(args)?;
                functions::call_method(&receiver, name, &args).map(Cow::Owned)
            }
            Expr::Function { name, args } => {
                let args = self.eval_all(args)?;
                functions::call_function(name, &args).map(Cow::Owned)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Cow::Owned(Value::Bool(!is_truthy(&value)))),
                    UnaryOp::Neg => {
                        let n = as_number(&value, "unary '-'")?;
                        number(-n).map(Cow::Owned)
                    }
                }
            }
            Expr::Logical { op, left, right } => {
                let left = is_truthy(self.eval(left)?.as_ref());
                let result = match op {
                    LogicalOp::And => left && is_truthy(self.eval(right)?.as_ref()),
                    LogicalOp::Or => left || is_truthy(self.eval(right)?.as_ref()),
                };
                Ok(Cow::Owned(Value::Bool(result)))
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if is_truthy(self.eval(test)?.as_ref()) {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                binary(*op, &left, &right).map(Cow::Owned)
            }
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Result<Vec<Cow<'s, Value>>, ExprError> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }
}

fn property_of<'v>(target: Cow<'v, Value>, key: &str) -> Result<Cow<'v, Value>, ExprError> {
    match target {
        Cow::Borrowed(Value::Object(map)) => Ok(map
            .get(key)
            .map(Cow::Borrowed)
            .unwrap_or(Cow::Owned(Value::Null))),
        Cow::Owned(Value::Object(mut map)) => {
            Ok(Cow::Owned(map.remove(key).unwrap_or(Value::Null)))
        }
        other => intrinsic_property(&other, key).map(Cow::Owned),
    }
}

/// Properties of non-object values: `length` on strings and arrays, `null`
/// for anything else. Reading from `null` is an error.
fn intrinsic_property(value: &Value, key: &str) -> Result<Value, ExprError> {
    match (value, key) {
        (Value::Null, _) => Err(ExprError::NullAccess {
            property: key.to_string(),
        }),
        (Value::String(s), "length") => Ok(Value::from(s.chars().count())),
        (Value::Array(items), "length") => Ok(Value::from(items.len())),
        _ => Ok(Value::Null),
    }
}

fn index_of<'v>(target: Cow<'v, Value>, index: &Value) -> Result<Cow<'v, Value>, ExprError> {
    match (target, index) {
        (target, Value::String(key)) => property_of(target, key),
        (Cow::Borrowed(Value::Array(items)), Value::Number(n)) => Ok(array_slot(n)
            .and_then(|i| items.get(i))
            .map(Cow::Borrowed)
            .unwrap_or(Cow::Owned(Value::Null))),
        (Cow::Owned(Value::Array(mut items)), Value::Number(n)) => Ok(Cow::Owned(
            array_slot(n)
                .filter(|i| *i < items.len())
                .map(|i| items.swap_remove(i))
                .unwrap_or(Value::Null),
        )),
        (target, _) if target.is_null() => Err(ExprError::NullAccess {
            property: index.to_string(),
        }),
        (target, index) => Err(ExprError::Type(format!(
            "cannot index {} with {}",
            type_name(&target),
            type_name(index)
        ))),
    }
}

fn array_slot(n: &Number) -> Option<usize> {
    n.as_u64().and_then(|i| usize::try_from(i).ok())
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::NotEq => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(left, right)?;
            let result = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::Add => match (left, right) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            _ => number(as_number(left, "'+'")? + as_number(right, "'+'")?),
        },
        BinaryOp::Sub => number(as_number(left, "'-'")? - as_number(right, "'-'")?),
        BinaryOp::Mul => number(as_number(left, "'*'")? * as_number(right, "'*'")?),
        BinaryOp::Div => number(as_number(left, "'/'")? / as_number(right, "'/'")?),
        BinaryOp::Rem => number(as_number(left, "'%'")? % as_number(right, "'%'")?),
    }
}

fn compare(left: &Value, right: &Value) -> Result<Ordering, ExprError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            a.zip(b)
                .and_then(|(a, b)| a.partial_cmp(&b))
                .ok_or_else(|| ExprError::Type("numbers are not comparable".to_string()))
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(ExprError::Type(format!(
            "cannot compare {} with {}",
            type_name(left),
            type_name(right)
        ))),
    }
}

fn as_number(value: &Value, op: &str) -> Result<f64, ExprError> {
    value.as_f64().ok_or_else(|| {
        ExprError::Type(format!(
            "operator {op} expects numbers, found {}",
            type_name(value)
        ))
    })
}

/// Convert an arithmetic result back to JSON, keeping whole numbers integral.
fn number(n: f64) -> Result<Value, ExprError> {
    if !n.is_finite() {
        return Err(ExprError::NonFinite);
    }
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Ok(Value::from(n as i64));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or(ExprError::NonFinite)
}
