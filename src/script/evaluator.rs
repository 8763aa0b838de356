//! Expression evaluation for bundle scripts

use serde_json::Value;

use crate::error::{HostError, Result};
use crate::parser::{parse_expression, Expr, Operand};
use crate::sandbox::{CompiledFunction, DynamicEval, ScopeProxy};

/// Evaluate an expression, resolving identifiers with `lookup`
pub fn eval_expr<F>(expr: &Expr, lookup: F) -> Value
where
    F: Fn(&str) -> Option<Value>,
{
    let mut operands = expr.operands.iter().map(|op| match op {
        Operand::Literal(v) => v.clone(),
        Operand::Ident(name) => lookup(name).unwrap_or(Value::Null),
    });

    let first = operands.next().unwrap_or(Value::Null);
    operands.fold(first, add)
}

/// `+`: numeric addition when both sides are numbers, concatenation otherwise
fn add(left: Value, right: Value) -> Value {
    match (&left, &right) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
                if let Some(sum) = x.checked_add(y) {
                    return Value::from(sum);
                }
            }
            let sum = a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0);
            serde_json::Number::from_f64(sum)
                .map(Value::Number)
                .unwrap_or(Value::Null)
        }
        _ => Value::String(format!("{}{}", to_text(&left), to_text(&right))),
    }
}

/// Text form used for concatenation and rendering; strings are not quoted
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Dynamic evaluation over bundle-script expressions.
///
/// `evaluate` reads globals through the sandbox proxy. Functions resolve
/// parameters first and fall back to the proxy at call time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExprEvaluator;

impl DynamicEval for ExprEvaluator {
    fn evaluate(&self, scope: &ScopeProxy, source: &str) -> Result<Value> {
        let expr = parse_expression(source).map_err(|e| HostError::Eval(e.to_string()))?;
        Ok(eval_expr(&expr, |name| scope.get(name)))
    }

    fn construct_function(
        &self,
        scope: &ScopeProxy,
        params: &[String],
        body: &str,
    ) -> Result<CompiledFunction> {
        if let Some(bad) = params.iter().find(|p| !is_identifier(p)) {
            return Err(HostError::Eval(format!("Invalid parameter name: '{}'", bad)));
        }

        let expr = parse_expression(body).map_err(|e| HostError::Eval(e.to_string()))?;
        let params = params.to_vec();
        let scope = scope.clone();
        let source = format!("({}) => {}", params.join(", "), body);

        Ok(CompiledFunction::new(source, move |args: &[Value]| {
            Ok(eval_expr(&expr, |name| match params.iter().position(|p| p == name) {
                Some(i) => Some(args.get(i).cloned().unwrap_or(Value::Null)),
                None => scope.get(name),
            }))
        }))
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
