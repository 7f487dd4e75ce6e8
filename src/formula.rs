use tracing::trace;

use crate::error::{EvalError, ParamGenError, Result};
use crate::interpreter::{self, EvalLimits, Mode, Value};
use crate::parser;
use crate::tree::{Node, Scalar};

/// True if `value`, trimmed, starts with `=`.
pub fn is_formula(value: &str) -> bool {
    value.trim_start().starts_with('=')
}

/// Evaluate a formula string such as `= 3 * 5`.
///
/// The formula is first evaluated in strict mode, where `==` and `!=` also
/// require orderable operands. Any type error there, mixed comparisons
/// included, is a `ComparisonType` error. A result of `None` becomes
/// `Node::Absent`.
pub fn evaluate_formula(formula: &str, limits: &EvalLimits) -> Result<Node> {
    let body = formula.trim_start();
    let body = body.strip_prefix('=').unwrap_or(body).trim();

    let failed = |source: EvalError| ParamGenError::FormulaEvaluation {
        formula: formula.to_string(),
        source,
    };

    let expr = parser::parse(body, limits).map_err(failed)?;

    if let Err(source @ (EvalError::IncomparableTypes { .. } | EvalError::Type(_))) =
        interpreter::evaluate(&expr, limits, Mode::Strict)
    {
        return Err(ParamGenError::ComparisonType {
            formula: formula.to_string(),
            source,
        });
    }

    let value = interpreter::evaluate(&expr, limits, Mode::Normal).map_err(failed)?;
    trace!(formula, result = %value, "evaluated formula");
    value_to_node(value).map_err(failed)
}

fn value_to_node(value: Value) -> std::result::Result<Node, EvalError> {
    match value {
        Value::None => Ok(Node::Absent),
        other => value_to_scalar(other).map(Node::Scalar),
    }
}

fn value_to_scalar(value: Value) -> std::result::Result<Scalar, EvalError> {
    Ok(match value {
        Value::None => {
            return Err(EvalError::Value(
                "None cannot appear inside a list result".to_string(),
            ))
        }
        Value::Bool(b) => Scalar::Boolean(b),
        Value::Int(n) => Scalar::Integer(n),
        Value::Float(x) => Scalar::Float(x),
        Value::Str(s) => Scalar::String(s),
        Value::List(items) => Scalar::List(
            items
                .into_iter()
                .map(value_to_scalar)
                .collect::<std::result::Result<_, _>>()?,
        ),
    })
}
