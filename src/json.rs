use serde_json::{json, Map, Number, Value as Json};

use crate::error::{ParamGenError, Result};
use crate::tree::*;
use crate::validate::ValidationError;

// ── Writing ─────────────────────────────────────────────────────────

/// Convert a tree into a JSON value. `Node::Absent` and floats JSON cannot
/// spell (NaN, infinities) become `null`.
pub fn to_json_value(node: &Node) -> Json {
    match node {
        Node::Absent => Json::Null,
        Node::Scalar(scalar) => scalar_to_json(scalar),
        Node::Mapping(mapping) => Json::Object(
            mapping
                .iter()
                .map(|(key, child)| (key.clone(), to_json_value(child)))
                .collect::<Map<_, _>>(),
        ),
    }
}

fn scalar_to_json(scalar: &Scalar) -> Json {
    match scalar {
        Scalar::String(s) => Json::String(s.clone()),
        Scalar::Boolean(b) => Json::Bool(*b),
        Scalar::Integer(n) => Json::Number((*n).into()),
        Scalar::Float(x) => Number::from_f64(*x).map_or(Json::Null, Json::Number),
        Scalar::List(items) => Json::Array(items.iter().map(scalar_to_json).collect()),
    }
}

/// Serialize a node to a compact JSON string (no whitespace).
pub fn to_json(node: &Node) -> String {
    to_json_value(node).to_string()
}

/// Serialize a node to a pretty-printed JSON string (2-space indent).
pub fn to_json_pretty(node: &Node) -> String {
    format!("{:#}", to_json_value(node))
}

/// Serialize validation errors to a JSON array string.
pub fn validation_errors_to_json(errors: &[ValidationError]) -> String {
    let entries: Vec<Json> = errors
        .iter()
        .map(|err| {
            json!({
                "code": err.code,
                "message": err.message,
                "path": err.path,
            })
        })
        .collect();
    Json::Array(entries).to_string()
}

// ── Reading ─────────────────────────────────────────────────────────

/// Parse a JSON document into a tree. Object order is preserved.
pub fn from_json(input: &str) -> Result<Node> {
    let value: Json = serde_json::from_str(input)?;
    from_json_value(&value)
}

/// Convert a parsed JSON value into a tree.
///
/// `null` becomes `Node::Absent`. Arrays may only hold scalars.
pub fn from_json_value(value: &Json) -> Result<Node> {
    Ok(match value {
        Json::Null => Node::Absent,
        Json::Object(map) => {
            let mut mapping = Mapping::with_capacity(map.len());
            for (key, child) in map {
                mapping.insert(key.clone(), from_json_value(child)?);
            }
            Node::Mapping(mapping)
        }
        other => Node::Scalar(json_scalar(other)?),
    })
}

fn json_scalar(value: &Json) -> Result<Scalar> {
    Ok(match value {
        Json::Bool(b) => Scalar::Boolean(*b),
        Json::String(s) => Scalar::String(s.clone()),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Scalar::Integer(i),
            None => Scalar::Float(n.as_f64().ok_or_else(|| {
                ParamGenError::InvalidData(format!("number {} is out of range", n))
            })?),
        },
        Json::Array(items) => Scalar::List(items.iter().map(json_scalar).collect::<Result<_>>()?),
        Json::Null => {
            return Err(ParamGenError::InvalidData(
                "null is not allowed inside an array".to_string(),
            ))
        }
        Json::Object(_) => {
            return Err(ParamGenError::InvalidData(
                "objects are not allowed inside an array".to_string(),
            ))
        }
    })
}
