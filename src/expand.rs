//! Substitution of `$NAME` / `${NAME}` tokens.
//!
//! A bare `$NAME` inserts the value as an atomic expression literal, so a
//! string result is double-quoted. The brace form `${NAME}` inserts string
//! results verbatim, which lets a variable supply a piece of expression
//! text or a path fragment. Booleans and numbers render the same either
//! way (`True`, `3.1415`).

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;
use tracing::trace;

use crate::error::{ParamGenError, Result};
use crate::tree::format_float;

/// What an expand function can resolve a variable to.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpandValue {
    String(String),
    Boolean(bool),
    Integer(i64),
    Float(f64),
}

impl ExpandValue {
    /// Text substituted for a token. `quoted` is true for bare `$NAME`.
    fn render(&self, quoted: bool) -> String {
        match self {
            ExpandValue::String(s) if quoted => quote(s),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for ExpandValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpandValue::String(s) => f.write_str(s),
            ExpandValue::Boolean(true) => f.write_str("True"),
            ExpandValue::Boolean(false) => f.write_str("False"),
            ExpandValue::Integer(n) => write!(f, "{}", n),
            ExpandValue::Float(x) => f.write_str(&format_float(*x)),
        }
    }
}

impl From<&str> for ExpandValue {
    fn from(s: &str) -> Self {
        ExpandValue::String(s.to_string())
    }
}

impl From<String> for ExpandValue {
    fn from(s: String) -> Self {
        ExpandValue::String(s)
    }
}

impl From<bool> for ExpandValue {
    fn from(b: bool) -> Self {
        ExpandValue::Boolean(b)
    }
}

impl From<i64> for ExpandValue {
    fn from(n: i64) -> Self {
        ExpandValue::Integer(n)
    }
}

impl From<f64> for ExpandValue {
    fn from(x: f64) -> Self {
        ExpandValue::Float(x)
    }
}

/// Resolves a variable name, or returns `None` when it is undefined.
pub trait ExpandFn {
    fn expand(&mut self, name: &str) -> Option<ExpandValue>;
}

impl<F> ExpandFn for F
where
    F: FnMut(&str) -> Option<ExpandValue>,
{
    fn expand(&mut self, name: &str) -> Option<ExpandValue> {
        self(name)
    }
}

/// Build an expand function backed by a map of values.
pub fn from_map(vars: &HashMap<String, ExpandValue>) -> impl FnMut(&str) -> Option<ExpandValue> + '_ {
    move |name| vars.get(name).cloned()
}

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{(\w+)\}|\$(\w+)").expect("variable pattern is valid"))
}

/// True if `expr` still contains a `$NAME` or `${NAME}` token.
pub fn has_expandable_var(expr: &str) -> bool {
    var_pattern().is_match(expr)
}

/// Names of every variable token in `expr`, in order of first appearance.
pub fn expandable_vars(expr: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for caps in var_pattern().captures_iter(expr) {
        let name = token_name(&caps).to_string();
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

/// Replace every variable token in `expr`. Without an expand function the
/// input is returned unchanged.
pub fn expand_vars(expr: &str, expand_fn: Option<&mut (dyn ExpandFn + '_)>) -> Result<String> {
    let expand_fn = match expand_fn {
        Some(f) => f,
        None => return Ok(expr.to_string()),
    };

    let mut out = String::with_capacity(expr.len());
    let mut last = 0;
    for caps in var_pattern().captures_iter(expr) {
        let whole = caps.get(0).map_or(0..0, |m| m.range());
        let name = token_name(&caps);
        let braced = caps.get(1).is_some();
        let value = expand_fn
            .expand(name)
            .ok_or_else(|| ParamGenError::UndefinedVariable {
                name: name.to_string(),
                expr: expr.to_string(),
            })?;
        trace!(variable = name, value = %value, "expanded variable");
        out.push_str(&expr[last..whole.start]);
        out.push_str(&value.render(!braced));
        last = whole.end;
    }
    out.push_str(&expr[last..]);
    Ok(out)
}

fn token_name<'h>(caps: &Captures<'h>) -> &'h str {
    caps.get(1)
        .or_else(|| caps.get(2))
        .map_or("", |m| m.as_str())
}

/// Double-quote a string as an expression literal.
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
