//! Guard keys and branch selection.
//!
//! Every key of a mapping is tagged once, after variable expansion, as a
//! plain field name, an `else` key or a guard expression. A mapping is
//! guarded when all its keys are guards (an `else` counts as a guard) and
//! plain when none are; anything in between is rejected.

use tracing::debug;

use crate::error::{EvalError, ParamGenError, Result};
use crate::expand::has_expandable_var;
use crate::interpreter::{self, EvalLimits, Mode, Value};
use crate::parser;
use crate::tree::{MatchPolicy, Mapping, Node};

/// What a mapping key turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Plain,
    Else,
    /// A guard expression and what it evaluated to.
    Guard(bool),
}

/// The classification of a whole mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingKind {
    Plain,
    /// One `KeyKind` per key, in key order.
    Guarded(Vec<KeyKind>),
}

fn is_else(key: &str) -> bool {
    key.trim() == "else"
}

/// Tag a single key. Text that does not parse, or that refers to names
/// the expression language does not know, is a plain key. Any other
/// evaluation failure is reported.
pub fn classify_key(key: &str, limits: &EvalLimits) -> Result<KeyKind> {
    if is_else(key) {
        return Ok(KeyKind::Else);
    }
    let evaluated = parser::parse(key, limits)
        .and_then(|expr| interpreter::evaluate(&expr, limits, Mode::Normal));
    match evaluated {
        Ok(Value::Bool(b)) => Ok(KeyKind::Guard(b)),
        Ok(_) => Ok(KeyKind::Plain),
        Err(e) if e.is_not_an_expression() => Ok(KeyKind::Plain),
        Err(source) => Err(ParamGenError::GuardEvaluation {
            guard: key.to_string(),
            source,
        }),
    }
}

/// True if `key` is `else` or an expression evaluating to a boolean.
pub fn is_guard_expression(key: &str, limits: &EvalLimits) -> Result<bool> {
    Ok(classify_key(key, limits)? != KeyKind::Plain)
}

/// Classify every key of `mapping`. Empty mappings are plain.
pub fn classify_mapping(mapping: &Mapping, limits: &EvalLimits) -> Result<MappingKind> {
    if mapping.is_empty() {
        return Ok(MappingKind::Plain);
    }
    let kinds = mapping
        .keys()
        .map(|key| classify_key(key, limits))
        .collect::<Result<Vec<_>>>()?;

    let guard_count = kinds.iter().filter(|k| **k != KeyKind::Plain).count();
    if guard_count == kinds.len() {
        Ok(MappingKind::Guarded(kinds))
    } else if guard_count == 0 {
        Ok(MappingKind::Plain)
    } else {
        let (guards, plain): (Vec<_>, Vec<_>) = mapping
            .keys()
            .zip(&kinds)
            .partition(|(_, kind)| **kind != KeyKind::Plain);
        Err(ParamGenError::AmbiguousGuardMix {
            guards: guards.into_iter().map(|(k, _)| k.clone()).collect(),
            plain: plain.into_iter().map(|(k, _)| k.clone()).collect(),
        })
    }
}

/// True if every key of `mapping` is a guard.
pub fn is_guarded(mapping: &Mapping, limits: &EvalLimits) -> Result<bool> {
    Ok(matches!(classify_mapping(mapping, limits)?, MappingKind::Guarded(_)))
}

/// Evaluate one guard. Its variables must already be expanded.
pub fn evaluate_guard(key: &str, limits: &EvalLimits) -> Result<bool> {
    if has_expandable_var(key) {
        return Err(ParamGenError::UnexpandedVariable {
            guard: key.to_string(),
        });
    }
    if is_else(key) {
        return Ok(true);
    }
    let wrap = |source: EvalError| ParamGenError::GuardEvaluation {
        guard: key.to_string(),
        source,
    };
    match interpreter::eval_str(key, limits, Mode::Normal).map_err(wrap)? {
        Value::Bool(b) => Ok(b),
        other => Err(ParamGenError::NonBooleanGuard {
            guard: key.to_string(),
            value: other.repr(),
        }),
    }
}

/// Evaluate every guard of `mapping` and return the winning branch, or
/// `Node::Absent` when nothing matched.
pub fn select_branch(mapping: Mapping, policy: MatchPolicy, limits: &EvalLimits) -> Result<Node> {
    let kinds = mapping
        .keys()
        .map(|key| {
            if is_else(key) {
                Ok(KeyKind::Else)
            } else {
                evaluate_guard(key, limits).map(KeyKind::Guard)
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(choose(mapping, &kinds, policy))
}

/// Pick a branch given already-evaluated keys. An explicit true guard
/// always beats `else`.
pub(crate) fn choose(mapping: Mapping, kinds: &[KeyKind], policy: MatchPolicy) -> Node {
    let matching: Vec<usize> = kinds
        .iter()
        .enumerate()
        .filter(|(_, kind)| **kind == KeyKind::Guard(true))
        .map(|(i, _)| i)
        .collect();
    let candidates = if matching.is_empty() {
        kinds
            .iter()
            .enumerate()
            .filter(|(_, kind)| **kind == KeyKind::Else)
            .map(|(i, _)| i)
            .collect()
    } else {
        matching
    };

    let picked = match policy {
        MatchPolicy::First => candidates.first(),
        MatchPolicy::Last => candidates.last(),
    };
    match picked {
        Some(&index) => {
            let (key, value) = match mapping.into_iter().nth(index) {
                Some(entry) => entry,
                None => return Node::Absent,
            };
            debug!(guard = %key, %policy, "selected guarded branch");
            value
        }
        None => {
            debug!(guards = ?mapping.keys().collect::<Vec<_>>(), "no guard matched");
            Node::Absent
        }
    }
}
