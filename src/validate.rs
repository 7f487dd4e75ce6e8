use crate::error::ParamGenError;
use crate::expand::has_expandable_var;
use crate::formula::is_formula;
use crate::guard::classify_mapping;
use crate::interpreter::EvalLimits;
use crate::parser;
use crate::tree::*;

/// A problem found by static inspection of an unreduced tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub message: String,
    /// Path in the tree where the error was found (e.g. ["mom", "grid"]).
    pub path: Vec<String>,
    /// Machine-readable error code.
    pub code: &'static str,
}

/// Check a tree for problems that would make reduction fail regardless
/// of variable values.
///
/// Mappings and formulas that still contain variable tokens are skipped,
/// since their meaning depends on expansion. Returns an empty vec when
/// nothing was found.
pub fn validate_guards(root: &Node) -> Vec<ValidationError> {
    validate_guards_with(root, &EvalLimits::default())
}

/// Like [`validate_guards`], with explicit evaluation limits.
pub fn validate_guards_with(root: &Node, limits: &EvalLimits) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut path: Vec<String> = Vec::new();
    walk(root, &mut path, limits, &mut errors);
    errors
}

fn walk(node: &Node, path: &mut Vec<String>, limits: &EvalLimits, errors: &mut Vec<ValidationError>) {
    match node {
        Node::Mapping(mapping) => {
            if !mapping.keys().any(|k| has_expandable_var(k)) {
                check_mapping(mapping, path, limits, errors);
            }
            for (key, child) in mapping {
                path.push(key.clone());
                walk(child, path, limits, errors);
                path.pop();
            }
        }
        Node::Scalar(Scalar::String(s)) if is_formula(s) && !has_expandable_var(s) => {
            let body = s.trim_start();
            let body = body.strip_prefix('=').unwrap_or(body).trim();
            if let Err(e) = parser::parse(body, limits) {
                errors.push(ValidationError {
                    message: format!("formula {:?} does not parse: {}", s, e),
                    path: path.clone(),
                    code: "formula-syntax",
                });
            }
        }
        _ => {}
    }
}

fn check_mapping(
    mapping: &Mapping,
    path: &[String],
    limits: &EvalLimits,
    errors: &mut Vec<ValidationError>,
) {
    if let Err(err) = classify_mapping(mapping, limits) {
        let code = match &err {
            ParamGenError::AmbiguousGuardMix { .. } => "ambiguous-guard-mix",
            _ => "guard-evaluation",
        };
        errors.push(ValidationError {
            message: err.to_string(),
            path: path.to_vec(),
            code,
        });
    }
}
