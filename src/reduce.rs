//! Recursive reduction of a guarded tree into a plain one.

use tracing::{debug, trace};

use crate::error::Result;
use crate::expand::{expand_vars, has_expandable_var, ExpandFn};
use crate::formula::{evaluate_formula, is_formula};
use crate::guard::{choose, classify_mapping, MappingKind};
use crate::interpreter::EvalLimits;
use crate::tree::{MatchPolicy, Mapping, Node, Scalar};

/// Reduce `node`: expand variables, resolve guarded mappings to a single
/// branch and evaluate formulas. A mapping whose guards all fail reduces
/// to `Node::Absent`.
pub fn reduce(
    node: Node,
    expand_fn: Option<&mut dyn ExpandFn>,
    policy: MatchPolicy,
    limits: &EvalLimits,
) -> Result<Node> {
    let mut reducer = Reducer {
        expand_fn,
        policy,
        limits,
    };
    reducer.reduce_node(node)
}

struct Reducer<'a, 'f> {
    expand_fn: Option<&'f mut dyn ExpandFn>,
    policy: MatchPolicy,
    limits: &'a EvalLimits,
}

impl<'a, 'f> Reducer<'a, 'f> {
    fn expand(&mut self, text: &str) -> Result<String> {
        expand_vars(text, self.expand_fn.as_deref_mut())
    }

    fn reduce_node(&mut self, node: Node) -> Result<Node> {
        match node {
            Node::Mapping(mapping) => self.reduce_mapping(mapping),
            Node::Scalar(Scalar::String(s)) => self.reduce_string(s),
            other => Ok(other),
        }
    }

    fn reduce_string(&mut self, s: String) -> Result<Node> {
        let expanded = if has_expandable_var(&s) {
            self.expand(&s)?
        } else {
            s
        };
        if is_formula(&expanded) {
            evaluate_formula(&expanded, self.limits)
        } else {
            Ok(Node::Scalar(Scalar::String(expanded)))
        }
    }

    fn reduce_mapping(&mut self, mapping: Mapping) -> Result<Node> {
        let mut current = self.expand_keys(mapping)?;
        loop {
            match classify_mapping(&current, self.limits)? {
                MappingKind::Guarded(kinds) => match choose(current, &kinds, self.policy) {
                    // A chosen mapping may itself be guarded.
                    Node::Mapping(inner) => current = self.expand_keys(inner)?,
                    other => return self.reduce_node(other),
                },
                MappingKind::Plain => break,
            }
        }

        let mut out = Mapping::with_capacity(current.len());
        for (key, value) in current {
            let reduced = self.reduce_node(value)?;
            if reduced.is_absent() {
                debug!(key = %key, "key reduced to absent");
            }
            out.insert(key, reduced);
        }
        Ok(Node::Mapping(out))
    }

    /// Expand variables in every key. Keys keep their position; when two
    /// keys expand to the same text the later value wins.
    fn expand_keys(&mut self, mapping: Mapping) -> Result<Mapping> {
        if !mapping.keys().any(|key| has_expandable_var(key)) {
            return Ok(mapping);
        }
        let mut out = Mapping::with_capacity(mapping.len());
        for (key, value) in mapping {
            let key = if has_expandable_var(&key) {
                let expanded = self.expand(&key)?;
                trace!(from = %key, to = %expanded, "expanded key");
                expanded
            } else {
                key
            };
            out.insert(key, value);
        }
        Ok(out)
    }
}
