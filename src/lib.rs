pub mod ast;
pub mod error;
pub mod expand;
pub mod formula;
pub mod guard;
pub mod interpreter;
pub mod json;
pub mod namelist;
pub mod parser;
pub mod reduce;
pub mod tree;
pub mod validate;

use tracing::debug;

pub use error::{EvalError, ParamGenError, Result};
pub use expand::{ExpandFn, ExpandValue};
pub use interpreter::EvalLimits;
pub use tree::{MatchPolicy, Mapping, Node, Scalar};
pub use validate::ValidationError;

// ── Parameter set ───────────────────────────────────────────────────

/// A configuration tree together with its reduction lifecycle.
///
/// The tree given at construction is kept as `original`; `data` is the
/// working copy that `reduce` and `append` change and `reset` restores.
#[derive(Debug, Clone)]
pub struct ParamGen {
    original: Node,
    data: Node,
    match_policy: MatchPolicy,
    limits: EvalLimits,
    reduced: bool,
}

impl ParamGen {
    /// Wrap a tree. The root must be a non-empty mapping.
    pub fn new(tree: Node) -> Result<Self> {
        match &tree {
            Node::Mapping(m) if m.is_empty() => return Err(ParamGenError::EmptyInput("construct")),
            Node::Mapping(_) => {}
            _ => {
                return Err(ParamGenError::InvalidData(
                    "the root of a parameter tree must be a mapping".to_string(),
                ))
            }
        }
        Ok(ParamGen {
            data: tree.clone(),
            original: tree,
            match_policy: MatchPolicy::default(),
            limits: EvalLimits::default(),
            reduced: false,
        })
    }

    /// Build from a JSON document whose top level is an object.
    pub fn from_json(input: &str) -> Result<Self> {
        ParamGen::new(json::from_json(input)?)
    }

    pub fn from_json_value(value: &serde_json::Value) -> Result<Self> {
        ParamGen::new(json::from_json_value(value)?)
    }

    /// Parse namelist text; see [`namelist::parse`].
    pub fn from_nml(input: &str) -> Result<Self> {
        ParamGen::new(namelist::parse(input)?)
    }

    pub fn with_match(mut self, policy: MatchPolicy) -> Self {
        self.match_policy = policy;
        self
    }

    pub fn with_limits(mut self, limits: EvalLimits) -> Self {
        self.limits = limits;
        self
    }

    /// The working tree.
    pub fn data(&self) -> &Node {
        &self.data
    }

    /// The tree as constructed.
    pub fn original(&self) -> &Node {
        &self.original
    }

    pub fn match_policy(&self) -> MatchPolicy {
        self.match_policy
    }

    pub fn limits(&self) -> &EvalLimits {
        &self.limits
    }

    pub fn reduced(&self) -> bool {
        self.reduced
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Reduce the working tree, resolving variables through `expand_fn`.
    pub fn reduce<F: ExpandFn>(&mut self, mut expand_fn: F) -> Result<()> {
        self.reduce_with(Some(&mut expand_fn))
    }

    /// Reduce the working tree. Without an expand function variable tokens
    /// are left as written, so only variable-free guards can be resolved.
    ///
    /// On error the working tree is left unchanged and the instance stays
    /// unreduced.
    pub fn reduce_with(&mut self, expand_fn: Option<&mut dyn ExpandFn>) -> Result<()> {
        if self.reduced {
            return Err(ParamGenError::AlreadyReduced);
        }
        if self.is_empty() {
            return Err(ParamGenError::EmptyInput("reduce"));
        }
        debug!(policy = %self.match_policy, "reducing parameter tree");
        self.data = reduce::reduce(self.data.clone(), expand_fn, self.match_policy, &self.limits)?;
        self.reduced = true;
        Ok(())
    }

    /// Merge another parameter set's working tree into this one. Nested
    /// mappings merge key by key; anything else is overwritten.
    pub fn append(&mut self, other: &ParamGen) -> Result<()> {
        if self.reduced != other.reduced {
            return Err(ParamGenError::LifecycleMismatch {
                this_reduced: self.reduced,
                other_reduced: other.reduced,
            });
        }
        debug!(reduced = self.reduced, "appending parameter tree");
        self.data.merge(other.data.clone());
        Ok(())
    }

    /// Restore the working tree to the tree given at construction.
    pub fn reset(&mut self) {
        debug!("resetting parameter tree");
        self.data = self.original.clone();
        self.reduced = false;
    }

    /// Render the reduced tree as Fortran namelist text.
    pub fn write_nml(&self) -> Result<String> {
        if !self.reduced {
            return Err(ParamGenError::NotReduced);
        }
        namelist::write(&self.data)
    }

    /// Statically check the working tree; see [`validate::validate_guards`].
    pub fn validate(&self) -> Vec<ValidationError> {
        validate::validate_guards_with(&self.data, &self.limits)
    }
}

#[cfg(test)]
mod tests;
