use indexmap::IndexMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ParamGenError;

/// An insertion-ordered mapping from keys to nodes. Keys are unique.
pub type Mapping = IndexMap<String, Node>;

/// A concrete value in the parameter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    String(String),
    Boolean(bool),
    Integer(i64),
    Float(f64),
    /// Only produced by formula evaluation.
    List(Vec<Scalar>),
}

/// A node in the parameter tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar(Scalar),
    Mapping(Mapping),
    /// The result of a guarded mapping where no branch matched.
    Absent,
}

/// Which of several true guards wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    First,
    #[default]
    Last,
}

impl FromStr for MatchPolicy {
    type Err = ParamGenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(MatchPolicy::First),
            "last" => Ok(MatchPolicy::Last),
            _ => Err(ParamGenError::InvalidMatchPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPolicy::First => f.write_str("first"),
            MatchPolicy::Last => f.write_str("last"),
        }
    }
}

impl Node {
    pub fn mapping() -> Self {
        Node::Mapping(Mapping::new())
    }

    pub fn string(s: impl Into<String>) -> Self {
        Node::Scalar(Scalar::String(s.into()))
    }

    /// True for an empty mapping and for `Absent`.
    pub fn is_empty(&self) -> bool {
        match self {
            Node::Mapping(m) => m.is_empty(),
            Node::Absent => true,
            Node::Scalar(_) => false,
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Node::Absent)
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Node::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mapping_mut(&mut self) -> Option<&mut Mapping> {
        match self {
            Node::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Node::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Look up a direct child of a mapping node.
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_mapping().and_then(|m| m.get(key))
    }

    /// Follow a path of keys through nested mappings.
    pub fn get_path(&self, path: &[&str]) -> Option<&Node> {
        path.iter().try_fold(self, |node, key| node.get(key))
    }

    /// Serialize to compact JSON.
    pub fn to_json(&self) -> String {
        crate::json::to_json(self)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json_pretty(&self) -> String {
        crate::json::to_json_pretty(self)
    }

    /// Merge `other` into `self`. Where both sides hold a mapping under the
    /// same key the merge recurses; otherwise `other` overwrites. New keys are
    /// appended after the existing ones.
    pub fn merge(&mut self, other: Node) {
        match (self, other) {
            (Node::Mapping(dst), Node::Mapping(src)) => {
                for (key, value) in src {
                    if let Some(existing) = dst.get_mut(&key) {
                        if existing.as_mapping().is_some() && value.as_mapping().is_some() {
                            existing.merge(value);
                        } else {
                            *existing = value;
                        }
                    } else {
                        dst.insert(key, value);
                    }
                }
            }
            (dst, src) => *dst = src,
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::mapping()
    }
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Renders the way the value would read back as an expression result:
/// `True`, `3.0`, `[0, 1, 2]`. Strings are written raw at the top level and
/// quoted inside lists.
impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::String(s) => f.write_str(s),
            Scalar::Boolean(true) => f.write_str("True"),
            Scalar::Boolean(false) => f.write_str("False"),
            Scalar::Integer(n) => write!(f, "{}", n),
            Scalar::Float(x) => f.write_str(&format_float(*x)),
            Scalar::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match item {
                        Scalar::String(s) => write!(f, "'{}'", s.replace('\'', "\\'"))?,
                        other => write!(f, "{}", other)?,
                    }
                }
                f.write_str("]")
            }
        }
    }
}

/// Format a float the way Python's `repr` does, so the text always reads
/// back as a float: `3.0`, `0.001`, `1e+20`, `1.5e-05`.
pub fn format_float(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        let s = if x > 0.0 { "inf" } else { "-inf" };
        return s.to_string();
    }
    // `{:e}` gives the shortest round-trip digits with a bare exponent
    let scientific = format!("{:e}", x);
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    if (-4..16).contains(&exponent) {
        let fixed = format!("{}", x);
        if fixed.contains('.') {
            fixed
        } else {
            format!("{}.0", fixed)
        }
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", mantissa, sign, exponent.abs())
    }
}

impl From<Scalar> for Node {
    fn from(s: Scalar) -> Self {
        Node::Scalar(s)
    }
}

impl From<Mapping> for Node {
    fn from(m: Mapping) -> Self {
        Node::Mapping(m)
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::string(s)
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::string(s)
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::Scalar(Scalar::Boolean(b))
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Node::Scalar(Scalar::Integer(n))
    }
}

impl From<f64> for Node {
    fn from(x: f64) -> Self {
        Node::Scalar(Scalar::Float(x))
    }
}

impl<K: Into<String>, V: Into<Node>> FromIterator<(K, V)> for Node {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Node::Mapping(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
