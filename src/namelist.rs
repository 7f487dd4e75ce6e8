//! Fortran namelist text.
//!
//! A namelist tree has two levels: groups, then variables, each variable
//! being a mapping with a `values` entry holding the raw value text.
//!
//! ```text
//! &ocean_nml
//!     dt = 3600
//!     grid = 'tx0.66v1'
//! /
//! ```

use regex::Regex;
use std::fmt::Write;
use std::sync::OnceLock;

use crate::error::{ParamGenError, Result};
use crate::tree::*;

/// Group that collects variables assigned outside any `&group ... /` block.
pub const NO_GROUP: &str = "no_group";

const VALUES: &str = "values";

/// Render a reduced tree as namelist text.
///
/// Variables that reduced to `Node::Absent`, or whose `values` entry is
/// absent, are left out.
pub fn write(root: &Node) -> Result<String> {
    let groups = root
        .as_mapping()
        .ok_or_else(|| invalid("the top level must be a mapping of groups"))?;

    let mut out = String::new();
    for (group, vars) in groups {
        let vars = vars
            .as_mapping()
            .ok_or_else(|| invalid(format!("group {:?} is not a mapping", group)))?;
        let _ = writeln!(out, "&{}", group);
        for (name, var) in vars {
            let value = match var {
                Node::Absent => continue,
                Node::Mapping(entry) => match entry.get(VALUES) {
                    None | Some(Node::Absent) => continue,
                    Some(Node::Scalar(value)) => value,
                    Some(Node::Mapping(_)) => {
                        return Err(invalid(format!(
                            "values of {}.{} must be a scalar",
                            group, name
                        )))
                    }
                },
                Node::Scalar(_) => {
                    return Err(invalid(format!(
                        "variable {}.{} must be a mapping with a \"values\" entry",
                        group, name
                    )))
                }
            };
            let _ = writeln!(out, "    {} = {}", name, value.to_string().trim());
        }
        out.push_str("/\n\n");
    }
    Ok(out)
}

fn invalid(message: impl Into<String>) -> ParamGenError {
    ParamGenError::InvalidData(message.into())
}

fn group_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^&(\w*)\s*$").expect("group pattern is valid"))
}

fn assign_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\w*)\s*=\s*(\S.*)$").expect("assignment pattern is valid"))
}

/// Parse namelist text into a tree of groups and variables.
///
/// Values are kept as raw text. A value ending in `,` may continue on the
/// following lines, which are joined with newlines. Empty groups are
/// dropped.
pub fn parse(input: &str) -> Result<Node> {
    let mut groups = Mapping::new();
    groups.insert(NO_GROUP.to_string(), Node::mapping());

    let mut group: Option<String> = None;
    // The variable a continuation line would extend.
    let mut continuing: Option<(String, String)> = None;

    for (index, raw) in input.lines().enumerate() {
        let line_no = index + 1;
        let fail = |message: String| ParamGenError::Namelist {
            line: line_no,
            message,
        };

        let line = strip_comment(raw.trim()).trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('&') {
            let caps = group_pattern()
                .captures(line)
                .ok_or_else(|| fail(format!("unsupported group syntax: {}", line)))?;
            if let Some(open) = &group {
                return Err(fail(format!("group start inside group {:?}", open)));
            }
            let name = caps[1].to_string();
            groups.entry(name.clone()).or_insert_with(Node::mapping);
            group = Some(name);
            continuing = None;
            continue;
        }

        let (body, closes) = match line.strip_suffix('/') {
            Some(rest) => (rest.trim(), true),
            None => (line, false),
        };

        if !body.is_empty() {
            let group_name = group.clone().unwrap_or_else(|| NO_GROUP.to_string());
            if let Some(caps) = assign_pattern().captures(body) {
                let (name, value) = (caps[1].to_string(), caps[2].trim().to_string());
                if value.contains('=') {
                    return Err(fail(format!("unsupported assignment syntax: {}", body)));
                }
                set_value(&mut groups, &group_name, &name, Node::string(value.clone()));
                continuing = value.ends_with(',').then(|| (group_name, name));
            } else {
                let (group_name, name) = continuing
                    .clone()
                    .ok_or_else(|| fail(format!("unsupported syntax: {}", body)))?;
                append_value(&mut groups, &group_name, &name, body);
                if !body.ends_with(',') {
                    continuing = None;
                }
            }
        }

        if closes {
            if group.is_none() {
                return Err(fail("group end outside of any group".to_string()));
            }
            group = None;
            continuing = None;
        }
    }

    groups.retain(|_, vars| !vars.is_empty());
    Ok(Node::Mapping(groups))
}

fn set_value(groups: &mut Mapping, group: &str, name: &str, value: Node) {
    if let Some(vars) = groups.get_mut(group).and_then(Node::as_mapping_mut) {
        let mut entry = Mapping::new();
        entry.insert(VALUES.to_string(), value);
        vars.insert(name.to_string(), Node::Mapping(entry));
    }
}

fn append_value(groups: &mut Mapping, group: &str, name: &str, line: &str) {
    let current = groups
        .get_mut(group)
        .and_then(Node::as_mapping_mut)
        .and_then(|vars| vars.get_mut(name))
        .and_then(Node::as_mapping_mut)
        .and_then(|entry| entry.get_mut(VALUES));
    if let Some(Node::Scalar(Scalar::String(text))) = current {
        text.push('\n');
        text.push_str(line);
    }
}

/// Drop a trailing `!` comment, ignoring `!` inside quoted strings.
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    for (i, ch) in line.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '\'' | '"') => quote = Some(ch),
            (None, '!') => return &line[..i],
            (None, _) => {}
        }
    }
    line
}
