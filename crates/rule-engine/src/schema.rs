use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::expression::{type_name, Expression};

/// Key holding the read directive of a node.
pub const READ_KEY: &str = ".read";
/// Key holding the write directive of a node.
pub const WRITE_KEY: &str = ".write";
/// Prefix marking a key as a wildcard that matches any single segment.
pub const WILDCARD_SIGIL: char = '$';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Read,
    Write,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
        }
    }

    /// The reserved node key carrying this permission's directive.
    pub fn directive_key(&self) -> &'static str {
        match self {
            Permission::Read => READ_KEY,
            Permission::Write => WRITE_KEY,
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            other => Err(format!("unknown permission '{other}'; expected read or write")),
        }
    }
}

/// The value attached to `.read` or `.write` at a node.
#[derive(Debug, Clone)]
pub enum Directive {
    Bool(bool),
    Expression(Arc<Expression>),
    /// A value that is neither a boolean nor a compilable expression.
    /// It always denies.
    Malformed { source: Option<String>, reason: String },
}

impl Directive {
    pub fn kind(&self) -> &'static str {
        match self {
            Directive::Bool(_) => "boolean",
            Directive::Expression(_) => "expression",
            Directive::Malformed { .. } => "malformed",
        }
    }
}

impl PartialEq for Directive {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Directive::Bool(a), Directive::Bool(b)) => a == b,
            (Directive::Expression(a), Directive::Expression(b)) => a.source() == b.source(),
            (
                Directive::Malformed { source: a, .. },
                Directive::Malformed { source: b, .. },
            ) => a == b,
            _ => false,
        }
    }
}

/// One level of the rule hierarchy.
///
/// Only object-valued children are kept; anything else under a segment key
/// can never be descended into and is reported as a [`ConfigIssue`].
#[derive(Debug, Clone, Default)]
pub struct RuleNode {
    read: Option<Directive>,
    write: Option<Directive>,
    children: HashMap<String, RuleNode>,
    /// Every wildcard key in declaration order, sigil included.
    wildcards: Vec<String>,
}

impl RuleNode {
    /// The directive this node sets explicitly for `permission`, if any.
    pub fn directive(&self, permission: Permission) -> Option<&Directive> {
        match permission {
            Permission::Read => self.read.as_ref(),
            Permission::Write => self.write.as_ref(),
        }
    }

    /// Literal child whose key equals `segment` exactly.
    pub fn child(&self, segment: &str) -> Option<&RuleNode> {
        self.children.get(segment)
    }

    /// The active wildcard: the last declared one. Returns its binding name
    /// (sigil stripped) and its node, which is `None` when the wildcard's
    /// value is not an object.
    pub fn wildcard(&self) -> Option<(&str, Option<&RuleNode>)> {
        let key = self.wildcards.last()?;
        let name = &key[WILDCARD_SIGIL.len_utf8()..];
        Some((name, self.children.get(key)))
    }

    pub fn wildcard_keys(&self) -> &[String] {
        &self.wildcards
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_none()
            && self.write.is_none()
            && self.children.is_empty()
            && self.wildcards.is_empty()
    }
}

/// The immutable rule hierarchy.
#[derive(Debug, Clone, Default)]
pub struct RuleTree {
    root: RuleNode,
}

impl RuleTree {
    pub fn root(&self) -> &RuleNode {
        &self.root
    }

    /// Build a tree from a JSON object, collecting configuration issues.
    ///
    /// Object key order is declaration order, which decides wildcard
    /// precedence.
    pub fn compile(map: &Map<String, Value>) -> (Self, Vec<ConfigIssue>) {
        let mut issues = Vec::new();
        let mut path = Vec::new();
        let root = compile_node(map, &mut path, &mut issues);
        (Self { root }, issues)
    }
}

/// Top-level security setting.
#[derive(Debug, Clone, Default)]
pub enum SecurityConfig {
    /// Authorization is off; every check succeeds.
    #[default]
    Disabled,
    /// Checks walk this tree. The bare value `true` compiles to an empty
    /// tree, which denies everything.
    Rules(RuleTree),
}

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("security config must be a boolean or an object, found {found}")]
    UnsupportedRoot { found: &'static str },
}

impl SecurityConfig {
    /// Compile a configuration value.
    ///
    /// `false`, `null`, `0` and `""` disable security. `true` enables it
    /// with no rules. An object is compiled as a rule tree.
    pub fn compile(value: &Value) -> Result<(Self, Vec<ConfigIssue>), SchemaError> {
        match value {
            Value::Object(map) => {
                let (tree, issues) = RuleTree::compile(map);
                Ok((SecurityConfig::Rules(tree), issues))
            }
            Value::Bool(true) => Ok((SecurityConfig::Rules(RuleTree::default()), Vec::new())),
            v if !crate::expression::is_truthy(v) => Ok((SecurityConfig::Disabled, Vec::new())),
            other => Err(SchemaError::UnsupportedRoot {
                found: type_name(other),
            }),
        }
    }

    /// Like [`compile`](Self::compile) but logs issues instead of returning
    /// them.
    pub fn from_value(value: &Value) -> Result<Self, SchemaError> {
        let (config, issues) = Self::compile(value)?;
        for issue in &issues {
            warn!(path = %issue.path, issue = %issue.kind, "rule configuration issue");
        }
        Ok(config)
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, SecurityConfig::Rules(_))
    }

    pub fn tree(&self) -> Option<&RuleTree> {
        match self {
            SecurityConfig::Disabled => None,
            SecurityConfig::Rules(tree) => Some(tree),
        }
    }
}

/// A problem found while compiling a rule tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Slash-separated location of the node, `/` for the root.
    pub path: String,
    pub kind: IssueKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssueKind {
    /// More than one wildcard key at one level; only the last is used.
    MultipleWildcards { keys: Vec<String> },
    /// A `.read`/`.write` value that will always deny.
    MalformedDirective { key: &'static str, reason: String },
    /// A key whose value is not an object, so no path can descend into it.
    UnreachableChild { key: String, found: &'static str },
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueKind::MultipleWildcards { keys } => write!(
                f,
                "multiple wildcard keys ({}); only '{}' is used",
                keys.join(", "),
                keys.last().map(String::as_str).unwrap_or_default()
            ),
            IssueKind::MalformedDirective { key, reason } => {
                write!(f, "{key} always denies: {reason}")
            }
            IssueKind::UnreachableChild { key, found } => {
                write!(f, "'{key}' holds a {found}, not a rule object")
            }
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.kind)
    }
}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

fn compile_node(
    map: &Map<String, Value>,
    path: &mut Vec<String>,
    issues: &mut Vec<ConfigIssue>,
) -> RuleNode {
    let mut node = RuleNode::default();

    for (key, value) in map {
        match key.as_str() {
            READ_KEY => node.read = compile_directive(READ_KEY, value, path, issues),
            WRITE_KEY => node.write = compile_directive(WRITE_KEY, value, path, issues),
            _ => {
                if key.starts_with(WILDCARD_SIGIL) {
                    node.wildcards.push(key.clone());
                }
                match value {
                    Value::Object(child) => {
                        path.push(key.clone());
                        let child = compile_node(child, path, issues);
                        path.pop();
                        node.children.insert(key.clone(), child);
                    }
                    other => issues.push(ConfigIssue {
                        path: display_path(path),
                        kind: IssueKind::UnreachableChild {
                            key: key.clone(),
                            found: type_name(other),
                        },
                    }),
                }
            }
        }
    }

    if node.wildcards.len() > 1 {
        issues.push(ConfigIssue {
            path: display_path(path),
            kind: IssueKind::MultipleWildcards {
                keys: node.wildcards.clone(),
            },
        });
    }

    node
}

/// Map a raw `.read`/`.write` value to a directive. `None` means the node
/// inherits from its ancestors.
fn compile_directive(
    key: &'static str,
    value: &Value,
    path: &[String],
    issues: &mut Vec<ConfigIssue>,
) -> Option<Directive> {
    let malformed = |source: Option<String>, reason: String, issues: &mut Vec<ConfigIssue>| {
        issues.push(ConfigIssue {
            path: display_path(path),
            kind: IssueKind::MalformedDirective {
                key,
                reason: reason.clone(),
            },
        });
        Some(Directive::Malformed { source, reason })
    };

    match value {
        Value::Null => None,
        Value::Bool(b) => Some(Directive::Bool(*b)),
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => match Expression::compile(s) {
            Ok(expr) => Some(Directive::Expression(Arc::new(expr))),
            Err(err) => malformed(Some(s.clone()), err.to_string(), issues),
        },
        other => malformed(
            None,
            format!("expected a boolean or an expression, found {}", type_name(other)),
            issues,
        ),
    }
}

pub(crate) fn display_path<S: AsRef<str>>(segments: &[S]) -> String {
    let mut out = String::from("/");
    let joined = segments
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<_>>()
        .join("/");
    out.push_str(&joined);
    out
}
