use std::collections::BTreeMap;

use tracing::trace;

use crate::schema::{Directive, Permission, RuleNode, RuleTree};

/// Wildcard variables captured while walking a path, keyed by name without
/// the sigil.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings(BTreeMap<String, String>);

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `segment`, replacing an earlier binding of the same
    /// name from a shallower level.
    pub fn insert(&mut self, name: impl Into<String>, segment: impl Into<String>) {
        self.0.insert(name.into(), segment.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Outcome of walking a path through the rule tree.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub directive: Directive,
    pub bindings: Bindings,
}

/// Walk `path` through `tree` and return the directive that governs
/// `permission` there, together with the wildcard bindings picked up on the
/// way.
///
/// At each segment a literal child wins over the wildcard; when several
/// wildcards are declared at one level the last one is used. Once no child
/// matches, the walk continues on an empty node, so deeper segments can only
/// inherit. Directives set explicitly on a node (including `false`) replace
/// the inherited ones; the root's own directives seed the inheritance.
pub fn resolve<S: AsRef<str>>(tree: &RuleTree, path: &[S], permission: Permission) -> Resolution {
    let root = tree.root();
    let mut current: Option<&RuleNode> = Some(root);
    let mut latest_read = root.directive(Permission::Read);
    let mut latest_write = root.directive(Permission::Write);
    let mut bindings = Bindings::new();

    for segment in path {
        let segment = segment.as_ref();
        current = current.and_then(|node| step(node, segment, &mut bindings));

        if let Some(node) = current {
            if let Some(read) = node.directive(Permission::Read) {
                latest_read = Some(read);
            }
            if let Some(write) = node.directive(Permission::Write) {
                latest_write = Some(write);
            }
        }
    }

    let inherited = match permission {
        Permission::Read => latest_read,
        Permission::Write => latest_write,
    };
    let directive = current
        .and_then(|node| node.directive(permission))
        .or(inherited)
        .cloned()
        .unwrap_or(Directive::Bool(false));

    Resolution {
        directive,
        bindings,
    }
}

/// Split a slash-separated path into segments. Leading, trailing and
/// repeated slashes are ignored, so `"/users//u1/"` is `["users", "u1"]`.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Descend one level. `None` means the walk has left the tree.
fn step<'t>(node: &'t RuleNode, segment: &str, bindings: &mut Bindings) -> Option<&'t RuleNode> {
    if let Some(child) = node.child(segment) {
        trace!(segment, "matched literal rule key");
        return Some(child);
    }

    match node.wildcard() {
        Some((name, Some(child))) => {
            trace!(segment, wildcard = name, "matched wildcard rule key");
            bindings.insert(name, segment);
            Some(child)
        }
        _ => {
            trace!(segment, "no rule key matched; only inherited directives apply");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SecurityConfig;
    use serde_json::{json, Value};

    fn tree(value: Value) -> RuleTree {
        match SecurityConfig::compile(&value).unwrap().0 {
            SecurityConfig::Rules(tree) => tree,
            SecurityConfig::Disabled => panic!("test config must enable security"),
        }
    }

    fn source(directive: &Directive) -> &str {
        match directive {
            Directive::Expression(e) => e.source(),
            other => panic!("expected expression, got {other:?}"),
        }
    }

    #[test]
    fn split_path_ignores_stray_slashes() {
        assert_eq!(split_path("/users//u1/"), ["users", "u1"]);
        assert!(split_path("").is_empty());
        assert!(split_path("///").is_empty());
    }

    #[test]
    fn empty_path_uses_root_directive() {
        let t = tree(json!({ ".read": true, ".write": false }));
        let empty: [&str; 0] = [];
        assert_eq!(
            resolve(&t, &empty, Permission::Read).directive,
            Directive::Bool(true)
        );
        assert_eq!(
            resolve(&t, &empty, Permission::Write).directive,
            Directive::Bool(false)
        );
    }

    #[test]
    fn missing_directives_default_to_false() {
        let t = tree(json!({ "a": {} }));
        assert_eq!(
            resolve(&t, &["a"], Permission::Read).directive,
            Directive::Bool(false)
        );
        let t = RuleTree::default();
        assert_eq!(
            resolve(&t, &["x", "y"], Permission::Write).directive,
            Directive::Bool(false)
        );
    }

    #[test]
    fn root_directive_is_inherited() {
        let t = tree(json!({ ".read": true, "a": { "b": {} } }));
        assert_eq!(
            resolve(&t, &["a", "b", "c"], Permission::Read).directive,
            Directive::Bool(true)
        );
    }

    #[test]
    fn explicit_false_overrides_inherited_true() {
        let t = tree(json!({
            ".read": true,
            "private": { ".read": false, "docs": {} }
        }));
        assert_eq!(
            resolve(&t, &["private"], Permission::Read).directive,
            Directive::Bool(false)
        );
        assert_eq!(
            resolve(&t, &["private", "docs", "x"], Permission::Read).directive,
            Directive::Bool(false)
        );
    }

    #[test]
    fn explicit_grant_overrides_inherited_false() {
        let t = tree(json!({
            ".write": false,
            "inbox": { ".write": "newData != null" }
        }));
        let resolution = resolve(&t, &["inbox", "m1"], Permission::Write);
        assert_eq!(source(&resolution.directive), "newData != null");
    }

    #[test]
    fn wildcard_binds_segment() {
        let t = tree(json!({
            "rooms": { "$roomId": { ".read": "newData !== null" } }
        }));
        let resolution = resolve(&t, &["rooms", "42"], Permission::Read);
        assert_eq!(source(&resolution.directive), "newData !== null");
        assert_eq!(resolution.bindings.get("roomId"), Some("42"));
        assert_eq!(resolution.bindings.len(), 1);
    }

    #[test]
    fn literal_key_wins_over_wildcard() {
        let t = tree(json!({
            "users": {
                "$uid": { ".read": false },
                "admin": { ".read": true }
            }
        }));
        let resolution = resolve(&t, &["users", "admin"], Permission::Read);
        assert_eq!(resolution.directive, Directive::Bool(true));
        assert!(resolution.bindings.is_empty());

        let resolution = resolve(&t, &["users", "bob"], Permission::Read);
        assert_eq!(resolution.directive, Directive::Bool(false));
        assert_eq!(resolution.bindings.get("uid"), Some("bob"));
    }

    #[test]
    fn last_declared_wildcard_wins() {
        let t = tree(json!({
            "items": {
                "$a": { ".read": true },
                "$b": { ".read": false }
            }
        }));
        let resolution = resolve(&t, &["items", "i1"], Permission::Read);
        assert_eq!(resolution.directive, Directive::Bool(false));
        assert_eq!(resolution.bindings.get("b"), Some("i1"));
        assert_eq!(resolution.bindings.get("a"), None);

        // Swapping declaration order swaps the outcome.
        let t = tree(json!({
            "items": {
                "$b": { ".read": false },
                "$a": { ".read": true }
            }
        }));
        let resolution = resolve(&t, &["items", "i1"], Permission::Read);
        assert_eq!(resolution.directive, Directive::Bool(true));
        assert_eq!(resolution.bindings.get("a"), Some("i1"));
    }

    #[test]
    fn non_object_last_wildcard_dead_ends() {
        let t = tree(json!({
            ".read": true,
            "items": { "$a": { ".read": false }, "$b": true }
        }));
        let resolution = resolve(&t, &["items", "i1"], Permission::Read);
        assert_eq!(resolution.directive, Directive::Bool(true));
        assert!(resolution.bindings.is_empty());
    }

    #[test]
    fn dead_end_keeps_consuming_segments() {
        let t = tree(json!({
            "a": { ".write": true, "b": { ".write": false } }
        }));
        // "x" leaves the tree after "a"; "b" must not be matched afterwards.
        let resolution = resolve(&t, &["a", "x", "b"], Permission::Write);
        assert_eq!(resolution.directive, Directive::Bool(true));
    }

    #[test]
    fn nested_wildcards_accumulate_bindings() {
        let t = tree(json!({
            "orgs": { "$org": { "members": { "$member": { ".read": "true" } } } }
        }));
        let resolution = resolve(&t, &["orgs", "acme", "members", "m7"], Permission::Read);
        assert_eq!(resolution.bindings.get("org"), Some("acme"));
        assert_eq!(resolution.bindings.get("member"), Some("m7"));
    }

    #[test]
    fn read_and_write_inherit_independently() {
        let t = tree(json!({
            "a": { ".read": true, ".write": false, "b": { ".write": true } }
        }));
        assert_eq!(
            resolve(&t, &["a", "b"], Permission::Read).directive,
            Directive::Bool(true)
        );
        assert_eq!(
            resolve(&t, &["a", "b"], Permission::Write).directive,
            Directive::Bool(true)
        );
    }
}
