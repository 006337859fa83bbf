//! Hierarchical interpolation context and `${...}` string resolution.
//!
//! Profiles may embed `${scope.path}` expressions anywhere a string value
//! appears. They are resolved lazily against a [`ScopeTree`] at the point of
//! use. Child module contexts are built fresh from the parent's values (copy
//! on branch); only the `steps` scope of the currently-executing module is
//! mutated in place as dependency outputs arrive.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Errors produced while resolving an interpolated string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterpolationError {
    #[error("unterminated expression in {0:?}")]
    Unterminated(String),

    #[error("empty expression in {0:?}")]
    EmptyExpression(String),

    #[error("unknown variable ${{{path}}} in {value:?}")]
    UnknownVariable { value: String, path: String },

    #[error("${{{path}}} refers to a scope, not a value, in {value:?}")]
    NotALeaf { value: String, path: String },
}

/// A value inside a scope: either a string leaf or a nested scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeValue {
    Leaf(String),
    Scope(ScopeTree),
}

/// A tree of named scopes mapping string keys to leaves or nested scopes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeTree {
    entries: BTreeMap<String, ScopeValue>,
}

impl ScopeTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a scope from a flat key → value record.
    pub fn from_record(record: &BTreeMap<String, String>) -> Self {
        let mut tree = Self::new();
        for (key, value) in record {
            tree.set_leaf(key, value);
        }
        tree
    }

    pub fn set_leaf(&mut self, key: &str, value: &str) {
        self.entries
            .insert(key.to_string(), ScopeValue::Leaf(value.to_string()));
    }

    pub fn set_scope(&mut self, key: &str, scope: ScopeTree) {
        self.entries
            .insert(key.to_string(), ScopeValue::Scope(scope));
    }

    pub fn get(&self, key: &str) -> Option<&ScopeValue> {
        self.entries.get(key)
    }

    /// Mutable access to a nested scope, creating it if absent.
    pub fn scope_mut(&mut self, key: &str) -> &mut ScopeTree {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| ScopeValue::Scope(ScopeTree::new()));
        if !matches!(entry, ScopeValue::Scope(_)) {
            *entry = ScopeValue::Scope(ScopeTree::new());
        }
        match entry {
            ScopeValue::Scope(scope) => scope,
            ScopeValue::Leaf(_) => unreachable!("entry was just replaced with a scope"),
        }
    }

    /// Walk a dotted path like `steps.api.url` down the tree.
    pub fn lookup(&self, path: &str) -> Option<&ScopeValue> {
        let mut current = self;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let value = current.get(segment)?;
            if segments.peek().is_none() {
                return Some(value);
            }
            match value {
                ScopeValue::Scope(scope) => current = scope,
                ScopeValue::Leaf(_) => return None,
            }
        }
        None
    }

    /// Resolve a dotted path to a leaf string.
    pub fn lookup_leaf(&self, path: &str) -> Option<&str> {
        match self.lookup(path)? {
            ScopeValue::Leaf(value) => Some(value),
            ScopeValue::Scope(_) => None,
        }
    }
}

/// A string value that may embed `${scope.path}` expressions.
///
/// Stored verbatim at decode time; resolution happens against a live
/// [`ScopeTree`] when the value is actually needed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterpolatedString(String);

impl InterpolatedString {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn raw(&self) -> &str {
        &self.0
    }

    /// Resolve every embedded expression against `ctx`.
    pub fn resolve(&self, ctx: &ScopeTree) -> Result<String, InterpolationError> {
        self.render(ctx, false)
    }

    /// Diagnostic rendering: unresolved expressions become `<path?>`
    /// placeholders instead of failing the whole run.
    pub fn resolve_lossy(&self, ctx: &ScopeTree) -> String {
        self.render(ctx, true).unwrap_or_else(|_| self.0.clone())
    }

    fn render(&self, ctx: &ScopeTree, lossy: bool) -> Result<String, InterpolationError> {
        let raw = &self.0;
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw.as_str();

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                if lossy {
                    out.push_str(&rest[start..]);
                    return Ok(out);
                }
                return Err(InterpolationError::Unterminated(raw.clone()));
            };
            let path = after[..end].trim();
            if path.is_empty() {
                if lossy {
                    out.push_str("<?>");
                    rest = &after[end + 1..];
                    continue;
                }
                return Err(InterpolationError::EmptyExpression(raw.clone()));
            }
            match ctx.lookup(path) {
                Some(ScopeValue::Leaf(value)) => out.push_str(value),
                Some(ScopeValue::Scope(_)) => {
                    if lossy {
                        out.push_str(&format!("<{path}?>"));
                    } else {
                        return Err(InterpolationError::NotALeaf {
                            value: raw.clone(),
                            path: path.to_string(),
                        });
                    }
                }
                None => {
                    if lossy {
                        out.push_str(&format!("<{path}?>"));
                    } else {
                        return Err(InterpolationError::UnknownVariable {
                            value: raw.clone(),
                            path: path.to_string(),
                        });
                    }
                }
            }
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

impl fmt::Display for InterpolatedString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InterpolatedString {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ctx() -> ScopeTree {
        let mut ctx = ScopeTree::new();
        let mut service = ScopeTree::new();
        service.set_leaf("version", "1.2.3");
        ctx.set_scope("service", service);
        let steps = ctx.scope_mut("steps");
        let mut api = ScopeTree::new();
        api.set_leaf("url", "http://api:8080");
        steps.set_scope("api", api);
        ctx
    }

    #[test]
    fn lookup_walks_nested_scopes() {
        let ctx = sample_ctx();
        assert_eq!(ctx.lookup_leaf("service.version"), Some("1.2.3"));
        assert_eq!(ctx.lookup_leaf("steps.api.url"), Some("http://api:8080"));
        assert_eq!(ctx.lookup_leaf("steps.api.missing"), None);
        assert_eq!(ctx.lookup_leaf("steps"), None);
    }

    #[test]
    fn resolve_substitutes_expressions() {
        let ctx = sample_ctx();
        let value = InterpolatedString::from("v=${service.version} via ${steps.api.url}");
        assert_eq!(value.resolve(&ctx).unwrap(), "v=1.2.3 via http://api:8080");
    }

    #[test]
    fn resolve_plain_strings_untouched() {
        let ctx = sample_ctx();
        let value = InterpolatedString::from("just text with $dollar");
        assert_eq!(value.resolve(&ctx).unwrap(), "just text with $dollar");
    }

    #[test]
    fn resolve_reports_unknown_variable() {
        let ctx = sample_ctx();
        let value = InterpolatedString::from("${steps.db.url}");
        let err = value.resolve(&ctx).unwrap_err();
        assert_eq!(
            err,
            InterpolationError::UnknownVariable {
                value: "${steps.db.url}".to_string(),
                path: "steps.db.url".to_string(),
            }
        );
    }

    #[test]
    fn resolve_rejects_scope_references_and_unterminated() {
        let ctx = sample_ctx();
        assert!(matches!(
            InterpolatedString::from("${steps.api}").resolve(&ctx),
            Err(InterpolationError::NotALeaf { .. })
        ));
        assert!(matches!(
            InterpolatedString::from("${steps.api.url").resolve(&ctx),
            Err(InterpolationError::Unterminated(_))
        ));
    }

    #[test]
    fn lossy_rendering_uses_placeholders() {
        let ctx = sample_ctx();
        let value = InterpolatedString::from("a=${missing.var} b=${service.version}");
        assert_eq!(value.resolve_lossy(&ctx), "a=<missing.var?> b=1.2.3");
    }

    #[test]
    fn child_scope_mutation_does_not_leak_to_parent() {
        let parent = sample_ctx();
        let mut child = parent.clone();
        child.scope_mut("steps").set_leaf("extra", "1");
        assert!(parent.lookup_leaf("steps.extra").is_none());
        assert_eq!(child.lookup_leaf("steps.extra"), Some("1"));
    }
}
