//! Validated identifier newtypes used throughout the module graph.
//!
//! Every name that crosses a config boundary (module paths, profile names,
//! profile globs, dependency names, versions) is validated once at the edge,
//! so the resolver and engine never re-check lexical well-formedness.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Errors produced while validating identifiers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentError {
    #[error("{kind} may not be empty")]
    Empty { kind: &'static str },

    #[error("invalid character {found:?} in {kind} {value:?}")]
    InvalidCharacter {
        kind: &'static str,
        value: String,
        found: char,
    },

    #[error("module path must be relative: {0:?}")]
    AbsolutePath(String),

    #[error("module path escapes the project root: {0:?}")]
    EscapesRoot(String),

    #[error("wildcard is only allowed as the final character of a profile glob: {0:?}")]
    MisplacedWildcard(String),

    #[error("version may not contain whitespace: {0:?}")]
    WhitespaceInVersion(String),
}

/// Generate the common conversion impls for a validated newtype.
macro_rules! ident_impls {
    ($Type:ident) => {
        impl $Type {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $Type {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $Type {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $Type {
            type Error = IdentError;

            fn try_from(s: String) -> Result<Self, IdentError> {
                Self::new(&s)
            }
        }

        impl FromStr for $Type {
            type Err = IdentError;

            fn from_str(s: &str) -> Result<Self, IdentError> {
                Self::new(s)
            }
        }
    };
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')
}

// ============================================================================
// ModulePath
// ============================================================================

/// A normalized module directory path, relative to the project root.
///
/// Stored as `/`-separated segments with `.` and `..` already resolved.
/// Dependency references are resolved against the referencing module's
/// directory via [`ModulePath::join`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct ModulePath(String);

impl ModulePath {
    pub fn new(raw: &str) -> Result<Self, IdentError> {
        if raw.starts_with('/') || raw.starts_with('\\') {
            return Err(IdentError::AbsolutePath(raw.to_string()));
        }
        let segments = normalize_segments(&[], raw)?;
        if segments.is_empty() {
            return Err(IdentError::Empty {
                kind: "module path",
            });
        }
        Ok(Self(segments.join("/")))
    }

    /// Resolve a dependency reference relative to this module's directory.
    pub fn join(&self, reference: &str) -> Result<Self, IdentError> {
        if reference.starts_with('/') || reference.starts_with('\\') {
            return Err(IdentError::AbsolutePath(reference.to_string()));
        }
        let base: Vec<&str> = self.0.split('/').collect();
        let segments = normalize_segments(&base, reference)?;
        if segments.is_empty() {
            return Err(IdentError::Empty {
                kind: "module path",
            });
        }
        Ok(Self(segments.join("/")))
    }

    /// The on-disk directory for this module under `root`.
    pub fn dir_under(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for segment in self.0.split('/') {
            out.push(segment);
        }
        out
    }
}

ident_impls!(ModulePath);

/// Resolve `raw` against `base`, rejecting paths that climb above the root.
fn normalize_segments(base: &[&str], raw: &str) -> Result<Vec<String>, IdentError> {
    let mut stack: Vec<String> = base.iter().map(|s| (*s).to_string()).collect();
    for segment in raw.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if stack.pop().is_none() {
                    return Err(IdentError::EscapesRoot(raw.to_string()));
                }
            }
            other => {
                if let Some(found) = other.chars().find(|c| !is_name_char(*c)) {
                    return Err(IdentError::InvalidCharacter {
                        kind: "module path",
                        value: raw.to_string(),
                        found,
                    });
                }
                stack.push(other.to_string());
            }
        }
    }
    Ok(stack)
}

// ============================================================================
// ProfileName
// ============================================================================

/// A concrete profile name as requested on the command line or referenced
/// by `extends_profile`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct ProfileName(String);

impl ProfileName {
    pub fn new(raw: &str) -> Result<Self, IdentError> {
        if raw.is_empty() {
            return Err(IdentError::Empty {
                kind: "profile name",
            });
        }
        if let Some(found) = raw.chars().find(|c| !is_name_char(*c)) {
            return Err(IdentError::InvalidCharacter {
                kind: "profile name",
                value: raw.to_string(),
                found,
            });
        }
        Ok(Self(raw.to_string()))
    }
}

ident_impls!(ProfileName);

// ============================================================================
// ProfileGlob
// ============================================================================

/// A profile-selector key: an exact name, the literal `*`, or a `prefix*`
/// trailing wildcard. Used only as a key in a module's `profiles` table,
/// never as the value being matched.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct ProfileGlob(String);

impl ProfileGlob {
    pub fn new(raw: &str) -> Result<Self, IdentError> {
        if raw.is_empty() {
            return Err(IdentError::Empty {
                kind: "profile glob",
            });
        }
        let (stem, wildcard) = match raw.strip_suffix('*') {
            Some(stem) => (stem, true),
            None => (raw, false),
        };
        if stem.contains('*') {
            return Err(IdentError::MisplacedWildcard(raw.to_string()));
        }
        if !wildcard {
            // Exact globs follow profile-name rules.
            ProfileName::new(stem)?;
        } else if let Some(found) = stem.chars().find(|c| !is_name_char(*c)) {
            return Err(IdentError::InvalidCharacter {
                kind: "profile glob",
                value: raw.to_string(),
                found,
            });
        }
        Ok(Self(raw.to_string()))
    }

    /// Whether this glob selects `name`: exact equality, or a trailing
    /// wildcard whose prefix is a literal prefix of `name`.
    pub fn matches(&self, name: &ProfileName) -> bool {
        match self.0.strip_suffix('*') {
            Some(prefix) => name.as_str().starts_with(prefix),
            None => self.0 == name.as_str(),
        }
    }

    /// Globs are ranked by raw string length, longest first.
    pub fn specificity(&self) -> usize {
        self.0.len()
    }
}

ident_impls!(ProfileGlob);

// ============================================================================
// DependencyName
// ============================================================================

/// The local name a step is installed under in the parent's `steps` scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct DependencyName(String);

impl DependencyName {
    pub fn new(raw: &str) -> Result<Self, IdentError> {
        if raw.is_empty() {
            return Err(IdentError::Empty {
                kind: "dependency name",
            });
        }
        if let Some(found) = raw.chars().find(|c| !is_name_char(*c)) {
            return Err(IdentError::InvalidCharacter {
                kind: "dependency name",
                value: raw.to_string(),
                found,
            });
        }
        Ok(Self(raw.to_string()))
    }
}

ident_impls!(DependencyName);

// ============================================================================
// Version
// ============================================================================

/// A resolved module version. Opaque to the engine beyond being non-empty
/// and whitespace-free; image tags and chart versions are built from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct Version(String);

impl Version {
    pub fn new(raw: &str) -> Result<Self, IdentError> {
        if raw.is_empty() {
            return Err(IdentError::Empty { kind: "version" });
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(IdentError::WhitespaceInVersion(raw.to_string()));
        }
        Ok(Self(raw.to_string()))
    }
}

ident_impls!(Version);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_path_normalizes_dot_segments() {
        let path = ModulePath::new("./services/api/").unwrap();
        assert_eq!(path.as_str(), "services/api");
    }

    #[test]
    fn module_path_rejects_absolute_and_empty() {
        assert!(matches!(
            ModulePath::new("/etc/passwd"),
            Err(IdentError::AbsolutePath(_))
        ));
        assert!(matches!(ModulePath::new(""), Err(IdentError::Empty { .. })));
        assert!(matches!(
            ModulePath::new("./."),
            Err(IdentError::Empty { .. })
        ));
    }

    #[test]
    fn module_path_join_resolves_relative_references() {
        let base = ModulePath::new("services/web").unwrap();
        assert_eq!(base.join("api").unwrap().as_str(), "services/web/api");
        assert_eq!(base.join("../api").unwrap().as_str(), "services/api");
        assert_eq!(
            base.join("../../charts/web").unwrap().as_str(),
            "charts/web"
        );
    }

    #[test]
    fn module_path_join_rejects_escaping_root() {
        let base = ModulePath::new("services").unwrap();
        assert!(matches!(
            base.join("../../outside"),
            Err(IdentError::EscapesRoot(_))
        ));
    }

    #[test]
    fn profile_glob_classification() {
        assert!(ProfileGlob::new("dev").is_ok());
        assert!(ProfileGlob::new("dev*").is_ok());
        assert!(ProfileGlob::new("*").is_ok());
        assert!(matches!(
            ProfileGlob::new("de*v"),
            Err(IdentError::MisplacedWildcard(_))
        ));
    }

    #[test]
    fn profile_glob_matching() {
        let name = ProfileName::new("dev-eu").unwrap();
        assert!(ProfileGlob::new("dev-eu").unwrap().matches(&name));
        assert!(ProfileGlob::new("dev*").unwrap().matches(&name));
        assert!(ProfileGlob::new("*").unwrap().matches(&name));
        assert!(!ProfileGlob::new("prod*").unwrap().matches(&name));
    }

    #[test]
    fn version_rejects_whitespace() {
        assert!(Version::new("1.2.3").is_ok());
        assert!(matches!(
            Version::new("1.2 3"),
            Err(IdentError::WhitespaceInVersion(_))
        ));
        assert!(matches!(Version::new(""), Err(IdentError::Empty { .. })));
    }

    #[test]
    fn dependency_name_rules() {
        assert!(DependencyName::new("api-image").is_ok());
        assert!(matches!(
            DependencyName::new("api image"),
            Err(IdentError::InvalidCharacter { .. })
        ));
    }
}
