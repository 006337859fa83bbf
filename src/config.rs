//! Module config decoding and the config-loader contract.
//!
//! A module is a directory containing a `module.toml`. The loader returns
//! the decoded-but-untyped file (`BaseModule` plus the raw value tree);
//! kind-specific fields stay as raw TOML until the matching implementation
//! validates them during preload.

use crate::context::InterpolatedString;
use crate::engine::{EngineError, Result};
use crate::ident::{DependencyName, ModulePath, ProfileGlob, ProfileName};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use toml::value::Table;
use toml::Value;

/// Config file name inside every module directory.
pub const MODULE_FILE: &str = "module.toml";

// ============================================================================
// Base module shape
// ============================================================================

/// The universal part of a module file: `kind`, `description`, the
/// glob-keyed `profiles` table and the name-keyed `profile_templates`
/// table. Kind-specific module-level fields land in `extras`.
#[derive(Debug, Clone)]
pub struct BaseModule {
    pub kind: String,
    pub description: Option<String>,
    /// `None` when the module declares no `profiles` table at all; the
    /// preloader then validates an empty profile instead.
    pub profiles: Option<Vec<(ProfileGlob, Value)>>,
    pub profile_templates: Vec<(ProfileName, Value)>,
    pub extras: Table,
}

impl BaseModule {
    pub fn from_value(raw: &Value, path: &ModulePath) -> Result<Self> {
        let table = raw.as_table().ok_or_else(|| {
            EngineError::validation(path, "?", "module config", "expected a table at top level")
        })?;

        let kind = match table.get("kind") {
            Some(Value::String(kind)) => kind.clone(),
            Some(other) => {
                return Err(EngineError::validation(
                    path,
                    "?",
                    "module config",
                    format!("`kind` must be a string, found {}", other.type_str()),
                ))
            }
            None => {
                return Err(EngineError::validation(
                    path,
                    "?",
                    "module config",
                    "missing required field `kind`",
                ))
            }
        };

        let description = match table.get("description") {
            Some(Value::String(text)) => Some(text.clone()),
            Some(other) => {
                return Err(EngineError::validation(
                    path,
                    &kind,
                    "module config",
                    format!("`description` must be a string, found {}", other.type_str()),
                ))
            }
            None => None,
        };

        let profiles = match table.get("profiles") {
            Some(Value::Table(profiles)) => {
                let mut out = Vec::with_capacity(profiles.len());
                for (key, value) in profiles {
                    let glob = ProfileGlob::new(key).map_err(|source| EngineError::Ident {
                        path: path.clone(),
                        source,
                    })?;
                    out.push((glob, value.clone()));
                }
                Some(out)
            }
            Some(other) => {
                return Err(EngineError::validation(
                    path,
                    &kind,
                    "module config",
                    format!("`profiles` must be a table, found {}", other.type_str()),
                ))
            }
            None => None,
        };

        let profile_templates = match table.get("profile_templates") {
            Some(Value::Table(templates)) => {
                let mut out = Vec::with_capacity(templates.len());
                for (key, value) in templates {
                    let name = ProfileName::new(key).map_err(|source| EngineError::Ident {
                        path: path.clone(),
                        source,
                    })?;
                    out.push((name, value.clone()));
                }
                out
            }
            Some(other) => {
                return Err(EngineError::validation(
                    path,
                    &kind,
                    "module config",
                    format!(
                        "`profile_templates` must be a table, found {}",
                        other.type_str()
                    ),
                ))
            }
            None => Vec::new(),
        };

        let mut extras = table.clone();
        for key in ["kind", "description", "profiles", "profile_templates"] {
            extras.remove(key);
        }

        Ok(Self {
            kind,
            description,
            profiles,
            profile_templates,
            extras,
        })
    }

    /// Look up a profile body by its exact glob key string.
    pub fn profile_by_key(&self, key: &str) -> Option<&Value> {
        self.profiles
            .as_ref()?
            .iter()
            .find(|(glob, _)| glob.as_str() == key)
            .map(|(_, value)| value)
    }

    pub fn template_by_name(&self, name: &str) -> Option<&Value> {
        self.profile_templates
            .iter()
            .find(|(template, _)| template.as_str() == name)
            .map(|(_, value)| value)
    }

    pub fn glob_keys(&self) -> Vec<&ProfileGlob> {
        self.profiles
            .as_ref()
            .map(|profiles| profiles.iter().map(|(glob, _)| glob).collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// Profile (merged + universally decoded)
// ============================================================================

/// A dependency reference inside a profile's `steps` table: either a bare
/// module path string or `{ module, params?, version_locked_role? }`.
#[derive(Debug, Clone)]
pub struct Step {
    pub module: String,
    pub params: Vec<(String, InterpolatedString)>,
    pub version_locked_role: Option<String>,
}

/// A named step in declaration order.
#[derive(Debug, Clone)]
pub struct StepDecl {
    pub name: DependencyName,
    pub step: Step,
}

/// The concrete profile for one module after glob matching, inheritance
/// walking, and merging. Universal fields are decoded here; everything
/// kind-specific stays in `rest` for the implementation to validate.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub steps: Vec<StepDecl>,
    pub override_version: Option<InterpolatedString>,
    pub default_params: Vec<(String, InterpolatedString)>,
    pub required_params: Vec<String>,
    pub rest: Table,
}

impl Profile {
    /// Decode the universal fields out of a merged profile value.
    ///
    /// Root-module profiles may not declare `default_params` or
    /// `required_params`; those only exist on dependency profiles.
    pub fn from_merged(merged: Value, path: &ModulePath, kind: &str, is_root: bool) -> Result<Self> {
        let mut table = match merged {
            Value::Table(table) => table,
            other => {
                return Err(EngineError::validation(
                    path,
                    kind,
                    "profile",
                    format!("expected a table, found {}", other.type_str()),
                ))
            }
        };

        // Consumed by the inheritance walk; the most-specific leaf may
        // still be present in the merged result.
        table.remove("extends_profile");

        let steps = match table.remove("steps") {
            Some(Value::Table(steps)) => {
                let mut out = Vec::with_capacity(steps.len());
                for (key, value) in steps {
                    let name = DependencyName::new(&key).map_err(|source| EngineError::Ident {
                        path: path.clone(),
                        source,
                    })?;
                    out.push(StepDecl {
                        name,
                        step: decode_step(value, path, kind)?,
                    });
                }
                out
            }
            Some(other) => {
                return Err(EngineError::validation(
                    path,
                    kind,
                    "profile",
                    format!("`steps` must be a table, found {}", other.type_str()),
                ))
            }
            None => Vec::new(),
        };

        let override_version = match table.remove("override_version") {
            Some(Value::String(version)) => Some(InterpolatedString::new(version)),
            Some(other) => {
                return Err(EngineError::validation(
                    path,
                    kind,
                    "profile",
                    format!(
                        "`override_version` must be a string, found {}",
                        other.type_str()
                    ),
                ))
            }
            None => None,
        };

        let default_params = match table.remove("default_params") {
            Some(Value::Table(params)) => {
                let mut out = Vec::with_capacity(params.len());
                for (key, value) in params {
                    let Value::String(text) = value else {
                        return Err(EngineError::validation(
                            path,
                            kind,
                            "profile",
                            format!("`default_params.{key}` must be a string"),
                        ));
                    };
                    out.push((key, InterpolatedString::new(text)));
                }
                out
            }
            Some(other) => {
                return Err(EngineError::validation(
                    path,
                    kind,
                    "profile",
                    format!(
                        "`default_params` must be a table, found {}",
                        other.type_str()
                    ),
                ))
            }
            None => Vec::new(),
        };

        let required_params = match table.remove("required_params") {
            Some(Value::Array(params)) => {
                let mut out = Vec::with_capacity(params.len());
                for value in params {
                    let Value::String(text) = value else {
                        return Err(EngineError::validation(
                            path,
                            kind,
                            "profile",
                            "`required_params` entries must be strings",
                        ));
                    };
                    out.push(text);
                }
                out
            }
            Some(other) => {
                return Err(EngineError::validation(
                    path,
                    kind,
                    "profile",
                    format!(
                        "`required_params` must be an array, found {}",
                        other.type_str()
                    ),
                ))
            }
            None => Vec::new(),
        };

        if is_root && (!default_params.is_empty() || !required_params.is_empty()) {
            return Err(EngineError::validation(
                path,
                kind,
                "profile",
                "`default_params`/`required_params` are not allowed on a root module profile",
            ));
        }

        Ok(Self {
            steps,
            override_version,
            default_params,
            required_params,
            rest: table,
        })
    }
}

fn decode_step(value: Value, path: &ModulePath, kind: &str) -> Result<Step> {
    match value {
        Value::String(module) => Ok(Step {
            module,
            params: Vec::new(),
            version_locked_role: None,
        }),
        Value::Table(mut table) => {
            let module = match table.remove("module") {
                Some(Value::String(module)) => module,
                _ => {
                    return Err(EngineError::validation(
                        path,
                        kind,
                        "profile",
                        "step tables require a string `module` field",
                    ))
                }
            };
            let params = match table.remove("params") {
                Some(Value::Table(params)) => {
                    let mut out = Vec::with_capacity(params.len());
                    for (key, value) in params {
                        let Value::String(text) = value else {
                            return Err(EngineError::validation(
                                path,
                                kind,
                                "profile",
                                format!("step param `{key}` must be a string"),
                            ));
                        };
                        out.push((key, InterpolatedString::new(text)));
                    }
                    out
                }
                Some(_) => {
                    return Err(EngineError::validation(
                        path,
                        kind,
                        "profile",
                        "step `params` must be a table",
                    ))
                }
                None => Vec::new(),
            };
            let version_locked_role = match table.remove("version_locked_role") {
                Some(Value::String(role)) => Some(role),
                Some(_) => {
                    return Err(EngineError::validation(
                        path,
                        kind,
                        "profile",
                        "step `version_locked_role` must be a string",
                    ))
                }
                None => None,
            };
            if let Some(unknown) = table.keys().next() {
                return Err(EngineError::validation(
                    path,
                    kind,
                    "profile",
                    format!("unknown step field `{unknown}`"),
                ));
            }
            Ok(Step {
                module,
                params,
                version_locked_role,
            })
        }
        other => Err(EngineError::validation(
            path,
            kind,
            "profile",
            format!(
                "steps must be module-path strings or tables, found {}",
                other.type_str()
            ),
        )),
    }
}

/// Decode a raw TOML table into a typed kind schema, mapping serde's error
/// (which names the offending field) into a structured validation error.
pub fn decode_table<T: DeserializeOwned>(
    table: &Table,
    path: &ModulePath,
    kind: &str,
    what: &'static str,
) -> Result<T> {
    Value::Table(table.clone())
        .try_into()
        .map_err(|err: toml::de::Error| EngineError::validation(path, kind, what, err.message()))
}

// ============================================================================
// Loader contract
// ============================================================================

/// One module file, loaded and decoded but not yet kind-validated.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    pub path: ModulePath,
    pub file_path: PathBuf,
    pub parsed: BaseModule,
    pub raw: Value,
}

/// Source of module configs. Modules are read fresh on every preload; no
/// caching happens behind this trait.
pub trait ConfigLoader {
    fn load_module(&self, path: &ModulePath) -> Result<LoadedModule>;
}

/// Loads `module.toml` files from the project tree.
pub struct FsConfigLoader {
    project_root: PathBuf,
}

impl FsConfigLoader {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }
}

impl ConfigLoader for FsConfigLoader {
    fn load_module(&self, path: &ModulePath) -> Result<LoadedModule> {
        let file_path = path.dir_under(&self.project_root).join(MODULE_FILE);
        let content = fs::read_to_string(&file_path).map_err(|source| EngineError::ConfigRead {
            file: file_path.clone(),
            source,
        })?;
        let raw: Value = toml::from_str(&content).map_err(|source| EngineError::ConfigParse {
            file: file_path.clone(),
            source: Box::new(source),
        })?;
        let parsed = BaseModule::from_value(&raw, path)?;
        Ok(LoadedModule {
            path: path.clone(),
            file_path,
            parsed,
            raw,
        })
    }
}

/// Find the project root: the given directory or `.` expanded.
pub fn resolve_project_root(dir: Option<&str>) -> anyhow::Result<PathBuf> {
    use anyhow::Context;

    let root = match dir {
        Some(dir) => PathBuf::from(shellexpand::tilde(dir).as_ref()),
        None => std::env::current_dir().context("could not determine current directory")?,
    };
    anyhow::ensure!(
        root.is_dir(),
        "project root {} is not a directory",
        root.display()
    );
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_text: &str) -> Value {
        toml::from_str(toml_text).unwrap()
    }

    fn module_path() -> ModulePath {
        ModulePath::new("services/web").unwrap()
    }

    #[test]
    fn base_module_decodes_universal_fields() {
        let raw = parse(
            r#"
            kind = "service/main"
            description = "Main web service"
            registry = "ghcr.io/acme"

            [profiles."dev*"]
            version = "0.0.0-dev"

            [profile_templates.base]
            version = "1.0.0"
            "#,
        );
        let module = BaseModule::from_value(&raw, &module_path()).unwrap();
        assert_eq!(module.kind, "service/main");
        assert_eq!(module.description.as_deref(), Some("Main web service"));
        assert_eq!(module.glob_keys().len(), 1);
        assert!(module.profile_by_key("dev*").is_some());
        assert!(module.template_by_name("base").is_some());
        assert!(module.extras.contains_key("registry"));
    }

    #[test]
    fn base_module_requires_kind() {
        let raw = parse("description = 'no kind'");
        let err = BaseModule::from_value(&raw, &module_path()).unwrap_err();
        assert!(err.to_string().contains("kind"));
    }

    #[test]
    fn missing_profiles_table_is_distinct_from_empty() {
        let raw = parse("kind = 'step/shell'");
        let module = BaseModule::from_value(&raw, &module_path()).unwrap();
        assert!(module.profiles.is_none());

        let raw = parse("kind = 'step/shell'\n[profiles]");
        let module = BaseModule::from_value(&raw, &module_path()).unwrap();
        assert_eq!(module.profiles.as_ref().unwrap().len(), 0);
    }

    #[test]
    fn profile_decodes_steps_in_declaration_order() {
        let merged = parse(
            r#"
            [steps.api-image]
            module = "../api"
            params = { tag = "${service.version}" }

            [steps.deploy]
            module = "./deploy"
            "#,
        );
        let profile = Profile::from_merged(merged, &module_path(), "service/main", true).unwrap();
        let names: Vec<&str> = profile.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["api-image", "deploy"]);
        assert_eq!(profile.steps[0].step.module, "../api");
        assert_eq!(profile.steps[0].step.params[0].0, "tag");
    }

    #[test]
    fn step_carries_version_locked_role() {
        let merged = parse(
            r#"
            [steps.api]
            module = "../api"
            version_locked_role = "backend"
            "#,
        );
        let profile = Profile::from_merged(merged, &module_path(), "service/main", true).unwrap();
        assert_eq!(
            profile.steps[0].step.version_locked_role.as_deref(),
            Some("backend")
        );
    }

    #[test]
    fn profile_accepts_bare_step_strings() {
        let merged = parse("steps = { api = \"../api\" }");
        let profile = Profile::from_merged(merged, &module_path(), "service/main", true).unwrap();
        assert_eq!(profile.steps[0].step.module, "../api");
        assert!(profile.steps[0].step.params.is_empty());
    }

    #[test]
    fn root_profile_rejects_param_declarations() {
        let merged = parse("default_params = { replicas = \"1\" }");
        let err =
            Profile::from_merged(merged, &module_path(), "service/main", true).unwrap_err();
        assert!(err.to_string().contains("root module profile"));

        let merged = parse("default_params = { replicas = \"1\" }");
        assert!(Profile::from_merged(merged, &module_path(), "step/shell", false).is_ok());
    }

    #[test]
    fn profile_rejects_unknown_step_fields() {
        let merged = parse(
            r#"
            [steps.api]
            module = "../api"
            bogus = true
            "#,
        );
        let err = Profile::from_merged(merged, &module_path(), "service/main", true).unwrap_err();
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn kind_specific_fields_stay_in_rest() {
        let merged = parse("image = 'acme/web'\nsteps = {}");
        let profile = Profile::from_merged(merged, &module_path(), "image/docker", false).unwrap();
        assert!(profile.rest.contains_key("image"));
        assert!(!profile.rest.contains_key("steps"));
    }
}
