//! Profile resolution: glob matching, inheritance walking, and merging.
//!
//! A module declares profiles keyed by glob (`dev`, `dev*`, `*`) plus named
//! profile templates reachable only through `extends_profile`. Resolving a
//! requested profile name picks the most specific matching glob, walks the
//! inheritance chain most-specific-first, and deep-merges the chain into one
//! concrete profile value.

use crate::config::BaseModule;
use crate::engine::{EngineError, Result};
use crate::ident::{ModulePath, ProfileGlob, ProfileName};
use toml::Value;

/// Pick the glob that selects `name`: candidates are ranked by raw string
/// length descending, and the first exact or prefix-wildcard hit wins.
/// Returns `None` when nothing matches; the caller reports the miss.
pub fn match_profile_name<'a>(
    globs: &[&'a ProfileGlob],
    name: &ProfileName,
) -> Option<&'a ProfileGlob> {
    let mut ranked: Vec<&ProfileGlob> = globs.to_vec();
    ranked.sort_by(|a, b| b.specificity().cmp(&a.specificity()));
    ranked.into_iter().find(|glob| glob.matches(name))
}

/// Walk the inheritance chain starting at the matched glob's profile,
/// following `extends_profile` references. Each reference is looked up
/// first in `profiles` (by exact key), then in `profile_templates`. The
/// callback sees nodes most-specific-first. Revisiting a name is an
/// inheritance cycle; a dangling reference is a profile-not-found error.
pub fn walk_profiles<F>(
    module: &BaseModule,
    start: &ProfileGlob,
    path: &ModulePath,
    mut callback: F,
) -> Result<()>
where
    F: FnMut(&str, &Value),
{
    let mut current_name = start.as_str().to_string();
    let mut current = module
        .profile_by_key(&current_name)
        .ok_or_else(|| EngineError::ProfileNotFound {
            path: path.clone(),
            name: current_name.clone(),
        })?;

    let mut visited: Vec<String> = Vec::new();
    loop {
        visited.push(current_name.clone());
        callback(&current_name, current);

        let next = match current.get("extends_profile") {
            Some(Value::String(next)) => next.clone(),
            Some(_) => {
                return Err(EngineError::validation(
                    path,
                    &module.kind,
                    "profile",
                    format!("`extends_profile` in {current_name:?} must be a string"),
                ))
            }
            None => return Ok(()),
        };

        if visited.iter().any(|seen| *seen == next) {
            return Err(EngineError::ProfileCycle {
                path: path.clone(),
                name: next,
            });
        }

        current = module
            .profile_by_key(&next)
            .or_else(|| module.template_by_name(&next))
            .ok_or_else(|| EngineError::ProfileNotFound {
                path: path.clone(),
                name: next.clone(),
            })?;
        current_name = next;
    }
}

/// Collect the inheritance chain most-specific-first.
pub fn resolve_profile_chain(
    module: &BaseModule,
    start: &ProfileGlob,
    path: &ModulePath,
) -> Result<Vec<Value>> {
    let mut chain = Vec::new();
    walk_profiles(module, start, path, |_, profile| {
        chain.push(profile.clone());
    })?;
    Ok(chain)
}

/// Deep-merge a profile chain (most-specific-first) into one value.
///
/// Scanning most-specific-first: tables are collected until the first
/// non-table value. If the most specific value is a scalar it wins outright
/// and nothing later is consulted; otherwise the collected tables are
/// merged per key, recursively, so a child table entry overrides its
/// ancestor's at every nesting depth.
pub fn merge_profiles(profiles: &[Value]) -> Value {
    let mut tables = Vec::new();
    for value in profiles {
        match value {
            Value::Table(table) => tables.push(table),
            scalar => {
                if tables.is_empty() {
                    return scalar.clone();
                }
                break;
            }
        }
    }
    if tables.is_empty() {
        return Value::Table(toml::value::Table::new());
    }

    // Key order: ancestors first, so general structure reads before
    // specific additions; the values themselves are child-wins.
    let mut keys: Vec<&String> = Vec::new();
    for table in tables.iter().rev() {
        for key in table.keys() {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }

    let mut merged = toml::value::Table::new();
    for key in keys {
        let values: Vec<Value> = tables
            .iter()
            .filter_map(|table| table.get(key).cloned())
            .collect();
        merged.insert(key.clone(), merge_profiles(&values));
    }
    Value::Table(merged)
}
