//! Arbitrary shell command step.

use crate::config::{decode_table, LoadedModule, Profile};
use crate::context::InterpolatedString;
use crate::engine::handle::EngineHandle;
use crate::engine::preload::PreloadedModule;
use crate::engine::registry::{Destroyable, ModuleKind, Runnable, StepOutput};
use crate::engine::Result;
use crate::ident::ModulePath;
use crate::runner::CommandSpec;
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ShellProfile {
    /// Command line passed to `sh -c`, interpolated, run in the staged
    /// module directory.
    command: InterpolatedString,
    /// Optional teardown command for the destroy walk.
    destroy_command: Option<InterpolatedString>,
    env: Option<BTreeMap<String, InterpolatedString>>,
    /// Declared outputs, interpolated after the command succeeds.
    outputs: Option<BTreeMap<String, InterpolatedString>>,
}

/// `step/shell`: runs a declared command in the staged module directory and
/// contributes its declared outputs.
pub struct ShellStepKind;

impl ShellStepKind {
    fn profile(&self, profile: &Profile, path: &ModulePath) -> Result<ShellProfile> {
        decode_table(&profile.rest, path, self.kind(), "profile")
    }

    fn execute(
        &self,
        command: &InterpolatedString,
        env: Option<&BTreeMap<String, InterpolatedString>>,
        module: &PreloadedModule,
        handle: &EngineHandle,
    ) -> Result<()> {
        let line = super::resolve(command, handle.context(), &module.path)?;
        let mut spec = CommandSpec::new("sh")
            .args(["-c", line.as_str()])
            .cwd(handle.work_dir());
        if let Some(env) = env {
            for (key, value) in env {
                let value = super::resolve(value, handle.context(), &module.path)?;
                spec = spec.env(key, value);
            }
        }
        handle.execute_command(&spec)?;
        Ok(())
    }
}

impl ModuleKind for ShellStepKind {
    fn kind(&self) -> &'static str {
        "step/shell"
    }

    fn validate_module(&self, _module: &LoadedModule) -> Result<()> {
        Ok(())
    }

    fn validate_profile(&self, profile: &Profile, path: &ModulePath) -> Result<()> {
        self.profile(profile, path)?;
        Ok(())
    }

    fn as_runnable(&self) -> Option<&dyn Runnable> {
        Some(self)
    }

    fn as_destroyable(&self) -> Option<&dyn Destroyable> {
        Some(self)
    }
}

impl Runnable for ShellStepKind {
    fn run(&self, module: &PreloadedModule, handle: &mut EngineHandle) -> Result<StepOutput> {
        let profile = self.profile(&module.profile, &module.path)?;
        self.execute(&profile.command, profile.env.as_ref(), module, handle)?;

        let mut output = StepOutput::new();
        if let Some(outputs) = &profile.outputs {
            for (key, value) in outputs {
                output.insert(
                    key.clone(),
                    super::resolve(value, handle.context(), &module.path)?,
                );
            }
        }
        Ok(output)
    }
}

impl Destroyable for ShellStepKind {
    fn destroy(&self, module: &PreloadedModule, handle: &mut EngineHandle) -> Result<StepOutput> {
        let profile = self.profile(&module.profile, &module.path)?;
        if let Some(command) = &profile.destroy_command {
            self.execute(command, profile.env.as_ref(), module, handle)?;
        }
        Ok(StepOutput::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> ModulePath {
        ModulePath::new("steps/migrate").unwrap()
    }

    #[test]
    fn profile_requires_command() {
        let merged: toml::Value = toml::from_str("outputs = { done = '1' }").unwrap();
        let profile = Profile::from_merged(merged, &path(), "step/shell", false).unwrap();
        assert!(ShellStepKind.validate_profile(&profile, &path()).is_err());
    }

    #[test]
    fn profile_accepts_env_and_outputs() {
        let merged: toml::Value = toml::from_str(
            r#"
            command = "./migrate.sh ${service.version}"
            env = { DB_URL = "${params.db_url}" }
            outputs = { migrated_to = "${service.version}" }
            "#,
        )
        .unwrap();
        let profile = Profile::from_merged(merged, &path(), "step/shell", false).unwrap();
        assert!(ShellStepKind.validate_profile(&profile, &path()).is_ok());
    }
}
