//! Helm release deploy step.

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
struct ReleaseProfile {
    release: InterpolatedString,
    /// Chart reference: a packaged archive path (typically an earlier
    /// step's `chart` output) or a repo reference.
    chart: InterpolatedString,
    namespace: Option<InterpolatedString>,
    /// Values passed as `--set key=value`, interpolated.
    values: Option<BTreeMap<String, InterpolatedString>>,
}

/// `step/helm-release`: `helm upgrade --install` on run, `helm uninstall`
/// on destroy. Outputs `release` and `namespace`.
pub struct HelmReleaseKind;

struct ResolvedRelease {
    release: String,
    chart: String,
    namespace: String,
    values: Vec<(String, String)>,
}

impl HelmReleaseKind {
    fn profile(&self, profile: &Profile, path: &ModulePath) -> Result<ReleaseProfile> {
        decode_table(&profile.rest, path, self.kind(), "profile")
    }

    fn resolve(&self, module: &PreloadedModule, handle: &EngineHandle) -> Result<ResolvedRelease> {
        let profile = self.profile(&module.profile, &module.path)?;
        let ctx = handle.context();
        let release = super::resolve(&profile.release, ctx, &module.path)?;
        let chart = super::resolve(&profile.chart, ctx, &module.path)?;
        let namespace = match &profile.namespace {
            Some(namespace) => super::resolve(namespace, ctx, &module.path)?,
            None => "default".to_string(),
        };
        let mut values = Vec::new();
        if let Some(raw) = &profile.values {
            for (key, value) in raw {
                values.push((key.clone(), super::resolve(value, ctx, &module.path)?));
            }
        }
        Ok(ResolvedRelease {
            release,
            chart,
            namespace,
            values,
        })
    }
}

impl ModuleKind for HelmReleaseKind {
    fn kind(&self) -> &'static str {
        "step/helm-release"
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

impl Runnable for HelmReleaseKind {
    fn run(&self, module: &PreloadedModule, handle: &mut EngineHandle) -> Result<StepOutput> {
        let resolved = self.resolve(module, handle)?;

        let mut spec = CommandSpec::new("helm")
            .args(["upgrade", "--install"])
            .args([resolved.release.as_str(), resolved.chart.as_str()])
            .args(["--namespace", resolved.namespace.as_str(), "--create-namespace"])
            .args(["--output", "json"]);
        for (key, value) in &resolved.values {
            spec = spec.arg("--set").arg(format!("{key}={value}"));
        }
        let output = handle.execute_hidden_command(&spec)?;

        let mut step = StepOutput::from([
            ("release".to_string(), resolved.release.clone()),
            ("namespace".to_string(), resolved.namespace),
        ]);
        // Helm reports the deployed revision in its JSON output; a parse
        // failure only costs the optional `revision` entry.
        match serde_json::from_str::<serde_json::Value>(&output.stdout) {
            Ok(json) => {
                if let Some(revision) = json.get("version").and_then(|v| v.as_i64()) {
                    step.insert("revision".to_string(), revision.to_string());
                }
                if let Some(status) = json.pointer("/info/status").and_then(|v| v.as_str()) {
                    log::info!("release {} is {status}", resolved.release);
                }
            }
            Err(e) => log::debug!("unparseable helm output: {e}"),
        }
        Ok(step)
    }
}

impl Destroyable for HelmReleaseKind {
    fn destroy(&self, module: &PreloadedModule, handle: &mut EngineHandle) -> Result<StepOutput> {
        let resolved = self.resolve(module, handle)?;
        handle.execute_command(
            &CommandSpec::new("helm")
                .args(["uninstall", resolved.release.as_str()])
                .args(["--namespace", resolved.namespace.as_str()]),
        )?;
        Ok(StepOutput::new())
    }
}
