//! Helm chart source kind.

use crate::config::{decode_table, LoadedModule, Profile};
use crate::context::InterpolatedString;
use crate::engine::handle::EngineHandle;
use crate::engine::preload::PreloadedModule;
use crate::engine::registry::{ModuleKind, Runnable, StepOutput};
use crate::engine::Result;
use crate::ident::ModulePath;
use crate::runner::CommandSpec;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ChartProfile {
    /// Chart name, matching `name` in the module's Chart.yaml.
    name: InterpolatedString,
}

/// `chart/helm`: packages the staged module directory as a chart versioned
/// at the contextual version. Outputs `chart`, the packaged archive path.
pub struct HelmChartKind;

impl HelmChartKind {
    fn profile(&self, profile: &Profile, path: &ModulePath) -> Result<ChartProfile> {
        decode_table(&profile.rest, path, self.kind(), "profile")
    }
}

impl ModuleKind for HelmChartKind {
    fn kind(&self) -> &'static str {
        "chart/helm"
    }

    fn is_source(&self) -> bool {
        true
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
}

impl Runnable for HelmChartKind {
    fn run(&self, module: &PreloadedModule, handle: &mut EngineHandle) -> Result<StepOutput> {
        let profile = self.profile(&module.profile, &module.path)?;
        let name = super::resolve(&profile.name, handle.context(), &module.path)?;
        let version = handle.version().as_str();
        let out_dir = handle.create_tmp_dir()?;
        let dest = out_dir.to_string_lossy().to_string();

        handle.execute_command(
            &CommandSpec::new("helm")
                .args(["package", "."])
                .args(["--destination", dest.as_str()])
                .args(["--version", version])
                .args(["--app-version", version])
                .cwd(handle.work_dir()),
        )?;

        // `helm package` writes <name>-<version>.tgz into the destination.
        let archive = out_dir.join(format!("{name}-{version}.tgz"));
        Ok(StepOutput::from([(
            "chart".to_string(),
            archive.to_string_lossy().to_string(),
        )]))
    }
}
