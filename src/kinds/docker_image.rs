//! Docker image source kind.

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
struct ImageProfile {
    /// Repository name without tag, e.g. `ghcr.io/acme/web`.
    image: InterpolatedString,
    /// Dockerfile path relative to the module directory.
    dockerfile: Option<String>,
    build_args: Option<BTreeMap<String, InterpolatedString>>,
}

/// `image/docker`: builds the staged module directory into an image tagged
/// with the contextual version. Outputs `image` and `tag`.
pub struct DockerImageKind;

impl DockerImageKind {
    fn profile(&self, profile: &Profile, path: &ModulePath) -> Result<ImageProfile> {
        decode_table(&profile.rest, path, self.kind(), "profile")
    }

    fn image_ref(&self, module: &PreloadedModule, handle: &EngineHandle) -> Result<(String, String)> {
        let profile = self.profile(&module.profile, &module.path)?;
        let image = super::resolve(&profile.image, handle.context(), &module.path)?;
        Ok((image, handle.version().as_str().to_string()))
    }
}

impl ModuleKind for DockerImageKind {
    fn kind(&self) -> &'static str {
        "image/docker"
    }

    // The build context is the module directory, so the whole tree is
    // staged, not just the config file.
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

    fn as_destroyable(&self) -> Option<&dyn Destroyable> {
        Some(self)
    }
}

impl Runnable for DockerImageKind {
    fn run(&self, module: &PreloadedModule, handle: &mut EngineHandle) -> Result<StepOutput> {
        let profile = self.profile(&module.profile, &module.path)?;
        let (image, tag) = self.image_ref(module, handle)?;

        let mut spec = CommandSpec::new("docker")
            .args(["build", "-t"])
            .arg(format!("{image}:{tag}"))
            .cwd(handle.work_dir());
        if let Some(dockerfile) = &profile.dockerfile {
            spec = spec.args(["-f", dockerfile]);
        }
        if let Some(build_args) = &profile.build_args {
            for (key, value) in build_args {
                let value = super::resolve(value, handle.context(), &module.path)?;
                spec = spec.arg("--build-arg").arg(format!("{key}={value}"));
            }
        }
        spec = spec.arg(".");
        handle.execute_command(&spec)?;

        Ok(StepOutput::from([
            ("image".to_string(), image),
            ("tag".to_string(), tag),
        ]))
    }
}

impl Destroyable for DockerImageKind {
    fn destroy(&self, module: &PreloadedModule, handle: &mut EngineHandle) -> Result<StepOutput> {
        let (image, tag) = self.image_ref(module, handle)?;
        handle.execute_hidden_command(
            &CommandSpec::new("docker").arg("rmi").arg(format!("{image}:{tag}")),
        )?;
        Ok(StepOutput::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_requires_image() {
        let path = ModulePath::new("web/image").unwrap();
        let merged: toml::Value = toml::from_str("dockerfile = 'Dockerfile'").unwrap();
        let profile = Profile::from_merged(merged, &path, "image/docker", false).unwrap();
        let err = DockerImageKind.validate_profile(&profile, &path).unwrap_err();
        assert!(err.to_string().contains("image"));
    }

    #[test]
    fn profile_accepts_build_args() {
        let path = ModulePath::new("web/image").unwrap();
        let merged: toml::Value = toml::from_str(
            r#"
            image = "acme/web"
            build_args = { GIT_BRANCH = "${git.branch}" }
            "#,
        )
        .unwrap();
        let profile = Profile::from_merged(merged, &path, "image/docker", false).unwrap();
        assert!(DockerImageKind.validate_profile(&profile, &path).is_ok());
    }
}
