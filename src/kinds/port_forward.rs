//! Kubernetes port-forward proxy, run after the main graph walk.

use crate::config::{decode_table, LoadedModule, Profile};
use crate::context::InterpolatedString;
use crate::engine::handle::DeferredHandle;
use crate::engine::preload::PreloadedModule;
use crate::engine::registry::{Deferrable, ModuleKind};
use crate::engine::Result;
use crate::ident::ModulePath;
use crate::runner::CommandSpec;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PortForwardProfile {
    /// Forward target, e.g. `svc/web` or `pod/web-0`.
    target: InterpolatedString,
    /// Port mapping, e.g. `8080:80`.
    ports: InterpolatedString,
    namespace: Option<InterpolatedString>,
}

/// `step/port-forward`: contributes nothing to the synchronous walk; after
/// the graph finishes it spawns `kubectl port-forward` as a long-lived
/// child and registers a cancel hook that kills it.
pub struct PortForwardKind;

impl PortForwardKind {
    fn profile(&self, profile: &Profile, path: &ModulePath) -> Result<PortForwardProfile> {
        decode_table(&profile.rest, path, self.kind(), "profile")
    }
}

impl ModuleKind for PortForwardKind {
    fn kind(&self) -> &'static str {
        "step/port-forward"
    }

    fn validate_module(&self, _module: &LoadedModule) -> Result<()> {
        Ok(())
    }

    fn validate_profile(&self, profile: &Profile, path: &ModulePath) -> Result<()> {
        self.profile(profile, path)?;
        Ok(())
    }

    fn as_deferrable(&self) -> Option<&dyn Deferrable> {
        Some(self)
    }
}

impl Deferrable for PortForwardKind {
    fn run_deferred(&self, module: &PreloadedModule, handle: &mut DeferredHandle) -> Result<()> {
        let profile = self.profile(&module.profile, &module.path)?;
        let ctx = handle.context();
        let target = super::resolve(&profile.target, ctx, &module.path)?;
        let ports = super::resolve(&profile.ports, ctx, &module.path)?;
        let namespace = match &profile.namespace {
            Some(namespace) => Some(super::resolve(namespace, ctx, &module.path)?),
            None => None,
        };

        let mut spec =
            CommandSpec::new("kubectl").args(["port-forward", target.as_str(), ports.as_str()]);
        if let Some(namespace) = &namespace {
            spec = spec.args(["--namespace", namespace.as_str()]);
        }
        log::info!("forwarding {target} {ports} for {}", module.path);
        let child = handle.runner().run_piped(&spec)?;

        handle.register_cancel(move || {
            let mut child = child;
            if let Err(e) = child.kill() {
                log::warn!("could not stop port-forward: {e}");
            }
            let _ = child.wait();
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_requires_target_and_ports() {
        let path = ModulePath::new("steps/pf").unwrap();
        let merged: toml::Value = toml::from_str("target = 'svc/web'").unwrap();
        let profile = Profile::from_merged(merged, &path, "step/port-forward", false).unwrap();
        assert!(PortForwardKind.validate_profile(&profile, &path).is_err());
    }

    #[test]
    fn kind_is_deferred_only() {
        assert!(PortForwardKind.as_runnable().is_none());
        assert!(PortForwardKind.as_destroyable().is_none());
        assert!(PortForwardKind.as_deferrable().is_some());
    }
}
