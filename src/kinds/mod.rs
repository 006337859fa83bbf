//! Built-in module kind implementations.
//!
//! Every kind shells out through the engine handle's command execution so
//! tests can drive the whole graph with a fake runner. Kind-specific profile
//! fields are declared as typed schemas with `deny_unknown_fields` and
//! decoded from the merged profile's remainder table.

mod docker_image;
mod helm_chart;
mod helm_release;
mod port_forward;
mod service_main;
mod shell;

use crate::context::{InterpolatedString, ScopeTree};
use crate::engine::registry::ModuleKind;
use crate::engine::{EngineError, Result};
use crate::ident::ModulePath;
use std::sync::Arc;

pub use docker_image::DockerImageKind;
pub use helm_chart::HelmChartKind;
pub use helm_release::HelmReleaseKind;
pub use port_forward::PortForwardKind;
pub use service_main::ServiceMainKind;
pub use shell::ShellStepKind;

/// All kinds shipped with the binary.
pub fn builtin() -> Vec<Arc<dyn ModuleKind>> {
    vec![
        Arc::new(ServiceMainKind),
        Arc::new(DockerImageKind),
        Arc::new(HelmChartKind),
        Arc::new(HelmReleaseKind),
        Arc::new(ShellStepKind),
        Arc::new(PortForwardKind),
    ]
}

/// Resolve an interpolated profile value, attaching the module path to any
/// failure.
fn resolve(value: &InterpolatedString, ctx: &ScopeTree, path: &ModulePath) -> Result<String> {
    value
        .resolve(ctx)
        .map_err(|e| EngineError::interpolation(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::KindRegistry;

    #[test]
    fn builtin_kinds_register_cleanly() {
        let registry = KindRegistry::builtin().unwrap();
        for kind in [
            "service/main",
            "image/docker",
            "chart/helm",
            "step/helm-release",
            "step/shell",
            "step/port-forward",
        ] {
            assert!(registry.get(kind).is_some(), "missing builtin kind {kind}");
        }
    }
}
