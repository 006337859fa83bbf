//! The two-phase module engine: preload (load + validate the dependency
//! graph) and execute (walk it in dependency order).

pub mod execute;
pub mod handle;
pub mod preload;
pub mod registry;

pub use execute::{execute_config, DeferredRun, EngineSession, ExecutionKind};
pub use handle::{DeferredHandle, EngineHandle};
pub use preload::{preload_config, PreloadedDependency, PreloadedModule};
pub use registry::{KindRegistry, ModuleKind, StepOutput, MAIN_SERVICE_KIND};

use crate::context::InterpolationError;
use crate::ident::{IdentError, ModulePath, ProfileName};
use std::io;
use std::path::PathBuf;

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine error taxonomy: configuration errors, schema validation errors,
/// and execution errors. All of them abort the current graph walk; there is
/// no retry anywhere in the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // -- config loading ------------------------------------------------------
    #[error("failed to read module config {file}: {source}")]
    ConfigRead {
        file: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse module config {file}: {source}")]
    ConfigParse {
        file: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("invalid identifier in module {path}: {source}")]
    Ident {
        path: ModulePath,
        #[source]
        source: IdentError,
    },

    // -- configuration errors ------------------------------------------------
    #[error("module {path} has no profile matching {profile:?}")]
    NoMatchingProfile {
        path: ModulePath,
        profile: ProfileName,
    },

    #[error("profile {name:?} not found in module {path}")]
    ProfileNotFound { path: ModulePath, name: String },

    #[error("profile inheritance cycle in module {path}: {name:?} was already visited")]
    ProfileCycle { path: ModulePath, name: String },

    #[error("dependency cycle: module {path} already appears in the chain {chain}")]
    DependencyCycle { path: ModulePath, chain: String },

    #[error("no implementation registered for module kind {kind:?} (module {path})")]
    UnknownKind { path: ModulePath, kind: String },

    #[error("a module kind implementation for {kind:?} is already registered")]
    DuplicateKind { kind: String },

    #[error("main service module {path} may not be used as a dependency")]
    MainServiceAsDependency { path: ModulePath },

    #[error("root module {path} must have kind \"service/main\", found {kind:?}")]
    RootKindMismatch { path: ModulePath, kind: String },

    #[error("expected root module {path} to set a version")]
    MissingRootVersion { path: ModulePath },

    #[error("missing required parameter {param:?} for module {path}")]
    MissingParam { path: ModulePath, param: String },

    // -- schema validation ---------------------------------------------------
    #[error("invalid {what} for module {path} (kind {kind:?}): {detail}")]
    Validation {
        path: ModulePath,
        kind: String,
        what: &'static str,
        detail: String,
    },

    // -- execution errors ----------------------------------------------------
    #[error("in module {path}: {source}")]
    Interpolation {
        path: ModulePath,
        #[source]
        source: InterpolationError,
    },

    #[error("failed to spawn command `{argv}`: {source}")]
    CommandSpawn {
        argv: String,
        #[source]
        source: io::Error,
    },

    #[error("command `{argv}` failed with status {status}: {stderr}")]
    CommandFailed {
        argv: String,
        status: i32,
        stderr: String,
    },

    #[error("staging failed for {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("tmp files session error: {0}")]
    Session(String),

    #[error("execution kind {0:?} is not implemented")]
    UnimplementedExecution(&'static str),
}

impl EngineError {
    /// Attach a module path to a validation failure coming out of a typed
    /// decode.
    pub fn validation(
        path: &ModulePath,
        kind: &str,
        what: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self::Validation {
            path: path.clone(),
            kind: kind.to_string(),
            what,
            detail: detail.into(),
        }
    }

    pub fn interpolation(path: &ModulePath, source: InterpolationError) -> Self {
        Self::Interpolation {
            path: path.clone(),
            source,
        }
    }
}
