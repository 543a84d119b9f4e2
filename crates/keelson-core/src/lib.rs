//! Application lifecycle kernel for Keelson daemons.
//!
//! This crate ties pluggable features into one process: the `FeatureRegistry`
//! owns them, the resolver turns their declared dependencies into a single
//! deterministic startup order, and `ApplicationServer` drives the fixed
//! phase sequence (options → prepare → start → wait → stop) over that order,
//! fencing the privileged preparation phase behind a one-way privilege drop
//! and coordinating cooperative shutdown through a condvar-backed signal.

pub mod feature;
pub mod phase;
pub mod privileges;
pub mod registry;
mod resolver;
pub mod server;
pub mod shutdown;

pub use feature::{Feature, FeatureError, FeatureInfo};
pub use phase::Phase;
#[cfg(unix)]
pub use privileges::UnixPrivileges;
pub use privileges::{NoopPrivileges, PrivilegeBroker, PrivilegeGate, PrivilegeState};
pub use registry::{FeatureRef, FeatureRegistry};
pub use server::{ApplicationServer, RunOutcome, ServerContext};
pub use shutdown::{install_signal_handler, ShutdownSignal};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("unknown feature '{0}'")]
    UnknownFeature(String),
    #[error("feature '{0}' is not enabled")]
    FeatureNotEnabled(String),
    #[error("duplicate feature '{0}'")]
    DuplicateFeature(String),
    #[error("feature '{feature}' depends on unknown feature '{dependency}'")]
    MissingDependency { feature: String, dependency: String },
    #[error("enabled feature '{feature}' depends on feature '{dependency}', which is disabled")]
    DisabledDependency { feature: String, dependency: String },
    #[error("features '{0}' and '{1}' have a cyclic start order")]
    DependencyCycle(String, String),
    #[error("privilege invariant violated: {0}")]
    PrivilegeInvariantViolated(&'static str),
    #[error("privilege transition failed: {0}")]
    PrivilegeChange(std::io::Error),
    #[error("feature '{feature}' failed during {hook}: {source}")]
    Lifecycle {
        feature: String,
        hook: &'static str,
        source: FeatureError,
    },
    #[error("options error: {0}")]
    Options(#[from] keelson_options::OptionsError),
}
