use crate::server::ServerContext;
use keelson_options::{OptionRegistry, OptionsError};
use std::collections::BTreeSet;
use thiserror::Error;

/// Error returned from a feature lifecycle hook. The driver wraps it with
/// the feature name and the failing hook before surfacing it.
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl FeatureError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

/// Declarative metadata every feature carries: identity, enablement, and the
/// dependency edges the resolver consumes.
///
/// `starts_after` is an ordering constraint only; names that do not resolve
/// to a registered feature are ignored. `requires` is a hard dependency that
/// the strict resolver pass validates. `enable_with` mirrors another
/// feature's enablement until the graph reaches a fixed point.
#[derive(Debug, Clone)]
pub struct FeatureInfo {
    name: String,
    enabled: bool,
    force_disabled: bool,
    optional: bool,
    starts_after: BTreeSet<String>,
    requires: BTreeSet<String>,
    enable_with: Option<String>,
    needs_elevated_privileges: bool,
}

impl FeatureInfo {
    /// New enabled, non-optional feature metadata. The name must not be
    /// empty; it is the feature's identity within the registry.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        assert!(!name.is_empty(), "feature name must not be empty");
        Self {
            name,
            enabled: true,
            force_disabled: false,
            optional: false,
            starts_after: BTreeSet::new(),
            requires: BTreeSet::new(),
            enable_with: None,
            needs_elevated_privileges: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Constrain this feature to start (and prepare) after `other`.
    pub fn start_after(mut self, other: impl Into<String>) -> Self {
        self.starts_after.insert(other.into());
        self
    }

    /// Require `other` to exist and be enabled whenever this feature is.
    pub fn require(mut self, other: impl Into<String>) -> Self {
        self.requires.insert(other.into());
        self
    }

    /// Mirror the enablement of `other` (follow-enablement).
    pub fn follows(mut self, other: impl Into<String>) -> Self {
        self.enable_with = Some(other.into());
        self
    }

    /// Run this feature's `prepare` hook with elevated privileges.
    pub fn elevated(mut self) -> Self {
        self.needs_elevated_privileges = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn is_required(&self) -> bool {
        !self.optional
    }

    pub fn is_force_disabled(&self) -> bool {
        self.force_disabled
    }

    pub fn starts_after(&self) -> &BTreeSet<String> {
        &self.starts_after
    }

    pub fn requires(&self) -> &BTreeSet<String> {
        &self.requires
    }

    pub fn enable_with(&self) -> Option<&str> {
        self.enable_with.as_deref()
    }

    pub fn needs_elevated_privileges(&self) -> bool {
        self.needs_elevated_privileges
    }

    /// Set enablement. Once force-disabled, a feature can never be
    /// re-enabled; the request is ignored.
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.force_disabled {
            self.enabled = false;
            return;
        }
        self.enabled = enabled;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn force_disable(&mut self) {
        self.force_disabled = true;
        self.enabled = false;
    }
}

/// A pluggable subsystem driven through the fixed lifecycle by the server.
///
/// Every hook has a default no-op implementation, so features override only
/// the phases they participate in. Features must not spawn threads or write
/// persistent state before `start`; privileged file writes belong in
/// `prepare`, which runs behind the privilege gate.
pub trait Feature {
    fn info(&self) -> &FeatureInfo;

    fn info_mut(&mut self) -> &mut FeatureInfo;

    fn name(&self) -> &str {
        self.info().name()
    }

    /// Contribute option schema. Invoked once per enabled feature, in
    /// unspecified order.
    fn collect_options(&mut self, _options: &mut OptionRegistry) -> Result<(), FeatureError> {
        Ok(())
    }

    /// Read parsed option values. Invoked in startup order; a feature may
    /// still disable itself here, before the order is committed.
    fn load_options(
        &mut self,
        _options: &OptionRegistry,
        _cx: &ServerContext<'_>,
    ) -> Result<(), FeatureError> {
        Ok(())
    }

    fn validate_options(&mut self, _options: &OptionRegistry) -> Result<(), FeatureError> {
        Ok(())
    }

    fn daemonize(&mut self, _cx: &ServerContext<'_>) -> Result<(), FeatureError> {
        Ok(())
    }

    fn prepare(&mut self, _cx: &ServerContext<'_>) -> Result<(), FeatureError> {
        Ok(())
    }

    fn start(&mut self, _cx: &ServerContext<'_>) -> Result<(), FeatureError> {
        Ok(())
    }

    fn begin_shutdown(&mut self, _cx: &ServerContext<'_>) -> Result<(), FeatureError> {
        Ok(())
    }

    fn stop(&mut self, _cx: &ServerContext<'_>) -> Result<(), FeatureError> {
        Ok(())
    }
}
