use crate::feature::{Feature, FeatureError};
use crate::phase::Phase;
use crate::privileges::{PrivilegeBroker, PrivilegeGate, PrivilegeGuard};
use crate::registry::FeatureRegistry;
use crate::resolver;
use crate::shutdown::ShutdownSignal;
use crate::ServerError;
use keelson_options::{help_section, parse_args, OptionRegistry, OptionValue, Section};
use std::collections::HashSet;
use std::fmt::Write as _;
use tracing::{error, trace};

/// How a `run` ended. Help and dependency dumps are successful early exits
/// that never touch feature lifecycle hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    HelpPrinted,
    DependenciesDumped,
}

/// Explicit server state handed into feature hooks: the registry, for
/// resolving peers by name, and a clonable shutdown handle. This replaces
/// any process-global access path.
pub struct ServerContext<'a> {
    registry: &'a FeatureRegistry,
    shutdown: &'a ShutdownSignal,
}

impl<'a> ServerContext<'a> {
    pub fn features(&self) -> &'a FeatureRegistry {
        self.registry
    }

    /// Handle features may keep (and hand to their own threads) to observe
    /// or request shutdown.
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_stopping()
    }
}

/// The lifecycle kernel: owns the features, the option registry, the
/// privilege gate and the shutdown signal, and drives the fixed phase
/// sequence over the resolved startup order exactly once per process.
pub struct ApplicationServer {
    registry: FeatureRegistry,
    options: OptionRegistry,
    privileges: PrivilegeGate,
    shutdown: ShutdownSignal,
    phase: Phase,
    ordered: Vec<usize>,
}

impl ApplicationServer {
    pub fn new() -> Self {
        Self {
            registry: FeatureRegistry::new(),
            options: OptionRegistry::new(),
            privileges: PrivilegeGate::default(),
            shutdown: ShutdownSignal::new(),
            phase: Phase::Uninitialized,
            ordered: Vec::new(),
        }
    }

    /// Install the platform broker backing temporary and permanent privilege
    /// transitions. Without one, transitions are tracked but credentials are
    /// left untouched.
    pub fn with_privileges(mut self, broker: Box<dyn PrivilegeBroker>) -> Self {
        self.privileges = PrivilegeGate::new(broker);
        self
    }

    /// Register a feature. The server takes ownership and destroys all
    /// features, in reverse registration order, when it is dropped.
    pub fn add_feature(&mut self, feature: Box<dyn Feature>) -> Result<(), ServerError> {
        self.registry.add(feature)
    }

    pub fn features(&self) -> &FeatureRegistry {
        &self.registry
    }

    pub fn options(&self) -> &OptionRegistry {
        &self.options
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Borrow a hook context outside the driver, e.g. to exercise a single
    /// feature hook from a test.
    pub fn context(&self) -> ServerContext<'_> {
        ServerContext {
            registry: &self.registry,
            shutdown: &self.shutdown,
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.shutdown.is_stopping()
    }

    pub fn disable_features(&self, names: &[&str]) {
        self.registry.disable(names);
    }

    pub fn force_disable_features(&self, names: &[&str]) {
        self.registry.force_disable(names);
    }

    /// Export the sealed configuration, omitting every path in `excludes`.
    pub fn export_options(&self, excludes: &HashSet<String>) -> serde_json::Value {
        self.options.to_structured(excludes)
    }

    /// The committed startup order. Before the strict resolver pass this is
    /// the provisional order used for option loading.
    pub fn ordered_feature_names(&self) -> Vec<String> {
        self.ordered
            .iter()
            .map(|&idx| self.registry.name_at(idx).to_owned())
            .collect()
    }

    /// The `starts_after` graph in DOT notation, one edge per declared
    /// relation, over all features whether enabled or not.
    pub fn dependency_graph_dot(&self) -> String {
        let mut out = String::from("digraph dependencies\n{\n  overlap = false;\n");
        self.registry.apply(false, |feature| {
            let name = feature.info().name().to_owned();
            for before in feature.info().starts_after() {
                let _ = writeln!(out, "  {name} -> {before};");
            }
        });
        out.push_str("}\n");
        out
    }

    /// Drive the whole lifecycle: collect and parse options, resolve the
    /// startup order, prepare under the privilege gate, start, block until
    /// shutdown is requested, and stop everything in reverse order.
    ///
    /// `args` are the command-line arguments without the binary name.
    pub fn run(&mut self, args: &[String]) -> Result<RunOutcome, ServerError> {
        trace!("server::run");

        self.phase.advance_to(Phase::CollectingOptions);
        self.collect_options()?;

        // provisional order, errors suppressed: --help must work even on an
        // inconsistent dependency graph
        self.ordered = resolver::resolve_order(&self.registry, false)?;

        self.phase.advance_to(Phase::ParsingOptions);
        if let Some(section) = help_section(args) {
            print!("{}", self.options.render_help(&section));
            return Ok(RunOutcome::HelpPrinted);
        }
        parse_args(&mut self.options, args)?;

        if self.options.get_bool("dump-dependencies")? {
            print!("{}", self.dependency_graph_dot());
            return Ok(RunOutcome::DependenciesDumped);
        }

        self.load_options()?;

        self.phase.advance_to(Phase::OptionsSealed);
        self.options.seal()?;

        self.phase.advance_to(Phase::Validated);
        self.validate_options()?;

        self.phase.advance_to(Phase::AutomaticResolved);
        resolver::enable_automatic(&self.registry)?;

        self.phase.advance_to(Phase::Ordered);
        self.ordered = resolver::resolve_order(&self.registry, true)?;

        self.phase.advance_to(Phase::Daemonized);
        self.daemonize()?;

        self.phase.advance_to(Phase::Prepared);
        self.prepare()?;

        self.phase.advance_to(Phase::PrivilegesDropped);
        self.privileges.drop_permanently()?;

        self.phase.advance_to(Phase::Started);
        self.start()?;

        trace!("server::wait");
        self.shutdown.wait();

        self.begin_shutdown();
        self.phase.advance_to(Phase::Stopping);

        self.stop();
        self.phase.advance_to(Phase::Stopped);

        Ok(RunOutcome::Completed)
    }

    /// Walk enabled features in reverse startup order calling their
    /// `begin_shutdown` hook, then raise the stopping flag. Idempotent: only
    /// the first call drives the hooks.
    pub fn begin_shutdown(&mut self) {
        if self.shutdown.is_stopping() {
            return;
        }
        trace!("server::begin_shutdown");
        let cx = ServerContext {
            registry: &self.registry,
            shutdown: &self.shutdown,
        };
        for &idx in self.ordered.iter().rev() {
            let mut feature = self.registry.cell(idx).borrow_mut();
            if !feature.info().is_enabled() {
                continue;
            }
            trace!("{}::begin_shutdown", feature.info().name());
            if let Err(e) = feature.begin_shutdown(&cx) {
                error!(
                    "feature '{}' failed during begin_shutdown: {e}",
                    feature.info().name()
                );
            }
        }
        self.shutdown.mark_stopping();
    }

    fn collect_options(&mut self) -> Result<(), ServerError> {
        trace!("server::collect_options");
        self.options
            .add_section(Section::new("", "Global configuration"))?;
        self.options.add_hidden_option(
            "dump-dependencies",
            "dump the feature dependency graph and exit",
            OptionValue::Bool(false),
        )?;

        for idx in 0..self.registry.len() {
            let mut feature = self.registry.cell(idx).borrow_mut();
            if !feature.info().is_enabled() {
                continue;
            }
            trace!("{}::collect_options", feature.info().name());
            feature
                .collect_options(&mut self.options)
                .map_err(|e| lifecycle_error(feature.info().name(), "collect_options", e))?;
        }
        Ok(())
    }

    fn load_options(&self) -> Result<(), ServerError> {
        trace!("server::load_options");
        let cx = ServerContext {
            registry: &self.registry,
            shutdown: &self.shutdown,
        };
        for &idx in &self.ordered {
            let mut feature = self.registry.cell(idx).borrow_mut();
            if !feature.info().is_enabled() {
                continue;
            }
            trace!("{}::load_options", feature.info().name());
            feature
                .load_options(&self.options, &cx)
                .map_err(|e| lifecycle_error(feature.info().name(), "load_options", e))?;
        }
        Ok(())
    }

    fn validate_options(&self) -> Result<(), ServerError> {
        trace!("server::validate_options");
        for &idx in &self.ordered {
            let mut feature = self.registry.cell(idx).borrow_mut();
            if !feature.info().is_enabled() {
                continue;
            }
            trace!("{}::validate_options", feature.info().name());
            feature
                .validate_options(&self.options)
                .map_err(|e| lifecycle_error(feature.info().name(), "validate_options", e))?;
        }
        Ok(())
    }

    fn daemonize(&self) -> Result<(), ServerError> {
        trace!("server::daemonize");
        let cx = ServerContext {
            registry: &self.registry,
            shutdown: &self.shutdown,
        };
        for &idx in &self.ordered {
            let mut feature = self.registry.cell(idx).borrow_mut();
            if !feature.info().is_enabled() {
                continue;
            }
            feature
                .daemonize(&cx)
                .map_err(|e| lifecycle_error(feature.info().name(), "daemonize", e))?;
        }
        Ok(())
    }

    /// The privileged boundary. Each enabled feature's `prepare` runs with
    /// the privilege level it declared; on failure the guard restores the
    /// level that held before this feature and the error is re-raised.
    fn prepare(&mut self) -> Result<(), ServerError> {
        trace!("server::prepare");
        let cx = ServerContext {
            registry: &self.registry,
            shutdown: &self.shutdown,
        };
        for &idx in &self.ordered {
            let mut feature = self.registry.cell(idx).borrow_mut();
            if !feature.info().is_enabled() {
                continue;
            }

            let was_elevated = self.privileges.is_elevated();
            if feature.info().needs_elevated_privileges() {
                self.privileges.raise_temporarily()?;
            } else {
                self.privileges.drop_temporarily()?;
            }

            trace!("{}::prepare", feature.info().name());
            let guard = PrivilegeGuard::new(&mut self.privileges, was_elevated);
            match feature.prepare(&cx) {
                Ok(()) => guard.disarm(),
                Err(e) => {
                    let name = feature.info().name().to_owned();
                    drop(guard);
                    return Err(lifecycle_error(&name, "prepare", e));
                }
            }
        }
        Ok(())
    }

    fn start(&self) -> Result<(), ServerError> {
        trace!("server::start");
        let cx = ServerContext {
            registry: &self.registry,
            shutdown: &self.shutdown,
        };
        for &idx in &self.ordered {
            let mut feature = self.registry.cell(idx).borrow_mut();
            trace!("{}::start", feature.info().name());
            feature
                .start(&cx)
                .map_err(|e| lifecycle_error(feature.info().name(), "start", e))?;
        }
        Ok(())
    }

    /// Reverse teardown. Failures are logged but never interrupt the walk:
    /// every feature is stopped exactly once.
    fn stop(&mut self) {
        trace!("server::stop");
        let cx = ServerContext {
            registry: &self.registry,
            shutdown: &self.shutdown,
        };
        for &idx in self.ordered.iter().rev() {
            let mut feature = self.registry.cell(idx).borrow_mut();
            trace!("{}::stop", feature.info().name());
            if let Err(e) = feature.stop(&cx) {
                error!("feature '{}' failed during stop: {e}", feature.info().name());
            }
        }
    }
}

impl Default for ApplicationServer {
    fn default() -> Self {
        Self::new()
    }
}

fn lifecycle_error(feature: &str, hook: &'static str, source: FeatureError) -> ServerError {
    ServerError::Lifecycle {
        feature: feature.to_owned(),
        hook,
        source,
    }
}
