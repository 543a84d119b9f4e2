//! End-to-end lifecycle tests driving `ApplicationServer` with probe
//! features that record every hook invocation.

use keelson_core::{
    ApplicationServer, Feature, FeatureError, FeatureInfo, Phase, PrivilegeBroker, RunOutcome,
    ServerContext, ServerError,
};
use keelson_options::{OptionRegistry, OptionValue, Section};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

type EventLog = Arc<Mutex<Vec<String>>>;

fn new_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

fn events(log: &EventLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn events_with(log: &EventLog, needle: &str) -> Vec<String> {
    events(log)
        .into_iter()
        .filter(|e| e.contains(needle))
        .collect()
}

/// Records every hook call; requests shutdown from `start` so a full run
/// completes without an external thread.
struct Probe {
    info: FeatureInfo,
    log: EventLog,
    fail_in: Option<&'static str>,
    disable_on_load: bool,
    peer_check: Option<&'static str>,
}

impl Probe {
    fn new(info: FeatureInfo, log: &EventLog) -> Probe {
        Probe {
            info,
            log: Arc::clone(log),
            fail_in: None,
            disable_on_load: false,
            peer_check: None,
        }
    }

    fn hook(&self, name: &'static str) -> Result<(), FeatureError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("{}::{}", self.info.name(), name));
        if self.fail_in == Some(name) {
            return Err(FeatureError::msg(format!("injected {name} failure")));
        }
        Ok(())
    }
}

impl Feature for Probe {
    fn info(&self) -> &FeatureInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut FeatureInfo {
        &mut self.info
    }

    fn collect_options(&mut self, _options: &mut OptionRegistry) -> Result<(), FeatureError> {
        self.hook("collect_options")
    }

    fn load_options(
        &mut self,
        _options: &OptionRegistry,
        _cx: &ServerContext<'_>,
    ) -> Result<(), FeatureError> {
        self.hook("load_options")?;
        if self.disable_on_load {
            self.info.disable();
        }
        Ok(())
    }

    fn validate_options(&mut self, _options: &OptionRegistry) -> Result<(), FeatureError> {
        self.hook("validate_options")
    }

    fn daemonize(&mut self, _cx: &ServerContext<'_>) -> Result<(), FeatureError> {
        self.hook("daemonize")
    }

    fn prepare(&mut self, _cx: &ServerContext<'_>) -> Result<(), FeatureError> {
        self.hook("prepare")
    }

    fn start(&mut self, cx: &ServerContext<'_>) -> Result<(), FeatureError> {
        self.hook("start")?;
        if let Some(peer) = self.peer_check {
            cx.features()
                .lookup_enabled(peer)
                .map_err(|e| FeatureError::msg(e.to_string()))?;
        }
        cx.shutdown_signal().request();
        Ok(())
    }

    fn begin_shutdown(&mut self, _cx: &ServerContext<'_>) -> Result<(), FeatureError> {
        self.hook("begin_shutdown")
    }

    fn stop(&mut self, _cx: &ServerContext<'_>) -> Result<(), FeatureError> {
        self.hook("stop")
    }
}

/// Privilege broker sharing the probes' event log, so privilege transitions
/// interleave with hook invocations in one trace.
struct SharedBroker {
    log: EventLog,
}

impl PrivilegeBroker for SharedBroker {
    fn lower(&mut self) -> Result<(), ServerError> {
        self.log.lock().unwrap().push("privileges::lower".to_owned());
        Ok(())
    }

    fn restore(&mut self) -> Result<(), ServerError> {
        self.log
            .lock()
            .unwrap()
            .push("privileges::restore".to_owned());
        Ok(())
    }

    fn lower_permanently(&mut self) -> Result<(), ServerError> {
        self.log
            .lock()
            .unwrap()
            .push("privileges::permanent".to_owned());
        Ok(())
    }
}

fn no_args() -> Vec<String> {
    Vec::new()
}

#[test]
fn start_runs_in_dependency_order_and_stop_in_reverse() {
    let log = new_log();
    let mut server = ApplicationServer::new();
    server
        .add_feature(Box::new(Probe::new(FeatureInfo::new("a"), &log)))
        .unwrap();
    server
        .add_feature(Box::new(Probe::new(
            FeatureInfo::new("b").start_after("a"),
            &log,
        )))
        .unwrap();

    let outcome = server.run(&no_args()).unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(server.phase(), Phase::Stopped);
    assert_eq!(server.ordered_feature_names(), vec!["a", "b"]);

    assert_eq!(events_with(&log, "::start"), vec!["a::start", "b::start"]);
    assert_eq!(events_with(&log, "::stop"), vec!["b::stop", "a::stop"]);
    assert_eq!(
        events_with(&log, "::begin_shutdown"),
        vec!["b::begin_shutdown", "a::begin_shutdown"]
    );

    // shutdown preamble runs before any stop hook
    let all = events(&log);
    let first_begin = all.iter().position(|e| e.ends_with("begin_shutdown"));
    let first_stop = all.iter().position(|e| e.ends_with("::stop"));
    assert!(first_begin.unwrap() < first_stop.unwrap());
}

#[test]
fn registration_order_does_not_leak_into_start_order() {
    let log = new_log();
    let mut server = ApplicationServer::new();
    server
        .add_feature(Box::new(Probe::new(
            FeatureInfo::new("b").start_after("a"),
            &log,
        )))
        .unwrap();
    server
        .add_feature(Box::new(Probe::new(FeatureInfo::new("a"), &log)))
        .unwrap();

    server.run(&no_args()).unwrap();
    assert_eq!(server.ordered_feature_names(), vec!["a", "b"]);
    assert_eq!(events_with(&log, "::start"), vec!["a::start", "b::start"]);
}

#[test]
fn disabled_requirement_fails_before_any_preparation() {
    let log = new_log();
    let mut server = ApplicationServer::new();
    server
        .add_feature(Box::new(Probe::new(FeatureInfo::new("a"), &log)))
        .unwrap();
    server
        .add_feature(Box::new(Probe::new(FeatureInfo::new("b").disabled(), &log)))
        .unwrap();
    server
        .add_feature(Box::new(Probe::new(
            FeatureInfo::new("c").require("b"),
            &log,
        )))
        .unwrap();

    let err = server.run(&no_args()).unwrap_err();
    match err {
        ServerError::DisabledDependency {
            feature,
            dependency,
        } => {
            assert_eq!(feature, "c");
            assert_eq!(dependency, "b");
        }
        other => panic!("expected DisabledDependency, got: {other}"),
    }
    assert!(events_with(&log, "::daemonize").is_empty());
    assert!(events_with(&log, "::prepare").is_empty());
    assert!(events_with(&log, "::start").is_empty());
}

#[test]
fn missing_requirement_is_fatal() {
    let log = new_log();
    let mut server = ApplicationServer::new();
    server
        .add_feature(Box::new(Probe::new(
            FeatureInfo::new("a").require("ghost"),
            &log,
        )))
        .unwrap();

    assert!(matches!(
        server.run(&no_args()).unwrap_err(),
        ServerError::MissingDependency { feature, dependency }
            if feature == "a" && dependency == "ghost"
    ));
}

#[test]
fn follow_enablement_disables_the_follower() {
    let log = new_log();
    let mut server = ApplicationServer::new();
    server
        .add_feature(Box::new(Probe::new(FeatureInfo::new("a").disabled(), &log)))
        .unwrap();
    server
        .add_feature(Box::new(Probe::new(FeatureInfo::new("b").follows("a"), &log)))
        .unwrap();

    // nothing will be enabled, so no probe can request shutdown from start;
    // latch the request up front so the wait phase falls through
    server.shutdown_signal().request();
    let outcome = server.run(&no_args()).unwrap();
    assert_eq!(outcome, RunOutcome::Completed);
    assert!(server.ordered_feature_names().is_empty());
    assert!(!server.features().is_enabled("b").unwrap());
    assert!(events_with(&log, "::start").is_empty());
}

#[test]
fn force_disable_wins_over_follow_enablement() {
    let log = new_log();
    let mut server = ApplicationServer::new();
    server
        .add_feature(Box::new(Probe::new(FeatureInfo::new("a"), &log)))
        .unwrap();
    server
        .add_feature(Box::new(Probe::new(FeatureInfo::new("b").follows("a"), &log)))
        .unwrap();
    server.force_disable_features(&["b"]);

    server.run(&no_args()).unwrap();
    assert!(server.features().is_enabled("a").unwrap());
    assert!(!server.features().is_enabled("b").unwrap());
    assert_eq!(events_with(&log, "::start"), vec!["a::start"]);
}

#[test]
fn privilege_trace_follows_feature_declarations() {
    let log = new_log();
    let mut server = ApplicationServer::new().with_privileges(Box::new(SharedBroker {
        log: Arc::clone(&log),
    }));
    server
        .add_feature(Box::new(Probe::new(
            FeatureInfo::new("a").elevated(),
            &log,
        )))
        .unwrap();
    server
        .add_feature(Box::new(Probe::new(
            FeatureInfo::new("b").start_after("a"),
            &log,
        )))
        .unwrap();

    server.run(&no_args()).unwrap();

    let trace: Vec<String> = events(&log)
        .into_iter()
        .filter(|e| e.ends_with("::prepare") || e.starts_with("privileges::"))
        .collect();
    assert_eq!(
        trace,
        vec![
            "a::prepare",
            "privileges::lower",
            "b::prepare",
            "privileges::permanent",
        ]
    );
}

#[test]
fn prepare_failure_restores_privileges_before_surfacing() {
    let log = new_log();
    let mut server = ApplicationServer::new().with_privileges(Box::new(SharedBroker {
        log: Arc::clone(&log),
    }));
    server
        .add_feature(Box::new(Probe {
            fail_in: Some("prepare"),
            ..Probe::new(FeatureInfo::new("a"), &log)
        }))
        .unwrap();

    let err = server.run(&no_args()).unwrap_err();
    assert!(matches!(
        err,
        ServerError::Lifecycle { ref feature, hook: "prepare", .. } if feature == "a"
    ));

    let trace: Vec<String> = events(&log)
        .into_iter()
        .filter(|e| e.ends_with("::prepare") || e.starts_with("privileges::"))
        .collect();
    assert_eq!(
        trace,
        vec!["privileges::lower", "a::prepare", "privileges::restore"]
    );
    assert!(events_with(&log, "::start").is_empty());
}

#[test]
fn dump_dependencies_skips_the_lifecycle() {
    let log = new_log();
    let mut server = ApplicationServer::new();
    server
        .add_feature(Box::new(Probe::new(FeatureInfo::new("a"), &log)))
        .unwrap();
    server
        .add_feature(Box::new(Probe::new(
            FeatureInfo::new("b").start_after("a"),
            &log,
        )))
        .unwrap();

    let outcome = server
        .run(&["--dump-dependencies".to_owned()])
        .unwrap();
    assert_eq!(outcome, RunOutcome::DependenciesDumped);

    let dot = server.dependency_graph_dot();
    assert_eq!(dot.matches("b -> a;").count(), 1);
    assert_eq!(dot.matches("->").count(), 1);

    for hook in ["load_options", "daemonize", "prepare", "start", "stop"] {
        assert!(
            events_with(&log, hook).is_empty(),
            "dump must not reach {hook}"
        );
    }
}

#[test]
fn help_prints_and_exits_before_loading_options() {
    let log = new_log();
    let mut server = ApplicationServer::new();
    server
        .add_feature(Box::new(Probe::new(FeatureInfo::new("a"), &log)))
        .unwrap();

    let outcome = server.run(&["--help".to_owned()]).unwrap();
    assert_eq!(outcome, RunOutcome::HelpPrinted);
    assert!(events_with(&log, "load_options").is_empty());
    assert!(events_with(&log, "::start").is_empty());
}

#[test]
fn identical_registries_produce_identical_order_and_dump() {
    let build = || {
        let log = new_log();
        let mut server = ApplicationServer::new();
        for info in [
            FeatureInfo::new("d").start_after("b").start_after("c"),
            FeatureInfo::new("c").start_after("a"),
            FeatureInfo::new("b").start_after("a"),
            FeatureInfo::new("a"),
        ] {
            server.add_feature(Box::new(Probe::new(info, &log))).unwrap();
        }
        server.run(&no_args()).unwrap();
        server
    };

    let s1 = build();
    let s2 = build();
    assert_eq!(s1.ordered_feature_names(), s2.ordered_feature_names());
    assert_eq!(s1.dependency_graph_dot(), s2.dependency_graph_dot());
}

#[test]
fn starts_after_cycle_is_fatal_in_the_strict_pass() {
    let log = new_log();
    let mut server = ApplicationServer::new();
    server
        .add_feature(Box::new(Probe::new(
            FeatureInfo::new("a").start_after("b"),
            &log,
        )))
        .unwrap();
    server
        .add_feature(Box::new(Probe::new(
            FeatureInfo::new("b").start_after("a"),
            &log,
        )))
        .unwrap();

    assert!(matches!(
        server.run(&no_args()).unwrap_err(),
        ServerError::DependencyCycle(_, _)
    ));
    assert!(events_with(&log, "::daemonize").is_empty());
}

#[test]
fn features_resolve_peers_through_the_context() {
    let log = new_log();
    let mut server = ApplicationServer::new();
    server
        .add_feature(Box::new(Probe::new(FeatureInfo::new("a"), &log)))
        .unwrap();
    server
        .add_feature(Box::new(Probe {
            peer_check: Some("a"),
            ..Probe::new(FeatureInfo::new("b").start_after("a"), &log)
        }))
        .unwrap();

    assert_eq!(server.run(&no_args()).unwrap(), RunOutcome::Completed);
}

#[test]
fn a_feature_may_disable_itself_while_loading_options() {
    let log = new_log();
    let mut server = ApplicationServer::new();
    server
        .add_feature(Box::new(Probe::new(FeatureInfo::new("a"), &log)))
        .unwrap();
    server
        .add_feature(Box::new(Probe {
            disable_on_load: true,
            ..Probe::new(FeatureInfo::new("b"), &log)
        }))
        .unwrap();

    server.run(&no_args()).unwrap();
    assert_eq!(events_with(&log, "::load_options").len(), 2);
    assert_eq!(events_with(&log, "::start"), vec!["a::start"]);
    assert_eq!(server.ordered_feature_names(), vec!["a"]);
}

#[test]
fn begin_shutdown_is_idempotent_after_a_run() {
    let log = new_log();
    let mut server = ApplicationServer::new();
    server
        .add_feature(Box::new(Probe::new(FeatureInfo::new("a"), &log)))
        .unwrap();

    server.run(&no_args()).unwrap();
    let count = events_with(&log, "::begin_shutdown").len();
    assert_eq!(count, 1);

    server.begin_shutdown();
    server.begin_shutdown();
    assert_eq!(events_with(&log, "::begin_shutdown").len(), count);
}

/// A feature that actually registers and reads options, for the structured
/// export round-trip.
struct ConfigProbe {
    info: FeatureInfo,
    value: String,
}

impl Feature for ConfigProbe {
    fn info(&self) -> &FeatureInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut FeatureInfo {
        &mut self.info
    }

    fn collect_options(&mut self, options: &mut OptionRegistry) -> Result<(), FeatureError> {
        options.add_section(Section::new("demo", "demonstration options"))?;
        options.add_option(
            "demo.value",
            "an ordinary option",
            OptionValue::String("default".to_owned()),
        )?;
        options.add_option(
            "demo.secret",
            "an option excluded from exports",
            OptionValue::String("hush".to_owned()),
        )?;
        Ok(())
    }

    fn load_options(
        &mut self,
        options: &OptionRegistry,
        _cx: &ServerContext<'_>,
    ) -> Result<(), FeatureError> {
        self.value = options.get_string("demo.value")?;
        Ok(())
    }

    fn start(&mut self, cx: &ServerContext<'_>) -> Result<(), FeatureError> {
        cx.shutdown_signal().request();
        Ok(())
    }
}

#[test]
fn structured_export_honors_exclusions_after_sealing() {
    let mut server = ApplicationServer::new();
    server
        .add_feature(Box::new(ConfigProbe {
            info: FeatureInfo::new("demo"),
            value: String::new(),
        }))
        .unwrap();

    server
        .run(&["--demo.value".to_owned(), "configured".to_owned()])
        .unwrap();
    assert!(server.options().is_sealed());

    let excludes: HashSet<String> = ["demo.secret".to_owned()].into();
    let exported = server.export_options(&excludes);
    assert_eq!(exported["demo"]["value"], serde_json::json!("configured"));
    assert!(exported["demo"].get("secret").is_none());

    let full = server.export_options(&HashSet::new());
    assert_eq!(full["demo"]["secret"], serde_json::json!("hush"));
}

#[test]
fn parse_failure_surfaces_as_an_options_error() {
    let log = new_log();
    let mut server = ApplicationServer::new();
    server
        .add_feature(Box::new(Probe::new(FeatureInfo::new("a"), &log)))
        .unwrap();

    let err = server
        .run(&["--no.such-option".to_owned(), "1".to_owned()])
        .unwrap_err();
    assert!(matches!(err, ServerError::Options(_)));
    assert!(events_with(&log, "load_options").is_empty());
}
