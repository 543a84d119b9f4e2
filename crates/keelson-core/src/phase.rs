use std::fmt;

/// The server's position in the fixed startup/shutdown sequence.
///
/// Phases only ever move forward, one step at a time. A backward or skipping
/// advance is a kernel bug, not an input error, and panics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Uninitialized,
    CollectingOptions,
    ParsingOptions,
    OptionsSealed,
    Validated,
    AutomaticResolved,
    Ordered,
    Daemonized,
    Prepared,
    PrivilegesDropped,
    Started,
    Stopping,
    Stopped,
}

impl Phase {
    pub fn next(self) -> Option<Phase> {
        match self {
            Phase::Uninitialized => Some(Phase::CollectingOptions),
            Phase::CollectingOptions => Some(Phase::ParsingOptions),
            Phase::ParsingOptions => Some(Phase::OptionsSealed),
            Phase::OptionsSealed => Some(Phase::Validated),
            Phase::Validated => Some(Phase::AutomaticResolved),
            Phase::AutomaticResolved => Some(Phase::Ordered),
            Phase::Ordered => Some(Phase::Daemonized),
            Phase::Daemonized => Some(Phase::Prepared),
            Phase::Prepared => Some(Phase::PrivilegesDropped),
            Phase::PrivilegesDropped => Some(Phase::Started),
            Phase::Started => Some(Phase::Stopping),
            Phase::Stopping => Some(Phase::Stopped),
            Phase::Stopped => None,
        }
    }

    pub(crate) fn advance_to(&mut self, next: Phase) {
        assert_eq!(
            self.next(),
            Some(next),
            "invalid phase transition: {self} -> {next}"
        );
        *self = next;
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Uninitialized => "uninitialized",
            Phase::CollectingOptions => "collecting-options",
            Phase::ParsingOptions => "parsing-options",
            Phase::OptionsSealed => "options-sealed",
            Phase::Validated => "validated",
            Phase::AutomaticResolved => "automatic-resolved",
            Phase::Ordered => "ordered",
            Phase::Daemonized => "daemonized",
            Phase::Prepared => "prepared",
            Phase::PrivilegesDropped => "privileges-dropped",
            Phase::Started => "started",
            Phase::Stopping => "stopping",
            Phase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}
