use crate::ServerError;
use tracing::{error, trace};

/// Where the process stands relative to its starting (elevated) credentials.
/// `PermanentlyDropped` is terminal: no later raise or drop is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivilegeState {
    Elevated,
    TemporarilyDropped,
    PermanentlyDropped,
}

/// Platform mechanics behind the privilege gate. The gate owns the state
/// machine; brokers only flip credentials. All hooks default to no-ops so a
/// process that never runs elevated needs no broker of its own.
pub trait PrivilegeBroker: Send {
    /// Drop effective credentials, reversibly.
    fn lower(&mut self) -> Result<(), ServerError> {
        Ok(())
    }

    /// Restore the original effective credentials.
    fn restore(&mut self) -> Result<(), ServerError> {
        Ok(())
    }

    /// Drop real and effective credentials, irreversibly.
    fn lower_permanently(&mut self) -> Result<(), ServerError> {
        Ok(())
    }
}

/// Broker for processes that never hold elevated credentials.
#[derive(Debug, Default)]
pub struct NoopPrivileges;

impl PrivilegeBroker for NoopPrivileges {}

/// Unix broker: temporary transitions via the effective uid/gid, the
/// permanent drop via the real ones.
#[cfg(unix)]
pub struct UnixPrivileges {
    uid: libc::uid_t,
    gid: libc::gid_t,
    original_uid: libc::uid_t,
    original_gid: libc::gid_t,
}

#[cfg(unix)]
impl UnixPrivileges {
    /// Broker that lowers to the given uid/gid and restores to the
    /// credentials in effect at construction time.
    pub fn drop_to(uid: u32, gid: u32) -> Self {
        // SAFETY: geteuid/getegid cannot fail.
        #[allow(unsafe_code)]
        let (original_uid, original_gid) = unsafe { (libc::geteuid(), libc::getegid()) };
        Self {
            uid,
            gid,
            original_uid,
            original_gid,
        }
    }

    fn os_error() -> ServerError {
        ServerError::PrivilegeChange(std::io::Error::last_os_error())
    }
}

#[cfg(unix)]
impl PrivilegeBroker for UnixPrivileges {
    fn lower(&mut self) -> Result<(), ServerError> {
        // group first, while the uid still permits it
        // SAFETY: setegid/seteuid with valid ids; failure is reported via errno.
        #[allow(unsafe_code)]
        if unsafe { libc::setegid(self.gid) } != 0 {
            return Err(Self::os_error());
        }
        #[allow(unsafe_code)]
        if unsafe { libc::seteuid(self.uid) } != 0 {
            return Err(Self::os_error());
        }
        Ok(())
    }

    fn restore(&mut self) -> Result<(), ServerError> {
        // uid first, to regain the right to change the gid
        // SAFETY: as in lower().
        #[allow(unsafe_code)]
        if unsafe { libc::seteuid(self.original_uid) } != 0 {
            return Err(Self::os_error());
        }
        #[allow(unsafe_code)]
        if unsafe { libc::setegid(self.original_gid) } != 0 {
            return Err(Self::os_error());
        }
        Ok(())
    }

    fn lower_permanently(&mut self) -> Result<(), ServerError> {
        // SAFETY: setgid/setuid with valid ids; failure is reported via errno.
        #[allow(unsafe_code)]
        if unsafe { libc::setgid(self.gid) } != 0 {
            return Err(Self::os_error());
        }
        #[allow(unsafe_code)]
        if unsafe { libc::setuid(self.uid) } != 0 {
            return Err(Self::os_error());
        }
        Ok(())
    }
}

/// The tri-state privilege machine guarding the prepare phase.
///
/// Temporary transitions are idempotent (raising while elevated or dropping
/// while dropped does nothing); after the permanent drop, any further
/// transition attempt is an invariant violation.
pub struct PrivilegeGate {
    state: PrivilegeState,
    broker: Box<dyn PrivilegeBroker>,
}

impl PrivilegeGate {
    pub fn new(broker: Box<dyn PrivilegeBroker>) -> Self {
        Self {
            state: PrivilegeState::Elevated,
            broker,
        }
    }

    pub fn state(&self) -> PrivilegeState {
        self.state
    }

    pub fn is_elevated(&self) -> bool {
        self.state == PrivilegeState::Elevated
    }

    pub fn drop_temporarily(&mut self) -> Result<(), ServerError> {
        match self.state {
            PrivilegeState::PermanentlyDropped => Err(ServerError::PrivilegeInvariantViolated(
                "must not drop privileges after dropping them permanently",
            )),
            PrivilegeState::TemporarilyDropped => Ok(()),
            PrivilegeState::Elevated => {
                trace!("dropping privileges temporarily");
                self.broker.lower()?;
                self.state = PrivilegeState::TemporarilyDropped;
                Ok(())
            }
        }
    }

    pub fn raise_temporarily(&mut self) -> Result<(), ServerError> {
        match self.state {
            PrivilegeState::PermanentlyDropped => Err(ServerError::PrivilegeInvariantViolated(
                "must not raise privileges after dropping them permanently",
            )),
            PrivilegeState::Elevated => Ok(()),
            PrivilegeState::TemporarilyDropped => {
                trace!("raising privileges");
                self.broker.restore()?;
                self.state = PrivilegeState::Elevated;
                Ok(())
            }
        }
    }

    pub fn drop_permanently(&mut self) -> Result<(), ServerError> {
        if self.state == PrivilegeState::PermanentlyDropped {
            return Err(ServerError::PrivilegeInvariantViolated(
                "privileges were already dropped permanently",
            ));
        }
        trace!("dropping privileges permanently");
        self.broker.lower_permanently()?;
        self.state = PrivilegeState::PermanentlyDropped;
        Ok(())
    }
}

impl Default for PrivilegeGate {
    fn default() -> Self {
        Self::new(Box::new(NoopPrivileges))
    }
}

/// Scoped restore for the prepare loop: unless disarmed, dropping the guard
/// returns the gate to the state that held before the current feature's
/// privilege adjustment.
pub(crate) struct PrivilegeGuard<'a> {
    gate: &'a mut PrivilegeGate,
    was_elevated: bool,
    armed: bool,
}

impl<'a> PrivilegeGuard<'a> {
    pub(crate) fn new(gate: &'a mut PrivilegeGate, was_elevated: bool) -> Self {
        Self {
            gate,
            was_elevated,
            armed: true,
        }
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PrivilegeGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let restored = if self.was_elevated {
            self.gate.raise_temporarily()
        } else {
            self.gate.drop_temporarily()
        };
        if let Err(e) = restored {
            error!("failed to restore privilege state: {e}");
        }
    }
}
