use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use tracing::trace;

/// Process-wide shutdown coordination.
///
/// Two latched bits behind one condvar: `requested` is raised idempotently
/// from any thread (signal handler, a feature, a peer) and wakes the driver
/// out of its wait phase; `stopping` is raised exactly once by the driver
/// itself, after the begin-shutdown hooks have run, so features can still
/// cross-reference peers during their shutdown preamble.
#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<SignalInner>,
}

#[derive(Default)]
struct SignalInner {
    state: Mutex<SignalState>,
    wakeup: Condvar,
}

#[derive(Default)]
struct SignalState {
    requested: bool,
    stopping: bool,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Safe to call from any thread, any number of times.
    pub fn request(&self) {
        let mut state = self.lock();
        if !state.requested {
            trace!("shutdown requested");
            state.requested = true;
            self.inner.wakeup.notify_all();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.lock().requested
    }

    pub fn is_stopping(&self) -> bool {
        self.lock().stopping
    }

    pub(crate) fn mark_stopping(&self) {
        let mut state = self.lock();
        state.requested = true;
        state.stopping = true;
        self.inner.wakeup.notify_all();
    }

    /// Block until shutdown has been requested.
    pub fn wait(&self) {
        let mut state = self.lock();
        while !state.requested {
            state = self
                .inner
                .wakeup
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Route SIGINT/SIGTERM into the shutdown signal. A second signal while
/// shutdown is already underway exits immediately.
pub fn install_signal_handler(signal: &ShutdownSignal) {
    let signal = signal.clone();
    let _ = ctrlc::set_handler(move || {
        if signal.is_requested() {
            std::process::exit(1);
        }
        signal.request();
        eprintln!("\nshutdown requested, stopping features...");
    });
}
