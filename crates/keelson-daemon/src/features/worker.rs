use keelson_core::{Feature, FeatureError, FeatureInfo, ServerContext};
use keelson_options::{OptionRegistry, OptionValue, Section};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::debug;

const MAX_THREADS: i64 = 256;

/// A pool of worker threads, spawned no earlier than `start` and joined in
/// `stop`. Stands in for whatever background machinery a real daemon runs.
pub struct WorkerFeature {
    info: FeatureInfo,
    threads: i64,
    running: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerFeature {
    pub const NAME: &'static str = "worker";

    pub fn new() -> Self {
        Self {
            info: FeatureInfo::new(Self::NAME)
                .require(super::LoggerFeature::NAME)
                .start_after(super::LoggerFeature::NAME)
                .start_after(super::PidFileFeature::NAME),
            threads: 2,
            running: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }
}

impl Default for WorkerFeature {
    fn default() -> Self {
        Self::new()
    }
}

impl Feature for WorkerFeature {
    fn info(&self) -> &FeatureInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut FeatureInfo {
        &mut self.info
    }

    fn collect_options(&mut self, options: &mut OptionRegistry) -> Result<(), FeatureError> {
        options.add_section(Section::new("worker", "worker pool"))?;
        options.add_option(
            "worker.threads",
            "number of worker threads",
            OptionValue::Int(self.threads),
        )?;
        Ok(())
    }

    fn load_options(
        &mut self,
        options: &OptionRegistry,
        _cx: &ServerContext<'_>,
    ) -> Result<(), FeatureError> {
        self.threads = options.get_int("worker.threads")?;
        Ok(())
    }

    fn validate_options(&mut self, _options: &OptionRegistry) -> Result<(), FeatureError> {
        if !(1..=MAX_THREADS).contains(&self.threads) {
            return Err(FeatureError::msg(format!(
                "worker.threads must be between 1 and {MAX_THREADS}, got {}",
                self.threads
            )));
        }
        Ok(())
    }

    fn start(&mut self, _cx: &ServerContext<'_>) -> Result<(), FeatureError> {
        self.running.store(true, Ordering::SeqCst);
        for i in 0..self.threads {
            let running = Arc::clone(&self.running);
            let handle = thread::Builder::new()
                .name(format!("worker-{i}"))
                .spawn(move || {
                    debug!("worker {i} up");
                    while running.load(Ordering::SeqCst) {
                        // the tick is where real work would happen
                        thread::park_timeout(Duration::from_millis(200));
                    }
                    debug!("worker {i} down");
                })?;
            self.handles.push(handle);
        }
        Ok(())
    }

    fn begin_shutdown(&mut self, _cx: &ServerContext<'_>) -> Result<(), FeatureError> {
        self.running.store(false, Ordering::SeqCst);
        for handle in &self.handles {
            handle.thread().unpark();
        }
        Ok(())
    }

    fn stop(&mut self, _cx: &ServerContext<'_>) -> Result<(), FeatureError> {
        self.running.store(false, Ordering::SeqCst);
        for handle in self.handles.drain(..) {
            handle.thread().unpark();
            if handle.join().is_err() {
                return Err(FeatureError::msg("a worker thread panicked"));
            }
        }
        Ok(())
    }
}
