use keelson_core::{Feature, FeatureError, FeatureInfo, ServerContext};
use keelson_options::{OptionRegistry, OptionValue, Section};
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Writes the daemon's pid file during the privileged preparation phase and
/// removes it on shutdown. Disables itself when no path is configured.
pub struct PidFileFeature {
    info: FeatureInfo,
    path: Option<PathBuf>,
}

impl PidFileFeature {
    pub const NAME: &'static str = "pid-file";

    pub fn new() -> Self {
        Self {
            info: FeatureInfo::new(Self::NAME)
                .optional()
                .elevated()
                .start_after(super::LoggerFeature::NAME),
            path: None,
        }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

impl Default for PidFileFeature {
    fn default() -> Self {
        Self::new()
    }
}

impl Feature for PidFileFeature {
    fn info(&self) -> &FeatureInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut FeatureInfo {
        &mut self.info
    }

    fn collect_options(&mut self, options: &mut OptionRegistry) -> Result<(), FeatureError> {
        options.add_section(Section::new("server", "server features"))?;
        options.add_option(
            "server.pid-file",
            "write the process id to this file during startup",
            OptionValue::String(String::new()),
        )?;
        Ok(())
    }

    fn load_options(
        &mut self,
        options: &OptionRegistry,
        _cx: &ServerContext<'_>,
    ) -> Result<(), FeatureError> {
        let path = options.get_string("server.pid-file")?;
        if path.is_empty() {
            self.info.disable();
        } else {
            self.path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    fn prepare(&mut self, _cx: &ServerContext<'_>) -> Result<(), FeatureError> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(path, format!("{}\n", std::process::id()))?;
            debug!("wrote pid file {}", path.display());
        }
        Ok(())
    }

    fn stop(&mut self, _cx: &ServerContext<'_>) -> Result<(), FeatureError> {
        if let Some(path) = self.path.take() {
            let _ = fs::remove_file(&path);
            debug!("removed pid file {}", path.display());
        }
        Ok(())
    }
}
