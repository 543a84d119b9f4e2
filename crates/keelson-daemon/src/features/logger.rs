use keelson_core::{Feature, FeatureError, FeatureInfo, ServerContext};
use keelson_options::{OptionRegistry, OptionValue, Section};
use tracing_subscriber::EnvFilter;

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Configures global log output. Every other feature starts after this one,
/// so their prepare/start hooks already log through the configured
/// subscriber.
pub struct LoggerFeature {
    info: FeatureInfo,
    level: String,
    use_color: bool,
}

impl LoggerFeature {
    pub const NAME: &'static str = "logger";

    pub fn new() -> Self {
        Self {
            info: FeatureInfo::new(Self::NAME),
            level: "info".to_owned(),
            use_color: true,
        }
    }
}

impl Default for LoggerFeature {
    fn default() -> Self {
        Self::new()
    }
}

impl Feature for LoggerFeature {
    fn info(&self) -> &FeatureInfo {
        &self.info
    }

    fn info_mut(&mut self) -> &mut FeatureInfo {
        &mut self.info
    }

    fn collect_options(&mut self, options: &mut OptionRegistry) -> Result<(), FeatureError> {
        options.add_section(Section::new("log", "logging output"))?;
        options.add_option(
            "log.level",
            "log level (trace, debug, info, warn, error)",
            OptionValue::String(self.level.clone()),
        )?;
        options.add_option(
            "log.use-color",
            "colorize log output",
            OptionValue::Bool(self.use_color),
        )?;
        Ok(())
    }

    fn load_options(
        &mut self,
        options: &OptionRegistry,
        _cx: &ServerContext<'_>,
    ) -> Result<(), FeatureError> {
        self.level = options.get_string("log.level")?;
        self.use_color = options.get_bool("log.use-color")?;
        Ok(())
    }

    fn validate_options(&mut self, _options: &OptionRegistry) -> Result<(), FeatureError> {
        if !LEVELS.contains(&self.level.as_str()) {
            return Err(FeatureError::msg(format!(
                "unknown log level '{}', expected one of: {}",
                self.level,
                LEVELS.join(", ")
            )));
        }
        Ok(())
    }

    fn prepare(&mut self, _cx: &ServerContext<'_>) -> Result<(), FeatureError> {
        let filter = EnvFilter::try_from_env("KEELSON_LOG")
            .unwrap_or_else(|_| EnvFilter::new(self.level.clone()));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(self.use_color)
            .with_target(false)
            .finish();
        // a collector may already be installed (e.g. by a test harness);
        // the existing one wins
        let _ = tracing::subscriber::set_global_default(subscriber);
        Ok(())
    }
}
