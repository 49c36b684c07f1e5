//! Conversion from the `[logging]` config section.

use trellis_config::LoggingSection;

use crate::error::{TelemetryError, TelemetryResult};
use crate::logging::{LogConfig, LogFormat};

impl TryFrom<&LoggingSection> for LogConfig {
    type Error = TelemetryError;

    fn try_from(section: &LoggingSection) -> TelemetryResult<Self> {
        let format: LogFormat = section.format.parse()?;
        let mut config = LogConfig::new(section.level.clone()).with_format(format);
        config.directives.clone_from(&section.directives);
        Ok(config)
    }
}
