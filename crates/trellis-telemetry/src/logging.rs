//! Subscriber construction.
//!
//! One [`LogConfig`] describes level, directives, output format and target.
//! [`setup_logging`] installs the matching global subscriber and hands back a
//! [`LogGuard`] that must outlive the program's logging (it flushes the
//! background file writer on drop).

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt};

use crate::error::{TelemetryError, TelemetryResult};

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human oriented.
    #[default]
    Pretty,
    /// One line per event.
    Compact,
    /// Newline-delimited JSON.
    Json,
    /// The `tracing-subscriber` default layout.
    Full,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            "full" => Ok(Self::Full),
            other => Err(TelemetryError::ConfigError(format!(
                "unknown log format '{other}'"
            ))),
        }
    }
}

/// How often a log file is rolled over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRotation {
    /// New file every day.
    #[default]
    Daily,
    /// New file every hour.
    Hourly,
    /// New file every minute.
    Minutely,
    /// Single file, never rolled.
    Never,
}

impl From<FileRotation> for Rotation {
    fn from(value: FileRotation) -> Self {
        match value {
            FileRotation::Daily => Rotation::DAILY,
            FileRotation::Hourly => Rotation::HOURLY,
            FileRotation::Minutely => Rotation::MINUTELY,
            FileRotation::Never => Rotation::NEVER,
        }
    }
}

/// Rolling file output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLogConfig {
    /// Directory the files are written to. Created if missing.
    pub directory: PathBuf,
    /// File name prefix; files are named `<prefix>.<date>.log`.
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Roll-over period.
    #[serde(default)]
    pub rotation: FileRotation,
    /// Oldest files beyond this count are deleted. `0` keeps everything.
    #[serde(default)]
    pub max_files: usize,
}

fn default_prefix() -> String {
    "trellis".to_owned()
}

impl FileLogConfig {
    /// Log into `directory` with the default prefix and daily rotation.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            prefix: default_prefix(),
            rotation: FileRotation::default(),
            max_files: 0,
        }
    }

    /// Build the appender, creating the directory first.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the appender
    /// rejects the configuration.
    pub fn appender(&self) -> TelemetryResult<RollingFileAppender> {
        std::fs::create_dir_all(&self.directory)?;
        let mut builder = RollingFileAppender::builder()
            .rotation(self.rotation.into())
            .filename_prefix(&self.prefix)
            .filename_suffix("log");
        if self.max_files > 0 {
            builder = builder.max_log_files(self.max_files);
        }
        builder
            .build(&self.directory)
            .map_err(|e| TelemetryError::InitError(e.to_string()))
    }
}

/// Where events are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Standard output.
    Stdout,
    /// Default, so stdout stays free for host output.
    #[default]
    Stderr,
    /// Rolling files through a non-blocking writer.
    File(FileLogConfig),
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct LogConfig {
    /// Base level, e.g. `"info"`. Ignored when `RUST_LOG` is set and
    /// `respect_env` is on.
    pub level: String,
    /// Event layout.
    pub format: LogFormat,
    /// Output destination.
    pub target: LogTarget,
    /// Extra directives such as `trellis_bridge=trace`.
    pub directives: Vec<String>,
    /// Let `RUST_LOG` replace `level`.
    pub respect_env: bool,
    /// Colour output. Always off for file targets.
    pub ansi: bool,
    /// Prefix events with a timestamp.
    pub timestamps: bool,
    /// Record source file and line.
    pub file_info: bool,
    /// Record the emitting thread's name.
    pub thread_names: bool,
    /// Emit an event when spans close, with their busy/idle time.
    pub span_timing: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::default(),
            target: LogTarget::default(),
            directives: Vec::new(),
            respect_env: true,
            ansi: true,
            timestamps: true,
            file_info: false,
            thread_names: false,
            span_timing: false,
        }
    }
}

impl LogConfig {
    /// Start from the defaults with a different base level.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            ..Self::default()
        }
    }

    /// Set the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the output target.
    #[must_use]
    pub fn with_target(mut self, target: LogTarget) -> Self {
        self.target = target;
        self
    }

    /// Append one filter directive.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    /// Ignore `RUST_LOG` and use exactly the configured level.
    #[must_use]
    pub fn ignore_env(mut self) -> Self {
        self.respect_env = false;
        self
    }

    /// Toggle span close events.
    #[must_use]
    pub fn with_span_timing(mut self, enabled: bool) -> Self {
        self.span_timing = enabled;
        self
    }

    /// Compile the level and directives into an [`EnvFilter`].
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::ConfigError`] for an unparseable level or
    /// directive.
    pub fn build_filter(&self) -> TelemetryResult<EnvFilter> {
        let from_env = if self.respect_env {
            std::env::var(EnvFilter::DEFAULT_ENV)
                .ok()
                .filter(|v| !v.trim().is_empty())
        } else {
            None
        };
        let base = from_env.as_deref().unwrap_or(&self.level);

        let mut filter = EnvFilter::try_new(base)
            .map_err(|e| TelemetryError::ConfigError(format!("level '{base}': {e}")))?;
        for directive in &self.directives {
            let parsed = directive.parse().map_err(|e| {
                TelemetryError::ConfigError(format!("directive '{directive}': {e}"))
            })?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }

    fn span_events(&self) -> FmtSpan {
        if self.span_timing {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        }
    }
}

/// Keeps the background file writer alive. Dropping it flushes pending
/// events.
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug, Default)]
pub struct LogGuard {
    _worker: Option<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
///
/// # Errors
///
/// Returns an error if the filter does not parse, the log file cannot be
/// opened, or a global subscriber is already installed.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<LogGuard> {
    let filter = config.build_filter()?;

    match &config.target {
        LogTarget::Stdout => {
            install(filter, format_layer(config, config.ansi, std::io::stdout))?;
            Ok(LogGuard::default())
        },
        LogTarget::Stderr => {
            install(filter, format_layer(config, config.ansi, std::io::stderr))?;
            Ok(LogGuard::default())
        },
        LogTarget::File(file) => {
            let (writer, worker) = tracing_appender::non_blocking(file.appender()?);
            install(filter, format_layer(config, false, writer))?;
            Ok(LogGuard {
                _worker: Some(worker),
            })
        },
    }
}

/// Install `info`-level pretty logging on stderr.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn setup_default_logging() -> TelemetryResult<LogGuard> {
    setup_logging(&LogConfig::default())
}

fn install<L>(filter: EnvFilter, layer: L) -> TelemetryResult<()>
where
    L: Layer<tracing_subscriber::layer::Layered<EnvFilter, tracing_subscriber::Registry>>
        + Send
        + Sync
        + 'static,
{
    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| TelemetryError::InitError(e.to_string()))
}

fn format_layer<S, W>(config: &LogConfig, ansi: bool, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let base = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_file(config.file_info)
        .with_line_number(config.file_info)
        .with_thread_names(config.thread_names)
        .with_span_events(config.span_events());

    match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => base.pretty().boxed(),
        (LogFormat::Pretty, false) => base.pretty().without_time().boxed(),
        (LogFormat::Compact, true) => base.compact().boxed(),
        (LogFormat::Compact, false) => base.compact().without_time().boxed(),
        (LogFormat::Json, true) => base.json().with_current_span(true).boxed(),
        (LogFormat::Json, false) => base.json().with_current_span(true).without_time().boxed(),
        (LogFormat::Full, true) => base.boxed(),
        (LogFormat::Full, false) => base.without_time().boxed(),
    }
}
