use serde::{Deserialize, Serialize};

/// Top-level bridge configuration.
///
/// Every section has defaults, so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Invocation executor tuning.
    pub executor: ExecutorSection,
    /// Permission gate behaviour.
    pub permissions: PermissionsSection,
    /// Extension instance lifecycle.
    pub lifecycle: LifecycleSection,
    /// Script context readiness handling.
    pub script: ScriptSection,
    /// Logging level, format, and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// ExecutorSection
// ---------------------------------------------------------------------------

/// Invocation executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSection {
    /// Expected number of queued deliveries per callback lane. Lanes are
    /// unbounded; the hint sizes initial buffers and is reported in logs.
    pub lane_capacity_hint: usize,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            lane_capacity_hint: 64,
        }
    }
}

// ---------------------------------------------------------------------------
// PermissionsSection
// ---------------------------------------------------------------------------

/// Permission gate configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionsSection {
    /// Seconds a permission prompt may stay unanswered before it denies.
    pub prompt_timeout_secs: u64,
    /// Whether "remember my decision" answers are cached.
    pub cache_decisions: bool,
}

impl Default for PermissionsSection {
    fn default() -> Self {
        Self {
            prompt_timeout_secs: 60,
            cache_decisions: true,
        }
    }
}

// ---------------------------------------------------------------------------
// LifecycleSection
// ---------------------------------------------------------------------------

/// Extension instance lifecycle configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSection {
    /// Milliseconds a graceful disposal waits for in-flight calls to drain.
    pub graceful_dispose_timeout_ms: u64,
}

impl Default for LifecycleSection {
    fn default() -> Self {
        Self {
            graceful_dispose_timeout_ms: 5000,
        }
    }
}

// ---------------------------------------------------------------------------
// ScriptSection
// ---------------------------------------------------------------------------

/// Script context readiness configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSection {
    /// Hold deferred work until the script context reports ready.
    pub defer_until_ready: bool,
    /// Interval, in milliseconds, between readiness re-checks of a deferred
    /// task.
    pub ready_poll_interval_ms: u64,
}

impl Default for ScriptSection {
    fn default() -> Self {
        Self {
            defer_until_ready: false,
            ready_poll_interval_ms: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["trellis_bridge=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "pretty".to_owned(),
            directives: Vec::new(),
        }
    }
}
