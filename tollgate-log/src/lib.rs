//! Tollgate Logging
//!
//! Installs a `tracing` subscriber for processes embedding the gateway core.
//! Library crates never configure logging themselves; they emit `tracing`
//! events and leave subscriber setup to the binary through [`init`].
//!
//! # Usage
//!
//! ```rust,no_run
//! tollgate_log::init();
//!
//! tracing::info!(gateway = "azul", "provider registered");
//! tracing::warn!(target: tollgate_log::targets::SECURITY, "webhook signature rejected");
//! ```
//!
//! # Environment Variables
//!
//! - `TOLLGATE_DEBUG=1` - Enable debug logging
//! - `TOLLGATE_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `TOLLGATE_LOG_FORMAT=pretty|json|compact` - Set output format
//! - `TOLLGATE_LOG_TIMESTAMPS=1|0` - Include timestamps
//! - `RUST_LOG` - Full `EnvFilter` directive, overrides the level

use once_cell::sync::OnceCell;
use std::env;
use std::fmt;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Log Targets
// ============================================================================

/// Well-known `tracing` targets used across the workspace.
pub mod targets {
    /// Security events: rejected webhook signatures, tampered payloads.
    pub const SECURITY: &str = "tollgate::security";

    /// Compliance audit trail for currency conversions.
    pub const AUDIT: &str = "tollgate::audit";

    /// Transactions whose provider outcome is unknown.
    pub const RECONCILIATION: &str = "tollgate::reconciliation";
}

// ============================================================================
// Log Levels
// ============================================================================

/// Minimum level of emitted events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Off,
}

impl Level {
    /// Get level from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Level::Trace),
            "debug" => Some(Level::Debug),
            "info" => Some(Level::Info),
            "warn" | "warning" => Some(Level::Warn),
            "error" => Some(Level::Error),
            "off" | "none" => Some(Level::Off),
            _ => None,
        }
    }

    /// Directive understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_directive().to_uppercase())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line human readable output
    Pretty,
    /// Single-line output
    Compact,
    /// One JSON object per line
    Json,
}

impl Format {
    /// Get format from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Some(Format::Pretty),
            "compact" => Some(Format::Compact),
            "json" => Some(Format::Json),
            _ => None,
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Whether debug mode is enabled
    pub debug: bool,
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether to include timestamps
    pub timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: false,
            level: Level::Info,
            format: Format::Json,
            timestamps: true,
        }
    }
}

impl LogConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    ///
    /// Used by [`LogConfig::from_env`]; tests pass a map instead of touching
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| lookup(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        let debug = flag("TOLLGATE_DEBUG").unwrap_or(false);

        let level = lookup("TOLLGATE_LOG_LEVEL")
            .and_then(|s| Level::parse(&s))
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("TOLLGATE_LOG_FORMAT")
            .and_then(|s| Format::parse(&s))
            .unwrap_or(Format::Json);

        let timestamps = flag("TOLLGATE_LOG_TIMESTAMPS").unwrap_or(true);

        Self {
            debug,
            level,
            format,
            timestamps,
        }
    }

    /// Build the event filter. `RUST_LOG` wins over the configured level.
    pub fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.as_directive()))
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Error returned when a global subscriber is already installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlreadyInitialized;

impl fmt::Display for AlreadyInitialized {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a global tracing subscriber is already installed")
    }
}

impl std::error::Error for AlreadyInitialized {}

static INSTALLED: OnceCell<LogConfig> = OnceCell::new();

/// Initialize logging from the environment.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init() {
    let _ = try_init(&LogConfig::from_env());
}

/// Install a global subscriber for the given configuration.
pub fn try_init(config: &LogConfig) -> Result<(), AlreadyInitialized> {
    let mut installed = false;
    INSTALLED.get_or_init(|| {
        installed = install(config);
        config.clone()
    });

    if installed { Ok(()) } else { Err(AlreadyInitialized) }
}

/// Configuration the process was initialized with, if any.
pub fn current() -> Option<&'static LogConfig> {
    INSTALLED.get()
}

fn install(config: &LogConfig) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.filter())
        .with_writer(std::io::stderr)
        .with_target(true);

    let result = match (config.format, config.timestamps) {
        #[cfg(feature = "json")]
        (Format::Json, true) => builder.json().try_init(),
        #[cfg(feature = "json")]
        (Format::Json, false) => builder.json().without_time().try_init(),
        #[cfg(not(feature = "json"))]
        (Format::Json, true) => builder.compact().try_init(),
        #[cfg(not(feature = "json"))]
        (Format::Json, false) => builder.compact().without_time().try_init(),
        (Format::Pretty, true) => builder.pretty().try_init(),
        (Format::Pretty, false) => builder.pretty().without_time().try_init(),
        (Format::Compact, true) => builder.compact().try_init(),
        (Format::Compact, false) => builder.compact().without_time().try_init(),
    };

    result.is_ok()
}
