//! Log subscriber with a level the host can change at runtime.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt as fmt_layer, reload};

use crate::error::LoggingError;

/// Host-facing log levels, most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[repr(u8)]
pub enum LogLevel {
    None = 0,
    Critical = 1,
    Error = 2,
    Warning = 3,
    #[default]
    Info = 4,
    Debug = 5,
    Verbose = 6,
}

impl LogLevel {
    /// Case-insensitive. Unknown names map to `Info`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" => Self::None,
            "critical" => Self::Critical,
            "error" => Self::Error,
            "warning" => Self::Warning,
            "info" => Self::Info,
            "debug" => Self::Debug,
            "verbose" => Self::Verbose,
            _ => Self::Info,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Critical => "critical",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Verbose => "verbose",
        }
    }

    /// `tracing` has no critical level; it shares `error`.
    pub fn directive(self) -> &'static str {
        match self {
            Self::None => "off",
            Self::Critical | Self::Error => "error",
            Self::Warning => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Verbose => "trace",
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::None,
            1 => Self::Critical,
            2 => Self::Error,
            3 => Self::Warning,
            5 => Self::Debug,
            6 => Self::Verbose,
            _ => Self::Info,
        }
    }

    fn filter(self) -> EnvFilter {
        EnvFilter::new(self.directive())
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Stored while the active filter came from `RUST_LOG`.
const FROM_ENV: u8 = u8::MAX;

/// Swaps the installed filter.
#[derive(Clone)]
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    level: Arc<AtomicU8>,
}

impl LogHandle {
    fn new(filter: reload::Handle<EnvFilter, Registry>, level: Option<LogLevel>) -> Self {
        Self {
            filter,
            level: Arc::new(AtomicU8::new(level.map_or(FROM_ENV, |l| l as u8))),
        }
    }

    pub fn set_level(&self, level: LogLevel) -> Result<(), LoggingError> {
        self.filter
            .reload(level.filter())
            .map_err(|e| LoggingError::Reload(e.to_string()))?;
        self.level.store(level as u8, Ordering::SeqCst);
        Ok(())
    }

    /// Active level. `None` while `RUST_LOG` directives are in force, until
    /// the first [`set_level`](Self::set_level).
    pub fn level(&self) -> Option<LogLevel> {
        match self.level.load(Ordering::SeqCst) {
            FROM_ENV => None,
            raw => Some(LogLevel::from_u8(raw)),
        }
    }
}

/// Picks the startup filter. Directives from the environment win over
/// `level`, in which case no host level is in force.
fn initial_filter(from_env: Option<EnvFilter>, level: LogLevel) -> (EnvFilter, Option<LogLevel>) {
    match from_env {
        Some(filter) => (filter, None),
        None => (level.filter(), Some(level)),
    }
}

static INSTALLED: OnceLock<LogHandle> = OnceLock::new();

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` wins over `level` when set. Fails if another subscriber is
/// already installed.
pub fn init(level: LogLevel) -> Result<LogHandle, LoggingError> {
    let (filter, active) = initial_filter(EnvFilter::try_from_default_env().ok(), level);
    let (filter_layer, filter) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer::layer())
        .try_init()
        .map_err(|e| LoggingError::AlreadyInstalled(e.to_string()))?;

    let handle = LogHandle::new(filter, active);
    let handle = INSTALLED.get_or_init(|| handle).clone();
    tracing::debug!(level = %level, from_env = active.is_none(), "logging initialized");
    Ok(handle)
}

/// Changes the level of the subscriber installed by [`init`].
pub fn set_log_level(level: LogLevel) -> Result<(), LoggingError> {
    match INSTALLED.get() {
        Some(handle) => handle.set_level(level),
        None => Err(LoggingError::Reload("logging not initialized".into())),
    }
}

/// Current host level.
///
/// The default if [`init`] was never called; `None` while `RUST_LOG`
/// controls the filter.
pub fn log_level() -> Option<LogLevel> {
    match INSTALLED.get() {
        Some(handle) => handle.level(),
        None => Some(LogLevel::default()),
    }
}
