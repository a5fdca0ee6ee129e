//! # Logging Utilities
//!
//! Subscriber setup for the `tracing` events emitted by `scout-core`.
//!
//! Console output goes to stderr so that command output on stdout stays
//! machine-readable. Optionally every event is also written to a file.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use scout_utils::init_logging;
//!
//! // Keep the guard alive until the program exits
//! let _guard = init_logging().expect("Failed to initialize logging");
//! tracing::info!("discovery starting");
//! ```
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: filter directives (e.g. `debug`, `scout_core::listener=trace`)
//! - `SCOUT_LOG_FORMAT`: `pretty` (default) or `json`
//! - `SCOUT_LOG_FILE`: also log to this file, rotated daily. If it names a
//!   directory, a `YYYY-MM-DD-scout.log` file is created inside it.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fs, io};

use chrono::Utc;
use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Human-readable, colored on the console
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Unknown log format: {s}. Use 'pretty' or 'json'")),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl FromStr for LogLevel
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(format!(
                "Unknown log level: {s}. Use 'error', 'warn', 'info', 'debug', or 'trace'"
            )),
        }
    }
}

/// Everything needed to install a subscriber
///
/// Usually built with [`from_env`](Self::from_env) and then adjusted from
/// command line flags, which take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoggingOptions
{
    /// Level set explicitly; overrides `filter`
    pub level: Option<LogLevel>,
    /// `RUST_LOG`-style directives used when no explicit level is set
    pub filter: Option<String>,
    /// Output format for console and file
    pub format: LogFormat,
    /// Additional log file or directory
    pub file: Option<PathBuf>,
}

impl LoggingOptions
{
    /// Read `RUST_LOG`, `SCOUT_LOG_FORMAT` and `SCOUT_LOG_FILE`.
    ///
    /// ## Errors
    ///
    /// Returns `InvalidFormat` if `SCOUT_LOG_FORMAT` is set to an unknown format.
    pub fn from_env() -> Result<Self, LoggingError>
    {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading variables through `lookup`.
    ///
    /// ## Errors
    ///
    /// Returns `InvalidFormat` if `SCOUT_LOG_FORMAT` is set to an unknown format.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LoggingError>
    {
        let format = match lookup("SCOUT_LOG_FORMAT") {
            Some(raw) => raw.parse().map_err(LoggingError::InvalidFormat)?,
            None => LogFormat::default(),
        };

        Ok(Self {
            level: None,
            filter: lookup("RUST_LOG").filter(|f| !f.trim().is_empty()),
            format,
            file: lookup("SCOUT_LOG_FILE").filter(|f| !f.is_empty()).map(PathBuf::from),
        })
    }

    /// Set an explicit level.
    #[must_use]
    pub fn with_level(mut self, level: Option<LogLevel>) -> Self
    {
        if level.is_some() {
            self.level = level;
        }
        self
    }

    /// Set the output format.
    #[must_use]
    pub fn with_format(mut self, format: Option<LogFormat>) -> Self
    {
        if let Some(format) = format {
            self.format = format;
        }
        self
    }

    /// Build the event filter.
    ///
    /// Priority: explicit level, then `filter` directives, then `info`.
    ///
    /// ## Errors
    ///
    /// Returns `InvalidLevel` if the filter directives do not parse.
    pub fn env_filter(&self) -> Result<EnvFilter, LoggingError>
    {
        match (self.level, &self.filter) {
            (Some(level), _) => Ok(EnvFilter::new(Level::from(level).to_string())),
            (None, Some(directives)) => {
                EnvFilter::try_new(directives).map_err(|e| LoggingError::InvalidLevel(format!("{directives}: {e}")))
            }
            (None, None) => Ok(EnvFilter::new(Level::INFO.to_string())),
        }
    }
}

/// Keeps the file writer flushing in the background
///
/// Dropping the guard flushes pending file output. Hold it until exit.
#[derive(Debug)]
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard
{
    _file: Option<WorkerGuard>,
    file_path: Option<PathBuf>,
}

impl LogGuard
{
    /// File that events are written to, if any.
    #[must_use]
    pub fn file_path(&self) -> Option<&Path>
    {
        self.file_path.as_deref()
    }
}

/// Initialize logging from the environment
///
/// Reads `RUST_LOG`, `SCOUT_LOG_FORMAT` and `SCOUT_LOG_FILE`, defaulting to
/// `info` and pretty output on stderr.
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - An environment variable holds an invalid value
/// - The log file cannot be created
pub fn init_logging() -> Result<LogGuard, LoggingError>
{
    init_logging_with(&LoggingOptions::from_env()?)
}

/// Initialize logging with explicit level and format
///
/// `SCOUT_LOG_FILE` is still honored.
///
/// ```rust,no_run
/// use scout_utils::{init_logging_with_level, LogFormat, LogLevel};
///
/// let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Json).expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// Returns an error if logging is already initialized or the log file cannot be created.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LogGuard, LoggingError>
{
    let file = env::var_os("SCOUT_LOG_FILE").filter(|f| !f.is_empty()).map(PathBuf::from);
    init_logging_with(&LoggingOptions {
        level: Some(level),
        filter: None,
        format,
        file,
    })
}

/// Initialize logging from prepared options.
///
/// ## Errors
///
/// Returns an error if logging is already initialized, the filter does not
/// parse or the log file cannot be created.
pub fn init_logging_with(options: &LoggingOptions) -> Result<LogGuard, LoggingError>
{
    let filter = options.env_filter()?;

    let (file_layer, file_guard, file_path) = match &options.file {
        Some(path) => {
            let (writer, guard, path) = file_writer(path)?;
            (Some(event_layer(options.format, writer, false)), Some(guard), Some(path))
        }
        None => (None, None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(event_layer(options.format, io::stderr, true))
        .with(file_layer)
        .try_init()
        .map_err(|e| LoggingError::InitializationFailed(e.to_string()))?;

    Ok(LogGuard {
        _file: file_guard,
        file_path,
    })
}

fn event_layer<S, W>(format: LogFormat, writer: W, ansi: bool) -> Box<dyn Layer<S> + Send + Sync + 'static>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_thread_names(true)
        .with_timer(ChronoUtc::rfc_3339());

    match format {
        LogFormat::Pretty => layer.with_ansi(ansi).boxed(),
        LogFormat::Json => layer.json().with_current_span(true).with_span_list(true).boxed(),
    }
}

fn file_writer(path: &Path) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard, PathBuf), LoggingError>
{
    let (appender, resolved) = if path.is_dir() {
        // The date is part of the name already, so no rotation
        let name = format!("{}-scout.log", Utc::now().format("%Y-%m-%d"));
        (tracing_appender::rolling::never(path, &name), path.join(name))
    } else {
        let name = path.file_name().ok_or_else(|| {
            LoggingError::FileError(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} does not name a file", path.display()),
            ))
        })?;
        let dir = match path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        (tracing_appender::rolling::daily(dir, name), path.to_path_buf())
    };

    let (writer, guard) = tracing_appender::non_blocking(appender);
    Ok((writer, guard, resolved))
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// Invalid log level or filter directive
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String>
    {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_log_format_from_str()
    {
        assert_eq!(LogFormat::from_str("pretty").unwrap(), LogFormat::Pretty);
        assert_eq!(LogFormat::from_str("JSON").unwrap(), LogFormat::Json);
        assert!(LogFormat::from_str("xml").is_err());
    }

    #[test]
    fn test_log_level_from_str()
    {
        assert_eq!(LogLevel::from_str("error").unwrap(), LogLevel::Error);
        assert_eq!(LogLevel::from_str("Warning").unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::from_str("trace").unwrap(), LogLevel::Trace);
        assert!(LogLevel::from_str("loud").is_err());
    }

    #[test]
    fn test_options_from_environment()
    {
        let options = LoggingOptions::from_lookup(lookup(&[
            ("RUST_LOG", "scout_core=debug"),
            ("SCOUT_LOG_FORMAT", "json"),
            ("SCOUT_LOG_FILE", "/tmp/scout.log"),
        ]))
        .unwrap();

        assert_eq!(options.filter.as_deref(), Some("scout_core=debug"));
        assert_eq!(options.format, LogFormat::Json);
        assert_eq!(options.file, Some(PathBuf::from("/tmp/scout.log")));
        assert_eq!(options.level, None);
    }

    #[test]
    fn test_unknown_format_in_environment_is_rejected()
    {
        let err = LoggingOptions::from_lookup(lookup(&[("SCOUT_LOG_FORMAT", "xml")])).unwrap_err();
        assert!(matches!(err, LoggingError::InvalidFormat(_)));
    }

    #[test]
    fn test_flags_override_environment()
    {
        let options = LoggingOptions::from_lookup(lookup(&[("SCOUT_LOG_FORMAT", "json")]))
            .unwrap()
            .with_level(Some(LogLevel::Trace))
            .with_format(Some(LogFormat::Pretty))
            .with_format(None);

        assert_eq!(options.level, Some(LogLevel::Trace));
        assert_eq!(options.format, LogFormat::Pretty);
    }

    #[test]
    fn test_filter_priority()
    {
        let explicit = LoggingOptions {
            level: Some(LogLevel::Debug),
            filter: Some("warn".to_string()),
            ..LoggingOptions::default()
        };
        assert_eq!(explicit.env_filter().unwrap().to_string().to_lowercase(), "debug");

        let directives = LoggingOptions {
            filter: Some("warn".to_string()),
            ..LoggingOptions::default()
        };
        assert_eq!(directives.env_filter().unwrap().to_string().to_lowercase(), "warn");

        let default = LoggingOptions::default();
        assert_eq!(default.env_filter().unwrap().to_string().to_lowercase(), "info");
    }

    #[test]
    fn test_invalid_directive_is_rejected()
    {
        let options = LoggingOptions {
            filter: Some("scout_core=loudest".to_string()),
            ..LoggingOptions::default()
        };
        assert!(matches!(options.env_filter(), Err(LoggingError::InvalidLevel(_))));
    }
}
