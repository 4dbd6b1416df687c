//! Centralized logging for Cadence applications
//!
//! Provides a custom formatter for tracing that:
//! - Formats thread IDs as #N instead of ThreadId(N), so render-thread and
//!   worker-thread lines are easy to tell apart
//! - Extracts `engine` and `script` fields to display script-originated logs as `js::game.js`
//! - Strips common prefixes from targets for cleaner output
//! - Handles raw mode terminal output with proper `\r\n` line endings
//! - Filters external dependency logs based on `CAD_LOGDEPS` environment variable
//!
//! # Environment Variables
//!
//! - `CAD_LOGDEPS`: Set to `1` to enable logging from external dependencies (crossterm, rquickjs, ...).
//!   Default is `0` which only shows logs from Cadence code.
//!
//! # Usage
//!
//! ```rust,ignore
//! use cad_log::{init_logging, LogConfig};
//! use tracing::Level;
//!
//! let config = LogConfig::new("cad_client::");
//! init_logging(config)?;
//!
//! let file = std::fs::File::create("cadence.log")?;
//! let config = LogConfig::new("cad_client::")
//!     .with_log_file(file)
//!     .with_level(Level::DEBUG);
//! init_logging(config)?;
//! ```

use std::fmt as std_fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::Level;
use tracing::field::Field;
use tracing_subscriber::field::Visit;
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::fmt::{
    self, FmtContext, FormatEvent, FormatFields, MakeWriter, format::Writer,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

/// Crates whose logs are shown when dependency logging is disabled
const CADENCE_TARGETS: &[&str] = &[
    "cad_client",
    "cad_protocol",
    "cad_schema",
    "cad_runtime",
    "cad_log",
    "script",
];

/// Global flag indicating whether terminal is in raw mode
/// Used by logging to determine if \r\n should be used instead of \n
static RAW_MODE_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Set the raw mode state for logging
///
/// The terminal input reader flips this while it holds the TTY in raw mode.
pub fn set_raw_mode_active(active: bool) {
    RAW_MODE_ACTIVE.store(active, Ordering::Relaxed);
}

/// Check if the terminal is currently in raw mode
pub fn is_raw_mode_active() -> bool {
    RAW_MODE_ACTIVE.load(Ordering::Relaxed)
}

/// A writer that converts `\n` to `\r\n` for raw mode terminal output.
///
/// In raw mode, the terminal doesn't automatically convert newlines,
/// so we need to explicitly use carriage return + line feed.
pub struct RawModeWriter<W> {
    inner: W,
}

impl<W: Write> RawModeWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Consume the writer and return the wrapped sink
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for RawModeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !is_raw_mode_active() {
            return self.inner.write(buf);
        }

        let mut start = 0;
        for (i, &byte) in buf.iter().enumerate() {
            if byte == b'\n' {
                if i > start {
                    self.inner.write_all(&buf[start..i])?;
                }
                self.inner.write_all(b"\r\n")?;
                start = i + 1;
            }
        }
        if start < buf.len() {
            self.inner.write_all(&buf[start..])?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// A MakeWriter that wraps stderr with RawModeWriter
///
/// Logs go to stderr because the terminal rasterizer owns stdout.
pub struct RawModeStderrWriter;

impl<'a> MakeWriter<'a> for RawModeStderrWriter {
    type Writer = RawModeWriter<io::Stderr>;

    fn make_writer(&'a self) -> Self::Writer {
        RawModeWriter::new(io::stderr())
    }
}

/// Field extractor for session, engine, script, and message fields
///
/// Used by the custom formatter to detect script-originated log messages
/// and format them as `session::js::game.js: message`.
#[derive(Default)]
pub struct FieldExtractor {
    pub session: Option<String>,
    pub engine: Option<String>,
    pub script: Option<String>,
    pub message: Option<String>,
}

impl FieldExtractor {
    fn slot(&mut self, name: &str) -> Option<&mut Option<String>> {
        match name {
            "session" => Some(&mut self.session),
            "engine" => Some(&mut self.engine),
            "script" => Some(&mut self.script),
            "message" => Some(&mut self.message),
            _ => None,
        }
    }
}

impl Visit for FieldExtractor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if let Some(slot) = self.slot(field.name()) {
            *slot = Some(value.to_string());
        }
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        if let Some(slot) = self.slot(field.name()) {
            *slot = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std_fmt::Debug) {
        if let Some(slot) = self.slot(field.name()) {
            *slot = Some(format!("{:?}", value).trim_matches('"').to_string());
        }
    }
}

/// Custom event formatter for Cadence applications
///
/// Features:
/// - Thread IDs displayed as #N instead of ThreadId(N)
/// - Script logs formatted as `js::game.js: message`
/// - Configurable ANSI color support
/// - Configurable target prefix stripping
pub struct CustomFormatter<T> {
    timer: T,
    ansi: bool,
    /// Prefix to strip from log targets (e.g., "cad_client::")
    strip_prefix: Option<String>,
}

impl<T> CustomFormatter<T> {
    /// Create a new CustomFormatter
    ///
    /// # Arguments
    /// * `timer` - The time formatter to use
    /// * `ansi` - Whether to use ANSI color codes
    pub fn new(timer: T, ansi: bool) -> Self {
        Self {
            timer,
            ansi,
            strip_prefix: None,
        }
    }

    /// Set the prefix to strip from log targets
    pub fn with_strip_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.strip_prefix = Some(prefix.into());
        self
    }

    fn display_target<'t>(&self, target: &'t str) -> Option<&'t str> {
        let Some(prefix) = &self.strip_prefix else {
            return Some(target).filter(|t| !t.is_empty());
        };

        let app_name = prefix.trim_end_matches("::");
        if target == app_name || target.is_empty() {
            return None;
        }
        Some(target.strip_prefix(prefix.as_str()).unwrap_or(target))
    }
}

impl<T: Clone> Clone for CustomFormatter<T> {
    fn clone(&self) -> Self {
        Self {
            timer: self.timer.clone(),
            ansi: self.ansi,
            strip_prefix: self.strip_prefix.clone(),
        }
    }
}

impl<S, N, T> FormatEvent<S, N> for CustomFormatter<T>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
    T: fmt::time::FormatTime,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std_fmt::Result {
        let metadata = event.metadata();

        let (dim_start, dim_end) = if self.ansi {
            ("\x1b[2m", "\x1b[0m")
        } else {
            ("", "")
        };
        let (level_color, level_str) = match *metadata.level() {
            Level::ERROR => (if self.ansi { "\x1b[31m" } else { "" }, "ERROR"),
            Level::WARN => (if self.ansi { "\x1b[33m" } else { "" }, " WARN"),
            Level::INFO => (if self.ansi { "\x1b[32m" } else { "" }, " INFO"),
            Level::DEBUG => (if self.ansi { "\x1b[34m" } else { "" }, "DEBUG"),
            Level::TRACE => (if self.ansi { "\x1b[35m" } else { "" }, "TRACE"),
        };
        let color_end = if self.ansi { "\x1b[0m" } else { "" };

        write!(writer, "{}", dim_start)?;
        self.timer.format_time(&mut writer)?;
        write!(writer, "{} ", dim_end)?;

        write!(writer, "{}{}{} ", level_color, level_str, color_end)?;

        if let Some(num) = thread_number(std::thread::current().id()) {
            write!(writer, "#{:03} ", num)?;
        }

        let mut extractor = FieldExtractor::default();
        event.record(&mut extractor);

        if let (Some(engine), Some(script)) = (&extractor.engine, &extractor.script) {
            match &extractor.session {
                Some(session) => write!(
                    writer,
                    "{}{}::{}::{}{}: ",
                    dim_start, session, engine, script, dim_end
                )?,
                None => write!(writer, "{}{}::{}{}: ", dim_start, engine, script, dim_end)?,
            }
            if let Some(msg) = &extractor.message {
                write!(writer, "{}", msg)?;
            }
        } else {
            if let Some(target) = self.display_target(metadata.target()) {
                write!(writer, "{}{}{}: ", dim_start, target, dim_end)?;
            }
            ctx.field_format().format_fields(writer.by_ref(), event)?;
        }

        writeln!(writer)
    }
}

/// Parse the numeric part of a `ThreadId(N)` debug representation
fn thread_number(id: std::thread::ThreadId) -> Option<u64> {
    let thread_id = format!("{:?}", id);
    thread_id
        .strip_prefix("ThreadId(")
        .and_then(|s| s.strip_suffix(")"))
        .and_then(|s| s.parse::<u64>().ok())
}

/// Create a timer with custom format
///
/// Uses format: `[year]/[month]/[day] [hour]:[minute]:[second].[subsecond digits:4]`
/// and falls back to UTC if the local offset cannot be determined.
pub fn create_custom_timer()
-> OffsetTime<&'static [time::format_description::BorrowedFormatItem<'static>]> {
    use time::macros::format_description;

    let format =
        format_description!("[year]/[month]/[day] [hour]:[minute]:[second].[subsecond digits:4]");
    let offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    OffsetTime::new(offset, format)
}

/// Check if dependency logging is enabled via CAD_LOGDEPS environment variable
pub fn is_dependency_logging_enabled() -> bool {
    std::env::var("CAD_LOGDEPS")
        .map(|v| v == "1")
        .unwrap_or(false)
}

/// Parse a level name as written in config files (`trace`..`error`)
pub fn parse_level(name: &str) -> Option<Level> {
    match name.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

/// Build the filter directive for dependency logging
///
/// When `CAD_LOGDEPS=0` (default), only logs from Cadence code are shown.
/// When `CAD_LOGDEPS=1`, all logs are shown including external dependencies.
pub fn build_filter_directives(level: Level, log_deps: bool) -> String {
    let level_str = match level {
        Level::TRACE => "trace",
        Level::DEBUG => "debug",
        Level::INFO => "info",
        Level::WARN => "warn",
        Level::ERROR => "error",
    };

    if log_deps {
        return level_str.to_string();
    }

    let mut directives = String::from("off");
    for target in CADENCE_TARGETS {
        directives.push(',');
        directives.push_str(target);
        directives.push('=');
        directives.push_str(level_str);
    }
    directives
}

/// Detect if ANSI colors should be used based on environment
///
/// Disables ANSI colors if:
/// - stderr is not a TTY (piped/redirected)
/// - NO_COLOR env var is set (https://no-color.org/)
/// - TERM=dumb
pub fn should_use_ansi() -> bool {
    atty::is(atty::Stream::Stderr)
        && std::env::var("NO_COLOR").is_err()
        && std::env::var("TERM").map(|t| t != "dumb").unwrap_or(true)
}

/// Logging configuration
pub struct LogConfig<W: Write + Send + 'static = std::fs::File> {
    /// Prefix to strip from log targets (e.g., "cad_client::")
    pub strip_prefix: String,
    /// Whether to use ANSI color codes (auto-detected if None)
    pub use_ansi: Option<bool>,
    /// Minimum log level
    pub level: Level,
    /// Optional file to write logs to
    pub log_file: Option<W>,
    /// Whether to log to stderr
    pub console: bool,
}

impl<W: Write + Send + 'static> LogConfig<W> {
    /// Create a new LogConfig with the given strip prefix
    pub fn new(strip_prefix: impl Into<String>) -> Self {
        Self {
            strip_prefix: strip_prefix.into(),
            use_ansi: None,
            level: Level::INFO,
            log_file: None,
            console: true,
        }
    }

    /// Set whether to use ANSI colors (default: auto-detect)
    pub fn with_ansi(mut self, use_ansi: bool) -> Self {
        self.use_ansi = Some(use_ansi);
        self
    }

    /// Set the minimum log level
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the log file
    pub fn with_log_file(mut self, file: W) -> Self {
        self.log_file = Some(file);
        self
    }

    /// Enable or disable stderr output, e.g. while the terminal is a canvas
    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }
}

/// Initialize logging with the given configuration
///
/// # Environment Variables
///
/// * `CAD_LOGDEPS` - Set to `1` to enable logging from external dependencies.
/// * `RUST_LOG` - Can override the default filter directives
pub fn init_logging<W: Write + Send + 'static>(
    config: LogConfig<W>,
) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::EnvFilter;

    let timer = create_custom_timer();
    let use_ansi = config.use_ansi.unwrap_or_else(should_use_ansi);
    let filter_directives =
        build_filter_directives(config.level, is_dependency_logging_enabled());

    // RUST_LOG wins over our defaults
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&filter_directives));

    let formatter_console =
        CustomFormatter::new(timer.clone(), use_ansi).with_strip_prefix(&config.strip_prefix);

    let console_layer = config.console.then(|| {
        tracing_subscriber::fmt::layer()
            .event_format(formatter_console)
            .with_ansi(use_ansi)
            .with_writer(RawModeStderrWriter)
    });

    let file_layer = config.log_file.map(|file| {
        let formatter_file =
            CustomFormatter::new(timer, false).with_strip_prefix(&config.strip_prefix);
        tracing_subscriber::fmt::layer()
            .event_format(formatter_file)
            .with_ansi(false)
            .with_writer(std::sync::Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .with(env_filter)
        .try_init()?;

    Ok(())
}
