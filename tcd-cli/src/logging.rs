//! Structured logging backend for the `tcd` binary. `tcd-core` only ever
//! emits through the `log` facade; this module is the backend that actually
//! renders those records as JSON, logfmt, or a human-readable line.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use color_eyre::eyre::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Logfmt,
    Pretty,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    Stderr,
    File(String),
}

/// Structured events specific to the transcoder engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    /// A DVSI (or software-fallback) AMBE device finished its init sequence.
    DeviceInit(DeviceInitEvent),

    /// A configured gain was outside the device class's allowed range and
    /// was clamped rather than rejected.
    GainClamped(GainClampedEvent),

    Info { message: String },
    Warn { message: String },
    Error { message: String, details: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInitEvent {
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub codec: String,
    pub channels: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GainClampedEvent {
    pub timestamp: DateTime<Utc>,
    pub parameter: String,
    pub requested_db: i32,
    pub clamped_db: i32,
}

/// Renders `LogEvent`s in one of three formats, to stdout/stderr/a file.
pub struct StructuredLogger {
    format: LogFormat,
    writer: Mutex<Box<dyn Write + Send>>,
    start_time: DateTime<Utc>,
}

impl StructuredLogger {
    pub fn new(format: LogFormat, target: LogTarget) -> Result<Self> {
        let writer: Box<dyn Write + Send> = match target {
            LogTarget::Stdout => Box::new(io::stdout()),
            LogTarget::Stderr => Box::new(io::stderr()),
            LogTarget::File(path) => Box::new(BufWriter::new(File::create(path)?)),
        };

        Ok(Self {
            format,
            writer: Mutex::new(writer),
            start_time: Utc::now(),
        })
    }

    pub fn log(&self, event: LogEvent) -> Result<()> {
        let output = match self.format {
            LogFormat::Json => serde_json::to_string(&event)?,
            LogFormat::Logfmt => format_logfmt(&event),
            LogFormat::Pretty => format_pretty(&event),
        };
        let mut writer = self.writer.lock().expect("log writer mutex poisoned");
        writeln!(writer, "{output}")?;
        writer.flush()?;
        Ok(())
    }

    pub fn elapsed(&self) -> f64 {
        (Utc::now() - self.start_time).num_milliseconds() as f64 / 1000.0
    }
}

fn format_logfmt(event: &LogEvent) -> String {
    let ts = Utc::now().to_rfc3339();
    match event {
        LogEvent::DeviceInit(d) => format!(
            "ts=\"{ts}\" type=device_init description=\"{}\" codec={} channels={}",
            d.description, d.codec, d.channels
        ),
        LogEvent::GainClamped(g) => format!(
            "ts=\"{ts}\" type=gain_clamped parameter={} requested_db={} clamped_db={}",
            g.parameter, g.requested_db, g.clamped_db
        ),
        LogEvent::Info { message } => format!("ts=\"{ts}\" level=info msg=\"{message}\""),
        LogEvent::Warn { message } => format!("ts=\"{ts}\" level=warn msg=\"{message}\""),
        LogEvent::Error { message, details } => match details {
            Some(d) => format!("ts=\"{ts}\" level=error msg=\"{message}\" details=\"{d}\""),
            None => format!("ts=\"{ts}\" level=error msg=\"{message}\""),
        },
    }
}

fn format_pretty(event: &LogEvent) -> String {
    let ts = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
    match event {
        LogEvent::DeviceInit(d) => format!(
            "[{ts}] DEVICE INIT: {} ({}) - {} channel(s)",
            d.description, d.codec, d.channels
        ),
        LogEvent::GainClamped(g) => format!(
            "[{ts}] GAIN CLAMPED: {} requested {}dB, clamped to {}dB",
            g.parameter, g.requested_db, g.clamped_db
        ),
        LogEvent::Info { message } => format!("[{ts}] INFO: {message}"),
        LogEvent::Warn { message } => format!("[{ts}] WARN: {message}"),
        LogEvent::Error { message, details } => match details {
            Some(d) => format!("[{ts}] ERROR: {message} | {d}"),
            None => format!("[{ts}] ERROR: {message}"),
        },
    }
}

/// Bridges the `log` facade (everything `tcd-core` emits) onto the
/// structured backend, so engine log lines and CLI-level `LogEvent`s share
/// one sink. Holds the same `Arc<StructuredLogger>` the binary keeps for
/// itself, so `main` can emit rich `LogEvent`s (device init, gain clamps) on
/// the identical writer `log::info!`/`warn!`/`error!` use.
pub struct LogBridge {
    logger: Arc<StructuredLogger>,
}

impl LogBridge {
    pub fn install(logger: Arc<StructuredLogger>) -> Result<()> {
        let bridge = Box::new(LogBridge { logger });
        log::set_max_level(log::LevelFilter::Trace);
        log::set_boxed_logger(bridge).map_err(|e| color_eyre::eyre::eyre!(e))?;
        Ok(())
    }
}

impl log::Log for LogBridge {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        let event = match record.level() {
            log::Level::Warn => LogEvent::Warn {
                message: record.args().to_string(),
            },
            log::Level::Error => LogEvent::Error {
                message: record.args().to_string(),
                details: None,
            },
            _ => LogEvent::Info {
                message: record.args().to_string(),
            },
        };
        let _ = self.logger.log(event);
    }

    fn flush(&self) {}
}
