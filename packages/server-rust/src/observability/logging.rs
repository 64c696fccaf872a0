//! Logging lifecycle: subscriber installation, rolling files, flush on shutdown.
//!
//! Layout when a log directory is configured:
//!
//! - `<app>.<date>.log`: DEBUG and above
//! - `<app>_trace.<date>.log`: TRACE events only (call arguments and replies)
//!
//! Files roll on the appender's clock (`minutely`, `hourly`, `daily`, `never`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::{filter_fn, LevelFilter};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Output encoding for log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// How often log files roll over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    #[default]
    Hourly,
    Daily,
    Never,
}

impl LogRotation {
    fn rotation(self) -> Rotation {
        match self {
            Self::Minutely => Rotation::MINUTELY,
            Self::Hourly => Rotation::HOURLY,
            Self::Daily => Rotation::DAILY,
            Self::Never => Rotation::NEVER,
        }
    }
}

/// `[logging]` configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Filter directive used when `RUST_LOG` is unset (e.g. `info`, `gantry_server=debug`).
    pub level: String,
    pub format: LogFormat,
    /// Write to stdout.
    pub console: bool,
    /// Directory for rolling log files. No files are written when unset.
    pub path: Option<PathBuf>,
    pub rotation: LogRotation,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            console: true,
            path: None,
            rotation: LogRotation::Hourly,
        }
    }
}

pub type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Owns the background log writers for the lifetime of the process.
///
/// Dropping (or calling [`shutdown`](Self::shutdown)) flushes buffered lines.
#[derive(Debug)]
pub struct LoggingService {
    guards: Vec<WorkerGuard>,
}

impl LoggingService {
    /// Installs the global subscriber.
    ///
    /// # Errors
    ///
    /// Returns an error if the filter directive is invalid, the log directory
    /// cannot be created, or a global subscriber is already installed.
    pub fn start(app_name: &str, settings: &LogSettings) -> anyhow::Result<Self> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&settings.level)?,
        };
        let (layers, guards) = build_layers(app_name, settings)?;

        tracing_subscriber::registry()
            .with(layers)
            .with(filter)
            .try_init()?;

        info!(
            app = app_name,
            format = ?settings.format,
            directory = ?settings.path,
            rotation = ?settings.rotation,
            "logging started"
        );
        Ok(Self { guards })
    }

    /// Flushes and stops the file writers.
    pub fn shutdown(self) {
        info!("logging stopped");
        drop(self.guards);
    }
}

/// Builds the console and file layers described by `settings`.
///
/// # Errors
///
/// Returns an error if the log directory or a log file cannot be created.
pub fn build_layers(
    app_name: &str,
    settings: &LogSettings,
) -> anyhow::Result<(Vec<BoxedLayer>, Vec<WorkerGuard>)> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guards = Vec::new();

    if settings.console {
        layers.push(match settings.format {
            LogFormat::Text => fmt::layer().boxed(),
            LogFormat::Json => fmt::layer().json().boxed(),
        });
    }

    if let Some(directory) = &settings.path {
        std::fs::create_dir_all(directory)?;

        let (writer, guard) = tracing_appender::non_blocking(appender(
            directory,
            app_name,
            settings.rotation,
        )?);
        guards.push(guard);
        layers.push(
            file_layer(settings.format, writer)
                .with_filter(LevelFilter::DEBUG)
                .boxed(),
        );

        let (writer, guard) = tracing_appender::non_blocking(appender(
            directory,
            &format!("{app_name}_trace"),
            settings.rotation,
        )?);
        guards.push(guard);
        layers.push(
            file_layer(settings.format, writer)
                .with_filter(filter_fn(|meta| *meta.level() == Level::TRACE))
                .boxed(),
        );
    }

    Ok((layers, guards))
}

fn appender(
    directory: &Path,
    prefix: &str,
    rotation: LogRotation,
) -> anyhow::Result<RollingFileAppender> {
    Ok(RollingFileAppender::builder()
        .rotation(rotation.rotation())
        .filename_prefix(prefix)
        .filename_suffix("log")
        .build(directory)?)
}

fn file_layer<W>(format: LogFormat, writer: W) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Text => fmt::layer().with_ansi(false).with_writer(writer).boxed(),
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
    }
}
