//! Log subscriber setup for the host binary.

use crate::error::{HostError, Result};
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Output format of the fmt layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct LoggingOptions {
    pub level: Level,
    pub format: LogFormat,
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::default(),
            file: None,
        }
    }
}

impl LoggingOptions {
    /// Level picked by the `--debug`, `--verbose` and `--quiet` switches.
    pub fn level_from_switches(debug: bool, verbose: bool, quiet: bool) -> Level {
        if verbose {
            Level::TRACE
        } else if debug {
            Level::DEBUG
        } else if quiet {
            Level::WARN
        } else {
            Level::INFO
        }
    }

    fn directive(&self) -> String {
        self.level.as_str().to_ascii_lowercase()
    }

    fn detailed(&self) -> bool {
        self.level >= Level::DEBUG
    }
}

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. When logging to a
/// file the returned guard flushes the background writer on drop and must be
/// kept alive for the life of the process.
pub fn init(options: &LoggingOptions) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(options.directive()));

    let (fmt_layer, guard) = match &options.file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path.file_name().ok_or_else(|| {
                HostError::system(format!("log file {} has no file name", path.display()))
            })?;

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (fmt_layer(options, writer, false), Some(guard))
        }
        None => (fmt_layer(options, std::io::stderr, true), None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| HostError::system(format!("install log subscriber: {e}")))?;

    Ok(guard)
}

fn fmt_layer<S, W>(
    options: &LoggingOptions,
    writer: W,
    ansi: bool,
) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let detailed = options.detailed();
    match options.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .with_thread_ids(detailed)
            .with_file(detailed)
            .with_line_number(detailed)
            .boxed(),
    }
}
