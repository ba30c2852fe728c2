//! Host shell around the lifecycle driver.
//!
//! Owns the registry and runs one process execution: parse the command line,
//! answer `--version` or `--config-example` without running anything, load
//! configuration, then drive every plugin through init, run and fini.

use crate::app::{termination_signal, Lifecycle, LifecycleOptions, ShutdownReason};
use crate::config::{render, ConfigFormat, ConfigSlot, Configurator};
use crate::error::{ExitStatus, HostError, Result};
use crate::flags::{self, FlagDefinition, FlagSet};
use crate::logging::{self, LogFormat, LoggingOptions};
use crate::plugin::Plugin;
use crate::registry::Registry;
use clap::error::ErrorKind;
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::ffi::OsString;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const VERSION: &str = "version";
const CONFIG_FILE: &str = "config-file";
const CONFIG_EXAMPLE: &str = "config-example";
const SHUTDOWN_GRACE: &str = "shutdown-grace";
const DEBUG: &str = "debug";
const VERBOSE: &str = "verbose";
const QUIET: &str = "quiet";
const LOG_FORMAT: &str = "log-format";
const LOG_FILE: &str = "log-file";

/// Produces the text printed by `--version`.
pub type VersionInfo = Box<dyn Fn() -> String + Send + Sync>;

/// How a successful execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Plugins ran and the run phase ended without failure.
    Ran,
    PrintedVersion,
    WroteExample,
    PrintedHelp,
}

pub struct Application {
    name: String,
    about: Option<String>,
    registry: Registry,
    version_info: Option<VersionInfo>,
    configurator: Configurator,
    lifecycle: LifecycleOptions,
    logging: bool,
}

impl Application {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            about: None,
            registry: Registry::new(),
            version_info: None,
            configurator: Configurator::new(),
            lifecycle: LifecycleOptions::default(),
            logging: false,
        }
    }

    pub fn with_about<S: Into<String>>(mut self, about: S) -> Self {
        self.about = Some(about.into());
        self
    }

    /// Adds a plugin, optionally with its configuration slot.
    ///
    /// Panics if a plugin with the same name is already registered.
    pub fn register(
        mut self,
        plugin: Arc<dyn Plugin>,
        config: Option<Arc<dyn ConfigSlot>>,
    ) -> Self {
        self.registry.register(plugin, config);
        self
    }

    /// Enables `--version`.
    pub fn with_version_info<F>(mut self, version_info: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.version_info = Some(Box::new(version_info));
        self
    }

    pub fn with_configurator(mut self, configurator: Configurator) -> Self {
        self.configurator = configurator;
        self
    }

    /// Default grace period; `--shutdown-grace` overrides it.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.lifecycle.grace_period = grace_period;
        self
    }

    /// Installs the tracing subscriber from the logging flags.
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Execute once, stopping on SIGINT or SIGTERM.
    pub async fn execute<I, T>(&self, args: I) -> Result<Completion>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        self.execute_until(args, termination_signal()).await
    }

    /// Execute once; `termination` resolving is the termination request.
    pub async fn execute_until<I, T, F>(&self, args: I, termination: F) -> Result<Completion>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
        F: Future<Output = ShutdownReason> + Send + 'static,
    {
        let definitions = self.flag_definitions();
        let matches = match self.command(&definitions).try_get_matches_from(args) {
            Ok(matches) => matches,
            Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
                e.print()?;
                return Ok(Completion::PrintedHelp);
            }
            Err(e) => return Err(HostError::command_line(first_line(&e.to_string()))),
        };

        flags::apply(&definitions, &matches)?;

        let _log_guard = if self.logging {
            logging::init(&logging_options(&matches))?
        } else {
            None
        };

        if let Some(version_info) = &self.version_info {
            if is_set(&matches, VERSION) {
                println!("{}", version_info());
                return Ok(Completion::PrintedVersion);
            }
        }

        let configs = self.registry.configurations();
        if let Some(path) = path_arg(&matches, CONFIG_EXAMPLE) {
            self.configurator.write_example(&path, configs)?;
            println!("generate config example {} success", path.display());
            return Ok(Completion::WroteExample);
        }

        if let Some(path) = path_arg(&matches, CONFIG_FILE) {
            self.configurator.load(&path, configs)?;
        }

        if let Some(version_info) = &self.version_info {
            info!("Version: {}", version_info());
        }
        if !configs.is_empty() {
            match render(ConfigFormat::Toml, configs) {
                Ok(rendered) => info!("Configuration:\n{}", rendered),
                Err(e) => warn!("Failed to render configuration: {}", e),
            }
        }

        let mut options = self.lifecycle.clone();
        if let Ok(Some(grace_period)) = matches.try_get_one::<Duration>(SHUTDOWN_GRACE) {
            options.grace_period = *grace_period;
        }

        let lifecycle = Lifecycle::new(options);
        let report = lifecycle.run_until(&self.registry, termination).await;
        report.into_result().map(|()| Completion::Ran)
    }

    /// Execute once and classify the result as a process exit status.
    ///
    /// Errors are printed to stderr on a single line.
    pub async fn main<I, T>(&self, args: I) -> ExitStatus
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        match self.execute(args).await {
            Ok(_) => ExitStatus::Success,
            Err(e) => {
                eprintln!("{e}");
                ExitStatus::from(&e)
            }
        }
    }

    fn flag_definitions(&self) -> Vec<FlagDefinition> {
        let mut definitions = Vec::new();
        for component in self.registry.components() {
            if let Some(flagger) = component.flagger() {
                let mut set = FlagSet::new(component.name());
                flagger.set_flags(&mut set);
                definitions.extend(set.into_definitions());
            }
        }
        definitions
    }

    fn command(&self, definitions: &[FlagDefinition]) -> Command {
        let mut command = Command::new(self.name.clone()).disable_version_flag(true);
        if let Some(about) = &self.about {
            command = command.about(about.clone());
        }

        if self.version_info.is_some() {
            command = command.arg(
                Arg::new(VERSION)
                    .long(VERSION)
                    .help("Print version information and exit")
                    .action(ArgAction::SetTrue),
            );
        }

        if !self.registry.configurations().is_empty() {
            command = command
                .arg(
                    Arg::new(CONFIG_FILE)
                        .long(CONFIG_FILE)
                        .value_name("PATH")
                        .help("Load plugin configuration from this file")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new(CONFIG_EXAMPLE)
                        .long(CONFIG_EXAMPLE)
                        .value_name("PATH")
                        .help("Write an example configuration file and exit")
                        .value_parser(clap::value_parser!(PathBuf)),
                );
        }

        command = command
            .arg(
                Arg::new(SHUTDOWN_GRACE)
                    .long(SHUTDOWN_GRACE)
                    .value_name("DURATION")
                    .help(format!(
                        "How long plugins may take to stop after a termination request \
                         (default {})",
                        flags::format_duration(self.lifecycle.grace_period)
                    ))
                    .value_parser(flags::parse_duration),
            )
            .arg(
                Arg::new(DEBUG)
                    .long(DEBUG)
                    .help("Enable debug level logging")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new(VERBOSE)
                    .long(VERBOSE)
                    .help("Enable trace level logging")
                    .action(ArgAction::SetTrue),
            )
            .arg(
                Arg::new(QUIET)
                    .long(QUIET)
                    .help("Only log warnings and errors")
                    .action(ArgAction::SetTrue)
                    .conflicts_with_all([DEBUG, VERBOSE]),
            )
            .arg(
                Arg::new(LOG_FORMAT)
                    .long(LOG_FORMAT)
                    .value_name("FORMAT")
                    .help("Log output format")
                    .value_parser(clap::value_parser!(LogFormat))
                    .default_value("pretty"),
            )
            .arg(
                Arg::new(LOG_FILE)
                    .long(LOG_FILE)
                    .value_name("PATH")
                    .help("Write logs to this file instead of stderr")
                    .value_parser(clap::value_parser!(PathBuf)),
            );

        for definition in definitions {
            command = command.arg(definition.to_arg());
        }
        command
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name)
            .field("registry", &self.registry)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

fn is_set(matches: &ArgMatches, id: &str) -> bool {
    matches!(matches.try_get_one::<bool>(id), Ok(Some(true)))
}

fn path_arg(matches: &ArgMatches, id: &str) -> Option<PathBuf> {
    matches.try_get_one::<PathBuf>(id).ok().flatten().cloned()
}

fn logging_options(matches: &ArgMatches) -> LoggingOptions {
    LoggingOptions {
        level: LoggingOptions::level_from_switches(
            is_set(matches, DEBUG),
            is_set(matches, VERBOSE),
            is_set(matches, QUIET),
        ),
        format: matches
            .try_get_one::<LogFormat>(LOG_FORMAT)
            .ok()
            .flatten()
            .copied()
            .unwrap_or_default(),
        file: path_arg(matches, LOG_FILE),
    }
}

fn first_line(rendered: &str) -> String {
    let line = rendered.lines().next().unwrap_or_default();
    line.strip_prefix("error: ").unwrap_or(line).to_string()
}
