use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("command line: {message}")]
    CommandLine { message: String },

    #[error("flag {flag}: {message}")]
    Flag { flag: String, message: String },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("configuration of {component:?}: {message}")]
    ConfigFile { component: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("init {component} plugin: {source:#}")]
    Init {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("run {component} plugin: {source:#}")]
    Run {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("wait {}, force exit", humanize(.grace_period))]
    ForcedExit { grace_period: Duration },

    #[error("fini {component} plugin: {source:#}")]
    Finalize {
        component: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("system error: {message}")]
    System { message: String },
}

/// Lifecycle stage an error belongs to, used to pick the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Startup,
    Runtime,
    ForcedShutdown,
    Cleanup,
}

impl HostError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn command_line<S: Into<String>>(message: S) -> Self {
        Self::CommandLine {
            message: message.into(),
        }
    }

    pub fn config_file<S: Into<String>>(component: S, message: S) -> Self {
        Self::ConfigFile {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn init<S: Into<String>>(component: S, source: anyhow::Error) -> Self {
        Self::Init {
            component: component.into(),
            source,
        }
    }

    pub fn run<S: Into<String>>(component: S, source: anyhow::Error) -> Self {
        Self::Run {
            component: component.into(),
            source,
        }
    }

    pub fn finalize<S: Into<String>>(component: S, source: anyhow::Error) -> Self {
        Self::Finalize {
            component: component.into(),
            source,
        }
    }

    /// Name of the plugin the error is attributed to, if any.
    pub fn component(&self) -> Option<&str> {
        match self {
            Self::Init { component, .. }
            | Self::Run { component, .. }
            | Self::Finalize { component, .. }
            | Self::ConfigFile { component, .. } => Some(component),
            _ => None,
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            Self::Run { .. } => Phase::Runtime,
            Self::ForcedExit { .. } => Phase::ForcedShutdown,
            Self::Finalize { .. } => Phase::Cleanup,
            _ => Phase::Startup,
        }
    }

    pub fn exit_code(&self) -> u8 {
        ExitStatus::from(self).code()
    }
}

/// Process exit classification.
///
/// Startup failures keep code 3 so wrapper scripts that only check for a
/// non-zero status keep working; runtime and forced shutdown get their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    StartupFailure,
    RuntimeFailure,
    ForcedShutdown,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::StartupFailure => 3,
            ExitStatus::RuntimeFailure => 4,
            ExitStatus::ForcedShutdown => 5,
        }
    }
}

impl From<&HostError> for ExitStatus {
    fn from(error: &HostError) -> Self {
        match error.phase() {
            Phase::Startup => ExitStatus::StartupFailure,
            // Finalize failures never surface as the primary outcome, but
            // classify them with the runtime if a caller asks.
            Phase::Runtime | Phase::Cleanup => ExitStatus::RuntimeFailure,
            Phase::ForcedShutdown => ExitStatus::ForcedShutdown,
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

fn humanize(duration: &Duration) -> String {
    crate::flags::format_duration(*duration)
}

pub type Result<T> = std::result::Result<T, HostError>;
