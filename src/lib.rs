pub mod app;
pub mod application;
pub mod config;
pub mod error;
pub mod flags;
pub mod logging;
pub mod plugin;
pub mod plugins;
pub mod registry;

pub use app::{
    termination_signal, ComponentState, Lifecycle, LifecycleOptions, LifecyclePhase, RunReport,
    ShutdownReason, DEFAULT_GRACE_PERIOD,
};
pub use application::{Application, Completion, VersionInfo};
pub use config::{ConfigFormat, ConfigSlot, Configurations, Configurator, Slot};
pub use error::{ExitStatus, HostError, Result};
pub use flags::{Flag, FlagSet, FlagValue};
pub use logging::{LogFormat, LoggingOptions};
pub use plugin::{Capabilities, Flagger, Plugin, Runner};
pub use registry::{Component, Registry};
