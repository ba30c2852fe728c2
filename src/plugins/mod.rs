//! Plugins shipped with the host binary.
//!
//! Together they cover each capability combination: [`Banner`] declares
//! flags and configuration but never runs, [`Heartbeat`] only runs, and
//! [`EchoServer`] does all three.

mod banner;
mod echo;
mod heartbeat;

pub use banner::{Banner, BannerConfig};
pub use echo::{EchoConfig, EchoServer};
pub use heartbeat::Heartbeat;
