use pluginhost::plugins::{Banner, EchoServer, Heartbeat};
use pluginhost::{Application, Configurator};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> ExitCode {
    let banner = Arc::new(Banner::default());
    let echo = Arc::new(EchoServer::default());
    let heartbeat = Arc::new(Heartbeat::new(Duration::from_secs(5)));

    let app = Application::new("pluginhost")
        .with_about("Runs a set of plugins through init, run and fini")
        .with_version_info(|| format!("pluginhost {}", env!("CARGO_PKG_VERSION")))
        .with_configurator(Configurator::new().with_env_prefix("PLUGINHOST"))
        .with_logging(true)
        .register(banner.clone(), Some(banner.config().into()))
        .register(echo.clone(), Some(echo.config().into()))
        .register(heartbeat, None);

    app.main(std::env::args_os()).await.into()
}
