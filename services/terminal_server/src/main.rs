use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use terminal_server::{CommandServer, ServerConfig, SimTerminal};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::from_file(Path::new(&path))?,
        None => ServerConfig::default(),
    };

    let level = if config.debug { "terminal_server=debug" } else { "terminal_server=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(level.parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    info!("Starting terminal server");

    let terminal = Arc::new(SimTerminal::new());
    let mut server = CommandServer::bind(&config, terminal)?;

    // The host timer stands in for the terminal's charting runtime: each
    // firing drives exactly one cooperative tick.
    let mut timer = tokio::time::interval(Duration::from_millis(config.poll_interval_ms));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down terminal server");
                break;
            }
            _ = timer.tick() => server.tick(),
        }
    }

    Ok(())
}
