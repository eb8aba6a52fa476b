use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use stream_receiver::{ReceiverConfig, StreamingService};
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => ReceiverConfig::from_file(Path::new(&path))?,
        None => ReceiverConfig::default(),
    };

    let level = if config.debug { "stream_receiver=debug" } else { "stream_receiver=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(level.parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    info!("Starting streaming receiver");

    if config.prometheus_metrics {
        metrics_exporter_prometheus::PrometheusBuilder::new().install()?;
        info!("Prometheus metrics exporter installed");
    }

    let service = StreamingService::new(config);
    service.set_callback(Arc::new(|frame| {
        debug!(frame, "frame delivered");
    }));
    service.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down streaming receiver");
    service.stop().await;

    Ok(())
}
