use anyhow::Context;
use clap::Parser;
use headcount_config::{ConfigLoader, DEFAULT_CONFIG_FILE};
use headcount_hub::{BroadcastHub, HubServer};
use headcount_shutdown::SignalHandler;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about = "Live count broadcast hub", long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Override hub.host
    #[arg(long)]
    host: Option<String>,

    /// Override hub.port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ConfigLoader::new(&args.config).load()?;
    if let Some(host) = args.host {
        config.hub.host = host;
    }
    if let Some(port) = args.port {
        config.hub.port = port;
    }

    headcount_logging::init_logging(&config.logging)?;
    tracing::info!("Starting headcount hub with config: {}", args.config);

    if config.metrics.enabled {
        let addr = config
            .metrics
            .listen
            .parse()
            .with_context(|| format!("Invalid metrics listen address {}", config.metrics.listen))?;
        headcount_core::metrics::init_metrics(addr)?;
    }

    let (signals, shutdown) = SignalHandler::new();
    let hub = Arc::new(BroadcastHub::new(config.hub.subscriber_queue));
    let server = HubServer::bind(
        &config.hub.bind_address(),
        hub,
        config.hub.ping_interval(),
        shutdown,
    )
    .with_context(|| format!("Failed to bind {}", config.hub.bind_address()))?;

    tokio::spawn(async move {
        signals.listen_for_system_signals().await;
    });

    server.run().await?;
    Ok(())
}
