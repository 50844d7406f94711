use anyhow::Context;
use clap::Parser;
use headcount_config::{ConfigLoader, DEFAULT_CONFIG_FILE};
use headcount_shutdown::SignalHandler;
use std::path::PathBuf;
use tokio::io::BufReader;

#[derive(Parser, Debug)]
#[command(author, version, about = "Line-crossing people counter", long_about = None)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Tracker output (NDJSON frames); reads stdin when omitted
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Do not publish counts to the hub
    #[arg(long)]
    offline: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ConfigLoader::new(&args.config).load()?;
    if args.offline {
        config.publisher.enabled = false;
    }

    headcount_logging::init_logging(&config.logging)?;
    tracing::info!("Starting headcount with config: {}", args.config);

    if config.metrics.enabled {
        let addr = config
            .metrics
            .listen
            .parse()
            .with_context(|| format!("Invalid metrics listen address {}", config.metrics.listen))?;
        headcount_core::metrics::init_metrics(addr)?;
    }

    let (signals, shutdown) = SignalHandler::new();
    let listener = signals.clone();
    tokio::spawn(async move {
        listener.listen_for_system_signals().await;
    });

    let final_state = match args.input {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open input {}", path.display()))?;
            headcount_server::run(&config, BufReader::new(file), shutdown).await?
        }
        None => headcount_server::run(&config, BufReader::new(tokio::io::stdin()), shutdown).await?,
    };

    tracing::info!(
        daily_total = final_state.daily_total,
        occupancy = final_state.occupancy,
        "Exiting"
    );
    Ok(())
}
