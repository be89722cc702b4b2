use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use smsgated::bootstrap::Server;
use smsgated::config::Config;
use smsgated::telemetry::{init_tracing, TracingConfig};

#[derive(Parser, Debug)]
#[command(name = "smsgated")]
#[command(author, version, about = "Carrier-facing SMS/MMS gateway and router")]
struct Args {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Validate config and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration first (to get log settings)
    let config = Config::load(&args.config)?;

    let tracing_config = TracingConfig {
        log_level: config.telemetry.log_level.clone(),
        json_logs: config.telemetry.json_logs,
    };
    init_tracing(&tracing_config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "starting smsgated"
    );

    info!(
        clients = config.clients.len(),
        routes = config.routes.len(),
        carriers = config.carriers.len(),
        "configuration loaded"
    );

    if args.validate {
        info!("configuration is valid");
        return Ok(());
    }

    let server = Server::new(config)?;
    server.run().await?;

    Ok(())
}
