mod server;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use parley_api::{init_logging, Config};

use server::ParleyServer;

#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "Parley WebRTC SFU signaling server", long_about = None)]
struct Args {
    /// Path to a YAML/TOML/JSON config file
    #[arg(short, long, env = "PARLEY_CONFIG_PATH", default_value = "config.yaml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load configuration
    let config = Config::load(Some(&args.config))?;

    // 2. Validate configuration (fail fast, report everything at once)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    init_logging(&config.logging)?;
    info!("Parley server starting...");
    info!("HTTP address: {}", config.http_address());
    info!(
        engine = ?config.sfu.engine,
        rtc_ports = %format!("{}-{}", config.sfu.rtc_min_port, config.sfu.rtc_max_port),
        enforce_transport_ownership = config.sfu.enforce_transport_ownership,
        "SFU settings"
    );

    // 4. Start the routing engine and serve
    let server = ParleyServer::start(config).await?;
    server.run().await
}
