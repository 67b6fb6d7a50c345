mod config;
mod events;
mod rooms;
mod server;

use anyhow::Result;
use clap::Parser;

use config::RelayServerConfig;
use server::RelayServer;

#[derive(Parser)]
#[command(name = "tandem-relay")]
#[command(about = "Room relay for tandem sessions")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = 8787)]
    port: u16,

    #[arg(short, long, default_value_t = 8, help = "Peers allowed per room")]
    max_peers: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let config = RelayServerConfig {
        max_peers_per_room: args.max_peers,
        ..Default::default()
    };

    let server = RelayServer::bind(&bind_addr, config).await?;
    log::info!("Relay listening on {}", server.local_addr()?);
    server.run().await
}
