use std::{error::Error, net::SocketAddr, sync::mpsc, time::Duration};

use clap::Parser;
use hs2client::{
    ProtocolVersion,
    server::{ReferenceServer, ServerConfig},
};
use log::info;

#[derive(Debug, Parser)]
#[command(about = "In-memory HiveServer2-style server for local testing")]
struct Cli {
    /// Listen for new connections at address
    #[arg(default_value = "127.0.0.1:10000")]
    address: SocketAddr,
    /// Oldest protocol version accepted
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=7))]
    min_protocol: u8,
    /// Newest protocol version offered
    #[arg(long, default_value_t = 7, value_parser = clap::value_parser!(u8).range(1..=7))]
    max_protocol: u8,
    /// Milliseconds a statement stays RUNNING before it executes
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,
    /// Serve result metadata while statements are still running
    #[arg(long)]
    early_metadata: bool,
    /// Seconds of inactivity after which a session expires
    #[arg(long)]
    idle_timeout_secs: Option<u64>,
    /// Number of connection worker threads
    #[arg(long, default_value_t = 8)]
    workers: usize,
}

fn version(value: u8) -> Result<ProtocolVersion, Box<dyn Error>> {
    ProtocolVersion::try_from(value).map_err(|v| format!("unknown protocol version {v}").into())
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = ServerConfig::default()
        .with_protocol_range(version(cli.min_protocol)?, version(cli.max_protocol)?)
        .with_execution_delay(Duration::from_millis(cli.delay_ms))
        .with_metadata_before_finish(cli.early_metadata)
        .with_session_idle_timeout(cli.idle_timeout_secs.map(Duration::from_secs))
        .with_workers(cli.workers);

    let server = ReferenceServer::bind(cli.address, config)?;
    let handle = server.spawn()?;
    info!("serving on {}", handle.addr());

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    rx.recv()?;

    info!("shutting down");
    handle.shutdown();
    Ok(())
}
