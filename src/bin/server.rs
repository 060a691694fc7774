//! LodeKV Server Binary
//!
//! Opens the store and serves the HTTP API.

use std::sync::Arc;

use clap::Parser;
use lodekv::network::Server;
use lodekv::{Config, Store};
use tracing_subscriber::{fmt, EnvFilter};

/// LodeKV Server
#[derive(Parser, Debug)]
#[command(name = "lodekv-server")]
#[command(about = "HTTP front end for the LodeKV key-value store")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, env = "DB_PATH", default_value = "./lodekv_data")]
    data_dir: String,

    /// Listen address (host:port)
    #[arg(short, long, env = "LODEKV_LISTEN", default_value = "127.0.0.1:3000")]
    listen: String,

    /// Maximum concurrent connections
    #[arg(short, long, default_value = "1024")]
    max_connections: usize,

    /// MemTable size limit in MB before flush
    #[arg(short = 'M', long, default_value = "4")]
    memtable_mb: usize,

    /// Disable the background compaction thread
    #[arg(long)]
    no_background_compaction: bool,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lodekv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("LodeKV Server v{}", lodekv::VERSION);
    tracing::info!("Data directory: {}", args.data_dir);
    tracing::info!("Listen address: {}", args.listen);

    let config = Config::builder()
        .data_dir(&args.data_dir)
        .listen_addr(&args.listen)
        .max_connections(args.max_connections)
        .memtable_size_limit(args.memtable_mb * 1024 * 1024)
        .background_compaction(!args.no_background_compaction)
        .build();

    let store = match Store::open(config.clone()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    let server = match Server::bind(config, Arc::clone(&store)) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", args.listen, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = server.shutdown_on_signal() {
        tracing::error!("{}", e);
        std::process::exit(1);
    }

    if let Err(e) = server.run() {
        tracing::error!("Server error: {}", e);
    }
    drop(server);

    // The server joined its connections, so this is the last handle
    match Arc::try_unwrap(store) {
        Ok(store) => {
            if let Err(e) = store.close() {
                tracing::error!("Failed to close store: {}", e);
                std::process::exit(1);
            }
        }
        Err(_) => tracing::warn!("store still shared at exit; relying on WAL recovery"),
    }

    tracing::info!("Server stopped");
}
