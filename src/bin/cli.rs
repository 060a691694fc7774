//! LodeKV CLI
//!
//! Local administration of a data directory. The directory must not be open
//! by a running server.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use lodekv::{Config, Result, Store};
use tracing_subscriber::{fmt, EnvFilter};

/// LodeKV CLI
#[derive(Parser, Debug)]
#[command(name = "lodekv-cli")]
#[command(about = "Inspect and maintain a LodeKV data directory")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, env = "DB_PATH", default_value = "./lodekv_data")]
    data_dir: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Get a value by key
    Get {
        /// The key to get
        key: String,
    },

    /// Set a key-value pair
    Set {
        /// The key to set
        key: String,

        /// The value to set
        value: String,
    },

    /// Delete a key
    Del {
        /// The key to delete
        key: String,
    },

    /// List key-value pairs in key order
    Scan {
        /// Inclusive lower bound
        #[arg(long)]
        from: Option<String>,

        /// Exclusive upper bound
        #[arg(long)]
        to: Option<String>,

        /// Maximum number of pairs to print
        #[arg(short = 'n', long, default_value = "100")]
        limit: usize,
    },

    /// Flush the memtable to a table file
    Flush,

    /// Run compactions; `--full` merges everything into the last level
    Compact {
        #[arg(long)]
        full: bool,
    },

    /// Print store statistics as JSON
    Stats,
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args = Args::parse();
    let config = Config::builder()
        .data_dir(&args.data_dir)
        .background_compaction(false)
        .build();

    match run(config, args.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config, command: Commands) -> Result<ExitCode> {
    let store = Store::open(config)?;
    let mut code = ExitCode::SUCCESS;

    match command {
        Commands::Get { key } => match store.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => {
                eprintln!("(not found)");
                code = ExitCode::from(2);
            }
        },
        Commands::Set { key, value } => {
            store.put(key.as_bytes(), value.as_bytes())?;
            println!("OK");
        }
        Commands::Del { key } => {
            store.delete(key.as_bytes())?;
            println!("OK");
        }
        Commands::Scan { from, to, limit } => {
            let iter = store.iterate(from.as_deref().map(str::as_bytes), to.as_deref().map(str::as_bytes))?;
            for pair in iter.take(limit) {
                let (key, value) = pair?;
                println!("{}\t{}", String::from_utf8_lossy(&key), String::from_utf8_lossy(&value));
            }
        }
        Commands::Flush => {
            store.flush()?;
            println!("OK");
        }
        Commands::Compact { full } => {
            if full {
                store.compact_all()?;
                println!("OK");
            } else {
                println!("{} compactions", store.compact()?);
            }
        }
        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&store.stats())?);
        }
    }

    store.close()?;
    Ok(code)
}
