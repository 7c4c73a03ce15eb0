use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::commands;

#[derive(Parser)]
#[command(name = "barfeed")]
#[command(about = "Realtime quote feed and bar aggregation CLI", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Poll realtime quotes and publish them on the feed bus
    Feed {
        /// Path to the TOML config file
        #[arg(short, long, default_value = "barfeed.toml")]
        config: PathBuf,
    },
    /// Crawl, health-check and persist proxy endpoints
    UpdateProxies {
        #[arg(short, long, default_value = "barfeed.toml")]
        config: PathBuf,
        /// Concurrent health checks
        #[arg(short, long, default_value_t = 8)]
        workers: usize,
    },
    /// Group a bar file into a coarser timeframe, optionally back-adjusted
    Aggregate {
        #[arg(short, long, default_value = "barfeed.toml")]
        config: PathBuf,
        /// Input bar CSV file
        #[arg(short, long)]
        input: PathBuf,
        /// Target timeframe: 1m, 5m, 15m, 30m, 60m, am-pm, daily
        #[arg(short, long)]
        timeframe: String,
        /// Instrument code
        #[arg(long)]
        code: u32,
        /// Corporate-action CSV file
        #[arg(short, long)]
        actions: Option<PathBuf>,
        /// Output CSV file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Relay the feed with an opening volume ratio appended
    RelayOpening {
        #[arg(short, long, default_value = "barfeed.toml")]
        config: PathBuf,
        /// Upstream feed host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port this relay publishes on
        #[arg(short, long)]
        port: u16,
        /// Directory of per-date minute-bar files (defaults to history.prices_dir)
        #[arg(short, long)]
        directory: Option<PathBuf>,
        /// Trading date YYYYMMDD (defaults to today)
        #[arg(long)]
        date: Option<String>,
        /// Historical days to average over
        #[arg(long, default_value_t = 10)]
        days: usize,
    },
    /// Relay the feed as "<code> <timestamp> <last> <deltaVolume>"
    RelayTranslated {
        #[arg(short, long, default_value = "barfeed.toml")]
        config: PathBuf,
        /// Upstream feed host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port this relay publishes on
        #[arg(short, long)]
        port: u16,
    },
}

pub async fn run() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Feed { config } => {
            commands::feed::run(config).await;
        }
        Commands::UpdateProxies { config, workers } => {
            commands::update_proxies::run(config, workers).await;
        }
        Commands::Aggregate { config, input, timeframe, code, actions, output } => {
            commands::aggregate::run(config, input, timeframe, code, actions, output);
        }
        Commands::RelayOpening { config, host, port, directory, date, days } => {
            commands::relay::run_opening(config, host, port, directory, date, days).await;
        }
        Commands::RelayTranslated { config, host, port } => {
            commands::relay::run_translated(config, host, port).await;
        }
    }
}
