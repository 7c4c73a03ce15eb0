use std::path::PathBuf;

use crate::config::AppConfig;
use crate::models::SessionClock;
use crate::services::relay::{resolve_date, run_opening_relay, run_translated_relay, OpeningStats};

pub async fn run_opening(
    config_path: PathBuf,
    host: String,
    port: u16,
    directory: Option<PathBuf>,
    date: Option<String>,
    days: usize,
) {
    let config = load_config(&config_path);
    let clock = load_clock(&config);
    let directory = directory.unwrap_or_else(|| config.history.prices_dir.clone());
    let date = match resolve_date(date, &clock) {
        Ok(date) => date,
        Err(e) => {
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    println!("📚 Loading up to {} days before {} from {}", days, date, directory.display());
    let stats = match OpeningStats::load(&directory, &date, days, &clock) {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("❌ Error loading history from {}: {}", directory.display(), e);
            std::process::exit(1);
        }
    };

    println!("🔁 Relaying {}:{} -> port {} (Ctrl-C to stop)", host, config.feed.port, port);
    match run_opening_relay(&config, &host, stats, port).await {
        Ok(relayed) => println!("✅ Relayed {} quotes", relayed),
        Err(e) => {
            eprintln!("❌ Relay failed: {}", e);
            std::process::exit(1);
        }
    }
}

pub async fn run_translated(config_path: PathBuf, host: String, port: u16) {
    let config = load_config(&config_path);
    println!("🔁 Relaying {}:{} -> port {} (Ctrl-C to stop)", host, config.feed.port, port);
    match run_translated_relay(&config, &host, port).await {
        Ok(relayed) => println!("✅ Relayed {} quotes", relayed),
        Err(e) => {
            eprintln!("❌ Relay failed: {}", e);
            std::process::exit(1);
        }
    }
}

fn load_config(path: &std::path::Path) -> AppConfig {
    match AppConfig::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Error loading config {}: {}", path.display(), e);
            std::process::exit(1);
        }
    }
}

fn load_clock(config: &AppConfig) -> SessionClock {
    match SessionClock::from_config(&config.session) {
        Ok(clock) => clock,
        Err(e) => {
            eprintln!("❌ Invalid session config: {}", e);
            std::process::exit(1);
        }
    }
}
