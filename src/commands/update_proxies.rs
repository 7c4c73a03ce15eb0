use std::path::PathBuf;

use crate::config::AppConfig;
use crate::services::proxy::ProxyManager;

pub async fn run(config_path: PathBuf, workers: usize) {
    let config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Error loading config {}: {}", config_path.display(), e);
            std::process::exit(1);
        }
    };

    let manager = ProxyManager::new(config.proxy);
    println!("🕷️  Crawling proxy lists (Ctrl-C for partial results)...");
    let candidates = manager.crawl().await;
    println!("🔎 Found {} candidate endpoints, health-checking...", candidates.len());

    let healthy = manager.check_proxies(candidates, workers).await;
    println!("✅ {} endpoints passed the health check", healthy.len());

    match manager.persist_union(&healthy) {
        Ok(all) => println!("💾 Proxy file now holds {} endpoints", all.len()),
        Err(e) => {
            eprintln!("❌ Could not persist proxy file: {}", e);
            std::process::exit(1);
        }
    }
}
