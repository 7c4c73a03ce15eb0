use std::path::PathBuf;

use crate::config::AppConfig;
use crate::models::SessionClock;
use crate::services::feed::IngestionLoop;
use crate::services::proxy::ProxyManager;
use crate::services::publish::{serve_bus, FeedBus, FeedPublisher};

pub async fn run(config_path: PathBuf) {
    let config = match AppConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Error loading config {}: {}", config_path.display(), e);
            std::process::exit(1);
        }
    };
    let clock = match SessionClock::from_config(&config.session) {
        Ok(clock) => clock,
        Err(e) => {
            eprintln!("❌ Invalid session config: {}", e);
            std::process::exit(1);
        }
    };

    let proxies: Vec<Option<String>> = ProxyManager::new(config.proxy.clone())
        .load_persisted()
        .into_iter()
        .map(Some)
        .collect();
    if proxies.is_empty() {
        println!("⚠️  No proxies on file, fetching directly");
    } else {
        println!("🌐 Rotating across {} proxies", proxies.len());
    }

    let bus = FeedBus::new();
    let server = match serve_bus(bus.clone(), config.feed.port).await {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("❌ Cannot serve feed on port {}: {}", config.feed.port, e);
            std::process::exit(1);
        }
    };
    println!(
        "🚀 Feeding {} instruments on port {} (Ctrl-C to stop)",
        config.feed.instruments.len(),
        config.feed.port
    );

    let publisher = FeedPublisher::new(bus);
    let ingestion = IngestionLoop::new(config.feed, clock, proxies, publisher);
    let published = ingestion.run().await;

    server.abort();
    println!("✅ Published {} quotes", published);
}
