use std::collections::HashMap;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::Quote;

const BUS_CAPACITY: usize = 1024;

/// Last published cumulative volume per instrument. Owned exclusively by the
/// single publish loop; lives for the process lifetime, no persistence.
#[derive(Debug, Default)]
pub struct VolumeLedger {
    volumes: HashMap<u32, f64>,
}

impl VolumeLedger {
    pub fn new() -> Self {
        VolumeLedger::default()
    }

    /// Accept iff the quote's cumulative volume strictly exceeds the last
    /// published volume for that instrument (first observation compares
    /// against 0). Stale and duplicate responses from racing proxies fail
    /// this test and are dropped, never reordered.
    pub fn accept(&mut self, quote: &Quote) -> bool {
        let entry = self.volumes.entry(quote.code).or_insert(0.0);
        if quote.volume > *entry {
            *entry = quote.volume;
            true
        } else {
            false
        }
    }

    pub fn last_volume(&self, code: u32) -> f64 {
        self.volumes.get(&code).copied().unwrap_or(0.0)
    }
}

/// In-process fan-out channel for published feed lines. Cheap to clone;
/// subscribers filter by code prefix themselves, mirroring the prefix
/// subscription semantics of the external bus.
#[derive(Clone)]
pub struct FeedBus {
    tx: broadcast::Sender<String>,
}

impl FeedBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        FeedBus { tx }
    }

    /// Returns the number of live subscribers that received the line.
    pub fn publish(&self, line: String) -> usize {
        self.tx.send(line).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for FeedBus {
    fn default() -> Self {
        FeedBus::new()
    }
}

/// Monotonic-volume filter plus publication. The only writer of the ledger.
pub struct FeedPublisher {
    ledger: VolumeLedger,
    bus: FeedBus,
    published: u64,
}

impl FeedPublisher {
    pub fn new(bus: FeedBus) -> Self {
        FeedPublisher { ledger: VolumeLedger::new(), bus, published: 0 }
    }

    /// Publish the quote if it passes the monotonic-volume filter.
    pub fn accept(&mut self, quote: &Quote) -> bool {
        if !self.ledger.accept(quote) {
            return false;
        }
        let line = quote.to_wire();
        info!(feed = %line, "publish");
        self.bus.publish(line);
        self.published += 1;
        true
    }

    pub fn published(&self) -> u64 {
        self.published
    }
}

/// Accept TCP subscribers for the bus. A client sends one line of
/// space-separated code prefixes (empty line subscribes to everything), then
/// receives every published line matching one of its prefixes.
pub async fn serve_bus(bus: FeedBus, port: u16) -> Result<JoinHandle<()>> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| Error::Network(format!("cannot bind feed port {}: {}", port, e)))?;
    info!(port, "feed bus listening");

    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "subscriber connected");
                    tokio::spawn(serve_subscriber(stream, bus.subscribe()));
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                }
            }
        }
    });
    Ok(handle)
}

async fn serve_subscriber(stream: TcpStream, mut rx: broadcast::Receiver<String>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut subscription = String::new();
    if reader.read_line(&mut subscription).await.is_err() {
        return;
    }
    let prefixes: Vec<String> = subscription.split_whitespace().map(String::from).collect();

    loop {
        match rx.recv().await {
            Ok(line) => {
                if !matches_prefixes(&line, &prefixes) {
                    continue;
                }
                if write_half.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
                    debug!("subscriber disconnected");
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                // A slow subscriber loses old lines rather than stalling the bus.
                warn!(missed, "subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

pub fn matches_prefixes(line: &str, prefixes: &[String]) -> bool {
    prefixes.is_empty() || prefixes.iter().any(|p| line.starts_with(p.as_str()))
}

/// Client side of the bus protocol, used by relay processes.
pub struct FeedSubscriber {
    reader: BufReader<TcpStream>,
}

impl FeedSubscriber {
    pub async fn connect(host: &str, port: u16, codes: &[u32]) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::Network(format!("cannot reach bus at {}:{}: {}", host, port, e)))?;
        let mut reader = BufReader::new(stream);
        let subscription: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        reader
            .get_mut()
            .write_all(format!("{}\n", subscription.join(" ")).as_bytes())
            .await
            .map_err(|e| Error::Network(format!("cannot send subscription: {}", e)))?;
        Ok(FeedSubscriber { reader })
    }

    /// Next line from the bus, or `None` when the connection closes.
    pub async fn next_line(&mut self) -> Option<String> {
        let mut line = String::new();
        match self.reader.read_line(&mut line).await {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim_end().to_string()),
        }
    }
}
