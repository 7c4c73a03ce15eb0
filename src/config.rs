use crate::error::{Error, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub feed: FeedConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub history: HistoryConfig,
}

/// Exchange trading-session boundaries for one calendar day.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// IANA timezone of the exchange, e.g. "Asia/Hong_Kong"
    pub timezone: String,
    pub am_open: NaiveTime,
    pub am_close: NaiveTime,
    pub pm_open: NaiveTime,
    pub pm_close: NaiveTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Instrument codes to poll
    pub instruments: Vec<u32>,
    /// Worker count for the fetch pool
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// TCP port the feed bus listens on
    pub port: u16,
    /// Seconds before a session open at which polling resumes
    #[serde(default = "default_resume_wait")]
    pub resume_wait_secs: f64,
    /// Seconds after a session close at which polling pauses
    #[serde(default = "default_pause_wait")]
    pub pause_wait_secs: f64,
    /// Consumer-loop poll timeout; a liveness knob, not a correctness one
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Per-fetch network timeout
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry policy for transient fetch failures. The defaults reproduce the
/// historical behavior: retry forever, no backoff.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RetryConfig {
    /// Consecutive failures before an instrument stops being resubmitted
    /// until the next session resume. 0 means unbounded.
    pub max_attempts: u32,
    /// Delay before resubmitting after a failure. 0 means immediate.
    pub backoff_ms: u64,
}

impl RetryConfig {
    pub fn exhausted(&self, consecutive_failures: u32) -> bool {
        self.max_attempts > 0 && consecutive_failures >= self.max_attempts
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Persisted list of validated endpoints, one per line
    pub file: Option<PathBuf>,
    /// Seed pages for discovery crawling
    pub seed_sites: Vec<String>,
    /// Maximum number of distinct pages visited per crawl
    pub link_budget: usize,
    /// Substrings a link's host must contain to enter the crawl frontier
    pub allow_domains: Vec<String>,
    /// Realtime fetches a candidate must pass in a row to be retained
    pub check_tries: u32,
    /// Per-attempt timeout during health checks
    pub check_timeout_secs: u64,
    /// Instrument used as the health-check probe
    pub probe_code: u32,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HistoryConfig {
    /// Directory of per-date minute-bar CSV files
    pub prices_dir: PathBuf,
}

fn default_workers() -> usize {
    8
}

fn default_resume_wait() -> f64 {
    300.0
}

fn default_pause_wait() -> f64 {
    300.0
}

fn default_poll_timeout_ms() -> u64 {
    500
}

fn default_fetch_timeout() -> u64 {
    5
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: AppConfig = toml::from_str(&contents)?;
        if config.feed.instruments.is_empty() {
            return Err(Error::Config("feed.instruments must not be empty".to_string()));
        }
        if config.feed.workers == 0 {
            return Err(Error::Config("feed.workers must be at least 1".to_string()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[session]
timezone = "Asia/Hong_Kong"
am_open = "09:30:00"
am_close = "12:00:00"
pm_open = "13:00:00"
pm_close = "16:00:00"

[feed]
instruments = [1, 5, 700]
port = 5556

[feed.retry]
max_attempts = 3
backoff_ms = 250

[proxy]
seed_sites = ["http://proxies.example/list"]
link_budget = 100
allow_domains = ["blogspot"]
check_tries = 16
check_timeout_secs = 5
probe_code = 1
"#;

    #[test]
    fn test_load_sample() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(SAMPLE.as_bytes()).unwrap();
        let config = AppConfig::load(f.path()).unwrap();
        assert_eq!(config.feed.instruments, vec![1, 5, 700]);
        assert_eq!(config.feed.workers, 8);
        assert_eq!(config.feed.port, 5556);
        assert_eq!(config.session.am_open, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(config.feed.retry.max_attempts, 3);
        assert_eq!(config.proxy.link_budget, 100);
    }

    #[test]
    fn test_retry_exhaustion() {
        let unbounded = RetryConfig::default();
        assert!(!unbounded.exhausted(1_000_000));

        let bounded = RetryConfig { max_attempts: 3, backoff_ms: 0 };
        assert!(!bounded.exhausted(2));
        assert!(bounded.exhausted(3));
    }

    #[test]
    fn test_empty_whitelist_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        let bad = SAMPLE.replace("instruments = [1, 5, 700]", "instruments = []");
        f.write_all(bad.as_bytes()).unwrap();
        assert!(AppConfig::load(f.path()).is_err());
    }
}
