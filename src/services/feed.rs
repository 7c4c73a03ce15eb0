use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::FeedConfig;
use crate::models::{FetchResult, FetchTask, SessionClock};
use crate::services::pool::{TaskPool, TaskSubmitter};
use crate::services::publish::FeedPublisher;
use crate::services::realtime;
use crate::services::scheduler::{SessionScheduler, SessionState, Transition};

/// Steady-state polling cycle: one in-flight fetch per instrument while the
/// session is active, each completed result immediately spawning its
/// replacement. The loop body is the sole owner of every piece of mutable
/// state (ledger, counters, session state), so none of it needs a lock.
pub struct IngestionLoop {
    config: FeedConfig,
    clock: SessionClock,
    /// Rotation set; `None` entries mean direct connection.
    proxies: Vec<Option<String>>,
    publisher: FeedPublisher,
}

impl IngestionLoop {
    pub fn new(
        config: FeedConfig,
        clock: SessionClock,
        proxies: Vec<Option<String>>,
        publisher: FeedPublisher,
    ) -> Self {
        let proxies = if proxies.is_empty() { vec![None] } else { proxies };
        IngestionLoop { config, clock, proxies, publisher }
    }

    /// Run until interrupted. Returns the number of quotes published.
    pub async fn run(mut self) -> u64 {
        let poll_timeout = Duration::from_millis(self.config.poll_timeout_ms);
        let fetch_timeout = Duration::from_secs(self.config.fetch_timeout_secs);

        let mut pool: TaskPool<FetchResult> = TaskPool::new(self.config.workers);
        let Some(submitter) = pool.submitter() else {
            return 0;
        };
        let mut scheduler =
            SessionScheduler::new(self.config.resume_wait_secs, self.config.pause_wait_secs);

        // Monotonic submission counter: drives both proxy rotation and
        // upstream-source rotation.
        let mut submissions: u64 = 0;
        let mut failures: HashMap<u32, u32> = HashMap::new();

        info!(
            instruments = self.config.instruments.len(),
            proxies = self.proxies.len(),
            workers = self.config.workers,
            "starting ingestion loop"
        );

        loop {
            let result = tokio::select! {
                r = pool.poll(poll_timeout) => r,
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, shutting down ingestion");
                    break;
                }
            };

            if let Some(result) = &result {
                match result {
                    FetchResult::Quote(quote) => {
                        failures.remove(&quote.code);
                        self.publisher.accept(quote);
                    }
                    FetchResult::Failed { code } => {
                        *failures.entry(*code).or_insert(0) += 1;
                    }
                }
            }

            let now = now_epoch();
            let bounds = self.clock.bounds_for(now);

            match scheduler.state() {
                SessionState::Paused => {
                    if scheduler.tick(now, &bounds) == Some(Transition::Resumed) {
                        info!("session resuming, seeding fetch tasks");
                        failures.clear();
                        for code in self.config.instruments.clone() {
                            self.submit(&submitter, code, &mut submissions, fetch_timeout, false);
                        }
                    }
                }
                SessionState::Active => {
                    // Each drained result replaces itself with a fresh task
                    // for the same instrument.
                    if let Some(result) = &result {
                        let code = result.code();
                        let consecutive = failures.get(&code).copied().unwrap_or(0);
                        if result.is_failure() && self.config.retry.exhausted(consecutive) {
                            warn!(code, consecutive, "retry budget exhausted until next session resume");
                        } else {
                            let delay = result.is_failure() && self.config.retry.backoff_ms > 0;
                            self.submit(&submitter, code, &mut submissions, fetch_timeout, delay);
                        }
                    }
                    if scheduler.tick(now, &bounds) == Some(Transition::Paused) {
                        info!("session closed, polling paused");
                    }
                }
            }
        }

        let published = self.publisher.published();
        info!(published, "feeds published");
        pool.shutdown();
        published
    }

    fn submit(
        &self,
        submitter: &TaskSubmitter<FetchResult>,
        code: u32,
        submissions: &mut u64,
        fetch_timeout: Duration,
        delay: bool,
    ) {
        let index = *submissions;
        *submissions += 1;
        let task = FetchTask {
            code,
            attempt: index,
            proxy: self.proxies[(index % self.proxies.len() as u64) as usize].clone(),
        };
        let backoff = Duration::from_millis(self.config.retry.backoff_ms);
        submitter.submit(async move {
            if delay {
                tokio::time::sleep(backoff).await;
            }
            execute(task, fetch_timeout).await
        });
    }
}

/// Run one fetch task to completion. Infallible by construction: any
/// upstream failure becomes a sentinel carrying the instrument code.
async fn execute(task: FetchTask, timeout: Duration) -> FetchResult {
    match realtime::fetch(task.code, task.attempt, task.proxy.as_deref(), timeout).await {
        Some(quote) => FetchResult::Quote(quote),
        None => FetchResult::Failed { code: task.code },
    }
}

fn now_epoch() -> f64 {
    Utc::now().timestamp() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_round_robin() {
        let proxies: Vec<Option<String>> = vec![
            None,
            Some("http://a:1".to_string()),
            Some("http://b:2".to_string()),
        ];
        let picks: Vec<Option<&str>> = (0u64..7)
            .map(|i| proxies[(i % proxies.len() as u64) as usize].as_deref())
            .collect();
        assert_eq!(
            picks,
            vec![
                None,
                Some("http://a:1"),
                Some("http://b:2"),
                None,
                Some("http://a:1"),
                Some("http://b:2"),
                None,
            ]
        );
    }

    #[test]
    fn test_empty_proxy_list_falls_back_to_direct() {
        use crate::config::{FeedConfig, RetryConfig};
        use crate::services::publish::{FeedBus, FeedPublisher};

        let config = FeedConfig {
            instruments: vec![1],
            workers: 1,
            port: 0,
            resume_wait_secs: 300.0,
            pause_wait_secs: 300.0,
            poll_timeout_ms: 100,
            fetch_timeout_secs: 1,
            retry: RetryConfig::default(),
        };
        let clock = test_clock();
        let ingest =
            IngestionLoop::new(config, clock, Vec::new(), FeedPublisher::new(FeedBus::new()));
        assert_eq!(ingest.proxies, vec![None]);
    }

    fn test_clock() -> SessionClock {
        use crate::config::SessionConfig;
        use chrono::NaiveTime;
        SessionClock::from_config(&SessionConfig {
            timezone: "Asia/Hong_Kong".to_string(),
            am_open: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            am_close: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            pm_open: NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
            pm_close: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        })
        .unwrap()
    }
}
