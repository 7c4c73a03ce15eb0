use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tokio::signal;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::models::{Quote, SessionClock};
use crate::services::aggregate::read_all_bars;
use crate::services::publish::{serve_bus, FeedBus, FeedSubscriber, VolumeLedger};

/// Per-instrument average cumulative volume for each elapsed session minute,
/// built from historical per-minute bar files.
pub struct OpeningStats {
    averages: HashMap<u32, Vec<f64>>,
    minutes: usize,
}

impl OpeningStats {
    /// Load up to `days` date files at or before `date` from `dir` (file
    /// stems sort chronologically, e.g. `20240102.csv`) and average the
    /// cumulative volume profile per instrument. Unreadable files are
    /// skipped. When running live, `date` has no file yet and the window is
    /// the trailing `days` trading days.
    pub fn load(dir: &Path, date: &str, days: usize, clock: &SessionClock) -> Result<OpeningStats> {
        let minutes = (clock.open_duration_secs() / 60.0).ceil() as usize;
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .map(|stem| stem <= date)
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        let files: Vec<PathBuf> = files.into_iter().rev().take(days).collect();

        let mut sums: HashMap<u32, Vec<f64>> = HashMap::new();
        let mut counts: HashMap<u32, usize> = HashMap::new();
        for path in &files {
            let day = match read_all_bars(path) {
                Ok(day) => day,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "skipping unreadable bar file");
                    continue;
                }
            };
            for (code, bars) in day {
                let mut profile = vec![0.0f64; minutes];
                let mut cumulative = 0.0;
                let mut slot = 0usize;
                for bar in &bars {
                    // A bar stamped exactly on a minute boundary (the
                    // per-minute collector's convention) closes that minute,
                    // so 09:31:00 belongs to the first elapsed minute.
                    let minute = (clock.time_since_open(bar.timestamp) / 60.0).ceil().max(1.0);
                    let index = (minute as usize).min(minutes) - 1;
                    // Carry the running total forward through empty minutes
                    while slot < index {
                        profile[slot] = cumulative;
                        slot += 1;
                    }
                    cumulative += bar.volume;
                    profile[index] = cumulative;
                }
                while slot < minutes {
                    profile[slot] = cumulative;
                    slot += 1;
                }
                let sum = sums.entry(code).or_insert_with(|| vec![0.0; minutes]);
                for (acc, value) in sum.iter_mut().zip(&profile) {
                    *acc += value;
                }
                *counts.entry(code).or_default() += 1;
            }
        }

        let mut averages = HashMap::new();
        for (code, sum) in sums {
            let n = counts[&code] as f64;
            averages.insert(code, sum.into_iter().map(|v| v / n).collect());
        }
        debug!(files = files.len(), instruments = averages.len(), "opening stats loaded");
        Ok(OpeningStats { averages, minutes })
    }

    /// Average cumulative volume for `code` after `elapsed_secs` of trading.
    /// Elapsed time is converted to a whole number of minutes, at least one
    /// and at most the session length.
    pub fn expected_volume(&self, code: u32, elapsed_secs: f64) -> Option<f64> {
        let minute = ((elapsed_secs / 60.0).floor() as i64 + 1).clamp(1, self.minutes as i64);
        let avg = *self.averages.get(&code)?.get(minute as usize - 1)?;
        if avg > 0.0 {
            Some(avg)
        } else {
            None
        }
    }
}

/// Relay quotes from an upstream feed, appending the ratio of each quote's
/// cumulative volume to the historical average at the same elapsed minute.
/// Runs until Ctrl-C, then reports the relayed message count.
pub async fn run_opening_relay(
    config: &AppConfig,
    upstream_host: &str,
    stats: OpeningStats,
    port: u16,
) -> Result<u64> {
    let clock = SessionClock::from_config(&config.session)?;
    let mut upstream =
        FeedSubscriber::connect(upstream_host, config.feed.port, &config.feed.instruments).await?;
    let bus = FeedBus::new();
    let server = serve_bus(bus.clone(), port).await?;
    let mut ledger = VolumeLedger::new();
    let mut relayed = 0u64;

    loop {
        tokio::select! {
            line = upstream.next_line() => {
                let Some(line) = line else {
                    warn!("upstream feed closed");
                    break;
                };
                let Some(quote) = Quote::from_wire(&line) else { continue };
                if !ledger.accept(&quote) {
                    continue;
                }
                let ratio = stats
                    .expected_volume(quote.code, clock.time_since_open(quote.timestamp))
                    .map(|avg| quote.volume / avg)
                    .unwrap_or(0.0);
                bus.publish(format!("{} {:.6}", quote.to_wire(), ratio));
                relayed += 1;
            }
            _ = signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }
    info!(relayed, "opening relay stopped");
    server.abort();
    Ok(relayed)
}

/// Relay quotes as `"<code> <timestamp> <last> <deltaVolume>"` where
/// deltaVolume is the increment over the previously relayed cumulative
/// volume. Runs until Ctrl-C, then reports the relayed message count.
pub async fn run_translated_relay(
    config: &AppConfig,
    upstream_host: &str,
    port: u16,
) -> Result<u64> {
    let mut upstream =
        FeedSubscriber::connect(upstream_host, config.feed.port, &config.feed.instruments).await?;
    let bus = FeedBus::new();
    let server = serve_bus(bus.clone(), port).await?;
    let mut ledger = VolumeLedger::new();
    let mut relayed = 0u64;

    loop {
        tokio::select! {
            line = upstream.next_line() => {
                let Some(line) = line else {
                    warn!("upstream feed closed");
                    break;
                };
                let Some(quote) = Quote::from_wire(&line) else { continue };
                let previous = ledger.last_volume(quote.code);
                if !ledger.accept(&quote) {
                    continue;
                }
                bus.publish(translate(&quote, previous));
                relayed += 1;
            }
            _ = signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }
    info!(relayed, "translated relay stopped");
    server.abort();
    Ok(relayed)
}

fn translate(quote: &Quote, previous_volume: f64) -> String {
    format!(
        "{} {:.6} {:.6} {:.6}",
        quote.code,
        quote.timestamp,
        quote.last,
        quote.volume - previous_volume
    )
}

/// Parse a `YYYYMMDD` relay date argument, defaulting to today in the
/// session timezone.
pub fn resolve_date(date: Option<String>, clock: &SessionClock) -> Result<String> {
    match date {
        Some(date) => {
            if date.len() != 8 || !date.bytes().all(|b| b.is_ascii_digit()) {
                return Err(AppError::InvalidInput(format!("bad date: {date}")));
            }
            Ok(date)
        }
        None => {
            let now = chrono::Utc::now().timestamp() as f64;
            Ok(clock.local_date(now).format("%Y%m%d").to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use chrono::{NaiveDate, NaiveTime, TimeZone};
    use chrono_tz::Asia::Hong_Kong;
    use std::io::Write;

    fn hk_clock() -> SessionClock {
        SessionClock::from_config(&SessionConfig {
            timezone: "Asia/Hong_Kong".to_string(),
            am_open: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            am_close: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            pm_open: NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
            pm_close: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        })
        .unwrap()
    }

    fn hk(h: u32, m: u32, s: u32) -> f64 {
        let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        Hong_Kong
            .from_local_datetime(&date.and_hms_opt(h, m, s).unwrap())
            .unwrap()
            .timestamp() as f64
    }

    fn write_day(dir: &Path, name: &str, rows: &[(u32, f64, f64)]) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        writeln!(f, "code,timestamp,open,high,low,close,volume").unwrap();
        for (code, ts, volume) in rows {
            writeln!(f, "{code},{ts},10,10,10,10,{volume}").unwrap();
        }
    }

    #[test]
    fn test_opening_stats_profile() {
        let dir = tempfile::tempdir().unwrap();
        let clock = hk_clock();
        // One historical day: 100 shares in the first minute, 50 in the third
        write_day(
            dir.path(),
            "20240102.csv",
            &[(700, hk(9, 30, 30), 100.0), (700, hk(9, 32, 30), 50.0)],
        );
        let stats = OpeningStats::load(dir.path(), "20240103", 10, &clock).unwrap();

        // 30s elapsed -> minute 1 -> cumulative 100
        assert_eq!(stats.expected_volume(700, 30.0), Some(100.0));
        // Minute 2 carries the running total forward
        assert_eq!(stats.expected_volume(700, 90.0), Some(100.0));
        assert_eq!(stats.expected_volume(700, 150.0), Some(150.0));
        // Late in the day the full total applies
        assert_eq!(stats.expected_volume(700, 19000.0), Some(150.0));
        // Unknown instrument
        assert_eq!(stats.expected_volume(5, 30.0), None);
    }

    #[test]
    fn test_opening_stats_averages_days() {
        let dir = tempfile::tempdir().unwrap();
        let clock = hk_clock();
        write_day(dir.path(), "20240102.csv", &[(700, hk(9, 30, 30), 100.0)]);
        write_day(dir.path(), "20240103.csv", &[(700, hk(9, 30, 30), 200.0)]);
        // The window is inclusive of `date`; later files stay out
        write_day(dir.path(), "20240104.csv", &[(700, hk(9, 30, 30), 900.0)]);

        let stats = OpeningStats::load(dir.path(), "20240103", 10, &clock).unwrap();
        assert_eq!(stats.expected_volume(700, 30.0), Some(150.0));
    }

    #[test]
    fn test_opening_stats_minute_boundary_bar() {
        let dir = tempfile::tempdir().unwrap();
        let clock = hk_clock();
        // A per-minute collector stamps the first bar 09:31:00; it closes
        // the first elapsed minute, not the second.
        write_day(dir.path(), "20240102.csv", &[(700, hk(9, 31, 0), 100.0)]);
        let stats = OpeningStats::load(dir.path(), "20240103", 10, &clock).unwrap();
        assert_eq!(stats.expected_volume(700, 30.0), Some(100.0));
        assert_eq!(stats.expected_volume(700, 90.0), Some(100.0));
    }

    #[test]
    fn test_opening_stats_day_limit() {
        let dir = tempfile::tempdir().unwrap();
        let clock = hk_clock();
        write_day(dir.path(), "20240102.csv", &[(700, hk(9, 30, 30), 999.0)]);
        write_day(dir.path(), "20240103.csv", &[(700, hk(9, 30, 30), 100.0)]);

        // Only the most recent prior day is considered
        let stats = OpeningStats::load(dir.path(), "20240104", 1, &clock).unwrap();
        assert_eq!(stats.expected_volume(700, 30.0), Some(100.0));
    }

    #[test]
    fn test_translate_delta_volume() {
        let quote = Quote {
            code: 700,
            timestamp: 1000.0,
            open: 10.0,
            high: 11.0,
            low: 9.0,
            last: 10.5,
            volume: 5000.0,
        };
        assert_eq!(translate(&quote, 3000.0), "700 1000.000000 10.500000 2000.000000");
    }

    #[test]
    fn test_resolve_date_validates() {
        let clock = hk_clock();
        assert_eq!(resolve_date(Some("20240102".to_string()), &clock).unwrap(), "20240102");
        assert!(resolve_date(Some("2024-01-02".to_string()), &clock).is_err());
        assert_eq!(resolve_date(None, &clock).unwrap().len(), 8);
    }
}
