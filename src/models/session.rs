use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::config::SessionConfig;
use crate::error::{Error, Result};

/// Wall-clock trading-session boundaries for one calendar day.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionWindow {
    pub am_open: NaiveTime,
    pub am_close: NaiveTime,
    pub pm_open: NaiveTime,
    pub pm_close: NaiveTime,
}

/// Absolute session boundaries for one particular trading day, epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionBounds {
    pub am_open: f64,
    pub am_close: f64,
    pub pm_open: f64,
    pub pm_close: f64,
}

fn secs_of(t: NaiveTime) -> f64 {
    t.num_seconds_from_midnight() as f64 + t.nanosecond() as f64 * 1e-9
}

/// Binds a `SessionWindow` to the exchange timezone and answers all of the
/// session-geometry questions the aggregator and schedulers ask.
#[derive(Debug, Clone)]
pub struct SessionClock {
    tz: Tz,
    pub window: SessionWindow,
}

impl SessionClock {
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        let tz: Tz = config
            .timezone
            .parse()
            .map_err(|e| Error::Config(format!("bad timezone '{}': {}", config.timezone, e)))?;
        let window = SessionWindow {
            am_open: config.am_open,
            am_close: config.am_close,
            pm_open: config.pm_open,
            pm_close: config.pm_close,
        };
        if window.am_open >= window.am_close || window.am_close >= window.pm_open
            || window.pm_open >= window.pm_close
        {
            return Err(Error::Config("session times must be ordered".to_string()));
        }
        Ok(SessionClock { tz, window })
    }

    fn local(&self, timestamp: f64) -> DateTime<Tz> {
        let secs = timestamp.floor() as i64;
        let nanos = ((timestamp - secs as f64) * 1e9) as u32;
        Utc.timestamp_opt(secs, nanos)
            .single()
            .or_else(|| Utc.timestamp_opt(secs, 0).single())
            .unwrap_or_default()
            .with_timezone(&self.tz)
    }

    /// Seconds since local midnight in the exchange timezone.
    pub fn seconds_of_day(&self, timestamp: f64) -> f64 {
        let local = self.local(timestamp);
        secs_of(local.time())
    }

    /// Local calendar date in the exchange timezone.
    pub fn local_date(&self, timestamp: f64) -> NaiveDate {
        self.local(timestamp).date_naive()
    }

    /// Whether the instant falls in the morning session [am_open, am_close).
    pub fn is_am(&self, timestamp: f64) -> bool {
        let sod = self.seconds_of_day(timestamp);
        sod >= secs_of(self.window.am_open) && sod < secs_of(self.window.am_close)
    }

    /// Whether the instant sits exactly on a session open.
    pub fn is_session_open_instant(&self, timestamp: f64) -> bool {
        let sod = self.seconds_of_day(timestamp);
        sod == secs_of(self.window.am_open) || sod == secs_of(self.window.pm_open)
    }

    /// Trading seconds elapsed since the morning open, with the lunch gap
    /// collapsed out. Negative before the open.
    pub fn time_since_open(&self, timestamp: f64) -> f64 {
        let mut sod = self.seconds_of_day(timestamp);
        if sod >= secs_of(self.window.pm_open) {
            sod -= secs_of(self.window.pm_open) - secs_of(self.window.am_close);
        }
        sod - secs_of(self.window.am_open)
    }

    /// Total tradeable seconds in one day.
    pub fn open_duration_secs(&self) -> f64 {
        (secs_of(self.window.am_close) - secs_of(self.window.am_open))
            + (secs_of(self.window.pm_close) - secs_of(self.window.pm_open))
    }

    /// Absolute epoch-second session boundaries for the local date containing
    /// `timestamp`. Ambiguous local times (DST) resolve to the earlier
    /// instant.
    pub fn bounds_for(&self, timestamp: f64) -> SessionBounds {
        let date = self.local_date(timestamp);
        let at = |t: NaiveTime| -> f64 {
            self.tz
                .from_local_datetime(&date.and_time(t))
                .earliest()
                .map(|dt| dt.timestamp() as f64)
                .unwrap_or(timestamp)
        };
        SessionBounds {
            am_open: at(self.window.am_open),
            am_close: at(self.window.am_close),
            pm_open: at(self.window.pm_open),
            pm_close: at(self.window.pm_close),
        }
    }

}
