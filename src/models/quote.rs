use serde::{Deserialize, Serialize};

/// A populated realtime quote for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub code: u32,
    pub timestamp: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub last: f64,
    pub volume: f64,
}

impl Quote {
    /// Wire line for the feed bus: space-delimited, code first so that
    /// subscribers can filter by string prefix.
    pub fn to_wire(&self) -> String {
        format!(
            "{} {:.6} {:.6} {:.6} {:.6} {:.6} {:.6}",
            self.code, self.timestamp, self.open, self.high, self.low, self.last, self.volume
        )
    }

    /// Parse a wire line back into a quote. Returns `None` for anything
    /// malformed; bus consumers skip such lines.
    pub fn from_wire(line: &str) -> Option<Quote> {
        let mut it = line.split_whitespace();
        let code = it.next()?.parse().ok()?;
        let timestamp = it.next()?.parse().ok()?;
        let open = it.next()?.parse().ok()?;
        let high = it.next()?.parse().ok()?;
        let low = it.next()?.parse().ok()?;
        let last = it.next()?.parse().ok()?;
        let volume = it.next()?.parse().ok()?;
        Some(Quote { code, timestamp, open, high, low, last, volume })
    }
}

/// Outcome of one fetch task. Failure still carries the instrument code so
/// the ingestion loop always knows which instrument to resubmit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FetchResult {
    Quote(Quote),
    Failed { code: u32 },
}

impl FetchResult {
    pub fn code(&self) -> u32 {
        match self {
            FetchResult::Quote(q) => q.code,
            FetchResult::Failed { code } => *code,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, FetchResult::Failed { .. })
    }
}

/// One unit of fetch work: which instrument, which submission this is
/// (drives proxy and upstream-source rotation), through which proxy.
/// `proxy: None` is the direct-connection fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTask {
    pub code: u32,
    pub attempt: u64,
    pub proxy: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_round_trip() {
        let quote = Quote {
            code: 700,
            timestamp: 1700000000.25,
            open: 320.0,
            high: 324.2,
            low: 318.8,
            last: 321.6,
            volume: 12_345_678.0,
        };
        let line = quote.to_wire();
        assert!(line.starts_with("700 "));
        let parsed = Quote::from_wire(&line).unwrap();
        assert_eq!(parsed.code, 700);
        assert!((parsed.last - 321.6).abs() < 1e-6);
        assert!((parsed.volume - 12_345_678.0).abs() < 1e-3);
    }

    #[test]
    fn test_wire_rejects_malformed() {
        assert!(Quote::from_wire("").is_none());
        assert!(Quote::from_wire("700 1.0 2.0").is_none());
        assert!(Quote::from_wire("abc 1 2 3 4 5 6").is_none());
    }

    #[test]
    fn test_failure_keeps_code() {
        let result = FetchResult::Failed { code: 5 };
        assert_eq!(result.code(), 5);
        assert!(result.is_failure());
    }
}
