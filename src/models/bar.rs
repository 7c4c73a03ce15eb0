use serde::{Deserialize, Serialize};

/// One OHLCV bar. Immutable by convention: every transform in the pipeline
/// builds a new `Bar` rather than editing one in place.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Epoch seconds
    pub timestamp: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub last: f64,
    pub volume: f64,
}

impl Bar {
    /// Whether high/low bracket open/last and volume is non-negative.
    pub fn is_consistent(&self) -> bool {
        self.high >= self.open.max(self.last)
            && self.low <= self.open.min(self.last)
            && self.volume >= 0.0
    }

    /// Fold a tick into a bar, producing a new bar. With no existing bar the
    /// tick seeds a fresh one.
    pub fn add_tick(bar: Option<&Bar>, tick: &Tick) -> Bar {
        match bar {
            None => Bar {
                timestamp: tick.timestamp,
                open: tick.last,
                high: tick.last,
                low: tick.last,
                last: tick.last,
                volume: tick.volume,
            },
            Some(b) => Bar {
                timestamp: tick.timestamp,
                open: b.open,
                high: b.high.max(tick.last),
                low: b.low.min(tick.last),
                last: tick.last,
                volume: b.volume + tick.volume,
            },
        }
    }
}

/// A trade print: timestamp, price, size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: f64,
    pub last: f64,
    pub volume: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_tick_seeds_bar() {
        let tick = Tick { timestamp: 100.0, last: 10.0, volume: 500.0 };
        let bar = Bar::add_tick(None, &tick);
        assert_eq!(bar.open, 10.0);
        assert_eq!(bar.high, 10.0);
        assert_eq!(bar.low, 10.0);
        assert_eq!(bar.last, 10.0);
        assert_eq!(bar.volume, 500.0);
        assert!(bar.is_consistent());
    }

    #[test]
    fn test_add_tick_extends_bar() {
        let bar = Bar { timestamp: 100.0, open: 10.0, high: 10.0, low: 10.0, last: 10.0, volume: 500.0 };
        let tick = Tick { timestamp: 160.0, last: 11.5, volume: 200.0 };
        let next = Bar::add_tick(Some(&bar), &tick);
        assert_eq!(next.timestamp, 160.0);
        assert_eq!(next.open, 10.0);
        assert_eq!(next.high, 11.5);
        assert_eq!(next.low, 10.0);
        assert_eq!(next.last, 11.5);
        assert_eq!(next.volume, 700.0);
        assert!(next.is_consistent());
    }
}
