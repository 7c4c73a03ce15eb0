use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Target bucket width for bar aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    Minute1,
    Minute5,
    Minute15,
    Minute30,
    Minute60,
    /// One bucket per morning session, one per afternoon session
    AmPm,
    /// One bucket per trading day, lunch gap included
    Daily,
}

impl Timeframe {
    /// Fixed bucket width in seconds, for the fixed-duration timeframes.
    pub fn width_secs(&self) -> Option<f64> {
        match self {
            Timeframe::Minute1 => Some(60.0),
            Timeframe::Minute5 => Some(300.0),
            Timeframe::Minute15 => Some(900.0),
            Timeframe::Minute30 => Some(1800.0),
            Timeframe::Minute60 => Some(3600.0),
            Timeframe::AmPm | Timeframe::Daily => None,
        }
    }

    pub fn parse(s: &str) -> Result<Timeframe> {
        match s {
            "1m" => Ok(Timeframe::Minute1),
            "5m" => Ok(Timeframe::Minute5),
            "15m" => Ok(Timeframe::Minute15),
            "30m" => Ok(Timeframe::Minute30),
            "60m" | "1H" => Ok(Timeframe::Minute60),
            "am-pm" => Ok(Timeframe::AmPm),
            "1D" | "daily" => Ok(Timeframe::Daily),
            other => Err(Error::InvalidInput(format!("unknown timeframe: {}", other))),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Timeframe::Minute1 => "1m",
            Timeframe::Minute5 => "5m",
            Timeframe::Minute15 => "15m",
            Timeframe::Minute30 => "30m",
            Timeframe::Minute60 => "60m",
            Timeframe::AmPm => "am-pm",
            Timeframe::Daily => "1D",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trip() {
        for tf in [
            Timeframe::Minute1,
            Timeframe::Minute5,
            Timeframe::Minute15,
            Timeframe::Minute30,
            Timeframe::Minute60,
            Timeframe::AmPm,
            Timeframe::Daily,
        ] {
            assert_eq!(Timeframe::parse(&tf.to_string()).unwrap(), tf);
        }
        assert!(Timeframe::parse("2h").is_err());
    }

    #[test]
    fn test_widths() {
        assert_eq!(Timeframe::Minute5.width_secs(), Some(300.0));
        assert_eq!(Timeframe::Daily.width_secs(), None);
        assert_eq!(Timeframe::AmPm.width_secs(), None);
    }
}
