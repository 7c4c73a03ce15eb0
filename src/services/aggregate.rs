use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::error::Result;
use crate::models::{Bar, SessionClock, Timeframe};

/// Seconds subtracted before slotting so that a bar sitting exactly on a
/// slot boundary counts toward the slot it closes, not the one it opens.
const SLOT_EPSILON: f64 = 1e-6;

/// Whether two timestamps belong to different aggregation buckets.
/// Symmetric in its arguments.
pub fn diff_bars(t1: f64, t2: f64, timeframe: Timeframe, clock: &SessionClock) -> bool {
    let (t1, t2) = if t1 > t2 { (t2, t1) } else { (t1, t2) };

    if clock.local_date(t1) != clock.local_date(t2) {
        return true;
    }
    match timeframe {
        Timeframe::Daily => false,
        Timeframe::AmPm => clock.is_am(t1) != clock.is_am(t2),
        _ => {
            let width = match timeframe.width_secs() {
                Some(w) => w,
                None => return false,
            };
            // A bar timestamped exactly at a session open belongs to the slot
            // it opens; everywhere else the boundary instant closes the prior
            // slot. The nudge applies only at session opens, and other
            // synthetic boundaries keep the closing convention.
            let nudge = if clock.is_session_open_instant(t1) { SLOT_EPSILON } else { 0.0 };
            let slot1 = ((t1 - SLOT_EPSILON + nudge) / width).floor();
            let slot2 = ((t2 - SLOT_EPSILON) / width).floor();
            slot1 != slot2
        }
    }
}

/// Fold one bucket of bars into a single bar: open from the earliest bar,
/// last from the latest, high/low across the bucket, volumes summed, and
/// the bucket stamped with its latest timestamp.
pub fn join_bars(bars: &[Bar]) -> Option<Bar> {
    let earliest = bars
        .iter()
        .min_by(|a, b| a.timestamp.partial_cmp(&b.timestamp).unwrap_or(std::cmp::Ordering::Equal))?;
    let latest = bars
        .iter()
        .max_by(|a, b| a.timestamp.partial_cmp(&b.timestamp).unwrap_or(std::cmp::Ordering::Equal))?;
    Some(Bar {
        timestamp: latest.timestamp,
        open: earliest.open,
        high: bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max),
        low: bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min),
        last: latest.last,
        volume: bars.iter().map(|b| b.volume).sum(),
    })
}

/// Group an ascending bar series into coarser timeframe buckets.
///
/// Single reverse-chronological pass: a pending bucket accumulates until a
/// bar belongs to a different bucket than the pending bucket's latest member,
/// at which point the bucket is folded and emitted. Output is ascending,
/// one bar per bucket. The input is never mutated.
pub fn group_bars(bars: &[Bar], timeframe: Timeframe, clock: &SessionClock) -> Vec<Bar> {
    let mut grouped: Vec<Bar> = Vec::new();
    // bucket[0] is the latest-timestamped member of the pending bucket
    let mut bucket: Vec<Bar> = Vec::new();

    for bar in bars.iter().rev() {
        if let Some(latest) = bucket.first() {
            if diff_bars(bar.timestamp, latest.timestamp, timeframe, clock) {
                if let Some(joined) = join_bars(&bucket) {
                    grouped.push(joined);
                }
                bucket.clear();
            }
        }
        bucket.push(*bar);
    }
    if let Some(joined) = join_bars(&bucket) {
        grouped.push(joined);
    }
    grouped.reverse();
    grouped
}

/// Read all bars for one instrument from a per-date CSV file
/// (`code,timestamp,open,high,low,close,volume`, rows interleaved across
/// instruments and not necessarily sorted). Malformed lines are skipped,
/// never fatal. The result is sorted ascending by timestamp.
pub fn read_bars(path: &Path, code: u32) -> Result<Vec<Bar>> {
    Ok(read_all_bars(path)?.remove(&code).unwrap_or_default())
}

/// Read every instrument's bars from a per-date CSV file, sorted ascending
/// per instrument.
pub fn read_all_bars(path: &Path) -> Result<HashMap<u32, Vec<Bar>>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut bars: HashMap<u32, Vec<Bar>> = HashMap::new();
    let mut skipped = 0usize;

    for record in reader.records() {
        let Ok(record) = record else {
            skipped += 1;
            continue;
        };
        match parse_bar_record(&record) {
            Some((code, bar)) => bars.entry(code).or_default().push(bar),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(path = %path.display(), skipped, "skipped malformed bar lines");
    }
    for series in bars.values_mut() {
        series.sort_by(|a, b| {
            a.timestamp.partial_cmp(&b.timestamp).unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    Ok(bars)
}

fn parse_bar_record(record: &csv::StringRecord) -> Option<(u32, Bar)> {
    if record.len() < 7 {
        return None;
    }
    let code: u32 = record.get(0)?.trim().parse().ok()?;
    let bar = Bar {
        timestamp: record.get(1)?.trim().parse().ok()?,
        open: record.get(2)?.trim().parse().ok()?,
        high: record.get(3)?.trim().parse().ok()?,
        low: record.get(4)?.trim().parse().ok()?,
        last: record.get(5)?.trim().parse().ok()?,
        volume: record.get(6)?.trim().parse().ok()?,
    };
    Some((code, bar))
}
