use std::path::Path;

use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{sort_actions, ActionKind, Bar, CorporateAction, Tick};

/// Back-adjust a bar series for corporate actions.
///
/// Actions are applied most-recent-first so each adjustment sees prices
/// already corrected for every later action. Cash actions subtract the
/// dividend from every price field strictly before the ex-timestamp;
/// dilutive actions rescale earlier prices by a price-adjustment factor
/// and divide earlier volumes by it, preserving turnover. Actions with
/// missing or NaN inputs are skipped individually. The input series is
/// never mutated.
pub fn adjust_bars(bars: &[Bar], actions: Vec<CorporateAction>) -> Vec<Bar> {
    let mut adjusted = bars.to_vec();
    for action in sort_actions(actions).into_iter().rev() {
        if action.kind.is_dilutive() {
            apply_dilution_bars(&mut adjusted, &action);
        } else {
            apply_cash_bars(&mut adjusted, &action);
        }
    }
    adjusted
}

/// Back-adjust a tick series. Same ordering and skip rules as
/// [`adjust_bars`]; only last price and volume exist to rescale.
pub fn adjust_ticks(ticks: &[Tick], actions: Vec<CorporateAction>) -> Vec<Tick> {
    let mut adjusted = ticks.to_vec();
    for action in sort_actions(actions).into_iter().rev() {
        if action.kind.is_dilutive() {
            let Some(factor) = dilution_factor(&action, |ts| {
                adjusted
                    .iter()
                    .filter(|t| t.timestamp < ts)
                    .last()
                    .map(|t| t.last)
            }) else {
                continue;
            };
            for tick in adjusted.iter_mut().filter(|t| t.timestamp < action.ex_timestamp) {
                tick.last *= factor;
                tick.volume /= factor;
            }
        } else {
            let Some(delta) = cash_delta(&action) else { continue };
            for tick in adjusted.iter_mut().filter(|t| t.timestamp < action.ex_timestamp) {
                tick.last -= delta;
            }
        }
    }
    adjusted
}

fn apply_cash_bars(bars: &mut [Bar], action: &CorporateAction) {
    let Some(delta) = cash_delta(action) else { return };
    for bar in bars.iter_mut().filter(|b| b.timestamp < action.ex_timestamp) {
        bar.open -= delta;
        bar.high -= delta;
        bar.low -= delta;
        bar.last -= delta;
    }
}

fn apply_dilution_bars(bars: &mut [Bar], action: &CorporateAction) {
    let Some(factor) = dilution_factor(action, |ts| {
        bars.iter().filter(|b| b.timestamp < ts).last().map(|b| b.last)
    }) else {
        return;
    };
    for bar in bars.iter_mut().filter(|b| b.timestamp < action.ex_timestamp) {
        bar.open *= factor;
        bar.high *= factor;
        bar.low *= factor;
        bar.last *= factor;
        bar.volume /= factor;
    }
}

/// Home-currency dividend per share, or None when the amount is absent
/// or NaN (the action is then skipped).
fn cash_delta(action: &CorporateAction) -> Option<f64> {
    let amount = action.amount?;
    if amount.is_nan() || action.fx_rate.is_nan() {
        warn!(ex = action.ex_timestamp, "skipping cash action with NaN inputs");
        return None;
    }
    Some(amount * action.fx_rate)
}

/// Price-adjustment factor computed from the close immediately preceding
/// the ex-timestamp:
///
///   PAF = (last + (ratio - 1) * rights_price) / (ratio * last)
///
/// where rights_price is the subscription price for rights issues and
/// zero for splits, bonuses and consolidations.
fn dilution_factor(
    action: &CorporateAction,
    last_before: impl Fn(f64) -> Option<f64>,
) -> Option<f64> {
    let ratio = action.dilution_ratio?;
    let rights_price = if action.kind == ActionKind::Rights { action.amount? } else { 0.0 };
    if ratio.is_nan() || rights_price.is_nan() {
        warn!(ex = action.ex_timestamp, "skipping dilutive action with NaN inputs");
        return None;
    }
    let Some(last) = last_before(action.ex_timestamp) else {
        debug!(ex = action.ex_timestamp, "no bar precedes ex-date, skipping action");
        return None;
    };
    if last == 0.0 || last.is_nan() {
        return None;
    }
    Some((last + (ratio - 1.0) * rights_price) / (ratio * last))
}

/// Read one instrument's corporate actions from a CSV file with header
/// `code,ex_timestamp,kind,amount,currency,ratio,fx_rate`. Empty amount,
/// currency and ratio fields stay absent; a missing fx_rate defaults to 1.
/// Malformed lines are skipped, never fatal.
pub fn read_corporate_actions(path: &Path, code: u32) -> Result<Vec<CorporateAction>> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut actions = Vec::new();
    let mut skipped = 0usize;

    for record in reader.records() {
        let Ok(record) = record else {
            skipped += 1;
            continue;
        };
        match parse_action_record(&record) {
            Some((row_code, action)) if row_code == code => actions.push(action),
            Some(_) => {}
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        debug!(path = %path.display(), skipped, "skipped malformed action lines");
    }
    Ok(actions)
}

fn parse_action_record(record: &csv::StringRecord) -> Option<(u32, CorporateAction)> {
    if record.len() < 4 {
        return None;
    }
    let code: u32 = record.get(0)?.trim().parse().ok()?;
    let ex_timestamp: f64 = record.get(1)?.trim().parse().ok()?;
    let kind = ActionKind::parse_code(record.get(2)?.trim())?;
    let amount = record.get(3).map(str::trim).filter(|s| !s.is_empty()).and_then(|s| s.parse().ok());
    let currency =
        record.get(4).map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    let dilution_ratio =
        record.get(5).map(str::trim).filter(|s| !s.is_empty()).and_then(|s| s.parse().ok());
    let fx_rate = record
        .get(6)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
        .unwrap_or(1.0);
    Some((code, CorporateAction { ex_timestamp, kind, amount, currency, dilution_ratio, fx_rate }))
}
