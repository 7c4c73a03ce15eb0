use serde::{Deserialize, Serialize};

/// The corporate-action types the adjuster understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    Dividend,
    SpecialDividend,
    Split,
    Bonus,
    Consolidation,
    Rights,
}

impl ActionKind {
    /// Tie-break rank for actions sharing an ex-date. Dilutive actions are
    /// applied-to-history after cash actions, so they sort earlier:
    /// Rights < Split/Bonus/Consolidation < SpecialDividend < Dividend.
    pub fn tie_rank(&self) -> u8 {
        match self {
            ActionKind::Rights => 0,
            ActionKind::Split | ActionKind::Bonus | ActionKind::Consolidation => 1,
            ActionKind::SpecialDividend => 2,
            ActionKind::Dividend => 3,
        }
    }

    /// Whether the action rescales prices via a price-adjustment factor
    /// (as opposed to a flat cash subtraction).
    pub fn is_dilutive(&self) -> bool {
        matches!(
            self,
            ActionKind::Split | ActionKind::Bonus | ActionKind::Consolidation | ActionKind::Rights
        )
    }

    pub fn parse_code(code: &str) -> Option<ActionKind> {
        match code {
            "D" => Some(ActionKind::Dividend),
            "SD" => Some(ActionKind::SpecialDividend),
            "S" => Some(ActionKind::Split),
            "B" => Some(ActionKind::Bonus),
            "C" => Some(ActionKind::Consolidation),
            "R" => Some(ActionKind::Rights),
            _ => None,
        }
    }
}

/// One corporate action on one instrument.
///
/// `amount` is the dividend per share for cash actions and the subscription
/// price for rights issues; `dilution_ratio` is the multiplicative share
/// factor for dilutive actions. Either may be absent in upstream data, in
/// which case the adjuster skips the action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorporateAction {
    /// Epoch seconds of the ex-date
    pub ex_timestamp: f64,
    pub kind: ActionKind,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub dilution_ratio: Option<f64>,
    pub fx_rate: f64,
}

/// Sort actions ascending by ex-timestamp, breaking ties by kind rank, then
/// nudge each timestamp at or below its predecessor's one second past it, so
/// that ex-timestamps are strictly increasing across the whole sequence
/// (a nudged duplicate must not land on a later action's real timestamp).
/// The adjuster's "first bar strictly before the ex-date" lookup relies on
/// this.
pub fn sort_actions(mut actions: Vec<CorporateAction>) -> Vec<CorporateAction> {
    actions.sort_by(|a, b| {
        a.ex_timestamp
            .partial_cmp(&b.ex_timestamp)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.kind.tie_rank().cmp(&b.kind.tie_rank()))
    });

    let mut result: Vec<CorporateAction> = Vec::with_capacity(actions.len());
    let mut floor: Option<f64> = None;
    for mut action in actions {
        if let Some(floor) = floor {
            if action.ex_timestamp <= floor {
                action.ex_timestamp = floor + 1.0;
            }
        }
        floor = Some(action.ex_timestamp);
        result.push(action);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(ex: f64, kind: ActionKind) -> CorporateAction {
        CorporateAction {
            ex_timestamp: ex,
            kind,
            amount: Some(1.0),
            currency: None,
            dilution_ratio: Some(2.0),
            fx_rate: 1.0,
        }
    }

    #[test]
    fn test_tie_break_ordering() {
        let sorted = sort_actions(vec![
            action(1000.0, ActionKind::Dividend),
            action(1000.0, ActionKind::Rights),
            action(1000.0, ActionKind::Split),
            action(1000.0, ActionKind::SpecialDividend),
        ]);
        let kinds: Vec<ActionKind> = sorted.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ActionKind::Rights,
                ActionKind::Split,
                ActionKind::SpecialDividend,
                ActionKind::Dividend
            ]
        );
    }

    #[test]
    fn test_duplicate_timestamps_perturbed() {
        let sorted = sort_actions(vec![
            action(1000.0, ActionKind::Dividend),
            action(1000.0, ActionKind::Split),
            action(1000.0, ActionKind::Rights),
            action(2000.0, ActionKind::Dividend),
        ]);
        let stamps: Vec<f64> = sorted.iter().map(|a| a.ex_timestamp).collect();
        assert_eq!(stamps, vec![1000.0, 1001.0, 1002.0, 2000.0]);
        // Strictly increasing
        for pair in stamps.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_nudged_duplicate_clears_later_timestamp() {
        // The +1s nudge of the 1000 pair must not collide with the real
        // action at 1001; the whole sequence stays strictly increasing.
        let sorted = sort_actions(vec![
            action(1000.0, ActionKind::Rights),
            action(1000.0, ActionKind::Dividend),
            action(1001.0, ActionKind::Split),
        ]);
        let stamps: Vec<f64> = sorted.iter().map(|a| a.ex_timestamp).collect();
        assert_eq!(stamps, vec![1000.0, 1001.0, 1002.0]);
        for pair in stamps.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_already_distinct_untouched() {
        let sorted = sort_actions(vec![
            action(2000.0, ActionKind::Dividend),
            action(1000.0, ActionKind::Split),
        ]);
        assert_eq!(sorted[0].ex_timestamp, 1000.0);
        assert_eq!(sorted[1].ex_timestamp, 2000.0);
    }

    #[test]
    fn test_parse_code() {
        assert_eq!(ActionKind::parse_code("SD"), Some(ActionKind::SpecialDividend));
        assert_eq!(ActionKind::parse_code("R"), Some(ActionKind::Rights));
        assert_eq!(ActionKind::parse_code("X"), None);
    }
}
