//! Pair-indexed matching rules: which tick size applies at which offset.
//!
//! Rules are configuration, immutable between restarts. For an event at
//! offset `k` the active rule is the one with the largest
//! `from_offset <= k`; an implicit base rule `(0, tick = 1)` guarantees a
//! lookup always succeeds.

use crate::assets::AssetPair;
use crate::queue::Offset;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single `(from_offset, tick_size)` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchingRule {
    /// First event offset (inclusive) this rule applies from.
    pub from_offset: Offset,
    /// Price granularity in price-asset units. Always >= 1.
    pub tick_size: u64,
}

impl MatchingRule {
    /// The implicit rule in force when nothing is configured.
    pub const DEFAULT: MatchingRule = MatchingRule {
        from_offset: 0,
        tick_size: 1,
    };
}

/// The full schedule for one pair, sorted by `from_offset` ascending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleSchedule(Vec<MatchingRule>);

impl RuleSchedule {
    /// Build a schedule from configured records.
    ///
    /// Records are sorted by `from_offset`; rules with `tick_size == 0` are
    /// dropped (a zero tick would make quantization divide by zero).
    #[must_use]
    pub fn new(mut rules: Vec<MatchingRule>) -> Self {
        rules.retain(|r| r.tick_size > 0);
        rules.sort_by_key(|r| r.from_offset);
        RuleSchedule(rules)
    }

    /// The rule active at `offset`.
    #[must_use]
    pub fn active_at(&self, offset: Offset) -> MatchingRule {
        match self.0.iter().rev().find(|r| r.from_offset <= offset) {
            Some(rule) => *rule,
            None => MatchingRule::DEFAULT,
        }
    }
}

/// All configured schedules, keyed by pair. Pairs without an entry use the
/// default rule forever.
#[derive(Debug, Clone, Default)]
pub struct MatchingRules {
    schedules: HashMap<AssetPair, RuleSchedule>,
}

impl MatchingRules {
    /// Build the rule set from configuration.
    #[must_use]
    pub fn new(schedules: HashMap<AssetPair, RuleSchedule>) -> Self {
        Self { schedules }
    }

    /// Tick size for `pair` at `offset`.
    #[must_use]
    pub fn tick_size(&self, pair: &AssetPair, offset: Offset) -> u64 {
        self.schedules
            .get(pair)
            .map(|s| s.active_at(offset))
            .unwrap_or(MatchingRule::DEFAULT)
            .tick_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::Asset;

    fn pair() -> AssetPair {
        AssetPair::new(Asset::Issued([1u8; 32]), Asset::Native).unwrap()
    }

    #[test]
    fn active_rule_is_largest_from_offset_not_beyond() {
        let schedule = RuleSchedule::new(vec![
            MatchingRule {
                from_offset: 100,
                tick_size: 50,
            },
            MatchingRule {
                from_offset: 10,
                tick_size: 5,
            },
        ]);
        assert_eq!(schedule.active_at(0).tick_size, 1);
        assert_eq!(schedule.active_at(9).tick_size, 1);
        assert_eq!(schedule.active_at(10).tick_size, 5);
        assert_eq!(schedule.active_at(99).tick_size, 5);
        assert_eq!(schedule.active_at(100).tick_size, 50);
        assert_eq!(schedule.active_at(1_000_000).tick_size, 50);
    }

    #[test]
    fn zero_ticks_are_dropped() {
        let schedule = RuleSchedule::new(vec![MatchingRule {
            from_offset: 0,
            tick_size: 0,
        }]);
        assert_eq!(schedule.active_at(5).tick_size, 1);
    }

    #[test]
    fn unknown_pair_uses_default() {
        let rules = MatchingRules::default();
        assert_eq!(rules.tick_size(&pair(), 42), 1);
    }
}
