// src/core/target.rs
use crate::types::{SymbolAggregate, OPTION_MULTIPLIER};
use crate::utils::precision::{clamp_shares, round_shares};
use rust_decimal::Decimal;

/// Converts aggregated option delta into a capped stock target.
#[derive(Debug, Clone, Copy)]
pub struct TargetCalculator {
    max_shares: u32,
    flatten_unhedged_stock: bool,
}

impl TargetCalculator {
    pub fn new(max_shares: u32, flatten_unhedged_stock: bool) -> Self {
        Self {
            max_shares,
            flatten_unhedged_stock,
        }
    }

    /// `round(-100 × delta)`, ties away from zero. One unit of option delta
    /// is hedged with 100 shares of the opposite sign.
    pub fn raw_target(delta_weighted_quantity: Decimal) -> i64 {
        round_shares(-delta_weighted_quantity * Decimal::from(OPTION_MULTIPLIER))
    }

    pub fn target(&self, aggregate: &SymbolAggregate) -> i64 {
        if aggregate.option_legs == 0 && !self.flatten_unhedged_stock {
            return aggregate.current_stock_quantity;
        }
        clamp_shares(
            Self::raw_target(aggregate.delta_weighted_quantity),
            self.max_shares,
        )
    }

    pub fn finalize(&self, aggregates: &mut [SymbolAggregate]) {
        for aggregate in aggregates.iter_mut() {
            aggregate.target_stock_quantity = self.target(aggregate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn aggregate(current: i64, weighted: Decimal, legs: usize) -> SymbolAggregate {
        SymbolAggregate {
            current_stock_quantity: current,
            delta_weighted_quantity: weighted,
            option_legs: legs,
            ..SymbolAggregate::new("ABC")
        }
    }

    #[test]
    fn test_single_leg_target() {
        // One contract at delta 0.5 is hedged by shorting 50 shares.
        assert_eq!(TargetCalculator::raw_target(dec!(0.5)), -50);
        assert_eq!(TargetCalculator::raw_target(dec!(-0.5)), 50);
    }

    #[test]
    fn test_symbol_target_uses_net_weighted_delta() {
        // Ten contracts at delta 0.5.
        let calc = TargetCalculator::new(10_000, false);
        assert_eq!(calc.target(&aggregate(0, dec!(5), 1)), -500);
    }

    #[test]
    fn test_rounding_tie_breaks_away_from_zero() {
        assert_eq!(TargetCalculator::raw_target(dec!(0.125)), -13);
        assert_eq!(TargetCalculator::raw_target(dec!(-0.125)), 13);
        assert_eq!(TargetCalculator::raw_target(dec!(0.105)), -11);
        assert_eq!(TargetCalculator::raw_target(dec!(0.1249)), -12);
    }

    #[test]
    fn test_clamped_to_cap() {
        let calc = TargetCalculator::new(20, false);
        assert_eq!(calc.target(&aggregate(0, dec!(0.5), 1)), -20);
        assert_eq!(calc.target(&aggregate(0, dec!(-0.5), 1)), 20);
        assert_eq!(calc.target(&aggregate(0, dec!(0.15), 1)), -15);
    }

    #[test]
    fn test_zero_cap_forces_flat() {
        let calc = TargetCalculator::new(0, false);
        assert_eq!(calc.target(&aggregate(40, dec!(3), 2)), 0);
    }

    #[test]
    fn test_stock_only_symbol_policy() {
        let keep = TargetCalculator::new(100, false);
        assert_eq!(keep.target(&aggregate(75, dec!(0), 0)), 75);

        let flatten = TargetCalculator::new(100, true);
        assert_eq!(flatten.target(&aggregate(75, dec!(0), 0)), 0);
    }

    #[test]
    fn test_finalize_sets_every_target() {
        let calc = TargetCalculator::new(20, false);
        let mut aggs = vec![aggregate(5, dec!(5), 1), aggregate(9, dec!(0), 0)];
        calc.finalize(&mut aggs);
        assert_eq!(aggs[0].target_stock_quantity, -20);
        assert_eq!(aggs[1].target_stock_quantity, 9);
    }
}
