// src/core/planner.rs
use crate::types::{OrderIntent, Side, SymbolAggregate};

/// Diffs targets against holdings. Pure: never talks to the broker.
#[derive(Debug, Clone, Copy)]
pub struct OrderPlanner {
    min_share_change: u32,
}

impl OrderPlanner {
    pub fn new(min_share_change: u32) -> Self {
        Self { min_share_change }
    }

    pub fn plan_symbol(&self, aggregate: &SymbolAggregate) -> Option<OrderIntent> {
        let quantity = aggregate
            .target_stock_quantity
            .saturating_sub(aggregate.current_stock_quantity);

        // Zero never trades, even with a zero threshold.
        if quantity == 0 || quantity.unsigned_abs() < u64::from(self.min_share_change) {
            return None;
        }

        let side = if quantity > 0 { Side::Buy } else { Side::Sell };
        Some(OrderIntent {
            symbol: aggregate.symbol.clone(),
            side,
            quantity: quantity.unsigned_abs(),
        })
    }

    pub fn plan(&self, aggregates: &[SymbolAggregate]) -> Vec<OrderIntent> {
        aggregates
            .iter()
            .filter_map(|aggregate| self.plan_symbol(aggregate))
            .collect()
    }
}
