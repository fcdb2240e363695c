// src/core/aggregator.rs
use crate::types::{
    Contract, ContractKey, GreekSample, OptionLeg, PositionRecord, SecurityType,
    SymbolAggregate, TickType,
};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// What happened to one option computation tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GreekOutcome {
    Accepted,
    NotLastTrade,
    AlreadyFinal,
    UnknownTicker,
    Unusable,
}

#[derive(Debug, Clone)]
struct LegSlot {
    leg: OptionLeg,
    weighted_delta: Option<Decimal>,
    abandoned: bool,
}

/// Folds one cycle's position records and greek samples into per-symbol
/// aggregates. Once market data is requested, leg `n` is correlated with
/// ticker id `first_ticker_id + n`.
#[derive(Debug, Clone)]
pub struct PortfolioAggregator {
    account: String,
    first_ticker_id: Option<i64>,
    stocks: BTreeMap<ContractKey, i64>,
    legs: Vec<LegSlot>,
    positions_complete: bool,
    settled: usize,
}

impl PortfolioAggregator {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            first_ticker_id: None,
            stocks: BTreeMap::new(),
            legs: Vec::new(),
            positions_complete: false,
            settled: 0,
        }
    }

    pub fn on_position(&mut self, record: &PositionRecord) {
        if record.account != self.account {
            return;
        }
        match record.contract.sec_type {
            SecurityType::Stock => {
                let key = record.contract.key();
                debug!(%key, quantity = record.quantity, "Stock position");
                *self.stocks.entry(key).or_insert(0) += record.quantity;
            }
            SecurityType::Option if record.quantity == 0 => {
                debug!(contract = %record.contract.display_name(), "Skipping closed option position");
            }
            SecurityType::Option => {
                self.legs.push(LegSlot {
                    leg: OptionLeg {
                        contract: record.contract.clone(),
                        held_quantity: record.quantity,
                    },
                    weighted_delta: None,
                    abandoned: false,
                });
            }
            SecurityType::Other => {
                debug!(contract = %record.contract.display_name(), "Ignoring unsupported security type");
            }
        }
    }

    pub fn finish_positions(&mut self) {
        self.positions_complete = true;
    }

    pub fn positions_complete(&self) -> bool {
        self.positions_complete
    }

    pub fn legs(&self) -> impl Iterator<Item = &OptionLeg> {
        self.legs.iter().map(|slot| &slot.leg)
    }

    /// Maps a ticker id back to its leg. Ids outside this cycle's block,
    /// order ids included, map to nothing.
    pub fn sequence_of(&self, ticker_id: i64) -> Option<usize> {
        let offset = ticker_id.checked_sub(self.first_ticker_id?)?;
        let sequence = usize::try_from(offset).ok()?;
        (sequence < self.legs.len()).then_some(sequence)
    }

    /// Binds the legs to the ticker block starting at `first_ticker_id` and
    /// returns one `(sequence, ticker_id, contract)` per leg.
    pub fn market_data_requests(&mut self, first_ticker_id: i64) -> Vec<(usize, i64, Contract)> {
        self.first_ticker_id = Some(first_ticker_id);
        self.legs
            .iter()
            .enumerate()
            .map(|(seq, slot)| {
                (seq, first_ticker_id + seq as i64, slot.leg.contract.clone())
            })
            .collect()
    }

    pub fn on_option_computation(
        &mut self,
        ticker_id: i64,
        tick_type: TickType,
        delta: f64,
    ) -> GreekOutcome {
        let Some(sequence) = self.sequence_of(ticker_id) else {
            return GreekOutcome::UnknownTicker;
        };
        if tick_type != TickType::Last {
            return GreekOutcome::NotLastTrade;
        }
        self.record_sample(GreekSample { sequence, delta })
    }

    /// The first usable sample for a leg is final.
    pub fn record_sample(&mut self, sample: GreekSample) -> GreekOutcome {
        let Some(slot) = self.legs.get_mut(sample.sequence) else {
            return GreekOutcome::UnknownTicker;
        };
        if slot.weighted_delta.is_some() || slot.abandoned {
            return GreekOutcome::AlreadyFinal;
        }
        // The venue sends an out-of-range sentinel while a greek is unknown.
        let delta = match Decimal::from_f64(sample.delta) {
            Some(delta) if sample.delta.abs() <= 1.0 => delta,
            _ => return GreekOutcome::Unusable,
        };
        slot.weighted_delta = Some(delta * Decimal::from(slot.leg.held_quantity));
        self.settled += 1;
        GreekOutcome::Accepted
    }

    /// Gives up on a leg whose market data failed; its symbol is not hedged
    /// this cycle.
    pub fn abandon_leg(&mut self, sequence: usize) {
        if let Some(slot) = self.legs.get_mut(sequence) {
            if slot.weighted_delta.is_none() && !slot.abandoned {
                warn!(
                    contract = %slot.leg.contract.display_name(),
                    "No delta for option leg, symbol will not be hedged this cycle"
                );
                slot.abandoned = true;
                self.settled += 1;
            }
        }
    }

    pub fn pending_greeks(&self) -> usize {
        self.legs.len() - self.settled
    }

    pub fn is_complete(&self) -> bool {
        self.positions_complete && self.pending_greeks() == 0
    }

    /// Aggregates ordered by symbol. Symbols with an abandoned leg are left out.
    pub fn aggregates(&self) -> Vec<SymbolAggregate> {
        let mut by_symbol: BTreeMap<&str, SymbolAggregate> = self
            .stocks
            .iter()
            .map(|(key, quantity)| {
                let mut aggregate = SymbolAggregate::new(key.symbol.clone());
                aggregate.current_stock_quantity = *quantity;
                (key.symbol.as_str(), aggregate)
            })
            .collect();

        let mut incomplete = BTreeSet::new();
        for slot in &self.legs {
            let symbol = slot.leg.contract.symbol.as_str();
            let aggregate = by_symbol
                .entry(symbol)
                .or_insert_with(|| SymbolAggregate::new(symbol));
            aggregate.option_legs += 1;
            match slot.weighted_delta {
                Some(weighted) => aggregate.delta_weighted_quantity += weighted,
                None => {
                    incomplete.insert(symbol);
                }
            }
        }

        by_symbol
            .into_iter()
            .filter(|(symbol, _)| !incomplete.contains(symbol))
            .map(|(_, aggregate)| aggregate)
            .collect()
    }
}
