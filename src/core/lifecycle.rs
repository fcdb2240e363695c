// src/core/lifecycle.rs
use crate::config::OrderConfig;
use crate::connectors::traits::Broker;
use crate::core::feed::BrokerFeed;
use crate::error::HedgeError;
use crate::types::{Contract, OrderIntent, OrderSpec, OrderType, PlacedOrder};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Process-wide request id counter shared by orders and market-data
/// tickers, so an id in the error channel names exactly one request.
/// Never moves backwards.
#[derive(Debug, Clone)]
pub struct RequestIdSequence {
    next: i64,
}

impl RequestIdSequence {
    pub fn new(first: i64) -> Self {
        Self { next: first }
    }

    /// Adopts the venue's next valid id if it is ahead of ours.
    pub fn seed(&mut self, next_valid: i64) {
        self.next = self.next.max(next_valid);
    }

    pub fn allocate(&mut self) -> i64 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// Hands out `count` consecutive ids and returns the first.
    pub fn reserve(&mut self, count: usize) -> i64 {
        let first = self.next;
        self.next += count as i64;
        first
    }
}

pub struct OrderLifecycleManager {
    account: String,
    order: OrderConfig,
    cooldown: Duration,
}

impl OrderLifecycleManager {
    pub fn new(account: impl Into<String>, order: OrderConfig, cooldown: Duration) -> Self {
        Self {
            account: account.into(),
            order,
            cooldown,
        }
    }

    fn order_spec(&self, intent: &OrderIntent) -> OrderSpec {
        OrderSpec {
            account: self.account.clone(),
            order_type: OrderType::Market,
            action: intent.side,
            quantity: intent.quantity,
            algo: self.order.algo_hint(),
        }
    }

    /// Places every intent. Each attempt consumes an id; only accepted
    /// submissions are tracked for cancellation.
    pub async fn submit(
        &self,
        broker: &dyn Broker,
        intents: &[OrderIntent],
        ids: &mut RequestIdSequence,
        feed: &mut BrokerFeed,
    ) -> Vec<PlacedOrder> {
        let mut placed = Vec::with_capacity(intents.len());

        for intent in intents {
            let order_id = ids.allocate();
            let contract = Contract::stock(&intent.symbol, &self.order.exchange, &self.order.currency);
            let spec = self.order_spec(intent);

            info!(
                order_id,
                symbol = %intent.symbol,
                side = %intent.side,
                quantity = intent.quantity,
                order_type = spec.order_type.code(),
                algo = %spec.algo.strategy,
                "Placing hedge order"
            );

            match broker.place_order(order_id, &contract, &spec).await {
                Ok(()) => placed.push(PlacedOrder {
                    order_id,
                    intent: intent.clone(),
                    submitted_at: Utc::now(),
                }),
                Err(e) => feed.record_command_failure("place order", Some(order_id), &e),
            }
        }

        placed
    }

    /// Waits out the grace period, then cancels every placed order exactly
    /// once. Cancellation is attempted even if the wait was cut short.
    pub async fn settle(
        &self,
        broker: &dyn Broker,
        placed: &[PlacedOrder],
        feed: &mut BrokerFeed,
    ) -> Result<usize, HedgeError> {
        let waited = feed.drain_for(self.cooldown, "cooling down").await;
        if let Err(e) = &waited {
            warn!(error = %e, "Cooldown interrupted, cancelling orders early");
        }
        let cancelled = self.cancel_all(broker, placed, feed).await;
        waited?;
        // Pick up acknowledgements the cancels already produced.
        feed.drain_pending("cancelling")?;
        Ok(cancelled)
    }

    /// Returns how many cancel requests the broker accepted.
    pub async fn cancel_all(
        &self,
        broker: &dyn Broker,
        placed: &[PlacedOrder],
        feed: &mut BrokerFeed,
    ) -> usize {
        let mut accepted = 0;
        for order in placed {
            debug!(
                order_id = order.order_id,
                symbol = %order.intent.symbol,
                age_ms = (Utc::now() - order.submitted_at).num_milliseconds(),
                "Cancelling hedge order"
            );
            match broker.cancel_order(order.order_id).await {
                Ok(()) => accepted += 1,
                Err(e) => feed.record_command_failure("cancel order", Some(order.order_id), &e),
            }
        }
        if !placed.is_empty() {
            info!(requested = placed.len(), accepted, "Cancelled outstanding hedge orders");
        }
        accepted
    }
}
