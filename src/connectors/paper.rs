// src/connectors/paper.rs
// In-process broker used for dry runs and as the test double.
use crate::config::{PaperConfig, PaperPosition};
use crate::connectors::messages::BrokerEvent;
use crate::connectors::traits::Broker;
use crate::error::BrokerError;
use crate::types::{Contract, OrderSpec, SecurityType, Side, TickType};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// An order as the paper venue received it.
#[derive(Debug, Clone, PartialEq)]
pub struct PaperOrder {
    pub order_id: i64,
    pub contract: Contract,
    pub spec: OrderSpec,
}

/// Everything the hedger asked the paper broker to do, in call order.
#[derive(Debug, Clone, Default)]
pub struct PaperJournal {
    pub position_requests: u32,
    pub market_data_requests: Vec<(i64, Contract)>,
    pub market_data_cancels: Vec<i64>,
    pub placed: Vec<PaperOrder>,
    pub cancels: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrderState {
    Working,
    Filled,
    Rejected,
    Cancelled,
}

#[derive(Default)]
struct PaperState {
    connected: bool,
    events: Option<mpsc::UnboundedSender<BrokerEvent>>,
    positions: Vec<PaperPosition>,
    orders: HashMap<i64, OrderState>,
    journal: PaperJournal,
}

impl PaperState {
    fn emit(&self, event: BrokerEvent) {
        if let Some(tx) = &self.events {
            // Receiver gone means the hedger stopped listening.
            let _ = tx.send(event);
        }
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if self.connected {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }

    fn apply_fill(&mut self, account: &str, symbol: &str, side: Side, quantity: u64) {
        let signed = match side {
            Side::Buy => quantity as i64,
            Side::Sell => -(quantity as i64),
        };
        let holding = self.positions.iter_mut().find(|p| {
            p.account == account
                && p.contract.sec_type == SecurityType::Stock
                && p.contract.symbol == symbol
        });
        match holding {
            Some(p) => p.quantity += signed,
            None => self.positions.push(PaperPosition {
                account: account.to_string(),
                contract: Contract::stock(symbol, "SMART", "USD"),
                quantity: signed,
                delta: None,
            }),
        }
    }
}

/// Cloning yields another handle onto the same simulated session.
#[derive(Clone)]
pub struct PaperBroker {
    config: Arc<PaperConfig>,
    state: Arc<Mutex<PaperState>>,
}

impl PaperBroker {
    pub fn new(config: PaperConfig) -> Self {
        let state = PaperState {
            positions: config.positions.clone(),
            ..PaperState::default()
        };
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn journal(&self) -> PaperJournal {
        self.state().journal.clone()
    }

    fn session_expired(&self, state: &PaperState) -> bool {
        self.config
            .session_cycles
            .is_some_and(|cycles| state.journal.position_requests >= cycles)
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn connect(
        &mut self,
        account: &str,
        events: mpsc::UnboundedSender<BrokerEvent>,
    ) -> Result<()> {
        let mut state = self.state();
        state.events = Some(events);
        state.connected = true;
        info!(account, "Paper broker session opened");

        state.emit(BrokerEvent::NextValidId(self.config.next_order_id));
        state.emit(BrokerEvent::error(
            -1,
            2104,
            "Market data farm connection is OK:paper",
        ));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut state = self.state();
        state.connected = false;
        state.events = None;
        info!("Paper broker session closed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let state = self.state();
        state.connected && !self.session_expired(&state)
    }

    async fn request_positions(&self) -> Result<()> {
        let mut state = self.state();
        state.ensure_connected()?;
        state.journal.position_requests += 1;

        for position in &state.positions {
            state.emit(BrokerEvent::Position(crate::types::PositionRecord {
                account: position.account.clone(),
                contract: position.contract.clone(),
                quantity: position.quantity,
            }));
        }
        state.emit(BrokerEvent::PositionEnd);
        debug!(count = state.positions.len(), "Paper positions served");
        Ok(())
    }

    async fn request_market_data(&self, ticker_id: i64, contract: &Contract) -> Result<()> {
        let mut state = self.state();
        state.ensure_connected()?;
        state
            .journal
            .market_data_requests
            .push((ticker_id, contract.clone()));

        let delta = state
            .positions
            .iter()
            .find(|p| &p.contract == contract)
            .and_then(|p| p.delta);

        let Some(delta) = delta else {
            state.emit(BrokerEvent::error(
                ticker_id,
                200,
                format!("No security definition has been found for {}", contract.display_name()),
            ));
            return Ok(());
        };

        if self.config.noise_ticks {
            for (tick_type, skew) in [
                (TickType::Bid, -0.05),
                (TickType::Ask, 0.05),
                (TickType::Model, 0.01),
            ] {
                state.emit(BrokerEvent::OptionComputation {
                    ticker_id,
                    tick_type,
                    delta: delta + skew,
                });
            }
        }

        state.emit(BrokerEvent::OptionComputation {
            ticker_id,
            tick_type: TickType::Last,
            delta,
        });

        if self.config.noise_ticks {
            // A later last-trade update that must not replace the first.
            state.emit(BrokerEvent::OptionComputation {
                ticker_id,
                tick_type: TickType::Last,
                delta: delta * 0.5,
            });
        }
        Ok(())
    }

    async fn cancel_market_data(&self, ticker_id: i64) -> Result<()> {
        let mut state = self.state();
        state.ensure_connected()?;
        state.journal.market_data_cancels.push(ticker_id);
        Ok(())
    }

    async fn place_order(&self, order_id: i64, contract: &Contract, order: &OrderSpec) -> Result<()> {
        let mut state = self.state();
        state.ensure_connected()?;

        if state.orders.contains_key(&order_id) {
            return Err(BrokerError::Rejected {
                order_id,
                reason: "duplicate order id".to_string(),
            }
            .into());
        }

        state.journal.placed.push(PaperOrder {
            order_id,
            contract: contract.clone(),
            spec: order.clone(),
        });

        if self
            .config
            .reject_symbols
            .iter()
            .any(|s| s.eq_ignore_ascii_case(&contract.symbol))
        {
            warn!(order_id, symbol = %contract.symbol, "Paper venue rejecting order");
            state.orders.insert(order_id, OrderState::Rejected);
            state.emit(BrokerEvent::error(
                order_id,
                201,
                "Order rejected - reason: symbol not tradable on paper venue",
            ));
            return Ok(());
        }

        state.emit(BrokerEvent::OrderStatus {
            order_id,
            status: "Submitted".to_string(),
            filled: 0,
            remaining: order.quantity,
        });

        if self.config.fill_orders {
            state.apply_fill(&order.account, &contract.symbol, order.action, order.quantity);
            state.orders.insert(order_id, OrderState::Filled);
            state.emit(BrokerEvent::OrderStatus {
                order_id,
                status: "Filled".to_string(),
                filled: order.quantity,
                remaining: 0,
            });
        } else {
            state.orders.insert(order_id, OrderState::Working);
        }
        Ok(())
    }

    async fn cancel_order(&self, order_id: i64) -> Result<()> {
        let mut state = self.state();
        state.ensure_connected()?;
        state.journal.cancels.push(order_id);

        if self.config.refuse_cancels {
            return Err(BrokerError::CancelRefused(order_id).into());
        }

        match state.orders.get(&order_id).copied() {
            Some(OrderState::Working) => {
                state.orders.insert(order_id, OrderState::Cancelled);
                state.emit(BrokerEvent::error(order_id, 202, "Order Canceled - reason:"));
                state.emit(BrokerEvent::OrderStatus {
                    order_id,
                    status: "Cancelled".to_string(),
                    filled: 0,
                    remaining: 0,
                });
            }
            Some(OrderState::Filled) => {
                state.emit(BrokerEvent::error(
                    order_id,
                    10148,
                    "OrderId that needs to be cancelled cannot be cancelled, state: Filled.",
                ));
            }
            Some(OrderState::Rejected) | Some(OrderState::Cancelled) => {
                state.emit(BrokerEvent::error(
                    order_id,
                    10147,
                    "OrderId that needs to be cancelled is not found.",
                ));
            }
            None => return Err(BrokerError::UnknownOrder(order_id).into()),
        }
        Ok(())
    }
}
