// src/core/feed.rs
use crate::connectors::messages::BrokerEvent;
use crate::error::HedgeError;
use crate::types::{PositionRecord, TickType};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Run-level error bookkeeping. The run fails if any request failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStatus {
    pub request_errors: u32,
    pub benign_notices: u32,
    pub system_notices: u32,
}

impl RunStatus {
    pub fn failed(&self) -> bool {
        self.request_errors > 0
    }
}

/// Broker events the cycle itself acts on.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleEvent {
    Position(PositionRecord),
    PositionEnd,
    OptionComputation {
        ticker_id: i64,
        tick_type: TickType,
        delta: f64,
    },
    /// A request-scoped error, already counted in `RunStatus`.
    RequestFailed { id: i64, code: i32 },
}

/// Single reader of the broker's event channel. Errors, order
/// acknowledgements and id announcements are absorbed here; the rest is
/// handed to the cycle.
pub struct BrokerFeed {
    rx: mpsc::UnboundedReceiver<BrokerEvent>,
    benign_codes: Vec<i32>,
    status: RunStatus,
    next_valid_id: Option<i64>,
}

impl BrokerFeed {
    pub fn new(rx: mpsc::UnboundedReceiver<BrokerEvent>, benign_codes: Vec<i32>) -> Self {
        Self {
            rx,
            benign_codes,
            status: RunStatus::default(),
            next_valid_id: None,
        }
    }

    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    pub fn take_next_valid_id(&mut self) -> Option<i64> {
        self.next_valid_id.take()
    }

    /// Suspends until the next event the cycle cares about.
    pub async fn next(&mut self, phase: &'static str) -> Result<CycleEvent, HedgeError> {
        loop {
            let event = self
                .rx
                .recv()
                .await
                .ok_or(HedgeError::FeedClosed { phase })?;
            if let Some(event) = self.absorb(event, phase)? {
                return Ok(event);
            }
        }
    }

    /// Keeps consuming events for `period`, discarding data events.
    pub async fn drain_for(
        &mut self,
        period: Duration,
        phase: &'static str,
    ) -> Result<(), HedgeError> {
        let deadline = Instant::now() + period;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return Ok(()),
                event = self.rx.recv() => {
                    let event = event.ok_or(HedgeError::FeedClosed { phase })?;
                    if let Some(stale) = self.absorb(event, phase)? {
                        debug!(?stale, phase, "Ignoring data event");
                    }
                }
            }
        }
    }

    /// Absorbs whatever is already queued without waiting.
    pub fn drain_pending(&mut self, phase: &'static str) -> Result<(), HedgeError> {
        while let Ok(event) = self.rx.try_recv() {
            if let Some(stale) = self.absorb(event, phase)? {
                debug!(?stale, phase, "Ignoring data event");
            }
        }
        Ok(())
    }

    fn absorb(
        &mut self,
        event: BrokerEvent,
        phase: &'static str,
    ) -> Result<Option<CycleEvent>, HedgeError> {
        match event {
            BrokerEvent::Position(record) => Ok(Some(CycleEvent::Position(record))),
            BrokerEvent::PositionEnd => Ok(Some(CycleEvent::PositionEnd)),
            BrokerEvent::OptionComputation {
                ticker_id,
                tick_type,
                delta,
            } => Ok(Some(CycleEvent::OptionComputation {
                ticker_id,
                tick_type,
                delta,
            })),
            BrokerEvent::NextValidId(id) => {
                debug!(order_id = id, "Next valid order id");
                self.next_valid_id = Some(id);
                Ok(None)
            }
            BrokerEvent::OrderStatus {
                order_id,
                status,
                filled,
                remaining,
            } => {
                info!(order_id, %status, filled, remaining, "Order status");
                Ok(None)
            }
            BrokerEvent::Error { id, code, message } => {
                if self.record_error(id, code, &message) {
                    Ok(Some(CycleEvent::RequestFailed { id, code }))
                } else {
                    Ok(None)
                }
            }
            BrokerEvent::ConnectionClosed => Err(HedgeError::Disconnected { phase }),
        }
    }

    /// Returns true when the notice counts against the run.
    pub fn record_error(&mut self, id: i64, code: i32, message: &str) -> bool {
        if id <= 0 {
            info!(code, message, "System notice");
            self.status.system_notices += 1;
            false
        } else if self.benign_codes.contains(&code) {
            info!(id, code, message, "Broker notice");
            self.status.benign_notices += 1;
            false
        } else {
            error!(id, code, message, "Error for request");
            self.status.request_errors += 1;
            true
        }
    }

    /// A command the broker refused synchronously.
    pub fn record_command_failure(&mut self, command: &str, id: Option<i64>, err: &anyhow::Error) {
        error!(command, ?id, error = %err, "Broker command failed");
        self.status.request_errors += 1;
    }
}
