// src/connectors/messages.rs
use crate::types::{PositionRecord, TickType};

/// Decoded callbacks from the broker session, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum BrokerEvent {
    /// One holding of any account visible to the session.
    Position(PositionRecord),

    /// All positions for the current request have been delivered.
    PositionEnd,

    /// Option greeks for the market-data request `ticker_id`.
    OptionComputation {
        ticker_id: i64,
        tick_type: TickType,
        delta: f64,
    },

    /// Lowest order id the venue will accept next.
    NextValidId(i64),

    /// Order acknowledgement or state change.
    OrderStatus {
        order_id: i64,
        status: String,
        filled: u64,
        remaining: u64,
    },

    /// `id <= 0` marks a system notice not tied to any request.
    Error { id: i64, code: i32, message: String },

    ConnectionClosed,
}

impl BrokerEvent {
    pub fn error(id: i64, code: i32, message: impl Into<String>) -> Self {
        Self::Error {
            id,
            code,
            message: message.into(),
        }
    }
}
