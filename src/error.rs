// src/error.rs
use thiserror::Error;

/// Conditions that end a hedging run. Everything else is logged and counted.
#[derive(Debug, Error)]
pub enum HedgeError {
    #[error("broker event feed closed while {phase}")]
    FeedClosed { phase: &'static str },

    #[error("broker connection lost while {phase}")]
    Disconnected { phase: &'static str },

    #[error("could not connect to broker after {attempts} attempts: {reason}")]
    ConnectFailed { attempts: u32, reason: String },
}

/// Failures reported synchronously by the paper broker.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker session is not connected")]
    NotConnected,

    #[error("order {order_id} rejected: {reason}")]
    Rejected { order_id: i64, reason: String },

    #[error("order {0} is unknown")]
    UnknownOrder(i64),

    #[error("order {0} cannot be cancelled")]
    CancelRefused(i64),
}
