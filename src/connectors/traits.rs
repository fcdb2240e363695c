use crate::connectors::messages::BrokerEvent;
use crate::types::{Contract, OrderSpec};
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Commands the hedger issues to a brokerage session. Results of requests
/// arrive asynchronously on the event channel handed to `connect`.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&mut self, account: &str, events: mpsc::UnboundedSender<BrokerEvent>)
        -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    fn is_connected(&self) -> bool;

    // Streams Position events followed by PositionEnd
    async fn request_positions(&self) -> Result<()>;

    async fn request_market_data(&self, ticker_id: i64, contract: &Contract) -> Result<()>;

    async fn cancel_market_data(&self, ticker_id: i64) -> Result<()>;

    async fn place_order(&self, order_id: i64, contract: &Contract, order: &OrderSpec)
        -> Result<()>;

    async fn cancel_order(&self, order_id: i64) -> Result<()>;
}
