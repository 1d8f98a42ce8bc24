// Exchange connectivity: gateway trait, REST implementation, paper gateway
pub mod mexc;
pub mod paper;
pub mod retry;

pub use mexc::MexcGateway;
pub use paper::PaperGateway;
pub use retry::RetryPolicy;

use crate::models::{Candle, Side};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Timeouts, connection failures, 5xx — safe to retry
    #[error("transport error: {0}")]
    Transport(String),
    /// The exchange understood the request and refused it
    #[error("exchange rejected request: {0}")]
    Rejected(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Transport(e.to_string())
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Normalized order status as reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Open,
    Filled,
    Canceled,
    /// The exchange has not indexed the order yet (eventual consistency)
    Unknown,
}

/// Normalized order record returned by status queries
#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub order_id: String,
    pub status: OrderStatus,
    pub amount: f64,
    pub filled_qty: f64,
    pub avg_price: f64,
}

/// Tri-state outcome of a bounded-retry status check.
///
/// "No decision yet" is a first-class value: ambiguous status after all
/// retries collapses to `Pending`, never to a guessed fill.
#[derive(Debug, Clone)]
pub enum FillCheck {
    Filled { avg_price: f64 },
    Canceled,
    Pending { last_seen: Option<OrderRecord> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    /// Position direction this order belongs to
    pub side: Side,
    /// Exit legs close the position instead of opening one
    pub reduce_only: bool,
    pub order_type: OrderType,
    pub size: f64,
    /// Limit price, for `Limit` orders
    pub price: Option<f64>,
    /// Trigger price, for `StopMarket` orders
    pub trigger_price: Option<f64>,
    /// Exchange-native stop-loss carried on an entry order
    pub attached_stop: Option<f64>,
    pub leverage: u32,
}

/// Price tick and minimum order step for an instrument
#[derive(Debug, Clone, Copy)]
pub struct ContractDetail {
    pub tick: f64,
    pub min_step: f64,
}

/// Narrow interface the lifecycle core uses to talk to an exchange.
///
/// Implementations must normalize exchange responses into the types above;
/// the core never sees raw wire formats.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Submit an order, returning the exchange order id
    async fn submit_order(&self, req: &OrderRequest) -> GatewayResult<String>;

    async fn query_order(&self, order_id: &str) -> GatewayResult<OrderRecord>;

    async fn cancel_order(&self, order_id: &str) -> GatewayResult<()>;

    /// Net open position size for the instrument (0.0 when flat)
    async fn open_position_size(&self, symbol: &str) -> GatewayResult<f64>;

    /// Most recent 1m candles, oldest first; the last bar may be unconfirmed
    async fn recent_candles(&self, symbol: &str, limit: usize) -> GatewayResult<Vec<Candle>>;

    async fn contract_detail(&self, symbol: &str) -> GatewayResult<ContractDetail>;

    /// Whether entry orders may carry an exchange-native stop-loss
    fn supports_attached_stop(&self) -> bool {
        false
    }
}
