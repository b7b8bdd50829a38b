use async_trait::async_trait;
use thiserror::Error;

use super::types::{Balance, Candle, OrderAck, OrderSide, Position, ProtectiveKind, Ticker};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("exchange rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed exchange payload: {0}")]
    Decode(String),

    #[error("{0}")]
    Unavailable(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Account and order operations the trading core relies on.
///
/// Every call reports failure through [`GatewayError`]; nothing here panics
/// on exchange trouble.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    async fn get_ticker(&self) -> GatewayResult<Ticker>;

    /// Open (non-zero) positions for the configured symbol.
    async fn get_positions(&self) -> GatewayResult<Vec<Position>>;

    async fn get_balance(&self) -> GatewayResult<Balance>;

    async fn market_order(&self, side: OrderSide, amount: f64) -> GatewayResult<OrderAck>;

    /// Reduce-only trigger order. `side` is the side of the order itself,
    /// i.e. opposite to the position it protects.
    async fn create_protective_order(
        &self,
        side: OrderSide,
        amount: f64,
        stop_price: f64,
        kind: ProtectiveKind,
    ) -> GatewayResult<OrderAck>;

    /// Reduce-only market order flattening `position`.
    async fn close_position(&self, position: &Position) -> GatewayResult<OrderAck>;

    /// Cancel one open order by the id from its [`OrderAck`].
    async fn cancel_order(&self, order_id: &str) -> GatewayResult<()>;

    /// Cancel every open order on the symbol, including orders that protect
    /// other positions.
    async fn cancel_all_orders(&self) -> GatewayResult<()>;
}

/// Read-only market data used for indicators and derivatives metrics.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    async fn get_ohlcv(&self, interval: &str, limit: usize) -> GatewayResult<Vec<Candle>>;

    /// Current funding rate in percent.
    async fn get_funding_rate(&self) -> GatewayResult<f64>;
}
