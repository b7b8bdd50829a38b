pub mod api;
pub mod client;
pub mod types;

pub use api::{ExchangeGateway, GatewayError, GatewayResult, MarketFeed};
pub use client::BinanceFuturesClient;
pub use types::{Balance, Candle, OrderAck, OrderSide, Position, PositionSide, ProtectiveKind, Ticker};
