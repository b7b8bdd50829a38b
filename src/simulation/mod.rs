use async_trait::async_trait;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::exchange::{
    Balance, Candle, ExchangeGateway, GatewayError, GatewayResult, MarketFeed, OrderAck,
    OrderSide, Position, PositionSide, ProtectiveKind, Ticker,
};

/// Every order the simulator accepted, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum SimOrder {
    Market {
        id: String,
        side: OrderSide,
        amount: f64,
        price: f64,
    },
    Protective {
        id: String,
        side: OrderSide,
        amount: f64,
        stop_price: f64,
        kind: ProtectiveKind,
    },
    Close {
        id: String,
        side: PositionSide,
        amount: f64,
        price: f64,
    },
}

impl SimOrder {
    pub fn is_market(&self) -> bool {
        matches!(self, SimOrder::Market { .. })
    }

    pub fn is_protective(&self) -> bool {
        matches!(self, SimOrder::Protective { .. })
    }
}

struct SimState {
    symbol: String,
    price: f64,
    balance: f64,
    leverage: u32,
    positions: Vec<Position>,
    protective: Vec<SimOrder>,
    journal: Vec<SimOrder>,
}

impl SimState {
    fn margin_used(&self) -> f64 {
        self.positions
            .iter()
            .map(|p| p.size * p.entry_price / self.leverage.max(1) as f64)
            .sum()
    }

    fn unrealized(&self, position: &Position) -> f64 {
        let diff = self.price - position.entry_price;
        match position.side {
            PositionSide::Long => diff * position.size,
            PositionSide::Short => -diff * position.size,
        }
    }
}

/// In-memory futures account for paper trading and tests.
///
/// Fills are immediate at the current simulated price; protective orders
/// are recorded but never triggered.
pub struct MarketSimulator {
    state: Mutex<SimState>,
}

fn order_id() -> String {
    format!("sim-order-{}", uuid::Uuid::new_v4())
}

impl MarketSimulator {
    pub fn new(symbol: impl Into<String>, price: f64, balance: f64) -> Self {
        Self {
            state: Mutex::new(SimState {
                symbol: symbol.into(),
                price,
                balance,
                leverage: 1,
                positions: Vec::new(),
                protective: Vec::new(),
                journal: Vec::new(),
            }),
        }
    }

    pub fn with_leverage(self, leverage: u32) -> Self {
        self.lock().leverage = leverage.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // a poisoned lock only means a test panicked mid-call; the state is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_price(&self, price: f64) {
        self.lock().price = price;
    }

    pub fn set_balance(&self, balance: f64) {
        self.lock().balance = balance;
    }

    /// Open a position directly, bypassing the order path.
    pub fn seed_position(&self, side: PositionSide, size: f64) {
        let mut state = self.lock();
        let position = Position {
            symbol: state.symbol.clone(),
            side,
            size,
            entry_price: state.price,
            mark_price: state.price,
            pnl: 0.0,
            liquidation_price: None,
        };
        state.positions.push(position);
    }

    pub fn orders(&self) -> Vec<SimOrder> {
        self.lock().journal.clone()
    }

    pub fn protective_orders(&self) -> Vec<SimOrder> {
        self.lock().protective.clone()
    }
}

#[async_trait]
impl ExchangeGateway for MarketSimulator {
    async fn get_ticker(&self) -> GatewayResult<Ticker> {
        let state = self.lock();
        let price = state.price;
        Ok(Ticker {
            price: Some(price),
            bid: Some(price * 0.9999),
            ask: Some(price * 1.0001),
            high_24h: Some(price * 1.02),
            low_24h: Some(price * 0.98),
            volume_24h: Some(12_345.0),
            change_24h: Some(0.0),
        })
    }

    async fn get_positions(&self) -> GatewayResult<Vec<Position>> {
        let state = self.lock();
        Ok(state
            .positions
            .iter()
            .map(|p| Position {
                mark_price: state.price,
                pnl: state.unrealized(p),
                ..p.clone()
            })
            .collect())
    }

    async fn get_balance(&self) -> GatewayResult<Balance> {
        let state = self.lock();
        let used = state.margin_used();
        let unrealized: f64 = state.positions.iter().map(|p| state.unrealized(p)).sum();
        Ok(Balance {
            total: state.balance + unrealized,
            free: (state.balance - used).max(0.0),
            used,
        })
    }

    async fn market_order(&self, side: OrderSide, amount: f64) -> GatewayResult<OrderAck> {
        if !(amount.is_finite() && amount > 0.0) {
            return Err(GatewayError::Rejected {
                status: 400,
                body: format!("invalid quantity {}", amount),
            });
        }

        let mut state = self.lock();
        let price = state.price;
        let id = order_id();

        let position_side = match side {
            OrderSide::Buy => PositionSide::Long,
            OrderSide::Sell => PositionSide::Short,
        };
        let position = Position {
            symbol: state.symbol.clone(),
            side: position_side,
            size: amount,
            entry_price: price,
            mark_price: price,
            pnl: 0.0,
            liquidation_price: None,
        };
        state.positions.push(position);
        state.journal.push(SimOrder::Market {
            id: id.clone(),
            side,
            amount,
            price,
        });

        info!("⚡ [SIM] Market {} {} @ ${:.2}", side, amount, price);

        Ok(OrderAck {
            id,
            status: "FILLED".to_string(),
            average_price: Some(price),
        })
    }

    async fn create_protective_order(
        &self,
        side: OrderSide,
        amount: f64,
        stop_price: f64,
        kind: ProtectiveKind,
    ) -> GatewayResult<OrderAck> {
        let mut state = self.lock();
        let id = order_id();
        let order = SimOrder::Protective {
            id: id.clone(),
            side,
            amount,
            stop_price,
            kind,
        };
        state.protective.push(order.clone());
        state.journal.push(order);

        info!("⚡ [SIM] {} {} {} @ ${:.2}", kind, side, amount, stop_price);

        Ok(OrderAck {
            id,
            status: "NEW".to_string(),
            average_price: None,
        })
    }

    async fn close_position(&self, position: &Position) -> GatewayResult<OrderAck> {
        let mut state = self.lock();
        let idx = state
            .positions
            .iter()
            .position(|p| p.side == position.side)
            .ok_or_else(|| GatewayError::Unavailable(format!("no {} position", position.side)))?;

        let closed = state.positions.remove(idx);
        let realized = state.unrealized(&closed);
        state.balance += realized;

        let id = order_id();
        let price = state.price;
        state.journal.push(SimOrder::Close {
            id: id.clone(),
            side: closed.side,
            amount: closed.size,
            price,
        });

        info!("⚡ [SIM] Closed {} {} @ ${:.2} (PnL {:+.2})", closed.side, closed.size, price, realized);

        Ok(OrderAck {
            id,
            status: "FILLED".to_string(),
            average_price: Some(price),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> GatewayResult<()> {
        let mut state = self.lock();
        let idx = state
            .protective
            .iter()
            .position(|o| matches!(o, SimOrder::Protective { id, .. } if id == order_id))
            .ok_or_else(|| GatewayError::Unavailable(format!("unknown order {}", order_id)))?;

        state.protective.remove(idx);
        info!("⚡ [SIM] Cancelled order {}", order_id);
        Ok(())
    }

    async fn cancel_all_orders(&self) -> GatewayResult<()> {
        let mut state = self.lock();
        let cancelled = state.protective.len();
        state.protective.clear();
        info!("⚡ [SIM] Cancelled {} open orders", cancelled);
        Ok(())
    }
}

#[async_trait]
impl MarketFeed for MarketSimulator {
    /// Deterministic oscillating series ending at the current price.
    async fn get_ohlcv(&self, _interval: &str, limit: usize) -> GatewayResult<Vec<Candle>> {
        let price = self.lock().price;
        let candles = (0..limit)
            .map(|i| {
                let steps_back = (limit - 1 - i) as f64;
                let close = price * (1.0 + 0.01 * (steps_back * 0.7).sin() - 0.0005 * steps_back);
                let open = close * (1.0 - 0.002 * (steps_back * 1.3).cos());
                Candle {
                    open_time: i as i64 * 3_600_000,
                    open,
                    high: open.max(close) * 1.001,
                    low: open.min(close) * 0.999,
                    close,
                    volume: 100.0 + (i % 7) as f64 * 10.0,
                }
            })
            .collect();
        Ok(candles)
    }

    async fn get_funding_rate(&self) -> GatewayResult<f64> {
        Ok(0.01)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_market_order_opens_position() {
        let sim = MarketSimulator::new("BTC/USDT", 100.0, 1_000.0).with_leverage(5);

        let ack = sim.market_order(OrderSide::Sell, 2.0).await.unwrap();
        assert!(ack.id.starts_with("sim-order-"));

        let positions = sim.get_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side, PositionSide::Short);

        let balance = sim.get_balance().await.unwrap();
        assert_eq!(balance.used, 40.0);
        assert_eq!(balance.free, 960.0);
    }

    #[tokio::test]
    async fn test_close_realizes_pnl() {
        let sim = MarketSimulator::new("BTC/USDT", 100.0, 1_000.0);
        sim.market_order(OrderSide::Buy, 1.0).await.unwrap();
        sim.set_price(110.0);

        let position = sim.get_positions().await.unwrap().remove(0);
        assert_eq!(position.pnl, 10.0);

        sim.close_position(&position).await.unwrap();
        assert!(sim.get_positions().await.unwrap().is_empty());
        assert_eq!(sim.get_balance().await.unwrap().total, 1_010.0);
    }

    #[tokio::test]
    async fn test_cancel_clears_protective_orders_but_keeps_journal() {
        let sim = MarketSimulator::new("BTC/USDT", 100.0, 1_000.0);
        sim.create_protective_order(OrderSide::Sell, 1.0, 98.0, ProtectiveKind::StopLoss)
            .await
            .unwrap();
        assert_eq!(sim.protective_orders().len(), 1);

        sim.cancel_all_orders().await.unwrap();
        assert!(sim.protective_orders().is_empty());
        assert_eq!(sim.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_order_leaves_other_orders() {
        let sim = MarketSimulator::new("BTC/USDT", 100.0, 1_000.0);
        let keep = sim
            .create_protective_order(OrderSide::Buy, 1.0, 102.0, ProtectiveKind::StopLoss)
            .await
            .unwrap();
        let drop = sim
            .create_protective_order(OrderSide::Sell, 1.0, 105.0, ProtectiveKind::TakeProfit)
            .await
            .unwrap();

        sim.cancel_order(&drop.id).await.unwrap();

        let remaining = sim.protective_orders();
        assert_eq!(remaining.len(), 1);
        assert!(matches!(&remaining[0], SimOrder::Protective { id, .. } if *id == keep.id));
        assert!(sim.cancel_order(&drop.id).await.is_err());
    }

    #[tokio::test]
    async fn test_candles_are_deterministic() {
        let sim = MarketSimulator::new("BTC/USDT", 100.0, 1_000.0);
        let a = sim.get_ohlcv("1h", 100).await.unwrap();
        let b = sim.get_ohlcv("1h", 100).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 100);
        assert!((a[99].close - 100.0).abs() < 1e-9);
    }
}
