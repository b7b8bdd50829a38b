use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use nexus_trader::ai::{AiEngine, LanguageModel, ModelError};
use nexus_trader::analytics::CycleState;
use nexus_trader::config::DataSourcesConfig;
use nexus_trader::decision::{
    is_actionable, normalize, Action, Decision, DecisionGate, CONFIDENCE_THRESHOLD,
};
use nexus_trader::exchange::{
    Balance, ExchangeGateway, GatewayError, GatewayResult, OrderAck, OrderSide, Position,
    PositionSide, ProtectiveKind, Ticker,
};
use nexus_trader::execution::{CycleOutcome, CyclePhase, Executor, Protection};
use nexus_trader::market_data::{DataFetcher, SourceEndpoints};
use nexus_trader::notify::{Notifier, NotifyError, NotifyEvent};
use nexus_trader::risk::{PositionSizer, SizingParams};
use nexus_trader::simulation::{MarketSimulator, SimOrder};
use nexus_trader::trader::Trader;

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<NotifyEvent>>,
}

impl RecordingNotifier {
    fn events(&self) -> Vec<NotifyEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, event: &NotifyEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct CannedModel(&'static str);

#[async_trait]
impl LanguageModel for CannedModel {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, ModelError> {
        Ok(self.0.to_string())
    }
}

/// Simulator whose exchange refuses SELL stop-loss triggers.
struct RejectingSellStops(Arc<MarketSimulator>);

#[async_trait]
impl ExchangeGateway for RejectingSellStops {
    async fn get_ticker(&self) -> GatewayResult<Ticker> {
        self.0.get_ticker().await
    }

    async fn get_positions(&self) -> GatewayResult<Vec<Position>> {
        self.0.get_positions().await
    }

    async fn get_balance(&self) -> GatewayResult<Balance> {
        self.0.get_balance().await
    }

    async fn market_order(&self, side: OrderSide, amount: f64) -> GatewayResult<OrderAck> {
        self.0.market_order(side, amount).await
    }

    async fn create_protective_order(
        &self,
        side: OrderSide,
        amount: f64,
        stop_price: f64,
        kind: ProtectiveKind,
    ) -> GatewayResult<OrderAck> {
        if side == OrderSide::Sell && kind == ProtectiveKind::StopLoss {
            return Err(GatewayError::Rejected {
                status: 400,
                body: "Order would immediately trigger".to_string(),
            });
        }
        self.0
            .create_protective_order(side, amount, stop_price, kind)
            .await
    }

    async fn close_position(&self, position: &Position) -> GatewayResult<OrderAck> {
        self.0.close_position(position).await
    }

    async fn cancel_order(&self, order_id: &str) -> GatewayResult<()> {
        self.0.cancel_order(order_id).await
    }

    async fn cancel_all_orders(&self) -> GatewayResult<()> {
        self.0.cancel_all_orders().await
    }
}

fn params() -> SizingParams {
    SizingParams {
        leverage: 5,
        position_size_pct: 10.0,
        stop_loss_pct: 2.0,
        take_profit_pct: 5.0,
    }
}

fn setup() -> (Arc<MarketSimulator>, Arc<RecordingNotifier>, Executor) {
    let sim = Arc::new(MarketSimulator::new("BTC/USDT", 100.0, 1_000.0).with_leverage(5));
    let notifier = Arc::new(RecordingNotifier::default());
    let executor = Executor::new(
        sim.clone(),
        notifier.clone(),
        DecisionGate::new(3),
        PositionSizer::new(params()),
        "BTC/USDT",
    );
    (sim, notifier, executor)
}

fn long_position() -> Position {
    Position {
        symbol: "BTCUSDT".to_string(),
        side: PositionSide::Long,
        size: 1.0,
        entry_price: 100.0,
        mark_price: 100.0,
        pnl: 0.0,
        liquidation_price: None,
    }
}

#[tokio::test]
async fn test_confident_long_enters_and_protects() {
    let (sim, notifier, executor) = setup();
    let mut state = CycleState::new();

    let report = executor
        .execute(&Decision::new(Action::Long, 85), &mut state)
        .await;

    assert!(report.passed_through(CyclePhase::Protected));
    assert_eq!(report.final_phase(), CyclePhase::Done);
    assert_eq!(state.trades_today(), 1);

    let orders = sim.orders();
    assert_eq!(orders.iter().filter(|o| o.is_market()).count(), 1);
    assert_eq!(orders.iter().filter(|o| o.is_protective()).count(), 2);

    match &orders[0] {
        SimOrder::Market { side, amount, .. } => {
            assert_eq!(*side, OrderSide::Buy);
            assert_eq!(*amount, 5.0);
        }
        other => panic!("expected entry first, got {:?}", other),
    }
    for order in &orders[1..] {
        match order {
            SimOrder::Protective { side, stop_price, kind, .. } => {
                assert_eq!(*side, OrderSide::Sell);
                let expected = match kind {
                    ProtectiveKind::StopLoss => 98.0,
                    ProtectiveKind::TakeProfit => 105.0,
                };
                assert!((stop_price - expected).abs() < 1e-9);
            }
            other => panic!("expected protective order, got {:?}", other),
        }
    }

    let events = notifier.events();
    assert!(matches!(events[0], NotifyEvent::Signal { .. }));
    assert!(matches!(events[1], NotifyEvent::TradeExecuted { .. }));
}

#[tokio::test]
async fn test_low_confidence_long_touches_nothing() {
    let (sim, notifier, executor) = setup();
    let mut state = CycleState::new();

    let report = executor
        .execute(&Decision::new(Action::Long, 40), &mut state)
        .await;

    assert!(matches!(report.outcome, CycleOutcome::Rejected(_)));
    assert!(sim.orders().is_empty());
    assert!(notifier.events().is_empty());
    assert_eq!(state.trades_today(), 0);
}

#[tokio::test]
async fn test_existing_long_blocks_second_long_but_not_short() {
    let (sim, _notifier, executor) = setup();
    sim.seed_position(PositionSide::Long, 1.0);
    let mut state = CycleState::new();

    let report = executor
        .execute(&Decision::new(Action::Long, 90), &mut state)
        .await;
    assert!(matches!(report.outcome, CycleOutcome::Rejected(_)));

    let report = executor
        .execute(&Decision::new(Action::Short, 90), &mut state)
        .await;
    assert!(report.is_executed());
    assert_eq!(state.trades_today(), 1);
}

#[tokio::test]
async fn test_model_levels_override_defaults() {
    let (sim, _notifier, executor) = setup();
    let mut state = CycleState::new();
    let decision = Decision::new(Action::Long, 90).with_levels(Some(97.0), Some(110.0));

    let report = executor.execute(&decision, &mut state).await;

    match report.outcome {
        CycleOutcome::Executed(r) => {
            assert_eq!(r.plan.stop_loss, 97.0);
            assert_eq!(r.plan.take_profit, 110.0);
            assert!(matches!(r.protection, Protection::Protected { .. }));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert_eq!(sim.protective_orders().len(), 2);
}

#[tokio::test]
async fn test_zero_balance_aborts_before_any_order() {
    let (sim, notifier, executor) = setup();
    sim.set_balance(0.0);
    let mut state = CycleState::new();

    let report = executor
        .execute(&Decision::new(Action::Short, 90), &mut state)
        .await;

    assert!(matches!(report.outcome, CycleOutcome::SizingFailed(_)));
    assert_eq!(report.final_phase(), CyclePhase::Done);
    assert!(sim.orders().is_empty());
    assert!(matches!(notifier.events()[0], NotifyEvent::Error { .. }));
}

#[tokio::test]
async fn test_rollback_keeps_existing_position_protected() {
    let sim = Arc::new(MarketSimulator::new("BTC/USDT", 100.0, 1_000.0).with_leverage(5));
    let notifier = Arc::new(RecordingNotifier::default());

    sim.seed_position(PositionSide::Short, 1.0);
    sim.create_protective_order(OrderSide::Buy, 1.0, 102.0, ProtectiveKind::StopLoss)
        .await
        .unwrap();
    sim.create_protective_order(OrderSide::Buy, 1.0, 95.0, ProtectiveKind::TakeProfit)
        .await
        .unwrap();
    let short_orders = sim.protective_orders();

    let executor = Executor::new(
        Arc::new(RejectingSellStops(sim.clone())),
        notifier.clone(),
        DecisionGate::new(3),
        PositionSizer::new(params()),
        "BTC/USDT",
    );
    let mut state = CycleState::new();

    let report = executor
        .execute(&Decision::new(Action::Long, 90), &mut state)
        .await;

    match &report.outcome {
        CycleOutcome::Executed(r) => assert_eq!(
            r.protection,
            Protection::RolledBack {
                failed: vec![ProtectiveKind::StopLoss]
            }
        ),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(!report.passed_through(CyclePhase::Protected));

    let sides: Vec<PositionSide> = sim
        .get_positions()
        .await
        .unwrap()
        .into_iter()
        .map(|p| p.side)
        .collect();
    assert_eq!(sides, vec![PositionSide::Short]);
    assert_eq!(sim.protective_orders(), short_orders);

    let events = notifier.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, NotifyEvent::Unprotected { closed: true, .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, NotifyEvent::TradeExecuted { .. })));
}

#[test]
fn test_gate_properties() {
    let positions = vec![long_position(); 3];
    for action in [Action::Long, Action::Short, Action::Wait] {
        assert!(!is_actionable(&Decision::new(action, 99), &positions, 3, CONFIDENCE_THRESHOLD));
        assert!(!is_actionable(&Decision::new(action, 69), &[], 3, CONFIDENCE_THRESHOLD));
    }
    assert!(!is_actionable(&Decision::new(Action::Wait, 100), &[], 3, CONFIDENCE_THRESHOLD));
}

#[test]
fn test_prose_reply_falls_back() {
    let decision = normalize("Momentum is fading, I would go short here.");
    assert_eq!(decision.action, Action::Short);
    assert_eq!(decision.confidence, 50);
}

#[tokio::test]
async fn test_trader_cycle_end_to_end() {
    let sim = Arc::new(MarketSimulator::new("BTC/USDT", 100.0, 1_000.0).with_leverage(5));
    let notifier = Arc::new(RecordingNotifier::default());
    let unreachable = "http://127.0.0.1:9".to_string();

    let fetcher = DataFetcher::new(sim.clone(), sim.clone(), DataSourcesConfig::default(), "BTC")
        .with_endpoints(SourceEndpoints {
            coinglass: unreachable.clone(),
            cryptopanic: unreachable.clone(),
            fear_greed: unreachable,
        });
    let engine = AiEngine::new(
        Arc::new(CannedModel(
            r#"```json
{"decision":"LONG","confidence":85,"reasoning":"breakout","entry_price":null,"stop_loss":null,"take_profit":null,"risk_level":"MEDIUM"}
```"#,
        )),
        "BTC/USDT",
    );
    let executor = Executor::new(
        sim.clone(),
        notifier.clone(),
        DecisionGate::new(3),
        PositionSizer::new(params()),
        "BTC/USDT",
    );
    let mut trader = Trader::new(
        sim.clone(),
        fetcher,
        engine,
        notifier.clone(),
        executor,
        "BTC/USDT",
        true,
    );

    let report = trader.run_cycle().await;
    assert!(report.is_executed());

    let status = trader.get_status().await;
    assert_eq!(status.trades_today, 1);
    assert_eq!(status.positions.len(), 1);
    assert_eq!(status.last_decision.map(|d| d.action), Some(Action::Long));

    // a second LONG is a duplicate direction
    let report = trader.run_cycle().await;
    assert!(matches!(report.outcome, CycleOutcome::Rejected(_)));

    sim.set_price(110.0);
    assert_eq!(trader.close_all().await, 1);
    assert!(sim.get_positions().await.unwrap().is_empty());
    assert!(sim.protective_orders().is_empty());
    assert_eq!(trader.state().daily_pnl(), 50.0);

    let counters = trader.daily_summary().await;
    assert_eq!(counters.trades, 1);
    assert_eq!(counters.pnl, 50.0);
    assert_eq!(trader.state().trades_today(), 0);

    let events = notifier.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, NotifyEvent::PositionsClosed { count: 1, .. })));
    assert!(matches!(
        events.last(),
        Some(NotifyEvent::DailySummary { trades: 1, .. })
    ));
}
