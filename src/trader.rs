use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ai::AiEngine;
use crate::analytics::{CycleState, DailyCounters, TraderStatus};
use crate::decision::Decision;
use crate::exchange::ExchangeGateway;
use crate::execution::{CycleReport, Executor};
use crate::market_data::DataFetcher;
use crate::notify::{Notifier, NotifyEvent};

/// Owns one symbol's analysis and execution pipeline plus its daily state.
pub struct Trader {
    gateway: Arc<dyn ExchangeGateway>,
    fetcher: DataFetcher,
    engine: AiEngine,
    notifier: Arc<dyn Notifier>,
    executor: Executor,
    state: CycleState,
    symbol: String,
    dry_run: bool,
}

impl Trader {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        fetcher: DataFetcher,
        engine: AiEngine,
        notifier: Arc<dyn Notifier>,
        executor: Executor,
        symbol: impl Into<String>,
        dry_run: bool,
    ) -> Self {
        info!("🤖 Trader initialized");
        Self {
            gateway,
            fetcher,
            engine,
            notifier,
            executor,
            state: CycleState::new(),
            symbol: symbol.into(),
            dry_run,
        }
    }

    pub fn state(&self) -> &CycleState {
        &self.state
    }

    async fn notify(&self, event: NotifyEvent) {
        if let Err(e) = self.notifier.send(&event).await {
            warn!("📭 Notification not delivered: {}", e);
        }
    }

    /// Fetch market data, ask the model and remember the answer.
    pub async fn run_analysis(&mut self) -> Decision {
        info!("🔍 Starting analysis cycle...");

        let snapshot = self.fetcher.get_all_data().await;
        debug!("Market data: {:?}", snapshot);

        let decision = self.engine.analyze(&snapshot).await;
        self.state.record_decision(decision.clone());
        decision
    }

    pub async fn execute_decision(&mut self, decision: &Decision) -> CycleReport {
        self.executor.execute(decision, &mut self.state).await
    }

    /// One full cycle: analyse, execute, then log the book.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let decision = self.run_analysis().await;
        let report = self.execute_decision(&decision).await;
        self.check_positions().await;
        report
    }

    pub async fn check_positions(&self) {
        match self.gateway.get_positions().await {
            Ok(positions) if positions.is_empty() => info!("📭 No open positions"),
            Ok(positions) => {
                info!("📂 Open positions: {}", positions.len());
                for p in &positions {
                    info!(
                        "   {} {} @ {:.2} | PnL: ${:.2}",
                        p.side.to_string().to_uppercase(),
                        p.size,
                        p.entry_price,
                        p.pnl
                    );
                }
            }
            Err(e) => warn!("⚠️ Could not read positions: {}", e),
        }
    }

    /// Cancel open orders and flatten every position. Returns how many closed.
    pub async fn close_all(&mut self) -> usize {
        warn!("🛑 CLOSING ALL POSITIONS");

        if let Err(e) = self.gateway.cancel_all_orders().await {
            warn!("⚠️ Cancel all orders failed: {}", e);
        }

        let positions = match self.gateway.get_positions().await {
            Ok(p) => p,
            Err(e) => {
                self.notify(NotifyEvent::error(format!("Close all failed: {}", e)))
                    .await;
                return 0;
            }
        };

        let mut closed = 0;
        let mut realized = 0.0;
        for position in &positions {
            match self.gateway.close_position(position).await {
                Ok(_) => {
                    closed += 1;
                    realized += position.pnl;
                }
                Err(e) => warn!("⚠️ Failed to close {} {}: {}", position.side, position.size, e),
            }
        }

        if closed == 0 {
            info!("No positions to close");
            return 0;
        }

        self.state.record_pnl(realized);
        info!("Closed {} positions (PnL {:+.2})", closed, realized);
        self.notify(NotifyEvent::PositionsClosed {
            count: closed,
            pnl: realized,
        })
        .await;
        closed
    }

    pub async fn get_status(&self) -> TraderStatus {
        let balance = match self.gateway.get_balance().await {
            Ok(b) => Some(b),
            Err(e) => {
                warn!("⚠️ Balance unavailable: {}", e);
                None
            }
        };
        let positions = self.gateway.get_positions().await.unwrap_or_else(|e| {
            warn!("⚠️ Positions unavailable: {}", e);
            Vec::new()
        });

        TraderStatus {
            symbol: self.symbol.clone(),
            balance,
            positions,
            trades_today: self.state.trades_today(),
            daily_pnl: self.state.daily_pnl(),
            last_decision: self.state.last_decision().cloned(),
            dry_run: self.dry_run,
        }
    }

    /// Report the day's counters and start a new day.
    pub async fn daily_summary(&mut self) -> DailyCounters {
        let balance = match self.gateway.get_balance().await {
            Ok(b) => b.total,
            Err(e) => {
                warn!("⚠️ Balance unavailable for summary: {}", e);
                0.0
            }
        };

        let counters = self.state.reset_daily();
        info!(
            "📊 Daily summary: {} trades, PnL {:+.2}, balance {:.2}",
            counters.trades, counters.pnl, balance
        );
        self.notify(NotifyEvent::DailySummary {
            trades: counters.trades,
            pnl: counters.pnl,
            balance,
        })
        .await;
        counters
    }
}
