use std::sync::Arc;
use tracing::{error, info, warn};

use crate::analytics::CycleState;
use crate::decision::{Decision, DecisionGate, RejectReason};
use crate::exchange::{ExchangeGateway, GatewayError, OrderAck, Position, ProtectiveKind};
use crate::notify::{Notifier, NotifyEvent};
use crate::risk::{LevelOverrides, PositionSizer, SizingError, TradePlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Gating,
    Sizing,
    EntrySubmitted,
    Protected,
    Done,
    Failed,
}

/// What happened to the protective orders after a confirmed entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Protection {
    Protected {
        stop_loss: OrderAck,
        take_profit: OrderAck,
    },
    /// Protection failed and the entry was flattened again.
    RolledBack { failed: Vec<ProtectiveKind> },
    /// Protection failed and the position is still open.
    Unprotected { failed: Vec<ProtectiveKind> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub plan: TradePlan,
    pub entry: OrderAck,
    pub protection: Protection,
}

#[derive(Debug)]
pub enum CycleOutcome {
    Rejected(RejectReason),
    SizingFailed(SizingError),
    /// Exchange state could not be read; nothing was submitted.
    Aborted(GatewayError),
    EntryFailed(GatewayError),
    Executed(ExecutionReport),
}

#[derive(Debug)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    pub phases: Vec<CyclePhase>,
}

impl CycleReport {
    pub fn final_phase(&self) -> CyclePhase {
        self.phases.last().copied().unwrap_or(CyclePhase::Idle)
    }

    pub fn passed_through(&self, phase: CyclePhase) -> bool {
        self.phases.contains(&phase)
    }

    pub fn is_executed(&self) -> bool {
        matches!(self.outcome, CycleOutcome::Executed(_))
    }
}

struct PhaseTrail(Vec<CyclePhase>);

impl PhaseTrail {
    fn new() -> Self {
        Self(vec![CyclePhase::Idle])
    }

    fn enter(&mut self, phase: CyclePhase) {
        self.0.push(phase);
    }

    fn finish(mut self, phase: CyclePhase, outcome: CycleOutcome) -> CycleReport {
        self.0.push(phase);
        CycleReport {
            outcome,
            phases: self.0,
        }
    }
}

/// Turns an actionable decision into an entry plus stop-loss and
/// take-profit orders on one symbol.
pub struct Executor {
    gateway: Arc<dyn ExchangeGateway>,
    notifier: Arc<dyn Notifier>,
    gate: DecisionGate,
    sizer: PositionSizer,
    symbol: String,
    close_on_unprotected: bool,
}

impl Executor {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        notifier: Arc<dyn Notifier>,
        gate: DecisionGate,
        sizer: PositionSizer,
        symbol: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            notifier,
            gate,
            sizer,
            symbol: symbol.into(),
            close_on_unprotected: true,
        }
    }

    pub fn with_close_on_unprotected(mut self, enabled: bool) -> Self {
        self.close_on_unprotected = enabled;
        self
    }

    async fn notify(&self, event: NotifyEvent) {
        if let Err(e) = self.notifier.send(&event).await {
            warn!("📭 Notification not delivered: {}", e);
        }
    }

    /// Run one cycle for `decision`. `state` only changes after a confirmed entry.
    pub async fn execute(&self, decision: &Decision, state: &mut CycleState) -> CycleReport {
        let mut trail = PhaseTrail::new();
        trail.enter(CyclePhase::Gating);

        // confidence and WAIT need no exchange state
        if let Err(reason) = self.gate.check_signal(decision) {
            info!("⏭️  Skipping trade: {}", reason);
            return trail.finish(CyclePhase::Done, CycleOutcome::Rejected(reason));
        }

        let positions = match self.gateway.get_positions().await {
            Ok(p) => p,
            Err(e) => {
                error!("❌ Could not read positions: {}", e);
                self.notify(NotifyEvent::error(format!("Position check failed: {}", e)))
                    .await;
                return trail.finish(CyclePhase::Failed, CycleOutcome::Aborted(e));
            }
        };

        let direction = match self.gate.check(decision, &positions) {
            Ok(d) => d,
            Err(reason) => {
                info!("⏭️  Skipping trade: {}", reason);
                return trail.finish(CyclePhase::Done, CycleOutcome::Rejected(reason));
            }
        };

        trail.enter(CyclePhase::Sizing);

        let price = match self.gateway.get_ticker().await {
            Ok(ticker) => ticker.price,
            Err(e) => {
                warn!("⚠️ Ticker unavailable: {}", e);
                None
            }
        };

        let plan = match price {
            None => Err(SizingError::NoPrice),
            Some(_) => match self.gateway.get_balance().await {
                Ok(balance) => self.sizer.size_and_levels(
                    direction,
                    price,
                    balance.free,
                    LevelOverrides::from(decision),
                ),
                Err(e) => {
                    error!("❌ Could not read balance: {}", e);
                    self.notify(NotifyEvent::error(format!("Balance check failed: {}", e)))
                        .await;
                    return trail.finish(CyclePhase::Failed, CycleOutcome::Aborted(e));
                }
            },
        };

        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => {
                warn!("⚠️ Sizing failed, aborting cycle: {}", e);
                self.notify(NotifyEvent::error(format!("Trade aborted: {}", e)))
                    .await;
                return trail.finish(CyclePhase::Done, CycleOutcome::SizingFailed(e));
            }
        };

        self.notify(NotifyEvent::Signal {
            action: decision.action,
            confidence: decision.confidence,
            reasoning: decision.reasoning.clone(),
            entry: Some(plan.entry_price),
            stop_loss: Some(plan.stop_loss),
            take_profit: Some(plan.take_profit),
        })
        .await;

        trail.enter(CyclePhase::EntrySubmitted);

        let entry_side = direction.entry_side();
        let entry = match self.gateway.market_order(entry_side, plan.size).await {
            Ok(ack) => ack,
            Err(e) => {
                error!("❌ Entry order failed: {}", e);
                self.notify(NotifyEvent::error(format!("Entry order failed: {}", e)))
                    .await;
                return trail.finish(CyclePhase::Failed, CycleOutcome::EntryFailed(e));
            }
        };

        info!(
            "✅ Entry {} {} {} @ ~${:.2} (order {})",
            entry_side, plan.size, self.symbol, plan.entry_price, entry.id
        );

        let protection = self.protect(&plan).await;
        let fully_protected = matches!(protection, Protection::Protected { .. });

        // a rolled-back entry was already reported by the Unprotected alert
        if !matches!(protection, Protection::RolledBack { .. }) {
            self.notify(NotifyEvent::TradeExecuted {
                side: entry_side,
                amount: plan.size,
                price: entry.average_price.unwrap_or(plan.entry_price),
            })
            .await;
        }

        state.record_trade();

        let report = ExecutionReport {
            plan,
            entry,
            protection,
        };

        if fully_protected {
            trail.enter(CyclePhase::Protected);
        }
        trail.finish(CyclePhase::Done, CycleOutcome::Executed(report))
    }

    /// Place stop-loss and take-profit; on any failure alert and, if
    /// configured, flatten the entry.
    async fn protect(&self, plan: &TradePlan) -> Protection {
        let exit_side = plan.direction.exit_side();
        let mut failed = Vec::new();

        let stop_loss = self
            .place_protective(plan, ProtectiveKind::StopLoss, plan.stop_loss, &mut failed)
            .await;
        let take_profit = self
            .place_protective(plan, ProtectiveKind::TakeProfit, plan.take_profit, &mut failed)
            .await;

        let (stop_loss, take_profit) = match (stop_loss, take_profit) {
            (Some(stop_loss), Some(take_profit)) => {
                info!(
                    "🛡️  Protected: SL {} ${:.2} / TP {} ${:.2}",
                    exit_side, plan.stop_loss, exit_side, plan.take_profit
                );
                return Protection::Protected {
                    stop_loss,
                    take_profit,
                };
            }
            partial => partial,
        };

        let placed: Vec<(ProtectiveKind, OrderAck)> = [
            (ProtectiveKind::StopLoss, stop_loss),
            (ProtectiveKind::TakeProfit, take_profit),
        ]
        .into_iter()
        .filter_map(|(kind, ack)| ack.map(|ack| (kind, ack)))
        .collect();

        let closed = self.close_on_unprotected && self.roll_back(plan, &placed).await;

        self.notify(NotifyEvent::Unprotected {
            side: plan.direction.position_side(),
            amount: plan.size,
            failed: failed.clone(),
            closed,
        })
        .await;

        if closed {
            Protection::RolledBack { failed }
        } else {
            error!("🚨 Position left UNPROTECTED ({} {})", plan.direction, plan.size);
            Protection::Unprotected { failed }
        }
    }

    async fn place_protective(
        &self,
        plan: &TradePlan,
        kind: ProtectiveKind,
        stop_price: f64,
        failed: &mut Vec<ProtectiveKind>,
    ) -> Option<OrderAck> {
        match self
            .gateway
            .create_protective_order(plan.direction.exit_side(), plan.size, stop_price, kind)
            .await
        {
            Ok(ack) => Some(ack),
            Err(e) => {
                error!("❌ {} order failed: {}", kind, e);
                failed.push(kind);
                None
            }
        }
    }

    /// Reduce-only close of the fresh entry, then cancel the protective
    /// orders this cycle placed for it. Orders guarding other positions on
    /// the symbol are left alone.
    async fn roll_back(&self, plan: &TradePlan, placed: &[(ProtectiveKind, OrderAck)]) -> bool {
        let position = Position {
            symbol: self.symbol.clone(),
            side: plan.direction.position_side(),
            size: plan.size,
            entry_price: plan.entry_price,
            mark_price: plan.entry_price,
            pnl: 0.0,
            liquidation_price: None,
        };

        if let Err(e) = self.gateway.close_position(&position).await {
            error!("❌ Rollback close failed: {}", e);
            return false;
        }

        for (kind, ack) in placed {
            if let Err(e) = self.gateway.cancel_order(&ack.id).await {
                error!("❌ Could not cancel {} order {} after rollback: {}", kind, ack.id, e);
                self.notify(NotifyEvent::error(format!(
                    "{} order {} for the rolled-back {} entry is still open, cancel it manually: {}",
                    kind, ack.id, plan.direction, e
                )))
                .await;
            }
        }

        warn!("↩️  Entry rolled back after protective order failure");
        true
    }
}
