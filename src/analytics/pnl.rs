use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::decision::Decision;
use crate::exchange::{Balance, Position};

/// Per-day bookkeeping owned by the trader.
///
/// Only the execution path mutates the counters; the daily summary reads
/// them and resets through [`CycleState::reset_daily`].
#[derive(Debug, Clone, Default)]
pub struct CycleState {
    trades_today: u32,
    daily_pnl: f64,
    last_decision: Option<Decision>,
    last_reset: Option<DateTime<Utc>>,
}

/// Counters as they stood when the day was closed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DailyCounters {
    pub trades: u32,
    pub pnl: f64,
}

impl CycleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trades_today(&self) -> u32 {
        self.trades_today
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    pub fn last_decision(&self) -> Option<&Decision> {
        self.last_decision.as_ref()
    }

    pub fn last_reset(&self) -> Option<DateTime<Utc>> {
        self.last_reset
    }

    pub fn record_decision(&mut self, decision: Decision) {
        self.last_decision = Some(decision);
    }

    /// Called once per confirmed entry.
    pub fn record_trade(&mut self) {
        self.trades_today = self.trades_today.saturating_add(1);
    }

    pub fn record_pnl(&mut self, pnl: f64) {
        if pnl.is_finite() {
            self.daily_pnl += pnl;
        }
    }

    pub fn counters(&self) -> DailyCounters {
        DailyCounters {
            trades: self.trades_today,
            pnl: self.daily_pnl,
        }
    }

    /// Zero the day's counters and hand back what they held.
    pub fn reset_daily(&mut self) -> DailyCounters {
        let closed = self.counters();
        self.trades_today = 0;
        self.daily_pnl = 0.0;
        self.last_reset = Some(Utc::now());
        closed
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TraderStatus {
    pub symbol: String,
    pub balance: Option<Balance>,
    pub positions: Vec<Position>,
    pub trades_today: u32,
    pub daily_pnl: f64,
    pub last_decision: Option<Decision>,
    pub dry_run: bool,
}
