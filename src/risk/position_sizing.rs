//! Position sizing and protective levels for a directional entry

use thiserror::Error;

use crate::config::TradingConfig;
use crate::decision::{Decision, Direction};

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum SizingError {
    #[error("no price available")]
    NoPrice,

    #[error("insufficient sizing (size {size})")]
    InsufficientSizing { size: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingParams {
    pub leverage: u32,
    pub position_size_pct: f64, // % of free balance used as margin
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

impl From<&TradingConfig> for SizingParams {
    fn from(config: &TradingConfig) -> Self {
        Self {
            leverage: config.leverage,
            position_size_pct: config.position_size_pct,
            stop_loss_pct: config.stop_loss_pct,
            take_profit_pct: config.take_profit_pct,
        }
    }
}

/// Explicit levels from the model that replace the percentage defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LevelOverrides {
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl From<&Decision> for LevelOverrides {
    fn from(decision: &Decision) -> Self {
        Self {
            stop_loss: decision.stop_loss,
            take_profit: decision.take_profit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradePlan {
    pub direction: Direction,
    pub entry_price: f64,
    pub size: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct PositionSizer {
    params: SizingParams,
}

impl PositionSizer {
    pub fn new(params: SizingParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SizingParams {
        &self.params
    }

    /// Size the entry and derive its stop-loss / take-profit.
    ///
    /// size = round(balance * pct/100 * leverage / price, 3)
    ///
    /// A missing or non-positive price is [`SizingError::NoPrice`]; a size
    /// that rounds to zero is [`SizingError::InsufficientSizing`]. Neither is
    /// clamped.
    pub fn size_and_levels(
        &self,
        direction: Direction,
        current_price: Option<f64>,
        available_balance: f64,
        overrides: LevelOverrides,
    ) -> Result<TradePlan, SizingError> {
        let price = current_price
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or(SizingError::NoPrice)?;

        let notional = available_balance.max(0.0) * (self.params.position_size_pct / 100.0)
            * self.params.leverage as f64;
        let size = round_to(notional / price, 3);

        if !(size.is_finite() && size > 0.0) {
            return Err(SizingError::InsufficientSizing { size });
        }

        let (default_sl, default_tp) = self.default_levels(direction, price);

        Ok(TradePlan {
            direction,
            entry_price: price,
            size,
            stop_loss: overrides.stop_loss.unwrap_or(default_sl),
            take_profit: overrides.take_profit.unwrap_or(default_tp),
        })
    }

    #[inline(always)]
    fn default_levels(&self, direction: Direction, price: f64) -> (f64, f64) {
        let sl = self.params.stop_loss_pct / 100.0;
        let tp = self.params.take_profit_pct / 100.0;

        match direction {
            Direction::Long => (price * (1.0 - sl), price * (1.0 + tp)),
            Direction::Short => (price * (1.0 + sl), price * (1.0 - tp)),
        }
    }
}

#[inline(always)]
fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
