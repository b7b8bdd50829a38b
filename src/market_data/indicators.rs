use ta::indicators::{
    ExponentialMovingAverage, MovingAverageConvergenceDivergence, RelativeStrengthIndex,
};
use ta::Next;

use super::{MarketSnapshot, MetricValue};
use crate::exchange::Candle;

pub const INDICATOR_KEYS: [&str; 4] = ["rsi", "macd_signal", "ema_20_position", "ema_50_position"];

#[derive(Debug, Clone, PartialEq)]
pub struct TechnicalSummary {
    pub rsi: f64,
    pub macd_bullish: bool,
    pub above_ema_20: bool,
    pub above_ema_50: bool,
}

impl TechnicalSummary {
    /// Run the indicators over closing prices, oldest first.
    ///
    /// Returns `None` for an empty series.
    pub fn from_candles(candles: &[Candle]) -> Option<Self> {
        let last_close = candles.last()?.close;

        let mut rsi = RelativeStrengthIndex::new(14).ok()?;
        let mut macd = MovingAverageConvergenceDivergence::new(12, 26, 9).ok()?;
        let mut ema20 = ExponentialMovingAverage::new(20).ok()?;
        let mut ema50 = ExponentialMovingAverage::new(50).ok()?;

        let mut rsi_value = 50.0;
        let mut macd_line = 0.0;
        let mut signal_line = 0.0;
        let mut ema20_value = last_close;
        let mut ema50_value = last_close;

        for candle in candles {
            rsi_value = rsi.next(candle.close);
            let out = macd.next(candle.close);
            macd_line = out.macd;
            signal_line = out.signal;
            ema20_value = ema20.next(candle.close);
            ema50_value = ema50.next(candle.close);
        }

        Some(Self {
            rsi: (rsi_value * 10.0).round() / 10.0,
            macd_bullish: macd_line > signal_line,
            above_ema_20: last_close > ema20_value,
            above_ema_50: last_close > ema50_value,
        })
    }

    pub fn to_snapshot(&self) -> MarketSnapshot {
        let position = |above: bool| if above { "Price above" } else { "Price below" };

        let mut snapshot = MarketSnapshot::new();
        snapshot.insert("rsi", self.rsi);
        snapshot.insert(
            "macd_signal",
            if self.macd_bullish {
                "Bullish crossover"
            } else {
                "Bearish crossover"
            },
        );
        snapshot.insert("ema_20_position", position(self.above_ema_20));
        snapshot.insert("ema_50_position", position(self.above_ema_50));
        snapshot
    }
}

/// Indicator metrics, every key `N/A` when there is nothing to compute from.
pub fn technical_snapshot(candles: &[Candle]) -> MarketSnapshot {
    match TechnicalSummary::from_candles(candles) {
        Some(summary) => summary.to_snapshot(),
        None => {
            let mut snapshot = MarketSnapshot::new();
            for key in INDICATOR_KEYS {
                snapshot.insert(key, MetricValue::NotAvailable);
            }
            snapshot
        }
    }
}
