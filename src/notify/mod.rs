pub mod telegram;

pub use telegram::TelegramNotifier;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::decision::Action;
use crate::exchange::{OrderSide, PositionSide, ProtectiveKind};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notifier disabled")]
    Disabled,

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Everything the bot reports to the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyEvent {
    Startup {
        symbol: String,
        dry_run: bool,
        testnet: bool,
        simulation: bool,
        leverage: u32,
        interval_secs: u64,
    },
    Signal {
        action: Action,
        confidence: u8,
        reasoning: String,
        entry: Option<f64>,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    },
    TradeExecuted {
        side: OrderSide,
        amount: f64,
        price: f64,
    },
    /// High priority: an entry is live without all of its protective orders.
    Unprotected {
        side: PositionSide,
        amount: f64,
        failed: Vec<ProtectiveKind>,
        closed: bool,
    },
    PositionsClosed {
        count: usize,
        pnl: f64,
    },
    DailySummary {
        trades: u32,
        pnl: f64,
        balance: f64,
    },
    Error {
        message: String,
    },
    Stopped,
}

impl NotifyEvent {
    pub fn error(message: impl Into<String>) -> Self {
        NotifyEvent::Error {
            message: message.into(),
        }
    }

    pub fn is_alert(&self) -> bool {
        matches!(self, NotifyEvent::Unprotected { .. } | NotifyEvent::Error { .. })
    }
}

impl fmt::Display for NotifyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyEvent::Startup {
                symbol,
                dry_run,
                leverage,
                ..
            } => write!(
                f,
                "bot started on {} ({}x, {})",
                symbol,
                leverage,
                if *dry_run { "dry run" } else { "live" }
            ),
            NotifyEvent::Signal {
                action, confidence, ..
            } => write!(f, "signal {} at {}% confidence", action, confidence),
            NotifyEvent::TradeExecuted {
                side,
                amount,
                price,
            } => write!(f, "trade executed: {} {} @ {:.2}", side, amount, price),
            NotifyEvent::Unprotected {
                side,
                amount,
                failed,
                closed,
            } => {
                let failed: Vec<String> = failed.iter().map(|k| k.to_string()).collect();
                write!(
                    f,
                    "UNPROTECTED {} {} (missing {}){}",
                    side,
                    amount,
                    failed.join(", "),
                    if *closed { ", position closed" } else { "" }
                )
            }
            NotifyEvent::PositionsClosed { count, pnl } => {
                write!(f, "closed {} positions, PnL {:+.2}", count, pnl)
            }
            NotifyEvent::DailySummary {
                trades,
                pnl,
                balance,
            } => write!(
                f,
                "daily summary: {} trades, PnL {:+.2}, balance {:.2}",
                trades, pnl, balance
            ),
            NotifyEvent::Error { message } => write!(f, "error: {}", message),
            NotifyEvent::Stopped => f.write_str("bot stopped"),
        }
    }
}

/// Fire-and-forget operator channel. Callers log failures and move on.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, event: &NotifyEvent) -> Result<(), NotifyError>;
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, event: &NotifyEvent) -> Result<(), NotifyError> {
        match event {
            NotifyEvent::Unprotected { .. } => error!("🚨 {}", event),
            NotifyEvent::Error { .. } => warn!("📣 {}", event),
            _ => info!("📣 {}", event),
        }
        Ok(())
    }
}
