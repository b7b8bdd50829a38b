use async_trait::async_trait;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{ParseMode, Recipient};
use tracing::{info, warn};

use super::{Notifier, NotifyError, NotifyEvent};
use crate::config::TelegramConfig;
use crate::decision::Action;
use crate::exchange::OrderSide;

/// Telegram delivery with HTML formatting. Without a token and chat id the
/// notifier stays disabled and every send returns [`NotifyError::Disabled`].
pub struct TelegramNotifier {
    target: Option<(Bot, Recipient)>,
    symbol: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig, symbol: impl Into<String>) -> Self {
        let target = match (&config.bot_token, &config.chat_id) {
            (Some(token), Some(chat)) => {
                info!("📨 Telegram notifications enabled");
                Some((Bot::new(token), recipient(chat)))
            }
            _ => {
                warn!("⚠️ Telegram not configured - notifications disabled");
                None
            }
        };

        Self {
            target,
            symbol: symbol.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.target.is_some()
    }

    pub fn render(&self, event: &NotifyEvent) -> String {
        render(event, &self.symbol)
    }
}

fn recipient(chat: &str) -> Recipient {
    match chat.parse::<i64>() {
        Ok(id) => Recipient::Id(ChatId(id)),
        Err(_) => Recipient::ChannelUsername(chat.to_string()),
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, event: &NotifyEvent) -> Result<(), NotifyError> {
        let (bot, chat) = self.target.as_ref().ok_or(NotifyError::Disabled)?;

        bot.send_message(chat.clone(), self.render(event))
            .parse_mode(ParseMode::Html)
            .await
            .map(|_| ())
            .map_err(|e| NotifyError::Delivery(e.to_string()))
    }
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// `$1,234.56`, sign before the dollar.
pub fn format_usd(value: f64) -> String {
    let cents = (value.abs() * 100.0).round() as u64;
    let whole = (cents / 100).to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if value < 0.0 && cents > 0 { "-" } else { "" };
    format!("{}${}.{:02}", sign, grouped, cents % 100)
}

pub fn render(event: &NotifyEvent, symbol: &str) -> String {
    match event {
        NotifyEvent::Startup {
            symbol: bot_symbol,
            dry_run,
            testnet,
            simulation,
            leverage,
            interval_secs,
        } => {
            let mode = if *dry_run { "🟡 DRY RUN" } else { "🔴 LIVE" };
            let exchange = if *simulation {
                "Simulator"
            } else if *testnet {
                "Binance TESTNET"
            } else {
                "Binance MAINNET"
            };
            format!(
                "🚀 <b>NEXUS AI BOT STARTED</b>\n\n\
                 <b>Mode:</b> {}\n\
                 <b>Exchange:</b> {}\n\
                 <b>Symbol:</b> {}\n\
                 <b>Leverage:</b> {}x\n\
                 <b>Analysis Interval:</b> {}s\n\n\
                 <i>AI Engine: DeepSeek</i>",
                mode,
                exchange,
                escape_html(bot_symbol),
                leverage,
                interval_secs
            )
        }
        NotifyEvent::Signal {
            action,
            confidence,
            reasoning,
            entry,
            stop_loss,
            take_profit,
        } => {
            let emoji = match action {
                Action::Long => "🟢",
                Action::Short => "🔴",
                Action::Wait => "⚪",
            };
            let mut message = format!(
                "{e} <b>NEXUS AI SIGNAL</b> {e}\n\n\
                 <b>Decision:</b> {}\n\
                 <b>Confidence:</b> {}%\n\
                 <b>Reasoning:</b> {}\n",
                action,
                confidence,
                escape_html(reasoning),
                e = emoji
            );
            let levels = [("Entry", entry), ("Stop Loss", stop_loss), ("Take Profit", take_profit)];
            for (label, value) in levels {
                if let Some(value) = value {
                    message.push_str(&format!("\n<b>{}:</b> {}", label, format_usd(*value)));
                }
            }
            message.push_str(&format!("\n\n⏰ <i>{}</i>", escape_html(symbol)));
            message
        }
        NotifyEvent::TradeExecuted {
            side,
            amount,
            price,
        } => {
            let emoji = match side {
                OrderSide::Buy => "📈",
                OrderSide::Sell => "📉",
            };
            format!(
                "{} <b>TRADE EXECUTED</b>\n\n\
                 <b>Side:</b> {}\n\
                 <b>Amount:</b> {}\n\
                 <b>Price:</b> {}\n\
                 <b>Symbol:</b> {}\n",
                emoji,
                side,
                amount,
                format_usd(*price),
                escape_html(symbol)
            )
        }
        NotifyEvent::Unprotected {
            side,
            amount,
            failed,
            closed,
        } => {
            let failed: Vec<String> = failed.iter().map(|k| k.to_string()).collect();
            let outcome = if *closed {
                "Position was closed automatically."
            } else {
                "Position is OPEN without protection. Act now."
            };
            format!(
                "🚨 <b>UNPROTECTED POSITION</b> 🚨\n\n\
                 <b>Side:</b> {}\n\
                 <b>Amount:</b> {}\n\
                 <b>Failed:</b> {}\n\
                 <b>Symbol:</b> {}\n\n\
                 {}",
                side.to_string().to_uppercase(),
                amount,
                failed.join(", "),
                escape_html(symbol),
                outcome
            )
        }
        NotifyEvent::PositionsClosed { count, pnl } => format!(
            "🛑 <b>ALL POSITIONS CLOSED</b>\n\n\
             <b>Closed:</b> {}\n\
             <b>Realized PnL:</b> {}",
            count,
            format_usd(*pnl)
        ),
        NotifyEvent::DailySummary {
            trades,
            pnl,
            balance,
        } => {
            let pnl_emoji = if *pnl >= 0.0 { "📈" } else { "📉" };
            format!(
                "📊 <b>NEXUS DAILY SUMMARY</b>\n\n\
                 <b>Trades Today:</b> {}\n\
                 <b>Total PnL:</b> {} {}\n\
                 <b>Current Balance:</b> {}",
                trades,
                pnl_emoji,
                format_usd(*pnl),
                format_usd(*balance)
            )
        }
        NotifyEvent::Error { message } => format!(
            "⚠️ <b>NEXUS BOT ERROR</b>\n\n{}\n\n<i>Please check the bot logs</i>",
            escape_html(message)
        ),
        NotifyEvent::Stopped => "🛑 <b>NEXUS AI BOT STOPPED</b>".to_string(),
    }
}
