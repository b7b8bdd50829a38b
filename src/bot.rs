use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::ai::{AiEngine, DeepSeekClient};
use crate::config::Config;
use crate::decision::DecisionGate;
use crate::exchange::{BinanceFuturesClient, ExchangeGateway, MarketFeed};
use crate::execution::{CycleOutcome, Executor};
use crate::market_data::DataFetcher;
use crate::notify::{LogNotifier, Notifier, NotifyEvent, TelegramNotifier};
use crate::risk::{PositionSizer, SizingParams};
use crate::simulation::MarketSimulator;
use crate::trader::Trader;

const SIM_START_PRICE: f64 = 100_000.0;
const SIM_START_BALANCE: f64 = 10_000.0;

/// Time left until the next 00:00 UTC.
pub fn until_next_midnight(now: DateTime<Utc>) -> Duration {
    let next = (now.date_naive() + chrono::Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc());

    next.and_then(|t| (t - now).to_std().ok())
        .unwrap_or(Duration::from_secs(24 * 60 * 60))
}

pub struct NexusBot {
    config: Config,
    trader: Trader,
    notifier: Arc<dyn Notifier>,
}

impl NexusBot {
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let symbol = config.trading.symbol.clone();

        let (gateway, feed): (Arc<dyn ExchangeGateway>, Arc<dyn MarketFeed>) =
            if config.agent.simulation_mode {
                info!("🎞️  SIMULATION MODE: trading against the in-memory simulator");
                let sim = Arc::new(
                    MarketSimulator::new(symbol.clone(), SIM_START_PRICE, SIM_START_BALANCE)
                        .with_leverage(config.trading.leverage),
                );
                (sim.clone() as Arc<dyn ExchangeGateway>, sim as Arc<dyn MarketFeed>)
            } else {
                let client = Arc::new(BinanceFuturesClient::new(
                    &config.exchange,
                    &symbol,
                    config.agent.dry_run,
                ));
                client.prepare(config.trading.leverage).await;
                (client.clone() as Arc<dyn ExchangeGateway>, client as Arc<dyn MarketFeed>)
            };

        let notifier: Arc<dyn Notifier> = if config.telegram.is_configured() {
            Arc::new(TelegramNotifier::new(&config.telegram, symbol.clone()))
        } else {
            warn!("⚠️ Telegram not configured - notifications go to the log");
            Arc::new(LogNotifier)
        };

        let model = Arc::new(DeepSeekClient::new(&config.ai));
        info!("🧠 AI Engine initialized with DeepSeek ({})", model.model());
        let engine = AiEngine::new(model, symbol.clone());

        let fetcher = DataFetcher::new(
            gateway.clone(),
            feed,
            config.data_sources.clone(),
            config.trading.base_asset(),
        );

        let executor = Executor::new(
            gateway.clone(),
            notifier.clone(),
            DecisionGate::new(config.trading.max_positions),
            PositionSizer::new(SizingParams::from(&config.trading)),
            symbol.clone(),
        )
        .with_close_on_unprotected(config.trading.close_on_unprotected);

        let trader = Trader::new(
            gateway,
            fetcher,
            engine,
            notifier.clone(),
            executor,
            symbol,
            config.agent.dry_run,
        );

        Ok(Self {
            config,
            trader,
            notifier,
        })
    }

    async fn notify(&self, event: NotifyEvent) {
        if let Err(e) = self.notifier.send(&event).await {
            warn!("📭 Notification not delivered: {}", e);
        }
    }

    /// Main loop. One cycle at a time; returns on Ctrl+C.
    pub async fn run(&mut self) -> Result<()> {
        info!("🚀 Starting NEXUS AI trading bot");
        info!(
            "⏱️  Analysis interval: {} seconds",
            self.config.agent.analysis_interval_secs
        );

        self.notify(NotifyEvent::Startup {
            symbol: self.config.trading.symbol.clone(),
            dry_run: self.config.agent.dry_run,
            testnet: self.config.exchange.testnet,
            simulation: self.config.agent.simulation_mode,
            leverage: self.config.trading.leverage,
            interval_secs: self.config.agent.analysis_interval_secs,
        })
        .await;

        // first tick fires immediately
        let mut analysis_interval =
            interval(Duration::from_secs(self.config.agent.analysis_interval_secs));
        analysis_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let midnight = tokio::time::sleep(until_next_midnight(Utc::now()));
        tokio::pin!(midnight);

        loop {
            tokio::select! {
                _ = analysis_interval.tick() => {
                    let report = self.trader.run_cycle().await;
                    match &report.outcome {
                        CycleOutcome::Executed(r) => info!("✅ Cycle executed ({:?})", r.protection),
                        CycleOutcome::Rejected(reason) => info!("⏭️  Cycle ended: {}", reason),
                        CycleOutcome::SizingFailed(e) => warn!("⚠️ Cycle ended: {}", e),
                        CycleOutcome::Aborted(e) | CycleOutcome::EntryFailed(e) => {
                            error!("❌ Cycle failed: {}", e);
                        }
                    }
                }

                _ = &mut midnight => {
                    self.trader.daily_summary().await;
                    midnight.as_mut().reset(Instant::now() + until_next_midnight(Utc::now()));
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("🛑 Shutdown signal received");
                    break;
                }
            }
        }

        let status = self.trader.get_status().await;
        info!(
            "📊 Final status: {} trades today, PnL {:+.2}, {} open positions",
            status.trades_today,
            status.daily_pnl,
            status.positions.len()
        );

        self.notify(NotifyEvent::Stopped).await;
        Ok(())
    }
}
