use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nexus_trader::bot::NexusBot;
use nexus_trader::config::{mask_secret, Config};
use nexus_trader::decision::CONFIDENCE_THRESHOLD;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first so LOG_LEVEL from .env applies
    let config = Config::from_env()?;

    let default_filter = format!("nexus_trader={},warn", config.agent.log_level.to_lowercase());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Invalid configuration is the only fatal startup error
    config.validate()?;

    print_banner(&config);

    let mut bot = NexusBot::new(config).await?;
    bot.run().await
}

fn print_banner(config: &Config) {
    println!("\n╔═══════════════════════════════════════════════════════════╗");
    println!("║              NEXUS AI Trading Bot (DeepSeek)              ║");
    println!("╚═══════════════════════════════════════════════════════════╝");
    println!();
    println!(
        "📊 Mode: {}",
        if config.agent.dry_run {
            "DRY RUN (Safe Mode)"
        } else {
            "⚠️  LIVE TRADING ⚠️"
        }
    );
    println!(
        "🏦 Exchange: {}",
        if config.agent.simulation_mode {
            "In-memory simulator"
        } else if config.exchange.testnet {
            "Binance Futures TESTNET"
        } else {
            "Binance Futures MAINNET"
        }
    );
    println!("💱 Symbol: {}", config.trading.symbol);
    println!("📊 Risk Settings:");
    println!("   • Leverage: {}x", config.trading.leverage);
    println!(
        "   • Position Size: {:.1}% of free balance",
        config.trading.position_size_pct
    );
    println!("   • Max Positions: {}", config.trading.max_positions);
    println!("   • Stop Loss: {:.1}%", config.trading.stop_loss_pct);
    println!("   • Take Profit: {:.1}%", config.trading.take_profit_pct);
    println!("   • Min Confidence: {}%", CONFIDENCE_THRESHOLD);
    println!(
        "   • Close If Unprotected: {}",
        config.trading.close_on_unprotected
    );
    println!("🔑 Keys:");
    println!("   • DeepSeek: {}", mask_secret(&config.ai.api_key));
    println!("   • Binance: {}", mask_secret(&config.exchange.api_key));
    println!(
        "   • Telegram: {}",
        if config.telegram.is_configured() {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!(
        "⏱️  Analysis Interval: {} seconds",
        config.agent.analysis_interval_secs
    );
    println!();
    println!("Press Ctrl+C to stop");
    println!("═══════════════════════════════════════════════════════════");
    println!();
}
