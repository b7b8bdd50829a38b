use std::sync::Arc;
use tracing::{error, info};

use super::client::LanguageModel;
use crate::decision::{normalize, Decision};
use crate::market_data::MarketSnapshot;

pub const SYSTEM_PROMPT: &str = r#"You are NEXUS, an elite AI trading analyst. You analyze crypto markets with precision.

RULES:
1. Always respond with valid JSON only
2. Be decisive - no "maybe" or "uncertain"
3. Base decisions on DATA, not emotions
4. Consider: price action, volume, funding, sentiment, news
5. Risk management is priority

RESPONSE FORMAT (JSON only):
{
    "decision": "LONG" | "SHORT" | "WAIT",
    "confidence": 1-100,
    "reasoning": "Brief explanation max 50 words",
    "entry_price": null or number,
    "stop_loss": null or number,
    "take_profit": null or number,
    "risk_level": "LOW" | "MEDIUM" | "HIGH"
}"#;

/// Turns a market snapshot into a [`Decision`] through the language model.
pub struct AiEngine {
    model: Arc<dyn LanguageModel>,
    symbol: String,
}

impl AiEngine {
    pub fn new(model: Arc<dyn LanguageModel>, symbol: impl Into<String>) -> Self {
        Self {
            model,
            symbol: symbol.into(),
        }
    }

    /// Never fails: an unreachable model yields [`Decision::unavailable`].
    pub async fn analyze(&self, snapshot: &MarketSnapshot) -> Decision {
        let prompt = build_prompt(&self.symbol, snapshot);

        match self.model.complete(SYSTEM_PROMPT, &prompt).await {
            Ok(reply) => {
                let decision = normalize(&reply);
                info!(
                    "🧠 AI Decision: {} (Confidence: {}%)",
                    decision.action, decision.confidence
                );
                decision
            }
            Err(e) => {
                error!("❌ AI Engine error: {}", e);
                Decision::unavailable(e)
            }
        }
    }
}

pub fn build_prompt(symbol: &str, data: &MarketSnapshot) -> String {
    let v = |key: &str| data.display(key);
    let news = match data.display("news") {
        n if n == "N/A" => "No recent news".to_string(),
        n => n,
    };

    format!(
        "ANALYZE THIS MARKET DATA FOR {symbol}:

=== PRICE DATA ===
Current Price: ${price}
24h Change: {change}%
24h High: ${high}
24h Low: ${low}
24h Volume: ${volume}

=== MARKET STRUCTURE ===
Funding Rate: {funding}%
Open Interest: ${oi}
OI Change 1h: {oi_change}%
Long/Short Ratio: {ls_ratio}

=== LIQUIDATIONS ===
Long Liquidations 24h: ${long_liq}
Short Liquidations 24h: ${short_liq}
Nearest Long Liq Level: ${nearest_long}
Nearest Short Liq Level: ${nearest_short}

=== SENTIMENT ===
Fear & Greed Index: {fear_greed}
Social Volume: {social}
News Sentiment: {news_sentiment}

=== RECENT NEWS ===
{news}

=== TECHNICAL ===
RSI (14): {rsi}
MACD Signal: {macd}
EMA 20 vs Price: {ema20}
EMA 50 vs Price: {ema50}

Based on this data, what is your trading decision? Consider:
1. Is there a clear trend or reversal setup?
2. Is funding/positioning extreme (potential squeeze)?
3. Any major liquidation levels nearby?
4. Does sentiment support or contradict price?
5. Risk/reward ratio?

Respond with JSON only.",
        symbol = symbol,
        price = v("price"),
        change = v("change_24h"),
        high = v("high_24h"),
        low = v("low_24h"),
        volume = v("volume_24h"),
        funding = v("funding_rate"),
        oi = v("open_interest"),
        oi_change = v("oi_change_1h"),
        ls_ratio = v("long_short_ratio"),
        long_liq = v("long_liquidations"),
        short_liq = v("short_liquidations"),
        nearest_long = v("nearest_long_liq"),
        nearest_short = v("nearest_short_liq"),
        fear_greed = v("fear_greed"),
        social = v("social_volume"),
        news_sentiment = v("news_sentiment"),
        news = news,
        rsi = v("rsi"),
        macd = v("macd_signal"),
        ema20 = v("ema_20_position"),
        ema50 = v("ema_50_position"),
    )
}
