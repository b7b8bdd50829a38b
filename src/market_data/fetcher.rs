use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::indicators::technical_snapshot;
use super::{format_number, MarketSnapshot, MetricValue};
use crate::config::DataSourcesConfig;
use crate::exchange::{ExchangeGateway, MarketFeed};

const CANDLE_INTERVAL: &str = "1h";
const CANDLE_LIMIT: usize = 100;
const MAX_HEADLINES: usize = 5;

/// Base URLs of the third-party sources.
#[derive(Debug, Clone)]
pub struct SourceEndpoints {
    pub coinglass: String,
    pub cryptopanic: String,
    pub fear_greed: String,
}

impl Default for SourceEndpoints {
    fn default() -> Self {
        Self {
            coinglass: "https://open-api.coinglass.com/public/v2".to_string(),
            cryptopanic: "https://cryptopanic.com/api/v1".to_string(),
            fear_greed: "https://api.alternative.me".to_string(),
        }
    }
}

/// Aggregates exchange, indicator, derivatives, sentiment and news data
/// into one [`MarketSnapshot`]. No source failure fails the aggregation.
pub struct DataFetcher {
    gateway: Arc<dyn ExchangeGateway>,
    feed: Arc<dyn MarketFeed>,
    http_client: Client,
    endpoints: SourceEndpoints,
    keys: DataSourcesConfig,
    coin: String,
}

impl DataFetcher {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        feed: Arc<dyn MarketFeed>,
        keys: DataSourcesConfig,
        coin: impl Into<String>,
    ) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            gateway,
            feed,
            http_client,
            endpoints: SourceEndpoints::default(),
            keys,
            coin: coin.into(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: SourceEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub async fn get_all_data(&self) -> MarketSnapshot {
        let mut snapshot = self.exchange_data().await;
        snapshot.extend(self.technical_indicators().await);
        snapshot.extend(self.derivatives_data().await);
        snapshot.extend(self.sentiment_data().await);
        snapshot.extend(self.news_data().await);

        debug!("📊 Aggregated {} market metrics", snapshot.len());
        snapshot
    }

    async fn exchange_data(&self) -> MarketSnapshot {
        let mut snapshot = MarketSnapshot::new();

        match self.gateway.get_ticker().await {
            Ok(ticker) => {
                snapshot.insert("price", ticker.price);
                snapshot.insert("bid", ticker.bid);
                snapshot.insert("ask", ticker.ask);
                snapshot.insert("high_24h", ticker.high_24h);
                snapshot.insert("low_24h", ticker.low_24h);
                snapshot.insert(
                    "volume_24h",
                    ticker
                        .volume_24h
                        .map_or(MetricValue::NotAvailable, |v| format_number(v).into()),
                );
                snapshot.insert(
                    "change_24h",
                    ticker.change_24h.map(|c| (c * 100.0).round() / 100.0),
                );
            }
            Err(e) => {
                warn!("⚠️ Ticker unavailable: {}", e);
                for key in ["price", "bid", "ask", "high_24h", "low_24h", "volume_24h", "change_24h"] {
                    snapshot.insert(key, MetricValue::NotAvailable);
                }
            }
        }

        snapshot
    }

    async fn technical_indicators(&self) -> MarketSnapshot {
        match self.feed.get_ohlcv(CANDLE_INTERVAL, CANDLE_LIMIT).await {
            Ok(candles) => technical_snapshot(&candles),
            Err(e) => {
                warn!("⚠️ Error calculating indicators: {}", e);
                technical_snapshot(&[])
            }
        }
    }

    async fn derivatives_data(&self) -> MarketSnapshot {
        let mut snapshot = MarketSnapshot::new();

        let funding = match self.feed.get_funding_rate().await {
            Ok(rate) => MetricValue::Number((rate * 10_000.0).round() / 10_000.0),
            Err(e) => {
                debug!("Funding rate unavailable: {}", e);
                MetricValue::NotAvailable
            }
        };
        snapshot.insert("funding_rate", funding);

        for key in [
            "open_interest",
            "oi_change_1h",
            "long_short_ratio",
            "long_liquidations",
            "short_liquidations",
            "nearest_long_liq",
            "nearest_short_liq",
        ] {
            snapshot.insert(key, MetricValue::NotAvailable);
        }

        if let Some(key) = &self.keys.coinglass_api_key {
            let oi = self
                .get_json(
                    &format!("{}/open_interest", self.endpoints.coinglass),
                    &[("symbol", self.coin.as_str())],
                    Some(("coinglassSecret", key.as_str())),
                )
                .await;
            if let Some(value) = oi.as_ref().and_then(parse_open_interest) {
                snapshot.insert("open_interest", format_number(value));
            }

            let ls = self
                .get_json(
                    &format!("{}/long_short", self.endpoints.coinglass),
                    &[("symbol", self.coin.as_str()), ("interval", "1h")],
                    Some(("coinglassSecret", key.as_str())),
                )
                .await;
            if let Some(ratio) = ls.as_ref().and_then(parse_long_short_ratio) {
                snapshot.insert("long_short_ratio", ratio);
            }
        }

        snapshot
    }

    async fn sentiment_data(&self) -> MarketSnapshot {
        let body = self
            .get_json(&format!("{}/fng/", self.endpoints.fear_greed), &[], None)
            .await;
        let (value, label) = body
            .as_ref()
            .and_then(parse_fear_greed)
            .unwrap_or_else(|| (50, "Neutral".to_string()));

        let mut snapshot = MarketSnapshot::new();
        snapshot.insert("fear_greed", value as f64);
        snapshot.insert("fear_greed_label", label);
        snapshot
    }

    async fn news_data(&self) -> MarketSnapshot {
        let mut headlines = Vec::new();

        if let Some(token) = &self.keys.cryptopanic_api_key {
            let body = self
                .get_json(
                    &format!("{}/posts/", self.endpoints.cryptopanic),
                    &[
                        ("auth_token", token.as_str()),
                        ("currencies", self.coin.as_str()),
                        ("kind", "news"),
                        ("filter", "important"),
                    ],
                    None,
                )
                .await;
            if let Some(body) = body {
                headlines = parse_headlines(&body);
            }
        }

        let (text, sentiment) = summarize_news(&headlines);

        let mut snapshot = MarketSnapshot::new();
        snapshot.insert("news", text);
        snapshot.insert("news_sentiment", sentiment);
        snapshot.insert("social_volume", MetricValue::NotAvailable);
        snapshot
    }

    /// GET returning JSON, `None` on any transport, status or decode failure.
    async fn get_json(
        &self,
        url: &str,
        query: &[(&str, &str)],
        header: Option<(&str, &str)>,
    ) -> Option<Value> {
        let mut request = self.http_client.get(url).query(query);
        if let Some((name, value)) = header {
            request = request.header(name, value);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("Source {} unreachable: {}", url, e);
                return None;
            }
        };

        if !response.status().is_success() {
            debug!("Source {} returned {}", url, response.status());
            return None;
        }

        response.json::<Value>().await.ok()
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub fn parse_fear_greed(body: &Value) -> Option<(u32, String)> {
    let entry = body.get("data")?.get(0)?;
    let value = as_f64(entry.get("value")?)?;
    let label = entry
        .get("value_classification")
        .and_then(Value::as_str)
        .unwrap_or("Neutral")
        .to_string();
    Some((value.round().clamp(0.0, 100.0) as u32, label))
}

pub fn parse_open_interest(body: &Value) -> Option<f64> {
    as_f64(body.get("data")?.get("openInterest")?)
}

/// longRate / shortRate of the latest bucket, two decimals.
pub fn parse_long_short_ratio(body: &Value) -> Option<f64> {
    let latest = body.get("data")?.as_array()?.last()?;
    let long = latest.get("longRate").and_then(as_f64).unwrap_or(50.0);
    let short = latest.get("shortRate").and_then(as_f64).unwrap_or(50.0).max(1.0);
    Some((long / short * 100.0).round() / 100.0)
}

/// `[Bullish] title` lines from a CryptoPanic posts payload, by vote balance.
pub fn parse_headlines(body: &Value) -> Vec<String> {
    let results = match body.get("results").and_then(Value::as_array) {
        Some(results) => results,
        None => return Vec::new(),
    };

    results
        .iter()
        .take(MAX_HEADLINES)
        .map(|item| {
            let votes = item.get("votes");
            let count = |key: &str| {
                votes
                    .and_then(|v| v.get(key))
                    .and_then(as_f64)
                    .unwrap_or(0.0)
            };
            let (positive, negative) = (count("positive"), count("negative"));
            let sentiment = if positive > negative {
                "Bullish"
            } else if negative > positive {
                "Bearish"
            } else {
                "Neutral"
            };
            let title = item.get("title").and_then(Value::as_str).unwrap_or("");
            format!("[{}] {}", sentiment, title)
        })
        .collect()
}

/// Joined headline text and the overall sentiment across headlines.
pub fn summarize_news(headlines: &[String]) -> (String, &'static str) {
    if headlines.is_empty() {
        return ("No recent news available".to_string(), "Neutral");
    }

    let bullish = headlines.iter().filter(|h| h.starts_with("[Bullish]")).count();
    let bearish = headlines.iter().filter(|h| h.starts_with("[Bearish]")).count();
    let sentiment = if bullish > bearish {
        "Bullish"
    } else if bearish > bullish {
        "Bearish"
    } else {
        "Neutral"
    };

    (headlines.join("\n"), sentiment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::MarketSimulator;
    use serde_json::json;

    #[test]
    fn test_parse_fear_greed() {
        let body = json!({"data": [{"value": "72", "value_classification": "Greed"}]});
        assert_eq!(parse_fear_greed(&body), Some((72, "Greed".to_string())));
        assert_eq!(parse_fear_greed(&json!({"data": []})), None);
    }

    #[test]
    fn test_parse_long_short_ratio() {
        let body = json!({"data": [
            {"longRate": 40.0, "shortRate": 60.0},
            {"longRate": 55.0, "shortRate": 45.0}
        ]});
        assert_eq!(parse_long_short_ratio(&body), Some(1.22));
    }

    #[test]
    fn test_headlines_and_sentiment() {
        let body = json!({"results": [
            {"title": "ETF inflows surge", "votes": {"positive": 10, "negative": 2}},
            {"title": "Exchange hacked", "votes": {"positive": 0, "negative": 7}},
            {"title": "Miners rally", "votes": {"positive": 3, "negative": 1}},
        ]});
        let headlines = parse_headlines(&body);
        assert_eq!(headlines[0], "[Bullish] ETF inflows surge");
        assert_eq!(headlines[1], "[Bearish] Exchange hacked");

        let (text, sentiment) = summarize_news(&headlines);
        assert_eq!(sentiment, "Bullish");
        assert_eq!(text.lines().count(), 3);

        assert_eq!(summarize_news(&[]).0, "No recent news available");
    }

    #[tokio::test]
    async fn test_failing_sources_degrade_to_defaults() {
        let sim = Arc::new(MarketSimulator::new("BTC/USDT", 100.0, 1_000.0));
        let keys = DataSourcesConfig {
            coinglass_api_key: Some("key".to_string()),
            cryptopanic_api_key: Some("token".to_string()),
        };
        let unreachable = "http://127.0.0.1:9".to_string();
        let fetcher = DataFetcher::new(sim.clone(), sim, keys, "BTC").with_endpoints(SourceEndpoints {
            coinglass: unreachable.clone(),
            cryptopanic: unreachable.clone(),
            fear_greed: unreachable,
        });

        let snapshot = fetcher.get_all_data().await;

        assert_eq!(snapshot.number("price"), Some(100.0));
        assert_eq!(snapshot.number("funding_rate"), Some(0.01));
        assert_eq!(snapshot.display("open_interest"), "N/A");
        assert_eq!(snapshot.number("fear_greed"), Some(50.0));
        assert_eq!(snapshot.display("fear_greed_label"), "Neutral");
        assert_eq!(snapshot.display("news"), "No recent news available");
        assert_ne!(snapshot.display("rsi"), "N/A");
    }

    #[tokio::test]
    async fn test_fear_greed_from_server() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/fng/")
            .with_status(200)
            .with_body(r#"{"data":[{"value":"20","value_classification":"Extreme Fear"}]}"#)
            .create_async()
            .await;

        let sim = Arc::new(MarketSimulator::new("BTC/USDT", 100.0, 1_000.0));
        let fetcher = DataFetcher::new(sim.clone(), sim, DataSourcesConfig::default(), "BTC")
            .with_endpoints(SourceEndpoints {
                fear_greed: server.url(),
                ..SourceEndpoints::default()
            });

        let snapshot = fetcher.get_all_data().await;
        assert_eq!(snapshot.number("fear_greed"), Some(20.0));
        assert_eq!(snapshot.display("fear_greed_label"), "Extreme Fear");
    }
}
