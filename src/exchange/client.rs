use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::api::{ExchangeGateway, GatewayError, GatewayResult, MarketFeed};
use super::types::{
    Balance, Candle, OrderAck, OrderSide, Position, PositionSide, ProtectiveKind, Ticker,
};
use crate::config::ExchangeConfig;

type HmacSha256 = Hmac<Sha256>;

const LIVE_URL: &str = "https://fapi.binance.com";
const TESTNET_URL: &str = "https://testnet.binancefuture.com";
const RECV_WINDOW_MS: u64 = 5_000;
const QUOTE_ASSET: &str = "USDT";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Ticker24hResponse {
    last_price: String,
    high_price: String,
    low_price: String,
    quote_volume: String,
    price_change_percent: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BookTickerResponse {
    bid_price: String,
    ask_price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndexResponse {
    last_funding_rate: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceEntry {
    asset: String,
    balance: String,
    available_balance: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRiskEntry {
    symbol: String,
    position_amt: String,
    entry_price: String,
    mark_price: String,
    un_realized_profit: String,
    liquidation_price: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: u64,
    status: String,
    #[serde(default)]
    avg_price: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<serde_json::Value>,
}

/// Price tick and quantity step for the traded symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolFilters {
    pub tick_size: String,
    pub step_size: String,
}

/// Binance USDⓈ-M futures REST client bound to a single symbol.
///
/// In dry-run mode every write is logged and acknowledged with
/// [`OrderAck::simulated`]; reads still hit the exchange.
pub struct BinanceFuturesClient {
    http_client: Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    symbol: String,
    dry_run: bool,
    filters: RwLock<Option<SymbolFilters>>,
}

impl BinanceFuturesClient {
    pub fn new(config: &ExchangeConfig, symbol: &str, dry_run: bool) -> Self {
        let http_client = Client::builder()
            .user_agent("nexus-trader/0.1")
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        let base_url = if config.testnet { TESTNET_URL } else { LIVE_URL };

        Self {
            http_client,
            base_url: base_url.to_string(),
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            symbol: Self::market_symbol(symbol),
            dry_run,
            filters: RwLock::new(None),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// `BTC/USDT` (or `BTC/USDT:USDT`) -> `BTCUSDT`.
    pub fn market_symbol(symbol: &str) -> String {
        let pair = symbol.split(':').next().unwrap_or(symbol);
        pair.chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_uppercase()
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Prepare the account for trading: load symbol precision and set leverage.
    pub async fn prepare(&self, leverage: u32) {
        match self.load_symbol_filters().await {
            Ok(filters) => debug!(
                "Symbol filters for {}: tick={} step={}",
                self.symbol, filters.tick_size, filters.step_size
            ),
            Err(e) => warn!("⚠️ Could not load symbol filters: {}", e),
        }

        if let Err(e) = self.set_leverage(leverage).await {
            warn!("⚠️ Could not set leverage: {}", e);
        }
    }

    pub async fn set_leverage(&self, leverage: u32) -> GatewayResult<()> {
        if self.dry_run {
            info!("[DRY RUN] Set leverage {}x for {}", leverage, self.symbol);
            return Ok(());
        }

        let params = format!("symbol={}&leverage={}", self.symbol, leverage);
        let _: serde_json::Value = self
            .signed_request(Method::POST, "/fapi/v1/leverage", &params)
            .await?;
        info!("Leverage set to {}x for {}", leverage, self.symbol);
        Ok(())
    }

    pub async fn load_symbol_filters(&self) -> GatewayResult<SymbolFilters> {
        let info: ExchangeInfoResponse = self.public_get("/fapi/v1/exchangeInfo", "").await?;
        let symbol = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == self.symbol)
            .ok_or_else(|| GatewayError::Unavailable(format!("symbol {} not listed", self.symbol)))?;

        let filter_value = |filter_type: &str, field: &str| {
            symbol
                .filters
                .iter()
                .find(|f| f["filterType"] == filter_type)
                .and_then(|f| f[field].as_str())
                .map(str::to_string)
        };

        let filters = SymbolFilters {
            tick_size: filter_value("PRICE_FILTER", "tickSize")
                .ok_or_else(|| GatewayError::Decode("missing PRICE_FILTER".into()))?,
            step_size: filter_value("LOT_SIZE", "stepSize")
                .ok_or_else(|| GatewayError::Decode("missing LOT_SIZE".into()))?,
        };

        *self.filters.write().await = Some(filters.clone());
        Ok(filters)
    }

    async fn format_price(&self, price: f64) -> String {
        let filters = self.filters.read().await;
        match filters.as_ref() {
            Some(f) => format_to_step(price, &f.tick_size, f64::round),
            None => format!("{}", price),
        }
    }

    async fn format_quantity(&self, quantity: f64) -> String {
        let filters = self.filters.read().await;
        match filters.as_ref() {
            Some(f) => format_to_step(quantity, &f.step_size, f64::floor),
            None => format!("{}", quantity),
        }
    }

    async fn public_get<T: DeserializeOwned>(&self, path: &str, query: &str) -> GatewayResult<T> {
        let url = if query.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, query)
        };

        let resp = self.http_client.get(&url).send().await?;
        Self::decode(resp).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &str,
    ) -> GatewayResult<T> {
        let timestamp = Utc::now().timestamp_millis();
        let query = if params.is_empty() {
            format!("recvWindow={}&timestamp={}", RECV_WINDOW_MS, timestamp)
        } else {
            format!("{}&recvWindow={}&timestamp={}", params, RECV_WINDOW_MS, timestamp)
        };
        let signature = self.sign(&query);
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let resp = self
            .http_client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;

        Self::decode(resp).await
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> GatewayResult<T> {
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn submit_order(&self, params: String) -> GatewayResult<OrderAck> {
        let resp: OrderResponse = self
            .signed_request(Method::POST, "/fapi/v1/order", &params)
            .await?;

        Ok(OrderAck {
            id: resp.order_id.to_string(),
            status: resp.status,
            average_price: resp
                .avg_price
                .and_then(|p| p.parse::<f64>().ok())
                .filter(|p| *p > 0.0),
        })
    }
}

/// Round `value` onto the grid defined by `step` (e.g. `"0.10"`) and print it
/// with the step's number of decimals.
fn format_to_step(value: f64, step: &str, round: fn(f64) -> f64) -> String {
    let step_value = match step.parse::<f64>() {
        Ok(s) if s > 0.0 => s,
        _ => return format!("{}", value),
    };

    let decimals = step
        .split_once('.')
        .map(|(_, frac)| frac.trim_end_matches('0').len())
        .unwrap_or(0);

    let snapped = round(value / step_value + 1e-9) * step_value;
    format!("{:.*}", decimals, snapped)
}

fn parse_field(name: &str, value: &str) -> GatewayResult<f64> {
    value
        .parse::<f64>()
        .map_err(|_| GatewayError::Decode(format!("{}='{}' is not a number", name, value)))
}

fn positive(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| *v > 0.0)
}

fn parse_positions(entries: Vec<PositionRiskEntry>) -> GatewayResult<Vec<Position>> {
    let mut positions = Vec::new();

    for entry in entries {
        let amount = parse_field("positionAmt", &entry.position_amt)?;
        if amount == 0.0 {
            continue;
        }

        positions.push(Position {
            side: if amount > 0.0 {
                PositionSide::Long
            } else {
                PositionSide::Short
            },
            size: amount.abs(),
            entry_price: parse_field("entryPrice", &entry.entry_price)?,
            mark_price: parse_field("markPrice", &entry.mark_price)?,
            pnl: parse_field("unRealizedProfit", &entry.un_realized_profit)?,
            liquidation_price: positive(&entry.liquidation_price),
            symbol: entry.symbol,
        });
    }

    Ok(positions)
}

fn parse_candle(row: &[serde_json::Value]) -> GatewayResult<Candle> {
    let number = |idx: usize, name: &str| -> GatewayResult<f64> {
        match row.get(idx) {
            Some(serde_json::Value::String(s)) => parse_field(name, s),
            Some(v) => v
                .as_f64()
                .ok_or_else(|| GatewayError::Decode(format!("kline {} is not numeric", name))),
            None => Err(GatewayError::Decode(format!("kline missing {}", name))),
        }
    };

    Ok(Candle {
        open_time: row.first().and_then(|v| v.as_i64()).unwrap_or_default(),
        open: number(1, "open")?,
        high: number(2, "high")?,
        low: number(3, "low")?,
        close: number(4, "close")?,
        volume: number(5, "volume")?,
    })
}

#[async_trait]
impl ExchangeGateway for BinanceFuturesClient {
    async fn get_ticker(&self) -> GatewayResult<Ticker> {
        let query = format!("symbol={}", self.symbol);
        let stats: Ticker24hResponse = self.public_get("/fapi/v1/ticker/24hr", &query).await?;

        let book: Option<BookTickerResponse> =
            match self.public_get("/fapi/v1/ticker/bookTicker", &query).await {
                Ok(book) => Some(book),
                Err(e) => {
                    debug!("Book ticker unavailable: {}", e);
                    None
                }
            };

        Ok(Ticker {
            price: positive(&stats.last_price),
            bid: book.as_ref().and_then(|b| positive(&b.bid_price)),
            ask: book.as_ref().and_then(|b| positive(&b.ask_price)),
            high_24h: positive(&stats.high_price),
            low_24h: positive(&stats.low_price),
            volume_24h: stats.quote_volume.parse().ok(),
            change_24h: stats.price_change_percent.parse().ok(),
        })
    }

    async fn get_positions(&self) -> GatewayResult<Vec<Position>> {
        let params = format!("symbol={}", self.symbol);
        let entries: Vec<PositionRiskEntry> = self
            .signed_request(Method::GET, "/fapi/v2/positionRisk", &params)
            .await?;
        parse_positions(entries)
    }

    async fn get_balance(&self) -> GatewayResult<Balance> {
        let entries: Vec<BalanceEntry> = self
            .signed_request(Method::GET, "/fapi/v2/balance", "")
            .await?;

        let usdt = entries
            .into_iter()
            .find(|b| b.asset == QUOTE_ASSET)
            .ok_or_else(|| GatewayError::Unavailable(format!("no {} balance", QUOTE_ASSET)))?;

        let total = parse_field("balance", &usdt.balance)?;
        let free = parse_field("availableBalance", &usdt.available_balance)?;

        Ok(Balance {
            total,
            free,
            used: (total - free).max(0.0),
        })
    }

    async fn market_order(&self, side: OrderSide, amount: f64) -> GatewayResult<OrderAck> {
        if self.dry_run {
            info!("[DRY RUN] Market {} {} {}", side, amount, self.symbol);
            return Ok(OrderAck::simulated());
        }

        let params = format!(
            "symbol={}&side={}&type=MARKET&quantity={}",
            self.symbol,
            side,
            self.format_quantity(amount).await
        );
        let ack = self.submit_order(params).await?;
        info!(
            "Market order executed: {} {} @ {}",
            side,
            amount,
            ack.average_price
                .map(|p| p.to_string())
                .unwrap_or_else(|| "N/A".to_string())
        );
        Ok(ack)
    }

    async fn create_protective_order(
        &self,
        side: OrderSide,
        amount: f64,
        stop_price: f64,
        kind: ProtectiveKind,
    ) -> GatewayResult<OrderAck> {
        if self.dry_run {
            info!("[DRY RUN] {} {} {} @ {}", kind, side, amount, stop_price);
            return Ok(OrderAck::simulated());
        }

        let params = format!(
            "symbol={}&side={}&type={}&quantity={}&stopPrice={}&reduceOnly=true",
            self.symbol,
            side,
            kind.order_type(),
            self.format_quantity(amount).await,
            self.format_price(stop_price).await
        );
        let ack = self.submit_order(params).await?;
        info!("{} set: {} {} @ {}", kind, side, amount, stop_price);
        Ok(ack)
    }

    async fn close_position(&self, position: &Position) -> GatewayResult<OrderAck> {
        let side = position.side.closing_side();

        if self.dry_run {
            info!("[DRY RUN] Close {} {} {}", position.side, position.size, self.symbol);
            return Ok(OrderAck::simulated());
        }

        let params = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&reduceOnly=true",
            self.symbol,
            side,
            self.format_quantity(position.size).await
        );
        self.submit_order(params).await
    }

    async fn cancel_order(&self, order_id: &str) -> GatewayResult<()> {
        if self.dry_run {
            info!("[DRY RUN] Cancel order {}", order_id);
            return Ok(());
        }

        let params = format!("symbol={}&orderId={}", self.symbol, order_id);
        let _: serde_json::Value = self
            .signed_request(Method::DELETE, "/fapi/v1/order", &params)
            .await?;
        info!("Order {} cancelled", order_id);
        Ok(())
    }

    async fn cancel_all_orders(&self) -> GatewayResult<()> {
        if self.dry_run {
            info!("[DRY RUN] Cancel all orders");
            return Ok(());
        }

        let params = format!("symbol={}", self.symbol);
        let _: serde_json::Value = self
            .signed_request(Method::DELETE, "/fapi/v1/allOpenOrders", &params)
            .await?;
        info!("All orders cancelled");
        Ok(())
    }
}

#[async_trait]
impl MarketFeed for BinanceFuturesClient {
    async fn get_ohlcv(&self, interval: &str, limit: usize) -> GatewayResult<Vec<Candle>> {
        let query = format!("symbol={}&interval={}&limit={}", self.symbol, interval, limit);
        let rows: Vec<Vec<serde_json::Value>> = self.public_get("/fapi/v1/klines", &query).await?;
        rows.iter().map(|row| parse_candle(row)).collect()
    }

    async fn get_funding_rate(&self) -> GatewayResult<f64> {
        let query = format!("symbol={}", self.symbol);
        let index: PremiumIndexResponse = self.public_get("/fapi/v1/premiumIndex", &query).await?;
        Ok(parse_field("lastFundingRate", &index.last_funding_rate)? * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn config() -> ExchangeConfig {
        ExchangeConfig {
            api_key: "key".to_string(),
            secret_key: "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j"
                .to_string(),
            testnet: true,
        }
    }

    #[test]
    fn test_market_symbol() {
        assert_eq!(BinanceFuturesClient::market_symbol("BTC/USDT"), "BTCUSDT");
        assert_eq!(BinanceFuturesClient::market_symbol("eth/usdt:USDT"), "ETHUSDT");
        assert_eq!(BinanceFuturesClient::market_symbol("SOLUSDT"), "SOLUSDT");
    }

    #[test]
    fn test_signature_matches_binance_reference() {
        let client = BinanceFuturesClient::new(&config(), "BTC/USDT", true);
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        assert_eq!(
            client.sign(query),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_format_to_step() {
        assert_eq!(format_to_step(98_123.456, "0.10", f64::round), "98123.5");
        assert_eq!(format_to_step(0.12345, "0.001", f64::floor), "0.123");
        assert_eq!(format_to_step(5.0, "1", f64::floor), "5");
    }

    #[test]
    fn test_parse_positions_skips_flat_and_reads_side() {
        let entries: Vec<PositionRiskEntry> = serde_json::from_str(
            r#"[
                {"symbol":"BTCUSDT","positionAmt":"0.000","entryPrice":"0.0","markPrice":"97000","unRealizedProfit":"0","liquidationPrice":"0"},
                {"symbol":"BTCUSDT","positionAmt":"-0.010","entryPrice":"97500.0","markPrice":"97000.0","unRealizedProfit":"5.0","liquidationPrice":"115000.5"}
            ]"#,
        )
        .unwrap();

        let positions = parse_positions(entries).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side, PositionSide::Short);
        assert_eq!(positions[0].size, 0.01);
        assert_eq!(positions[0].liquidation_price, Some(115_000.5));
    }

    #[tokio::test]
    async fn test_get_ticker() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v1/ticker/24hr")
            .match_query(Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()))
            .with_status(200)
            .with_body(r#"{"lastPrice":"97500.10","highPrice":"98500","lowPrice":"96800","quoteVolume":"2300000000","priceChangePercent":"-1.20"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/fapi/v1/ticker/bookTicker")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"bidPrice":"97500.00","askPrice":"97500.20"}"#)
            .create_async()
            .await;

        let client =
            BinanceFuturesClient::new(&config(), "BTC/USDT", true).with_base_url(server.url());
        let ticker = client.get_ticker().await.unwrap();

        assert_eq!(ticker.price, Some(97_500.1));
        assert_eq!(ticker.bid, Some(97_500.0));
        assert_eq!(ticker.change_24h, Some(-1.2));
    }

    #[tokio::test]
    async fn test_rejected_request_is_typed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v2/balance")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"code":-2015,"msg":"Invalid API-key"}"#)
            .create_async()
            .await;

        let client =
            BinanceFuturesClient::new(&config(), "BTC/USDT", false).with_base_url(server.url());
        match client.get_balance().await {
            Err(GatewayError::Rejected { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("Invalid API-key"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dry_run_writes_never_reach_exchange() {
        let mut server = mockito::Server::new_async().await;
        let orders = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client =
            BinanceFuturesClient::new(&config(), "BTC/USDT", true).with_base_url(server.url());
        let ack = client.market_order(OrderSide::Buy, 0.01).await.unwrap();
        assert!(ack.is_simulated());
        let ack = client
            .create_protective_order(OrderSide::Sell, 0.01, 95_000.0, ProtectiveKind::StopLoss)
            .await
            .unwrap();
        assert!(ack.is_simulated());
        client.cancel_all_orders().await.unwrap();

        orders.assert_async().await;
    }

    #[tokio::test]
    async fn test_live_protective_order_is_reduce_only() {
        let mut server = mockito::Server::new_async().await;
        let order = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("type".into(), "TAKE_PROFIT_MARKET".into()),
                Matcher::UrlEncoded("side".into(), "SELL".into()),
                Matcher::UrlEncoded("reduceOnly".into(), "true".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"orderId":42,"status":"NEW","avgPrice":"0.00"}"#)
            .create_async()
            .await;

        let client =
            BinanceFuturesClient::new(&config(), "BTC/USDT", false).with_base_url(server.url());
        let ack = client
            .create_protective_order(OrderSide::Sell, 0.01, 105.0, ProtectiveKind::TakeProfit)
            .await
            .unwrap();

        assert_eq!(ack.id, "42");
        assert_eq!(ack.average_price, None);
        order.assert_async().await;
    }

    #[tokio::test]
    async fn test_cancel_order_targets_single_order() {
        let mut server = mockito::Server::new_async().await;
        let single = server
            .mock("DELETE", "/fapi/v1/order")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
                Matcher::UrlEncoded("orderId".into(), "42".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"orderId":42,"status":"CANCELED"}"#)
            .create_async()
            .await;
        let all = server
            .mock("DELETE", "/fapi/v1/allOpenOrders")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client =
            BinanceFuturesClient::new(&config(), "BTC/USDT", false).with_base_url(server.url());
        client.cancel_order("42").await.unwrap();

        single.assert_async().await;
        all.assert_async().await;
    }

    #[test]
    fn test_parse_candle_row() {
        let row: Vec<serde_json::Value> = serde_json::from_str(
            r#"[1499040000000,"0.01634790","0.80000000","0.01575800","0.01577100","148976.11427815",1499644799999]"#,
        )
        .unwrap();
        let candle = parse_candle(&row).unwrap();
        assert_eq!(candle.open_time, 1_499_040_000_000);
        assert_eq!(candle.close, 0.015771);
    }
}
