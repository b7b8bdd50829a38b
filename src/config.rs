use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },

    #[error("configuration errors: {}", .0.join("; "))]
    Validation(Vec<String>),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub ai: AiConfig,
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    pub agent: AgentConfig,
    pub data_sources: DataSourcesConfig,
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExchangeConfig {
    pub api_key: String,
    pub secret_key: String,
    pub testnet: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradingConfig {
    pub symbol: String,
    pub leverage: u32,
    pub position_size_pct: f64,
    pub max_positions: usize,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    /// Flatten an entry whose stop-loss or take-profit could not be placed.
    pub close_on_unprotected: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    pub analysis_interval_secs: u64,
    pub log_level: String,
    pub dry_run: bool,
    /// Trade against the in-memory simulator instead of Binance.
    pub simulation_mode: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DataSourcesConfig {
    pub coinglass_api_key: Option<String>,
    pub cryptopanic_api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        self.bot_token.is_some() && self.chat_id.is_some()
    }
}

impl TradingConfig {
    /// Base asset of the traded pair (`BTC/USDT` -> `BTC`).
    pub fn base_asset(&self) -> String {
        self.symbol
            .split(['/', ':'])
            .next()
            .unwrap_or(&self.symbol)
            .trim_end_matches("USDT")
            .to_uppercase()
    }
}

fn text<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn text_or<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    text(lookup, key).unwrap_or_else(|| default.to_string())
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match text(lookup, key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn flag<F>(lookup: &F, key: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match text(lookup, key) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(ConfigError::Invalid { key, value: raw }),
        },
    }
}

/// `****abcd` style rendering for secrets in banners and logs.
pub fn mask_secret(secret: &str) -> String {
    if secret.is_empty() {
        return "NOT SET".to_string();
    }
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{}{}", "*".repeat(20), tail)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from any key lookup (environment, map, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ai = AiConfig {
            api_key: text_or(&lookup, "DEEPSEEK_API_KEY", ""),
            base_url: text_or(&lookup, "DEEPSEEK_BASE_URL", "https://api.deepseek.com"),
            model: text_or(&lookup, "DEEPSEEK_MODEL", "deepseek-chat"),
        };

        let exchange = ExchangeConfig {
            api_key: text_or(&lookup, "BINANCE_API_KEY", ""),
            secret_key: text_or(&lookup, "BINANCE_SECRET_KEY", ""),
            testnet: flag(&lookup, "BINANCE_TESTNET", true)?,
        };

        let trading = TradingConfig {
            symbol: text_or(&lookup, "TRADING_SYMBOL", "BTC/USDT"),
            leverage: parse_or(&lookup, "TRADING_LEVERAGE", 5)?,
            position_size_pct: parse_or(&lookup, "POSITION_SIZE_PERCENT", 10.0)?,
            max_positions: parse_or(&lookup, "MAX_POSITIONS", 3)?,
            stop_loss_pct: parse_or(&lookup, "STOP_LOSS_PERCENT", 2.0)?,
            take_profit_pct: parse_or(&lookup, "TAKE_PROFIT_PERCENT", 5.0)?,
            close_on_unprotected: flag(&lookup, "CLOSE_ON_UNPROTECTED", true)?,
        };

        let agent = AgentConfig {
            analysis_interval_secs: parse_or(&lookup, "ANALYSIS_INTERVAL_SECONDS", 300)?,
            log_level: text_or(&lookup, "LOG_LEVEL", "INFO"),
            dry_run: flag(&lookup, "DRY_RUN", true)?,
            simulation_mode: flag(&lookup, "SIMULATION_MODE", false)?,
        };

        let data_sources = DataSourcesConfig {
            coinglass_api_key: text(&lookup, "COINGLASS_API_KEY"),
            cryptopanic_api_key: text(&lookup, "CRYPTOPANIC_API_KEY"),
        };

        let telegram = TelegramConfig {
            bot_token: text(&lookup, "TELEGRAM_BOT_TOKEN"),
            chat_id: text(&lookup, "TELEGRAM_CHAT_ID"),
        };

        Ok(Config {
            ai,
            exchange,
            trading,
            agent,
            data_sources,
            telegram,
        })
    }

    /// Check required values and ranges, reporting every problem at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.ai.api_key.is_empty() {
            errors.push("DEEPSEEK_API_KEY is required".to_string());
        }

        if !self.agent.simulation_mode {
            if self.exchange.api_key.is_empty() {
                errors.push("BINANCE_API_KEY is required".to_string());
            }
            if self.exchange.secret_key.is_empty() {
                errors.push("BINANCE_SECRET_KEY is required".to_string());
            }
        }

        if self.trading.leverage == 0 {
            errors.push("TRADING_LEVERAGE must be at least 1".to_string());
        }
        if self.trading.max_positions == 0 {
            errors.push("MAX_POSITIONS must be at least 1".to_string());
        }

        let size_pct = self.trading.position_size_pct;
        if !(size_pct > 0.0 && size_pct <= 100.0) {
            errors.push(format!("POSITION_SIZE_PERCENT must be in (0, 100], got {}", size_pct));
        }

        // at 100% the long stop-loss or short take-profit lands on zero
        let level_percents = [
            ("STOP_LOSS_PERCENT", self.trading.stop_loss_pct),
            ("TAKE_PROFIT_PERCENT", self.trading.take_profit_pct),
        ];
        for (key, value) in level_percents {
            if !(value > 0.0 && value < 100.0) {
                errors.push(format!("{} must be in (0, 100), got {}", key, value));
            }
        }

        if self.agent.analysis_interval_secs == 0 {
            errors.push("ANALYSIS_INTERVAL_SECONDS must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}
