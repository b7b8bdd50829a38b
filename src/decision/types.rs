use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::exchange::{OrderSide, PositionSide};

/// Minimum confidence (percent) a decision needs before it can trade.
pub const CONFIDENCE_THRESHOLD: u8 = 70;

/// Upper bound on the stored reasoning text.
pub const REASONING_MAX_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Long,
    Short,
    Wait,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Long => "LONG",
            Action::Short => "SHORT",
            Action::Wait => "WAIT",
        }
    }

    /// The tradable direction, `None` for `WAIT`.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Action::Long => Some(Direction::Long),
            Action::Short => Some(Direction::Short),
            Action::Wait => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LONG" => Ok(Action::Long),
            "SHORT" => Ok(Action::Short),
            "WAIT" => Ok(Action::Wait),
            other => Err(format!("unknown action '{}'", other)),
        }
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// An actionable side of the market. Unlike [`Action`] it cannot be `WAIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Side of the order that opens a position in this direction.
    pub fn entry_side(&self) -> OrderSide {
        match self {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    /// Side of the reduce-only orders that protect or close the position.
    pub fn exit_side(&self) -> OrderSide {
        self.entry_side().opposite()
    }

    pub fn position_side(&self) -> PositionSide {
        match self {
            Direction::Long => PositionSide::Long,
            Direction::Short => PositionSide::Short,
        }
    }

    pub fn action(&self) -> Action {
        match self {
            Direction::Long => Action::Long,
            Direction::Short => Action::Short,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action().as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        };
        f.write_str(s)
    }
}

impl<'de> Deserialize<'de> for RiskLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(RiskLevel::Low),
            "MEDIUM" => Ok(RiskLevel::Medium),
            "HIGH" => Ok(RiskLevel::High),
            other => Err(de::Error::custom(format!("unknown risk level '{}'", other))),
        }
    }
}

/// Structured output of the analysis step.
///
/// The model is asked to answer with a `"decision"` key; `"action"` is
/// accepted as well. Absent prices are unset, never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    #[serde(rename = "decision", alias = "action")]
    pub action: Action,
    #[serde(default, deserialize_with = "confidence_field")]
    pub confidence: u8,
    #[serde(default, deserialize_with = "reasoning_field")]
    pub reasoning: String,
    #[serde(default, deserialize_with = "price_field")]
    pub entry_price: Option<f64>,
    #[serde(default, deserialize_with = "price_field")]
    pub stop_loss: Option<f64>,
    #[serde(default, deserialize_with = "price_field")]
    pub take_profit: Option<f64>,
    #[serde(default, deserialize_with = "risk_level_field")]
    pub risk_level: RiskLevel,
}

impl Decision {
    pub fn new(action: Action, confidence: u8) -> Self {
        Self {
            action,
            confidence: confidence.min(100),
            reasoning: String::new(),
            entry_price: None,
            stop_loss: None,
            take_profit: None,
            risk_level: RiskLevel::Medium,
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = truncate_chars(&reasoning.into(), REASONING_MAX_CHARS);
        self
    }

    pub fn with_levels(mut self, stop_loss: Option<f64>, take_profit: Option<f64>) -> Self {
        self.stop_loss = stop_loss.filter(|p| p.is_finite() && *p > 0.0);
        self.take_profit = take_profit.filter(|p| p.is_finite() && *p > 0.0);
        self
    }

    pub fn with_risk_level(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    /// Decision used when the model could not be reached at all.
    pub fn unavailable(cause: impl fmt::Display) -> Self {
        Self::new(Action::Wait, 0)
            .with_reasoning(format!("Error: {}", cause))
            .with_risk_level(RiskLevel::High)
    }
}

/// First `max` characters of `text`, never splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Numbers arrive as JSON numbers or as strings, depending on the model.
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberLike {
    Number(f64),
    Text(String),
}

impl NumberLike {
    fn value(self) -> Result<f64, String> {
        match self {
            NumberLike::Number(n) => Ok(n),
            NumberLike::Text(s) => {
                let cleaned = s.trim().trim_end_matches('%').replace(['$', ','], "");
                cleaned
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| format!("'{}' is not a number", s))
            }
        }
    }
}

fn confidence_field<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u8, D::Error> {
    match Option::<NumberLike>::deserialize(deserializer)? {
        None => Ok(0),
        Some(raw) => {
            let value = raw.value().map_err(de::Error::custom)?;
            if !value.is_finite() {
                return Err(de::Error::custom("confidence must be finite"));
            }
            Ok(value.round().clamp(0.0, 100.0) as u8)
        }
    }
}

fn price_field<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    match Option::<NumberLike>::deserialize(deserializer)? {
        None => Ok(None),
        // "null"/"N/A" style placeholders are unset, not malformed
        Some(NumberLike::Text(s)) if !s.chars().any(|c| c.is_ascii_digit()) => Ok(None),
        Some(raw) => {
            let value = raw.value().map_err(de::Error::custom)?;
            Ok(Some(value).filter(|p| p.is_finite() && *p > 0.0))
        }
    }
}

fn reasoning_field<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    Ok(truncate_chars(&raw, REASONING_MAX_CHARS))
}

fn risk_level_field<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RiskLevel, D::Error> {
    Ok(Option::<RiskLevel>::deserialize(deserializer)?.unwrap_or_default())
}
