pub mod fetcher;
pub mod indicators;

pub use fetcher::{DataFetcher, SourceEndpoints};

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// One aggregated metric. Sources that fail report `NotAvailable`, which
/// renders as `N/A` and is never treated as a number.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Number(f64),
    Text(String),
    NotAvailable,
}

impl Serialize for MetricValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MetricValue::Number(n) => serializer.serialize_f64(*n),
            MetricValue::Text(s) => serializer.serialize_str(s),
            MetricValue::NotAvailable => serializer.serialize_str("N/A"),
        }
    }
}

impl MetricValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) if n.is_finite() => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Number(n) => write!(f, "{}", n),
            MetricValue::Text(s) => f.write_str(s),
            MetricValue::NotAvailable => f.write_str("N/A"),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        MetricValue::Number(value)
    }
}

impl From<Option<f64>> for MetricValue {
    fn from(value: Option<f64>) -> Self {
        value.map_or(MetricValue::NotAvailable, MetricValue::Number)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        MetricValue::Text(value.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(value: String) -> Self {
        MetricValue::Text(value)
    }
}

static NOT_AVAILABLE: MetricValue = MetricValue::NotAvailable;

/// Everything the analysis prompt knows about the market for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MarketSnapshot {
    metrics: BTreeMap<String, MetricValue>,
}

impl MarketSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, value: impl Into<MetricValue>) {
        self.metrics.insert(key.to_string(), value.into());
    }

    pub fn extend(&mut self, other: MarketSnapshot) {
        self.metrics.extend(other.metrics);
    }

    pub fn get(&self, key: &str) -> &MetricValue {
        self.metrics.get(key).unwrap_or(&NOT_AVAILABLE)
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        self.get(key).as_number()
    }

    /// Display form of a metric; missing keys render as `N/A`.
    pub fn display(&self, key: &str) -> String {
        self.get(key).to_string()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetricValue)> {
        self.metrics.iter()
    }
}

/// Compact rendering of large quantities: `1.2B`, `3.4M`, `5.6K`.
pub fn format_number(value: f64) -> String {
    let abs = value.abs();
    if abs >= 1_000_000_000.0 {
        format!("{:.1}B", value / 1_000_000_000.0)
    } else if abs >= 1_000_000.0 {
        format!("{:.1}M", value / 1_000_000.0)
    } else if abs >= 1_000.0 {
        format!("{:.1}K", value / 1_000.0)
    } else {
        format!("{}", (value * 100.0).round() / 100.0)
    }
}
