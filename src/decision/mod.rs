pub mod gate;
pub mod normalizer;
pub mod types;

pub use gate::{evaluate, is_actionable, DecisionGate, RejectReason};
pub use normalizer::{fallback_decision, normalize, parse_decision};
pub use types::{Action, Decision, Direction, RiskLevel, CONFIDENCE_THRESHOLD};
