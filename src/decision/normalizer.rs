use tracing::{debug, warn};

use super::types::{truncate_chars, Action, Decision, RiskLevel};

/// Confidence assigned to decisions recovered from unstructured text.
pub const FALLBACK_CONFIDENCE: u8 = 50;

/// Amount of raw text kept as reasoning in a recovered decision.
pub const FALLBACK_REASONING_CHARS: usize = 200;

/// Turn a raw model reply into a [`Decision`].
///
/// JSON replies (bare, fenced, or embedded in prose) are taken as-is. Anything
/// else goes through [`fallback_decision`], so this never fails.
pub fn normalize(raw: &str) -> Decision {
    match parse_decision(raw) {
        Some(decision) => {
            debug!(
                "Parsed model decision: {} ({}%)",
                decision.action, decision.confidence
            );
            decision
        }
        None => {
            warn!("⚠️ Failed to parse model JSON, using text fallback");
            fallback_decision(raw)
        }
    }
}

/// Structured parse only. `None` when no well-formed decision object exists.
pub fn parse_decision(raw: &str) -> Option<Decision> {
    let body = strip_code_fence(raw);

    if let Ok(decision) = serde_json::from_str::<Decision>(body) {
        return Some(decision);
    }

    extract_json_object(body).and_then(|json| serde_json::from_str::<Decision>(json).ok())
}

/// Remove a leading ``` fence and an optional `json` language tag.
pub fn strip_code_fence(raw: &str) -> &str {
    let text = raw.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };

    let block = rest.split("```").next().unwrap_or(rest);
    let block = match block.get(..4) {
        Some(tag) if tag.eq_ignore_ascii_case("json") => &block[4..],
        _ => block,
    };
    block.trim()
}

/// Outermost `{ ... }` span of `text`, if any.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Recover a decision from prose: `LONG` beats `SHORT`, otherwise `WAIT`.
pub fn fallback_decision(raw: &str) -> Decision {
    let upper = raw.to_uppercase();
    let action = if upper.contains("LONG") {
        Action::Long
    } else if upper.contains("SHORT") {
        Action::Short
    } else {
        Action::Wait
    };

    Decision {
        action,
        confidence: FALLBACK_CONFIDENCE,
        reasoning: truncate_chars(raw, FALLBACK_REASONING_CHARS),
        entry_price: None,
        stop_loss: None,
        take_profit: None,
        risk_level: RiskLevel::Medium,
    }
}
