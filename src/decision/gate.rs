use std::fmt;

use super::types::{Action, Decision, Direction, CONFIDENCE_THRESHOLD};
use crate::exchange::{Position, PositionSide};

/// Why a decision was not turned into an order. Expected control flow, not a fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    LowConfidence { confidence: u8, threshold: u8 },
    NoSignal,
    PositionCapReached { open: usize, max: usize },
    DuplicateDirection(PositionSide),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::LowConfidence {
                confidence,
                threshold,
            } => write!(f, "low confidence ({}% < {}%)", confidence, threshold),
            RejectReason::NoSignal => write!(f, "no signal (WAIT)"),
            RejectReason::PositionCapReached { open, max } => {
                write!(f, "position cap reached ({}/{})", open, max)
            }
            RejectReason::DuplicateDirection(side) => {
                write!(f, "duplicate direction (already {})", side)
            }
        }
    }
}

/// Pure guard chain deciding whether a decision may trade.
///
/// Guards run in a fixed order and the first failure wins:
/// confidence, `WAIT`, position cap, duplicate direction.
#[derive(Debug, Clone, Copy)]
pub struct DecisionGate {
    max_positions: usize,
    confidence_threshold: u8,
}

impl DecisionGate {
    pub fn new(max_positions: usize) -> Self {
        Self::with_threshold(max_positions, CONFIDENCE_THRESHOLD)
    }

    pub fn with_threshold(max_positions: usize, confidence_threshold: u8) -> Self {
        Self {
            max_positions,
            confidence_threshold,
        }
    }

    pub fn max_positions(&self) -> usize {
        self.max_positions
    }

    /// Guards that only need the decision itself (confidence and `WAIT`).
    pub fn check_signal(&self, decision: &Decision) -> Result<Direction, RejectReason> {
        if decision.confidence < self.confidence_threshold {
            return Err(RejectReason::LowConfidence {
                confidence: decision.confidence,
                threshold: self.confidence_threshold,
            });
        }

        match decision.action {
            Action::Wait => Err(RejectReason::NoSignal),
            Action::Long => Ok(Direction::Long),
            Action::Short => Ok(Direction::Short),
        }
    }

    /// Full guard chain against the positions currently open on the exchange.
    pub fn check(
        &self,
        decision: &Decision,
        open_positions: &[Position],
    ) -> Result<Direction, RejectReason> {
        let direction = self.check_signal(decision)?;

        if open_positions.len() >= self.max_positions {
            return Err(RejectReason::PositionCapReached {
                open: open_positions.len(),
                max: self.max_positions,
            });
        }

        let wanted = direction.position_side();
        if open_positions.iter().any(|p| p.side == wanted) {
            return Err(RejectReason::DuplicateDirection(wanted));
        }

        Ok(direction)
    }
}

/// Free-function form of [`DecisionGate::check`].
pub fn evaluate(
    decision: &Decision,
    open_positions: &[Position],
    max_positions: usize,
    confidence_threshold: u8,
) -> Result<Direction, RejectReason> {
    DecisionGate::with_threshold(max_positions, confidence_threshold).check(decision, open_positions)
}

pub fn is_actionable(
    decision: &Decision,
    open_positions: &[Position],
    max_positions: usize,
    confidence_threshold: u8,
) -> bool {
    evaluate(decision, open_positions, max_positions, confidence_threshold).is_ok()
}
