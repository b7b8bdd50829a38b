pub mod position_sizing;

pub use position_sizing::{LevelOverrides, PositionSizer, SizingError, SizingParams, TradePlan};
