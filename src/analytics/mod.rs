pub mod pnl;

pub use pnl::{CycleState, DailyCounters, TraderStatus};
