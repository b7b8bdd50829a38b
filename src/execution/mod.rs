pub mod executor;

pub use executor::{CycleOutcome, CyclePhase, CycleReport, ExecutionReport, Executor, Protection};
