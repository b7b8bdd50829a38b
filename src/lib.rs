pub mod ai;
pub mod analytics;
pub mod bot;
pub mod config;
pub mod decision;
pub mod exchange;
pub mod execution;
pub mod market_data;
pub mod notify;
pub mod risk;
pub mod simulation;
pub mod trader;
