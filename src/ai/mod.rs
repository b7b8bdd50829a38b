pub mod client;
pub mod engine;

pub use client::{DeepSeekClient, LanguageModel, ModelError};
pub use engine::{build_prompt, AiEngine, SYSTEM_PROMPT};
