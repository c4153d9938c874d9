// Cycle orchestration: account snapshot -> prompt -> decision -> execution -> audit
pub mod prompt;
pub mod runner;

pub use prompt::PromptBuilder;
pub use runner::{CycleReport, LoopSettings, TradingCycle};
