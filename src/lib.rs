// Core modules
pub mod api;
pub mod audit;
pub mod config;
pub mod cycle;
pub mod decision;
pub mod execution;
pub mod indicators;
pub mod llm;
pub mod models;
pub mod risk;

// Re-export commonly used types
pub use models::*;
