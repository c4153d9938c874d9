// Decision sourcing: backend calls with retry, then sanitization into a signal
pub mod agent;
pub mod backoff;
pub mod sanitizer;

pub use agent::DecisionAgent;
pub use backoff::{Sleeper, TokioSleeper};
pub use sanitizer::{extract_json, DecisionSanitizer};
