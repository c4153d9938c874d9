use std::sync::Arc;

use crate::decision::backoff::{retry_delay, Sleeper, TokioSleeper};
use crate::decision::sanitizer::DecisionSanitizer;
use crate::llm::{BackendError, DecisionBackend};
use crate::models::TradingSignal;

const DEFAULT_MAX_RETRIES: u32 = 3;

/// Asks the backend for a decision and sanitizes it. Always yields a signal.
pub struct DecisionAgent {
    backend: Arc<dyn DecisionBackend>,
    sanitizer: DecisionSanitizer,
    sleeper: Arc<dyn Sleeper>,
    max_retries: u32,
}

impl DecisionAgent {
    pub fn new(backend: Arc<dyn DecisionBackend>, sanitizer: DecisionSanitizer) -> Self {
        Self {
            backend,
            sanitizer,
            sleeper: Arc::new(TokioSleeper),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn sanitizer(&self) -> &DecisionSanitizer {
        &self.sanitizer
    }

    pub async fn decide(&self, prompt: &str) -> TradingSignal {
        if !self.backend.is_configured() {
            tracing::error!("Decision backend API key is not configured");
            return self.sanitizer.fallback("Decision backend API key missing");
        }

        let mut last_error: Option<BackendError> = None;

        for attempt in 0..self.max_retries {
            tracing::info!(
                "Requesting decision (attempt {}/{})",
                attempt + 1,
                self.max_retries
            );

            let error = match self.backend.generate_decision(prompt).await {
                // Content problems are final; only transport failures are retried
                Ok(raw) => {
                    tracing::debug!("Raw decision: {}", raw.chars().take(500).collect::<String>());
                    return self.sanitizer.sanitize(&raw);
                }
                Err(e) => e,
            };

            let delay = match retry_delay(&error, attempt) {
                Some(delay) => delay,
                None => {
                    tracing::error!("Unexpected decision backend error: {}", error);
                    return self
                        .sanitizer
                        .fallback(format!("Decision backend error: {}", error));
                }
            };

            if attempt + 1 < self.max_retries {
                tracing::warn!(
                    "Decision attempt {} failed ({}), retrying in {}s",
                    attempt + 1,
                    error,
                    delay.as_secs()
                );
                self.sleeper.sleep(delay).await;
            } else {
                tracing::warn!("Decision attempt {} failed: {}", attempt + 1, error);
            }

            last_error = Some(error);
        }

        let last_error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        tracing::error!("All {} decision attempts failed", self.max_retries);
        self.sanitizer.fallback(format!(
            "Decision backend failed after {} attempts: {}",
            self.max_retries, last_error
        ))
    }
}
