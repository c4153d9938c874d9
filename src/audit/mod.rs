use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::execution::ExecutionResult;
use crate::models::{AccountStatus, TradingSignal};

/// One cycle's decision and outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub cycle_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub dry_run: bool,
    pub signal: TradingSignal,
    pub result: ExecutionResult,
    /// Account snapshot the decision was made from. Absent for manual decisions.
    #[serde(default)]
    pub account: Option<AccountStatus>,
    /// Prompt sent to the decision backend
    #[serde(default)]
    pub prompt: Option<String>,
}

impl AuditRecord {
    pub fn new(cycle_id: Uuid, signal: TradingSignal, result: ExecutionResult, dry_run: bool) -> Self {
        Self {
            cycle_id,
            recorded_at: Utc::now(),
            dry_run,
            signal,
            result,
            account: None,
            prompt: None,
        }
    }

    pub fn with_context(mut self, account: AccountStatus, prompt: String) -> Self {
        self.account = Some(account);
        self.prompt = Some(prompt);
        self
    }
}

/// A cycle that failed before a decision could be made
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleFailure {
    pub cycle_id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub error: String,
}

impl CycleFailure {
    pub fn new(cycle_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            cycle_id,
            recorded_at: Utc::now(),
            error: error.into(),
        }
    }
}

/// Sink for audit records. Logs every record; appends JSON lines when a path is set.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    path: Option<PathBuf>,
}

impl AuditLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub async fn record(&self, record: &AuditRecord) -> Result<()> {
        let result = &record.result;
        tracing::info!(
            cycle_id = %record.cycle_id,
            status = ?result.status,
            operation = %result.operation,
            symbol = %result.symbol,
            direction = %result.direction,
            dry_run = record.dry_run,
            "Cycle audit: {}",
            result.detail.as_deref().unwrap_or(&result.reason)
        );

        self.append(record).await
    }

    pub async fn record_failure(&self, failure: &CycleFailure) -> Result<()> {
        tracing::error!(cycle_id = %failure.cycle_id, "Cycle failed: {}", failure.error);

        self.append(failure).await
    }

    async fn append<T: Serialize>(&self, entry: &T) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut line = serde_json::to_string(entry).context("Failed to serialize audit record")?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open audit log {}", path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write audit log {}", path.display()))?;
        file.flush().await?;

        Ok(())
    }
}
