use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use uuid::Uuid;

use crate::audit::{AuditLog, AuditRecord, CycleFailure};
use crate::cycle::prompt::PromptBuilder;
use crate::decision::DecisionAgent;
use crate::execution::{market_symbol, ExecutionResult, Executor, MarketGateway};
use crate::indicators::{TechnicalSnapshot, INDICATOR_CANDLES, INDICATOR_INTERVAL};
use crate::models::{AccountStatus, TradingSignal};

/// Outcome of one decide-and-execute cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub signal: TradingSignal,
    pub result: ExecutionResult,
    pub duration: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct LoopSettings {
    pub interval: Duration,
    pub max_consecutive_errors: u32,
}

/// One signal at a time: snapshot, decide, execute, audit.
pub struct TradingCycle {
    gateway: Arc<dyn MarketGateway>,
    agent: DecisionAgent,
    executor: Executor,
    prompt: PromptBuilder,
    audit: AuditLog,
    tickers: Vec<String>,
    dry_run: bool,
}

impl TradingCycle {
    pub fn new(
        gateway: Arc<dyn MarketGateway>,
        agent: DecisionAgent,
        executor: Executor,
        prompt: PromptBuilder,
        audit: AuditLog,
    ) -> Self {
        Self {
            gateway,
            agent,
            executor,
            prompt,
            audit,
            tickers: Vec::new(),
            dry_run: false,
        }
    }

    pub fn with_tickers(mut self, tickers: Vec<String>) -> Self {
        self.tickers = tickers;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run one full cycle. Fails only when the account snapshot or prompt cannot be built;
    /// such failures are audited before being returned.
    pub async fn run_once(&self) -> Result<CycleReport> {
        let started = Instant::now();
        let cycle_id = Uuid::new_v4();
        tracing::info!("=== Trading cycle {} started ===", cycle_id);

        let report = match self.decide_and_settle(cycle_id, started).await {
            Ok(report) => report,
            Err(e) => {
                let failure = CycleFailure::new(cycle_id, format!("{:#}", e));
                if let Err(audit_err) = self.audit.record_failure(&failure).await {
                    tracing::warn!("Failed to write audit record: {:#}", audit_err);
                }
                return Err(e);
            }
        };

        tracing::info!(
            "=== Trading cycle {} finished in {:.1}s ===",
            cycle_id,
            report.duration.as_secs_f64()
        );
        Ok(report)
    }

    async fn decide_and_settle(&self, cycle_id: Uuid, started: Instant) -> Result<CycleReport> {
        let account = self
            .gateway
            .account_status()
            .await
            .context("Failed to read account status")?;
        tracing::info!(
            "Balance: ${} (free: ${}), open positions: {}",
            account.balance_usd,
            account.free_balance_usd,
            account.open_positions.len()
        );

        let technicals = self.technical_indicators().await;
        let prices = self.fresh_prices().await;
        let allowed = self.agent.sanitizer().allowed_symbols();
        let prompt = self.prompt.build(&account, &technicals, &prices, &allowed)?;
        tracing::debug!("Prompt built ({} chars)", prompt.len());

        let signal = self.agent.decide(&prompt).await;
        Ok(self
            .settle(cycle_id, signal, started, Some((account, prompt)))
            .await)
    }

    /// Manual trade path: sanitize a raw decision and execute it as a cycle would
    pub async fn execute_decision(&self, raw: &str) -> CycleReport {
        let started = Instant::now();
        let signal = self.agent.sanitizer().sanitize(raw);
        self.settle(Uuid::new_v4(), signal, started, None).await
    }

    async fn settle(
        &self,
        cycle_id: Uuid,
        signal: TradingSignal,
        started: Instant,
        context: Option<(AccountStatus, String)>,
    ) -> CycleReport {
        let result = if self.dry_run {
            tracing::info!("[DRY RUN] Order not executed");
            let market = market_symbol(&signal.symbol, self.executor.quote_asset());
            ExecutionResult::skipped(&signal, &market, "dry_run mode")
        } else {
            self.executor.execute(&signal, self.gateway.as_ref()).await
        };

        let mut record = AuditRecord::new(cycle_id, signal.clone(), result.clone(), self.dry_run);
        if let Some((account, prompt)) = context {
            record = record.with_context(account, prompt);
        }
        if let Err(e) = self.audit.record(&record).await {
            tracing::warn!("Failed to write audit record: {:#}", e);
        }

        CycleReport {
            cycle_id,
            signal,
            result,
            duration: started.elapsed(),
        }
    }

    /// Indicator snapshot per configured ticker. A ticker that fails is logged and left out.
    async fn technical_indicators(&self) -> Vec<TechnicalSnapshot> {
        let mut snapshots = Vec::new();
        for ticker in &self.tickers {
            let market = market_symbol(ticker, self.executor.quote_asset());
            let candles = match self
                .gateway
                .get_candles(&market, INDICATOR_INTERVAL, INDICATOR_CANDLES)
                .await
            {
                Ok(candles) => candles,
                Err(e) => {
                    tracing::warn!("Indicators unavailable for {}: {}", ticker, e);
                    continue;
                }
            };

            match TechnicalSnapshot::analyze(ticker, INDICATOR_INTERVAL, &candles) {
                Some(snapshot) => snapshots.push(snapshot),
                None => tracing::warn!(
                    "Not enough candles for {} indicators ({})",
                    ticker,
                    candles.len()
                ),
            }
        }
        snapshots
    }

    /// Latest price per configured ticker. Tickers that fail are left out.
    async fn fresh_prices(&self) -> BTreeMap<String, Decimal> {
        let mut prices = BTreeMap::new();
        for ticker in &self.tickers {
            let market = market_symbol(ticker, self.executor.quote_asset());
            match self.gateway.get_current_price(&market).await {
                Ok(price) => {
                    prices.insert(ticker.to_uppercase(), price);
                }
                Err(e) => tracing::warn!("Price unavailable for {}: {}", ticker, e),
            }
        }
        prices
    }

    /// Repeat cycles until shutdown is signalled. Shutdown is only observed between cycles.
    pub async fn run_loop(&self, settings: LoopSettings, mut shutdown: watch::Receiver<bool>) {
        let mut consecutive_errors = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(report) => {
                    consecutive_errors = 0;
                    tracing::info!("Cycle result: {:?}", report.result.status);
                }
                Err(e) => {
                    consecutive_errors += 1;
                    tracing::error!(
                        "Trading cycle failed ({} consecutive): {:#}",
                        consecutive_errors,
                        e
                    );
                }
            }

            if consecutive_errors >= settings.max_consecutive_errors.max(1) {
                let pause = settings.interval * 2;
                tracing::error!(
                    "{} consecutive errors, pausing {}s before retrying",
                    consecutive_errors,
                    pause.as_secs()
                );
                consecutive_errors = 0;
                if wait_or_shutdown(pause, &mut shutdown).await {
                    break;
                }
            }

            tracing::info!("Next cycle in {}s", settings.interval.as_secs());
            if wait_or_shutdown(settings.interval, &mut shutdown).await {
                break;
            }
        }

        tracing::info!("Trading loop stopped");
    }
}

/// Sleep for `duration`, returning early with `true` if shutdown is requested
async fn wait_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }

    match tokio::time::timeout(duration, shutdown.changed()).await {
        Err(_elapsed) => false,
        // Sender dropped, treat as shutdown
        Ok(Err(_)) => true,
        Ok(Ok(())) => *shutdown.borrow(),
    }
}
