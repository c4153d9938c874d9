use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use signal_trader::api::BinanceFuturesClient;
use signal_trader::audit::AuditLog;
use signal_trader::config::AppConfig;
use signal_trader::cycle::{LoopSettings, PromptBuilder, TradingCycle};
use signal_trader::decision::{DecisionAgent, DecisionSanitizer};
use signal_trader::execution::{Executor, MarketGateway};
use signal_trader::llm::OpenAiClient;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "signal-trader")]
#[command(about = "LLM-driven perpetual futures trader for Binance USD-M", long_about = None)]
struct Cli {
    /// TOML config file (environment variables override it)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Decide and audit, but never send orders
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run trading cycles until Ctrl+C / SIGTERM (default)
    Run,
    /// Run a single trading cycle
    Once,
    /// Print account status as JSON
    Status,
    /// Sanitize and execute a raw decision JSON
    Execute {
        /// e.g. '{"operation":"close","symbol":"BTC","direction":"long"}'
        #[arg(short, long)]
        decision: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if cli.dry_run {
        config.dry_run = true;
    }
    setup_logging(&config.log_level);

    let errors = config.validate();
    if !errors.is_empty() {
        for error in &errors {
            tracing::error!("Config error: {}", error);
        }
        anyhow::bail!("Invalid configuration ({} errors)", errors.len());
    }

    tracing::info!("🚀 signal-trader starting");
    tracing::info!("  Network: {}", config.network());
    tracing::info!("  Tickers: {}", config.tickers.join(", "));
    tracing::info!("  Max leverage: {}x", config.max_leverage);
    tracing::info!(
        "  Stop loss / take profit: {}% / {}%",
        config.stop_loss_pct * rust_decimal::Decimal::ONE_HUNDRED,
        config.take_profit_pct * rust_decimal::Decimal::ONE_HUNDRED
    );
    tracing::info!("  Dry run: {}", config.dry_run);
    if !config.testnet && !config.dry_run {
        tracing::warn!("⚠️  LIVE TRADING on mainnet");
    }

    let gateway = Arc::new(
        BinanceFuturesClient::new(
            &config.binance_api_key,
            &config.binance_api_secret,
            config.testnet,
            Duration::from_secs(config.gateway_timeout_secs),
        )?
        .with_quote_asset(&config.quote_asset),
    );

    let command = cli.command.unwrap_or(Commands::Run);

    if let Commands::Status = command {
        let status = gateway.account_status().await?;
        print_json(&status)?;
        return Ok(());
    }

    let cycle = build_cycle(&config, gateway)?;

    match command {
        Commands::Run => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                wait_for_shutdown_signal().await;
                let _ = shutdown_tx.send(true);
            });

            let settings = LoopSettings {
                interval: config.loop_interval(),
                max_consecutive_errors: config.max_consecutive_errors,
            };
            tracing::info!("Loop interval: {}s", config.loop_interval_seconds);
            cycle.run_loop(settings, shutdown_rx).await;
        }
        Commands::Once => {
            let report = cycle.run_once().await?;
            print_json(&report.result)?;
        }
        Commands::Execute { decision } => {
            let report = cycle.execute_decision(&decision).await;
            print_json(&report.result)?;
        }
        Commands::Status => {}
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn build_cycle(config: &AppConfig, gateway: Arc<dyn MarketGateway>) -> Result<TradingCycle> {
    let backend = OpenAiClient::new(
        &config.openai_api_key,
        &config.openai_model,
        Duration::from_secs(config.backend_timeout_secs),
    )?
    .with_base_url(&config.openai_base_url)
    .with_sampling(config.openai_temperature, config.openai_max_tokens);

    let sanitizer = DecisionSanitizer::new(&config.allowed_symbols, config.default_symbol.clone());
    let agent = DecisionAgent::new(Arc::new(backend), sanitizer).with_max_retries(config.max_retries);

    Ok(TradingCycle::new(
        gateway,
        agent,
        Executor::new(config.risk_limits(), config.quote_asset.clone()),
        PromptBuilder::load(config.system_prompt_path.as_deref()),
        AuditLog::new(config.audit_log_path.clone()),
    )
    .with_tickers(config.tickers.clone())
    .with_dry_run(config.dry_run))
}

fn setup_logging(level: &str) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,signal_trader={}", level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        _ => {
            tracing::warn!("Failed to install signal handlers, falling back to Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, stopping after the current cycle");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT (Ctrl+C), stopping after the current cycle");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("Received Ctrl+C, stopping after the current cycle");
    }
}
