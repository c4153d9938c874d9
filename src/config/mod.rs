use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::risk::RiskLimits;

/// Runtime settings, built once at startup and handed to each component.
///
/// Precedence (lowest first): built-in defaults, optional TOML file, environment
/// variables (a `.env` file is loaded into the environment first). Environment
/// keys are the upper-cased field names behind `SIGNAL_TRADER_`, e.g.
/// `SIGNAL_TRADER_MAX_LEVERAGE=3`, `SIGNAL_TRADER_TICKERS=BTC,ETH`. The vendor
/// credentials are also read under their usual names (`BINANCE_API_KEY`,
/// `BINANCE_API_SECRET`, `OPENAI_API_KEY`) below the prefixed keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub binance_api_key: String,
    pub binance_api_secret: String,

    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_temperature: f32,
    pub openai_max_tokens: u32,
    pub openai_base_url: String,

    pub testnet: bool,
    pub tickers: Vec<String>,
    pub quote_asset: String,
    pub allowed_symbols: Vec<String>,
    pub default_symbol: String,
    pub max_leverage: u32,
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,

    pub max_retries: u32,
    pub backend_timeout_secs: u64,
    pub gateway_timeout_secs: u64,

    pub loop_interval_seconds: u64,
    pub max_consecutive_errors: u32,
    pub dry_run: bool,

    pub log_level: String,
    pub audit_log_path: Option<PathBuf>,
    pub system_prompt_path: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            binance_api_key: String::new(),
            binance_api_secret: String::new(),
            openai_api_key: String::new(),
            openai_model: "gpt-4o-mini".to_string(),
            openai_temperature: 0.2,
            openai_max_tokens: 500,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            testnet: true,
            tickers: vec!["BTC".into(), "ETH".into(), "SOL".into()],
            quote_asset: "USDT".to_string(),
            allowed_symbols: [
                "BTC", "ETH", "SOL", "BNB", "XRP", "ADA", "DOGE", "AVAX", "LINK", "DOT",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            default_symbol: "BTC".to_string(),
            max_leverage: 5,
            stop_loss_pct: dec!(0.02),
            take_profit_pct: dec!(0.04),
            max_retries: 3,
            backend_timeout_secs: 30,
            gateway_timeout_secs: 10,
            loop_interval_seconds: 900, // 15 minutes
            max_consecutive_errors: 5,
            dry_run: false,
            log_level: "info".to_string(),
            audit_log_path: None,
            system_prompt_path: None,
        }
    }
}

const ENV_PREFIX: &str = "SIGNAL_TRADER";

/// Unprefixed variables accepted as-is
const CREDENTIAL_VARS: [&str; 3] = ["BINANCE_API_KEY", "BINANCE_API_SECRET", "OPENAI_API_KEY"];

impl AppConfig {
    /// Load `.env`, then defaults + optional file + process environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_sources(path, std::env::vars().collect())
    }

    fn from_sources(path: Option<&Path>, vars: HashMap<String, String>) -> Result<Self> {
        let credentials: HashMap<String, String> = vars
            .iter()
            .filter(|(key, _)| CREDENTIAL_VARS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }

        let mut config: AppConfig = builder
            .add_source(Environment::default().source(Some(credentials)))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("tickers")
                    .with_list_parse_key("allowed_symbols")
                    .source(Some(vars)),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.normalize();
        Ok(config)
    }

    fn normalize(&mut self) {
        let clean = |list: &mut Vec<String>| {
            *list = list
                .iter()
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        };
        clean(&mut self.tickers);
        clean(&mut self.allowed_symbols);
        self.quote_asset = self.quote_asset.trim().to_uppercase();

        // An empty env var still yields Some("")
        self.audit_log_path = self.audit_log_path.take().filter(|p| !p.as_os_str().is_empty());
        self.system_prompt_path = self
            .system_prompt_path
            .take()
            .filter(|p| !p.as_os_str().is_empty());
    }

    /// Every problem with the configuration, empty when it is usable
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.binance_api_key.trim().is_empty() || self.binance_api_secret.trim().is_empty() {
            errors.push("BINANCE_API_KEY and BINANCE_API_SECRET are required".to_string());
        }
        if self.openai_api_key.trim().is_empty() {
            errors.push("OPENAI_API_KEY is required".to_string());
        }
        if self.loop_interval_seconds < 60 {
            errors.push(format!(
                "loop_interval_seconds must be at least 60 (got {})",
                self.loop_interval_seconds
            ));
        }
        if !(1..=20).contains(&self.max_leverage) {
            errors.push(format!(
                "max_leverage must be between 1 and 20 (got {})",
                self.max_leverage
            ));
        }
        for (name, pct) in [
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
        ] {
            if pct <= Decimal::ZERO || pct >= Decimal::ONE {
                errors.push(format!("{} must be between 0 and 1 (got {})", name, pct));
            }
        }
        if self.allowed_symbols.is_empty() {
            errors.push("allowed_symbols must not be empty".to_string());
        }
        if self.default_symbol != self.default_symbol.to_uppercase() {
            errors.push(format!(
                "default_symbol must be upper-case (got {})",
                self.default_symbol
            ));
        }

        errors
    }

    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            max_leverage: self.max_leverage,
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: self.take_profit_pct,
        }
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_secs(self.loop_interval_seconds)
    }

    pub fn network(&self) -> &'static str {
        if self.testnet {
            "testnet"
        } else {
            "mainnet"
        }
    }
}
