// src/config.rs

use crate::types::{AlgoHint, Contract, TagValue};
use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Positional arguments: account, continuous flag, share cap, minimum change.
#[derive(Debug, Clone, Parser)]
#[command(name = "delta-hedger")]
#[command(about = "Hedges the option delta of one account with stock market orders", long_about = None)]
pub struct CliArgs {
    /// Account whose positions are hedged
    pub account: String,

    /// 1 to hedge continuously until the broker disconnects, 0 for one cycle
    #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
    pub continuous: u8,

    /// Absolute cap on the hedge stock position per symbol
    pub max_shares: u32,

    /// Smallest share change worth sending an order for
    pub min_share_change: u32,

    /// Settings file, extension optional
    #[arg(long, default_value = "Settings", env = "HEDGER_SETTINGS_FILE")]
    pub settings: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OrderConfig {
    pub exchange: String,
    pub currency: String,
    pub algo_strategy: String,
    pub algo_params: Vec<TagValue>,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            algo_strategy: "Adaptive".to_string(),
            algo_params: vec![TagValue {
                tag: "adaptivePriority".to_string(),
                value: "Urgent".to_string(),
            }],
        }
    }
}

impl OrderConfig {
    pub fn algo_hint(&self) -> AlgoHint {
        AlgoHint {
            strategy: self.algo_strategy.clone(),
            params: self.algo_params.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    /// 4001 = live, 4002 = paper gateway.
    pub port: u16,
    pub client_id: i32,
    pub connect_attempts: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4002,
            client_id: 100,
            connect_attempts: 100,
        }
    }
}

impl ConnectionConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A holding the paper broker reports. `delta` is the last-trade delta it
/// streams for option contracts.
#[derive(Debug, Deserialize, Clone)]
pub struct PaperPosition {
    pub account: String,
    pub contract: Contract,
    pub quantity: i64,
    #[serde(default)]
    pub delta: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PaperConfig {
    pub positions: Vec<PaperPosition>,
    pub next_order_id: i64,
    /// Fill market orders immediately and move the stock holding.
    pub fill_orders: bool,
    /// Stream bid/ask/model computations ahead of the last-trade one.
    pub noise_ticks: bool,
    /// Symbols the simulated venue rejects orders for.
    pub reject_symbols: Vec<String>,
    /// Refuse every cancel request synchronously.
    pub refuse_cancels: bool,
    /// Report disconnected once this many position requests were served.
    pub session_cycles: Option<u32>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            positions: Vec::new(),
            next_order_id: 1,
            fill_orders: true,
            noise_ticks: false,
            reject_symbols: Vec::new(),
            refuse_cancels: false,
            session_cycles: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub account: String,
    pub continuous: bool,
    pub max_shares: u32,
    pub min_share_change: u32,
    pub cooldown_secs: u64,
    /// Hedge symbols holding stock but no options down to zero shares.
    pub flatten_unhedged_stock: bool,
    /// Request-scoped notices that do not count as failures.
    pub benign_error_codes: Vec<i32>,
    pub log_dir: String,
    pub order: OrderConfig,
    pub connection: ConnectionConfig,
    pub paper: PaperConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            account: String::new(),
            continuous: false,
            max_shares: 0,
            min_share_change: 0,
            cooldown_secs: 30,
            flatten_unhedged_stock: false,
            // 202: order cancelled; 161/10147/10148: nothing left to cancel.
            benign_error_codes: vec![161, 202, 10147, 10148],
            log_dir: "logs".to_string(),
            order: OrderConfig::default(),
            connection: ConnectionConfig::default(),
            paper: PaperConfig::default(),
        }
    }
}

impl AppConfig {
    /// Settings file, then `HEDGER_*` environment, then the command line.
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name(&args.settings).required(false))
            .add_source(
                Environment::with_prefix("HEDGER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override("account", args.account.clone())?
            .set_override("continuous", args.continuous == 1)?
            .set_override("max_shares", i64::from(args.max_shares))?
            .set_override("min_share_change", i64::from(args.min_share_change))?;

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account.trim().is_empty() {
            return Err(ConfigError::Message("account must not be empty".into()));
        }
        if self.cooldown_secs == 0 {
            return Err(ConfigError::Message("cooldown_secs must be positive".into()));
        }
        if self.connection.connect_attempts == 0 {
            return Err(ConfigError::Message(
                "connection.connect_attempts must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}
