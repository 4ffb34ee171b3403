//! Configuration management module

pub mod settings;

pub use settings::*;

use crate::{ArbitrageError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Main configuration structure for the arbitrage system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageConfig {
    /// Strategy configuration
    pub strategy: StrategyConfig,
    /// XBridge daemon configuration
    pub xbridge: XBridgeConfig,
    /// Thorchain configuration
    pub thorchain: ThorchainConfig,
    /// Price/balance aggregator configuration
    pub pricing: PricingConfig,
    /// Retry and backoff configuration
    pub retry: RetryConfig,
    /// Trade state persistence configuration
    pub persistence: PersistenceConfig,
    /// Per-token wallet daemon RPC endpoints, used for the swap send leg
    #[serde(default)]
    pub wallets: HashMap<String, WalletRpcConfig>,
}

/// RPC endpoint of one coin's wallet daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRpcConfig {
    /// RPC host
    pub rpc_host: String,
    /// RPC port
    pub rpc_port: u16,
    /// RPC username; supports ${VAR} expansion
    pub rpc_user: String,
    /// RPC password; supports ${VAR} expansion
    pub rpc_password: String,
}

/// Strategy-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Tokens traded pairwise against each other
    pub trading_tokens: Vec<String>,
    /// Token used to pay the dex taker fee
    pub fee_token: String,
    /// Taker fee charged per dex trade, in fee-token units
    pub taker_fee: f64,
    /// Minimum net profit ratio for an opportunity to be actionable
    pub min_profit_margin: f64,
    /// Seconds between opportunity evaluation ticks
    pub evaluation_interval_secs: u64,
    /// Evaluate and log opportunities without submitting orders
    pub dry_mode: bool,
}

/// Per-venue monitoring settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds before an unfinished leg is marked expired
    pub timeout_secs: u64,
    /// Seconds between status polls
    pub poll_interval_secs: u64,
}

/// Per-token dex fee parameters, mirroring the daemon's coin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenFeeConfig {
    /// Fee per transaction byte, in base units (satoshis)
    pub fee_per_byte: u64,
    /// Minimum transaction fee, in base units
    pub min_tx_fee: u64,
    /// Base units per coin (typically 100_000_000)
    pub coin_units: u64,
}

/// XBridge daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XBridgeConfig {
    /// RPC host of the local daemon
    pub rpc_host: String,
    /// RPC port of the local daemon
    pub rpc_port: u16,
    /// RPC username; supports ${VAR} expansion
    pub rpc_user: String,
    /// RPC password; supports ${VAR} expansion
    pub rpc_password: String,
    /// RPC request timeout in seconds
    pub rpc_timeout_secs: u64,
    /// Maximum simultaneous in-flight daemon calls
    pub concurrency_limit: usize,
    /// Seconds a cached UTXO set stays fresh
    pub utxo_cache_ttl_secs: u64,
    /// Order monitoring settings
    pub monitoring: MonitorConfig,
    /// Fee parameters per token symbol
    pub fees: HashMap<String, TokenFeeConfig>,
    /// Receiving address per token, used for order funding and swap payout
    #[serde(default)]
    pub addresses: HashMap<String, String>,
}

/// Thorchain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThorchainConfig {
    /// THORNode base URL
    pub node_url: String,
    /// Swap monitoring settings
    pub monitoring: MonitorConfig,
}

/// Price/balance aggregator proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Base URL of the aggregator proxy
    pub proxy_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

/// Retry and backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Fixed backoff tiers in seconds; the last tier repeats
    pub backoff_secs: Vec<u64>,
    /// Total attempts per operation before escalation
    pub max_attempts: u32,
}

/// Trade state persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory holding per-trade state files
    pub state_dir: String,
}

impl ArbitrageConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| ArbitrageError::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: ArbitrageConfig = toml::from_str(&content)
            .map_err(|e| ArbitrageError::Config(format!("Failed to parse config: {}", e)))?;

        config.expand_env_vars()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.strategy.trading_tokens.len() < 2 {
            return Err(ArbitrageError::Config(
                "At least two trading tokens required for arbitrage".to_string(),
            )
            .into());
        }

        for token in &self.strategy.trading_tokens {
            ConfigValidator::validate_symbol(token)?;
        }

        ConfigValidator::validate_percentage(
            self.strategy.min_profit_margin,
            "min_profit_margin",
        )?;

        if self.strategy.evaluation_interval_secs == 0 {
            return Err(ArbitrageError::Config(
                "Evaluation interval must be greater than 0".to_string(),
            )
            .into());
        }

        if self.xbridge.concurrency_limit == 0 {
            return Err(ArbitrageError::Config(
                "Concurrency limit must be greater than 0".to_string(),
            )
            .into());
        }

        if self.retry.max_attempts == 0 {
            return Err(
                ArbitrageError::Config("Max attempts must be greater than 0".to_string()).into(),
            );
        }

        if self.retry.backoff_secs.is_empty() {
            return Err(ArbitrageError::Config(
                "At least one backoff tier required".to_string(),
            )
            .into());
        }

        ConfigValidator::validate_url(&self.thorchain.node_url, "thorchain.node_url")?;
        ConfigValidator::validate_url(&self.pricing.proxy_url, "pricing.proxy_url")?;

        if self.persistence.state_dir.is_empty() {
            return Err(
                ArbitrageError::Config("State directory cannot be empty".to_string()).into(),
            );
        }

        Ok(())
    }

    /// Expand ${VAR} references in credential fields
    fn expand_env_vars(&mut self) -> Result<()> {
        self.xbridge.rpc_user = EnvExpander::expand_with_default(&self.xbridge.rpc_user)?;
        self.xbridge.rpc_password = EnvExpander::expand_with_default(&self.xbridge.rpc_password)?;
        for wallet in self.wallets.values_mut() {
            wallet.rpc_user = EnvExpander::expand_with_default(&wallet.rpc_user)?;
            wallet.rpc_password = EnvExpander::expand_with_default(&wallet.rpc_password)?;
        }
        Ok(())
    }
}

impl Default for ArbitrageConfig {
    fn default() -> Self {
        let mut fees = HashMap::new();
        fees.insert(
            "LTC".to_string(),
            TokenFeeConfig {
                fee_per_byte: 20,
                min_tx_fee: 10_000,
                coin_units: 100_000_000,
            },
        );
        fees.insert(
            "BTC".to_string(),
            TokenFeeConfig {
                fee_per_byte: 120,
                min_tx_fee: 20_000,
                coin_units: 100_000_000,
            },
        );

        Self {
            strategy: StrategyConfig {
                trading_tokens: vec!["LTC".to_string(), "BTC".to_string()],
                fee_token: "BLOCK".to_string(),
                taker_fee: 0.015,
                min_profit_margin: 0.02,
                evaluation_interval_secs: 60,
                dry_mode: true,
            },
            xbridge: XBridgeConfig {
                rpc_host: "127.0.0.1".to_string(),
                rpc_port: 41414,
                rpc_user: "${BLOCKNET_RPC_USER}".to_string(),
                rpc_password: "${BLOCKNET_RPC_PASSWORD}".to_string(),
                rpc_timeout_secs: 120,
                concurrency_limit: 4,
                utxo_cache_ttl_secs: 3,
                monitoring: MonitorConfig {
                    timeout_secs: 300,
                    poll_interval_secs: 15,
                },
                fees,
                addresses: HashMap::new(),
            },
            thorchain: ThorchainConfig {
                node_url: "https://thornode.ninerealms.com".to_string(),
                monitoring: MonitorConfig {
                    timeout_secs: 600,
                    poll_interval_secs: 30,
                },
            },
            pricing: PricingConfig {
                proxy_url: "http://127.0.0.1:2233".to_string(),
                timeout_secs: 30,
            },
            retry: RetryConfig {
                backoff_secs: vec![1, 3, 5],
                max_attempts: 3,
            },
            persistence: PersistenceConfig {
                state_dir: "data/arbitrage_states".to_string(),
            },
            wallets: HashMap::new(),
        }
    }
}
