use anyhow::{bail, Context, Result};
use std::time::Duration;

use crate::chain::{BundlerConfig, FeeConfig};
use crate::engine::EngineConfig;
use crate::strategy::{ExitPlan, LadderStep, LifecycleConfig, ScoringConfig, Thresholds};

/// Main configuration struct containing all engine settings
#[derive(Debug, Clone)]
pub struct Config {
    pub rpc: RpcConfig,
    pub fees: FeeConfig,
    pub bundler: BundlerConfig,
    pub relay: RelayConfig,
    pub scoring: ScoringConfig,
    pub lifecycle: LifecycleConfig,
    pub engine: EngineConfig,
    pub wallet: WalletConfig,
    pub storage: StorageConfig,
    pub monitoring: MonitoringConfig,
}

/// One upstream node and its static selection weight
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEndpoint {
    pub url: String,
    pub weight: f64,
}

#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub providers: Vec<ProviderEndpoint>,
    pub retries: u32,
    pub base_delay_ms: u64,
    pub health_window: usize,
    pub commitment_level: String,
    pub timeout_seconds: u64,
}

/// Protected bundle relay
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub enabled: bool,
    pub url: String,
    /// Minimum tip paid to the relay's validators, in lamports; urgent fees raise it
    pub tip_lamports: u64,
}

#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub keypair_path: Option<String>,
    pub private_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub trade_history_path: String,
}

#[derive(Debug, Clone)]
pub struct MonitoringConfig {
    pub log_level: String,
    /// Directory for JSON log files; console only when unset
    pub log_dir: Option<String>,
    pub detector_poll_interval_ms: u64,
    pub market_timeout_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let providers = match std::env::var("RPC_URLS") {
            Ok(list) if !list.trim().is_empty() => parse_provider_list(&list)?,
            _ => vec![ProviderEndpoint {
                url: std::env::var("RPC_URL").context("RPC_URL or RPC_URLS not set")?,
                weight: 1.0,
            }],
        };

        let rpc = RpcConfig {
            providers,
            retries: get_u32_env("RPC_RETRIES", 3)?,
            base_delay_ms: get_u64_env("RPC_BASE_DELAY_MS", 100)?,
            health_window: get_u64_env("RPC_HEALTH_WINDOW", 100)? as usize,
            commitment_level: get_env_or_default("COMMITMENT_LEVEL", "confirmed"),
            timeout_seconds: get_u64_env("RPC_TIMEOUT_SECONDS", 30)?,
        };

        let fee_defaults = FeeConfig::default();
        let fees = FeeConfig {
            cache_ttl: Duration::from_millis(get_u64_env("FEE_CACHE_TTL_MS", 5_000)?),
            default_fee: get_u64_env("DEFAULT_PRIORITY_FEE", fee_defaults.default_fee)?,
            anti_mev_floor: get_u64_env("ANTI_MEV_FEE_FLOOR", fee_defaults.anti_mev_floor)?,
            max_fee: get_u64_env("MAX_PRIORITY_FEE", fee_defaults.max_fee)?,
        };

        let bundler = BundlerConfig {
            use_relay: get_bool_env("USE_BUNDLE_RELAY", true),
            parallel_enabled: get_bool_env("PARALLEL_SUBMISSION", true),
            send_retries: get_u32_env("SEND_RETRIES", 3)?,
            send_retry_delay: Duration::from_millis(get_u64_env("SEND_RETRY_DELAY_MS", 200)?),
            confirmation_timeout: Duration::from_millis(get_u64_env("CONFIRMATION_TIMEOUT_MS", 30_000)?),
            poll_interval: Duration::from_millis(get_u64_env("CONFIRMATION_POLL_MS", 400)?),
            bundle_timeout: Duration::from_millis(get_u64_env("BUNDLE_TIMEOUT_MS", 60_000)?),
            bundle_poll_interval: Duration::from_millis(get_u64_env("BUNDLE_POLL_MS", 1_000)?),
            entry_backup_fee_multiplier: get_optional_f64_env("ENTRY_BACKUP_FEE_MULTIPLIER")?,
        };

        let relay = RelayConfig {
            enabled: get_bool_env("JITO_ENABLED", false),
            url: get_env_or_default("JITO_URL", crate::chain::constants::JITO_BLOCK_ENGINE_URL),
            tip_lamports: get_u64_env("JITO_TIP_LAMPORTS", 100_000)?,
        };

        let score_defaults = ScoringConfig::default();
        let scoring = ScoringConfig {
            liquidity: Thresholds::new(
                get_f64_env("SCORE_LIQUIDITY_MIN", score_defaults.liquidity.minimum)?,
                get_f64_env("SCORE_LIQUIDITY_TARGET", score_defaults.liquidity.target)?,
                get_f64_env("SCORE_LIQUIDITY_EXCELLENT", score_defaults.liquidity.excellent)?,
            ),
            volume: Thresholds::new(
                get_f64_env("SCORE_VOLUME_MIN", score_defaults.volume.minimum)?,
                get_f64_env("SCORE_VOLUME_TARGET", score_defaults.volume.target)?,
                get_f64_env("SCORE_VOLUME_EXCELLENT", score_defaults.volume.excellent)?,
            ),
            buy_threshold: get_f64_env("BUY_THRESHOLD", score_defaults.buy_threshold)?,
            ..score_defaults
        };

        let lifecycle_defaults = LifecycleConfig::default();
        let ladder = match std::env::var("TAKE_PROFIT_LADDER") {
            Ok(rungs) if !rungs.trim().is_empty() => parse_ladder(&rungs)?,
            _ => lifecycle_defaults.exit_plan.ladder.clone(),
        };
        let lifecycle = LifecycleConfig {
            position_size_sol: get_f64_env("POSITION_SIZE_SOL", lifecycle_defaults.position_size_sol)?,
            slippage_bps: get_u64_env("MAX_SLIPPAGE_BPS", lifecycle_defaults.slippage_bps)?,
            emergency_slippage_bps: get_u64_env(
                "EMERGENCY_SLIPPAGE_BPS",
                lifecycle_defaults.emergency_slippage_bps,
            )?,
            min_liquidity_usd: get_f64_env("MIN_LIQUIDITY_USD", lifecycle_defaults.min_liquidity_usd)?,
            max_entry_deviation_bps: get_u64_env(
                "MAX_ENTRY_DEVIATION_BPS",
                lifecycle_defaults.max_entry_deviation_bps,
            )?,
            exit_plan: ExitPlan {
                ladder,
                stop_loss_ratio: get_f64_env("STOP_LOSS_RATIO", 0.7)?,
                max_holding: Duration::from_secs(get_u64_env("MAX_HOLDING_SECONDS", 4 * 60 * 60)?),
            },
            tick_interval: Duration::from_millis(get_u64_env("MONITOR_TICK_MS", 2_000)?),
            max_exit_failures: get_u32_env("MAX_EXIT_FAILURES", 5)?,
            unresolved_exit_expiry: Duration::from_millis(get_u64_env("UNRESOLVED_EXIT_EXPIRY_MS", 90_000)?),
        };

        let engine = EngineConfig {
            shutdown_grace: Duration::from_millis(get_u64_env("SHUTDOWN_GRACE_MS", 60_000)?),
            ..EngineConfig::default()
        };

        let wallet = WalletConfig {
            keypair_path: std::env::var("WALLET_KEYPAIR_PATH").ok(),
            private_key: std::env::var("WALLET_PRIVATE_KEY").ok(),
        };

        let storage = StorageConfig {
            trade_history_path: get_env_or_default("TRADE_HISTORY_PATH", "data/trade_history.jsonl"),
        };

        let monitoring = MonitoringConfig {
            log_level: get_env_or_default("LOG_LEVEL", "info"),
            log_dir: std::env::var("LOG_DIR").ok().filter(|d| !d.trim().is_empty()),
            detector_poll_interval_ms: get_u64_env("DETECTOR_POLL_MS", 5_000)?,
            market_timeout_ms: get_u64_env("MARKET_TIMEOUT_MS", 2_000)?,
        };

        let config = Config {
            rpc,
            fees,
            bundler,
            relay,
            scoring,
            lifecycle,
            engine,
            wallet,
            storage,
            monitoring,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rpc.providers.is_empty() {
            bail!("at least one RPC provider is required");
        }
        for provider in &self.rpc.providers {
            if !(provider.weight >= 0.0 && provider.weight.is_finite()) {
                bail!("provider {} has invalid weight {}", provider.url, provider.weight);
            }
        }
        if self.lifecycle.position_size_sol <= 0.0 {
            bail!("POSITION_SIZE_SOL must be positive");
        }
        if let Some(multiplier) = self.bundler.entry_backup_fee_multiplier {
            if multiplier <= 1.0 {
                bail!("ENTRY_BACKUP_FEE_MULTIPLIER must be above 1.0, got {}", multiplier);
            }
        }
        self.lifecycle
            .exit_plan
            .validate()
            .map_err(|e| anyhow::anyhow!(e))
            .context("invalid exit plan")?;
        Ok(())
    }
}

// ============================================================================
// Helper Functions for Environment Variable Parsing
// ============================================================================

/// Get environment variable or return default value
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get boolean environment variable with default
fn get_bool_env(key: &str, default: bool) -> bool {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .unwrap_or(default)
}

/// Get u32 environment variable with default
fn get_u32_env(key: &str, default: u32) -> Result<u32> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .context(format!("Failed to parse {} as u32", key))
}

/// Get u64 environment variable with default
fn get_u64_env(key: &str, default: u64) -> Result<u64> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .context(format!("Failed to parse {} as u64", key))
}

/// Get f64 environment variable with default
fn get_f64_env(key: &str, default: f64) -> Result<f64> {
    std::env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .context(format!("Failed to parse {} as f64", key))
}

fn get_optional_f64_env(key: &str) -> Result<Option<f64>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(Some(
            value
                .trim()
                .parse()
                .context(format!("Failed to parse {} as f64", key))?,
        )),
        _ => Ok(None),
    }
}

/// Parse `url|weight` entries separated by commas; weight defaults to 1
fn parse_provider_list(input: &str) -> Result<Vec<ProviderEndpoint>> {
    input
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|entry| match entry.rsplit_once('|') {
            Some((url, weight)) => Ok(ProviderEndpoint {
                url: url.trim().to_string(),
                weight: weight
                    .trim()
                    .parse()
                    .context(format!("Failed to parse weight in '{}'", entry))?,
            }),
            None => Ok(ProviderEndpoint {
                url: entry.to_string(),
                weight: 1.0,
            }),
        })
        .collect()
}

/// Parse `multiple:percent` rungs separated by commas, e.g. `2:25,5:50,10:100`
fn parse_ladder(input: &str) -> Result<Vec<LadderStep>> {
    input
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|rung| {
            let (multiple, percentage) = rung
                .split_once(':')
                .context(format!("Take-profit rung '{}' is not multiple:percent", rung))?;
            Ok(LadderStep {
                multiple: multiple
                    .trim()
                    .parse()
                    .context(format!("Failed to parse multiple in '{}'", rung))?,
                percentage: percentage
                    .trim()
                    .parse()
                    .context(format!("Failed to parse percent in '{}'", rung))?,
            })
        })
        .collect()
}
