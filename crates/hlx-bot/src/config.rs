//! Application configuration.

use crate::error::{AppError, AppResult};
use hlx_core::IntentLimits;
use hlx_executor::{KeySource, MarginConfig, NormalizerConfig, PipelineConfig, RetryPolicy};
use hlx_registry::{RegistryConfig, StaticAssetConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Orders are signed and logged, never transmitted.
    #[default]
    Observation,
    /// Orders are posted to the exchange.
    Trading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    #[default]
    Cross,
    Isolated,
}

/// Exchange endpoints and account identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_info_url")]
    pub info_url: String,
    #[serde(default = "default_exchange_url")]
    pub exchange_url: String,
    /// Default: false (testnet).
    #[serde(default)]
    pub is_mainnet: bool,
    /// Trade on behalf of this vault. Changes the signed action hash.
    #[serde(default)]
    pub vault_address: Option<String>,
    /// If set, the loaded key must derive this address.
    #[serde(default)]
    pub signer_address: Option<String>,
    /// Account whose margin and positions are read. Defaults to the vault,
    /// then to the signer.
    #[serde(default)]
    pub account_address: Option<String>,
    #[serde(default)]
    pub margin_mode: MarginMode,
    /// Optional `expiresAfter` window added to every action (ms from signing).
    #[serde(default)]
    pub expires_after_ms: Option<u64>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_info_url() -> String {
    "https://api.hyperliquid-testnet.xyz/info".to_string()
}

fn default_exchange_url() -> String {
    "https://api.hyperliquid-testnet.xyz/exchange".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            info_url: default_info_url(),
            exchange_url: default_exchange_url(),
            is_mainnet: false,
            vault_address: None,
            signer_address: None,
            account_address: None,
            margin_mode: MarginMode::default(),
            expires_after_ms: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ExchangeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Where the signing key comes from. `file` wins over `env_var`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyConfig {
    #[serde(default = "default_key_env_var")]
    pub env_var: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_key_env_var() -> String {
    "HLX_PRIVATE_KEY".to_string()
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            env_var: default_key_env_var(),
            file: None,
        }
    }
}

impl KeyConfig {
    pub fn source(&self) -> KeySource {
        match &self.file {
            Some(path) => KeySource::File { path: path.clone() },
            None => KeySource::EnvVar {
                var_name: self.env_var.clone(),
            },
        }
    }
}

/// Price/size rules plus the registry settings that feed them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizerSection {
    #[serde(flatten)]
    pub pricing: NormalizerConfig,
    #[serde(flatten)]
    pub registry: RegistryConfig,
}

/// Intent acceptance bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentsConfig {
    #[serde(flatten)]
    pub limits: IntentLimits,
    #[serde(default = "default_max_reference_age_ms")]
    pub max_reference_age_ms: i64,
}

fn default_max_reference_age_ms() -> i64 {
    10_000
}

impl Default for IntentsConfig {
    fn default() -> Self {
        Self {
            limits: IntentLimits::default(),
            max_reference_age_ms: default_max_reference_age_ms(),
        }
    }
}

impl IntentsConfig {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_reference_age_ms: self.max_reference_age_ms,
            intent_limits: self.limits.clone(),
        }
    }
}

/// Decision cycle driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Default: 300 (5 minutes).
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub single_cycle: bool,
    /// JSON intents, re-read at the start of every cycle. Unchanged contents
    /// are skipped.
    #[serde(default = "default_intents_file")]
    pub intents_file: PathBuf,
}

fn default_interval_secs() -> u64 {
    300
}

fn default_intents_file() -> PathBuf {
    PathBuf::from("intents.json")
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            single_cycle: false,
            intents_file: default_intents_file(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: OperatingMode,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub key: KeyConfig,
    /// Static per-asset metadata. When non-empty, only these coins trade.
    #[serde(default)]
    pub assets: Vec<StaticAssetConfig>,
    #[serde(default)]
    pub normalizer: NormalizerSection,
    #[serde(default)]
    pub margin: MarginConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub intents: IntentsConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> AppResult<()> {
        self.margin.validate().map_err(AppError::Config)?;
        if self.retry.max_attempts == 0 {
            return Err(AppError::Config("retry.max_attempts must be >= 1".to_string()));
        }
        if self.normalizer.pricing.max_deviation_pct <= rust_decimal::Decimal::ZERO {
            return Err(AppError::Config(
                "normalizer.max_deviation_pct must be > 0".to_string(),
            ));
        }
        let limits = &self.intents.limits;
        if limits.min_leverage == 0 || limits.min_leverage > limits.max_leverage {
            return Err(AppError::Config(format!(
                "intents leverage bounds invalid: [{}, {}]",
                limits.min_leverage, limits.max_leverage
            )));
        }
        if self.cycle.interval_secs == 0 && !self.cycle.single_cycle {
            return Err(AppError::Config("cycle.interval_secs must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn is_observation_mode(&self) -> bool {
        self.mode == OperatingMode::Observation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlx_executor::AccountUnavailablePolicy;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.is_observation_mode());
        assert!(config.validate().is_ok());
        assert_eq!(config.cycle.interval_secs, 300);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.normalizer.registry.min_notional, dec!(10));
    }

    #[test]
    fn test_parse_full_file() {
        let config = AppConfig::from_toml(
            r#"
            mode = "trading"

            [exchange]
            is_mainnet = true
            vault_address = "0x1719884eb866cb12b2287399b15f7db5e7d775ea"
            margin_mode = "isolated"

            [key]
            file = "/run/secrets/hlx_key"

            [[assets]]
            coin = "ADA"
            tick_size = "0.0001"

            [normalizer]
            max_deviation_pct = "80"
            slippage_bps = "25"
            tif = "Ioc"
            min_notional = "12"

            [margin]
            safety_buffer_pct = "10"
            on_account_unavailable = "retry"

            [retry]
            max_attempts = 3

            [intents]
            max_leverage = 10
            max_reference_age_ms = 5000

            [cycle]
            single_cycle = true
            "#,
        )
        .unwrap();

        assert_eq!(config.mode, OperatingMode::Trading);
        assert!(config.exchange.is_mainnet);
        assert_eq!(config.exchange.margin_mode, MarginMode::Isolated);
        assert_eq!(
            config.key.source(),
            KeySource::File {
                path: PathBuf::from("/run/secrets/hlx_key")
            }
        );
        assert_eq!(config.assets[0].tick_size, Some(dec!(0.0001)));
        assert_eq!(config.normalizer.pricing.max_deviation_pct, dec!(80));
        assert_eq!(config.normalizer.registry.min_notional, dec!(12));
        assert_eq!(config.normalizer.registry.drift_threshold_pct, dec!(1));
        assert_eq!(config.margin.on_account_unavailable, AccountUnavailablePolicy::Retry);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 250);
        assert_eq!(config.intents.limits.max_leverage, 10);
        assert_eq!(config.intents.limits.min_leverage, 1);
        assert_eq!(config.intents.pipeline_config().max_reference_age_ms, 5000);
        assert!(config.cycle.single_cycle);
    }

    #[test]
    fn test_rejects_zero_buffer() {
        let err = AppConfig::from_toml("[margin]\nsafety_buffer_pct = \"0\"\n").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_rejects_inverted_leverage_bounds() {
        let err = AppConfig::from_toml("[intents]\nmin_leverage = 10\nmax_leverage = 5\n").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_shipped_default_file_parses() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/default.toml");
        let config = AppConfig::from_file(path).unwrap();
        assert!(config.is_observation_mode());
        assert_eq!(config.assets.len(), 3);
        assert_eq!(config.assets[2].tick_size, Some(dec!(0.00001)));
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.cycle, CycleConfig::default());
    }

    #[test]
    fn test_key_defaults_to_env() {
        assert_eq!(
            KeyConfig::default().source(),
            KeySource::EnvVar {
                var_name: "HLX_PRIVATE_KEY".to_string()
            }
        );
    }
}
