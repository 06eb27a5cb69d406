//! Node configuration types

use anyhow::Context;
use flightsure_consensus::config::{AdmissionConfig, OracleConfig, WEI_PER_GWEI};
use flightsure_core::constants::ONE_ETHER;
use flightsure_core::error::{FlightSureError, Result};
use flightsure_core::types::{Amount, Identity};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete node configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FlightSureConfig {
    /// Node operation settings
    #[serde(default)]
    pub node: NodeSettings,

    /// Oracle network parameters
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Airline admission parameters
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Insurance ledger limits
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl FlightSureConfig {
    /// Load from a TOML file; missing sections take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.oracle.validate()?;
        self.ledger.validate()?;
        if self.admission.min_consensus_airlines == 0 {
            return Err(FlightSureError::InvalidInput(
                "admission.min_consensus_airlines must be at least 1".to_string(),
            ));
        }
        if self.node.event_capacity == 0 {
            return Err(FlightSureError::InvalidInput(
                "node.event_capacity must be at least 1".to_string(),
            ));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(FlightSureError::InvalidInput(format!(
                "logging.format must be \"text\" or \"json\", got {:?}",
                self.logging.format
            )));
        }
        Ok(())
    }
}

/// Basic node settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Label of the operator allowed to pause the service
    #[serde(default = "default_owner")]
    pub owner: String,

    /// Label of the airline registered at startup
    #[serde(default = "default_genesis_airline")]
    pub genesis_airline: String,

    /// Fixed entropy seed for reproducible runs (OS entropy if unset)
    #[serde(default)]
    pub entropy_seed: Option<u64>,

    /// Event bus buffer per subscriber
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_owner() -> String {
    "owner".to_string()
}

fn default_genesis_airline() -> String {
    "airline-0".to_string()
}

fn default_event_capacity() -> usize {
    1024
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            owner: default_owner(),
            genesis_airline: default_genesis_airline(),
            entropy_seed: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl NodeSettings {
    pub fn owner_identity(&self) -> Identity {
        Identity::from_label(&self.owner)
    }

    pub fn genesis_identity(&self) -> Identity {
        Identity::from_label(&self.genesis_airline)
    }
}

/// Insurance ledger limits, amounts in gwei
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Minimum deposit before an airline may act
    #[serde(default = "default_airline_funding_gwei")]
    pub airline_funding_gwei: u64,

    /// Largest premium per policy
    #[serde(default = "default_max_insurance_gwei")]
    pub max_insurance_gwei: u64,

    #[serde(default = "default_payout_numerator")]
    pub payout_numerator: u64,

    #[serde(default = "default_payout_denominator")]
    pub payout_denominator: u64,
}

fn default_airline_funding_gwei() -> u64 {
    (10 * ONE_ETHER / WEI_PER_GWEI) as u64
}

fn default_max_insurance_gwei() -> u64 {
    (ONE_ETHER / WEI_PER_GWEI) as u64
}

fn default_payout_numerator() -> u64 {
    3
}

fn default_payout_denominator() -> u64 {
    2
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            airline_funding_gwei: default_airline_funding_gwei(),
            max_insurance_gwei: default_max_insurance_gwei(),
            payout_numerator: default_payout_numerator(),
            payout_denominator: default_payout_denominator(),
        }
    }
}

impl LedgerConfig {
    pub fn airline_funding(&self) -> Amount {
        Amount::from(self.airline_funding_gwei) * WEI_PER_GWEI
    }

    pub fn max_insurance(&self) -> Amount {
        Amount::from(self.max_insurance_gwei) * WEI_PER_GWEI
    }

    /// Credit owed on a delayed flight for the given premium, saturating at `Amount::MAX`
    pub fn payout_for(&self, premium: Amount) -> Amount {
        let numerator = Amount::from(self.payout_numerator);
        let denominator = Amount::from(self.payout_denominator).max(1);
        match premium.checked_mul(numerator) {
            Some(scaled) => scaled / denominator,
            // Split so the remainder term stays below 2^128.
            None => (premium / denominator)
                .saturating_mul(numerator)
                .saturating_add(premium % denominator * numerator / denominator),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.payout_denominator == 0 {
            return Err(FlightSureError::InvalidInput(
                "ledger.payout_denominator must be non-zero".to_string(),
            ));
        }
        if self.max_insurance_gwei == 0 {
            return Err(FlightSureError::InvalidInput(
                "ledger.max_insurance_gwei must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `text` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Metrics configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Collect counters
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metric name prefix
    #[serde(default = "default_metrics_namespace")]
    pub namespace: String,
}

fn default_true() -> bool {
    true
}

fn default_metrics_namespace() -> String {
    "flightsure".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: default_metrics_namespace(),
        }
    }
}
