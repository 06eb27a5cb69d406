//! Consensus parameters
//!
//! Embedded verbatim in the node's TOML configuration, so every field has a
//! serde default.

use flightsure_core::constants::ONE_ETHER;
use flightsure_core::error::{FlightSureError, Result};
use flightsure_core::types::Amount;
use serde::{Deserialize, Serialize};

/// Smallest ledger units per gwei. Config amounts are written in gwei so they
/// fit TOML's 64-bit integers.
pub const WEI_PER_GWEI: Amount = 1_000_000_000;

/// Oracle network parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Indexes are drawn from `[0, index_bound)`
    #[serde(default = "default_index_bound")]
    pub index_bound: u16,

    /// Draw counter wraps to zero when it reaches this value
    #[serde(default = "default_nonce_ceiling")]
    pub nonce_ceiling: u32,

    /// Distinct agreeing oracles required to finalize a status
    #[serde(default = "default_min_responses")]
    pub min_responses: usize,

    /// Registration fee in gwei
    #[serde(default = "default_registration_fee_gwei")]
    pub registration_fee_gwei: u64,

    /// Open requests close unanswered after this many seconds (never if unset)
    #[serde(default)]
    pub request_ttl_secs: Option<u64>,
}

fn default_index_bound() -> u16 {
    10
}

fn default_nonce_ceiling() -> u32 {
    256
}

fn default_min_responses() -> usize {
    3
}

fn default_registration_fee_gwei() -> u64 {
    (ONE_ETHER / WEI_PER_GWEI) as u64
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            index_bound: default_index_bound(),
            nonce_ceiling: default_nonce_ceiling(),
            min_responses: default_min_responses(),
            registration_fee_gwei: default_registration_fee_gwei(),
            request_ttl_secs: None,
        }
    }
}

impl OracleConfig {
    pub fn registration_fee(&self) -> Amount {
        self.registration_fee_gwei as Amount * WEI_PER_GWEI
    }

    pub fn validate(&self) -> Result<()> {
        if !(3..=256).contains(&self.index_bound) {
            return Err(FlightSureError::OutOfRange {
                what: "index bound",
                value: self.index_bound as u64,
            });
        }
        if self.nonce_ceiling == 0 {
            return Err(FlightSureError::OutOfRange {
                what: "nonce ceiling",
                value: 0,
            });
        }
        if self.min_responses == 0 {
            return Err(FlightSureError::OutOfRange {
                what: "min responses",
                value: 0,
            });
        }
        Ok(())
    }
}

/// How many votes admit a candidate once the electorate is large enough
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumRule {
    /// `N / 2` (integer division): exactly half suffices when N is even
    #[default]
    FloorHalf,

    /// `N / 2 + 1`
    StrictMajority,
}

impl QuorumRule {
    /// Votes required with `airlines` registered airlines
    pub fn required(&self, airlines: usize) -> usize {
        match self {
            QuorumRule::FloorHalf => airlines / 2,
            QuorumRule::StrictMajority => airlines / 2 + 1,
        }
    }
}

/// Airline admission parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Below this many registered airlines any funded airline admits alone
    #[serde(default = "default_min_consensus_airlines")]
    pub min_consensus_airlines: usize,

    #[serde(default)]
    pub quorum_rule: QuorumRule,

    /// Pending vote records reset after this many seconds (never if unset)
    #[serde(default)]
    pub vote_ttl_secs: Option<u64>,
}

fn default_min_consensus_airlines() -> usize {
    4
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            min_consensus_airlines: default_min_consensus_airlines(),
            quorum_rule: QuorumRule::default(),
            vote_ttl_secs: None,
        }
    }
}
