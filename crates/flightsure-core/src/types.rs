//! Core type definitions for FlightSure
//!
//! Identities, flight references, oracle status codes and the composite
//! request key that ties a status request to the oracle submissions
//! answering it.

use crate::error::{FlightSureError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Amount in the smallest ledger unit (wei-like).
pub type Amount = u128;

/// Unix timestamp (seconds).
pub type Timestamp = i64;

/// Responsibility slot held by an oracle.
pub type OracleIndex = u8;

/// Identity - Opaque 32-byte agent identifier (airline, oracle, passenger)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Identity {
    id: [u8; 32],
}

impl Identity {
    pub fn new(id: [u8; 32]) -> Self {
        Self { id }
    }

    /// Derive an identity from a human-readable label using BLAKE3
    pub fn from_label(label: &str) -> Self {
        Self {
            id: *blake3::hash(label.as_bytes()).as_bytes(),
        }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.id
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.id)
    }

    /// Parse from a 64-character hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| FlightSureError::InvalidInput(e.to_string()))?;
        let id: [u8; 32] = bytes
            .try_into()
            .map_err(|_| FlightSureError::InvalidInput("identity must be 32 bytes".to_string()))?;
        Ok(Self { id })
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", &self.to_hex()[..12])
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..12])
    }
}

/// FlightRef - The subject of a status request: an airline's flight code
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlightRef {
    /// Operating airline
    pub airline: Identity,

    /// Flight code, e.g. "ND1309"
    pub code: String,
}

impl FlightRef {
    pub fn new(airline: Identity, code: impl Into<String>) -> Self {
        Self {
            airline,
            code: code.into(),
        }
    }
}

impl fmt::Display for FlightRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.code, self.airline)
    }
}

/// Status codes reported by oracles
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatusCode {
    Unknown,
    OnTime,
    LateAirline,
    LateWeather,
    LateTechnical,
    LateOther,
}

impl StatusCode {
    /// Every valid status, in wire-code order
    pub const ALL: [StatusCode; 6] = [
        StatusCode::Unknown,
        StatusCode::OnTime,
        StatusCode::LateAirline,
        StatusCode::LateWeather,
        StatusCode::LateTechnical,
        StatusCode::LateOther,
    ];

    /// Wire code
    pub fn as_u8(&self) -> u8 {
        match self {
            StatusCode::Unknown => 0,
            StatusCode::OnTime => 10,
            StatusCode::LateAirline => 20,
            StatusCode::LateWeather => 30,
            StatusCode::LateTechnical => 40,
            StatusCode::LateOther => 50,
        }
    }

    /// Create from wire code
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(StatusCode::Unknown),
            10 => Some(StatusCode::OnTime),
            20 => Some(StatusCode::LateAirline),
            30 => Some(StatusCode::LateWeather),
            40 => Some(StatusCode::LateTechnical),
            50 => Some(StatusCode::LateOther),
            _ => None,
        }
    }

    /// Only delays attributable to the airline are compensated
    pub fn is_compensable(&self) -> bool {
        matches!(self, StatusCode::LateAirline)
    }
}

impl TryFrom<u8> for StatusCode {
    type Error = FlightSureError;

    fn try_from(value: u8) -> Result<Self> {
        StatusCode::from_u8(value).ok_or(FlightSureError::OutOfRange {
            what: "status code",
            value: value as u64,
        })
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Unknown => "unknown",
            StatusCode::OnTime => "on_time",
            StatusCode::LateAirline => "late_airline",
            StatusCode::LateWeather => "late_weather",
            StatusCode::LateTechnical => "late_technical",
            StatusCode::LateOther => "late_other",
        };
        write!(f, "{} ({})", name, self.as_u8())
    }
}

/// RequestKey - Identifies one consensus round
///
/// RequestKey = BLAKE3(index || airline || code || timestamp)
///
/// Deterministic so requester and oracles agree on it without coordination.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    hash: [u8; 32],
}

impl RequestKey {
    pub fn derive(index: OracleIndex, flight: &FlightRef, timestamp: Timestamp) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[index]);
        hasher.update(flight.airline.as_bytes());
        hasher.update(&(flight.code.len() as u32).to_le_bytes());
        hasher.update(flight.code.as_bytes());
        hasher.update(&timestamp.to_le_bytes());
        Self {
            hash: *hasher.finalize().as_bytes(),
        }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.hash
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.hash)
    }
}

impl fmt::Debug for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestKey({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Unit constants
pub mod constants {
    use super::Amount;

    /// One whole ledger unit (10^18 of the smallest unit)
    pub const ONE_ETHER: Amount = 1_000_000_000_000_000_000;

    /// Indexes assigned to each oracle
    pub const INDEXES_PER_ORACLE: usize = 3;
}
