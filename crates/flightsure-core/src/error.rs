//! Error types for FlightSure operations

use crate::types::{Identity, OracleIndex, RequestKey};
use thiserror::Error;

/// Result type alias for FlightSure operations
pub type Result<T> = std::result::Result<T, FlightSureError>;

/// Errors returned synchronously to the caller of any FlightSure operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlightSureError {
    // === Access ===
    /// Caller lacks the privilege for this operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Contract is paused
    #[error("Service is not operational")]
    NotOperational,

    // === Registry state ===
    /// Entity has no record
    #[error("Not registered: {0}")]
    NotRegistered(String),

    /// Entity already has a record
    #[error("Already registered: {0}")]
    AlreadyRegistered(String),

    // === Oracle consensus ===
    /// Oracle claimed an index it does not hold
    #[error("Oracle {oracle} does not hold index {index}")]
    IndexMismatch { oracle: Identity, index: OracleIndex },

    /// No open request under this key
    #[error("Request {0} is closed or unknown")]
    RequestClosedOrUnknown(RequestKey),

    /// Oracle already reported for this request
    #[error("Oracle {oracle} already submitted for request {key}")]
    DuplicateSubmission { oracle: Identity, key: RequestKey },

    /// Airline already voted for this candidate
    #[error("Airline {voter} already voted for {candidate}")]
    DuplicateVote { voter: Identity, candidate: Identity },

    // === Payments and bounds ===
    /// Payment below the required minimum
    #[error("Insufficient fee: required {required}, paid {paid}")]
    InsufficientFee { required: u128, paid: u128 },

    /// Value outside its declared bounds
    #[error("{what} out of range: {value}")]
    OutOfRange { what: &'static str, value: u64 },

    // === General ===
    /// Malformed input (hex, config)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl FlightSureError {
    /// Stable numeric code for API responses
    pub fn code(&self) -> u32 {
        match self {
            Self::Unauthorized(_) => 1001,
            Self::NotOperational => 1002,
            Self::NotRegistered(_) => 1003,
            Self::AlreadyRegistered(_) => 1004,
            Self::IndexMismatch { .. } => 1005,
            Self::RequestClosedOrUnknown(_) => 1006,
            Self::DuplicateSubmission { .. } => 1007,
            Self::DuplicateVote { .. } => 1008,
            Self::InsufficientFee { .. } => 1009,
            Self::OutOfRange { .. } => 1010,
            Self::InvalidInput(_) => 9999,
        }
    }

    /// A caller may retry later and succeed without changing its input
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::NotOperational)
    }
}
