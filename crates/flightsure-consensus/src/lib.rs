//! # Oracle Consensus
//!
//! Threshold agreement among mutually distrusting flight-status oracles,
//! and the voting protocol that admits new airlines.
//!
//! ## Oracle Round
//!
//! 1. Registration - each oracle pays a fee and receives three indexes
//! 2. Request - a status request draws one index and opens a window keyed
//!    by `(index, flight, timestamp)`
//! 3. Reporting - oracles holding that index submit a status
//! 4. Finalization - the first status reported by `min_responses` distinct
//!    oracles closes the window and is published exactly once
//!
//! ## Airline Admission
//!
//! Single-party admission while the airline set is small, then quorum
//! voting among registered airlines.

pub mod admission;
pub mod aggregator;
pub mod config;
pub mod entropy;
pub mod events;
pub mod indexes;
pub mod registry;
pub mod requests;

// Re-exports
pub use admission::{AdmissionOutcome, AdmissionState, AdmissionVoting};
pub use aggregator::{ResponseAggregator, SubmissionOutcome};
pub use config::{AdmissionConfig, OracleConfig, QuorumRule};
pub use entropy::{EntropySource, OsEntropy, SeededEntropy};
pub use events::{CloseReason, EventBus, OracleEvent};
pub use indexes::{derive_index, IndexDraw, IndexGenerator};
pub use registry::{OracleRecord, OracleRegistry};
pub use requests::{OpenedRequest, RequestSnapshot, RequestTracker, StatusRequest, TrackerStats};
