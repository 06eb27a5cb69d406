//! Collaborator interfaces
//!
//! The consensus subsystem never owns ledger state. It reads and mutates it
//! through these traits, and the ledger learns about finalized statuses
//! through [`StatusSink`]. Concrete instances are wired together at
//! composition time, so neither side depends on the other's internals.

use crate::types::{FlightRef, Identity, StatusCode, Timestamp};

/// Airline bookkeeping consulted by admission voting
pub trait AirlineLedger: Send + Sync {
    fn is_airline_registered(&self, airline: &Identity) -> bool;

    /// Registered airlines that have paid their participation funding
    fn is_airline_funded(&self, airline: &Identity) -> bool;

    fn registered_airline_count(&self) -> usize;

    /// Called exactly once per successful admission
    fn register_airline(&self, airline: Identity);
}

/// Flight bookkeeping consulted before accepting insurance
pub trait FlightRegistry: Send + Sync {
    fn is_flight_registered(&self, flight: &FlightRef, timestamp: Timestamp) -> bool;
}

/// Passenger credit bookkeeping
pub trait InsureeLedger: Send + Sync {
    /// Credit every passenger insured on the flight. Returns how many were credited.
    fn credit_insurees(&self, flight: &FlightRef, timestamp: Timestamp) -> usize;
}

/// Receives each finalized flight status exactly once per request key
pub trait StatusSink: Send + Sync {
    fn on_status_finalized(&self, flight: &FlightRef, timestamp: Timestamp, status: StatusCode);
}

/// Sink that drops every status (used when only events matter)
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopStatusSink;

impl StatusSink for NoopStatusSink {
    fn on_status_finalized(&self, _flight: &FlightRef, _timestamp: Timestamp, _status: StatusCode) {}
}
