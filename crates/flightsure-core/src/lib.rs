//! # FlightSure Core
//!
//! Shared vocabulary for the FlightSure flight-delay insurance network.
//!
//! - [`Identity`] - airlines, oracles and passengers
//! - [`FlightRef`] - the subject of an oracle status request
//! - [`StatusCode`] - values oracles report
//! - [`RequestKey`] - `(index, flight, timestamp)` consensus round identifier
//! - [`ledger`] - narrow collaborator traits between consensus and bookkeeping

pub mod error;
pub mod ledger;
pub mod types;

pub use error::*;
pub use ledger::*;
pub use types::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{FlightSureError, Result};
    pub use crate::ledger::{AirlineLedger, FlightRegistry, InsureeLedger, StatusSink};
    pub use crate::types::*;
}
