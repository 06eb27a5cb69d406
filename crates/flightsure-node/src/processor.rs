//! Applies finalized flight statuses to the insurance ledger

use flightsure_core::ledger::{InsureeLedger, StatusSink};
use flightsure_core::types::{FlightRef, StatusCode, Timestamp};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Records every finalized status and credits insurees on airline delays
pub struct FlightStatusProcessor {
    insurees: Arc<dyn InsureeLedger>,
    statuses: RwLock<HashMap<(FlightRef, Timestamp), StatusCode>>,
}

impl FlightStatusProcessor {
    pub fn new(insurees: Arc<dyn InsureeLedger>) -> Self {
        Self {
            insurees,
            statuses: RwLock::new(HashMap::new()),
        }
    }

    /// Last finalized status for a flight
    pub fn status_of(&self, flight: &FlightRef, timestamp: Timestamp) -> Option<StatusCode> {
        self.statuses.read().get(&(flight.clone(), timestamp)).copied()
    }

    pub fn processed_count(&self) -> usize {
        self.statuses.read().len()
    }
}

impl StatusSink for FlightStatusProcessor {
    fn on_status_finalized(&self, flight: &FlightRef, timestamp: Timestamp, status: StatusCode) {
        self.statuses.write().insert((flight.clone(), timestamp), status);

        if status.is_compensable() {
            let credited = self.insurees.credit_insurees(flight, timestamp);
            info!(%flight, timestamp, %status, credited, "Compensable delay processed");
        } else {
            info!(%flight, timestamp, %status, "Flight status processed");
        }
    }
}
