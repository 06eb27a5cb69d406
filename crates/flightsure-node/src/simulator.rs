//! # Oracle Simulator
//!
//! Stands in for off-chain oracle operators. Registers a fleet of oracles,
//! watches the event bus for `RequestOpened` and answers from every oracle
//! holding the announced index.
//!
//! Late reports after finalization are rejected by the aggregator; the
//! simulator logs them and keeps going.

use crate::service::FlightSure;
use flightsure_consensus::OracleEvent;
use flightsure_core::constants::INDEXES_PER_ORACLE;
use flightsure_core::error::Result;
use flightsure_core::types::{FlightRef, Identity, OracleIndex, StatusCode, Timestamp};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// How simulated oracles pick the status they report
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusPolicy {
    /// Every oracle reports the same status
    Fixed(StatusCode),
    /// Each report is drawn uniformly from all status codes
    Random { seed: u64 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedOracle {
    pub identity: Identity,
    pub indexes: [OracleIndex; INDEXES_PER_ORACLE],
}

/// Counters for one simulator run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorStats {
    pub requests_seen: usize,
    pub reports_accepted: usize,
    pub reports_rejected: usize,
    pub finalized: usize,
}

pub struct OracleSimulator {
    service: Arc<FlightSure>,
    oracles: Vec<SimulatedOracle>,
    policy: StatusPolicy,
    rng: ChaCha20Rng,
    events: broadcast::Receiver<OracleEvent>,
    stats: SimulatorStats,
}

impl OracleSimulator {
    /// Register `count` oracles labelled `oracle-0..` and subscribe to the bus
    pub fn register(service: Arc<FlightSure>, count: usize, policy: StatusPolicy) -> Result<Self> {
        let events = service.subscribe();
        let fee = service.registration_fee();

        let mut oracles = Vec::with_capacity(count);
        for i in 0..count {
            let identity = Identity::from_label(&format!("oracle-{}", i));
            let indexes = service.register_oracle(identity, fee)?;
            oracles.push(SimulatedOracle { identity, indexes });
        }
        info!(count, ?policy, "Simulated oracles registered");

        let seed = match policy {
            StatusPolicy::Random { seed } => seed,
            StatusPolicy::Fixed(_) => 0,
        };
        Ok(Self {
            service,
            oracles,
            policy,
            rng: ChaCha20Rng::seed_from_u64(seed),
            events,
            stats: SimulatorStats::default(),
        })
    }

    pub fn oracles(&self) -> &[SimulatedOracle] {
        &self.oracles
    }

    pub fn stats(&self) -> &SimulatorStats {
        &self.stats
    }

    fn next_status(&mut self) -> StatusCode {
        match self.policy {
            StatusPolicy::Fixed(status) => status,
            StatusPolicy::Random { .. } => {
                StatusCode::ALL[self.rng.gen_range(0..StatusCode::ALL.len())]
            }
        }
    }

    /// Submit a report from every oracle holding `index`
    pub fn respond(&mut self, index: OracleIndex, flight: &FlightRef, timestamp: Timestamp) {
        let holders: Vec<Identity> = self
            .service
            .oracles_holding(index)
            .into_iter()
            .filter(|holder| self.oracles.iter().any(|o| o.identity == *holder))
            .collect();
        debug!(index, %flight, holders = holders.len(), "Answering status request");

        for oracle in holders {
            let status = self.next_status();
            match self
                .service
                .submit_oracle_response(oracle, index, flight, timestamp, status.as_u8())
            {
                Ok(outcome) => {
                    self.stats.reports_accepted += 1;
                    if outcome.is_finalized() {
                        self.stats.finalized += 1;
                    }
                }
                Err(e) => {
                    self.stats.reports_rejected += 1;
                    warn!(%oracle, index, %flight, error = %e, "Oracle report rejected");
                }
            }
        }
    }

    /// Answer requests until a shutdown signal arrives
    pub async fn run(mut self, mut shutdown_rx: mpsc::Receiver<()>) -> SimulatorStats {
        info!(oracles = self.oracles.len(), "Oracle simulator started");
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Oracle simulator shutting down");
                    break;
                }
                event = self.events.recv() => match event {
                    Ok(OracleEvent::RequestOpened { index, flight, timestamp, .. }) => {
                        self.stats.requests_seen += 1;
                        self.respond(index, &flight, timestamp);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Oracle simulator lagged behind the event bus");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
        self.stats
    }
}
