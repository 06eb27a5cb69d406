//! # FlightSure Service
//!
//! Composition root for one node: the insurance ledger, the oracle network
//! and airline admission, wired through traits rather than references to
//! each other.
//!
//! ```text
//!                 ┌──────────────┐  AirlineLedger   ┌──────────────────┐
//!   airlines ────►│  Admission   │─────────────────►│                  │
//!                 └──────────────┘                  │  InMemoryLedger  │
//!                 ┌──────────────┐  StatusSink      │                  │
//!   oracles ─────►│  Aggregator  │──► Processor ───►│  (InsureeLedger) │
//!                 └──────────────┘                  └──────────────────┘
//!                        │
//!                        ▼
//!                    EventBus ──► subscribers (simulator, CLI)
//! ```
//!
//! Every mutating call fails with `NotOperational` while the owner has the
//! service paused.

use crate::config::FlightSureConfig;
use crate::ledger::{AirlineAccount, InMemoryLedger, Policy};
use crate::metrics::ConsensusMetrics;
use crate::processor::FlightStatusProcessor;
use flightsure_consensus::{
    AdmissionOutcome, AdmissionState, AdmissionVoting, EntropySource, EventBus, IndexGenerator,
    OpenedRequest, OracleEvent, OracleRegistry, OsEntropy, RequestSnapshot, RequestTracker,
    ResponseAggregator, SeededEntropy, SubmissionOutcome, TrackerStats,
};
use flightsure_core::constants::INDEXES_PER_ORACLE;
use flightsure_core::error::{FlightSureError, Result};
use flightsure_core::ledger::AirlineLedger;
use flightsure_core::types::{
    Amount, FlightRef, Identity, OracleIndex, RequestKey, StatusCode, Timestamp,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub struct FlightSure {
    config: FlightSureConfig,
    owner: Identity,
    operational: AtomicBool,
    ledger: Arc<InMemoryLedger>,
    registry: Arc<OracleRegistry>,
    tracker: Arc<RequestTracker>,
    aggregator: ResponseAggregator,
    admission: AdmissionVoting,
    processor: Arc<FlightStatusProcessor>,
    events: EventBus,
    metrics: ConsensusMetrics,
}

impl FlightSure {
    /// Build a node; entropy is seeded when `node.entropy_seed` is set
    pub fn new(config: FlightSureConfig) -> anyhow::Result<Self> {
        let entropy: Arc<dyn EntropySource> = match config.node.entropy_seed {
            Some(seed) => Arc::new(SeededEntropy::new(seed)),
            None => Arc::new(OsEntropy),
        };
        Self::with_entropy(config, entropy)
    }

    pub fn with_entropy(
        config: FlightSureConfig,
        entropy: Arc<dyn EntropySource>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let events = EventBus::new(config.node.event_capacity);
        let generator = Arc::new(IndexGenerator::new(
            entropy,
            config.oracle.index_bound,
            config.oracle.nonce_ceiling,
        )?);

        let ledger = Arc::new(InMemoryLedger::new(config.ledger.clone()));
        ledger.seed_airline(config.node.genesis_identity());

        let registry = Arc::new(OracleRegistry::new(
            generator.clone(),
            config.oracle.registration_fee(),
            events.clone(),
        ));
        let tracker = Arc::new(RequestTracker::new(
            generator,
            config.oracle.request_ttl_secs,
            events.clone(),
        ));
        let processor = Arc::new(FlightStatusProcessor::new(ledger.clone()));
        let aggregator = ResponseAggregator::new(
            registry.clone(),
            tracker.clone(),
            processor.clone(),
            config.oracle.min_responses,
            events.clone(),
        );
        let admission = AdmissionVoting::new(ledger.clone(), config.admission.clone(), events.clone());
        let metrics = ConsensusMetrics::new(&config.metrics)?;

        let owner = config.node.owner_identity();
        info!(
            %owner,
            genesis = %config.node.genesis_identity(),
            index_bound = config.oracle.index_bound,
            min_responses = config.oracle.min_responses,
            "FlightSure node initialized"
        );

        Ok(Self {
            config,
            owner,
            operational: AtomicBool::new(true),
            ledger,
            registry,
            tracker,
            aggregator,
            admission,
            processor,
            events,
            metrics,
        })
    }

    // === Operator ===

    pub fn owner(&self) -> Identity {
        self.owner
    }

    pub fn is_operational(&self) -> bool {
        self.operational.load(Ordering::SeqCst)
    }

    /// Pause or resume all mutating calls; owner only
    pub fn set_operational(&self, caller: &Identity, operational: bool) -> Result<()> {
        if *caller != self.owner {
            return Err(FlightSureError::Unauthorized(format!(
                "{} is not the service owner",
                caller
            )));
        }
        let previous = self.operational.swap(operational, Ordering::SeqCst);
        if previous != operational {
            warn!(operational, "Operational status changed");
        }
        Ok(())
    }

    fn require_operational(&self) -> Result<()> {
        if self.is_operational() {
            Ok(())
        } else {
            Err(FlightSureError::NotOperational)
        }
    }

    // === Airlines ===

    /// Vote for `candidate`; the voter must be a funded airline
    pub fn register_airline(&self, candidate: Identity, voter: Identity) -> Result<AdmissionOutcome> {
        self.require_operational()?;
        let outcome = self.admission.vote(candidate, voter)?;
        if outcome.is_admitted() {
            self.metrics.airline_admitted();
        }
        Ok(outcome)
    }

    pub fn fund_airline(&self, airline: &Identity, amount: Amount) -> Result<Amount> {
        self.require_operational()?;
        self.ledger.fund_airline(airline, amount)
    }

    pub fn register_flight(&self, airline: &Identity, code: &str, timestamp: Timestamp) -> Result<FlightRef> {
        self.require_operational()?;
        self.ledger.register_flight(airline, code, timestamp)
    }

    pub fn is_airline_registered(&self, airline: &Identity) -> bool {
        self.ledger.is_airline_registered(airline)
    }

    pub fn is_airline_funded(&self, airline: &Identity) -> bool {
        self.ledger.is_airline_funded(airline)
    }

    pub fn airline_count(&self) -> usize {
        self.ledger.registered_airline_count()
    }

    pub fn airline_account(&self, airline: &Identity) -> Option<AirlineAccount> {
        self.ledger.airline_account(airline)
    }

    pub fn admission_state(&self, candidate: &Identity) -> AdmissionState {
        self.admission.state(candidate)
    }

    // === Passengers ===

    pub fn buy_insurance(
        &self,
        passenger: Identity,
        flight: &FlightRef,
        timestamp: Timestamp,
        amount: Amount,
    ) -> Result<()> {
        self.require_operational()?;
        self.ledger.buy_insurance(passenger, flight, timestamp, amount)
    }

    pub fn policies_for(&self, flight: &FlightRef, timestamp: Timestamp) -> Vec<Policy> {
        self.ledger.policies_for(flight, timestamp)
    }

    pub fn credit_of(&self, passenger: &Identity) -> Amount {
        self.ledger.credit_of(passenger)
    }

    pub fn withdraw(&self, passenger: &Identity) -> Result<Amount> {
        self.require_operational()?;
        self.ledger.withdraw(passenger)
    }

    // === Oracles ===

    pub fn registration_fee(&self) -> Amount {
        self.registry.registration_fee()
    }

    pub fn register_oracle(&self, oracle: Identity, fee: Amount) -> Result<[OracleIndex; INDEXES_PER_ORACLE]> {
        self.require_operational()?;
        let indexes = self.registry.register(oracle, fee)?;
        self.metrics.set_oracles(self.registry.len());
        Ok(indexes)
    }

    pub fn oracle_indexes(&self, oracle: &Identity) -> Result<[OracleIndex; INDEXES_PER_ORACLE]> {
        self.registry.lookup(oracle)
    }

    pub fn oracle_count(&self) -> usize {
        self.registry.len()
    }

    /// Registered oracles holding `index`, sorted by identity
    pub fn oracles_holding(&self, index: OracleIndex) -> Vec<Identity> {
        self.registry.holders_of(index)
    }

    /// Open a status request; oracles holding the returned index may answer
    pub fn fetch_flight_status(
        &self,
        requester: Identity,
        flight: FlightRef,
        timestamp: Timestamp,
    ) -> Result<OpenedRequest> {
        self.fetch_flight_status_at(requester, flight, timestamp, chrono::Utc::now().timestamp())
    }

    pub fn fetch_flight_status_at(
        &self,
        requester: Identity,
        flight: FlightRef,
        timestamp: Timestamp,
        now: Timestamp,
    ) -> Result<OpenedRequest> {
        self.require_operational()?;
        let opened = self.tracker.open_request_at(flight, timestamp, requester, now);
        self.metrics.request_opened();
        Ok(opened)
    }

    pub fn submit_oracle_response(
        &self,
        oracle: Identity,
        index: OracleIndex,
        flight: &FlightRef,
        timestamp: Timestamp,
        status: u8,
    ) -> Result<SubmissionOutcome> {
        self.submit_oracle_response_at(oracle, index, flight, timestamp, status, chrono::Utc::now().timestamp())
    }

    pub fn submit_oracle_response_at(
        &self,
        oracle: Identity,
        index: OracleIndex,
        flight: &FlightRef,
        timestamp: Timestamp,
        status: u8,
        now: Timestamp,
    ) -> Result<SubmissionOutcome> {
        let result = self
            .require_operational()
            .and_then(|_| self.aggregator.submit_at(oracle, index, flight, timestamp, status, now));
        match &result {
            Ok(outcome) => self.metrics.report_accepted(outcome.is_finalized()),
            Err(e) => self.metrics.report_rejected(e),
        }
        result
    }

    /// Withdraw an open request; only its requester may do so
    pub fn cancel_request(&self, key: &RequestKey, caller: &Identity) -> Result<()> {
        self.cancel_request_at(key, caller, chrono::Utc::now().timestamp())
    }

    pub fn cancel_request_at(&self, key: &RequestKey, caller: &Identity, now: Timestamp) -> Result<()> {
        self.require_operational()?;
        self.tracker.cancel_at(key, caller, now)
    }

    pub fn request(&self, key: &RequestKey) -> Option<RequestSnapshot> {
        self.tracker.get(key)
    }

    pub fn request_stats(&self) -> TrackerStats {
        self.tracker.stats()
    }

    pub fn request_stats_at(&self, now: Timestamp) -> TrackerStats {
        self.tracker.stats_at(now)
    }

    pub fn flight_status(&self, flight: &FlightRef, timestamp: Timestamp) -> Option<StatusCode> {
        self.processor.status_of(flight, timestamp)
    }

    /// Close overdue request windows and drop stale admission votes
    pub fn sweep_expired(&self, now: Timestamp) -> (Vec<RequestKey>, Vec<Identity>) {
        (self.tracker.sweep_expired(now), self.admission.sweep_expired(now))
    }

    // === Plumbing ===

    pub fn subscribe(&self) -> broadcast::Receiver<OracleEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn metrics(&self) -> &ConsensusMetrics {
        &self.metrics
    }

    pub fn config(&self) -> &FlightSureConfig {
        &self.config
    }
}
