//! # Airline Admission
//!
//! Decides whether a candidate airline joins, without a central authority.
//!
//! ```text
//! NoVotes ──vote──► Voting ──quorum──► Admitted
//!    ▲                                    │
//!    └──────── record cleared ────────────┘
//! ```
//!
//! While fewer than `min_consensus_airlines` airlines are registered, the
//! first vote from any funded airline admits the candidate. From then on a
//! candidate needs `quorum_rule.required(N)` distinct votes, where `N` is the
//! registered-airline count read at the time of each vote.

use crate::config::AdmissionConfig;
use crate::events::{EventBus, OracleEvent};
use dashmap::DashMap;
use flightsure_core::error::{FlightSureError, Result};
use flightsure_core::ledger::AirlineLedger;
use flightsure_core::types::{Identity, Timestamp};
use indexmap::IndexSet;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a vote
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionOutcome {
    /// The candidate is now a registered airline
    Admitted { votes: usize },

    /// Vote recorded; more are needed
    Pending { votes: usize, required: usize },
}

impl AdmissionOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionOutcome::Admitted { .. })
    }
}

/// Where a candidate stands
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionState {
    NoVotes,
    Voting { voters: Vec<Identity> },
    Admitted,
}

#[derive(Debug)]
struct AdmissionVote {
    voters: IndexSet<Identity>,
    opened_at: Timestamp,

    /// Set when the record leaves the map (admission or expiry); a voter
    /// that was waiting on it must fetch the current record instead.
    retired: bool,
}

impl AdmissionVote {
    fn new(opened_at: Timestamp) -> Self {
        Self {
            voters: IndexSet::new(),
            opened_at,
            retired: false,
        }
    }

    fn is_expired(&self, ttl_secs: Option<u64>, now: Timestamp) -> bool {
        let ttl = |ttl: u64| i64::try_from(ttl).unwrap_or(i64::MAX);
        ttl_secs.map_or(false, |secs| now >= self.opened_at.saturating_add(ttl(secs)))
    }
}

pub struct AdmissionVoting {
    votes: DashMap<Identity, Arc<Mutex<AdmissionVote>>>,
    ledger: Arc<dyn AirlineLedger>,
    config: AdmissionConfig,
    events: EventBus,
}

impl AdmissionVoting {
    pub fn new(ledger: Arc<dyn AirlineLedger>, config: AdmissionConfig, events: EventBus) -> Self {
        Self {
            votes: DashMap::new(),
            ledger,
            config,
            events,
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Votes needed with the current electorate (1 on the fast path)
    pub fn required_votes(&self) -> usize {
        self.required_for(self.ledger.registered_airline_count())
    }

    fn required_for(&self, airlines: usize) -> usize {
        if airlines < self.config.min_consensus_airlines {
            1
        } else {
            self.config.quorum_rule.required(airlines).max(1)
        }
    }

    /// Cast `voter`'s vote to admit `candidate`
    pub fn vote(&self, candidate: Identity, voter: Identity) -> Result<AdmissionOutcome> {
        self.vote_at(candidate, voter, chrono::Utc::now().timestamp())
    }

    pub fn vote_at(&self, candidate: Identity, voter: Identity, now: Timestamp) -> Result<AdmissionOutcome> {
        if self.ledger.is_airline_registered(&candidate) {
            return Err(FlightSureError::AlreadyRegistered(format!("airline {}", candidate)));
        }
        if !self.ledger.is_airline_funded(&voter) {
            return Err(FlightSureError::Unauthorized(format!(
                "airline {} is not a funded member",
                voter
            )));
        }

        // The map shard is never held while a record is locked here.
        let outcome = loop {
            if self.ledger.is_airline_registered(&candidate) {
                return Err(FlightSureError::AlreadyRegistered(format!("airline {}", candidate)));
            }
            let handle = self
                .votes
                .entry(candidate)
                .or_insert_with(|| Arc::new(Mutex::new(AdmissionVote::new(now))))
                .value()
                .clone();
            let mut record = handle.lock();
            if record.retired {
                continue;
            }
            // Admitted between the check above and the insert: the record may be ours.
            if self.ledger.is_airline_registered(&candidate) {
                let abandoned = record.voters.is_empty();
                record.retired |= abandoned;
                drop(record);
                if abandoned {
                    self.votes.remove_if(&candidate, |_, h| h.lock().retired);
                }
                return Err(FlightSureError::AlreadyRegistered(format!("airline {}", candidate)));
            }
            break self.apply_vote(&mut record, candidate, voter, now)?;
        };

        match outcome {
            AdmissionOutcome::Admitted { votes } => {
                self.votes.remove_if(&candidate, |_, h| h.lock().retired);
                info!(%candidate, votes, "Airline admitted");
                self.events.publish(OracleEvent::AirlineAdmitted { candidate, votes });
            }
            AdmissionOutcome::Pending { votes, required } => {
                info!(%candidate, %voter, votes, required, "Admission vote recorded");
                self.events.publish(OracleEvent::AirlineVoteRecorded {
                    candidate,
                    voter,
                    votes,
                    required,
                });
            }
        }
        Ok(outcome)
    }

    fn apply_vote(
        &self,
        record: &mut AdmissionVote,
        candidate: Identity,
        voter: Identity,
        now: Timestamp,
    ) -> Result<AdmissionOutcome> {
        if record.is_expired(self.config.vote_ttl_secs, now) {
            debug!(%candidate, "Stale admission votes reset");
            *record = AdmissionVote::new(now);
        }

        let airlines = self.ledger.registered_airline_count();
        let fast_path = airlines < self.config.min_consensus_airlines;
        if !fast_path && record.voters.contains(&voter) {
            return Err(FlightSureError::DuplicateVote { voter, candidate });
        }

        let required = self.required_for(airlines);
        record.voters.insert(voter);
        let votes = record.voters.len();
        if votes < required {
            return Ok(AdmissionOutcome::Pending { votes, required });
        }

        self.ledger.register_airline(candidate);
        record.voters.clear();
        record.retired = true;
        Ok(AdmissionOutcome::Admitted { votes })
    }

    pub fn state(&self, candidate: &Identity) -> AdmissionState {
        if self.ledger.is_airline_registered(candidate) {
            return AdmissionState::Admitted;
        }
        match self.votes.get(candidate).map(|e| e.value().clone()) {
            Some(handle) => {
                let record = handle.lock();
                if record.voters.is_empty() {
                    AdmissionState::NoVotes
                } else {
                    AdmissionState::Voting {
                        voters: record.voters.iter().copied().collect(),
                    }
                }
            }
            None => AdmissionState::NoVotes,
        }
    }

    /// Current vote count for a pending candidate
    pub fn tally(&self, candidate: &Identity) -> usize {
        self.votes
            .get(candidate)
            .map(|e| e.value().clone())
            .map_or(0, |h| h.lock().voters.len())
    }

    /// Candidates with a live vote record
    pub fn pending_candidates(&self) -> usize {
        self.votes.len()
    }

    /// Drop vote records older than the configured TTL
    pub fn sweep_expired(&self, now: Timestamp) -> Vec<Identity> {
        let ttl = self.config.vote_ttl_secs;
        let candidates: Vec<Identity> = self.votes.iter().map(|e| *e.key()).collect();

        let expired: Vec<Identity> = candidates
            .into_iter()
            .filter(|candidate| {
                self.votes
                    .remove_if(candidate, |_, handle| {
                        let mut record = handle.lock();
                        if record.is_expired(ttl, now) {
                            record.retired = true;
                            true
                        } else {
                            false
                        }
                    })
                    .is_some()
            })
            .collect();

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired admission vote records");
        }
        expired
    }
}
