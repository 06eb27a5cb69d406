//! # Request Tracker
//!
//! Opens one response window per `(index, flight, timestamp)` key and closes
//! it on finalization, cancellation or expiry. Closed windows stay in the
//! table so late submissions keep failing instead of reopening a round.
//!
//! ## Locking
//!
//! Each window sits behind its own mutex inside a sharded map. The map lock
//! is only held long enough to clone the window's `Arc`, so unrelated flights
//! never wait on each other.
//!
//! ```text
//! Open ──submit*──► Open ──threshold──► Closed(Finalized)
//!   │                 │
//!   └──cancel/expire──┴───────────────► Closed(Cancelled | Expired)
//! ```

use crate::events::{CloseReason, EventBus, OracleEvent};
use crate::indexes::IndexGenerator;
use dashmap::DashMap;
use flightsure_core::error::{FlightSureError, Result};
use flightsure_core::types::{FlightRef, Identity, OracleIndex, RequestKey, StatusCode, Timestamp};
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One consensus round
#[derive(Clone, Debug)]
pub struct StatusRequest {
    pub key: RequestKey,
    pub index: OracleIndex,
    pub flight: FlightRef,
    pub timestamp: Timestamp,
    pub requester: Identity,
    pub opened_at: Timestamp,
    pub expires_at: Option<Timestamp>,

    is_open: bool,
    closed: Option<CloseReason>,

    /// Contributors per reported status, in arrival order
    responses_by_value: IndexMap<StatusCode, IndexSet<Identity>>,

    /// Every oracle that has reported under this key, whatever the value
    contributors: HashSet<Identity>,
}

impl StatusRequest {
    fn new(
        key: RequestKey,
        index: OracleIndex,
        flight: FlightRef,
        timestamp: Timestamp,
        requester: Identity,
        opened_at: Timestamp,
        ttl_secs: Option<u64>,
    ) -> Self {
        Self {
            key,
            index,
            flight,
            timestamp,
            requester,
            opened_at,
            expires_at: ttl_secs
                .map(|ttl| opened_at.saturating_add(i64::try_from(ttl).unwrap_or(i64::MAX))),
            is_open: true,
            closed: None,
            responses_by_value: IndexMap::new(),
            contributors: HashSet::new(),
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }

    /// Open and not past its deadline
    pub fn accepts(&self, now: Timestamp) -> bool {
        self.is_open && !self.is_expired(now)
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.closed
    }

    pub fn tally(&self, status: StatusCode) -> usize {
        self.responses_by_value.get(&status).map_or(0, |s| s.len())
    }

    /// Record a contribution; returns the new tally for `status`
    pub(crate) fn record(&mut self, oracle: Identity, status: StatusCode) -> Result<usize> {
        if !self.contributors.insert(oracle) {
            return Err(FlightSureError::DuplicateSubmission {
                oracle,
                key: self.key,
            });
        }

        let bucket = self.responses_by_value.entry(status).or_default();
        bucket.insert(oracle);
        Ok(bucket.len())
    }

    /// Returns false if the window was already closed
    pub(crate) fn close(&mut self, reason: CloseReason) -> bool {
        if !self.is_open {
            return false;
        }
        self.is_open = false;
        self.closed = Some(reason);
        true
    }

    pub fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot {
            key: self.key,
            index: self.index,
            flight: self.flight.clone(),
            timestamp: self.timestamp,
            requester: self.requester,
            is_open: self.is_open,
            closed: self.closed,
            opened_at: self.opened_at,
            expires_at: self.expires_at,
            responses: self
                .responses_by_value
                .iter()
                .map(|(status, oracles)| (*status, oracles.iter().copied().collect()))
                .collect(),
        }
    }
}

/// Read-only copy of a request for observers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub key: RequestKey,
    pub index: OracleIndex,
    pub flight: FlightRef,
    pub timestamp: Timestamp,
    pub requester: Identity,
    pub is_open: bool,
    pub closed: Option<CloseReason>,
    pub opened_at: Timestamp,
    pub expires_at: Option<Timestamp>,
    pub responses: Vec<(StatusCode, Vec<Identity>)>,
}

impl RequestSnapshot {
    pub fn outcome(&self) -> Option<StatusCode> {
        match self.closed {
            Some(CloseReason::Finalized(status)) => Some(status),
            _ => None,
        }
    }
}

/// Result of opening a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenedRequest {
    pub index: OracleIndex,
    pub key: RequestKey,
}

/// Tracker statistics
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerStats {
    pub total: usize,
    pub open: usize,
    pub finalized: usize,
    pub cancelled: usize,
    pub expired: usize,
}

pub struct RequestTracker {
    requests: DashMap<RequestKey, Arc<Mutex<StatusRequest>>>,
    generator: Arc<IndexGenerator>,
    request_ttl_secs: Option<u64>,
    events: EventBus,
}

impl RequestTracker {
    pub fn new(generator: Arc<IndexGenerator>, request_ttl_secs: Option<u64>, events: EventBus) -> Self {
        Self {
            requests: DashMap::new(),
            generator,
            request_ttl_secs,
            events,
        }
    }

    /// Open a window for `flight` and announce its index
    pub fn open_request(&self, flight: FlightRef, timestamp: Timestamp, requester: Identity) -> OpenedRequest {
        self.open_request_at(flight, timestamp, requester, chrono::Utc::now().timestamp())
    }

    pub fn open_request_at(
        &self,
        flight: FlightRef,
        timestamp: Timestamp,
        requester: Identity,
        now: Timestamp,
    ) -> OpenedRequest {
        let index = self.generator.next_pseudo_random(&requester).value;
        let key = RequestKey::derive(index, &flight, timestamp);

        let request = StatusRequest::new(
            key,
            index,
            flight.clone(),
            timestamp,
            requester,
            now,
            self.request_ttl_secs,
        );

        // Any earlier window under the same key is replaced.
        if let Some(previous) = self.requests.insert(key, Arc::new(Mutex::new(request))) {
            if previous.lock().accepts(now) {
                warn!(%key, "Open request window replaced; pending reports discarded");
            } else {
                debug!(%key, "Replaced closed request window");
            }
        }

        info!(%key, index, %flight, timestamp, "Status request opened");
        self.events.publish(OracleEvent::RequestOpened {
            index,
            flight,
            timestamp,
            key,
            requester,
        });

        OpenedRequest { index, key }
    }

    pub fn is_open(&self, key: &RequestKey) -> bool {
        self.is_open_at(key, chrono::Utc::now().timestamp())
    }

    pub fn is_open_at(&self, key: &RequestKey, now: Timestamp) -> bool {
        self.handle(key).map_or(false, |r| r.lock().accepts(now))
    }

    /// Window handle; the map shard is released before the caller locks it
    pub(crate) fn handle(&self, key: &RequestKey) -> Option<Arc<Mutex<StatusRequest>>> {
        self.requests.get(key).map(|entry| entry.value().clone())
    }

    /// Close an open window on behalf of its requester
    pub fn cancel(&self, key: &RequestKey, caller: &Identity) -> Result<()> {
        self.cancel_at(key, caller, chrono::Utc::now().timestamp())
    }

    /// A window past its deadline is closed as expired, never as cancelled
    pub fn cancel_at(&self, key: &RequestKey, caller: &Identity, now: Timestamp) -> Result<()> {
        let handle = self
            .handle(key)
            .ok_or(FlightSureError::RequestClosedOrUnknown(*key))?;

        let reason = {
            let mut request = handle.lock();
            if request.requester != *caller {
                return Err(FlightSureError::Unauthorized(format!(
                    "only the requester may cancel request {}",
                    key
                )));
            }
            if request.is_expired(now) {
                if request.close(CloseReason::Expired) {
                    CloseReason::Expired
                } else {
                    return Err(FlightSureError::RequestClosedOrUnknown(*key));
                }
            } else if request.close(CloseReason::Cancelled) {
                CloseReason::Cancelled
            } else {
                return Err(FlightSureError::RequestClosedOrUnknown(*key));
            }
        };

        self.events.publish(OracleEvent::RequestClosed { key: *key, reason });
        if reason == CloseReason::Expired {
            debug!(%key, "Cancel found request already expired");
            return Err(FlightSureError::RequestClosedOrUnknown(*key));
        }
        info!(%key, "Status request cancelled");
        Ok(())
    }

    /// Close every open window whose deadline is at or before `now`
    pub fn sweep_expired(&self, now: Timestamp) -> Vec<RequestKey> {
        let handles: Vec<Arc<Mutex<StatusRequest>>> =
            self.requests.iter().map(|e| e.value().clone()).collect();

        let mut expired = Vec::new();
        for handle in handles {
            let mut request = handle.lock();
            if request.is_open && request.is_expired(now) && request.close(CloseReason::Expired) {
                expired.push(request.key);
            }
        }

        for key in &expired {
            self.events.publish(OracleEvent::RequestClosed {
                key: *key,
                reason: CloseReason::Expired,
            });
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "Expired status requests");
        }
        expired
    }

    pub fn get(&self, key: &RequestKey) -> Option<RequestSnapshot> {
        self.handle(key).map(|r| r.lock().snapshot())
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats_at(chrono::Utc::now().timestamp())
    }

    /// Open windows past their deadline count as expired
    pub fn stats_at(&self, now: Timestamp) -> TrackerStats {
        let handles: Vec<Arc<Mutex<StatusRequest>>> =
            self.requests.iter().map(|e| e.value().clone()).collect();

        let mut stats = TrackerStats {
            total: handles.len(),
            ..Default::default()
        };
        for handle in handles {
            let request = handle.lock();
            match request.closed {
                None if request.is_expired(now) => stats.expired += 1,
                None => stats.open += 1,
                Some(CloseReason::Finalized(_)) => stats.finalized += 1,
                Some(CloseReason::Cancelled) => stats.cancelled += 1,
                Some(CloseReason::Expired) => stats.expired += 1,
            }
        }
        stats
    }

    pub fn bound(&self) -> u16 {
        self.generator.bound()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }
}
