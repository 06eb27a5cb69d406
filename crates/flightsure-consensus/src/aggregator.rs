//! # Response Aggregator
//!
//! Collects oracle reports for open requests and finalizes the first status
//! that `min_responses` distinct oracles agree on.
//!
//! ## Admission checks (in order, none has a side effect)
//!
//! 1. Claimed index inside the bound and reported value a known status
//! 2. Oracle registered and holding the claimed index
//! 3. Request open under `(index, flight, timestamp)`
//! 4. Oracle has not already reported for this request
//!
//! ## Exactly-once finalization
//!
//! The threshold check and the close happen under the request's own lock.
//! Only the submitter whose report flips the window to closed publishes
//! `StatusFinalized` and calls the [`StatusSink`]; everyone after it sees a
//! closed window.

use crate::events::{CloseReason, EventBus, OracleEvent};
use crate::registry::OracleRegistry;
use crate::requests::RequestTracker;
use flightsure_core::error::{FlightSureError, Result};
use flightsure_core::ledger::StatusSink;
use flightsure_core::types::{FlightRef, Identity, OracleIndex, RequestKey, StatusCode, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// What an accepted submission did
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionOutcome {
    /// Counted; the window stays open
    Recorded {
        status: StatusCode,
        tally: usize,
        required: usize,
    },

    /// This report completed the threshold and closed the window
    Finalized { status: StatusCode },
}

impl SubmissionOutcome {
    pub fn is_finalized(&self) -> bool {
        matches!(self, SubmissionOutcome::Finalized { .. })
    }
}

pub struct ResponseAggregator {
    registry: Arc<OracleRegistry>,
    tracker: Arc<RequestTracker>,
    sink: Arc<dyn StatusSink>,
    min_responses: usize,
    events: EventBus,
}

impl ResponseAggregator {
    pub fn new(
        registry: Arc<OracleRegistry>,
        tracker: Arc<RequestTracker>,
        sink: Arc<dyn StatusSink>,
        min_responses: usize,
        events: EventBus,
    ) -> Self {
        Self {
            registry,
            tracker,
            sink,
            min_responses: min_responses.max(1),
            events,
        }
    }

    pub fn min_responses(&self) -> usize {
        self.min_responses
    }

    /// Submit an oracle report
    pub fn submit(
        &self,
        oracle: Identity,
        claimed_index: OracleIndex,
        flight: &FlightRef,
        timestamp: Timestamp,
        value: u8,
    ) -> Result<SubmissionOutcome> {
        self.submit_at(oracle, claimed_index, flight, timestamp, value, chrono::Utc::now().timestamp())
    }

    pub fn submit_at(
        &self,
        oracle: Identity,
        claimed_index: OracleIndex,
        flight: &FlightRef,
        timestamp: Timestamp,
        value: u8,
        now: Timestamp,
    ) -> Result<SubmissionOutcome> {
        if claimed_index as u16 >= self.tracker.bound() {
            return Err(FlightSureError::OutOfRange {
                what: "oracle index",
                value: claimed_index as u64,
            });
        }
        let status = StatusCode::try_from(value)?;

        let indexes = self.registry.lookup(&oracle)?;
        if !indexes.contains(&claimed_index) {
            return Err(FlightSureError::IndexMismatch {
                oracle,
                index: claimed_index,
            });
        }

        let key = RequestKey::derive(claimed_index, flight, timestamp);
        let handle = self
            .tracker
            .handle(&key)
            .ok_or(FlightSureError::RequestClosedOrUnknown(key))?;

        let (tally, finalized) = {
            let mut request = handle.lock();
            if !request.accepts(now) {
                return Err(FlightSureError::RequestClosedOrUnknown(key));
            }

            let tally = request.record(oracle, status)?;
            let finalized =
                tally >= self.min_responses && request.close(CloseReason::Finalized(status));
            (tally, finalized)
        };

        debug!(%oracle, %key, %status, tally, "Oracle report received");
        self.events.publish(OracleEvent::ReportReceived {
            oracle,
            index: claimed_index,
            flight: flight.clone(),
            timestamp,
            status,
        });

        if !finalized {
            return Ok(SubmissionOutcome::Recorded {
                status,
                tally,
                required: self.min_responses,
            });
        }

        info!(%key, %flight, timestamp, %status, "Flight status finalized");
        self.events.publish(OracleEvent::StatusFinalized {
            key,
            flight: flight.clone(),
            timestamp,
            status,
        });
        self.sink.on_status_finalized(flight, timestamp, status);

        Ok(SubmissionOutcome::Finalized { status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::SeededEntropy;
    use crate::indexes::IndexGenerator;
    use flightsure_core::constants::ONE_ETHER;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(FlightRef, Timestamp, StatusCode)>>,
    }

    impl StatusSink for RecordingSink {
        fn on_status_finalized(&self, flight: &FlightRef, timestamp: Timestamp, status: StatusCode) {
            self.calls.lock().push((flight.clone(), timestamp, status));
        }
    }

    struct Fixture {
        registry: Arc<OracleRegistry>,
        tracker: Arc<RequestTracker>,
        aggregator: ResponseAggregator,
        sink: Arc<RecordingSink>,
        events: EventBus,
    }

    fn fixture(ttl: Option<u64>) -> Fixture {
        let generator =
            Arc::new(IndexGenerator::new(Arc::new(SeededEntropy::new(99)), 10, 256).unwrap());
        build(generator.clone(), generator, ttl)
    }

    struct FixedEntropy;

    impl crate::entropy::EntropySource for FixedEntropy {
        fn entropy(&self) -> [u8; 32] {
            [7u8; 32]
        }
    }

    /// Bound 3 so every oracle holds every index; one requester always
    /// lands on the same request key.
    fn colliding_fixture() -> Fixture {
        let oracles =
            Arc::new(IndexGenerator::new(Arc::new(SeededEntropy::new(99)), 3, 256).unwrap());
        let requests = Arc::new(IndexGenerator::new(Arc::new(FixedEntropy), 3, 1).unwrap());
        build(oracles, requests, None)
    }

    fn build(
        oracle_indexes: Arc<IndexGenerator>,
        request_indexes: Arc<IndexGenerator>,
        ttl: Option<u64>,
    ) -> Fixture {
        let events = EventBus::new(4096);
        let registry = Arc::new(OracleRegistry::new(oracle_indexes, ONE_ETHER, events.clone()));
        let tracker = Arc::new(RequestTracker::new(request_indexes, ttl, events.clone()));
        let sink = Arc::new(RecordingSink::default());
        let aggregator = ResponseAggregator::new(
            registry.clone(),
            tracker.clone(),
            sink.clone(),
            3,
            events.clone(),
        );
        Fixture {
            registry,
            tracker,
            aggregator,
            sink,
            events,
        }
    }

    fn flight() -> FlightRef {
        FlightRef::new(Identity::from_label("airline-1"), "ND1309")
    }

    /// Register oracles until `n` of them hold `index`
    fn holders(fx: &Fixture, index: OracleIndex, n: usize) -> Vec<Identity> {
        let mut found = Vec::new();
        let mut i = 0;
        while found.len() < n {
            let oracle = Identity::from_label(&format!("oracle-{}", i));
            let indexes = fx.registry.register(oracle, ONE_ETHER).unwrap();
            if indexes.contains(&index) {
                found.push(oracle);
            }
            i += 1;
        }
        found
    }

    /// A registered oracle that does not hold `index`
    fn non_holder(fx: &Fixture, index: OracleIndex) -> Identity {
        let mut i = 0;
        loop {
            let oracle = Identity::from_label(&format!("outsider-{}", i));
            let indexes = fx.registry.register(oracle, ONE_ETHER).unwrap();
            if !indexes.contains(&index) {
                return oracle;
            }
            i += 1;
        }
    }

    #[test]
    fn test_threshold_finalizes_once() {
        let fx = fixture(None);
        let opened = fx.tracker.open_request(flight(), 100, Identity::from_label("passenger"));
        let oracles = holders(&fx, opened.index, 4);
        let late = StatusCode::LateAirline.as_u8();

        let first = fx.aggregator.submit(oracles[0], opened.index, &flight(), 100, late).unwrap();
        assert_eq!(
            first,
            SubmissionOutcome::Recorded {
                status: StatusCode::LateAirline,
                tally: 1,
                required: 3
            }
        );
        fx.aggregator.submit(oracles[1], opened.index, &flight(), 100, late).unwrap();
        let third = fx.aggregator.submit(oracles[2], opened.index, &flight(), 100, late).unwrap();
        assert!(third.is_finalized());

        let fourth = fx.aggregator.submit(oracles[3], opened.index, &flight(), 100, late);
        assert_eq!(fourth, Err(FlightSureError::RequestClosedOrUnknown(opened.key)));

        assert_eq!(fx.sink.calls.lock().len(), 1);
        assert!(!fx.tracker.is_open(&opened.key));
        assert_eq!(
            fx.tracker.get(&opened.key).unwrap().outcome(),
            Some(StatusCode::LateAirline)
        );
    }

    #[test]
    fn test_conflicting_values_first_to_threshold_wins() {
        let fx = fixture(None);
        let opened = fx.tracker.open_request(flight(), 100, Identity::from_label("passenger"));
        let oracles = holders(&fx, opened.index, 5);
        let on_time = StatusCode::OnTime.as_u8();
        let weather = StatusCode::LateWeather.as_u8();

        fx.aggregator.submit(oracles[0], opened.index, &flight(), 100, on_time).unwrap();
        fx.aggregator.submit(oracles[1], opened.index, &flight(), 100, weather).unwrap();
        fx.aggregator.submit(oracles[2], opened.index, &flight(), 100, weather).unwrap();
        fx.aggregator.submit(oracles[3], opened.index, &flight(), 100, on_time).unwrap();
        let outcome = fx.aggregator.submit(oracles[4], opened.index, &flight(), 100, weather).unwrap();

        assert_eq!(outcome, SubmissionOutcome::Finalized { status: StatusCode::LateWeather });
        let calls = fx.sink.calls.lock();
        assert_eq!(calls.as_slice(), &[(flight(), 100, StatusCode::LateWeather)]);
    }

    #[test]
    fn test_index_mismatch_has_no_side_effect() {
        let fx = fixture(None);
        let opened = fx.tracker.open_request(flight(), 100, Identity::from_label("passenger"));
        let outsider = non_holder(&fx, opened.index);
        let mut rx = fx.events.subscribe();

        let err = fx
            .aggregator
            .submit(outsider, opened.index, &flight(), 100, StatusCode::OnTime.as_u8())
            .unwrap_err();

        assert_eq!(
            err,
            FlightSureError::IndexMismatch {
                oracle: outsider,
                index: opened.index
            }
        );
        assert!(rx.try_recv().is_err());
        assert!(fx.tracker.get(&opened.key).unwrap().responses.is_empty());
    }

    #[test]
    fn test_unregistered_oracle() {
        let fx = fixture(None);
        let opened = fx.tracker.open_request(flight(), 100, Identity::from_label("passenger"));
        let err = fx
            .aggregator
            .submit(Identity::from_label("ghost"), opened.index, &flight(), 100, 10)
            .unwrap_err();
        assert!(matches!(err, FlightSureError::NotRegistered(_)));
    }

    #[test]
    fn test_unknown_request() {
        let fx = fixture(None);
        let oracles = holders(&fx, 3, 1);
        let err = fx
            .aggregator
            .submit(oracles[0], 3, &flight(), 555, StatusCode::OnTime.as_u8())
            .unwrap_err();
        assert_eq!(
            err,
            FlightSureError::RequestClosedOrUnknown(RequestKey::derive(3, &flight(), 555))
        );
    }

    #[test]
    fn test_out_of_range_inputs() {
        let fx = fixture(None);
        let opened = fx.tracker.open_request(flight(), 100, Identity::from_label("passenger"));
        let oracles = holders(&fx, opened.index, 1);

        let bad_value = fx.aggregator.submit(oracles[0], opened.index, &flight(), 100, 15);
        assert!(matches!(bad_value, Err(FlightSureError::OutOfRange { what: "status code", .. })));

        let bad_index = fx.aggregator.submit(oracles[0], 10, &flight(), 100, 10);
        assert!(matches!(bad_index, Err(FlightSureError::OutOfRange { what: "oracle index", .. })));
    }

    #[test]
    fn test_duplicate_submission_rejected() {
        let fx = fixture(None);
        let opened = fx.tracker.open_request(flight(), 100, Identity::from_label("passenger"));
        let oracles = holders(&fx, opened.index, 1);
        let late = StatusCode::LateAirline.as_u8();

        fx.aggregator.submit(oracles[0], opened.index, &flight(), 100, late).unwrap();

        for value in [late, StatusCode::OnTime.as_u8()] {
            let err = fx
                .aggregator
                .submit(oracles[0], opened.index, &flight(), 100, value)
                .unwrap_err();
            assert_eq!(
                err,
                FlightSureError::DuplicateSubmission {
                    oracle: oracles[0],
                    key: opened.key
                }
            );
        }

        let snapshot = fx.tracker.get(&opened.key).unwrap();
        assert_eq!(snapshot.responses, vec![(StatusCode::LateAirline, vec![oracles[0]])]);
    }

    #[test]
    fn test_expired_request_rejects_reports() {
        let fx = fixture(Some(30));
        let opened =
            fx.tracker
                .open_request_at(flight(), 100, Identity::from_label("passenger"), 1_000);
        let oracles = holders(&fx, opened.index, 1);

        let ok = fx
            .aggregator
            .submit_at(oracles[0], opened.index, &flight(), 100, 10, 1_029);
        assert!(ok.is_ok());

        let late = fx
            .aggregator
            .submit_at(oracles[0], opened.index, &flight(), 100, 10, 1_030);
        assert_eq!(late, Err(FlightSureError::RequestClosedOrUnknown(opened.key)));
    }

    #[test]
    fn test_concurrent_submitters_finalize_once() {
        let fx = Arc::new(fixture(None));
        let opened = fx.tracker.open_request(flight(), 100, Identity::from_label("passenger"));
        let oracles = holders(&fx, opened.index, 12);

        let handles: Vec<_> = oracles
            .into_iter()
            .map(|oracle| {
                let fx = fx.clone();
                std::thread::spawn(move || {
                    fx.aggregator
                        .submit(oracle, opened.index, &flight(), 100, StatusCode::LateAirline.as_u8())
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let finalized = results
            .iter()
            .filter(|r| matches!(r, Ok(SubmissionOutcome::Finalized { .. })))
            .count();
        let rejected = results
            .iter()
            .filter(|r| matches!(r, Err(FlightSureError::RequestClosedOrUnknown(_))))
            .count();

        assert_eq!(finalized, 1);
        assert_eq!(rejected, 12 - 3);
        assert_eq!(fx.sink.calls.lock().len(), 1);
    }

    fn finalized_events(rx: &mut tokio::sync::broadcast::Receiver<OracleEvent>) -> usize {
        std::iter::from_fn(|| rx.try_recv().ok())
            .filter(|e| matches!(e, OracleEvent::StatusFinalized { .. }))
            .count()
    }

    #[test]
    fn test_reopen_open_window_resets_tallies() {
        let fx = colliding_fixture();
        let requester = Identity::from_label("passenger");
        let mut rx = fx.events.subscribe();
        let first = fx.tracker.open_request_at(flight(), 100, requester, 0);
        let oracles = holders(&fx, first.index, 3);
        let late = StatusCode::LateAirline.as_u8();

        fx.aggregator.submit_at(oracles[0], first.index, &flight(), 100, late, 1).unwrap();
        fx.aggregator.submit_at(oracles[1], first.index, &flight(), 100, late, 1).unwrap();

        let second = fx.tracker.open_request_at(flight(), 100, requester, 2);
        assert_eq!(second.key, first.key);
        let snapshot = fx.tracker.get(&second.key).unwrap();
        assert!(snapshot.is_open);
        assert!(snapshot.responses.is_empty());

        // Earlier reporters count again from zero; a third report alone is not enough.
        let outcome = fx
            .aggregator
            .submit_at(oracles[2], second.index, &flight(), 100, late, 3)
            .unwrap();
        assert_eq!(
            outcome,
            SubmissionOutcome::Recorded {
                status: StatusCode::LateAirline,
                tally: 1,
                required: 3
            }
        );
        fx.aggregator.submit_at(oracles[0], second.index, &flight(), 100, late, 3).unwrap();
        let done = fx
            .aggregator
            .submit_at(oracles[1], second.index, &flight(), 100, late, 3)
            .unwrap();
        assert!(done.is_finalized());

        assert_eq!(finalized_events(&mut rx), 1);
        assert_eq!(fx.sink.calls.lock().len(), 1);
    }

    #[test]
    fn test_reopen_finalized_window_finalizes_again() {
        let fx = colliding_fixture();
        let requester = Identity::from_label("passenger");
        let mut rx = fx.events.subscribe();
        let first = fx.tracker.open_request_at(flight(), 100, requester, 0);
        let oracles = holders(&fx, first.index, 3);
        let late = StatusCode::LateAirline.as_u8();

        for oracle in &oracles {
            fx.aggregator.submit_at(*oracle, first.index, &flight(), 100, late, 1).unwrap();
        }
        assert_eq!(fx.tracker.get(&first.key).unwrap().outcome(), Some(StatusCode::LateAirline));

        let second = fx.tracker.open_request_at(flight(), 100, requester, 2);
        assert_eq!(second.key, first.key);
        let snapshot = fx.tracker.get(&second.key).unwrap();
        assert!(snapshot.is_open);
        assert_eq!(snapshot.closed, None);
        assert!(snapshot.responses.is_empty());

        let on_time = StatusCode::OnTime.as_u8();
        for oracle in &oracles {
            fx.aggregator.submit_at(*oracle, second.index, &flight(), 100, on_time, 3).unwrap();
        }

        assert_eq!(fx.tracker.get(&second.key).unwrap().outcome(), Some(StatusCode::OnTime));
        assert_eq!(finalized_events(&mut rx), 2);
        let calls = fx.sink.calls.lock();
        assert_eq!(
            calls.as_slice(),
            &[
                (flight(), 100, StatusCode::LateAirline),
                (flight(), 100, StatusCode::OnTime)
            ]
        );
    }
}
