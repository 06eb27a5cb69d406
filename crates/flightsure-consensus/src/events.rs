//! Observable notifications
//!
//! Oracle simulators, front-ends and the node's metrics all follow consensus
//! through these events. Publishing never fails: an event with no subscriber
//! is simply dropped.

use flightsure_core::types::{FlightRef, Identity, OracleIndex, RequestKey, StatusCode, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Why a request window closed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// A status reached the response threshold
    Finalized(StatusCode),

    /// Withdrawn by its requester
    Cancelled,

    /// TTL elapsed without agreement
    Expired,
}

/// Events emitted by the consensus subsystem
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum OracleEvent {
    OracleRegistered {
        oracle: Identity,
        indexes: [OracleIndex; 3],
    },

    /// Oracles holding `index` should report on `flight`
    RequestOpened {
        index: OracleIndex,
        flight: FlightRef,
        timestamp: Timestamp,
        key: RequestKey,
        requester: Identity,
    },

    ReportReceived {
        oracle: Identity,
        index: OracleIndex,
        flight: FlightRef,
        timestamp: Timestamp,
        status: StatusCode,
    },

    /// Emitted at most once per request key
    StatusFinalized {
        key: RequestKey,
        flight: FlightRef,
        timestamp: Timestamp,
        status: StatusCode,
    },

    /// Window closed without a finalized status
    RequestClosed { key: RequestKey, reason: CloseReason },

    AirlineVoteRecorded {
        candidate: Identity,
        voter: Identity,
        votes: usize,
        required: usize,
    },

    AirlineAdmitted { candidate: Identity, votes: usize },
}

impl OracleEvent {
    /// Short name for logs and metric labels
    pub fn kind(&self) -> &'static str {
        match self {
            OracleEvent::OracleRegistered { .. } => "oracle_registered",
            OracleEvent::RequestOpened { .. } => "request_opened",
            OracleEvent::ReportReceived { .. } => "report_received",
            OracleEvent::StatusFinalized { .. } => "status_finalized",
            OracleEvent::RequestClosed { .. } => "request_closed",
            OracleEvent::AirlineVoteRecorded { .. } => "airline_vote_recorded",
            OracleEvent::AirlineAdmitted { .. } => "airline_admitted",
        }
    }
}

/// Broadcast fan-out shared by every component
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<OracleEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OracleEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: OracleEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(OracleEvent::AirlineAdmitted {
            candidate: Identity::new([1u8; 32]),
            votes: 1,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_receives_events() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        bus.publish(OracleEvent::RequestClosed {
            key: RequestKey::derive(1, &FlightRef::new(Identity::new([2u8; 32]), "X1"), 0),
            reason: CloseReason::Cancelled,
        });

        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind(), "request_closed");
    }
}
