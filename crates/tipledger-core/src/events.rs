//! Server event types and event bus for downstream notifications.
//!
//! The engine emits events on a single broadcast channel; downstream
//! consumers (SSE, webhooks, telemetry, all outside this repo) subscribe
//! independently. Emission never blocks: with no active subscribers the
//! event is silently dropped.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::{DocumentKind, RejectReason, TripState};

/// Events emitted by the reconciliation engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// An upload passed the duplicate gate.
    UploadAccepted { document_id: Uuid },
    /// An upload was blocked by the duplicate gate.
    UploadRejected {
        reason: RejectReason,
        matched_document_id: Option<Uuid>,
    },
    /// A document was classified and attached to a trip.
    DocumentClassified {
        document_id: Uuid,
        kind: DocumentKind,
        trip_id: Option<Uuid>,
    },
    /// A trip's completeness state moved forward.
    TripStateChanged {
        trip_id: Uuid,
        from: TripState,
        to: TripState,
    },
    /// Conflicting settlement documents were retained; manual
    /// reconciliation required.
    TripNeedsReview { trip_id: Uuid },
    /// An aggregate analysis session was recorded.
    AnalysisCompleted {
        session_id: Uuid,
        cache_hit: bool,
    },
}

impl ServerEvent {
    /// Stable event type string for logging and routing.
    pub fn event_type(&self) -> &'static str {
        match self {
            ServerEvent::UploadAccepted { .. } => "upload_accepted",
            ServerEvent::UploadRejected { .. } => "upload_rejected",
            ServerEvent::DocumentClassified { .. } => "document_classified",
            ServerEvent::TripStateChanged { .. } => "trip_state_changed",
            ServerEvent::TripNeedsReview { .. } => "trip_needs_review",
            ServerEvent::AnalysisCompleted { .. } => "analysis_completed",
        }
    }
}

/// Broadcast event bus shared by the engine and its consumers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ServerEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    ///
    /// Recommended: 256 for production, 32 for tests.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: ServerEvent) {
        let subscriber_count = self.tx.receiver_count();
        tracing::debug!(
            event_type = %event.event_type(),
            subscriber_count,
            "EventBus emit"
        );
        let _ = self.tx.send(event);
    }

    /// Subscribe to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    /// Number of active subscribers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_and_receive() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();

        let trip_id = Uuid::new_v4();
        bus.emit(ServerEvent::TripStateChanged {
            trip_id,
            from: TripState::Partial,
            to: TripState::Complete,
        });

        match rx.recv().await.unwrap() {
            ServerEvent::TripStateChanged { trip_id: id, to, .. } => {
                assert_eq!(id, trip_id);
                assert_eq!(to, TripState::Complete);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.emit(ServerEvent::UploadAccepted {
            document_id: Uuid::new_v4(),
        });
        assert_eq!(bus.receiver_count(), 0);
    }

    #[test]
    fn test_event_type_strings() {
        let e = ServerEvent::AnalysisCompleted {
            session_id: Uuid::new_v4(),
            cache_hit: true,
        };
        assert_eq!(e.event_type(), "analysis_completed");
    }
}
