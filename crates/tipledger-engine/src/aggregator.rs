//! Trip aggregation: merging classified documents into evolving trip
//! records and driving the completeness state machine.
//!
//! States move only forward: `incomplete → partial → complete`, recomputed
//! as the maximum of the current state and the state implied by the full
//! document set. "Complete" is a high-water mark, not a hard lock; a late
//! settlement document can still strictly improve a trip.
//!
//! All mutations to a given trip are serialized through a per-trip async
//! mutex; documents for different trips proceed in parallel. Last-writer-
//! wins merge order is therefore the order writers acquire the lock (the
//! observed arrival order), not the upload timestamp. Network delay can
//! reorder near-simultaneous uploads; this is an accepted, documented
//! approximation.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use tipledger_core::{
    defaults, EventBus, MergedField, Result, ServerEvent, Trip, TripState, TripStore,
    UploadedDocument,
};

use crate::cache::ComputationCache;
use crate::classifier::{parse_miles, parse_money, Classification};
use crate::variance::{compute_metrics, compute_variance};

/// Cache scope prefix for per-trip derived insights.
pub fn trip_insight_scope(trip_id: Uuid) -> String {
    format!("trip-insights:{}", trip_id)
}

/// Where to attach an incoming document.
#[derive(Debug, Clone, Copy)]
pub enum TripRef {
    /// Correlation key supplied by the upstream caller.
    Existing(Uuid),
    /// No open trip for this document; open a new one.
    New,
}

/// Result of attaching one document to a trip.
#[derive(Debug, Clone)]
pub struct AttachOutcome {
    pub trip_id: Uuid,
    pub previous_state: TripState,
    pub state: TripState,
    /// True on the transition into `Complete` (first time or re-improved).
    pub completed_now: bool,
    pub needs_review: bool,
}

/// The trip aggregator.
pub struct TripAggregator {
    trips: Arc<dyn TripStore>,
    cache: ComputationCache,
    events: EventBus,
    variance_epsilon: f64,
    locks: tokio::sync::Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl TripAggregator {
    pub fn new(trips: Arc<dyn TripStore>, cache: ComputationCache, events: EventBus) -> Self {
        let variance_epsilon = std::env::var("TIPLEDGER_VARIANCE_EPSILON")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(defaults::VARIANCE_EPSILON);
        Self::with_epsilon(trips, cache, events, variance_epsilon)
    }

    pub fn with_epsilon(
        trips: Arc<dyn TripStore>,
        cache: ComputationCache,
        events: EventBus,
        variance_epsilon: f64,
    ) -> Self {
        Self {
            trips,
            cache,
            events,
            variance_epsilon,
            locks: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// The serialization point: one mutex per trip id.
    async fn trip_lock(&self, trip_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(trip_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop a trip's lock entry once no writer holds or awaits it, so the
    /// map does not grow with every trip ever touched.
    async fn release_trip_lock(&self, trip_id: Uuid) {
        let mut locks = self.locks.lock().await;
        if let Some(lock) = locks.get(&trip_id) {
            // Strong count 1 means the map holds the only reference.
            if Arc::strong_count(lock) == 1 {
                locks.remove(&trip_id);
            }
        }
    }

    /// Fetch a trip snapshot.
    pub async fn get_trip(&self, trip_id: Uuid) -> Result<Trip> {
        self.trips.fetch(trip_id).await
    }

    /// Merge a newly classified document into its trip.
    ///
    /// Serialized per trip id. On the transition into `Complete` the
    /// variance calculator runs synchronously and cache entries derived
    /// from this trip are invalidated.
    pub async fn attach(
        &self,
        trip_ref: TripRef,
        doc: &UploadedDocument,
        classification: &Classification,
    ) -> Result<AttachOutcome> {
        let trip_id = match trip_ref {
            TripRef::Existing(id) => id,
            TripRef::New => {
                let trip = Trip::new(Uuid::now_v7(), Utc::now());
                self.trips.insert(&trip).await?;
                trip.id
            }
        };

        let lock = self.trip_lock(trip_id).await;
        let guard = lock.lock().await;
        let outcome = self.attach_locked(trip_id, doc, classification).await;
        drop(guard);
        drop(lock);
        self.release_trip_lock(trip_id).await;
        outcome
    }

    /// The body of [`attach`](Self::attach); the caller holds the per-trip
    /// lock.
    async fn attach_locked(
        &self,
        trip_id: Uuid,
        doc: &UploadedDocument,
        classification: &Classification,
    ) -> Result<AttachOutcome> {
        let mut trip = self.trips.fetch(trip_id).await?;
        let previous_state = trip.state;
        let was_flagged = trip.needs_review;

        // Conflicting authoritative settlements: both documents are
        // retained with provenance and the trip is flagged for manual
        // reconciliation. Variance refuses to run on conflicting inputs.
        if classification.kind.is_settlement_bearing() {
            if let Some(conflict) = self.settlement_conflict(&trip, doc) {
                warn!(
                    subsystem = "aggregator",
                    op = "attach",
                    trip_id = %trip.id,
                    document_id = %doc.id,
                    prior_document_id = %conflict,
                    "conflicting settlement documents; flagging for review"
                );
                trip.needs_review = true;
            }
        }

        merge_fields(&mut trip, doc);
        if !trip.document_ids.contains(&doc.id) {
            trip.document_ids.push(doc.id);
        }

        // State implied by the full merged document set; only ever moves
        // forward.
        let implied = implied_state(&trip);
        trip.state = trip.state.max(implied);

        trip.estimate_amount = merged_amount(&trip.fields, defaults::ESTIMATE_FIELDS);
        trip.settlement_amount = merged_amount(&trip.fields, defaults::SETTLEMENT_FIELDS);

        let completed_now = trip.state == TripState::Complete
            && (previous_state < TripState::Complete || trip.variance.is_none());

        if trip.state == TripState::Complete && !trip.needs_review {
            trip.variance = compute_variance(
                trip.estimate_amount,
                trip.settlement_amount,
                self.variance_epsilon,
            );
            let miles = merged_miles(&trip.fields);
            trip.metrics = compute_metrics(&trip, miles);
        } else if trip.needs_review {
            // Conflicting inputs: no guessing.
            trip.variance = None;
            trip.metrics = None;
        }

        trip.version += 1;
        trip.updated_at = Utc::now();
        self.trips.update(&trip).await?;

        // Any change to the trip's data invalidates insights derived from
        // it. Versioned keys handle most cases by construction; the
        // explicit scope sweep covers TTL-keyed entries.
        self.cache
            .invalidate_scope(&trip_insight_scope(trip.id))
            .await?;

        if trip.state != previous_state {
            info!(
                subsystem = "aggregator",
                op = "attach",
                trip_id = %trip.id,
                document_id = %doc.id,
                trip_state = trip.state.as_str(),
                "trip state advanced"
            );
            self.events.emit(ServerEvent::TripStateChanged {
                trip_id: trip.id,
                from: previous_state,
                to: trip.state,
            });
        }
        if trip.needs_review && !was_flagged {
            self.events
                .emit(ServerEvent::TripNeedsReview { trip_id: trip.id });
        }

        Ok(AttachOutcome {
            trip_id: trip.id,
            previous_state,
            state: trip.state,
            completed_now,
            needs_review: trip.needs_review,
        })
    }

    /// A settlement conflict exists when the trip already carries a
    /// settlement field from a *different* document whose parsed amount
    /// disagrees with the incoming one.
    fn settlement_conflict(&self, trip: &Trip, doc: &UploadedDocument) -> Option<Uuid> {
        let incoming = crate::classifier::settlement_amount(&doc.fields)?;
        for name in defaults::SETTLEMENT_FIELDS {
            if let Some(existing) = trip.fields.get(*name) {
                if existing.source_document_id == doc.id {
                    continue;
                }
                if let Some(prior) = parse_money(&existing.value) {
                    if (prior - incoming).abs() > f64::EPSILON {
                        return Some(existing.source_document_id);
                    }
                }
            }
        }
        None
    }
}

/// Last-writer-wins per field name, keeping source provenance. Fields
/// below the confidence floor never enter the merged set.
fn merge_fields(trip: &mut Trip, doc: &UploadedDocument) {
    for (name, field) in &doc.fields {
        if field.confidence < defaults::FIELD_CONFIDENCE_FLOOR {
            continue;
        }
        trip.fields.insert(
            name.clone(),
            MergedField {
                value: field.value.clone(),
                confidence: field.confidence,
                source_document_id: doc.id,
            },
        );
    }
}

/// State implied by which field families the merged set carries.
fn implied_state(trip: &Trip) -> TripState {
    let has_estimate = has_merged(&trip.fields, defaults::ESTIMATE_FIELDS);
    let has_settlement = has_merged(&trip.fields, defaults::SETTLEMENT_FIELDS);
    match (has_estimate, has_settlement) {
        (true, true) => TripState::Complete,
        (true, false) | (false, true) => TripState::Partial,
        (false, false) => TripState::Incomplete,
    }
}

fn has_merged(fields: &HashMap<String, MergedField>, names: &[&str]) -> bool {
    names.iter().any(|n| fields.contains_key(*n))
}

fn merged_amount(fields: &HashMap<String, MergedField>, names: &[&str]) -> Option<f64> {
    names
        .iter()
        .filter_map(|n| fields.get(*n))
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        .and_then(|f| parse_money(&f.value))
}

fn merged_miles(fields: &HashMap<String, MergedField>) -> Option<f64> {
    names_first(fields, defaults::ODOMETER_FIELDS).and_then(|f| parse_miles(&f.value))
}

fn names_first<'a>(
    fields: &'a HashMap<String, MergedField>,
    names: &[&str],
) -> Option<&'a MergedField> {
    names
        .iter()
        .filter_map(|n| fields.get(*n))
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}
