//! Upload service facade: the contracts exposed upward to the UI/API
//! layer.
//!
//! One upload flows gate → oracle → classifier → aggregator. The facade
//! owns the wiring and event emission; each stage stays independently
//! testable.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use tipledger_core::{
    upload_safety, CacheStore, DocumentStore, DuplicateBlockRecord, Error, EventBus,
    ReanalysisKind, ReanalysisSession, RejectReason, Result, ServerEvent, SessionStore, Trip,
    TripStore, UploadOutcome,
};

use crate::aggregator::{TripAggregator, TripRef};
use crate::cache::{CacheStats, ComputationCache};
use crate::classifier::classify;
use crate::config::EngineConfig;
use crate::fingerprint::fingerprint;
use crate::gate::{DuplicateGate, GateDecision};
use crate::reanalysis::ReanalysisEngine;
use crate::recognize::RecognitionOracle;

/// The reconciliation engine facade.
pub struct UploadService {
    documents: Arc<dyn DocumentStore>,
    oracle: Arc<dyn RecognitionOracle>,
    gate: DuplicateGate,
    aggregator: TripAggregator,
    reanalysis: ReanalysisEngine,
    cache: ComputationCache,
    events: EventBus,
}

impl UploadService {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        trips: Arc<dyn TripStore>,
        cache_store: Arc<dyn CacheStore>,
        sessions: Arc<dyn SessionStore>,
        oracle: Arc<dyn RecognitionOracle>,
        config: EngineConfig,
    ) -> Self {
        let events = EventBus::default();
        let cache = ComputationCache::with_budget(cache_store, config.compute_budget);
        let gate = DuplicateGate::new(documents.clone(), config.gate.clone());
        let aggregator = TripAggregator::with_epsilon(
            trips.clone(),
            cache.clone(),
            events.clone(),
            config.variance_epsilon,
        );
        let reanalysis = ReanalysisEngine::with_ttl(
            trips,
            sessions,
            cache.clone(),
            events.clone(),
            config.cache_ttl_secs,
        );
        Self {
            documents,
            oracle,
            gate,
            aggregator,
            reanalysis,
            cache,
            events,
        }
    }

    /// Submit one uploaded screenshot.
    ///
    /// `trip_ref` is the external correlation key: the trip id returned by
    /// a previous accepted upload for the same logical trip. None opens a
    /// new trip for a merge-worthy document.
    ///
    /// A duplicate rejection is a *normal outcome*, not an error. A failed
    /// oracle call is an error (`RecognitionUnavailable`): the admitted
    /// document stays pending and the caller retries via
    /// [`retry_recognition`](Self::retry_recognition).
    pub async fn submit_upload(
        &self,
        bytes: &[u8],
        filename: &str,
        trip_ref: Option<Uuid>,
    ) -> Result<UploadOutcome> {
        let filename = upload_safety::sanitize_filename(filename);

        let validation = upload_safety::validate_upload(bytes);
        if !validation.allowed {
            warn!(
                subsystem = "gate",
                op = "submit_upload",
                filename = %filename,
                error = validation.block_reason.as_deref().unwrap_or("blocked"),
                "upload failed safety validation"
            );
            self.events.emit(ServerEvent::UploadRejected {
                reason: RejectReason::InvalidUpload,
                matched_document_id: None,
            });
            return Ok(UploadOutcome::Rejected {
                reason: RejectReason::InvalidUpload,
                matched_document_id: None,
            });
        }

        let doc = match self.gate.admit(bytes, &filename).await? {
            GateDecision::Admitted(doc) => doc,
            GateDecision::Rejected {
                reason,
                matched_document_id,
            } => {
                self.events.emit(ServerEvent::UploadRejected {
                    reason,
                    matched_document_id,
                });
                return Ok(UploadOutcome::Rejected {
                    reason,
                    matched_document_id,
                });
            }
        };
        self.events
            .emit(ServerEvent::UploadAccepted { document_id: doc.id });

        self.recognize_and_attach(doc, bytes, trip_ref).await
    }

    /// Retry recognition for a document the gate already admitted but
    /// whose oracle call failed. Skips the duplicate gate: the document
    /// already owns its exact hash. The resubmitted bytes must hash to
    /// that recorded identity, so a retry can never smuggle different
    /// content under an admitted document's audit record.
    pub async fn retry_recognition(
        &self,
        document_id: Uuid,
        bytes: &[u8],
        trip_ref: Option<Uuid>,
    ) -> Result<UploadOutcome> {
        let doc = self.documents.fetch(document_id).await?;
        if doc.status != tipledger_core::DocumentStatus::Pending {
            return Err(Error::InvalidInput(format!(
                "document {} is not pending",
                document_id
            )));
        }

        let fp = fingerprint(bytes)?;
        if fp.exact_hash != doc.exact_hash {
            warn!(
                subsystem = "gate",
                op = "retry_recognition",
                document_id = %document_id,
                "resubmitted bytes do not match the recorded content hash"
            );
            return Err(Error::InvalidInput(format!(
                "resubmitted bytes do not match the content hash of document {}",
                document_id
            )));
        }

        self.recognize_and_attach(doc, bytes, trip_ref).await
    }

    async fn recognize_and_attach(
        &self,
        mut doc: tipledger_core::UploadedDocument,
        bytes: &[u8],
        trip_ref: Option<Uuid>,
    ) -> Result<UploadOutcome> {
        // Bounded oracle call; on failure the document stays pending and
        // the error is retryable. No internal busy-retry.
        doc.fields = self.oracle.recognize(bytes).await?;

        let classification = classify(&doc.fields);
        doc.kind = Some(classification.kind);

        if classification.is_ambiguous() {
            self.documents
                .mark_classified(doc.id, classification.kind, &doc.fields)
                .await?;
            self.events.emit(ServerEvent::DocumentClassified {
                document_id: doc.id,
                kind: classification.kind,
                trip_id: None,
            });
            info!(
                subsystem = "classifier",
                op = "submit_upload",
                document_id = %doc.id,
                doc_kind = classification.kind.as_str(),
                confidence = classification.confidence,
                "ambiguous classification; routed to manual review"
            );
            return Ok(UploadOutcome::NeedsReview {
                document_id: doc.id,
                kind: classification.kind,
                confidence: classification.confidence,
            });
        }

        // Claim the document before merging anything: the status
        // check-and-set means only one caller ever reaches the attach, so
        // a document can never be merged into two trips.
        self.documents
            .mark_classified(doc.id, classification.kind, &doc.fields)
            .await?;

        let trip_ref = match trip_ref {
            Some(id) => TripRef::Existing(id),
            None => TripRef::New,
        };
        let attach = self.aggregator.attach(trip_ref, &doc, &classification).await?;
        self.documents.assign_trip(doc.id, attach.trip_id).await?;

        self.events.emit(ServerEvent::DocumentClassified {
            document_id: doc.id,
            kind: classification.kind,
            trip_id: Some(attach.trip_id),
        });

        Ok(UploadOutcome::Accepted {
            document_id: doc.id,
            trip_id: attach.trip_id,
            kind: classification.kind,
            trip_state: attach.state,
        })
    }

    /// Trip snapshot including state, variance, and provenance.
    pub async fn get_trip(&self, trip_id: Uuid) -> Result<Trip> {
        self.aggregator.get_trip(trip_id).await
    }

    /// Run (or reuse) an aggregate analysis over a time range.
    pub async fn request_analysis(
        &self,
        kind: ReanalysisKind,
        range_start: DateTime<Utc>,
        range_end: DateTime<Utc>,
    ) -> Result<ReanalysisSession> {
        self.reanalysis.analyze(kind, range_start, range_end).await
    }

    /// Past analysis sessions, newest first (append-only audit log).
    pub async fn analysis_history(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ReanalysisSession>> {
        self.reanalysis.history(start, end).await
    }

    /// Block records that matched against a given document (audit).
    pub async fn duplicate_blocks_for(
        &self,
        matched_document_id: Uuid,
    ) -> Result<Vec<DuplicateBlockRecord>> {
        self.documents.list_blocks_for(matched_document_id).await
    }

    /// Block records in a time range (threshold tuning).
    pub async fn duplicate_blocks_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DuplicateBlockRecord>> {
        self.documents.list_blocks_in_range(start, end).await
    }

    /// Cache hit/miss/coalescing counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Handle to the engine's event bus.
    pub fn events(&self) -> EventBus {
        self.events.clone()
    }
}
