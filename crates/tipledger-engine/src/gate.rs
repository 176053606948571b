//! Duplicate gate: accept or reject an upload before any expensive
//! extraction is attempted.
//!
//! Ordered decision rules, first match wins:
//! 1. exact-hash collision against any non-rejected document
//! 2. similarity-hash collision with byte size inside a relative tolerance
//! 3. same filename + byte size within the resubmit window
//! 4. otherwise accept
//!
//! Every rejection persists the rejected document and a
//! [`DuplicateBlockRecord`] before returning. Admission itself is an atomic
//! unique-insert on the exact hash, so two concurrent uploads of
//! byte-identical content cannot both be admitted: the loser of the race is
//! rejected, not given a second trip.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use tipledger_core::{
    defaults, AdmitInsert, DocumentStatus, DocumentStore, DuplicateBlockRecord,
    DuplicateMatchMethod, RejectReason, Result, UploadedDocument,
};

use crate::fingerprint::{fingerprint, Fingerprint};

/// Tunables for the gate's heuristic rules.
///
/// The source system never justified these figures rigorously; both are
/// env-tunable with documented defaults.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Relative byte-size tolerance for near-duplicates, in percent.
    pub near_dup_tolerance_pct: f64,
    /// Window for the filename+size rapid-resubmit heuristic.
    pub resubmit_window: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            near_dup_tolerance_pct: defaults::NEAR_DUP_TOLERANCE_PCT,
            resubmit_window: Duration::seconds(defaults::RESUBMIT_WINDOW_SECS),
        }
    }
}

impl GateConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TIPLEDGER_NEAR_DUP_TOLERANCE_PCT` | `2.0` | Near-duplicate size band |
    /// | `TIPLEDGER_RESUBMIT_WINDOW_SECS` | `300` | Rapid-resubmit window |
    pub fn from_env() -> Self {
        let near_dup_tolerance_pct = std::env::var("TIPLEDGER_NEAR_DUP_TOLERANCE_PCT")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(defaults::NEAR_DUP_TOLERANCE_PCT);

        let resubmit_window_secs = std::env::var("TIPLEDGER_RESUBMIT_WINDOW_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults::RESUBMIT_WINDOW_SECS);

        Self {
            near_dup_tolerance_pct,
            resubmit_window: Duration::seconds(resubmit_window_secs),
        }
    }
}

/// Outcome of the gate.
#[derive(Debug, Clone)]
pub enum GateDecision {
    /// The upload was admitted; the document is persisted in `Pending`
    /// status and owns its exact hash.
    Admitted(UploadedDocument),
    /// The upload was blocked. For duplicate rules the rejected document
    /// and its block record are already persisted.
    Rejected {
        reason: RejectReason,
        matched_document_id: Option<Uuid>,
    },
}

/// The duplicate gate.
pub struct DuplicateGate {
    store: Arc<dyn DocumentStore>,
    config: GateConfig,
}

impl DuplicateGate {
    pub fn new(store: Arc<dyn DocumentStore>, config: GateConfig) -> Self {
        Self { store, config }
    }

    /// Run the ordered decision rules on one upload.
    ///
    /// A fingerprinting failure fails **closed**: the upload is rejected
    /// with the retryable `fingerprint-unavailable` reason rather than
    /// risking admission of an unhashed, unverifiable duplicate. Nothing is
    /// persisted in that case; the caller retries with the same bytes.
    pub async fn admit(&self, bytes: &[u8], filename: &str) -> Result<GateDecision> {
        let fp = match fingerprint(bytes) {
            Ok(fp) => fp,
            Err(e) => {
                warn!(
                    subsystem = "gate",
                    op = "admit",
                    error = %e,
                    "fingerprinting failed; failing closed"
                );
                return Ok(GateDecision::Rejected {
                    reason: RejectReason::FingerprintUnavailable,
                    matched_document_id: None,
                });
            }
        };

        // Rule 1 fast path: a known exact hash never reaches the heuristics.
        if let Some(prior) = self.store.find_by_exact_hash(&fp.exact_hash).await? {
            return self
                .reject(&fp, filename, prior.id, DuplicateMatchMethod::ExactHash)
                .await;
        }

        // Rule 2: similarity collision inside the byte-size tolerance band.
        // Advisory hash, so the size check is what stops false positives
        // from silently discarding data.
        for candidate in self.store.find_by_similarity_hash(&fp.similarity_hash).await? {
            if self.within_size_tolerance(fp.byte_size, candidate.byte_size) {
                return self
                    .reject(&fp, filename, candidate.id, DuplicateMatchMethod::SimilarityHash)
                    .await;
            }
        }

        // Rule 3: same name + size resubmitted within the window.
        let since = Utc::now() - self.config.resubmit_window;
        if let Some(prior) = self
            .store
            .find_recent_by_name_size(filename, fp.byte_size, since)
            .await?
        {
            return self
                .reject(&fp, filename, prior.id, DuplicateMatchMethod::RapidResubmit)
                .await;
        }

        // Rule 4: accept. The insert enforces exact-hash uniqueness; losing
        // the check-and-insert race downgrades to an exact-duplicate
        // rejection.
        let doc = UploadedDocument {
            id: Uuid::now_v7(),
            exact_hash: fp.exact_hash.clone(),
            similarity_hash: fp.similarity_hash.clone(),
            byte_size: fp.byte_size,
            filename: filename.to_string(),
            uploaded_at: Utc::now(),
            kind: None,
            fields: Default::default(),
            status: DocumentStatus::Pending,
            duplicate_of: None,
            trip_id: None,
        };

        match self.store.insert_admitted(&doc).await? {
            AdmitInsert::Inserted => {
                info!(
                    subsystem = "gate",
                    op = "admit",
                    document_id = %doc.id,
                    exact_hash = %doc.exact_hash,
                    byte_size = doc.byte_size,
                    gate_rule = "accepted",
                    "upload admitted"
                );
                Ok(GateDecision::Admitted(doc))
            }
            AdmitInsert::DuplicateHash(winner) => {
                debug!(
                    subsystem = "gate",
                    op = "admit",
                    exact_hash = %fp.exact_hash,
                    matched = %winner,
                    "lost admission race; rejecting as exact duplicate"
                );
                self.reject(&fp, filename, winner, DuplicateMatchMethod::ExactHash)
                    .await
            }
        }
    }

    fn within_size_tolerance(&self, a: i64, b: i64) -> bool {
        let larger = a.max(b) as f64;
        if larger == 0.0 {
            return true;
        }
        let diff = (a - b).abs() as f64;
        diff / larger * 100.0 <= self.config.near_dup_tolerance_pct
    }

    /// Persist the rejected document and its block record, then return the
    /// structured rejection.
    async fn reject(
        &self,
        fp: &Fingerprint,
        filename: &str,
        matched: Uuid,
        method: DuplicateMatchMethod,
    ) -> Result<GateDecision> {
        let reason = match method {
            DuplicateMatchMethod::ExactHash => RejectReason::ExactDuplicate,
            DuplicateMatchMethod::SimilarityHash => RejectReason::NearDuplicate,
            DuplicateMatchMethod::RapidResubmit => RejectReason::RapidResubmit,
        };

        let doc = UploadedDocument {
            id: Uuid::now_v7(),
            exact_hash: fp.exact_hash.clone(),
            similarity_hash: fp.similarity_hash.clone(),
            byte_size: fp.byte_size,
            filename: filename.to_string(),
            uploaded_at: Utc::now(),
            kind: None,
            fields: Default::default(),
            status: DocumentStatus::RejectedDuplicate,
            duplicate_of: Some(matched),
            trip_id: None,
        };

        let block = DuplicateBlockRecord {
            id: Uuid::now_v7(),
            document_id: doc.id,
            matched_document_id: matched,
            method,
            reason: reason.as_str().to_string(),
            created_at: Utc::now(),
        };

        self.store.insert_rejected(&doc, &block).await?;

        info!(
            subsystem = "gate",
            op = "admit",
            document_id = %doc.id,
            matched = %matched,
            gate_rule = method.as_str(),
            "upload rejected"
        );

        Ok(GateDecision::Rejected {
            reason,
            matched_document_id: Some(matched),
        })
    }
}
