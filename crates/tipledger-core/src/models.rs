//! Domain models for tipledger.
//!
//! The aggregate unit is the [`Trip`]; one or more [`UploadedDocument`]s
//! contribute fragments of a trip's financial record. Status and kind enums
//! carry `as_str`/`parse_str` pairs for the database layer.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// =============================================================================
// UPLOADED DOCUMENTS
// =============================================================================

/// Processing status of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Admitted but not yet classified (oracle call pending or retryable).
    Pending,
    /// Classified and attached to a trip (or routed to manual review).
    Classified,
    /// Blocked by the duplicate gate; linked to the original it collided with.
    RejectedDuplicate,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Classified => "classified",
            DocumentStatus::RejectedDuplicate => "rejected_duplicate",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "classified" => Some(DocumentStatus::Classified),
            "rejected_duplicate" => Some(DocumentStatus::RejectedDuplicate),
            _ => None,
        }
    }
}

/// Document type assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Pre-trip offer with an estimated payout, no settlement fields.
    OfferEstimate,
    /// Post-trip settlement with actual earnings.
    FinalSettlement,
    /// Mileage-only capture with no monetary fields.
    OdometerReading,
    /// Field set matched no rule; routed to manual review.
    Unclassified,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::OfferEstimate => "offer_estimate",
            DocumentKind::FinalSettlement => "final_settlement",
            DocumentKind::OdometerReading => "odometer_reading",
            DocumentKind::Unclassified => "unclassified",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "offer_estimate" => Some(DocumentKind::OfferEstimate),
            "final_settlement" => Some(DocumentKind::FinalSettlement),
            "odometer_reading" => Some(DocumentKind::OdometerReading),
            "unclassified" => Some(DocumentKind::Unclassified),
            _ => None,
        }
    }

    /// Whether a document of this kind carries an estimate amount.
    pub fn is_estimate_bearing(&self) -> bool {
        matches!(self, DocumentKind::OfferEstimate)
    }

    /// Whether a document of this kind carries a settlement amount.
    pub fn is_settlement_bearing(&self) -> bool {
        matches!(self, DocumentKind::FinalSettlement)
    }
}

/// One candidate field reported by the recognition oracle.
///
/// The oracle is an unreliable collaborator: a missing or low-confidence
/// field is treated as absence, never as a typed zero or empty string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateField {
    /// Raw extracted value (e.g. "$18.50", "12.4 mi").
    pub value: String,
    /// Oracle-reported confidence in [0.0, 1.0].
    pub confidence: f32,
}

impl CandidateField {
    pub fn new(value: impl Into<String>, confidence: f32) -> Self {
        Self {
            value: value.into(),
            confidence,
        }
    }
}

/// Field map returned by the recognition oracle for one image.
pub type CandidateFields = HashMap<String, CandidateField>;

/// One ingested screenshot and its extracted candidate fields.
///
/// Append-only audit trail: documents are never deleted. A rejected
/// duplicate is marked and linked to the original it collided with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedDocument {
    pub id: Uuid,
    /// Cryptographic digest of the full byte content (hex).
    pub exact_hash: String,
    /// Coarse, lossy digest for catching re-encoded re-uploads. Advisory.
    pub similarity_hash: String,
    pub byte_size: i64,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
    /// None until the classifier has run.
    pub kind: Option<DocumentKind>,
    /// Raw candidate fields from the oracle; empty until recognition ran.
    pub fields: CandidateFields,
    pub status: DocumentStatus,
    /// For rejected duplicates: the document this one collided with.
    pub duplicate_of: Option<Uuid>,
    /// The trip this document contributes to, if attached.
    pub trip_id: Option<Uuid>,
}

/// Lightweight projection used by the duplicate gate's similarity checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub exact_hash: String,
    pub similarity_hash: String,
    pub byte_size: i64,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
}

// =============================================================================
// DUPLICATE BLOCKING
// =============================================================================

/// How a rejected upload matched a prior document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateMatchMethod {
    /// Byte-identical content (exact hash collision).
    ExactHash,
    /// Similarity hash collision with byte size inside tolerance.
    SimilarityHash,
    /// Same filename + size within the resubmit window.
    RapidResubmit,
}

impl DuplicateMatchMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateMatchMethod::ExactHash => "exact_hash",
            DuplicateMatchMethod::SimilarityHash => "similarity_hash",
            DuplicateMatchMethod::RapidResubmit => "rapid_resubmit",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "exact_hash" => Some(DuplicateMatchMethod::ExactHash),
            "similarity_hash" => Some(DuplicateMatchMethod::SimilarityHash),
            "rapid_resubmit" => Some(DuplicateMatchMethod::RapidResubmit),
            _ => None,
        }
    }
}

/// Immutable audit record of a rejected upload.
///
/// Used for audit and threshold tuning, never for ranking trips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateBlockRecord {
    pub id: Uuid,
    /// The rejected document.
    pub document_id: Uuid,
    /// The prior document it matched.
    pub matched_document_id: Uuid,
    pub method: DuplicateMatchMethod,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Reason an upload was rejected at the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RejectReason {
    ExactDuplicate,
    NearDuplicate,
    RapidResubmit,
    /// Fingerprinting failed; the gate fails closed. Retryable.
    FingerprintUnavailable,
    /// Upload safety validation failed (not an image, oversized, ...).
    InvalidUpload,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::ExactDuplicate => "exact-duplicate",
            RejectReason::NearDuplicate => "near-duplicate",
            RejectReason::RapidResubmit => "rapid-resubmit",
            RejectReason::FingerprintUnavailable => "fingerprint-unavailable",
            RejectReason::InvalidUpload => "invalid-upload",
        }
    }

    /// Retryable rejections are transient; the caller may resubmit.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RejectReason::FingerprintUnavailable)
    }
}

// =============================================================================
// TRIPS
// =============================================================================

/// Completeness state of a trip.
///
/// Ordered: `Incomplete < Partial < Complete`. The aggregator only ever
/// moves state forward (monotone high-water mark); an operator-visible
/// degrade requires an explicit corrective action outside this engine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TripState {
    /// No documents, or only ambiguous/unclassified ones.
    Incomplete,
    /// Exactly one of {estimate-bearing, settlement-bearing} present.
    Partial,
    /// Both an estimate and a settlement document present.
    Complete,
}

impl TripState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripState::Incomplete => "incomplete",
            TripState::Partial => "partial",
            TripState::Complete => "complete",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "incomplete" => Some(TripState::Incomplete),
            "partial" => Some(TripState::Partial),
            "complete" => Some(TripState::Complete),
            _ => None,
        }
    }
}

/// A merged field value with source provenance.
///
/// Last-writer-wins per field name, in the order writers acquired the
/// per-trip lock; the source document id is retained so any value can be
/// traced back to the screenshot it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedField {
    pub value: String,
    pub confidence: f32,
    pub source_document_id: Uuid,
}

/// Accuracy classification of the estimate against the settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceAccuracy {
    /// |variance| within the absolute epsilon.
    Exact,
    /// Settlement exceeded the estimate by more than epsilon.
    Over,
    /// Settlement fell short of the estimate by more than epsilon.
    Under,
}

impl VarianceAccuracy {
    pub fn as_str(&self) -> &'static str {
        match self {
            VarianceAccuracy::Exact => "exact",
            VarianceAccuracy::Over => "over",
            VarianceAccuracy::Under => "under",
        }
    }
}

/// Settlement minus estimate, classified against a fixed tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TipVariance {
    /// Dollars; positive means the trip paid more than estimated.
    pub variance: f64,
    pub accuracy: VarianceAccuracy,
}

/// Derived profit/efficiency metrics, computable once a trip completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripMetrics {
    /// Actual earnings (the settlement amount).
    pub total_earned: f64,
    /// Earnings per mile, when an odometer/mileage field was captured.
    pub earnings_per_mile: Option<f64>,
    /// Settlement as a percentage of the estimate.
    pub estimate_accuracy_pct: f64,
}

/// The aggregate financial unit one or more documents contribute to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    /// Contributing documents in observed merge order.
    pub document_ids: Vec<Uuid>,
    pub state: TripState,
    /// Merged field set, last-writer-wins with provenance.
    pub fields: HashMap<String, MergedField>,
    pub estimate_amount: Option<f64>,
    pub settlement_amount: Option<f64>,
    pub metrics: Option<TripMetrics>,
    pub variance: Option<TipVariance>,
    /// Set when conflicting settlement documents were retained; variance
    /// refuses to run until an operator reconciles the trip.
    pub needs_review: bool,
    /// Bumped on every mutation; cache keys over trip data include it.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Trip {
    /// A fresh, empty trip in the initial state.
    pub fn new(id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id,
            document_ids: Vec::new(),
            state: TripState::Incomplete,
            fields: HashMap::new(),
            estimate_amount: None,
            settlement_amount: None,
            metrics: None,
            variance: None,
            needs_review: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

// =============================================================================
// COMPUTATION CACHE
// =============================================================================

/// One content-addressed cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Deterministic hash of operation name + canonical input serialization.
    pub key: String,
    /// Serialized result.
    pub value: JsonValue,
    /// Wall-clock cost of the computation that produced the value.
    pub compute_ms: i64,
    pub created_at: DateTime<Utc>,
    /// TTL for computations whose inputs are not fully capturable in the
    /// key (e.g. "all trips up to now"). None = valid until invalidated.
    pub ttl_seconds: Option<i64>,
}

impl CacheEntry {
    /// Whether the entry has outlived its TTL at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_seconds {
            Some(ttl) => now - self.created_at > chrono::Duration::seconds(ttl),
            None => false,
        }
    }
}

// =============================================================================
// REANALYSIS SESSIONS
// =============================================================================

/// Kind of aggregate analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReanalysisKind {
    /// Aggregate over a single time window.
    SingleWindow,
    /// Window-over-window comparison.
    Comparison,
}

impl ReanalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReanalysisKind::SingleWindow => "single_window",
            ReanalysisKind::Comparison => "comparison",
        }
    }

    pub fn parse_str(s: &str) -> Option<Self> {
        match s {
            "single_window" => Some(ReanalysisKind::SingleWindow),
            "comparison" => Some(ReanalysisKind::Comparison),
            _ => None,
        }
    }
}

/// Daily earnings bucket inside an aggregate report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayTotal {
    /// UTC calendar date, ISO format.
    pub date: chrono::NaiveDate,
    pub total_settlement: f64,
    pub trip_count: i64,
}

/// Window-over-window deltas for comparison analyses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonDelta {
    /// Trip count in the preceding window of equal length.
    pub prev_trip_count: i64,
    /// Settlement total in the preceding window.
    pub prev_total_settlement: f64,
    pub trip_count_delta: i64,
    pub settlement_delta: f64,
}

/// Aggregate metrics over the trips in a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AggregateReport {
    pub trip_count: i64,
    pub complete_trip_count: i64,
    pub total_estimate: f64,
    pub total_settlement: f64,
    /// Sum of per-trip variances over complete, reviewable trips.
    pub total_variance: f64,
    pub mean_variance: f64,
    pub exact_count: i64,
    pub over_count: i64,
    pub under_count: i64,
    /// Mean settlement per complete trip.
    pub earnings_per_trip: f64,
    pub best_day: Option<DayTotal>,
    pub worst_day: Option<DayTotal>,
    /// Present only for comparison analyses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ComparisonDelta>,
}

/// Immutable audit record of one aggregate computation.
///
/// Sessions are never deleted; they form an append-only log that lets a
/// caller verify a previously reported number was reproducible from the
/// data available at that time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReanalysisSession {
    pub id: Uuid,
    pub kind: ReanalysisKind,
    pub range_start: DateTime<Utc>,
    pub range_end: DateTime<Utc>,
    /// Trips considered, in sorted order.
    pub trip_ids: Vec<Uuid>,
    pub aggregate: AggregateReport,
    /// Whether the aggregate was served from the computation cache.
    pub cache_hit: bool,
    /// Wall-clock execution time of this request.
    pub execution_ms: i64,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// UPLOAD OUTCOMES
// =============================================================================

/// Structured result of a submitted upload.
///
/// Rejection is a normal outcome of the duplicate gate, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UploadOutcome {
    /// Admitted, classified, and attached to a trip.
    Accepted {
        document_id: Uuid,
        trip_id: Uuid,
        kind: DocumentKind,
        trip_state: TripState,
    },
    /// Admitted, but classification was ambiguous; routed to manual review
    /// and never merged into a trip.
    NeedsReview {
        document_id: Uuid,
        kind: DocumentKind,
        confidence: f32,
    },
    /// Blocked by the duplicate gate (or upload safety).
    Rejected {
        reason: RejectReason,
        matched_document_id: Option<Uuid>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trip_state_ordering_is_monotone() {
        assert!(TripState::Incomplete < TripState::Partial);
        assert!(TripState::Partial < TripState::Complete);
        assert_eq!(
            TripState::Partial.max(TripState::Complete),
            TripState::Complete
        );
        // High-water mark: max() never moves backwards.
        assert_eq!(
            TripState::Complete.max(TripState::Partial),
            TripState::Complete
        );
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            DocumentStatus::Pending,
            DocumentStatus::Classified,
            DocumentStatus::RejectedDuplicate,
        ] {
            assert_eq!(DocumentStatus::parse_str(s.as_str()), Some(s));
        }
        assert_eq!(DocumentStatus::parse_str("bogus"), None);
    }

    #[test]
    fn test_kind_round_trip_and_bearing() {
        for k in [
            DocumentKind::OfferEstimate,
            DocumentKind::FinalSettlement,
            DocumentKind::OdometerReading,
            DocumentKind::Unclassified,
        ] {
            assert_eq!(DocumentKind::parse_str(k.as_str()), Some(k));
        }
        assert!(DocumentKind::OfferEstimate.is_estimate_bearing());
        assert!(!DocumentKind::OfferEstimate.is_settlement_bearing());
        assert!(DocumentKind::FinalSettlement.is_settlement_bearing());
        assert!(!DocumentKind::OdometerReading.is_estimate_bearing());
    }

    #[test]
    fn test_cache_entry_ttl_expiry() {
        let now = Utc::now();
        let entry = CacheEntry {
            key: "k".into(),
            value: serde_json::json!({}),
            compute_ms: 1,
            created_at: now,
            ttl_seconds: Some(60),
        };
        assert!(!entry.is_expired(now + chrono::Duration::seconds(59)));
        assert!(entry.is_expired(now + chrono::Duration::seconds(61)));

        let forever = CacheEntry {
            ttl_seconds: None,
            ..entry
        };
        assert!(!forever.is_expired(now + chrono::Duration::days(365)));
    }

    #[test]
    fn test_new_trip_is_incomplete_version_zero() {
        let trip = Trip::new(Uuid::new_v4(), Utc::now());
        assert_eq!(trip.state, TripState::Incomplete);
        assert_eq!(trip.version, 0);
        assert!(trip.fields.is_empty());
        assert!(!trip.needs_review);
    }

    #[test]
    fn test_reject_reason_strings() {
        assert_eq!(RejectReason::ExactDuplicate.as_str(), "exact-duplicate");
        assert_eq!(RejectReason::NearDuplicate.as_str(), "near-duplicate");
        assert_eq!(RejectReason::RapidResubmit.as_str(), "rapid-resubmit");
        assert!(RejectReason::FingerprintUnavailable.is_retryable());
        assert!(!RejectReason::ExactDuplicate.is_retryable());
    }

    // All DuplicateMatchMethod strings are unique (DB column sanity).
    #[test]
    fn test_match_method_strings_are_unique() {
        let mut strings = vec![
            DuplicateMatchMethod::ExactHash.as_str(),
            DuplicateMatchMethod::SimilarityHash.as_str(),
            DuplicateMatchMethod::RapidResubmit.as_str(),
        ];
        let len = strings.len();
        strings.sort();
        strings.dedup();
        assert_eq!(strings.len(), len, "match method strings must be unique");
    }
}
