//! Core traits for tipledger storage abstractions.
//!
//! These traits define the interfaces that concrete backends must satisfy,
//! enabling pluggable storage (PostgreSQL, in-memory) and testability. The
//! two atomicity requirements of the engine live here: the unique-insert on
//! exact content hash and the put-if-absent semantics of the cache store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

/// Outcome of the atomic admitted-document insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmitInsert {
    /// The document was inserted; its exact hash was unseen.
    Inserted,
    /// A non-rejected document with the same exact hash already exists.
    /// The loser of a concurrent race of identical uploads lands here.
    DuplicateHash(Uuid),
}

/// Repository for uploaded documents and duplicate-block records.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert an admitted document, enforcing exact-hash uniqueness among
    /// non-rejected documents atomically (unique constraint or equivalent).
    async fn insert_admitted(&self, doc: &UploadedDocument) -> Result<AdmitInsert>;

    /// Insert a rejected document together with its block record.
    ///
    /// Rejected documents are part of the append-only audit trail; they are
    /// excluded from the exact-hash uniqueness set.
    async fn insert_rejected(
        &self,
        doc: &UploadedDocument,
        block: &DuplicateBlockRecord,
    ) -> Result<()>;

    /// Fetch a full document by id.
    async fn fetch(&self, id: Uuid) -> Result<UploadedDocument>;

    /// Find the non-rejected document with the given exact hash, if any.
    async fn find_by_exact_hash(&self, exact_hash: &str) -> Result<Option<DocumentSummary>>;

    /// List non-rejected documents sharing a similarity hash.
    async fn find_by_similarity_hash(
        &self,
        similarity_hash: &str,
    ) -> Result<Vec<DocumentSummary>>;

    /// Find the most recent non-rejected document with the same filename
    /// and byte size uploaded at or after `since`.
    async fn find_recent_by_name_size(
        &self,
        filename: &str,
        byte_size: i64,
        since: DateTime<Utc>,
    ) -> Result<Option<DocumentSummary>>;

    /// Record the classifier's verdict on a document, transitioning it out
    /// of `Pending` atomically (check-and-set on status). A document that
    /// is not pending is left untouched and the call fails, so exactly one
    /// caller can claim a document for merging.
    async fn mark_classified(
        &self,
        id: Uuid,
        kind: DocumentKind,
        fields: &CandidateFields,
    ) -> Result<()>;

    /// Point a classified document at the trip it merged into. Fails if
    /// the document already carries a trip id; a document belongs to at
    /// most one trip.
    async fn assign_trip(&self, id: Uuid, trip_id: Uuid) -> Result<()>;

    /// Block records that matched against a given original document.
    async fn list_blocks_for(&self, matched_document_id: Uuid)
        -> Result<Vec<DuplicateBlockRecord>>;

    /// Block records created in a time range (threshold tuning).
    async fn list_blocks_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DuplicateBlockRecord>>;
}

/// Repository for trips.
///
/// All writes to a trip's merged field set go through the aggregator's
/// per-trip serialization; the store itself only persists whole snapshots.
#[async_trait]
pub trait TripStore: Send + Sync {
    /// Insert a newly opened trip.
    async fn insert(&self, trip: &Trip) -> Result<()>;

    /// Fetch a trip snapshot by id.
    async fn fetch(&self, id: Uuid) -> Result<Trip>;

    /// Persist a mutated trip. The caller holds the per-trip lock and has
    /// already bumped `version`.
    async fn update(&self, trip: &Trip) -> Result<()>;

    /// Trips created in [start, end), ordered by creation time.
    async fn list_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>)
        -> Result<Vec<Trip>>;
}

/// Outcome of a put-if-absent on the cache store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachePut {
    /// The key was empty; the entry is now live.
    Stored,
    /// An entry with the same key and an identical value already exists.
    /// Benign: a coalescing race stored it first.
    AlreadyPresent,
    /// An entry with the same key but a *different* value exists. The
    /// determinism invariant would be violated; the write was refused.
    Conflict,
}

/// Key/value backing store for the computation cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch a live entry. Expired entries are treated as absent.
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    /// Store an entry only if the key is empty. Never overwrites.
    async fn put_if_absent(&self, entry: &CacheEntry) -> Result<CachePut>;

    /// Invalidate every key with the given prefix; returns how many were
    /// removed. Used when upstream trip data an entry was derived from
    /// changes.
    async fn invalidate_prefix(&self, prefix: &str) -> Result<u64>;
}

/// Append-only repository for reanalysis sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a session. Sessions are immutable and never deleted.
    async fn insert(&self, session: &ReanalysisSession) -> Result<()>;

    /// Fetch a session by id.
    async fn fetch(&self, id: Uuid) -> Result<ReanalysisSession>;

    /// Sessions created in [start, end), newest first.
    async fn list_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ReanalysisSession>>;
}
