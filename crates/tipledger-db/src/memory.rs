//! In-memory store implementations.
//!
//! These mirror the PostgreSQL backend's semantics exactly, including the
//! atomic unique-insert on exact hash and put-if-absent conflict detection.
//! The engine's test suites run entirely against this backend; the Postgres
//! integration tests verify the same contracts against a real database.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use tipledger_core::{
    AdmitInsert, CacheEntry, CachePut, CacheStore, CandidateFields, DocumentKind,
    DocumentStatus, DocumentStore, DocumentSummary, DuplicateBlockRecord, Error,
    ReanalysisSession, Result, SessionStore, Trip, TripStore, UploadedDocument,
};

/// Convenience bundle wiring all four in-memory stores together.
///
/// ```
/// use tipledger_db::memory::MemoryStores;
///
/// let stores = MemoryStores::new();
/// let documents = stores.documents();
/// let trips = stores.trips();
/// ```
#[derive(Clone, Default)]
pub struct MemoryStores {
    documents: Arc<MemoryDocumentStore>,
    trips: Arc<MemoryTripStore>,
    cache: Arc<MemoryCacheStore>,
    sessions: Arc<MemorySessionStore>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> Arc<dyn DocumentStore> {
        self.documents.clone()
    }

    pub fn trips(&self) -> Arc<dyn TripStore> {
        self.trips.clone()
    }

    pub fn cache(&self) -> Arc<dyn CacheStore> {
        self.cache.clone()
    }

    pub fn sessions(&self) -> Arc<dyn SessionStore> {
        self.sessions.clone()
    }
}

// =============================================================================
// DOCUMENTS
// =============================================================================

#[derive(Default)]
struct DocumentState {
    docs: HashMap<Uuid, UploadedDocument>,
    blocks: Vec<DuplicateBlockRecord>,
}

/// In-memory [`DocumentStore`].
#[derive(Default)]
pub struct MemoryDocumentStore {
    state: RwLock<DocumentState>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn summary_of(doc: &UploadedDocument) -> DocumentSummary {
    DocumentSummary {
        id: doc.id,
        exact_hash: doc.exact_hash.clone(),
        similarity_hash: doc.similarity_hash.clone(),
        byte_size: doc.byte_size,
        filename: doc.filename.clone(),
        uploaded_at: doc.uploaded_at,
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert_admitted(&self, doc: &UploadedDocument) -> Result<AdmitInsert> {
        // Uniqueness check and insert happen under one write lock, matching
        // the Postgres partial unique index on non-rejected documents.
        let mut state = self.state.write().await;
        let existing = state
            .docs
            .values()
            .find(|d| {
                d.status != DocumentStatus::RejectedDuplicate && d.exact_hash == doc.exact_hash
            })
            .map(|d| d.id);
        if let Some(id) = existing {
            return Ok(AdmitInsert::DuplicateHash(id));
        }
        state.docs.insert(doc.id, doc.clone());
        Ok(AdmitInsert::Inserted)
    }

    async fn insert_rejected(
        &self,
        doc: &UploadedDocument,
        block: &DuplicateBlockRecord,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        state.docs.insert(doc.id, doc.clone());
        state.blocks.push(block.clone());
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<UploadedDocument> {
        let state = self.state.read().await;
        state
            .docs
            .get(&id)
            .cloned()
            .ok_or(Error::DocumentNotFound(id))
    }

    async fn find_by_exact_hash(&self, exact_hash: &str) -> Result<Option<DocumentSummary>> {
        let state = self.state.read().await;
        Ok(state
            .docs
            .values()
            .filter(|d| {
                d.status != DocumentStatus::RejectedDuplicate && d.exact_hash == exact_hash
            })
            .max_by_key(|d| d.uploaded_at)
            .map(summary_of))
    }

    async fn find_by_similarity_hash(
        &self,
        similarity_hash: &str,
    ) -> Result<Vec<DocumentSummary>> {
        let state = self.state.read().await;
        let mut matches: Vec<DocumentSummary> = state
            .docs
            .values()
            .filter(|d| {
                d.status != DocumentStatus::RejectedDuplicate
                    && d.similarity_hash == similarity_hash
            })
            .map(summary_of)
            .collect();
        matches.sort_by_key(|d| d.uploaded_at);
        Ok(matches)
    }

    async fn find_recent_by_name_size(
        &self,
        filename: &str,
        byte_size: i64,
        since: DateTime<Utc>,
    ) -> Result<Option<DocumentSummary>> {
        let state = self.state.read().await;
        Ok(state
            .docs
            .values()
            .filter(|d| {
                d.status != DocumentStatus::RejectedDuplicate
                    && d.filename == filename
                    && d.byte_size == byte_size
                    && d.uploaded_at >= since
            })
            .max_by_key(|d| d.uploaded_at)
            .map(summary_of))
    }

    async fn mark_classified(
        &self,
        id: Uuid,
        kind: DocumentKind,
        fields: &CandidateFields,
    ) -> Result<()> {
        // Check-and-set under one write lock, matching the Postgres status
        // guard: only one caller claims a pending document.
        let mut state = self.state.write().await;
        let doc = state
            .docs
            .get_mut(&id)
            .ok_or(Error::DocumentNotFound(id))?;
        if doc.status != DocumentStatus::Pending {
            return Err(Error::InvalidInput(format!("document {id} is not pending")));
        }
        doc.kind = Some(kind);
        doc.fields = fields.clone();
        doc.status = DocumentStatus::Classified;
        Ok(())
    }

    async fn assign_trip(&self, id: Uuid, trip_id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let doc = state
            .docs
            .get_mut(&id)
            .ok_or(Error::DocumentNotFound(id))?;
        if doc.trip_id.is_some() {
            return Err(Error::Internal(format!(
                "document {id} is already attached to a trip"
            )));
        }
        doc.trip_id = Some(trip_id);
        Ok(())
    }

    async fn list_blocks_for(
        &self,
        matched_document_id: Uuid,
    ) -> Result<Vec<DuplicateBlockRecord>> {
        let state = self.state.read().await;
        Ok(state
            .blocks
            .iter()
            .filter(|b| b.matched_document_id == matched_document_id)
            .cloned()
            .collect())
    }

    async fn list_blocks_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DuplicateBlockRecord>> {
        let state = self.state.read().await;
        Ok(state
            .blocks
            .iter()
            .filter(|b| b.created_at >= start && b.created_at < end)
            .cloned()
            .collect())
    }
}

// =============================================================================
// TRIPS
// =============================================================================

/// In-memory [`TripStore`].
#[derive(Default)]
pub struct MemoryTripStore {
    trips: RwLock<HashMap<Uuid, Trip>>,
}

impl MemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TripStore for MemoryTripStore {
    async fn insert(&self, trip: &Trip) -> Result<()> {
        let mut trips = self.trips.write().await;
        trips.insert(trip.id, trip.clone());
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Trip> {
        let trips = self.trips.read().await;
        trips.get(&id).cloned().ok_or(Error::TripNotFound(id))
    }

    async fn update(&self, trip: &Trip) -> Result<()> {
        let mut trips = self.trips.write().await;
        if !trips.contains_key(&trip.id) {
            return Err(Error::TripNotFound(trip.id));
        }
        trips.insert(trip.id, trip.clone());
        Ok(())
    }

    async fn list_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Trip>> {
        let trips = self.trips.read().await;
        let mut matches: Vec<Trip> = trips
            .values()
            .filter(|t| t.created_at >= start && t.created_at < end)
            .cloned()
            .collect();
        matches.sort_by_key(|t| t.created_at);
        Ok(matches)
    }
}

// =============================================================================
// CACHE
// =============================================================================

/// In-memory [`CacheStore`].
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.is_expired(Utc::now()))
            .cloned())
    }

    async fn put_if_absent(&self, entry: &CacheEntry) -> Result<CachePut> {
        let mut entries = self.entries.write().await;
        match entries.get(&entry.key) {
            Some(existing) if existing.is_expired(Utc::now()) => {
                entries.insert(entry.key.clone(), entry.clone());
                Ok(CachePut::Stored)
            }
            Some(existing) if existing.value == entry.value => Ok(CachePut::AlreadyPresent),
            Some(_) => Ok(CachePut::Conflict),
            None => {
                entries.insert(entry.key.clone(), entry.clone());
                Ok(CachePut::Stored)
            }
        }
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }
}

// =============================================================================
// SESSIONS
// =============================================================================

/// In-memory [`SessionStore`].
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<Uuid, ReanalysisSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &ReanalysisSession) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<ReanalysisSession> {
        let sessions = self.sessions.read().await;
        sessions
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("reanalysis session {id}")))
    }

    async fn list_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ReanalysisSession>> {
        let sessions = self.sessions.read().await;
        let mut matches: Vec<ReanalysisSession> = sessions
            .values()
            .filter(|s| s.created_at >= start && s.created_at < end)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matches)
    }
}
