//! # tipledger-db
//!
//! Storage layer for tipledger.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL repository implementations for all core entities
//! - In-memory store implementations with identical semantics, used by the
//!   engine's test suites
//!
//! ## Schema
//!
//! Migrations are managed outside this crate. The repositories expect:
//!
//! ```sql
//! CREATE TABLE uploaded_document (
//!     id               UUID PRIMARY KEY,
//!     exact_hash       TEXT NOT NULL,
//!     similarity_hash  TEXT NOT NULL,
//!     byte_size        BIGINT NOT NULL,
//!     filename         TEXT NOT NULL,
//!     uploaded_at      TIMESTAMPTZ NOT NULL,
//!     kind             TEXT,
//!     fields           JSONB NOT NULL DEFAULT '{}',
//!     status           TEXT NOT NULL,
//!     duplicate_of     UUID,
//!     trip_id          UUID
//! );
//! -- Rejected duplicates stay in the audit trail but never block
//! -- readmission of the content they collided with.
//! CREATE UNIQUE INDEX uploaded_document_exact_hash_live
//!     ON uploaded_document (exact_hash)
//!     WHERE status <> 'rejected_duplicate';
//! CREATE INDEX uploaded_document_similarity
//!     ON uploaded_document (similarity_hash)
//!     WHERE status <> 'rejected_duplicate';
//! CREATE INDEX uploaded_document_name_size
//!     ON uploaded_document (filename, byte_size, uploaded_at DESC);
//!
//! CREATE TABLE duplicate_block (
//!     id                   UUID PRIMARY KEY,
//!     document_id          UUID NOT NULL REFERENCES uploaded_document(id),
//!     matched_document_id  UUID NOT NULL REFERENCES uploaded_document(id),
//!     method               TEXT NOT NULL,
//!     reason               TEXT NOT NULL,
//!     created_at           TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE trip (
//!     id                 UUID PRIMARY KEY,
//!     document_ids       UUID[] NOT NULL DEFAULT '{}',
//!     state              TEXT NOT NULL,
//!     fields             JSONB NOT NULL DEFAULT '{}',
//!     estimate_amount    DOUBLE PRECISION,
//!     settlement_amount  DOUBLE PRECISION,
//!     metrics            JSONB,
//!     variance           JSONB,
//!     needs_review       BOOLEAN NOT NULL DEFAULT FALSE,
//!     version            BIGINT NOT NULL DEFAULT 0,
//!     created_at         TIMESTAMPTZ NOT NULL,
//!     updated_at         TIMESTAMPTZ NOT NULL
//! );
//!
//! CREATE TABLE computation_cache (
//!     cache_key    TEXT PRIMARY KEY,
//!     value        JSONB NOT NULL,
//!     compute_ms   BIGINT NOT NULL,
//!     created_at   TIMESTAMPTZ NOT NULL,
//!     ttl_seconds  BIGINT
//! );
//!
//! CREATE TABLE reanalysis_session (
//!     id            UUID PRIMARY KEY,
//!     kind          TEXT NOT NULL,
//!     range_start   TIMESTAMPTZ NOT NULL,
//!     range_end     TIMESTAMPTZ NOT NULL,
//!     trip_ids      UUID[] NOT NULL DEFAULT '{}',
//!     aggregate     JSONB NOT NULL,
//!     cache_hit     BOOLEAN NOT NULL,
//!     execution_ms  BIGINT NOT NULL,
//!     created_at    TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use tipledger_db::{create_pool, PgDocumentStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = create_pool("postgres://localhost/tipledger").await?;
//!     let documents = PgDocumentStore::new(pool);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod documents;
pub mod memory;
pub mod pool;
pub mod sessions;
pub mod trips;

pub use cache::PgCacheStore;
pub use documents::PgDocumentStore;
pub use memory::{
    MemoryCacheStore, MemoryDocumentStore, MemorySessionStore, MemoryStores, MemoryTripStore,
};
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use sessions::PgSessionStore;
pub use trips::PgTripStore;
