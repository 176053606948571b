//! Computation-cache backing store implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;

use tipledger_core::{CacheEntry, CachePut, CacheStore, Error, Result};

/// PostgreSQL implementation of [`CacheStore`].
///
/// Put-if-absent rides on `ON CONFLICT DO NOTHING`; when the insert loses,
/// the stored value is compared against the attempted one to distinguish a
/// benign coalescing race from a determinism violation. Expiry is evaluated
/// in Rust against `created_at + ttl_seconds`, never by a background job.
pub struct PgCacheStore {
    pool: Pool<Postgres>,
}

impl PgCacheStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn row_to_entry(row: &PgRow) -> Result<CacheEntry> {
    Ok(CacheEntry {
        key: row.try_get("cache_key")?,
        value: row.try_get("value")?,
        compute_ms: row.try_get("compute_ms")?,
        created_at: row.try_get("created_at")?,
        ttl_seconds: row.try_get("ttl_seconds")?,
    })
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let row = sqlx::query("SELECT * FROM computation_cache WHERE cache_key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        let entry = match row {
            Some(row) => row_to_entry(&row)?,
            None => return Ok(None),
        };
        if entry.is_expired(Utc::now()) {
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn put_if_absent(&self, entry: &CacheEntry) -> Result<CachePut> {
        let result = sqlx::query(
            r#"
            INSERT INTO computation_cache
                (cache_key, value, compute_ms, created_at, ttl_seconds)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (cache_key) DO NOTHING
            "#,
        )
        .bind(&entry.key)
        .bind(&entry.value)
        .bind(entry.compute_ms)
        .bind(entry.created_at)
        .bind(entry.ttl_seconds)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(CachePut::Stored);
        }

        let existing = sqlx::query("SELECT * FROM computation_cache WHERE cache_key = $1")
            .bind(&entry.key)
            .fetch_optional(&self.pool)
            .await?;
        let existing = match existing {
            Some(row) => row_to_entry(&row)?,
            // Concurrent invalidation between insert and read.
            None => {
                return Err(Error::Internal(format!(
                    "cache key {} vanished during put-if-absent",
                    entry.key
                )))
            }
        };

        if existing.is_expired(Utc::now()) {
            // Replace an expired corpse in place.
            sqlx::query(
                r#"
                UPDATE computation_cache
                SET value = $2, compute_ms = $3, created_at = $4, ttl_seconds = $5
                WHERE cache_key = $1
                "#,
            )
            .bind(&entry.key)
            .bind(&entry.value)
            .bind(entry.compute_ms)
            .bind(entry.created_at)
            .bind(entry.ttl_seconds)
            .execute(&self.pool)
            .await?;
            return Ok(CachePut::Stored);
        }

        if existing.value == entry.value {
            Ok(CachePut::AlreadyPresent)
        } else {
            Ok(CachePut::Conflict)
        }
    }

    async fn invalidate_prefix(&self, prefix: &str) -> Result<u64> {
        // LIKE pattern characters in the prefix must not act as wildcards.
        let escaped = prefix.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
        let result = sqlx::query(
            "DELETE FROM computation_cache WHERE cache_key LIKE $1 || '%' ESCAPE '\\'",
        )
        .bind(escaped)
        .execute(&self.pool)
        .await?;
        let removed = result.rows_affected();
        debug!(
            subsystem = "db",
            component = "cache",
            op = "invalidate_prefix",
            removed,
            "Invalidated cache entries by prefix"
        );
        Ok(removed)
    }
}
