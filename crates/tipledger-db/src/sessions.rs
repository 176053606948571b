//! Reanalysis-session repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use tipledger_core::{
    AggregateReport, Error, ReanalysisKind, ReanalysisSession, Result, SessionStore,
};

/// PostgreSQL implementation of [`SessionStore`]. Append-only; there is no
/// update or delete path.
pub struct PgSessionStore {
    pool: Pool<Postgres>,
}

impl PgSessionStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn row_to_session(row: &PgRow) -> Result<ReanalysisSession> {
    let kind_str: String = row.try_get("kind")?;
    let kind = ReanalysisKind::parse_str(&kind_str)
        .ok_or_else(|| Error::Internal(format!("unknown reanalysis kind: {kind_str}")))?;
    let aggregate: AggregateReport = serde_json::from_value(row.try_get("aggregate")?)?;

    Ok(ReanalysisSession {
        id: row.try_get("id")?,
        kind,
        range_start: row.try_get("range_start")?,
        range_end: row.try_get("range_end")?,
        trip_ids: row.try_get("trip_ids")?,
        aggregate,
        cache_hit: row.try_get("cache_hit")?,
        execution_ms: row.try_get("execution_ms")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn insert(&self, session: &ReanalysisSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reanalysis_session
                (id, kind, range_start, range_end, trip_ids, aggregate,
                 cache_hit, execution_ms, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(session.id)
        .bind(session.kind.as_str())
        .bind(session.range_start)
        .bind(session.range_end)
        .bind(&session.trip_ids)
        .bind(serde_json::to_value(&session.aggregate)?)
        .bind(session.cache_hit)
        .bind(session.execution_ms)
        .bind(session.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<ReanalysisSession> {
        let row = sqlx::query("SELECT * FROM reanalysis_session WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::NotFound(format!("reanalysis session {id}")))?;
        row_to_session(&row)
    }

    async fn list_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ReanalysisSession>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM reanalysis_session
            WHERE created_at >= $1 AND created_at < $2
            ORDER BY created_at DESC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_session).collect()
    }
}
