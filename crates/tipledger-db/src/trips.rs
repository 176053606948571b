//! Trip repository implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use tipledger_core::{
    Error, MergedField, Result, TipVariance, Trip, TripMetrics, TripState, TripStore,
};

/// PostgreSQL implementation of [`TripStore`].
///
/// The merged field set, metrics, and variance are stored as jsonb; the
/// aggregator's per-trip lock serializes writers, so updates replace the
/// whole snapshot.
pub struct PgTripStore {
    pool: Pool<Postgres>,
}

impl PgTripStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn row_to_trip(row: &PgRow) -> Result<Trip> {
    let state_str: String = row.try_get("state")?;
    let state = TripState::parse_str(&state_str)
        .ok_or_else(|| Error::Internal(format!("unknown trip state: {state_str}")))?;
    let fields: HashMap<String, MergedField> = serde_json::from_value(row.try_get("fields")?)?;
    let metrics: Option<TripMetrics> = match row.try_get::<Option<serde_json::Value>, _>("metrics")?
    {
        Some(v) => Some(serde_json::from_value(v)?),
        None => None,
    };
    let variance: Option<TipVariance> =
        match row.try_get::<Option<serde_json::Value>, _>("variance")? {
            Some(v) => Some(serde_json::from_value(v)?),
            None => None,
        };

    Ok(Trip {
        id: row.try_get("id")?,
        document_ids: row.try_get("document_ids")?,
        state,
        fields,
        estimate_amount: row.try_get("estimate_amount")?,
        settlement_amount: row.try_get("settlement_amount")?,
        metrics,
        variance,
        needs_review: row.try_get("needs_review")?,
        version: row.try_get("version")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl TripStore for PgTripStore {
    async fn insert(&self, trip: &Trip) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trip
                (id, document_ids, state, fields, estimate_amount, settlement_amount,
                 metrics, variance, needs_review, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(trip.id)
        .bind(&trip.document_ids)
        .bind(trip.state.as_str())
        .bind(serde_json::to_value(&trip.fields)?)
        .bind(trip.estimate_amount)
        .bind(trip.settlement_amount)
        .bind(trip.metrics.as_ref().map(serde_json::to_value).transpose()?)
        .bind(trip.variance.as_ref().map(serde_json::to_value).transpose()?)
        .bind(trip.needs_review)
        .bind(trip.version)
        .bind(trip.created_at)
        .bind(trip.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Trip> {
        let row = sqlx::query("SELECT * FROM trip WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::TripNotFound(id))?;
        row_to_trip(&row)
    }

    async fn update(&self, trip: &Trip) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE trip
            SET document_ids = $2, state = $3, fields = $4, estimate_amount = $5,
                settlement_amount = $6, metrics = $7, variance = $8,
                needs_review = $9, version = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(trip.id)
        .bind(&trip.document_ids)
        .bind(trip.state.as_str())
        .bind(serde_json::to_value(&trip.fields)?)
        .bind(trip.estimate_amount)
        .bind(trip.settlement_amount)
        .bind(trip.metrics.as_ref().map(serde_json::to_value).transpose()?)
        .bind(trip.variance.as_ref().map(serde_json::to_value).transpose()?)
        .bind(trip.needs_review)
        .bind(trip.version)
        .bind(trip.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::TripNotFound(trip.id));
        }
        Ok(())
    }

    async fn list_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Trip>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM trip
            WHERE created_at >= $1 AND created_at < $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_trip).collect()
    }
}
