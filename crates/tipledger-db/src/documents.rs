//! Uploaded-document repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use tipledger_core::{
    AdmitInsert, CandidateFields, DocumentKind, DocumentStatus, DocumentStore, DocumentSummary,
    DuplicateBlockRecord, DuplicateMatchMethod, Error, Result, UploadedDocument,
};

/// PostgreSQL implementation of [`DocumentStore`].
///
/// Exact-hash uniqueness among non-rejected documents is enforced by a
/// partial unique index; the insert relies on the database to arbitrate
/// concurrent identical uploads.
pub struct PgDocumentStore {
    pool: Pool<Postgres>,
}

impl PgDocumentStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn row_to_document(row: &PgRow) -> Result<UploadedDocument> {
    let status_str: String = row.try_get("status")?;
    let status = DocumentStatus::parse_str(&status_str)
        .ok_or_else(|| Error::Internal(format!("unknown document status: {status_str}")))?;
    let kind = match row.try_get::<Option<String>, _>("kind")? {
        Some(k) => Some(
            DocumentKind::parse_str(&k)
                .ok_or_else(|| Error::Internal(format!("unknown document kind: {k}")))?,
        ),
        None => None,
    };
    let fields: CandidateFields = serde_json::from_value(row.try_get("fields")?)?;

    Ok(UploadedDocument {
        id: row.try_get("id")?,
        exact_hash: row.try_get("exact_hash")?,
        similarity_hash: row.try_get("similarity_hash")?,
        byte_size: row.try_get("byte_size")?,
        filename: row.try_get("filename")?,
        uploaded_at: row.try_get("uploaded_at")?,
        kind,
        fields,
        status,
        duplicate_of: row.try_get("duplicate_of")?,
        trip_id: row.try_get("trip_id")?,
    })
}

fn row_to_summary(row: &PgRow) -> Result<DocumentSummary> {
    Ok(DocumentSummary {
        id: row.try_get("id")?,
        exact_hash: row.try_get("exact_hash")?,
        similarity_hash: row.try_get("similarity_hash")?,
        byte_size: row.try_get("byte_size")?,
        filename: row.try_get("filename")?,
        uploaded_at: row.try_get("uploaded_at")?,
    })
}

fn row_to_block(row: &PgRow) -> Result<DuplicateBlockRecord> {
    let method_str: String = row.try_get("method")?;
    let method = DuplicateMatchMethod::parse_str(&method_str)
        .ok_or_else(|| Error::Internal(format!("unknown match method: {method_str}")))?;
    Ok(DuplicateBlockRecord {
        id: row.try_get("id")?,
        document_id: row.try_get("document_id")?,
        matched_document_id: row.try_get("matched_document_id")?,
        method,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
    })
}

const SUMMARY_COLUMNS: &str = "id, exact_hash, similarity_hash, byte_size, filename, uploaded_at";

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn insert_admitted(&self, doc: &UploadedDocument) -> Result<AdmitInsert> {
        let fields = serde_json::to_value(&doc.fields)?;
        let result = sqlx::query(
            r#"
            INSERT INTO uploaded_document
                (id, exact_hash, similarity_hash, byte_size, filename, uploaded_at,
                 kind, fields, status, duplicate_of, trip_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(doc.id)
        .bind(&doc.exact_hash)
        .bind(&doc.similarity_hash)
        .bind(doc.byte_size)
        .bind(&doc.filename)
        .bind(doc.uploaded_at)
        .bind(doc.kind.map(|k| k.as_str()))
        .bind(fields)
        .bind(doc.status.as_str())
        .bind(doc.duplicate_of)
        .bind(doc.trip_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(AdmitInsert::Inserted),
            Err(e) => {
                let unique_violation = e
                    .as_database_error()
                    .map(|db| db.is_unique_violation())
                    .unwrap_or(false);
                if !unique_violation {
                    return Err(Error::Database(e));
                }
                // Race loser: surface the winner's id.
                let existing = self.find_by_exact_hash(&doc.exact_hash).await?.ok_or_else(
                    || Error::Internal("unique violation without a matching document".into()),
                )?;
                Ok(AdmitInsert::DuplicateHash(existing.id))
            }
        }
    }

    async fn insert_rejected(
        &self,
        doc: &UploadedDocument,
        block: &DuplicateBlockRecord,
    ) -> Result<()> {
        let fields = serde_json::to_value(&doc.fields)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO uploaded_document
                (id, exact_hash, similarity_hash, byte_size, filename, uploaded_at,
                 kind, fields, status, duplicate_of, trip_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(doc.id)
        .bind(&doc.exact_hash)
        .bind(&doc.similarity_hash)
        .bind(doc.byte_size)
        .bind(&doc.filename)
        .bind(doc.uploaded_at)
        .bind(doc.kind.map(|k| k.as_str()))
        .bind(fields)
        .bind(doc.status.as_str())
        .bind(doc.duplicate_of)
        .bind(doc.trip_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO duplicate_block
                (id, document_id, matched_document_id, method, reason, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(block.id)
        .bind(block.document_id)
        .bind(block.matched_document_id)
        .bind(block.method.as_str())
        .bind(&block.reason)
        .bind(block.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<UploadedDocument> {
        let row = sqlx::query("SELECT * FROM uploaded_document WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::DocumentNotFound(id))?;
        row_to_document(&row)
    }

    async fn find_by_exact_hash(&self, exact_hash: &str) -> Result<Option<DocumentSummary>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {SUMMARY_COLUMNS} FROM uploaded_document
            WHERE exact_hash = $1 AND status <> 'rejected_duplicate'
            ORDER BY uploaded_at DESC
            LIMIT 1
            "#,
        ))
        .bind(exact_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_summary).transpose()
    }

    async fn find_by_similarity_hash(
        &self,
        similarity_hash: &str,
    ) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {SUMMARY_COLUMNS} FROM uploaded_document
            WHERE similarity_hash = $1 AND status <> 'rejected_duplicate'
            ORDER BY uploaded_at ASC
            "#,
        ))
        .bind(similarity_hash)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_summary).collect()
    }

    async fn find_recent_by_name_size(
        &self,
        filename: &str,
        byte_size: i64,
        since: DateTime<Utc>,
    ) -> Result<Option<DocumentSummary>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {SUMMARY_COLUMNS} FROM uploaded_document
            WHERE filename = $1 AND byte_size = $2 AND uploaded_at >= $3
              AND status <> 'rejected_duplicate'
            ORDER BY uploaded_at DESC
            LIMIT 1
            "#,
        ))
        .bind(filename)
        .bind(byte_size)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_summary).transpose()
    }

    async fn mark_classified(
        &self,
        id: Uuid,
        kind: DocumentKind,
        fields: &CandidateFields,
    ) -> Result<()> {
        let fields = serde_json::to_value(fields)?;
        // Status guard in the WHERE clause: the database arbitrates
        // concurrent claims, only one caller transitions the document.
        let result = sqlx::query(
            r#"
            UPDATE uploaded_document
            SET kind = $2, fields = $3, status = 'classified'
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(kind.as_str())
        .bind(fields)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a missing document from a lost claim race.
            self.fetch(id).await?;
            return Err(Error::InvalidInput(format!("document {id} is not pending")));
        }
        Ok(())
    }

    async fn assign_trip(&self, id: Uuid, trip_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE uploaded_document
            SET trip_id = $2
            WHERE id = $1 AND trip_id IS NULL
            "#,
        )
        .bind(id)
        .bind(trip_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            self.fetch(id).await?;
            return Err(Error::Internal(format!(
                "document {id} is already attached to a trip"
            )));
        }
        Ok(())
    }

    async fn list_blocks_for(
        &self,
        matched_document_id: Uuid,
    ) -> Result<Vec<DuplicateBlockRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM duplicate_block
            WHERE matched_document_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(matched_document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_block).collect()
    }

    async fn list_blocks_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DuplicateBlockRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM duplicate_block
            WHERE created_at >= $1 AND created_at < $2
            ORDER BY created_at ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_block).collect()
    }
}
