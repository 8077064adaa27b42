//! Persistence for analysis records and the document rows the worker reads.
//!
//! Status transitions go through a single conditional UPDATE so concurrent
//! writers cannot produce non-monotone transitions. Admission for a given
//! `(user_id, document_id)` is linearized with a transaction-scoped
//! advisory lock.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::models::analysis::{AnalysisRow, AnalysisStatus, ErrorCode};
use crate::models::document::DocumentRow;
use crate::usage::QuotaGate;

/// Hard cap applied to `list_by_user` page sizes.
pub const MAX_LIST_LIMIT: i64 = 50;
pub const DEFAULT_LIST_LIMIT: i64 = 20;

/// Fields for a record the admission path wants to create.
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub id: Uuid,
    pub user_id: String,
    pub document_id: Uuid,
    pub job_description: String,
    pub mode: String,
    pub prompt_version: String,
    pub analysis_version: String,
    pub provider: String,
    pub model: String,
}

/// Outcome of the idempotent admission decision.
#[derive(Debug)]
pub enum AdmissionOutcome {
    /// A fresh record was inserted and should be charged and enqueued.
    Created(AnalysisRow),
    /// An existing record satisfies the request; nothing was charged.
    Reused(AnalysisRow),
    /// The latest record is FAILED and the caller did not opt into retry.
    RetryRequired(AnalysisRow),
    /// The quota gate rejected the creation; nothing was inserted.
    LimitReached,
}

/// Partial update applied through the single status mutator. `None` fields
/// keep their stored value.
#[derive(Debug, Default)]
pub struct StatusUpdate {
    pub status: Option<AnalysisStatus>,
    /// When set, the write only applies if the row is currently in this
    /// status. Used for the QUEUED → PROCESSING claim.
    pub expect_status: Option<AnalysisStatus>,
    pub result: Option<Value>,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub error_retryable: Option<bool>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct AnalysisStore {
    pool: PgPool,
}

impl AnalysisStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new: &NewAnalysis) -> Result<AnalysisRow> {
        let row = sqlx::query_as::<_, AnalysisRow>(
            r#"
            INSERT INTO analyses
                (id, user_id, document_id, status, job_description,
                 prompt_version, mode, analysis_version, provider, model)
            VALUES ($1, $2, $3, 'QUEUED', $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(new.id)
        .bind(&new.user_id)
        .bind(new.document_id)
        .bind(&new.job_description)
        .bind(&new.prompt_version)
        .bind(&new.mode)
        .bind(&new.analysis_version)
        .bind(&new.provider)
        .bind(&new.model)
        .fetch_one(&self.pool)
        .await
        .context("analysis insert failed")?;

        Ok(row)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<AnalysisRow>> {
        Ok(sqlx::query_as::<_, AnalysisRow>(
            "SELECT * FROM analyses WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?)
    }

    /// Atomic admission. Looks at the latest record for the `(user,
    /// document)` pair and applies the reuse table; concurrent callers are
    /// serialized by an advisory lock so at most one gets `Created`.
    ///
    /// `gate` is consulted (inside the lock) before inserting; `None` skips
    /// the quota check.
    pub async fn get_or_create_for_document(
        &self,
        proposed: &NewAnalysis,
        allow_retry: bool,
        gate: Option<&dyn QuotaGate>,
    ) -> Result<AdmissionOutcome> {
        let mut tx = self.pool.begin().await?;

        let lock_key = format!("{}:{}", proposed.user_id, proposed.document_id);
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 42))")
            .bind(&lock_key)
            .execute(&mut *tx)
            .await?;

        let latest = sqlx::query_as::<_, AnalysisRow>(
            r#"
            SELECT * FROM analyses
            WHERE user_id = $1 AND document_id = $2 AND deleted_at IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(&proposed.user_id)
        .bind(proposed.document_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(latest) = latest {
            match latest.status() {
                AnalysisStatus::Queued | AnalysisStatus::Processing | AnalysisStatus::Completed => {
                    tx.commit().await?;
                    return Ok(AdmissionOutcome::Reused(latest));
                }
                AnalysisStatus::Failed if !allow_retry => {
                    tx.commit().await?;
                    return Ok(AdmissionOutcome::RetryRequired(latest));
                }
                AnalysisStatus::Failed => {} // fall through to create
            }
        }

        if let Some(gate) = gate {
            if !gate.can_consume(&proposed.user_id, 1).await? {
                tx.rollback().await?;
                return Ok(AdmissionOutcome::LimitReached);
            }
        }

        let row = sqlx::query_as::<_, AnalysisRow>(
            r#"
            INSERT INTO analyses
                (id, user_id, document_id, status, job_description,
                 prompt_version, mode, analysis_version, provider, model)
            VALUES ($1, $2, $3, 'QUEUED', $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(proposed.id)
        .bind(&proposed.user_id)
        .bind(proposed.document_id)
        .bind(&proposed.job_description)
        .bind(&proposed.prompt_version)
        .bind(&proposed.mode)
        .bind(&proposed.analysis_version)
        .bind(&proposed.provider)
        .bind(&proposed.model)
        .fetch_one(&mut *tx)
        .await
        .context("analysis insert failed")?;

        tx.commit().await?;
        info!(
            "Created analysis {} for user {} document {}",
            row.id, row.user_id, row.document_id
        );
        Ok(AdmissionOutcome::Created(row))
    }

    /// The only status mutator. Entry to PROCESSING stamps `started_at`,
    /// entry to a terminal status stamps `completed_at`, unless the caller
    /// supplied explicit timestamps. Returns false when the conditional
    /// write matched no row (unknown id or `expect_status` mismatch).
    pub async fn update_status_result_and_error(
        &self,
        id: Uuid,
        update: StatusUpdate,
    ) -> Result<bool> {
        let status = update
            .status
            .context("status update requires a target status")?;

        let updated = sqlx::query(
            r#"
            UPDATE analyses SET
                status = $2,
                result = COALESCE($3, result),
                error_code = COALESCE($4, error_code),
                error_message = COALESCE($5, error_message),
                error_retryable = COALESCE($6, error_retryable),
                started_at = CASE
                    WHEN $2 = 'PROCESSING' THEN COALESCE($7, started_at, NOW())
                    ELSE COALESCE($7, started_at)
                END,
                completed_at = CASE
                    WHEN $2 IN ('COMPLETED', 'FAILED') THEN COALESCE($8, completed_at, NOW())
                    ELSE COALESCE($8, completed_at)
                END,
                updated_at = NOW()
            WHERE id = $1
              AND deleted_at IS NULL
              AND ($9::text IS NULL OR status = $9)
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(update.result)
        .bind(update.error_code.map(|c| c.as_str()))
        .bind(update.error_message)
        .bind(update.error_retryable)
        .bind(update.started_at)
        .bind(update.completed_at)
        .bind(update.expect_status.map(|s| s.as_str()))
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    /// Persists the raw LLM payload. Non-JSON text is stored as a JSON
    /// string so the payload survives even when parsing failed.
    pub async fn update_analysis_raw(&self, id: Uuid, raw_text: &str) -> Result<()> {
        let raw: Value = serde_json::from_str(raw_text)
            .unwrap_or_else(|_| Value::String(raw_text.to_string()));

        sqlx::query(
            "UPDATE analyses SET analysis_raw = $2, updated_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(&raw)
        .execute(&self.pool)
        .await
        .context("analysis raw persist failed")?;

        Ok(())
    }

    pub async fn update_analysis_result(
        &self,
        id: Uuid,
        result: &Value,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE analyses
            SET result = $2, analysis_completed_at = $3, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(result)
        .bind(completed_at)
        .execute(&self.pool)
        .await
        .context("analysis result persist failed")?;

        Ok(())
    }

    pub async fn update_prompt_metadata(
        &self,
        id: Uuid,
        prompt_version: &str,
        prompt_hash: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE analyses
            SET prompt_version = $2, prompt_hash = $3, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .bind(prompt_version)
        .bind(prompt_hash)
        .execute(&self.pool)
        .await
        .context("prompt metadata persist failed")?;

        Ok(())
    }

    pub async fn list_by_user(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AnalysisRow>> {
        let limit = limit.clamp(1, MAX_LIST_LIMIT);
        let offset = offset.max(0);

        Ok(sqlx::query_as::<_, AnalysisRow>(
            r#"
            SELECT * FROM analyses
            WHERE user_id = $1 AND deleted_at IS NULL
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?)
    }
}

/// Read side of the document table plus the write-once extraction key.
#[derive(Clone)]
pub struct DocumentStore {
    pool: PgPool,
}

impl DocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, user_id: &str, id: Uuid) -> Result<Option<DocumentRow>> {
        sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("document load failed")
    }

    /// Records the extracted-text key once. When another worker already
    /// recorded a key this is a no-op; the returned key is the winner's.
    pub async fn update_extraction(
        &self,
        user_id: &str,
        id: Uuid,
        key: &str,
        at: DateTime<Utc>,
    ) -> Result<String> {
        sqlx::query(
            r#"
            UPDATE documents
            SET extracted_text_key = $3, extracted_at = $4, updated_at = NOW()
            WHERE id = $1 AND user_id = $2 AND extracted_text_key IS NULL
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(key)
        .bind(at)
        .execute(&self.pool)
        .await
        .context("document extraction update failed")?;

        let winner: Option<String> = sqlx::query_scalar(
            "SELECT extracted_text_key FROM documents WHERE id = $1 AND user_id = $2",
        )
        .bind(id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .context("document load failed")?;

        winner.context("document extraction key missing after update")
    }
}
