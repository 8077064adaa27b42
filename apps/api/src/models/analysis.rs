use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of an analysis record. Transitions are monotone:
/// QUEUED → PROCESSING → {COMPLETED, FAILED}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Queued => "QUEUED",
            AnalysisStatus::Processing => "PROCESSING",
            AnalysisStatus::Completed => "COMPLETED",
            AnalysisStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(AnalysisStatus::Queued),
            "PROCESSING" => Some(AnalysisStatus::Processing),
            "COMPLETED" => Some(AnalysisStatus::Completed),
            "FAILED" => Some(AnalysisStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Failed)
    }
}

/// Analysis mode. ATS scores the resume alone; JOB_MATCH scores it against
/// a job description (which is then mandatory, see admission validation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisMode {
    Ats,
    JobMatch,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Ats => "ATS",
            AnalysisMode::JobMatch => "JOB_MATCH",
        }
    }

    /// Case-insensitive parse; empty input falls back to JOB_MATCH.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "" | "JOB_MATCH" => Some(AnalysisMode::JobMatch),
            "ATS" => Some(AnalysisMode::Ats),
            _ => None,
        }
    }
}

/// Failure classification recorded on FAILED analyses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Validation,
    LlmTimeout,
    LlmSchemaMismatch,
    Storage,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::LlmTimeout => "LLM_TIMEOUT",
            ErrorCode::LlmSchemaMismatch => "LLM_SCHEMA_MISMATCH",
            ErrorCode::Storage => "STORAGE",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

/// A row of the `analyses` table. Never deleted by this subsystem; reads
/// always filter `deleted_at IS NULL`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnalysisRow {
    pub id: Uuid,
    pub user_id: String,
    pub document_id: Uuid,
    pub status: String,
    pub result: Option<Value>,
    pub analysis_raw: Option<Value>,
    pub analysis_completed_at: Option<DateTime<Utc>>,
    pub job_description: String,
    pub prompt_version: String,
    pub mode: String,
    pub analysis_version: String,
    pub prompt_hash: Option<String>,
    pub provider: String,
    pub model: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub error_retryable: Option<bool>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl AnalysisRow {
    pub fn status(&self) -> AnalysisStatus {
        // Rows are only ever written through AnalysisStatus::as_str.
        AnalysisStatus::parse(&self.status).unwrap_or(AnalysisStatus::Failed)
    }

    pub fn mode(&self) -> AnalysisMode {
        AnalysisMode::parse(&self.mode).unwrap_or(AnalysisMode::JobMatch)
    }

    pub fn job_description_provided(&self) -> bool {
        !self.job_description.trim().is_empty()
    }
}

/// Interval clients should wait before polling again, milliseconds.
pub const POLL_AFTER_MS: u64 = 2000;

/// The client-facing projection of an analysis record. Raw LLM payloads are
/// operator-only and never leave the row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisProjection {
    pub analysis_id: Uuid,
    pub document_id: Uuid,
    pub status: String,
    pub mode: String,
    pub prompt_version: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_retryable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_after_ms: Option<u64>,
}

impl From<&AnalysisRow> for AnalysisProjection {
    fn from(row: &AnalysisRow) -> Self {
        let status = row.status();
        AnalysisProjection {
            analysis_id: row.id,
            document_id: row.document_id,
            status: status.as_str().to_string(),
            mode: row.mode.clone(),
            prompt_version: row.prompt_version.clone(),
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error_code: row.error_code.clone(),
            error_message: row.error_message.clone(),
            error_retryable: row.error_retryable,
            result: row.result.clone(),
            poll_after_ms: (!status.is_terminal()).then_some(POLL_AFTER_MS),
        }
    }
}
