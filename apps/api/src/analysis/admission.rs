//! Admission: idempotent start-or-reuse, reads, and the polling limiter.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::queue::JobMessage;
use crate::analysis::schema::PromptVersion;
use crate::analysis::store::{
    AdmissionOutcome, AnalysisStore, DocumentStore, NewAnalysis, StatusUpdate,
    DEFAULT_LIST_LIMIT,
};
use crate::errors::{AppError, FieldIssue};
use crate::models::analysis::{AnalysisMode, AnalysisRow, AnalysisStatus, ErrorCode};
use crate::state::AppState;

/// A validated start request.
#[derive(Debug, Clone)]
pub struct StartParams {
    pub user_id: String,
    pub document_id: Uuid,
    pub job_description: String,
    pub prompt_version: PromptVersion,
    pub mode: AnalysisMode,
    pub allow_retry: bool,
}

/// Validates the raw request fields against the admission rules: mode is
/// parsed case-insensitively (default JOB_MATCH), promptVersion defaults to
/// the latest known, and JOB_MATCH requires a job description within the
/// configured code-point bounds.
pub fn validate_start_request(
    user_id: &str,
    document_id: Uuid,
    job_description: Option<&str>,
    prompt_version: Option<&str>,
    mode: Option<&str>,
    allow_retry: bool,
    min_jd_runes: usize,
    max_jd_runes: usize,
) -> Result<StartParams, Vec<FieldIssue>> {
    let mut issues = Vec::new();

    let mode = match mode {
        None => Some(AnalysisMode::JobMatch),
        Some(raw) => {
            let parsed = AnalysisMode::parse(raw);
            if parsed.is_none() {
                issues.push(FieldIssue::new("mode", "invalid"));
            }
            parsed
        }
    };

    let prompt_version = match prompt_version {
        None => Some(PromptVersion::latest()),
        Some(raw) if raw.trim().is_empty() => Some(PromptVersion::latest()),
        Some(raw) => {
            let parsed = PromptVersion::parse(raw);
            if parsed.is_none() {
                issues.push(FieldIssue::new("promptVersion", "unknown"));
            }
            parsed
        }
    };

    let job_description = job_description.unwrap_or_default().to_string();
    let jd_runes = job_description.chars().count();
    if mode == Some(AnalysisMode::JobMatch) {
        if jd_runes < min_jd_runes {
            issues.push(FieldIssue::new("jobDescription", "min_length"));
        } else if jd_runes > max_jd_runes {
            issues.push(FieldIssue::new("jobDescription", "max_length"));
        }
    } else if jd_runes > max_jd_runes {
        issues.push(FieldIssue::new("jobDescription", "max_length"));
    }

    let (Some(mode), Some(prompt_version)) = (mode, prompt_version) else {
        return Err(issues);
    };
    if !issues.is_empty() {
        return Err(issues);
    }

    Ok(StartParams {
        user_id: user_id.to_string(),
        document_id,
        job_description,
        prompt_version,
        mode,
        allow_retry,
    })
}

/// Idempotent admission per `(user, document)`: resolves or creates the
/// analysis record, charges quota once per created record, and enqueues
/// the job. Returns the record and whether it was created.
pub async fn start_or_reuse(
    state: &AppState,
    params: StartParams,
) -> Result<(AnalysisRow, bool), AppError> {
    let documents = DocumentStore::new(state.db.clone());
    documents
        .get_by_id(&params.user_id, params.document_id)
        .await
        .map_err(AppError::Internal)?
        .ok_or_else(|| AppError::NotFound(format!("Document {} not found", params.document_id)))?;

    let proposed = NewAnalysis {
        id: Uuid::new_v4(),
        user_id: params.user_id.clone(),
        document_id: params.document_id,
        job_description: params.job_description.clone(),
        mode: params.mode.as_str().to_string(),
        prompt_version: params.prompt_version.as_str().to_string(),
        analysis_version: state.config.analysis_version.clone(),
        provider: state.config.llm_provider.clone(),
        model: state.config.llm_model.clone(),
    };

    let store = AnalysisStore::new(state.db.clone());
    let outcome = store
        .get_or_create_for_document(&proposed, params.allow_retry, Some(state.quota.as_ref()))
        .await
        .map_err(AppError::Internal)?;

    let row = match outcome {
        AdmissionOutcome::LimitReached => return Err(AppError::LimitReached),
        AdmissionOutcome::RetryRequired(_) => return Err(AppError::RetryRequired),
        AdmissionOutcome::Reused(row) => {
            info!(
                analysis_id = %row.id,
                status = %row.status,
                "Reusing existing analysis for document"
            );
            return Ok((row, false));
        }
        AdmissionOutcome::Created(row) => row,
    };

    // Charge exactly once per created record, before enqueue. The
    // can_consume pre-check is not serialized across a user's documents,
    // so near the quota boundary this conditional charge is the actual
    // enforcement point.
    let charged = state
        .quota
        .consume(&row.user_id, 1)
        .await
        .map_err(AppError::Internal)?;
    if !charged {
        // The just-created record cannot be worked for free and must not
        // be served by later reuse lookups; resolve it as FAILED.
        let resolved = store
            .update_status_result_and_error(
                row.id,
                StatusUpdate {
                    status: Some(AnalysisStatus::Failed),
                    expect_status: Some(AnalysisStatus::Queued),
                    error_code: Some(ErrorCode::Validation),
                    error_message: Some("analysis limit reached before charge".to_string()),
                    error_retryable: Some(false),
                    ..Default::default()
                },
            )
            .await
            .map_err(AppError::Internal)?;
        if !resolved {
            warn!(
                analysis_id = %row.id,
                "Uncharged analysis left QUEUED, could not mark FAILED"
            );
        }
        return Err(AppError::LimitReached);
    }

    // An enqueue failure leaves the record QUEUED; a later worker sweep or
    // explicit retry can still pick it up.
    let request_id = Uuid::new_v4();
    state.queue.send(&JobMessage::new(row.id, request_id)).await?;

    info!(
        analysis_id = %row.id,
        request_id = %request_id,
        mode = %row.mode,
        prompt_version = %row.prompt_version,
        "Enqueued analysis job"
    );
    Ok((row, true))
}

/// Loads one analysis, enforcing ownership and the poll rate limit.
pub async fn get_analysis(
    state: &AppState,
    user_id: &str,
    analysis_id: Uuid,
) -> Result<AnalysisRow, AppError> {
    let store = AnalysisStore::new(state.db.clone());
    let row = store
        .get_by_id(analysis_id)
        .await
        .map_err(AppError::Internal)?
        .filter(|row| row.user_id == user_id)
        .ok_or_else(|| AppError::NotFound(format!("Analysis {analysis_id} not found")))?;

    if let Err(retry_after_ms) = state.poll_limiter.check(user_id, row.document_id) {
        return Err(AppError::PollRateLimited { retry_after_ms });
    }

    Ok(row)
}

/// Lists the user's analyses, newest first.
pub async fn list_analyses(
    state: &AppState,
    user_id: &str,
    limit: Option<i64>,
    offset: Option<i64>,
) -> Result<Vec<AnalysisRow>, AppError> {
    let store = AnalysisStore::new(state.db.clone());
    store
        .list_by_user(
            user_id,
            limit.unwrap_or(DEFAULT_LIST_LIMIT),
            offset.unwrap_or(0),
        )
        .await
        .map_err(AppError::Internal)
}

/// Best-effort per `(user, document)` poll limiter. Purely an optimization:
/// a missed entry only means one extra read.
pub struct PollLimiter {
    window: Duration,
    last_seen: Mutex<HashMap<(String, Uuid), Instant>>,
}

impl PollLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Records a poll. `Err` carries the suggested wait in milliseconds.
    pub fn check(&self, user_id: &str, document_id: Uuid) -> Result<(), u64> {
        let key = (user_id.to_string(), document_id);
        let now = Instant::now();

        let mut last_seen = match self.last_seen.lock() {
            Ok(guard) => guard,
            // A poisoned limiter must not block reads.
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(previous) = last_seen.get(&key) {
            let elapsed = now.duration_since(*previous);
            if elapsed < self.window {
                let remaining = self.window - elapsed;
                return Err(remaining.as_millis().max(1) as u64);
            }
        }

        last_seen.insert(key, now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: usize = 300;
    const MAX: usize = 50_000;

    fn validate(
        jd: Option<&str>,
        version: Option<&str>,
        mode: Option<&str>,
    ) -> Result<StartParams, Vec<FieldIssue>> {
        validate_start_request(
            "u1",
            Uuid::new_v4(),
            jd,
            version,
            mode,
            false,
            MIN,
            MAX,
        )
    }

    #[test]
    fn test_defaults_applied() {
        let jd = "a".repeat(300);
        let params = validate(Some(&jd), None, None).unwrap();
        assert_eq!(params.mode, AnalysisMode::JobMatch);
        assert_eq!(params.prompt_version, PromptVersion::V2_3);
    }

    #[test]
    fn test_job_match_jd_bounds() {
        let short = "a".repeat(299);
        let issues = validate(Some(&short), None, None).unwrap_err();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "jobDescription");
        assert_eq!(issues[0].issue, "min_length");

        let exact = "a".repeat(300);
        assert!(validate(Some(&exact), None, None).is_ok());

        let long = "a".repeat(50_001);
        let issues = validate(Some(&long), None, None).unwrap_err();
        assert_eq!(issues[0].issue, "max_length");
    }

    #[test]
    fn test_jd_bounds_count_code_points_not_bytes() {
        // 300 two-byte characters: valid by rune count.
        let jd = "é".repeat(300);
        assert!(validate(Some(&jd), None, None).is_ok());
    }

    #[test]
    fn test_ats_mode_allows_missing_jd() {
        let params = validate(None, None, Some("ats")).unwrap();
        assert_eq!(params.mode, AnalysisMode::Ats);
        assert_eq!(params.job_description, "");
    }

    #[test]
    fn test_mode_is_case_insensitive() {
        assert!(validate(None, None, Some("ATS")).is_ok());
        assert!(validate(None, None, Some("Ats")).is_ok());
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let issues = validate(None, None, Some("cover_letter")).unwrap_err();
        assert!(issues.iter().any(|i| i.field == "mode"));
    }

    #[test]
    fn test_unknown_prompt_version_rejected() {
        let jd = "a".repeat(300);
        let issues = validate(Some(&jd), Some("v9"), None).unwrap_err();
        assert!(issues.iter().any(|i| i.field == "promptVersion" && i.issue == "unknown"));
    }

    #[test]
    fn test_empty_prompt_version_defaults_to_latest() {
        let jd = "a".repeat(300);
        let params = validate(Some(&jd), Some(""), None).unwrap();
        assert_eq!(params.prompt_version, PromptVersion::latest());
    }

    #[test]
    fn test_multiple_issues_reported_together() {
        let issues = validate(Some("too short"), Some("v9"), None).unwrap_err();
        assert_eq!(issues.len(), 2);
        assert!(issues.iter().any(|i| i.field == "promptVersion"));
        assert!(issues.iter().any(|i| i.field == "jobDescription"));
    }

    #[test]
    fn test_poll_limiter_allows_first_and_blocks_second() {
        let limiter = PollLimiter::new(Duration::from_secs(60));
        let doc = Uuid::new_v4();

        assert!(limiter.check("u1", doc).is_ok());
        let retry_after = limiter.check("u1", doc).unwrap_err();
        assert!(retry_after > 0 && retry_after <= 60_000);
    }

    #[test]
    fn test_poll_limiter_is_scoped_per_user_and_document() {
        let limiter = PollLimiter::new(Duration::from_secs(60));
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();

        assert!(limiter.check("u1", doc_a).is_ok());
        assert!(limiter.check("u2", doc_a).is_ok());
        assert!(limiter.check("u1", doc_b).is_ok());
        assert!(limiter.check("u1", doc_a).is_err());
    }

    #[test]
    fn test_poll_limiter_zero_window_never_blocks() {
        let limiter = PollLimiter::new(Duration::ZERO);
        let doc = Uuid::new_v4();
        assert!(limiter.check("u1", doc).is_ok());
        assert!(limiter.check("u1", doc).is_ok());
    }
}
