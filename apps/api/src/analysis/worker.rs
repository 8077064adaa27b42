//! Background analysis workers.
//!
//! Each worker consumes the job queue and drives one analysis at a time
//! through the pipeline: claim → extract text → LLM → schema validation →
//! content guard → normalize → recommendations → COMPLETED. Every failure
//! is classified, sanitized, and persisted as a FAILED transition, so
//! errors never escape to the HTTP caller.

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::analysis::normalize::{normalize, NormalizeContext};
use crate::analysis::recommend::build_recommendations;
use crate::analysis::schema::{self, PromptVersion};
use crate::analysis::store::{AnalysisStore, DocumentStore, StatusUpdate};
use crate::analysis::{guard, queue::JobQueue};
use crate::extraction::extract_text;
use crate::llm_client::{AnalyzeInput, CallOptions};
use crate::models::analysis::{AnalysisRow, AnalysisStatus, ErrorCode};
use crate::models::document::DocumentRow;
use crate::state::AppState;

const QUEUE_POLL_SECS: f64 = 1.0;
const MAX_ERROR_MESSAGE_RUNES: usize = 500;

/// Spawns `concurrency` workers and waits for all of them to drain after
/// the shutdown signal flips.
pub async fn run_worker_pool(state: AppState, shutdown: watch::Receiver<bool>) {
    let concurrency = state.config.worker_concurrency.max(1);
    info!("Starting {concurrency} analysis worker(s)");

    let mut handles = Vec::with_capacity(concurrency);
    for worker_id in 0..concurrency {
        let state = state.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(worker_loop(worker_id, state, shutdown)));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Worker task panicked: {e}");
        }
    }
    info!("Analysis worker pool drained");
}

async fn worker_loop(worker_id: usize, state: AppState, shutdown: watch::Receiver<bool>) {
    let queue: &JobQueue = &state.queue;

    loop {
        if *shutdown.borrow() {
            info!("Worker {worker_id} shutting down");
            return;
        }

        let claimed = match queue.receive(QUEUE_POLL_SECS).await {
            Ok(Some(claimed)) => claimed,
            Ok(None) => continue,
            Err(e) => {
                warn!("Worker {worker_id} queue receive failed: {e}");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                continue;
            }
        };

        let analysis_id = claimed.message.analysis_id;
        let request_id = claimed.message.request_id;
        info!(
            worker_id,
            analysis_id = %analysis_id,
            request_id = %request_id,
            "Processing analysis job"
        );

        if let Err(e) = process_analysis(&state, analysis_id, request_id).await {
            error!(analysis_id = %analysis_id, "Analysis processing failed terminally: {e:?}");
        }

        // Ack regardless: the record carries the outcome, and terminal
        // records make redelivery a no-op anyway.
        if let Err(e) = queue.ack(&claimed).await {
            warn!(analysis_id = %analysis_id, "Job ack failed (redelivery is safe): {e}");
        }
    }
}

/// Worker entry point for one analysis. Errors are recorded on the row;
/// the returned error only signals that even that write failed.
pub async fn process_analysis(
    state: &AppState,
    analysis_id: Uuid,
    request_id: Uuid,
) -> anyhow::Result<()> {
    let store = AnalysisStore::new(state.db.clone());

    let Some(row) = store.get_by_id(analysis_id).await? else {
        warn!(analysis_id = %analysis_id, "Job references an unknown analysis, dropping");
        return Ok(());
    };

    // Redelivered terminal records are a successful no-op.
    if row.status().is_terminal() {
        info!(
            analysis_id = %analysis_id,
            status = row.status().as_str(),
            "Analysis already terminal, acking redelivery"
        );
        return Ok(());
    }

    // QUEUED → PROCESSING claim. A concurrent claim (conditional write
    // matched nothing, no DB error) means another worker owns the record.
    let claimed = store
        .update_status_result_and_error(
            analysis_id,
            StatusUpdate {
                status: Some(AnalysisStatus::Processing),
                expect_status: Some(AnalysisStatus::Queued),
                started_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| anyhow::anyhow!("set processing failed: {e}"))?;
    if !claimed {
        warn!(analysis_id = %analysis_id, "Analysis already claimed by another worker");
        return Ok(());
    }

    match run_pipeline(state, &store, &row, request_id).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let message = format!("{e:#}");
            let (code, retryable) = classify_failure(&message);
            warn!(
                analysis_id = %analysis_id,
                error_code = code.as_str(),
                retryable,
                "Analysis failed: {message}"
            );

            let recorded = store
                .update_status_result_and_error(
                    analysis_id,
                    StatusUpdate {
                        status: Some(AnalysisStatus::Failed),
                        error_code: Some(code),
                        error_message: Some(sanitize_error_message(&message)),
                        error_retryable: Some(retryable),
                        completed_at: Some(Utc::now()),
                        ..Default::default()
                    },
                )
                .await;

            if let Err(write_err) = recorded {
                error!(
                    analysis_id = %analysis_id,
                    "Failed to record FAILED transition: {write_err}"
                );
                return Err(write_err);
            }
            Ok(())
        }
    }
}

async fn run_pipeline(
    state: &AppState,
    store: &AnalysisStore,
    row: &AnalysisRow,
    request_id: Uuid,
) -> anyhow::Result<()> {
    let version = PromptVersion::parse(&row.prompt_version).ok_or_else(|| {
        anyhow::anyhow!(
            "validation: unsupported prompt version '{}'",
            row.prompt_version
        )
    })?;

    let documents = DocumentStore::new(state.db.clone());
    let document = documents
        .get_by_id(&row.user_id, row.document_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("document {} not found", row.document_id))?;

    let resume_text = load_resume_text(state, &documents, &document).await?;

    let input = AnalyzeInput {
        resume_text,
        job_description: row.job_description.clone(),
        prompt_version: version,
        target_role: String::new(),
    };
    let opts = CallOptions::new(request_id);

    // LLM call + raw persistence + schema validation (one fix-JSON round).
    let (validated, prompt_hash) =
        schema::validate_with_retry(&state.llm, store, row.id, &input, version, &opts).await?;

    // Content guard; may run one more LLM round and a deterministic rewrite.
    let validated =
        guard::enforce_with_repair(&state.llm, store, row.id, &input, &opts, validated).await?;

    store
        .update_prompt_metadata(row.id, version.as_str(), prompt_hash.as_deref())
        .await?;

    let ctx = NormalizeContext {
        mode: row.mode(),
        prompt_version: row.prompt_version.clone(),
        model: row.model.clone(),
        job_description_provided: row.job_description_provided(),
    };
    let mut result = normalize(&validated, &ctx)?;
    result.recommendations = build_recommendations(&result);

    let result_value = serde_json::to_value(&result)
        .map_err(|e| anyhow::anyhow!("analysis result serialization failed: {e}"))?;

    let completed_at = Utc::now();
    store
        .update_analysis_result(row.id, &result_value, completed_at)
        .await?;
    store
        .update_status_result_and_error(
            row.id,
            StatusUpdate {
                status: Some(AnalysisStatus::Completed),
                result: Some(result_value),
                completed_at: Some(completed_at),
                ..Default::default()
            },
        )
        .await?;

    info!(
        analysis_id = %row.id,
        final_score = result.final_score,
        "Analysis completed"
    );
    Ok(())
}

/// Loads the extracted resume text, extracting and persisting it first if
/// no extraction key is recorded yet. The extraction key is written once;
/// losers of the race read the winner's object.
async fn load_resume_text(
    state: &AppState,
    documents: &DocumentStore,
    document: &DocumentRow,
) -> anyhow::Result<String> {
    if let Some(key) = &document.extracted_text_key {
        return state.object_store.open_string(key).await;
    }

    let original = state.object_store.open(&document.storage_key).await?;
    let text = extract_text(&original, &document.mime_type)?;

    let key = format!("documents/{}/extracted.txt", document.id);
    state
        .object_store
        .save_with_key(&key, "text/plain; charset=utf-8", bytes::Bytes::from(text.clone()))
        .await?;

    let winner = documents
        .update_extraction(&document.user_id, document.id, &key, Utc::now())
        .await?;

    if winner == key {
        Ok(text)
    } else {
        state.object_store.open_string(&winner).await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Failure classification
// ────────────────────────────────────────────────────────────────────────────

/// Maps an opaque error message onto `(error_code, retryable)` by ordered
/// substring match over the lowercased text. The LLM and IO boundaries
/// produce strings, so classification lives in this one table.
pub fn classify_failure(message: &str) -> (ErrorCode, bool) {
    let lower = message.to_lowercase();

    if lower.contains("context deadline")
        || lower.contains("openai request timeout")
        || (lower.contains("timeout") && lower.contains("llm"))
    {
        return (ErrorCode::LlmTimeout, true);
    }

    if lower.contains("schema")
        || lower.contains("llm output invalid")
        || lower.contains("llm output parse")
        || lower.contains("llm validate")
        || lower.contains("llm output")
    {
        return (ErrorCode::LlmSchemaMismatch, false);
    }

    if lower.contains("validation") && !lower.contains("llm") {
        return (ErrorCode::Validation, false);
    }

    const STORAGE_MARKERS: &[&str] = &[
        "document",
        "storage",
        "analysis raw",
        "analysis result",
        "prompt metadata",
        "set processing",
    ];
    if STORAGE_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return (ErrorCode::Storage, true);
    }

    (ErrorCode::Internal, false)
}

/// Collapses whitespace (newlines included) to single spaces, trims, and
/// bounds the message to 500 code points. Raw payloads are stored
/// separately, so the message only has to orient an operator.
pub fn sanitize_error_message(message: &str) -> String {
    let collapsed = message.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_ERROR_MESSAGE_RUNES {
        collapsed
    } else {
        collapsed.chars().take(MAX_ERROR_MESSAGE_RUNES).collect()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_timeouts_are_retryable() {
        for message in [
            "context deadline exceeded",
            "openai request timeout",
            "llm call hit client timeout",
        ] {
            let (code, retryable) = classify_failure(message);
            assert_eq!(code, ErrorCode::LlmTimeout, "message: {message}");
            assert!(retryable);
        }
    }

    #[test]
    fn test_classify_schema_mismatches_not_retryable() {
        for message in [
            "schema constraint violated",
            "llm output invalid: missing summary",
            "llm output parse failed: expected value",
            "llm validate: scoreBreakdown sums to 95",
            "llm output empty content",
        ] {
            let (code, retryable) = classify_failure(message);
            assert_eq!(code, ErrorCode::LlmSchemaMismatch, "message: {message}");
            assert!(!retryable);
        }
    }

    #[test]
    fn test_classify_validation_without_llm() {
        let (code, retryable) = classify_failure("validation: unsupported prompt version 'v9'");
        assert_eq!(code, ErrorCode::Validation);
        assert!(!retryable);
    }

    #[test]
    fn test_validation_with_llm_is_schema_mismatch() {
        // "llm validate" wins over the bare "validation" rule.
        let (code, _) = classify_failure("llm validate: validation failed");
        assert_eq!(code, ErrorCode::LlmSchemaMismatch);
    }

    #[test]
    fn test_classify_storage_markers_retryable() {
        for message in [
            "document load failed",
            "storage read failed for key 'x'",
            "analysis raw persist failed",
            "analysis result persist failed",
            "prompt metadata persist failed",
            "set processing failed: pool closed",
        ] {
            let (code, retryable) = classify_failure(message);
            assert_eq!(code, ErrorCode::Storage, "message: {message}");
            assert!(retryable, "message: {message}");
        }
    }

    #[test]
    fn test_classify_default_internal() {
        let (code, retryable) = classify_failure("something nobody anticipated");
        assert_eq!(code, ErrorCode::Internal);
        assert!(!retryable);
    }

    #[test]
    fn test_timeout_rule_wins_over_storage_markers() {
        // First match wins: a timeout message mentioning a document is
        // still a timeout.
        let (code, _) = classify_failure("llm timeout while loading document");
        assert_eq!(code, ErrorCode::LlmTimeout);
    }

    #[test]
    fn test_sanitize_collapses_newlines() {
        let message = "first line\nsecond line\r\n\tthird";
        assert_eq!(sanitize_error_message(message), "first line second line third");
    }

    #[test]
    fn test_sanitize_trims_and_truncates_to_500_runes() {
        let message = format!("  {}  ", "x".repeat(600));
        let sanitized = sanitize_error_message(&message);
        assert_eq!(sanitized.chars().count(), 500);
        assert!(!sanitized.starts_with(' '));
    }

    #[test]
    fn test_sanitize_counts_code_points_not_bytes() {
        let message = "é".repeat(600);
        let sanitized = sanitize_error_message(&message);
        assert_eq!(sanitized.chars().count(), 500);
    }
}
