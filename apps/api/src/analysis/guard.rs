//! Content guard for rewritten bullets.
//!
//! Bullet rewrites that claim resume-sourced metrics must not lean on vague
//! impact words. Detection is lexical: case-insensitive, with Unicode dashes
//! folded to `-` so "double–digit" and "double-digit" match alike.

use serde::Serialize;
use thiserror::Error;

use crate::analysis::schema::{AnalysisV2, EVIDENCE_NOT_FOUND};

/// Impact terms a bullet may not use without a concrete figure.
pub const FORBIDDEN_IMPACT_TERMS: &[&str] = &[
    "double-digit",
    "significant",
    "substantial",
    "massive",
    "remarkable",
];

/// Placeholder key added when a bullet is downgraded to placeholder metrics.
pub const GROWTH_PLACEHOLDER: &str = "revenue_growth_pct";

const DOUBLE_DIGIT_REPLACEMENT: &str = "X% (replace with exact figure)";
const VAGUE_REPLACEMENT: &str = "measurable";
const REWRITE_RATIONALE_SUFFIX: &str = "Replace placeholders before final submission.";

#[derive(Debug, Clone, Serialize)]
pub struct ContentViolation {
    pub section: String,
    pub term: String,
    pub bullet: String,
}

#[derive(Debug, Error)]
#[error("llm output content invalid: {} bullet(s) use forbidden impact terms", .violations.len())]
pub struct ContentError {
    pub violations: Vec<ContentViolation>,
}

/// Folds a char for matching: ASCII-lowercased, with hyphen and dash
/// variants mapped to `-`. One char in, one char out, so indices into the
/// folded text line up with the original.
fn fold_char(c: char) -> char {
    match c {
        '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2015}' => '-',
        _ => c.to_ascii_lowercase(),
    }
}

fn fold(text: &str) -> String {
    text.chars().map(fold_char).collect()
}

/// Returns the first forbidden term present in `text`, if any.
pub fn find_forbidden_term(text: &str) -> Option<&'static str> {
    let folded = fold(text);
    FORBIDDEN_IMPACT_TERMS
        .iter()
        .filter(|term| folded.contains(*term))
        .min_by_key(|term| folded.find(*term))
        .copied()
}

/// Scans every bullet rewrite for forbidden impact terms.
///
/// A bullet fails when a forbidden term appears and either (a) it claims its
/// metrics come from the resume, or (b) it claims placeholder metrics but
/// names no placeholders.
pub fn validate_content(payload: &AnalysisV2) -> Result<(), ContentError> {
    let mut violations = Vec::new();

    for bullet in payload.bullet_rewrites.iter().flatten() {
        let Some(term) = find_forbidden_term(&bullet.after) else {
            continue;
        };

        // Absent metricsSource normalizes to "resume" downstream.
        let metrics_source = bullet.metrics_source.as_deref().unwrap_or("resume");
        let fails = match metrics_source {
            "placeholder" => bullet.placeholders_needed.is_empty(),
            _ => true,
        };

        if fails {
            violations.push(ContentViolation {
                section: bullet.section.clone(),
                term: term.to_string(),
                bullet: bullet.after.clone(),
            });
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ContentError { violations })
    }
}

/// Replaces every forbidden term in `text`. "double-digit" becomes an
/// explicit placeholder figure; the vague scale words become "measurable".
pub fn scrub_forbidden_terms(text: &str) -> (String, bool) {
    let chars: Vec<char> = text.chars().collect();
    let folded: Vec<char> = chars.iter().map(|&c| fold_char(c)).collect();

    let mut out = String::with_capacity(text.len());
    let mut changed = false;
    let mut i = 0;
    'outer: while i < chars.len() {
        for term in FORBIDDEN_IMPACT_TERMS {
            let len = term.chars().count();
            if i + len <= folded.len() && folded[i..i + len].iter().copied().eq(term.chars()) {
                out.push_str(if *term == "double-digit" {
                    DOUBLE_DIGIT_REPLACEMENT
                } else {
                    VAGUE_REPLACEMENT
                });
                i += len;
                changed = true;
                continue 'outer;
            }
        }
        out.push(chars[i]);
        i += 1;
    }

    (out, changed)
}

/// Deterministic last-resort rewrite, applied when the LLM repair round
/// still produces forbidden terms. Affected bullets are downgraded to
/// placeholder metrics so the user is forced to supply real figures.
/// Returns the number of bullets rewritten.
pub fn apply_placeholder_rewrite(payload: &mut AnalysisV2) -> usize {
    let mut rewritten = 0;

    for bullet in payload.bullet_rewrites.iter_mut().flatten() {
        let (scrubbed, changed) = scrub_forbidden_terms(&bullet.after);
        if !changed {
            continue;
        }

        bullet.after = scrubbed;
        bullet.metrics_source = Some("placeholder".to_string());
        bullet.claim_support = Some("placeholder".to_string());
        bullet.evidence = Some(EVIDENCE_NOT_FOUND.to_string());
        if !bullet
            .placeholders_needed
            .iter()
            .any(|p| p == GROWTH_PLACEHOLDER)
        {
            bullet.placeholders_needed.push(GROWTH_PLACEHOLDER.to_string());
        }
        if !bullet.rationale.ends_with(REWRITE_RATIONALE_SUFFIX) {
            if !bullet.rationale.is_empty() {
                bullet.rationale.push(' ');
            }
            bullet.rationale.push_str(REWRITE_RATIONALE_SUFFIX);
        }
        rewritten += 1;
    }

    rewritten
}

// ────────────────────────────────────────────────────────────────────────────
// Guard with LLM repair round
// ────────────────────────────────────────────────────────────────────────────

/// Runs the content rules over a schema-valid payload. On violation, one
/// LLM repair round is attempted; if the repair still violates the rules,
/// the deterministic placeholder rewrite is applied and both schema and
/// content validation run again. v1 payloads predate bullet metrics
/// semantics and pass through untouched.
pub async fn enforce_with_repair(
    llm: &crate::llm_client::LlmGateway,
    store: &crate::analysis::store::AnalysisStore,
    analysis_id: uuid::Uuid,
    input: &crate::llm_client::AnalyzeInput,
    opts: &crate::llm_client::CallOptions,
    validated: crate::analysis::schema::VersionedAnalysis,
) -> anyhow::Result<crate::analysis::schema::VersionedAnalysis> {
    use crate::analysis::prompts::CONTENT_REPAIR_SYSTEM;
    use crate::analysis::schema::{parse_and_validate, validate_v2, VersionedAnalysis};

    let version = validated.version();
    let Some(payload) = validated.v2_payload() else {
        return Ok(validated);
    };
    if validate_content(payload).is_ok() {
        return Ok(validated);
    }

    tracing::warn!(
        analysis_id = %analysis_id,
        "bullet rewrites violate content rules, running LLM repair round"
    );

    let repair_opts = opts.clone().with_extra_system(CONTENT_REPAIR_SYSTEM);
    let outcome = llm.analyze(input, &repair_opts).await?;
    store.update_analysis_raw(analysis_id, &outcome.raw).await?;

    let base = match parse_and_validate(&outcome.raw, version) {
        Ok(repaired) => {
            if repaired
                .v2_payload()
                .is_some_and(|p| validate_content(p).is_ok())
            {
                return Ok(repaired);
            }
            repaired
        }
        // A repair round that broke the schema is ignored; the original
        // validated payload is the rewrite base instead.
        Err(_) => validated,
    };

    let mut payload = base
        .v2_payload()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("llm output invalid: repair lost the payload"))?;

    let rewritten = apply_placeholder_rewrite(&mut payload);
    tracing::info!(
        analysis_id = %analysis_id,
        "applied deterministic placeholder rewrite to {rewritten} bullet(s)"
    );

    validate_v2(&mut payload, version)?;
    validate_content(&payload)?;

    VersionedAnalysis::from_v2(version, payload)
        .ok_or_else(|| anyhow::anyhow!("llm output invalid: rewrite produced no payload"))
}
