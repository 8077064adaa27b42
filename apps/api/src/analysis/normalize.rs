//! Normalization of versioned LLM output into the one canonical result shape.
//!
//! Whatever prompt version produced the payload, clients see a single shape:
//! arrays never null, deterministic orderings, clamped scores, and derived
//! final/match scores.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::recommend::Recommendation;
use crate::analysis::schema::{
    AnalysisV1, AnalysisV2, RawActionPlan, RawBulletRewrite, RawIssue, RawMeta, RawSummary,
    ScoreBreakdown, ScoreExplanation, VersionedAnalysis, EVIDENCE_NOT_FOUND, MAX_EVIDENCE_RUNES,
};
use crate::models::analysis::AnalysisMode;

#[derive(Debug, Error)]
#[error("llm output invalid: {0}")]
pub struct NormalizeError(String);

fn invalid(msg: impl Into<String>) -> NormalizeError {
    NormalizeError(msg.into())
}

/// Record-side context the normalizer falls back to when the payload's own
/// meta block is incomplete.
#[derive(Debug, Clone)]
pub struct NormalizeContext {
    pub mode: AnalysisMode,
    pub prompt_version: String,
    pub model: String,
    pub job_description_provided: bool,
}

// ────────────────────────────────────────────────────────────────────────────
// Canonical shape
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalMeta {
    pub prompt_version: String,
    pub model: String,
    pub job_description_provided: bool,
    pub confidence: f64,
    pub assumptions: Vec<String>,
    pub limitations: Vec<String>,
    pub mode: String,
    pub primary_score_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalSummary {
    pub overall_assessment: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalMissingKeywords {
    pub from_job_description: Vec<String>,
    pub industry_common: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalAts {
    pub score: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_breakdown: Option<ScoreBreakdown>,
    pub score_reasoning: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_explanation: Option<ScoreExplanation>,
    pub missing_keywords: CanonicalMissingKeywords,
    pub formatting_issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalIssue {
    pub severity: String,
    pub section: String,
    pub problem: String,
    pub why_it_matters: String,
    pub suggestion: String,
    pub evidence: String,
    pub fix_effort: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    pub auto_fixable: bool,
    pub requires_user_input: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalBulletRewrite {
    pub section: String,
    pub before: String,
    pub after: String,
    pub rationale: String,
    pub metrics_source: String,
    pub placeholders_needed: Vec<String>,
    pub claim_support: String,
    pub evidence: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalActionPlan {
    pub quick_wins: Vec<String>,
    pub medium_effort: Vec<String>,
    pub deep_fixes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanonicalResult {
    pub meta: CanonicalMeta,
    pub summary: CanonicalSummary,
    pub ats: CanonicalAts,
    pub issues: Vec<CanonicalIssue>,
    pub bullet_rewrites: Vec<CanonicalBulletRewrite>,
    pub missing_information: Vec<String>,
    pub action_plan: CanonicalActionPlan,
    pub final_score: i64,
    pub match_score: i64,
    pub recommendations: Vec<Recommendation>,
}

// ────────────────────────────────────────────────────────────────────────────
// Normalization
// ────────────────────────────────────────────────────────────────────────────

/// Collapses a validated versioned payload into the canonical result.
/// Recommendations are attached afterwards by the recommendation builder.
pub fn normalize(payload: &VersionedAnalysis, ctx: &NormalizeContext) -> Result<CanonicalResult, NormalizeError> {
    match payload {
        VersionedAnalysis::V1(p) => normalize_v1(p, ctx),
        VersionedAnalysis::V2(p)
        | VersionedAnalysis::V2_1(p)
        | VersionedAnalysis::V2_2(p)
        | VersionedAnalysis::V2_3(p) => normalize_v2(p, ctx),
    }
}

fn normalize_v1(payload: &AnalysisV1, ctx: &NormalizeContext) -> Result<CanonicalResult, NormalizeError> {
    let summary = required_summary(payload.summary.as_ref())?;
    let ats_raw = payload.ats.as_ref().ok_or_else(|| invalid("missing ats"))?;
    let issues = payload.issues.as_ref().ok_or_else(|| invalid("missing issues"))?;
    let bullets = payload
        .bullet_rewrites
        .as_ref()
        .ok_or_else(|| invalid("missing bulletRewrites"))?;
    let missing_information = payload
        .missing_information
        .as_ref()
        .ok_or_else(|| invalid("missing missingInformation"))?;
    let action_plan = payload
        .action_plan
        .as_ref()
        .ok_or_else(|| invalid("missing actionPlan"))?;

    let meta = normalize_meta(payload.meta.as_ref(), ctx);

    // The v1 prompt returned one flat keyword list; file it under the bucket
    // matching whether a job description was supplied.
    let mut missing_keywords = CanonicalMissingKeywords::default();
    if meta.job_description_provided {
        missing_keywords.from_job_description = ats_raw.missing_keywords.clone();
    } else {
        missing_keywords.industry_common = ats_raw.missing_keywords.clone();
    }

    let ats = CanonicalAts {
        score: clamp_score(ats_raw.score),
        score_breakdown: None,
        score_reasoning: vec![],
        score_explanation: None,
        missing_keywords,
        formatting_issues: ats_raw.formatting_issues.clone(),
    };

    finish(
        meta,
        summary,
        ats,
        issues,
        bullets,
        missing_information.clone(),
        action_plan,
        payload.final_score,
        payload.match_score,
        ctx,
    )
}

fn normalize_v2(payload: &AnalysisV2, ctx: &NormalizeContext) -> Result<CanonicalResult, NormalizeError> {
    let summary = required_summary(payload.summary.as_ref())?;
    let ats_raw = payload.ats.as_ref().ok_or_else(|| invalid("missing ats"))?;
    let issues = payload.issues.as_ref().ok_or_else(|| invalid("missing issues"))?;
    let bullets = payload
        .bullet_rewrites
        .as_ref()
        .ok_or_else(|| invalid("missing bulletRewrites"))?;
    let missing_information = payload
        .missing_information
        .as_ref()
        .ok_or_else(|| invalid("missing missingInformation"))?;
    let action_plan = payload
        .action_plan
        .as_ref()
        .ok_or_else(|| invalid("missing actionPlan"))?;

    let meta = normalize_meta(payload.meta.as_ref(), ctx);

    let ats = CanonicalAts {
        score: clamp_score(ats_raw.score),
        score_breakdown: Some(ats_raw.score_breakdown),
        score_reasoning: ats_raw.score_reasoning.clone(),
        score_explanation: ats_raw.score_explanation.clone(),
        missing_keywords: CanonicalMissingKeywords {
            from_job_description: ats_raw.missing_keywords.from_job_description.clone(),
            industry_common: ats_raw.missing_keywords.industry_common.clone(),
        },
        formatting_issues: ats_raw.formatting_issues.clone(),
    };

    finish(
        meta,
        summary,
        ats,
        issues,
        bullets,
        missing_information.clone(),
        action_plan,
        payload.final_score,
        payload.match_score,
        ctx,
    )
}

#[allow(clippy::too_many_arguments)]
fn finish(
    meta: CanonicalMeta,
    summary: CanonicalSummary,
    mut ats: CanonicalAts,
    issues: &[RawIssue],
    bullets: &[RawBulletRewrite],
    mut missing_information: Vec<String>,
    action_plan: &RawActionPlan,
    raw_final_score: Option<i64>,
    raw_match_score: Option<i64>,
    ctx: &NormalizeContext,
) -> Result<CanonicalResult, NormalizeError> {
    if !meta.job_description_provided {
        ats.missing_keywords.from_job_description.clear();
    }

    ats.missing_keywords.from_job_description.sort();
    ats.missing_keywords.industry_common.sort();
    ats.formatting_issues.sort();
    missing_information.sort();

    let mut action_plan = CanonicalActionPlan {
        quick_wins: action_plan.quick_wins.clone(),
        medium_effort: action_plan.medium_effort.clone(),
        deep_fixes: action_plan.deep_fixes.clone(),
    };
    action_plan.quick_wins.sort();
    action_plan.medium_effort.sort();
    action_plan.deep_fixes.sort();

    let issues: Vec<CanonicalIssue> = issues.iter().map(normalize_issue).collect();
    let bullet_rewrites: Vec<CanonicalBulletRewrite> = bullets.iter().map(normalize_bullet).collect();

    let missing_count = ats.missing_keywords.from_job_description.len() as i64;
    let final_score = match raw_final_score {
        Some(score) => clamp_score(score),
        None => match ctx.mode {
            AnalysisMode::JobMatch => match raw_match_score {
                Some(score) => clamp_score(score),
                None => (100 - 5 * missing_count).clamp(0, 100),
            },
            AnalysisMode::Ats => ats.score,
        },
    };
    let match_score = match (ctx.mode, raw_match_score) {
        (AnalysisMode::JobMatch, Some(score)) => clamp_score(score),
        _ => final_score,
    };

    Ok(CanonicalResult {
        meta,
        summary,
        ats,
        issues,
        bullet_rewrites,
        missing_information,
        action_plan,
        final_score,
        match_score,
        recommendations: vec![],
    })
}

fn required_summary(summary: Option<&RawSummary>) -> Result<CanonicalSummary, NormalizeError> {
    let summary = summary.ok_or_else(|| invalid("missing summary"))?;
    if summary.overall_assessment.trim().is_empty() {
        return Err(invalid("summary.overallAssessment is empty"));
    }
    Ok(CanonicalSummary {
        overall_assessment: summary.overall_assessment.clone(),
        strengths: summary.strengths.clone(),
        weaknesses: summary.weaknesses.clone(),
    })
}

fn normalize_meta(meta: Option<&RawMeta>, ctx: &NormalizeContext) -> CanonicalMeta {
    let raw = meta.cloned().unwrap_or_default();

    let prompt_version = raw
        .prompt_version
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| ctx.prompt_version.clone());
    let mut model = raw
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| ctx.model.clone());
    if model.trim().is_empty() {
        model = "unknown".to_string();
    }

    CanonicalMeta {
        prompt_version,
        model,
        job_description_provided: raw
            .job_description_provided
            .unwrap_or(ctx.job_description_provided),
        confidence: raw.confidence.unwrap_or(0.5),
        assumptions: raw.assumptions,
        limitations: raw.limitations,
        mode: ctx.mode.as_str().to_string(),
        primary_score_type: ctx.mode.as_str().to_string(),
    }
}

fn normalize_issue(issue: &RawIssue) -> CanonicalIssue {
    CanonicalIssue {
        severity: issue.severity.trim().to_lowercase(),
        section: issue.section.clone(),
        problem: issue.problem.clone(),
        why_it_matters: issue.why_it_matters.clone(),
        suggestion: issue.suggestion.clone(),
        evidence: normalize_evidence(issue.evidence.as_deref()),
        fix_effort: issue.fix_effort.clone().unwrap_or_default(),
        priority: issue.priority,
        auto_fixable: issue.auto_fixable,
        requires_user_input: issue.requires_user_input.clone(),
    }
}

fn normalize_bullet(bullet: &RawBulletRewrite) -> CanonicalBulletRewrite {
    CanonicalBulletRewrite {
        section: bullet.section.clone(),
        before: bullet.before.clone(),
        after: bullet.after.clone(),
        rationale: bullet.rationale.clone(),
        metrics_source: bullet
            .metrics_source
            .clone()
            .unwrap_or_else(|| "resume".to_string()),
        placeholders_needed: bullet.placeholders_needed.clone(),
        claim_support: bullet
            .claim_support
            .clone()
            .unwrap_or_else(|| "inferred".to_string()),
        evidence: normalize_evidence(bullet.evidence.as_deref()),
    }
}

/// Collapses runs of whitespace and bounds the string to 160 code points,
/// ellipsis included. The "notFound" sentinel passes through untouched.
pub fn normalize_evidence(evidence: Option<&str>) -> String {
    let Some(evidence) = evidence else {
        return EVIDENCE_NOT_FOUND.to_string();
    };
    if evidence == EVIDENCE_NOT_FOUND {
        return evidence.to_string();
    }

    let collapsed = evidence.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return EVIDENCE_NOT_FOUND.to_string();
    }

    if collapsed.chars().count() <= MAX_EVIDENCE_RUNES {
        return collapsed;
    }

    let mut truncated: String = collapsed.chars().take(MAX_EVIDENCE_RUNES - 1).collect();
    truncated.push('\u{2026}');
    truncated
}

fn clamp_score(score: i64) -> i64 {
    score.clamp(0, 100)
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::schema::tests::valid_v2_payload;
    use crate::analysis::schema::{parse_and_validate, PromptVersion};

    fn ctx(mode: AnalysisMode, jd: bool) -> NormalizeContext {
        NormalizeContext {
            mode,
            prompt_version: "v2_3".to_string(),
            model: "gpt-4o-mini".to_string(),
            job_description_provided: jd,
        }
    }

    fn v1_payload(raw: &str) -> VersionedAnalysis {
        parse_and_validate(raw, PromptVersion::V1).unwrap()
    }

    const V1_RAW: &str = r#"{
        "summary": {"overallAssessment": "ok", "strengths": [], "weaknesses": []},
        "ats": {"score": 150, "missingKeywords": ["b", "a", "c"], "formattingIssues": ["Zig-zag dates", "ALL CAPS headers"]},
        "issues": [],
        "bulletRewrites": [],
        "missingInformation": ["phone", "email"],
        "actionPlan": {"quickWins": ["w2", "w1"], "mediumEffort": [], "deepFixes": []}
    }"#;

    #[test]
    fn test_v1_score_clamped_and_keywords_sorted() {
        let result = normalize(&v1_payload(V1_RAW), &ctx(AnalysisMode::JobMatch, true)).unwrap();
        assert_eq!(result.ats.score, 100);
        assert_eq!(
            result.ats.missing_keywords.from_job_description,
            vec!["a", "b", "c"]
        );
        assert!(result.ats.missing_keywords.industry_common.is_empty());
    }

    #[test]
    fn test_v1_keywords_without_jd_go_to_industry_bucket() {
        let result = normalize(&v1_payload(V1_RAW), &ctx(AnalysisMode::Ats, false)).unwrap();
        assert!(result.ats.missing_keywords.from_job_description.is_empty());
        assert_eq!(result.ats.missing_keywords.industry_common, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_string_arrays_sorted_lexicographically() {
        let result = normalize(&v1_payload(V1_RAW), &ctx(AnalysisMode::JobMatch, true)).unwrap();
        assert_eq!(
            result.ats.formatting_issues,
            vec!["ALL CAPS headers", "Zig-zag dates"]
        );
        assert_eq!(result.missing_information, vec!["email", "phone"]);
        assert_eq!(result.action_plan.quick_wins, vec!["w1", "w2"]);
    }

    #[test]
    fn test_explicit_match_score_wins_in_job_match_mode() {
        let mut payload = valid_v2_payload();
        payload.match_score = Some(88);
        payload.ats.as_mut().unwrap().score = 74;
        let versioned = VersionedAnalysis::V2_3(payload);

        let result = normalize(&versioned, &ctx(AnalysisMode::JobMatch, true)).unwrap();
        assert_eq!(result.final_score, 88);
        assert_eq!(result.match_score, 88);
        assert_eq!(result.meta.primary_score_type, "JOB_MATCH");
    }

    #[test]
    fn test_job_match_score_derived_from_missing_keywords() {
        let mut payload = valid_v2_payload();
        payload.match_score = None;
        payload.ats.as_mut().unwrap().missing_keywords.from_job_description = vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
        ];
        let versioned = VersionedAnalysis::V2_3(payload);

        let result = normalize(&versioned, &ctx(AnalysisMode::JobMatch, true)).unwrap();
        assert_eq!(result.final_score, 85); // 100 - 5 * 3
        assert_eq!(result.match_score, 85);
    }

    #[test]
    fn test_derived_match_score_floors_at_zero() {
        let mut payload = valid_v2_payload();
        payload.match_score = None;
        payload.ats.as_mut().unwrap().missing_keywords.from_job_description =
            (0..30).map(|i| format!("kw{i:02}")).collect();
        let versioned = VersionedAnalysis::V2_3(payload);

        let result = normalize(&versioned, &ctx(AnalysisMode::JobMatch, true)).unwrap();
        assert_eq!(result.final_score, 0);
    }

    #[test]
    fn test_ats_mode_uses_ats_score() {
        let mut payload = valid_v2_payload();
        payload.meta.as_mut().unwrap().job_description_provided = Some(false);
        payload.ats.as_mut().unwrap().missing_keywords.from_job_description = vec![];
        let versioned = VersionedAnalysis::V2_3(payload);

        let result = normalize(&versioned, &ctx(AnalysisMode::Ats, false)).unwrap();
        assert_eq!(result.final_score, 74);
        assert_eq!(result.match_score, 74);
        assert_eq!(result.meta.primary_score_type, "ATS");
    }

    #[test]
    fn test_explicit_final_score_wins_over_everything() {
        let mut payload = valid_v2_payload();
        payload.final_score = Some(42);
        payload.match_score = Some(88);
        let versioned = VersionedAnalysis::V2_3(payload);

        let result = normalize(&versioned, &ctx(AnalysisMode::JobMatch, true)).unwrap();
        assert_eq!(result.final_score, 42);
        assert_eq!(result.match_score, 88);
    }

    #[test]
    fn test_jd_keywords_cleared_when_no_jd() {
        let mut payload = valid_v2_payload();
        payload.meta.as_mut().unwrap().job_description_provided = None;
        let versioned = VersionedAnalysis::V2_3(payload);

        let result = normalize(&versioned, &ctx(AnalysisMode::Ats, false)).unwrap();
        assert!(!result.meta.job_description_provided);
        assert!(result.ats.missing_keywords.from_job_description.is_empty());
    }

    #[test]
    fn test_meta_falls_back_to_record_values() {
        let mut payload = valid_v2_payload();
        payload.meta = None;
        let versioned = VersionedAnalysis::V2_3(payload);

        let result = normalize(&versioned, &ctx(AnalysisMode::JobMatch, true)).unwrap();
        assert_eq!(result.meta.prompt_version, "v2_3");
        assert_eq!(result.meta.model, "gpt-4o-mini");
        assert!(result.meta.job_description_provided);
    }

    #[test]
    fn test_meta_model_defaults_to_unknown() {
        let mut payload = valid_v2_payload();
        payload.meta.as_mut().unwrap().model = None;
        let versioned = VersionedAnalysis::V2_3(payload);

        let mut context = ctx(AnalysisMode::JobMatch, true);
        context.model = String::new();
        let result = normalize(&versioned, &context).unwrap();
        assert_eq!(result.meta.model, "unknown");
    }

    #[test]
    fn test_bullet_defaults_applied() {
        let mut payload = valid_v2_payload();
        let bullet = &mut payload.bullet_rewrites.as_mut().unwrap()[0];
        bullet.metrics_source = None;
        bullet.claim_support = None;
        bullet.evidence = None;
        let versioned = VersionedAnalysis::V2_3(payload);

        let result = normalize(&versioned, &ctx(AnalysisMode::JobMatch, true)).unwrap();
        let b = &result.bullet_rewrites[0];
        assert_eq!(b.metrics_source, "resume");
        assert_eq!(b.claim_support, "inferred");
        assert_eq!(b.evidence, EVIDENCE_NOT_FOUND);
    }

    #[test]
    fn test_evidence_whitespace_collapsed() {
        assert_eq!(
            normalize_evidence(Some("led  the\n\tplatform   team")),
            "led the platform team"
        );
    }

    #[test]
    fn test_evidence_truncated_to_160_runes_with_ellipsis() {
        let long = "word ".repeat(60);
        let normalized = normalize_evidence(Some(&long));
        assert_eq!(normalized.chars().count(), MAX_EVIDENCE_RUNES);
        assert!(normalized.ends_with('\u{2026}'));
    }

    #[test]
    fn test_evidence_sentinel_bypasses_truncation() {
        assert_eq!(normalize_evidence(Some(EVIDENCE_NOT_FOUND)), EVIDENCE_NOT_FOUND);
        assert_eq!(normalize_evidence(None), EVIDENCE_NOT_FOUND);
    }

    #[test]
    fn test_evidence_normalization_is_idempotent() {
        let once = normalize_evidence(Some("a  very   spaced    string"));
        let twice = normalize_evidence(Some(&once));
        assert_eq!(once, twice);

        let long = "word ".repeat(60);
        let once = normalize_evidence(Some(&long));
        let twice = normalize_evidence(Some(&once));
        assert_eq!(once, twice);
    }

    #[test]
    fn test_missing_required_top_level_fields_fail() {
        let raw = r#"{"summary": {"overallAssessment": "ok"}}"#;
        let payload = v1_payload(raw);
        let err = normalize(&payload, &ctx(AnalysisMode::Ats, false)).unwrap_err();
        assert!(err.to_string().contains("llm output invalid"));
    }

    #[test]
    fn test_empty_overall_assessment_fails() {
        let raw = r#"{
            "summary": {"overallAssessment": "   "},
            "ats": {"score": 50, "missingKeywords": [], "formattingIssues": []},
            "issues": [], "bulletRewrites": [], "missingInformation": [],
            "actionPlan": {"quickWins": [], "mediumEffort": [], "deepFixes": []}
        }"#;
        let err = normalize(&v1_payload(raw), &ctx(AnalysisMode::Ats, false)).unwrap_err();
        assert!(err.to_string().contains("overallAssessment"));
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let versioned = VersionedAnalysis::V2_3(valid_v2_payload());
        let context = ctx(AnalysisMode::JobMatch, true);
        let a = normalize(&versioned, &context).unwrap();
        let b = normalize(&versioned, &context).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_canonical_result_serializes_camel_case() {
        let versioned = VersionedAnalysis::V2_3(valid_v2_payload());
        let result = normalize(&versioned, &ctx(AnalysisMode::JobMatch, true)).unwrap();
        let json = serde_json::to_value(&result).unwrap();

        assert!(json.get("bulletRewrites").is_some());
        assert!(json.get("finalScore").is_some());
        assert!(json["meta"].get("primaryScoreType").is_some());
        assert!(json["ats"]["missingKeywords"].get("fromJobDescription").is_some());
        assert!(json.get("bullet_rewrites").is_none());
    }
}
