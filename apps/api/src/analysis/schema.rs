//! Versioned LLM output schemas — parse, shape validation, and repair.
//!
//! Each prompt version expects a specific response shape. Parsing produces a
//! tagged `VersionedAnalysis`; validation applies the version's constraints
//! and performs the deterministic score-breakdown repair where allowed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Known prompt versions. The stored `prompt_version` column is an open
/// string set; these are the versions this validator can check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptVersion {
    V1,
    V2,
    V2_1,
    V2_2,
    V2_3,
}

impl PromptVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptVersion::V1 => "v1",
            PromptVersion::V2 => "v2",
            PromptVersion::V2_1 => "v2_1",
            PromptVersion::V2_2 => "v2_2",
            PromptVersion::V2_3 => "v2_3",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "v1" => Some(PromptVersion::V1),
            "v2" => Some(PromptVersion::V2),
            "v2_1" => Some(PromptVersion::V2_1),
            "v2_2" => Some(PromptVersion::V2_2),
            "v2_3" => Some(PromptVersion::V2_3),
            _ => None,
        }
    }

    pub fn latest() -> Self {
        PromptVersion::V2_3
    }

    pub fn is_v2_plus(&self) -> bool {
        !matches!(self, PromptVersion::V1)
    }
}

/// Values `issue.requiresUserInput` entries may take.
pub const USER_INPUT_WHITELIST: &[&str] = &[
    "email",
    "phone",
    "linkedin",
    "crm_tools",
    "metrics",
    "team_size",
    "award_dates",
    "target_role",
];

/// The four fixed `scoreExplanation` component keys (v2_3).
pub const SCORE_EXPLANATION_KEYS: &[&str] = &[
    "atsReadability",
    "skillMatch",
    "experienceRelevance",
    "resumeStructure",
];

pub const EVIDENCE_NOT_FOUND: &str = "notFound";
pub const MAX_EVIDENCE_RUNES: usize = 160;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("llm output parse failed: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("llm validate: {0}")]
    Constraint(String),
}

fn constraint(msg: impl Into<String>) -> SchemaError {
    SchemaError::Constraint(msg.into())
}

// ────────────────────────────────────────────────────────────────────────────
// Raw payload shapes
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMeta {
    #[serde(default)]
    pub prompt_version: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub job_description_provided: Option<bool>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub limitations: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSummary {
    #[serde(default)]
    pub overall_assessment: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
}

/// Five-way decomposition of the ATS score. Must total exactly 100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub skills: i64,
    pub experience: i64,
    pub impact: i64,
    pub formatting: i64,
    pub role_fit: i64,
}

impl ScoreBreakdown {
    pub fn sum(&self) -> i64 {
        self.skills + self.experience + self.impact + self.formatting + self.role_fit
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreComponent {
    pub score: i64,
    pub weight: i64,
    #[serde(default)]
    pub helped: Vec<String>,
    #[serde(default)]
    pub dragged: Vec<String>,
}

/// Four fixed-key weighted decomposition of the final score (v2_3).
/// A BTreeMap keeps serialization order deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreExplanation {
    #[serde(default)]
    pub components: BTreeMap<String, ScoreComponent>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMissingKeywords {
    #[serde(default)]
    pub from_job_description: Vec<String>,
    #[serde(default)]
    pub industry_common: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAtsV2 {
    pub score: i64,
    pub score_breakdown: ScoreBreakdown,
    #[serde(default)]
    pub score_reasoning: Vec<String>,
    #[serde(default)]
    pub score_explanation: Option<ScoreExplanation>,
    #[serde(default)]
    pub missing_keywords: RawMissingKeywords,
    #[serde(default)]
    pub formatting_issues: Vec<String>,
}

/// The v1 prompt predates the breakdown and keyword grouping: a bare score
/// plus one flat keyword list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAtsV1 {
    pub score: i64,
    #[serde(default)]
    pub missing_keywords: Vec<String>,
    #[serde(default)]
    pub formatting_issues: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawIssue {
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub problem: String,
    #[serde(default)]
    pub why_it_matters: String,
    #[serde(default)]
    pub suggestion: String,
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(default)]
    pub fix_effort: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub auto_fixable: bool,
    #[serde(default)]
    pub requires_user_input: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawBulletRewrite {
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub before: String,
    #[serde(default)]
    pub after: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub metrics_source: Option<String>,
    #[serde(default)]
    pub placeholders_needed: Vec<String>,
    #[serde(default)]
    pub claim_support: Option<String>,
    #[serde(default)]
    pub evidence: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawActionPlan {
    #[serde(default)]
    pub quick_wins: Vec<String>,
    #[serde(default)]
    pub medium_effort: Vec<String>,
    #[serde(default)]
    pub deep_fixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisV1 {
    #[serde(default)]
    pub meta: Option<RawMeta>,
    #[serde(default)]
    pub summary: Option<RawSummary>,
    #[serde(default)]
    pub ats: Option<RawAtsV1>,
    #[serde(default)]
    pub issues: Option<Vec<RawIssue>>,
    #[serde(default)]
    pub bullet_rewrites: Option<Vec<RawBulletRewrite>>,
    #[serde(default)]
    pub missing_information: Option<Vec<String>>,
    #[serde(default)]
    pub action_plan: Option<RawActionPlan>,
    #[serde(default)]
    pub final_score: Option<i64>,
    #[serde(default)]
    pub match_score: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisV2 {
    #[serde(default)]
    pub meta: Option<RawMeta>,
    #[serde(default)]
    pub summary: Option<RawSummary>,
    #[serde(default)]
    pub ats: Option<RawAtsV2>,
    #[serde(default)]
    pub issues: Option<Vec<RawIssue>>,
    #[serde(default)]
    pub bullet_rewrites: Option<Vec<RawBulletRewrite>>,
    #[serde(default)]
    pub missing_information: Option<Vec<String>>,
    #[serde(default)]
    pub action_plan: Option<RawActionPlan>,
    #[serde(default)]
    pub final_score: Option<i64>,
    #[serde(default)]
    pub match_score: Option<i64>,
}

/// Tagged union over the supported prompt versions. The v2 family shares a
/// payload shape; constraints differ per revision.
#[derive(Debug, Clone)]
pub enum VersionedAnalysis {
    V1(AnalysisV1),
    V2(AnalysisV2),
    V2_1(AnalysisV2),
    V2_2(AnalysisV2),
    V2_3(AnalysisV2),
}

impl VersionedAnalysis {
    /// Rebuilds the tagged value from a v2-family payload; `None` for V1.
    pub fn from_v2(version: PromptVersion, payload: AnalysisV2) -> Option<Self> {
        match version {
            PromptVersion::V1 => None,
            PromptVersion::V2 => Some(VersionedAnalysis::V2(payload)),
            PromptVersion::V2_1 => Some(VersionedAnalysis::V2_1(payload)),
            PromptVersion::V2_2 => Some(VersionedAnalysis::V2_2(payload)),
            PromptVersion::V2_3 => Some(VersionedAnalysis::V2_3(payload)),
        }
    }

    pub fn version(&self) -> PromptVersion {
        match self {
            VersionedAnalysis::V1(_) => PromptVersion::V1,
            VersionedAnalysis::V2(_) => PromptVersion::V2,
            VersionedAnalysis::V2_1(_) => PromptVersion::V2_1,
            VersionedAnalysis::V2_2(_) => PromptVersion::V2_2,
            VersionedAnalysis::V2_3(_) => PromptVersion::V2_3,
        }
    }

    pub fn v2_payload(&self) -> Option<&AnalysisV2> {
        match self {
            VersionedAnalysis::V1(_) => None,
            VersionedAnalysis::V2(p)
            | VersionedAnalysis::V2_1(p)
            | VersionedAnalysis::V2_2(p)
            | VersionedAnalysis::V2_3(p) => Some(p),
        }
    }

    pub fn v2_payload_mut(&mut self) -> Option<&mut AnalysisV2> {
        match self {
            VersionedAnalysis::V1(_) => None,
            VersionedAnalysis::V2(p)
            | VersionedAnalysis::V2_1(p)
            | VersionedAnalysis::V2_2(p)
            | VersionedAnalysis::V2_3(p) => Some(p),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Parse + validate
// ────────────────────────────────────────────────────────────────────────────

/// Parses raw LLM text into the typed shape for `version` and applies the
/// version's constraints. v2 score-breakdown drift is repaired in place.
pub fn parse_and_validate(raw: &str, version: PromptVersion) -> Result<VersionedAnalysis, SchemaError> {
    match version {
        PromptVersion::V1 => {
            let payload: AnalysisV1 = serde_json::from_str(raw)?;
            Ok(VersionedAnalysis::V1(payload))
        }
        _ => {
            let mut payload: AnalysisV2 = serde_json::from_str(raw)?;
            validate_v2(&mut payload, version)?;
            Ok(match version {
                PromptVersion::V2 => VersionedAnalysis::V2(payload),
                PromptVersion::V2_1 => VersionedAnalysis::V2_1(payload),
                PromptVersion::V2_2 => VersionedAnalysis::V2_2(payload),
                PromptVersion::V2_3 => VersionedAnalysis::V2_3(payload),
                PromptVersion::V1 => unreachable!(),
            })
        }
    }
}

/// Applies v2-family constraints to an already-parsed payload. Exposed
/// separately so the content guard can re-check after a deterministic
/// bullet rewrite.
pub fn validate_v2(payload: &mut AnalysisV2, version: PromptVersion) -> Result<(), SchemaError> {
    let ats = payload
        .ats
        .as_mut()
        .ok_or_else(|| constraint("ats section missing"))?;

    if !(0..=100).contains(&ats.score) {
        return Err(constraint(format!(
            "ats.score {} outside [0, 100]",
            ats.score
        )));
    }

    validate_breakdown(&mut ats.score_breakdown, version)?;

    if matches!(version, PromptVersion::V2_2 | PromptVersion::V2_3)
        && !(3..=6).contains(&ats.score_reasoning.len())
    {
        return Err(constraint(format!(
            "scoreReasoning has {} entries, expected 3 to 6",
            ats.score_reasoning.len()
        )));
    }

    if version == PromptVersion::V2_3 {
        let explanation = ats
            .score_explanation
            .as_ref()
            .ok_or_else(|| constraint("scoreExplanation missing"))?;
        validate_score_explanation(explanation)?;
    }

    if let Some(meta) = &payload.meta {
        if meta.job_description_provided == Some(false)
            && !ats.missing_keywords.from_job_description.is_empty()
        {
            return Err(constraint(
                "missingKeywords.fromJobDescription must be empty without a job description",
            ));
        }
    }

    for (i, issue) in payload.issues.iter().flatten().enumerate() {
        validate_issue(issue).map_err(|e| match e {
            SchemaError::Constraint(msg) => constraint(format!("issue[{i}]: {msg}")),
            other => other,
        })?;
    }

    for (i, bullet) in payload.bullet_rewrites.iter().flatten().enumerate() {
        validate_bullet(bullet, version).map_err(|e| match e {
            SchemaError::Constraint(msg) => constraint(format!("bulletRewrite[{i}]: {msg}")),
            other => other,
        })?;
    }

    Ok(())
}

fn validate_breakdown(breakdown: &mut ScoreBreakdown, version: PromptVersion) -> Result<(), SchemaError> {
    for (name, value) in [
        ("skills", breakdown.skills),
        ("experience", breakdown.experience),
        ("impact", breakdown.impact),
        ("formatting", breakdown.formatting),
        ("roleFit", breakdown.role_fit),
    ] {
        if !(0..=100).contains(&value) {
            return Err(constraint(format!(
                "scoreBreakdown.{name} {value} outside [0, 100]"
            )));
        }
    }

    let sum = breakdown.sum();
    if sum == 100 {
        return Ok(());
    }

    if version == PromptVersion::V2 {
        // v2 models drifted a few points regularly; absorb the drift into
        // the formatting component as long as it stays in range.
        let repaired = breakdown.formatting + (100 - sum);
        if !(0..=100).contains(&repaired) {
            return Err(constraint(format!(
                "scoreBreakdown sums to {sum} and formatting cannot absorb the drift"
            )));
        }
        breakdown.formatting = repaired;
        Ok(())
    } else {
        Err(constraint(format!(
            "scoreBreakdown sums to {sum}, expected exactly 100"
        )))
    }
}

fn validate_score_explanation(explanation: &ScoreExplanation) -> Result<(), SchemaError> {
    if explanation.components.len() != SCORE_EXPLANATION_KEYS.len() {
        return Err(constraint(format!(
            "scoreExplanation has {} components, expected {}",
            explanation.components.len(),
            SCORE_EXPLANATION_KEYS.len()
        )));
    }

    for key in SCORE_EXPLANATION_KEYS {
        let component = explanation
            .components
            .get(*key)
            .ok_or_else(|| constraint(format!("scoreExplanation missing component '{key}'")))?;
        if !(0..=100).contains(&component.score) {
            return Err(constraint(format!(
                "scoreExplanation.{key}.score {} outside [0, 100]",
                component.score
            )));
        }
        if !(0..=100).contains(&component.weight) {
            return Err(constraint(format!(
                "scoreExplanation.{key}.weight {} outside [0, 100]",
                component.weight
            )));
        }
        if component.helped.is_empty() || component.dragged.is_empty() {
            return Err(constraint(format!(
                "scoreExplanation.{key} requires non-empty helped and dragged"
            )));
        }
    }

    let weight_sum: i64 = explanation.components.values().map(|c| c.weight).sum();
    if weight_sum != 100 {
        return Err(constraint(format!(
            "scoreExplanation weights sum to {weight_sum}, expected 100"
        )));
    }

    Ok(())
}

fn validate_issue(issue: &RawIssue) -> Result<(), SchemaError> {
    if let Some(priority) = issue.priority {
        if !(1..=10).contains(&priority) {
            return Err(constraint(format!("priority {priority} outside [1, 10]")));
        }
    }

    if let Some(evidence) = &issue.evidence {
        if evidence != EVIDENCE_NOT_FOUND && evidence.chars().count() > MAX_EVIDENCE_RUNES {
            return Err(constraint(format!(
                "evidence exceeds {MAX_EVIDENCE_RUNES} code points"
            )));
        }
    }

    if issue.auto_fixable && !issue.requires_user_input.is_empty() {
        return Err(constraint("autoFixable issues cannot require user input"));
    }

    for value in &issue.requires_user_input {
        if !USER_INPUT_WHITELIST.contains(&value.as_str()) {
            return Err(constraint(format!(
                "requiresUserInput value '{value}' is not recognized"
            )));
        }
    }

    Ok(())
}

fn validate_bullet(bullet: &RawBulletRewrite, version: PromptVersion) -> Result<(), SchemaError> {
    match bullet.metrics_source.as_deref() {
        Some("resume") => {
            if !bullet.placeholders_needed.is_empty() {
                return Err(constraint(
                    "metricsSource 'resume' forbids placeholdersNeeded entries",
                ));
            }
        }
        Some("placeholder") => {
            if bullet.placeholders_needed.is_empty() {
                return Err(constraint(
                    "metricsSource 'placeholder' requires placeholdersNeeded entries",
                ));
            }
        }
        Some(other) => {
            return Err(constraint(format!("metricsSource '{other}' is not recognized")));
        }
        None => {}
    }

    if version == PromptVersion::V2_3 {
        match bullet.claim_support.as_deref() {
            Some("supported") => {
                let evidence = bullet.evidence.as_deref().unwrap_or(EVIDENCE_NOT_FOUND);
                if evidence == EVIDENCE_NOT_FOUND {
                    return Err(constraint(
                        "claimSupport 'supported' requires concrete evidence",
                    ));
                }
            }
            Some("inferred") => {}
            Some("placeholder") => {
                if bullet.metrics_source.as_deref() == Some("resume") {
                    return Err(constraint(
                        "metricsSource 'resume' forbids claimSupport 'placeholder'",
                    ));
                }
            }
            Some(other) => {
                return Err(constraint(format!(
                    "claimSupport '{other}' is not recognized"
                )));
            }
            None => {}
        }
    }

    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// Validate with LLM retry
// ────────────────────────────────────────────────────────────────────────────

/// Calls the LLM, persists the raw payload, and validates it. A v2-family
/// validation failure triggers exactly one fix-JSON retry round; the second
/// failure is returned unchanged. The raw payload is persisted before every
/// validation attempt so operators can inspect it even when the run fails.
pub async fn validate_with_retry(
    llm: &crate::llm_client::LlmGateway,
    store: &crate::analysis::store::AnalysisStore,
    analysis_id: uuid::Uuid,
    input: &crate::llm_client::AnalyzeInput,
    version: PromptVersion,
    opts: &crate::llm_client::CallOptions,
) -> anyhow::Result<(VersionedAnalysis, Option<String>)> {
    let outcome = llm.analyze(input, opts).await?;
    store.update_analysis_raw(analysis_id, &outcome.raw).await?;

    let first_error = match parse_and_validate(&outcome.raw, version) {
        Ok(validated) => return Ok((validated, outcome.prompt_hash)),
        Err(e) => e,
    };

    if !version.is_v2_plus() {
        return Err(first_error.into());
    }

    tracing::warn!(
        analysis_id = %analysis_id,
        "LLM output failed validation, retrying with fix-JSON round: {first_error}"
    );

    let retry_opts = opts
        .clone()
        .with_fix_json(outcome.raw.clone(), first_error.to_string());
    let retry = llm.analyze(input, &retry_opts).await?;
    store.update_analysis_raw(analysis_id, &retry.raw).await?;

    let validated = parse_and_validate(&retry.raw, version)?;
    Ok((validated, retry.prompt_hash.or(outcome.prompt_hash)))
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn valid_explanation() -> ScoreExplanation {
        let mut components = BTreeMap::new();
        for key in SCORE_EXPLANATION_KEYS {
            components.insert(
                key.to_string(),
                ScoreComponent {
                    score: 70,
                    weight: 25,
                    helped: vec!["clear section structure".to_string()],
                    dragged: vec!["missing metrics".to_string()],
                },
            );
        }
        ScoreExplanation { components }
    }

    pub(crate) fn valid_v2_payload() -> AnalysisV2 {
        AnalysisV2 {
            meta: Some(RawMeta {
                prompt_version: Some("v2_3".to_string()),
                model: Some("gpt-4o-mini".to_string()),
                job_description_provided: Some(true),
                confidence: Some(0.8),
                assumptions: vec![],
                limitations: vec![],
            }),
            summary: Some(RawSummary {
                overall_assessment: "Solid resume with room to quantify impact".to_string(),
                strengths: vec!["Strong technical depth".to_string()],
                weaknesses: vec!["Few metrics".to_string()],
            }),
            ats: Some(RawAtsV2 {
                score: 74,
                score_breakdown: ScoreBreakdown {
                    skills: 25,
                    experience: 25,
                    impact: 20,
                    formatting: 15,
                    role_fit: 15,
                },
                score_reasoning: vec![
                    "Keywords align with the role".to_string(),
                    "Impact statements lack numbers".to_string(),
                    "Formatting is parser-friendly".to_string(),
                ],
                score_explanation: Some(valid_explanation()),
                missing_keywords: RawMissingKeywords {
                    from_job_description: vec!["kubernetes".to_string()],
                    industry_common: vec!["ci/cd".to_string()],
                },
                formatting_issues: vec!["Inconsistent date formats".to_string()],
            }),
            issues: Some(vec![RawIssue {
                severity: "high".to_string(),
                section: "experience".to_string(),
                problem: "Bullets lack quantified outcomes".to_string(),
                why_it_matters: "Recruiters scan for measurable impact".to_string(),
                suggestion: "Add concrete numbers to each bullet".to_string(),
                evidence: Some("Led the platform team".to_string()),
                fix_effort: Some("medium".to_string()),
                priority: Some(3),
                auto_fixable: false,
                requires_user_input: vec!["metrics".to_string()],
            }]),
            bullet_rewrites: Some(vec![RawBulletRewrite {
                section: "experience".to_string(),
                before: "Improved deployment speed".to_string(),
                after: "Cut deployment time from 40 to 12 minutes".to_string(),
                rationale: "Quantifies the improvement".to_string(),
                metrics_source: Some("resume".to_string()),
                placeholders_needed: vec![],
                claim_support: Some("supported".to_string()),
                evidence: Some("deployment time dropped to 12 minutes".to_string()),
            }]),
            missing_information: Some(vec!["LinkedIn profile".to_string()]),
            action_plan: Some(RawActionPlan {
                quick_wins: vec!["Add a skills section".to_string()],
                medium_effort: vec!["Rewrite experience bullets".to_string()],
                deep_fixes: vec!["Restructure for the target role".to_string()],
            }),
            final_score: None,
            match_score: None,
        }
    }

    fn as_json(payload: &AnalysisV2) -> String {
        serde_json::to_string(payload).unwrap()
    }

    #[test]
    fn test_prompt_version_round_trip() {
        for v in [
            PromptVersion::V1,
            PromptVersion::V2,
            PromptVersion::V2_1,
            PromptVersion::V2_2,
            PromptVersion::V2_3,
        ] {
            assert_eq!(PromptVersion::parse(v.as_str()), Some(v));
        }
        assert_eq!(PromptVersion::parse("v3"), None);
        assert_eq!(PromptVersion::latest(), PromptVersion::V2_3);
    }

    #[test]
    fn test_v2_3_valid_payload_passes() {
        let raw = as_json(&valid_v2_payload());
        let parsed = parse_and_validate(&raw, PromptVersion::V2_3).unwrap();
        assert_eq!(parsed.version(), PromptVersion::V2_3);
    }

    #[test]
    fn test_parse_failure_is_tagged_for_classification() {
        let err = parse_and_validate("not json at all", PromptVersion::V2_3).unwrap_err();
        assert!(err.to_string().contains("llm output parse"));
    }

    #[test]
    fn test_v2_breakdown_drift_repaired_into_formatting() {
        let mut payload = valid_v2_payload();
        // 25+25+20+10+15 = 95; the 5-point shortfall lands on formatting.
        payload.ats.as_mut().unwrap().score_breakdown.formatting = 10;
        payload.ats.as_mut().unwrap().score_explanation = None;
        payload.bullet_rewrites = Some(vec![]);

        let raw = as_json(&payload);
        let parsed = parse_and_validate(&raw, PromptVersion::V2).unwrap();
        let ats = parsed.v2_payload().unwrap().ats.as_ref().unwrap();
        assert_eq!(ats.score_breakdown.formatting, 15);
        assert_eq!(ats.score_breakdown.sum(), 100);
    }

    #[test]
    fn test_v2_repair_only_touches_formatting() {
        let mut payload = valid_v2_payload();
        let before = payload.ats.as_ref().unwrap().score_breakdown;
        payload.ats.as_mut().unwrap().score_breakdown.formatting = 5;
        payload.ats.as_mut().unwrap().score_explanation = None;

        let raw = as_json(&payload);
        let parsed = parse_and_validate(&raw, PromptVersion::V2).unwrap();
        let after = parsed.v2_payload().unwrap().ats.as_ref().unwrap().score_breakdown;
        assert_eq!(after.skills, before.skills);
        assert_eq!(after.experience, before.experience);
        assert_eq!(after.impact, before.impact);
        assert_eq!(after.role_fit, before.role_fit);
        assert_eq!(after.sum(), 100);
    }

    #[test]
    fn test_v2_repair_fails_when_formatting_leaves_range() {
        let mut payload = valid_v2_payload();
        let breakdown = &mut payload.ats.as_mut().unwrap().score_breakdown;
        // Sum 230: formatting would need to absorb -130.
        *breakdown = ScoreBreakdown {
            skills: 90,
            experience: 90,
            impact: 20,
            formatting: 10,
            role_fit: 20,
        };
        payload.ats.as_mut().unwrap().score_explanation = None;

        let err = parse_and_validate(&as_json(&payload), PromptVersion::V2).unwrap_err();
        assert!(err.to_string().contains("llm validate"));
    }

    #[test]
    fn test_v2_1_rejects_drifted_sum() {
        let mut payload = valid_v2_payload();
        payload.ats.as_mut().unwrap().score_breakdown.formatting = 10;
        payload.ats.as_mut().unwrap().score_explanation = None;

        let err = parse_and_validate(&as_json(&payload), PromptVersion::V2_1).unwrap_err();
        assert!(err.to_string().contains("expected exactly 100"));
    }

    #[test]
    fn test_score_out_of_range_rejected() {
        let mut payload = valid_v2_payload();
        payload.ats.as_mut().unwrap().score = 150;
        let err = parse_and_validate(&as_json(&payload), PromptVersion::V2_3).unwrap_err();
        assert!(err.to_string().contains("ats.score"));
    }

    #[test]
    fn test_score_reasoning_bounds_enforced_from_v2_2() {
        let mut payload = valid_v2_payload();
        payload.ats.as_mut().unwrap().score_reasoning = vec!["only one".to_string()];
        payload.ats.as_mut().unwrap().score_explanation = None;

        // v2_1 does not constrain reasoning length.
        assert!(parse_and_validate(&as_json(&payload), PromptVersion::V2_1).is_ok());
        let err = parse_and_validate(&as_json(&payload), PromptVersion::V2_2).unwrap_err();
        assert!(err.to_string().contains("scoreReasoning"));
    }

    #[test]
    fn test_v2_3_requires_score_explanation() {
        let mut payload = valid_v2_payload();
        payload.ats.as_mut().unwrap().score_explanation = None;
        let err = parse_and_validate(&as_json(&payload), PromptVersion::V2_3).unwrap_err();
        assert!(err.to_string().contains("scoreExplanation missing"));
    }

    #[test]
    fn test_score_explanation_rejects_wrong_keys() {
        let mut explanation = valid_explanation();
        let component = explanation.components.remove("atsReadability").unwrap();
        explanation.components.insert("readability".to_string(), component);

        let mut payload = valid_v2_payload();
        payload.ats.as_mut().unwrap().score_explanation = Some(explanation);
        let err = parse_and_validate(&as_json(&payload), PromptVersion::V2_3).unwrap_err();
        assert!(err.to_string().contains("atsReadability"));
    }

    #[test]
    fn test_score_explanation_weights_must_total_100() {
        let mut explanation = valid_explanation();
        explanation
            .components
            .get_mut("skillMatch")
            .unwrap()
            .weight = 30;

        let mut payload = valid_v2_payload();
        payload.ats.as_mut().unwrap().score_explanation = Some(explanation);
        let err = parse_and_validate(&as_json(&payload), PromptVersion::V2_3).unwrap_err();
        assert!(err.to_string().contains("weights sum"));
    }

    #[test]
    fn test_score_explanation_requires_helped_and_dragged() {
        let mut explanation = valid_explanation();
        explanation
            .components
            .get_mut("resumeStructure")
            .unwrap()
            .dragged = vec![];

        let mut payload = valid_v2_payload();
        payload.ats.as_mut().unwrap().score_explanation = Some(explanation);
        let err = parse_and_validate(&as_json(&payload), PromptVersion::V2_3).unwrap_err();
        assert!(err.to_string().contains("helped and dragged"));
    }

    #[test]
    fn test_issue_priority_bounds() {
        let mut payload = valid_v2_payload();
        payload.issues.as_mut().unwrap()[0].priority = Some(11);
        let err = parse_and_validate(&as_json(&payload), PromptVersion::V2_3).unwrap_err();
        assert!(err.to_string().contains("priority"));
    }

    #[test]
    fn test_issue_long_evidence_rejected_but_sentinel_allowed() {
        let mut payload = valid_v2_payload();
        payload.issues.as_mut().unwrap()[0].evidence = Some("x".repeat(161));
        assert!(parse_and_validate(&as_json(&payload), PromptVersion::V2_3).is_err());

        payload.issues.as_mut().unwrap()[0].evidence = Some(EVIDENCE_NOT_FOUND.to_string());
        assert!(parse_and_validate(&as_json(&payload), PromptVersion::V2_3).is_ok());
    }

    #[test]
    fn test_auto_fixable_issue_cannot_require_input() {
        let mut payload = valid_v2_payload();
        payload.issues.as_mut().unwrap()[0].auto_fixable = true;
        let err = parse_and_validate(&as_json(&payload), PromptVersion::V2_3).unwrap_err();
        assert!(err.to_string().contains("autoFixable"));
    }

    #[test]
    fn test_requires_user_input_whitelist() {
        let mut payload = valid_v2_payload();
        payload.issues.as_mut().unwrap()[0].requires_user_input =
            vec!["social_security_number".to_string()];
        let err = parse_and_validate(&as_json(&payload), PromptVersion::V2_3).unwrap_err();
        assert!(err.to_string().contains("requiresUserInput"));
    }

    #[test]
    fn test_bullet_resume_source_forbids_placeholders() {
        let mut payload = valid_v2_payload();
        payload.bullet_rewrites.as_mut().unwrap()[0].placeholders_needed =
            vec!["revenue_growth_pct".to_string()];
        let err = parse_and_validate(&as_json(&payload), PromptVersion::V2_3).unwrap_err();
        assert!(err.to_string().contains("placeholdersNeeded"));
    }

    #[test]
    fn test_bullet_placeholder_source_requires_placeholders() {
        let mut payload = valid_v2_payload();
        let bullet = &mut payload.bullet_rewrites.as_mut().unwrap()[0];
        bullet.metrics_source = Some("placeholder".to_string());
        bullet.claim_support = Some("placeholder".to_string());
        bullet.placeholders_needed = vec![];
        let err = parse_and_validate(&as_json(&payload), PromptVersion::V2_3).unwrap_err();
        assert!(err.to_string().contains("placeholdersNeeded"));
    }

    #[test]
    fn test_bullet_unknown_metrics_source_rejected() {
        let mut payload = valid_v2_payload();
        payload.bullet_rewrites.as_mut().unwrap()[0].metrics_source =
            Some("guesswork".to_string());
        let err = parse_and_validate(&as_json(&payload), PromptVersion::V2_3).unwrap_err();
        assert!(err.to_string().contains("metricsSource"));
    }

    #[test]
    fn test_v2_3_supported_claim_requires_evidence() {
        let mut payload = valid_v2_payload();
        payload.bullet_rewrites.as_mut().unwrap()[0].evidence =
            Some(EVIDENCE_NOT_FOUND.to_string());
        let err = parse_and_validate(&as_json(&payload), PromptVersion::V2_3).unwrap_err();
        assert!(err.to_string().contains("supported"));
    }

    #[test]
    fn test_v2_3_resume_source_forbids_placeholder_claim() {
        let mut payload = valid_v2_payload();
        let bullet = &mut payload.bullet_rewrites.as_mut().unwrap()[0];
        bullet.claim_support = Some("placeholder".to_string());
        let err = parse_and_validate(&as_json(&payload), PromptVersion::V2_3).unwrap_err();
        assert!(err.to_string().contains("claimSupport"));
    }

    #[test]
    fn test_claim_support_not_checked_before_v2_3() {
        let mut payload = valid_v2_payload();
        payload.ats.as_mut().unwrap().score_explanation = None;
        let bullet = &mut payload.bullet_rewrites.as_mut().unwrap()[0];
        bullet.claim_support = Some("placeholder".to_string());
        assert!(parse_and_validate(&as_json(&payload), PromptVersion::V2_2).is_ok());
    }

    #[test]
    fn test_missing_jd_keywords_must_be_empty_without_jd() {
        let mut payload = valid_v2_payload();
        payload.meta.as_mut().unwrap().job_description_provided = Some(false);
        let err = parse_and_validate(&as_json(&payload), PromptVersion::V2_3).unwrap_err();
        assert!(err.to_string().contains("fromJobDescription"));
    }

    #[test]
    fn test_v1_parses_without_constraints() {
        let raw = r#"{
            "summary": {"overallAssessment": "ok"},
            "ats": {"score": 150, "missingKeywords": ["b", "a", "c"], "formattingIssues": []},
            "issues": [],
            "bulletRewrites": [],
            "missingInformation": [],
            "actionPlan": {"quickWins": [], "mediumEffort": [], "deepFixes": []}
        }"#;
        let parsed = parse_and_validate(raw, PromptVersion::V1).unwrap();
        match parsed {
            VersionedAnalysis::V1(p) => {
                assert_eq!(p.ats.as_ref().unwrap().score, 150);
                assert_eq!(p.ats.as_ref().unwrap().missing_keywords.len(), 3);
            }
            _ => panic!("expected v1 payload"),
        }
    }
}
