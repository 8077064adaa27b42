// All LLM prompt constants for the analysis pipeline.
// Reuses cross-cutting fragments from llm_client::cross_cutting_prompts.

use crate::analysis::schema::PromptVersion;
use crate::llm_client::cross_cutting_prompts::{GROUNDING_INSTRUCTION, JSON_ONLY_SYSTEM};
use crate::llm_client::AnalyzeInput;

/// System prompt for the original v1 analysis schema.
const ANALYZE_SYSTEM_V1: &str = "You are an expert resume reviewer and ATS analyst. \
    Analyze a resume against an optional job description and return a structured report. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences.";

/// System prompt shared by the v2 schema family. Version-specific schema
/// requirements live in the user prompt.
const ANALYZE_SYSTEM_V2: &str = "You are an expert resume reviewer, ATS analyst, and \
    career coach. Analyze a resume against an optional job description and return a \
    structured, evidence-backed report with scores, issues, and bullet rewrites. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT invent facts not present in the resume.";

/// Appended system message for the fix-JSON retry round.
pub const FIX_JSON_SYSTEM: &str = "Your previous response was not valid against the \
    required schema. Return the corrected analysis as valid JSON only. \
    Fix ONLY the listed problems. Do NOT add commentary, apologies, or markdown fences.";

/// Appended system message for the content repair round.
pub const CONTENT_REPAIR_SYSTEM: &str = "Some rewritten bullets use vague impact terms \
    (double-digit, significant, substantial, massive, remarkable). Rewrite those bullets \
    with exact figures taken from the resume. When the resume has no figure, set \
    metricsSource to \"placeholder\", name the needed values in placeholdersNeeded, and \
    use an explicit placeholder such as \"X%\" in the bullet text. \
    Return the FULL corrected analysis as valid JSON only.";

/// Shared response rules for the v2 family.
const V2_SCHEMA_RULES: &str = r#"Return a JSON object with this EXACT top-level shape (no extra fields):
{
  "meta": {"promptVersion": "...", "model": "...", "jobDescriptionProvided": true, "confidence": 0.8, "assumptions": [], "limitations": []},
  "summary": {"overallAssessment": "...", "strengths": [], "weaknesses": []},
  "ats": {
    "score": 0,
    "scoreBreakdown": {"skills": 0, "experience": 0, "impact": 0, "formatting": 0, "roleFit": 0},
    "scoreReasoning": [],
    "missingKeywords": {"fromJobDescription": [], "industryCommon": []},
    "formattingIssues": []
  },
  "issues": [
    {"severity": "high", "section": "experience", "problem": "...", "whyItMatters": "...",
     "suggestion": "...", "evidence": "notFound", "fixEffort": "medium", "priority": 5,
     "autoFixable": false, "requiresUserInput": []}
  ],
  "bulletRewrites": [
    {"section": "experience", "before": "...", "after": "...", "rationale": "...",
     "metricsSource": "resume", "placeholdersNeeded": [], "evidence": "notFound"}
  ],
  "missingInformation": [],
  "actionPlan": {"quickWins": [], "mediumEffort": [], "deepFixes": []}
}

HARD RULES:
1. ats.score is an integer in [0, 100].
2. scoreBreakdown components are integers in [0, 100] and MUST sum to exactly 100.
3. issue.severity is one of: critical, high, medium, low. issue.priority is an integer in [1, 10].
4. issue.evidence is a short quote from the resume (at most 160 characters) or the literal "notFound".
5. autoFixable issues MUST have an empty requiresUserInput.
6. requiresUserInput values are limited to: email, phone, linkedin, crm_tools, metrics, team_size, award_dates, target_role.
7. bulletRewrite.metricsSource is "resume" (placeholdersNeeded MUST be empty) or "placeholder" (placeholdersNeeded MUST name the figures the candidate has to supply).
8. Never use vague impact words (double-digit, significant, substantial, massive, remarkable) in bullet rewrites; use exact figures or placeholders.
9. When no job description is provided, missingKeywords.fromJobDescription MUST be empty.
10. If the fit is strong you MAY add top-level "finalScore" and "matchScore" integers in [0, 100]."#;

const V2_2_EXTRA_RULES: &str = r#"ADDITIONAL RULES for this schema revision:
11. scoreReasoning MUST contain between 3 and 6 short strings."#;

const V2_3_EXTRA_RULES: &str = r#"ADDITIONAL RULES for this schema revision:
11. scoreReasoning MUST contain between 3 and 6 short strings.
12. ats.scoreExplanation is REQUIRED:
    {"components": {
      "atsReadability": {"score": 0, "weight": 25, "helped": ["..."], "dragged": ["..."]},
      "skillMatch": {"score": 0, "weight": 25, "helped": ["..."], "dragged": ["..."]},
      "experienceRelevance": {"score": 0, "weight": 25, "helped": ["..."], "dragged": ["..."]},
      "resumeStructure": {"score": 0, "weight": 25, "helped": ["..."], "dragged": ["..."]}
    }}
    Exactly these four keys; weights are integers in [0, 100] summing to 100;
    helped and dragged are non-empty string arrays.
13. Every bulletRewrite MUST carry claimSupport: "supported" (requires concrete evidence),
    "inferred", or "placeholder". metricsSource "resume" forbids claimSupport "placeholder"."#;

/// The original flat schema, kept for records created before the v2 prompts.
const V1_SCHEMA_RULES: &str = r#"Return a JSON object with this EXACT top-level shape (no extra fields):
{
  "summary": {"overallAssessment": "...", "strengths": [], "weaknesses": []},
  "ats": {"score": 0, "missingKeywords": [], "formattingIssues": []},
  "issues": [],
  "bulletRewrites": [],
  "missingInformation": [],
  "actionPlan": {"quickWins": [], "mediumEffort": [], "deepFixes": []}
}

RULES:
1. ats.score is an integer in [0, 100].
2. missingKeywords lists keywords the resume lacks, most important first."#;

/// Returns the system prompt for a prompt version.
pub fn system_prompt(version: PromptVersion) -> &'static str {
    match version {
        PromptVersion::V1 => ANALYZE_SYSTEM_V1,
        _ => ANALYZE_SYSTEM_V2,
    }
}

/// Renders the user prompt for one analysis call.
pub fn render_user_prompt(input: &AnalyzeInput) -> String {
    let schema_rules = match input.prompt_version {
        PromptVersion::V1 => V1_SCHEMA_RULES.to_string(),
        PromptVersion::V2 | PromptVersion::V2_1 => V2_SCHEMA_RULES.to_string(),
        PromptVersion::V2_2 => format!("{V2_SCHEMA_RULES}\n\n{V2_2_EXTRA_RULES}"),
        PromptVersion::V2_3 => format!("{V2_SCHEMA_RULES}\n\n{V2_3_EXTRA_RULES}"),
    };

    let job_description = if input.job_description.trim().is_empty() {
        "(none provided — analyze for general ATS readiness and leave \
         missingKeywords.fromJobDescription empty)"
            .to_string()
    } else {
        input.job_description.clone()
    };

    let target_role = if input.target_role.trim().is_empty() {
        "(not specified)".to_string()
    } else {
        input.target_role.clone()
    };

    format!(
        "{GROUNDING_INSTRUCTION}\n\n{schema_rules}\n\nTARGET ROLE:\n{target_role}\n\n\
         JOB DESCRIPTION:\n{job_description}\n\nRESUME:\n{resume}",
        resume = input.resume_text
    )
}

/// Renders the follow-up user message for the fix-JSON retry round.
pub fn render_fix_json_prompt(payload: &str, error: &str) -> String {
    format!(
        "{JSON_ONLY_SYSTEM}\n\nYour previous response failed validation:\n{error}\n\n\
         Previous response:\n{payload}\n\nReturn the corrected JSON object."
    )
}
