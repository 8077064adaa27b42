//! Deterministic recommendation ranking.
//!
//! Candidates are generated from issues, missing keywords, formatting
//! problems, the action plan, and missing information, then deduplicated by
//! a content-hash ID and ranked. Identical input yields byte-identical
//! output, IDs and order included.

use serde::{Deserialize, Serialize};

use crate::analysis::normalize::CanonicalResult;

/// Cap on emitted recommendations.
pub const MAX_RECOMMENDATIONS: usize = 7;

const DEFAULT_PRIORITY: i64 = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub id: String,
    pub category: String,
    pub severity: String,
    pub title: String,
    pub why: String,
    pub action: String,
    pub impact: String,
    pub order: u32,
}

#[derive(Debug, Clone)]
struct Candidate {
    category: String,
    severity: &'static str,
    title: String,
    why: String,
    action: String,
    impact: &'static str,
    priority: i64,
}

impl Candidate {
    fn id(&self) -> String {
        let key = [
            self.category.trim(),
            self.severity.trim(),
            self.impact.trim(),
            self.title.trim(),
            self.action.trim(),
        ]
        .join("|");
        format!("{:016x}", fnv1a_64(key.as_bytes()))
    }
}

/// FNV-1a, 64-bit. Stable across runs and platforms, which is the point:
/// recommendation IDs must not depend on insertion order or RandomState.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

fn severity_rank(severity: &str) -> u8 {
    match severity {
        "critical" => 3,
        "warning" => 2,
        _ => 1,
    }
}

fn impact_rank(impact: &str) -> u8 {
    match impact {
        "high" => 3,
        "medium" => 2,
        _ => 1,
    }
}

/// Infers a recommendation category from free text, scanning for keyword
/// substrings in a fixed precedence order.
pub fn infer_category(text: &str, fallback: Option<&str>) -> String {
    let lower = text.to_lowercase();
    let groups: [(&[&str], &str); 5] = [
        (&["skill", "keyword"], "SKILLS"),
        (&["format", "bullet", "font", "layout"], "FORMATTING"),
        (&["experience", "role", "project"], "EXPERIENCE"),
        (&["structure", "section", "summary", "header", "order"], "STRUCTURE"),
        (&["ats"], "ATS"),
    ];

    for (needles, category) in groups {
        if needles.iter().any(|needle| lower.contains(needle)) {
            return category.to_string();
        }
    }

    match fallback {
        Some(f) if !f.trim().is_empty() => f.trim().to_uppercase(),
        _ => "ATS".to_string(),
    }
}

/// Builds the ranked recommendation list for a normalized result.
pub fn build_recommendations(result: &CanonicalResult) -> Vec<Recommendation> {
    let mut candidates = Vec::new();

    candidates.extend(issue_candidates(result));
    candidates.extend(missing_keyword_candidate(result));
    candidates.extend(formatting_candidates(result));
    candidates.extend(action_plan_candidates(result));
    candidates.extend(missing_information_candidates(result));

    // Dedup by content-hash ID, first occurrence wins.
    let mut seen = std::collections::HashSet::new();
    let mut unique: Vec<(String, Candidate)> = Vec::new();
    for candidate in candidates {
        let id = candidate.id();
        if seen.insert(id.clone()) {
            unique.push((id, candidate));
        }
    }

    unique.sort_by(|(_, a), (_, b)| {
        severity_rank(b.severity)
            .cmp(&severity_rank(a.severity))
            .then(impact_rank(b.impact).cmp(&impact_rank(a.impact)))
            .then(a.priority.cmp(&b.priority))
            .then(a.title.to_lowercase().cmp(&b.title.to_lowercase()))
    });
    unique.truncate(MAX_RECOMMENDATIONS);

    unique
        .into_iter()
        .enumerate()
        .map(|(i, (id, c))| Recommendation {
            id,
            category: c.category,
            severity: c.severity.to_string(),
            title: c.title,
            why: c.why,
            action: c.action,
            impact: c.impact.to_string(),
            order: (i + 1) as u32,
        })
        .collect()
}

fn issue_candidates(result: &CanonicalResult) -> Vec<Candidate> {
    result
        .issues
        .iter()
        .map(|issue| {
            let (severity, impact) = match issue.severity.as_str() {
                "critical" => ("critical", "high"),
                "high" => ("warning", "high"),
                "medium" => ("warning", "medium"),
                _ => ("info", "low"),
            };
            Candidate {
                category: infer_category(
                    &format!("{} {}", issue.section, issue.problem),
                    None,
                ),
                severity,
                title: issue.problem.trim().to_string(),
                why: issue.why_it_matters.trim().to_string(),
                action: issue.suggestion.trim().to_string(),
                impact,
                priority: issue.priority.unwrap_or(DEFAULT_PRIORITY),
            }
        })
        .collect()
}

fn missing_keyword_candidate(result: &CanonicalResult) -> Option<Candidate> {
    let keywords = &result.ats.missing_keywords.from_job_description;
    if keywords.is_empty() {
        return None;
    }

    Some(Candidate {
        category: "SKILLS".to_string(),
        severity: "warning",
        title: "Add missing job keywords".to_string(),
        why: format!("The job description mentions: {}", keywords.join(", ")),
        action: "Work these keywords into the sections where your experience genuinely covers them."
            .to_string(),
        impact: "high",
        priority: DEFAULT_PRIORITY,
    })
}

fn formatting_candidates(result: &CanonicalResult) -> Vec<Candidate> {
    // Bucket order is part of the contract: bullets, headers, sections, other.
    let mut buckets: [(&str, &str, Vec<&str>); 4] = [
        ("bullet", "Clean up bullet formatting", vec![]),
        ("header", "Standardize section headers", vec![]),
        ("section", "Reorganize resume sections", vec![]),
        ("", "Fix formatting inconsistencies", vec![]),
    ];

    'issues: for issue in &result.ats.formatting_issues {
        let lower = issue.to_lowercase();
        for (needle, _, bucket) in buckets.iter_mut().take(3) {
            if lower.contains(*needle) {
                bucket.push(issue.as_str());
                continue 'issues;
            }
        }
        buckets[3].2.push(issue.as_str());
    }

    buckets
        .iter()
        .filter(|(_, _, bucket)| !bucket.is_empty())
        .take(2)
        .map(|(_, title, bucket)| Candidate {
            category: "FORMATTING".to_string(),
            severity: "warning",
            title: title.to_string(),
            why: bucket
                .iter()
                .map(|s| s.trim())
                .collect::<Vec<_>>()
                .join("; "),
            action: "Apply one consistent format across the resume.".to_string(),
            impact: "medium",
            priority: DEFAULT_PRIORITY,
        })
        .collect()
}

fn action_plan_candidates(result: &CanonicalResult) -> Vec<Candidate> {
    let plan = &result.action_plan;
    let mut candidates: Vec<Candidate> = plan
        .deep_fixes
        .iter()
        .map(|item| ("warning", "high", item))
        .chain(plan.medium_effort.iter().map(|item| ("warning", "medium", item)))
        .chain(plan.quick_wins.iter().map(|item| ("info", "low", item)))
        .map(|(severity, impact, item)| Candidate {
            category: infer_category(item, None),
            severity,
            title: item.trim().to_string(),
            why: "Identified in the analysis action plan".to_string(),
            action: item.trim().to_string(),
            impact,
            priority: DEFAULT_PRIORITY,
        })
        .collect();

    candidates.sort_by(|a, b| {
        impact_rank(b.impact)
            .cmp(&impact_rank(a.impact))
            .then(a.title.cmp(&b.title))
    });
    candidates.truncate(2);
    candidates
}

fn missing_information_candidates(result: &CanonicalResult) -> Vec<Candidate> {
    let mut seen = std::collections::HashSet::new();
    result
        .missing_information
        .iter()
        .filter_map(|item| {
            let trimmed = item.trim();
            if trimmed.is_empty() || !seen.insert(trimmed.to_string()) {
                return None;
            }
            Some(Candidate {
                category: "STRUCTURE".to_string(),
                severity: "warning",
                title: trimmed.to_string(),
                why: "This information is missing from your resume".to_string(),
                action: "Add this information to your resume.".to_string(),
                impact: "medium",
                priority: DEFAULT_PRIORITY,
            })
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
