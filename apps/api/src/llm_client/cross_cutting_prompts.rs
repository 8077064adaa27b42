// Shared prompt constants and prompt-building utilities.
// Each service that needs LLM calls defines its own prompts.rs alongside it.
// This file contains cross-cutting prompt fragments.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Instruction to keep claims grounded in the resume itself.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Every observation must be traceable to the resume text or the \
    job description provided. Do NOT infer, interpolate, or invent details. \
    When the resume does not support a claim, use the literal string \
    \"notFound\" as evidence.";
