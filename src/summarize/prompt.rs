// src/summarize/prompt.rs
//! Fixed prompt templates. Both ask for a bare JSON object so the
//! response can be parsed without a schema library.

use super::ImpactInput;

pub const SUMMARY_SYSTEM: &str = "You are an expert in Brazilian tax and fiscal documents, \
in particular the technical notes published for the NF-e (electronic invoice) system. \
Answer with a single valid JSON object and nothing else.";

/// Cap on the user payload so a huge preview cannot blow the context window.
const MAX_CONTENT_CHARS: usize = 12_000;

pub fn summary_user(content: &str) -> String {
    let content: String = content.chars().take(MAX_CONTENT_CHARS).collect();
    format!(
        r#"Analyze the text below, extracted from a technical note about the NF-e, and produce a structured summary.

TECHNICAL NOTE TEXT:
{content}

INSTRUCTIONS:
1. Write a concise but complete summary (at most 500 words).
2. List the most important key points (3 to 8).
3. List every change, amendment or novelty the note introduces.
4. List the main topics covered.
5. Focus on practical information for companies that issue NF-e.

Respond ONLY with JSON in this shape:
{{
  "summary": "...",
  "key_points": ["..."],
  "changes_identified": ["..."],
  "topics": ["..."],
  "confidence_score": 0.95
}}

If there are no specific changes, leave "changes_identified" as an empty array.
"confidence_score" is a number between 0 and 1 reflecting the quality of the source text.
Keep the language technical but accessible, in the same language as the note."#
    )
}

pub const IMPACT_SYSTEM: &str = "You are a tax consultant specialized in NF-e and Brazilian \
fiscal regulation. Answer with a single valid JSON object and nothing else.";

pub fn impact_user(input: &ImpactInput) -> String {
    format!(
        r#"Assess the business impact of the technical note below.

TITLE: {title}
SUMMARY: {summary}
KEY POINTS: {key_points}
CHANGES: {changes}

Respond ONLY with JSON in this shape:
{{
  "impact_level": "high|medium|low",
  "urgency": "urgent|important|informative",
  "affected_business_types": ["..."],
  "implementation_deadline": "date or deadline if mentioned, otherwise null",
  "action_required": "yes|no|recommended",
  "recommended_actions": ["..."],
  "compliance_risk": "high|medium|low",
  "estimated_effort": "hours or a description of the effort"
}}"#,
        title = input.title,
        summary = input.summary,
        key_points = bullet_list(&input.key_points),
        changes = bullet_list(&input.changes_identified),
    )
}

fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        return "(none)".to_string();
    }
    items
        .iter()
        .map(|i| format!("\n- {i}"))
        .collect::<String>()
}
