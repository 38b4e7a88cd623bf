// src/summarize/mod.rs
//! Summarizer abstraction: OpenAI in production, a deterministic mock for
//! tests and local runs, and a disabled client when no key is configured.

pub mod openai;
pub mod prompt;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SummarizerConfig;
use crate::error::{DigestError, Result};
pub use openai::OpenAiSummarizer;

/// Structured synopsis returned by the model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryPayload {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub changes_identified: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryOutcome {
    pub payload: SummaryPayload,
    pub tokens_used: Option<i64>,
    pub model: String,
}

/// What the impact analysis gets to see of a processed note.
#[derive(Debug, Clone, Serialize)]
pub struct ImpactInput {
    pub title: String,
    pub summary: String,
    pub key_points: Vec<String>,
    pub changes_identified: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    #[serde(default)]
    pub impact_level: String,
    #[serde(default)]
    pub urgency: String,
    #[serde(default)]
    pub affected_business_types: Vec<String>,
    #[serde(default)]
    pub implementation_deadline: Option<String>,
    #[serde(default)]
    pub action_required: String,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    #[serde(default)]
    pub compliance_risk: String,
    #[serde(default)]
    pub estimated_effort: String,
}

#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, content: &str) -> Result<SummaryOutcome>;
    async fn analyze_impact(&self, input: &ImpactInput) -> Result<ImpactAnalysis>;
    /// Model identifier stored with each summary.
    fn model_name(&self) -> &str;
}

pub type DynSummarizer = Arc<dyn Summarizer>;

/// Factory: build a summarizer according to config and environment.
///
/// * `AI_TEST_MODE=mock` or `provider = "mock"` gives the mock.
/// * `provider = "disabled"` or a missing key gives the disabled client.
/// * Otherwise the OpenAI client.
pub fn build_summarizer(cfg: &SummarizerConfig) -> Result<DynSummarizer> {
    let test_mock = std::env::var("AI_TEST_MODE")
        .map(|v| v.eq_ignore_ascii_case("mock"))
        .unwrap_or(false);
    if test_mock {
        info!("summarizer: mock (AI_TEST_MODE)");
        return Ok(Arc::new(MockSummarizer::default()));
    }

    match cfg.provider.as_str() {
        "mock" => Ok(Arc::new(MockSummarizer::default())),
        "disabled" => Ok(Arc::new(DisabledSummarizer)),
        "openai" if cfg.api_key.trim().is_empty() => {
            warn!("OPENAI_API_KEY not set; summarization disabled");
            Ok(Arc::new(DisabledSummarizer))
        }
        "openai" => {
            info!(model = %cfg.model, key_len = cfg.api_key.len(), "summarizer: openai");
            Ok(Arc::new(OpenAiSummarizer::new(cfg)?))
        }
        other => Err(DigestError::Config(format!(
            "unknown summarizer provider '{other}'"
        ))),
    }
}

/// Strip markdown fences and surrounding prose, keeping the outermost `{...}`.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

pub fn parse_summary_json(raw: &str) -> Result<SummaryPayload> {
    let json = extract_json_object(raw)
        .ok_or_else(|| DigestError::Summarize("model output contains no JSON object".into()))?;
    let mut payload: SummaryPayload = serde_json::from_str(json)
        .map_err(|e| DigestError::Summarize(format!("model output is not valid JSON: {e}")))?;

    payload.summary = payload.summary.trim().to_string();
    if payload.summary.is_empty() {
        return Err(DigestError::Summarize("model returned an empty summary".into()));
    }
    for list in [
        &mut payload.key_points,
        &mut payload.changes_identified,
        &mut payload.topics,
    ] {
        list.retain(|s| !s.trim().is_empty());
    }
    payload.confidence_score = payload
        .confidence_score
        .filter(|c| c.is_finite())
        .map(|c| c.clamp(0.0, 1.0));
    Ok(payload)
}

pub fn parse_impact_json(raw: &str) -> Result<ImpactAnalysis> {
    let json = extract_json_object(raw)
        .ok_or_else(|| DigestError::Summarize("impact output contains no JSON object".into()))?;
    serde_json::from_str(json)
        .map_err(|e| DigestError::Summarize(format!("impact output is not valid JSON: {e}")))
}

/// Deterministic summarizer: first sentence as summary, first lines as key points.
#[derive(Debug, Clone, Default)]
pub struct MockSummarizer;

pub const MOCK_MODEL: &str = "mock";

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(&self, content: &str) -> Result<SummaryOutcome> {
        let text = content.trim();
        let first_sentence = text
            .split_inclusive(['.', '\n'])
            .next()
            .unwrap_or(text)
            .trim();
        let summary: String = first_sentence.chars().take(280).collect();
        let key_points = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .take(3)
            .map(|l| l.chars().take(120).collect())
            .collect();
        Ok(SummaryOutcome {
            payload: SummaryPayload {
                summary: format!("{summary} (mock)"),
                key_points,
                changes_identified: Vec::new(),
                topics: vec!["nfe".to_string()],
                confidence_score: Some(0.5),
            },
            tokens_used: Some(text.split_whitespace().count() as i64),
            model: MOCK_MODEL.to_string(),
        })
    }

    async fn analyze_impact(&self, input: &ImpactInput) -> Result<ImpactAnalysis> {
        let level = if input.changes_identified.is_empty() {
            "low"
        } else {
            "medium"
        };
        Ok(ImpactAnalysis {
            impact_level: level.to_string(),
            urgency: "informative".to_string(),
            affected_business_types: vec!["NF-e issuers".to_string()],
            implementation_deadline: None,
            action_required: if level == "low" { "no" } else { "recommended" }.to_string(),
            recommended_actions: input
                .changes_identified
                .iter()
                .map(|c| format!("Review: {c}"))
                .collect(),
            compliance_risk: level.to_string(),
            estimated_effort: "unknown (mock)".to_string(),
        })
    }

    fn model_name(&self) -> &str {
        MOCK_MODEL
    }
}

/// Always fails; used when no API key is configured.
#[derive(Debug, Clone, Default)]
pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    async fn summarize(&self, _content: &str) -> Result<SummaryOutcome> {
        Err(DigestError::Summarize(
            "summarizer disabled: set OPENAI_API_KEY or choose another provider".into(),
        ))
    }

    async fn analyze_impact(&self, _input: &ImpactInput) -> Result<ImpactAnalysis> {
        Err(DigestError::Summarize("summarizer disabled".into()))
    }

    fn model_name(&self) -> &str {
        "disabled"
    }
}
