// src/summarize/openai.rs
//! Chat Completions client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    parse_impact_json, parse_summary_json, prompt, ImpactAnalysis, ImpactInput, Summarizer,
    SummaryOutcome,
};
use crate::config::SummarizerConfig;
use crate::error::{DigestError, Result};

pub struct OpenAiSummarizer {
    http: reqwest::Client,
    cfg: SummarizerConfig,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct Resp {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    total_tokens: i64,
}

impl OpenAiSummarizer {
    /// Expects a resolved config with a non-empty key.
    pub fn new(cfg: &SummarizerConfig) -> Result<Self> {
        if cfg.api_key.trim().is_empty() {
            return Err(DigestError::Config("openai summarizer needs an api key".into()));
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("technote-digest/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(cfg.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            cfg: cfg.clone(),
        })
    }

    /// One chat round-trip. Returns the message content and total tokens.
    async fn chat(&self, system: &str, user: &str, temperature: f32) -> Result<(String, Option<i64>)> {
        let req = Req {
            model: &self.cfg.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: system,
                },
                Msg {
                    role: "user",
                    content: user,
                },
            ],
            temperature,
            max_tokens: self.cfg.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let t0 = Instant::now();
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.cfg.base_url))
            .bearer_auth(&self.cfg.api_key)
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let head: String = body.chars().take(300).collect();
            warn!(status = status.as_u16(), body = %head, "chat completion rejected");
            return Err(DigestError::Summarize(format!(
                "openai returned status {}",
                status.as_u16()
            )));
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| DigestError::Summarize(format!("malformed completion body: {e}")))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(DigestError::Summarize("empty completion".into()));
        }
        let tokens = body.usage.map(|u| u.total_tokens);
        debug!(model = %self.cfg.model, ms = t0.elapsed().as_millis() as u64, tokens, "chat completion ok");
        Ok((content, tokens))
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    async fn summarize(&self, content: &str) -> Result<SummaryOutcome> {
        let (raw, tokens_used) = self
            .chat(prompt::SUMMARY_SYSTEM, &prompt::summary_user(content), self.cfg.temperature)
            .await?;
        Ok(SummaryOutcome {
            payload: parse_summary_json(&raw)?,
            tokens_used,
            model: self.cfg.model.clone(),
        })
    }

    async fn analyze_impact(&self, input: &ImpactInput) -> Result<ImpactAnalysis> {
        let (raw, _) = self
            .chat(
                prompt::IMPACT_SYSTEM,
                &prompt::impact_user(input),
                self.cfg.impact_temperature,
            )
            .await?;
        parse_impact_json(&raw)
    }

    fn model_name(&self) -> &str {
        &self.cfg.model
    }
}
