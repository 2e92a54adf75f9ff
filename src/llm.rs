//! LLM extraction: provider abstraction + prompt + response validation.
//!
//! The provider trait hides which chat-completions endpoint is behind the
//! parser (DeepSeek and OpenAI share the wire format). `LLM_TEST_MODE=mock`
//! swaps in a deterministic keyword mock so the pipeline is testable offline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::LlmConfig;
use crate::types::{ParseResult, SubmissionCategory};

/// Typed failure from the extraction call. The orchestrator retries
/// uniformly; `retryable` classifies the failure for logs and operators.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM provider not configured: {0}")]
    NotConfigured(String),
    #[error("LLM request failed: {0}")]
    Request(String),
    #[error("LLM returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("LLM returned an empty response")]
    EmptyResponse,
    #[error("LLM response is not valid JSON: {snippet}")]
    InvalidJson { snippet: String },
}

impl LlmError {
    pub fn retryable(&self) -> bool {
        match self {
            LlmError::Request(_) | LlmError::EmptyResponse => true,
            LlmError::Status { status, .. } => *status == 429 || *status >= 500,
            LlmError::NotConfigured(_) | LlmError::InvalidJson { .. } => false,
        }
    }
}

/// One chat-completion round trip. Implementations must request JSON output.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError>;
    fn name(&self) -> &'static str;
}

pub type DynChatProvider = Arc<dyn ChatProvider>;

/// Factory: mock under `LLM_TEST_MODE=mock`, otherwise the HTTP provider.
pub fn build_provider(config: &LlmConfig) -> DynChatProvider {
    if std::env::var("LLM_TEST_MODE").map(|v| v == "mock").unwrap_or(false) {
        return Arc::new(MockProvider);
    }
    Arc::new(OpenAiCompatProvider::new(config))
}

// ------------------------------------------------------------
// HTTP provider (OpenAI-compatible chat completions)
// ------------------------------------------------------------

pub struct OpenAiCompatProvider {
    http: reqwest::Client,
    api_key: Option<String>,
    endpoint: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAiCompatProvider {
    pub fn new(config: &LlmConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("reqwest client");
        let endpoint = format!(
            "{}/v1/chat/completions",
            config.base_url.trim_end_matches('/')
        );
        Self {
            http,
            api_key: config.api_key.clone(),
            endpoint,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    response_format: ResponseFormat<'a>,
}

#[derive(Serialize)]
struct ResponseFormat<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl ChatProvider for OpenAiCompatProvider {
    async fn complete(&self, system: &str, user: &str) -> Result<String, LlmError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LlmError::NotConfigured("missing API key".into()))?;

        let req = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: body.chars().take(300).collect(),
            });
        }

        let body: ChatResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(content)
    }

    fn name(&self) -> &'static str {
        "openai-compat"
    }
}

// ------------------------------------------------------------
// Deterministic mock for tests and offline runs
// ------------------------------------------------------------

/// Keyword mock: recognizable submission text yields a filled extraction,
/// anything else yields the "not a submission" shape with near-zero
/// confidence. Deadline and email are lifted from the input by regex.
pub struct MockProvider;

const SUBMISSION_KEYWORDS: &[&str] = &[
    "投稿", "征集", "展览", "比赛", "驻地", "申请", "截止", "基金",
    "exhibition", "residency", "competition", "grant", "deadline",
    "call for", "submission", "open call",
];

fn mock_category(lower: &str) -> &'static str {
    if lower.contains("驻地") || lower.contains("residency") {
        "RESIDENCY"
    } else if lower.contains("比赛") || lower.contains("competition") {
        "COMPETITION"
    } else if lower.contains("基金") || lower.contains("grant") {
        "GRANT"
    } else if lower.contains("会议") || lower.contains("conference") {
        "CONFERENCE"
    } else if lower.contains("展") || lower.contains("exhibition") {
        "EXHIBITION"
    } else {
        "OTHER"
    }
}

fn mock_deadline(text: &str) -> Option<String> {
    static RE_CN: OnceCell<Regex> = OnceCell::new();
    static RE_ISO: OnceCell<Regex> = OnceCell::new();
    let re_cn = RE_CN.get_or_init(|| Regex::new(r"(\d{4})年(\d{1,2})月(\d{1,2})日").unwrap());
    let re_iso = RE_ISO.get_or_init(|| Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap());
    if let Some(c) = re_cn.captures(text) {
        return Some(format!(
            "{}-{:02}-{:02}",
            &c[1],
            c[2].parse::<u32>().ok()?,
            c[3].parse::<u32>().ok()?
        ));
    }
    re_iso.find(text).map(|m| m.as_str().to_string())
}

fn mock_email(text: &str) -> Option<String> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap());
    re.find(text).map(|m| m.as_str().to_string())
}

/// The prompt template itself mentions deadlines and submissions, so the
/// mock must score only the embedded content block, not the boilerplate.
fn content_block(user: &str) -> &str {
    let start = match user.find("Content:\n") {
        Some(i) => i + "Content:\n".len(),
        None => return user,
    };
    let rest = &user[start..];
    match rest.find("\nReturn exactly") {
        Some(end) => rest[..end].trim(),
        None => rest.trim(),
    }
}

#[async_trait]
impl ChatProvider for MockProvider {
    async fn complete(&self, _system: &str, prompt: &str) -> Result<String, LlmError> {
        let user = content_block(prompt);
        let lower = user.to_lowercase();
        let relevant = SUBMISSION_KEYWORDS.iter().any(|k| lower.contains(k));
        if !relevant {
            return Ok(serde_json::json!({
                "title": null, "category": null, "deadline": null,
                "location": null, "organizer": null, "description": null,
                "requirements": null, "fee": null, "contact": null,
                "originalUrl": null, "confidence": 0.05,
                "reasoning": "content is not a submission opportunity"
            })
            .to_string());
        }

        let title = user
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with("Content:"))
            .unwrap_or("Untitled call")
            .chars()
            .take(120)
            .collect::<String>();
        let email = mock_email(user);
        Ok(serde_json::json!({
            "title": title,
            "category": mock_category(&lower),
            "deadline": mock_deadline(user),
            "location": null,
            "organizer": null,
            "description": user.chars().take(200).collect::<String>(),
            "requirements": null,
            "fee": null,
            "contact": email,
            "email": email,
            "originalUrl": null,
            "confidence": 0.85,
            "reasoning": "mock keyword extraction"
        })
        .to_string())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Parser
// ------------------------------------------------------------

const SYSTEM_PROMPT: &str = "You are a professional assistant for parsing art submission opportunities. Always return a single strict JSON object, nothing else.";

pub struct LlmParser {
    provider: DynChatProvider,
    label: String,
}

impl LlmParser {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            label: format!("{}:{}", config.provider, config.model),
            provider: build_provider(config),
        }
    }

    /// Test seam: inject a provider directly.
    pub fn with_provider(provider: DynChatProvider, label: impl Into<String>) -> Self {
        Self {
            provider,
            label: label.into(),
        }
    }

    /// Extract structured fields from free text. One provider call per
    /// invocation; crawled link content is concatenated by the caller.
    pub async fn parse_content(
        &self,
        content: &str,
        links: &[String],
    ) -> Result<ParseResult, LlmError> {
        let started = Instant::now();
        let prompt = build_prompt(content, links);
        let raw = self.provider.complete(SYSTEM_PROMPT, &prompt).await?;

        let value: Value = serde_json::from_str(raw.trim()).map_err(|_| LlmError::InvalidJson {
            snippet: raw.chars().take(200).collect(),
        })?;
        if !value.is_object() {
            return Err(LlmError::InvalidJson {
                snippet: raw.chars().take(200).collect(),
            });
        }

        let mut result = validate_and_clean(&value);
        result.processing_time_ms = Some(started.elapsed().as_millis() as u64);
        result.llm_used = Some(self.label.clone());
        Ok(result)
    }
}

fn build_prompt(content: &str, links: &[String]) -> String {
    let links_block = if links.is_empty() {
        String::new()
    } else {
        format!("\nRelated links:\n{}\n", links.join("\n"))
    };
    format!(
        r#"Extract the submission-opportunity fields from the content below and return strict JSON.

Content:
{content}{links_block}

Return exactly this JSON shape:
{{
  "title": "call/event title",
  "category": "one of EXHIBITION|RESIDENCY|COMPETITION|GRANT|CONFERENCE|PUBLICATION|OTHER",
  "deadline": "YYYY-MM-DD or null",
  "eventDate": "YYYY-MM-DD or null",
  "endDate": "YYYY-MM-DD or null",
  "location": "venue/city text",
  "city": null,
  "country": null,
  "organizer": "organizing body",
  "description": "summary",
  "requirements": "application requirements",
  "fee": "fee info",
  "prize": "prize info",
  "contact": "contact info",
  "email": null,
  "phone": null,
  "website": null,
  "originalUrl": "source link",
  "tags": [],
  "language": "ISO 639-1 code of the content",
  "confidence": 0.0,
  "reasoning": "what the extraction is based on"
}}

Rules:
1. Use null for any field you cannot determine.
2. category must be one of the listed values.
3. Dates must be YYYY-MM-DD or null.
4. confidence must be a number between 0 and 1.
5. Return only the JSON object, no surrounding text.

If the content is not a submission opportunity, return the same shape with
all fields null, confidence 0, and reasoning explaining why."#
    )
}

/// Field-level validation: anything malformed is coerced to None/0 rather
/// than failing the whole parse.
fn validate_and_clean(value: &Value) -> ParseResult {
    let mut result = ParseResult {
        title: clean_string(value, "title"),
        category: value
            .get("category")
            .and_then(Value::as_str)
            .and_then(SubmissionCategory::parse_loose),
        deadline: clean_date(value, "deadline"),
        event_date: clean_date(value, "eventDate"),
        end_date: clean_date(value, "endDate"),
        location: clean_string(value, "location"),
        city: clean_string(value, "city"),
        country: clean_string(value, "country"),
        organizer: clean_string(value, "organizer"),
        description: clean_string(value, "description"),
        requirements: clean_string(value, "requirements"),
        fee: clean_string(value, "fee"),
        prize: clean_string(value, "prize"),
        contact: clean_string(value, "contact"),
        email: clean_string(value, "email"),
        phone: clean_string(value, "phone"),
        website: clean_string(value, "website"),
        original_url: clean_string(value, "originalUrl"),
        tags: value
            .get("tags")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(Value::as_str)
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
        language: clean_string(value, "language"),
        confidence: 0.0,
        reasoning: clean_string(value, "reasoning"),
        processing_time_ms: None,
        llm_used: None,
    };

    match value.get("confidence").and_then(Value::as_f64) {
        Some(c) if (0.0..=1.0).contains(&c) => result.confidence = c as f32,
        other => {
            if other.is_some() {
                tracing::warn!(confidence = ?value.get("confidence"), "confidence out of range, coerced to 0");
            }
            result.confidence = 0.0;
        }
    }

    result
}

fn clean_string(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn clean_date(value: &Value, key: &str) -> Option<NaiveDate> {
    let raw = value.get(key).and_then(Value::as_str)?;
    match NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d") {
        Ok(d) => Some(d),
        Err(_) => {
            tracing::warn!(field = key, value = raw, "invalid date from LLM, coerced to null");
            None
        }
    }
}
