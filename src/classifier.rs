use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::config::Config;
use crate::prompt;

const AVAILABILITY_TIMEOUT: Duration = Duration::from_secs(5);
const PARSE_PREVIEW_CHARS: usize = 200;

/// Outcome of classifying one report.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Imaging-related addendum found; holds the extracted text.
    Positive(String),
    /// No imaging-related addendum.
    Negative,
    /// Classification failed; holds the error message.
    Failed(String),
}

/// Classification result for one row, as written to the output columns.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub outcome: Outcome,
    /// Model thinking, or a short note for rows decided locally.
    pub rationale: String,
    /// Relevance literal returned by the model when it matched neither
    /// yes/true nor no/false; written to the flag column unnormalized.
    raw_flag: Option<String>,
}

impl Verdict {
    pub fn positive(content: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Positive(content.into()),
            rationale: rationale.into(),
            raw_flag: None,
        }
    }

    pub fn negative(rationale: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Negative,
            rationale: rationale.into(),
            raw_flag: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Failed(error.into()),
            rationale: String::new(),
            raw_flag: None,
        }
    }

    /// Value for the relevance flag column.
    pub fn flag(&self) -> &str {
        if let Some(raw) = &self.raw_flag {
            return raw;
        }
        match &self.outcome {
            Outcome::Positive(_) => "Yes",
            Outcome::Negative => "No",
            Outcome::Failed(_) => "Error",
        }
    }

    /// Value for the extracted-content column.
    pub fn content(&self) -> &str {
        match &self.outcome {
            Outcome::Positive(text) => text,
            Outcome::Negative => "None",
            Outcome::Failed(error) => error,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }
}

/// The classification capability consumed by the batch executor. Classifying
/// never fails at this boundary: every problem becomes a `Failed` verdict so
/// one bad row cannot abort a batch.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, report_text: &str) -> Verdict;
}

/// Bounded retry with exponential backoff between attempts. Kept separate
/// from the client so the policy can be exercised without a server.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.base_backoff * (1u32 << attempt.min(16))
    }

    /// Run `op` until it succeeds or `max_attempts` is exhausted, sleeping
    /// `base_backoff * 2^n` between attempts. The last error is returned.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        return Err(e);
                    }
                    let backoff = self.backoff_for(attempt - 1);
                    warn!(
                        "attempt {}/{} failed: {:#}, backing off {:.1}s",
                        attempt,
                        max_attempts,
                        e,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ChatMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    thinking: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    #[serde(default)]
    name: String,
}

/// Client for the Ollama chat API. Cheap local filtering (empty text, marker
/// substrings) runs before any network call; one model call can take minutes.
pub struct OllamaClient {
    http: reqwest::Client,
    chat_url: String,
    tags_url: String,
    model: String,
    reasoning_effort: String,
    temperature: f64,
    timeout: Duration,
    retry: RetryPolicy,
    markers: Vec<String>,
}

impl OllamaClient {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client")?;
        let base = cfg.base_url.trim_end_matches('/');
        Ok(Self {
            http,
            chat_url: format!("{}/api/chat", base),
            tags_url: format!("{}/api/tags", base),
            model: cfg.model.clone(),
            reasoning_effort: cfg.reasoning_effort.clone(),
            temperature: cfg.temperature,
            timeout: cfg.timeout,
            retry: RetryPolicy {
                max_attempts: cfg.max_retries,
                base_backoff: cfg.backoff_base,
            },
            markers: cfg.markers.iter().map(|m| m.to_lowercase()).collect(),
        })
    }

    /// Preflight: the service answers `/api/tags` and lists the configured
    /// model. Unavailability here is a fatal startup condition, not a per-row
    /// retry condition.
    pub async fn check_availability(&self) -> bool {
        let response = self
            .http
            .get(&self.tags_url)
            .timeout(AVAILABILITY_TIMEOUT)
            .send()
            .await;
        match response {
            Ok(r) if r.status().is_success() => match r.json::<TagsResponse>().await {
                Ok(tags) => tags.models.iter().any(|m| m.name.contains(&self.model)),
                Err(e) => {
                    error!("failed to parse /api/tags response: {}", e);
                    false
                }
            },
            Ok(r) => {
                error!("availability check returned {}", r.status());
                false
            }
            Err(e) => {
                error!("failed to reach {}: {}", self.tags_url, e);
                false
            }
        }
    }

    fn has_marker(&self, report_text: &str) -> bool {
        let lower = report_text.to_lowercase();
        self.markers.iter().any(|m| lower.contains(m))
    }

    /// One transport round trip to `/api/chat`, retried per the policy. Only
    /// send/status/body-read failures are retried here; anything received
    /// intact goes to the parser, which never retries.
    async fn query(&self, prompt_text: &str) -> Result<ChatMessage> {
        let payload = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt_text }],
            "stream": false,
            "format": "json",
            "think": self.reasoning_effort,
            "options": {
                "temperature": self.temperature,
                "top_p": 0.9,
                "num_predict": 4096,
            },
        });

        let payload = &payload;
        let body = self
            .retry
            .run(move || async move {
                debug!("sending request to {} (timeout {:?})", self.chat_url, self.timeout);
                let response = self
                    .http
                    .post(&self.chat_url)
                    .json(payload)
                    .timeout(self.timeout)
                    .send()
                    .await
                    .context("chat request failed")?;
                let response = response.error_for_status().context("chat request rejected")?;
                response.text().await.context("failed to read chat response")
            })
            .await?;

        // A body we received intact but cannot decode is a parse failure,
        // not a transport failure: no retry.
        let parsed: ChatResponse =
            serde_json::from_str(&body).context("unexpected chat response shape")?;
        Ok(parsed.message)
    }

    /// Parse the model's JSON answer, falling back to a case-insensitive text
    /// scan when the content is not valid JSON.
    fn parse_content(content: &str, rationale: String) -> Verdict {
        let data: serde_json::Value = match serde_json::from_str(content) {
            Ok(v) => v,
            Err(_) => {
                warn!(
                    "model returned non-JSON content, falling back to text scan: {}",
                    preview(content)
                );
                let lower = content.to_lowercase();
                if lower.contains("yes") || lower.contains("true") {
                    return Verdict::positive(content, rationale);
                }
                if lower.contains("no") || lower.contains("false") {
                    let mut v = Verdict::negative(String::new());
                    v.rationale = rationale;
                    return v;
                }
                let mut v = Verdict::failed(format!("failed to parse: {}", preview(content)));
                v.rationale = rationale;
                return v;
            }
        };

        let (Some(flag), Some(body)) = (data.get("is_imaging_related"), data.get("addendum_content"))
        else {
            warn!("missing required keys in model response: {}", preview(content));
            let mut v = Verdict::failed("missing keys in response");
            v.rationale = rationale;
            return v;
        };

        let flag = literal(flag);
        let flag = flag.trim();
        let body = literal(body);

        match flag.to_lowercase().as_str() {
            "yes" | "true" => Verdict::positive(body, rationale),
            "no" | "false" => {
                let mut v = Verdict::negative(String::new());
                v.rationale = rationale;
                v
            }
            // Anything else is passed through unnormalized.
            _ => Verdict {
                outcome: Outcome::Positive(body),
                rationale,
                raw_flag: Some(flag.to_string()),
            },
        }
    }
}

#[async_trait]
impl Classifier for OllamaClient {
    async fn classify(&self, report_text: &str) -> Verdict {
        if report_text.trim().is_empty() {
            warn!("empty report text, skipping model call");
            return Verdict::negative("empty report");
        }
        if !self.has_marker(report_text) {
            debug!("no addendum marker found, skipping model call");
            return Verdict::negative("no addendum marker found");
        }

        let prompt_text = prompt::build_prompt(report_text);
        match self.query(&prompt_text).await {
            Ok(message) => Self::parse_content(&message.content, message.thinking),
            Err(e) => {
                error!("classification query failed: {:#}", e);
                Verdict::failed("query failed")
            }
        }
    }
}

/// Render a JSON scalar the way the model meant it: strings as-is, anything
/// else (booleans in particular) via its JSON text.
fn literal(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() <= PARSE_PREVIEW_CHARS {
        s.to_string()
    } else {
        s.chars().take(PARSE_PREVIEW_CHARS).collect()
    }
}
