//! Analysis oracle: turns a failure context into a diagnosis.
//!
//! The oracle is an external reasoning service reached over one
//! request/response exchange. Whatever goes wrong on the way (transport,
//! status, payload) is folded into [`Diagnosis::degraded`], so callers always
//! get a diagnosis back and an unavailable oracle simply means "do not
//! automate".

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{HealerError, HealerResult};
use crate::types::{tail_chars, Diagnosis, FailureContext, LOG_TAIL_CHARS};

/// Anthropic Messages API endpoint
pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

/// Anthropic API version
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Default model
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Matches the first fenced block, with or without a language tag.
static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap());

const INSTRUCTIONS: &str = "\
Analyze this CI/CD pipeline failure and respond with:
1. The root cause of the failure.
2. Your confidence in that diagnosis on a scale of 1-10.
3. An ordered list of concrete shell commands that would fix it, each with a risk level (low, medium, high).
4. Whether these fixes are safe to apply automatically without human review.
5. An overall risk assessment.

Only propose commands that can run non-interactively from the repository root.
Fixes are applied in the order given; stop adding fixes once the problem would be resolved.";

const RESPONSE_SCHEMA: &str = r#"{
  "rootCause": "string",
  "confidence": 1-10,
  "fixes": [
    {
      "command": "string",
      "description": "string",
      "riskLevel": "low|medium|high",
      "type": "dependency|build|environment|test|other"
    }
  ],
  "canAutomate": true|false,
  "reasoning": "string",
  "riskLevel": "low|medium|high"
}"#;

/// Anything that can diagnose a failure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalysisOracle: Send + Sync {
    /// Diagnose a failure. Never fails: unavailability yields a degraded diagnosis.
    async fn analyze(&self, ctx: &FailureContext) -> Diagnosis;
}

/// Oracle transport configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Messages endpoint URL
    pub endpoint: String,
    /// Value of the `anthropic-version` header
    pub api_version: String,
    /// Model identifier
    pub model: String,
    /// Output token budget
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Characters of log tail embedded in the prompt
    pub log_tail_chars: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: ANTHROPIC_API_URL.to_string(),
            api_version: ANTHROPIC_VERSION.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 4000,
            temperature: 0.1,
            timeout_secs: 120,
            log_tail_chars: LOG_TAIL_CHARS,
        }
    }
}

/// Messages API request message
#[derive(Debug, Serialize)]
struct MessageParam {
    role: &'static str,
    content: String,
}

/// Messages API request
#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<MessageParam>,
}

/// Messages API response content block
#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

/// Messages API response
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

/// Messages API error
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

/// Messages API error response
#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorBody,
}

/// Oracle backed by the Anthropic Messages API.
pub struct AnthropicOracle {
    client: Client,
    api_key: String,
    config: OracleConfig,
}

impl AnthropicOracle {
    /// Create an oracle holding `api_key` for its whole lifetime.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_key: impl Into<String>, config: OracleConfig) -> HealerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            config,
        })
    }

    /// Oracle configuration in use.
    #[must_use]
    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    /// Send one analysis request and parse the reply.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, a non-success status, an empty
    /// reply, or a reply that is not a JSON object.
    pub async fn request_diagnosis(&self, ctx: &FailureContext) -> HealerResult<Diagnosis> {
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            messages: vec![MessageParam {
                role: "user",
                content: build_prompt(ctx, self.config.log_tail_chars),
            }],
        };

        debug!(model = %self.config.model, "Sending failure analysis request");

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.config.api_version)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = match serde_json::from_str::<ApiErrorResponse>(&body) {
                Ok(err) => format!("{} - {}", err.error.error_type, err.error.message),
                Err(_) => body,
            };
            return Err(HealerError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let reply: MessagesResponse = serde_json::from_str(&body)?;
        let text = reply
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or(HealerError::EmptyResponse)?;

        parse_diagnosis(&text)
    }
}

#[async_trait]
impl AnalysisOracle for AnthropicOracle {
    async fn analyze(&self, ctx: &FailureContext) -> Diagnosis {
        match self.request_diagnosis(ctx).await {
            Ok(diagnosis) => {
                info!(
                    confidence = diagnosis.confidence,
                    can_automate = diagnosis.can_automate,
                    fixes = diagnosis.fixes.len(),
                    "Oracle diagnosis received"
                );
                diagnosis
            }
            Err(e) => {
                warn!("Oracle analysis failed: {e}");
                Diagnosis::degraded(e)
            }
        }
    }
}

/// Build the analysis prompt for a failure.
///
/// Logs are cut to their trailing `log_tail_chars` characters.
#[must_use]
pub fn build_prompt(ctx: &FailureContext, log_tail_chars: usize) -> String {
    let context_json =
        serde_json::to_string_pretty(&ctx.context).unwrap_or_else(|_| "{}".to_string());

    let mut prompt = String::new();
    let _ = writeln!(prompt, "A CI/CD pipeline step failed.\n");
    let _ = writeln!(prompt, "Repository: {}", ctx.repository);
    let _ = writeln!(prompt, "Branch: {}", ctx.branch);
    let _ = writeln!(prompt, "Commit: {}", ctx.commit);
    let _ = writeln!(prompt, "Failed step: {}", ctx.step_name);
    let _ = writeln!(prompt, "Error message: {}\n", ctx.error_message);
    let tail = tail_chars(&ctx.logs, log_tail_chars);
    let _ = writeln!(
        prompt,
        "Logs (last {} characters):\n```\n{tail}\n```\n",
        tail.chars().count()
    );
    let _ = writeln!(prompt, "Additional context:\n```json\n{context_json}\n```\n");
    let _ = writeln!(prompt, "{INSTRUCTIONS}\n");
    let _ = write!(
        prompt,
        "Respond with a single JSON object in exactly this format and nothing else:\n{RESPONSE_SCHEMA}"
    );
    prompt
}

/// Remove a markdown code fence the oracle may have wrapped its answer in.
///
/// When the reply holds several fenced blocks (e.g. a shell example before
/// the answer), the first one containing a JSON object wins; otherwise the
/// first block is used.
#[must_use]
pub fn strip_code_fences(text: &str) -> &str {
    let blocks: Vec<&str> = CODE_FENCE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .collect();

    blocks
        .iter()
        .copied()
        .find(|block| is_json_object(block))
        .or_else(|| blocks.first().copied())
        .unwrap_or_else(|| text.trim())
}

fn is_json_object(text: &str) -> bool {
    serde_json::from_str::<Value>(text).is_ok_and(|value| value.is_object())
}

/// Parse the oracle's textual payload into a diagnosis.
///
/// # Errors
///
/// Returns [`HealerError::Parse`] if no JSON object can be recovered.
pub fn parse_diagnosis(text: &str) -> HealerResult<Diagnosis> {
    let payload = strip_code_fences(text);

    let value = match serde_json::from_str::<Value>(payload) {
        Ok(value) => value,
        Err(e) => outermost_object(text)
            .and_then(|object| serde_json::from_str::<Value>(object).ok())
            .ok_or_else(|| HealerError::Parse(format!("response is not valid JSON: {e}")))?,
    };

    if !value.is_object() {
        return Err(HealerError::Parse(
            "response is not a JSON object".to_string(),
        ));
    }

    Ok(Diagnosis::from_value(&value))
}

/// Slice from the first `{` to the last `}`.
fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
