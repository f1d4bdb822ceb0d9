//! Core types for the healing pipeline.
//!
//! Data flows one way through these records:
//! [`FailureContext`] -> [`Diagnosis`] -> [`Fix`] -> [`ExecutionResult`] -> [`HealingOutcome`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::{HealerError, HealerResult};

/// Character budget kept from the tail of a failed step's logs.
pub const LOG_TAIL_CHARS: usize = 5000;

/// Highest confidence score an oracle may report.
pub const MAX_CONFIDENCE: u8 = 10;

/// Return the last `max_chars` characters of `text`.
///
/// Counts Unicode scalar values, so a multi-byte character is never split.
#[must_use]
pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    match text.char_indices().nth(total - max_chars) {
        Some((idx, _)) => &text[idx..],
        None => "",
    }
}

fn deserialize_log_tail<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let logs = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
    Ok(tail_chars(&logs, LOG_TAIL_CHARS).to_string())
}

/// One failed pipeline step, as handed to the healer.
///
/// Built once per failed run and only read afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureContext {
    /// Name of the step that failed (e.g., "build")
    #[serde(alias = "step_name")]
    pub step_name: String,
    /// Error message reported by the step
    #[serde(alias = "error_message")]
    pub error_message: String,
    /// Tail of the step's output, bounded to [`LOG_TAIL_CHARS`]
    #[serde(default, deserialize_with = "deserialize_log_tail")]
    pub logs: String,
    /// Repository identifier (e.g., "5dlabs/cto")
    #[serde(default)]
    pub repository: String,
    /// Branch the run was on
    #[serde(default)]
    pub branch: String,
    /// Commit SHA of the run
    #[serde(default, alias = "sha")]
    pub commit: String,
    /// Auxiliary context passed through to the oracle verbatim
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

impl FailureContext {
    /// Create a context for a failed step.
    #[must_use]
    pub fn new(step_name: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            error_message: error_message.into(),
            ..Default::default()
        }
    }

    /// Attach step logs, keeping only the trailing [`LOG_TAIL_CHARS`] characters.
    #[must_use]
    pub fn with_logs(mut self, logs: &str) -> Self {
        self.logs = tail_chars(logs, LOG_TAIL_CHARS).to_string();
        self
    }

    /// Set the repository identifier.
    #[must_use]
    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = repository.into();
        self
    }

    /// Set the branch.
    #[must_use]
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    /// Set the commit SHA.
    #[must_use]
    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = commit.into();
        self
    }

    /// Add one auxiliary context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Parse a context from its external JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`HealerError::MalformedInput`] if the payload is not valid JSON,
    /// lacks `stepName`/`errorMessage`, or names an empty step.
    pub fn from_json(text: &str) -> HealerResult<Self> {
        let ctx: Self =
            serde_json::from_str(text).map_err(|e| HealerError::MalformedInput(e.to_string()))?;

        if ctx.step_name.trim().is_empty() {
            return Err(HealerError::MalformedInput(
                "stepName must not be empty".to_string(),
            ));
        }

        Ok(ctx)
    }

    /// One-line description for logs.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut summary = format!("step '{}' failed", self.step_name);
        if !self.repository.is_empty() {
            summary.push_str(&format!(" in {}", self.repository));
        }
        if !self.branch.is_empty() {
            summary.push_str(&format!(" on {}", self.branch));
        }
        if !self.commit.is_empty() {
            let short: String = self.commit.chars().take(8).collect();
            summary.push_str(&format!(" @ {short}"));
        }
        summary
    }
}

/// Risk label attached to a diagnosis or a single fix.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    #[default]
    #[serde(other)]
    Unknown,
}

impl RiskLevel {
    /// Parse a risk label, mapping anything unrecognized to `Unknown`.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            _ => Self::Unknown,
        }
    }

    fn from_value(value: Option<&Value>) -> Self {
        value.and_then(Value::as_str).map_or(Self::Unknown, Self::parse)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// One proposed remediation command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fix {
    /// Command line to run
    pub command: String,
    /// What the command is meant to fix
    #[serde(default)]
    pub description: String,
    /// Oracle's risk label for this command
    #[serde(default)]
    pub risk_level: RiskLevel,
    /// Free-form category (e.g., "dependency", "build", "environment")
    #[serde(rename = "type", default)]
    pub fix_type: String,
}

impl Fix {
    /// Create a fix for a command.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            description: String::new(),
            risk_level: RiskLevel::Unknown,
            fix_type: String::new(),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the risk level.
    #[must_use]
    pub fn with_risk(mut self, risk_level: RiskLevel) -> Self {
        self.risk_level = risk_level;
        self
    }

    /// Set the category tag.
    #[must_use]
    pub fn with_type(mut self, fix_type: impl Into<String>) -> Self {
        self.fix_type = fix_type.into();
        self
    }

    /// Build a fix from one entry of the oracle's `fixes` array.
    ///
    /// Returns `None` when the entry carries no usable command.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let command = value.get("command")?.as_str()?.trim();
        if command.is_empty() {
            return None;
        }

        Some(Self {
            command: command.to_string(),
            description: str_field(value, "description"),
            risk_level: RiskLevel::from_value(value.get("riskLevel")),
            fix_type: str_field(value, "type"),
        })
    }
}

fn str_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

/// Oracle's structured verdict on a failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    /// Root cause in prose
    pub root_cause: String,
    /// Confidence on a 0-10 scale
    pub confidence: u8,
    /// Fixes in the order they must be applied
    pub fixes: Vec<Fix>,
    /// Whether the oracle considers the fixes safe to automate
    pub can_automate: bool,
    /// Oracle's reasoning
    pub reasoning: String,
    /// Overall risk of applying the fixes
    pub risk_level: RiskLevel,
}

impl Diagnosis {
    /// The safe default used whenever analysis is unavailable.
    #[must_use]
    pub fn degraded(reason: impl fmt::Display) -> Self {
        Self {
            root_cause: format!("Analysis failed: {reason}"),
            confidence: 0,
            fixes: Vec::new(),
            can_automate: false,
            reasoning: String::new(),
            risk_level: RiskLevel::Unknown,
        }
    }

    /// Build a diagnosis from the oracle's JSON object.
    ///
    /// Each field is read on its own; a missing or malformed field falls back
    /// to its safe default instead of rejecting the whole diagnosis.
    #[must_use]
    pub fn from_value(value: &Value) -> Self {
        let fixes = value
            .get("fixes")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(Fix::from_value).collect())
            .unwrap_or_default();

        Self {
            root_cause: str_field(value, "rootCause"),
            confidence: confidence_from(value.get("confidence")),
            fixes,
            can_automate: value
                .get("canAutomate")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            reasoning: str_field(value, "reasoning"),
            risk_level: RiskLevel::from_value(value.get("riskLevel")),
        }
    }

    /// Whether this diagnosis clears the automation gate.
    #[must_use]
    pub fn permits_automation(&self, confidence_threshold: u8) -> bool {
        self.can_automate && self.confidence >= confidence_threshold
    }
}

/// Read a confidence score, clamping to 0-10. Numeric strings are accepted.
///
/// Fractional scores round down so they never reach a threshold they missed.
fn confidence_from(value: Option<&Value>) -> u8 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    raw.filter(|c| c.is_finite())
        .map_or(0, |c| c.floor().clamp(0.0, f64::from(MAX_CONFIDENCE)) as u8)
}

/// Result of attempting one fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    /// The fix this result belongs to
    pub fix: Fix,
    /// False when the safety policy skipped the fix
    pub executed: bool,
    /// Process exit code (absent for skipped fixes)
    pub exit_code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Wall-clock time spent running the command
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Record a fix rejected by the safety policy.
    #[must_use]
    pub fn skipped(fix: Fix) -> Self {
        Self {
            fix,
            executed: false,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
        }
    }

    /// Whether the command ran and exited with zero.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.executed && self.exit_code == Some(0)
    }

    /// Whether the command ran and did not exit with zero.
    #[must_use]
    pub fn failed(&self) -> bool {
        self.executed && self.exit_code != Some(0)
    }
}

/// Terminal artifact of one healing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealingOutcome {
    /// Identifier used to correlate log lines of one run
    pub run_id: Uuid,
    /// True when the pipeline may be retried
    pub healed: bool,
    /// Whether the diagnosis cleared the automation gate
    pub automation_attempted: bool,
    /// One entry per attempted fix, in order
    pub results: Vec<ExecutionResult>,
    /// Diagnosis the run acted on
    pub diagnosis: Diagnosis,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
}

impl HealingOutcome {
    /// Number of fixes that actually ran.
    #[must_use]
    pub fn executed_count(&self) -> usize {
        self.results.iter().filter(|r| r.executed).count()
    }

    /// Number of fixes skipped by the safety policy.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.results.iter().filter(|r| !r.executed).count()
    }

    /// The executed fix that stopped the run, if any.
    #[must_use]
    pub fn failed_result(&self) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.failed())
    }

    /// Fixes to show a human when nothing was automated.
    #[must_use]
    pub fn suggested_fixes(&self) -> &[Fix] {
        &self.diagnosis.fixes
    }
}
