//! Safety-gated remediation for failed CI runs.
//!
//! A failed pipeline step is described by a [`FailureContext`]. The
//! [`HealingOrchestrator`] asks an [`AnalysisOracle`] for a [`Diagnosis`],
//! and when the oracle is confident enough and allows automation, runs each
//! proposed [`Fix`] that passes the [`SafetyPolicy`] through a
//! [`CommandExecutor`], in order, stopping at the first failing command.
//! The resulting [`HealingOutcome`] tells the caller whether the pipeline can
//! be retried.

pub mod config;
pub mod error;
pub mod executor;
pub mod oracle;
pub mod orchestrator;
pub mod policy;
pub mod types;

// Re-export primary types
pub use config::HealerConfig;
pub use error::{HealerError, HealerResult};
pub use executor::{
    CommandExecutor, ExecutorConfig, ParsedCommand, ProcessExecutor, SPAWN_FAILURE_EXIT_CODE,
    TIMEOUT_EXIT_CODE,
};
pub use oracle::{build_prompt, parse_diagnosis, AnalysisOracle, AnthropicOracle, OracleConfig};
pub use orchestrator::{HealingOrchestrator, DEFAULT_CONFIDENCE_THRESHOLD};
pub use policy::{PolicyConfig, PolicyDecision, SafetyPolicy};
pub use types::{
    tail_chars, Diagnosis, ExecutionResult, FailureContext, Fix, HealingOutcome, RiskLevel,
    LOG_TAIL_CHARS,
};
