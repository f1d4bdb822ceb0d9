//! Healing orchestration: ANALYZE -> DECIDE -> (EXECUTE* | SKIPPED) -> DONE.
//!
//! Steps run strictly one after another. Unsafe fixes are skipped and the run
//! continues; the first executed fix that exits non-zero ends the run
//! (fail-fast), since later fixes may depend on earlier ones having worked.
//! Retrying the pipeline itself is left to the caller once `healed` is true.

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::HealerConfig;
use crate::error::HealerResult;
use crate::executor::{CommandExecutor, ProcessExecutor};
use crate::oracle::{AnalysisOracle, AnthropicOracle};
use crate::policy::SafetyPolicy;
use crate::types::{Diagnosis, ExecutionResult, FailureContext, HealingOutcome};

/// Minimum oracle confidence (0-10) required before any fix runs.
pub const DEFAULT_CONFIDENCE_THRESHOLD: u8 = 7;

/// Composes oracle, policy and executor into one healing run.
pub struct HealingOrchestrator {
    oracle: Box<dyn AnalysisOracle>,
    executor: Box<dyn CommandExecutor>,
    policy: SafetyPolicy,
    confidence_threshold: u8,
}

impl HealingOrchestrator {
    /// Create an orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        oracle: Box<dyn AnalysisOracle>,
        executor: Box<dyn CommandExecutor>,
        policy: SafetyPolicy,
    ) -> Self {
        Self {
            oracle,
            executor,
            policy,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }

    /// Override the confidence threshold.
    #[must_use]
    pub fn with_confidence_threshold(mut self, threshold: u8) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Build the production wiring: Anthropic oracle, process executor.
    ///
    /// # Errors
    ///
    /// Returns an error if the oracle's HTTP client cannot be created.
    pub fn from_config(config: &HealerConfig, api_key: impl Into<String>) -> HealerResult<Self> {
        let oracle = AnthropicOracle::new(api_key, config.oracle.clone())?;
        let executor = ProcessExecutor::new(config.executor.clone());

        Ok(Self::new(
            Box::new(oracle),
            Box::new(executor),
            SafetyPolicy::new(&config.policy),
        )
        .with_confidence_threshold(config.confidence_threshold))
    }

    /// Confidence threshold in use.
    #[must_use]
    pub fn confidence_threshold(&self) -> u8 {
        self.confidence_threshold
    }

    /// Run one healing attempt for a failed pipeline step.
    ///
    /// Never fails: oracle unavailability, unsafe fixes and failing commands
    /// are all reported through the returned outcome.
    pub async fn heal(&self, ctx: &FailureContext) -> HealingOutcome {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();

        info!(%run_id, "Analyzing {}", ctx.summary());
        let diagnosis = self.oracle.analyze(ctx).await;
        info!(
            %run_id,
            confidence = diagnosis.confidence,
            can_automate = diagnosis.can_automate,
            risk = %diagnosis.risk_level,
            fixes = diagnosis.fixes.len(),
            "Diagnosis: {}",
            diagnosis.root_cause
        );

        if !diagnosis.permits_automation(self.confidence_threshold) {
            info!(
                %run_id,
                threshold = self.confidence_threshold,
                "Automation not permitted; surfacing {} suggested fix(es)",
                diagnosis.fixes.len()
            );
            return HealingOutcome {
                run_id,
                healed: false,
                automation_attempted: false,
                results: Vec::new(),
                diagnosis,
                started_at,
                finished_at: Utc::now(),
            };
        }

        let (results, completed) = self.execute(run_id, &diagnosis).await;
        let executed = results.iter().filter(|r| r.executed).count();
        if completed && executed == 0 {
            warn!(%run_id, "Every proposed fix was skipped by the safety policy");
        }
        info!(
            %run_id,
            healed = completed,
            executed,
            skipped = results.len() - executed,
            "Healing run finished"
        );

        HealingOutcome {
            run_id,
            healed: completed,
            automation_attempted: true,
            results,
            diagnosis,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Apply fixes in order. Returns the results and whether the loop ran to
    /// the end without a fail-fast stop.
    async fn execute(&self, run_id: Uuid, diagnosis: &Diagnosis) -> (Vec<ExecutionResult>, bool) {
        let mut results = Vec::with_capacity(diagnosis.fixes.len());

        for (index, fix) in diagnosis.fixes.iter().enumerate() {
            let decision = self.policy.evaluate(&fix.command);
            if !decision.is_allowed() {
                warn!(
                    %run_id,
                    step = index + 1,
                    "Skipping unsafe fix '{}': {}",
                    fix.command,
                    decision.reason()
                );
                results.push(ExecutionResult::skipped(fix.clone()));
                continue;
            }

            debug!(%run_id, step = index + 1, "Running fix '{}'", fix.command);
            let result = self.executor.run(fix).await;
            let failed = result.failed();
            info!(
                %run_id,
                step = index + 1,
                exit_code = ?result.exit_code,
                duration_ms = result.duration_ms,
                "Fix '{}' finished",
                fix.command
            );
            results.push(result);

            if failed {
                warn!(
                    %run_id,
                    step = index + 1,
                    remaining = diagnosis.fixes.len() - index - 1,
                    "Fix '{}' failed; stopping remaining fixes",
                    fix.command
                );
                return (results, false);
            }
        }

        (results, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::MockCommandExecutor;
    use crate::oracle::MockAnalysisOracle;
    use crate::types::Fix;
    use mockall::predicate::always;
    use mockall::Sequence;

    fn diagnosis(confidence: u8, can_automate: bool, commands: &[&str]) -> Diagnosis {
        Diagnosis {
            root_cause: "stale dependencies".to_string(),
            confidence,
            fixes: commands.iter().map(|c| Fix::new(*c)).collect(),
            can_automate,
            reasoning: String::new(),
            risk_level: crate::types::RiskLevel::Low,
        }
    }

    fn oracle_returning(d: Diagnosis) -> MockAnalysisOracle {
        let mut oracle = MockAnalysisOracle::new();
        oracle
            .expect_analyze()
            .times(1)
            .returning(move |_| d.clone());
        oracle
    }

    fn exit_with(fix: &Fix, code: i32) -> ExecutionResult {
        ExecutionResult {
            fix: fix.clone(),
            executed: true,
            exit_code: Some(code),
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 1,
        }
    }

    fn ctx() -> FailureContext {
        FailureContext::new("build", "exit code 1")
    }

    #[tokio::test]
    async fn test_cannot_automate_never_executes() {
        let oracle = oracle_returning(diagnosis(10, false, &["npm ci"]));
        let mut executor = MockCommandExecutor::new();
        executor.expect_run().never();

        let orchestrator =
            HealingOrchestrator::new(Box::new(oracle), Box::new(executor), SafetyPolicy::default());
        let outcome = orchestrator.heal(&ctx()).await;

        assert!(!outcome.healed);
        assert!(!outcome.automation_attempted);
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.suggested_fixes().len(), 1);
    }

    #[tokio::test]
    async fn test_low_confidence_never_executes() {
        let oracle = oracle_returning(diagnosis(6, true, &["npm ci", "npm test"]));
        let mut executor = MockCommandExecutor::new();
        executor.expect_run().never();

        let orchestrator =
            HealingOrchestrator::new(Box::new(oracle), Box::new(executor), SafetyPolicy::default());
        let outcome = orchestrator.heal(&ctx()).await;

        assert!(!outcome.healed);
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.suggested_fixes().len(), 2);
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let oracle = oracle_returning(diagnosis(7, true, &["npm ci"]));
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_run()
            .times(1)
            .returning(|fix| exit_with(fix, 0));

        let orchestrator =
            HealingOrchestrator::new(Box::new(oracle), Box::new(executor), SafetyPolicy::default());
        let outcome = orchestrator.heal(&ctx()).await;

        assert!(outcome.healed);
        assert_eq!(outcome.executed_count(), 1);
    }

    #[tokio::test]
    async fn test_custom_threshold() {
        let oracle = oracle_returning(diagnosis(8, true, &["npm ci"]));
        let mut executor = MockCommandExecutor::new();
        executor.expect_run().never();

        let orchestrator =
            HealingOrchestrator::new(Box::new(oracle), Box::new(executor), SafetyPolicy::default())
                .with_confidence_threshold(9);
        assert_eq!(orchestrator.confidence_threshold(), 9);

        let outcome = orchestrator.heal(&ctx()).await;
        assert!(!outcome.automation_attempted);
    }

    #[tokio::test]
    async fn test_fixes_run_in_order_and_unsafe_are_skipped() {
        let oracle = oracle_returning(diagnosis(
            9,
            true,
            &["npm cache clean --force", "sudo rm -rf node_modules", "npm ci"],
        ));

        let mut seq = Sequence::new();
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_run()
            .withf(|fix| fix.command == "npm cache clean --force")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|fix| exit_with(fix, 0));
        executor
            .expect_run()
            .withf(|fix| fix.command == "npm ci")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|fix| exit_with(fix, 0));

        let orchestrator =
            HealingOrchestrator::new(Box::new(oracle), Box::new(executor), SafetyPolicy::default());
        let outcome = orchestrator.heal(&ctx()).await;

        assert!(outcome.healed);
        assert_eq!(outcome.results.len(), 3);
        assert!(outcome.results[0].executed);
        assert!(!outcome.results[1].executed);
        assert_eq!(outcome.results[1].exit_code, None);
        assert!(outcome.results[2].executed);
        assert_eq!(outcome.skipped_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_fast_on_non_zero_exit() {
        let oracle = oracle_returning(diagnosis(9, true, &["dotnet restore", "dotnet build"]));
        let mut executor = MockCommandExecutor::new();
        executor
            .expect_run()
            .with(always())
            .times(1)
            .returning(|fix| exit_with(fix, 1));

        let orchestrator =
            HealingOrchestrator::new(Box::new(oracle), Box::new(executor), SafetyPolicy::default());
        let outcome = orchestrator.heal(&ctx()).await;

        assert!(!outcome.healed);
        assert!(outcome.automation_attempted);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(
            outcome.failed_result().map(|r| r.fix.command.as_str()),
            Some("dotnet restore")
        );
    }

    #[tokio::test]
    async fn test_all_skipped_completes_without_execution() {
        let oracle = oracle_returning(diagnosis(9, true, &["sudo reboot", "format c:"]));
        let mut executor = MockCommandExecutor::new();
        executor.expect_run().never();

        let orchestrator =
            HealingOrchestrator::new(Box::new(oracle), Box::new(executor), SafetyPolicy::default());
        let outcome = orchestrator.heal(&ctx()).await;

        assert!(outcome.healed);
        assert_eq!(outcome.executed_count(), 0);
        assert_eq!(outcome.skipped_count(), 2);
    }

    #[tokio::test]
    async fn test_degraded_diagnosis_never_executes() {
        let oracle = oracle_returning(Diagnosis::degraded("connection refused"));
        let mut executor = MockCommandExecutor::new();
        executor.expect_run().never();

        let orchestrator =
            HealingOrchestrator::new(Box::new(oracle), Box::new(executor), SafetyPolicy::default());
        let outcome = orchestrator.heal(&ctx()).await;

        assert!(!outcome.healed);
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.diagnosis.confidence, 0);
        assert!(outcome.finished_at >= outcome.started_at);
    }
}
