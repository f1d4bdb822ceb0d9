//! Process executor tests against real binaries.

#![cfg(unix)]

use ci_healer::{
    CommandExecutor, ExecutorConfig, Fix, ProcessExecutor, SPAWN_FAILURE_EXIT_CODE,
    TIMEOUT_EXIT_CODE,
};

#[tokio::test]
async fn test_captures_stdout_and_exit_code() {
    let result = ProcessExecutor::default()
        .run(&Fix::new("echo hello healer"))
        .await;

    assert!(result.executed);
    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.stdout.trim(), "hello healer");
    assert!(result.succeeded());
}

#[tokio::test]
async fn test_quoted_arguments_are_not_split() {
    let result = ProcessExecutor::default()
        .run(&Fix::new(r#"printf "%s|" "a b" c"#))
        .await;

    assert_eq!(result.exit_code, Some(0));
    assert_eq!(result.stdout, "a b|c|");
}

#[tokio::test]
async fn test_shell_invocation_reports_exit_code() {
    let result = ProcessExecutor::default()
        .run(&Fix::new(r#"sh -c "echo oops >&2; exit 3""#))
        .await;

    assert!(result.executed);
    assert_eq!(result.exit_code, Some(3));
    assert_eq!(result.stderr.trim(), "oops");
    assert!(result.failed());
}

#[tokio::test]
async fn test_non_zero_exit_without_shell() {
    let result = ProcessExecutor::default().run(&Fix::new("false")).await;
    assert!(result.executed);
    assert_eq!(result.exit_code, Some(1));
}

#[tokio::test]
async fn test_missing_binary_is_reported_not_raised() {
    let result = ProcessExecutor::default()
        .run(&Fix::new("no-such-remediation-tool --fix"))
        .await;

    assert!(result.executed);
    assert_eq!(result.exit_code, Some(SPAWN_FAILURE_EXIT_CODE));
    assert!(!result.stderr.is_empty());
}

#[tokio::test]
async fn test_working_directory_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let executor = ProcessExecutor::new(ExecutorConfig {
        working_dir: Some(dir.path().to_path_buf()),
        timeout_secs: None,
    });

    let result = executor.run(&Fix::new("pwd")).await;
    assert_eq!(result.exit_code, Some(0));
    let reported = std::fs::canonicalize(result.stdout.trim()).unwrap();
    assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
}

#[tokio::test]
async fn test_timeout_kills_long_running_command() {
    let executor = ProcessExecutor::new(ExecutorConfig {
        working_dir: None,
        timeout_secs: Some(1),
    });

    let result = executor.run(&Fix::new("sleep 30")).await;
    assert!(result.executed);
    assert_eq!(result.exit_code, Some(TIMEOUT_EXIT_CODE));
    assert!(result.stderr.contains("timed out"));
    assert!(result.duration_ms < 30_000);
}

#[tokio::test]
async fn test_timeout_keeps_partial_output() {
    let executor = ProcessExecutor::new(ExecutorConfig {
        working_dir: None,
        timeout_secs: Some(1),
    });

    let result = executor
        .run(&Fix::new(r#"sh -c "echo restoring; echo warming >&2; sleep 30""#))
        .await;

    assert_eq!(result.exit_code, Some(TIMEOUT_EXIT_CODE));
    assert_eq!(result.stdout.trim(), "restoring");
    assert!(result.stderr.starts_with("warming\n"));
    assert!(result.stderr.ends_with("Command timed out after 1s"));
    assert!(result.duration_ms < 30_000);
}
