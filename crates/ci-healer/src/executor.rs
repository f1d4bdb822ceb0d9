//! Command execution for approved fixes.
//!
//! The executor does not consult the safety policy; the orchestrator gates
//! every fix before it gets here. Commands run without an intermediate shell
//! unless they explicitly start with `bash -c` or `sh -c`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::types::{ExecutionResult, Fix};

/// Exit code reported when a command could not be started.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = -1;

/// Exit code reported when a command exceeded its time budget.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// How long to keep reading pipes after killing a timed out command.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Shell invocations whose remainder is handed to the interpreter whole.
const SHELL_PREFIXES: &[(&str, &str)] = &[("bash -c", "bash"), ("sh -c", "sh")];

/// Anything that can run a fix's command.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run one fix to completion. Never fails: spawn errors become a result.
    async fn run(&self, fix: &Fix) -> ExecutionResult;
}

/// Process executor configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Working directory for commands (defaults to the current directory)
    pub working_dir: Option<PathBuf>,
    /// Per-command time budget in seconds; unset means wait indefinitely
    pub timeout_secs: Option<u64>,
}

/// A command line split into program and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ParsedCommand {
    /// Split a command line. Returns `None` for a blank command.
    #[must_use]
    pub fn parse(command: &str) -> Option<Self> {
        let trimmed = command.trim();
        if trimmed.is_empty() {
            return None;
        }

        let lowered = trimmed.to_ascii_lowercase();
        for (prefix, program) in SHELL_PREFIXES {
            let Some(rest) = lowered.strip_prefix(prefix) else {
                continue;
            };
            if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
                continue;
            }
            // ASCII lowercasing keeps byte offsets intact
            let script = strip_outer_quotes(trimmed[prefix.len()..].trim());
            return Some(Self {
                program: (*program).to_string(),
                args: vec!["-c".to_string(), script.to_string()],
            });
        }

        let (program, rest) = match trimmed.split_once(char::is_whitespace) {
            Some((program, rest)) => (program, rest),
            None => (trimmed, ""),
        };

        Some(Self {
            program: program.to_string(),
            args: split_arguments(rest),
        })
    }
}

fn strip_outer_quotes(text: &str) -> &str {
    for quote in ['"', '\''] {
        if text.len() >= 2 && text.starts_with(quote) && text.ends_with(quote) {
            return &text[1..text.len() - 1];
        }
    }
    text
}

/// Split an argument string on whitespace, keeping quoted runs together.
fn split_arguments(text: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;

    for c in text.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_token = true;
            }
            None if c.is_whitespace() => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            None => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if in_token {
        args.push(current);
    }
    args
}

/// Executor that spawns real operating-system processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessExecutor {
    config: ExecutorConfig,
}

impl ProcessExecutor {
    /// Create an executor.
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    fn timeout(&self) -> Option<Duration> {
        self.config.timeout_secs.map(Duration::from_secs)
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn run(&self, fix: &Fix) -> ExecutionResult {
        let started = Instant::now();

        let Some(parsed) = ParsedCommand::parse(&fix.command) else {
            return spawn_failure(fix, "empty command", started);
        };

        debug!(program = %parsed.program, args = ?parsed.args, "Spawning fix command");

        let mut command = Command::new(&parsed.program);
        command
            .args(&parsed.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!("Failed to start '{}': {e}", parsed.program);
                return spawn_failure(fix, &message, started);
            }
        };

        let (stdout_buf, mut stdout_task) = capture(child.stdout.take());
        let (stderr_buf, mut stderr_task) = capture(child.stderr.take());

        let status = match self.timeout() {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => Some(status),
                Err(_) => {
                    if let Err(e) = child.kill().await {
                        debug!("Failed to kill timed out '{}': {e}", parsed.program);
                    }
                    None
                }
            },
            None => Some(child.wait().await),
        };

        match status {
            Some(Ok(status)) => {
                let _ = tokio::join!(&mut stdout_task, &mut stderr_task);
                ExecutionResult {
                    fix: fix.clone(),
                    executed: true,
                    // No code means the process was killed by a signal
                    exit_code: Some(status.code().unwrap_or(SPAWN_FAILURE_EXIT_CODE)),
                    stdout: drain(&stdout_buf).await,
                    stderr: drain(&stderr_buf).await,
                    duration_ms: elapsed_ms(started),
                }
            }
            Some(Err(e)) => {
                stdout_task.abort();
                stderr_task.abort();
                let message = format!("Failed to wait for '{}': {e}", parsed.program);
                spawn_failure(fix, &message, started)
            }
            None => {
                // Grandchildren may still hold the pipes open
                let _ = tokio::time::timeout(
                    PIPE_DRAIN_GRACE,
                    async { tokio::join!(&mut stdout_task, &mut stderr_task) },
                )
                .await;
                stdout_task.abort();
                stderr_task.abort();

                let limit = self.config.timeout_secs.unwrap_or_default();
                let mut stderr = drain(&stderr_buf).await;
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("Command timed out after {limit}s"));

                ExecutionResult {
                    fix: fix.clone(),
                    executed: true,
                    exit_code: Some(TIMEOUT_EXIT_CODE),
                    stdout: drain(&stdout_buf).await,
                    stderr,
                    duration_ms: elapsed_ms(started),
                }
            }
        }
    }
}

type PipeBuffer = Arc<Mutex<Vec<u8>>>;

/// Read a child pipe into a shared buffer so partial output survives a kill.
fn capture<R>(pipe: Option<R>) -> (PipeBuffer, JoinHandle<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let buffer = PipeBuffer::default();
    let sink = Arc::clone(&buffer);

    let task = tokio::spawn(async move {
        let Some(mut pipe) = pipe else {
            return;
        };
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink.lock().await.extend_from_slice(&chunk[..n]),
            }
        }
    });

    (buffer, task)
}

async fn drain(buffer: &PipeBuffer) -> String {
    String::from_utf8_lossy(&buffer.lock().await).to_string()
}

fn spawn_failure(fix: &Fix, message: &str, started: Instant) -> ExecutionResult {
    ExecutionResult {
        fix: fix.clone(),
        executed: true,
        exit_code: Some(SPAWN_FAILURE_EXIT_CODE),
        stdout: String::new(),
        stderr: message.to_string(),
        duration_ms: elapsed_ms(started),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(program: &str, args: &[&str]) -> Option<ParsedCommand> {
        Some(ParsedCommand {
            program: program.to_string(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        })
    }

    #[test]
    fn test_parse_plain_command() {
        assert_eq!(
            ParsedCommand::parse("dotnet build --configuration Release"),
            parsed("dotnet", &["build", "--configuration", "Release"])
        );
        assert_eq!(ParsedCommand::parse("  make  "), parsed("make", &[]));
        assert_eq!(ParsedCommand::parse(""), None);
        assert_eq!(ParsedCommand::parse("   "), None);
    }

    #[test]
    fn test_parse_respects_quotes() {
        assert_eq!(
            ParsedCommand::parse(r#"git commit -m "fix the build" --author 'CI Bot'"#),
            parsed("git", &["commit", "-m", "fix the build", "--author", "CI Bot"])
        );
        assert_eq!(
            ParsedCommand::parse(r#"echo "" done"#),
            parsed("echo", &["", "done"])
        );
    }

    #[test]
    fn test_parse_shell_invocation() {
        assert_eq!(
            ParsedCommand::parse(r#"bash -c "npm ci && npm test""#),
            parsed("bash", &["-c", "npm ci && npm test"])
        );
        assert_eq!(
            ParsedCommand::parse("SH -C exit 3"),
            parsed("sh", &["-c", "exit 3"])
        );
        // Not a shell invocation, just a program whose name starts with "sh"
        assert_eq!(
            ParsedCommand::parse("sh -cx script.sh"),
            parsed("sh", &["-cx", "script.sh"])
        );
    }

    #[test]
    fn test_strip_outer_quotes() {
        assert_eq!(strip_outer_quotes("\"a b\""), "a b");
        assert_eq!(strip_outer_quotes("'a b'"), "a b");
        assert_eq!(strip_outer_quotes("\"a b'"), "\"a b'");
        assert_eq!(strip_outer_quotes("\""), "\"");
    }

    #[tokio::test]
    async fn test_missing_binary_reports_spawn_failure() {
        let executor = ProcessExecutor::default();
        let result = executor
            .run(&Fix::new("definitely-not-a-real-binary-4f1c --flag"))
            .await;
        assert!(result.executed);
        assert_eq!(result.exit_code, Some(SPAWN_FAILURE_EXIT_CODE));
        assert!(result.stderr.contains("definitely-not-a-real-binary-4f1c"));
        assert!(result.failed());
    }

    #[tokio::test]
    async fn test_blank_command_reports_spawn_failure() {
        let result = ProcessExecutor::default().run(&Fix::new("  ")).await;
        assert!(result.executed);
        assert_eq!(result.exit_code, Some(SPAWN_FAILURE_EXIT_CODE));
        assert_eq!(result.stderr, "empty command");
    }
}
