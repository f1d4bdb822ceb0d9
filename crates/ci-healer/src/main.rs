//! CI Healer CLI
//!
//! Reads a failure context, runs one healing attempt and maps the outcome to
//! an exit status: 0 when the pipeline can be retried, 1 when it cannot, 2
//! when the context itself is unusable.

use anyhow::{Context, Result};
use ci_healer::{FailureContext, HealerConfig, HealerError, HealingOrchestrator, HealingOutcome};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Diagnose a failed CI step and apply vetted fixes
#[derive(Parser)]
#[command(name = "ci-healer")]
#[command(about = "Diagnose a failed CI step and apply vetted fixes")]
#[command(version)]
struct Cli {
    /// Path to the failure context JSON
    context: PathBuf,

    /// Oracle API key
    #[arg(env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Path to a TOML or JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Output format (json or text)
    #[arg(long, default_value = "text")]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    Json,
    #[default]
    Text,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("ci_healer=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ci_healer=info"))
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = match &cli.config {
        Some(path) => HealerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => HealerConfig::default(),
    };

    let payload = std::fs::read_to_string(&cli.context)
        .with_context(|| format!("Failed to read {}", cli.context.display()))?;

    let ctx = match FailureContext::from_json(&payload) {
        Ok(ctx) => ctx,
        Err(e @ HealerError::MalformedInput(_)) => {
            eprintln!("{} {e}", "✗".red());
            return Ok(ExitCode::from(2));
        }
        Err(e) => return Err(e.into()),
    };

    let orchestrator = HealingOrchestrator::from_config(&config, cli.api_key)
        .context("Failed to initialize healer")?;
    let outcome = orchestrator.heal(&ctx).await;

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        OutputFormat::Text => print_outcome(&outcome),
    }

    Ok(if outcome.healed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_outcome(outcome: &HealingOutcome) {
    let diagnosis = &outcome.diagnosis;

    println!("{}", "Diagnosis".bold());
    println!("  Root cause: {}", diagnosis.root_cause);
    println!(
        "  Confidence: {}/10  Risk: {}  Automatable: {}",
        diagnosis.confidence, diagnosis.risk_level, diagnosis.can_automate
    );
    if !diagnosis.reasoning.is_empty() {
        println!("  Reasoning: {}", diagnosis.reasoning.dimmed());
    }
    println!();

    if !outcome.automation_attempted {
        println!("{}", "Automation not attempted. Suggested fixes:".yellow());
        if outcome.suggested_fixes().is_empty() {
            println!("  (none)");
        }
        for (i, fix) in outcome.suggested_fixes().iter().enumerate() {
            println!(
                "  {}. {} [{}] {}",
                i + 1,
                fix.command.cyan(),
                fix.risk_level,
                fix.description
            );
        }
        return;
    }

    println!("{}", "Fixes".bold());
    for (i, result) in outcome.results.iter().enumerate() {
        let status = if !result.executed {
            "skipped".yellow()
        } else if result.succeeded() {
            "ok".green()
        } else {
            "failed".red()
        };
        println!(
            "  {}. {} [{}] ({} ms)",
            i + 1,
            result.fix.command.cyan(),
            status,
            result.duration_ms
        );
        if result.failed() && !result.stderr.trim().is_empty() {
            println!("     {}", result.stderr.trim().red());
        }
    }
    println!();

    if outcome.healed {
        println!("{}", "✓ Healed - pipeline can be retried".green().bold());
    } else {
        println!("{}", "✗ Not healed".red().bold());
    }
}
