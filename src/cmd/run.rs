//! Story pipeline commands: `storyline run` and `storyline recover`.

use anyhow::{Context, Result};
use console::style;
use std::path::Path;

use storyline::capability::Capabilities;
use storyline::config::Config;
use storyline::context::{ExecutionContext, FailureReport, RequirementSource, TechStack, detect_tech_stack};
use storyline::executor::PhaseExecutor;
use storyline::pipeline::{Pipeline, RunStatus, recovery_executor};

pub struct RunArgs<'a> {
    pub story_id: &'a str,
    pub source: &'a str,
    pub prd_path: Option<&'a Path>,
    pub tech_stack: Option<&'a str>,
}

fn build_context(config: &Config, args: &RunArgs<'_>) -> Result<ExecutionContext> {
    let source: RequirementSource = args.source.parse()?;
    if source == RequirementSource::Prd && args.prd_path.is_none() {
        anyhow::bail!("--prd-path is required when --source is prd");
    }
    let tech_stack = match args.tech_stack {
        Some(name) => Some(TechStack::named(name)),
        None => detect_tech_stack(&config.project_dir),
    };
    let mut ctx = ExecutionContext::new(args.story_id, source, &config.project_dir).with_tech_stack(tech_stack);
    if let Some(prd) = args.prd_path {
        ctx = ctx.with_prd_path(prd);
    }
    Ok(ctx)
}

pub async fn cmd_run(config: &Config, args: RunArgs<'_>) -> Result<()> {
    if args.story_id.trim().is_empty() {
        anyhow::bail!("Story id must not be empty");
    }
    let mut ctx = build_context(config, &args)?;

    println!();
    println!("{} {}", style("Storyline").bold().cyan(), style(ctx.story_id()).bold());
    if let Some(stack) = ctx.tech_stack() {
        println!("  Tech stack: {}", stack.language);
    }
    if config.agent().command.is_none() {
        println!(
            "  {}",
            style("No agent command configured, running with stub capabilities").dim()
        );
    }
    println!();

    let pipeline = Pipeline::new(config, Capabilities::from_config(config));
    let summary = pipeline
        .run(&mut ctx)
        .await
        .with_context(|| format!("Pipeline for {} aborted", ctx.story_id()))?;

    for artifact in ctx.artifacts() {
        println!("  {:<18} {}", style(artifact.kind()).dim(), artifact.path().display());
    }
    println!();

    let status = match summary.status {
        RunStatus::Completed => style(summary.status.to_string()).green().bold(),
        RunStatus::Blocked | RunStatus::Escalated => style(summary.status.to_string()).red().bold(),
        RunStatus::Stopped => style(summary.status.to_string()).yellow().bold(),
    };
    println!("Status: {}", status);
    if !summary.skipped_phases.is_empty() {
        println!("Skipped: {}", summary.skipped_phases.join(", "));
    }
    if let Some(error) = &summary.error {
        println!("{} {}", style("Last error:").red(), error);
    }
    println!("Summary: {}", summary.summary_path.display());
    println!();

    if summary.status != RunStatus::Completed {
        anyhow::bail!("Story {} did not complete ({})", summary.story_id, summary.status);
    }
    Ok(())
}

pub async fn cmd_recover(config: &Config, story_id: &str, phase: &str, error: &str, attempts: u32) -> Result<()> {
    let mut ctx = ExecutionContext::new(story_id, RequirementSource::Story, &config.project_dir);
    ctx.set_failure(FailureReport {
        failed_phase: phase.to_string(),
        error: error.to_string(),
        attempts,
    });

    let caps = Capabilities::from_config(config);
    let outcome = recovery_executor(config, &caps).execute(&mut ctx).await?;
    let Some(output) = outcome.output() else {
        anyhow::bail!("Recovery failed: {}", outcome.error().unwrap_or("unknown error"));
    };

    println!();
    println!("Strategy:     {}", style(output.decision.strategy).bold());
    println!("Reason:       {}", output.reason);
    println!("Should retry: {}", output.decision.should_retry);
    println!("New approach: {}", output.decision.new_approach);
    if output.decision.escalated {
        println!("{}", style("Escalated to a human").red().bold());
    }
    if let Some(report) = &output.escalation_report {
        println!("Report:       {}", report.display());
    }
    println!("Log:          {}", output.log_path.display());
    println!();
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}
