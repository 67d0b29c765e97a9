//! Checklist evaluation: `storyline checklist <name> [paths...]`.

use anyhow::Result;
use console::style;
use std::path::PathBuf;

use storyline::checklist::ChecklistRunner;
use storyline::config::Config;

pub async fn cmd_checklist(config: &Config, name: &str, paths: &[PathBuf]) -> Result<()> {
    let targets: Vec<PathBuf> = paths
        .iter()
        .map(|p| if p.is_absolute() { p.clone() } else { config.project_dir.join(p) })
        .collect();

    let runner = ChecklistRunner::new(&config.checklists_dir);
    let result = runner.run(name, &targets).await?;

    println!();
    println!("{} {}", style("Checklist").bold().cyan(), style(&result.name).bold());
    println!();
    for item in &result.items {
        let mark = if !item.passed {
            style("✗").red()
        } else if item.manual {
            style("?").dim()
        } else {
            style("✓").green()
        };
        let blocker = if item.item.blocker { " [blocker]" } else { "" };
        println!("  {} {}{}", mark, item.item.description, style(blocker).dim());
        if let Some(message) = &item.message {
            println!("      {}", style(message).dim());
        }
    }

    if !result.warnings.is_empty() {
        println!();
        println!("{}", style("Warnings:").yellow());
        for warning in &result.warnings {
            println!("  - {}", warning);
        }
    }
    println!();

    if result.passed {
        println!("{}", style("Checklist passed").green().bold());
        Ok(())
    } else {
        let failed = result.failed_blockers().count();
        println!("{}", style("Checklist failed").red().bold());
        anyhow::bail!("{} blocker item(s) failed", failed)
    }
}
