//! Configuration view and validation commands: `storyline config`.

use anyhow::Result;
use std::path::Path;

use storyline::config::{CONFIG_FILE, Config, STATE_DIR, StorylineToml};

use super::super::ConfigCommands;

fn print_settings(settings: &StorylineToml) {
    println!("[project]");
    println!("  state_dir = \"{}\"", settings.project.state_dir.display());
    println!("  checklists_dir = \"{}\"", settings.project.checklists_dir.display());
    println!();
    println!("[agent]");
    match &settings.agent.command {
        Some(cmd) => println!("  command = \"{}\"", cmd),
        None => println!("  command = (none, capabilities disabled)"),
    }
    if !settings.agent.args.is_empty() {
        println!("  args = {:?}", settings.agent.args);
    }
    println!("  timeout_secs = {}", settings.agent.timeout_secs);
    println!();
    println!("[recovery]");
    println!("  max_attempts = {}", settings.recovery.max_attempts);
    println!("  stuck_threshold = {}", settings.recovery.stuck_threshold);
    println!("  skippable_phases = {:?}", settings.recovery.skippable_phases);
    println!("  rollback = \"{}\"", settings.recovery.rollback);
    println!();
    println!("[qa]");
    println!("  max_iterations = {}", settings.qa.max_iterations);
    println!("  issue_threshold = {}", settings.qa.issue_threshold);
    println!();
    println!("[tests]");
    match &settings.tests.command {
        Some(cmd) => println!("  command = \"{}\"", cmd),
        None => println!("  command = (none)"),
    }
    println!("  dirs = {:?}", settings.tests.dirs);
    println!();
}

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = project_dir.join(STATE_DIR).join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Storyline Configuration");
            println!("=======================");
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found at {}, using defaults.", CONFIG_FILE, config_path.display());
            }
            println!();

            println!("Effective values (with env overrides):");
            println!();
            let config = Config::load(project_dir, false)?;
            print_settings(config.settings());
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE);
                return Ok(());
            }

            let toml = StorylineToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("{} already exists at {}", CONFIG_FILE, config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            StorylineToml::default().save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [agent] command, args, timeout_secs");
            println!("  - [recovery] max_attempts, stuck_threshold, skippable_phases, rollback");
            println!("  - [qa] max_iterations, issue_threshold");
            println!("  - [tests] command, dirs");
            println!();
        }
    }

    Ok(())
}
