use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use storyline::config::{Config, STATE_DIR};

mod cmd;

#[derive(Parser)]
#[command(name = "storyline")]
#[command(version, about = "Story-driven delivery pipeline with QA and recovery")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a story through spec, execution and QA, with automatic recovery
    Run {
        /// Story identifier, e.g. STORY-9
        story_id: String,
        /// Where requirements come from: story, prd or prompt
        #[arg(long, default_value = "story")]
        source: String,
        /// PRD document to derive the specification from
        #[arg(long)]
        prd_path: Option<PathBuf>,
        /// Override the detected tech stack (e.g. rust, typescript)
        #[arg(long)]
        tech_stack: Option<String>,
    },
    /// Evaluate a checklist against one or more paths
    Checklist {
        /// Checklist name (file under the checklists directory, .md optional)
        name: String,
        /// Paths each automated rule is checked against
        paths: Vec<PathBuf>,
    },
    /// Decide how to recover from a phase failure
    Recover {
        story_id: String,
        /// Phase that failed
        #[arg(long)]
        phase: String,
        /// Error message reported by the phase
        #[arg(long)]
        error: String,
        /// Recovery attempts already made for this phase
        #[arg(long, default_value = "0")]
        attempts: u32,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default storyline.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let log_dir = project_dir.join(STATE_DIR).join("logs");
    let file_logging = project_dir.join(STATE_DIR).is_dir();
    let _guard = storyline::logging::init(file_logging.then_some(log_dir.as_path()), cli.verbose)?;

    match &cli.command {
        Commands::Run {
            story_id,
            source,
            prd_path,
            tech_stack,
        } => {
            let config = Config::load(&project_dir, cli.verbose)?;
            cmd::cmd_run(
                &config,
                cmd::run::RunArgs {
                    story_id,
                    source,
                    prd_path: prd_path.as_deref(),
                    tech_stack: tech_stack.as_deref(),
                },
            )
            .await?;
        }
        Commands::Checklist { name, paths } => {
            let config = Config::load(&project_dir, cli.verbose)?;
            cmd::cmd_checklist(&config, name, paths).await?;
        }
        Commands::Recover {
            story_id,
            phase,
            error,
            attempts,
        } => {
            let config = Config::load(&project_dir, cli.verbose)?;
            cmd::cmd_recover(&config, story_id, phase, error, *attempts).await?;
        }
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
