//! CLI command definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use eyre::Result;
use tracing::debug;

use crate::planner::PlanInputs;

/// projectplanner - multi-agent project planning
#[derive(Parser)]
#[command(
    name = "pp",
    about = "Turn a project description into a validated plan with a crew of LLM agents",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a project plan
    Plan {
        #[command(flatten)]
        inputs: InputArgs,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List the crew's roles
    Roles,

    /// List the crew's stages in execution order
    Stages,

    /// Validate config, crew, prompts and inputs without calling a model
    Check {
        #[command(flatten)]
        inputs: InputArgs,
    },

    /// Estimate the cost of a token count
    Cost {
        /// Prompt (input) tokens
        #[arg(short, long, default_value = "0")]
        prompt_tokens: u64,

        /// Completion (output) tokens
        #[arg(short = 'o', long, default_value = "0")]
        completion_tokens: u64,

        /// Dollars per million tokens (defaults to pricing.rate-per-million)
        #[arg(short, long)]
        rate: Option<f64>,
    },
}

/// Planning inputs; flags override values from `--inputs`
#[derive(Debug, Clone, Default, clap::Args)]
pub struct InputArgs {
    /// YAML file with project_type, industry, project_objectives, team_members, project_requirements
    #[arg(short, long)]
    pub inputs: Option<PathBuf>,

    /// Project name or type
    #[arg(long)]
    pub project_type: Option<String>,

    /// Industry
    #[arg(long)]
    pub industry: Option<String>,

    /// Project objectives
    #[arg(long)]
    pub objectives: Option<String>,

    /// Team members, one per line with roles
    #[arg(long)]
    pub team: Option<String>,

    /// Project requirements, one per line
    #[arg(long)]
    pub requirements: Option<String>,
}

impl InputArgs {
    /// Defaults, then the `--inputs` file, then individual flags
    pub fn resolve(&self) -> Result<PlanInputs> {
        debug!(inputs = ?self.inputs, "InputArgs::resolve: called");
        let mut resolved = match &self.inputs {
            Some(path) => PlanInputs::load(path)?,
            None => PlanInputs::default(),
        };

        let overrides = [
            (&self.project_type, &mut resolved.project_type),
            (&self.industry, &mut resolved.industry),
            (&self.objectives, &mut resolved.project_objectives),
            (&self.team, &mut resolved.team_members),
            (&self.requirements, &mut resolved.project_requirements),
        ];
        for (flag, field) in overrides {
            if let Some(value) = flag {
                *field = value.clone();
            }
        }

        Ok(resolved)
    }
}

/// Output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    let path = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("projectplanner")
        .join("logs")
        .join("projectplanner.log");
    debug!(?path, "get_log_path: returning path");
    path
}
