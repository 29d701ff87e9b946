//! pp - project planner CLI
//!
//! Collects planning inputs, runs the planning crew and prints the plan.

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use colored::*;
use eyre::{Context, Result, eyre};
use serde_json::json;
use tracing::{debug, info};

use projectplanner::cli::{Cli, Command, InputArgs, OutputFormat, get_log_path};
use projectplanner::config::Config;
use projectplanner::cost::{estimate_cost, format_cost};
use projectplanner::crew::Crew;
use projectplanner::llm::create_client;
use projectplanner::pipeline::UsageMetrics;
use projectplanner::planner::{PlanOutcome, ProjectPlanner};
use projectplanner::prompts::PromptLoader;
use projectplanner::schema::{PROJECT_PLAN_SCHEMA, SchemaRegistry};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!("projectplanner loaded config: provider={} model={}", config.llm.provider, config.llm.model);

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Plan { inputs, format } => cmd_plan(&config, &inputs, format).await,
        Command::Roles => cmd_roles(&config),
        Command::Stages => cmd_stages(&config),
        Command::Check { inputs } => cmd_check(&config, &inputs),
        Command::Cost {
            prompt_tokens,
            completion_tokens,
            rate,
        } => cmd_cost(&config, prompt_tokens, completion_tokens, rate),
    }
}

fn load_crew(config: &Config) -> Result<Crew> {
    Crew::load_or_builtin(config.crew.path.as_deref(), &SchemaRegistry::builtin()).context("Failed to load crew")
}

/// Run the crew and print the plan
async fn cmd_plan(config: &Config, args: &InputArgs, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_plan: called");
    config.validate()?;
    let inputs = args.resolve()?;
    let llm = create_client(&config.llm)?;
    let planner = ProjectPlanner::from_config(config, llm)?;

    if format == OutputFormat::Text {
        println!("Generating project plan for {}...", inputs.project_type.cyan());
    }

    let cancel = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let outcome = match planner.plan_until(&inputs, cancel).await {
        Ok(outcome) => outcome,
        Err(failure) => {
            eprintln!("{} {}", "✗".red(), failure);
            if let Some(wait) = failure.retry_after() {
                eprintln!("  Rate limited; retry in {}s", wait.as_secs());
            }
            print_usage(&failure.usage, config.pricing.rate_per_million)?;
            return Err(eyre!(failure));
        }
    };

    match format {
        OutputFormat::Text => print_plan(&outcome, config.pricing.rate_per_million),
        OutputFormat::Json => {
            let cost = outcome.cost(config.pricing.rate_per_million)?;
            let doc = json!({
                "run_id": outcome.run_id.to_string(),
                "plan": outcome.plan,
                "usage": outcome.usage,
                "estimated_cost": cost,
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
            Ok(())
        }
    }
}

fn print_plan(outcome: &PlanOutcome, rate: f64) -> Result<()> {
    println!("{} Project plan generated successfully", "✓".green());

    println!();
    println!("{}", "Tasks and Estimates".bold());
    for task in &outcome.plan.tasks {
        println!(
            "  {} {} {}",
            task.task_name.yellow(),
            format!("{}h", task.estimated_time_hours).cyan(),
            task.required_resources.join(", ").dimmed()
        );
    }
    println!("  {} {}h", "Total:".bold(), outcome.plan.total_hours());

    println!();
    println!("{}", "Project Milestones".bold());
    for milestone in &outcome.plan.milestones {
        println!("  {}", milestone.milestone_name.yellow());
        for task in &milestone.tasks {
            println!("    - {}", task);
        }
    }

    println!();
    print_usage(&outcome.usage, rate)
}

fn print_usage(usage: &UsageMetrics, rate: f64) -> Result<()> {
    let cost = estimate_cost(usage, rate)?;
    println!("{}", "Usage Metrics".bold());
    println!("  Prompt tokens:       {}", usage.prompt_tokens);
    println!("  Completion tokens:   {}", usage.completion_tokens);
    println!("  Total tokens:        {}", usage.total_tokens());
    println!("  Successful requests: {}", usage.successful_requests);
    println!("  Estimated cost:      {}", format_cost(cost).green());
    Ok(())
}

/// List the crew's roles
fn cmd_roles(config: &Config) -> Result<()> {
    debug!("cmd_roles: called");
    let crew = load_crew(config)?;
    let counts = crew.stage_counts();
    for (key, role) in crew.roles().iter() {
        println!("{} {}", key.cyan(), role.role.bold());
        println!("  goal:      {}", role.goal);
        println!("  backstory: {}", role.backstory.dimmed());
        println!("  stages:    {}", counts.get(key).copied().unwrap_or(0));
    }
    Ok(())
}

/// List the crew's stages in order
fn cmd_stages(config: &Config) -> Result<()> {
    debug!("cmd_stages: called");
    let crew = load_crew(config)?;
    for (i, stage) in crew.stages().iter().enumerate() {
        println!(
            "{}. {} {}",
            i + 1,
            stage.name().cyan(),
            format!("({})", stage.definition.agent).dimmed()
        );
        println!("  expected:  {}", stage.definition.expected_output);
        let vars = stage.placeholders();
        if !vars.is_empty() {
            println!("  variables: {}", vars.join(", "));
        }
        if let Some(schema) = &stage.definition.output_schema {
            println!("  schema:    {}", schema.yellow());
        }
    }
    Ok(())
}

/// Validate everything a plan run needs, without calling a model
fn cmd_check(config: &Config, args: &InputArgs) -> Result<()> {
    debug!("cmd_check: called");
    let crew = load_crew(config)?;
    println!(
        "{} Crew: {} roles, {} stages",
        "✓".green(),
        crew.roles().len(),
        crew.stages().len()
    );

    crew.require_final_schema(PROJECT_PLAN_SCHEMA)?;
    println!("{} Final stage produces {}", "✓".green(), PROJECT_PLAN_SCHEMA);

    PromptLoader::new(config.prompts.dir.as_deref()).context("Failed to load prompts")?;
    println!("{} Prompt templates compile", "✓".green());

    estimate_cost(&UsageMetrics::default(), config.pricing.rate_per_million)?;
    println!(
        "{} Pricing: {} per million tokens",
        "✓".green(),
        format_cost(config.pricing.rate_per_million)
    );

    let vars = args.resolve()?.to_variables();
    let missing: Vec<String> = crew
        .required_variables()
        .into_iter()
        .filter(|name| !vars.contains_key(name))
        .collect();
    if !missing.is_empty() {
        return Err(eyre!("Inputs are missing variable(s): {}", missing.join(", ")));
    }
    println!("{} Inputs cover every stage variable", "✓".green());

    match config.validate() {
        Ok(()) => println!("{} API key found in {}", "✓".green(), config.llm.api_key_env),
        Err(_) => println!("{} API key not set ({})", "!".yellow(), config.llm.api_key_env),
    }
    Ok(())
}

/// Price a token count
fn cmd_cost(config: &Config, prompt_tokens: u64, completion_tokens: u64, rate: Option<f64>) -> Result<()> {
    debug!(prompt_tokens, completion_tokens, ?rate, "cmd_cost: called");
    let rate = rate.unwrap_or(config.pricing.rate_per_million);
    let usage = UsageMetrics {
        prompt_tokens,
        completion_tokens,
        successful_requests: 0,
    };
    let cost = estimate_cost(&usage, rate)?;
    println!("Estimated cost: {}", format_cost(cost));
    Ok(())
}
