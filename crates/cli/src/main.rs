//! PagePilot CLI, the main entry point.
//!
//! Commands:
//! - `run`     Plan, execute, evaluate and summarize a browser task
//! - `plan`    Print the plan for a task without running it
//! - `config`  Show, validate or locate the configuration
//! - `doctor`  Diagnose configuration and provider health

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "pagepilot",
    about = "PagePilot: plan, execute, evaluate and summarize browser tasks",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "PAGEPILOT_LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task through the full workflow
    Run(commands::run::RunArgs),

    /// Plan a task and print the plan
    Plan {
        /// What to do, in plain language
        query: String,

        /// URL of the page the task starts on
        #[arg(short, long)]
        url: Option<String>,

        /// Print the planning result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Diagnose configuration and provider health
    Doctor,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Load and validate the configuration
    Validate,
    /// Print the config file path
    Path,
    /// Print the default configuration
    Default,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::Plan { query, url, json } => commands::plan::run(query, url, json).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show().await?,
            ConfigAction::Validate => commands::config_cmd::validate().await?,
            ConfigAction::Path => commands::config_cmd::path().await?,
            ConfigAction::Default => commands::config_cmd::default().await?,
        },
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
