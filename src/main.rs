//! Option trader - main entry point
//!
//! This binary provides two subcommands:
//! - run: Run the order execution engine (paper mode built in)
//! - settle: Run a one-shot exercise/assignment settlement pass

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "option-trader")]
#[command(about = "Automated order execution and position reconciliation for stocks and options", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the order execution engine
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/engine.json")]
        config: String,

        /// Paper trading mode (safe, simulated fills)
        #[arg(long)]
        paper: bool,

        /// Live trading mode (requires a live gateway adapter)
        #[arg(long)]
        live: bool,
    },

    /// Run a one-shot exercise/assignment settlement pass
    Settle {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/engine.json")]
        config: String,

        /// Settlement date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str) -> Result<()> {
    // Create logs directory
    std::fs::create_dir_all("logs")?;

    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Set log level - filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true);

    // File layer - same format but without ANSI colors
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_appender)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Logging initialized");
    info!("Log file: {}", log_path.display());

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Run { .. } => "run",
        Commands::Settle { .. } => "settle",
    };

    setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Run {
            config,
            paper,
            live,
        } => commands::run::run(config, paper, live),

        Commands::Settle { config, date } => commands::settle::run(config, date),
    }
}
