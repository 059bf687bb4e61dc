#![forbid(unsafe_code)]

mod cmd;
mod output;

use std::env;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use output::{CliError, OutputMode, render_error, resolve_output_mode};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "todo-e2e: isolated end-to-end suites against a shared TODO service",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ./todo-e2e.toml, then the user config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format.
    #[arg(long, global = true, value_enum)]
    format: Option<OutputMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Run the scenario suite against a live service",
        long_about = "Run every scenario on every configured worker in parallel against the\n\
                      live TODO service. Exits with status 1 when any scenario fails.",
        after_help = "EXAMPLES:\n    # Run with the configured workers\n    todo-e2e run\n\n    \
                      # Two workers, one scenario, machine-readable output\n    \
                      todo-e2e run --workers chromium,firefox --scenario single-add --format json"
    )]
    Run(cmd::run::RunArgs),

    #[command(
        about = "Delete one scope's items from the live service",
        long_about = "Run a single cleanup pass. Scoped by default; --all deletes every\n\
                      item and is only safe when no other worker is running.",
        after_help = "EXAMPLES:\n    # Remove leftovers of one test on one worker\n    \
                      todo-e2e cleanup --worker chromium --test \"can add multiple TODOs\"\n\n    \
                      # Wipe the collection\n    todo-e2e cleanup --all"
    )]
    Cleanup(cmd::cleanup::CleanupArgs),

    #[command(
        about = "Print a fresh label for a scope",
        after_help = "EXAMPLES:\n    todo-e2e label --worker webkit --test \"can remove a TODO item\"\n\n    \
                      # Reproducible nonce\n    todo-e2e label --worker webkit --test t --seed 7 --format json"
    )]
    Label(cmd::label::LabelArgs),

    /// Deterministic simulation of the isolation protocol.
    Sim(cmd::sim::SimArgs),
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("TODO_E2E_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "todo_e2e=debug,info"
        } else {
            "todo_e2e=info,warn"
        })
    });

    let format = env::var("TODO_E2E_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cwd = env::current_dir()?;
    let output = resolve_output_mode(cli.format);
    let config = cli.config.as_deref();
    debug!(?output, ?config, "starting");

    let command_result = match &cli.command {
        Commands::Run(args) => cmd::run::run_run(args, config, output, &cwd),
        Commands::Cleanup(args) => cmd::cleanup::run_cleanup(args, config, output, &cwd),
        Commands::Label(args) => cmd::label::run_label(args, config, output, &cwd),
        Commands::Sim(args) => cmd::sim::run_sim(args, output),
    };

    if let Err(err) = command_result {
        render_error(output, &CliError::from_anyhow(&err))?;
        std::process::exit(1);
    }
    Ok(())
}
