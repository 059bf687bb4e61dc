//! `todo-e2e run`: execute the scenario suite against a live service.

use std::io::Write;
use std::path::Path;
use std::process;

use anyhow::Result;
use clap::{Args, ValueEnum};
use serde::Serialize;
use todo_e2e_core::{
    HttpWorkerFactory, Scenario, ScenarioOutcome, ScenarioStatus, SuiteReport, load_config, run_suite,
};
use tracing::info;

use crate::output::{OutputMode, pretty_kv, pretty_section, print_json};

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Service base URL (overrides config and TODO_E2E_BASE_URL).
    #[arg(long)]
    pub base_url: Option<String>,

    /// Worker identities, comma-separated (overrides config).
    #[arg(long, value_delimiter = ',')]
    pub workers: Vec<String>,

    /// Run only these scenarios (repeatable). Default: all.
    #[arg(long = "scenario", value_enum)]
    pub scenarios: Vec<ScenarioArg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScenarioArg {
    EmptyState,
    SingleAdd,
    MultipleAdd,
    Remove,
    PageTitle,
}

impl From<ScenarioArg> for Scenario {
    fn from(arg: ScenarioArg) -> Self {
        match arg {
            ScenarioArg::EmptyState => Self::EmptyState,
            ScenarioArg::SingleAdd => Self::SingleAdd,
            ScenarioArg::MultipleAdd => Self::MultipleAdd,
            ScenarioArg::Remove => Self::Remove,
            ScenarioArg::PageTitle => Self::PageTitle,
        }
    }
}

#[derive(Debug, Serialize)]
struct RunOutput<'a> {
    base_url: &'a str,
    workers: &'a [String],
    passed: usize,
    failed: usize,
    all_passed: bool,
    #[serde(flatten)]
    report: &'a SuiteReport,
}

pub fn run_run(args: &RunArgs, config_path: Option<&Path>, output: OutputMode, cwd: &Path) -> Result<()> {
    let mut config = load_config(config_path, cwd)?;
    if let Some(base_url) = &args.base_url {
        config.server.base_url.clone_from(base_url);
    }
    if !args.workers.is_empty() {
        config.workers.clone_from(&args.workers);
    }
    config.validate()?;

    let scenarios: Vec<Scenario> = if args.scenarios.is_empty() {
        Scenario::ALL.to_vec()
    } else {
        args.scenarios.iter().copied().map(Scenario::from).collect()
    };

    info!(base_url = %config.server.base_url, "running suite");
    let factory = HttpWorkerFactory::new(&config.server.base_url, config.server.timeout());
    let report = run_suite(&factory, &config.workers, &scenarios, &config.runner_settings());

    let out = RunOutput {
        base_url: &config.server.base_url,
        workers: &config.workers,
        passed: report.passed(),
        failed: report.failed(),
        all_passed: report.all_passed(),
        report: &report,
    };

    match output {
        OutputMode::Json => print_json(&out)?,
        OutputMode::Text => {
            println!(
                "suite base_url={} workers={} passed={} failed={} all_passed={}",
                out.base_url,
                out.workers.len(),
                out.passed,
                out.failed,
                out.all_passed
            );
            for outcome in &report.outcomes {
                println!("{}", text_line(outcome));
            }
            for worker in &report.panicked_workers {
                println!("panicked worker={worker}");
            }
        }
        OutputMode::Pretty => {
            let stdout = std::io::stdout();
            let mut w = stdout.lock();
            pretty_section(&mut w, "Suite")?;
            pretty_kv(&mut w, "Service", out.base_url)?;
            pretty_kv(&mut w, "Workers", out.workers.join(", "))?;
            pretty_kv(
                &mut w,
                "Results",
                format!("{} passed / {} failed", out.passed, out.failed),
            )?;
            writeln!(w)?;
            pretty_section(&mut w, "Scenarios")?;
            for outcome in &report.outcomes {
                let mark = if outcome.passed() { "ok  " } else { "FAIL" };
                writeln!(w, "{mark} {:<10} {}", outcome.worker, outcome.scenario.title())?;
                if let ScenarioStatus::Failed { code, message, .. } = &outcome.status {
                    writeln!(w, "       [{code}] {message}")?;
                }
            }
            for worker in &report.panicked_workers {
                writeln!(w, "PANIC {worker}")?;
            }
        }
    }

    if !report.all_passed() {
        process::exit(1);
    }
    Ok(())
}

fn text_line(outcome: &ScenarioOutcome) -> String {
    let base = format!(
        "scenario worker={} name={:?}",
        outcome.worker,
        outcome.scenario.title()
    );
    match &outcome.status {
        ScenarioStatus::Passed => format!("{base} status=passed"),
        ScenarioStatus::Failed {
            code,
            timed_out,
            message,
        } => format!("{base} status=failed code={code} timed_out={timed_out} message={message:?}"),
    }
}
