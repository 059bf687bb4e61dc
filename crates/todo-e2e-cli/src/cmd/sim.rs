//! `todo-e2e sim`: deterministic simulation campaigns.
//!
//! `todo-e2e sim run` executes a campaign across many seeds.
//! `todo-e2e sim replay` replays a single seed with the full trace.

use std::io::Write;
use std::process;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Args, Subcommand, ValueEnum};
use serde::Serialize;
use todo_e2e_core::{CleanupPolicy, MatchMode, TagStyle, Tagger, WaitStrategy};
use todo_e2e_sim::{CampaignConfig, FaultConfig, SeedTrace, replay_seed, run_campaign};

use crate::output::{OutputMode, pretty_kv, pretty_section, print_json};

/// Top-level arguments for `todo-e2e sim`.
#[derive(Args, Debug)]
pub struct SimArgs {
    #[command(subcommand)]
    pub command: SimCommand,
}

#[derive(Subcommand, Debug)]
pub enum SimCommand {
    #[command(
        about = "Run a simulation campaign across multiple seeds",
        long_about = "Run every scenario on every simulated worker against a shared in-memory\n\
                      service with delayed visibility and injected faults. Reports pass/fail\n\
                      per seed and identifies the first failure for replay.",
        after_help = "EXAMPLES:\n    # 100 seeds with defaults\n    todo-e2e sim run --seeds 100\n\n\
                      # Show why delete-all breaks parallel workers\n    todo-e2e sim run --policy delete-all\n\n\
                      # Machine-readable output\n    todo-e2e sim run --seeds 50 --format json"
    )]
    Run(SimRunArgs),

    #[command(
        about = "Replay a single seed with detailed trace output",
        long_about = "Replay one seed to see every scenario outcome, every delete and\n\
                      what was left behind. Use after a campaign failure to debug.",
        after_help = "EXAMPLES:\n    todo-e2e sim replay --seed 42\n\n\
                      # Same parameters as the failing campaign\n    todo-e2e sim replay --seed 42 --policy delete-all --format json"
    )]
    Replay(SimReplayArgs),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    Scoped,
    DeleteAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MatchArg {
    Exact,
    Contains,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WaitArg {
    Poll,
    Fixed,
}

/// Parameters shared by `run` and `replay`; a replay must repeat them to
/// reproduce a campaign seed.
#[derive(Args, Debug, Clone)]
pub struct CampaignArgs {
    /// Simulated workers, comma-separated.
    #[arg(long, value_delimiter = ',', default_value = "chromium,firefox,webkit")]
    pub workers: Vec<String>,

    /// Cleanup policy under test.
    #[arg(long, value_enum, default_value = "scoped")]
    pub policy: PolicyArg,

    /// How scoped cleanup recognises its own items.
    #[arg(long = "match", value_enum, default_value = "exact")]
    pub match_mode: MatchArg,

    /// Create labels without the structured key.
    #[arg(long)]
    pub legacy_tags: bool,

    /// Upper bound on write-to-visibility lag.
    #[arg(long, default_value = "250")]
    pub max_lag_ms: u32,

    /// Percent of reads returned in reverse order.
    #[arg(long, default_value = "10")]
    pub reorder: u8,

    /// Percent of deletes rejected by the service.
    #[arg(long, default_value = "0")]
    pub delete_failures: u8,

    /// Percent of reads and creates refused as unavailable.
    #[arg(long, default_value = "0")]
    pub unavailable: u8,

    /// Convergence strategy.
    #[arg(long, value_enum, default_value = "poll")]
    pub wait: WaitArg,

    /// Delay used by `--wait fixed`.
    #[arg(long, default_value = "500")]
    pub fixed_delay_ms: u64,
}

#[derive(Args, Debug)]
pub struct SimRunArgs {
    /// Number of seeds to run.
    #[arg(long, default_value = "100")]
    pub seeds: u64,

    /// Starting seed value.
    #[arg(long, default_value = "0")]
    pub seed_start: u64,

    #[command(flatten)]
    pub campaign: CampaignArgs,
}

#[derive(Args, Debug)]
pub struct SimReplayArgs {
    /// Seed to replay.
    #[arg(long)]
    pub seed: u64,

    #[command(flatten)]
    pub campaign: CampaignArgs,
}

/// JSON output for `todo-e2e sim run`.
#[derive(Debug, Serialize)]
struct RunOutput {
    seeds_run: usize,
    seeds_passed: usize,
    seeds_failed: usize,
    contended_seeds: usize,
    first_failure: Option<u64>,
    all_passed: bool,
    failures: Vec<FailureOutput>,
}

#[derive(Debug, Serialize)]
struct FailureOutput {
    seed: u64,
    violations: Vec<String>,
}

/// JSON output for `todo-e2e sim replay`.
#[derive(Debug, Serialize)]
struct ReplayOutput<'a> {
    passed: bool,
    contended: bool,
    problems: Vec<String>,
    trace: &'a SeedTrace,
}

fn build_campaign_config(seed_start: u64, seeds: u64, args: &CampaignArgs) -> Result<CampaignConfig> {
    if args.legacy_tags && args.match_mode == MatchArg::Exact {
        bail!("--match exact needs structured tags; drop --legacy-tags or use --match contains");
    }

    let mut config = CampaignConfig {
        seed_range: seed_start..seed_start.saturating_add(seeds),
        workers: args.workers.clone(),
        fault: FaultConfig {
            max_visibility_lag_ms: args.max_lag_ms,
            reorder_rate_percent: args.reorder,
            delete_failure_percent: args.delete_failures,
            unavailable_rate_percent: args.unavailable,
        },
        ..CampaignConfig::default()
    };

    let settings = &mut config.settings;
    settings.policy = match args.policy {
        PolicyArg::Scoped => CleanupPolicy::Scoped,
        PolicyArg::DeleteAll => CleanupPolicy::DeleteAll,
    };
    settings.match_mode = match args.match_mode {
        MatchArg::Exact => MatchMode::Exact,
        MatchArg::Contains => MatchMode::Contains,
    };
    if args.legacy_tags {
        settings.tagger = Tagger::new(TagStyle::Legacy, "TODO for");
    }
    if args.wait == WaitArg::Fixed {
        settings.wait = WaitStrategy::Fixed(Duration::from_millis(args.fixed_delay_ms));
    }

    Ok(config)
}

fn replay_hint(seed: u64, args: &CampaignArgs) -> String {
    let mut hint = format!("todo-e2e sim replay --seed {seed} --workers {}", args.workers.join(","));
    if args.policy == PolicyArg::DeleteAll {
        hint.push_str(" --policy delete-all");
    }
    if args.match_mode == MatchArg::Contains {
        hint.push_str(" --match contains");
    }
    if args.legacy_tags {
        hint.push_str(" --legacy-tags");
    }
    if args.wait == WaitArg::Fixed {
        hint.push_str(&format!(" --wait fixed --fixed-delay-ms {}", args.fixed_delay_ms));
    }
    let defaults = FaultConfig::default();
    if args.max_lag_ms != defaults.max_visibility_lag_ms {
        hint.push_str(&format!(" --max-lag-ms {}", args.max_lag_ms));
    }
    if args.reorder != defaults.reorder_rate_percent {
        hint.push_str(&format!(" --reorder {}", args.reorder));
    }
    if args.delete_failures > 0 {
        hint.push_str(&format!(" --delete-failures {}", args.delete_failures));
    }
    if args.unavailable > 0 {
        hint.push_str(&format!(" --unavailable {}", args.unavailable));
    }
    hint
}

pub fn run_sim(args: &SimArgs, output: OutputMode) -> Result<()> {
    match &args.command {
        SimCommand::Run(run) => run_sim_run(run, output),
        SimCommand::Replay(replay) => run_sim_replay(replay, output),
    }
}

fn run_sim_run(args: &SimRunArgs, output: OutputMode) -> Result<()> {
    let config = build_campaign_config(args.seed_start, args.seeds, &args.campaign)?;
    let report = run_campaign(&config)?;

    let out = RunOutput {
        seeds_run: report.seeds_run,
        seeds_passed: report.seeds_passed,
        seeds_failed: report.failures.len(),
        contended_seeds: report.contended_seeds,
        first_failure: report.first_failure,
        all_passed: report.all_passed(),
        failures: report
            .failures
            .iter()
            .map(|f| FailureOutput {
                seed: f.seed,
                violations: f.violations.clone(),
            })
            .collect(),
    };

    match output {
        OutputMode::Json => print_json(&out)?,
        OutputMode::Text => {
            println!(
                "campaign seeds_run={} workers={} lag_ms={}",
                out.seeds_run,
                config.workers.len(),
                config.fault.max_visibility_lag_ms
            );
            println!(
                "results passed={} failed={} contended={} all_passed={}",
                out.seeds_passed, out.seeds_failed, out.contended_seeds, out.all_passed
            );
            if !out.all_passed {
                for failure in out.failures.iter().take(5) {
                    println!(
                        "failure seed={} violations={}",
                        failure.seed,
                        failure.violations.len()
                    );
                }
                if out.failures.len() > 5 {
                    println!("failures_truncated count={}", out.failures.len() - 5);
                }
                println!("hint {}", replay_hint(out.first_failure.unwrap_or(0), &args.campaign));
            }
        }
        OutputMode::Pretty => {
            let stdout = std::io::stdout();
            let mut w = stdout.lock();
            pretty_section(&mut w, "Simulation Campaign")?;
            pretty_kv(&mut w, "Seeds", out.seeds_run.to_string())?;
            pretty_kv(&mut w, "Workers", config.workers.join(", "))?;
            pretty_kv(&mut w, "Policy", format!("{:?}", config.settings.policy))?;
            pretty_kv(&mut w, "Max lag", format!("{}ms", config.fault.max_visibility_lag_ms))?;
            pretty_kv(
                &mut w,
                "Results",
                format!(
                    "{} passed / {} failed ({} contended)",
                    out.seeds_passed, out.seeds_failed, out.contended_seeds
                ),
            )?;

            if out.all_passed {
                pretty_kv(&mut w, "Status", "all seeds passed")?;
            } else {
                pretty_kv(
                    &mut w,
                    "Status",
                    format!(
                        "{} failures (first at seed {})",
                        out.seeds_failed,
                        out.first_failure.unwrap_or(0)
                    ),
                )?;
                writeln!(w)?;
                pretty_section(&mut w, "Failure Samples")?;
                for failure in out.failures.iter().take(5) {
                    writeln!(w, "seed {:<8} violations={}", failure.seed, failure.violations.len())?;
                    for violation in &failure.violations {
                        writeln!(w, "  - {violation}")?;
                    }
                }
                if out.failures.len() > 5 {
                    writeln!(w, "... and {} more failures", out.failures.len() - 5)?;
                }
                writeln!(w)?;
                pretty_kv(
                    &mut w,
                    "Replay",
                    replay_hint(out.first_failure.unwrap_or(0), &args.campaign),
                )?;
            }
        }
    }

    // Exit code 1 on any failure for CI integration
    if !report.all_passed() {
        process::exit(1);
    }
    Ok(())
}

fn run_sim_replay(args: &SimReplayArgs, output: OutputMode) -> Result<()> {
    let config = build_campaign_config(args.seed, 1, &args.campaign)?;
    let trace = replay_seed(args.seed, &config)?;

    let out = ReplayOutput {
        passed: trace.passed(),
        contended: trace.contended(),
        problems: trace.problems(),
        trace: &trace,
    };

    match output {
        OutputMode::Json => print_json(&out)?,
        OutputMode::Text => {
            println!(
                "replay seed={} workers={} elapsed_ms={}",
                trace.seed,
                config.workers.len(),
                trace.elapsed_ms
            );
            println!(
                "result passed={} contended={} deletes={} residue={}",
                out.passed,
                out.contended,
                trace.deletes.len(),
                trace.residue.len()
            );
            for outcome in &trace.outcomes {
                println!(
                    "scenario worker={} name={:?} passed={}",
                    outcome.worker,
                    outcome.scenario.title(),
                    outcome.passed()
                );
            }
            for record in &trace.deletes {
                println!(
                    "delete at_ms={} actor={} creator={} text={:?}",
                    record.at_ms, record.actor, record.creator, record.text
                );
            }
            for problem in &out.problems {
                println!("violation={problem}");
            }
        }
        OutputMode::Pretty => {
            let stdout = std::io::stdout();
            let mut w = stdout.lock();
            pretty_section(&mut w, &format!("Replay Seed {}", trace.seed))?;
            pretty_kv(&mut w, "Workers", config.workers.join(", "))?;
            pretty_kv(&mut w, "Elapsed", format!("{}ms (virtual)", trace.elapsed_ms))?;
            pretty_kv(&mut w, "Deletes", trace.deletes.len().to_string())?;
            pretty_kv(&mut w, "Residue", trace.residue.len().to_string())?;
            pretty_kv(&mut w, "Contended", out.contended.to_string())?;
            pretty_kv(&mut w, "Oracle", out.passed.to_string())?;

            writeln!(w)?;
            pretty_section(&mut w, "Scenarios")?;
            for outcome in &trace.outcomes {
                let mark = if outcome.passed() { "ok  " } else { "FAIL" };
                writeln!(w, "{mark} {:<10} {}", outcome.worker, outcome.scenario.title())?;
            }

            if !out.problems.is_empty() {
                writeln!(w)?;
                pretty_section(&mut w, "Violations")?;
                for problem in &out.problems {
                    writeln!(w, "  - {problem}")?;
                }
            }
        }
    }

    if !out.passed {
        process::exit(1);
    }
    Ok(())
}
