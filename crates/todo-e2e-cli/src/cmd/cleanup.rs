//! `todo-e2e cleanup`: one cleanup pass against the live service.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde::Serialize;
use todo_e2e_core::{
    CleanupPolicy, CleanupReport, HarnessConfig, HttpTodoApi, MatchMode, ScopeFilter, ScopeTag,
    ScopedCleanup, SystemClock, load_config,
};
use tracing::{info, warn};

use crate::output::{OutputMode, pretty_kv, pretty_section, print_json};

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// Worker whose scope is cleaned.
    #[arg(long, required_unless_present = "all")]
    pub worker: Option<String>,

    /// Test name whose scope is cleaned.
    #[arg(long, required_unless_present = "all")]
    pub test: Option<String>,

    /// Delete every item in the collection.
    #[arg(long, conflicts_with_all = ["worker", "test"])]
    pub all: bool,

    /// Service base URL (overrides config and TODO_E2E_BASE_URL).
    #[arg(long)]
    pub base_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct CleanupOutput<'a> {
    base_url: &'a str,
    filter: String,
    #[serde(flatten)]
    report: &'a CleanupReport,
}

/// Only `--all` widens the pass to the whole collection; a named scope is
/// always cleaned scoped, whatever the configured policy.
fn filter_for(args: &CleanupArgs, mode: MatchMode) -> Result<ScopeFilter> {
    if args.all {
        return Ok(ScopeFilter::All);
    }
    let (Some(worker), Some(test)) = (&args.worker, &args.test) else {
        bail!("--worker and --test are required unless --all is given");
    };
    Ok(ScopeFilter::scoped(ScopeTag::new(worker.as_str(), test.as_str()), mode))
}

/// A standalone pass settles for the same delay as the end of a test.
const fn settle_for(config: &HarnessConfig) -> Duration {
    Duration::from_millis(config.cleanup.settle_after_ms)
}

pub fn run_cleanup(
    args: &CleanupArgs,
    config_path: Option<&Path>,
    output: OutputMode,
    cwd: &Path,
) -> Result<()> {
    let mut config = load_config(config_path, cwd)?;
    if let Some(base_url) = &args.base_url {
        config.server.base_url.clone_from(base_url);
    }

    if config.cleanup.policy == CleanupPolicy::DeleteAll && !args.all {
        warn!("cleanup.policy = \"delete-all\" ignored for a named scope; pass --all to wipe the collection");
    }
    let filter = filter_for(args, config.tag.match_mode)?;
    let settle = settle_for(&config);
    let api = HttpTodoApi::new(&config.server.base_url, config.server.timeout());
    let clock = SystemClock::new();

    info!(filter = %filter.describe(), "cleanup");
    let report = ScopedCleanup::new(&api, &clock)
        .with_max_concurrency(config.cleanup.max_concurrency)
        .cleanup(&filter, settle)
        .with_context(|| format!("cleanup against {} failed", config.server.base_url))?;

    let out = CleanupOutput {
        base_url: &config.server.base_url,
        filter: filter.describe(),
        report: &report,
    };

    match output {
        OutputMode::Json => print_json(&out)?,
        OutputMode::Text => {
            println!(
                "cleanup filter={:?} listed={} matched={} deleted={} failed={}",
                out.filter,
                report.listed,
                report.matched,
                report.deleted,
                report.failed.len()
            );
            for failed in &report.failed {
                println!("failed id={} reason={:?}", failed.id.as_str(), failed.reason);
            }
        }
        OutputMode::Pretty => {
            let stdout = std::io::stdout();
            let mut w = stdout.lock();
            pretty_section(&mut w, "Cleanup")?;
            pretty_kv(&mut w, "Service", out.base_url)?;
            pretty_kv(&mut w, "Filter", &out.filter)?;
            pretty_kv(
                &mut w,
                "Items",
                format!(
                    "{} listed, {} matched, {} deleted",
                    report.listed, report.matched, report.deleted
                ),
            )?;
            for failed in &report.failed {
                writeln!(w, "  - {} not deleted: {}", failed.id.as_str(), failed.reason)?;
            }
        }
    }

    if !report.is_complete() {
        bail!("{} deletes failed; residue may remain", report.failed.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(worker: Option<&str>, test: Option<&str>, all: bool) -> CleanupArgs {
        CleanupArgs {
            worker: worker.map(str::to_string),
            test: test.map(str::to_string),
            all,
            base_url: None,
        }
    }

    #[test]
    fn all_flag_selects_everything() {
        let filter = filter_for(&args(None, None, true), MatchMode::Exact).expect("filter");
        assert_eq!(filter, ScopeFilter::All);
    }

    #[test]
    fn scope_uses_configured_match_mode() {
        let filter = filter_for(
            &args(Some("webkit"), Some("can remove a TODO item"), false),
            MatchMode::Contains,
        )
        .expect("filter");
        assert_eq!(
            filter,
            ScopeFilter::scoped(ScopeTag::new("webkit", "can remove a TODO item"), MatchMode::Contains)
        );
    }

    #[test]
    fn named_scope_stays_scoped_under_delete_all_config() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        std::fs::write(
            dir.path().join("todo-e2e.toml"),
            "[cleanup]\npolicy = \"delete-all\"\n",
        )
        .expect("write config");
        let config = load_config(None, dir.path()).expect("config");
        assert_eq!(config.cleanup.policy, CleanupPolicy::DeleteAll);

        let filter = filter_for(&args(Some("chromium"), Some("t"), false), config.tag.match_mode)
            .expect("filter");
        assert_ne!(filter, ScopeFilter::All);
        assert!(filter.matches(&format!("TODO for chromium t n1 {}", key("chromium", "t"))));
        assert!(!filter.matches(&format!("TODO for firefox t n2 {}", key("firefox", "t"))));
    }

    fn key(worker: &str, test: &str) -> String {
        todo_e2e_core::ScopedKey {
            worker: worker.into(),
            test: test.into(),
            nonce: "n".into(),
        }
        .render()
    }

    #[test]
    fn pass_settles_for_configured_after_delay() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        std::fs::write(
            dir.path().join("todo-e2e.toml"),
            "[cleanup]\nsettle_after_ms = 1250\n",
        )
        .expect("write config");
        let config = load_config(None, dir.path()).expect("config");
        assert_eq!(settle_for(&config), Duration::from_millis(1_250));
        assert_eq!(settle_for(&HarnessConfig::default()), Duration::from_millis(300));
    }

    #[test]
    fn missing_scope_is_rejected() {
        assert!(filter_for(&args(Some("webkit"), None, false), MatchMode::Exact).is_err());
    }
}
