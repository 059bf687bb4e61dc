#![forbid(unsafe_code)]

use anyhow::Result;
use todo_e2e_sim::{CampaignConfig, run_campaign};

fn main() -> Result<()> {
    let config = CampaignConfig {
        seed_range: 0..32,
        ..CampaignConfig::default()
    };
    let report = run_campaign(&config)?;

    println!(
        "simulation complete: seeds_run={} seeds_passed={} contended={} first_failure={:?}",
        report.seeds_run, report.seeds_passed, report.contended_seeds, report.first_failure
    );
    for failure in &report.failures {
        for violation in &failure.violations {
            println!("  seed {}: {violation}", failure.seed);
        }
    }

    if !report.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}
