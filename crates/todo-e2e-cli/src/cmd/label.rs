//! `todo-e2e label`: print a label the way a test would create it.

use std::path::Path;

use anyhow::Result;
use clap::Args;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use todo_e2e_core::{Label, ScopeTag, ScopedKey, TagStyle, load_config};

use crate::output::{OutputMode, pretty_kv, pretty_section, print_json};

#[derive(Args, Debug)]
pub struct LabelArgs {
    /// Worker identity.
    #[arg(long)]
    pub worker: String,

    /// Test name.
    #[arg(long)]
    pub test: String,

    /// Seed for the nonce; random when omitted.
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Debug, Serialize)]
struct LabelOutput {
    label: String,
    worker: String,
    test: String,
    nonce: String,
    /// Structured key, when the configured style embeds one.
    key: Option<ScopedKey>,
}

fn describe(label: &Label, style: TagStyle) -> LabelOutput {
    let key = match style {
        TagStyle::Structured => ScopedKey::parse(label.as_str()).ok(),
        TagStyle::Legacy => None,
    };
    LabelOutput {
        label: label.as_str().to_string(),
        worker: label.scope().worker.clone(),
        test: label.scope().test.clone(),
        nonce: label.nonce().to_string(),
        key,
    }
}

pub fn run_label(args: &LabelArgs, config_path: Option<&Path>, output: OutputMode, cwd: &Path) -> Result<()> {
    let config = load_config(config_path, cwd)?;
    let tagger = config.runner_settings().tagger;
    let scope = ScopeTag::new(args.worker.as_str(), args.test.as_str());

    let label = match args.seed {
        Some(seed) => tagger.label(&scope, &mut StdRng::seed_from_u64(seed)),
        None => tagger.label(&scope, &mut rand::thread_rng()),
    };
    let out = describe(&label, tagger.style());

    match output {
        OutputMode::Json => print_json(&out)?,
        OutputMode::Text => println!("{}", out.label),
        OutputMode::Pretty => {
            let stdout = std::io::stdout();
            let mut w = stdout.lock();
            pretty_section(&mut w, "Label")?;
            pretty_kv(&mut w, "Text", &out.label)?;
            pretty_kv(&mut w, "Scope", scope.to_string())?;
            pretty_kv(&mut w, "Nonce", &out.nonce)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use todo_e2e_core::Tagger;

    #[test]
    fn structured_label_exposes_key() {
        let scope = ScopeTag::new("webkit", "can remove a TODO item");
        let label = Tagger::default().label(&scope, &mut StdRng::seed_from_u64(7));
        let out = describe(&label, TagStyle::Structured);
        let key = out.key.expect("key");
        assert_eq!(key.worker, "webkit");
        assert_eq!(key.nonce, out.nonce);
        assert!(out.label.starts_with("TODO for webkit can remove a TODO item "));
    }

    #[test]
    fn legacy_label_has_no_key() {
        let scope = ScopeTag::new("firefox", "t");
        let label = Tagger::new(TagStyle::Legacy, "TODO for").label(&scope, &mut StdRng::seed_from_u64(1));
        assert_eq!(describe(&label, TagStyle::Legacy).key, None);
    }
}
