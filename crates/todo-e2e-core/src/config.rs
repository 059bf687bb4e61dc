use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cleanup::{CleanupPolicy, DEFAULT_MAX_CONCURRENCY};
use crate::error::HarnessError;
use crate::scenario::RunnerSettings;
use crate::tag::{MatchMode, TagStyle, Tagger};
use crate::wait::{MAX_BACKOFF, PollBudget, WaitStrategy};

pub const CONFIG_FILE_NAME: &str = "todo-e2e.toml";
pub const BASE_URL_ENV: &str = "TODO_E2E_BASE_URL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default = "default_workers")]
    pub workers: Vec<String>,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub wait: WaitConfig,
    #[serde(default)]
    pub tag: TagConfig,
    #[serde(default = "default_expected_title")]
    pub expected_title: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            workers: default_workers(),
            cleanup: CleanupConfig::default(),
            wait: WaitConfig::default(),
            tag: TagConfig::default(),
            expected_title: default_expected_title(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_home_path")]
    pub home_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            home_path: default_home_path(),
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default)]
    pub policy: CleanupPolicy,
    #[serde(default = "default_settle_before_ms")]
    pub settle_before_ms: u64,
    #[serde(default = "default_settle_after_ms")]
    pub settle_after_ms: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            policy: CleanupPolicy::default(),
            settle_before_ms: default_settle_before_ms(),
            settle_after_ms: default_settle_after_ms(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WaitKind {
    #[default]
    Poll,
    Fixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitConfig {
    #[serde(default)]
    pub strategy: WaitKind,
    #[serde(default = "default_fixed_delay_ms")]
    pub fixed_delay_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default = "default_backoff")]
    pub backoff: f64,
    #[serde(default = "default_wait_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            strategy: WaitKind::default(),
            fixed_delay_ms: default_fixed_delay_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            backoff: default_backoff(),
            timeout_ms: default_wait_timeout_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl WaitConfig {
    #[must_use]
    pub const fn to_strategy(&self) -> WaitStrategy {
        match self.strategy {
            WaitKind::Fixed => WaitStrategy::Fixed(Duration::from_millis(self.fixed_delay_ms)),
            WaitKind::Poll => WaitStrategy::Poll(PollBudget {
                interval: Duration::from_millis(self.poll_interval_ms),
                max_interval: Duration::from_millis(self.max_interval_ms),
                backoff: self.backoff,
                timeout: Duration::from_millis(self.timeout_ms),
                max_attempts: self.max_attempts,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagConfig {
    #[serde(default)]
    pub style: TagStyle,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub match_mode: MatchMode,
}

impl Default for TagConfig {
    fn default() -> Self {
        Self {
            style: TagStyle::default(),
            prefix: default_prefix(),
            match_mode: MatchMode::default(),
        }
    }
}

impl HarnessConfig {
    /// # Errors
    ///
    /// Returns an error describing the first inconsistent setting.
    pub fn validate(&self) -> Result<()> {
        if self.workers.is_empty() {
            bail!("workers must not be empty");
        }
        let mut seen = BTreeSet::new();
        for worker in &self.workers {
            if worker.trim().is_empty() {
                bail!("worker names must not be blank");
            }
            if !seen.insert(worker.as_str()) {
                bail!("duplicate worker {worker:?}: workers would share a cleanup scope");
            }
        }
        if self.tag.style == TagStyle::Legacy && self.tag.match_mode == MatchMode::Exact {
            bail!("tag.match_mode = \"exact\" needs tag.style = \"structured\"");
        }
        if self.cleanup.max_concurrency == 0 {
            bail!("cleanup.max_concurrency must be > 0");
        }
        if self.wait.strategy == WaitKind::Poll {
            if self.wait.poll_interval_ms == 0 {
                bail!("wait.poll_interval_ms must be > 0");
            }
            if !(1.0..=MAX_BACKOFF).contains(&self.wait.backoff) {
                bail!("wait.backoff must be within 1.0..={MAX_BACKOFF}");
            }
            if self.wait.max_attempts == 0 {
                bail!("wait.max_attempts must be > 0");
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            home_path: self.server.home_path.clone(),
            policy: self.cleanup.policy,
            match_mode: self.tag.match_mode,
            settle_before: Duration::from_millis(self.cleanup.settle_before_ms),
            settle_after: Duration::from_millis(self.cleanup.settle_after_ms),
            cleanup_concurrency: self.cleanup.max_concurrency,
            wait: self.wait.to_strategy(),
            tagger: Tagger::new(self.tag.style, self.tag.prefix.clone()),
            expected_title: self.expected_title.clone(),
        }
    }

    fn apply_env(mut self) -> Self {
        match env::var(BASE_URL_ENV) {
            Ok(base_url) if !base_url.trim().is_empty() => self.server.base_url = base_url,
            _ => {}
        }
        self
    }
}

/// Parse and validate one config file.
///
/// # Errors
///
/// Returns an error when the file cannot be read, is not valid TOML for
/// [`HarnessConfig`], or fails [`HarnessConfig::validate`].
pub fn load_config_file(path: &Path) -> Result<HarnessConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let config = toml::from_str::<HarnessConfig>(&content)
        .map_err(|err| HarnessError::Config(err.to_string()))
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config {}", path.display()))?;
    Ok(config)
}

/// Candidate config locations in lookup order.
#[must_use]
pub fn config_candidates(explicit: Option<&Path>, cwd: &Path) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.to_path_buf()];
    }
    let mut candidates = vec![cwd.join(CONFIG_FILE_NAME)];
    if let Some(config_dir) = dirs::config_dir() {
        candidates.push(config_dir.join("todo-e2e/config.toml"));
    }
    candidates
}

/// Resolve the effective config: an explicit path must exist; otherwise the
/// first existing candidate wins, falling back to defaults. The base URL
/// environment override applies last.
///
/// # Errors
///
/// Returns an error when an explicit path is missing or any chosen file
/// fails to load.
pub fn load_config(explicit: Option<&Path>, cwd: &Path) -> Result<HarnessConfig> {
    if let Some(path) = explicit.filter(|path| !path.exists()) {
        bail!("config file {} does not exist", path.display());
    }

    let config = match config_candidates(explicit, cwd)
        .into_iter()
        .find(|candidate| candidate.exists())
    {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading config");
            load_config_file(&path)?
        }
        None => HarnessConfig::default(),
    };

    Ok(config.apply_env())
}

fn default_workers() -> Vec<String> {
    ["chromium", "firefox", "webkit"].map(String::from).to_vec()
}

fn default_expected_title() -> String {
    "TODO 📃".to_string()
}

fn default_base_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

const fn default_timeout_ms() -> u64 {
    5_000
}

fn default_home_path() -> String {
    "/".to_string()
}

const fn default_settle_before_ms() -> u64 {
    500
}

const fn default_settle_after_ms() -> u64 {
    300
}

const fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

const fn default_fixed_delay_ms() -> u64 {
    500
}

const fn default_poll_interval_ms() -> u64 {
    50
}

const fn default_max_interval_ms() -> u64 {
    400
}

const fn default_backoff() -> f64 {
    2.0
}

const fn default_wait_timeout_ms() -> u64 {
    5_000
}

const fn default_max_attempts() -> u32 {
    64
}

fn default_prefix() -> String {
    "TODO for".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use tempfile::TempDir;

    #[test]
    fn empty_file_yields_defaults() {
        let config: HarnessConfig = toml::from_str("").expect("parse");
        assert_eq!(config, HarnessConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.workers, vec!["chromium", "firefox", "webkit"]);
        assert_eq!(config.cleanup.policy, CleanupPolicy::Scoped);
    }

    #[test]
    fn parses_every_section() {
        let config: HarnessConfig = toml::from_str(
            r#"
            workers = ["chromium"]
            expected_title = "My TODOs"

            [server]
            base_url = "http://localhost:8080"

            [cleanup]
            policy = "delete-all"
            settle_before_ms = 0

            [wait]
            strategy = "fixed"
            fixed_delay_ms = 100

            [tag]
            style = "legacy"
            match_mode = "contains"
            "#,
        )
        .expect("parse");

        assert!(config.validate().is_ok());
        assert_eq!(config.cleanup.policy, CleanupPolicy::DeleteAll);
        assert_eq!(config.server.timeout_ms, 5_000);

        let settings = config.runner_settings();
        assert_eq!(settings.wait, WaitStrategy::Fixed(Duration::from_millis(100)));
        assert_eq!(settings.settle_before, Duration::ZERO);
        assert_eq!(settings.settle_after, Duration::from_millis(300));
        assert_eq!(settings.tagger.style(), TagStyle::Legacy);
        assert_eq!(settings.expected_title, "My TODOs");
    }

    #[test]
    fn rejects_duplicate_workers() {
        let config = HarnessConfig {
            workers: vec!["chromium".into(), "chromium".into()],
            ..HarnessConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_exact_matching_of_legacy_tags() {
        let config = HarnessConfig {
            tag: TagConfig {
                style: TagStyle::Legacy,
                ..TagConfig::default()
            },
            ..HarnessConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_degenerate_poll_budget() {
        let mut config = HarnessConfig::default();
        config.wait.backoff = 0.5;
        assert!(config.validate().is_err());

        let mut config = HarnessConfig::default();
        config.wait.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_backoff_that_cannot_be_scheduled() {
        for backoff in [f64::INFINITY, f64::NAN, MAX_BACKOFF * 2.0] {
            let mut config = HarnessConfig::default();
            config.wait.backoff = backoff;
            assert!(config.validate().is_err(), "backoff {backoff} accepted");
        }

        let mut config = HarnessConfig::default();
        config.wait.backoff = MAX_BACKOFF;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cleanup_concurrency_flows_into_settings() {
        let config: HarnessConfig =
            toml::from_str("[cleanup]\nmax_concurrency = 2\n").expect("parse");
        assert_eq!(config.runner_settings().cleanup_concurrency, 2);

        let mut config = HarnessConfig::default();
        config.cleanup.max_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_prefers_explicit_path() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "workers = [\"solo\"]\n[cleanup]\npolicy = \"delete-all\"\n")
            .expect("write");

        let config = load_config(Some(&path), dir.path()).expect("load");
        assert_eq!(config.workers, vec!["solo"]);
        assert_eq!(config.cleanup.policy, CleanupPolicy::DeleteAll);
    }

    #[test]
    fn load_reads_config_from_working_directory() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "expected_title = \"Hi\"\n")
            .expect("write");

        let config = load_config(None, dir.path()).expect("load");
        assert_eq!(config.expected_title, "Hi");
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let dir = TempDir::new().expect("tempdir");
        assert!(load_config(Some(&dir.path().join("nope.toml")), dir.path()).is_err());
    }

    #[test]
    fn invalid_file_is_reported_with_path() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "workers = []\n").expect("write");
        let err = load_config_file(&path).expect_err("empty workers");
        assert!(format!("{err:#}").contains("bad.toml"));
    }

    #[test]
    fn malformed_toml_carries_parse_error_code() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "workers = [\"chromium\"\n[cleanup\n").expect("write");

        let err = load_config_file(&path).expect_err("malformed");
        let code = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<HarnessError>())
            .map(HarnessError::code);
        assert_eq!(code, Some(ErrorCode::ConfigParseError));
        assert!(format!("{err:#}").contains("Failed to parse"));
    }
}
