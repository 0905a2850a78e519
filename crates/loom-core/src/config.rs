//! Configuration (`loom.toml`).
//!
//! Load order:
//! 1. explicit path (must exist)
//! 2. `./loom.toml` (if present)
//! 3. built-in defaults
//!
//! then environment overrides (`LOOM_MAX_CONCURRENT`, `LOOM_SIMILARITY_THRESHOLD`,
//! `LOOM_STORE_PATH`, `LOOM_LOG_LEVEL`), then `validate()`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::FailurePolicy;
use crate::error::ConfigError;
use crate::scheduler::RetryPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "loom.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoomConfig {
    pub scheduler: SchedulerConfig,
    pub matcher: MatcherConfig,
    pub optimizer: OptimizerConfig,
    pub embedding: EmbeddingConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker pool size when `process_queue(0)` is called.
    pub max_concurrent: usize,

    /// Attempt budget for tasks that do not set their own.
    pub max_attempts: u32,
    pub failure_policy: FailurePolicy,

    /// Applied to tasks without a per-task timeout.
    pub default_timeout_ms: Option<u64>,

    /// Upper bound on queue depth samples kept per run.
    pub queue_depth_samples: usize,
    pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_attempts: 3,
            failure_policy: FailurePolicy::BestEffort,
            default_timeout_ms: None,
            queue_depth_samples: 1024,
            retry: RetryConfig::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout_ms.map(Duration::from_millis)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            multiplier: self.retry.multiplier,
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 2_000,
            multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub similarity_threshold: f32,
    pub cache_ttl_secs: u64,

    /// Ranking bonus per unit of historical success ratio. 0 disables history bias.
    pub history_weight: f32,
    pub history_min_similarity: f32,
    pub history_limit: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            cache_ttl_secs: 300,
            history_weight: 0.05,
            history_min_similarity: 0.85,
            history_limit: 20,
        }
    }
}

impl MatcherConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub similarity_threshold: f32,
    pub success_rate_threshold: f64,
    pub min_recurrence: usize,
    pub page_size: usize,
    pub max_scan: usize,
    pub max_matches: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.75,
            success_rate_threshold: 0.8,
            min_recurrence: 2,
            page_size: 50,
            max_scan: 500,
            max_matches: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: crate::domain::embedding::DEFAULT_DIMENSIONS,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Memory,
    Jsonl,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,

    /// Required for `jsonl`.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is not set.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl LoomConfig {
    /// File (explicit path, then `./loom.toml`, then defaults) + process environment, validated.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = Self::load_file(path)?;
        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_file(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::read(path);
        }
        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::read(local);
        }
        Ok(Self::default())
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Apply `LOOM_*` overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LOOM_MAX_CONCURRENT") {
            self.scheduler.max_concurrent = parse_env("LOOM_MAX_CONCURRENT", &v)?;
        }
        if let Some(v) = get("LOOM_SIMILARITY_THRESHOLD") {
            self.matcher.similarity_threshold = parse_env("LOOM_SIMILARITY_THRESHOLD", &v)?;
        }
        if let Some(v) = get("LOOM_STORE_PATH") {
            self.store.kind = StoreKind::Jsonl;
            self.store.path = Some(PathBuf::from(v.trim()));
        }
        if let Some(v) = get("LOOM_LOG_LEVEL") {
            self.logging.level = v.trim().to_string();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.scheduler;
        if s.max_concurrent == 0 {
            return Err(invalid("scheduler.max_concurrent must be at least 1"));
        }
        if s.max_attempts == 0 {
            return Err(invalid("scheduler.max_attempts must be at least 1"));
        }
        if s.retry.multiplier < 1.0 || !s.retry.multiplier.is_finite() {
            return Err(invalid("scheduler.retry.multiplier must be >= 1.0"));
        }
        if s.retry.max_delay_ms < s.retry.base_delay_ms {
            return Err(invalid(
                "scheduler.retry.max_delay_ms must not be below base_delay_ms",
            ));
        }

        let unit = [
            ("matcher.similarity_threshold", self.matcher.similarity_threshold as f64),
            ("matcher.history_weight", self.matcher.history_weight as f64),
            ("matcher.history_min_similarity", self.matcher.history_min_similarity as f64),
            ("optimizer.similarity_threshold", self.optimizer.similarity_threshold as f64),
            ("optimizer.success_rate_threshold", self.optimizer.success_rate_threshold),
        ];
        for (key, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!("{key} must be within 0..1 (got {value})")));
            }
        }

        let o = &self.optimizer;
        if o.min_recurrence == 0 || o.page_size == 0 || o.max_matches == 0 {
            return Err(invalid(
                "optimizer.min_recurrence, page_size and max_matches must be at least 1",
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(invalid("embedding.dimensions must be at least 1"));
        }
        if self.store.kind == StoreKind::Jsonl && self.store.path.is_none() {
            return Err(invalid("store.path is required for the jsonl store"));
        }
        Ok(())
    }
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = LoomConfig::default();
        assert_eq!(cfg.scheduler.max_concurrent, 5);
        assert_eq!(cfg.scheduler.retry.base_delay_ms, 2_000);
        assert_eq!(cfg.scheduler.retry.max_delay_ms, 60_000);
        assert_eq!(cfg.matcher.similarity_threshold, 0.7);
        assert_eq!(cfg.matcher.cache_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.optimizer.min_recurrence, 2);
        assert_eq!(cfg.embedding.dimensions, 768);
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[scheduler]\nmax_concurrent = 8\n\n[scheduler.retry]\nbase_delay_ms = 500\n\n[store]\nkind = \"jsonl\"\npath = \"history.jsonl\""
        )
        .unwrap();

        let cfg = LoomConfig::load_file(Some(file.path())).unwrap();
        assert_eq!(cfg.scheduler.max_concurrent, 8);
        assert_eq!(cfg.scheduler.retry.base_delay_ms, 500);
        assert_eq!(cfg.scheduler.retry.multiplier, 2.0);
        assert_eq!(cfg.store.kind, StoreKind::Jsonl);
        assert_eq!(cfg.matcher, MatcherConfig::default());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LoomConfig::load_file(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[scheduler\nmax_concurrent = ").unwrap();
        let err = LoomConfig::load_file(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = LoomConfig::default();
        cfg.apply_env(env(&[
            ("LOOM_MAX_CONCURRENT", "3"),
            ("LOOM_SIMILARITY_THRESHOLD", "0.55"),
            ("LOOM_STORE_PATH", "/tmp/loom.jsonl"),
            ("LOOM_LOG_LEVEL", "debug"),
        ]))
        .unwrap();

        assert_eq!(cfg.scheduler.max_concurrent, 3);
        assert_eq!(cfg.matcher.similarity_threshold, 0.55);
        assert_eq!(cfg.store.kind, StoreKind::Jsonl);
        assert_eq!(cfg.store.path, Some(PathBuf::from("/tmp/loom.jsonl")));
        assert_eq!(cfg.logging.level, "debug");
    }

    #[test]
    fn bad_env_value_is_rejected() {
        let mut cfg = LoomConfig::default();
        let err = cfg
            .apply_env(env(&[("LOOM_MAX_CONCURRENT", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key, .. } if key == "LOOM_MAX_CONCURRENT"));
    }

    #[rstest]
    #[case::zero_concurrency(|c: &mut LoomConfig| c.scheduler.max_concurrent = 0)]
    #[case::zero_attempts(|c: &mut LoomConfig| c.scheduler.max_attempts = 0)]
    #[case::cap_below_base(|c: &mut LoomConfig| c.scheduler.retry.max_delay_ms = 100)]
    #[case::threshold_above_one(|c: &mut LoomConfig| c.matcher.similarity_threshold = 1.5)]
    #[case::negative_success_rate(|c: &mut LoomConfig| c.optimizer.success_rate_threshold = -0.1)]
    #[case::jsonl_without_path(|c: &mut LoomConfig| c.store.kind = StoreKind::Jsonl)]
    fn validate_rejects(#[case] mutate: fn(&mut LoomConfig)) {
        let mut cfg = LoomConfig::default();
        mutate(&mut cfg);
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn retry_policy_comes_from_config() {
        let policy = SchedulerConfig::default().retry_policy();
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
    }
}
