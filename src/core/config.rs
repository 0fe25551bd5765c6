//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::errors::{HarnessError, Result};

/// Full harness configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct HarnessConfig {
    pub run: RunConfig,
    pub generator: GeneratorConfig,
    pub thresholds: Thresholds,
    pub provider: ProviderConfig,
    pub paths: PathsConfig,
}

/// Fixture scale preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scale {
    #[default]
    Small,
    Medium,
    Large,
}

impl Scale {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }

    /// Fixture counts for this preset.
    #[must_use]
    pub const fn params(self) -> ScaleParams {
        match self {
            Self::Small => ScaleParams {
                tenants: 3,
                docs_per_collection: 50,
                queries: 20,
                temporal_records: 30,
                versions_per_record: 3,
                subjects: 6,
                resources: 8,
                invoices: 50,
                transactions: 40,
                concurrency_clients: 10,
            },
            Self::Medium => ScaleParams {
                tenants: 5,
                docs_per_collection: 200,
                queries: 50,
                temporal_records: 60,
                versions_per_record: 4,
                subjects: 10,
                resources: 16,
                invoices: 150,
                transactions: 100,
                concurrency_clients: 10,
            },
            Self::Large => ScaleParams {
                tenants: 10,
                docs_per_collection: 1_000,
                queries: 100,
                temporal_records: 120,
                versions_per_record: 5,
                subjects: 20,
                resources: 32,
                invoices: 500,
                transactions: 250,
                concurrency_clients: 16,
            },
        }
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Scale {
    type Err = HarnessError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "small" => Ok(Self::Small),
            "medium" => Ok(Self::Medium),
            "large" => Ok(Self::Large),
            other => Err(HarnessError::InvalidConfig {
                details: format!("scale must be small, medium or large; got {other:?}"),
            }),
        }
    }
}

/// Concrete fixture counts derived from a [`Scale`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleParams {
    pub tenants: usize,
    pub docs_per_collection: usize,
    pub queries: usize,
    pub temporal_records: usize,
    pub versions_per_record: usize,
    pub subjects: usize,
    pub resources: usize,
    pub invoices: usize,
    pub transactions: usize,
    pub concurrency_clients: usize,
}

/// Run-level knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub seed: u64,
    pub scale: Scale,
    /// Minimum overall score (0-100) for a passing run.
    pub pass_threshold: f64,
    /// Wall-clock budget per scenario.
    pub scenario_budget_secs: u64,
    /// Schedule scenarios that declare disjoint namespaces onto workers.
    pub parallel: bool,
    pub workers: usize,
}

/// Synthetic generator parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    pub topic_count: i64,
    pub embedding_dim: i64,
    pub item_noise: f64,
    pub query_noise: f64,
    pub in_topic_keyword_rate: f64,
    pub noise_keyword_rate: f64,
}

/// Pass/fail cutoffs for every scored metric.
///
/// These are deliberately configuration: quality cutoffs depend on the
/// generator's topic count versus corpus size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Thresholds {
    pub ndcg_at_10: f64,
    pub recall_at_10: f64,
    pub mrr_at_10: f64,
    pub keyword_precision: f64,
    pub graph_consistency: f64,
    pub context_budget_violations: f64,
    pub strict_truncation_failures: f64,
    pub token_reduction_pct: f64,
    pub txn_abort_rate: f64,
    pub avg_retries_on_conflict: f64,
    pub conflict_rate: f64,
    pub p95_hybrid_search_ms: f64,
    pub p95_graph_query_ms: f64,
    pub p95_temporal_query_ms: f64,
    pub throughput_ops_per_sec: f64,
    pub batch_speedup: f64,
    pub recovery_replayed_entries: f64,
    pub policy_accuracy: f64,
    pub deny_with_explanation_pct: f64,
    pub namespace_isolation_violations: f64,
    pub cache_hit_rate: f64,
    pub concurrent_search_success_rate: f64,
}

/// Provider retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ProviderConfig {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

/// Output locations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub output: PathBuf,
    pub event_log: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 1337,
            scale: Scale::Small,
            pass_threshold: 70.0,
            scenario_budget_secs: 120,
            parallel: false,
            workers: 2,
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            topic_count: 200,
            embedding_dim: 384,
            item_noise: 0.1,
            query_noise: 0.05,
            in_topic_keyword_rate: 0.9,
            noise_keyword_rate: 0.05,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            ndcg_at_10: 0.6,
            recall_at_10: 0.5,
            mrr_at_10: 0.5,
            keyword_precision: 0.8,
            graph_consistency: 1.0,
            context_budget_violations: 0.0,
            strict_truncation_failures: 0.0,
            token_reduction_pct: 25.0,
            txn_abort_rate: 0.05,
            avg_retries_on_conflict: 2.0,
            conflict_rate: 0.10,
            p95_hybrid_search_ms: 100.0,
            p95_graph_query_ms: 150.0,
            p95_temporal_query_ms: 120.0,
            throughput_ops_per_sec: 500.0,
            batch_speedup: 3.0,
            recovery_replayed_entries: 1.0,
            policy_accuracy: 1.0,
            deny_with_explanation_pct: 100.0,
            namespace_isolation_violations: 0.0,
            cache_hit_rate: 0.8,
            concurrent_search_success_rate: 1.0,
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = env::var_os("HOME").map_or_else(
            || {
                eprintln!("[ECH-CONFIG] WARNING: HOME not set, falling back to /tmp for config path");
                PathBuf::from("/tmp")
            },
            PathBuf::from,
        );
        Self {
            config_file: home_dir.join(".config").join("ech").join("config.toml"),
            output: PathBuf::from("scorecard.json"),
            event_log: None,
        }
    }
}

impl HarnessConfig {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| HarnessError::Io {
                path: path_buf.clone(),
                source,
            })?;
            let parsed: Self = toml::from_str(&raw)?;
            parsed
        } else if is_explicit_path {
            return Err(HarnessError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for run metadata.
    ///
    /// FNV-1a over canonical JSON so the value is stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("ECH_SEED") {
            self.run.seed = parse_env("ECH_SEED", &raw)?;
        }
        if let Some(raw) = lookup("ECH_SCALE") {
            self.run.scale = raw.parse().map_err(|_| HarnessError::ConfigParse {
                context: "env",
                details: format!("ECH_SCALE={raw:?}: expected small, medium or large"),
            })?;
        }
        if let Some(raw) = lookup("ECH_PASS_THRESHOLD") {
            self.run.pass_threshold = parse_env("ECH_PASS_THRESHOLD", &raw)?;
        }
        if let Some(raw) = lookup("ECH_SCENARIO_BUDGET_SECS") {
            self.run.scenario_budget_secs = parse_env("ECH_SCENARIO_BUDGET_SECS", &raw)?;
        }
        if let Some(raw) = lookup("ECH_PARALLEL") {
            self.run.parallel = parse_env("ECH_PARALLEL", &raw)?;
        }
        if let Some(raw) = lookup("ECH_WORKERS") {
            self.run.workers = parse_env("ECH_WORKERS", &raw)?;
        }

        if let Some(raw) = lookup("ECH_GENERATOR_TOPIC_COUNT") {
            self.generator.topic_count = parse_env("ECH_GENERATOR_TOPIC_COUNT", &raw)?;
        }
        if let Some(raw) = lookup("ECH_GENERATOR_EMBEDDING_DIM") {
            self.generator.embedding_dim = parse_env("ECH_GENERATOR_EMBEDDING_DIM", &raw)?;
        }

        if let Some(raw) = lookup("ECH_PROVIDER_MAX_RETRIES") {
            self.provider.max_retries = parse_env("ECH_PROVIDER_MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = lookup("ECH_PROVIDER_BASE_BACKOFF_MS") {
            self.provider.base_backoff_ms = parse_env("ECH_PROVIDER_BASE_BACKOFF_MS", &raw)?;
        }
        if let Some(raw) = lookup("ECH_PROVIDER_MAX_BACKOFF_MS") {
            self.provider.max_backoff_ms = parse_env("ECH_PROVIDER_MAX_BACKOFF_MS", &raw)?;
        }

        if let Some(raw) = lookup("ECH_OUTPUT") {
            self.paths.output = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("ECH_EVENT_LOG") {
            self.paths.event_log = Some(PathBuf::from(raw));
        }
        Ok(())
    }

    /// Reject parameter combinations that would make fixtures or scores meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.generator.topic_count <= 0 {
            return Err(HarnessError::InvalidConfig {
                details: format!(
                    "generator.topic_count must be > 0, got {}",
                    self.generator.topic_count
                ),
            });
        }
        if self.generator.embedding_dim <= 0 {
            return Err(HarnessError::InvalidConfig {
                details: format!(
                    "generator.embedding_dim must be > 0, got {}",
                    self.generator.embedding_dim
                ),
            });
        }
        for (name, val) in [
            ("item_noise", self.generator.item_noise),
            ("query_noise", self.generator.query_noise),
        ] {
            if !val.is_finite() || val < 0.0 {
                return Err(HarnessError::InvalidConfig {
                    details: format!("generator.{name} must be a finite value >= 0, got {val}"),
                });
            }
        }
        validate_prob(
            "generator.in_topic_keyword_rate",
            self.generator.in_topic_keyword_rate,
        )?;
        validate_prob(
            "generator.noise_keyword_rate",
            self.generator.noise_keyword_rate,
        )?;

        if !(0.0..=100.0).contains(&self.run.pass_threshold) {
            return Err(HarnessError::InvalidConfig {
                details: format!(
                    "run.pass_threshold must be in [0, 100], got {}",
                    self.run.pass_threshold
                ),
            });
        }
        if self.run.scenario_budget_secs == 0 {
            return Err(HarnessError::InvalidConfig {
                details: "run.scenario_budget_secs must be >= 1".to_string(),
            });
        }
        if self.run.workers == 0 {
            return Err(HarnessError::InvalidConfig {
                details: "run.workers must be >= 1".to_string(),
            });
        }

        if self.provider.base_backoff_ms > self.provider.max_backoff_ms {
            return Err(HarnessError::InvalidConfig {
                details: format!(
                    "provider.base_backoff_ms ({}) must be <= provider.max_backoff_ms ({})",
                    self.provider.base_backoff_ms, self.provider.max_backoff_ms
                ),
            });
        }

        for (name, val) in self.thresholds.entries() {
            if !val.is_finite() || val < 0.0 {
                return Err(HarnessError::InvalidConfig {
                    details: format!("thresholds.{name} must be a finite value >= 0, got {val}"),
                });
            }
        }
        for (name, val) in [
            ("ndcg_at_10", self.thresholds.ndcg_at_10),
            ("recall_at_10", self.thresholds.recall_at_10),
            ("mrr_at_10", self.thresholds.mrr_at_10),
            ("keyword_precision", self.thresholds.keyword_precision),
            ("graph_consistency", self.thresholds.graph_consistency),
            ("policy_accuracy", self.thresholds.policy_accuracy),
            ("cache_hit_rate", self.thresholds.cache_hit_rate),
        ] {
            validate_prob(&format!("thresholds.{name}"), val)?;
        }

        Ok(())
    }
}

impl Thresholds {
    /// Every threshold with its config key, for validation and display.
    #[must_use]
    pub fn entries(&self) -> [(&'static str, f64); 22] {
        [
            ("ndcg_at_10", self.ndcg_at_10),
            ("recall_at_10", self.recall_at_10),
            ("mrr_at_10", self.mrr_at_10),
            ("keyword_precision", self.keyword_precision),
            ("graph_consistency", self.graph_consistency),
            ("context_budget_violations", self.context_budget_violations),
            ("strict_truncation_failures", self.strict_truncation_failures),
            ("token_reduction_pct", self.token_reduction_pct),
            ("txn_abort_rate", self.txn_abort_rate),
            ("avg_retries_on_conflict", self.avg_retries_on_conflict),
            ("conflict_rate", self.conflict_rate),
            ("p95_hybrid_search_ms", self.p95_hybrid_search_ms),
            ("p95_graph_query_ms", self.p95_graph_query_ms),
            ("p95_temporal_query_ms", self.p95_temporal_query_ms),
            ("throughput_ops_per_sec", self.throughput_ops_per_sec),
            ("batch_speedup", self.batch_speedup),
            ("recovery_replayed_entries", self.recovery_replayed_entries),
            ("policy_accuracy", self.policy_accuracy),
            ("deny_with_explanation_pct", self.deny_with_explanation_pct),
            (
                "namespace_isolation_violations",
                self.namespace_isolation_violations,
            ),
            ("cache_hit_rate", self.cache_hit_rate),
            (
                "concurrent_search_success_rate",
                self.concurrent_search_success_rate,
            ),
        ]
    }
}

fn validate_prob(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(HarnessError::InvalidConfig {
            details: format!("{name} must be in [0,1], got {value}"),
        });
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn parse_env<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse::<T>().map_err(|error| HarnessError::ConfigParse {
        context: "env",
        details: format!("{name}={raw:?}: {error}"),
    })
}

#[cfg(test)]
mod tests {
    use super::{HarnessConfig, HarnessError, Scale};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn default_config_is_valid() {
        let cfg = HarnessConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_topic_count_rejected() {
        let mut cfg = HarnessConfig::default();
        cfg.generator.topic_count = 0;
        let err = cfg.validate().expect_err("expected topic count error");
        assert!(err.is_configuration());
        assert!(err.to_string().contains("topic_count"));
    }

    #[test]
    fn negative_dimension_rejected() {
        let mut cfg = HarnessConfig::default();
        cfg.generator.embedding_dim = -4;
        let err = cfg.validate().expect_err("expected dimension error");
        assert!(err.to_string().contains("embedding_dim"));
    }

    #[test]
    fn keyword_rates_must_be_probabilities() {
        let mut cfg = HarnessConfig::default();
        cfg.generator.noise_keyword_rate = 1.5;
        let err = cfg.validate().expect_err("expected rate error");
        assert!(err.to_string().contains("noise_keyword_rate"));
    }

    #[test]
    fn backoff_ordering_enforced() {
        let mut cfg = HarnessConfig::default();
        cfg.provider.base_backoff_ms = 10_000;
        let err = cfg.validate().expect_err("expected backoff error");
        assert!(err.to_string().contains("base_backoff_ms"));
    }

    #[test]
    fn pass_threshold_out_of_range_rejected() {
        let mut cfg = HarnessConfig::default();
        cfg.run.pass_threshold = 120.0;
        let err = cfg.validate().expect_err("expected threshold error");
        assert!(err.to_string().contains("pass_threshold"));
    }

    #[test]
    fn quality_thresholds_must_be_probabilities() {
        let mut cfg = HarnessConfig::default();
        cfg.thresholds.ndcg_at_10 = 1.2;
        let err = cfg.validate().expect_err("expected ndcg threshold error");
        assert!(err.to_string().contains("ndcg_at_10"));
    }

    #[test]
    fn stable_hash_changes_when_config_changes() {
        let cfg = HarnessConfig::default();
        let before = cfg.stable_hash().expect("hash should compute");
        let mut modified = HarnessConfig::default();
        modified.run.seed += 1;
        let after = modified.stable_hash().expect("hash should compute");
        assert_ne!(before, after);
        assert_eq!(before, cfg.stable_hash().expect("hash should compute"));
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = HarnessConfig::default();
        let overrides = vars(&[
            ("ECH_SEED", "42"),
            ("ECH_SCALE", "medium"),
            ("ECH_PARALLEL", "true"),
            ("ECH_OUTPUT", "/tmp/ech/card.json"),
        ]);
        cfg.apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect("overrides should parse");
        assert_eq!(cfg.run.seed, 42);
        assert_eq!(cfg.run.scale, Scale::Medium);
        assert!(cfg.run.parallel);
        assert_eq!(cfg.paths.output, PathBuf::from("/tmp/ech/card.json"));
    }

    #[test]
    fn env_invalid_value_rejected() {
        let mut cfg = HarnessConfig::default();
        let overrides = vars(&[("ECH_SEED", "not-a-number")]);
        let err = cfg
            .apply_env_overrides_from(|name| overrides.get(name).cloned())
            .expect_err("invalid seed should fail");
        match err {
            HarnessError::ConfigParse { context, details } => {
                assert_eq!(context, "env");
                assert!(details.contains("ECH_SEED"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn scale_parses_case_insensitively() {
        assert_eq!("LARGE".parse::<Scale>().unwrap(), Scale::Large);
        assert!("huge".parse::<Scale>().is_err());
    }

    #[test]
    fn scale_presets_grow() {
        let small = Scale::Small.params();
        let large = Scale::Large.params();
        assert!(large.tenants > small.tenants);
        assert!(large.docs_per_collection > small.docs_per_collection);
        assert!(large.queries > small.queries);
    }

    #[test]
    fn toml_round_trip_preserves_sections() {
        let raw = r#"
            [run]
            seed = 7
            scale = "large"

            [thresholds]
            ndcg_at_10 = 0.4
        "#;
        let cfg: HarnessConfig = toml::from_str(raw).expect("parse");
        assert_eq!(cfg.run.seed, 7);
        assert_eq!(cfg.run.scale, Scale::Large);
        assert!((cfg.thresholds.ndcg_at_10 - 0.4).abs() < f64::EPSILON);
        assert!((cfg.thresholds.recall_at_10 - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn load_returns_error_for_explicit_missing_path() {
        let result = HarnessConfig::load(Some(Path::new("/nonexistent/ech/config.toml")));
        assert!(matches!(result, Err(HarnessError::MissingConfig { .. })));
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ech.toml");
        std::fs::write(&path, "[run]\nseed = 99\n").unwrap();
        let cfg = HarnessConfig::load(Some(&path)).expect("load");
        assert_eq!(cfg.run.seed, 99);
        assert_eq!(cfg.paths.config_file, path);
    }
}
