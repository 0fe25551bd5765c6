//! One certification run, end to end: configuration in, scorecard out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{SecondsFormat, Utc};

use crate::core::config::HarnessConfig;
use crate::core::errors::Result;
use crate::engine::TargetEngine;
use crate::generator::SyntheticGenerator;
use crate::logger::{EventLog, RunEvent};
use crate::provider::{Provider, RetryPolicy, RetryingProvider};
use crate::scenario::{RunEnv, ScenarioRegistry, run_scenarios};
use crate::scorecard::{RunMeta, Scorecard};

/// Everything a run needs besides its configuration.
pub struct Certification {
    /// Engine under test.
    pub engine: Arc<dyn TargetEngine>,
    /// Text and embedding provider, wrapped in retries per run.
    pub provider: Arc<dyn Provider>,
    /// Scenarios a selection is resolved against.
    pub registry: ScenarioRegistry,
    /// Where run events go.
    pub log: EventLog,
}

impl std::fmt::Debug for Certification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Certification")
            .field("engine", &self.engine.name())
            .field("provider", &self.provider.name())
            .field("scenarios", &self.registry.ids())
            .finish_non_exhaustive()
    }
}

impl Certification {
    /// Built-in scenarios against `engine`, with logging disabled.
    #[must_use]
    pub fn new(engine: Arc<dyn TargetEngine>, provider: Arc<dyn Provider>) -> Self {
        Self {
            engine,
            provider,
            registry: ScenarioRegistry::builtin(),
            log: EventLog::disabled(),
        }
    }

    /// Send run events to `log`.
    #[must_use]
    pub fn with_log(mut self, log: EventLog) -> Self {
        self.log = log;
        self
    }

    /// Run the selected scenarios (all when `selection` is empty).
    ///
    /// Only configuration problems fail here; everything that goes wrong
    /// inside a scenario ends up in the scorecard.
    pub fn run(&self, config: &HarnessConfig, selection: &[String]) -> Result<Scorecard> {
        config.validate()?;
        let scenarios = self.registry.instantiate(selection)?;
        let generator = SyntheticGenerator::new(config.run.seed, &config.generator)?;
        let config_hash = config.stable_hash()?;
        let ids: Vec<String> = scenarios.iter().map(|s| s.id().to_string()).collect();

        let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let clock = Instant::now();
        self.log.send(RunEvent::RunStarted {
            seed: config.run.seed,
            scale: config.run.scale.as_str().to_string(),
            config_hash: config_hash.clone(),
            scenarios: ids.clone(),
        });

        let env = RunEnv {
            seed: config.run.seed,
            engine: Arc::clone(&self.engine),
            provider: RetryingProvider::new(
                Arc::clone(&self.provider),
                RetryPolicy::from(&config.provider),
                self.log.clone(),
            ),
            generator: Arc::new(generator),
            scale: config.run.scale.params(),
            thresholds: config.thresholds.clone(),
            budget: Duration::from_secs(config.run.scenario_budget_secs),
            log: self.log.clone(),
        };
        let reports = run_scenarios(&env, scenarios, config.run.parallel, config.run.workers);

        let elapsed = clock.elapsed();
        let meta = RunMeta {
            seed: config.run.seed,
            scale: config.run.scale,
            started_at,
            duration_s: elapsed.as_secs_f64(),
            config_hash,
            engine: self.engine.name().to_string(),
            provider: self.provider.name().to_string(),
            scenarios: ids,
        };
        let card = Scorecard::build(meta, &reports, &config.thresholds, config.run.pass_threshold);

        for gate in card.failed_gates() {
            self.log.send(RunEvent::GateFailed {
                gate: gate.id.to_string(),
                observed: gate.observed_value,
            });
        }
        self.log.send(RunEvent::RunCompleted {
            score: card.overall.score_0_100,
            pass: card.overall.pass,
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        });
        Ok(card)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::GeneratorConfig;
    use crate::core::errors::HarnessError;
    use crate::engine::MemoryEngine;
    use crate::provider::DeterministicProvider;

    fn small_config() -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.run.seed = 11;
        config.generator = GeneratorConfig {
            topic_count: 40,
            embedding_dim: 32,
            ..GeneratorConfig::default()
        };
        config
    }

    fn certification() -> Certification {
        Certification::new(
            Arc::new(MemoryEngine::new()),
            Arc::new(DeterministicProvider::new(11, 32)),
        )
    }

    #[test]
    fn unknown_scenarios_abort_before_running() {
        let err = certification()
            .run(&small_config(), &["nope".to_string()])
            .unwrap_err();
        assert!(matches!(err, HarnessError::UnknownScenario { .. }));
    }

    #[test]
    fn subset_run_records_metadata() {
        let card = certification()
            .run(&small_config(), &["policy".to_string(), "graph".to_string()])
            .unwrap();
        assert_eq!(card.run_meta.seed, 11);
        assert_eq!(card.run_meta.scenarios, vec!["policy", "graph"]);
        assert_eq!(card.run_meta.engine, "memory");
        assert_eq!(card.scenario_scores.len(), 2);
        // The other gates never saw evidence.
        assert!(!card.overall.gate_pass);
    }
}
