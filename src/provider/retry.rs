//! Bounded retry with exponential backoff around a [`Provider`].

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{Embedding, GenerateOptions, Generation, Provider, ProviderError};
use crate::core::config::ProviderConfig;
use crate::core::errors::{HarnessError, Result};
use crate::logger::{EventLog, RunEvent};

/// Backoff schedule: `base * 2^attempt`, capped at `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_backoff
            .checked_mul(factor)
            .map_or(self.max_backoff, |d| d.min(self.max_backoff))
    }
}

impl From<&ProviderConfig> for RetryPolicy {
    fn from(cfg: &ProviderConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_backoff: Duration::from_millis(cfg.base_backoff_ms),
            max_backoff: Duration::from_millis(cfg.max_backoff_ms),
        }
    }
}

/// Long-lived provider client shared by all scenarios.
#[derive(Clone)]
pub struct RetryingProvider {
    inner: Arc<dyn Provider>,
    policy: RetryPolicy,
    log: EventLog,
}

impl std::fmt::Debug for RetryingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingProvider")
            .field("provider", &self.inner.name())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryingProvider {
    #[must_use]
    pub fn new(inner: Arc<dyn Provider>, policy: RetryPolicy, log: EventLog) -> Self {
        Self { inner, policy, log }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn embed(&self, text: &str) -> Result<Embedding> {
        self.call("embed", || self.inner.embed(text))
    }

    pub fn generate(&self, prompt: &str, options: &GenerateOptions) -> Result<Generation> {
        self.call("generate", || self.inner.generate(prompt, options))
    }

    fn call<T>(
        &self,
        operation: &'static str,
        mut attempt_once: impl FnMut() -> std::result::Result<T, ProviderError>,
    ) -> Result<T> {
        let mut attempt = 0_u32;
        loop {
            match attempt_once() {
                Ok(value) => return Ok(value),
                Err(ProviderError::Rejected { details }) => {
                    return Err(HarnessError::ProviderRejected { operation, details });
                }
                Err(err) if attempt >= self.policy.max_retries => {
                    return Err(HarnessError::ProviderExhausted {
                        operation,
                        attempts: attempt + 1,
                        details: err.to_string(),
                    });
                }
                Err(err) => {
                    let delay = self.policy.delay_for(attempt);
                    self.log.send(RunEvent::ProviderRetry {
                        operation: operation.to_string(),
                        attempt: attempt + 1,
                        delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        details: err.to_string(),
                    });
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::provider::ProviderUsage;

    /// Fails the first `failures` calls with the given error.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        error: ProviderError,
    }

    impl Provider for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        fn embed(&self, _text: &str) -> std::result::Result<Embedding, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(self.error.clone());
            }
            Ok(Embedding {
                vector: vec![1.0],
                usage: ProviderUsage::default(),
            })
        }

        fn generate(
            &self,
            prompt: &str,
            _options: &GenerateOptions,
        ) -> std::result::Result<Generation, ProviderError> {
            Ok(Generation {
                text: prompt.to_string(),
                usage: ProviderUsage::default(),
            })
        }
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    fn flaky(failures: u32, error: ProviderError) -> Arc<Flaky> {
        Arc::new(Flaky {
            failures,
            calls: AtomicU32::new(0),
            error,
        })
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 10,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_millis(5000),
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for(1), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(3200));
        assert_eq!(policy.delay_for(5), Duration::from_millis(5000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(5000));
    }

    #[test]
    fn transient_failures_are_retried_until_success() {
        let inner = flaky(
            2,
            ProviderError::RateLimited {
                details: "429".to_string(),
            },
        );
        let client = RetryingProvider::new(inner.clone(), fast_policy(3), EventLog::disabled());
        client.embed("hello").unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn exhaustion_reports_attempt_count() {
        let inner = flaky(
            10,
            ProviderError::Network {
                details: "reset".to_string(),
            },
        );
        let client = RetryingProvider::new(inner.clone(), fast_policy(2), EventLog::disabled());
        let err = client.embed("hello").unwrap_err();
        match err {
            HarnessError::ProviderExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn rejection_is_not_retried() {
        let inner = flaky(
            10,
            ProviderError::Rejected {
                details: "bad request".to_string(),
            },
        );
        let client = RetryingProvider::new(inner.clone(), fast_policy(5), EventLog::disabled());
        let err = client.embed("hello").unwrap_err();
        assert_eq!(err.code(), "ECH-2003");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
