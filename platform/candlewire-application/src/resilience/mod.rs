//! Per-dependency resilience: retry with exponential backoff around a
//! circuit breaker, one pipeline per named external service.

pub mod breaker;
pub mod retry;

pub use breaker::{BreakerSettings, CircuitBreaker, CircuitState};
pub use retry::RetryPolicy;

use crate::config::ResilienceSettings;
use candlewire_domain::repositories::ClientError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Retry + breaker + timeout wrapper for one external dependency.
pub struct DependencyGuard {
    name: String,
    policy: RetryPolicy,
    breaker: CircuitBreaker,
    call_timeout: Option<Duration>,
}

impl DependencyGuard {
    pub fn new(name: &str, settings: ResilienceSettings) -> Self {
        let call_timeout = if settings.call_timeout.is_zero() {
            None
        } else {
            Some(settings.call_timeout)
        };
        Self {
            name: name.to_string(),
            policy: RetryPolicy {
                max_attempts: settings.max_attempts.max(1),
                base_delay: settings.base_delay,
                max_delay: settings.max_delay,
                multiplier: settings.backoff_multiplier,
            },
            breaker: CircuitBreaker::new(BreakerSettings {
                failure_ratio: settings.failure_ratio,
                sampling_window: settings.sampling_window,
                minimum_throughput: settings.minimum_throughput,
                break_duration: settings.break_duration,
            }),
            call_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn isolate(&self) {
        self.breaker.isolate();
    }

    pub fn reset(&self) {
        self.breaker.reset();
    }

    /// Runs `call` under the breaker, retrying transient failures until the
    /// attempt budget runs out. Validation-class errors surface immediately.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut attempt: u32 = 1;
        loop {
            let state_before = self.breaker.state();
            let outcome = if self.breaker.acquire() {
                let result = match self.call_timeout {
                    Some(limit) => match tokio::time::timeout(limit, call()).await {
                        Ok(result) => result,
                        Err(_) => Err(ClientError::Timeout(format!(
                            "{operation} exceeded {}ms",
                            limit.as_millis()
                        ))),
                    },
                    None => call().await,
                };
                match &result {
                    Ok(_) => self.breaker.record_success(),
                    Err(err) if err.is_transient() => self.breaker.record_failure(),
                    // The dependency answered; a domain-level refusal is not
                    // an availability signal.
                    Err(_) => self.breaker.record_success(),
                }
                result
            } else {
                metrics::counter!("candlewire.resilience.circuit_open").increment(1);
                Err(ClientError::CircuitOpen(format!(
                    "{} unavailable, circuit is {}",
                    self.name,
                    self.breaker.state().label()
                )))
            };
            self.note_transition(state_before, self.breaker.state());

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.policy.max_attempts => {
                    metrics::counter!("candlewire.resilience.retries").increment(1);
                    tracing::warn!(
                        dependency = %self.name,
                        operation,
                        attempt,
                        error = %err,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(self.policy.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn note_transition(&self, before: CircuitState, after: CircuitState) {
        if before == after {
            return;
        }
        metrics::gauge!(
            "candlewire.resilience.circuit_state",
            "dependency" => self.name.clone()
        )
        .set(circuit_gauge(after));
        tracing::warn!(
            dependency = %self.name,
            from = before.label(),
            to = after.label(),
            "circuit state changed"
        );
    }
}

fn circuit_gauge(state: CircuitState) -> f64 {
    match state {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
        CircuitState::Isolated => 3.0,
    }
}

/// Lazily builds and caches one [`DependencyGuard`] per dependency name.
pub struct ResilienceRegistry {
    settings: ResilienceSettings,
    guards: RwLock<HashMap<String, Arc<DependencyGuard>>>,
}

impl ResilienceRegistry {
    pub fn new(settings: ResilienceSettings) -> Self {
        Self {
            settings,
            guards: RwLock::new(HashMap::new()),
        }
    }

    pub fn guard(&self, name: &str) -> Arc<DependencyGuard> {
        if let Some(guard) = self.guards.read().get(name) {
            return Arc::clone(guard);
        }
        let mut guards = self.guards.write();
        Arc::clone(
            guards
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(DependencyGuard::new(name, self.settings))),
        )
    }

    /// Current circuit state per known dependency, sorted by name.
    pub fn circuit_states(&self) -> Vec<(String, CircuitState)> {
        let mut states: Vec<(String, CircuitState)> = self
            .guards
            .read()
            .iter()
            .map(|(name, guard)| (name.clone(), guard.circuit_state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_settings() -> ResilienceSettings {
        ResilienceSettings {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            call_timeout: Duration::from_millis(200),
            failure_ratio: 0.5,
            sampling_window: Duration::from_secs(60),
            minimum_throughput: 2,
            break_duration: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn transient_failures_are_retried_to_success() {
        let guard = DependencyGuard::new("Broker", fast_settings());
        let calls = AtomicU32::new(0);
        let result = guard
            .execute("submit_order", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ClientError::Network("connection reset".into()))
                    } else {
                        Ok(42u32)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn validation_errors_are_never_retried() {
        let guard = DependencyGuard::new("Broker", fast_settings());
        let calls = AtomicU32::new(0);
        let result: Result<u32, ClientError> = guard
            .execute("submit_order", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ClientError::Validation("bad symbol".into())) }
            })
            .await;
        assert_eq!(result, Err(ClientError::Validation("bad symbol".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempt_budget_exhausts_into_the_last_error() {
        let guard = DependencyGuard::new("MarketData", fast_settings());
        let calls = AtomicU32::new(0);
        let result: Result<u32, ClientError> = guard
            .execute("poll", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(ClientError::Timeout("slow feed".into())) }
            })
            .await;
        assert!(matches!(result, Err(ClientError::Timeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn slow_calls_become_timeouts() {
        let mut settings = fast_settings();
        settings.max_attempts = 1;
        settings.call_timeout = Duration::from_millis(5);
        let guard = DependencyGuard::new("Broker", settings);
        let result: Result<u32, ClientError> = guard
            .execute("get_account", || async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(1)
            })
            .await;
        assert!(matches!(result, Err(ClientError::Timeout(_))));
    }

    #[tokio::test]
    async fn open_circuit_fails_fast_without_calling() {
        let mut settings = fast_settings();
        settings.max_attempts = 1;
        let guard = DependencyGuard::new("Broker", settings);

        // Two straight failures trip the breaker (minimum_throughput = 2).
        for _ in 0..2 {
            let _: Result<u32, ClientError> = guard
                .execute("submit_order", || async {
                    Err(ClientError::Network("down".into()))
                })
                .await;
        }
        assert_eq!(guard.circuit_state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let result: Result<u32, ClientError> = guard
            .execute("submit_order", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(1) }
            })
            .await;
        assert!(matches!(result, Err(ClientError::CircuitOpen(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn half_open_probe_recovers_the_dependency() {
        let mut settings = fast_settings();
        settings.max_attempts = 1;
        let guard = DependencyGuard::new("Broker", settings);
        for _ in 0..2 {
            let _: Result<u32, ClientError> = guard
                .execute("submit_order", || async {
                    Err(ClientError::Network("down".into()))
                })
                .await;
        }
        assert_eq!(guard.circuit_state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(25)).await;
        let result: Result<u32, ClientError> = guard.execute("submit_order", || async { Ok(7) }).await;
        assert_eq!(result, Ok(7));
        assert_eq!(guard.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn registry_caches_guards_by_name() {
        let registry = ResilienceRegistry::new(fast_settings());
        let a = registry.guard("Broker");
        let b = registry.guard("Broker");
        let c = registry.guard("MarketData");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        c.isolate();
        let states = registry.circuit_states();
        assert_eq!(
            states,
            vec![
                ("Broker".to_string(), CircuitState::Closed),
                ("MarketData".to_string(), CircuitState::Isolated),
            ]
        );
    }
}
