//! # Task Fan-out Executor
//! Runs one research request against every configured provider in parallel.
//!
//! Each provider sub-task goes through its circuit breaker, then up to
//! `max_attempts` attempts, each bounded by the per-attempt timeout and
//! separated by jittered exponential backoff. Failures stay inside that
//! provider's [`ProviderResult`]; the returned map always has one entry per
//! provider.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, histogram};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::breaker::{BreakerRegistry, CircuitBreaker, Permit, TrialGuard};
use crate::error::{ErrorClass, FanoutError, ProviderError};
use crate::providers::{prompt, DynProvider};
use crate::retry::RetryPolicy;
use crate::shutdown::Shutdown;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderResult {
    pub provider: String,
    pub success: bool,
    /// Empty unless `success`.
    pub content: String,
    pub error: Option<String>,
    pub error_class: Option<ErrorClass>,
    pub attempts_used: u32,
    pub elapsed_ms: u64,
}

impl ProviderResult {
    fn ok(provider: &str, content: String, attempts_used: u32, elapsed_ms: u64) -> Self {
        Self {
            provider: provider.to_string(),
            success: true,
            content,
            error: None,
            error_class: None,
            attempts_used,
            elapsed_ms,
        }
    }

    fn failed(provider: &str, err: &ProviderError, attempts_used: u32, elapsed_ms: u64) -> Self {
        Self {
            provider: provider.to_string(),
            success: false,
            content: String::new(),
            error: Some(err.to_string()),
            error_class: Some(err.class()),
            attempts_used,
            elapsed_ms,
        }
    }

    pub fn was_cancelled(&self) -> bool {
        self.error_class == Some(ErrorClass::Cancelled)
    }
}

/// Result map keyed by provider name.
pub type FanoutResults = HashMap<String, ProviderResult>;

/// One provider's share of a fan-out call.
#[derive(Debug, Clone)]
pub struct ProviderTask {
    pub provider: String,
    pub prompt: String,
    pub category: String,
    pub timeout: Duration,
    pub attempt_count: u32,
}

pub struct FanoutExecutor {
    providers: Vec<DynProvider>,
    breakers: Arc<BreakerRegistry>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl FanoutExecutor {
    /// Providers with a duplicate name are dropped (first one wins).
    pub fn new(
        providers: Vec<DynProvider>,
        breakers: Arc<BreakerRegistry>,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        let mut seen = HashSet::new();
        let providers = providers
            .into_iter()
            .filter(|p| {
                let fresh = seen.insert(p.name().to_string());
                if !fresh {
                    warn!(target: "fanout", provider = p.name(), "duplicate provider name ignored");
                }
                fresh
            })
            .collect();
        Self {
            providers,
            breakers,
            retry,
            timeout,
        }
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Research `content` with every provider concurrently.
    ///
    /// Errors only on preconditions; any mix of provider failures still yields
    /// `Ok` with one entry per provider.
    pub async fn research(
        &self,
        content: &str,
        category: &str,
        shutdown: &Shutdown,
    ) -> Result<FanoutResults, FanoutError> {
        if content.trim().is_empty() {
            return Err(FanoutError::EmptyContent);
        }
        if self.providers.is_empty() {
            return Err(FanoutError::NoProviders);
        }

        let started = Instant::now();
        let prompt = prompt::research_prompt(content, category);

        // A sub-task that panics keeps this placeholder.
        let lost = ProviderError::Other("task did not complete".into());
        let mut results: FanoutResults = self
            .providers
            .iter()
            .map(|p| (p.name().to_string(), ProviderResult::failed(p.name(), &lost, 0, 0)))
            .collect();

        let mut set = JoinSet::new();
        for provider in &self.providers {
            let task = ProviderTask {
                provider: provider.name().to_string(),
                prompt: prompt.clone(),
                category: category.to_string(),
                timeout: self.timeout,
                attempt_count: 0,
            };
            set.spawn(run_task(
                provider.clone(),
                self.breakers.get(provider.name()),
                task,
                self.retry,
                shutdown.clone(),
            ));
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(r) => {
                    results.insert(r.provider.clone(), r);
                }
                Err(e) => warn!(target: "fanout", error = %e, "provider task aborted"),
            }
        }

        let elapsed = started.elapsed();
        histogram!("research_fanout_ms").record(elapsed.as_secs_f64() * 1000.0);
        let ok = results.values().filter(|r| r.success).count();
        info!(
            target: "fanout",
            providers = results.len(),
            succeeded = ok,
            elapsed_ms = elapsed.as_millis() as u64,
            "fan-out finished"
        );
        Ok(results)
    }
}

async fn run_task(
    provider: DynProvider,
    breaker: Option<Arc<CircuitBreaker>>,
    mut task: ProviderTask,
    retry: RetryPolicy,
    mut shutdown: Shutdown,
) -> ProviderResult {
    let started = Instant::now();
    let name = task.provider.clone();
    let elapsed_ms = |s: Instant| s.elapsed().as_millis() as u64;

    // Dropped on every exit path, including a panic inside `provider.call`.
    let mut trial = None;
    if let Some(b) = &breaker {
        match b.try_acquire() {
            Permit::Rejected { retry_in } => {
                debug!(target: "fanout", provider = %name, retry_in_s = retry_in.num_seconds(), "circuit open; skipping");
                counter!("research_provider_calls_total", "provider" => name.clone(), "outcome" => "circuit_open").increment(1);
                return ProviderResult::failed(&name, &ProviderError::CircuitOpen, 0, 0);
            }
            Permit::Trial => trial = Some(TrialGuard::new(Arc::clone(b))),
            Permit::Allowed => {}
        }
    }

    let outcome: Result<String, ProviderError> = loop {
        if shutdown.is_triggered() {
            break Err(ProviderError::Cancelled);
        }
        task.attempt_count += 1;
        counter!("research_provider_attempts_total", "provider" => name.clone()).increment(1);

        let attempt = tokio::select! {
            biased;
            _ = shutdown.wait() => Err(ProviderError::Cancelled),
            r = tokio::time::timeout(task.timeout, provider.call(&task.prompt, &task.category)) => {
                r.unwrap_or(Err(ProviderError::Timeout))
            }
        };

        match attempt {
            Ok(content) => break Ok(content),
            Err(e) if retry.should_retry(&e, task.attempt_count) => {
                let delay = retry.delay_with_jitter(task.attempt_count - 1, e.class());
                debug!(
                    target: "fanout",
                    provider = %name,
                    attempt = task.attempt_count,
                    class = e.class().as_str(),
                    delay_ms = delay.as_millis() as u64,
                    "attempt failed; backing off"
                );
                tokio::select! {
                    biased;
                    _ = shutdown.wait() => break Err(ProviderError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => break Err(e),
        }
    };

    match outcome {
        Ok(content) => {
            if let Some(b) = &breaker {
                b.record_success();
            }
            if let Some(t) = trial {
                t.disarm();
            }
            counter!("research_provider_calls_total", "provider" => name.clone(), "outcome" => "success").increment(1);
            debug!(target: "fanout", provider = %name, attempts = task.attempt_count, "provider succeeded");
            ProviderResult::ok(&name, content, task.attempt_count, elapsed_ms(started))
        }
        Err(ProviderError::Cancelled) => {
            drop(trial);
            ProviderResult::failed(&name, &ProviderError::Cancelled, task.attempt_count, elapsed_ms(started))
        }
        Err(e) => {
            if let Some(b) = &breaker {
                b.record_failure();
            }
            if let Some(t) = trial {
                t.disarm();
            }
            counter!("research_provider_calls_total", "provider" => name.clone(), "outcome" => e.class().as_str()).increment(1);
            warn!(
                target: "fanout",
                provider = %name,
                attempts = task.attempt_count,
                class = e.class().as_str(),
                error = %e,
                "provider failed"
            );
            ProviderResult::failed(&name, &e, task.attempt_count, elapsed_ms(started))
        }
    }
}
