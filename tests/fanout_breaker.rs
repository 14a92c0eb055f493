// tests/fanout_breaker.rs
//
// Fan-out executor under partial failure, timeouts, retries and circuit
// breaking. Time is paused so backoff sleeps and timeouts complete instantly.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use notes_research_bot::breaker::{BreakerConfig, BreakerRegistry, BreakerState, Permit};
use notes_research_bot::clock::{ManualClock, SharedClock};
use notes_research_bot::error::{ErrorClass, ProviderError};
use notes_research_bot::fanout::FanoutExecutor;
use notes_research_bot::providers::{DynProvider, MockOutcome, MockProvider, ResearchProvider};
use notes_research_bot::retry::RetryPolicy;
use notes_research_bot::shutdown::Shutdown;
use notes_research_bot::synth::{is_placeholder, synthesize};

fn executor_with(
    providers: Vec<DynProvider>,
    breaker: BreakerConfig,
    clock: SharedClock,
) -> FanoutExecutor {
    let names: Vec<String> = providers.iter().map(|p| p.name().to_string()).collect();
    let breakers = Arc::new(BreakerRegistry::new(&names, breaker, clock));
    FanoutExecutor::new(
        providers,
        breakers,
        RetryPolicy::default(),
        Duration::from_secs(60),
    )
}

fn clock() -> Arc<ManualClock> {
    ManualClock::shared(Utc.with_ymd_and_hms(2025, 9, 6, 9, 0, 0).unwrap())
}

fn failing(name: &str, err: ProviderError) -> Arc<MockProvider> {
    Arc::new(MockProvider::always(name, MockOutcome::Err(err)))
}

#[tokio::test(start_paused = true)]
async fn one_entry_per_provider_for_any_failure_mix() {
    for k in 0..=3usize {
        let mut providers: Vec<DynProvider> = Vec::new();
        for i in 0..3 {
            let name = format!("p{i}");
            if i < k {
                providers.push(failing(&name, ProviderError::Other("bad request".into())));
            } else {
                providers.push(Arc::new(MockProvider::new(&name)));
            }
        }
        let ex = executor_with(providers, BreakerConfig::default(), clock());
        let results = ex
            .research("How do I test async APIs?", "software", &Shutdown::never())
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results.values().filter(|r| !r.success).count(), k);

        let text = synthesize(&results);
        assert_eq!(is_placeholder(&text), k == 3, "k={k}: {text}");
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_then_success_scenario() {
    let slow = Arc::new(MockProvider::always("claude", MockOutcome::Hang));
    let fast = Arc::new(MockProvider::always(
        "openai",
        MockOutcome::Ok("Use #[tokio::test] and mock the HTTP layer.".into()),
    ));
    let ex = executor_with(
        vec![slow.clone(), fast.clone()],
        BreakerConfig::default(),
        clock(),
    );

    let results = ex
        .research("How do I test async APIs?", "software", &Shutdown::never())
        .await
        .unwrap();

    let c = &results["claude"];
    assert!(!c.success);
    assert_eq!(c.error.as_deref(), Some("timed out"));
    assert_eq!(c.error_class, Some(ErrorClass::Timeout));
    // Timeouts are transient: every attempt was used.
    assert_eq!(c.attempts_used, 3);
    assert_eq!(slow.calls(), 3);

    let o = &results["openai"];
    assert!(o.success);
    assert_eq!(o.attempts_used, 1);

    let text = synthesize(&results);
    assert!(text.contains("Research from openai"));
    assert!(!text.contains("claude"));
}

#[tokio::test(start_paused = true)]
async fn auth_errors_are_not_retried() {
    let p = failing("openai", ProviderError::Auth("http 401".into()));
    let ex = executor_with(vec![p.clone()], BreakerConfig::default(), clock());
    let results = ex.research("q?", "general", &Shutdown::never()).await.unwrap();
    assert_eq!(p.calls(), 1);
    assert_eq!(results["openai"].attempts_used, 1);
    assert_eq!(results["openai"].error_class, Some(ErrorClass::Auth));
}

#[tokio::test(start_paused = true)]
async fn rate_limits_are_retried_up_to_budget() {
    let p = failing("openai", ProviderError::RateLimit("http 429".into()));
    let ex = executor_with(vec![p.clone()], BreakerConfig::default(), clock());
    let started = tokio::time::Instant::now();
    let results = ex.research("q?", "general", &Shutdown::never()).await.unwrap();
    assert_eq!(p.calls(), 3);
    assert_eq!(results["openai"].attempts_used, 3);
    // Two backoffs from a 10s base: at least 7.5s + 15s with -25% jitter.
    assert!(started.elapsed() >= Duration::from_millis(22_500));
}

#[tokio::test(start_paused = true)]
async fn transient_failure_recovers_on_retry() {
    let p = Arc::new(
        MockProvider::new("openai")
            .with_script([MockOutcome::Err(ProviderError::Connection("reset".into()))]),
    );
    let ex = executor_with(vec![p.clone()], BreakerConfig::default(), clock());
    let results = ex.research("q?", "general", &Shutdown::never()).await.unwrap();
    assert!(results["openai"].success);
    assert_eq!(results["openai"].attempts_used, 2);
}

#[tokio::test(start_paused = true)]
async fn breaker_skips_then_admits_single_trial() {
    let clock = clock();
    let p = Arc::new(
        MockProvider::new("openai").with_script([
            MockOutcome::Err(ProviderError::Other("boom".into())),
            MockOutcome::Err(ProviderError::Other("boom".into())),
        ]),
    );
    let cfg = BreakerConfig {
        failure_threshold: 2,
        recovery_timeout: chrono::Duration::seconds(60),
    };
    let ex = executor_with(vec![p.clone()], cfg, clock.clone());
    let sd = Shutdown::never();

    ex.research("q?", "general", &sd).await.unwrap();
    ex.research("q?", "general", &sd).await.unwrap();
    assert_eq!(p.calls(), 2);
    let b = ex.breakers().get("openai").unwrap();
    assert_eq!(b.snapshot().state, BreakerState::Open);

    // Open: skipped without a network attempt.
    let r = ex.research("q?", "general", &sd).await.unwrap();
    assert_eq!(p.calls(), 2);
    assert_eq!(r["openai"].error_class, Some(ErrorClass::CircuitOpen));
    assert_eq!(r["openai"].attempts_used, 0);
    // Skips do not count as failures.
    assert_eq!(b.snapshot().consecutive_failures, 2);

    // After the recovery timeout: one trial, which succeeds and closes the circuit.
    clock.advance(chrono::Duration::seconds(60));
    let r = ex.research("q?", "general", &sd).await.unwrap();
    assert!(r["openai"].success);
    assert_eq!(p.calls(), 3);
    assert_eq!(b.snapshot().state, BreakerState::Closed);
}

#[tokio::test(start_paused = true)]
async fn slow_provider_does_not_delay_others_beyond_its_timeout() {
    let slow = Arc::new(MockProvider::new("slow").with_latency(Duration::from_secs(30)));
    let fast = Arc::new(MockProvider::new("fast"));
    let ex = executor_with(vec![slow, fast], BreakerConfig::default(), clock());
    let started = tokio::time::Instant::now();
    let results = ex.research("q?", "general", &Shutdown::never()).await.unwrap();
    assert!(results.values().all(|r| r.success));
    // Concurrent, not sequential: total is the slowest, not the sum.
    assert!(started.elapsed() < Duration::from_secs(31));
    assert!(results["fast"].elapsed_ms < results["slow"].elapsed_ms);
}

struct PanickingProvider;

#[async_trait::async_trait]
impl ResearchProvider for PanickingProvider {
    fn name(&self) -> &str {
        "buggy"
    }

    async fn call(&self, _prompt: &str, _category: &str) -> Result<String, ProviderError> {
        panic!("provider bug");
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_trial_call_does_not_wedge_breaker() {
    let clock = clock();
    let cfg = BreakerConfig {
        failure_threshold: 1,
        recovery_timeout: chrono::Duration::seconds(60),
    };
    let ex = executor_with(vec![Arc::new(PanickingProvider)], cfg, clock.clone());
    let b = ex.breakers().get("buggy").unwrap();
    b.record_failure();
    assert_eq!(b.snapshot().state, BreakerState::Open);

    clock.advance(chrono::Duration::seconds(60));
    let r = ex.research("q?", "general", &Shutdown::never()).await.unwrap();
    assert!(!r["buggy"].success);
    assert_eq!(r["buggy"].error.as_deref(), Some("task did not complete"));

    // The trial slot was given back during unwinding: the next caller gets it.
    assert_eq!(b.snapshot().state, BreakerState::HalfOpen);
    assert_eq!(b.try_acquire(), Permit::Trial);
}
