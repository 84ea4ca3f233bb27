//! Integration tests for Router
//!
//! These tests drive the Router through realistic multi-request scenarios:
//! fallback, breaker opening under a burst, half-open trials, stragglers
//! and abandoned requests.

use costroute_core::retry::{MAX_RETRY_AFTER, retry_delay};
use costroute_core::{
    Completion, Error, GenerationRequest, Provider, ProviderError, ProviderErrorKind, UsageRecord,
    UsageSink,
};
use costroute_routing::{
    Admission, CircuitBreakerConfig, CircuitState, ProviderDescriptor, ProviderRegistry, Router,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Barrier, Notify};

// Test provider that can be configured to succeed, fail, or wait
#[derive(Clone)]
struct TestProvider {
    id: String,
    should_fail: Arc<AtomicBool>,
    call_count: Arc<AtomicUsize>,
    /// Calls wait here until every expected caller has arrived
    barrier: Option<Arc<Barrier>>,
    /// Calls wait here until released by the test
    hold: Option<Arc<Notify>>,
}

impl TestProvider {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            should_fail: Arc::new(AtomicBool::new(false)),
            call_count: Arc::new(AtomicUsize::new(0)),
            barrier: None,
            hold: None,
        }
    }

    fn failing(id: &str) -> Self {
        let provider = Self::new(id);
        provider.set_should_fail(true);
        provider
    }

    fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.barrier = Some(barrier);
        self
    }

    fn with_hold(mut self, hold: Arc<Notify>) -> Self {
        self.hold = Some(hold);
        self
    }

    fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    fn get_call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Provider for TestProvider {
    async fn complete(
        &self,
        request: &GenerationRequest,
        _timeout: Duration,
    ) -> Result<Completion, ProviderError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if let Some(hold) = &self.hold {
            hold.notified().await;
        }

        if self.should_fail.load(Ordering::SeqCst) {
            return Err(ProviderError::new(
                ProviderErrorKind::TransientNetwork,
                format!("Provider {} failed", self.id),
            ));
        }

        Ok(Completion {
            text: format!("Response from {} to '{}'", self.id, request.prompt),
            prompt_tokens: 100,
            completion_tokens: 900,
        })
    }
}

/// Each call takes the next scripted step: wait for its gate, then succeed
/// or fail
struct ScriptedProvider {
    steps: Mutex<VecDeque<(Arc<Notify>, bool)>>,
    call_count: AtomicUsize,
}

impl ScriptedProvider {
    fn new(steps: Vec<(Arc<Notify>, bool)>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            call_count: AtomicUsize::new(0),
        })
    }

    fn get_call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    async fn complete(
        &self,
        _request: &GenerationRequest,
        _timeout: Duration,
    ) -> Result<Completion, ProviderError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front();
        let Some((gate, succeed)) = step else {
            return Err(ProviderError::other("no scripted step left"));
        };

        gate.notified().await;
        if succeed {
            Ok(Completion {
                text: "scripted".to_string(),
                prompt_tokens: 10,
                completion_tokens: 10,
            })
        } else {
            Err(ProviderError::new(
                ProviderErrorKind::TransientNetwork,
                "scripted failure",
            ))
        }
    }
}

/// Mimics a connector whose first try times out and whose retry, after
/// honoring the longest allowed Retry-After, answers just inside the
/// per-try timeout
struct SlowRetryProvider;

#[async_trait::async_trait]
impl Provider for SlowRetryProvider {
    async fn complete(
        &self,
        _request: &GenerationRequest,
        timeout: Duration,
    ) -> Result<Completion, ProviderError> {
        tokio::time::sleep(timeout).await;
        tokio::time::sleep(retry_delay(1, Some(MAX_RETRY_AFTER))).await;
        tokio::time::sleep(timeout.mul_f64(0.9)).await;
        Ok(Completion {
            text: "eventually".to_string(),
            prompt_tokens: 10,
            completion_tokens: 10,
        })
    }
}

#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<UsageRecord>>,
}

impl UsageSink for RecordingSink {
    fn emit(&self, record: &UsageRecord) {
        self.records.lock().unwrap().push(record.clone());
    }
}

impl RecordingSink {
    fn records(&self) -> Vec<UsageRecord> {
        self.records.lock().unwrap().clone()
    }

    fn for_provider(&self, id: &str) -> Vec<UsageRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.provider == id)
            .collect()
    }
}

fn build_router(
    entries: &[(&TestProvider, f64)],
    config: CircuitBreakerConfig,
) -> (Arc<Router>, Arc<RecordingSink>) {
    let descriptors: Vec<_> = entries
        .iter()
        .map(|(provider, cost)| ProviderDescriptor::new(provider.id.as_str(), *cost))
        .collect();
    let registry = ProviderRegistry::load(&descriptors).unwrap();

    let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
    for (provider, _) in entries {
        providers.insert(provider.id.clone(), Arc::new((*provider).clone()));
    }

    let sink = Arc::new(RecordingSink::default());
    let router = Router::new(registry, providers, config, sink.clone()).unwrap();
    (Arc::new(router), sink)
}

fn request() -> GenerationRequest {
    GenerationRequest::new("Explain circuit breakers")
}

#[tokio::test]
async fn test_fallback_skips_failed_and_never_reaches_third() {
    let a = TestProvider::failing("a");
    let b = TestProvider::new("b");
    let c = TestProvider::new("c");
    let (router, sink) = build_router(
        &[(&a, 1.0), (&b, 2.0), (&c, 3.0)],
        CircuitBreakerConfig::default(),
    );

    let outcome = router.generate(request()).await.unwrap();

    assert_eq!(outcome.provider_used, "b");
    assert!(outcome.response_text.starts_with("Response from b"));
    assert_eq!(outcome.prompt_tokens, 100);
    assert_eq!(outcome.completion_tokens, 900);
    assert_eq!(outcome.total_tokens, 1000);
    assert_eq!(outcome.cost, 2.0);

    assert_eq!(a.get_call_count(), 1);
    assert_eq!(b.get_call_count(), 1);
    assert_eq!(c.get_call_count(), 0);

    let a_records = sink.for_provider("a");
    assert_eq!(a_records.len(), 1);
    assert!(!a_records[0].success);
    let b_records = sink.for_provider("b");
    assert_eq!(b_records.len(), 1);
    assert!(b_records[0].success);
    assert!(sink.for_provider("c").is_empty());

    let health = router.health();
    assert_eq!(health.snapshot("a").unwrap().consecutive_failures, 1);
    assert_eq!(health.snapshot("b").unwrap().consecutive_failures, 0);
}

#[tokio::test]
async fn test_penalized_provider_moves_behind_pricier_one() {
    let a = TestProvider::failing("a");
    let b = TestProvider::new("b");
    let (router, _) = build_router(&[(&a, 1.0), (&b, 2.0)], CircuitBreakerConfig::default());

    router.generate(request()).await.unwrap();
    assert_eq!(a.get_call_count(), 1);

    // A recovered, but its recent failure keeps it behind B
    a.set_should_fail(false);
    let outcome = router.generate(request()).await.unwrap();
    assert_eq!(outcome.provider_used, "b");
    assert_eq!(a.get_call_count(), 1);
}

#[tokio::test]
async fn test_burst_of_failures_opens_breaker_for_next_request() {
    let barrier = Arc::new(Barrier::new(3));
    let a = TestProvider::failing("a").with_barrier(barrier);
    let b = TestProvider::new("b");
    let (router, sink) = build_router(&[(&a, 1.0), (&b, 2.0)], CircuitBreakerConfig::default());

    // Three concurrent requests all rank A first, all see it fail
    let burst = (0..3).map(|_| {
        let router = Arc::clone(&router);
        async move { router.generate(request()).await }
    });
    let results = futures::future::join_all(burst).await;
    for result in results {
        assert_eq!(result.unwrap().provider_used, "b");
    }

    assert_eq!(a.get_call_count(), 3);
    let a_health = router.health().snapshot("a").unwrap();
    assert_eq!(a_health.state, CircuitState::Open);
    assert_eq!(a_health.consecutive_failures, 3);

    // Fourth request goes straight to B
    let outcome = router.generate(request()).await.unwrap();
    assert_eq!(outcome.provider_used, "b");
    assert_eq!(a.get_call_count(), 3);
    assert_eq!(b.get_call_count(), 4);
    assert_eq!(sink.for_provider("a").len(), 3);
}

#[tokio::test]
async fn test_all_open_fails_without_attempts() {
    let a = TestProvider::failing("a");
    let (router, sink) = build_router(&[(&a, 1.0)], CircuitBreakerConfig::default());

    for _ in 0..3 {
        let err = router.generate(request()).await.unwrap_err();
        assert!(matches!(err, Error::AllProvidersFailed { .. }));
    }

    let err = router.generate(request()).await.unwrap_err();
    assert!(matches!(err, Error::AllProvidersUnavailable));
    assert_eq!(a.get_call_count(), 3);
    assert_eq!(sink.records().len(), 3);
}

#[tokio::test]
async fn test_half_open_admits_single_trial() {
    let hold = Arc::new(Notify::new());
    let a = TestProvider::new("a").with_hold(Arc::clone(&hold));
    let b = TestProvider::new("b");
    let (router, _) = build_router(
        &[(&a, 1.0), (&b, 2.0)],
        CircuitBreakerConfig {
            cooldown: Duration::ZERO,
            ..Default::default()
        },
    );

    // Open A and give B a recent failure so both are penalized and A stays first
    for _ in 0..3 {
        router.health().record("a", Admission::REGULAR, false);
    }
    router.health().record("b", Admission::REGULAR, false);
    assert_eq!(router.health().snapshot("a").unwrap().state, CircuitState::Open);

    let first = tokio::spawn({
        let router = Arc::clone(&router);
        async move { router.generate(request()).await }
    });
    while a.get_call_count() == 0 {
        tokio::task::yield_now().await;
    }

    // The trial is in flight, so the second request must not touch A
    let second = router.generate(request()).await;
    hold.notify_one();
    let first = first.await.unwrap();

    assert_eq!(first.unwrap().provider_used, "a");
    assert_eq!(second.unwrap().provider_used, "b");
    assert_eq!(a.get_call_count(), 1);

    let a_health = router.health().snapshot("a").unwrap();
    assert_eq!(a_health.state, CircuitState::Closed);
    assert_eq!(a_health.consecutive_failures, 0);
}

#[tokio::test]
async fn test_abandoned_request_still_records_outcome() {
    let hold = Arc::new(Notify::new());
    let a = TestProvider::failing("a").with_hold(Arc::clone(&hold));
    let (router, sink) = build_router(&[(&a, 1.0)], CircuitBreakerConfig::default());

    // Caller gives up while the provider call is in flight
    let abandoned = tokio::time::timeout(Duration::from_millis(50), router.generate(request())).await;
    assert!(abandoned.is_err());
    assert_eq!(a.get_call_count(), 1);
    assert!(sink.records().is_empty());

    hold.notify_one();
    for _ in 0..100 {
        if !sink.records().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let records = sink.for_provider("a");
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert_eq!(router.health().snapshot("a").unwrap().consecutive_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_after_cooldown() {
    let a = TestProvider::failing("a");
    let (router, _) = build_router(&[(&a, 1.0)], CircuitBreakerConfig::default());

    for _ in 0..3 {
        let _ = router.generate(request()).await;
    }
    assert!(matches!(
        router.generate(request()).await,
        Err(Error::AllProvidersUnavailable)
    ));

    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(matches!(
        router.generate(request()).await,
        Err(Error::AllProvidersUnavailable)
    ));

    tokio::time::advance(Duration::from_secs(1)).await;
    a.set_should_fail(false);
    let outcome = router.generate(request()).await.unwrap();
    assert_eq!(outcome.provider_used, "a");
    assert_eq!(a.get_call_count(), 4);
    assert_eq!(router.health().snapshot("a").unwrap().state, CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_failed_trial_reopens() {
    let a = TestProvider::failing("a");
    let (router, _) = build_router(&[(&a, 1.0)], CircuitBreakerConfig::default());

    for _ in 0..3 {
        let _ = router.generate(request()).await;
    }
    tokio::time::advance(Duration::from_secs(60)).await;

    let err = router.generate(request()).await.unwrap_err();
    assert!(matches!(err, Error::AllProvidersFailed { .. }));
    assert_eq!(a.get_call_count(), 4);
    assert_eq!(router.health().snapshot("a").unwrap().state, CircuitState::Open);

    // Cooldown restarted from the failed trial
    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(matches!(
        router.generate(request()).await,
        Err(Error::AllProvidersUnavailable)
    ));
    assert_eq!(a.get_call_count(), 4);
}

#[tokio::test]
async fn test_straggler_does_not_resolve_half_open_trial() {
    let straggler_gate = Arc::new(Notify::new());
    let trial_gate = Arc::new(Notify::new());
    let a = ScriptedProvider::new(vec![
        (Arc::clone(&straggler_gate), true),
        (Arc::clone(&trial_gate), false),
    ]);
    let b = TestProvider::new("b");

    let registry = ProviderRegistry::load(&[
        ProviderDescriptor::new("a", 1.0),
        ProviderDescriptor::new("b", 2.0),
    ])
    .unwrap();
    let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
    providers.insert("a".to_string(), a.clone());
    providers.insert("b".to_string(), Arc::new(b.clone()));
    let config = CircuitBreakerConfig {
        cooldown: Duration::ZERO,
        ..Default::default()
    };
    let router = Arc::new(
        Router::new(registry, providers, config, Arc::new(RecordingSink::default())).unwrap(),
    );

    // Admitted while A is still closed, then held
    let straggler = tokio::spawn({
        let router = Arc::clone(&router);
        async move { router.generate(request()).await }
    });
    while a.get_call_count() < 1 {
        tokio::task::yield_now().await;
    }

    // Other requests open A meanwhile; B gets a failure too so A stays first
    for _ in 0..3 {
        router.health().record("a", Admission::REGULAR, false);
    }
    router.health().record("b", Admission::REGULAR, false);

    let trial = tokio::spawn({
        let router = Arc::clone(&router);
        async move { router.generate(request()).await }
    });
    while a.get_call_count() < 2 {
        tokio::task::yield_now().await;
    }
    assert_eq!(router.health().snapshot("a").unwrap().state, CircuitState::HalfOpen);

    // The straggler succeeds before the trial resolves
    straggler_gate.notify_one();
    assert_eq!(straggler.await.unwrap().unwrap().provider_used, "a");

    let a_health = router.health().snapshot("a").unwrap();
    assert_eq!(a_health.state, CircuitState::HalfOpen);
    assert!(a_health.trial_in_flight);

    // A is still gated on its trial, so new traffic goes elsewhere
    assert_eq!(router.generate(request()).await.unwrap().provider_used, "b");
    assert_eq!(a.get_call_count(), 2);

    // The trial itself decides the state
    trial_gate.notify_one();
    assert_eq!(trial.await.unwrap().unwrap().provider_used, "b");
    assert_eq!(router.health().snapshot("a").unwrap().state, CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_deadline_leaves_room_for_retry_wait() {
    let registry = ProviderRegistry::load(&[ProviderDescriptor::new("slow", 1.0)
        .with_timeout_secs(1)
        .with_max_retries(1)])
    .unwrap();
    let mut providers: HashMap<String, Arc<dyn Provider>> = HashMap::new();
    providers.insert("slow".to_string(), Arc::new(SlowRetryProvider));
    let sink = Arc::new(RecordingSink::default());
    let router = Router::with_defaults(registry, providers, sink.clone()).unwrap();

    let outcome = router.generate(request()).await.unwrap();

    assert_eq!(outcome.provider_used, "slow");
    assert_eq!(outcome.response_text, "eventually");
    let records = sink.for_provider("slow");
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
}
