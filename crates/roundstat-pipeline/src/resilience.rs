//! Timeout, retry and circuit breaker around one batch write.
//!
//! The [`ResiliencePipeline`] composes three strategies, outermost first:
//!
//! ```text
//! retry (exponential backoff + jitter)
//!   -> circuit breaker (checked per attempt)
//!        -> timeout (per attempt)
//!             -> BatchWriter::write
//! ```
//!
//! The breaker is failure-ratio based: it opens when, over the sampling
//! window, at least `minimum_throughput` calls completed and the share of
//! failures reached `failure_ratio`. After `break_duration` it lets a single
//! probe through (half-open); the probe's outcome closes or re-opens it.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use roundstat_core::config::ResilienceConfig;
use tokio::time::Instant;

use crate::health::HealthCounters;
use crate::sink::WriteError;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected until the break duration elapses.
    Open,
    /// One probe call is allowed to test recovery.
    HalfOpen,
}

impl CircuitState {
    pub(crate) const fn as_u8(self) -> u8 {
        match self {
            Self::Closed => 0,
            Self::Open => 1,
            Self::HalfOpen => 2,
        }
    }

    pub(crate) const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Open,
            2 => Self::HalfOpen,
            _ => Self::Closed,
        }
    }

    /// Label for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

// =============================================================================
// Retry
// =============================================================================

/// Exponential backoff with jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Random spread as a fraction of the delay, in `[0, 1]`.
    pub jitter_ratio: f64,
}

impl RetryPolicy {
    /// Build from configuration, clamping out-of-range values.
    pub fn from_config(config: &ResilienceConfig) -> Self {
        let jitter_ratio = if config.jitter_ratio.is_finite() {
            config.jitter_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter_ratio,
        }
    }

    /// Un-jittered delay after failed attempt `attempt` (1-based):
    /// `base * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(exponent))
            .min(self.max_delay)
    }

    /// [`RetryPolicy::backoff`] spread by up to `jitter_ratio` either way.
    pub fn jittered_backoff(&self, attempt: u32) -> Duration {
        let delay = self.backoff(attempt);
        if self.jitter_ratio <= 0.0 {
            return delay;
        }
        let spread = rand::rng().random_range(-self.jitter_ratio..=self.jitter_ratio);
        Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + spread))
            .unwrap_or(delay)
            .min(self.max_delay)
    }
}

// =============================================================================
// Circuit Breaker
// =============================================================================

/// Circuit breaker thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerPolicy {
    /// Failure share that opens the circuit.
    pub failure_ratio: f64,
    /// How far back outcomes are considered.
    pub sampling_window: Duration,
    /// Outcomes needed in the window before the ratio counts.
    pub minimum_throughput: u32,
    /// How long the circuit stays open before a probe.
    pub break_duration: Duration,
}

impl BreakerPolicy {
    /// Build from configuration.
    pub fn from_config(config: &ResilienceConfig) -> Self {
        Self {
            failure_ratio: config.failure_ratio,
            sampling_window: Duration::from_millis(config.sampling_window_ms),
            minimum_throughput: config.minimum_throughput.max(1),
            break_duration: Duration::from_millis(config.break_duration_ms),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Completion time and success of recent calls, oldest first.
    outcomes: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Failure-ratio circuit breaker.
///
/// Shared by every concurrent write of the worker; state changes are
/// serialized through one short mutex section and reported to the health
/// counters.
#[derive(Debug)]
pub struct CircuitBreaker {
    policy: BreakerPolicy,
    inner: Mutex<BreakerInner>,
    health: Arc<HealthCounters>,
}

impl CircuitBreaker {
    /// A closed breaker.
    pub fn new(policy: BreakerPolicy, health: Arc<HealthCounters>) -> Self {
        Self {
            policy,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                outcomes: VecDeque::new(),
                opened_at: None,
                probe_in_flight: false,
            }),
            health,
        }
    }

    /// Current state (an open breaker past its break duration still reports
    /// open until the next call asks for permission).
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Ask to run a call. `false` means the call must not run.
    pub fn try_acquire(&self) -> bool {
        self.admit().is_some()
    }

    /// Admit a call, reporting whether it is the half-open probe.
    fn admit(&self) -> Option<bool> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Some(false),
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    None
                } else {
                    inner.probe_in_flight = true;
                    Some(true)
                }
            }
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map_or(Duration::MAX, |opened| opened.elapsed());
                if elapsed < self.policy.break_duration {
                    return None;
                }
                inner.probe_in_flight = true;
                self.transition(&mut inner, CircuitState::HalfOpen);
                Some(true)
            }
        }
    }

    fn permit(&self) -> Option<Permit<'_>> {
        self.admit().map(|probe| Permit {
            breaker: self,
            probe,
            settled: false,
        })
    }

    /// Free the probe slot of a half-open call that never reported back.
    fn release_probe(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen && inner.probe_in_flight {
            inner.probe_in_flight = false;
            tracing::warn!("half-open probe cancelled; the next call probes again");
        }
    }

    /// Report the outcome of a call that [`CircuitBreaker::try_acquire`]
    /// allowed.
    pub fn record(&self, success: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                if success {
                    inner.outcomes.clear();
                    inner.opened_at = None;
                    self.transition(&mut inner, CircuitState::Closed);
                } else {
                    inner.opened_at = Some(now);
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::Closed => {
                inner.outcomes.push_back((now, success));
                let window = self.policy.sampling_window;
                while inner
                    .outcomes
                    .front()
                    .is_some_and(|(at, _)| now.saturating_duration_since(*at) > window)
                {
                    inner.outcomes.pop_front();
                }
                if self.should_open(&inner.outcomes) {
                    inner.outcomes.clear();
                    inner.opened_at = Some(now);
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            // A call that started before the circuit opened.
            CircuitState::Open => {}
        }
    }

    fn should_open(&self, outcomes: &VecDeque<(Instant, bool)>) -> bool {
        let total = u32::try_from(outcomes.len()).unwrap_or(u32::MAX);
        if total < self.policy.minimum_throughput {
            return false;
        }
        let failures = u32::try_from(outcomes.iter().filter(|(_, ok)| !ok).count())
            .unwrap_or(u32::MAX);
        f64::from(failures) / f64::from(total) >= self.policy.failure_ratio
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = inner.state;
        inner.state = to;
        self.health.record_transition(to);
        match to {
            CircuitState::Open => tracing::error!(
                from = from.as_str(),
                break_ms = u64::try_from(self.policy.break_duration.as_millis()).unwrap_or(u64::MAX),
                "circuit opened; persistence writes suspended"
            ),
            CircuitState::HalfOpen => tracing::info!("circuit half-open; probing storage"),
            CircuitState::Closed => tracing::info!("circuit closed; persistence resumed"),
        }
    }
}

/// One admitted call. A probe dropped before its outcome is recorded (the
/// write future was cancelled) hands the probe slot back.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl Permit<'_> {
    fn settle(mut self, success: bool) {
        self.settled = true;
        self.breaker.record(success);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.probe && !self.settled {
            self.breaker.release_probe();
        }
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Retry around breaker around timeout.
#[derive(Debug)]
pub struct ResiliencePipeline {
    retry: RetryPolicy,
    timeout: Duration,
    breaker: CircuitBreaker,
}

impl ResiliencePipeline {
    /// Assemble a pipeline from its parts.
    pub const fn new(retry: RetryPolicy, timeout: Duration, breaker: CircuitBreaker) -> Self {
        Self {
            retry,
            timeout,
            breaker,
        }
    }

    /// Build a pipeline from configuration.
    pub fn from_config(config: &ResilienceConfig, health: Arc<HealthCounters>) -> Self {
        Self::new(
            RetryPolicy::from_config(config),
            Duration::from_millis(config.timeout_ms),
            CircuitBreaker::new(BreakerPolicy::from_config(config), health),
        )
    }

    /// The shared circuit breaker.
    pub const fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run `op` under the policy.
    ///
    /// Transient failures (including timeouts) are retried; permanent
    /// failures return immediately. Only transient failures count against
    /// the breaker: a constraint violation says nothing about the health of
    /// the database.
    ///
    /// # Errors
    ///
    /// Returns [`WriteError::CircuitOpen`] when the breaker refuses an
    /// attempt, the permanent error as-is, or the last transient error once
    /// attempts run out.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, WriteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, WriteError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let Some(permit) = self.breaker.permit() else {
                return Err(WriteError::CircuitOpen);
            };

            let result = match tokio::time::timeout(self.timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(WriteError::Transient(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                ))),
            };
            permit.settle(!matches!(result, Err(WriteError::Transient(_))));

            match result {
                Err(WriteError::Transient(reason)) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.jittered_backoff(attempt);
                    tracing::warn!(
                        group = label,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        reason = %reason,
                        "batch write failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn config() -> ResilienceConfig {
        ResilienceConfig {
            timeout_ms: 100,
            max_attempts: 3,
            base_delay_ms: 10,
            max_delay_ms: 50,
            jitter_ratio: 0.0,
            failure_ratio: 0.5,
            sampling_window_ms: 1000,
            minimum_throughput: 4,
            break_duration_ms: 500,
        }
    }

    fn breaker(health: &Arc<HealthCounters>) -> CircuitBreaker {
        CircuitBreaker::new(BreakerPolicy::from_config(&config()), Arc::clone(health))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let retry = RetryPolicy::from_config(&config());
        assert_eq!(retry.backoff(1), Duration::from_millis(10));
        assert_eq!(retry.backoff(2), Duration::from_millis(20));
        assert_eq!(retry.backoff(3), Duration::from_millis(40));
        assert_eq!(retry.backoff(4), Duration::from_millis(50));
        assert_eq!(retry.backoff(u32::MAX), Duration::from_millis(50));
    }

    #[test]
    fn jitter_stays_within_ratio() {
        let retry = RetryPolicy {
            jitter_ratio: 0.2,
            max_delay: Duration::from_secs(10),
            ..RetryPolicy::from_config(&config())
        };
        for _ in 0..200 {
            let delay = retry.jittered_backoff(2);
            assert!(delay >= Duration::from_millis(16), "{delay:?}");
            assert!(delay <= Duration::from_millis(24), "{delay:?}");
        }
    }

    #[test]
    fn invalid_jitter_is_clamped() {
        let cfg = ResilienceConfig {
            jitter_ratio: f64::NAN,
            max_attempts: 0,
            ..config()
        };
        let retry = RetryPolicy::from_config(&cfg);
        assert!(retry.jitter_ratio.abs() < f64::EPSILON);
        assert_eq!(retry.max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_needs_minimum_throughput() {
        let health = Arc::new(HealthCounters::new());
        let cb = breaker(&health);
        for _ in 0..3 {
            assert!(cb.try_acquire());
            cb.record(false);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.try_acquire());
        cb.record(false);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());
        assert_eq!(health.snapshot().circuit_opened, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_ignores_outcomes_outside_window() {
        let health = Arc::new(HealthCounters::new());
        let cb = breaker(&health);
        for _ in 0..3 {
            cb.record(false);
        }
        tokio::time::advance(Duration::from_millis(1500)).await;
        cb.record(false);
        cb.record(true);
        cb.record(true);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_single_probe() {
        let health = Arc::new(HealthCounters::new());
        let cb = breaker(&health);
        for _ in 0..4 {
            cb.record(false);
        }
        assert_eq!(cb.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_millis(499)).await;
        assert!(!cb.try_acquire());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cb.try_acquire());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.try_acquire());

        cb.record(true);
        assert_eq!(cb.state(), CircuitState::Closed);
        let snap = health.snapshot();
        assert_eq!(snap.circuit_half_opened, 1);
        assert_eq!(snap.circuit_closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens() {
        let health = Arc::new(HealthCounters::new());
        let cb = breaker(&health);
        for _ in 0..4 {
            cb.record(false);
        }
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(cb.try_acquire());
        cb.record(false);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());
        assert_eq!(health.snapshot().circuit_opened, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_probe_frees_the_half_open_slot() {
        let health = Arc::new(HealthCounters::new());
        let pipeline = ResiliencePipeline::from_config(&config(), health);
        for _ in 0..4 {
            pipeline.breaker().record(false);
        }
        tokio::time::advance(Duration::from_millis(500)).await;

        let cut_short = tokio::time::timeout(
            Duration::from_millis(10),
            pipeline.execute("test", || async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(1_u64)
            }),
        )
        .await;
        assert!(cut_short.is_err());

        assert_eq!(pipeline.breaker().state(), CircuitState::HalfOpen);
        let result = pipeline.execute("test", || async { Ok(2_u64) }).await;
        assert_eq!(result, Ok(2));
        assert_eq!(pipeline.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn settled_probe_is_not_released_twice() {
        let health = Arc::new(HealthCounters::new());
        let cb = breaker(&health);
        for _ in 0..4 {
            cb.record(false);
        }
        tokio::time::advance(Duration::from_millis(500)).await;
        let permit = cb.permit().unwrap();
        assert!(permit.probe);
        permit.settle(false);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.try_acquire());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let health = Arc::new(HealthCounters::new());
        let pipeline = ResiliencePipeline::from_config(&config(), health);
        let calls = AtomicU32::new(0);

        let result = pipeline
            .execute("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(WriteError::Transient("connection reset".to_owned()))
                } else {
                    Ok(7_u64)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let health = Arc::new(HealthCounters::new());
        let pipeline = ResiliencePipeline::from_config(&config(), health);
        let calls = AtomicU32::new(0);

        let result: Result<u64, _> = pipeline
            .execute("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(WriteError::Permanent("check constraint".to_owned()))
            })
            .await;

        assert!(matches!(result, Err(WriteError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(pipeline.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempts_time_out_and_exhaust_retries() {
        let health = Arc::new(HealthCounters::new());
        let pipeline = ResiliencePipeline::from_config(&config(), health);
        let calls = AtomicU32::new(0);

        let result: Result<u64, _> = pipeline
            .execute("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(1)
            })
            .await;

        assert!(matches!(result, Err(WriteError::Transient(ref r)) if r.contains("timed out")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn open_circuit_short_circuits_calls() {
        let health = Arc::new(HealthCounters::new());
        let pipeline = ResiliencePipeline::from_config(&config(), health);
        for _ in 0..4 {
            pipeline.breaker().record(false);
        }
        let calls = AtomicU32::new(0);
        let result: Result<u64, _> = pipeline
            .execute("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            })
            .await;
        assert_eq!(result, Err(WriteError::CircuitOpen));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
