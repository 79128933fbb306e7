//! Circuit breaker for outbound dependencies
//!
//! Three-state gate (closed / open / half-open) protecting storage calls.
//! Every request captures the current generation before executing; a
//! completion whose generation has since advanced is dropped, so a request
//! that started under one state can never mutate the counts of another.

use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::errors::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        };
        write!(f, "{}", s)
    }
}

/// Request/outcome counters for the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests += 1;
    }

    fn on_success(&mut self) {
        self.total_successes += 1;
        self.consecutive_successes += 1;
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures += 1;
        self.consecutive_failures += 1;
        self.consecutive_successes = 0;
    }

    fn clear(&mut self) {
        *self = Counts::default();
    }
}

type TripFn = Box<dyn Fn(Counts) -> bool + Send + Sync>;
type SuccessFn = Box<dyn Fn(&LedgerError) -> bool + Send + Sync>;
type StateChangeFn = Box<dyn Fn(&str, State, State) + Send + Sync>;

/// Breaker configuration. Zero / unset values fall back to the defaults:
/// `max_requests = 1`, `interval = 60s`, `timeout = 60s`, trip after more
/// than 5 consecutive failures.
pub struct Settings {
    pub name: String,
    pub max_requests: u32,
    pub interval: Duration,
    pub timeout: Duration,
    pub ready_to_trip: Option<TripFn>,
    /// Whether an error still counts as a healthy dependency. Domain
    /// rejections (insufficient funds, validation) default to true.
    pub is_successful: Option<SuccessFn>,
    pub on_state_change: Option<StateChangeFn>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            name: String::new(),
            max_requests: 0,
            interval: Duration::ZERO,
            timeout: Duration::ZERO,
            ready_to_trip: None,
            is_successful: None,
            on_state_change: None,
        }
    }
}

struct Inner {
    state: State,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

pub struct CircuitBreaker {
    name: String,
    max_requests: u32,
    interval: Duration,
    timeout: Duration,
    ready_to_trip: TripFn,
    is_successful: SuccessFn,
    on_state_change: Option<StateChangeFn>,

    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(settings: Settings) -> Self {
        let max_requests = if settings.max_requests == 0 {
            1
        } else {
            settings.max_requests
        };
        let interval = if settings.interval.is_zero() {
            Duration::from_secs(60)
        } else {
            settings.interval
        };
        let timeout = if settings.timeout.is_zero() {
            Duration::from_secs(60)
        } else {
            settings.timeout
        };
        let ready_to_trip = settings
            .ready_to_trip
            .unwrap_or_else(|| Box::new(|counts: Counts| counts.consecutive_failures > 5));
        let is_successful = settings
            .is_successful
            .unwrap_or_else(|| Box::new(|err: &LedgerError| err.is_domain_rejection()));

        let cb = Self {
            name: settings.name,
            max_requests,
            interval,
            timeout,
            ready_to_trip,
            is_successful,
            on_state_change: settings.on_state_change,
            inner: Mutex::new(Inner {
                state: State::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry: None,
            }),
        };

        {
            let mut inner = cb.inner.lock().unwrap();
            cb.to_new_generation(&mut inner, Instant::now());
        }

        cb
    }

    /// Run `op` through the breaker. While open, fails immediately with
    /// `CircuitBreakerOpen`; while half-open beyond `max_requests` probes,
    /// fails with `TooManyRequests`.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, LedgerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let generation = self.before_request()?;

        let result = op().await;

        let success = match &result {
            Ok(_) => true,
            Err(err) => (self.is_successful)(err),
        };
        self.after_request(generation, success);

        result
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> State {
        let mut inner = self.inner.lock().unwrap();
        self.current_state(&mut inner, Instant::now()).0
    }

    pub fn counts(&self) -> Counts {
        self.inner.lock().unwrap().counts
    }

    fn before_request(&self) -> Result<u64, LedgerError> {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let (state, generation) = self.current_state(&mut inner, now);

        if state == State::Open {
            return Err(LedgerError::CircuitBreakerOpen);
        }
        if state == State::HalfOpen && inner.counts.requests >= self.max_requests {
            return Err(LedgerError::TooManyRequests);
        }

        inner.counts.on_request();
        Ok(generation)
    }

    fn after_request(&self, before: u64, success: bool) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let (state, generation) = self.current_state(&mut inner, now);
        if generation != before {
            // Stale completion from a previous generation.
            return;
        }

        if success {
            self.on_success(&mut inner, state, now);
        } else {
            self.on_failure(&mut inner, state, now);
        }
    }

    fn on_success(&self, inner: &mut Inner, state: State, now: Instant) {
        inner.counts.on_success();

        if state == State::HalfOpen && inner.counts.consecutive_successes >= self.max_requests {
            self.set_state(inner, State::Closed, now);
        }
    }

    fn on_failure(&self, inner: &mut Inner, state: State, now: Instant) {
        inner.counts.on_failure();

        match state {
            State::Closed => {
                if (self.ready_to_trip)(inner.counts) {
                    self.set_state(inner, State::Open, now);
                }
            }
            State::HalfOpen => {
                self.set_state(inner, State::Open, now);
            }
            State::Open => {}
        }
    }

    fn current_state(&self, inner: &mut Inner, now: Instant) -> (State, u64) {
        match inner.state {
            State::Closed => {
                if let Some(expiry) = inner.expiry
                    && expiry <= now
                {
                    self.to_new_generation(inner, now);
                }
            }
            State::Open => {
                if let Some(expiry) = inner.expiry
                    && expiry <= now
                {
                    self.set_state(inner, State::HalfOpen, now);
                }
            }
            State::HalfOpen => {}
        }
        (inner.state, inner.generation)
    }

    fn set_state(&self, inner: &mut Inner, state: State, now: Instant) {
        if inner.state == state {
            return;
        }

        let prev = inner.state;
        inner.state = state;

        self.to_new_generation(inner, now);

        if let Some(callback) = &self.on_state_change {
            callback(&self.name, prev, state);
        }
        tracing::info!(
            breaker = %self.name,
            from = %prev,
            to = %state,
            "Circuit breaker state changed"
        );
    }

    fn to_new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation += 1;
        inner.counts.clear();

        inner.expiry = match inner.state {
            State::Closed => Some(now + self.interval),
            State::Open => Some(now + self.timeout),
            State::HalfOpen => None,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_err() -> LedgerError {
        LedgerError::Storage(sqlx::Error::PoolClosed)
    }

    fn test_breaker(timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(Settings {
            name: "test".to_string(),
            timeout,
            ..Settings::default()
        })
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), LedgerError> {
        cb.call(|| async { Err::<(), _>(storage_err()) }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<(), LedgerError> {
        cb.call(|| async { Ok(()) }).await
    }

    #[tokio::test]
    async fn test_starts_closed_and_passes_through() {
        let cb = test_breaker(Duration::from_secs(60));
        assert_eq!(cb.state(), State::Closed);

        let result = cb.call(|| async { Ok::<_, LedgerError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(cb.counts().total_successes, 1);
    }

    #[tokio::test]
    async fn test_trips_open_on_sixth_consecutive_failure() {
        let cb = test_breaker(Duration::from_secs(60));

        for _ in 0..5 {
            let _ = fail(&cb).await;
            assert_eq!(cb.state(), State::Closed);
        }

        // Default trip threshold: consecutive_failures > 5
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), State::Open);
    }

    #[tokio::test]
    async fn test_open_rejects_without_invoking() {
        let cb = test_breaker(Duration::from_secs(60));
        for _ in 0..6 {
            let _ = fail(&cb).await;
        }

        let invoked = std::sync::atomic::AtomicBool::new(false);
        let result = cb
            .call(|| async {
                invoked.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, LedgerError>(())
            })
            .await;

        assert!(matches!(result, Err(LedgerError::CircuitBreakerOpen)));
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_half_open_probe_closes_on_success() {
        let cb = test_breaker(Duration::from_millis(20));
        for _ in 0..6 {
            let _ = fail(&cb).await;
        }
        assert_eq!(cb.state(), State::Open);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cb.state(), State::HalfOpen);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let cb = test_breaker(Duration::from_millis(20));
        for _ in 0..6 {
            let _ = fail(&cb).await;
        }

        tokio::time::sleep(Duration::from_millis(40)).await;
        let _ = fail(&cb).await;
        assert_eq!(cb.state(), State::Open);
    }

    #[tokio::test]
    async fn test_domain_rejection_does_not_trip() {
        let cb = test_breaker(Duration::from_secs(60));

        for _ in 0..20 {
            let _ = cb
                .call(|| async { Err::<(), _>(LedgerError::InsufficientFunds) })
                .await;
        }
        assert_eq!(cb.state(), State::Closed);
        assert_eq!(cb.counts().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_custom_trip_threshold() {
        let cb = CircuitBreaker::new(Settings {
            name: "custom".to_string(),
            ready_to_trip: Some(Box::new(|c| c.consecutive_failures > 2)),
            ..Settings::default()
        });

        for _ in 0..3 {
            let _ = fail(&cb).await;
        }
        assert_eq!(cb.state(), State::Open);
    }

    #[tokio::test]
    async fn test_state_change_callback() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};

        let transitions = Arc::new(AtomicUsize::new(0));
        let counter = transitions.clone();
        let cb = CircuitBreaker::new(Settings {
            name: "observed".to_string(),
            on_state_change: Some(Box::new(move |_, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
            ..Settings::default()
        });

        for _ in 0..6 {
            let _ = fail(&cb).await;
        }
        assert_eq!(transitions.load(Ordering::SeqCst), 1);
    }
}
