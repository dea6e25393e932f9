//! Per-endpoint circuit breaker.
//!
//! Every action endpoint owns one breaker. Countable failures (timeouts,
//! transport errors, rejections, node disconnects) accumulate inside a
//! sliding window; crossing the threshold opens the circuit and removes
//! the endpoint from selection until a half-open probe succeeds.

use crate::config::CircuitBreakerConfig;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker state.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CircuitState {
    /// Normal operation, requests flow.
    Closed,
    /// Tripped, requests are rejected.
    Open,
    /// Probing: exactly one request is admitted to test recovery.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Countable failures inside the current window.
    failures: u32,
    window_started_at: Option<Instant>,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
    /// Set while the single half-open probe is outstanding.
    probe_in_flight: bool,
}

/// Per-endpoint failure state machine.
///
/// Transitions:
///
/// - **Closed → Open** when `max_failures` countable failures land inside
///   `window`.
/// - **Open → HalfOpen** at selection time once `half_open_timeout` has
///   elapsed; exactly one probe is admitted.
/// - **HalfOpen → Closed** on probe success; **HalfOpen → Open** (with a
///   fresh `opened_at`) on probe failure.
///
/// Admission is a two-step protocol: [`selectable`](Self::selectable) is
/// the side-effect-free filter used to build the candidate list, and
/// [`try_acquire`](Self::try_acquire) claims the slot for the chosen
/// endpoint (which is where the Open→HalfOpen transition and the probe
/// grant actually happen).
///
/// # Examples
///
/// ```rust
/// use swarmbus::circuit::{CircuitBreaker, CircuitState};
/// use swarmbus::CircuitBreakerConfig;
///
/// let breaker = CircuitBreaker::new(&CircuitBreakerConfig::default().with_max_failures(2));
/// assert_eq!(breaker.state(), CircuitState::Closed);
///
/// breaker.on_failure();
/// breaker.on_failure();
/// assert_eq!(breaker.state(), CircuitState::Open);
/// assert!(!breaker.try_acquire());
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    enabled: bool,
    max_failures: u32,
    window: Duration,
    half_open_timeout: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Creates a breaker from the broker's circuit configuration.
    #[must_use]
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_failures: config.max_failures,
            window: config.window,
            half_open_timeout: config.half_open_timeout,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                window_started_at: None,
                opened_at: None,
                last_failure_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Returns the current state.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Returns when the last countable failure was recorded.
    pub fn last_failure_at(&self) -> Option<Instant> {
        self.inner.lock().unwrap().last_failure_at
    }

    /// Side-effect-free availability check used to filter candidates.
    ///
    /// Open circuits become selectable once `half_open_timeout` has
    /// elapsed; the actual transition happens in
    /// [`try_acquire`](Self::try_acquire).
    pub fn selectable(&self) -> bool {
        if !self.enabled {
            return true;
        }
        let inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner
                .opened_at
                .is_some_and(|at| at.elapsed() >= self.half_open_timeout),
            CircuitState::HalfOpen => !inner.probe_in_flight,
        }
    }

    /// Claims admission for one request on the chosen endpoint.
    ///
    /// Returns `false` when the circuit is open (and not yet due for a
    /// probe) or when another probe is already outstanding. A `true`
    /// return from a non-closed state means the caller holds the single
    /// half-open probe.
    pub fn try_acquire(&self) -> bool {
        if !self.enabled {
            return true;
        }
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let due = inner
                    .opened_at
                    .is_some_and(|at| at.elapsed() >= self.half_open_timeout);
                if due {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Records a successful request.
    pub fn on_success(&self) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.failures = 0;
            inner.window_started_at = None;
            inner.opened_at = None;
        }
        inner.probe_in_flight = false;
    }

    /// Records a countable failure.
    ///
    /// Only failures for which
    /// [`BrokerError::counts_for_circuit`](crate::BrokerError::counts_for_circuit)
    /// holds should reach this method.
    pub fn on_failure(&self) {
        if !self.enabled {
            return;
        }
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        inner.last_failure_at = Some(now);
        match inner.state {
            CircuitState::Closed => {
                let window_expired = inner
                    .window_started_at
                    .map_or(true, |at| now.duration_since(at) > self.window);
                if window_expired {
                    inner.window_started_at = Some(now);
                    inner.failures = 1;
                } else {
                    inner.failures += 1;
                }
                if inner.failures >= self.max_failures {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(now);
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.probe_in_flight = false;
            }
            // A straggling failure from a request admitted before the
            // circuit opened; the open timer is not extended.
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(max_failures: u32, half_open_timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            &CircuitBreakerConfig::default()
                .with_max_failures(max_failures)
                .with_half_open_timeout(half_open_timeout),
        )
    }

    #[test]
    fn test_opens_at_threshold() {
        let b = breaker(3, Duration::from_secs(10));
        b.on_failure();
        b.on_failure();
        assert_eq!(b.state(), CircuitState::Closed);
        b.on_failure();
        assert_eq!(b.state(), CircuitState::Open);
        assert!(!b.selectable());
        assert!(!b.try_acquire());
    }

    #[test]
    fn test_half_open_single_probe() {
        let b = breaker(1, Duration::from_millis(0));
        b.on_failure();
        assert_eq!(b.state(), CircuitState::Open);

        // Timeout of zero: the next acquire becomes the probe.
        assert!(b.try_acquire());
        assert_eq!(b.state(), CircuitState::HalfOpen);
        // Second concurrent selector is refused while the probe is out.
        assert!(!b.try_acquire());
    }

    #[test]
    fn test_probe_success_closes() {
        let b = breaker(1, Duration::from_millis(0));
        b.on_failure();
        assert!(b.try_acquire());
        b.on_success();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.try_acquire());
    }

    #[test]
    fn test_probe_failure_reopens() {
        let b = breaker(1, Duration::from_millis(0));
        b.on_failure();
        assert!(b.try_acquire());
        b.on_failure();
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn test_open_not_selectable_before_timeout() {
        let b = breaker(1, Duration::from_secs(60));
        b.on_failure();
        assert!(!b.selectable());
        assert!(!b.try_acquire());
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn test_disabled_breaker_never_trips() {
        let b = CircuitBreaker::new(
            &CircuitBreakerConfig::default()
                .with_enabled(false)
                .with_max_failures(1),
        );
        b.on_failure();
        b.on_failure();
        assert_eq!(b.state(), CircuitState::Closed);
        assert!(b.try_acquire());
    }

    #[test]
    fn test_success_in_closed_keeps_window_counting() {
        let b = breaker(2, Duration::from_secs(10));
        b.on_failure();
        b.on_success();
        // Window counting, not consecutive counting: the earlier failure
        // still counts inside the window.
        b.on_failure();
        assert_eq!(b.state(), CircuitState::Open);
    }
}
