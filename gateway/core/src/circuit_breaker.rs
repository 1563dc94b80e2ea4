// Copyright 2023, The Weavegate Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! Rolling-window circuit breaker for degradable read paths.
//!
//! An open circuit answers `None` immediately, before the call is dispatched anywhere, so a
//! struggling backend sheds load instead of queueing it. After `reset_timeout` one probe call is
//! let through; its outcome decides between closing and re-opening.

use std::{collections::VecDeque, sync::Mutex};

use log::*;
use tokio::time::{timeout, Duration, Instant};

const LOG_TARGET: &str = "wg::circuit_breaker";

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Per-call budget; an overrun counts as a failure.
    pub call_timeout: Duration,
    /// Percentage of failures within the rolling window that opens the circuit.
    pub error_threshold_percentage: u8,
    /// Width of the rolling outcome window.
    pub rolling_window: Duration,
    /// Minimum calls in the window before the error rate is meaningful.
    pub minimum_call_count: usize,
    /// How long the circuit stays open before a probe is allowed.
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(3),
            error_threshold_percentage: 50,
            rolling_window: Duration::from_secs(5),
            minimum_call_count: 5,
            reset_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitState {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    outcomes: VecDeque<(Instant, bool)>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: CircuitBreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                outcomes: VecDeque::new(),
            }),
        }
    }

    /// Run `fut` under the breaker. Returns `None` when the circuit is open, the call times out, or
    /// the call fails; the caller treats all three as "the value is unavailable right now".
    pub async fn call<T, E, F>(&self, fut: F) -> Option<T>
    where
        F: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if !self.try_acquire() {
            return None;
        }
        match timeout(self.config.call_timeout, fut).await {
            Ok(Ok(value)) => {
                self.record(true);
                Some(value)
            },
            Ok(Err(e)) => {
                debug!(target: LOG_TARGET, "{} call failed: {}", self.name, e);
                self.record(false);
                None
            },
            Err(_) => {
                debug!(
                    target: LOG_TARGET,
                    "{} call exceeded {:?}", self.name, self.config.call_timeout
                );
                self.record(false);
                None
            },
        }
    }

    pub fn is_open(&self) -> bool {
        let inner = self.inner.lock().expect("circuit breaker lock poisoned");
        matches!(inner.state, CircuitState::Open { .. })
    }

    fn try_acquire(&self) -> bool {
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open { until } => {
                if Instant::now() >= until {
                    debug!(target: LOG_TARGET, "{} half-open, probing", self.name);
                    inner.state = CircuitState::HalfOpen;
                    true
                } else {
                    false
                }
            },
        }
    }

    fn record(&self, ok: bool) {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("circuit breaker lock poisoned");

        match inner.state {
            CircuitState::HalfOpen => {
                if ok {
                    info!(target: LOG_TARGET, "{} recovered, closing circuit", self.name);
                    inner.state = CircuitState::Closed;
                    inner.outcomes.clear();
                } else {
                    inner.state = CircuitState::Open {
                        until: now + self.config.reset_timeout,
                    };
                }
                return;
            },
            CircuitState::Open { .. } => return,
            CircuitState::Closed => {},
        }

        inner.outcomes.push_back((now, ok));
        if let Some(horizon) = now.checked_sub(self.config.rolling_window) {
            while inner.outcomes.front().map(|(at, _)| *at < horizon).unwrap_or(false) {
                inner.outcomes.pop_front();
            }
        }

        let total = inner.outcomes.len();
        if total < self.config.minimum_call_count {
            return;
        }
        let failures = inner.outcomes.iter().filter(|(_, ok)| !ok).count();
        if failures * 100 >= total * self.config.error_threshold_percentage as usize {
            warn!(
                target: LOG_TARGET,
                "{} opened: {}/{} calls failed within {:?}",
                self.name,
                failures,
                total,
                self.config.rolling_window
            );
            inner.state = CircuitState::Open {
                until: now + self.config.reset_timeout,
            };
            inner.outcomes.clear();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn quick_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            call_timeout: Duration::from_millis(100),
            error_threshold_percentage: 50,
            rolling_window: Duration::from_secs(5),
            minimum_call_count: 4,
            reset_timeout: Duration::from_secs(10),
        }
    }

    async fn failing(breaker: &CircuitBreaker) -> Option<u32> {
        breaker.call(async { Err::<u32, _>("nope") }).await
    }

    async fn succeeding(breaker: &CircuitBreaker) -> Option<u32> {
        breaker.call(async { Ok::<_, &str>(1) }).await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_at_error_threshold() {
        let breaker = CircuitBreaker::new("test", quick_config());
        assert_eq!(succeeding(&breaker).await, Some(1));
        assert_eq!(succeeding(&breaker).await, Some(1));
        assert!(failing(&breaker).await.is_none());
        assert!(!breaker.is_open());
        // Fourth call reaches minimum volume at a 50% failure rate
        assert!(failing(&breaker).await.is_none());
        assert!(breaker.is_open());
        // Open circuit short-circuits without running the future
        assert_eq!(succeeding(&breaker).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn probe_after_reset_timeout_closes_on_success() {
        let breaker = CircuitBreaker::new("test", quick_config());
        for _ in 0..4 {
            let _ = failing(&breaker).await;
        }
        assert!(breaker.is_open());
        tokio::time::advance(Duration::from_secs(11)).await;
        // Half-open probe succeeds and the circuit closes
        assert_eq!(succeeding(&breaker).await, Some(1));
        assert!(!breaker.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens() {
        let breaker = CircuitBreaker::new("test", quick_config());
        for _ in 0..4 {
            let _ = failing(&breaker).await;
        }
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(failing(&breaker).await.is_none());
        assert!(breaker.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new("test", quick_config());
        for _ in 0..4 {
            let slow = breaker.call(async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, &str>(1)
            });
            assert!(slow.await.is_none());
        }
        assert!(breaker.is_open());
    }
}
