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

//! Adaptive token bucket pacing outbound upstream requests.
//!
//! The bucket is refilled once per second with the current per-second rate. A 429 from upstream
//! both drains tokens and cuts the refill rate; the rate then creeps back towards its configured
//! ceiling at +0.2 per tick so a healthy upstream is probed gently rather than slammed.

use std::sync::Mutex;

use log::*;
use tokio::time::{sleep, Duration, Instant};

const LOG_TARGET: &str = "wg::chain::rate_limiter";

/// Refill-rate recovery per one-second tick.
const RATE_RECOVERY_PER_TICK: f64 = 0.2;
/// Bucket capacity as a multiple of the configured request rate.
const BUCKET_CAPACITY_SECS: f64 = 300.0;

#[derive(Debug)]
struct State {
    tokens: f64,
    rate: f64,
    last_tick: Instant,
}

#[derive(Debug)]
pub struct TokenBucket {
    max_rate: f64,
    capacity: f64,
    state: Mutex<State>,
}

impl TokenBucket {
    pub fn new(max_requests_per_second: f64) -> Self {
        let max_rate = max_requests_per_second.max(1.0);
        Self {
            max_rate,
            capacity: max_rate * BUCKET_CAPACITY_SECS,
            state: Mutex::new(State {
                tokens: max_rate,
                rate: max_rate,
                last_tick: Instant::now(),
            }),
        }
    }

    /// Apply every whole one-second tick since the last refill.
    fn refill(state: &mut State, max_rate: f64, capacity: f64) {
        let ticks = Instant::now().saturating_duration_since(state.last_tick).as_secs();
        if ticks == 0 {
            return;
        }
        state.tokens = (state.tokens + ticks as f64 * state.rate).min(capacity);
        state.rate = (state.rate + ticks as f64 * RATE_RECOVERY_PER_TICK).min(max_rate);
        state.last_tick += Duration::from_secs(ticks);
    }

    /// Take one token, waiting for refill ticks when the bucket is empty.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().expect("rate limiter lock poisoned");
                Self::refill(&mut state, self.max_rate, self.capacity);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }
                let next_tick = state.last_tick + Duration::from_secs(1);
                next_tick
                    .saturating_duration_since(Instant::now())
                    .max(Duration::from_millis(10))
            };
            sleep(wait).await;
        }
    }

    /// Penalise the bucket for an upstream 429: drain `2^attempt` tokens and cut the refill rate by
    /// `max(1, 2^attempt)`, clamping the rate to a minimum of one request per second.
    pub fn on_rate_limited(&self, attempt: u32) {
        let penalty = 2f64.powi(attempt.min(16) as i32);
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        Self::refill(&mut state, self.max_rate, self.capacity);
        state.tokens -= penalty;
        let new_rate = (state.rate - penalty.max(1.0)).max(1.0);
        debug!(
            target: LOG_TARGET,
            "Upstream rate limit hit (attempt {}): rate {:.1}/s -> {:.1}/s", attempt, state.rate, new_rate
        );
        state.rate = new_rate;
    }

    pub fn current_rate(&self) -> f64 {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        Self::refill(&mut state, self.max_rate, self.capacity);
        state.rate
    }

    pub fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock().expect("rate limiter lock poisoned");
        Self::refill(&mut state, self.max_rate, self.capacity);
        state.tokens
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn acquire_drains_one_token() {
        let bucket = TokenBucket::new(10.0);
        let before = bucket.available_tokens();
        bucket.acquire().await;
        assert!(bucket.available_tokens() < before);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_delays_next_request_a_full_tick() {
        let bucket = TokenBucket::new(5.0);
        // Drain the initial allowance
        for _ in 0..5 {
            bucket.acquire().await;
        }
        bucket.on_rate_limited(0);
        assert!(bucket.current_rate() < 5.0);

        let start = Instant::now();
        bucket.acquire().await;
        // An empty, penalised bucket refills on the next whole-second tick at the earliest
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_recovers_to_ceiling() {
        let bucket = TokenBucket::new(4.0);
        bucket.on_rate_limited(1);
        assert!(bucket.current_rate() <= 2.0);
        // +0.2 per tick: 15 seconds climbs back from 2.0 to the 4.0 ceiling
        tokio::time::advance(Duration::from_secs(15)).await;
        assert!((bucket.current_rate() - 4.0).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_hits_escalate_but_rate_floors_at_one() {
        let bucket = TokenBucket::new(100.0);
        bucket.on_rate_limited(0);
        let after_first = bucket.current_rate();
        bucket.on_rate_limited(3);
        assert!(bucket.current_rate() < after_first);
        bucket.on_rate_limited(16);
        assert!(bucket.current_rate() >= 1.0);
    }
}
