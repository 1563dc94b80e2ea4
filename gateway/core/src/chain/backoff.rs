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

use tokio::time::{sleep, Duration};

/// A multiplicative retry timer: each `wait` sleeps a little longer than the last, up to a fixed
/// number of attempts. Used where an upstream hiccup is worth riding out rather than surfacing.
pub struct RetryBackoff {
    max_attempts: u32,
    attempts: u32,
    delay: Duration,
    factor: f64,
}

impl RetryBackoff {
    /// `delay` is the wait after the first failed attempt; every later wait is multiplied by
    /// `factor`.
    pub fn new(max_attempts: u32, delay: Duration, factor: f64) -> Self {
        Self {
            max_attempts,
            attempts: 0,
            delay,
            factor,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Sleep for the current delay and advance the attempt counter. A no-op once exhausted.
    pub async fn wait(&mut self) {
        if self.is_exhausted() {
            return;
        }
        sleep(self.delay).await;
        self.attempts += 1;
        self.delay = self.delay.mul_f64(self.factor);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn counts_attempts_up_to_the_maximum() {
        let mut backoff = RetryBackoff::new(3, Duration::from_millis(100), 2.0);
        assert_eq!(backoff.attempts(), 0);
        backoff.wait().await;
        assert_eq!(backoff.attempts(), 1);
        backoff.wait().await;
        backoff.wait().await;
        assert!(backoff.is_exhausted());
        backoff.wait().await;
        assert_eq!(backoff.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn delays_grow_multiplicatively() {
        let mut backoff = RetryBackoff::new(3, Duration::from_millis(100), 2.0);
        let start = tokio::time::Instant::now();
        backoff.wait().await;
        backoff.wait().await;
        backoff.wait().await;
        // 100ms + 200ms + 400ms
        assert_eq!(start.elapsed(), Duration::from_millis(700));
    }
}
