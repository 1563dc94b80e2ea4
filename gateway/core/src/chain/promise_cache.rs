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

//! Deduplication of in-flight upstream requests.
//!
//! The cache stores *the shared future of the response*, not its value: a second caller racing for
//! the same key joins the request already on the wire. Entries live for a TTL from their last
//! touch, so a prefetcher re-requesting a key keeps it warm.

use std::{
    collections::HashMap,
    future::Future,
    hash::Hash,
    sync::Mutex,
};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::{Duration, Instant};

struct Entry<V: Clone> {
    fut: Shared<BoxFuture<'static, V>>,
    expires_at: Instant,
}

pub struct PromiseCache<K, V: Clone> {
    ttl: Duration,
    entries: Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> PromiseCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Join the in-flight future for `key`, or install the one produced by `make` if there is none.
    /// Touching an existing entry resets its TTL.
    pub fn get_or_insert_with<F, Fut>(&self, key: K, make: F) -> Shared<BoxFuture<'static, V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("promise cache lock poisoned");
        entries.retain(|_, e| e.expires_at > now);
        match entries.get_mut(&key) {
            Some(entry) => {
                entry.expires_at = now + self.ttl;
                entry.fut.clone()
            },
            None => {
                let fut = make().boxed().shared();
                entries.insert(key, Entry {
                    fut: fut.clone(),
                    expires_at: now + self.ttl,
                });
                fut
            },
        }
    }

    /// Evict a key, typically after its future resolved to an error so the next caller retries.
    pub fn remove(&self, key: &K) {
        self.entries.lock().expect("promise cache lock poisoned").remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("promise cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    #[tokio::test]
    async fn racing_callers_share_one_execution() {
        let cache = Arc::new(PromiseCache::<u64, u64>::new(Duration::from_secs(30)));
        let calls = Arc::new(AtomicUsize::new(0));

        let make = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            42u64
        };

        let a = cache.get_or_insert_with(7, || make(calls.clone()));
        let b = cache.get_or_insert_with(7, || make(calls.clone()));
        assert_eq!(a.await, 42);
        assert_eq!(b.await, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = PromiseCache::<u64, u64>::new(Duration::from_secs(30));
        let _ = cache.get_or_insert_with(1, || async { 1 });
        assert_eq!(cache.len(), 1);
        tokio::time::advance(Duration::from_secs(31)).await;
        let _ = cache.get_or_insert_with(2, || async { 2 });
        // The expired entry was swept on access
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn touch_resets_ttl() {
        let cache = PromiseCache::<u64, u64>::new(Duration::from_secs(30));
        let _ = cache.get_or_insert_with(1, || async { 1 });
        tokio::time::advance(Duration::from_secs(20)).await;
        // Re-requesting the same key keeps it warm past the original deadline
        let _ = cache.get_or_insert_with(1, || async { 10 });
        tokio::time::advance(Duration::from_secs(20)).await;
        let fut = cache.get_or_insert_with(1, || async { 99 });
        assert_eq!(fut.await, 1);
    }

    #[tokio::test]
    async fn removal_allows_retry() {
        let cache = PromiseCache::<u64, Result<u64, String>>::new(Duration::from_secs(30));
        let fut = cache.get_or_insert_with(1, || async { Err("boom".to_string()) });
        assert!(fut.await.is_err());
        cache.remove(&1);
        let fut = cache.get_or_insert_with(1, || async { Ok(5) });
        assert_eq!(fut.await.unwrap(), 5);
    }
}
