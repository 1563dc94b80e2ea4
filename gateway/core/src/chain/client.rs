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

//! Rate-limited, deduplicating HTTP client for the trusted chain node and its peer fleet.

use std::sync::Arc;

use futures::{stream, StreamExt};
use log::*;
use serde::de::DeserializeOwned;
use tokio::{
    sync::Semaphore,
    time::{timeout, Duration},
};
use url::Url;

use crate::chain::{
    backoff::RetryBackoff,
    peers::{DiscoveredPeer, PeerList},
    promise_cache::PromiseCache,
    rate_limiter::TokenBucket,
    ChainClientError,
    ChainSource,
    types::{BlockAndTxs, JsonBlock, JsonTransaction, NodeInfo, TxId, TxOffset},
};

const LOG_TARGET: &str = "wg::chain::client";

/// Concurrency for `/info` probes during peer discovery.
const PEER_PROBE_CONCURRENCY: usize = 20;

#[derive(Debug, Clone)]
pub struct ChainClientConfig {
    /// Base URL of the trusted upstream node.
    pub trusted_node_url: Url,
    /// Ceiling for the adaptive token bucket.
    pub max_requests_per_second: f64,
    /// Upper bound on in-flight upstream requests; also the prefetch depth.
    pub max_concurrent_requests: usize,
    /// Per-request timeout against the trusted node.
    pub request_timeout: Duration,
    /// Timeout for `/info` probes of discovered peers.
    pub peer_info_timeout: Duration,
    /// Budget for trying a transaction fetch against a preferred peer before falling back.
    pub peer_tx_timeout: Duration,
    /// TTL of in-flight block promises.
    pub block_promise_ttl: Duration,
    /// TTL of in-flight transaction promises.
    pub tx_promise_ttl: Duration,
    /// Attempts per request before surfacing a transient failure.
    pub max_request_attempts: u32,
    /// Base delay between retry attempts, doubled per attempt.
    pub retry_backoff: Duration,
}

impl Default for ChainClientConfig {
    fn default() -> Self {
        Self {
            trusted_node_url: Url::parse("https://arweave.net/").expect("default trusted node URL is valid"),
            max_requests_per_second: 5.0,
            max_concurrent_requests: 100,
            request_timeout: Duration::from_secs(15),
            peer_info_timeout: Duration::from_secs(5),
            peer_tx_timeout: Duration::from_millis(500),
            block_promise_ttl: Duration::from_secs(30),
            tx_promise_ttl: Duration::from_secs(120),
            max_request_attempts: 5,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

struct ClientInner {
    config: ChainClientConfig,
    http: reqwest::Client,
    limiter: TokenBucket,
    gate: Arc<Semaphore>,
    blocks: PromiseCache<u64, Result<Arc<JsonBlock>, ChainClientError>>,
    txs: PromiseCache<TxId, Result<Arc<JsonTransaction>, ChainClientError>>,
    peers: PeerList,
}

/// Client for the upstream chain HTTP API.
///
/// Clones share the limiter, the request gate, the peer list and the in-flight promise caches.
#[derive(Clone)]
pub struct ArweaveChainClient {
    inner: Arc<ClientInner>,
}

impl ArweaveChainClient {
    pub fn new(config: ChainClientConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("reqwest client construction only fails on TLS backend misconfiguration");
        Self {
            inner: Arc::new(ClientInner {
                http,
                limiter: TokenBucket::new(config.max_requests_per_second),
                gate: Arc::new(Semaphore::new(config.max_concurrent_requests)),
                blocks: PromiseCache::new(config.block_promise_ttl),
                txs: PromiseCache::new(config.tx_promise_ttl),
                peers: PeerList::new(),
                config,
            }),
        }
    }

    pub fn current_request_rate(&self) -> f64 {
        self.inner.limiter.current_rate()
    }

    pub fn discovered_peer_count(&self) -> usize {
        self.inner.peers.len()
    }

    pub fn preferred_peer_count(&self) -> usize {
        self.inner.peers.preferred_count()
    }

    fn endpoint(&self, path: &str) -> Result<Url, ChainClientError> {
        self.inner
            .config
            .trusted_node_url
            .join(path)
            .map_err(|e| ChainClientError::Request(format!("invalid endpoint {}: {}", path, e)))
    }

    /// One paced, gated GET against the trusted node with automatic retries for transient failures.
    async fn get_with_retries(&self, url: Url) -> Result<reqwest::Response, ChainClientError> {
        let mut backoff = RetryBackoff::new(
            self.inner.config.max_request_attempts.saturating_sub(1),
            self.inner.config.retry_backoff,
            2.0,
        );
        loop {
            let _permit = self
                .inner
                .gate
                .acquire()
                .await
                .map_err(|_| ChainClientError::Aborted)?;
            self.inner.limiter.acquire().await;

            let err = match self.inner.http.get(url.clone()).send().await {
                Ok(resp) if resp.status().as_u16() == 429 => {
                    self.inner.limiter.on_rate_limited(backoff.attempts());
                    ChainClientError::RateLimited
                },
                Ok(resp) if resp.status().is_server_error() => ChainClientError::Status {
                    status: resp.status().as_u16(),
                    context: url.to_string(),
                },
                Ok(resp) if resp.status().is_client_error() => {
                    return Err(ChainClientError::Status {
                        status: resp.status().as_u16(),
                        context: url.to_string(),
                    });
                },
                Ok(resp) => return Ok(resp),
                Err(e) => ChainClientError::from(e),
            };

            if backoff.is_exhausted() {
                return Err(ChainClientError::RetriesExhausted {
                    attempts: backoff.attempts() + 1,
                    last: err.to_string(),
                });
            }
            debug!(
                target: LOG_TARGET,
                "Retrying {} after attempt {}: {}", url, backoff.attempts() + 1, err
            );
            backoff.wait().await;
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ChainClientError> {
        let url = self.endpoint(path)?;
        let resp = self.get_with_retries(url).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ChainClientError::InvalidResponse(e.to_string()))
    }

    async fn fetch_block(&self, height: u64) -> Result<Arc<JsonBlock>, ChainClientError> {
        let value: serde_json::Value = self.get_json(&format!("block/height/{}", height)).await?;
        // A block body without its own id cannot be chained or persisted
        match value.get("indep_hash") {
            Some(serde_json::Value::String(s)) if !s.is_empty() => {},
            _ => return Err(ChainClientError::MissingIndepHash(height)),
        }
        let mut block: JsonBlock =
            serde_json::from_value(value).map_err(|e| ChainClientError::InvalidResponse(e.to_string()))?;
        block.strip_poa();
        Ok(Arc::new(block))
    }

    /// Schedule speculative fetches for the next heights while the outbound queue is idle.
    fn prefetch_following_blocks(&self, height: u64) {
        if self.inner.gate.available_permits() < self.inner.config.max_concurrent_requests {
            return;
        }
        for next in (height + 1)..=(height + self.inner.config.max_concurrent_requests as u64) {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.get_block_by_height(next, false).await {
                    trace!(target: LOG_TARGET, "Prefetch of block {} failed: {}", next, e);
                }
            });
        }
    }

    fn prefetch_block_txs(&self, block: &JsonBlock) {
        for id in block.txs.iter().copied() {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.get_transaction(id, false).await {
                    trace!(target: LOG_TARGET, "Prefetch of tx {} failed: {}", id, e);
                }
            });
        }
    }

    async fn fetch_tx_from_peer(
        &self,
        peer: &DiscoveredPeer,
        id: TxId,
    ) -> Result<JsonTransaction, ChainClientError> {
        let url = peer
            .url
            .join(&format!("tx/{}", id.to_b64()))
            .map_err(|e| ChainClientError::Request(e.to_string()))?;
        let resp = self
            .inner
            .http
            .get(url)
            .timeout(self.inner.config.peer_tx_timeout)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ChainClientError::Status {
                status: resp.status().as_u16(),
                context: peer.url.to_string(),
            });
        }
        resp.json::<JsonTransaction>()
            .await
            .map_err(|e| ChainClientError::InvalidResponse(e.to_string()))
    }

    async fn fetch_transaction(&self, id: TxId, is_pending: bool) -> Result<Arc<JsonTransaction>, ChainClientError> {
        // Confirmed transactions can be served by any preferred peer, but only after the id binding
        // checks out; pending ones are only meaningful on the trusted node.
        if !is_pending {
            if let Some(peer) = self.inner.peers.random_preferred() {
                match timeout(self.inner.config.peer_tx_timeout, self.fetch_tx_from_peer(&peer, id)).await {
                    Ok(Ok(mut tx)) if tx.id == id && tx.verify_id_binding() => {
                        tx.strip_data();
                        return Ok(Arc::new(tx));
                    },
                    Ok(Ok(_)) => {
                        warn!(
                            target: LOG_TARGET,
                            "Discarding unverifiable tx {} from peer {}", id, peer.url
                        );
                    },
                    Ok(Err(e)) => {
                        debug!(target: LOG_TARGET, "Peer {} failed to serve tx {}: {}", peer.url, id, e);
                    },
                    Err(_) => {
                        debug!(target: LOG_TARGET, "Peer {} timed out serving tx {}", peer.url, id);
                    },
                }
            }
        }

        let mut tx: JsonTransaction = self.get_json(&format!("tx/{}", id.to_b64())).await?;
        tx.strip_data();
        Ok(Arc::new(tx))
    }

    /// Refresh the peer fleet from the trusted node's `/peers` list. Returns the number of peers
    /// that answered their probe.
    pub async fn refresh_peers(&self) -> Result<usize, ChainClientError> {
        let hosts: Vec<String> = self.get_json("peers").await?;
        let this = self.clone();
        let probed = stream::iter(hosts.into_iter().filter_map(|h| Url::parse(&format!("http://{}/", h)).ok()))
            .map(|url| {
                let this = this.clone();
                async move { this.probe_peer(url).await }
            })
            .buffer_unordered(PEER_PROBE_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;
        let peers = probed.into_iter().flatten().collect::<Vec<_>>();
        let responsive = peers.len();
        debug!(
            target: LOG_TARGET,
            "Peer refresh complete: {} responsive, {} preferred",
            responsive,
            peers.iter().filter(|p| p.is_preferred()).count()
        );
        self.inner.peers.replace(peers);
        Ok(responsive)
    }

    async fn probe_peer(&self, url: Url) -> Option<DiscoveredPeer> {
        let info_url = url.join("info").ok()?;
        let request = self
            .inner
            .http
            .get(info_url)
            .timeout(self.inner.config.peer_info_timeout)
            .send();
        let resp = timeout(self.inner.config.peer_info_timeout, request).await.ok()?.ok()?;
        let info: NodeInfo = resp.json().await.ok()?;
        Some(DiscoveredPeer {
            url,
            height: info.height,
            blocks: info.blocks,
        })
    }
}

#[async_trait::async_trait]
impl ChainSource for ArweaveChainClient {
    async fn get_height(&self) -> Result<u64, ChainClientError> {
        let url = self.endpoint("height")?;
        let resp = self.get_with_retries(url).await?;
        let body = resp
            .text()
            .await
            .map_err(|e| ChainClientError::InvalidResponse(e.to_string()))?;
        body.trim()
            .parse::<u64>()
            .map_err(|e| ChainClientError::InvalidResponse(format!("height body {:?}: {}", body, e)))
    }

    async fn get_block_by_height(&self, height: u64, prefetch: bool) -> Result<Arc<JsonBlock>, ChainClientError> {
        let this = self.clone();
        let fut = self.inner.blocks.get_or_insert_with(height, move || async move {
            let res = this.fetch_block(height).await;
            if res.is_err() {
                // Evict so the next caller retries instead of joining a settled failure
                this.inner.blocks.remove(&height);
            }
            res
        });
        let res = fut.await;
        if prefetch {
            if let Ok(block) = &res {
                self.prefetch_following_blocks(height);
                self.prefetch_block_txs(block);
            }
        }
        res
    }

    async fn get_block_and_txs_by_height(&self, height: u64) -> Result<BlockAndTxs, ChainClientError> {
        let block = self.get_block_by_height(height, true).await?;
        let results = stream::iter(block.txs.iter().copied())
            .map(|id| {
                let this = self.clone();
                async move { (id, this.get_transaction(id, false).await) }
            })
            .buffer_unordered(self.inner.config.max_concurrent_requests.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut txs = Vec::with_capacity(results.len());
        let mut missing_tx_ids = Vec::new();
        for (id, res) in results {
            match res {
                Ok(tx) => txs.push((*tx).clone()),
                Err(e) => {
                    warn!(
                        target: LOG_TARGET,
                        "Transaction {} of block {} unavailable: {}", id, height, e
                    );
                    missing_tx_ids.push(id);
                },
            }
        }
        Ok(BlockAndTxs {
            block: (*block).clone(),
            txs,
            missing_tx_ids,
        })
    }

    async fn get_transaction(&self, id: TxId, is_pending: bool) -> Result<Arc<JsonTransaction>, ChainClientError> {
        let this = self.clone();
        let fut = self.inner.txs.get_or_insert_with(id, move || async move {
            let res = this.fetch_transaction(id, is_pending).await;
            if res.is_err() {
                this.inner.txs.remove(&id);
            }
            res
        });
        fut.await
    }

    async fn get_transaction_offset(&self, id: TxId) -> Result<TxOffset, ChainClientError> {
        self.get_json(&format!("tx/{}/offset", id.to_b64())).await
    }

    async fn get_pending_transaction_ids(&self) -> Result<Vec<TxId>, ChainClientError> {
        self.get_json("tx/pending").await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn endpoints_join_cleanly() {
        let client = ArweaveChainClient::new(ChainClientConfig {
            trusted_node_url: Url::parse("http://127.0.0.1:1984/").unwrap(),
            ..Default::default()
        });
        assert_eq!(
            client.endpoint("block/height/100").unwrap().as_str(),
            "http://127.0.0.1:1984/block/height/100"
        );
        assert_eq!(client.endpoint("height").unwrap().as_str(), "http://127.0.0.1:1984/height");
    }

    #[test]
    fn default_config_has_documented_timeouts() {
        let config = ChainClientConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.peer_info_timeout, Duration::from_secs(5));
        assert_eq!(config.peer_tx_timeout, Duration::from_millis(500));
        assert_eq!(config.block_promise_ttl, Duration::from_secs(30));
        assert_eq!(config.tx_promise_ttl, Duration::from_secs(120));
    }
}
