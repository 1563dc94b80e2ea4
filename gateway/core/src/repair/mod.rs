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

//! Background repair: re-fetching transactions that were missing at import time and re-queueing
//! bundles whose processing stalled.
//!
//! The repair worker only *fetches*; a fetched transaction is announced as `TX_FETCHED` on the bus
//! and a separate saver task owns the index write, mirroring how block imports flow.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
};

use log::*;
use tokio::{
    sync::mpsc,
    time::{sleep, Duration},
};
use weavegate_shutdown::ShutdownSignal;

use crate::{
    chain::{types::TxId, ChainSource},
    events::GatewayEvents,
    metrics,
    store::{bundles::BundleRecord, now_ts, IndexStore},
};

const LOG_TARGET: &str = "wg::repair";

#[derive(Debug, Clone)]
pub struct TxRepairConfig {
    /// Tick period of the repair loop.
    pub interval: Duration,
    /// Missing ids pulled per tick.
    pub txs_to_retry: usize,
    /// Fetch attempts per id before giving up until a later tick.
    pub max_attempts: u32,
    /// Delay between attempts for one id.
    pub retry_wait: Duration,
    /// Bound on the fetch queue.
    pub queue_depth: usize,
}

impl Default for TxRepairConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            txs_to_retry: 20,
            max_attempts: 5,
            retry_wait: Duration::from_secs(5),
            queue_depth: 100,
        }
    }
}

pub struct TransactionRepairWorker {
    chain: Arc<dyn ChainSource>,
    store: IndexStore,
    events: GatewayEvents,
    config: TxRepairConfig,
    shutdown: ShutdownSignal,
}

impl TransactionRepairWorker {
    pub fn new(
        chain: Arc<dyn ChainSource>,
        store: IndexStore,
        events: GatewayEvents,
        config: TxRepairConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            chain,
            store,
            events,
            config,
            shutdown,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let (queue_tx, queue_rx) = mpsc::channel::<TxId>(self.config.queue_depth);
        // Ids currently queued or being fetched; re-enqueueing them would only waste attempts
        let inflight = Arc::new(Mutex::new(HashSet::new()));

        let fetcher = tokio::spawn(fetch_loop(
            queue_rx,
            inflight.clone(),
            self.chain.clone(),
            self.events.clone(),
            self.config.clone(),
            self.shutdown.clone(),
        ));

        let mut shutdown = self.shutdown.clone();
        info!(target: LOG_TARGET, "Transaction repair worker starting");
        loop {
            tokio::select! {
                _ = sleep(self.config.interval) => {},
                _ = shutdown.wait() => break,
            }
            if let Err(e) = self.tick(&queue_tx, &inflight).await {
                warn!(target: LOG_TARGET, "Repair tick failed: {}", e);
            }
        }
        drop(queue_tx);
        let _ = fetcher.await;
        info!(target: LOG_TARGET, "Transaction repair worker stopped");
    }

    /// One tick: pull a batch of missing ids and enqueue the ones not already in flight.
    pub async fn tick(
        &self,
        queue: &mpsc::Sender<TxId>,
        inflight: &Mutex<HashSet<TxId>>,
    ) -> Result<usize, crate::store::StoreError> {
        let ids = self.store.get_missing_tx_ids(self.config.txs_to_retry).await?;
        let mut enqueued = 0usize;
        for id in ids {
            let fresh = inflight.lock().expect("repair inflight lock poisoned").insert(id);
            if !fresh {
                continue;
            }
            match queue.try_send(id) {
                Ok(()) => enqueued += 1,
                Err(_) => {
                    // Queue full or closed: drop the reservation, a later tick retries
                    inflight.lock().expect("repair inflight lock poisoned").remove(&id);
                    break;
                },
            }
        }
        if enqueued > 0 {
            debug!(target: LOG_TARGET, "Enqueued {} missing transactions for repair", enqueued);
        }
        Ok(enqueued)
    }
}

async fn fetch_loop(
    mut queue: mpsc::Receiver<TxId>,
    inflight: Arc<Mutex<HashSet<TxId>>>,
    chain: Arc<dyn ChainSource>,
    events: GatewayEvents,
    config: TxRepairConfig,
    shutdown: ShutdownSignal,
) {
    loop {
        let mut shutdown_wait = shutdown.clone();
        let id = tokio::select! {
            id = queue.recv() => match id {
                Some(id) => id,
                None => break,
            },
            _ = shutdown_wait.wait() => break,
        };

        let mut fetched = false;
        for attempt in 1..=config.max_attempts {
            match chain.get_transaction(id, false).await {
                Ok(tx) => {
                    metrics::repair_txs_fetched().inc();
                    events.publish_tx_fetched(tx);
                    fetched = true;
                    break;
                },
                Err(e) => {
                    debug!(
                        target: LOG_TARGET,
                        "Repair fetch of {} failed (attempt {}/{}): {}", id, attempt, config.max_attempts, e
                    );
                    if attempt < config.max_attempts {
                        sleep(config.retry_wait).await;
                    }
                },
            }
            if shutdown.is_triggered() {
                break;
            }
        }
        if !fetched {
            metrics::repair_tx_errors().inc();
        }
        inflight.lock().expect("repair inflight lock poisoned").remove(&id);
    }
}

/// The bus consumer that owns index writes for repaired transactions: every `TX_FETCHED` becomes a
/// `save_tx`, which binds the transaction to its recorded height and clears its missing rows.
pub fn spawn_tx_saver(events: GatewayEvents, store: IndexStore, shutdown: ShutdownSignal) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = events.subscribe_tx_fetched();
        let mut shutdown = shutdown;
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(tx) => {
                        if let Err(e) = store.save_tx(&tx).await {
                            warn!(target: LOG_TARGET, "Failed to save repaired tx {}: {}", tx.id, e);
                        }
                    },
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(target: LOG_TARGET, "Tx saver lagged, {} events dropped", skipped);
                    },
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.wait() => break,
            }
        }
    })
}

#[derive(Debug, Clone)]
pub struct BundleRetryConfig {
    pub interval: Duration,
    pub bundles_to_retry: usize,
}

impl Default for BundleRetryConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10 * 60),
            bundles_to_retry: 100,
        }
    }
}

/// Re-queues bundles whose unbundling never completed, oldest attempt first. The unbundling
/// pipeline itself is a collaborator; re-queueing makes the bundles visible to it again.
pub struct BundleRetryWorker {
    store: IndexStore,
    config: BundleRetryConfig,
    shutdown: ShutdownSignal,
}

impl BundleRetryWorker {
    pub fn new(store: IndexStore, config: BundleRetryConfig, shutdown: ShutdownSignal) -> Self {
        Self {
            store,
            config,
            shutdown,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let mut shutdown = self.shutdown.clone();
        loop {
            tokio::select! {
                _ = sleep(self.config.interval) => {},
                _ = shutdown.wait() => break,
            }
            match self.tick().await {
                Ok(0) => {},
                Ok(n) => info!(target: LOG_TARGET, "Re-queued {} stalled bundles", n),
                Err(e) => warn!(target: LOG_TARGET, "Bundle retry tick failed: {}", e),
            }
        }
    }

    pub async fn tick(&self) -> Result<usize, crate::store::StoreError> {
        let ids = self.store.get_failed_bundle_ids(self.config.bundles_to_retry).await?;
        let count = ids.len();
        for id in ids {
            let record = BundleRecord {
                id,
                queued_at: Some(now_ts()),
                ..Default::default()
            };
            self.store.save_bundle(&record).await?;
        }
        Ok(count)
    }
}
