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

//! The fork-aware block importer.
//!
//! Walks the chain head one height at a time. A mismatch between a fetched block's
//! `previous_block` and the hash persisted one height below is a fork; an absent hash is a gap.
//! Both rewind the index below the divergence and re-walk forward, bounded by the maximum fork
//! depth. Import failures are retried in place; only fork-depth exhaustion stops the loop.

pub mod error;

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use log::*;
use tokio::time::{sleep, Duration};
use weavegate_shutdown::ShutdownSignal;

pub use error::BlockImportError;

use crate::{
    chain::{types::BlockAndTxs, ChainSource},
    events::{GatewayEvents, TxFetchFailed},
    metrics,
    store::IndexStore,
};

const LOG_TARGET: &str = "wg::importer";

/// Delay before retrying the same height after a failed import.
const BLOCK_ERROR_RETRY_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct BlockImporterConfig {
    /// First height to import when the index is empty. Zero means "resume at the current tip".
    pub start_height: u64,
    /// Terminate after importing this height.
    pub stop_height: Option<u64>,
    /// Rewinding deeper than this during one reorg attempt is fatal.
    pub max_fork_depth: u64,
    /// Stabilisation cadence in blocks.
    pub stable_flush_interval: u64,
    /// How often the tip is re-polled while the index has caught up.
    pub height_polling_interval: Duration,
}

impl Default for BlockImporterConfig {
    fn default() -> Self {
        Self {
            start_height: 0,
            stop_height: None,
            max_fork_depth: 50,
            stable_flush_interval: 5,
            height_polling_interval: Duration::from_secs(5),
        }
    }
}

/// Why the importer loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImporterExit {
    StopHeightReached,
    ForkDepthExceeded,
    ShutdownRequested,
}

pub struct BlockImporter {
    chain: Arc<dyn ChainSource>,
    store: IndexStore,
    events: GatewayEvents,
    config: BlockImporterConfig,
    shutdown: ShutdownSignal,
}

impl BlockImporter {
    pub fn new(
        chain: Arc<dyn ChainSource>,
        store: IndexStore,
        events: GatewayEvents,
        config: BlockImporterConfig,
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

    /// Start the importer on the runtime. The returned handle resolves with the exit reason.
    pub fn spawn(self) -> tokio::task::JoinHandle<ImporterExit> {
        tokio::spawn(self.run())
    }

    /// Drive the import loop until the stop height, a fatal fork or shutdown.
    pub async fn run(self) -> ImporterExit {
        metrics::importer_running().set(1);
        info!(target: LOG_TARGET, "Block importer starting");
        let exit = self.run_inner().await;
        metrics::importer_running().set(0);
        info!(target: LOG_TARGET, "Block importer stopped: {:?}", exit);
        exit
    }

    async fn run_inner(&self) -> ImporterExit {
        let mut shutdown = self.shutdown.clone();

        let mut max_chain_height = loop {
            tokio::select! {
                height = self.chain.get_height() => match height {
                    Ok(h) => break h,
                    Err(e) => {
                        warn!(target: LOG_TARGET, "Failed to fetch chain height: {}", e);
                        sleep(self.config.height_polling_interval).await;
                    },
                },
                _ = shutdown.wait() => return ImporterExit::ShutdownRequested,
            }
        };

        // The gap/fork checks never look below the configured start height; with a
        // resume-at-tip start the first imported height becomes the floor instead
        let mut resume_floor: Option<u64> = None;

        loop {
            if self.shutdown.is_triggered() {
                return ImporterExit::ShutdownRequested;
            }

            let db_height = match self.store.get_max_height().await {
                Ok(h) => h,
                Err(e) => {
                    error!(target: LOG_TARGET, "Failed to read index height: {}", e);
                    metrics::block_import_errors().inc();
                    sleep(BLOCK_ERROR_RETRY_INTERVAL).await;
                    continue;
                },
            };

            if let Some(db_height) = db_height {
                while db_height >= max_chain_height {
                    tokio::select! {
                        _ = sleep(self.config.height_polling_interval) => {},
                        _ = shutdown.wait() => return ImporterExit::ShutdownRequested,
                    }
                    match self.chain.get_height().await {
                        Ok(h) => max_chain_height = h,
                        Err(e) => warn!(target: LOG_TARGET, "Failed to refresh chain height: {}", e),
                    }
                }
            }

            let next = match db_height {
                Some(h) => h + 1,
                None => {
                    if self.config.start_height == 0 {
                        max_chain_height
                    } else {
                        self.config.start_height
                    }
                },
            };
            let floor = match (self.config.start_height, resume_floor, db_height) {
                (start, _, _) if start > 0 => start,
                (_, Some(floor), _) => floor,
                (_, None, None) => *resume_floor.get_or_insert(next),
                // Resumed over an existing index: everything above genesis is checkable
                (_, None, Some(_)) => 0,
            };

            if let Some(stop) = self.config.stop_height {
                if next > stop {
                    return ImporterExit::StopHeightReached;
                }
            }

            match self.import_block(next, floor).await {
                Ok(()) => {},
                Err(e) if e.is_fatal() => {
                    error!(target: LOG_TARGET, "Fatal import error at height {}: {}", next, e);
                    return ImporterExit::ForkDepthExceeded;
                },
                Err(e) => {
                    warn!(target: LOG_TARGET, "Failed to import block at height {}: {}", next, e);
                    metrics::block_import_errors().inc();
                    sleep(BLOCK_ERROR_RETRY_INTERVAL).await;
                },
            }
        }
    }

    async fn import_block(&self, height: u64, start_floor: u64) -> Result<(), BlockImportError> {
        let fetched = self.get_block_or_forked_block(height, start_floor, 0).await?;
        let imported_height = fetched.block.height;

        let block = Arc::new(fetched.block.clone());
        self.events.publish_block_fetched(block.clone());
        for tx in &fetched.txs {
            self.events.publish_block_tx_fetched(Arc::new(tx.clone()));
        }

        self.store
            .save_block_and_txs(&fetched.block, &fetched.txs, &fetched.missing_tx_ids)
            .await?;

        // Failure events follow persistence so consumers observing the gap can already see the
        // recorded missing rows
        for id in &fetched.missing_tx_ids {
            self.events.publish_block_tx_fetch_failed(TxFetchFailed {
                id: *id,
                height: imported_height,
            });
        }
        self.events.publish_block_saved(block);
        for tx in &fetched.txs {
            self.events.publish_block_tx_saved(Arc::new(tx.clone()));
        }

        metrics::blocks_imported().inc();
        metrics::last_height_imported().set(imported_height as i64);
        metrics::transactions_indexed().inc_by(fetched.txs.len() as u64);
        if !fetched.missing_tx_ids.is_empty() {
            metrics::missing_transactions().inc_by(fetched.missing_tx_ids.len() as u64);
        }
        debug!(
            target: LOG_TARGET,
            "Imported block {} ({} txs, {} missing)",
            imported_height,
            fetched.txs.len(),
            fetched.missing_tx_ids.len()
        );

        if imported_height % self.config.stable_flush_interval == 0 {
            self.store.flush_stable(imported_height).await?;
        }
        Ok(())
    }

    /// Fetch the block at `height`, detecting gaps and forks against the persisted hash one height
    /// below. Both rewind the index to `height − 2` and restart one height lower; the importer then
    /// re-walks forward over the rewound range.
    fn get_block_or_forked_block(
        &self,
        height: u64,
        start_floor: u64,
        depth: u64,
    ) -> BoxFuture<'_, Result<BlockAndTxs, BlockImportError>> {
        async move {
            if depth > self.config.max_fork_depth {
                return Err(BlockImportError::ForkDepthExceeded { height, depth });
            }

            let fetched = self.chain.get_block_and_txs_by_height(height).await?;

            if height > start_floor {
                let persisted_prev = self.store.get_block_hash_at_height(height - 1).await?;
                let rewind = match (&persisted_prev, &fetched.block.previous_block) {
                    (None, _) => {
                        warn!(
                            target: LOG_TARGET,
                            "Gap detected: no persisted block below height {}", height
                        );
                        true
                    },
                    (Some(persisted), expected) if Some(*persisted) != *expected => {
                        warn!(
                            target: LOG_TARGET,
                            "Fork detected at height {}: persisted {} but fetched block chains to {}",
                            height,
                            persisted,
                            (*expected).map(|h| h.to_string()).unwrap_or_else(|| "nothing".to_string()),
                        );
                        if depth == 0 {
                            metrics::forks_detected().inc();
                        }
                        true
                    },
                    _ => false,
                };

                if rewind {
                    self.store.reset_to_height(height.saturating_sub(2)).await?;
                    return self.get_block_or_forked_block(height - 1, start_floor, depth + 1).await;
                }
            }

            if depth > 0 {
                metrics::last_fork_depth().set(depth as i64);
            }
            Ok(fetched)
        }
        .boxed()
    }
}
