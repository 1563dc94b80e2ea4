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

//! The multi-namespace chain index.
//!
//! Four sqlite namespaces (`core`, `bundles`, `data`, `moderation`), each with its own file, WAL
//! journal and worker lanes. All chain writes land in `new_*` tables first and are promoted to the
//! append-only `stable_*` tables once they sink deep enough below the tip to be fork-safe.

pub mod bundles;
pub mod chain_index;
pub mod data;
pub(crate) mod db;
pub mod error;
pub mod gql;
pub mod moderation;

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicI64, AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
};

use log::*;
use sha1::{Digest, Sha1};
use tokio::time::{Duration, Instant};

pub use error::StoreError;

use crate::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
    events::GatewayEvents,
    store::db::Lane,
};

const LOG_TARGET: &str = "wg::store";

#[derive(Debug, Clone)]
pub struct IndexStoreConfig {
    /// Directory holding the four namespace database files.
    pub db_dir: PathBuf,
    /// Blocks deeper than this below the tip can no longer be forked away and become stable.
    pub max_fork_depth: u64,
    /// Stabilisation cadence in blocks.
    pub stable_flush_interval: u64,
    /// Grace period on `indexed_at` before pruning flushed `new_*` transaction and data item rows.
    pub new_row_grace: Duration,
    /// Persist transaction signature bytes.
    pub write_transaction_signatures: bool,
    /// Persist data item signature bytes.
    pub write_data_item_signatures: bool,
    /// Secondary data-item stabilisation trigger: flush after this many data item saves.
    pub data_item_flush_count_threshold: u64,
    /// Secondary data-item stabilisation trigger: flush at least this often.
    pub max_flush_interval: Duration,
    /// Breaker settings shared by the data-attribute read paths.
    pub data_circuit_breaker: CircuitBreakerConfig,
    /// Operator hint ranking tag names by filter power; higher joins earlier.
    pub tag_selectivity: HashMap<String, i64>,
    /// Worker count for the GraphQL read lane.
    pub gql_read_workers: usize,
    /// Window in which repeated `save_data_content_attributes` calls for one id are dropped.
    pub data_save_dedup_ttl: Duration,
    /// Minimum age of a bundle's last attempt before it is retried.
    pub bundle_reprocess_wait: Duration,
}

impl Default for IndexStoreConfig {
    fn default() -> Self {
        Self {
            db_dir: PathBuf::from("data/sqlite"),
            max_fork_depth: 50,
            stable_flush_interval: 5,
            new_row_grace: Duration::from_secs(2 * 60 * 60),
            write_transaction_signatures: true,
            write_data_item_signatures: true,
            data_item_flush_count_threshold: 1000,
            max_flush_interval: Duration::from_secs(600),
            data_circuit_breaker: CircuitBreakerConfig::default(),
            tag_selectivity: HashMap::new(),
            gql_read_workers: num_cpus::get().min(12),
            data_save_dedup_ttl: Duration::from_secs(7 * 60),
            bundle_reprocess_wait: Duration::from_secs(15 * 60),
        }
    }
}

pub(crate) struct DataIndexBreakers {
    pub data_attributes: CircuitBreaker,
    pub data_parent: CircuitBreaker,
    pub data_item_attributes: CircuitBreaker,
    pub transaction_attributes: CircuitBreaker,
}

/// Handle to the four-namespace index. Clones share lanes and caches.
#[derive(Clone)]
pub struct IndexStore {
    inner: Arc<StoreInner>,
}

pub(crate) struct StoreInner {
    pub config: IndexStoreConfig,
    pub events: GatewayEvents,
    pub core_read: Lane,
    pub core_write: Lane,
    pub gql_read: Lane,
    pub debug_read: Lane,
    pub bundles_read: Lane,
    pub bundles_write: Lane,
    pub data_read: Lane,
    pub data_write: Lane,
    pub moderation_read: Lane,
    pub moderation_write: Lane,
    pub breakers: DataIndexBreakers,
    pub worker_errors: Arc<AtomicUsize>,
    /// `(id -> last save)` window deduplicating content-attribute writes.
    pub recent_data_saves: Mutex<HashMap<Vec<u8>, Instant>>,
    /// Height threshold used by the most recent core flush; the data-item lane reuses it when its
    /// own triggers fire between block flushes. Negative until the first flush.
    pub last_flush_height_threshold: AtomicI64,
    pub data_items_since_flush: AtomicI64,
    pub last_data_item_flush: Mutex<Instant>,
}

const CORE_SCHEMA: &str = include_str!("../../sql/core/schema.sql");
const BUNDLES_SCHEMA: &str = include_str!("../../sql/bundles/schema.sql");
const DATA_SCHEMA: &str = include_str!("../../sql/data/schema.sql");
const MODERATION_SCHEMA: &str = include_str!("../../sql/moderation/schema.sql");

impl IndexStore {
    /// Open (creating if necessary) all four namespaces and spawn their worker lanes.
    pub async fn open(config: IndexStoreConfig, events: GatewayEvents) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&config.db_dir)
            .await
            .map_err(|e| StoreError::Open {
                path: config.db_dir.display().to_string(),
                source: sqlx::Error::Io(e),
            })?;

        let core_path = config.db_dir.join("core.db");
        let bundles_path = config.db_dir.join("bundles.db");
        let data_path = config.db_dir.join("data.db");
        let moderation_path = config.db_dir.join("moderation.db");

        let worker_errors = Arc::new(AtomicUsize::new(0));

        // Writers go first: they create the files and apply schema before any reader opens
        let mut core_w = db::open_connection(&core_path, false).await?;
        db::apply_schema(&mut core_w, &core_path, CORE_SCHEMA).await?;
        let mut bundles_w = db::open_connection(&bundles_path, false).await?;
        db::apply_schema(&mut bundles_w, &bundles_path, BUNDLES_SCHEMA).await?;
        let mut data_w = db::open_connection(&data_path, false).await?;
        db::apply_schema(&mut data_w, &data_path, DATA_SCHEMA).await?;
        let mut moderation_w = db::open_connection(&moderation_path, false).await?;
        db::apply_schema(&mut moderation_w, &moderation_path, MODERATION_SCHEMA).await?;

        let core_r = vec![db::open_connection(&core_path, true).await?];
        let debug_r = vec![db::open_connection(&core_path, true).await?];
        let mut data_r = Vec::new();
        for _ in 0..2 {
            data_r.push(db::open_connection(&data_path, true).await?);
        }
        let bundles_r = vec![db::open_connection(&bundles_path, true).await?];
        let moderation_r = vec![db::open_connection(&moderation_path, true).await?];

        // GraphQL readers see the core namespace with bundles attached so one planner can union
        // transactions and data items
        let mut gql_r = Vec::new();
        let bundles_path_str = bundles_path.display().to_string();
        for _ in 0..config.gql_read_workers.max(1) {
            let mut conn = db::open_connection(&core_path, true).await?;
            sqlx::query("ATTACH DATABASE ?1 AS bundles")
                .bind(&bundles_path_str)
                .execute(&mut conn)
                .await
                .map_err(|source| StoreError::Open {
                    path: bundles_path_str.clone(),
                    source,
                })?;
            gql_r.push(conn);
        }

        info!(
            target: LOG_TARGET,
            "Index store open at {} ({} GraphQL readers)",
            config.db_dir.display(),
            gql_r.len()
        );

        let breaker_cfg = config.data_circuit_breaker.clone();
        let inner = StoreInner {
            core_read: Lane::spawn("core-read", core_r, worker_errors.clone()),
            core_write: Lane::spawn("core-write", vec![core_w], worker_errors.clone()),
            gql_read: Lane::spawn("gql-read", gql_r, worker_errors.clone()),
            debug_read: Lane::spawn("debug-read", debug_r, worker_errors.clone()),
            bundles_read: Lane::spawn("bundles-read", bundles_r, worker_errors.clone()),
            bundles_write: Lane::spawn("bundles-write", vec![bundles_w], worker_errors.clone()),
            data_read: Lane::spawn("data-read", data_r, worker_errors.clone()),
            data_write: Lane::spawn("data-write", vec![data_w], worker_errors.clone()),
            moderation_read: Lane::spawn("moderation-read", moderation_r, worker_errors.clone()),
            moderation_write: Lane::spawn("moderation-write", vec![moderation_w], worker_errors.clone()),
            breakers: DataIndexBreakers {
                data_attributes: CircuitBreaker::new("get_data_attributes", breaker_cfg.clone()),
                data_parent: CircuitBreaker::new("get_data_parent", breaker_cfg.clone()),
                data_item_attributes: CircuitBreaker::new("get_data_item_attributes", breaker_cfg.clone()),
                transaction_attributes: CircuitBreaker::new("get_transaction_attributes", breaker_cfg),
            },
            worker_errors,
            recent_data_saves: Mutex::new(HashMap::new()),
            last_flush_height_threshold: AtomicI64::new(i64::MIN),
            data_items_since_flush: AtomicI64::new(0),
            last_data_item_flush: Mutex::new(Instant::now()),
            events,
            config,
        };
        Ok(Self { inner: Arc::new(inner) })
    }

    pub(crate) fn inner(&self) -> &StoreInner {
        &self.inner
    }

    pub fn config(&self) -> &IndexStoreConfig {
        &self.inner.config
    }

    pub(crate) fn events(&self) -> &GatewayEvents {
        &self.inner.events
    }

    pub fn worker_error_count(&self) -> usize {
        self.inner.worker_errors.load(Ordering::Relaxed)
    }
}

/// Content hash used to intern tag names and values.
pub(crate) fn tag_hash(bytes: &[u8]) -> Vec<u8> {
    Sha1::digest(bytes).to_vec()
}

/// Wall-clock seconds used for `indexed_at` columns.
pub(crate) fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn opens_all_namespaces_in_a_fresh_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = IndexStoreConfig {
            db_dir: dir.path().join("sqlite"),
            gql_read_workers: 2,
            ..Default::default()
        };
        let store = IndexStore::open(config, GatewayEvents::new()).await.unwrap();
        assert_eq!(store.worker_error_count(), 0);
        for file in ["core.db", "bundles.db", "data.db", "moderation.db"] {
            assert!(dir.path().join("sqlite").join(file).exists(), "{file} missing");
        }
    }

    #[test]
    fn tag_hash_is_sha1_of_raw_bytes() {
        // SHA-1("Content-Type")
        assert_eq!(
            hex::encode(tag_hash(b"Content-Type")),
            "77d12b97ba61ffccb079e0dd2ef6809c1e957255"
        );
    }
}
