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

//! Block, transaction, tag and wallet indexing in the `core` namespace, including the
//! new-to-stable promotion lifecycle and fork rewinds.

use std::sync::atomic::Ordering;

use futures::FutureExt;
use log::*;
use sqlx::{Connection, Row, Sqlite, SqliteConnection, Transaction};

use crate::{
    chain::types::{BlockHash, JsonBlock, JsonTransaction, TxId},
    store::{now_ts, tag_hash, IndexStore, StoreError},
};

const LOG_TARGET: &str = "wg::store::chain_index";

/// Table counts for operator introspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugInfo {
    pub new_blocks: u64,
    pub stable_blocks: u64,
    pub new_transactions: u64,
    pub stable_transactions: u64,
    pub missing_transactions: u64,
    pub wallets: u64,
}

/// Attribute view of an indexed transaction, served to the data path.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionAttributes {
    pub id: TxId,
    pub height: Option<u64>,
    pub block_transaction_index: Option<u64>,
    pub format: u8,
    pub owner_address: Vec<u8>,
    pub target: Vec<u8>,
    pub quantity: String,
    pub reward: String,
    pub data_size: String,
    pub data_root: Vec<u8>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub tag_count: u64,
    pub stable: bool,
}

impl IndexStore {
    /// Persist a block, its fetched transactions and the ids it is missing as one atomic unit.
    /// Readers observe either none or all of the rows.
    pub async fn save_block_and_txs(
        &self,
        block: &JsonBlock,
        txs: &[JsonTransaction],
        missing_tx_ids: &[TxId],
    ) -> Result<(), StoreError> {
        let block = block.clone();
        let txs = txs.to_vec();
        let missing = missing_tx_ids.to_vec();
        let write_signatures = self.config().write_transaction_signatures;

        self.inner()
            .core_write
            .run("save_block_and_txs", move |conn| {
                async move {
                    let now = now_ts();
                    let mut dbtx = conn.begin().await?;

                    insert_block_row(&mut dbtx, &block, missing.len()).await?;

                    for (i, tx_id) in block.txs.iter().enumerate() {
                        sqlx::query(
                            "INSERT OR REPLACE INTO new_block_transactions \
                             (block_indep_hash, transaction_id, block_transaction_index, height) \
                             VALUES (?1, ?2, ?3, ?4)",
                        )
                        .bind(block.indep_hash.to_vec())
                        .bind(tx_id.to_vec())
                        .bind(i as i64)
                        .bind(block.height as i64)
                        .execute(&mut *dbtx)
                        .await?;
                    }

                    for id in &missing {
                        sqlx::query(
                            "INSERT OR IGNORE INTO missing_transactions \
                             (block_indep_hash, transaction_id, height) VALUES (?1, ?2, ?3)",
                        )
                        .bind(block.indep_hash.to_vec())
                        .bind(id.to_vec())
                        .bind(block.height as i64)
                        .execute(&mut *dbtx)
                        .await?;
                    }

                    for tx in &txs {
                        insert_transaction_row(&mut dbtx, tx, Some(block.height), write_signatures, now).await?;
                    }

                    dbtx.commit().await?;
                    Ok(())
                }
                .boxed()
            })
            .await
    }

    /// Index a single transaction outside of a block import, typically repaired after being missing.
    /// Binds the transaction to the height its block recorded and clears its missing rows.
    pub async fn save_tx(&self, tx: &JsonTransaction) -> Result<(), StoreError> {
        let tx = tx.clone();
        let write_signatures = self.config().write_transaction_signatures;

        self.inner()
            .core_write
            .run("save_tx", move |conn| {
                async move {
                    let now = now_ts();
                    let mut dbtx = conn.begin().await?;

                    let height: Option<i64> = sqlx::query(
                        "SELECT height FROM new_block_transactions WHERE transaction_id = ?1 LIMIT 1",
                    )
                    .bind(tx.id.to_vec())
                    .fetch_optional(&mut *dbtx)
                    .await?
                    .map(|row| row.get(0));

                    insert_transaction_row(&mut dbtx, &tx, height.map(|h| h as u64), write_signatures, now).await?;

                    sqlx::query("DELETE FROM missing_transactions WHERE transaction_id = ?1")
                        .bind(tx.id.to_vec())
                        .execute(&mut *dbtx)
                        .await?;

                    dbtx.commit().await?;
                    Ok(())
                }
                .boxed()
            })
            .await
    }

    /// Promote fork-safe rows to the stable tables and prune the promoted `new_*` rows.
    ///
    /// The promotion threshold is `tip − max_fork_depth`; pruning of transactions and data items is
    /// additionally gated on an `indexed_at` grace so rows the bundle side still works on survive.
    pub async fn flush_stable(&self, tip: u64) -> Result<(), StoreError> {
        let height_threshold = tip as i64 - self.config().max_fork_depth as i64;
        if height_threshold < 0 {
            trace!(
                target: LOG_TARGET,
                "Skipping stable flush: tip {} is within the fork window", tip
            );
            return Ok(());
        }
        let grace = self.config().new_row_grace.as_secs() as i64;

        let indexed_at_threshold = self
            .inner()
            .core_write
            .run("save_core_stable_data", move |conn| {
                async move {
                    let mut dbtx = conn.begin().await?;

                    copy_stable_rows(&mut dbtx, height_threshold).await?;

                    let max_stable_ts: Option<i64> =
                        sqlx::query("SELECT MAX(block_timestamp) FROM stable_blocks")
                            .fetch_one(&mut *dbtx)
                            .await?
                            .get(0);
                    let indexed_at_threshold = max_stable_ts.map(|ts| ts - grace).unwrap_or(i64::MIN);

                    prune_new_rows(&mut dbtx, height_threshold, indexed_at_threshold).await?;

                    dbtx.commit().await?;
                    Ok(indexed_at_threshold)
                }
                .boxed()
            })
            .await?;

        self.inner()
            .last_flush_height_threshold
            .store(height_threshold, Ordering::Relaxed);

        // The bundle lane runs its half of the flush on its own connection but with the same
        // thresholds, so the two namespaces stabilise the same height range.
        self.save_bundles_stable_data(height_threshold, indexed_at_threshold)
            .await?;
        self.note_data_item_flush();

        debug!(
            target: LOG_TARGET,
            "Stable flush complete at tip {} (height threshold {})", tip, height_threshold
        );
        Ok(())
    }

    /// Rewind the fork-prone side of the index to `height`. Stable rows are untouched.
    pub async fn reset_to_height(&self, height: u64) -> Result<(), StoreError> {
        let h = height as i64;
        self.inner()
            .core_write
            .run("reset_to_height", move |conn| {
                async move {
                    let mut dbtx = conn.begin().await?;
                    sqlx::query("UPDATE new_transactions SET height = NULL WHERE height > ?1")
                        .bind(h)
                        .execute(&mut *dbtx)
                        .await?;
                    sqlx::query("DELETE FROM new_blocks WHERE height > ?1")
                        .bind(h)
                        .execute(&mut *dbtx)
                        .await?;
                    sqlx::query("DELETE FROM new_block_transactions WHERE height > ?1")
                        .bind(h)
                        .execute(&mut *dbtx)
                        .await?;
                    sqlx::query("DELETE FROM missing_transactions WHERE height > ?1")
                        .bind(h)
                        .execute(&mut *dbtx)
                        .await?;
                    dbtx.commit().await?;
                    Ok(())
                }
                .boxed()
            })
            .await?;

        self.reset_bundles_to_height(height).await?;
        info!(target: LOG_TARGET, "Index reset to height {}", height);
        Ok(())
    }

    /// Highest indexed height across the new and stable sets.
    pub async fn get_max_height(&self) -> Result<Option<u64>, StoreError> {
        self.inner()
            .core_read
            .run("get_max_height", move |conn| {
                async move {
                    let row = sqlx::query(
                        "SELECT MAX(COALESCE((SELECT MAX(height) FROM new_blocks), -1), \
                                    COALESCE((SELECT MAX(height) FROM stable_blocks), -1))",
                    )
                    .fetch_one(&mut *conn)
                    .await?;
                    let max: i64 = row.get(0);
                    Ok((max >= 0).then_some(max as u64))
                }
                .boxed()
            })
            .await
    }

    pub async fn get_max_stable_height(&self) -> Result<Option<u64>, StoreError> {
        self.inner()
            .core_read
            .run("get_max_stable_height", move |conn| {
                async move {
                    let row = sqlx::query("SELECT MAX(height) FROM stable_blocks")
                        .fetch_one(&mut *conn)
                        .await?;
                    let max: Option<i64> = row.get(0);
                    Ok(max.map(|h| h as u64))
                }
                .boxed()
            })
            .await
    }

    /// The persisted hash at `height`, looking at the new set first and falling back to stable.
    pub async fn get_block_hash_at_height(&self, height: u64) -> Result<Option<BlockHash>, StoreError> {
        let h = height as i64;
        self.inner()
            .core_read
            .run("get_block_hash_at_height", move |conn| {
                async move {
                    let row = sqlx::query(
                        "SELECT indep_hash FROM new_blocks WHERE height = ?1 \
                         UNION ALL \
                         SELECT indep_hash FROM stable_blocks WHERE height = ?1 \
                         LIMIT 1",
                    )
                    .bind(h)
                    .fetch_optional(&mut *conn)
                    .await?;
                    match row {
                        Some(row) => {
                            let bytes: Vec<u8> = row.get(0);
                            let hash = BlockHash::try_from(bytes.as_slice())
                                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
                            Ok(Some(hash))
                        },
                        None => Ok(None),
                    }
                }
                .boxed()
            })
            .await
    }

    /// Ids of transactions that blocks referenced but the gateway has not yet indexed.
    pub async fn get_missing_tx_ids(&self, limit: usize) -> Result<Vec<TxId>, StoreError> {
        let limit = limit as i64;
        self.inner()
            .core_read
            .run("get_missing_tx_ids", move |conn| {
                async move {
                    let rows = sqlx::query(
                        "SELECT transaction_id FROM missing_transactions \
                         GROUP BY transaction_id ORDER BY MIN(height) LIMIT ?1",
                    )
                    .bind(limit)
                    .fetch_all(&mut *conn)
                    .await?;
                    let mut ids = Vec::with_capacity(rows.len());
                    for row in rows {
                        let bytes: Vec<u8> = row.get(0);
                        ids.push(TxId::try_from(bytes.as_slice()).map_err(|e| sqlx::Error::Decode(Box::new(e)))?);
                    }
                    Ok(ids)
                }
                .boxed()
            })
            .await
    }

    pub async fn get_missing_tx_count(&self) -> Result<u64, StoreError> {
        self.inner()
            .core_read
            .run("get_missing_tx_count", move |conn| {
                async move {
                    let row = sqlx::query("SELECT COUNT(*) FROM missing_transactions")
                        .fetch_one(&mut *conn)
                        .await?;
                    let count: i64 = row.get(0);
                    Ok(count as u64)
                }
                .boxed()
            })
            .await
    }

    /// Row counts per core table, served on the dedicated debug lane so operator introspection
    /// never queues behind the query or import paths.
    pub async fn debug_info(&self) -> Result<DebugInfo, StoreError> {
        self.inner()
            .debug_read
            .run("debug_info", move |conn| {
                async move {
                    let row = sqlx::query(
                        "SELECT (SELECT COUNT(*) FROM new_blocks), \
                                (SELECT COUNT(*) FROM stable_blocks), \
                                (SELECT COUNT(*) FROM new_transactions), \
                                (SELECT COUNT(*) FROM stable_transactions), \
                                (SELECT COUNT(*) FROM missing_transactions), \
                                (SELECT COUNT(*) FROM wallets)",
                    )
                    .fetch_one(&mut *conn)
                    .await?;
                    Ok(DebugInfo {
                        new_blocks: row.get::<i64, _>(0) as u64,
                        stable_blocks: row.get::<i64, _>(1) as u64,
                        new_transactions: row.get::<i64, _>(2) as u64,
                        stable_transactions: row.get::<i64, _>(3) as u64,
                        missing_transactions: row.get::<i64, _>(4) as u64,
                        wallets: row.get::<i64, _>(5) as u64,
                    })
                }
                .boxed()
            })
            .await
    }

    /// Attribute lookup behind the transaction-attributes circuit breaker: `None` means the value
    /// is unavailable right now (open circuit, timeout or failure) and the caller should degrade.
    pub async fn get_transaction_attributes(&self, id: TxId) -> Option<TransactionAttributes> {
        let lane = self.inner().core_read.clone();
        self.inner()
            .breakers
            .transaction_attributes
            .call(async move {
                lane.run("get_transaction_attributes", move |conn| {
                    async move { select_transaction_attributes(conn, id).await }.boxed()
                })
                .await
            })
            .await
            .flatten()
    }
}

async fn insert_block_row(
    dbtx: &mut Transaction<'_, Sqlite>,
    block: &JsonBlock,
    missing_count: usize,
) -> Result<(), sqlx::Error> {
    let (rate_dividend, rate_divisor) = split_rate(&block.usd_to_ar_rate);
    let (sched_dividend, sched_divisor) = split_rate(&block.scheduled_usd_to_ar_rate);
    sqlx::query(
        "INSERT OR REPLACE INTO new_blocks (indep_hash, height, previous_block, nonce, hash, \
         block_timestamp, diff, cumulative_diff, last_retarget, reward_addr, reward_pool, \
         block_size, weave_size, usd_to_ar_rate_dividend, usd_to_ar_rate_divisor, \
         scheduled_usd_to_ar_rate_dividend, scheduled_usd_to_ar_rate_divisor, hash_list_merkle, \
         wallet_list, tx_root, tx_count, missing_tx_count) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22)",
    )
    .bind(block.indep_hash.to_vec())
    .bind(block.height as i64)
    .bind(block.previous_block.as_ref().map(|h| h.to_vec()))
    .bind(block.nonce.as_bytes().to_vec())
    .bind(block.hash.as_bytes().to_vec())
    .bind(block.timestamp as i64)
    .bind(block.diff.as_deref())
    .bind(block.cumulative_diff.as_deref())
    .bind(block.last_retarget.map(|v| v as i64))
    .bind(block.reward_addr.as_ref().map(|b| b.as_bytes().to_vec()))
    .bind(block.reward_pool.as_deref())
    .bind(block.block_size.as_deref())
    .bind(block.weave_size.as_deref())
    .bind(rate_dividend)
    .bind(rate_divisor)
    .bind(sched_dividend)
    .bind(sched_divisor)
    .bind(block.hash_list_merkle.as_ref().map(|b| b.as_bytes().to_vec()))
    .bind(block.wallet_list.as_ref().map(|b| b.as_bytes().to_vec()))
    .bind(block.tx_root.as_ref().map(|b| b.as_bytes().to_vec()))
    .bind(block.txs.len() as i64)
    .bind(missing_count as i64)
    .execute(&mut **dbtx)
    .await?;
    Ok(())
}

fn split_rate(rate: &Option<[String; 2]>) -> (Option<String>, Option<String>) {
    match rate {
        Some([dividend, divisor]) => (Some(dividend.clone()), Some(divisor.clone())),
        None => (None, None),
    }
}

/// Insert a transaction row, its interned tags and its owner wallet. Re-inserting an id updates its
/// height binding and keeps `indexed_at` monotonic.
async fn insert_transaction_row(
    dbtx: &mut Transaction<'_, Sqlite>,
    tx: &JsonTransaction,
    height: Option<u64>,
    write_signature: bool,
    now: i64,
) -> Result<(), sqlx::Error> {
    let owner_address = tx.owner_address();

    if !tx.owner.is_empty() {
        sqlx::query("INSERT OR IGNORE INTO wallets (address, public_modulus) VALUES (?1, ?2)")
            .bind(owner_address.clone())
            .bind(tx.owner.as_bytes().to_vec())
            .execute(&mut **dbtx)
            .await?;
    }

    for (i, tag) in tx.tags.iter().enumerate() {
        let name_hash = tag_hash(tag.name.as_bytes());
        let value_hash = tag_hash(tag.value.as_bytes());
        sqlx::query("INSERT OR IGNORE INTO tag_names (hash, name) VALUES (?1, ?2)")
            .bind(name_hash.clone())
            .bind(tag.name.as_bytes().to_vec())
            .execute(&mut **dbtx)
            .await?;
        sqlx::query("INSERT OR IGNORE INTO tag_values (hash, value) VALUES (?1, ?2)")
            .bind(value_hash.clone())
            .bind(tag.value.as_bytes().to_vec())
            .execute(&mut **dbtx)
            .await?;
        sqlx::query(
            "INSERT OR IGNORE INTO new_transaction_tags \
             (tag_name_hash, tag_value_hash, transaction_id, transaction_tag_index, indexed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(name_hash)
        .bind(value_hash)
        .bind(tx.id.to_vec())
        .bind(i as i64)
        .bind(now)
        .execute(&mut **dbtx)
        .await?;
    }

    sqlx::query(
        "INSERT INTO new_transactions (id, signature, format, last_tx, owner_address, target, \
         quantity, reward, data_size, data_root, content_type, content_encoding, tag_count, \
         indexed_at, height) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15) \
         ON CONFLICT (id) DO UPDATE SET \
           height = COALESCE(excluded.height, new_transactions.height), \
           indexed_at = MAX(new_transactions.indexed_at, excluded.indexed_at)",
    )
    .bind(tx.id.to_vec())
    .bind(if write_signature {
        tx.signature.as_ref().map(|s| s.as_bytes().to_vec())
    } else {
        None
    })
    .bind(tx.format as i64)
    .bind(tx.last_tx.as_bytes().to_vec())
    .bind(owner_address)
    .bind(tx.target.as_bytes().to_vec())
    .bind(tx.quantity.as_str())
    .bind(tx.reward.as_str())
    .bind(tx.data_size.as_str())
    .bind(tx.data_root.as_bytes().to_vec())
    .bind(tx.content_type())
    .bind(tx.content_encoding())
    .bind(tx.tags.len() as i64)
    .bind(now)
    .bind(height.map(|h| h as i64))
    .execute(&mut **dbtx)
    .await?;
    Ok(())
}

async fn copy_stable_rows(dbtx: &mut Transaction<'_, Sqlite>, height_threshold: i64) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT OR IGNORE INTO stable_blocks (height, indep_hash, previous_block, nonce, hash, \
         block_timestamp, diff, cumulative_diff, last_retarget, reward_addr, reward_pool, \
         block_size, weave_size, usd_to_ar_rate_dividend, usd_to_ar_rate_divisor, \
         scheduled_usd_to_ar_rate_dividend, scheduled_usd_to_ar_rate_divisor, hash_list_merkle, \
         wallet_list, tx_root, tx_count, missing_tx_count) \
         SELECT height, indep_hash, previous_block, nonce, hash, block_timestamp, diff, \
           cumulative_diff, last_retarget, reward_addr, reward_pool, block_size, weave_size, \
           usd_to_ar_rate_dividend, usd_to_ar_rate_divisor, scheduled_usd_to_ar_rate_dividend, \
           scheduled_usd_to_ar_rate_divisor, hash_list_merkle, wallet_list, tx_root, tx_count, \
           missing_tx_count \
         FROM new_blocks WHERE height <= ?1",
    )
    .bind(height_threshold)
    .execute(&mut **dbtx)
    .await?;

    sqlx::query(
        "INSERT OR IGNORE INTO stable_block_transactions \
         (block_indep_hash, transaction_id, block_transaction_index, height) \
         SELECT block_indep_hash, transaction_id, block_transaction_index, height \
         FROM new_block_transactions WHERE height <= ?1",
    )
    .bind(height_threshold)
    .execute(&mut **dbtx)
    .await?;

    sqlx::query(
        "INSERT OR IGNORE INTO stable_transactions (id, height, block_transaction_index, signature, \
         format, last_tx, owner_address, target, quantity, reward, data_size, data_root, \
         content_type, content_encoding, tag_count, indexed_at) \
         SELECT nt.id, nbt.height, nbt.block_transaction_index, nt.signature, nt.format, \
           nt.last_tx, nt.owner_address, nt.target, nt.quantity, nt.reward, nt.data_size, \
           nt.data_root, nt.content_type, nt.content_encoding, nt.tag_count, nt.indexed_at \
         FROM new_transactions nt \
         JOIN new_block_transactions nbt ON nbt.transaction_id = nt.id \
         WHERE nbt.height <= ?1",
    )
    .bind(height_threshold)
    .execute(&mut **dbtx)
    .await?;

    sqlx::query(
        "INSERT OR IGNORE INTO stable_transaction_tags (tag_name_hash, tag_value_hash, height, \
         block_transaction_index, transaction_tag_index, transaction_id) \
         SELECT ntt.tag_name_hash, ntt.tag_value_hash, nbt.height, nbt.block_transaction_index, \
           ntt.transaction_tag_index, ntt.transaction_id \
         FROM new_transaction_tags ntt \
         JOIN new_block_transactions nbt ON nbt.transaction_id = ntt.transaction_id \
         WHERE nbt.height <= ?1",
    )
    .bind(height_threshold)
    .execute(&mut **dbtx)
    .await?;

    Ok(())
}

async fn prune_new_rows(
    dbtx: &mut Transaction<'_, Sqlite>,
    height_threshold: i64,
    indexed_at_threshold: i64,
) -> Result<(), sqlx::Error> {
    // Tag and transaction pruning needs the block join, so it runs before the joins are dropped
    sqlx::query(
        "DELETE FROM new_transaction_tags WHERE indexed_at < ?2 AND transaction_id IN \
         (SELECT transaction_id FROM new_block_transactions WHERE height <= ?1)",
    )
    .bind(height_threshold)
    .bind(indexed_at_threshold)
    .execute(&mut **dbtx)
    .await?;

    sqlx::query(
        "DELETE FROM new_transactions WHERE indexed_at < ?2 AND id IN \
         (SELECT transaction_id FROM new_block_transactions WHERE height <= ?1)",
    )
    .bind(height_threshold)
    .bind(indexed_at_threshold)
    .execute(&mut **dbtx)
    .await?;

    sqlx::query("DELETE FROM new_blocks WHERE height <= ?1")
        .bind(height_threshold)
        .execute(&mut **dbtx)
        .await?;
    sqlx::query("DELETE FROM new_block_transactions WHERE height <= ?1")
        .bind(height_threshold)
        .execute(&mut **dbtx)
        .await?;
    sqlx::query("DELETE FROM missing_transactions WHERE height <= ?1")
        .bind(height_threshold)
        .execute(&mut **dbtx)
        .await?;

    Ok(())
}

async fn select_transaction_attributes(
    conn: &mut SqliteConnection,
    id: TxId,
) -> Result<Option<TransactionAttributes>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT id, height, block_transaction_index, format, owner_address, target, quantity, \
           reward, data_size, data_root, content_type, content_encoding, tag_count, 1 AS stable \
         FROM stable_transactions WHERE id = ?1 \
         UNION ALL \
         SELECT id, height, NULL, format, owner_address, target, quantity, reward, data_size, \
           data_root, content_type, content_encoding, tag_count, 0 AS stable \
         FROM new_transactions WHERE id = ?1 \
         LIMIT 1",
    )
    .bind(id.to_vec())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else { return Ok(None) };
    let id_bytes: Vec<u8> = row.get(0);
    Ok(Some(TransactionAttributes {
        id: TxId::try_from(id_bytes.as_slice()).map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        height: row.get::<Option<i64>, _>(1).map(|h| h as u64),
        block_transaction_index: row.get::<Option<i64>, _>(2).map(|i| i as u64),
        format: row.get::<i64, _>(3) as u8,
        owner_address: row.get(4),
        target: row.get(5),
        quantity: row.get(6),
        reward: row.get(7),
        data_size: row.get(8),
        data_root: row.get(9),
        content_type: row.get(10),
        content_encoding: row.get(11),
        tag_count: row.get::<i64, _>(12) as u64,
        stable: row.get::<i64, _>(13) != 0,
    }))
}
