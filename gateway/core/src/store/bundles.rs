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

//! Bundle records and nested data items in the `bundles` namespace.
//!
//! A data item may be indexed *optimistically* (no confirmed root transaction yet, most fields
//! null) and is re-saved with its placement once its bundle is unbundled at a known height.

use std::sync::{atomic::Ordering, Arc};

use futures::FutureExt;
use log::*;
use sqlx::{Connection, Row, Sqlite, SqliteConnection, Transaction};
use tokio::time::Instant;

use crate::{
    chain::types::{JsonTag, TxId},
    store::{now_ts, tag_hash, IndexStore, StoreError},
};

const LOG_TARGET: &str = "wg::store::bundles";

/// A data item flattened out of a bundle payload. Everything except `id` is optional because an
/// optimistic indexing pass may know nothing but the id and tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedDataItem {
    pub id_bytes: Vec<u8>,
    pub parent_id: Option<Vec<u8>>,
    pub parent_index: Option<i64>,
    pub root_transaction_id: Option<Vec<u8>>,
    pub height: Option<u64>,
    pub block_transaction_index: Option<i64>,
    pub signature: Option<Vec<u8>>,
    pub anchor: Option<Vec<u8>>,
    pub owner_address: Option<Vec<u8>>,
    pub target: Option<Vec<u8>>,
    pub data_offset: Option<i64>,
    pub data_size: Option<i64>,
    pub offset: Option<i64>,
    pub size: Option<i64>,
    pub signature_offset: Option<i64>,
    pub signature_size: Option<i64>,
    pub signature_type: Option<i64>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub tags: Vec<JsonTag>,
}

impl NormalizedDataItem {
    pub fn new(id: TxId) -> Self {
        Self {
            id_bytes: id.to_vec(),
            ..Default::default()
        }
    }

    /// An optimistic item knows no confirmed root transaction yet.
    pub fn is_optimistic(&self) -> bool {
        self.root_transaction_id.is_none()
    }
}

/// Metadata about a parent transaction known to contain data items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BundleRecord {
    pub id: Vec<u8>,
    pub root_transaction_id: Option<Vec<u8>>,
    pub format: Option<i64>,
    pub unbundle_filter_id: Option<String>,
    pub index_filter_id: Option<String>,
    pub data_item_count: Option<i64>,
    pub matched_data_item_count: Option<i64>,
    pub duplicated_data_item_count: Option<i64>,
    pub queued_at: Option<i64>,
    pub skipped_at: Option<i64>,
    pub unbundled_at: Option<i64>,
    pub fully_indexed_at: Option<i64>,
}

/// What `save_bundle` knew about the bundle before the upsert; the caller compares filter ids to
/// decide whether the bundle must be unbundled again.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviousBundleState {
    pub unbundle_filter_id: Option<String>,
    pub index_filter_id: Option<String>,
    pub last_fully_indexed_at: Option<i64>,
}

/// Attribute view of an indexed data item, served to the data path.
#[derive(Debug, Clone, PartialEq)]
pub struct DataItemAttributes {
    pub id: Vec<u8>,
    pub parent_id: Option<Vec<u8>>,
    pub root_transaction_id: Option<Vec<u8>>,
    pub height: Option<u64>,
    pub signature: Option<Vec<u8>>,
    pub signature_offset: Option<i64>,
    pub signature_size: Option<i64>,
    pub signature_type: Option<i64>,
    pub data_offset: Option<i64>,
    pub data_size: Option<i64>,
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub stable: bool,
}

/// Where a nested payload lives inside its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct DataParent {
    pub parent_id: Vec<u8>,
    pub offset: Option<i64>,
    pub size: Option<i64>,
}

impl IndexStore {
    /// Index one data item (optimistic or placed) and its tags, then announce it on the bus.
    pub async fn save_data_item(&self, item: &NormalizedDataItem) -> Result<(), StoreError> {
        let owned = item.clone();
        let write_signatures = self.config().write_data_item_signatures;
        self.inner()
            .bundles_write
            .run("save_data_item", move |conn| {
                async move {
                    let now = now_ts();
                    let mut dbtx = conn.begin().await?;
                    insert_data_item_row(&mut dbtx, &owned, write_signatures, now).await?;
                    dbtx.commit().await?;
                    Ok(())
                }
                .boxed()
            })
            .await?;

        self.events().publish_data_item_indexed(Arc::new(item.clone()));
        self.inner().data_items_since_flush.fetch_add(1, Ordering::Relaxed);
        self.maybe_flush_data_items().await;
        Ok(())
    }

    /// Upsert a bundle record, returning the prior filter ids and last full indexing time so the
    /// caller can decide whether a filter change requires re-unbundling.
    pub async fn save_bundle(&self, record: &BundleRecord) -> Result<PreviousBundleState, StoreError> {
        let record = record.clone();
        self.inner()
            .bundles_write
            .run("save_bundle", move |conn| {
                async move {
                    let mut dbtx = conn.begin().await?;

                    let previous = sqlx::query(
                        "SELECT unbundle_filter_id, index_filter_id, last_fully_indexed_at \
                         FROM bundles WHERE id = ?1",
                    )
                    .bind(record.id.clone())
                    .fetch_optional(&mut *dbtx)
                    .await?
                    .map(|row| PreviousBundleState {
                        unbundle_filter_id: row.get(0),
                        index_filter_id: row.get(1),
                        last_fully_indexed_at: row.get(2),
                    })
                    .unwrap_or_default();

                    sqlx::query(
                        "INSERT INTO bundles (id, root_transaction_id, format, unbundle_filter_id, \
                           index_filter_id, data_item_count, matched_data_item_count, \
                           duplicated_data_item_count, queued_at, skipped_at, unbundled_at, \
                           fully_indexed_at, last_fully_indexed_at, import_attempt_count) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12, \
                           (?9 IS NOT NULL)) \
                         ON CONFLICT (id) DO UPDATE SET \
                           root_transaction_id = COALESCE(excluded.root_transaction_id, bundles.root_transaction_id), \
                           format = COALESCE(excluded.format, bundles.format), \
                           unbundle_filter_id = COALESCE(excluded.unbundle_filter_id, bundles.unbundle_filter_id), \
                           index_filter_id = COALESCE(excluded.index_filter_id, bundles.index_filter_id), \
                           data_item_count = COALESCE(excluded.data_item_count, bundles.data_item_count), \
                           matched_data_item_count = COALESCE(excluded.matched_data_item_count, bundles.matched_data_item_count), \
                           duplicated_data_item_count = COALESCE(excluded.duplicated_data_item_count, bundles.duplicated_data_item_count), \
                           queued_at = COALESCE(excluded.queued_at, bundles.queued_at), \
                           skipped_at = COALESCE(excluded.skipped_at, bundles.skipped_at), \
                           unbundled_at = COALESCE(excluded.unbundled_at, bundles.unbundled_at), \
                           fully_indexed_at = COALESCE(excluded.fully_indexed_at, bundles.fully_indexed_at), \
                           last_fully_indexed_at = COALESCE(excluded.fully_indexed_at, bundles.last_fully_indexed_at), \
                           import_attempt_count = bundles.import_attempt_count + \
                             (excluded.queued_at IS NOT NULL)",
                    )
                    .bind(record.id.clone())
                    .bind(record.root_transaction_id.clone())
                    .bind(record.format)
                    .bind(record.unbundle_filter_id.clone())
                    .bind(record.index_filter_id.clone())
                    .bind(record.data_item_count)
                    .bind(record.matched_data_item_count)
                    .bind(record.duplicated_data_item_count)
                    .bind(record.queued_at)
                    .bind(record.skipped_at)
                    .bind(record.unbundled_at)
                    .bind(record.fully_indexed_at)
                    .execute(&mut *dbtx)
                    .await?;

                    dbtx.commit().await?;
                    Ok(previous)
                }
                .boxed()
            })
            .await
    }

    /// Bundles whose processing never finished and whose last attempt is older than the reprocess
    /// wait, oldest attempt first.
    pub async fn get_failed_bundle_ids(&self, limit: usize) -> Result<Vec<Vec<u8>>, StoreError> {
        let limit = limit as i64;
        let cutoff = now_ts() - self.config().bundle_reprocess_wait.as_secs() as i64;
        self.inner()
            .bundles_read
            .run("get_failed_bundle_ids", move |conn| {
                async move {
                    let rows = sqlx::query(
                        "SELECT id FROM bundles \
                         WHERE fully_indexed_at IS NULL \
                           AND MAX(COALESCE(queued_at, 0), COALESCE(skipped_at, 0)) < ?1 \
                         ORDER BY MAX(COALESCE(queued_at, 0), COALESCE(skipped_at, 0)) ASC \
                         LIMIT ?2",
                    )
                    .bind(cutoff)
                    .bind(limit)
                    .fetch_all(&mut *conn)
                    .await?;
                    Ok(rows.into_iter().map(|row| row.get::<Vec<u8>, _>(0)).collect())
                }
                .boxed()
            })
            .await
    }

    /// Scan indexed transactions whose tags mark them as bundles and create missing bundle records.
    /// Returns the number of records inserted.
    pub async fn backfill_bundles(&self) -> Result<u64, StoreError> {
        // Bundle candidates live in the core namespace; membership is by the binary bundle format tag
        let format_name_hash = tag_hash(b"Bundle-Format");
        let format_value_hash = tag_hash(b"binary");

        let candidates = self
            .inner()
            .core_read
            .run("select_bundle_candidates", move |conn| {
                async move {
                    let rows = sqlx::query(
                        "SELECT t.transaction_id FROM new_transaction_tags t \
                         WHERE t.tag_name_hash = ?1 AND t.tag_value_hash = ?2 \
                         UNION \
                         SELECT t.transaction_id FROM stable_transaction_tags t \
                         WHERE t.tag_name_hash = ?1 AND t.tag_value_hash = ?2",
                    )
                    .bind(format_name_hash)
                    .bind(format_value_hash)
                    .fetch_all(&mut *conn)
                    .await?;
                    Ok(rows.into_iter().map(|row| row.get::<Vec<u8>, _>(0)).collect::<Vec<_>>())
                }
                .boxed()
            })
            .await?;

        if candidates.is_empty() {
            return Ok(0);
        }

        let inserted = self
            .inner()
            .bundles_write
            .run("backfill_bundles", move |conn| {
                async move {
                    let mut inserted = 0u64;
                    let mut dbtx = conn.begin().await?;
                    for id in candidates {
                        let done = sqlx::query(
                            "INSERT OR IGNORE INTO bundles (id, root_transaction_id) VALUES (?1, ?1)",
                        )
                        .bind(id)
                        .execute(&mut *dbtx)
                        .await?;
                        inserted += done.rows_affected();
                    }
                    dbtx.commit().await?;
                    Ok(inserted)
                }
                .boxed()
            })
            .await?;

        if inserted > 0 {
            info!(target: LOG_TARGET, "Backfilled {} bundle records", inserted);
        }
        Ok(inserted)
    }

    /// Mark bundles processed under different filters for re-processing.
    pub async fn update_bundles_for_filter_change(
        &self,
        unbundle_filter_id: &str,
        index_filter_id: &str,
    ) -> Result<u64, StoreError> {
        let unbundle = unbundle_filter_id.to_string();
        let index = index_filter_id.to_string();
        self.inner()
            .bundles_write
            .run("update_bundles_for_filter_change", move |conn| {
                async move {
                    let done = sqlx::query(
                        "UPDATE bundles SET queued_at = NULL, skipped_at = NULL, fully_indexed_at = NULL \
                         WHERE unbundle_filter_id IS NOT ?1 OR index_filter_id IS NOT ?2",
                    )
                    .bind(unbundle)
                    .bind(index)
                    .execute(&mut *conn)
                    .await?;
                    Ok(done.rows_affected())
                }
                .boxed()
            })
            .await
    }

    /// The bundle half of stabilisation, run with the same thresholds as the core half.
    pub(crate) async fn save_bundles_stable_data(
        &self,
        height_threshold: i64,
        indexed_at_threshold: i64,
    ) -> Result<(), StoreError> {
        self.inner()
            .bundles_write
            .run("save_bundles_stable_data", move |conn| {
                async move {
                    let mut dbtx = conn.begin().await?;

                    sqlx::query(
                        "INSERT OR IGNORE INTO stable_data_items (id, parent_id, parent_index, \
                           root_transaction_id, height, block_transaction_index, signature, anchor, \
                           owner_address, target, data_offset, data_size, item_offset, item_size, \
                           signature_offset, signature_size, signature_type, content_type, \
                           content_encoding, tag_count, indexed_at) \
                         SELECT id, parent_id, parent_index, root_transaction_id, height, \
                           block_transaction_index, signature, anchor, owner_address, target, \
                           data_offset, data_size, item_offset, item_size, signature_offset, \
                           signature_size, signature_type, content_type, content_encoding, \
                           tag_count, indexed_at \
                         FROM new_data_items \
                         WHERE height IS NOT NULL AND height <= ?1 \
                           AND block_transaction_index IS NOT NULL",
                    )
                    .bind(height_threshold)
                    .execute(&mut *dbtx)
                    .await?;

                    sqlx::query(
                        "INSERT OR IGNORE INTO stable_data_item_tags (tag_name_hash, tag_value_hash, \
                           height, block_transaction_index, data_item_id, data_item_tag_index) \
                         SELECT t.tag_name_hash, t.tag_value_hash, di.height, \
                           di.block_transaction_index, t.data_item_id, t.data_item_tag_index \
                         FROM new_data_item_tags t \
                         JOIN new_data_items di ON di.id = t.data_item_id \
                         WHERE di.height IS NOT NULL AND di.height <= ?1 \
                           AND di.block_transaction_index IS NOT NULL",
                    )
                    .bind(height_threshold)
                    .execute(&mut *dbtx)
                    .await?;

                    sqlx::query(
                        "DELETE FROM new_data_item_tags WHERE indexed_at < ?2 AND data_item_id IN \
                         (SELECT id FROM new_data_items WHERE height IS NOT NULL AND height <= ?1)",
                    )
                    .bind(height_threshold)
                    .bind(indexed_at_threshold)
                    .execute(&mut *dbtx)
                    .await?;

                    sqlx::query(
                        "DELETE FROM new_data_items \
                         WHERE height IS NOT NULL AND height <= ?1 AND indexed_at < ?2",
                    )
                    .bind(height_threshold)
                    .bind(indexed_at_threshold)
                    .execute(&mut *dbtx)
                    .await?;

                    dbtx.commit().await?;
                    Ok(())
                }
                .boxed()
            })
            .await
    }

    /// Fork rewind for the bundle namespace: placements above `height` are no longer confirmed, but
    /// the items themselves stay indexed as optimistic rows.
    pub(crate) async fn reset_bundles_to_height(&self, height: u64) -> Result<(), StoreError> {
        let h = height as i64;
        self.inner()
            .bundles_write
            .run("reset_bundles_to_height", move |conn| {
                async move {
                    sqlx::query(
                        "UPDATE new_data_items SET height = NULL, block_transaction_index = NULL \
                         WHERE height > ?1",
                    )
                    .bind(h)
                    .execute(&mut *conn)
                    .await?;
                    Ok(())
                }
                .boxed()
            })
            .await
    }

    pub(crate) fn note_data_item_flush(&self) {
        self.inner().data_items_since_flush.store(0, Ordering::Relaxed);
        *self
            .inner()
            .last_data_item_flush
            .lock()
            .expect("data item flush clock poisoned") = Instant::now();
    }

    /// Secondary stabilisation triggers for the data-item lane: saved-count and elapsed-time
    /// thresholds independent of the block cadence. Reuses the thresholds of the last core flush.
    async fn maybe_flush_data_items(&self) {
        let config = self.config();
        let count = self.inner().data_items_since_flush.load(Ordering::Relaxed);
        let elapsed = self
            .inner()
            .last_data_item_flush
            .lock()
            .expect("data item flush clock poisoned")
            .elapsed();
        if (count as u64) < config.data_item_flush_count_threshold && elapsed < config.max_flush_interval {
            return;
        }
        let height_threshold = self.inner().last_flush_height_threshold.load(Ordering::Relaxed);
        if height_threshold < 0 {
            return;
        }
        let indexed_at_threshold = now_ts() - config.new_row_grace.as_secs() as i64;
        debug!(
            target: LOG_TARGET,
            "Data item flush trigger fired ({} items, {:?} since last flush)", count, elapsed
        );
        if let Err(e) = self.save_bundles_stable_data(height_threshold, indexed_at_threshold).await {
            warn!(target: LOG_TARGET, "Data item flush failed: {}", e);
        }
        self.note_data_item_flush();
    }
}

async fn insert_data_item_row(
    dbtx: &mut Transaction<'_, Sqlite>,
    item: &NormalizedDataItem,
    write_signature: bool,
    now: i64,
) -> Result<(), sqlx::Error> {
    for (i, tag) in item.tags.iter().enumerate() {
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
            "INSERT OR IGNORE INTO new_data_item_tags \
             (tag_name_hash, tag_value_hash, data_item_id, data_item_tag_index, indexed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(name_hash)
        .bind(value_hash)
        .bind(item.id_bytes.clone())
        .bind(i as i64)
        .bind(now)
        .execute(&mut **dbtx)
        .await?;
    }

    sqlx::query(
        "INSERT INTO new_data_items (id, parent_id, parent_index, root_transaction_id, height, \
           block_transaction_index, signature, anchor, owner_address, target, data_offset, \
           data_size, item_offset, item_size, signature_offset, signature_size, signature_type, \
           content_type, content_encoding, tag_count, indexed_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21) \
         ON CONFLICT (id) DO UPDATE SET \
           parent_id = COALESCE(excluded.parent_id, new_data_items.parent_id), \
           parent_index = COALESCE(excluded.parent_index, new_data_items.parent_index), \
           root_transaction_id = COALESCE(excluded.root_transaction_id, new_data_items.root_transaction_id), \
           height = COALESCE(excluded.height, new_data_items.height), \
           block_transaction_index = COALESCE(excluded.block_transaction_index, new_data_items.block_transaction_index), \
           signature = COALESCE(excluded.signature, new_data_items.signature), \
           anchor = COALESCE(excluded.anchor, new_data_items.anchor), \
           owner_address = COALESCE(excluded.owner_address, new_data_items.owner_address), \
           target = COALESCE(excluded.target, new_data_items.target), \
           data_offset = COALESCE(excluded.data_offset, new_data_items.data_offset), \
           data_size = COALESCE(excluded.data_size, new_data_items.data_size), \
           item_offset = COALESCE(excluded.item_offset, new_data_items.item_offset), \
           item_size = COALESCE(excluded.item_size, new_data_items.item_size), \
           signature_offset = COALESCE(excluded.signature_offset, new_data_items.signature_offset), \
           signature_size = COALESCE(excluded.signature_size, new_data_items.signature_size), \
           signature_type = COALESCE(excluded.signature_type, new_data_items.signature_type), \
           content_type = COALESCE(excluded.content_type, new_data_items.content_type), \
           content_encoding = COALESCE(excluded.content_encoding, new_data_items.content_encoding), \
           tag_count = MAX(excluded.tag_count, new_data_items.tag_count), \
           indexed_at = MAX(new_data_items.indexed_at, excluded.indexed_at)",
    )
    .bind(item.id_bytes.clone())
    .bind(item.parent_id.clone())
    .bind(item.parent_index)
    .bind(item.root_transaction_id.clone())
    .bind(item.height.map(|h| h as i64))
    .bind(item.block_transaction_index)
    .bind(if write_signature { item.signature.clone() } else { None })
    .bind(item.anchor.clone())
    .bind(item.owner_address.clone())
    .bind(item.target.clone())
    .bind(item.data_offset)
    .bind(item.data_size)
    .bind(item.offset)
    .bind(item.size)
    .bind(item.signature_offset)
    .bind(item.signature_size)
    .bind(item.signature_type)
    .bind(item.content_type.clone())
    .bind(item.content_encoding.clone())
    .bind(item.tags.len() as i64)
    .bind(now)
    .execute(&mut **dbtx)
    .await?;
    Ok(())
}

pub(crate) async fn select_data_item_attributes(
    conn: &mut SqliteConnection,
    id: Vec<u8>,
) -> Result<Option<DataItemAttributes>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT id, parent_id, root_transaction_id, height, signature, signature_offset, \
           signature_size, signature_type, data_offset, data_size, content_type, content_encoding, \
           1 AS stable \
         FROM stable_data_items WHERE id = ?1 \
         UNION ALL \
         SELECT id, parent_id, root_transaction_id, height, signature, signature_offset, \
           signature_size, signature_type, data_offset, data_size, content_type, content_encoding, \
           0 AS stable \
         FROM new_data_items WHERE id = ?1 \
         LIMIT 1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| DataItemAttributes {
        id: row.get(0),
        parent_id: row.get(1),
        root_transaction_id: row.get(2),
        height: row.get::<Option<i64>, _>(3).map(|h| h as u64),
        signature: row.get(4),
        signature_offset: row.get(5),
        signature_size: row.get(6),
        signature_type: row.get(7),
        data_offset: row.get(8),
        data_size: row.get(9),
        content_type: row.get(10),
        content_encoding: row.get(11),
        stable: row.get::<i64, _>(12) != 0,
    }))
}

pub(crate) async fn select_data_parent(
    conn: &mut SqliteConnection,
    id: Vec<u8>,
) -> Result<Option<DataParent>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT parent_id, item_offset, item_size FROM stable_data_items \
         WHERE id = ?1 AND parent_id IS NOT NULL \
         UNION ALL \
         SELECT parent_id, item_offset, item_size FROM new_data_items \
         WHERE id = ?1 AND parent_id IS NOT NULL \
         LIMIT 1",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|row| DataParent {
        parent_id: row.get(0),
        offset: row.get(1),
        size: row.get(2),
    }))
}
