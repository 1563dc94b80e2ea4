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

//! Content data attributes in the `data` namespace.
//!
//! Reads sit behind circuit breakers: when the namespace struggles the callers get `None` and
//! degrade (a 404, a fallback source) instead of queueing more work on the lane. Writes are
//! deduplicated twice, by id in a short in-memory window and by content hash in the table.

use futures::FutureExt;
use log::*;
use tokio::time::Instant;

use crate::store::{
    bundles::{select_data_item_attributes, select_data_parent, DataItemAttributes, DataParent},
    now_ts,
    IndexStore,
    StoreError,
};

const LOG_TARGET: &str = "wg::store::data";

/// Attributes of a contiguous piece of content, addressed by item or transaction id.
#[derive(Debug, Clone, PartialEq)]
pub struct DataAttributes {
    pub hash: Option<Vec<u8>>,
    pub data_size: Option<i64>,
    pub content_type: Option<String>,
    pub verified: bool,
    pub cached_at: Option<i64>,
}

impl IndexStore {
    /// Record the content hash, size and type discovered for an id. Repeat saves for the same id
    /// inside the dedup window are dropped before they reach the write lane.
    pub async fn save_data_content_attributes(
        &self,
        id: &[u8],
        hash: &[u8],
        data_size: i64,
        content_type: Option<&str>,
        cached_at: Option<i64>,
    ) -> Result<(), StoreError> {
        {
            let ttl = self.config().data_save_dedup_ttl;
            let mut recent = self
                .inner()
                .recent_data_saves
                .lock()
                .expect("data save dedup lock poisoned");
            let now = Instant::now();
            recent.retain(|_, at| now.duration_since(*at) < ttl);
            if recent.contains_key(id) {
                trace!(target: LOG_TARGET, "Skipping duplicate data attribute save");
                return Ok(());
            }
            recent.insert(id.to_vec(), now);
        }

        let id = id.to_vec();
        let hash = hash.to_vec();
        let content_type = content_type.map(|s| s.to_string());
        self.inner()
            .data_write
            .run("save_data_content_attributes", move |conn| {
                async move {
                    let now = now_ts();
                    // The hash table is content-addressed, so a second id pointing at known bytes
                    // writes nothing new
                    sqlx::query(
                        "INSERT OR IGNORE INTO contiguous_data \
                         (hash, data_size, original_source_content_type, indexed_at, cached_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                    )
                    .bind(hash.clone())
                    .bind(data_size)
                    .bind(content_type)
                    .bind(now)
                    .bind(cached_at)
                    .execute(&mut *conn)
                    .await?;

                    sqlx::query(
                        "INSERT INTO contiguous_data_ids (id, contiguous_data_hash, indexed_at) \
                         VALUES (?1, ?2, ?3) \
                         ON CONFLICT (id) DO UPDATE SET \
                           contiguous_data_hash = excluded.contiguous_data_hash, \
                           indexed_at = MAX(contiguous_data_ids.indexed_at, excluded.indexed_at)",
                    )
                    .bind(id)
                    .bind(hash)
                    .bind(now)
                    .execute(&mut *conn)
                    .await?;
                    Ok(())
                }
                .boxed()
            })
            .await
    }

    pub async fn mark_data_verified(&self, id: &[u8]) -> Result<(), StoreError> {
        let id = id.to_vec();
        self.inner()
            .data_write
            .run("mark_data_verified", move |conn| {
                async move {
                    sqlx::query("UPDATE contiguous_data_ids SET verified = 1, verified_at = ?2 WHERE id = ?1")
                        .bind(id)
                        .bind(now_ts())
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                }
                .boxed()
            })
            .await
    }

    /// Data attributes behind a circuit breaker; `None` means unavailable right now and the caller
    /// should fall back to a non-authoritative source.
    pub async fn get_data_attributes(&self, id: &[u8]) -> Option<DataAttributes> {
        let id = id.to_vec();
        let lane = self.inner().data_read.clone();
        self.inner()
            .breakers
            .data_attributes
            .call(async move {
                lane.run("get_data_attributes", move |conn| {
                    async move {
                        let row = sqlx::query(
                            "SELECT d.hash, d.data_size, d.original_source_content_type, \
                               i.verified, d.cached_at \
                             FROM contiguous_data_ids i \
                             LEFT JOIN contiguous_data d ON d.hash = i.contiguous_data_hash \
                             WHERE i.id = ?1",
                        )
                        .bind(id)
                        .fetch_optional(&mut *conn)
                        .await?;
                        Ok(row.map(|row| {
                            use sqlx::Row;
                            DataAttributes {
                                hash: row.get(0),
                                data_size: row.get(1),
                                content_type: row.get(2),
                                verified: row.get::<i64, _>(3) != 0,
                                cached_at: row.get(4),
                            }
                        }))
                    }
                    .boxed()
                })
                .await
            })
            .await
            .flatten()
    }

    /// Parent placement of a nested payload, behind a circuit breaker.
    pub async fn get_data_parent(&self, id: &[u8]) -> Option<DataParent> {
        let id = id.to_vec();
        let lane = self.inner().bundles_read.clone();
        self.inner()
            .breakers
            .data_parent
            .call(async move {
                lane.run("get_data_parent", move |conn| {
                    async move { select_data_parent(conn, id).await }.boxed()
                })
                .await
            })
            .await
            .flatten()
    }

    /// Data item attributes, behind a circuit breaker.
    pub async fn get_data_item_attributes(&self, id: &[u8]) -> Option<DataItemAttributes> {
        let id = id.to_vec();
        let lane = self.inner().bundles_read.clone();
        self.inner()
            .breakers
            .data_item_attributes
            .call(async move {
                lane.run("get_data_item_attributes", move |conn| {
                    async move { select_data_item_attributes(conn, id).await }.boxed()
                })
                .await
            })
            .await
            .flatten()
    }
}
