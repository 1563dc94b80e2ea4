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

//! Operator moderation lists in the `moderation` namespace.

use futures::FutureExt;
use sqlx::Row;

use crate::store::{now_ts, IndexStore, StoreError};

/// What a moderation entry blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockedTarget {
    Id(Vec<u8>),
    Hash(Vec<u8>),
    Name(String),
}

impl IndexStore {
    pub async fn block_target(
        &self,
        target: BlockedTarget,
        source: Option<&str>,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        let source = source.map(|s| s.to_string());
        let notes = notes.map(|s| s.to_string());
        self.inner()
            .moderation_write
            .run("block_target", move |conn| {
                async move {
                    let now = now_ts();
                    let (sql, key): (&str, BlockedKey) = match target {
                        BlockedTarget::Id(id) => (
                            "INSERT OR REPLACE INTO blocked_ids (id, source, notes, blocked_at) \
                             VALUES (?1, ?2, ?3, ?4)",
                            BlockedKey::Bytes(id),
                        ),
                        BlockedTarget::Hash(hash) => (
                            "INSERT OR REPLACE INTO blocked_hashes (hash, source, notes, blocked_at) \
                             VALUES (?1, ?2, ?3, ?4)",
                            BlockedKey::Bytes(hash),
                        ),
                        BlockedTarget::Name(name) => (
                            "INSERT OR REPLACE INTO blocked_names (name, source, notes, blocked_at) \
                             VALUES (?1, ?2, ?3, ?4)",
                            BlockedKey::Text(name),
                        ),
                    };
                    let query = sqlx::query(sql);
                    let query = match key {
                        BlockedKey::Bytes(bytes) => query.bind(bytes),
                        BlockedKey::Text(text) => query.bind(text),
                    };
                    query.bind(source).bind(notes).bind(now).execute(&mut *conn).await?;
                    Ok(())
                }
                .boxed()
            })
            .await
    }

    pub async fn unblock_target(&self, target: BlockedTarget) -> Result<(), StoreError> {
        self.inner()
            .moderation_write
            .run("unblock_target", move |conn| {
                async move {
                    match target {
                        BlockedTarget::Id(id) => {
                            sqlx::query("DELETE FROM blocked_ids WHERE id = ?1")
                                .bind(id)
                                .execute(&mut *conn)
                                .await?;
                        },
                        BlockedTarget::Hash(hash) => {
                            sqlx::query("DELETE FROM blocked_hashes WHERE hash = ?1")
                                .bind(hash)
                                .execute(&mut *conn)
                                .await?;
                        },
                        BlockedTarget::Name(name) => {
                            sqlx::query("DELETE FROM blocked_names WHERE name = ?1")
                                .bind(name)
                                .execute(&mut *conn)
                                .await?;
                        },
                    }
                    Ok(())
                }
                .boxed()
            })
            .await
    }

    pub async fn is_id_blocked(&self, id: &[u8]) -> Result<bool, StoreError> {
        let id = id.to_vec();
        self.inner()
            .moderation_read
            .run("is_id_blocked", move |conn| {
                async move {
                    let row = sqlx::query("SELECT 1 FROM blocked_ids WHERE id = ?1")
                        .bind(id)
                        .fetch_optional(&mut *conn)
                        .await?;
                    Ok(row.is_some())
                }
                .boxed()
            })
            .await
    }

    pub async fn is_hash_blocked(&self, hash: &[u8]) -> Result<bool, StoreError> {
        let hash = hash.to_vec();
        self.inner()
            .moderation_read
            .run("is_hash_blocked", move |conn| {
                async move {
                    let row = sqlx::query("SELECT 1 FROM blocked_hashes WHERE hash = ?1")
                        .bind(hash)
                        .fetch_optional(&mut *conn)
                        .await?;
                    Ok(row.is_some())
                }
                .boxed()
            })
            .await
    }

    pub async fn get_blocked_names(&self) -> Result<Vec<String>, StoreError> {
        self.inner()
            .moderation_read
            .run("get_blocked_names", move |conn| {
                async move {
                    let rows = sqlx::query("SELECT name FROM blocked_names ORDER BY name")
                        .fetch_all(&mut *conn)
                        .await?;
                    Ok(rows.into_iter().map(|row| row.get::<String, _>(0)).collect())
                }
                .boxed()
            })
            .await
    }
}

enum BlockedKey {
    Bytes(Vec<u8>),
    Text(String),
}
