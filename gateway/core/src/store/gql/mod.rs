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

//! GraphQL-facing query surface over the index.
//!
//! A page is assembled from up to four sources (stable/new x transactions/items). In descending
//! height order the new sources are consulted first; only if they cannot fill the page is the
//! stable side queried, with its height ceiling lowered below the last row already returned so the
//! union never repeats a row.

pub mod cursor;
pub(crate) mod planner;

use std::cmp::Ordering;

use futures::FutureExt;
use log::*;
use sqlx::{Row, SqliteConnection};

pub use cursor::{Cursor, DATA_ITEM_ID_SENTINEL};

use crate::{
    chain::types::TxId,
    store::{
        gql::planner::{build_source_query, HeightBounds, RawGqlRow, Source},
        IndexStore,
        StoreError,
    },
};

const LOG_TARGET: &str = "wg::store::gql";

/// Hard ceiling on a single page.
const MAX_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    HeightAsc,
    HeightDesc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    pub name: Vec<u8>,
    pub values: Vec<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct GqlQuery {
    pub ids: Vec<TxId>,
    pub recipients: Vec<Vec<u8>>,
    pub owners: Vec<Vec<u8>>,
    pub min_height: Option<u64>,
    pub max_height: Option<u64>,
    /// Parent bundle ids; a non-empty filter restricts results to data items.
    pub bundled_in: Vec<Vec<u8>>,
    pub tags: Vec<TagFilter>,
    pub sort: SortOrder,
    pub page_size: usize,
    pub cursor: Option<String>,
}

impl Default for GqlQuery {
    fn default() -> Self {
        Self {
            ids: vec![],
            recipients: vec![],
            owners: vec![],
            min_height: None,
            max_height: None,
            bundled_in: vec![],
            tags: vec![],
            sort: SortOrder::HeightDesc,
            page_size: 10,
            cursor: None,
        }
    }
}

/// One result row with its resolved tags.
#[derive(Debug, Clone, PartialEq)]
pub struct GqlItem {
    pub id: Vec<u8>,
    pub is_data_item: bool,
    pub height: Option<u64>,
    pub block_transaction_index: Option<u64>,
    pub indexed_at: i64,
    pub owner_address: Option<Vec<u8>>,
    pub target: Option<Vec<u8>>,
    pub quantity: Option<String>,
    pub reward: Option<String>,
    pub data_size: Option<String>,
    pub content_type: Option<String>,
    pub bundled_in: Option<Vec<u8>>,
    pub tags: Vec<(Vec<u8>, Vec<u8>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GqlEdge {
    pub cursor: String,
    pub item: GqlItem,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GqlPage {
    pub edges: Vec<GqlEdge>,
    pub has_next_page: bool,
}

impl IndexStore {
    /// Run one paginated query across the transaction and data item sources.
    pub async fn gql_transactions(&self, query: GqlQuery) -> Result<GqlPage, StoreError> {
        let cursor = match &query.cursor {
            Some(encoded) => Some(Cursor::decode(encoded)?),
            None => None,
        };
        let page_size = query.page_size.clamp(1, MAX_PAGE_SIZE);
        let fetch_limit = page_size + 1;
        let desc = query.sort == SortOrder::HeightDesc;

        let base_bounds = HeightBounds {
            min: query.min_height,
            max: query.max_height,
        };

        let (first_phase, second_phase): (&[Source], &[Source]) = if desc {
            (&[Source::NewTxs, Source::NewItems], &[Source::StableTxs, Source::StableItems])
        } else {
            (&[Source::StableTxs, Source::StableItems], &[Source::NewTxs, Source::NewItems])
        };

        let mut rows = self
            .fetch_sources(first_phase, &query, cursor.as_ref(), base_bounds, fetch_limit)
            .await?;
        sort_rows(&mut rows, desc);
        rows.truncate(fetch_limit);

        if rows.len() < fetch_limit {
            let remaining = fetch_limit - rows.len();
            let (bounds, phase_cursor) = second_phase_window(&rows, &query, cursor.as_ref(), desc);
            let mut tail = self
                .fetch_sources(second_phase, &query, phase_cursor, bounds, remaining)
                .await?;
            sort_rows(&mut tail, desc);
            tail.truncate(remaining);
            rows.extend(tail);
        }

        let has_next_page = rows.len() > page_size;
        rows.truncate(page_size);

        let tags = self.resolve_tags(&rows).await?;
        let edges = rows
            .into_iter()
            .zip(tags)
            .map(|(row, tags)| make_edge(row, tags))
            .collect();

        Ok(GqlPage { edges, has_next_page })
    }

    async fn fetch_sources(
        &self,
        sources: &[Source],
        query: &GqlQuery,
        cursor: Option<&Cursor>,
        bounds: HeightBounds,
        limit: usize,
    ) -> Result<Vec<RawGqlRow>, StoreError> {
        let selectivity = &self.config().tag_selectivity;
        let mut rows = Vec::new();
        for &source in sources {
            // A bundledIn filter can only match nested items, so transaction sources are skipped
            if !source.is_item() && !query.bundled_in.is_empty() {
                continue;
            }
            let mut qb = build_source_query(source, query, cursor, bounds, limit, selectivity);
            trace!(target: LOG_TARGET, "{:?} query: {}", source, qb.sql());
            let fetched = self
                .inner()
                .gql_read
                .run("gql_source_query", move |conn| {
                    async move {
                        let rows = qb.build().fetch_all(&mut *conn).await?;
                        Ok(rows
                            .iter()
                            .map(|row| RawGqlRow::from_row(row, source.is_item()))
                            .collect::<Vec<_>>())
                    }
                    .boxed()
                })
                .await?;
            rows.extend(fetched);
        }
        Ok(rows)
    }

    /// Resolve interned tag bytes for a page of rows in one lane trip. Transactions read the core
    /// interning tables, data items the bundle ones.
    async fn resolve_tags(&self, rows: &[RawGqlRow]) -> Result<Vec<Vec<(Vec<u8>, Vec<u8>)>>, StoreError> {
        if rows.is_empty() {
            return Ok(vec![]);
        }
        let keys = rows
            .iter()
            .map(|row| (row.id.clone(), row.is_data_item))
            .collect::<Vec<_>>();
        self.inner()
            .gql_read
            .run("resolve_gql_tags", move |conn| {
                async move {
                    let mut resolved = Vec::with_capacity(keys.len());
                    for (id, is_item) in keys {
                        resolved.push(fetch_row_tags(conn, id, is_item).await?);
                    }
                    Ok(resolved)
                }
                .boxed()
            })
            .await
    }
}

async fn fetch_row_tags(
    conn: &mut SqliteConnection,
    id: Vec<u8>,
    is_item: bool,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>, sqlx::Error> {
    let sql = if is_item {
        "SELECT n.name, v.value FROM ( \
           SELECT tag_name_hash, tag_value_hash, data_item_tag_index AS i \
             FROM bundles.new_data_item_tags WHERE data_item_id = ?1 \
           UNION \
           SELECT tag_name_hash, tag_value_hash, data_item_tag_index \
             FROM bundles.stable_data_item_tags WHERE data_item_id = ?1) t \
         JOIN bundles.tag_names n ON n.hash = t.tag_name_hash \
         JOIN bundles.tag_values v ON v.hash = t.tag_value_hash \
         ORDER BY t.i"
    } else {
        "SELECT n.name, v.value FROM ( \
           SELECT tag_name_hash, tag_value_hash, transaction_tag_index AS i \
             FROM new_transaction_tags WHERE transaction_id = ?1 \
           UNION \
           SELECT tag_name_hash, tag_value_hash, transaction_tag_index \
             FROM stable_transaction_tags WHERE transaction_id = ?1) t \
         JOIN tag_names n ON n.hash = t.tag_name_hash \
         JOIN tag_values v ON v.hash = t.tag_value_hash \
         ORDER BY t.i"
    };
    let rows = sqlx::query(sql).bind(id).fetch_all(&mut *conn).await?;
    Ok(rows
        .into_iter()
        .map(|row| (row.get::<Vec<u8>, _>(0), row.get::<Vec<u8>, _>(1)))
        .collect())
}

/// Height window and cursor for the second phase of the union.
fn second_phase_window<'c>(
    first_rows: &[RawGqlRow],
    query: &GqlQuery,
    cursor: Option<&'c Cursor>,
    desc: bool,
) -> (HeightBounds, Option<&'c Cursor>) {
    let mut bounds = HeightBounds {
        min: query.min_height,
        max: query.max_height,
    };
    let last_height = first_rows.iter().rev().find_map(|row| row.height);
    match (desc, last_height) {
        (true, Some(h)) => {
            // Everything at or above the last returned height is already covered by the new side
            let ceiling = (h - 1).max(0) as u64;
            bounds.max = Some(bounds.max.map_or(ceiling, |m| m.min(ceiling)));
            (bounds, None)
        },
        (false, Some(h)) => {
            let floor = (h + 1) as u64;
            bounds.min = Some(bounds.min.map_or(floor, |m| m.max(floor)));
            (bounds, None)
        },
        // The first phase produced no height-bearing rows; the untouched cursor still applies
        (_, None) => (bounds, cursor),
    }
}

/// Order rows the way the per-source SQL does, so merged sources interleave correctly.
fn sort_rows(rows: &mut [RawGqlRow], desc: bool) {
    rows.sort_by(|a, b| {
        let key = |row: &RawGqlRow| {
            (
                row.height.is_none(),
                row.height,
                row.block_transaction_index.unwrap_or(0),
                row.data_item_id.clone(),
                row.indexed_at,
                row.id.clone(),
            )
        };
        let ordering = key(a).cmp(&key(b));
        if desc {
            ordering.reverse()
        } else {
            ordering
        }
    });
}

fn make_edge(row: RawGqlRow, tags: Vec<(Vec<u8>, Vec<u8>)>) -> GqlEdge {
    let cursor = Cursor {
        height: row.height.map(|h| h as u64),
        block_transaction_index: row.block_transaction_index.map(|i| i as u64),
        data_item_id: row.data_item_id.clone(),
        indexed_at: Some(row.indexed_at),
        id: row.id.clone(),
    };
    GqlEdge {
        cursor: cursor.encode(),
        item: GqlItem {
            id: row.id,
            is_data_item: row.is_data_item,
            height: row.height.map(|h| h as u64),
            block_transaction_index: row.block_transaction_index.map(|i| i as u64),
            indexed_at: row.indexed_at,
            owner_address: row.owner_address,
            target: row.target,
            quantity: row.quantity,
            reward: row.reward,
            data_size: row.data_size,
            content_type: row.content_type,
            bundled_in: row.bundled_in,
            tags,
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn row(height: Option<i64>, bti: i64, indexed_at: i64, id: u8) -> RawGqlRow {
        RawGqlRow {
            height,
            block_transaction_index: Some(bti),
            data_item_id: vec![0u8],
            indexed_at,
            id: vec![id; 32],
            owner_address: None,
            target: None,
            quantity: None,
            reward: None,
            data_size: None,
            content_type: None,
            bundled_in: None,
            is_data_item: false,
        }
    }

    #[test]
    fn desc_sort_puts_unconfirmed_rows_first() {
        let mut rows = vec![row(Some(10), 0, 5, 1), row(None, 0, 9, 2), row(Some(11), 0, 5, 3)];
        sort_rows(&mut rows, true);
        assert_eq!(rows[0].id, vec![2u8; 32]);
        assert_eq!(rows[1].height, Some(11));
        assert_eq!(rows[2].height, Some(10));
    }

    #[test]
    fn asc_sort_puts_unconfirmed_rows_last() {
        let mut rows = vec![row(None, 0, 9, 2), row(Some(11), 0, 5, 3), row(Some(10), 0, 5, 1)];
        sort_rows(&mut rows, false);
        assert_eq!(rows[0].height, Some(10));
        assert_eq!(rows[1].height, Some(11));
        assert_eq!(rows[2].id, vec![2u8; 32]);
    }

    #[test]
    fn second_phase_ceiling_sits_below_last_returned_height() {
        let rows = vec![row(Some(100), 0, 5, 1), row(Some(90), 0, 5, 2)];
        let query = GqlQuery::default();
        let (bounds, cursor) = second_phase_window(&rows, &query, None, true);
        assert_eq!(bounds.max, Some(89));
        assert!(cursor.is_none());
    }

    #[test]
    fn second_phase_keeps_cursor_when_first_phase_was_empty() {
        let cursor = Cursor {
            height: Some(50),
            block_transaction_index: Some(1),
            data_item_id: vec![0u8],
            indexed_at: Some(1),
            id: vec![7u8; 32],
        };
        let query = GqlQuery::default();
        let (bounds, passed) = second_phase_window(&[], &query, Some(&cursor), true);
        assert_eq!(bounds.max, None);
        assert_eq!(passed, Some(&cursor));
    }

    #[test]
    fn edge_cursor_round_trips_the_row_key() {
        let raw = row(Some(42), 3, 99, 5);
        let edge = make_edge(raw, vec![]);
        let decoded = Cursor::decode(&edge.cursor).unwrap();
        assert_eq!(decoded.height, Some(42));
        assert_eq!(decoded.block_transaction_index, Some(3));
        assert_eq!(decoded.indexed_at, Some(99));
        assert_eq!(decoded.id, vec![5u8; 32]);
    }
}
