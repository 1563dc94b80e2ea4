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

//! SQL generation for the GraphQL query planner.
//!
//! Each logical source (stable/new x transactions/items) compiles to one statement. Tag filters
//! become joins ordered by configured selectivity: the most selective tag is the driving table and
//! its aliases carry the ordering columns; the remaining tags are cross-joined on the row id with
//! an explicit index directive so sqlite never reorders them into the driving position.

use std::collections::HashMap;

use sqlx::{QueryBuilder, Row, Sqlite};

use crate::store::{
    gql::{cursor::Cursor, GqlQuery, SortOrder, TagFilter},
    tag_hash,
};

/// One of the four logical row sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    StableTxs,
    NewTxs,
    StableItems,
    NewItems,
}

impl Source {
    pub fn is_item(self) -> bool {
        matches!(self, Source::StableItems | Source::NewItems)
    }

    pub fn is_stable(self) -> bool {
        matches!(self, Source::StableTxs | Source::StableItems)
    }

    fn base_table(self) -> &'static str {
        match self {
            Source::StableTxs => "stable_transactions",
            Source::NewTxs => "new_transactions",
            Source::StableItems => "bundles.stable_data_items",
            Source::NewItems => "bundles.new_data_items",
        }
    }

    fn tag_table(self) -> &'static str {
        match self {
            Source::StableTxs => "stable_transaction_tags",
            Source::NewTxs => "new_transaction_tags",
            Source::StableItems => "bundles.stable_data_item_tags",
            Source::NewItems => "bundles.new_data_item_tags",
        }
    }

    fn tag_row_id_column(self) -> &'static str {
        if self.is_item() {
            "data_item_id"
        } else {
            "transaction_id"
        }
    }

    fn tag_row_id_index(self) -> &'static str {
        match self {
            Source::StableTxs => "stable_transaction_tags_transaction_id_idx",
            Source::NewTxs => "new_transaction_tags_transaction_id_idx",
            Source::StableItems => "stable_data_item_tags_data_item_id_idx",
            Source::NewItems => "new_data_item_tags_data_item_id_idx",
        }
    }
}

/// A decoded result row, uniform across sources.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RawGqlRow {
    pub height: Option<i64>,
    pub block_transaction_index: Option<i64>,
    pub data_item_id: Vec<u8>,
    pub indexed_at: i64,
    pub id: Vec<u8>,
    pub owner_address: Option<Vec<u8>>,
    pub target: Option<Vec<u8>>,
    pub quantity: Option<String>,
    pub reward: Option<String>,
    pub data_size: Option<String>,
    pub content_type: Option<String>,
    pub bundled_in: Option<Vec<u8>>,
    pub is_data_item: bool,
}

impl RawGqlRow {
    pub fn from_row(row: &sqlx::sqlite::SqliteRow, is_item: bool) -> Self {
        Self {
            height: row.get(0),
            block_transaction_index: row.get(1),
            data_item_id: row.get(2),
            indexed_at: row.get(3),
            id: row.get(4),
            owner_address: row.get(5),
            target: row.get(6),
            quantity: row.get(7),
            reward: row.get(8),
            data_size: row.get(9),
            content_type: row.get(10),
            bundled_in: row.get(11),
            is_data_item: is_item,
        }
    }
}

/// Height bounds after the new/stable union adjustment.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct HeightBounds {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

/// Order tag filters by descending selectivity, preserving the caller's order for ties.
pub(crate) fn order_tags_by_selectivity<'t>(
    tags: &'t [TagFilter],
    selectivity: &HashMap<String, i64>,
) -> Vec<&'t TagFilter> {
    let mut ordered = tags.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|tag| {
        let name = String::from_utf8_lossy(&tag.name).into_owned();
        -selectivity.get(&name).copied().unwrap_or(0)
    });
    ordered
}

/// Compile one source query returning up to `limit` rows ordered by the query's sort.
pub(crate) fn build_source_query(
    source: Source,
    query: &GqlQuery,
    cursor: Option<&Cursor>,
    bounds: HeightBounds,
    limit: usize,
    selectivity: &HashMap<String, i64>,
) -> QueryBuilder<'static, Sqlite> {
    let tags = order_tags_by_selectivity(&query.tags, selectivity);
    let desc = query.sort == SortOrder::HeightDesc;

    // The driving alias supplies the ordering columns: the most selective tag table when tags are
    // present on a stable source, the base row table otherwise
    let order_alias = if !tags.is_empty() && source.is_stable() { "t0" } else { "b" };
    let bti_expr: String = match source {
        Source::NewTxs => "IFNULL(nbt.block_transaction_index, 0)".to_string(),
        Source::NewItems => "IFNULL(b.block_transaction_index, 0)".to_string(),
        _ => format!("{}.block_transaction_index", order_alias),
    };
    let data_item_id_expr = if source.is_item() { "b.id" } else { "x'00'" };

    // Tag joins can produce one driving row per matching tag pair; DISTINCT collapses them back
    // to one row per transaction or item
    let mut qb = QueryBuilder::<Sqlite>::new(if tags.is_empty() { "SELECT " } else { "SELECT DISTINCT " });
    if source.is_stable() {
        qb.push(format!("{}.height", order_alias));
    } else {
        qb.push("b.height");
    }
    qb.push(format!(", {} AS block_transaction_index", bti_expr));
    qb.push(format!(", {} AS data_item_id", data_item_id_expr));
    qb.push(", b.indexed_at, b.id, b.owner_address, b.target");
    if source.is_item() {
        qb.push(", NULL AS quantity, NULL AS reward, CAST(b.data_size AS TEXT) AS data_size");
    } else {
        qb.push(", b.quantity, b.reward, b.data_size");
    }
    qb.push(", b.content_type");
    if source.is_item() {
        qb.push(", b.parent_id AS bundled_in");
    } else {
        qb.push(", NULL AS bundled_in");
    }

    push_from_joins(&mut qb, source, &tags);

    qb.push(" WHERE 1 = 1");
    push_tag_filter(&mut qb, "t0", tags.first().copied());
    push_row_filters(&mut qb, source, query, bounds, order_alias);
    push_cursor_predicate(&mut qb, source, cursor, desc, order_alias, &bti_expr, data_item_id_expr);

    push_order_by(&mut qb, source, desc, order_alias, &bti_expr, data_item_id_expr);
    qb.push(" LIMIT ");
    qb.push_bind(limit as i64);
    qb
}

fn push_from_joins(qb: &mut QueryBuilder<'static, Sqlite>, source: Source, tags: &[&TagFilter]) {
    if tags.is_empty() {
        qb.push(format!(" FROM {} b", source.base_table()));
        if source == Source::NewTxs {
            qb.push(" LEFT JOIN new_block_transactions nbt ON nbt.transaction_id = b.id");
        }
        return;
    }

    let fk = source.tag_row_id_column();
    qb.push(format!(" FROM {} t0", source.tag_table()));

    for (i, tag) in tags.iter().enumerate().skip(1) {
        let alias = format!("t{}", i);
        if source.is_stable() {
            qb.push(format!(
                " CROSS JOIN {} {} INDEXED BY {}",
                source.tag_table(),
                alias,
                source.tag_row_id_index()
            ));
        } else {
            qb.push(format!(" JOIN {} {}", source.tag_table(), alias));
        }
        qb.push(format!(" ON {a}.{fk} = t0.{fk} AND {a}.tag_name_hash = ", a = alias, fk = fk));
        qb.push_bind(tag_hash(&tag.name));
        push_value_hash_set(qb, &alias, &tag.values);
    }

    match source {
        Source::StableTxs => {
            qb.push(
                " JOIN stable_transactions b ON b.height = t0.height \
                 AND b.block_transaction_index = t0.block_transaction_index",
            );
        },
        Source::StableItems => {
            qb.push(
                " JOIN bundles.stable_data_items b ON b.height = t0.height \
                 AND b.block_transaction_index = t0.block_transaction_index AND b.id = t0.data_item_id",
            );
        },
        Source::NewTxs => {
            qb.push(" JOIN new_transactions b ON b.id = t0.transaction_id");
            qb.push(" LEFT JOIN new_block_transactions nbt ON nbt.transaction_id = b.id");
        },
        Source::NewItems => {
            qb.push(" JOIN bundles.new_data_items b ON b.id = t0.data_item_id");
        },
    }
}

fn push_tag_filter(qb: &mut QueryBuilder<'static, Sqlite>, alias: &str, tag: Option<&TagFilter>) {
    let Some(tag) = tag else { return };
    qb.push(format!(" AND {}.tag_name_hash = ", alias));
    qb.push_bind(tag_hash(&tag.name));
    push_value_hash_set(qb, alias, &tag.values);
}

fn push_value_hash_set(qb: &mut QueryBuilder<'static, Sqlite>, alias: &str, values: &[Vec<u8>]) {
    if values.is_empty() {
        return;
    }
    qb.push(format!(" AND {}.tag_value_hash IN (", alias));
    let mut separated = qb.separated(", ");
    for value in values {
        separated.push_bind(tag_hash(value));
    }
    qb.push(")");
}

fn push_row_filters(
    qb: &mut QueryBuilder<'static, Sqlite>,
    source: Source,
    query: &GqlQuery,
    bounds: HeightBounds,
    order_alias: &str,
) {
    if !query.ids.is_empty() {
        qb.push(" AND b.id IN (");
        let mut separated = qb.separated(", ");
        for id in &query.ids {
            separated.push_bind(id.to_vec());
        }
        qb.push(")");
    }
    if !query.recipients.is_empty() {
        qb.push(" AND b.target IN (");
        let mut separated = qb.separated(", ");
        for target in &query.recipients {
            separated.push_bind(target.clone());
        }
        qb.push(")");
    }
    if !query.owners.is_empty() {
        qb.push(" AND b.owner_address IN (");
        let mut separated = qb.separated(", ");
        for owner in &query.owners {
            separated.push_bind(owner.clone());
        }
        qb.push(")");
    }
    if source.is_item() && !query.bundled_in.is_empty() {
        qb.push(" AND b.parent_id IN (");
        let mut separated = qb.separated(", ");
        for parent in &query.bundled_in {
            separated.push_bind(parent.clone());
        }
        qb.push(")");
    }

    let height_col = if source.is_stable() {
        format!("{}.height", order_alias)
    } else {
        "b.height".to_string()
    };
    if let Some(min) = bounds.min {
        qb.push(format!(" AND {} >= ", height_col));
        qb.push_bind(min as i64);
    }
    if let Some(max) = bounds.max {
        qb.push(format!(" AND {} <= ", height_col));
        qb.push_bind(max as i64);
    }
}

#[allow(clippy::too_many_arguments)]
fn push_cursor_predicate(
    qb: &mut QueryBuilder<'static, Sqlite>,
    source: Source,
    cursor: Option<&Cursor>,
    desc: bool,
    order_alias: &str,
    bti_expr: &str,
    data_item_id_expr: &str,
) {
    let Some(cursor) = cursor else { return };
    let height_col = if source.is_stable() {
        format!("{}.height", order_alias)
    } else {
        "b.height".to_string()
    };
    let (lt, gt) = ("<", ">");
    let op = if desc { lt } else { gt };

    match (source.is_stable(), cursor.height) {
        (true, Some(height)) => {
            push_lexicographic(qb, &height_col, bti_expr, data_item_id_expr, cursor, height, op);
        },
        (true, None) => {
            if desc {
                // A null-height cursor lies in the unconfirmed region; in descending order every
                // stable row still follows it
            } else {
                // Ascending: the unconfirmed region sorts last, so stable rows are all consumed
                qb.push(" AND 0 = 1");
            }
        },
        (false, Some(height)) => {
            if desc {
                qb.push(format!(" AND {} IS NOT NULL AND (", height_col));
            } else {
                qb.push(format!(" AND ({} IS NULL OR (", height_col));
            }
            push_lexicographic_inner(qb, &height_col, bti_expr, data_item_id_expr, cursor, height, op);
            if desc {
                qb.push(")");
            } else {
                qb.push("))");
            }
        },
        (false, None) => {
            let indexed_at = cursor.indexed_at.unwrap_or(if desc { i64::MAX } else { i64::MIN });
            if desc {
                qb.push(format!(
                    " AND (({col} IS NULL AND (b.indexed_at {op} ",
                    col = height_col,
                    op = op
                ));
                qb.push_bind(indexed_at);
                qb.push(" OR (b.indexed_at = ");
                qb.push_bind(indexed_at);
                qb.push(format!(" AND b.id {} ", op));
                qb.push_bind(cursor.id.clone());
                qb.push(format!("))) OR {} IS NOT NULL)", height_col));
            } else {
                qb.push(format!(" AND {col} IS NULL AND (b.indexed_at {op} ", col = height_col, op = op));
                qb.push_bind(indexed_at);
                qb.push(" OR (b.indexed_at = ");
                qb.push_bind(indexed_at);
                qb.push(format!(" AND b.id {} ", op));
                qb.push_bind(cursor.id.clone());
                qb.push("))");
            }
        },
    }
}

fn push_lexicographic(
    qb: &mut QueryBuilder<'static, Sqlite>,
    height_col: &str,
    bti_expr: &str,
    data_item_id_expr: &str,
    cursor: &Cursor,
    height: u64,
    op: &str,
) {
    qb.push(" AND (");
    push_lexicographic_inner(qb, height_col, bti_expr, data_item_id_expr, cursor, height, op);
    qb.push(")");
}

fn push_lexicographic_inner(
    qb: &mut QueryBuilder<'static, Sqlite>,
    height_col: &str,
    bti_expr: &str,
    data_item_id_expr: &str,
    cursor: &Cursor,
    height: u64,
    op: &str,
) {
    let height = height as i64;
    let bti = cursor.block_transaction_index.unwrap_or(0) as i64;

    qb.push(format!("{} {} ", height_col, op));
    qb.push_bind(height);
    qb.push(format!(" OR ({} = ", height_col));
    qb.push_bind(height);
    qb.push(format!(" AND {} {} ", bti_expr, op));
    qb.push_bind(bti);
    qb.push(format!(") OR ({} = ", height_col));
    qb.push_bind(height);
    qb.push(format!(" AND {} = ", bti_expr));
    qb.push_bind(bti);
    qb.push(format!(" AND {} {} ", data_item_id_expr, op));
    qb.push_bind(cursor.data_item_id.clone());
    qb.push(")");
}

fn push_order_by(
    qb: &mut QueryBuilder<'static, Sqlite>,
    source: Source,
    desc: bool,
    order_alias: &str,
    bti_expr: &str,
    data_item_id_expr: &str,
) {
    let dir = if desc { "DESC" } else { "ASC" };
    if source.is_stable() {
        qb.push(format!(
            " ORDER BY {a}.height {d}, {bti} {d}, {di} {d}",
            a = order_alias,
            d = dir,
            bti = bti_expr,
            di = data_item_id_expr
        ));
    } else {
        // Unconfirmed rows (no height) are the newest: they lead descending scans and trail
        // ascending ones
        qb.push(format!(
            " ORDER BY (b.height IS NULL) {d}, b.height {d}, {bti} {d}, b.indexed_at {d}, b.id {d}",
            d = dir,
            bti = bti_expr
        ));
    }
}
