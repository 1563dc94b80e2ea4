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

mod helpers;

use std::collections::{HashMap, HashSet};

use helpers::{make_block, make_tx, open_store};
use weavegate_core::{
    chain::types::{JsonTag, JsonTransaction, TxId},
    store::{
        bundles::NormalizedDataItem,
        gql::{GqlQuery, SortOrder, TagFilter},
        IndexStore,
        IndexStoreConfig,
        StoreError,
    },
};

/// One transaction per block over `start..=end`, returning ids by height.
async fn seed_linear(store: &IndexStore, start: u64, end: u64) -> HashMap<u64, TxId> {
    let mut by_height = HashMap::new();
    for h in start..=end {
        let tx = make_tx(h as u8, vec![]);
        let block = make_block(1, h, &[tx.id]);
        store.save_block_and_txs(&block, &[tx.clone()], &[]).await.unwrap();
        by_height.insert(h, tx.id);
    }
    by_height
}

fn heights_of(page: &weavegate_core::store::gql::GqlPage) -> Vec<u64> {
    page.edges.iter().map(|e| e.item.height.unwrap()).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn keyset_pagination_covers_every_row_exactly_once() {
    let (_dir, store, _events) = open_store(IndexStoreConfig::default()).await;
    seed_linear(&store, 1, 25).await;

    let mut seen = HashSet::new();
    let mut cursor = None;
    let mut pages = 0;
    loop {
        let page = store
            .gql_transactions(GqlQuery {
                page_size: 10,
                cursor: cursor.clone(),
                ..Default::default()
            })
            .await
            .unwrap();
        pages += 1;
        let heights = heights_of(&page);
        let mut sorted = heights.clone();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(heights, sorted, "page {pages} is not height-descending");
        for edge in &page.edges {
            assert!(seen.insert(edge.item.id.clone()), "row repeated across pages");
        }
        if !page.has_next_page {
            assert_eq!(page.edges.len(), 5, "last page size");
            break;
        }
        assert_eq!(page.edges.len(), 10);
        cursor = page.edges.last().map(|e| e.cursor.clone());
    }
    assert_eq!(pages, 3);
    assert_eq!(seen.len(), 25);
}

#[tokio::test(flavor = "multi_thread")]
async fn ascending_order_mirrors_descending() {
    let (_dir, store, _events) = open_store(IndexStoreConfig::default()).await;
    seed_linear(&store, 1, 8).await;

    let page = store
        .gql_transactions(GqlQuery {
            sort: SortOrder::HeightAsc,
            page_size: 20,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(heights_of(&page), (1..=8).collect::<Vec<_>>());
    assert!(!page.has_next_page);
}

#[tokio::test(flavor = "multi_thread")]
async fn union_continues_into_stable_rows_below_the_new_side() {
    let (_dir, store, _events) = open_store(IndexStoreConfig {
        max_fork_depth: 10,
        // Zero grace so promoted rows are pruned from the new side immediately
        new_row_grace: std::time::Duration::ZERO,
        ..Default::default()
    })
    .await;

    let now = chrono::Utc::now().timestamp() as u64;
    for h in 1..=20u64 {
        let tx = make_tx(h as u8, vec![]);
        let mut block = make_block(1, h, &[tx.id]);
        // Recent wall-clock timestamps so the prune threshold sits above `indexed_at`
        block.timestamp = now + 10_000 + h;
        store.save_block_and_txs(&block, &[tx], &[]).await.unwrap();
    }
    store.flush_stable(20).await.unwrap();
    assert_eq!(store.get_max_stable_height().await.unwrap(), Some(10));

    let page = store
        .gql_transactions(GqlQuery {
            page_size: 15,
            ..Default::default()
        })
        .await
        .unwrap();
    // Heights 20..11 come from the new side, 10..6 from stable
    assert_eq!(heights_of(&page), (6..=20).rev().collect::<Vec<_>>());
    assert!(page.has_next_page);
}

#[tokio::test(flavor = "multi_thread")]
async fn tag_filters_intersect_and_selectivity_orders_the_join() {
    let (_dir, store, _events) = open_store(IndexStoreConfig {
        tag_selectivity: HashMap::from([("Content-Type".to_string(), 10i64), ("App-Name".to_string(), 0i64)]),
        ..Default::default()
    })
    .await;

    let app = JsonTag::new(b"App-Name", b"X");
    let text = JsonTag::new(b"Content-Type", b"text/plain");

    let mut n = 0u8;
    let mut both_ids = HashSet::new();
    let mut txs_at = |tags: Vec<JsonTag>| {
        n += 1;
        make_tx(n, tags)
    };
    for h in 1..=7u64 {
        let tx = match h % 3 {
            0 => txs_at(vec![app.clone(), text.clone()]),
            1 => txs_at(vec![app.clone()]),
            _ => txs_at(vec![text.clone()]),
        };
        if h % 3 == 0 {
            both_ids.insert(tx.id.to_vec());
        }
        let block = make_block(1, h, &[tx.id]);
        store.save_block_and_txs(&block, &[tx], &[]).await.unwrap();
    }

    let page = store
        .gql_transactions(GqlQuery {
            tags: vec![
                TagFilter {
                    name: b"App-Name".to_vec(),
                    values: vec![b"X".to_vec()],
                },
                TagFilter {
                    name: b"Content-Type".to_vec(),
                    values: vec![b"text/plain".to_vec()],
                },
            ],
            page_size: 10,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(page.edges.len(), both_ids.len());
    assert_eq!(heights_of(&page), vec![6, 3]);
    for edge in &page.edges {
        assert!(both_ids.contains(&edge.item.id));
        let names = edge.item.tags.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>();
        assert!(names.contains(&b"App-Name".to_vec()));
        assert!(names.contains(&b"Content-Type".to_vec()));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_tag_bytes_are_interned_once() {
    let (dir, store, _events) = open_store(IndexStoreConfig::default()).await;

    let tag = JsonTag::new(b"App-Name", b"PermaThing");
    let tx = make_tx(1, vec![tag.clone(), tag.clone()]);
    let block = make_block(1, 1, &[tx.id]);
    store.save_block_and_txs(&block, &[tx.clone()], &[]).await.unwrap();

    use sqlx::{ConnectOptions, Row};
    let mut conn = sqlx::sqlite::SqliteConnectOptions::new()
        .filename(dir.path().join("sqlite").join("core.db"))
        .connect()
        .await
        .unwrap();

    let names: i64 = sqlx::query("SELECT COUNT(*) FROM tag_names WHERE name = ?1")
        .bind(b"App-Name".to_vec())
        .fetch_one(&mut conn)
        .await
        .unwrap()
        .get(0);
    let values: i64 = sqlx::query("SELECT COUNT(*) FROM tag_values WHERE value = ?1")
        .bind(b"PermaThing".to_vec())
        .fetch_one(&mut conn)
        .await
        .unwrap()
        .get(0);
    assert_eq!(names, 1);
    assert_eq!(values, 1);

    let joins = sqlx::query(
        "SELECT transaction_tag_index FROM new_transaction_tags WHERE transaction_id = ?1 \
         ORDER BY transaction_tag_index",
    )
    .bind(tx.id.to_vec())
    .fetch_all(&mut conn)
    .await
    .unwrap();
    let indices = joins.iter().map(|r| r.get::<i64, _>(0)).collect::<Vec<_>>();
    assert_eq!(indices, vec![0, 1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn optimistic_items_appear_only_without_a_bundle_filter() {
    let (_dir, store, events) = open_store(IndexStoreConfig::default()).await;
    let mut indexed_events = events.subscribe_data_item_indexed();

    let optimistic = NormalizedDataItem {
        id_bytes: vec![5u8; 32],
        content_type: Some("image/png".to_string()),
        tags: vec![JsonTag::new(b"Type", b"image")],
        ..NormalizedDataItem::default()
    };
    store.save_data_item(&optimistic).await.unwrap();

    let placed = NormalizedDataItem {
        id_bytes: vec![6u8; 32],
        parent_id: Some(vec![7u8; 32]),
        parent_index: Some(0),
        root_transaction_id: Some(vec![7u8; 32]),
        height: Some(4),
        block_transaction_index: Some(0),
        ..NormalizedDataItem::default()
    };
    store.save_data_item(&placed).await.unwrap();

    assert_eq!(indexed_events.recv().await.unwrap().id_bytes, vec![5u8; 32]);
    assert_eq!(indexed_events.recv().await.unwrap().id_bytes, vec![6u8; 32]);

    // Unfiltered: the optimistic item leads (no height yet), the placed one follows
    let page = store.gql_transactions(GqlQuery::default()).await.unwrap();
    let ids = page.edges.iter().map(|e| e.item.id.clone()).collect::<Vec<_>>();
    assert_eq!(ids, vec![vec![5u8; 32], vec![6u8; 32]]);
    assert!(page.edges[0].item.height.is_none());

    // Constrained to a bundle: only the placed item qualifies
    let page = store
        .gql_transactions(GqlQuery {
            bundled_in: vec![vec![7u8; 32]],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.edges.len(), 1);
    assert_eq!(page.edges[0].item.id, vec![6u8; 32]);
    assert_eq!(page.edges[0].item.bundled_in, Some(vec![7u8; 32]));
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_cursor_is_a_typed_validation_error() {
    let (_dir, store, _events) = open_store(IndexStoreConfig::default()).await;
    let err = store
        .gql_transactions(GqlQuery {
            cursor: Some("!!not-a-cursor!!".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidCursor(_)));
    assert!(err.is_validation());
}

#[tokio::test(flavor = "multi_thread")]
async fn filters_by_owner_and_recipient() {
    let (_dir, store, _events) = open_store(IndexStoreConfig::default()).await;

    let txs = (1..=4u8).map(|n| make_tx(n, vec![])).collect::<Vec<JsonTransaction>>();
    for (i, tx) in txs.iter().enumerate() {
        let block = make_block(1, i as u64 + 1, &[tx.id]);
        store.save_block_and_txs(&block, &[tx.clone()], &[]).await.unwrap();
    }

    let page = store
        .gql_transactions(GqlQuery {
            owners: vec![txs[2].owner_address()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.edges.len(), 1);
    assert_eq!(page.edges[0].item.id, txs[2].id.to_vec());

    let page = store
        .gql_transactions(GqlQuery {
            recipients: vec![txs[1].target.as_bytes().to_vec()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.edges.len(), 1);
    assert_eq!(page.edges[0].item.id, txs[1].id.to_vec());
}
