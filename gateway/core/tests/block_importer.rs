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

use std::{sync::Arc, time::Duration};

use helpers::{block_hash, make_block, make_chain, make_tx, open_store, MockChain};
use weavegate_core::{
    chain::types::JsonBlock,
    importer::{BlockImporter, BlockImporterConfig, ImporterExit},
    repair::{spawn_tx_saver, TransactionRepairWorker, TxRepairConfig},
    store::{gql::GqlQuery, IndexStore, IndexStoreConfig},
};
use weavegate_shutdown::Shutdown;

fn importer_config(start: u64, stop: u64, max_fork_depth: u64) -> BlockImporterConfig {
    BlockImporterConfig {
        start_height: start,
        stop_height: Some(stop),
        max_fork_depth,
        stable_flush_interval: 5,
        height_polling_interval: Duration::from_millis(20),
    }
}

fn store_config(max_fork_depth: u64) -> IndexStoreConfig {
    IndexStoreConfig {
        max_fork_depth,
        ..Default::default()
    }
}

async fn run_importer(
    chain: Arc<MockChain>,
    store: IndexStore,
    events: weavegate_core::GatewayEvents,
    config: BlockImporterConfig,
) -> ImporterExit {
    let shutdown = Shutdown::new();
    BlockImporter::new(chain, store, events, config, shutdown.to_signal())
        .run()
        .await
}

/// Blocks of chain B above the divergence, chained onto chain A below it.
fn forked_chain(a_seed: u8, b_seed: u8, fork_height: u64, end: u64) -> Vec<JsonBlock> {
    (fork_height..=end)
        .map(|h| {
            let mut block = make_block(b_seed, h, &[]);
            if h == fork_height {
                block.previous_block = Some(block_hash(a_seed, h - 1));
            }
            block
        })
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn linear_ingest_promotes_stable_rows() {
    helpers::init_logging();
    let (_dir, store, events) = open_store(store_config(2)).await;
    let chain = MockChain::new();
    chain.set_chain(make_chain(1, 0, 12));
    chain.set_height(12);

    let exit = run_importer(chain, store.clone(), events, importer_config(1, 12, 2)).await;
    assert_eq!(exit, ImporterExit::StopHeightReached);

    assert_eq!(store.get_max_height().await.unwrap(), Some(12));
    // Flushes ran at heights 5 and 10; with a fork depth of 2 the stable side reaches 8
    assert_eq!(store.get_max_stable_height().await.unwrap(), Some(8));

    for h in 1..=12 {
        assert_eq!(
            store.get_block_hash_at_height(h).await.unwrap(),
            Some(block_hash(1, h)),
            "height {h}"
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn depth_three_fork_rewinds_and_reimports() {
    let (_dir, store, events) = open_store(store_config(50)).await;
    let chain = MockChain::new();
    chain.set_chain(make_chain(1, 100, 110));
    chain.set_height(110);

    let exit = run_importer(chain.clone(), store.clone(), events.clone(), importer_config(100, 110, 50)).await;
    assert_eq!(exit, ImporterExit::StopHeightReached);

    // The upstream switches to chain B, which diverges at 108
    let mut switched = make_chain(1, 100, 107);
    switched.extend(forked_chain(1, 2, 108, 111));
    chain.set_chain(switched);
    chain.set_height(111);

    let exit = run_importer(chain, store.clone(), events, importer_config(100, 111, 50)).await;
    assert_eq!(exit, ImporterExit::StopHeightReached);

    for h in 100..=107 {
        assert_eq!(store.get_block_hash_at_height(h).await.unwrap(), Some(block_hash(1, h)));
    }
    for h in 108..=111 {
        assert_eq!(
            store.get_block_hash_at_height(h).await.unwrap(),
            Some(block_hash(2, h)),
            "height {h} should hold chain B"
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn fork_deeper_than_the_limit_stops_the_importer() {
    let (_dir, store, events) = open_store(store_config(3)).await;
    let chain = MockChain::new();
    chain.set_chain(make_chain(1, 100, 110));
    chain.set_height(110);

    let exit = run_importer(chain.clone(), store.clone(), events.clone(), importer_config(100, 110, 3)).await;
    assert_eq!(exit, ImporterExit::StopHeightReached);

    // Chain B diverges at 104: seven heights deep, far past the permitted depth of 3
    let mut switched = make_chain(1, 100, 103);
    switched.extend(forked_chain(1, 2, 104, 111));
    chain.set_chain(switched);
    chain.set_height(111);

    let exit = run_importer(chain, store.clone(), events, importer_config(100, 111, 3)).await;
    assert_eq!(exit, ImporterExit::ForkDepthExceeded);
}

#[tokio::test(flavor = "multi_thread")]
async fn gap_during_rewind_refetches_the_missing_height() {
    let (dir, store, events) = open_store(store_config(50)).await;
    let chain = MockChain::new();
    chain.set_chain(make_chain(1, 100, 110));
    chain.set_height(110);

    let exit = run_importer(chain.clone(), store.clone(), events.clone(), importer_config(100, 110, 50)).await;
    assert_eq!(exit, ImporterExit::StopHeightReached);

    // Punch a hole at height 109 behind the store's back, then present a fork at 110 so the
    // rewind walks straight into the gap
    {
        use sqlx::ConnectOptions;
        let mut conn = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(dir.path().join("sqlite").join("core.db"))
            .connect()
            .await
            .unwrap();
        sqlx::query("DELETE FROM new_blocks WHERE height = ?1")
            .bind(109i64)
            .execute(&mut conn)
            .await
            .unwrap();
    }

    let mut switched = make_chain(1, 100, 109);
    switched.extend(forked_chain(1, 2, 110, 111));
    chain.set_chain(switched);
    chain.set_height(111);

    let exit = run_importer(chain, store.clone(), events, importer_config(100, 111, 50)).await;
    assert_eq!(exit, ImporterExit::StopHeightReached);

    // The hole was refetched from chain A and the fork heights hold chain B
    assert_eq!(store.get_block_hash_at_height(109).await.unwrap(), Some(block_hash(1, 109)));
    assert_eq!(store.get_block_hash_at_height(110).await.unwrap(), Some(block_hash(2, 110)));
    assert_eq!(store.get_block_hash_at_height(111).await.unwrap(), Some(block_hash(2, 111)));
    // No height ends up chained to a mismatched parent
    for h in 101..=111u64 {
        assert!(store.get_block_hash_at_height(h - 1).await.unwrap().is_some(), "height {h}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_transaction_is_repaired_on_a_later_tick() {
    let (_dir, store, events) = open_store(store_config(50)).await;
    let chain = MockChain::new();

    let tx = make_tx(9, vec![]);
    let block = make_block(1, 50, &[tx.id]);
    chain.set_chain(vec![block]);
    chain.set_height(50);
    chain.set_unreachable(tx.id, true);

    let exit = run_importer(chain.clone(), store.clone(), events.clone(), importer_config(50, 50, 50)).await;
    assert_eq!(exit, ImporterExit::StopHeightReached);

    let missing = store.get_missing_tx_ids(10).await.unwrap();
    assert_eq!(missing, vec![tx.id]);

    // The transaction becomes reachable; the repair loop should recover it
    chain.add_tx(tx.clone());
    chain.set_unreachable(tx.id, false);

    let mut shutdown = Shutdown::new();
    let saver = spawn_tx_saver(events.clone(), store.clone(), shutdown.to_signal());
    let repair = TransactionRepairWorker::new(
        chain,
        store.clone(),
        events,
        TxRepairConfig {
            interval: Duration::from_millis(50),
            retry_wait: Duration::from_millis(10),
            ..Default::default()
        },
        shutdown.to_signal(),
    )
    .spawn();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if store.get_missing_tx_count().await.unwrap() == 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "repair did not clear the missing tx");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    // The repaired transaction is indexed and bound to its block height
    let page = store
        .gql_transactions(GqlQuery {
            ids: vec![tx.id],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.edges.len(), 1);
    assert_eq!(page.edges[0].item.height, Some(50));

    shutdown.trigger();
    let _ = repair.await;
    let _ = saver.await;
}
