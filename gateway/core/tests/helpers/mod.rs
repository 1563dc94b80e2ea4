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

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    convert::TryFrom,
    sync::{Arc, Mutex},
};

use sha2::{Digest, Sha256};
use weavegate_core::{
    chain::{
        types::{B64Bytes, BlockAndTxs, BlockHash, JsonBlock, JsonTag, JsonTransaction, TxId, TxOffset},
        ChainClientError,
        ChainSource,
    },
    events::GatewayEvents,
    store::{IndexStore, IndexStoreConfig},
};

/// Opt into test logging with `RUST_LOG=debug cargo test -- --nocapture`.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Deterministic block hash for `(chain_seed, height)`.
pub fn block_hash(seed: u8, height: u64) -> BlockHash {
    let mut bytes = [0xAAu8; 48];
    bytes[0] = seed;
    bytes[1..9].copy_from_slice(&height.to_le_bytes());
    BlockHash::try_from(bytes.as_slice()).unwrap()
}

/// A transaction whose id is properly bound to its signature.
pub fn make_tx(n: u8, tags: Vec<JsonTag>) -> JsonTransaction {
    let signature = vec![n; 64];
    let id = TxId::try_from(Sha256::digest(&signature).as_slice()).unwrap();
    JsonTransaction {
        id,
        signature: Some(B64Bytes(signature)),
        format: 2,
        last_tx: B64Bytes(vec![n, 1]),
        owner: B64Bytes(vec![n, 2, 3]),
        target: B64Bytes(vec![n, 9]),
        quantity: "1000".to_string(),
        reward: "42".to_string(),
        data_size: "0".to_string(),
        data_root: B64Bytes(vec![]),
        tags,
        data: None,
    }
}

pub fn make_block(seed: u8, height: u64, txs: &[TxId]) -> JsonBlock {
    JsonBlock {
        indep_hash: block_hash(seed, height),
        height,
        previous_block: height.checked_sub(1).map(|prev| block_hash(seed, prev)),
        nonce: B64Bytes(vec![1]),
        hash: B64Bytes(vec![2]),
        timestamp: 1_600_000_000 + height,
        diff: Some("115792089".to_string()),
        cumulative_diff: Some("1234".to_string()),
        last_retarget: Some(1_600_000_000),
        reward_addr: Some(B64Bytes(vec![7; 32])),
        reward_pool: Some("9999999999999999999999999".to_string()),
        block_size: Some("1024".to_string()),
        weave_size: Some("1048576".to_string()),
        usd_to_ar_rate: Some(["1".to_string(), "20".to_string()]),
        scheduled_usd_to_ar_rate: Some(["1".to_string(), "21".to_string()]),
        hash_list_merkle: None,
        wallet_list: None,
        tx_root: None,
        txs: txs.to_vec(),
        poa: None,
    }
}

/// A chain of linked blocks `start..=end` with no transactions.
pub fn make_chain(seed: u8, start: u64, end: u64) -> Vec<JsonBlock> {
    (start..=end).map(|h| make_block(seed, h, &[])).collect()
}

#[derive(Default)]
struct MockChainState {
    height: u64,
    blocks: HashMap<u64, JsonBlock>,
    txs: HashMap<TxId, JsonTransaction>,
    unreachable: HashSet<TxId>,
}

/// A scripted [ChainSource]. The scripted chain can be swapped wholesale mid-test to simulate an
/// upstream switching to a fork.
#[derive(Default)]
pub struct MockChain {
    state: Mutex<MockChainState>,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_height(&self, height: u64) {
        self.state.lock().unwrap().height = height;
    }

    /// Replace the scripted chain. Existing heights not covered by `blocks` are removed.
    pub fn set_chain(&self, blocks: Vec<JsonBlock>) {
        let mut state = self.state.lock().unwrap();
        state.blocks = blocks.into_iter().map(|b| (b.height, b)).collect();
    }

    /// Add blocks without clearing the ones already scripted.
    pub fn extend_chain(&self, blocks: Vec<JsonBlock>) {
        let mut state = self.state.lock().unwrap();
        for block in blocks {
            state.blocks.insert(block.height, block);
        }
    }

    pub fn add_tx(&self, tx: JsonTransaction) {
        self.state.lock().unwrap().txs.insert(tx.id, tx);
    }

    pub fn set_unreachable(&self, id: TxId, unreachable: bool) {
        let mut state = self.state.lock().unwrap();
        if unreachable {
            state.unreachable.insert(id);
        } else {
            state.unreachable.remove(&id);
        }
    }
}

#[async_trait::async_trait]
impl ChainSource for MockChain {
    async fn get_height(&self) -> Result<u64, ChainClientError> {
        Ok(self.state.lock().unwrap().height)
    }

    async fn get_block_by_height(&self, height: u64, _prefetch: bool) -> Result<Arc<JsonBlock>, ChainClientError> {
        let state = self.state.lock().unwrap();
        state
            .blocks
            .get(&height)
            .cloned()
            .map(Arc::new)
            .ok_or(ChainClientError::Status {
                status: 404,
                context: format!("block {}", height),
            })
    }

    async fn get_block_and_txs_by_height(&self, height: u64) -> Result<BlockAndTxs, ChainClientError> {
        let state = self.state.lock().unwrap();
        let block = state.blocks.get(&height).cloned().ok_or(ChainClientError::Status {
            status: 404,
            context: format!("block {}", height),
        })?;
        let mut txs = Vec::new();
        let mut missing_tx_ids = Vec::new();
        for id in &block.txs {
            if state.unreachable.contains(id) {
                missing_tx_ids.push(*id);
            } else if let Some(tx) = state.txs.get(id) {
                txs.push(tx.clone());
            } else {
                missing_tx_ids.push(*id);
            }
        }
        Ok(BlockAndTxs {
            block,
            txs,
            missing_tx_ids,
        })
    }

    async fn get_transaction(&self, id: TxId, _is_pending: bool) -> Result<Arc<JsonTransaction>, ChainClientError> {
        let state = self.state.lock().unwrap();
        if state.unreachable.contains(&id) {
            return Err(ChainClientError::Status {
                status: 404,
                context: format!("tx {}", id),
            });
        }
        state
            .txs
            .get(&id)
            .cloned()
            .map(Arc::new)
            .ok_or(ChainClientError::Status {
                status: 404,
                context: format!("tx {}", id),
            })
    }

    async fn get_transaction_offset(&self, _id: TxId) -> Result<TxOffset, ChainClientError> {
        Err(ChainClientError::InvalidResponse("offsets not scripted".to_string()))
    }

    async fn get_pending_transaction_ids(&self) -> Result<Vec<TxId>, ChainClientError> {
        Ok(vec![])
    }
}

/// An index store over a fresh temporary directory. The tempdir guard must outlive the store.
pub async fn open_store(config: IndexStoreConfig) -> (tempfile::TempDir, IndexStore, GatewayEvents) {
    let dir = tempfile::tempdir().unwrap();
    let config = IndexStoreConfig {
        db_dir: dir.path().join("sqlite"),
        gql_read_workers: 2,
        ..config
    };
    let events = GatewayEvents::new();
    let store = IndexStore::open(config, events.clone()).await.unwrap();
    (dir, store, events)
}
