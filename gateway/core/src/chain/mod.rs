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

//! Paced block and transaction retrieval from the trusted upstream node and its peer fleet.

pub mod backoff;
pub mod client;
pub mod error;
pub mod peers;
pub mod promise_cache;
pub mod rate_limiter;
pub mod types;

use std::sync::Arc;

pub use client::{ArweaveChainClient, ChainClientConfig};
pub use error::ChainClientError;

use crate::chain::types::{BlockAndTxs, JsonBlock, JsonTransaction, TxId, TxOffset};

/// The seam between the gateway and whatever serves it chain data. The production implementation is
/// [ArweaveChainClient]; tests substitute scripted sources.
#[async_trait::async_trait]
pub trait ChainSource: Send + Sync {
    /// Current tip height as seen by the upstream.
    async fn get_height(&self) -> Result<u64, ChainClientError>;

    /// Fetch one block; with `prefetch` the following heights and the block's transactions are
    /// speculatively scheduled.
    async fn get_block_by_height(&self, height: u64, prefetch: bool) -> Result<Arc<JsonBlock>, ChainClientError>;

    /// Fetch a block and all of its transactions, reporting the ids it could not retrieve.
    async fn get_block_and_txs_by_height(&self, height: u64) -> Result<BlockAndTxs, ChainClientError>;

    async fn get_transaction(&self, id: TxId, is_pending: bool) -> Result<Arc<JsonTransaction>, ChainClientError>;

    async fn get_transaction_offset(&self, id: TxId) -> Result<TxOffset, ChainClientError>;

    async fn get_pending_transaction_ids(&self) -> Result<Vec<TxId>, ChainClientError>;
}
