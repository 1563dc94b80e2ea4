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

//! Process-wide event bus.
//!
//! One bounded broadcast channel per event kind. Publishing never blocks: a subscriber that falls
//! behind sees `Lagged` on its receiver, the importer is unaffected.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::{
    chain::types::{JsonBlock, JsonTransaction, TxId},
    store::bundles::NormalizedDataItem,
};

/// Default backlog per event kind.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A transaction referenced by a block that could not be fetched at import time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxFetchFailed {
    pub id: TxId,
    pub height: u64,
}

struct Channels {
    block_fetched: broadcast::Sender<Arc<JsonBlock>>,
    block_saved: broadcast::Sender<Arc<JsonBlock>>,
    block_tx_fetched: broadcast::Sender<Arc<JsonTransaction>>,
    block_tx_saved: broadcast::Sender<Arc<JsonTransaction>>,
    block_tx_fetch_failed: broadcast::Sender<TxFetchFailed>,
    tx_fetched: broadcast::Sender<Arc<JsonTransaction>>,
    data_item_indexed: broadcast::Sender<Arc<NormalizedDataItem>>,
}

/// Handle to the gateway's event bus. Cheap to clone; all clones publish into and subscribe to the
/// same channels.
#[derive(Clone)]
pub struct GatewayEvents {
    channels: Arc<Channels>,
}

macro_rules! event_channel {
    ($publish:ident, $subscribe:ident, $field:ident, $ty:ty) => {
        pub fn $publish(&self, event: $ty) {
            // Err means no live subscriber, which is fine
            let _ = self.channels.$field.send(event);
        }

        pub fn $subscribe(&self) -> broadcast::Receiver<$ty> {
            self.channels.$field.subscribe()
        }
    };
}

impl GatewayEvents {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Channels {
                block_fetched: broadcast::channel(capacity).0,
                block_saved: broadcast::channel(capacity).0,
                block_tx_fetched: broadcast::channel(capacity).0,
                block_tx_saved: broadcast::channel(capacity).0,
                block_tx_fetch_failed: broadcast::channel(capacity).0,
                tx_fetched: broadcast::channel(capacity).0,
                data_item_indexed: broadcast::channel(capacity).0,
            }),
        }
    }

    event_channel!(publish_block_fetched, subscribe_block_fetched, block_fetched, Arc<JsonBlock>);
    event_channel!(publish_block_saved, subscribe_block_saved, block_saved, Arc<JsonBlock>);
    event_channel!(
        publish_block_tx_fetched,
        subscribe_block_tx_fetched,
        block_tx_fetched,
        Arc<JsonTransaction>
    );
    event_channel!(
        publish_block_tx_saved,
        subscribe_block_tx_saved,
        block_tx_saved,
        Arc<JsonTransaction>
    );
    event_channel!(
        publish_block_tx_fetch_failed,
        subscribe_block_tx_fetch_failed,
        block_tx_fetch_failed,
        TxFetchFailed
    );
    event_channel!(publish_tx_fetched, subscribe_tx_fetched, tx_fetched, Arc<JsonTransaction>);
    event_channel!(
        publish_data_item_indexed,
        subscribe_data_item_indexed,
        data_item_indexed,
        Arc<NormalizedDataItem>
    );
}

impl Default for GatewayEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let events = GatewayEvents::new();
        events.publish_block_tx_fetch_failed(TxFetchFailed {
            id: crate::chain::types::TxId::try_from([1u8; 32].as_slice()).unwrap(),
            height: 10,
        });
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let events = GatewayEvents::new();
        let mut rx = events.subscribe_block_tx_fetch_failed();
        let id = crate::chain::types::TxId::try_from([2u8; 32].as_slice()).unwrap();
        events.publish_block_tx_fetch_failed(TxFetchFailed { id, height: 3 });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.id, id);
        assert_eq!(got.height, 3);
    }
}
