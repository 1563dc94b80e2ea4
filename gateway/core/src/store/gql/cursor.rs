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

//! Opaque keyset cursors.
//!
//! A cursor encodes the full sort key of the row it follows:
//! `[height, block_transaction_index, data_item_id, indexed_at, id]`, serialised as JSON and
//! wrapped in base64url. Clients treat it as opaque; it compares equal across restarts.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// The `data_item_id` slot of a plain transaction row: a single zero byte that sorts below every
/// real 32-byte id.
pub const DATA_ITEM_ID_SENTINEL: &[u8] = &[0u8];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub height: Option<u64>,
    pub block_transaction_index: Option<u64>,
    pub data_item_id: Vec<u8>,
    pub indexed_at: Option<i64>,
    pub id: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct WireCursor(Option<u64>, Option<u64>, String, Option<i64>, String);

impl Cursor {
    pub fn is_data_item(&self) -> bool {
        self.data_item_id != DATA_ITEM_ID_SENTINEL
    }

    pub fn encode(&self) -> String {
        let wire = WireCursor(
            self.height,
            self.block_transaction_index,
            URL_SAFE_NO_PAD.encode(&self.data_item_id),
            self.indexed_at,
            URL_SAFE_NO_PAD.encode(&self.id),
        );
        let json = serde_json::to_string(&wire).expect("cursor serialisation is infallible");
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(encoded: &str) -> Result<Self, StoreError> {
        let bad = |what: &str| StoreError::InvalidCursor(what.to_string());
        let json = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| bad("not base64url"))?;
        let wire: WireCursor = serde_json::from_slice(&json).map_err(|_| bad("malformed payload"))?;
        let data_item_id = URL_SAFE_NO_PAD
            .decode(&wire.2)
            .map_err(|_| bad("malformed data item id"))?;
        let id = URL_SAFE_NO_PAD.decode(&wire.4).map_err(|_| bad("malformed id"))?;
        if id.is_empty() {
            return Err(bad("empty id"));
        }
        if data_item_id.is_empty() {
            return Err(bad("empty data item id"));
        }
        Ok(Self {
            height: wire.0,
            block_transaction_index: wire.1,
            data_item_id,
            indexed_at: wire.3,
            id,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_a_stable_row_key() {
        let cursor = Cursor {
            height: Some(1234),
            block_transaction_index: Some(7),
            data_item_id: DATA_ITEM_ID_SENTINEL.to_vec(),
            indexed_at: Some(1_700_000_000),
            id: vec![9u8; 32],
        };
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
        assert!(!decoded.is_data_item());
    }

    #[test]
    fn round_trips_a_null_height_key() {
        let cursor = Cursor {
            height: None,
            block_transaction_index: None,
            data_item_id: vec![3u8; 32],
            indexed_at: Some(42),
            id: vec![3u8; 32],
        };
        let decoded = Cursor::decode(&cursor.encode()).unwrap();
        assert_eq!(decoded, cursor);
        assert!(decoded.is_data_item());
    }

    #[test]
    fn encoding_is_deterministic() {
        let cursor = Cursor {
            height: Some(10),
            block_transaction_index: Some(0),
            data_item_id: DATA_ITEM_ID_SENTINEL.to_vec(),
            indexed_at: None,
            id: vec![1u8; 32],
        };
        assert_eq!(cursor.encode(), cursor.encode());
    }

    #[test]
    fn garbage_is_a_validation_error() {
        for bad in ["%%%", "bm90IGpzb24", ""] {
            match Cursor::decode(bad) {
                Err(StoreError::InvalidCursor(_)) => {},
                other => panic!("expected InvalidCursor, got {other:?}"),
            }
        }
    }
}
