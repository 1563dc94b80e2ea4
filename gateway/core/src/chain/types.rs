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

//! Wire types for the upstream chain HTTP API.
//!
//! Identifiers and binary fields travel as unpadded base64url strings on the wire and are decoded to
//! raw bytes on arrival; nothing downstream of this module handles base64.

use std::{
    convert::TryFrom,
    fmt,
    fmt::{Display, Formatter},
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

pub const TX_ID_LEN: usize = 32;
pub const BLOCK_HASH_LEN: usize = 48;

/// A 32-byte transaction (or data item) identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxId([u8; TX_ID_LEN]);

impl TxId {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, WireDecodeError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|_| WireDecodeError::InvalidBase64)?;
        Self::try_from(bytes.as_slice())
    }
}

impl TryFrom<&[u8]> for TxId {
    type Error = WireDecodeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; TX_ID_LEN] = bytes.try_into().map_err(|_| WireDecodeError::InvalidLength {
            expected: TX_ID_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl Display for TxId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b64())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.to_b64())
    }
}

/// A 48-byte independent block hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockHash([u8; BLOCK_HASH_LEN]);

impl BlockHash {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    pub fn from_b64(s: &str) -> Result<Self, WireDecodeError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|_| WireDecodeError::InvalidBase64)?;
        Self::try_from(bytes.as_slice())
    }
}

impl TryFrom<&[u8]> for BlockHash {
    type Error = WireDecodeError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; BLOCK_HASH_LEN] = bytes.try_into().map_err(|_| WireDecodeError::InvalidLength {
            expected: BLOCK_HASH_LEN,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl Display for BlockHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b64())
    }
}

impl fmt::Debug for BlockHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "BlockHash({})", self.to_b64())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum WireDecodeError {
    #[error("Value is not valid base64url")]
    InvalidBase64,
    #[error("Invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

macro_rules! b64_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_b64())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
                Self::from_b64(&s).map_err(de::Error::custom)
            }
        }
    };
}

b64_serde!(TxId);
b64_serde!(BlockHash);

/// Variable-length binary wire field (owner keys, roots, nonces, tag bytes).
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct B64Bytes(pub Vec<u8>);

impl B64Bytes {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_b64(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }
}

impl From<Vec<u8>> for B64Bytes {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Display for B64Bytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_b64())
    }
}

impl fmt::Debug for B64Bytes {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "B64Bytes({})", self.to_b64())
    }
}

impl Serialize for B64Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_b64())
    }
}

impl<'de> Deserialize<'de> for B64Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        URL_SAFE_NO_PAD
            .decode(s.as_ref())
            .map(B64Bytes)
            .map_err(de::Error::custom)
    }
}

/// Accepts a JSON string or number and yields its decimal string form. Large chain quantities
/// (winston amounts, weave sizes) exceed 64 bits and must never pass through a float.
fn de_decimal_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    struct Visitor;

    impl<'de> de::Visitor<'de> for Visitor {
        type Value = String;

        fn expecting(&self, f: &mut Formatter<'_>) -> fmt::Result {
            f.write_str("a decimal string or integer")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<String, E> {
            Ok(v.to_string())
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<String, E> {
            Ok(v.to_string())
        }
    }

    deserializer.deserialize_any(Visitor)
}

fn de_opt_decimal_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "de_decimal_string")] String);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
}

/// Reward addresses are usually base64url but the genesis era used the literal `unclaimed`; any
/// undecodable value is treated as absent.
fn de_opt_b64_lossy<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<B64Bytes>, D::Error> {
    let s = Option::<String>::deserialize(deserializer)?;
    Ok(s.and_then(|s| URL_SAFE_NO_PAD.decode(&s).ok().map(B64Bytes)))
}

fn default_format() -> u8 {
    1
}

/// A `(name, value)` tag pair as it travels on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonTag {
    pub name: B64Bytes,
    pub value: B64Bytes,
}

impl JsonTag {
    pub fn new(name: &[u8], value: &[u8]) -> Self {
        Self {
            name: B64Bytes(name.to_vec()),
            value: B64Bytes(value.to_vec()),
        }
    }
}

/// A block as served by `GET /block/height/{h}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonBlock {
    pub indep_hash: BlockHash,
    pub height: u64,
    #[serde(default)]
    pub previous_block: Option<BlockHash>,
    #[serde(default)]
    pub nonce: B64Bytes,
    #[serde(default)]
    pub hash: B64Bytes,
    pub timestamp: u64,
    #[serde(default, deserialize_with = "de_opt_decimal_string")]
    pub diff: Option<String>,
    #[serde(default, deserialize_with = "de_opt_decimal_string")]
    pub cumulative_diff: Option<String>,
    #[serde(default)]
    pub last_retarget: Option<u64>,
    #[serde(default, deserialize_with = "de_opt_b64_lossy")]
    pub reward_addr: Option<B64Bytes>,
    #[serde(default, deserialize_with = "de_opt_decimal_string")]
    pub reward_pool: Option<String>,
    #[serde(default, deserialize_with = "de_opt_decimal_string")]
    pub block_size: Option<String>,
    #[serde(default, deserialize_with = "de_opt_decimal_string")]
    pub weave_size: Option<String>,
    #[serde(default)]
    pub usd_to_ar_rate: Option<[String; 2]>,
    #[serde(default)]
    pub scheduled_usd_to_ar_rate: Option<[String; 2]>,
    #[serde(default)]
    pub hash_list_merkle: Option<B64Bytes>,
    #[serde(default)]
    pub wallet_list: Option<B64Bytes>,
    #[serde(default)]
    pub tx_root: Option<B64Bytes>,
    #[serde(default)]
    pub txs: Vec<TxId>,
    /// Proof-of-access payload; stripped before the block enters any cache.
    #[serde(default, skip_serializing)]
    pub poa: Option<serde_json::Value>,
}

impl JsonBlock {
    pub fn tx_count(&self) -> usize {
        self.txs.len()
    }

    /// Drop the PoA payload to bound cached block size.
    pub fn strip_poa(&mut self) {
        self.poa = None;
    }
}

/// A transaction as served by `GET /tx/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonTransaction {
    pub id: TxId,
    #[serde(default)]
    pub signature: Option<B64Bytes>,
    #[serde(default = "default_format")]
    pub format: u8,
    #[serde(default)]
    pub last_tx: B64Bytes,
    #[serde(default)]
    pub owner: B64Bytes,
    #[serde(default)]
    pub target: B64Bytes,
    #[serde(default, deserialize_with = "de_decimal_string")]
    pub quantity: String,
    #[serde(default, deserialize_with = "de_decimal_string")]
    pub reward: String,
    #[serde(default, deserialize_with = "de_decimal_string")]
    pub data_size: String,
    #[serde(default)]
    pub data_root: B64Bytes,
    #[serde(default)]
    pub tags: Vec<JsonTag>,
    /// Inline data body; stripped before the transaction enters any cache.
    #[serde(default, skip_serializing)]
    pub data: Option<String>,
}

impl JsonTransaction {
    /// The wallet address owning this transaction: SHA-256 over the raw owner key bytes.
    pub fn owner_address(&self) -> Vec<u8> {
        Sha256::digest(self.owner.as_bytes()).to_vec()
    }

    /// Checks the id binding: a well-formed transaction id is the SHA-256 of its signature bytes.
    /// Transactions received from untrusted peers must pass this before being used.
    pub fn verify_id_binding(&self) -> bool {
        match &self.signature {
            Some(sig) if !sig.is_empty() => Sha256::digest(sig.as_bytes()).as_slice() == self.id.as_bytes(),
            _ => false,
        }
    }

    /// Drop the raw data body to bound cached transaction size.
    pub fn strip_data(&mut self) {
        self.data = None;
    }

    fn tag_string_value(&self, name: &[u8]) -> Option<String> {
        self.tags
            .iter()
            .find(|t| t.name.as_bytes().eq_ignore_ascii_case(name))
            .map(|t| String::from_utf8_lossy(t.value.as_bytes()).into_owned())
    }

    pub fn content_type(&self) -> Option<String> {
        self.tag_string_value(b"Content-Type")
    }

    pub fn content_encoding(&self) -> Option<String> {
        self.tag_string_value(b"Content-Encoding")
    }
}

/// The result of fetching a block together with its transactions. Transactions the upstream could
/// not serve are listed in `missing_tx_ids` and recorded for later repair.
#[derive(Debug, Clone)]
pub struct BlockAndTxs {
    pub block: JsonBlock,
    pub txs: Vec<JsonTransaction>,
    pub missing_tx_ids: Vec<TxId>,
}

/// `GET /tx/{id}/offset` response.
#[derive(Debug, Clone, Deserialize)]
pub struct TxOffset {
    #[serde(deserialize_with = "de_decimal_string")]
    pub offset: String,
    #[serde(deserialize_with = "de_decimal_string")]
    pub size: String,
}

/// `GET /info` response, as served by the trusted node and by discovered peers.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeInfo {
    pub height: u64,
    pub blocks: u64,
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_tx_json(id: &TxId, sig: &[u8]) -> String {
        format!(
            r#"{{"id":"{}","signature":"{}","format":2,"owner":"AQID","target":"","quantity":"1000",
                 "reward":"2","data_size":"0","data_root":"","last_tx":"",
                 "tags":[{{"name":"Q29udGVudC1UeXBl","value":"dGV4dC9wbGFpbg"}}],"data":"AAAA"}}"#,
            id.to_b64(),
            URL_SAFE_NO_PAD.encode(sig)
        )
    }

    #[test]
    fn id_binding_round_trip() {
        let sig = b"some signature bytes".to_vec();
        let id = TxId::try_from(Sha256::digest(&sig).as_slice()).unwrap();
        let tx: JsonTransaction = serde_json::from_str(&sample_tx_json(&id, &sig)).unwrap();
        assert!(tx.verify_id_binding());
        assert_eq!(tx.content_type().as_deref(), Some("text/plain"));
    }

    #[test]
    fn id_binding_rejects_mismatched_signature() {
        let id = TxId::try_from([7u8; 32].as_slice()).unwrap();
        let tx: JsonTransaction = serde_json::from_str(&sample_tx_json(&id, b"other")).unwrap();
        assert!(!tx.verify_id_binding());
    }

    #[test]
    fn strip_data_removes_body() {
        let sig = b"s".to_vec();
        let id = TxId::try_from(Sha256::digest(&sig).as_slice()).unwrap();
        let mut tx: JsonTransaction = serde_json::from_str(&sample_tx_json(&id, &sig)).unwrap();
        assert!(tx.data.is_some());
        tx.strip_data();
        assert!(tx.data.is_none());
    }

    #[test]
    fn block_accepts_numeric_and_string_quantities() {
        let json = format!(
            r#"{{"indep_hash":"{}","height":5,"previous_block":"{}","timestamp":1600000000,
                 "nonce":"AQ","hash":"AA","diff":12345,"reward_pool":"99999999999999999999999",
                 "weave_size":1024,"txs":[],"poa":{{"option":"1"}}}}"#,
            URL_SAFE_NO_PAD.encode([1u8; 48]),
            URL_SAFE_NO_PAD.encode([2u8; 48]),
        );
        let mut block: JsonBlock = serde_json::from_str(&json).unwrap();
        assert_eq!(block.diff.as_deref(), Some("12345"));
        assert_eq!(block.reward_pool.as_deref(), Some("99999999999999999999999"));
        assert_eq!(block.weave_size.as_deref(), Some("1024"));
        assert!(block.poa.is_some());
        block.strip_poa();
        assert!(block.poa.is_none());
    }

    #[test]
    fn unclaimed_reward_addr_is_none() {
        let json = format!(
            r#"{{"indep_hash":"{}","height":0,"timestamp":1,"reward_addr":"unclaimed","txs":[]}}"#,
            URL_SAFE_NO_PAD.encode([3u8; 48]),
        );
        let block: JsonBlock = serde_json::from_str(&json).unwrap();
        assert!(block.reward_addr.is_none());
    }
}
