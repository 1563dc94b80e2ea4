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

use crate::chain::types::WireDecodeError;

/// Errors produced by the chain client.
///
/// The type is `Clone` because in-flight request futures are shared between callers joining the
/// same key; upstream error sources are flattened to their messages for that reason.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainClientError {
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Upstream returned HTTP {status} for {context}")]
    Status { status: u16, context: String },
    #[error("Upstream rate limited the request")]
    RateLimited,
    #[error("Invalid response body: {0}")]
    InvalidResponse(String),
    #[error("Block at height {0} is missing its indep_hash")]
    MissingIndepHash(u64),
    #[error("Request aborted by the caller")]
    Aborted,
    #[error("Peer transaction failed verification: {0}")]
    PeerVerificationFailed(String),
    #[error("Retries exhausted after {attempts} attempts, last error: {last}")]
    RetriesExhausted { attempts: u32, last: String },
    #[error("Wire decode error: {0}")]
    WireDecode(#[from] WireDecodeError),
}

impl ChainClientError {
    /// Network failures, 5xx and 429 are worth retrying; other statuses and malformed bodies are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ChainClientError::Request(_) | ChainClientError::RateLimited => true,
            ChainClientError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ChainClientError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.as_u16() == 429 => ChainClientError::RateLimited,
            Some(status) => ChainClientError::Status {
                status: status.as_u16(),
                context: err.url().map(|u| u.to_string()).unwrap_or_default(),
            },
            None => ChainClientError::Request(err.to_string()),
        }
    }
}
