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

//! Book-keeping for peers discovered via the trusted node's `/peers` list.

use std::sync::Mutex;

use rand::{seq::SliceRandom, thread_rng};
use url::Url;

/// A peer's cohort is decided by how much of the weave it holds relative to its own height.
const PREFERRED_SYNC_RATIO: f64 = 0.9;

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredPeer {
    pub url: Url,
    pub height: u64,
    pub blocks: u64,
}

impl DiscoveredPeer {
    /// A peer holding more than 90% of its advertised chain is worth offloading reads to.
    pub fn is_preferred(&self) -> bool {
        self.height > 0 && (self.blocks as f64 / self.height as f64) > PREFERRED_SYNC_RATIO
    }
}

/// The current view of the discovered peer fleet. Replaced wholesale on each refresh; reads pick a
/// random preferred peer so load spreads without coordination.
#[derive(Debug, Default)]
pub struct PeerList {
    inner: Mutex<Vec<DiscoveredPeer>>,
}

impl PeerList {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn replace(&self, peers: Vec<DiscoveredPeer>) {
        *self.inner.lock().expect("peer list lock poisoned") = peers;
    }

    pub fn random_preferred(&self) -> Option<DiscoveredPeer> {
        let peers = self.inner.lock().expect("peer list lock poisoned");
        let preferred = peers.iter().filter(|p| p.is_preferred()).collect::<Vec<_>>();
        preferred.choose(&mut thread_rng()).map(|p| (*p).clone())
    }

    pub fn preferred_count(&self) -> usize {
        self.inner
            .lock()
            .expect("peer list lock poisoned")
            .iter()
            .filter(|p| p.is_preferred())
            .count()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("peer list lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn peer(url: &str, height: u64, blocks: u64) -> DiscoveredPeer {
        DiscoveredPeer {
            url: Url::parse(url).unwrap(),
            height,
            blocks,
        }
    }

    #[test]
    fn preference_requires_sync_ratio() {
        assert!(peer("http://10.0.0.1:1984", 1000, 950).is_preferred());
        assert!(!peer("http://10.0.0.2:1984", 1000, 900).is_preferred());
        assert!(!peer("http://10.0.0.3:1984", 0, 0).is_preferred());
    }

    #[test]
    fn random_preferred_skips_partial_peers() {
        let list = PeerList::new();
        list.replace(vec![
            peer("http://10.0.0.1:1984", 1000, 10),
            peer("http://10.0.0.2:1984", 1000, 999),
        ]);
        assert_eq!(list.preferred_count(), 1);
        let picked = list.random_preferred().unwrap();
        assert_eq!(picked.url.as_str(), "http://10.0.0.2:1984/");
    }
}
