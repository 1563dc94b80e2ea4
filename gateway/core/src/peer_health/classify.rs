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

//! Consensus height derivation and peer cohort classification.

use std::net::IpAddr;

/// A peer that answered its `/info` probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbedPeer {
    pub ip: IpAddr,
    pub height: u64,
    pub blocks: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct ClassifyConfig {
    /// How far a peer may trail the reference height before being excluded.
    pub max_height_lag: u64,
    /// How far a peer may lead the reference height before being excluded as an outlier.
    pub max_height_lead: u64,
    /// Peers that must agree (within the lag window) for a height to count as consensus.
    pub min_consensus_count: usize,
    /// A peer holding at least `height + 1 − threshold` blocks is considered fully synced.
    pub full_sync_threshold: u64,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            max_height_lag: 5,
            max_height_lead: 5,
            min_consensus_count: 3,
            full_sync_threshold: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerClass {
    Full,
    Partial,
    Excluded,
}

/// The reference height the fleet is measured against.
///
/// Walking candidate heights from the highest down, the first height that at least
/// `min_consensus_count` peers sit within `±max_height_lag` of is the consensus; a single runaway
/// peer can therefore never drag the reference up. With no consensus the maximum observed height is
/// used, and the local index height raises the reference when it is ahead of the fleet.
pub fn compute_reference_height(
    peers: &[ProbedPeer],
    local_max_height: Option<u64>,
    config: &ClassifyConfig,
) -> Option<u64> {
    let mut heights = peers.iter().map(|p| p.height).collect::<Vec<_>>();
    heights.sort_unstable_by(|a, b| b.cmp(a));

    let mut consensus = None;
    for &candidate in &heights {
        let nearby = peers
            .iter()
            .filter(|p| p.height.abs_diff(candidate) <= config.max_height_lag)
            .count();
        if nearby >= config.min_consensus_count {
            consensus = Some(candidate);
            break;
        }
    }
    let consensus = consensus.or_else(|| heights.first().copied());

    match (consensus, local_max_height) {
        (Some(c), Some(l)) => Some(c.max(l)),
        (Some(c), None) => Some(c),
        (None, local) => local,
    }
}

/// Place one peer into its cohort relative to the reference height.
pub fn classify_peer(peer: &ProbedPeer, reference: u64, config: &ClassifyConfig) -> PeerClass {
    if peer.height > reference + config.max_height_lead {
        return PeerClass::Excluded;
    }
    if peer.height < reference.saturating_sub(config.max_height_lag) {
        return PeerClass::Excluded;
    }
    if peer.blocks >= (peer.height + 1).saturating_sub(config.full_sync_threshold) {
        PeerClass::Full
    } else {
        PeerClass::Partial
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn peer(n: u8, height: u64, blocks: u64) -> ProbedPeer {
        ProbedPeer {
            ip: IpAddr::from([10, 0, 0, n]),
            height,
            blocks,
        }
    }

    #[test]
    fn consensus_ignores_runaway_peer() {
        let peers = vec![
            peer(1, 1000, 1000),
            peer(2, 1001, 1001),
            peer(3, 999, 999),
            peer(4, 2000, 2000),
        ];
        let config = ClassifyConfig {
            min_consensus_count: 2,
            max_height_lag: 5,
            ..Default::default()
        };
        assert_eq!(compute_reference_height(&peers, None, &config), Some(1001));
    }

    #[test]
    fn local_height_raises_the_reference() {
        let peers = vec![peer(1, 100, 100), peer(2, 101, 101), peer(3, 99, 99)];
        let config = ClassifyConfig {
            min_consensus_count: 2,
            ..Default::default()
        };
        assert_eq!(compute_reference_height(&peers, Some(500), &config), Some(500));
    }

    #[test]
    fn no_consensus_falls_back_to_max_observed() {
        let peers = vec![peer(1, 100, 100), peer(2, 500, 500)];
        let config = ClassifyConfig {
            min_consensus_count: 2,
            max_height_lag: 5,
            ..Default::default()
        };
        assert_eq!(compute_reference_height(&peers, None, &config), Some(500));
    }

    #[test]
    fn empty_fleet_has_no_reference() {
        assert_eq!(compute_reference_height(&[], None, &ClassifyConfig::default()), None);
    }

    #[test]
    fn classification_matrix() {
        let config = ClassifyConfig {
            max_height_lag: 5,
            max_height_lead: 5,
            min_consensus_count: 2,
            full_sync_threshold: 100,
        };
        assert_eq!(classify_peer(&peer(1, 1000, 950), 1000, &config), PeerClass::Full);
        assert_eq!(classify_peer(&peer(2, 1000, 500), 1000, &config), PeerClass::Partial);
        assert_eq!(classify_peer(&peer(3, 990, 990), 1000, &config), PeerClass::Excluded);
        assert_eq!(classify_peer(&peer(4, 1010, 1010), 1000, &config), PeerClass::Excluded);
    }

    #[test]
    fn low_heights_never_underflow() {
        let config = ClassifyConfig::default();
        assert_eq!(classify_peer(&peer(1, 2, 3), 3, &config), PeerClass::Full);
    }
}
