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

//! Periodic peer discovery, classification and endpoint-set emission.
//!
//! Every cycle resolves the configured DNS names, probes the resulting addresses, derives a
//! consensus reference height and splits the healthy fleet into *full* and *partial* cohorts
//! written as Envoy EDS documents. Every failure path retains the previously written files; a
//! degraded cycle never publishes an empty endpoint set.

pub mod classify;
pub mod eds;

use std::{collections::BTreeSet, net::IpAddr, path::PathBuf};

use futures::{stream, StreamExt};
use log::*;
use tokio::time::{sleep, timeout, Duration};
use weavegate_shutdown::ShutdownSignal;

pub use classify::{classify_peer, compute_reference_height, ClassifyConfig, PeerClass, ProbedPeer};

use crate::{chain::types::NodeInfo, metrics, store::IndexStore};

const LOG_TARGET: &str = "wg::peer_health";

const PROBE_CONCURRENCY: usize = 20;

pub const FULL_NODES_FILE: &str = "arweave_full_nodes.json";
pub const PARTIAL_NODES_FILE: &str = "arweave_partial_nodes.json";

#[derive(Debug, Clone)]
pub struct PeerHealthConfig {
    /// DNS names whose A records make up the candidate fleet.
    pub dns_names: Vec<String>,
    /// Port probed on (and emitted for) every peer.
    pub port: u16,
    pub use_https: bool,
    /// Cycle period.
    pub interval: Duration,
    /// Per-peer probe timeout.
    pub probe_timeout: Duration,
    pub classify: ClassifyConfig,
    /// Directory the EDS documents are written into.
    pub output_dir: PathBuf,
    pub full_cluster_name: String,
    pub partial_cluster_name: String,
}

impl Default for PeerHealthConfig {
    fn default() -> Self {
        Self {
            dns_names: vec![],
            port: 1984,
            use_https: false,
            interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
            classify: ClassifyConfig::default(),
            output_dir: PathBuf::from("data/eds"),
            full_cluster_name: "arweave_full_nodes".to_string(),
            partial_cluster_name: "arweave_partial_nodes".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PeerHealthError {
    #[error("All {0} configured DNS names failed to resolve")]
    AllResolutionsFailed(usize),
    #[error("No peers answered their probe")]
    NoResponsivePeers,
    #[error("Classification produced no endpoints")]
    EmptyClassification,
    #[error("Failed to write endpoint files: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a successful cycle, mostly for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub reference_height: u64,
    pub full: usize,
    pub partial: usize,
    pub excluded: usize,
}

pub struct EdsGenerator {
    config: PeerHealthConfig,
    http: reqwest::Client,
    store: IndexStore,
    shutdown: ShutdownSignal,
}

impl EdsGenerator {
    pub fn new(config: PeerHealthConfig, store: IndexStore, shutdown: ShutdownSignal) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .build()
            .expect("reqwest client construction only fails on TLS backend misconfiguration");
        Self {
            config,
            http,
            store,
            shutdown,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Periodic loop; each cycle either publishes a full classification or retains the previous
    /// output.
    pub async fn run(self) {
        let mut shutdown = self.shutdown.clone();
        info!(
            target: LOG_TARGET,
            "EDS generator starting ({} DNS names, every {:?})",
            self.config.dns_names.len(),
            self.config.interval
        );
        loop {
            match self.run_cycle().await {
                Ok(outcome) => {
                    debug!(
                        target: LOG_TARGET,
                        "EDS cycle complete: reference {} ({} full, {} partial, {} excluded)",
                        outcome.reference_height,
                        outcome.full,
                        outcome.partial,
                        outcome.excluded
                    );
                },
                Err(e) => {
                    warn!(target: LOG_TARGET, "EDS cycle failed, retaining previous output: {}", e);
                },
            }
            tokio::select! {
                _ = sleep(self.config.interval) => {},
                _ = shutdown.wait() => break,
            }
        }
        info!(target: LOG_TARGET, "EDS generator stopped");
    }

    /// One resolve → probe → classify → emit pass.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, PeerHealthError> {
        let ips = self.resolve_fleet().await?;
        let peers = self.probe_fleet(ips).await;
        if peers.is_empty() {
            return Err(PeerHealthError::NoResponsivePeers);
        }

        let local_max_height = match self.store.get_max_height().await {
            Ok(h) => h,
            Err(e) => {
                debug!(target: LOG_TARGET, "Local height unavailable for this cycle: {}", e);
                None
            },
        };
        let reference = compute_reference_height(&peers, local_max_height, &self.config.classify)
            .ok_or(PeerHealthError::NoResponsivePeers)?;

        let mut full = Vec::new();
        let mut partial = Vec::new();
        let mut excluded = 0usize;
        for peer in &peers {
            match classify_peer(peer, reference, &self.config.classify) {
                PeerClass::Full => full.push(peer.ip),
                PeerClass::Partial => partial.push(peer.ip),
                PeerClass::Excluded => excluded += 1,
            }
        }

        if full.is_empty() && partial.is_empty() {
            return Err(PeerHealthError::EmptyClassification);
        }

        self.emit(&full, &partial).await?;
        metrics::full_peers().set(full.len() as i64);
        metrics::partial_peers().set(partial.len() as i64);

        Ok(CycleOutcome {
            reference_height: reference,
            full: full.len(),
            partial: partial.len(),
            excluded,
        })
    }

    /// Resolve all configured names, unioning their A records. Only a total failure is an error:
    /// a partially resolved fleet is still worth classifying.
    async fn resolve_fleet(&self) -> Result<Vec<IpAddr>, PeerHealthError> {
        let mut ips = BTreeSet::new();
        let mut failures = 0usize;
        for name in &self.config.dns_names {
            match tokio::net::lookup_host((name.as_str(), self.config.port)).await {
                Ok(addrs) => {
                    ips.extend(addrs.map(|addr| addr.ip()));
                },
                Err(e) => {
                    debug!(target: LOG_TARGET, "Resolution of {} failed: {}", name, e);
                    failures += 1;
                },
            }
        }
        if !self.config.dns_names.is_empty() && failures == self.config.dns_names.len() {
            return Err(PeerHealthError::AllResolutionsFailed(failures));
        }
        Ok(ips.into_iter().collect())
    }

    async fn probe_fleet(&self, ips: Vec<IpAddr>) -> Vec<ProbedPeer> {
        let scheme = if self.config.use_https { "https" } else { "http" };
        let port = self.config.port;
        let probes = stream::iter(ips)
            .map(|ip| {
                let url = format!("{}://{}:{}/info", scheme, ip, port);
                let http = self.http.clone();
                let probe_timeout = self.config.probe_timeout;
                async move {
                    let resp = timeout(probe_timeout, http.get(&url).send()).await.ok()?.ok()?;
                    if !resp.status().is_success() {
                        return None;
                    }
                    // Both fields must be present and numeric; anything else disqualifies the peer
                    let info: NodeInfo = resp.json().await.ok()?;
                    Some(ProbedPeer {
                        ip,
                        height: info.height,
                        blocks: info.blocks,
                    })
                }
            })
            .buffer_unordered(PROBE_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;
        probes.into_iter().flatten().collect()
    }

    async fn emit(&self, full: &[IpAddr], partial: &[IpAddr]) -> Result<(), PeerHealthError> {
        tokio::fs::create_dir_all(&self.config.output_dir).await?;
        let version_info = chrono::Utc::now().to_rfc3339();

        let full_doc = eds::cluster_load_assignment(&self.config.full_cluster_name, full, self.config.port, &version_info);
        let partial_doc =
            eds::cluster_load_assignment(&self.config.partial_cluster_name, partial, self.config.port, &version_info);

        let full_json = serde_json::to_vec_pretty(&full_doc).expect("EDS envelope serialisation is infallible");
        let partial_json = serde_json::to_vec_pretty(&partial_doc).expect("EDS envelope serialisation is infallible");

        eds::write_atomically(&self.config.output_dir.join(FULL_NODES_FILE), &full_json).await?;
        eds::write_atomically(&self.config.output_dir.join(PARTIAL_NODES_FILE), &partial_json).await?;
        Ok(())
    }
}
