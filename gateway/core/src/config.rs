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

//! Aggregate configuration.
//!
//! Full configuration loading lives with the host process; the core only recognises the
//! environment keys documented here and overlays them onto the per-subsystem defaults.

use std::{fmt::Display, str::FromStr};

use log::*;
use tokio::time::Duration;
use url::Url;

use crate::{
    chain::ChainClientConfig,
    importer::BlockImporterConfig,
    peer_health::PeerHealthConfig,
    repair::{BundleRetryConfig, TxRepairConfig},
    store::IndexStoreConfig,
};

const LOG_TARGET: &str = "wg::config";

#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub chain: ChainClientConfig,
    pub importer: BlockImporterConfig,
    pub store: IndexStoreConfig,
    pub peer_health: PeerHealthConfig,
    pub tx_repair: TxRepairConfig,
    pub bundle_retry: BundleRetryConfig,
}

impl GatewayConfig {
    /// Defaults overlaid with the recognised environment keys. Malformed values are logged and
    /// ignored rather than refused; the core never fails to start over one bad variable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(url) = env_var::<Url>("TRUSTED_NODE_URL") {
            config.chain.trusted_node_url = url;
        }
        if let Some(rate) = env_var::<f64>("MAX_REQUESTS_PER_SECOND") {
            config.chain.max_requests_per_second = rate;
        }
        if let Some(concurrency) = env_var::<usize>("MAX_CONCURRENT_REQUESTS") {
            config.chain.max_concurrent_requests = concurrency;
        }

        if let Some(height) = env_var::<u64>("START_HEIGHT") {
            config.importer.start_height = height;
        }
        if let Some(height) = env_var::<u64>("STOP_HEIGHT") {
            config.importer.stop_height = Some(height);
        }
        if let Some(depth) = env_var::<u64>("MAX_FORK_DEPTH") {
            config.importer.max_fork_depth = depth;
            config.store.max_fork_depth = depth;
        }
        if let Some(interval) = env_var::<u64>("STABLE_FLUSH_INTERVAL") {
            config.importer.stable_flush_interval = interval.max(1);
            config.store.stable_flush_interval = interval.max(1);
        }

        if let Some(ms) = env_var::<u64>("GET_DATA_CIRCUIT_BREAKER_TIMEOUT_MS") {
            config.store.data_circuit_breaker.call_timeout = Duration::from_millis(ms);
        }
        if let Some(count) = env_var::<u64>("DATA_ITEM_FLUSH_COUNT_THRESHOLD") {
            config.store.data_item_flush_count_threshold = count;
        }
        if let Some(secs) = env_var::<u64>("MAX_FLUSH_INTERVAL_SECONDS") {
            config.store.max_flush_interval = Duration::from_secs(secs);
        }
        if let Some(write) = env_bool("WRITE_TRANSACTION_DB_SIGNATURES") {
            config.store.write_transaction_signatures = write;
        }
        if let Some(write) = env_bool("WRITE_ANS104_DATA_ITEM_DB_SIGNATURES") {
            config.store.write_data_item_signatures = write;
        }

        config
    }
}

fn env_var<T: FromStr>(key: &str) -> Option<T>
where
    T::Err: Display,
{
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(target: LOG_TARGET, "Ignoring {}={:?}: {}", key, raw, e);
            None
        },
    }
}

fn env_bool(key: &str) -> Option<bool> {
    let raw = std::env::var(key).ok()?;
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        other => {
            warn!(target: LOG_TARGET, "Ignoring {}={:?}: not a boolean", key, other);
            None
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn env_overrides_apply() {
        // One test owns all variables; parallel tests must not share env keys
        std::env::set_var("START_HEIGHT", "100");
        std::env::set_var("STOP_HEIGHT", "200");
        std::env::set_var("MAX_FORK_DEPTH", "18");
        std::env::set_var("STABLE_FLUSH_INTERVAL", "2");
        std::env::set_var("MAX_REQUESTS_PER_SECOND", "42.5");
        std::env::set_var("MAX_CONCURRENT_REQUESTS", "7");
        std::env::set_var("GET_DATA_CIRCUIT_BREAKER_TIMEOUT_MS", "1500");
        std::env::set_var("DATA_ITEM_FLUSH_COUNT_THRESHOLD", "123");
        std::env::set_var("MAX_FLUSH_INTERVAL_SECONDS", "45");
        std::env::set_var("WRITE_TRANSACTION_DB_SIGNATURES", "false");
        std::env::set_var("WRITE_ANS104_DATA_ITEM_DB_SIGNATURES", "true");
        std::env::set_var("BAD_KEY_FOR_COVERAGE", "whatever");

        let config = GatewayConfig::from_env();
        assert_eq!(config.importer.start_height, 100);
        assert_eq!(config.importer.stop_height, Some(200));
        assert_eq!(config.importer.max_fork_depth, 18);
        assert_eq!(config.store.max_fork_depth, 18);
        assert_eq!(config.importer.stable_flush_interval, 2);
        assert!((config.chain.max_requests_per_second - 42.5).abs() < f64::EPSILON);
        assert_eq!(config.chain.max_concurrent_requests, 7);
        assert_eq!(config.store.data_circuit_breaker.call_timeout, Duration::from_millis(1500));
        assert_eq!(config.store.data_item_flush_count_threshold, 123);
        assert_eq!(config.store.max_flush_interval, Duration::from_secs(45));
        assert!(!config.store.write_transaction_signatures);
        assert!(config.store.write_data_item_signatures);
    }

    #[test]
    fn malformed_values_fall_back_to_defaults() {
        std::env::set_var("MAX_FORK_DEPTH_TEST_BAD", "not-a-number");
        assert_eq!(env_var::<u64>("MAX_FORK_DEPTH_TEST_BAD"), None::<u64>);
        assert_eq!(env_bool("MAX_FORK_DEPTH_TEST_BAD"), None);
    }
}
