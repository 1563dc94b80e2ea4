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

use once_cell::sync::Lazy;
use weavegate_metrics::{IntCounter, IntGauge};

pub fn importer_running() -> &'static IntGauge {
    static METER: Lazy<IntGauge> = Lazy::new(|| {
        weavegate_metrics::register_int_gauge(
            "importer::running",
            "1 while the block importer loop is active",
        )
        .unwrap()
    });

    &METER
}

pub fn blocks_imported() -> &'static IntCounter {
    static METER: Lazy<IntCounter> = Lazy::new(|| {
        weavegate_metrics::register_int_counter("importer::blocks_imported", "Blocks persisted by the importer")
            .unwrap()
    });

    &METER
}

pub fn block_import_errors() -> &'static IntCounter {
    static METER: Lazy<IntCounter> = Lazy::new(|| {
        weavegate_metrics::register_int_counter(
            "importer::block_import_errors",
            "Single-block import failures that were retried",
        )
        .unwrap()
    });

    &METER
}

pub fn forks_detected() -> &'static IntCounter {
    static METER: Lazy<IntCounter> = Lazy::new(|| {
        weavegate_metrics::register_int_counter("importer::forks_detected", "Chain forks observed at the tip").unwrap()
    });

    &METER
}

pub fn last_fork_depth() -> &'static IntGauge {
    static METER: Lazy<IntGauge> = Lazy::new(|| {
        weavegate_metrics::register_int_gauge("importer::last_fork_depth", "Depth of the last recovered fork").unwrap()
    });

    &METER
}

pub fn last_height_imported() -> &'static IntGauge {
    static METER: Lazy<IntGauge> = Lazy::new(|| {
        weavegate_metrics::register_int_gauge("importer::last_height_imported", "Most recently persisted height")
            .unwrap()
    });

    &METER
}

pub fn transactions_indexed() -> &'static IntCounter {
    static METER: Lazy<IntCounter> = Lazy::new(|| {
        weavegate_metrics::register_int_counter("importer::transactions_indexed", "Transactions persisted with blocks")
            .unwrap()
    });

    &METER
}

pub fn missing_transactions() -> &'static IntCounter {
    static METER: Lazy<IntCounter> = Lazy::new(|| {
        weavegate_metrics::register_int_counter(
            "importer::missing_transactions",
            "Transactions referenced by blocks but unavailable at import time",
        )
        .unwrap()
    });

    &METER
}

pub fn repair_txs_fetched() -> &'static IntCounter {
    static METER: Lazy<IntCounter> = Lazy::new(|| {
        weavegate_metrics::register_int_counter("repair::txs_fetched", "Missing transactions recovered by repair")
            .unwrap()
    });

    &METER
}

pub fn repair_tx_errors() -> &'static IntCounter {
    static METER: Lazy<IntCounter> = Lazy::new(|| {
        weavegate_metrics::register_int_counter("repair::tx_errors", "Repair fetches that exhausted their attempts")
            .unwrap()
    });

    &METER
}

pub fn full_peers() -> &'static IntGauge {
    static METER: Lazy<IntGauge> = Lazy::new(|| {
        weavegate_metrics::register_int_gauge("peer_health::full_peers", "Peers classified as fully synced").unwrap()
    });

    &METER
}

pub fn partial_peers() -> &'static IntGauge {
    static METER: Lazy<IntGauge> = Lazy::new(|| {
        weavegate_metrics::register_int_gauge("peer_health::partial_peers", "Peers classified as partially synced")
            .unwrap()
    });

    &METER
}
