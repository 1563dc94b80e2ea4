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

//! Process-wide metric registration.
//!
//! Thin wrapper around a single global prometheus [Registry]. Components register their meters once
//! (typically behind a `Lazy` static) and mutate them lock-free afterwards. Exposition is a
//! collaborator concern; this crate only owns the registry.

use once_cell::sync::Lazy;
pub use prometheus::{
    Histogram,
    HistogramOpts,
    HistogramVec,
    IntCounter,
    IntCounterVec,
    IntGauge,
    IntGaugeVec,
    Opts,
    Registry,
};

static DEFAULT_REGISTRY: Lazy<Registry> = Lazy::new(|| Registry::new_custom(Some("weavegate".to_string()), None)
    .expect("weavegate is a valid metrics namespace"));

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    PrometheusError(#[from] prometheus::Error),
}

/// Returns the global default registry, against which all `register_*` functions operate.
pub fn get_default_registry() -> &'static Registry {
    &DEFAULT_REGISTRY
}

pub fn register_int_counter(name: &str, help: &str) -> Result<IntCounter, MetricsError> {
    let counter = IntCounter::new(name, help)?;
    get_default_registry().register(Box::new(counter.clone()))?;
    Ok(counter)
}

pub fn register_int_counter_vec(name: &str, help: &str, label_names: &[&str]) -> Result<IntCounterVec, MetricsError> {
    let counter = IntCounterVec::new(Opts::new(name, help), label_names)?;
    get_default_registry().register(Box::new(counter.clone()))?;
    Ok(counter)
}

pub fn register_int_gauge(name: &str, help: &str) -> Result<IntGauge, MetricsError> {
    let gauge = IntGauge::new(name, help)?;
    get_default_registry().register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

pub fn register_int_gauge_vec(name: &str, help: &str, label_names: &[&str]) -> Result<IntGaugeVec, MetricsError> {
    let gauge = IntGaugeVec::new(Opts::new(name, help), label_names)?;
    get_default_registry().register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

pub fn register_histogram(name: &str, help: &str) -> Result<Histogram, MetricsError> {
    let histogram = Histogram::with_opts(HistogramOpts::new(name, help))?;
    get_default_registry().register(Box::new(histogram.clone()))?;
    Ok(histogram)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registers_and_gathers() {
        let counter = register_int_counter("test_registers_and_gathers", "test counter").unwrap();
        counter.inc_by(3);
        let families = get_default_registry().gather();
        let family = families
            .iter()
            .find(|f| f.get_name() == "weavegate_test_registers_and_gathers")
            .unwrap();
        assert_eq!(family.get_metric()[0].get_counter().get_value() as u64, 3);
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        register_int_gauge("test_duplicate_registration", "gauge").unwrap();
        assert!(register_int_gauge("test_duplicate_registration", "gauge").is_err());
    }
}
