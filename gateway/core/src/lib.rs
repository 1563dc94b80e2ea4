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

//! The Weavegate gateway core.
//!
//! A gateway indexes a content-addressed, append-only weave and serves queries over its
//! transactions, data items and blocks. This crate holds the four subsystems that do the heavy
//! lifting:
//! * The [chain] client: paced, deduplicating retrieval of blocks and transactions from a trusted
//!   upstream node, opportunistically offloaded to discovered peers.
//! * The [store]: a four-namespace sqlite index with a strict new-to-stable row lifecycle, a
//!   GraphQL query planner and per-namespace database worker lanes.
//! * The [importer]: a fork-aware, gap-detecting loop walking the chain head into the store.
//! * [peer_health]: periodic peer classification emitting Envoy endpoint sets for the fronting
//!   proxy.
//!
//! HTTP serving, configuration loading, logging setup and the CLI are host-process concerns; the
//! crate only consumes their interfaces.

pub mod chain;
pub mod circuit_breaker;
pub mod config;
pub mod events;
pub mod importer;
pub mod metrics;
pub mod peer_health;
pub mod repair;
pub mod store;

pub use config::GatewayConfig;
pub use events::GatewayEvents;
