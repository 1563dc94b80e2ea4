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

//! Envoy endpoint-discovery envelopes and their atomic emission.

use std::{io, net::IpAddr, path::Path};

use serde::Serialize;

const CLUSTER_LOAD_ASSIGNMENT_TYPE: &str = "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";

#[derive(Debug, Serialize)]
pub struct EdsEnvelope {
    pub version_info: String,
    pub resources: Vec<EdsResource>,
}

#[derive(Debug, Serialize)]
pub struct EdsResource {
    #[serde(rename = "@type")]
    pub type_url: &'static str,
    pub cluster_name: String,
    pub endpoints: Vec<EndpointGroup>,
}

#[derive(Debug, Serialize)]
pub struct EndpointGroup {
    pub lb_endpoints: Vec<LbEndpoint>,
}

#[derive(Debug, Serialize)]
pub struct LbEndpoint {
    pub endpoint: Endpoint,
    pub health_status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Endpoint {
    pub address: Address,
}

#[derive(Debug, Serialize)]
pub struct Address {
    pub socket_address: SocketAddress,
}

#[derive(Debug, Serialize)]
pub struct SocketAddress {
    pub address: String,
    pub port_value: u16,
}

/// Build the `ClusterLoadAssignment` envelope for one cohort. All emitted endpoints are `HEALTHY`;
/// unhealthy peers simply do not appear.
pub fn cluster_load_assignment(cluster_name: &str, ips: &[IpAddr], port: u16, version_info: &str) -> EdsEnvelope {
    let lb_endpoints = ips
        .iter()
        .map(|ip| LbEndpoint {
            endpoint: Endpoint {
                address: Address {
                    socket_address: SocketAddress {
                        address: ip.to_string(),
                        port_value: port,
                    },
                },
            },
            health_status: "HEALTHY",
        })
        .collect();

    EdsEnvelope {
        version_info: version_info.to_string(),
        resources: vec![EdsResource {
            type_url: CLUSTER_LOAD_ASSIGNMENT_TYPE,
            cluster_name: cluster_name.to_string(),
            endpoints: vec![EndpointGroup { lb_endpoints }],
        }],
    }
}

/// Replace `path` atomically: the content lands in a sibling temp file that is renamed over the
/// target, so a concurrent reader sees either the old document or the new one, never a torn write.
pub async fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn envelope_matches_the_consumed_shape() {
        let ips = vec![IpAddr::from([10, 0, 0, 1]), IpAddr::from([10, 0, 0, 2])];
        let envelope = cluster_load_assignment("arweave_full_nodes", &ips, 1984, "2023-08-01T00:00:00Z");
        let json = serde_json::to_value(&envelope).unwrap();

        assert_eq!(json["version_info"], "2023-08-01T00:00:00Z");
        let resource = &json["resources"][0];
        assert_eq!(
            resource["@type"],
            "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment"
        );
        assert_eq!(resource["cluster_name"], "arweave_full_nodes");
        let eps = &resource["endpoints"][0]["lb_endpoints"];
        assert_eq!(eps.as_array().unwrap().len(), 2);
        assert_eq!(eps[0]["health_status"], "HEALTHY");
        assert_eq!(eps[0]["endpoint"]["address"]["socket_address"]["address"], "10.0.0.1");
        assert_eq!(eps[0]["endpoint"]["address"]["socket_address"]["port_value"], 1984);
    }

    #[tokio::test]
    async fn atomic_write_replaces_whole_documents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nodes.json");
        write_atomically(&path, b"{\"v\":1}").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"v\":1}");
        write_atomically(&path, b"{\"v\":2}").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{\"v\":2}");
        // No temp residue is left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
