//! HTTP driver for an OpenStack Neutron compatible networking API

use crate::driver::{Network, NetworkDriver, Port};
use crate::error::{ProviderError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

#[derive(Debug, Deserialize)]
struct NetworksResponse {
    networks: Vec<Network>,
}

#[derive(Debug, Deserialize)]
struct PortsResponse {
    ports: Vec<Port>,
}

/// NeutronClient talks to the `/v2.0` networking API
pub struct NeutronClient {
    http: reqwest::Client,
    endpoint: String,
    token: String,
}

impl NeutronClient {
    /// Create a new client. `endpoint` is the API base URL without `/v2.0`.
    pub fn new(endpoint: &str, token: &str, timeout: Duration) -> Result<Self> {
        if endpoint.is_empty() {
            return Err(ProviderError::InvalidConfiguration(
                "networking endpoint is empty".to_string(),
            ));
        }
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}/v2.0/{}", self.endpoint, path);
        debug!(url = %url, ?query, "querying networking API");

        let response = self
            .http
            .get(&url)
            .header(AUTH_TOKEN_HEADER, &self.token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl NetworkDriver for NeutronClient {
    async fn get_network_by_name(&self, name: &str) -> Result<Network> {
        let response: NetworksResponse = self.get("networks", &[("name", name)]).await?;
        pick_network(response.networks, name)
    }

    async fn list_ports(&self, network_id: &str, device_owner: &str) -> Result<Vec<Port>> {
        let response: PortsResponse = self
            .get(
                "ports",
                &[("network_id", network_id), ("device_owner", device_owner)],
            )
            .await?;
        Ok(response.ports)
    }
}

/// The API filters by name already; re-check for an exact match anyway
fn pick_network(networks: Vec<Network>, name: &str) -> Result<Network> {
    networks
        .into_iter()
        .find(|n| n.name == name)
        .ok_or_else(|| ProviderError::NetworkNotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_networks_response() {
        let body = r#"{"networks":[{"id":"net-1","name":"kube-ns1-ns1","status":"ACTIVE"}]}"#;
        let parsed: NetworksResponse = serde_json::from_str(body).unwrap();
        let network = pick_network(parsed.networks, "kube-ns1-ns1").unwrap();
        assert_eq!(network.id, "net-1");
    }

    #[test]
    fn test_pick_network_requires_exact_name() {
        let networks = vec![Network {
            id: "net-1".to_string(),
            name: "kube-ns10-ns10".to_string(),
        }];
        let err = pick_network(networks, "kube-ns1-ns1").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_parse_ports_response() {
        let body = r#"{"ports":[{"id":"p1","network_id":"net-1","device_id":"123",
            "device_owner":"network:router_interface","fixed_ips":[]}]}"#;
        let parsed: PortsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.ports.len(), 1);
        assert_eq!(parsed.ports[0].device_id, "123");
    }

    #[test]
    fn test_empty_endpoint_is_rejected() {
        assert!(NeutronClient::new("", "token", Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_endpoint_trailing_slash_trimmed() {
        let client = NeutronClient::new("http://neutron:9696/", "t", Duration::from_secs(1)).unwrap();
        assert_eq!(client.endpoint, "http://neutron:9696");
    }
}
