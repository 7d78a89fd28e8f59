//! Namespace to router resolution

use crate::driver::{NetworkDriver, DEVICE_OWNER_ROUTER_INTERFACE};
use crate::error::{ProviderError, Result};
use std::sync::Arc;
use tracing::debug;

/// Prefix of every tenant network name
const NETWORK_NAME_PREFIX: &str = "kube";

/// Name of the provider network provisioned for a namespace
pub fn network_name(namespace: &str) -> String {
    format!("{}-{}-{}", NETWORK_NAME_PREFIX, namespace, namespace)
}

/// RouterResolver finds the router that serves a namespace's network
#[derive(Clone)]
pub struct RouterResolver {
    driver: Arc<dyn NetworkDriver>,
}

impl RouterResolver {
    pub fn new(driver: Arc<dyn NetworkDriver>) -> Self {
        Self { driver }
    }

    /// Resolve the router ID for `namespace`.
    ///
    /// Fails if the tenant network does not exist yet or has no router
    /// interface attached.
    pub async fn resolve(&self, namespace: &str) -> Result<String> {
        let name = network_name(namespace);
        let network = self.driver.get_network_by_name(&name).await?;

        let ports = self
            .driver
            .list_ports(&network.id, DEVICE_OWNER_ROUTER_INTERFACE)
            .await?;

        let router = ports
            .into_iter()
            .find(|p| !p.device_id.is_empty())
            .map(|p| p.device_id)
            .ok_or_else(|| ProviderError::RouterNotFound(name.clone()))?;

        debug!(namespace, network = %network.id, router = %router, "resolved router");
        Ok(router)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Network, Port};
    use async_trait::async_trait;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeDriver {
        networks: HashMap<String, String>,
        ports: HashMap<String, Vec<Port>>,
    }

    #[async_trait]
    impl NetworkDriver for FakeDriver {
        async fn get_network_by_name(&self, name: &str) -> Result<Network> {
            self.networks
                .get(name)
                .map(|id| Network {
                    id: id.clone(),
                    name: name.to_string(),
                })
                .ok_or_else(|| ProviderError::NetworkNotFound(name.to_string()))
        }

        async fn list_ports(&self, network_id: &str, device_owner: &str) -> Result<Vec<Port>> {
            Ok(self
                .ports
                .get(network_id)
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .filter(|p| p.device_owner == device_owner)
                .collect())
        }
    }

    fn router_port(network_id: &str, router: &str) -> Port {
        Port {
            id: format!("port-{}", router),
            network_id: network_id.to_string(),
            device_id: router.to_string(),
            device_owner: DEVICE_OWNER_ROUTER_INTERFACE.to_string(),
        }
    }

    #[test]
    fn test_network_name() {
        assert_eq!(network_name("ns1"), "kube-ns1-ns1");
    }

    #[tokio::test]
    async fn test_resolve_router() {
        let mut driver = FakeDriver::default();
        driver.networks.insert("kube-ns1-ns1".to_string(), "net-1".to_string());
        driver
            .ports
            .insert("net-1".to_string(), vec![router_port("net-1", "123")]);

        let resolver = RouterResolver::new(Arc::new(driver));
        assert_eq!(resolver.resolve("ns1").await.unwrap(), "123");
    }

    #[tokio::test]
    async fn test_missing_network_is_not_found() {
        let resolver = RouterResolver::new(Arc::new(FakeDriver::default()));
        let err = resolver.resolve("ns1").await.unwrap_err();
        assert!(matches!(err, ProviderError::NetworkNotFound(_)));
    }

    #[tokio::test]
    async fn test_network_without_router_is_not_found() {
        let mut driver = FakeDriver::default();
        driver.networks.insert("kube-ns1-ns1".to_string(), "net-1".to_string());
        let mut dhcp = router_port("net-1", "dhcp-agent");
        dhcp.device_owner = "network:dhcp".to_string();
        driver.ports.insert("net-1".to_string(), vec![dhcp]);

        let resolver = RouterResolver::new(Arc::new(driver));
        let err = resolver.resolve("ns1").await.unwrap_err();
        assert!(matches!(err, ProviderError::RouterNotFound(_)));
        assert!(err.is_not_found());
    }
}
