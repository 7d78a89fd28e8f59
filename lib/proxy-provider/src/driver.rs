//! Network driver abstraction

use crate::error::Result;
use async_trait::async_trait;
use serde::Deserialize;

/// Device owner of a port that attaches a router to a network
pub const DEVICE_OWNER_ROUTER_INTERFACE: &str = "network:router_interface";

/// A provider network
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
}

/// A provider port; `device_id` is the owning device (the router for
/// router interfaces)
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Port {
    pub id: String,
    #[serde(default)]
    pub network_id: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub device_owner: String,
}

/// The slice of the networking provider the proxy consumes
#[async_trait]
pub trait NetworkDriver: Send + Sync {
    /// Look a network up by name. Fails with `NetworkNotFound` if absent.
    async fn get_network_by_name(&self, name: &str) -> Result<Network>;

    /// Ports on a network owned by a given device kind
    async fn list_ports(&self, network_id: &str, device_owner: &str) -> Result<Vec<Port>>;
}
