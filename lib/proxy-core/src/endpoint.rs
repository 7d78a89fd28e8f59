//! Endpoint management

use crate::service::ServicePortName;
use k8s_openapi::api::core::v1::Endpoints;
use kube::ResourceExt;
use std::collections::HashMap;

/// One backend of a service port
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointInfo {
    /// `ip:port`
    pub endpoint: String,
    /// True when the backing pod runs on this host
    pub is_local: bool,
}

impl EndpointInfo {
    pub fn new(ip: &str, port: u16, is_local: bool) -> Self {
        Self {
            endpoint: format!("{}:{}", ip, port),
            is_local,
        }
    }
}

/// Endpoints per service port identity
pub type EndpointsMap = HashMap<ServicePortName, Vec<EndpointInfo>>;

/// Translate an Endpoints object into ready endpoints keyed by service port.
///
/// `hostname` decides the locality flag by comparing it with each address's
/// node name.
pub fn endpoints_to_endpoints_map(endpoints: Option<&Endpoints>, hostname: &str) -> EndpointsMap {
    let mut map = EndpointsMap::new();
    let Some(endpoints) = endpoints else {
        return map;
    };

    let namespace = endpoints.namespace().unwrap_or_default();
    let name = endpoints.name_any();

    for subset in endpoints.subsets.iter().flatten() {
        for port in subset.ports.iter().flatten() {
            let port_number = match u16::try_from(port.port) {
                Ok(0) | Err(_) => continue,
                Ok(p) => p,
            };
            let port_name = ServicePortName::new(
                namespace.clone(),
                name.clone(),
                port.name.clone().unwrap_or_default(),
            );

            for address in subset.addresses.iter().flatten() {
                if address.ip.is_empty() {
                    continue;
                }
                let is_local = address.node_name.as_deref() == Some(hostname);
                map.entry(port_name.clone())
                    .or_default()
                    .push(EndpointInfo::new(&address.ip, port_number, is_local));
            }
        }
    }

    map
}
