//! Service-port identity and per-port service snapshots

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Cluster IP value that marks a headless service
const CLUSTER_IP_NONE: &str = "None";

/// Identifies one port of one service: (namespace, service name, port name)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServicePortName {
    pub namespace: String,
    pub name: String,
    pub port: String,
}

impl ServicePortName {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        port: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            port: port.into(),
        }
    }

    /// `namespace/name`, the key used by the change trackers
    pub fn namespaced_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for ServicePortName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.name, self.port)
    }
}

/// Kubernetes service type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceType {
    ClusterIP,
    NodePort,
    LoadBalancer,
    ExternalName,
}

impl ServiceType {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("NodePort") => ServiceType::NodePort,
            Some("LoadBalancer") => ServiceType::LoadBalancer,
            Some("ExternalName") => ServiceType::ExternalName,
            _ => ServiceType::ClusterIP,
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceType::ClusterIP => "ClusterIP",
            ServiceType::NodePort => "NodePort",
            ServiceType::LoadBalancer => "LoadBalancer",
            ServiceType::ExternalName => "ExternalName",
        };
        f.write_str(s)
    }
}

/// Immutable snapshot of one service port. Replaced wholesale on update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceInfo {
    pub cluster_ip: String,
    pub port: u16,
    /// Lowercase protocol as iptables expects it (`tcp`, `udp`, `sctp`)
    pub protocol: String,
    pub service_type: ServiceType,
    /// True when the service asks for `ClientIP` session affinity
    pub session_affinity: bool,
    pub service_chain_name: String,
    pub firewall_chain_name: String,
}

impl ServiceInfo {
    pub fn is_cluster_ip(&self) -> bool {
        self.service_type == ServiceType::ClusterIP
    }
}

/// Canonical service map, and also the shape of one service's translation
pub type ServiceMap = HashMap<ServicePortName, Arc<ServiceInfo>>;

/// Translate a Service object into its per-port entries.
///
/// Headless and ExternalName services produce an empty map so they never
/// reach canonical state.
pub fn service_to_service_map(service: Option<&Service>) -> ServiceMap {
    let mut map = ServiceMap::new();
    let Some(service) = service else {
        return map;
    };
    let Some(spec) = service.spec.as_ref() else {
        return map;
    };

    let service_type = ServiceType::parse(spec.type_.as_deref());
    let cluster_ip = match spec.cluster_ip.as_deref() {
        Some(ip) if !ip.is_empty() && ip != CLUSTER_IP_NONE => ip,
        _ => return map,
    };
    if service_type == ServiceType::ExternalName {
        return map;
    }

    let namespace = service.namespace().unwrap_or_default();
    let name = service.name_any();
    let session_affinity = spec.session_affinity.as_deref() == Some("ClientIP");

    for port in spec.ports.iter().flatten() {
        let Ok(port_number) = u16::try_from(port.port) else {
            continue;
        };
        let port_name = ServicePortName::new(
            namespace.clone(),
            name.clone(),
            port.name.clone().unwrap_or_default(),
        );
        let protocol = port
            .protocol
            .as_deref()
            .unwrap_or("TCP")
            .to_ascii_lowercase();

        let info = ServiceInfo {
            cluster_ip: cluster_ip.to_string(),
            port: port_number,
            service_chain_name: service_port_chain_name("KUBE-SVC-", &port_name, &protocol),
            firewall_chain_name: service_port_chain_name("KUBE-FW-", &port_name, &protocol),
            protocol,
            service_type,
            session_affinity,
        };
        map.insert(port_name, Arc::new(info));
    }

    map
}

/// Stable per-port chain name: prefix plus 16 hex chars of a SHA-256 digest
pub fn service_port_chain_name(prefix: &str, name: &ServicePortName, protocol: &str) -> String {
    let digest = Sha256::digest(format!("{}{}", name, protocol).as_bytes());
    format!("{}{}", prefix, hex::encode_upper(&digest[..8]))
}
