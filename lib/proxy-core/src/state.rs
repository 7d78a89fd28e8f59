//! Canonical proxy state and the merge of accumulated changes

use crate::change_tracker::Changes;
use crate::endpoint::{EndpointInfo, EndpointsMap};
use crate::namespace::NamespaceInfo;
use crate::service::{ServiceInfo, ServiceMap, ServicePortName};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Services of one namespace, ordered so rule output is deterministic
pub type NamespaceServices = BTreeMap<ServicePortName, Arc<ServiceInfo>>;

/// The merged view of the desired world
#[derive(Debug, Default)]
pub struct ProxyState {
    pub service_map: ServiceMap,
    pub endpoints_map: EndpointsMap,
    pub namespace_map: HashMap<String, NamespaceInfo>,
    service_index: BTreeMap<String, NamespaceServices>,
}

impl ProxyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge service changes, then rebuild the per-namespace index.
    ///
    /// Ports present in a change's current side are inserted or replaced;
    /// ports only present in its previous side are removed.
    pub fn apply_service_changes(&mut self, changes: Changes<ServiceMap>) {
        for (key, change) in changes {
            let existing_ports = self.merge_services(change.current);
            self.unmerge_services(change.previous, &existing_ports);
            debug!(service = %key, ports = existing_ports.len(), "merged service change");
        }
        self.rebuild_service_index();
    }

    fn merge_services(&mut self, current: ServiceMap) -> HashSet<ServicePortName> {
        let mut existing_ports = HashSet::with_capacity(current.len());
        for (name, info) in current {
            existing_ports.insert(name.clone());
            let svc_chain = info.service_chain_name.clone();
            match self.service_map.insert(name.clone(), info) {
                Some(_) => debug!(service_port = %name, svc_chain = %svc_chain, "updating service port"),
                None => debug!(service_port = %name, svc_chain = %svc_chain, "adding service port"),
            }
        }
        existing_ports
    }

    fn unmerge_services(&mut self, previous: ServiceMap, existing_ports: &HashSet<ServicePortName>) {
        for name in previous.keys() {
            if existing_ports.contains(name) {
                continue;
            }
            if self.service_map.remove(name).is_some() {
                debug!(service_port = %name, "removing service port");
            }
        }
    }

    /// The index is rebuilt from scratch, so a namespace whose last service
    /// disappeared no longer has an entry.
    fn rebuild_service_index(&mut self) {
        let mut index: BTreeMap<String, NamespaceServices> = BTreeMap::new();
        for (name, info) in &self.service_map {
            index
                .entry(name.namespace.clone())
                .or_default()
                .insert(name.clone(), info.clone());
        }
        self.service_index = index;
    }

    /// Replace endpoints per key: previous keys go away, current keys land.
    pub fn apply_endpoints_changes(&mut self, changes: Changes<EndpointsMap>) {
        for (key, change) in changes {
            for name in change.previous.keys() {
                self.endpoints_map.remove(name);
            }
            for (name, endpoints) in change.current {
                self.endpoints_map.insert(name, endpoints);
            }
            debug!(endpoints = %key, "merged endpoints change");
        }
    }

    /// Apply namespace additions and deletions.
    ///
    /// A namespace that already has a router keeps it; newly seen ones start
    /// unresolved. See [`ProxyState::unresolved_namespaces`].
    pub fn apply_namespace_changes(&mut self, changes: Changes<Option<NamespaceInfo>>) {
        for (name, change) in changes {
            match change.current {
                None => {
                    if self.namespace_map.remove(&name).is_some() {
                        debug!(namespace = %name, "removing namespace");
                    }
                }
                Some(mut info) => {
                    if let Some(existing) = self.namespace_map.get(&name) {
                        info.router = existing.router.clone();
                    }
                    debug!(namespace = %name, router = ?info.router, "updating namespace");
                    self.namespace_map.insert(name, info);
                }
            }
        }
    }

    /// Namespaces that still need a router, sorted by name
    pub fn unresolved_namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .namespace_map
            .values()
            .filter(|info| info.router.is_none())
            .map(|info| info.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Record a resolved router. Returns false if the namespace is gone.
    pub fn set_router(&mut self, namespace: &str, router: impl Into<String>) -> bool {
        match self.namespace_map.get_mut(namespace) {
            Some(info) => {
                info.router = Some(router.into());
                true
            }
            None => false,
        }
    }

    /// Known namespaces sorted by name
    pub fn namespaces(&self) -> Vec<&NamespaceInfo> {
        let mut namespaces: Vec<&NamespaceInfo> = self.namespace_map.values().collect();
        namespaces.sort_by(|a, b| a.name.cmp(&b.name));
        namespaces
    }

    /// Services of one namespace; `None` when it has none
    pub fn services_in(&self, namespace: &str) -> Option<&NamespaceServices> {
        self.service_index.get(namespace)
    }

    pub fn indexed_namespaces(&self) -> impl Iterator<Item = &str> {
        self.service_index.keys().map(String::as_str)
    }

    pub fn endpoints_for(&self, name: &ServicePortName) -> &[EndpointInfo] {
        self.endpoints_map
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}
