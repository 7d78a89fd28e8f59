//! Coalescing of watch notifications between two sync ticks

use crate::endpoint::{endpoints_to_endpoints_map, EndpointsMap};
use crate::namespace::{namespace_to_namespace_info, NamespaceInfo};
use crate::service::{service_to_service_map, ServiceMap};
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Service};
use kube::ResourceExt;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{trace, warn};

/// Net transition of one object since the last sync
#[derive(Clone, Debug, PartialEq)]
pub struct Change<T> {
    pub previous: T,
    pub current: T,
}

/// Pending changes keyed by `namespace/name` (or plain name for
/// cluster-scoped objects)
pub type Changes<T> = HashMap<String, Change<T>>;

/// Accumulates (previous, current) pairs per key.
///
/// The first update for a key seeds `previous`; later ones only move
/// `current`. A pair whose two sides are equal is dropped.
pub struct ChangeTracker<T> {
    items: Mutex<Changes<T>>,
}

impl<T: PartialEq> ChangeTracker<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
        }
    }

    /// Record a transition. `previous` is only evaluated when the key has no
    /// pending entry. Returns whether any change is pending afterwards.
    pub async fn update<F>(&self, key: &str, previous: F, current: T) -> bool
    where
        F: FnOnce() -> T,
    {
        let mut items = self.items.lock().await;
        match items.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().current = current;
                if entry.get().previous == entry.get().current {
                    trace!(key, "change cancelled out");
                    entry.remove();
                }
            }
            Entry::Vacant(entry) => {
                let previous = previous();
                if previous != current {
                    entry.insert(Change { previous, current });
                }
            }
        }
        !items.is_empty()
    }

    /// Hand over every pending change and start empty
    pub async fn take(&self) -> Changes<T> {
        std::mem::take(&mut *self.items.lock().await)
    }

    pub async fn pending(&self) -> usize {
        self.items.lock().await.len()
    }
}

impl<T: PartialEq> Default for ChangeTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn object_key<K: ResourceExt>(previous: Option<&K>, current: Option<&K>) -> Option<String> {
    let object = current.or(previous)?;
    Some(match object.namespace() {
        Some(ns) => format!("{}/{}", ns, object.name_any()),
        None => object.name_any(),
    })
}

/// Tracks Service notifications as per-port service maps
#[derive(Default)]
pub struct ServiceChangeTracker {
    tracker: ChangeTracker<ServiceMap>,
}

impl ServiceChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, previous: Option<&Service>, current: Option<&Service>) -> bool {
        let Some(key) = object_key(previous, current) else {
            warn!("ignoring service notification without an object");
            return false;
        };
        self.tracker
            .update(
                &key,
                || service_to_service_map(previous),
                service_to_service_map(current),
            )
            .await
    }

    pub async fn take(&self) -> Changes<ServiceMap> {
        self.tracker.take().await
    }

    pub async fn pending(&self) -> usize {
        self.tracker.pending().await
    }
}

/// Tracks Endpoints notifications as per-port endpoint lists
pub struct EndpointsChangeTracker {
    hostname: String,
    tracker: ChangeTracker<EndpointsMap>,
}

impl EndpointsChangeTracker {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            tracker: ChangeTracker::new(),
        }
    }

    pub async fn update(&self, previous: Option<&Endpoints>, current: Option<&Endpoints>) -> bool {
        let Some(key) = object_key(previous, current) else {
            warn!("ignoring endpoints notification without an object");
            return false;
        };
        self.tracker
            .update(
                &key,
                || endpoints_to_endpoints_map(previous, &self.hostname),
                endpoints_to_endpoints_map(current, &self.hostname),
            )
            .await
    }

    pub async fn take(&self) -> Changes<EndpointsMap> {
        self.tracker.take().await
    }

    pub async fn pending(&self) -> usize {
        self.tracker.pending().await
    }
}

/// Tracks Namespace notifications; `None` on either side means absent
#[derive(Default)]
pub struct NamespaceChangeTracker {
    tracker: ChangeTracker<Option<NamespaceInfo>>,
}

impl NamespaceChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn update(&self, previous: Option<&Namespace>, current: Option<&Namespace>) -> bool {
        let Some(key) = object_key(previous, current) else {
            warn!("ignoring namespace notification without an object");
            return false;
        };
        self.tracker
            .update(
                &key,
                || namespace_to_namespace_info(previous),
                namespace_to_namespace_info(current),
            )
            .await
    }

    pub async fn take(&self) -> Changes<Option<NamespaceInfo>> {
        self.tracker.take().await
    }

    pub async fn pending(&self) -> usize {
        self.tracker.pending().await
    }
}
