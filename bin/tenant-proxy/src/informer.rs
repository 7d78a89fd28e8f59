//! Kubernetes informers feeding the proxier

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Service};
use kube::{Api, Resource, ResourceExt};
use kube_runtime::watcher::{self, watcher, Event};
use kube_runtime::WatchStreamExt;
use proxy_core::WatchEvent;
use proxy_engine::Proxier;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receives typed notifications for one resource kind
#[async_trait]
pub trait EventHandler<K>: Send + Sync {
    async fn on_event(&self, event: WatchEvent<K>);

    /// Called once, after the first complete listing
    async fn on_synced(&self);
}

#[async_trait]
impl EventHandler<Service> for Proxier {
    async fn on_event(&self, event: WatchEvent<Service>) {
        self.on_service_event(event).await
    }

    async fn on_synced(&self) {
        self.on_services_synced().await
    }
}

#[async_trait]
impl EventHandler<Endpoints> for Proxier {
    async fn on_event(&self, event: WatchEvent<Endpoints>) {
        self.on_endpoints_event(event).await
    }

    async fn on_synced(&self) {
        self.on_endpoints_synced().await
    }
}

#[async_trait]
impl EventHandler<Namespace> for Proxier {
    async fn on_event(&self, event: WatchEvent<Namespace>) {
        self.on_namespace_event(event).await
    }

    async fn on_synced(&self) {
        self.on_namespaces_synced().await
    }
}

/// Events produced from one raw watcher event
#[derive(Debug, PartialEq)]
pub struct Translated<K> {
    pub events: Vec<WatchEvent<K>>,
    /// True exactly once, when the first listing completes
    pub initial_sync: bool,
}

impl<K> Translated<K> {
    fn none() -> Self {
        Self {
            events: Vec::new(),
            initial_sync: false,
        }
    }

    fn one(event: WatchEvent<K>) -> Self {
        Self {
            events: vec![event],
            initial_sync: false,
        }
    }
}

/// Remembers the last seen object per key so raw watcher events can be
/// turned into Added/Updated/Deleted with both snapshots.
pub struct EventTranslator<K> {
    cache: BTreeMap<String, K>,
    relist: Option<BTreeMap<String, K>>,
    synced: bool,
}

impl<K> EventTranslator<K>
where
    K: Resource + Clone + PartialEq,
{
    pub fn new() -> Self {
        Self {
            cache: BTreeMap::new(),
            relist: None,
            synced: false,
        }
    }

    fn key(obj: &K) -> String {
        match obj.namespace() {
            Some(ns) => format!("{}/{}", ns, obj.name_any()),
            None => obj.name_any(),
        }
    }

    fn apply(&mut self, obj: K) -> Option<WatchEvent<K>> {
        match self.cache.insert(Self::key(&obj), obj.clone()) {
            None => Some(WatchEvent::Added(obj)),
            Some(old) if old == obj => None,
            Some(old) => Some(WatchEvent::Updated { old, new: obj }),
        }
    }

    pub fn handle(&mut self, event: Event<K>) -> Translated<K> {
        match event {
            Event::Apply(obj) => match self.apply(obj) {
                Some(event) => Translated::one(event),
                None => Translated::none(),
            },
            Event::Delete(obj) => {
                self.cache.remove(&Self::key(&obj));
                Translated::one(WatchEvent::Deleted(obj))
            }
            Event::Init => {
                self.relist = Some(BTreeMap::new());
                Translated::none()
            }
            Event::InitApply(obj) => {
                if let Some(relist) = self.relist.as_mut() {
                    relist.insert(Self::key(&obj), obj);
                }
                Translated::none()
            }
            Event::InitDone => self.finish_relist(),
        }
    }

    fn finish_relist(&mut self) -> Translated<K> {
        let listed = self.relist.take().unwrap_or_default();
        let mut events = Vec::new();

        let gone: Vec<String> = self
            .cache
            .keys()
            .filter(|key| !listed.contains_key(*key))
            .cloned()
            .collect();
        for key in gone {
            if let Some(old) = self.cache.remove(&key) {
                events.push(WatchEvent::Deleted(old));
            }
        }
        for (_, obj) in listed {
            events.extend(self.apply(obj));
        }

        let initial_sync = !self.synced;
        self.synced = true;
        Translated {
            events,
            initial_sync,
        }
    }
}

impl<K> Default for EventTranslator<K>
where
    K: Resource + Clone + PartialEq,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Watch one resource kind until `cancel` fires
pub async fn run_informer<K, H>(api: Api<K>, handler: Arc<H>, cancel: CancellationToken)
where
    K: Resource + Clone + PartialEq + DeserializeOwned + Debug + Send + Sync + 'static,
    H: EventHandler<K> + ?Sized,
{
    let kind = std::any::type_name::<K>().rsplit("::").next().unwrap_or("object");
    info!(kind, "starting informer");

    let mut translator = EventTranslator::new();
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = stream.next() => item,
        };
        match item {
            Some(Ok(event)) => {
                let translated = translator.handle(event);
                for event in translated.events {
                    debug!(kind, event = event.kind(), "watch event");
                    handler.on_event(event).await;
                }
                if translated.initial_sync {
                    handler.on_synced().await;
                }
            }
            Some(Err(e)) => warn!(kind, error = %e, "watch stream error"),
            None => break,
        }
    }

    info!(kind, "informer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn make_namespace(name: &str, label: &str) -> Namespace {
        let mut labels = BTreeMap::new();
        labels.insert("tier".to_string(), label.to_string());
        Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn initial_list(
        translator: &mut EventTranslator<Namespace>,
        items: Vec<Namespace>,
    ) -> Translated<Namespace> {
        translator.handle(Event::Init);
        for item in items {
            translator.handle(Event::InitApply(item));
        }
        translator.handle(Event::InitDone)
    }

    #[test]
    fn test_initial_list_emits_adds_then_synced() {
        let mut translator = EventTranslator::new();
        let out = initial_list(
            &mut translator,
            vec![make_namespace("a", "x"), make_namespace("b", "x")],
        );

        assert!(out.initial_sync);
        assert_eq!(
            out.events,
            vec![
                WatchEvent::Added(make_namespace("a", "x")),
                WatchEvent::Added(make_namespace("b", "x")),
            ]
        );
    }

    #[test]
    fn test_apply_after_sync_is_update_with_old_snapshot() {
        let mut translator = EventTranslator::new();
        initial_list(&mut translator, vec![make_namespace("a", "x")]);

        let out = translator.handle(Event::Apply(make_namespace("a", "y")));
        assert!(!out.initial_sync);
        assert_eq!(
            out.events,
            vec![WatchEvent::Updated {
                old: make_namespace("a", "x"),
                new: make_namespace("a", "y"),
            }]
        );
    }

    #[test]
    fn test_identical_apply_is_dropped() {
        let mut translator = EventTranslator::new();
        initial_list(&mut translator, vec![make_namespace("a", "x")]);
        assert!(translator.handle(Event::Apply(make_namespace("a", "x"))).events.is_empty());
    }

    #[test]
    fn test_delete_forgets_object() {
        let mut translator = EventTranslator::new();
        initial_list(&mut translator, vec![make_namespace("a", "x")]);

        let out = translator.handle(Event::Delete(make_namespace("a", "x")));
        assert_eq!(out.events, vec![WatchEvent::Deleted(make_namespace("a", "x"))]);

        let out = translator.handle(Event::Apply(make_namespace("a", "x")));
        assert_eq!(out.events, vec![WatchEvent::Added(make_namespace("a", "x"))]);
    }

    #[test]
    fn test_relist_reports_vanished_objects_and_syncs_once() {
        let mut translator = EventTranslator::new();
        initial_list(&mut translator, vec![make_namespace("a", "x"), make_namespace("b", "x")]);

        let out = initial_list(&mut translator, vec![make_namespace("b", "y")]);
        assert!(!out.initial_sync);
        assert_eq!(
            out.events,
            vec![
                WatchEvent::Deleted(make_namespace("a", "x")),
                WatchEvent::Updated {
                    old: make_namespace("b", "x"),
                    new: make_namespace("b", "y"),
                },
            ]
        );
    }
}
