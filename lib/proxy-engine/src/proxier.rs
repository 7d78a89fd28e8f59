//! The proxier: owns canonical state and keeps router namespaces in sync
//!
//! Watch handlers only record changes in the trackers and poke the runner.
//! Each sync tick takes the state lock for its whole duration, merges the
//! pending changes, resolves routers for new namespaces and rebuilds the
//! NAT chain of every namespace whose router lives on this host.

use crate::error::SyncError;
use crate::metrics::SyncMetrics;
use crate::rules::{
    build_nat_script, link_rule_args, router_netns_name, STACKUBE_PREROUTING_CHAIN,
};
use crate::runner::BoundedFrequencyRunner;
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Service};
use proxy_core::{
    EndpointsChangeTracker, NamespaceChangeTracker, NamespaceInfo, ProxyState,
    ServiceChangeTracker, WatchEvent,
};
use proxy_iptables::{Iptables, CHAIN_PREROUTING, TABLE_NAT};
use proxy_provider::RouterResolver;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tuning of the sync runner
#[derive(Clone, Debug)]
pub struct ProxierConfig {
    /// Node name used to mark endpoints as local
    pub hostname: String,
    pub min_sync_period: Duration,
    pub sync_period: Duration,
    pub burst_syncs: u32,
}

impl Default for ProxierConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            min_sync_period: Duration::from_secs(1),
            sync_period: Duration::from_secs(30),
            burst_syncs: 2,
        }
    }
}

/// Outcome of one namespace within a tick
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NamespaceSync {
    /// No router resolved yet
    NoRouter,
    /// The router is not scheduled on this host
    NetnsMissing { netns: String },
    /// The chain was replaced with `rules` DNAT rules
    ChainSynced { netns: String, rules: usize },
}

pub struct Proxier {
    service_changes: ServiceChangeTracker,
    endpoints_changes: EndpointsChangeTracker,
    namespace_changes: NamespaceChangeTracker,

    state: Mutex<ProxyState>,

    services_synced: AtomicBool,
    endpoints_synced: AtomicBool,
    namespaces_synced: AtomicBool,

    iptables: Iptables,
    resolver: RouterResolver,
    sync_runner: BoundedFrequencyRunner,
    metrics: SyncMetrics,
}

impl Proxier {
    pub fn new(
        config: ProxierConfig,
        iptables: Iptables,
        resolver: RouterResolver,
        metrics: SyncMetrics,
    ) -> Self {
        let sync_runner = BoundedFrequencyRunner::new(
            "sync-proxy-rules",
            config.min_sync_period,
            config.sync_period,
            config.burst_syncs,
        );
        Self {
            service_changes: ServiceChangeTracker::new(),
            endpoints_changes: EndpointsChangeTracker::new(config.hostname),
            namespace_changes: NamespaceChangeTracker::new(),
            state: Mutex::new(ProxyState::new()),
            services_synced: AtomicBool::new(false),
            endpoints_synced: AtomicBool::new(false),
            namespaces_synced: AtomicBool::new(false),
            iptables,
            resolver,
            sync_runner,
            metrics,
        }
    }

    pub fn metrics(&self) -> &SyncMetrics {
        &self.metrics
    }

    /// True once services, endpoints and namespaces have all been listed
    pub fn is_initialized(&self) -> bool {
        self.services_synced.load(Ordering::SeqCst)
            && self.endpoints_synced.load(Ordering::SeqCst)
            && self.namespaces_synced.load(Ordering::SeqCst)
    }

    fn request_sync(&self, pending: bool) {
        if pending && self.is_initialized() {
            self.sync_runner.run();
        }
    }

    pub async fn on_service_event(&self, event: WatchEvent<Service>) {
        let (previous, current) = event.snapshots();
        let pending = self.service_changes.update(previous, current).await;
        self.request_sync(pending);
    }

    pub async fn on_endpoints_event(&self, event: WatchEvent<Endpoints>) {
        let (previous, current) = event.snapshots();
        let pending = self.endpoints_changes.update(previous, current).await;
        self.request_sync(pending);
    }

    pub async fn on_namespace_event(&self, event: WatchEvent<Namespace>) {
        let (previous, current) = event.snapshots();
        let pending = self.namespace_changes.update(previous, current).await;
        self.request_sync(pending);
    }

    pub async fn on_services_synced(&self) {
        info!("services synced");
        self.services_synced.store(true, Ordering::SeqCst);
        self.sync_proxy_rules().await;
    }

    pub async fn on_endpoints_synced(&self) {
        info!("endpoints synced");
        self.endpoints_synced.store(true, Ordering::SeqCst);
        self.sync_proxy_rules().await;
    }

    pub async fn on_namespaces_synced(&self) {
        info!("namespaces synced");
        self.namespaces_synced.store(true, Ordering::SeqCst);
        self.sync_proxy_rules().await;
    }

    /// Run sync ticks until `cancel` fires
    pub async fn sync_loop(&self, cancel: CancellationToken) {
        info!(runner = %self.sync_runner.name(), "starting sync loop");
        self.sync_runner
            .loop_until(&cancel, move || self.sync_proxy_rules())
            .await;
        info!("sync loop stopped");
    }

    /// One full tick. Never fails: per-namespace errors are logged and the
    /// next tick retries them.
    pub async fn sync_proxy_rules(&self) {
        let mut state = self.state.lock().await;
        if !self.is_initialized() {
            debug!("not all informers have synced yet, skipping sync");
            return;
        }

        let start = Instant::now();
        self.metrics.syncs_total.inc();

        state.apply_service_changes(self.service_changes.take().await);
        state.apply_endpoints_changes(self.endpoints_changes.take().await);
        state.apply_namespace_changes(self.namespace_changes.take().await);
        self.resolve_routers(&mut state).await;

        let mut programmed = 0;
        for namespace in state.namespaces() {
            match self.sync_namespace(&state, namespace).await {
                Ok(NamespaceSync::NoRouter) => {
                    debug!(namespace = %namespace.name, "no router resolved, skipping")
                }
                Ok(NamespaceSync::NetnsMissing { netns }) => {
                    debug!(
                        namespace = %namespace.name,
                        netns = %netns,
                        "router not on this host, skipping"
                    )
                }
                Ok(NamespaceSync::ChainSynced { netns, rules }) => {
                    programmed += 1;
                    debug!(namespace = %namespace.name, netns = %netns, rules, "chain synced")
                }
                Err(e) => {
                    warn!(namespace = %namespace.name, error = %e, "failed to sync namespace");
                    self.metrics
                        .namespace_sync_failures_total
                        .with_label_values(&[e.stage()])
                        .inc();
                }
            }
        }

        let elapsed = start.elapsed();
        self.metrics.sync_duration_seconds.observe(elapsed.as_secs_f64());
        self.metrics.programmed_namespaces.set(programmed);
        if let Ok(now) = SystemTime::now().duration_since(UNIX_EPOCH) {
            self.metrics.last_sync_timestamp_seconds.set(now.as_secs_f64());
        }
        debug!(elapsed = ?elapsed, programmed, "sync tick finished");
    }

    async fn resolve_routers(&self, state: &mut ProxyState) {
        for namespace in state.unresolved_namespaces() {
            match self.resolver.resolve(&namespace).await {
                Ok(router) => {
                    info!(namespace = %namespace, router = %router, "resolved router for namespace");
                    state.set_router(&namespace, router);
                }
                Err(e) if e.is_not_found() => {
                    debug!(namespace = %namespace, error = %e, "tenant network not provisioned yet");
                    self.metrics.router_resolution_failures_total.inc();
                }
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "failed to resolve router");
                    self.metrics.router_resolution_failures_total.inc();
                }
            }
        }
    }

    async fn sync_namespace(
        &self,
        state: &ProxyState,
        namespace: &NamespaceInfo,
    ) -> Result<NamespaceSync, SyncError> {
        let Some(router) = namespace.router.as_deref() else {
            return Ok(NamespaceSync::NoRouter);
        };

        let netns = router_netns_name(router);
        if !self.iptables.netns_exists(&netns).await {
            return Ok(NamespaceSync::NetnsMissing { netns });
        }

        self.iptables
            .ensure_chain(&netns, TABLE_NAT, STACKUBE_PREROUTING_CHAIN)
            .await
            .map_err(|source| SyncError::EnsureChain {
                netns: netns.clone(),
                chain: STACKUBE_PREROUTING_CHAIN.to_string(),
                source,
            })?;

        self.iptables
            .ensure_rule(
                &netns,
                TABLE_NAT,
                CHAIN_PREROUTING,
                &link_rule_args(),
            )
            .await
            .map_err(|source| SyncError::LinkChain {
                netns: netns.clone(),
                chain: STACKUBE_PREROUTING_CHAIN.to_string(),
                from: CHAIN_PREROUTING.to_string(),
                source,
            })?;

        let script = build_nat_script(state, &namespace.name);
        self.iptables
            .restore(&netns, script.data.as_bytes())
            .await
            .map_err(|source| SyncError::Restore {
                netns: netns.clone(),
                source,
            })?;

        Ok(NamespaceSync::ChainSynced {
            netns,
            rules: script.rules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProxierConfig::default();
        assert_eq!(config.min_sync_period, Duration::from_secs(1));
        assert_eq!(config.sync_period, Duration::from_secs(30));
        assert_eq!(config.burst_syncs, 2);
    }
}
