//! Prometheus metrics for rule synchronization

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Collectors updated by every sync tick
#[derive(Clone)]
pub struct SyncMetrics {
    /// Wall time of one full sync tick
    pub sync_duration_seconds: Histogram,
    /// Ticks that ran past the readiness gate
    pub syncs_total: Counter,
    /// Namespaces whose sync aborted, by failed stage
    pub namespace_sync_failures_total: CounterVec,
    /// Failed namespace to router lookups
    pub router_resolution_failures_total: Counter,
    /// Namespaces whose chain was restored in the last tick
    pub programmed_namespaces: IntGauge,
    /// Unix time of the last completed tick
    pub last_sync_timestamp_seconds: Gauge,
    pub registry: Arc<Registry>,
}

impl SyncMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let sync_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "tenant_proxy_sync_duration_seconds",
            "Duration of one rule synchronization tick",
        ))?;

        let syncs_total = Counter::new(
            "tenant_proxy_syncs_total",
            "Total rule synchronization ticks",
        )?;

        let namespace_sync_failures_total = CounterVec::new(
            Opts::new(
                "tenant_proxy_namespace_sync_failures_total",
                "Namespace syncs aborted, by stage",
            ),
            &["stage"],
        )?;

        let router_resolution_failures_total = Counter::new(
            "tenant_proxy_router_resolution_failures_total",
            "Failed namespace to router resolutions",
        )?;

        let programmed_namespaces = IntGauge::new(
            "tenant_proxy_programmed_namespaces",
            "Namespaces whose chain was restored in the last tick",
        )?;

        let last_sync_timestamp_seconds = Gauge::new(
            "tenant_proxy_last_sync_timestamp_seconds",
            "Unix time of the last completed sync tick",
        )?;

        registry.register(Box::new(sync_duration_seconds.clone()))?;
        registry.register(Box::new(syncs_total.clone()))?;
        registry.register(Box::new(namespace_sync_failures_total.clone()))?;
        registry.register(Box::new(router_resolution_failures_total.clone()))?;
        registry.register(Box::new(programmed_namespaces.clone()))?;
        registry.register(Box::new(last_sync_timestamp_seconds.clone()))?;

        Ok(Self {
            sync_duration_seconds,
            syncs_total,
            namespace_sync_failures_total,
            router_resolution_failures_total,
            programmed_namespaces,
            last_sync_timestamp_seconds,
            registry,
        })
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
