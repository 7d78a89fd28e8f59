use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Service};
use kube::{Api, Client};
use proxy_engine::{Proxier, SyncMetrics};
use proxy_iptables::{ExecRunner, Iptables};
use proxy_provider::{NeutronClient, RouterResolver};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod informer;
mod server;

use config::ProxyConfig;
use informer::run_informer;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("TENANT_PROXY_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting tenant-proxy...");

    let config = ProxyConfig::load().context("Failed to load configuration")?;
    info!(
        hostname = %config.hostname,
        min_sync_period_seconds = config.min_sync_period_seconds,
        sync_period_seconds = config.sync_period_seconds,
        burst_syncs = config.burst_syncs,
        "Configuration loaded"
    );

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let runner = Arc::new(ExecRunner::new(config.command_timeout()));
    let iptables = Iptables::new(runner);

    let driver = Arc::new(
        NeutronClient::new(
            &config.provider.endpoint,
            &config.provider.token,
            config.provider_timeout(),
        )
        .context("Failed to create networking client")?,
    );
    let resolver = RouterResolver::new(driver);

    let metrics = SyncMetrics::new().context("Failed to create metrics")?;
    let proxier = Arc::new(Proxier::new(
        config.proxier_config(),
        iptables,
        resolver,
        metrics,
    ));
    info!("Proxier initialized");

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(run_informer::<Service, _>(
        Api::all(client.clone()),
        proxier.clone(),
        cancel.clone(),
    )));
    tasks.push(tokio::spawn(run_informer::<Endpoints, _>(
        Api::all(client.clone()),
        proxier.clone(),
        cancel.clone(),
    )));
    tasks.push(tokio::spawn(run_informer::<Namespace, _>(
        Api::all(client),
        proxier.clone(),
        cancel.clone(),
    )));

    {
        let proxier = proxier.clone();
        let cancel = cancel.clone();
        tasks.push(tokio::spawn(async move { proxier.sync_loop(cancel).await }));
    }

    {
        let proxier = proxier.clone();
        let cancel = cancel.clone();
        let addr = config.metrics_addr;
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server::serve(addr, proxier, cancel).await {
                error!("Metrics server error: {}", e);
            }
        }));
    }

    shutdown_signal().await?;
    info!("Shutdown signal received, stopping...");
    cancel.cancel();

    for task in tasks {
        if let Err(e) = task.await {
            error!("Task failed during shutdown: {}", e);
        }
    }

    info!("tenant-proxy stopped");
    Ok(())
}
