/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/main.rs
*
* Entry point of the TaskRun launcher service.
*
* Startup sequence:
* 1. Read the process settings from the environment.
* 2. Initialize telemetry and logging.
* 3. Connect to the cluster with the in-cluster or local kubeconfig.
* 4. Register the Prometheus metrics.
* 5. Wire the event processor and run the event receiver and the metrics
*    server concurrently with `tokio::try_join!`. Ctrl-C or SIGTERM stops both
*    gracefully.
*
* SPDX-License-Identifier: Apache-2.0
*/

use anyhow::Context as _;
use kube::Client;
use std::sync::Arc;
use taskrun_launcher::{
    cache::ConfigCache,
    cluster::KubeCluster,
    metrics,
    processor::{EventProcessor, ProcessorOptions},
    server,
    settings::Settings,
    telemetry,
};
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Settings
    let settings = Settings::from_env()?;

    // 2. Telemetry and logging
    let _telemetry = telemetry::init_telemetry(settings.jaeger_enabled)?;
    info!(settings = ?settings, "Telemetry initialized.");

    // 3. Kubernetes client
    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let cluster = Arc::new(KubeCluster::new(client));

    // 4. Metrics registry
    let registry = Arc::new(metrics::create_and_register_metrics()?);
    info!("Custom metrics registered.");

    // 5. Processor and servers
    let processor = Arc::new(EventProcessor::new(
        cluster.clone(),
        cluster,
        ConfigCache::new(settings.cache_ttl),
        ProcessorOptions::from(&settings),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    tokio::spawn(async move {
        server::shutdown_signal().await;
        let _ = shutdown_tx.send(());
    });

    info!("TaskRun launcher starting...");
    tokio::try_join!(
        async {
            server::run_metrics_server(
                registry,
                settings.metrics_port,
                server::shutdown_requested(shutdown_rx.clone()),
            )
            .await
            .context("metrics server failed")
        },
        async {
            server::run_event_server(processor, settings.port, server::shutdown_requested(shutdown_rx.clone()))
                .await
                .context("event receiver failed")
        },
    )?;

    info!("TaskRun launcher shutting down.");
    Ok(())
}
