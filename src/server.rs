/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/server.rs
*
* The embedded HTTP servers, built on `warp`.
*
* - Event receiver: CloudEvents in binary mode are POSTed to `/` by the
*   event source. Only `dev.knative.apiserver.resource.add` events are
*   processed; every other type is acknowledged with 202 and dropped. A
*   processing error is answered with 500 so the sender may redeliver.
*   `GET /health` answers "OK".
* - Metrics: `GET /metrics` renders the Prometheus registry.
*
* Both servers stop accepting connections when their shutdown future
* resolves and return once in-flight requests have completed.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::metrics;
use crate::processor::EventProcessor;
use prometheus::{Encoder, Registry, TextEncoder};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};
use warp::hyper::body::Bytes;
use warp::{http::StatusCode, reply::Response, Filter, Reply};

/// The only CloudEvent type that carries a newly created resource.
pub const RESOURCE_ADD_EVENT_TYPE: &str = "dev.knative.apiserver.resource.add";
const MAX_EVENT_BYTES: u64 = 4 * 1024 * 1024;

/// Injects the shared processor into warp filters.
fn with_processor(
    processor: Arc<EventProcessor>,
) -> impl Filter<Extract = (Arc<EventProcessor>,), Error = Infallible> + Clone {
    warp::any().map(move || processor.clone())
}

/// Health check and CloudEvent receiver.
pub fn event_routes(
    processor: Arc<EventProcessor>,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    let health = warp::get()
        .and(warp::path("health"))
        .and(warp::path::end())
        .map(|| warp::reply::with_status("OK", StatusCode::OK).into_response());

    let events = warp::post()
        .and(warp::path::end())
        .and(warp::header::optional::<String>("ce-type"))
        .and(warp::body::content_length_limit(MAX_EVENT_BYTES))
        .and(warp::body::bytes())
        .and(with_processor(processor))
        .and_then(handle_event);

    health.or(events).unify()
}

async fn handle_event(
    event_type: Option<String>,
    body: Bytes,
    processor: Arc<EventProcessor>,
) -> Result<Response, warp::Rejection> {
    if event_type.as_deref() != Some(RESOURCE_ADD_EVENT_TYPE) {
        debug!(event_type = ?event_type, "Acknowledging CloudEvent of another type");
        metrics::EVENTS_IGNORED_TOTAL
            .with_label_values(&["event_type"])
            .inc();
        return Ok(StatusCode::ACCEPTED.into_response());
    }

    info!(bytes = body.len(), "Received CloudEvent");
    match processor.process_event(&body).await {
        Ok(outcome) => {
            debug!(outcome = ?outcome, "Event processed");
            Ok(StatusCode::OK.into_response())
        }
        Err(e) => {
            error!(error = %e, "Failed to process event");
            Ok(warp::reply::with_status(e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response())
        }
    }
}

/// Renders the metrics into the Prometheus text format.
async fn metrics_handler(registry: Arc<Registry>) -> Result<Response, warp::Rejection> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return Ok(StatusCode::INTERNAL_SERVER_ERROR.into_response());
    }

    Ok(warp::reply::with_header(buffer, "Content-Type", encoder.format_type()).into_response())
}

pub fn metrics_routes(
    registry: Arc<Registry>,
) -> impl Filter<Extract = (Response,), Error = warp::Rejection> + Clone {
    warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .and(warp::any().map(move || Arc::clone(&registry)))
        .and_then(metrics_handler)
}

/// Runs the event receiver until `shutdown` resolves.
pub async fn run_event_server(
    processor: Arc<EventProcessor>,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), warp::Error> {
    let (addr, server) =
        warp::serve(event_routes(processor)).try_bind_with_graceful_shutdown(([0, 0, 0, 0], port), shutdown)?;
    info!(%addr, "Event receiver listening");
    server.await;
    info!("Event receiver stopped");
    Ok(())
}

/// Runs the HTTP server that exposes `/metrics` until `shutdown` resolves.
pub async fn run_metrics_server(
    registry: Arc<Registry>,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), warp::Error> {
    let (addr, server) =
        warp::serve(metrics_routes(registry)).try_bind_with_graceful_shutdown(([0, 0, 0, 0], port), shutdown)?;
    info!(%addr, "Metrics server listening");
    server.await;
    info!("Metrics server stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or on SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Resolves once a value is sent on `rx` or its sender is dropped. Lets one
/// signal stop several servers.
pub async fn shutdown_requested(mut rx: watch::Receiver<()>) {
    let _ = rx.changed().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ConfigCache;
    use crate::cluster::fake::{FakeCluster, FakeScheduler};
    use crate::processor::ProcessorOptions;
    use crate::resolver::tests::{admission, plan};
    use crate::settings::Settings;

    const SNAPSHOT: &str = r#"{
        "apiVersion": "appstudio.redhat.com/v1alpha1",
        "kind": "Snapshot",
        "metadata": {"name": "snap-1", "namespace": "ns1"},
        "spec": {"application": "app-a", "components": []}
    }"#;

    fn processor(cluster: FakeCluster, scheduler: Arc<FakeScheduler>) -> Arc<EventProcessor> {
        Arc::new(EventProcessor::new(
            Arc::new(cluster),
            scheduler,
            ConfigCache::default(),
            ProcessorOptions::from(&Settings::default()),
        ))
    }

    fn released_cluster() -> FakeCluster {
        let cluster = FakeCluster::default();
        cluster.add_config_map(
            "ns1",
            "taskrun-config",
            &[("TASK_NAME", "verify"), ("VSA_UPLOAD_URL", "rekor@https://rekor.example")],
        );
        cluster.add_plan("ns1", plan("rp-1", "ns1", "app-a", "target-ns", Some("rpa-1")));
        cluster.add_admission(admission("rpa-1", "target-ns", ""));
        cluster
    }

    #[tokio::test]
    async fn test_health() {
        let routes = event_routes(processor(FakeCluster::default(), Arc::default()));
        let res = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body(), "OK");
    }

    #[tokio::test]
    async fn test_other_event_types_are_accepted_without_processing() {
        let scheduler = Arc::new(FakeScheduler::default());
        let routes = event_routes(processor(released_cluster(), scheduler.clone()));

        let res = warp::test::request()
            .method("POST")
            .path("/")
            .header("ce-type", "dev.knative.apiserver.resource.update")
            .body(SNAPSHOT)
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);

        let res = warp::test::request()
            .method("POST")
            .path("/")
            .body(SNAPSHOT)
            .reply(&routes)
            .await;
        assert_eq!(res.status(), StatusCode::ACCEPTED);
        assert_eq!(scheduler.calls(), 0);
    }

    #[tokio::test]
    async fn test_snapshot_event_creates_task_run() {
        let scheduler = Arc::new(FakeScheduler::default());
        let routes = event_routes(processor(released_cluster(), scheduler.clone()));

        let res = warp::test::request()
            .method("POST")
            .path("/")
            .header("Ce-Type", RESOURCE_ADD_EVENT_TYPE)
            .body(SNAPSHOT)
            .reply(&routes)
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        let created = scheduler.created();
        assert_eq!(created.len(), 1);
        assert_eq!(
            created[0].1.spec.param("POLICY_CONFIGURATION"),
            Some("target-ns/registry-standard")
        );
    }

    #[tokio::test]
    async fn test_processing_error_is_500() {
        let routes = event_routes(processor(FakeCluster::default(), Arc::default()));

        let res = warp::test::request()
            .method("POST")
            .path("/")
            .header("ce-type", RESOURCE_ADD_EVENT_TYPE)
            .body("not json")
            .reply(&routes)
            .await;

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = String::from_utf8_lossy(res.body());
        assert!(body.starts_with("failed to parse event data"));
    }

    #[tokio::test]
    async fn test_servers_stop_on_shutdown() {
        let (tx, rx) = watch::channel(());
        let events = tokio::spawn(run_event_server(
            processor(FakeCluster::default(), Arc::new(FakeScheduler::default())),
            0,
            shutdown_requested(rx.clone()),
        ));
        let registry = Arc::new(Registry::new());
        let metrics = tokio::spawn(run_metrics_server(registry, 0, shutdown_requested(rx)));

        tx.send(()).unwrap();
        let stopped = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            (events.await.unwrap(), metrics.await.unwrap())
        })
        .await
        .expect("servers did not stop");
        assert!(stopped.0.is_ok());
        assert!(stopped.1.is_ok());
    }

    #[tokio::test]
    async fn test_metrics_route() {
        metrics::TASKRUNS_CREATED_TOTAL.inc_by(0);
        let registry = Arc::new(metrics::create_and_register_metrics().unwrap());
        let res = warp::test::request()
            .method("GET")
            .path("/metrics")
            .reply(&metrics_routes(registry))
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        let body = String::from_utf8_lossy(res.body());
        assert!(body.contains("taskrun_launcher_taskruns_created_total"));
    }
}
