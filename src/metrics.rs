/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/metrics.rs
*
* This module defines and registers the Prometheus metrics exposed by the
* launcher on its metrics port.
*
* Using `lazy_static`, the metrics are created once and shared by every
* event-processing task and the metrics server.
*
* SPDX-License-Identifier: Apache-2.0
*/

use lazy_static::lazy_static;
use prometheus::{
    opts, register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec, Registry,
};

lazy_static! {
    /// Events handed to the processor, whatever their kind.
    pub static ref EVENTS_RECEIVED_TOTAL: IntCounter =
        register_int_counter!(opts!(
            "taskrun_launcher_events_received_total",
            "Total number of events received."
        )).unwrap();

    /// Events dropped before processing, labeled by reason (event_type, kind).
    pub static ref EVENTS_IGNORED_TOTAL: IntCounterVec =
        register_int_counter_vec!(
            "taskrun_launcher_events_ignored_total",
            "Total number of events acknowledged without processing.",
            &["reason"]
        ).unwrap();

    /// Snapshots for which no release policy could be resolved.
    pub static ref SNAPSHOTS_SKIPPED_TOTAL: IntCounter =
        register_int_counter!(opts!(
            "taskrun_launcher_snapshots_skipped_total",
            "Total number of snapshots skipped because no release policy applies."
        )).unwrap();

    pub static ref TASKRUNS_CREATED_TOTAL: IntCounter =
        register_int_counter!(opts!(
            "taskrun_launcher_taskruns_created_total",
            "Total number of verification TaskRuns created."
        )).unwrap();

    pub static ref TASKRUN_SUBMISSION_FAILURES_TOTAL: IntCounter =
        register_int_counter!(opts!(
            "taskrun_launcher_taskrun_submission_failures_total",
            "Total number of TaskRun submissions that failed after retries."
        )).unwrap();

    pub static ref CIRCUIT_OPEN_REJECTIONS_TOTAL: IntCounter =
        register_int_counter!(opts!(
            "taskrun_launcher_circuit_open_rejections_total",
            "Total number of TaskRun submissions rejected by an open circuit breaker."
        )).unwrap();

    /// End-to-end processing time of a Snapshot event, in seconds.
    pub static ref PROCESSING_LATENCY_SECONDS: Histogram =
        register_histogram!(
            "taskrun_launcher_processing_latency_seconds",
            "Time taken to process a snapshot event.",
            // 50ms up to the worst case of three timed-out submissions
            vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
        ).unwrap();
}

/// Creates a new Prometheus registry and registers all launcher metrics.
///
/// Called once at startup.
pub fn create_and_register_metrics() -> Result<Registry, prometheus::Error> {
    let r = Registry::new();
    r.register(Box::new(EVENTS_RECEIVED_TOTAL.clone()))?;
    r.register(Box::new(EVENTS_IGNORED_TOTAL.clone()))?;
    r.register(Box::new(SNAPSHOTS_SKIPPED_TOTAL.clone()))?;
    r.register(Box::new(TASKRUNS_CREATED_TOTAL.clone()))?;
    r.register(Box::new(TASKRUN_SUBMISSION_FAILURES_TOTAL.clone()))?;
    r.register(Box::new(CIRCUIT_OPEN_REJECTIONS_TOTAL.clone()))?;
    r.register(Box::new(PROCESSING_LATENCY_SECONDS.clone()))?;
    Ok(r)
}
