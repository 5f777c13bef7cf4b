/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/processor.rs
*
* This file contains the per-event pipeline that turns a Snapshot creation
* event into a verification TaskRun.
*
* Architecture:
* 1. **Filter**: events for anything other than a Snapshot are acknowledged
*    and dropped.
* 2. **Configuration**: the launcher ConfigMap is loaded through the
*    `ConfigCache`, fetching from the cluster on a miss.
* 3. **Policy**: the `PolicyResolver` walks the release chain. A failure there
*    is not a fault: the Snapshot is not headed for a release, so no TaskRun
*    is created and the event completes successfully.
* 4. **Build**: the TaskRun is assembled from the Snapshot, the configuration
*    and the resolved policy.
* 5. **Submit**: the TaskRun is created through the `ResilienceController`,
*    which retries, applies a per-attempt deadline and trips the breaker when
*    the scheduler keeps failing.
*
* Each event runs on its own task. The cache and the circuit state are the
* only state shared between events.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::builder::{build_task_run, BuildError, Placement};
use crate::cache::ConfigCache;
use crate::cluster::{ClusterError, ClusterReader, TaskRunScheduler};
use crate::config::ConfigurationRecord;
use crate::crds::TaskRun;
use crate::event::{Snapshot, SnapshotEvent};
use crate::metrics;
use crate::resilience::{ResilienceController, ResilienceError};
use crate::resolver::{PolicyResolver, ResolutionError, ResolvedPolicy};
use crate::settings::Settings;
use kube::ResourceExt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// Name under which TaskRun submission is tracked by the circuit breaker.
pub const CREATE_TASK_RUN_OPERATION: &str = "create-taskrun";

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to parse event data: {0}")]
    InvalidEvent(#[source] serde_json::Error),

    #[error("failed to read configmap {namespace}/{name}: {source}")]
    Config {
        namespace: String,
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("failed to build taskrun for snapshot {snapshot}: {source}")]
    Build {
        snapshot: String,
        #[source]
        source: BuildError,
    },

    #[error("failed to create taskrun for snapshot {snapshot} in namespace {namespace}: {source}")]
    Submission {
        snapshot: String,
        namespace: String,
        #[source]
        source: ResilienceError<ClusterError>,
    },
}

/// How an event that was handled without error ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Not a Snapshot.
    Ignored { api_version: String, kind: String },
    /// A Snapshot with no applicable release policy.
    Skipped { snapshot: String, reason: String },
    Submitted { name: String, namespace: String },
}

/// Result of policy resolution for one Snapshot. Wrapped in a `Result`, it
/// distinguishes "not applicable" from a genuine failure.
#[derive(Debug)]
pub enum PolicyDecision {
    Skip(ResolutionError),
    Proceed(ResolvedPolicy),
}

/// Wiring of the processor that does not change per event.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    pub config_map_name: String,
    pub config_namespace: Option<String>,
    pub service_account_name: String,
}

impl From<&Settings> for ProcessorOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            config_map_name: settings.config_map_name.clone(),
            config_namespace: settings.config_namespace.clone(),
            service_account_name: settings.service_account_name.clone(),
        }
    }
}

pub struct EventProcessor {
    cluster: Arc<dyn ClusterReader>,
    scheduler: Arc<dyn TaskRunScheduler>,
    cache: ConfigCache,
    resolver: PolicyResolver,
    resilience: ResilienceController,
    options: ProcessorOptions,
}

impl EventProcessor {
    pub fn new(
        cluster: Arc<dyn ClusterReader>,
        scheduler: Arc<dyn TaskRunScheduler>,
        cache: ConfigCache,
        options: ProcessorOptions,
    ) -> Self {
        Self {
            resolver: PolicyResolver::new(cluster.clone()),
            cluster,
            scheduler,
            cache,
            resilience: ResilienceController::new(),
            options,
        }
    }

    pub fn cache(&self) -> &ConfigCache {
        &self.cache
    }

    pub fn resilience(&self) -> &ResilienceController {
        &self.resilience
    }

    /// Entry point for the transport. Any `Ok` means the event is done with.
    pub async fn process_event(&self, raw: &[u8]) -> Result<ProcessOutcome, ProcessError> {
        metrics::EVENTS_RECEIVED_TOTAL.inc();
        let event = SnapshotEvent::from_slice(raw).map_err(ProcessError::InvalidEvent)?;

        match event.into_snapshot() {
            Ok(snapshot) => {
                let _timer = metrics::PROCESSING_LATENCY_SECONDS.start_timer();
                self.process_snapshot(&snapshot).await
            }
            Err(other) => {
                info!(api_version = %other.api_version, kind = %other.kind, "Ignoring resource");
                metrics::EVENTS_IGNORED_TOTAL.with_label_values(&["kind"]).inc();
                Ok(ProcessOutcome::Ignored {
                    api_version: other.api_version,
                    kind: other.kind,
                })
            }
        }
    }

    #[instrument(skip(self, snapshot), fields(snapshot = %snapshot.name, namespace = %snapshot.namespace))]
    pub async fn process_snapshot(&self, snapshot: &Snapshot) -> Result<ProcessOutcome, ProcessError> {
        info!("Processing snapshot");
        let config_namespace = self
            .options
            .config_namespace
            .clone()
            .unwrap_or_else(|| snapshot.namespace.clone());

        let config = self.load_config(&config_namespace).await?;

        let policy = match self.decide_policy(snapshot).await {
            PolicyDecision::Proceed(policy) => policy,
            PolicyDecision::Skip(reason) => {
                info!(reason = %reason, "No release policy found, skipping verification");
                metrics::SNAPSHOTS_SKIPPED_TOTAL.inc();
                return Ok(ProcessOutcome::Skipped {
                    snapshot: snapshot.name.clone(),
                    reason: reason.to_string(),
                });
            }
        };

        let placement = Placement {
            namespace: &config_namespace,
            service_account: &self.options.service_account_name,
        };
        let task_run = build_task_run(snapshot, &config, &policy, &placement, chrono::Utc::now()).map_err(
            |source| ProcessError::Build {
                snapshot: snapshot.name.clone(),
                source,
            },
        )?;
        debug!(taskrun = %task_run.name_any(), "Built TaskRun");

        let created = self.submit(snapshot, &config, &config_namespace, &task_run).await?;
        let name = created.name_any();
        let namespace = created.namespace().unwrap_or(config_namespace);
        info!(taskrun = %name, taskrun_namespace = %namespace, "Created TaskRun");
        Ok(ProcessOutcome::Submitted { name, namespace })
    }

    /// Resolves the release policy of the Snapshot's application. Any
    /// failure along the chain, an unreadable application included, is a
    /// `Skip`.
    pub async fn decide_policy(&self, snapshot: &Snapshot) -> PolicyDecision {
        let application = match snapshot.application() {
            Ok(application) => application,
            Err(source) => {
                return PolicyDecision::Skip(ResolutionError::InvalidApplication {
                    namespace: snapshot.namespace.clone(),
                    snapshot: snapshot.name.clone(),
                    source,
                })
            }
        };

        match self.resolver.resolve(&application, &snapshot.namespace).await {
            Ok(policy) => PolicyDecision::Proceed(policy),
            Err(reason) => PolicyDecision::Skip(reason),
        }
    }

    /// Returns the launcher configuration for `namespace`, reading the
    /// ConfigMap on a cache miss.
    pub async fn load_config(&self, namespace: &str) -> Result<Arc<ConfigurationRecord>, ProcessError> {
        if let Some(config) = self.cache.get(namespace).await {
            debug!(namespace = %namespace, "Using cached config");
            return Ok(config);
        }

        let name = &self.options.config_map_name;
        let cm = self
            .cluster
            .get_config_map(namespace, name)
            .await
            .map_err(|source| ProcessError::Config {
                namespace: namespace.to_string(),
                name: name.clone(),
                source,
            })?;

        let config = self
            .cache
            .set(namespace, ConfigurationRecord::from_config_map(&cm))
            .await;
        info!(namespace = %namespace, configmap = %name, "Fetched and cached config");
        Ok(config)
    }

    async fn submit(
        &self,
        snapshot: &Snapshot,
        config: &ConfigurationRecord,
        namespace: &str,
        task_run: &TaskRun,
    ) -> Result<TaskRun, ProcessError> {
        let scheduler = self.scheduler.as_ref();
        let policy = config.resilience_policy();

        let result = self
            .resilience
            .execute(CREATE_TASK_RUN_OPERATION, &policy, || scheduler.create(namespace, task_run))
            .await;

        match result {
            Ok(created) => {
                metrics::TASKRUNS_CREATED_TOTAL.inc();
                Ok(created)
            }
            Err(source) => {
                if source.is_circuit_open() {
                    warn!(error = %source, "TaskRun submission rejected by circuit breaker");
                    metrics::CIRCUIT_OPEN_REJECTIONS_TOTAL.inc();
                } else {
                    error!(error = %source, "Failed to create TaskRun after retries");
                    metrics::TASKRUN_SUBMISSION_FAILURES_TOTAL.inc();
                }
                Err(ProcessError::Submission {
                    snapshot: snapshot.name.clone(),
                    namespace: namespace.to_string(),
                    source,
                })
            }
        }
    }
}
