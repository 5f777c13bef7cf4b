/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/cluster.rs
*
* This file defines the seams between the launcher and the Kubernetes API.
*
* Architecture:
* - `ClusterReader` covers every read the pipeline performs: listing
*   ReleasePlans, fetching a ReleasePlanAdmission, the launcher ConfigMap and
*   Secrets. It is read-only; nothing in the resolution chain writes.
* - `TaskRunScheduler` is the single write: submitting a TaskRun to Tekton.
* - `KubeCluster` implements both on top of a `kube::Client`. A 404 from the
*   API server is surfaced as `ClusterError::NotFound` so callers can tell a
*   missing object apart from a failing API server.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::{ReleasePlan, ReleasePlanAdmission, TaskRun};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::{
    api::{Api, ListParams, PostParams},
    Client,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound { .. })
    }
}

/// Read access to the cluster objects the pipeline depends on.
#[async_trait]
pub trait ClusterReader: Send + Sync {
    /// Lists every ReleasePlan in a namespace, in the order the API returns them.
    async fn list_release_plans(&self, namespace: &str) -> Result<Vec<ReleasePlan>, ClusterError>;

    async fn get_release_plan_admission(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReleasePlanAdmission, ClusterError>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, ClusterError>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClusterError>;
}

/// The workflow scheduler that executes verification TaskRuns.
#[async_trait]
pub trait TaskRunScheduler: Send + Sync {
    async fn create(&self, namespace: &str, task_run: &TaskRun) -> Result<TaskRun, ClusterError>;
}

/// `ClusterReader` and `TaskRunScheduler` backed by a live API server.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Maps a 404 from the API server onto `ClusterError::NotFound`.
fn not_found_or_api(err: kube::Error, kind: &'static str, namespace: &str, name: &str) -> ClusterError {
    match err {
        kube::Error::Api(ref response) if response.code == 404 => ClusterError::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        other => ClusterError::Api(other),
    }
}

#[async_trait]
impl ClusterReader for KubeCluster {
    async fn list_release_plans(&self, namespace: &str) -> Result<Vec<ReleasePlan>, ClusterError> {
        let api: Api<ReleasePlan> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        Ok(list.items)
    }

    async fn get_release_plan_admission(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReleasePlanAdmission, ClusterError> {
        let api: Api<ReleasePlanAdmission> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| not_found_or_api(e, "ReleasePlanAdmission", namespace, name))
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<ConfigMap, ClusterError> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| not_found_or_api(e, "ConfigMap", namespace, name))
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, ClusterError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| not_found_or_api(e, "Secret", namespace, name))
    }
}

#[async_trait]
impl TaskRunScheduler for KubeCluster {
    async fn create(&self, namespace: &str, task_run: &TaskRun) -> Result<TaskRun, ClusterError> {
        let api: Api<TaskRun> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.create(&PostParams::default(), task_run).await?)
    }
}
