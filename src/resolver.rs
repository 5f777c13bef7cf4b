/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/resolver.rs
*
* This file implements the lookup of the compliance policy that applies to a
* Snapshot's application.
*
* Resolution chain:
* 1. List the ReleasePlans in the Snapshot's namespace.
* 2. Keep the plans whose `spec.application` matches. When several match, the
*    first one in listing order wins and the ambiguity is logged.
* 3. Follow the plan's admission label to the ReleasePlanAdmission that lives
*    in the plan's `spec.target` namespace.
* 4. Read `spec.policy` from the admission, falling back to
*    `registry-standard` when it is empty.
*
* Every step is a plain read and nothing here retries. A failure anywhere in
* the chain means the Snapshot is not headed for a release, which callers
* treat as "no verification needed" rather than as a fault.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::cluster::{ClusterError, ClusterReader};
use crate::crds::{ReleasePlan, RELEASE_PLAN_ADMISSION_LABEL};
use kube::ResourceExt;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Policy used when a ReleasePlanAdmission does not name one.
pub const DEFAULT_POLICY_NAME: &str = "registry-standard";

/// A compliance policy, identified by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPolicy {
    pub namespace: String,
    pub name: String,
}

impl ResolvedPolicy {
    /// The `namespace/name` form accepted by the verification task.
    pub fn reference(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ResolvedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("failed to read application of snapshot {namespace}/{snapshot}: {source}")]
    InvalidApplication {
        namespace: String,
        snapshot: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to list release plans in namespace {namespace}: {source}")]
    ListFailed {
        namespace: String,
        #[source]
        source: ClusterError,
    },

    #[error("no release plans found in namespace {namespace}")]
    NoPlansInNamespace { namespace: String },

    #[error("no release plans found for application {application} in namespace {namespace}")]
    NoPlanForApplication { application: String, namespace: String },

    #[error("release plan {namespace}/{plan} has no {label} label")]
    MissingAdmissionLabel {
        namespace: String,
        plan: String,
        label: &'static str,
    },

    #[error("failed to get release plan admission {namespace}/{name}: {source}")]
    AdmissionNotFound {
        namespace: String,
        name: String,
        #[source]
        source: ClusterError,
    },
}

/// Walks application → ReleasePlan → ReleasePlanAdmission → policy.
pub struct PolicyResolver {
    cluster: Arc<dyn ClusterReader>,
}

impl PolicyResolver {
    pub fn new(cluster: Arc<dyn ClusterReader>) -> Self {
        Self { cluster }
    }

    #[instrument(skip(self))]
    pub async fn resolve(&self, application: &str, namespace: &str) -> Result<ResolvedPolicy, ResolutionError> {
        let plan = self.find_release_plan(application, namespace).await?;

        let target = plan.spec.target.clone();
        let admission_name = plan
            .admission_name()
            .ok_or_else(|| ResolutionError::MissingAdmissionLabel {
                namespace: namespace.to_string(),
                plan: plan.name_any(),
                label: RELEASE_PLAN_ADMISSION_LABEL,
            })?
            .to_string();

        let admission = self
            .cluster
            .get_release_plan_admission(&target, &admission_name)
            .await
            .map_err(|source| ResolutionError::AdmissionNotFound {
                namespace: target.clone(),
                name: admission_name.clone(),
                source,
            })?;

        // The policy is assumed to live next to the admission that names it.
        let policy_namespace = admission.namespace().unwrap_or(target);
        let policy_name = if admission.spec.policy.is_empty() {
            debug!(admission = %admission_name, "Admission sets no policy, using default");
            DEFAULT_POLICY_NAME.to_string()
        } else {
            admission.spec.policy.clone()
        };

        let resolved = ResolvedPolicy {
            namespace: policy_namespace,
            name: policy_name,
        };
        info!(policy = %resolved, admission = %admission_name, "Resolved policy");
        Ok(resolved)
    }

    /// Picks the ReleasePlan for `application`, first match in listing order.
    async fn find_release_plan(&self, application: &str, namespace: &str) -> Result<ReleasePlan, ResolutionError> {
        let plans = self
            .cluster
            .list_release_plans(namespace)
            .await
            .map_err(|source| ResolutionError::ListFailed {
                namespace: namespace.to_string(),
                source,
            })?;

        if plans.is_empty() {
            return Err(ResolutionError::NoPlansInNamespace {
                namespace: namespace.to_string(),
            });
        }

        let mut matching: Vec<ReleasePlan> = plans
            .into_iter()
            .filter(|plan| plan.spec.application == application)
            .collect();

        if matching.is_empty() {
            return Err(ResolutionError::NoPlanForApplication {
                application: application.to_string(),
                namespace: namespace.to_string(),
            });
        }

        if matching.len() > 1 {
            let candidates: Vec<String> = matching.iter().map(|p| p.name_any()).collect();
            warn!(
                application = %application,
                namespace = %namespace,
                candidates = ?candidates,
                "Multiple release plans match application, using the first"
            );
        }

        Ok(matching.swap_remove(0))
    }
}

#[derive(Debug, Error)]
pub enum KeyLookupError {
    #[error("failed to get secret {namespace}/{name}: {source}")]
    SecretNotFound {
        namespace: String,
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("{key} not found in secret {namespace}/{name}")]
    KeyNotFound {
        namespace: String,
        name: String,
        key: String,
    },

    #[error("{key} in secret {namespace}/{name} is not valid UTF-8")]
    InvalidKeyData {
        namespace: String,
        name: String,
        key: String,
    },
}

/// Reads a public key (for example `cosign.pub`) out of a Secret. The API
/// server already hands the data back base64-decoded.
#[instrument(skip(cluster))]
pub async fn find_public_key(
    cluster: &dyn ClusterReader,
    namespace: &str,
    secret_name: &str,
    key: &str,
) -> Result<String, KeyLookupError> {
    let secret = cluster
        .get_secret(namespace, secret_name)
        .await
        .map_err(|source| KeyLookupError::SecretNotFound {
            namespace: namespace.to_string(),
            name: secret_name.to_string(),
            source,
        })?;

    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .ok_or_else(|| KeyLookupError::KeyNotFound {
            namespace: namespace.to_string(),
            name: secret_name.to_string(),
            key: key.to_string(),
        })?;

    let public_key = String::from_utf8(bytes.0.clone()).map_err(|_| KeyLookupError::InvalidKeyData {
        namespace: namespace.to_string(),
        name: secret_name.to_string(),
        key: key.to_string(),
    })?;

    info!(namespace = %namespace, secret = %secret_name, "Found public key");
    Ok(public_key)
}
