/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/builder.rs
*
* Assembles the verification TaskRun for a Snapshot once its policy is known.
*
* The Task itself is resolved by Tekton's cluster resolver from the launcher's
* namespace. Parameters are forwarded as strings. An empty flag-style value
* from the ConfigMap becomes the literal "true", which is what the
* verification Task has always received for unset flags; WORKERS is the one
* numeric parameter and defaults to "1" instead.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::config::ConfigurationRecord;
use crate::crds::{Param, SecretVolumeSource, TaskRef, TaskRun, TaskRunSpec, WorkspaceBinding};
use crate::event::Snapshot;
use crate::resolver::ResolvedPolicy;
use chrono::{DateTime, Utc};
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

pub const TASK_RUN_NAME_PREFIX: &str = "verify-conforma";
pub const SIGNING_KEY_WORKSPACE: &str = "signing-key";
pub const DEFAULT_SERVICE_ACCOUNT: &str = "conforma-vsa-generator";
const DEFAULT_WORKERS: &str = "1";
const UNSET_FLAG_VALUE: &str = "true";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("TASK_NAME is required but not set in the launcher configuration")]
    MissingJobName,

    #[error("VSA_UPLOAD_URL is required but not set in the launcher configuration")]
    MissingUploadUrl,

    #[error("spec of snapshot {snapshot} is not a component list: {source}")]
    InvalidSnapshotSpec {
        snapshot: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Where and as whom the TaskRun runs.
#[derive(Debug, Clone)]
pub struct Placement<'a> {
    /// Namespace of the TaskRun and of the Task it references.
    pub namespace: &'a str,
    pub service_account: &'a str,
}

fn flag(value: &str) -> String {
    if value.is_empty() {
        UNSET_FLAG_VALUE.to_string()
    } else {
        value.to_string()
    }
}

/// `verify-conforma-<snapshot>-<unix seconds>`. Two events for the same
/// Snapshot within one second produce the same name.
pub fn task_run_name(snapshot: &str, now: DateTime<Utc>) -> String {
    format!("{}-{}-{}", TASK_RUN_NAME_PREFIX, snapshot, now.timestamp())
}

fn labels(snapshot: &str) -> BTreeMap<String, String> {
    [
        ("app.kubernetes.io/name", "verify-and-create-vsa"),
        ("app.kubernetes.io/instance", snapshot),
        ("app.kubernetes.io/component", "conforma"),
        ("app.kubernetes.io/part-of", "konflux"),
        ("app.kubernetes.io/managed-by", "conforma-knative-service"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub fn build_task_run(
    snapshot: &Snapshot,
    config: &ConfigurationRecord,
    policy: &ResolvedPolicy,
    placement: &Placement<'_>,
    now: DateTime<Utc>,
) -> Result<TaskRun, BuildError> {
    if config.task_name.is_empty() {
        return Err(BuildError::MissingJobName);
    }
    if config.vsa_upload_url.is_empty() {
        return Err(BuildError::MissingUploadUrl);
    }

    let components = snapshot
        .components()
        .map_err(|source| BuildError::InvalidSnapshotSpec {
            snapshot: snapshot.name.clone(),
            source,
        })?;
    debug!(snapshot = %snapshot.name, components = components.len(), "Building TaskRun");

    let workers = if config.workers.is_empty() {
        DEFAULT_WORKERS.to_string()
    } else {
        config.workers.clone()
    };

    let params = vec![
        Param::new("IMAGES", snapshot.raw_spec()),
        Param::new("POLICY_CONFIGURATION", flag(&policy.reference())),
        Param::new("PUBLIC_KEY", flag(&config.public_key)),
        Param::new("VSA_UPLOAD_URL", config.vsa_upload_url.clone()),
        Param::new("IGNORE_REKOR", flag(&config.ignore_rekor)),
        Param::new("STRICT", flag(&config.strict)),
        Param::new("WORKERS", workers),
        Param::new("DEBUG", flag(&config.debug)),
    ];
    for param in params.iter().filter(|p| p.name != "IMAGES") {
        debug!(name = %param.name, value = %param.value, "TaskRun param");
    }

    Ok(TaskRun {
        metadata: ObjectMeta {
            name: Some(task_run_name(&snapshot.name, now)),
            namespace: Some(placement.namespace.to_string()),
            labels: Some(labels(&snapshot.name)),
            ..Default::default()
        },
        spec: TaskRunSpec {
            task_ref: TaskRef {
                resolver: "cluster".to_string(),
                params: vec![
                    Param::new("kind", "task"),
                    Param::new("name", config.task_name.clone()),
                    Param::new("namespace", placement.namespace),
                ],
            },
            params,
            service_account_name: Some(placement.service_account.to_string()),
            workspaces: vec![WorkspaceBinding {
                name: SIGNING_KEY_WORKSPACE.to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: config.vsa_signing_key_secret_name.clone(),
                }),
            }],
            compute_resources: config.compute_resources(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::value::RawValue;

    const SPEC: &str = r#"{"application":"app-a","components":[{"name":"c1","containerImage":"quay.io/org/c1@sha256:01"}]}"#;

    fn snapshot(spec: &str) -> Snapshot {
        Snapshot::new("snap-1", "ns1", RawValue::from_string(spec.to_string()).unwrap())
    }

    fn policy() -> ResolvedPolicy {
        ResolvedPolicy {
            namespace: "target-ns".to_string(),
            name: "custom-policy".to_string(),
        }
    }

    fn minimal_config() -> ConfigurationRecord {
        ConfigurationRecord {
            task_name: "verify-conforma".to_string(),
            vsa_upload_url: "rekor@https://rekor.example".to_string(),
            ..Default::default()
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    const PLACEMENT: Placement<'static> = Placement {
        namespace: "launcher",
        service_account: DEFAULT_SERVICE_ACCOUNT,
    };

    #[test]
    fn test_builds_full_task_run() {
        let config = ConfigurationRecord {
            public_key: "k8s://keys/cosign-public-key".to_string(),
            ignore_rekor: "false".to_string(),
            strict: "false".to_string(),
            workers: "4".to_string(),
            debug: "false".to_string(),
            vsa_signing_key_secret_name: "vsa-signing-key".to_string(),
            ..minimal_config()
        };

        let run = build_task_run(&snapshot(SPEC), &config, &policy(), &PLACEMENT, now()).unwrap();

        assert_eq!(run.metadata.name.as_deref(), Some("verify-conforma-snap-1-1700000000"));
        assert_eq!(run.metadata.namespace.as_deref(), Some("launcher"));
        let labels = run.metadata.labels.as_ref().unwrap();
        assert_eq!(labels["app.kubernetes.io/instance"], "snap-1");
        assert_eq!(labels["app.kubernetes.io/managed-by"], "conforma-knative-service");

        let spec = &run.spec;
        assert_eq!(spec.task_ref.resolver, "cluster");
        assert_eq!(
            spec.task_ref.params,
            vec![
                Param::new("kind", "task"),
                Param::new("name", "verify-conforma"),
                Param::new("namespace", "launcher"),
            ]
        );
        let names: Vec<&str> = spec.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            ["IMAGES", "POLICY_CONFIGURATION", "PUBLIC_KEY", "VSA_UPLOAD_URL", "IGNORE_REKOR", "STRICT", "WORKERS", "DEBUG"]
        );
        assert_eq!(spec.param("IMAGES"), Some(SPEC));
        assert_eq!(spec.param("POLICY_CONFIGURATION"), Some("target-ns/custom-policy"));
        assert_eq!(spec.param("PUBLIC_KEY"), Some("k8s://keys/cosign-public-key"));
        assert_eq!(spec.param("WORKERS"), Some("4"));
        assert_eq!(spec.param("STRICT"), Some("false"));
        assert_eq!(spec.service_account_name.as_deref(), Some("conforma-vsa-generator"));
        assert_eq!(spec.workspaces[0].name, "signing-key");
        assert_eq!(
            spec.workspaces[0].secret.as_ref().unwrap().secret_name,
            "vsa-signing-key"
        );
        assert!(spec.compute_resources.is_none());
    }

    #[test]
    fn test_empty_values_default_to_true_and_one_worker() {
        let run = build_task_run(&snapshot(SPEC), &minimal_config(), &policy(), &PLACEMENT, now()).unwrap();
        let spec = &run.spec;

        for name in ["PUBLIC_KEY", "IGNORE_REKOR", "STRICT", "DEBUG"] {
            assert_eq!(spec.param(name), Some("true"), "{name}");
        }
        assert_eq!(spec.param("WORKERS"), Some("1"));
        assert_eq!(spec.param("VSA_UPLOAD_URL"), Some("rekor@https://rekor.example"));
    }

    #[test]
    fn test_required_fields() {
        let no_task = ConfigurationRecord {
            task_name: String::new(),
            ..minimal_config()
        };
        assert!(matches!(
            build_task_run(&snapshot(SPEC), &no_task, &policy(), &PLACEMENT, now()),
            Err(BuildError::MissingJobName)
        ));

        let no_url = ConfigurationRecord {
            vsa_upload_url: String::new(),
            ..minimal_config()
        };
        assert!(matches!(
            build_task_run(&snapshot(SPEC), &no_url, &policy(), &PLACEMENT, now()),
            Err(BuildError::MissingUploadUrl)
        ));
    }

    #[test]
    fn test_invalid_snapshot_spec() {
        let result = build_task_run(
            &snapshot(r#"{"components":{"c1":"x"}}"#),
            &minimal_config(),
            &policy(),
            &PLACEMENT,
            now(),
        );
        assert!(matches!(result, Err(BuildError::InvalidSnapshotSpec { .. })));
    }

    #[test]
    fn test_compute_resources_are_applied() {
        let config = ConfigurationRecord {
            task_cpu_request: "250m".to_string(),
            task_memory_request: "512Mi".to_string(),
            ..minimal_config()
        };
        let run = build_task_run(&snapshot(SPEC), &config, &policy(), &PLACEMENT, now()).unwrap();
        let resources = run.spec.compute_resources.unwrap();
        assert_eq!(resources.requests["cpu"], "250m");
        assert_eq!(resources.requests["memory"], "512Mi");
        assert!(resources.limits.is_empty());
    }

    #[test]
    fn test_same_second_names_collide() {
        assert_eq!(task_run_name("snap-1", now()), task_run_name("snap-1", now()));
    }
}
