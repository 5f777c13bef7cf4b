/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/crds.rs
*
* This file defines the Rust data structures for the cluster resources the
* launcher reads and writes. None of these CRDs are owned by this service:
* ReleasePlan and ReleasePlanAdmission belong to the release service, and
* TaskRun belongs to Tekton. Only the fields the launcher actually touches are
* modelled; everything else is ignored on deserialization.
*
* Architecture:
* - Each top-level struct decorated with `#[derive(CustomResource)]` represents a
*   single API Kind. The `#[kube(...)]` attribute MUST match the group, version
*   and kind served by the cluster.
* - `serde` attributes map idiomatic Rust `snake_case` onto Kubernetes
*   `camelCase`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label on a ReleasePlan naming the ReleasePlanAdmission it is bound to.
pub const RELEASE_PLAN_ADMISSION_LABEL: &str = "release.appstudio.openshift.io/releasePlanAdmission";

// --- ReleasePlan ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "appstudio.redhat.com",
    version = "v1alpha1",
    kind = "ReleasePlan",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ReleasePlanSpec {
    /// Name of the Application this plan releases.
    #[serde(default)]
    pub application: String,
    /// Namespace the release is delivered to; the admission lives there.
    #[serde(default)]
    pub target: String,
}

impl ReleasePlan {
    /// The value of the admission reference label, if the plan carries one.
    pub fn admission_name(&self) -> Option<&str> {
        self.labels()
            .get(RELEASE_PLAN_ADMISSION_LABEL)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }
}

// --- ReleasePlanAdmission ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "appstudio.redhat.com",
    version = "v1alpha1",
    kind = "ReleasePlanAdmission",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ReleasePlanAdmissionSpec {
    /// Name of the compliance policy, without namespace. May be empty.
    #[serde(default)]
    pub policy: String,
}

// --- TaskRun (tekton.dev/v1) ---

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "tekton.dev", version = "v1", kind = "TaskRun", namespaced)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunSpec {
    pub task_ref: TaskRef,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workspaces: Vec<WorkspaceBinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_resources: Option<ComputeResources>,
}

impl TaskRunSpec {
    /// Looks up the string value of a parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

/// A reference to a Task resolved through a Tekton remote resolver.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    pub resolver: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Param>,
}

/// A string-typed Tekton parameter. Array and object parameters are never
/// produced by the launcher.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct Param {
    pub name: String,
    pub value: String,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceBinding {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<SecretVolumeSource>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretVolumeSource {
    pub secret_name: String,
}

/// Resource requests and limits, as Kubernetes quantity strings.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ComputeResources {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub requests: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub limits: BTreeMap<String, String>,
}

impl ComputeResources {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.limits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;
    use serde_json::json;

    #[test]
    fn test_release_plan_admission_label() {
        let plan = ReleasePlan {
            metadata: ObjectMeta {
                name: Some("rp".to_string()),
                labels: Some([(RELEASE_PLAN_ADMISSION_LABEL.to_string(), "rpa-1".to_string())].into()),
                ..Default::default()
            },
            spec: ReleasePlanSpec::default(),
        };
        assert_eq!(plan.admission_name(), Some("rpa-1"));

        let unlabelled = ReleasePlan::new("rp", ReleasePlanSpec::default());
        assert_eq!(unlabelled.admission_name(), None);
    }

    #[test]
    fn test_admission_without_policy_deserializes() {
        let rpa: ReleasePlanAdmission = serde_json::from_value(json!({
            "apiVersion": "appstudio.redhat.com/v1alpha1",
            "kind": "ReleasePlanAdmission",
            "metadata": { "name": "rpa-1", "namespace": "target-ns" },
            "spec": { "applications": ["app-a"], "origin": "ns1" }
        }))
        .unwrap();
        assert_eq!(rpa.spec.policy, "");
    }

    #[test]
    fn test_task_run_serializes_camel_case() {
        let spec = TaskRunSpec {
            task_ref: TaskRef {
                resolver: "cluster".to_string(),
                params: vec![Param::new("kind", "task")],
            },
            params: vec![Param::new("STRICT", "true")],
            service_account_name: Some("sa".to_string()),
            workspaces: vec![WorkspaceBinding {
                name: "signing-key".to_string(),
                secret: Some(SecretVolumeSource {
                    secret_name: "vsa-key".to_string(),
                }),
            }],
            compute_resources: None,
        };
        let value = serde_json::to_value(TaskRun::new("tr", spec)).unwrap();
        assert_eq!(value["apiVersion"], "tekton.dev/v1");
        assert_eq!(value["spec"]["taskRef"]["resolver"], "cluster");
        assert_eq!(value["spec"]["serviceAccountName"], "sa");
        assert_eq!(value["spec"]["workspaces"][0]["secret"]["secretName"], "vsa-key");
        assert!(value["spec"].get("computeResources").is_none());
    }
}
