/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/event.rs
*
* Inbound event model. The API server source delivers the full object that was
* created; only Snapshots are of interest, and their spec is carried through
* untouched as raw JSON so the verification task sees exactly what the cluster
* stored.
*
* SPDX-License-Identifier: Apache-2.0
*/

use serde::Deserialize;
use serde_json::value::RawValue;

/// The only apiVersion accepted by the launcher.
pub const SNAPSHOT_API_VERSION: &str = "appstudio.redhat.com/v1alpha1";
/// The only kind accepted by the launcher.
pub const SNAPSHOT_KIND: &str = "Snapshot";

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEvent {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: EventMetadata,
    pub spec: Option<Box<RawValue>>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct EventMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

impl SnapshotEvent {
    pub fn from_slice(raw: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(raw)
    }

    pub fn is_snapshot(&self) -> bool {
        self.kind == SNAPSHOT_KIND && self.api_version == SNAPSHOT_API_VERSION
    }

    /// Converts the event into a Snapshot, or gives it back if it is some
    /// other kind of resource.
    pub fn into_snapshot(self) -> Result<Snapshot, SnapshotEvent> {
        if !self.is_snapshot() {
            return Err(self);
        }
        Ok(Snapshot {
            name: self.metadata.name,
            namespace: self.metadata.namespace,
            spec: self.spec,
        })
    }
}

/// An application version with container image references. Read-only.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub name: String,
    pub namespace: String,
    spec: Option<Box<RawValue>>,
}

#[derive(Deserialize)]
struct ApplicationField {
    #[serde(default)]
    application: String,
}

#[derive(Deserialize)]
struct ComponentList {
    #[serde(default)]
    components: Vec<Component>,
}

/// A single component entry of a Snapshot spec.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub container_image: String,
}

impl Snapshot {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, spec: Box<RawValue>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            spec: Some(spec),
        }
    }

    /// The spec exactly as it was received. A Snapshot without a spec reads
    /// as an empty object.
    pub fn raw_spec(&self) -> &str {
        self.spec.as_deref().map_or("{}", RawValue::get)
    }

    /// The application this Snapshot belongs to. Empty when unset.
    pub fn application(&self) -> Result<String, serde_json::Error> {
        serde_json::from_str::<ApplicationField>(self.raw_spec()).map(|f| f.application)
    }

    pub fn components(&self) -> Result<Vec<Component>, serde_json::Error> {
        serde_json::from_str::<ComponentList>(self.raw_spec()).map(|c| c.components)
    }
}
