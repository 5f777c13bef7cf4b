/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/bin/policy_lookup.rs
*
* Debugging aid for the policy resolution chain. Fetches a Snapshot from the
* cluster, resolves the policy that the launcher would use for it and prints
* the reference. Optionally prints a public key read from a Secret as well.
*
* Usage:
*   policy_lookup <snapshot-name> <namespace> [<secret-namespace>/<secret-name> [key]]
*
* SPDX-License-Identifier: Apache-2.0
*/

use anyhow::{bail, Context as _};
use kube::{
    api::{Api, ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use taskrun_launcher::{
    cluster::KubeCluster,
    event::{Snapshot, SNAPSHOT_KIND},
    resolver::{find_public_key, PolicyResolver},
};
use std::sync::Arc;

const DEFAULT_PUBLIC_KEY: &str = "cosign.pub";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        bail!("Usage: policy_lookup <snapshot-name> <namespace> [<secret-namespace>/<secret-name> [key]]");
    }
    let (snapshot_name, namespace) = (&args[1], &args[2]);

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let cluster = Arc::new(KubeCluster::new(client.clone()));

    let gvk = GroupVersionKind::gvk("appstudio.redhat.com", "v1alpha1", SNAPSHOT_KIND);
    let snapshots: Api<DynamicObject> = Api::namespaced_with(client, namespace, &ApiResource::from_gvk(&gvk));
    let object = snapshots
        .get(snapshot_name)
        .await
        .with_context(|| format!("failed to get snapshot {namespace}/{snapshot_name}"))?;
    println!("Found snapshot: {snapshot_name}");

    let spec = object
        .data
        .get("spec")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    let snapshot = Snapshot::new(
        snapshot_name.as_str(),
        namespace.as_str(),
        serde_json::value::to_raw_value(&spec)?,
    );
    let application = snapshot
        .application()
        .context("failed to extract application from spec")?;
    println!("Application name: {application}");

    let policy = PolicyResolver::new(cluster.clone())
        .resolve(&application, namespace)
        .await
        .context("failed to resolve policy")?;
    println!("Found policy: {policy}");

    if let Some(secret) = args.get(3) {
        let Some((secret_namespace, secret_name)) = secret.split_once('/') else {
            bail!("secret must be given as <namespace>/<name>, got {secret}");
        };
        let key = args.get(4).map_or(DEFAULT_PUBLIC_KEY, String::as_str);
        let public_key = find_public_key(cluster.as_ref(), secret_namespace, secret_name, key).await?;
        println!("Public key ({key}):\n{public_key}");
    }

    Ok(())
}
