/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/lib.rs
*
* Library root of the TaskRun launcher. The service listens for Snapshot
* creation events, resolves the compliance policy that applies to the
* Snapshot's application through its ReleasePlan and ReleasePlanAdmission, and
* creates a verification TaskRun with that policy.
*
* Modules, leaves first:
* - `crds`, `event`: wire types.
* - `cluster`: the seams towards the Kubernetes API and Tekton.
* - `config`, `cache`: the per-namespace launcher configuration.
* - `resolver`: the ReleasePlan → ReleasePlanAdmission → policy chain.
* - `resilience`: circuit breaker and retries around TaskRun submission.
* - `builder`: TaskRun assembly.
* - `processor`: the per-event pipeline.
* - `server`, `metrics`, `settings`, `telemetry`: the service around it.
*
* SPDX-License-Identifier: Apache-2.0
*/

pub mod builder;
pub mod cache;
pub mod cluster;
pub mod config;
pub mod crds;
pub mod event;
pub mod metrics;
pub mod processor;
pub mod resilience;
pub mod resolver;
pub mod server;
pub mod settings;
pub mod telemetry;
