/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/telemetry.rs
*
* Logging and tracing setup shared by the binaries: an `EnvFilter` driven by
* `RUST_LOG` (default `info`), JSON-formatted output, and an optional Jaeger
* exporter through `tracing-opentelemetry`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use opentelemetry::global;
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const SERVICE_NAME: &str = "taskrun-launcher";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("failed to install Jaeger pipeline: {0}")]
    Tracer(#[from] opentelemetry::trace::TraceError),

    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}

/// Flushes and shuts down the Jaeger exporter when dropped.
pub struct TelemetryGuard {
    jaeger: bool,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.jaeger {
            global::shutdown_tracer_provider();
        }
    }
}

/// Installs the global subscriber. Must be called from within a tokio
/// runtime when `jaeger` is set.
pub fn init_telemetry(jaeger: bool) -> Result<TelemetryGuard, TelemetryError> {
    let telemetry = if jaeger {
        let tracer = opentelemetry_jaeger::new_agent_pipeline()
            .with_service_name(SERVICE_NAME)
            .install_batch(opentelemetry_sdk::runtime::Tokio)?;
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().json();

    tracing_subscriber::registry()
        .with(filter)
        .with(telemetry)
        .with(fmt_layer)
        .try_init()?;

    Ok(TelemetryGuard { jaeger })
}
