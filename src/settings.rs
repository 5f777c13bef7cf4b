/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/settings.rs
*
* Process-level settings, read once from the environment at startup. These
* are distinct from the per-namespace `ConfigurationRecord`, which lives in a
* ConfigMap and is refreshed through the cache.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::builder::DEFAULT_SERVICE_ACCOUNT;
use std::env;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_METRICS_PORT: u16 = 9090;
pub const DEFAULT_CONFIG_MAP_NAME: &str = "taskrun-config";
pub const DEFAULT_CACHE_TTL_MINUTES: u64 = 5;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid {name}: {value:?} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Port of the event receiver.
    pub port: u16,
    pub metrics_port: u16,
    pub config_map_name: String,
    /// Fixed namespace of the launcher ConfigMap. When `None`, the ConfigMap
    /// is read from the namespace of each event.
    pub config_namespace: Option<String>,
    pub cache_ttl: Duration,
    pub service_account_name: String,
    pub jaeger_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            metrics_port: DEFAULT_METRICS_PORT,
            config_map_name: DEFAULT_CONFIG_MAP_NAME.to_string(),
            config_namespace: None,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_MINUTES * 60),
            service_account_name: DEFAULT_SERVICE_ACCOUNT.to_string(),
            jaeger_enabled: false,
        }
    }
}

fn parse_number<T>(name: &'static str, value: String) -> Result<T, SettingsError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| SettingsError::Invalid {
        name,
        reason: e.to_string(),
        value,
    })
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds settings from any variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut settings = Settings::default();

        if let Some(port) = get("PORT") {
            settings.port = parse_number("PORT", port)?;
        }
        if let Some(port) = get("METRICS_PORT") {
            settings.metrics_port = parse_number("METRICS_PORT", port)?;
        }
        if let Some(name) = get("CONFIG_MAP_NAME") {
            settings.config_map_name = name;
        }
        settings.config_namespace = get("CONFIG_NAMESPACE");
        if let Some(ttl) = get("CACHE_TTL_MINUTES") {
            let minutes: u64 = parse_number("CACHE_TTL_MINUTES", ttl.clone())?;
            if minutes == 0 {
                return Err(SettingsError::Invalid {
                    name: "CACHE_TTL_MINUTES",
                    value: ttl,
                    reason: "must be positive".to_string(),
                });
            }
            settings.cache_ttl = Duration::from_secs(minutes * 60);
        }
        if let Some(account) = get("SERVICE_ACCOUNT_NAME") {
            settings.service_account_name = account;
        }
        if let Some(enabled) = get("JAEGER_ENABLED") {
            settings.jaeger_enabled = match enabled.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(SettingsError::Invalid {
                        name: "JAEGER_ENABLED",
                        value: enabled,
                        reason: "expected true or false".to_string(),
                    })
                }
            };
        }

        Ok(settings)
    }
}
