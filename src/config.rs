/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/config.rs
*
* The per-namespace launcher configuration, read from the `taskrun-config`
* ConfigMap. Every value is kept as the string found in the ConfigMap, since
* several of them are forwarded to the TaskRun verbatim. Numeric tunables are
* interpreted on demand through accessors that fall back to the built-in
* defaults whenever a value is missing, non-numeric or not positive.
*
* SPDX-License-Identifier: Apache-2.0
*/

use crate::crds::ComputeResources;
use crate::resilience::ResiliencePolicy;
use k8s_openapi::api::core::v1::ConfigMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_TEKTON_TIMEOUT_SECONDS: u64 = 5;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_DELAY_SECONDS: u64 = 2;
pub const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 5;
pub const DEFAULT_CIRCUIT_BREAKER_TIMEOUT_SECONDS: u64 = 30;

/// Settings for one namespace. Immutable once built; the cache replaces it
/// wholesale on refresh.
///
/// `POLICY_CONFIGURATION`, `CACHE_TTL_MINUTES`, `VSA_EXPIRATION_HOURS`,
/// `K8S_RETRY_ATTEMPTS` and `K8S_RETRY_DELAY_SECONDS` are read so that
/// existing ConfigMaps keep round-tripping, but the launcher does not act on
/// them. The policy always comes from the ReleasePlanAdmission chain and the
/// cache TTL from the process settings (`CACHE_TTL_MINUTES` in the
/// environment).
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ConfigurationRecord {
    // Verification
    /// Not used; see the type docs.
    #[serde(rename = "POLICY_CONFIGURATION")]
    pub policy_configuration: String,
    #[serde(rename = "PUBLIC_KEY")]
    pub public_key: String,
    #[serde(rename = "IGNORE_REKOR")]
    pub ignore_rekor: String,
    #[serde(rename = "VSA_SIGNING_KEY_SECRET_NAME")]
    pub vsa_signing_key_secret_name: String,
    #[serde(rename = "VSA_UPLOAD_URL")]
    pub vsa_upload_url: String,
    #[serde(rename = "TASK_NAME")]
    pub task_name: String,

    // Behaviour of the verification task
    #[serde(rename = "STRICT")]
    pub strict: String,
    #[serde(rename = "WORKERS")]
    pub workers: String,
    #[serde(rename = "DEBUG")]
    pub debug: String,

    // Operational
    /// Not used; the TTL is a process setting.
    #[serde(rename = "CACHE_TTL_MINUTES")]
    pub cache_ttl_minutes: String,
    #[serde(rename = "TEKTON_TIMEOUT_SECONDS")]
    pub tekton_timeout_seconds: String,
    /// Not used.
    #[serde(rename = "VSA_EXPIRATION_HOURS")]
    pub vsa_expiration_hours: String,

    // Resilience
    #[serde(rename = "TEKTON_RETRY_ATTEMPTS")]
    pub tekton_retry_attempts: String,
    #[serde(rename = "TEKTON_RETRY_DELAY_SECONDS")]
    pub tekton_retry_delay_seconds: String,
    /// Not used; cluster reads are not retried.
    #[serde(rename = "K8S_RETRY_ATTEMPTS")]
    pub k8s_retry_attempts: String,
    /// Not used.
    #[serde(rename = "K8S_RETRY_DELAY_SECONDS")]
    pub k8s_retry_delay_seconds: String,
    #[serde(rename = "CIRCUIT_BREAKER_THRESHOLD")]
    pub circuit_breaker_threshold: String,
    #[serde(rename = "CIRCUIT_BREAKER_TIMEOUT_SECONDS")]
    pub circuit_breaker_timeout_seconds: String,

    // Resources of the verification pod
    #[serde(rename = "TASK_CPU_REQUEST")]
    pub task_cpu_request: String,
    #[serde(rename = "TASK_MEMORY_REQUEST")]
    pub task_memory_request: String,
    #[serde(rename = "TASK_MEMORY_LIMIT")]
    pub task_memory_limit: String,
}

/// Parses a strictly positive integer, or returns `default`.
fn positive_or<T>(value: &str, default: T) -> T
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed > T::default() => parsed,
        _ => default,
    }
}

impl ConfigurationRecord {
    /// Builds a record from raw ConfigMap data. Unknown keys are ignored and
    /// missing keys read as empty strings.
    pub fn from_data(data: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| data.get(key).cloned().unwrap_or_default();
        Self {
            policy_configuration: get("POLICY_CONFIGURATION"),
            public_key: get("PUBLIC_KEY"),
            ignore_rekor: get("IGNORE_REKOR"),
            vsa_signing_key_secret_name: get("VSA_SIGNING_KEY_SECRET_NAME"),
            vsa_upload_url: get("VSA_UPLOAD_URL"),
            task_name: get("TASK_NAME"),
            strict: get("STRICT"),
            workers: get("WORKERS"),
            debug: get("DEBUG"),
            cache_ttl_minutes: get("CACHE_TTL_MINUTES"),
            tekton_timeout_seconds: get("TEKTON_TIMEOUT_SECONDS"),
            vsa_expiration_hours: get("VSA_EXPIRATION_HOURS"),
            tekton_retry_attempts: get("TEKTON_RETRY_ATTEMPTS"),
            tekton_retry_delay_seconds: get("TEKTON_RETRY_DELAY_SECONDS"),
            k8s_retry_attempts: get("K8S_RETRY_ATTEMPTS"),
            k8s_retry_delay_seconds: get("K8S_RETRY_DELAY_SECONDS"),
            circuit_breaker_threshold: get("CIRCUIT_BREAKER_THRESHOLD"),
            circuit_breaker_timeout_seconds: get("CIRCUIT_BREAKER_TIMEOUT_SECONDS"),
            task_cpu_request: get("TASK_CPU_REQUEST"),
            task_memory_request: get("TASK_MEMORY_REQUEST"),
            task_memory_limit: get("TASK_MEMORY_LIMIT"),
        }
    }

    pub fn from_config_map(cm: &ConfigMap) -> Self {
        match &cm.data {
            Some(data) => Self::from_data(data),
            None => Self::default(),
        }
    }

    /// Deadline for a single TaskRun submission.
    pub fn tekton_timeout(&self) -> Duration {
        Duration::from_secs(positive_or(&self.tekton_timeout_seconds, DEFAULT_TEKTON_TIMEOUT_SECONDS))
    }

    pub fn retry_attempts(&self) -> u32 {
        positive_or(&self.tekton_retry_attempts, DEFAULT_RETRY_ATTEMPTS)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(positive_or(&self.tekton_retry_delay_seconds, DEFAULT_RETRY_DELAY_SECONDS))
    }

    pub fn circuit_breaker_threshold(&self) -> u32 {
        positive_or(&self.circuit_breaker_threshold, DEFAULT_CIRCUIT_BREAKER_THRESHOLD)
    }

    pub fn circuit_breaker_timeout(&self) -> Duration {
        Duration::from_secs(positive_or(
            &self.circuit_breaker_timeout_seconds,
            DEFAULT_CIRCUIT_BREAKER_TIMEOUT_SECONDS,
        ))
    }

    /// The retry/circuit-breaker policy that guards TaskRun submission.
    pub fn resilience_policy(&self) -> ResiliencePolicy {
        ResiliencePolicy {
            max_attempts: self.retry_attempts(),
            retry_delay: self.retry_delay(),
            failure_threshold: self.circuit_breaker_threshold(),
            open_timeout: self.circuit_breaker_timeout(),
            attempt_timeout: Some(self.tekton_timeout()),
        }
    }

    /// Requests and limits for the verification pod. `None` when no resource
    /// value is configured.
    pub fn compute_resources(&self) -> Option<ComputeResources> {
        let mut resources = ComputeResources::default();
        if !self.task_cpu_request.is_empty() {
            resources
                .requests
                .insert("cpu".to_string(), self.task_cpu_request.clone());
        }
        if !self.task_memory_request.is_empty() {
            resources
                .requests
                .insert("memory".to_string(), self.task_memory_request.clone());
        }
        if !self.task_memory_limit.is_empty() {
            resources
                .limits
                .insert("memory".to_string(), self.task_memory_limit.clone());
        }
        (!resources.is_empty()).then_some(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_data_reads_known_keys() {
        let record = ConfigurationRecord::from_data(&data(&[
            ("POLICY_CONFIGURATION", "ns/policy"),
            ("PUBLIC_KEY", "k8s://ns/cosign"),
            ("VSA_UPLOAD_URL", "rekor@https://rekor.example"),
            ("TASK_NAME", "verify-conforma"),
            ("WORKERS", "4"),
            ("SOMETHING_ELSE", "ignored"),
        ]));
        assert_eq!(record.policy_configuration, "ns/policy");
        assert_eq!(record.public_key, "k8s://ns/cosign");
        assert_eq!(record.vsa_upload_url, "rekor@https://rekor.example");
        assert_eq!(record.task_name, "verify-conforma");
        assert_eq!(record.workers, "4");
        assert_eq!(record.strict, "");
    }

    #[test]
    fn test_serde_uses_config_map_key_names() {
        let record: ConfigurationRecord = serde_json::from_value(serde_json::json!({
            "TASK_NAME": "verify",
            "CIRCUIT_BREAKER_THRESHOLD": "7"
        }))
        .unwrap();
        assert_eq!(record.task_name, "verify");
        assert_eq!(record.circuit_breaker_threshold(), 7);
    }

    #[test]
    fn test_from_data_matches_serialized_key_names() {
        let keys: Vec<String> = match serde_json::to_value(ConfigurationRecord::default()).unwrap() {
            serde_json::Value::Object(fields) => fields.keys().cloned().collect(),
            other => panic!("unexpected value: {other}"),
        };
        assert_eq!(keys.len(), 21);

        // Every key mapped to its own name must come back under that name.
        let pairs: Vec<(&str, &str)> = keys.iter().map(|k| (k.as_str(), k.as_str())).collect();
        let record = ConfigurationRecord::from_data(&data(&pairs));
        match serde_json::to_value(&record).unwrap() {
            serde_json::Value::Object(fields) => {
                for (key, value) in fields {
                    assert_eq!(value, serde_json::Value::String(key.clone()), "key {key}");
                }
            }
            other => panic!("unexpected value: {other}"),
        }
    }

    #[test]
    fn test_unused_keys_do_not_change_behaviour() {
        let record = ConfigurationRecord::from_data(&data(&[
            ("POLICY_CONFIGURATION", "ns/other-policy"),
            ("CACHE_TTL_MINUTES", "1"),
            ("VSA_EXPIRATION_HOURS", "1"),
            ("K8S_RETRY_ATTEMPTS", "9"),
            ("K8S_RETRY_DELAY_SECONDS", "9"),
        ]));
        assert_eq!(record.cache_ttl_minutes, "1");
        assert_eq!(record.k8s_retry_attempts, "9");
        assert_eq!(record.resilience_policy(), ConfigurationRecord::default().resilience_policy());
        assert_eq!(record.compute_resources(), None);
    }

    #[test]
    fn test_tunables_default_when_unset() {
        let record = ConfigurationRecord::default();
        let policy = record.resilience_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.retry_delay, Duration::from_secs(2));
        assert_eq!(policy.failure_threshold, 5);
        assert_eq!(policy.open_timeout, Duration::from_secs(30));
        assert_eq!(policy.attempt_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_tunables_ignore_invalid_values() {
        let record = ConfigurationRecord::from_data(&data(&[
            ("TEKTON_RETRY_ATTEMPTS", "0"),
            ("TEKTON_RETRY_DELAY_SECONDS", "-3"),
            ("TEKTON_TIMEOUT_SECONDS", "soon"),
            ("CIRCUIT_BREAKER_TIMEOUT_SECONDS", " 45 "),
        ]));
        assert_eq!(record.retry_attempts(), 3);
        assert_eq!(record.retry_delay(), Duration::from_secs(2));
        assert_eq!(record.tekton_timeout(), Duration::from_secs(5));
        assert_eq!(record.circuit_breaker_timeout(), Duration::from_secs(45));
    }

    #[test]
    fn test_compute_resources() {
        assert_eq!(ConfigurationRecord::default().compute_resources(), None);

        let record = ConfigurationRecord::from_data(&data(&[
            ("TASK_CPU_REQUEST", "500m"),
            ("TASK_MEMORY_LIMIT", "2Gi"),
        ]));
        let resources = record.compute_resources().unwrap();
        assert_eq!(resources.requests.get("cpu").map(String::as_str), Some("500m"));
        assert!(resources.requests.get("memory").is_none());
        assert_eq!(resources.limits.get("memory").map(String::as_str), Some("2Gi"));
    }
}
