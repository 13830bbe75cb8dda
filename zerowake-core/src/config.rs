// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Validates gateway, reconciler and runtime settings at boot-up time, plus
//! the optional list of functions used to seed the desired-state store.
//! Any invalid field results in a HardValidationError that prevents startup.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::backoff::BackoffPolicy;
use crate::error::{HardValidationError, ZeroWakeError, ZeroWakeResult};
use crate::spec::{FunctionSpec, RawFunctionSpec};
use crate::types::Port;

/// Raw gateway configuration.
#[derive(Debug, Deserialize)]
struct RawGatewayConfig {
    #[serde(default = "default_listen_port")]
    listen_port: u16,
    #[serde(default = "default_metrics_port")]
    metrics_port: u16,
    #[serde(default = "default_namespace")]
    namespace: String,
    #[serde(default = "default_scale_timeout_ms")]
    scale_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    poll_interval_ms: u64,
    #[serde(default = "default_forward_timeout_ms")]
    forward_timeout_ms: u64,
    #[serde(default = "default_forward_connect_timeout_ms")]
    forward_connect_timeout_ms: u64,
    #[serde(default = "default_idle_timeout_ms")]
    idle_timeout_ms: u64,
    #[serde(default = "default_ready_cache_ttl_ms")]
    ready_cache_ttl_ms: u64,
    #[serde(default = "default_confirm_samples")]
    confirm_samples: u32,
}

fn default_listen_port() -> u16 {
    8000
}

fn default_metrics_port() -> u16 {
    9100
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_scale_timeout_ms() -> u64 {
    60_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_forward_timeout_ms() -> u64 {
    10_000
}

fn default_forward_connect_timeout_ms() -> u64 {
    5_000
}

fn default_idle_timeout_ms() -> u64 {
    300_000
}

fn default_ready_cache_ttl_ms() -> u64 {
    2_000
}

fn default_confirm_samples() -> u32 {
    2
}

impl Default for RawGatewayConfig {
    fn default() -> Self {
        Self {
            listen_port: default_listen_port(),
            metrics_port: default_metrics_port(),
            namespace: default_namespace(),
            scale_timeout_ms: default_scale_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            forward_timeout_ms: default_forward_timeout_ms(),
            forward_connect_timeout_ms: default_forward_connect_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            ready_cache_ttl_ms: default_ready_cache_ttl_ms(),
            confirm_samples: default_confirm_samples(),
        }
    }
}

/// Raw reconciler configuration.
#[derive(Debug, Deserialize)]
struct RawReconcilerConfig {
    #[serde(default = "default_resync_interval_ms")]
    resync_interval_ms: u64,
    #[serde(default = "default_backoff_initial_ms")]
    backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    backoff_max_ms: u64,
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
}

fn default_resync_interval_ms() -> u64 {
    30_000
}

fn default_backoff_initial_ms() -> u64 {
    200
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    8
}

impl Default for RawReconcilerConfig {
    fn default() -> Self {
        Self {
            resync_interval_ms: default_resync_interval_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Raw runtime (workload image) configuration.
#[derive(Debug, Deserialize)]
struct RawRuntimeConfig {
    #[serde(default = "default_runtime_image")]
    image: String,
    #[serde(default = "default_service_port")]
    service_port: u16,
}

fn default_runtime_image() -> String {
    "faas-python-runner:latest".to_string()
}

fn default_service_port() -> u16 {
    8080
}

impl Default for RawRuntimeConfig {
    fn default() -> Self {
        Self {
            image: default_runtime_image(),
            service_port: default_service_port(),
        }
    }
}

/// Raw root configuration file.
#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    gateway: RawGatewayConfig,
    #[serde(default)]
    reconciler: RawReconcilerConfig,
    #[serde(default)]
    runtime: RawRuntimeConfig,
    #[serde(default)]
    functions: Vec<RawFunctionSpec>,
}

/// Validated gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen_port: Port,
    pub metrics_port: Port,
    pub namespace: String,
    /// Deadline for one scale-up episode.
    pub scale_timeout: Duration,
    /// Interval between ready-replica reads. Bounds how stale a readiness
    /// decision can be and how far past the deadline a timeout can land.
    pub poll_interval: Duration,
    pub forward_timeout: Duration,
    pub forward_connect_timeout: Duration,
    /// Inactivity threshold after which a zero-scalable function is scaled to 0.
    pub idle_timeout: Duration,
    /// How long a positive readiness read is trusted on the fast path.
    pub ready_cache_ttl: Duration,
    /// Reads required before a "0 ready replicas" sample is trusted.
    pub confirm_samples: u32,
}

/// Validated reconciler configuration.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub resync_interval: Duration,
    pub backoff: BackoffPolicy,
}

/// Validated runtime configuration consumed by the projector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub image: String,
    pub service_port: Port,
    pub namespace: String,
}

/// Complete validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub reconciler: ReconcilerConfig,
    pub runtime: RuntimeSettings,
    pub functions: Vec<FunctionSpec>,
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> ZeroWakeResult<Config> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ZeroWakeError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ZeroWakeError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> ZeroWakeResult<Config> {
        let raw: RawConfig =
            serde_yaml::from_str(content).map_err(|e| ZeroWakeError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Self::validate(raw)
    }

    /// Load a standalone list of function specs (the `zw apply` input format).
    pub fn load_functions(path: impl AsRef<Path>) -> ZeroWakeResult<Vec<FunctionSpec>> {
        #[derive(Deserialize)]
        struct RawFunctionsFile {
            functions: Vec<RawFunctionSpec>,
        }

        let path = path.as_ref();
        if !path.exists() {
            return Err(ZeroWakeError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| ZeroWakeError::Io {
            context: "reading functions file",
            source: e,
        })?;
        let raw: RawFunctionsFile =
            serde_yaml::from_str(&content).map_err(|e| ZeroWakeError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?;

        Ok(Self::validate_functions(raw.functions)?)
    }

    fn validate(raw: RawConfig) -> ZeroWakeResult<Config> {
        let gateway = Self::validate_gateway(raw.gateway)?;
        let reconciler = Self::validate_reconciler(raw.reconciler)?;
        let runtime = Self::validate_runtime(raw.runtime, &gateway.namespace)?;
        let functions = Self::validate_functions(raw.functions)?;

        Ok(Config {
            gateway,
            reconciler,
            runtime,
            functions,
        })
    }

    fn validate_gateway(raw: RawGatewayConfig) -> Result<GatewayConfig, HardValidationError> {
        let listen_port = Port::new(raw.listen_port)?;
        let metrics_port = Port::new(raw.metrics_port)?;

        if listen_port == metrics_port {
            return Err(HardValidationError::InvalidPort {
                port: metrics_port.value(),
                reason: "metrics_port must differ from listen_port".to_string(),
            });
        }

        if raw.namespace.trim().is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "namespace",
                value: raw.namespace,
                reason: "Namespace cannot be empty".to_string(),
            });
        }

        for (field, value) in [
            ("scale_timeout_ms", raw.scale_timeout_ms),
            ("poll_interval_ms", raw.poll_interval_ms),
            ("forward_timeout_ms", raw.forward_timeout_ms),
            ("forward_connect_timeout_ms", raw.forward_connect_timeout_ms),
            ("idle_timeout_ms", raw.idle_timeout_ms),
        ] {
            if value == 0 {
                return Err(HardValidationError::InvalidFieldValue {
                    field,
                    value: "0".to_string(),
                    reason: "Must be greater than 0".to_string(),
                });
            }
        }

        if raw.poll_interval_ms >= raw.scale_timeout_ms {
            return Err(HardValidationError::InvalidFieldValue {
                field: "poll_interval_ms",
                value: raw.poll_interval_ms.to_string(),
                reason: format!(
                    "Must be shorter than scale_timeout_ms ({})",
                    raw.scale_timeout_ms
                ),
            });
        }

        if raw.confirm_samples == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "confirm_samples",
                value: "0".to_string(),
                reason: "At least one sample is required".to_string(),
            });
        }

        Ok(GatewayConfig {
            listen_port,
            metrics_port,
            namespace: raw.namespace,
            scale_timeout: Duration::from_millis(raw.scale_timeout_ms),
            poll_interval: Duration::from_millis(raw.poll_interval_ms),
            forward_timeout: Duration::from_millis(raw.forward_timeout_ms),
            forward_connect_timeout: Duration::from_millis(raw.forward_connect_timeout_ms),
            idle_timeout: Duration::from_millis(raw.idle_timeout_ms),
            ready_cache_ttl: Duration::from_millis(raw.ready_cache_ttl_ms),
            confirm_samples: raw.confirm_samples,
        })
    }

    fn validate_reconciler(
        raw: RawReconcilerConfig,
    ) -> Result<ReconcilerConfig, HardValidationError> {
        if raw.resync_interval_ms == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "resync_interval_ms",
                value: "0".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if raw.backoff_initial_ms == 0 || raw.backoff_initial_ms > raw.backoff_max_ms {
            return Err(HardValidationError::InvalidFieldValue {
                field: "backoff_initial_ms",
                value: raw.backoff_initial_ms.to_string(),
                reason: format!(
                    "Must be between 1 and backoff_max_ms ({})",
                    raw.backoff_max_ms
                ),
            });
        }

        if raw.max_attempts == 0 {
            return Err(HardValidationError::InvalidFieldValue {
                field: "max_attempts",
                value: "0".to_string(),
                reason: "At least one attempt is required".to_string(),
            });
        }

        Ok(ReconcilerConfig {
            resync_interval: Duration::from_millis(raw.resync_interval_ms),
            backoff: BackoffPolicy::new(
                Duration::from_millis(raw.backoff_initial_ms),
                Duration::from_millis(raw.backoff_max_ms),
                raw.max_attempts,
            ),
        })
    }

    fn validate_runtime(
        raw: RawRuntimeConfig,
        namespace: &str,
    ) -> Result<RuntimeSettings, HardValidationError> {
        if raw.image.trim().is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "runtime.image",
                value: raw.image,
                reason: "Runtime image cannot be empty".to_string(),
            });
        }

        Ok(RuntimeSettings {
            image: raw.image,
            service_port: Port::new(raw.service_port)?,
            namespace: namespace.to_string(),
        })
    }

    fn validate_functions(
        raw: Vec<RawFunctionSpec>,
    ) -> Result<Vec<FunctionSpec>, HardValidationError> {
        let mut functions = Vec::with_capacity(raw.len());
        let mut seen_ids = HashSet::new();

        for raw_func in raw {
            let func = FunctionSpec::from_raw(raw_func)?;

            if !seen_ids.insert(func.id.clone()) {
                return Err(HardValidationError::DuplicateFunctionId {
                    id: func.id.to_string(),
                });
            }

            functions.push(func);
        }

        Ok(functions)
    }
}
