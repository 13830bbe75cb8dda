// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Declared configuration of one servable function.
//!
//! A `FunctionSpec` can only be obtained through validation, either by
//! [`FunctionSpec::builder`] or by deserializing a raw document, so the
//! reconciler and scale controller never see an invalid spec.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;
use crate::types::{FunctionId, ReplicaBounds, ResourceLimits, RuntimeTag};

/// Environment variables set by the projector; user env may not override them.
pub const RESERVED_ENV_KEYS: &[&str] = &["FUNCTION_RUNTIME", "FUNCTION_CODE_PATH"];

/// Raw spec as received from YAML or the desired-state API (before validation).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawFunctionSpec {
    pub id: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default, alias = "min_replicas")]
    pub min_replicas: Option<u32>,
    #[serde(default, alias = "max_replicas")]
    pub max_replicas: Option<u32>,
    #[serde(default)]
    pub resources: Option<ResourceLimits>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Validated function specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawFunctionSpec", into = "RawFunctionSpec")]
pub struct FunctionSpec {
    pub id: FunctionId,
    /// Inline handler source injected into the workload.
    pub code: String,
    pub runtime: RuntimeTag,
    pub replicas: ReplicaBounds,
    pub resources: ResourceLimits,
    pub env: BTreeMap<String, String>,
}

impl FunctionSpec {
    /// Start building a spec for `id` with default resources and no env.
    pub fn builder(id: impl Into<String>) -> FunctionSpecBuilder {
        FunctionSpecBuilder {
            raw: RawFunctionSpec {
                id: id.into(),
                code: None,
                runtime: None,
                min_replicas: None,
                max_replicas: None,
                resources: None,
                env: BTreeMap::new(),
            },
        }
    }

    /// Validate a raw spec and convert it to validated types.
    pub fn from_raw(raw: RawFunctionSpec) -> Result<Self, HardValidationError> {
        let context = format!("function '{}'", raw.id);
        let id = FunctionId::new(raw.id)?;

        let code = match raw.code {
            Some(code) if !code.trim().is_empty() => code,
            Some(code) => {
                return Err(HardValidationError::InvalidFieldValue {
                    field: "code",
                    value: code,
                    reason: "Code must be a non-empty string".to_string(),
                })
            }
            None => {
                return Err(HardValidationError::MissingRequiredField {
                    field: "code",
                    context,
                })
            }
        };

        let runtime = match raw.runtime {
            Some(runtime) => RuntimeTag::new(runtime)?,
            None => {
                return Err(HardValidationError::MissingRequiredField {
                    field: "runtime",
                    context,
                })
            }
        };

        let max_replicas = raw
            .max_replicas
            .ok_or_else(|| HardValidationError::MissingRequiredField {
                field: "maxReplicas",
                context: context.clone(),
            })?;
        let replicas = ReplicaBounds::new(raw.min_replicas.unwrap_or(0), max_replicas)?;

        let resources = raw.resources.unwrap_or_default();
        resources.validate()?;

        for key in raw.env.keys() {
            if key.is_empty() {
                return Err(HardValidationError::InvalidFieldValue {
                    field: "env",
                    value: format!("empty key in {}", context),
                    reason: "Environment variable names cannot be empty".to_string(),
                });
            }
            if RESERVED_ENV_KEYS.contains(&key.as_str()) {
                return Err(HardValidationError::InvalidFieldValue {
                    field: "env",
                    value: key.clone(),
                    reason: "Environment variable is reserved for the workload runtime"
                        .to_string(),
                });
            }
        }

        Ok(Self {
            id,
            code,
            runtime,
            replicas,
            resources,
            env: raw.env,
        })
    }

    pub fn min_replicas(&self) -> u32 {
        self.replicas.min()
    }

    pub fn max_replicas(&self) -> u32 {
        self.replicas.max()
    }

    /// Zero-replica mode: the scale controller owns the replica count.
    pub fn is_zero_scalable(&self) -> bool {
        self.replicas.min() == 0
    }

    /// The external CPU autoscaler is installed only for `min >= 1, max > 1`.
    pub fn wants_autoscaler(&self) -> bool {
        self.replicas.min() >= 1 && self.replicas.max() > 1
    }
}

impl TryFrom<RawFunctionSpec> for FunctionSpec {
    type Error = HardValidationError;

    fn try_from(raw: RawFunctionSpec) -> Result<Self, Self::Error> {
        Self::from_raw(raw)
    }
}

impl From<FunctionSpec> for RawFunctionSpec {
    fn from(spec: FunctionSpec) -> Self {
        Self {
            id: spec.id.into(),
            code: Some(spec.code),
            runtime: Some(spec.runtime.into()),
            min_replicas: Some(spec.replicas.min()),
            max_replicas: Some(spec.replicas.max()),
            resources: Some(spec.resources),
            env: spec.env,
        }
    }
}

/// Builder used by tests and the CLI to assemble a spec programmatically.
#[derive(Debug, Clone)]
pub struct FunctionSpecBuilder {
    raw: RawFunctionSpec,
}

impl FunctionSpecBuilder {
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.raw.code = Some(code.into());
        self
    }

    pub fn runtime(mut self, runtime: impl Into<String>) -> Self {
        self.raw.runtime = Some(runtime.into());
        self
    }

    pub fn replicas(mut self, min: u32, max: u32) -> Self {
        self.raw.min_replicas = Some(min);
        self.raw.max_replicas = Some(max);
        self
    }

    pub fn resources(mut self, resources: ResourceLimits) -> Self {
        self.raw.resources = Some(resources);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.raw.env.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<FunctionSpec, HardValidationError> {
        FunctionSpec::from_raw(self.raw)
    }
}
