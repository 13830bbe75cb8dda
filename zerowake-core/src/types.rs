// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! Every type validates its invariants at construction, so a value that
//! exists is a value the control plane can project onto platform objects.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// Longest identifier whose derived object names (`fn-{id}-deploy-hpa`)
/// still fit in a 63 character DNS label.
pub const MAX_FUNCTION_ID_LEN: usize = 52;

/// Validated function identifier.
/// Lowercase alphanumerics and hyphens, starting and ending alphanumeric.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FunctionId(String);

impl FunctionId {
    /// Create a new FunctionId with validation.
    pub fn new(id: impl Into<String>) -> Result<Self, HardValidationError> {
        let id = id.into();

        if id.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "function_id",
                value: id,
                reason: "Function ID cannot be empty".to_string(),
            });
        }

        if id.len() > MAX_FUNCTION_ID_LEN {
            return Err(HardValidationError::InvalidFieldValue {
                field: "function_id",
                value: id.clone(),
                reason: format!(
                    "Function ID too long: {} chars (max {})",
                    id.len(),
                    MAX_FUNCTION_ID_LEN
                ),
            });
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(HardValidationError::InvalidFieldValue {
                field: "function_id",
                value: id,
                reason: "Function ID must contain only lowercase alphanumeric characters and hyphens".to_string(),
            });
        }

        if id.starts_with('-') || id.ends_with('-') {
            return Err(HardValidationError::InvalidFieldValue {
                field: "function_id",
                value: id,
                reason: "Function ID must start and end with an alphanumeric character"
                    .to_string(),
            });
        }

        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for FunctionId {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FunctionId> for String {
    fn from(id: FunctionId) -> Self {
        id.0
    }
}

/// Validated network port.
/// Must be in range 1-65535 (0 is reserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Port(u16);

impl Port {
    /// Create a new Port with validation.
    pub fn new(port: u16) -> Result<Self, HardValidationError> {
        if port == 0 {
            return Err(HardValidationError::InvalidPort {
                port,
                reason: "Port 0 is reserved and cannot be used".to_string(),
            });
        }
        Ok(Self(port))
    }

    /// Get the inner port value.
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for Port {
    type Error = HardValidationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Port> for u16 {
    fn from(port: Port) -> Self {
        port.0
    }
}

/// Validated replica bounds: `0 <= min <= max`, `max >= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawReplicaBounds", into = "RawReplicaBounds")]
pub struct ReplicaBounds {
    min: u32,
    max: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct RawReplicaBounds {
    #[serde(default)]
    min: u32,
    max: u32,
}

impl ReplicaBounds {
    /// Create new bounds with validation.
    pub fn new(min: u32, max: u32) -> Result<Self, HardValidationError> {
        if max < 1 {
            return Err(HardValidationError::InvalidReplicaBounds {
                min,
                max,
                reason: "maxReplicas must be >= 1".to_string(),
            });
        }
        if min > max {
            return Err(HardValidationError::InvalidReplicaBounds {
                min,
                max,
                reason: "minReplicas cannot exceed maxReplicas".to_string(),
            });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> u32 {
        self.min
    }

    pub fn max(&self) -> u32 {
        self.max
    }
}

impl TryFrom<RawReplicaBounds> for ReplicaBounds {
    type Error = HardValidationError;

    fn try_from(raw: RawReplicaBounds) -> Result<Self, Self::Error> {
        Self::new(raw.min, raw.max)
    }
}

impl From<ReplicaBounds> for RawReplicaBounds {
    fn from(bounds: ReplicaBounds) -> Self {
        Self {
            min: bounds.min,
            max: bounds.max,
        }
    }
}

impl fmt::Display for ReplicaBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.min, self.max)
    }
}

/// Runtime tag passed to the workload runtime, e.g. `python3.9`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RuntimeTag(String);

impl RuntimeTag {
    pub fn new(tag: impl Into<String>) -> Result<Self, HardValidationError> {
        let tag = tag.into();
        if tag.trim().is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "runtime",
                value: tag,
                reason: "Runtime must be a non-empty string, e.g. 'python3.9'".to_string(),
            });
        }
        Ok(Self(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuntimeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RuntimeTag {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RuntimeTag> for String {
    fn from(tag: RuntimeTag) -> Self {
        tag.0
    }
}

/// Container resource requests and limits, as platform quantity strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default = "default_cpu_request")]
    pub cpu_request: String,
    #[serde(default = "default_memory_request")]
    pub memory_request: String,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: String,
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
}

fn default_cpu_request() -> String {
    "50m".to_string()
}

fn default_memory_request() -> String {
    "64Mi".to_string()
}

fn default_cpu_limit() -> String {
    "500m".to_string()
}

fn default_memory_limit() -> String {
    "256Mi".to_string()
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_request: default_cpu_request(),
            memory_request: default_memory_request(),
            cpu_limit: default_cpu_limit(),
            memory_limit: default_memory_limit(),
        }
    }
}

impl ResourceLimits {
    /// Reject empty quantities. Quantity syntax itself is left to the platform.
    pub fn validate(&self) -> Result<(), HardValidationError> {
        let fields = [
            ("resources.cpu_request", &self.cpu_request),
            ("resources.memory_request", &self.memory_request),
            ("resources.cpu_limit", &self.cpu_limit),
            ("resources.memory_limit", &self.memory_limit),
        ];
        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(HardValidationError::InvalidFieldValue {
                    field,
                    value: value.clone(),
                    reason: "Resource quantity cannot be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_id_valid() {
        assert!(FunctionId::new("hello").is_ok());
        assert!(FunctionId::new("my-function-2").is_ok());
        assert!(FunctionId::new("a".repeat(MAX_FUNCTION_ID_LEN)).is_ok());
    }

    #[test]
    fn test_function_id_invalid() {
        assert!(FunctionId::new("").is_err());
        assert!(FunctionId::new("a".repeat(MAX_FUNCTION_ID_LEN + 1)).is_err());
        assert!(FunctionId::new("MyFunc").is_err());
        assert!(FunctionId::new("func_name").is_err());
        assert!(FunctionId::new("func name").is_err());
        assert!(FunctionId::new("-leading").is_err());
        assert!(FunctionId::new("trailing-").is_err());
    }

    #[test]
    fn test_function_id_serde() {
        let id: FunctionId = serde_json::from_str("\"hello\"").unwrap();
        assert_eq!(id.as_str(), "hello");
        assert!(serde_json::from_str::<FunctionId>("\"Bad_Id\"").is_err());
    }

    #[test]
    fn test_port() {
        assert!(Port::new(8080).is_ok());
        assert!(Port::new(0).is_err());
    }

    #[test]
    fn test_replica_bounds() {
        assert!(ReplicaBounds::new(0, 1).is_ok());
        assert!(ReplicaBounds::new(2, 5).is_ok());
        assert!(ReplicaBounds::new(3, 3).is_ok());
        assert!(ReplicaBounds::new(0, 0).is_err());
        assert!(ReplicaBounds::new(4, 2).is_err());
    }

    #[test]
    fn test_replica_bounds_serde_validates() {
        let bounds: ReplicaBounds = serde_yaml::from_str("min: 0\nmax: 3").unwrap();
        assert_eq!(bounds.min(), 0);
        assert_eq!(bounds.max(), 3);

        let defaulted: ReplicaBounds = serde_yaml::from_str("max: 2").unwrap();
        assert_eq!(defaulted.min(), 0);

        assert!(serde_yaml::from_str::<ReplicaBounds>("min: 5\nmax: 1").is_err());
    }

    #[test]
    fn test_runtime_tag() {
        assert!(RuntimeTag::new("python3.9").is_ok());
        assert!(RuntimeTag::new("  ").is_err());
    }

    #[test]
    fn test_resource_limits_defaults() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.cpu_request, "50m");
        assert_eq!(limits.memory_limit, "256Mi");
        assert!(limits.validate().is_ok());

        let empty = ResourceLimits {
            cpu_limit: String::new(),
            ..ResourceLimits::default()
        };
        assert!(empty.validate().is_err());
    }
}
