//! Custom error types for zerowake.
//!
//! Explicit enum error types only. No `Box<dyn Error>`, no `anyhow::Result`:
//! every failure the control plane can produce is a named variant so callers
//! can map it onto a distinct response.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::FunctionId;

/// Top-level error type for the zerowake control plane.
#[derive(Debug, Error)]
pub enum ZeroWakeError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Desired-State Errors
    // =========================================================================
    #[error("Function not found: {0}")]
    FunctionNotFound(FunctionId),

    #[error("Invalid scale state transition: {0}")]
    InvalidStateTransition(#[from] StateTransitionError),

    // =========================================================================
    // Control Plane Errors
    // =========================================================================
    #[error("Orchestration error: {0}")]
    Orchestration(#[from] OrchestrationError),

    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Invocation error: {0}")]
    Invoke(#[from] InvokeError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Hard validation errors reject a configuration or a FunctionSpec outright.
/// They are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HardValidationError {
    #[error("Missing required field: {field} in {context}")]
    MissingRequiredField {
        field: &'static str,
        context: String,
    },

    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid replica bounds: min {min}, max {max} - {reason}")]
    InvalidReplicaBounds { min: u32, max: u32, reason: String },

    #[error("Invalid port: {port} - {reason}")]
    InvalidPort { port: u16, reason: String },

    #[error("Duplicate function ID: {id}")]
    DuplicateFunctionId { id: String },
}

/// State transition errors for the per-function scale lock.
#[derive(Debug, Error)]
pub enum StateTransitionError {
    #[error("Cannot transition from {from} to {to} for function {function_id}")]
    InvalidTransition {
        function_id: FunctionId,
        from: &'static str,
        to: &'static str,
    },
}

/// Failures reported by the orchestration platform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrchestrationError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("Conflict on {kind} '{name}': {reason}")]
    Conflict {
        kind: &'static str,
        name: String,
        reason: String,
    },

    #[error("Transient failure during {operation}: {reason}")]
    Transient {
        operation: &'static str,
        reason: String,
    },

    #[error("Platform rejected {operation}: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },
}

impl OrchestrationError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. } | Self::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

/// Drift-correction failures. Surfaced as a status condition, never a crash.
#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    #[error("Orchestration call failed: {0}")]
    Orchestration(#[from] OrchestrationError),

    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

/// Caller-visible invocation errors.
///
/// `Clone` because a single scale-up episode outcome is delivered to every
/// waiter registered for that episode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    #[error("Function not found: {0}")]
    FunctionNotFound(FunctionId),

    #[error("Function {function_id} did not become ready within {waited_ms}ms")]
    ScaleTimeout {
        function_id: FunctionId,
        waited_ms: u64,
    },

    #[error("Scaling function {function_id} failed: {reason}")]
    ScaleError {
        function_id: FunctionId,
        reason: String,
    },

    #[error("Upstream call to function {function_id} failed: {reason}")]
    UpstreamError {
        function_id: FunctionId,
        reason: String,
    },
}

impl InvokeError {
    /// Stable kind label used in logs, metrics and HTTP error bodies.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::FunctionNotFound(_) => "FunctionNotFound",
            Self::ScaleTimeout { .. } => "ScaleTimeout",
            Self::ScaleError { .. } => "ScaleError",
            Self::UpstreamError { .. } => "UpstreamError",
        }
    }
}

/// Result type alias using ZeroWakeError.
pub type ZeroWakeResult<T> = Result<T, ZeroWakeError>;

/// Result type alias for orchestration calls.
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hard_validation_error_display() {
        let err = HardValidationError::MissingRequiredField {
            field: "code",
            context: "function 'hello'".to_string(),
        };
        assert!(err.to_string().contains("code"));
        assert!(err.to_string().contains("hello"));
    }

    #[test]
    fn test_error_chain() {
        let validation_err = HardValidationError::InvalidPort {
            port: 0,
            reason: "Port must be non-zero".to_string(),
        };
        let err: ZeroWakeError = validation_err.into();
        assert!(matches!(err, ZeroWakeError::HardValidation(_)));

        let reconcile_err: ReconcileError = OrchestrationError::Transient {
            operation: "get_workload",
            reason: "connection reset".to_string(),
        }
        .into();
        let err: ZeroWakeError = reconcile_err.into();
        assert!(matches!(err, ZeroWakeError::Reconcile(_)));
    }

    #[test]
    fn test_transient_classification() {
        let transient = OrchestrationError::Transient {
            operation: "scale_workload",
            reason: "503".to_string(),
        };
        assert!(transient.is_transient());

        let rejected = OrchestrationError::Rejected {
            operation: "scale_workload",
            reason: "forbidden".to_string(),
        };
        assert!(!rejected.is_transient());

        let missing = OrchestrationError::NotFound {
            kind: "workload",
            name: "fn-hello-deploy".to_string(),
        };
        assert!(missing.is_not_found());
        assert!(!missing.is_transient());
    }

    #[test]
    fn test_invoke_error_kinds_are_distinct() {
        let id = FunctionId::new("hello").unwrap();
        let kinds = [
            InvokeError::FunctionNotFound(id.clone()).kind(),
            InvokeError::ScaleTimeout {
                function_id: id.clone(),
                waited_ms: 10,
            }
            .kind(),
            InvokeError::ScaleError {
                function_id: id.clone(),
                reason: "x".into(),
            }
            .kind(),
            InvokeError::UpstreamError {
                function_id: id,
                reason: "x".into(),
            }
            .kind(),
        ];
        let unique: std::collections::HashSet<_> = kinds.iter().collect();
        assert_eq!(unique.len(), 4);
    }
}
