//! Zerowake Core Library
//!
//! Scale-to-zero control plane for function workloads. Provides the
//! desired-state store, workload projector, drift-correcting reconciler,
//! single-flight scale controller and admission gateway, on top of an
//! orchestration backend (in-memory, or Kubernetes with the `kube` feature).

pub mod backoff;
pub mod config;
pub mod error;
pub mod gateway;
#[cfg(feature = "kube")]
pub mod k8s;
pub mod lock;
pub mod memory;
pub mod objects;
pub mod orchestrator;
pub mod plane;
pub mod projector;
pub mod reconciler;
pub mod scale;
pub mod spec;
pub mod status;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use backoff::BackoffPolicy;
pub use config::{Config, ConfigLoader, GatewayConfig, ReconcilerConfig, RuntimeSettings};
pub use error::{
    HardValidationError, InvokeError, OrchestrationError, ReconcileError, ZeroWakeError,
    ZeroWakeResult,
};
pub use gateway::{AdmissionGateway, Forwarder, HttpForwarder, Invocation, InvocationResponse};
pub use lock::{ReadyEndpoint, ScaleState};
pub use memory::InMemoryOrchestrator;
pub use orchestrator::OrchestrationApi;
pub use plane::ControlPlane;
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use scale::{ScaleController, ScaleSettings};
pub use spec::{FunctionSpec, RawFunctionSpec};
pub use status::{FunctionStatus, StatusReport};
pub use store::{Condition, DesiredStateStore, Phase};
pub use types::{FunctionId, Port, ReplicaBounds, ResourceLimits, RuntimeTag};
