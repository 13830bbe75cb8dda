// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Abstract orchestration API.
//!
//! The reconciler, scale controller and admission gateway only talk to the
//! platform through [`OrchestrationApi`]. Backends:
//! - `InMemoryOrchestrator`: process-local simulation used by `zw up --backend memory` and tests
//! - `KubeOrchestrator`: Kubernetes Deployments/Services/ConfigMaps/HPAs (feature-gated behind `kube`)

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::OrchestrationResult;
use crate::objects::{
    AutoscalerObject, CodeObject, EndpointObject, ObjectEvent, WorkloadObject, WorkloadPatch,
    WorkloadStatus,
};

/// Platform operations used by the control plane.
///
/// `get_*` return `Ok(None)` for missing objects. `delete_*` on a missing
/// object returns `OrchestrationError::NotFound`; callers that only want the
/// object gone treat that as success.
#[async_trait]
pub trait OrchestrationApi: Send + Sync {
    async fn get_code(&self, name: &str) -> OrchestrationResult<Option<CodeObject>>;
    async fn create_code(&self, code: &CodeObject) -> OrchestrationResult<()>;
    async fn replace_code(&self, code: &CodeObject) -> OrchestrationResult<()>;
    async fn delete_code(&self, name: &str) -> OrchestrationResult<()>;

    async fn get_workload(&self, name: &str) -> OrchestrationResult<Option<WorkloadObject>>;
    async fn create_workload(&self, workload: &WorkloadObject) -> OrchestrationResult<()>;
    /// Patch projector-controlled fields. Replicas are left untouched.
    async fn patch_workload(&self, name: &str, patch: &WorkloadPatch) -> OrchestrationResult<()>;
    async fn delete_workload(&self, name: &str) -> OrchestrationResult<()>;

    async fn get_endpoint(&self, name: &str) -> OrchestrationResult<Option<EndpointObject>>;
    async fn create_endpoint(&self, endpoint: &EndpointObject) -> OrchestrationResult<()>;
    /// Replace an endpoint's spec. The platform-assigned cluster IP is preserved.
    async fn replace_endpoint(&self, endpoint: &EndpointObject) -> OrchestrationResult<()>;
    async fn delete_endpoint(&self, name: &str) -> OrchestrationResult<()>;

    async fn get_autoscaler(&self, name: &str) -> OrchestrationResult<Option<AutoscalerObject>>;
    async fn create_autoscaler(&self, autoscaler: &AutoscalerObject) -> OrchestrationResult<()>;
    async fn replace_autoscaler(&self, autoscaler: &AutoscalerObject)
        -> OrchestrationResult<()>;
    async fn delete_autoscaler(&self, name: &str) -> OrchestrationResult<()>;

    /// Set the desired replica count through the scale subresource.
    async fn scale_workload(&self, name: &str, replicas: u32) -> OrchestrationResult<()>;

    /// Desired and ready replica counts. `NotFound` if the workload is missing.
    async fn workload_status(&self, name: &str) -> OrchestrationResult<WorkloadStatus>;

    /// Change notifications for managed objects, if the backend can watch.
    /// Backends without a watch return `None` and rely on periodic resync.
    fn subscribe(&self) -> Option<broadcast::Receiver<ObjectEvent>> {
        None
    }

    /// Backend name for logs.
    fn name(&self) -> &'static str;
}
