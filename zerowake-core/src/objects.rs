// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Platform object model.
//!
//! Backend-neutral descriptions of the objects derived from a FunctionSpec:
//! the workload (Deployment), its stable endpoint (Service), the code object
//! (ConfigMap) and the optional CPU autoscaler (HorizontalPodAutoscaler).
//! Each object knows which fields the projector controls, so drift can be
//! corrected without touching fields owned by someone else.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{FunctionId, ResourceLimits};

pub const LABEL_NAME: &str = "app.kubernetes.io/name";
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";
pub const LABEL_FUNCTION: &str = "faas.zerowake.io/function";
pub const ANNOTATION_CODE_HASH: &str = "faas.zerowake.io/code-sha256";

pub const MANAGER_NAME: &str = "zerowake";
pub const CODE_MOUNT_PATH: &str = "/var/faas/function";
pub const CODE_FILE_NAME: &str = "handler.py";

/// Names of every object derived from one function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNames {
    pub workload: String,
    pub endpoint: String,
    pub code: String,
    pub autoscaler: String,
}

impl ObjectNames {
    pub fn for_function(id: &FunctionId) -> Self {
        let workload = format!("fn-{}-deploy", id);
        Self {
            autoscaler: format!("{}-hpa", workload),
            workload,
            endpoint: format!("fn-{}-svc", id),
            code: format!("fn-{}-code", id),
        }
    }
}

/// Object kinds managed by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    Workload,
    Endpoint,
    Code,
    Autoscaler,
}

impl ObjectKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Workload => "workload",
            Self::Endpoint => "endpoint",
            Self::Code => "code",
            Self::Autoscaler => "autoscaler",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pod template fields the projector controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerTemplate {
    pub image: String,
    pub port: u16,
    pub env: BTreeMap<String, String>,
    pub resources: ResourceLimits,
    /// Name of the code object mounted at [`CODE_MOUNT_PATH`].
    pub code_volume: String,
    /// sha256 of the function code, stamped on the pod template so a code
    /// change rolls the workload.
    pub code_hash: String,
}

/// Deployment-like workload object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadObject {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Desired replica count. Only honoured on creation; afterwards it is
    /// owned by the autoscaler or the scale controller.
    pub replicas: u32,
    pub template: ContainerTemplate,
}

/// Patch of projector-controlled workload fields. Never carries replicas.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkloadPatch {
    pub labels: Option<BTreeMap<String, String>>,
    pub template: Option<ContainerTemplate>,
}

impl WorkloadPatch {
    pub fn is_empty(&self) -> bool {
        self.labels.is_none() && self.template.is_none()
    }

    pub fn apply_to(&self, workload: &mut WorkloadObject) {
        if let Some(labels) = &self.labels {
            workload.labels = labels.clone();
        }
        if let Some(template) = &self.template {
            workload.template = template.clone();
        }
    }
}

impl WorkloadObject {
    /// Function this workload was derived from, read back from its labels.
    pub fn function_id(&self) -> Option<FunctionId> {
        function_from_labels(&self.labels)
    }

    /// Fields that differ from `expected`, replicas excluded.
    pub fn diff(&self, expected: &WorkloadObject) -> Option<WorkloadPatch> {
        let patch = WorkloadPatch {
            labels: (self.labels != expected.labels).then(|| expected.labels.clone()),
            template: (self.template != expected.template).then(|| expected.template.clone()),
        };
        (!patch.is_empty()).then_some(patch)
    }
}

/// Service-like stable endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointObject {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub selector: BTreeMap<String, String>,
    pub port: u16,
    pub target_port: u16,
    /// Assigned by the platform; immutable once set.
    pub cluster_ip: Option<String>,
    /// URL the admission gateway forwards to.
    pub address: String,
}

impl EndpointObject {
    /// Whether any projector-controlled field differs from `expected`.
    /// Platform-owned fields (cluster IP, resolved address) are ignored.
    pub fn drifted_from(&self, expected: &EndpointObject) -> bool {
        self.labels != expected.labels
            || self.selector != expected.selector
            || self.port != expected.port
            || self.target_port != expected.target_port
    }
}

/// ConfigMap-like object holding the function source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeObject {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub data: BTreeMap<String, String>,
}

/// CPU autoscaler policy for functions that never scale to zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoscalerObject {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    /// Workload the autoscaler drives.
    pub target: String,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub cpu_utilization: u32,
}

/// Replica status read back from the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WorkloadStatus {
    pub desired_replicas: u32,
    pub ready_replicas: u32,
}

/// Change observed on a managed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectChange {
    Modified,
    Deleted,
}

/// Watch event emitted by backends that can observe drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEvent {
    pub kind: ObjectKind,
    pub name: String,
    pub function_id: Option<FunctionId>,
    pub change: ObjectChange,
}

pub fn function_from_labels(labels: &BTreeMap<String, String>) -> Option<FunctionId> {
    labels
        .get(LABEL_FUNCTION)
        .and_then(|value| FunctionId::new(value.as_str()).ok())
}
