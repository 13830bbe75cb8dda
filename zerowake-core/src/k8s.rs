// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Kubernetes orchestration backend.
//!
//! Maps the platform object model onto Deployments, Services, ConfigMaps
//! and autoscaling/v2 HorizontalPodAutoscalers in one namespace. Manifests
//! are built as JSON and converted into typed objects; reads go the other
//! way so that field-level differences stay in the backend-neutral model.
//!
//! This backend has no watch; drift is picked up by periodic resync.

use std::collections::BTreeMap;

use ::kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use ::kube::Client;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::objects::{
    AutoscalerObject, CodeObject, ContainerTemplate, EndpointObject, ObjectKind,
    WorkloadObject, WorkloadPatch, WorkloadStatus, ANNOTATION_CODE_HASH, CODE_MOUNT_PATH,
};
use crate::orchestrator::OrchestrationApi;
use crate::types::ResourceLimits;

const CONTAINER_NAME: &str = "function";
const CODE_VOLUME_NAME: &str = "function-code";

/// Orchestrator backed by a Kubernetes API server.
pub struct KubeOrchestrator {
    client: Client,
    namespace: String,
}

impl KubeOrchestrator {
    /// Connect using the ambient kubeconfig or in-cluster service account.
    pub async fn new(namespace: impl Into<String>) -> OrchestrationResult<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| OrchestrationError::Rejected {
                operation: "connect",
                reason: format!("Failed to create Kubernetes client: {}", e),
            })?;
        Ok(Self {
            client,
            namespace: namespace.into(),
        })
    }

    fn api<K>(&self) -> Api<K>
    where
        K: ::kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as ::kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

/// Classify an API server status code.
pub fn classify_status(
    code: u16,
    operation: &'static str,
    kind: ObjectKind,
    name: &str,
    message: String,
) -> OrchestrationError {
    match code {
        404 => OrchestrationError::NotFound {
            kind: kind.as_str(),
            name: name.to_string(),
        },
        409 if operation.starts_with("create") => OrchestrationError::AlreadyExists {
            kind: kind.as_str(),
            name: name.to_string(),
        },
        409 => OrchestrationError::Conflict {
            kind: kind.as_str(),
            name: name.to_string(),
            reason: message,
        },
        429 | 500..=599 => OrchestrationError::Transient {
            operation,
            reason: message,
        },
        _ => OrchestrationError::Rejected {
            operation,
            reason: message,
        },
    }
}

fn map_kube_error(
    error: ::kube::Error,
    operation: &'static str,
    kind: ObjectKind,
    name: &str,
) -> OrchestrationError {
    match error {
        ::kube::Error::Api(response) => {
            classify_status(response.code, operation, kind, name, response.message)
        }
        other => OrchestrationError::Transient {
            operation,
            reason: other.to_string(),
        },
    }
}

fn to_typed<K: DeserializeOwned>(value: Value, operation: &'static str) -> OrchestrationResult<K> {
    serde_json::from_value(value).map_err(|e| OrchestrationError::Rejected {
        operation,
        reason: format!("Invalid manifest: {}", e),
    })
}

fn to_json<K: Serialize>(object: &K, operation: &'static str) -> OrchestrationResult<Value> {
    serde_json::to_value(object).map_err(|e| OrchestrationError::Rejected {
        operation,
        reason: format!("Unreadable object: {}", e),
    })
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn u32_at(value: &Value, pointer: &str) -> Option<u32> {
    value
        .pointer(pointer)
        .and_then(Value::as_u64)
        .map(|v| v as u32)
}

// ---------------------------------------------------------------------------
// Manifests
// ---------------------------------------------------------------------------

fn pod_template(labels: &BTreeMap<String, String>, template: &ContainerTemplate) -> Value {
    let env: Vec<Value> = template
        .env
        .iter()
        .map(|(name, value)| json!({ "name": name, "value": value }))
        .collect();

    json!({
        "metadata": {
            "labels": labels,
            "annotations": { ANNOTATION_CODE_HASH: template.code_hash },
        },
        "spec": {
            "containers": [{
                "name": CONTAINER_NAME,
                "image": template.image,
                "ports": [{ "name": "http", "containerPort": template.port }],
                "env": env,
                "resources": {
                    "requests": {
                        "cpu": template.resources.cpu_request,
                        "memory": template.resources.memory_request,
                    },
                    "limits": {
                        "cpu": template.resources.cpu_limit,
                        "memory": template.resources.memory_limit,
                    },
                },
                "volumeMounts": [{
                    "name": CODE_VOLUME_NAME,
                    "mountPath": CODE_MOUNT_PATH,
                    "readOnly": true,
                }],
            }],
            "volumes": [{
                "name": CODE_VOLUME_NAME,
                "configMap": { "name": template.code_volume },
            }],
        },
    })
}

pub fn deployment_manifest(workload: &WorkloadObject) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": { "name": workload.name, "labels": workload.labels },
        "spec": {
            "replicas": workload.replicas,
            "selector": { "matchLabels": workload.labels },
            "template": pod_template(&workload.labels, &workload.template),
        },
    })
}

fn workload_patch_manifest(patch: &WorkloadPatch, current: &WorkloadObject) -> Value {
    let labels = patch.labels.as_ref().unwrap_or(&current.labels);
    let mut manifest = json!({});
    if let Some(labels) = &patch.labels {
        manifest["metadata"] = json!({ "labels": labels });
    }
    if patch.labels.is_some() || patch.template.is_some() {
        let template = patch.template.as_ref().unwrap_or(&current.template);
        manifest["spec"] = json!({ "template": pod_template(labels, template) });
    }
    manifest
}

pub fn workload_from_deployment(value: &Value) -> Option<WorkloadObject> {
    let name = str_at(value, "/metadata/name")?.to_string();
    let container = value.pointer("/spec/template/spec/containers/0")?;

    let env = container
        .get("env")
        .and_then(Value::as_array)
        .map(|vars| {
            vars.iter()
                .filter_map(|var| {
                    Some((
                        var.get("name")?.as_str()?.to_string(),
                        var.get("value").and_then(Value::as_str).unwrap_or("").to_string(),
                    ))
                })
                .collect()
        })
        .unwrap_or_default();

    let resources = ResourceLimits {
        cpu_request: str_at(container, "/resources/requests/cpu").unwrap_or("").to_string(),
        memory_request: str_at(container, "/resources/requests/memory")
            .unwrap_or("")
            .to_string(),
        cpu_limit: str_at(container, "/resources/limits/cpu").unwrap_or("").to_string(),
        memory_limit: str_at(container, "/resources/limits/memory")
            .unwrap_or("")
            .to_string(),
    };

    let code_volume = value
        .pointer("/spec/template/spec/volumes")
        .and_then(Value::as_array)
        .and_then(|volumes| {
            volumes
                .iter()
                .find(|v| v.get("name").and_then(Value::as_str) == Some(CODE_VOLUME_NAME))
        })
        .and_then(|v| str_at(v, "/configMap/name"))
        .unwrap_or("")
        .to_string();

    let annotations = string_map(value.pointer("/spec/template/metadata/annotations"));

    Some(WorkloadObject {
        name,
        labels: string_map(value.pointer("/metadata/labels")),
        replicas: u32_at(value, "/spec/replicas").unwrap_or(0),
        template: ContainerTemplate {
            image: container
                .get("image")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            port: u32_at(container, "/ports/0/containerPort").unwrap_or(0) as u16,
            env,
            resources,
            code_volume,
            code_hash: annotations
                .get(ANNOTATION_CODE_HASH)
                .cloned()
                .unwrap_or_default(),
        },
    })
}

pub fn service_manifest(endpoint: &EndpointObject) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": { "name": endpoint.name, "labels": endpoint.labels },
        "spec": {
            "type": "ClusterIP",
            "selector": endpoint.selector,
            "ports": [{
                "name": "http",
                "port": endpoint.port,
                "targetPort": endpoint.target_port,
            }],
        },
    })
}

fn endpoint_from_service(value: &Value, namespace: &str) -> Option<EndpointObject> {
    let name = str_at(value, "/metadata/name")?.to_string();
    let port = u32_at(value, "/spec/ports/0/port").unwrap_or(0) as u16;
    Some(EndpointObject {
        address: format!("http://{}.{}.svc.cluster.local:{}", name, namespace, port),
        labels: string_map(value.pointer("/metadata/labels")),
        selector: string_map(value.pointer("/spec/selector")),
        port,
        target_port: u32_at(value, "/spec/ports/0/targetPort").unwrap_or(0) as u16,
        cluster_ip: str_at(value, "/spec/clusterIP").map(str::to_string),
        name,
    })
}

pub fn config_map_manifest(code: &CodeObject) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": code.name, "labels": code.labels },
        "data": code.data,
    })
}

fn code_from_config_map(value: &Value) -> Option<CodeObject> {
    Some(CodeObject {
        name: str_at(value, "/metadata/name")?.to_string(),
        labels: string_map(value.pointer("/metadata/labels")),
        data: string_map(value.get("data")),
    })
}

pub fn hpa_manifest(autoscaler: &AutoscalerObject) -> Value {
    json!({
        "apiVersion": "autoscaling/v2",
        "kind": "HorizontalPodAutoscaler",
        "metadata": { "name": autoscaler.name, "labels": autoscaler.labels },
        "spec": {
            "scaleTargetRef": {
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "name": autoscaler.target,
            },
            "minReplicas": autoscaler.min_replicas,
            "maxReplicas": autoscaler.max_replicas,
            "metrics": [{
                "type": "Resource",
                "resource": {
                    "name": "cpu",
                    "target": {
                        "type": "Utilization",
                        "averageUtilization": autoscaler.cpu_utilization,
                    },
                },
            }],
        },
    })
}

fn autoscaler_from_hpa(value: &Value) -> Option<AutoscalerObject> {
    Some(AutoscalerObject {
        name: str_at(value, "/metadata/name")?.to_string(),
        labels: string_map(value.pointer("/metadata/labels")),
        target: str_at(value, "/spec/scaleTargetRef/name")
            .unwrap_or("")
            .to_string(),
        min_replicas: u32_at(value, "/spec/minReplicas").unwrap_or(1),
        max_replicas: u32_at(value, "/spec/maxReplicas").unwrap_or(1),
        cpu_utilization: u32_at(value, "/spec/metrics/0/resource/target/averageUtilization")
            .unwrap_or(0),
    })
}

/// Body for a merge patch against the `scale` subresource.
fn scale_patch(replicas: u32) -> Value {
    json!({ "spec": { "replicas": replicas } })
}

fn unreadable(operation: &'static str, name: &str) -> OrchestrationError {
    OrchestrationError::Rejected {
        operation,
        reason: format!("Object '{}' has an unexpected shape", name),
    }
}

#[async_trait]
impl OrchestrationApi for KubeOrchestrator {
    async fn get_code(&self, name: &str) -> OrchestrationResult<Option<CodeObject>> {
        let api: Api<ConfigMap> = self.api();
        let found = api
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(e, "get_code", ObjectKind::Code, name))?;
        match found {
            Some(cm) => {
                let value = to_json(&cm, "get_code")?;
                code_from_config_map(&value)
                    .map(Some)
                    .ok_or_else(|| unreadable("get_code", name))
            }
            None => Ok(None),
        }
    }

    async fn create_code(&self, code: &CodeObject) -> OrchestrationResult<()> {
        let api: Api<ConfigMap> = self.api();
        let cm: ConfigMap = to_typed(config_map_manifest(code), "create_code")?;
        api.create(&PostParams::default(), &cm)
            .await
            .map_err(|e| map_kube_error(e, "create_code", ObjectKind::Code, &code.name))?;
        Ok(())
    }

    async fn replace_code(&self, code: &CodeObject) -> OrchestrationResult<()> {
        let api: Api<ConfigMap> = self.api();
        let patch = json!({ "metadata": { "labels": code.labels }, "data": code.data });
        api.patch(&code.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(e, "replace_code", ObjectKind::Code, &code.name))?;
        Ok(())
    }

    async fn delete_code(&self, name: &str) -> OrchestrationResult<()> {
        let api: Api<ConfigMap> = self.api();
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error(e, "delete_code", ObjectKind::Code, name))?;
        Ok(())
    }

    async fn get_workload(&self, name: &str) -> OrchestrationResult<Option<WorkloadObject>> {
        let api: Api<Deployment> = self.api();
        let found = api
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(e, "get_workload", ObjectKind::Workload, name))?;
        match found {
            Some(deployment) => {
                let value = to_json(&deployment, "get_workload")?;
                workload_from_deployment(&value)
                    .map(Some)
                    .ok_or_else(|| unreadable("get_workload", name))
            }
            None => Ok(None),
        }
    }

    async fn create_workload(&self, workload: &WorkloadObject) -> OrchestrationResult<()> {
        let api: Api<Deployment> = self.api();
        let deployment: Deployment = to_typed(deployment_manifest(workload), "create_workload")?;
        api.create(&PostParams::default(), &deployment)
            .await
            .map_err(|e| {
                map_kube_error(e, "create_workload", ObjectKind::Workload, &workload.name)
            })?;
        tracing::info!(
            workload = %workload.name,
            replicas = workload.replicas,
            "Created deployment"
        );
        Ok(())
    }

    async fn patch_workload(&self, name: &str, patch: &WorkloadPatch) -> OrchestrationResult<()> {
        let current = self
            .get_workload(name)
            .await?
            .ok_or_else(|| OrchestrationError::NotFound {
                kind: ObjectKind::Workload.as_str(),
                name: name.to_string(),
            })?;
        let api: Api<Deployment> = self.api();
        let manifest = workload_patch_manifest(patch, &current);
        api.patch(name, &PatchParams::default(), &Patch::Merge(&manifest))
            .await
            .map_err(|e| map_kube_error(e, "patch_workload", ObjectKind::Workload, name))?;
        Ok(())
    }

    async fn delete_workload(&self, name: &str) -> OrchestrationResult<()> {
        let api: Api<Deployment> = self.api();
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error(e, "delete_workload", ObjectKind::Workload, name))?;
        Ok(())
    }

    async fn get_endpoint(&self, name: &str) -> OrchestrationResult<Option<EndpointObject>> {
        let api: Api<Service> = self.api();
        let found = api
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(e, "get_endpoint", ObjectKind::Endpoint, name))?;
        match found {
            Some(service) => {
                let value = to_json(&service, "get_endpoint")?;
                endpoint_from_service(&value, &self.namespace)
                    .map(Some)
                    .ok_or_else(|| unreadable("get_endpoint", name))
            }
            None => Ok(None),
        }
    }

    async fn create_endpoint(&self, endpoint: &EndpointObject) -> OrchestrationResult<()> {
        let api: Api<Service> = self.api();
        let service: Service = to_typed(service_manifest(endpoint), "create_endpoint")?;
        api.create(&PostParams::default(), &service)
            .await
            .map_err(|e| {
                map_kube_error(e, "create_endpoint", ObjectKind::Endpoint, &endpoint.name)
            })?;
        Ok(())
    }

    async fn replace_endpoint(&self, endpoint: &EndpointObject) -> OrchestrationResult<()> {
        // Merge patch leaves spec.clusterIP alone.
        let api: Api<Service> = self.api();
        let mut manifest = service_manifest(endpoint);
        if let Some(obj) = manifest.as_object_mut() {
            obj.remove("apiVersion");
            obj.remove("kind");
        }
        api.patch(&endpoint.name, &PatchParams::default(), &Patch::Merge(&manifest))
            .await
            .map_err(|e| {
                map_kube_error(e, "replace_endpoint", ObjectKind::Endpoint, &endpoint.name)
            })?;
        Ok(())
    }

    async fn delete_endpoint(&self, name: &str) -> OrchestrationResult<()> {
        let api: Api<Service> = self.api();
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_kube_error(e, "delete_endpoint", ObjectKind::Endpoint, name))?;
        Ok(())
    }

    async fn get_autoscaler(&self, name: &str) -> OrchestrationResult<Option<AutoscalerObject>> {
        let api: Api<HorizontalPodAutoscaler> = self.api();
        let found = api
            .get_opt(name)
            .await
            .map_err(|e| map_kube_error(e, "get_autoscaler", ObjectKind::Autoscaler, name))?;
        match found {
            Some(hpa) => {
                let value = to_json(&hpa, "get_autoscaler")?;
                autoscaler_from_hpa(&value)
                    .map(Some)
                    .ok_or_else(|| unreadable("get_autoscaler", name))
            }
            None => Ok(None),
        }
    }

    async fn create_autoscaler(&self, autoscaler: &AutoscalerObject) -> OrchestrationResult<()> {
        let api: Api<HorizontalPodAutoscaler> = self.api();
        let hpa: HorizontalPodAutoscaler = to_typed(hpa_manifest(autoscaler), "create_autoscaler")?;
        api.create(&PostParams::default(), &hpa)
            .await
            .map_err(|e| {
                map_kube_error(e, "create_autoscaler", ObjectKind::Autoscaler, &autoscaler.name)
            })?;
        Ok(())
    }

    async fn replace_autoscaler(
        &self,
        autoscaler: &AutoscalerObject,
    ) -> OrchestrationResult<()> {
        let api: Api<HorizontalPodAutoscaler> = self.api();
        let manifest = hpa_manifest(autoscaler);
        api.patch(&autoscaler.name, &PatchParams::default(), &Patch::Merge(&manifest))
            .await
            .map_err(|e| {
                map_kube_error(e, "replace_autoscaler", ObjectKind::Autoscaler, &autoscaler.name)
            })?;
        Ok(())
    }

    async fn delete_autoscaler(&self, name: &str) -> OrchestrationResult<()> {
        let api: Api<HorizontalPodAutoscaler> = self.api();
        api.delete(name, &DeleteParams::default())
            .await
            .map_err(|e| {
                map_kube_error(e, "delete_autoscaler", ObjectKind::Autoscaler, name)
            })?;
        Ok(())
    }

    async fn scale_workload(&self, name: &str, replicas: u32) -> OrchestrationResult<()> {
        let api: Api<Deployment> = self.api();
        let patch = scale_patch(replicas);
        api.patch_scale(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(e, "scale_workload", ObjectKind::Workload, name))?;
        tracing::info!(workload = %name, replicas, "Patched deployment scale");
        Ok(())
    }

    async fn workload_status(&self, name: &str) -> OrchestrationResult<WorkloadStatus> {
        let api: Api<Deployment> = self.api();
        let deployment = api
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, "workload_status", ObjectKind::Workload, name))?;
        Ok(WorkloadStatus {
            desired_replicas: deployment
                .spec
                .as_ref()
                .and_then(|s| s.replicas)
                .unwrap_or(0)
                .max(0) as u32,
            ready_replicas: deployment
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0)
                .max(0) as u32,
        })
    }

    fn name(&self) -> &'static str {
        "kube"
    }
}
