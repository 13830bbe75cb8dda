// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Workload Projector.
//!
//! Pure mapping from a FunctionSpec to the platform objects that run it.
//! Performs no I/O and reads no clock. Projecting the same spec twice yields
//! identical objects.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::config::RuntimeSettings;
use crate::objects::{
    AutoscalerObject, CodeObject, ContainerTemplate, EndpointObject, ObjectNames, WorkloadObject,
    CODE_FILE_NAME, CODE_MOUNT_PATH, LABEL_COMPONENT, LABEL_FUNCTION, LABEL_MANAGED_BY,
    LABEL_NAME, MANAGER_NAME,
};
use crate::spec::FunctionSpec;

/// CPU utilisation target handed to the external autoscaler.
pub const AUTOSCALER_CPU_TARGET: u32 = 50;

/// Every object derived from one FunctionSpec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub names: ObjectNames,
    pub code: CodeObject,
    pub workload: WorkloadObject,
    pub endpoint: EndpointObject,
    pub autoscaler: Option<AutoscalerObject>,
}

/// Project a spec onto its platform objects.
pub fn project(spec: &FunctionSpec, runtime: &RuntimeSettings) -> Projection {
    let names = ObjectNames::for_function(&spec.id);
    let labels = function_labels(spec);
    let port = runtime.service_port.value();

    let mut code_data = BTreeMap::new();
    code_data.insert(CODE_FILE_NAME.to_string(), spec.code.clone());
    let code = CodeObject {
        name: names.code.clone(),
        labels: labels.clone(),
        data: code_data,
    };

    let mut env = spec.env.clone();
    env.insert("FUNCTION_RUNTIME".to_string(), spec.runtime.to_string());
    env.insert(
        "FUNCTION_CODE_PATH".to_string(),
        format!("{}/{}", CODE_MOUNT_PATH, CODE_FILE_NAME),
    );

    let workload = WorkloadObject {
        name: names.workload.clone(),
        labels: labels.clone(),
        replicas: spec.min_replicas(),
        template: ContainerTemplate {
            image: runtime.image.clone(),
            port,
            env,
            resources: spec.resources.clone(),
            code_volume: names.code.clone(),
            code_hash: code_hash(&spec.code),
        },
    };

    let endpoint = EndpointObject {
        name: names.endpoint.clone(),
        labels: labels.clone(),
        selector: labels.clone(),
        port,
        target_port: port,
        cluster_ip: None,
        address: format!(
            "http://{}.{}.svc.cluster.local:{}",
            names.endpoint, runtime.namespace, port
        ),
    };

    let autoscaler = spec.wants_autoscaler().then(|| AutoscalerObject {
        name: names.autoscaler.clone(),
        labels: labels.clone(),
        target: names.workload.clone(),
        min_replicas: spec.min_replicas().max(1),
        max_replicas: spec.max_replicas(),
        cpu_utilization: AUTOSCALER_CPU_TARGET,
    });

    Projection {
        names,
        code,
        workload,
        endpoint,
        autoscaler,
    }
}

/// Hex sha256 of the function source.
pub fn code_hash(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

fn function_labels(spec: &FunctionSpec) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_NAME.to_string(), "faas-function".to_string());
    labels.insert(LABEL_COMPONENT.to_string(), "runtime".to_string());
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGER_NAME.to_string());
    labels.insert(LABEL_FUNCTION.to_string(), spec.id.to_string());
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Port;

    fn runtime() -> RuntimeSettings {
        RuntimeSettings {
            image: "faas-python-runner:latest".to_string(),
            service_port: Port::new(8080).unwrap(),
            namespace: "faas".to_string(),
        }
    }

    fn spec(min: u32, max: u32) -> FunctionSpec {
        FunctionSpec::builder("hello")
            .code("def main():\n    return 'hello'\n")
            .runtime("python3.9")
            .replicas(min, max)
            .env("DEBUG", "true")
            .build()
            .unwrap()
    }

    #[test]
    fn test_projection_is_deterministic() {
        assert_eq!(project(&spec(0, 3), &runtime()), project(&spec(0, 3), &runtime()));
    }

    #[test]
    fn test_workload_fields() {
        let projection = project(&spec(0, 3), &runtime());
        let workload = &projection.workload;

        assert_eq!(workload.name, "fn-hello-deploy");
        assert_eq!(workload.replicas, 0);
        assert_eq!(workload.template.image, "faas-python-runner:latest");
        assert_eq!(workload.template.code_volume, "fn-hello-code");
        assert_eq!(workload.template.env["FUNCTION_RUNTIME"], "python3.9");
        assert_eq!(
            workload.template.env["FUNCTION_CODE_PATH"],
            "/var/faas/function/handler.py"
        );
        assert_eq!(workload.template.env["DEBUG"], "true");
        assert_eq!(workload.function_id().unwrap().as_str(), "hello");
    }

    #[test]
    fn test_initial_replicas_follow_min() {
        assert_eq!(project(&spec(2, 4), &runtime()).workload.replicas, 2);
    }

    #[test]
    fn test_code_object_holds_source() {
        let projection = project(&spec(0, 1), &runtime());
        assert_eq!(
            projection.code.data[CODE_FILE_NAME],
            "def main():\n    return 'hello'\n"
        );
    }

    #[test]
    fn test_code_change_changes_hash() {
        let before = project(&spec(0, 1), &runtime());
        let mut changed = spec(0, 1);
        changed.code = "def main():\n    return 'bye'\n".to_string();
        let after = project(&changed, &runtime());

        assert_ne!(before.workload.template.code_hash, after.workload.template.code_hash);
        assert!(before.workload.diff(&after.workload).is_some());
    }

    #[test]
    fn test_endpoint_address() {
        let projection = project(&spec(0, 1), &runtime());
        assert_eq!(
            projection.endpoint.address,
            "http://fn-hello-svc.faas.svc.cluster.local:8080"
        );
        assert_eq!(projection.endpoint.selector, projection.workload.labels);
    }

    #[test]
    fn test_autoscaler_projection() {
        assert!(project(&spec(0, 5), &runtime()).autoscaler.is_none());
        assert!(project(&spec(1, 1), &runtime()).autoscaler.is_none());

        let autoscaler = project(&spec(2, 5), &runtime()).autoscaler.unwrap();
        assert_eq!(autoscaler.target, "fn-hello-deploy");
        assert_eq!(autoscaler.min_replicas, 2);
        assert_eq!(autoscaler.max_replicas, 5);
        assert_eq!(autoscaler.cpu_utilization, AUTOSCALER_CPU_TARGET);
    }

    #[test]
    fn test_code_hash_is_sha256_hex() {
        let hash = code_hash("");
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
