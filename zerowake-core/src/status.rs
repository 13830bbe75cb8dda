// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Status surface.
//!
//! Combines the store condition, the scale lock snapshot and replica counts
//! read back from the orchestration platform.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::lock::ScaleState;
use crate::scale::ScaleController;
use crate::store::{DesiredStateStore, Phase};
use crate::types::FunctionId;

/// Observable status of one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionStatus {
    pub id: FunctionId,
    pub generation: u64,
    pub phase: Phase,
    pub observed_generation: Option<u64>,
    pub last_error: Option<String>,
    pub last_reconciled_ms: Option<u64>,
    /// `None` until the function has received its first invocation.
    pub scale_state: Option<ScaleState>,
    /// `None` when the platform could not be read.
    pub desired_replicas: Option<u32>,
    pub ready_replicas: Option<u32>,
    pub endpoint: Option<String>,
    pub waiters: usize,
    pub scale_ups: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub functions: Vec<FunctionStatus>,
}

impl StatusReport {
    pub fn get(&self, id: &FunctionId) -> Option<&FunctionStatus> {
        self.functions.iter().find(|f| &f.id == id)
    }
}

/// Build the status of one function, or `None` if it is not declared.
pub async fn function_status(
    store: &DesiredStateStore,
    scale: &ScaleController,
    id: &FunctionId,
) -> Option<FunctionStatus> {
    let stored = store.get(id)?;
    let snapshot = scale.snapshot(id).await;
    let replicas = match scale.current_replicas(id).await {
        Ok(status) => Some(status),
        Err(e) => {
            tracing::debug!(function_id = %id, error = %e, "Replica read failed");
            None
        }
    };

    Some(FunctionStatus {
        id: id.clone(),
        generation: stored.generation,
        phase: stored.condition.phase,
        observed_generation: stored.condition.observed_generation,
        last_error: stored.condition.last_error,
        last_reconciled_ms: stored.condition.last_reconciled_ms,
        scale_state: snapshot.as_ref().map(|s| s.state),
        desired_replicas: replicas.map(|r| r.desired_replicas),
        ready_replicas: replicas.map(|r| r.ready_replicas),
        endpoint: snapshot.as_ref().and_then(|s| s.endpoint.clone()),
        waiters: snapshot.as_ref().map(|s| s.waiters).unwrap_or(0),
        scale_ups: snapshot.as_ref().map(|s| s.scale_ups).unwrap_or(0),
    })
}

/// Status of every declared function, sorted by id.
pub async fn status_report(
    store: &Arc<DesiredStateStore>,
    scale: &Arc<ScaleController>,
) -> StatusReport {
    let mut functions = Vec::with_capacity(store.len());
    for id in store.ids() {
        if let Some(status) = function_status(store, scale, &id).await {
            functions.push(status);
        }
    }
    StatusReport { functions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::backoff::BackoffPolicy;
    use crate::config::RuntimeSettings;
    use crate::memory::InMemoryOrchestrator;
    use crate::reconciler::Reconciler;
    use crate::scale::ScaleSettings;
    use crate::spec::FunctionSpec;
    use crate::types::Port;

    #[tokio::test]
    async fn test_report_reads_platform_replicas() {
        let runtime = RuntimeSettings {
            image: "faas-python-runner:latest".to_string(),
            service_port: Port::new(8080).unwrap(),
            namespace: "default".to_string(),
        };
        let backoff = BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(50), 3);
        let backend = Arc::new(InMemoryOrchestrator::default());
        let store = DesiredStateStore::new_shared();
        let scale = Arc::new(ScaleController::new(
            backend.clone(),
            store.clone(),
            runtime.clone(),
            ScaleSettings {
                scale_timeout: Duration::from_secs(1),
                poll_interval: Duration::from_millis(20),
                idle_timeout: Duration::from_secs(60),
                ready_cache_ttl: Duration::from_secs(1),
                confirm_samples: 1,
                backoff,
            },
        ));
        let reconciler = Reconciler::new(backend.clone(), store.clone(), runtime, backoff);

        store.apply(
            FunctionSpec::builder("hello")
                .code("x")
                .runtime("python3.9")
                .replicas(0, 1)
                .build()
                .unwrap(),
        );
        let id = FunctionId::new("hello").unwrap();
        reconciler.reconcile_with_retry(&id).await.unwrap();

        let report = status_report(&store, &scale).await;
        let status = report.get(&id).unwrap();
        assert_eq!(status.phase, Phase::Ready);
        assert_eq!(status.generation, 1);
        assert_eq!(status.desired_replicas, Some(0));
        assert_eq!(status.scale_state, None);

        // Externally set replicas show up without going through the lock.
        backend.external_scale("fn-hello-deploy", 2);
        let status = function_status(&store, &scale, &id).await.unwrap();
        assert_eq!(status.desired_replicas, Some(2));
        assert_eq!(status.ready_replicas, Some(2));

        scale.ensure_scaled(&id).await.unwrap();
        let status = function_status(&store, &scale, &id).await.unwrap();
        assert_eq!(status.scale_state, Some(ScaleState::Ready));
        assert_eq!(status.scale_ups, 0);
        assert!(status.endpoint.is_some());
    }
}
