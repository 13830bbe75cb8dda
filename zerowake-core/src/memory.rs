// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! In-memory orchestration backend.
//!
//! Simulates the platform closely enough to exercise the whole control plane:
//! replicas take a configurable delay to become ready, the cluster IP of an
//! endpoint is assigned once and kept, and every mutation is counted so
//! tests can assert how many scale calls a burst of invocations produced.
//! Failures can be injected per operation, and "someone else" can scale or
//! delete objects to produce drift events.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::objects::{
    function_from_labels, AutoscalerObject, CodeObject, EndpointObject, ObjectChange,
    ObjectEvent, ObjectKind, WorkloadObject, WorkloadPatch, WorkloadStatus,
};
use crate::orchestrator::OrchestrationApi;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct StoredWorkload {
    object: WorkloadObject,
    /// When the current non-zero replica set becomes ready.
    ready_at: Option<Instant>,
    /// Replicas still reported ready while terminating after a scale to zero.
    draining: Option<(u32, Instant)>,
}

/// Process-local platform simulation.
pub struct InMemoryOrchestrator {
    workloads: DashMap<String, StoredWorkload>,
    endpoints: DashMap<String, EndpointObject>,
    codes: DashMap<String, CodeObject>,
    autoscalers: DashMap<String, AutoscalerObject>,
    address_overrides: DashMap<String, String>,
    counters: DashMap<&'static str, u64>,
    failures: DashMap<&'static str, VecDeque<OrchestrationError>>,
    readiness_delay_ms: AtomicU64,
    latency_ms: AtomicU64,
    termination_grace_ms: AtomicU64,
    never_ready: AtomicBool,
    next_ip: AtomicU32,
    events: broadcast::Sender<ObjectEvent>,
}

impl InMemoryOrchestrator {
    /// New backend whose replicas become ready after `readiness_delay`.
    pub fn new(readiness_delay: Duration) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            workloads: DashMap::new(),
            endpoints: DashMap::new(),
            codes: DashMap::new(),
            autoscalers: DashMap::new(),
            address_overrides: DashMap::new(),
            counters: DashMap::new(),
            failures: DashMap::new(),
            readiness_delay_ms: AtomicU64::new(readiness_delay.as_millis() as u64),
            latency_ms: AtomicU64::new(0),
            termination_grace_ms: AtomicU64::new(0),
            never_ready: AtomicBool::new(false),
            next_ip: AtomicU32::new(1),
            events,
        }
    }

    pub fn set_readiness_delay(&self, delay: Duration) {
        self.readiness_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// When set, replicas never report ready.
    pub fn set_never_ready(&self, never_ready: bool) {
        self.never_ready.store(never_ready, Ordering::SeqCst);
    }

    /// Delay applied to every API call.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// After a scale to zero, keep reporting the old pods as ready for
    /// `grace`, the way a Deployment status lags behind terminating pods.
    pub fn set_termination_grace(&self, grace: Duration) {
        self.termination_grace_ms
            .store(grace.as_millis() as u64, Ordering::SeqCst);
    }

    /// Route traffic for `endpoint` to `address` instead of its cluster DNS name.
    pub fn set_endpoint_address(&self, endpoint: &str, address: impl Into<String>) {
        self.address_overrides
            .insert(endpoint.to_string(), address.into());
    }

    /// Fail the next `times` calls of `operation` with `error`.
    pub fn fail_next(&self, operation: &'static str, times: usize, error: OrchestrationError) {
        let mut queue = self.failures.entry(operation).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Number of successful calls of a mutating operation.
    pub fn mutations(&self, operation: &str) -> u64 {
        self.counters.get(operation).map(|c| *c).unwrap_or(0)
    }

    /// Successful mutations across all operations.
    pub fn total_mutations(&self) -> u64 {
        self.counters.iter().map(|entry| *entry.value()).sum()
    }

    /// Snapshot of mutation counters, keyed by operation.
    pub fn mutation_counters(&self) -> HashMap<&'static str, u64> {
        self.counters
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect()
    }

    /// Current desired replica count, if the workload exists.
    pub fn replicas(&self, workload: &str) -> Option<u32> {
        self.workloads.get(workload).map(|w| w.object.replicas)
    }

    pub fn workload_names(&self) -> Vec<String> {
        self.workloads.iter().map(|e| e.key().clone()).collect()
    }

    /// Scale a workload as an outside actor would (for example an autoscaler).
    pub fn external_scale(&self, workload: &str, replicas: u32) -> bool {
        let function_id = match self.workloads.get_mut(workload) {
            Some(mut stored) => {
                self.set_replicas(&mut stored, replicas);
                stored.object.function_id()
            }
            None => return false,
        };
        self.emit(ObjectKind::Workload, workload, function_id, ObjectChange::Modified);
        true
    }

    /// Delete an object as an outside actor would.
    pub fn external_delete(&self, kind: ObjectKind, name: &str) -> bool {
        let function_id = match kind {
            ObjectKind::Workload => self
                .workloads
                .remove(name)
                .map(|(_, w)| w.object.function_id()),
            ObjectKind::Endpoint => self
                .endpoints
                .remove(name)
                .map(|(_, e)| function_from_labels(&e.labels)),
            ObjectKind::Code => self
                .codes
                .remove(name)
                .map(|(_, c)| function_from_labels(&c.labels)),
            ObjectKind::Autoscaler => self
                .autoscalers
                .remove(name)
                .map(|(_, a)| function_from_labels(&a.labels)),
        };
        match function_id {
            Some(function_id) => {
                self.emit(kind, name, function_id, ObjectChange::Deleted);
                true
            }
            None => false,
        }
    }

    /// Rewrite a workload's image as an outside actor would.
    pub fn external_set_image(&self, workload: &str, image: &str) -> bool {
        let function_id = match self.workloads.get_mut(workload) {
            Some(mut stored) => {
                stored.object.template.image = image.to_string();
                stored.object.function_id()
            }
            None => return false,
        };
        self.emit(ObjectKind::Workload, workload, function_id, ObjectChange::Modified);
        true
    }

    fn emit(
        &self,
        kind: ObjectKind,
        name: &str,
        function_id: Option<crate::types::FunctionId>,
        change: ObjectChange,
    ) {
        // No receivers is fine.
        let _ = self.events.send(ObjectEvent {
            kind,
            name: name.to_string(),
            function_id,
            change,
        });
    }

    async fn enter(&self, operation: &'static str) -> OrchestrationResult<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        let injected = self
            .failures
            .get_mut(operation)
            .and_then(|mut queue| queue.pop_front());
        match injected {
            Some(error) => {
                tracing::debug!(operation, error = %error, "Injected orchestration failure");
                Err(error)
            }
            None => Ok(()),
        }
    }

    fn count(&self, operation: &'static str) {
        *self.counters.entry(operation).or_insert(0) += 1;
    }

    fn set_replicas(&self, stored: &mut StoredWorkload, replicas: u32) {
        let now = Instant::now();
        let was_running = stored.object.replicas > 0;
        let was_ready = was_running
            && !self.never_ready.load(Ordering::SeqCst)
            && stored.ready_at.is_some_and(|at| now >= at);
        let grace = Duration::from_millis(self.termination_grace_ms.load(Ordering::SeqCst));

        if replicas == 0 && was_ready && !grace.is_zero() {
            stored.draining = Some((stored.object.replicas, now + grace));
        } else if replicas > 0 {
            stored.draining = None;
        }

        stored.object.replicas = replicas;
        if replicas == 0 {
            stored.ready_at = None;
        } else if !was_running || stored.ready_at.is_none() {
            stored.ready_at = Some(now + self.readiness_delay());
        }
    }

    fn readiness_delay(&self) -> Duration {
        Duration::from_millis(self.readiness_delay_ms.load(Ordering::SeqCst))
    }

    fn not_found(kind: ObjectKind, name: &str) -> OrchestrationError {
        OrchestrationError::NotFound {
            kind: kind.as_str(),
            name: name.to_string(),
        }
    }

    fn already_exists(kind: ObjectKind, name: &str) -> OrchestrationError {
        OrchestrationError::AlreadyExists {
            kind: kind.as_str(),
            name: name.to_string(),
        }
    }
}

impl Default for InMemoryOrchestrator {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[async_trait]
impl OrchestrationApi for InMemoryOrchestrator {
    async fn get_code(&self, name: &str) -> OrchestrationResult<Option<CodeObject>> {
        self.enter("get_code").await?;
        Ok(self.codes.get(name).map(|c| c.clone()))
    }

    async fn create_code(&self, code: &CodeObject) -> OrchestrationResult<()> {
        self.enter("create_code").await?;
        if self.codes.contains_key(&code.name) {
            return Err(Self::already_exists(ObjectKind::Code, &code.name));
        }
        self.codes.insert(code.name.clone(), code.clone());
        self.count("create_code");
        Ok(())
    }

    async fn replace_code(&self, code: &CodeObject) -> OrchestrationResult<()> {
        self.enter("replace_code").await?;
        match self.codes.get_mut(&code.name) {
            Some(mut existing) => *existing = code.clone(),
            None => return Err(Self::not_found(ObjectKind::Code, &code.name)),
        }
        self.count("replace_code");
        Ok(())
    }

    async fn delete_code(&self, name: &str) -> OrchestrationResult<()> {
        self.enter("delete_code").await?;
        self.codes
            .remove(name)
            .ok_or_else(|| Self::not_found(ObjectKind::Code, name))?;
        self.count("delete_code");
        Ok(())
    }

    async fn get_workload(&self, name: &str) -> OrchestrationResult<Option<WorkloadObject>> {
        self.enter("get_workload").await?;
        Ok(self.workloads.get(name).map(|w| w.object.clone()))
    }

    async fn create_workload(&self, workload: &WorkloadObject) -> OrchestrationResult<()> {
        self.enter("create_workload").await?;
        if self.workloads.contains_key(&workload.name) {
            return Err(Self::already_exists(ObjectKind::Workload, &workload.name));
        }
        let mut stored = StoredWorkload {
            object: workload.clone(),
            ready_at: None,
            draining: None,
        };
        stored.object.replicas = 0;
        self.set_replicas(&mut stored, workload.replicas);
        self.workloads.insert(workload.name.clone(), stored);
        self.count("create_workload");
        Ok(())
    }

    async fn patch_workload(&self, name: &str, patch: &WorkloadPatch) -> OrchestrationResult<()> {
        self.enter("patch_workload").await?;
        match self.workloads.get_mut(name) {
            Some(mut stored) => patch.apply_to(&mut stored.object),
            None => return Err(Self::not_found(ObjectKind::Workload, name)),
        }
        self.count("patch_workload");
        Ok(())
    }

    async fn delete_workload(&self, name: &str) -> OrchestrationResult<()> {
        self.enter("delete_workload").await?;
        self.workloads
            .remove(name)
            .ok_or_else(|| Self::not_found(ObjectKind::Workload, name))?;
        self.count("delete_workload");
        Ok(())
    }

    async fn get_endpoint(&self, name: &str) -> OrchestrationResult<Option<EndpointObject>> {
        self.enter("get_endpoint").await?;
        Ok(self.endpoints.get(name).map(|e| {
            let mut endpoint = e.clone();
            if let Some(address) = self.address_overrides.get(name) {
                endpoint.address = address.clone();
            }
            endpoint
        }))
    }

    async fn create_endpoint(&self, endpoint: &EndpointObject) -> OrchestrationResult<()> {
        self.enter("create_endpoint").await?;
        if self.endpoints.contains_key(&endpoint.name) {
            return Err(Self::already_exists(ObjectKind::Endpoint, &endpoint.name));
        }
        let ip = self.next_ip.fetch_add(1, Ordering::SeqCst);
        let mut stored = endpoint.clone();
        stored.cluster_ip = Some(format!("10.96.{}.{}", (ip >> 8) & 0xff, ip & 0xff));
        self.endpoints.insert(endpoint.name.clone(), stored);
        self.count("create_endpoint");
        Ok(())
    }

    async fn replace_endpoint(&self, endpoint: &EndpointObject) -> OrchestrationResult<()> {
        self.enter("replace_endpoint").await?;
        match self.endpoints.get_mut(&endpoint.name) {
            Some(mut existing) => {
                let cluster_ip = existing.cluster_ip.take();
                *existing = endpoint.clone();
                existing.cluster_ip = cluster_ip;
            }
            None => return Err(Self::not_found(ObjectKind::Endpoint, &endpoint.name)),
        }
        self.count("replace_endpoint");
        Ok(())
    }

    async fn delete_endpoint(&self, name: &str) -> OrchestrationResult<()> {
        self.enter("delete_endpoint").await?;
        self.endpoints
            .remove(name)
            .ok_or_else(|| Self::not_found(ObjectKind::Endpoint, name))?;
        self.count("delete_endpoint");
        Ok(())
    }

    async fn get_autoscaler(&self, name: &str) -> OrchestrationResult<Option<AutoscalerObject>> {
        self.enter("get_autoscaler").await?;
        Ok(self.autoscalers.get(name).map(|a| a.clone()))
    }

    async fn create_autoscaler(&self, autoscaler: &AutoscalerObject) -> OrchestrationResult<()> {
        self.enter("create_autoscaler").await?;
        if self.autoscalers.contains_key(&autoscaler.name) {
            return Err(Self::already_exists(
                ObjectKind::Autoscaler,
                &autoscaler.name,
            ));
        }
        self.autoscalers
            .insert(autoscaler.name.clone(), autoscaler.clone());
        self.count("create_autoscaler");
        Ok(())
    }

    async fn replace_autoscaler(
        &self,
        autoscaler: &AutoscalerObject,
    ) -> OrchestrationResult<()> {
        self.enter("replace_autoscaler").await?;
        match self.autoscalers.get_mut(&autoscaler.name) {
            Some(mut existing) => *existing = autoscaler.clone(),
            None => {
                return Err(Self::not_found(
                    ObjectKind::Autoscaler,
                    &autoscaler.name,
                ))
            }
        }
        self.count("replace_autoscaler");
        Ok(())
    }

    async fn delete_autoscaler(&self, name: &str) -> OrchestrationResult<()> {
        self.enter("delete_autoscaler").await?;
        self.autoscalers
            .remove(name)
            .ok_or_else(|| Self::not_found(ObjectKind::Autoscaler, name))?;
        self.count("delete_autoscaler");
        Ok(())
    }

    async fn scale_workload(&self, name: &str, replicas: u32) -> OrchestrationResult<()> {
        self.enter("scale_workload").await?;
        match self.workloads.get_mut(name) {
            Some(mut stored) => self.set_replicas(&mut stored, replicas),
            None => return Err(Self::not_found(ObjectKind::Workload, name)),
        }
        self.count("scale_workload");
        tracing::debug!(workload = %name, replicas, "Scaled workload");
        Ok(())
    }

    async fn workload_status(&self, name: &str) -> OrchestrationResult<WorkloadStatus> {
        self.enter("workload_status").await?;
        let stored = self
            .workloads
            .get(name)
            .ok_or_else(|| Self::not_found(ObjectKind::Workload, name))?;

        let now = Instant::now();
        let desired = stored.object.replicas;
        let ready = match (stored.ready_at, stored.draining) {
            (Some(at), _) if !self.never_ready.load(Ordering::SeqCst) && now >= at => desired,
            (_, Some((terminating, until))) if desired == 0 && now < until => terminating,
            _ => 0,
        };
        Ok(WorkloadStatus {
            desired_replicas: desired,
            ready_replicas: ready,
        })
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<ObjectEvent>> {
        Some(self.events.subscribe())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
