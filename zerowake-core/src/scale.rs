// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Scale Controller.
//!
//! The only component that changes replica counts on behalf of the admission
//! path. `ensure_scaled` implements single-flight scale-up per function: the
//! first caller that finds a function idle opens an episode and issues one
//! replica-count mutation; every concurrent caller joins that episode as a
//! waiter and receives the same outcome.
//!
//! Episodes run on a detached task. A caller that is cancelled or times out
//! only removes its own waiter; the episode still completes and releases
//! everyone else.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::backoff::{retry_transient, retry_until, BackoffPolicy};
use crate::config::{GatewayConfig, RuntimeSettings};
use crate::error::InvokeError;
use crate::lock::{InFlightGuard, LockInner, LockSnapshot, ReadyEndpoint, ScaleLock, ScaleState};
use crate::objects::WorkloadStatus;
use crate::orchestrator::OrchestrationApi;
use crate::projector::{project, Projection};
use crate::store::DesiredStateStore;
use crate::types::FunctionId;

/// Timing knobs for scale-up and idle scale-down.
#[derive(Debug, Clone)]
pub struct ScaleSettings {
    pub scale_timeout: Duration,
    pub poll_interval: Duration,
    pub idle_timeout: Duration,
    pub ready_cache_ttl: Duration,
    pub confirm_samples: u32,
    pub backoff: BackoffPolicy,
}

impl ScaleSettings {
    pub fn from_config(gateway: &GatewayConfig, backoff: BackoffPolicy) -> Self {
        Self {
            scale_timeout: gateway.scale_timeout,
            poll_interval: gateway.poll_interval,
            idle_timeout: gateway.idle_timeout,
            ready_cache_ttl: gateway.ready_cache_ttl,
            confirm_samples: gateway.confirm_samples,
            backoff,
        }
    }
}

struct Shared {
    orchestrator: Arc<dyn OrchestrationApi>,
    store: Arc<DesiredStateStore>,
    runtime: RuntimeSettings,
    settings: ScaleSettings,
}

/// Per-function single-flight scale controller.
pub struct ScaleController {
    shared: Arc<Shared>,
    locks: DashMap<FunctionId, Arc<ScaleLock>>,
}

enum EpisodeFailure {
    Timeout,
    Rejected(String),
}

impl ScaleController {
    pub fn new(
        orchestrator: Arc<dyn OrchestrationApi>,
        store: Arc<DesiredStateStore>,
        runtime: RuntimeSettings,
        settings: ScaleSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                orchestrator,
                store,
                runtime,
                settings,
            }),
            locks: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &ScaleSettings {
        &self.shared.settings
    }

    /// Lock for `id`, created lazily.
    fn lock_for(&self, id: &FunctionId) -> Arc<ScaleLock> {
        self.locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(ScaleLock::new(id.clone())))
            .clone()
    }

    /// Return an endpoint backed by at least one ready replica, scaling the
    /// function up if needed.
    pub async fn ensure_scaled(&self, id: &FunctionId) -> Result<ReadyEndpoint, InvokeError> {
        let started = Instant::now();
        let deadline = started + self.shared.settings.scale_timeout;
        let spec = self
            .shared
            .store
            .get(id)
            .ok_or_else(|| InvokeError::FunctionNotFound(id.clone()))?
            .spec;
        let projection = project(&spec, &self.shared.runtime);
        let lock = self.lock_for(id);
        lock.set_zero_scalable(spec.is_zero_scalable());

        let timed_out = || InvokeError::ScaleTimeout {
            function_id: id.clone(),
            waited_ms: started.elapsed().as_millis() as u64,
        };

        let (waiter_id, mut rx) = {
            let mut inner = tokio::time::timeout_at(deadline, lock.lock())
                .await
                .map_err(|_| timed_out())?;

            if inner.is_invalidated() || !self.shared.store.contains(id) {
                return Err(InvokeError::FunctionNotFound(id.clone()));
            }

            let mut start_episode = false;
            match inner.state() {
                ScaleState::Ready => {
                    let now = Instant::now();
                    if inner.ready_cached(now) {
                        if let Some(address) = inner.endpoint() {
                            lock.touch();
                            return Ok(ReadyEndpoint {
                                function_id: id.clone(),
                                address: address.to_string(),
                                episode: inner.episode(),
                            });
                        }
                    }
                    if self.confirm_ready(&projection).await {
                        inner.refresh_ready(Instant::now() + self.shared.settings.ready_cache_ttl);
                        if let Some(address) = inner.endpoint() {
                            lock.touch();
                            return Ok(ReadyEndpoint {
                                function_id: id.clone(),
                                address: address.to_string(),
                                episode: inner.episode(),
                            });
                        }
                    }
                    tracing::info!(
                        function_id = %id,
                        "Ready replicas no longer observed, starting new scale-up"
                    );
                    start_episode = true;
                }
                ScaleState::ScalingUp => {
                    tracing::debug!(
                        function_id = %id,
                        episode = inner.episode(),
                        "Joining in-flight scale-up"
                    );
                }
                ScaleState::Idle | ScaleState::ScalingDown => start_episode = true,
            }

            if start_episode {
                if inner.state() == ScaleState::ScalingDown {
                    // Scale-down holds the section for its whole duration, so
                    // this is only reachable after a failed scale-down left the
                    // state inconsistent. Recover through Ready.
                    let _ = inner.transition_to(ScaleState::Ready);
                }
                let episode = inner.begin_episode().map_err(|e| InvokeError::ScaleError {
                    function_id: id.clone(),
                    reason: e.to_string(),
                })?;
                tracing::info!(function_id = %id, episode, "Starting scale-up episode");
                tokio::spawn(drive_episode(
                    Arc::clone(&self.shared),
                    Arc::clone(&lock),
                    projection,
                    episode,
                    deadline,
                ));
            }

            inner.register_waiter(deadline)
        };

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(InvokeError::ScaleError {
                function_id: id.clone(),
                reason: "scale-up episode ended without an outcome".to_string(),
            }),
            Err(_) => {
                let removed = lock.lock().await.deregister_waiter(waiter_id);
                if !removed {
                    // Woken between the deadline and deregistration.
                    if let Ok(outcome) = rx.try_recv() {
                        return outcome;
                    }
                }
                tracing::warn!(function_id = %id, "Scale-up wait timed out");
                Err(timed_out())
            }
        }
    }

    /// Re-read readiness up to `confirm_samples` times before trusting a
    /// negative answer.
    async fn confirm_ready(&self, projection: &Projection) -> bool {
        let samples = self.shared.settings.confirm_samples.max(1);
        for sample in 0..samples {
            if sample > 0 {
                tokio::time::sleep(self.shared.settings.poll_interval).await;
            }
            match self
                .shared
                .orchestrator
                .workload_status(&projection.names.workload)
                .await
            {
                Ok(status) if serving(&status) => return true,
                Ok(_) => {}
                Err(e) => tracing::debug!(
                    workload = %projection.names.workload,
                    error = %e,
                    "Readiness read failed"
                ),
            }
        }
        false
    }

    /// Desired and ready replica counts, read back from the platform.
    pub async fn current_replicas(&self, id: &FunctionId) -> Result<WorkloadStatus, InvokeError> {
        let spec = self
            .shared
            .store
            .get(id)
            .ok_or_else(|| InvokeError::FunctionNotFound(id.clone()))?
            .spec;
        let projection = project(&spec, &self.shared.runtime);
        match self
            .shared
            .orchestrator
            .workload_status(&projection.names.workload)
            .await
        {
            Ok(status) => Ok(status),
            Err(e) if e.is_not_found() => Ok(WorkloadStatus::default()),
            Err(e) => Err(InvokeError::ScaleError {
                function_id: id.clone(),
                reason: e.to_string(),
            }),
        }
    }

    /// Start the idle timer of a zero-scalable function that has replicas but
    /// no timer, such as one left running by a previous process.
    pub async fn watch_idle(&self, id: &FunctionId) {
        let Some(stored) = self.shared.store.get(id) else {
            return;
        };
        if !stored.spec.is_zero_scalable() {
            return;
        }
        let lock = self.lock_for(id);
        lock.set_zero_scalable(true);

        let mut inner = lock.lock().await;
        if inner.is_invalidated() || inner.has_idle_task() || inner.state() != ScaleState::Idle {
            return;
        }
        tracing::debug!(function_id = %id, "Watching idle replicas");
        arm_idle_watch(
            &self.shared,
            &lock,
            &mut inner,
            project(&stored.spec, &self.shared.runtime),
        );
    }

    /// Mark a request as in flight; the idle timer waits for it.
    pub fn begin_request(&self, id: &FunctionId) -> InFlightGuard {
        self.lock_for(id).begin_request()
    }

    /// Drop the lock of a deleted function. Pending waiters fail with
    /// `FunctionNotFound`; a re-created function gets a fresh lock.
    pub async fn invalidate(&self, id: &FunctionId) {
        if let Some((_, lock)) = self.locks.remove(id) {
            let woken = lock.lock().await.invalidate();
            tracing::info!(function_id = %id, woken, "Invalidated scale lock");
        }
    }

    pub async fn snapshot(&self, id: &FunctionId) -> Option<LockSnapshot> {
        let lock = self.locks.get(id).map(|l| Arc::clone(l.value()))?;
        Some(lock.snapshot().await)
    }

    /// Replica-count increases issued for `id` so far. Lock-free.
    pub fn scale_ups(&self, id: &FunctionId) -> u64 {
        self.locks.get(id).map(|l| l.scale_ups()).unwrap_or(0)
    }

    pub fn tracked_functions(&self) -> Vec<FunctionId> {
        self.locks.iter().map(|l| l.key().clone()).collect()
    }
}

/// Run one scale-up episode to completion and wake every waiter.
async fn drive_episode(
    shared: Arc<Shared>,
    lock: Arc<ScaleLock>,
    projection: Projection,
    episode: u64,
    deadline: Instant,
) {
    let started = Instant::now();
    let function_id = lock.function_id().clone();
    let result = scale_up(&shared, &lock, &projection, deadline).await;
    let address = match result {
        Ok(()) => Some(resolve_address(&shared, &projection).await),
        Err(_) => None,
    };

    let mut inner = lock.lock().await;
    if inner.is_invalidated() || inner.episode() != episode {
        return;
    }

    let (target, outcome) = match (result, address) {
        (Ok(()), Some(address)) => {
            inner.mark_ready(
                address.clone(),
                Instant::now() + shared.settings.ready_cache_ttl,
            );
            (
                ScaleState::Ready,
                Ok(ReadyEndpoint {
                    function_id: function_id.clone(),
                    address,
                    episode,
                }),
            )
        }
        (Err(EpisodeFailure::Rejected(reason)), _) => (
            ScaleState::Idle,
            Err(InvokeError::ScaleError {
                function_id: function_id.clone(),
                reason,
            }),
        ),
        _ => (
            ScaleState::Idle,
            Err(InvokeError::ScaleTimeout {
                function_id: function_id.clone(),
                waited_ms: started.elapsed().as_millis() as u64,
            }),
        ),
    };

    if let Err(e) = inner.transition_to(target) {
        tracing::error!(function_id = %function_id, error = %e, "Scale episode ended in unexpected state");
    }
    // A failed episode may still leave its replica desired; the idle timer
    // reclaims it.
    lock.touch();
    let woken = inner.wake_all(outcome.clone());

    match &outcome {
        Ok(endpoint) => tracing::info!(
            function_id = %function_id,
            episode,
            woken,
            elapsed_ms = started.elapsed().as_millis() as u64,
            address = %endpoint.address,
            "Function ready"
        ),
        Err(e) => tracing::warn!(
            function_id = %function_id,
            episode,
            woken,
            error_kind = e.kind(),
            error = %e,
            "Scale-up episode failed"
        ),
    }

    if lock.is_zero_scalable() && !inner.has_idle_task() {
        arm_idle_watch(&shared, &lock, &mut inner, projection);
    }
}

fn arm_idle_watch(
    shared: &Arc<Shared>,
    lock: &Arc<ScaleLock>,
    inner: &mut LockInner,
    projection: Projection,
) {
    let task = tokio::spawn(idle_watch(
        Arc::clone(shared),
        Arc::clone(lock),
        projection,
    ));
    inner.set_idle_task(Some(task.abort_handle()));
}

/// A workload serves traffic only if it is meant to run and a replica is
/// ready. Terminating pods can report ready after a scale to zero.
fn serving(status: &WorkloadStatus) -> bool {
    status.desired_replicas >= 1 && status.ready_replicas >= 1
}

/// Ensure at least one replica is desired, then poll until one is ready.
async fn scale_up(
    shared: &Shared,
    lock: &ScaleLock,
    projection: &Projection,
    deadline: Instant,
) -> Result<(), EpisodeFailure> {
    let workload = projection.names.workload.as_str();
    let orchestrator = &shared.orchestrator;
    let mut requested = false;

    loop {
        match tokio::time::timeout_at(deadline, orchestrator.workload_status(workload)).await {
            Err(_) => return Err(EpisodeFailure::Timeout),
            Ok(Ok(status)) => {
                if serving(&status) {
                    return Ok(());
                }
                if !requested && status.desired_replicas >= 1 {
                    requested = true;
                } else if !requested {
                    let scaled = retry_until(&shared.settings.backoff, "scale_workload", deadline, || {
                        orchestrator.scale_workload(workload, 1)
                    })
                    .await;
                    match scaled {
                        Ok(()) => {
                            requested = true;
                            lock.record_scale_up();
                            tracing::info!(
                                function_id = %lock.function_id(),
                                workload,
                                "Requested one replica"
                            );
                        }
                        Err(e) if e.is_not_found() => {}
                        Err(_) if Instant::now() >= deadline => return Err(EpisodeFailure::Timeout),
                        Err(e) => return Err(EpisodeFailure::Rejected(e.to_string())),
                    }
                }
            }
            Ok(Err(e)) if e.is_not_found() || e.is_transient() => {
                tracing::debug!(workload, error = %e, "Workload status unavailable");
            }
            Ok(Err(e)) => return Err(EpisodeFailure::Rejected(e.to_string())),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(EpisodeFailure::Timeout);
        }
        tokio::time::sleep_until((now + shared.settings.poll_interval).min(deadline)).await;
    }
}

async fn resolve_address(shared: &Shared, projection: &Projection) -> String {
    match shared
        .orchestrator
        .get_endpoint(&projection.names.endpoint)
        .await
    {
        Ok(Some(endpoint)) => endpoint.address,
        _ => projection.endpoint.address.clone(),
    }
}

/// Scale a zero-scalable function to zero after `idle_timeout` without traffic.
async fn idle_watch(shared: Arc<Shared>, lock: Arc<ScaleLock>, projection: Projection) {
    let idle_timeout = shared.settings.idle_timeout;
    let function_id = lock.function_id().clone();

    loop {
        let idle_for = lock.idle_for();
        if lock.in_flight() > 0 {
            tokio::time::sleep(idle_timeout).await;
            continue;
        }
        if idle_for < idle_timeout {
            tokio::time::sleep(idle_timeout - idle_for).await;
            continue;
        }

        match shared.store.get(&function_id) {
            Some(stored) if stored.spec.is_zero_scalable() => {}
            _ => {
                lock.set_zero_scalable(false);
                lock.lock().await.set_idle_task(None);
                return;
            }
        }

        let mut inner = lock.lock().await;
        if inner.is_invalidated() {
            return;
        }
        if lock.in_flight() > 0 || lock.idle_for() < idle_timeout {
            continue;
        }
        match inner.state() {
            ScaleState::Ready => {}
            ScaleState::Idle => {
                // Replicas left behind by a failed episode or a previous
                // process. The section stays held so no episode overlaps.
                release_idle_replicas(&shared, &function_id, &projection).await;
                inner.set_idle_task(None);
                return;
            }
            ScaleState::ScalingUp | ScaleState::ScalingDown => {
                // The running episode re-arms the timer when it ends.
                inner.set_idle_task(None);
                return;
            }
        }

        if let Err(e) = inner.transition_to(ScaleState::ScalingDown) {
            tracing::error!(function_id = %function_id, error = %e, "Cannot start scale-down");
            return;
        }
        tracing::info!(
            function_id = %function_id,
            idle_ms = lock.idle_for().as_millis() as u64,
            "Idle timeout reached, scaling to zero"
        );

        let workload = projection.names.workload.as_str();
        let result = retry_transient(&shared.settings.backoff, "scale_workload", || {
            shared.orchestrator.scale_workload(workload, 0)
        })
        .await;

        match result {
            Ok(()) => {
                let _ = inner.transition_to(ScaleState::Idle);
                inner.clear_endpoint();
                inner.set_idle_task(None);
                tracing::info!(function_id = %function_id, "Scaled to zero");
                return;
            }
            Err(e) if e.is_not_found() => {
                let _ = inner.transition_to(ScaleState::Idle);
                inner.clear_endpoint();
                inner.set_idle_task(None);
                return;
            }
            Err(e) => {
                tracing::warn!(
                    function_id = %function_id,
                    error = %e,
                    "Scale-down failed, keeping replicas"
                );
                let _ = inner.transition_to(ScaleState::Ready);
                lock.touch();
            }
        }
    }
}

/// Scale an Idle function's workload to zero if it still wants replicas.
async fn release_idle_replicas(shared: &Shared, function_id: &FunctionId, projection: &Projection) {
    let workload = projection.names.workload.as_str();
    match shared.orchestrator.workload_status(workload).await {
        Ok(status) if status.desired_replicas >= 1 => {}
        Ok(_) => return,
        Err(e) => {
            tracing::debug!(function_id = %function_id, error = %e, "Cannot read idle workload");
            return;
        }
    }

    let result = retry_transient(&shared.settings.backoff, "scale_workload", || {
        shared.orchestrator.scale_workload(workload, 0)
    })
    .await;
    match result {
        Ok(()) => tracing::info!(function_id = %function_id, "Released idle replicas"),
        Err(e) if e.is_not_found() => {}
        Err(e) => tracing::warn!(
            function_id = %function_id,
            error = %e,
            "Cannot release idle replicas"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrchestrationError;
    use crate::memory::InMemoryOrchestrator;
    use crate::reconciler::Reconciler;
    use crate::spec::FunctionSpec;
    use crate::types::Port;

    struct Harness {
        backend: Arc<InMemoryOrchestrator>,
        store: Arc<DesiredStateStore>,
        controller: Arc<ScaleController>,
        reconciler: Reconciler,
    }

    fn settings() -> ScaleSettings {
        ScaleSettings {
            scale_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(50),
            idle_timeout: Duration::from_secs(60),
            ready_cache_ttl: Duration::from_millis(500),
            confirm_samples: 2,
            backoff: BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(100), 3),
        }
    }

    fn runtime() -> RuntimeSettings {
        RuntimeSettings {
            image: "faas-python-runner:latest".to_string(),
            service_port: Port::new(8080).unwrap(),
            namespace: "default".to_string(),
        }
    }

    async fn harness(readiness: Duration, settings: ScaleSettings) -> Harness {
        let backend = Arc::new(InMemoryOrchestrator::new(readiness));
        let store = DesiredStateStore::new_shared();
        let controller = Arc::new(ScaleController::new(
            backend.clone(),
            store.clone(),
            runtime(),
            settings.clone(),
        ));
        let reconciler = Reconciler::new(
            backend.clone(),
            store.clone(),
            runtime(),
            settings.backoff,
        );

        store.apply(
            FunctionSpec::builder("hello")
                .code("def main():\n    return 'hello'\n")
                .runtime("python3.9")
                .replicas(0, 3)
                .build()
                .unwrap(),
        );
        reconciler
            .reconcile(&FunctionId::new("hello").unwrap())
            .await
            .unwrap();

        Harness {
            backend,
            store,
            controller,
            reconciler,
        }
    }

    fn hello() -> FunctionId {
        FunctionId::new("hello").unwrap()
    }

    #[tokio::test]
    async fn test_unknown_function() {
        let h = harness(Duration::ZERO, settings()).await;
        let err = h
            .controller
            .ensure_scaled(&FunctionId::new("missing").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, InvokeError::FunctionNotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_scale_up() {
        let h = harness(Duration::from_millis(200), settings()).await;

        let mut handles = Vec::new();
        for _ in 0..32 {
            let controller = h.controller.clone();
            handles.push(tokio::spawn(async move {
                controller.ensure_scaled(&hello()).await
            }));
        }

        let mut endpoints = Vec::new();
        for handle in handles {
            endpoints.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(h.backend.mutations("scale_workload"), 1);
        assert!(endpoints.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(
            endpoints[0].address,
            "http://fn-hello-svc.default.svc.cluster.local:8080"
        );

        let snapshot = h.controller.snapshot(&hello()).await.unwrap();
        assert_eq!(snapshot.state, ScaleState::Ready);
        assert_eq!(snapshot.scale_ups, 1);
        assert_eq!(snapshot.waiters, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_warm_path_issues_no_mutation() {
        let h = harness(Duration::from_millis(100), settings()).await;
        h.controller.ensure_scaled(&hello()).await.unwrap();
        let after_first = h.backend.total_mutations();

        h.controller.ensure_scaled(&hello()).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        h.controller.ensure_scaled(&hello()).await.unwrap();

        assert_eq!(h.backend.total_mutations(), after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_ready_times_out_and_resets() {
        let h = harness(Duration::ZERO, settings()).await;
        h.backend.set_never_ready(true);

        let start = Instant::now();
        let err = h.controller.ensure_scaled(&hello()).await.unwrap_err();
        assert!(matches!(err, InvokeError::ScaleTimeout { .. }));
        assert!(start.elapsed() <= settings().scale_timeout + settings().poll_interval);

        tokio::time::sleep(Duration::from_millis(10)).await;
        let snapshot = h.controller.snapshot(&hello()).await.unwrap();
        assert_eq!(snapshot.state, ScaleState::Idle);

        h.backend.set_never_ready(false);
        assert!(h.controller.ensure_scaled(&hello()).await.is_ok());
        assert_eq!(h.controller.snapshot(&hello()).await.unwrap().episode, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_mutation_is_scale_error() {
        let h = harness(Duration::ZERO, settings()).await;
        h.backend.fail_next(
            "scale_workload",
            1,
            OrchestrationError::Rejected {
                operation: "scale_workload",
                reason: "forbidden".to_string(),
            },
        );

        let err = h.controller.ensure_scaled(&hello()).await.unwrap_err();
        assert!(matches!(err, InvokeError::ScaleError { .. }));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.controller.ensure_scaled(&hello()).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_mutation_failure_is_retried() {
        let h = harness(Duration::ZERO, settings()).await;
        h.backend.fail_next(
            "scale_workload",
            2,
            OrchestrationError::Transient {
                operation: "scale_workload",
                reason: "503".to_string(),
            },
        );

        assert!(h.controller.ensure_scaled(&hello()).await.is_ok());
        assert_eq!(h.backend.mutations("scale_workload"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_replicas_are_not_rescaled() {
        let h = harness(Duration::ZERO, settings()).await;
        h.backend.external_scale("fn-hello-deploy", 3);

        assert!(h.controller.ensure_scaled(&hello()).await.is_ok());
        assert_eq!(h.backend.mutations("scale_workload"), 0);
        assert_eq!(h.backend.replicas("fn-hello-deploy"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_readiness_starts_new_episode() {
        let h = harness(Duration::ZERO, settings()).await;
        h.controller.ensure_scaled(&hello()).await.unwrap();

        h.backend.external_scale("fn-hello-deploy", 0);
        tokio::time::advance(Duration::from_secs(1)).await;

        let endpoint = h.controller.ensure_scaled(&hello()).await.unwrap();
        assert_eq!(endpoint.episode, 2);
        assert_eq!(h.backend.mutations("scale_workload"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_scales_to_zero() {
        let mut s = settings();
        s.idle_timeout = Duration::from_secs(5);
        let h = harness(Duration::ZERO, s).await;

        h.controller.ensure_scaled(&hello()).await.unwrap();
        assert_eq!(h.backend.replicas("fn-hello-deploy"), Some(1));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(h.backend.replicas("fn-hello-deploy"), Some(0));
        let snapshot = h.controller.snapshot(&hello()).await.unwrap();
        assert_eq!(snapshot.state, ScaleState::Idle);

        assert!(h.controller.ensure_scaled(&hello()).await.is_ok());
        assert_eq!(h.backend.replicas("fn-hello-deploy"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminating_replicas_do_not_count_as_ready() {
        let mut s = settings();
        s.idle_timeout = Duration::from_secs(5);
        let h = harness(Duration::ZERO, s).await;
        h.backend.set_termination_grace(Duration::from_secs(30));

        h.controller.ensure_scaled(&hello()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(h.backend.replicas("fn-hello-deploy"), Some(0));
        let status = h.controller.current_replicas(&hello()).await.unwrap();
        assert_eq!(status.ready_replicas, 1);

        let endpoint = h.controller.ensure_scaled(&hello()).await.unwrap();
        assert_eq!(endpoint.episode, 2);
        // up, down, up
        assert_eq!(h.backend.mutations("scale_workload"), 3);
        assert_eq!(h.backend.replicas("fn-hello-deploy"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_readiness_ignores_terminating_replicas() {
        let h = harness(Duration::ZERO, settings()).await;
        h.backend.set_termination_grace(Duration::from_secs(30));
        h.controller.ensure_scaled(&hello()).await.unwrap();

        h.backend.external_scale("fn-hello-deploy", 0);
        tokio::time::advance(Duration::from_secs(1)).await;

        let endpoint = h.controller.ensure_scaled(&hello()).await.unwrap();
        assert_eq!(endpoint.episode, 2);
        assert_eq!(h.backend.mutations("scale_workload"), 2);
        assert_eq!(h.backend.replicas("fn-hello-deploy"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_replica_from_timed_out_episode_returns_to_zero() {
        let mut s = settings();
        s.idle_timeout = Duration::from_secs(5);
        let h = harness(Duration::ZERO, s).await;
        h.backend.set_never_ready(true);

        let err = h.controller.ensure_scaled(&hello()).await.unwrap_err();
        assert!(matches!(err, InvokeError::ScaleTimeout { .. }));
        assert_eq!(h.backend.replicas("fn-hello-deploy"), Some(1));

        // The pod comes up after every caller gave up.
        h.backend.set_never_ready(false);
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert_eq!(h.backend.replicas("fn-hello-deploy"), Some(0));
        assert_eq!(h.backend.mutations("scale_workload"), 2);
        let snapshot = h.controller.snapshot(&hello()).await.unwrap();
        assert_eq!(snapshot.state, ScaleState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_adopts_running_replicas() {
        let mut s = settings();
        s.idle_timeout = Duration::from_secs(5);
        let h = harness(Duration::ZERO, s).await;
        let reconciler = Reconciler::new(
            h.backend.clone(),
            h.store.clone(),
            runtime(),
            settings().backoff,
        )
        .with_scale_controller(h.controller.clone());

        // Left running by a previous process.
        h.backend.external_scale("fn-hello-deploy", 1);
        reconciler.reconcile(&hello()).await.unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        h.controller.ensure_scaled(&hello()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.backend.replicas("fn-hello-deploy"), Some(1));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(h.backend.replicas("fn-hello-deploy"), Some(0));
        // Only the scale-down; the running replica was reused.
        assert_eq!(h.backend.mutations("scale_workload"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_idle_ignores_always_on_functions() {
        let h = harness(Duration::ZERO, settings()).await;
        h.store.apply(
            FunctionSpec::builder("hello")
                .code("def main():\n    return 'hello'\n")
                .runtime("python3.9")
                .replicas(1, 1)
                .build()
                .unwrap(),
        );
        h.backend.external_scale("fn-hello-deploy", 1);

        h.controller.watch_idle(&hello()).await;
        assert!(h.controller.snapshot(&hello()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_request_blocks_scale_down() {
        let mut s = settings();
        s.idle_timeout = Duration::from_secs(5);
        let h = harness(Duration::ZERO, s).await;

        h.controller.ensure_scaled(&hello()).await.unwrap();
        let guard = h.controller.begin_request(&hello());

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(h.backend.replicas("fn-hello-deploy"), Some(1));

        drop(guard);
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(h.backend.replicas("fn-hello-deploy"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_fails_waiters() {
        let h = harness(Duration::ZERO, settings()).await;
        h.backend.set_never_ready(true);

        let controller = h.controller.clone();
        let waiter = tokio::spawn(async move { controller.ensure_scaled(&hello()).await });
        tokio::time::sleep(Duration::from_millis(100)).await;

        h.store.delete(&hello());
        h.controller.invalidate(&hello()).await;

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, InvokeError::FunctionNotFound(_)));
        assert!(h.controller.snapshot(&hello()).await.is_none());

        let err = h.controller.ensure_scaled(&hello()).await.unwrap_err();
        assert!(matches!(err, InvokeError::FunctionNotFound(_)));
    }

    #[tokio::test]
    async fn test_current_replicas_reads_platform() {
        let h = harness(Duration::ZERO, settings()).await;
        assert_eq!(
            h.controller.current_replicas(&hello()).await.unwrap(),
            WorkloadStatus::default()
        );

        h.backend.external_scale("fn-hello-deploy", 2);
        let status = h.controller.current_replicas(&hello()).await.unwrap();
        assert_eq!(status.desired_replicas, 2);
        assert_eq!(status.ready_replicas, 2);

        // The reconciler never resets a replica count it did not set.
        h.reconciler.reconcile(&hello()).await.unwrap();
        assert_eq!(h.backend.replicas("fn-hello-deploy"), Some(2));
    }
}
