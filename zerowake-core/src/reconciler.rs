// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Reconciler.
//!
//! Keeps the platform objects of every function aligned with its declared
//! spec. `reconcile(id)` is idempotent: it reads the spec, projects the
//! expected objects, reads the actual ones and only writes fields that
//! differ. Replica counts are written once, at workload creation; after
//! that they belong to the autoscaler or the scale controller.
//!
//! `run` drives reconciliation from a deduplicating work queue fed by store
//! events, orchestration drift events and a periodic resync.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinSet;

use crate::backoff::BackoffPolicy;
use crate::config::RuntimeSettings;
use crate::error::{OrchestrationError, OrchestrationResult, ReconcileError};
use crate::objects::{ObjectEvent, ObjectKind, ObjectNames};
use crate::orchestrator::OrchestrationApi;
use crate::projector::project;
use crate::scale::ScaleController;
use crate::store::{Condition, DesiredStateStore};
use crate::types::FunctionId;

/// What a single reconcile pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub created: Vec<ObjectKind>,
    pub patched: Vec<ObjectKind>,
    pub deleted: Vec<ObjectKind>,
    /// Replica floor applied, if any.
    pub scaled_to: Option<u32>,
}

impl ReconcileOutcome {
    /// True when the pass issued no mutation.
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.patched.is_empty()
            && self.deleted.is_empty()
            && self.scaled_to.is_none()
    }
}

/// Drift-correcting reconciler.
pub struct Reconciler {
    orchestrator: Arc<dyn OrchestrationApi>,
    store: Arc<DesiredStateStore>,
    runtime: RuntimeSettings,
    backoff: BackoffPolicy,
    scale: Option<Arc<ScaleController>>,
}

impl Reconciler {
    pub fn new(
        orchestrator: Arc<dyn OrchestrationApi>,
        store: Arc<DesiredStateStore>,
        runtime: RuntimeSettings,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            orchestrator,
            store,
            runtime,
            backoff,
            scale: None,
        }
    }

    /// Invalidate scale locks when a function is torn down.
    pub fn with_scale_controller(mut self, scale: Arc<ScaleController>) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Converge the objects of one function. Safe to call repeatedly.
    pub async fn reconcile(&self, id: &FunctionId) -> Result<ReconcileOutcome, ReconcileError> {
        let Some(stored) = self.store.get(id) else {
            return self.teardown(id).await;
        };
        let spec = stored.spec;
        let expected = project(&spec, &self.runtime);
        let api = &self.orchestrator;
        let mut outcome = ReconcileOutcome::default();

        // Code object first: the workload mounts it.
        match api.get_code(&expected.code.name).await? {
            None => {
                tolerate_exists(api.create_code(&expected.code).await)?;
                outcome.created.push(ObjectKind::Code);
            }
            Some(actual) if actual.data != expected.code.data || actual.labels != expected.code.labels => {
                api.replace_code(&expected.code).await?;
                outcome.patched.push(ObjectKind::Code);
            }
            Some(_) => {}
        }

        let running = match api.get_workload(&expected.workload.name).await? {
            None => {
                tolerate_exists(api.create_workload(&expected.workload).await)?;
                outcome.created.push(ObjectKind::Workload);
                tracing::info!(
                    function_id = %id,
                    workload = %expected.workload.name,
                    replicas = expected.workload.replicas,
                    "Created workload"
                );
                expected.workload.replicas
            }
            Some(actual) => {
                if let Some(patch) = actual.diff(&expected.workload) {
                    api.patch_workload(&expected.workload.name, &patch).await?;
                    outcome.patched.push(ObjectKind::Workload);
                    tracing::info!(
                        function_id = %id,
                        labels = patch.labels.is_some(),
                        template = patch.template.is_some(),
                        "Patched workload"
                    );
                }
                // Without an autoscaler nobody else raises a non-zero floor.
                let floor = spec.min_replicas();
                if floor >= 1 && !spec.wants_autoscaler() && actual.replicas < floor {
                    api.scale_workload(&expected.workload.name, floor).await?;
                    outcome.scaled_to = Some(floor);
                    tracing::info!(function_id = %id, replicas = floor, "Raised replica floor");
                }
                actual.replicas
            }
        };

        match api.get_endpoint(&expected.endpoint.name).await? {
            None => {
                tolerate_exists(api.create_endpoint(&expected.endpoint).await)?;
                outcome.created.push(ObjectKind::Endpoint);
            }
            Some(actual) if actual.drifted_from(&expected.endpoint) => {
                api.replace_endpoint(&expected.endpoint).await?;
                outcome.patched.push(ObjectKind::Endpoint);
            }
            Some(_) => {}
        }

        let actual_autoscaler = api.get_autoscaler(&expected.names.autoscaler).await?;
        match (&expected.autoscaler, actual_autoscaler) {
            (Some(wanted), None) => {
                tolerate_exists(api.create_autoscaler(wanted).await)?;
                outcome.created.push(ObjectKind::Autoscaler);
            }
            (Some(wanted), Some(actual)) if &actual != wanted => {
                api.replace_autoscaler(wanted).await?;
                outcome.patched.push(ObjectKind::Autoscaler);
            }
            (None, Some(_)) => {
                tolerate_missing(api.delete_autoscaler(&expected.names.autoscaler).await)?;
                outcome.deleted.push(ObjectKind::Autoscaler);
            }
            _ => {}
        }

        // Replicas nobody is timing, e.g. after a restart.
        if let Some(scale) = &self.scale {
            if running >= 1 && spec.is_zero_scalable() {
                scale.watch_idle(id).await;
            }
        }

        if !outcome.is_noop() {
            tracing::debug!(function_id = %id, ?outcome, "Reconciled");
        }
        Ok(outcome)
    }

    /// Remove every derived object of a deleted function.
    async fn teardown(&self, id: &FunctionId) -> Result<ReconcileOutcome, ReconcileError> {
        let names = ObjectNames::for_function(id);
        let api = &self.orchestrator;
        let mut outcome = ReconcileOutcome::default();

        if let Some(scale) = &self.scale {
            scale.invalidate(id).await;
        }

        if tolerate_missing(api.delete_autoscaler(&names.autoscaler).await)? {
            outcome.deleted.push(ObjectKind::Autoscaler);
        }
        if tolerate_missing(api.delete_endpoint(&names.endpoint).await)? {
            outcome.deleted.push(ObjectKind::Endpoint);
        }
        if tolerate_missing(api.delete_workload(&names.workload).await)? {
            outcome.deleted.push(ObjectKind::Workload);
        }
        if tolerate_missing(api.delete_code(&names.code).await)? {
            outcome.deleted.push(ObjectKind::Code);
        }

        if !outcome.deleted.is_empty() {
            tracing::info!(function_id = %id, deleted = ?outcome.deleted, "Tore down function");
        }
        Ok(outcome)
    }

    /// Reconcile with exponential backoff on transient failures, recording
    /// the result as the function's status condition.
    pub async fn reconcile_with_retry(
        &self,
        id: &FunctionId,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let generation = self.store.get(id).map(|f| f.generation);
        let max_attempts = self.backoff.max_attempts();
        let mut attempt = 0;

        loop {
            let error = match self.reconcile(id).await {
                Ok(outcome) => {
                    if let Some(generation) = generation {
                        self.store.record_condition(id, Condition::ready(generation));
                    }
                    return Ok(outcome);
                }
                Err(e) => e,
            };

            let transient = matches!(&error, ReconcileError::Orchestration(e) if e.is_transient());
            if transient && attempt + 1 < max_attempts {
                let delay = self.backoff.delay_for(attempt);
                tracing::debug!(
                    function_id = %id,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Reconcile failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            let error = if transient {
                ReconcileError::RetriesExhausted {
                    attempts: attempt + 1,
                    last_error: error.to_string(),
                }
            } else {
                error
            };
            tracing::warn!(function_id = %id, error = %error, "Reconcile failed");
            if let Some(generation) = generation {
                self.store
                    .record_condition(id, Condition::failed(generation, error.to_string()));
            }
            return Err(error);
        }
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, resync_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut spec_events = self.store.subscribe();
        let mut drift_events = self.orchestrator.subscribe();
        let mut resync = tokio::time::interval(resync_interval);
        resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut queue = WorkQueue::default();
        let mut tasks = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, FunctionId> = HashMap::new();

        tracing::info!(
            backend = self.orchestrator.name(),
            watch = drift_events.is_some(),
            resync_ms = resync_interval.as_millis() as u64,
            "Reconciler started"
        );

        loop {
            while let Some(id) = queue.pop() {
                let this = Arc::clone(&self);
                let task_id = id.clone();
                let handle = tasks.spawn(async move {
                    let _ = this.reconcile_with_retry(&task_id).await;
                });
                running.insert(handle.id(), id);
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    let task_id = match joined {
                        Ok((task_id, ())) => task_id,
                        Err(e) => {
                            tracing::error!(error = %e, "Reconcile task failed");
                            e.id()
                        }
                    };
                    if let Some(id) = running.remove(&task_id) {
                        queue.done(&id);
                    }
                }
                _ = resync.tick() => {
                    for id in self.store.ids() {
                        queue.push(id);
                    }
                }
                event = spec_events.recv() => match event {
                    Ok(event) => queue.push(event.function_id().clone()),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Spec events lagged, resyncing");
                        for id in self.store.ids() {
                            queue.push(id);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = recv_drift(&mut drift_events) => match event {
                    Ok(ObjectEvent { function_id: Some(id), kind, change, .. }) => {
                        tracing::debug!(function_id = %id, kind = %kind, ?change, "Drift observed");
                        queue.push(id);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Drift events lagged, resyncing");
                        for id in self.store.ids() {
                            queue.push(id);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => drift_events = None,
                },
            }
        }

        tasks.shutdown().await;
        tracing::info!("Reconciler stopped");
    }
}

async fn recv_drift(
    rx: &mut Option<broadcast::Receiver<ObjectEvent>>,
) -> Result<ObjectEvent, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// "Already exists" on create means a concurrent writer won; the next pass
/// compares fields as usual.
fn tolerate_exists(result: OrchestrationResult<()>) -> OrchestrationResult<()> {
    match result {
        Err(e) if e.is_already_exists() => Ok(()),
        other => other,
    }
}

/// Returns whether something was deleted.
fn tolerate_missing(result: OrchestrationResult<()>) -> Result<bool, OrchestrationError> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Deduplicating work queue. An id enqueued while its reconcile is running
/// is run again once that reconcile finishes.
#[derive(Debug, Default)]
struct WorkQueue {
    pending: VecDeque<FunctionId>,
    queued: HashSet<FunctionId>,
    active: HashSet<FunctionId>,
    dirty: HashSet<FunctionId>,
}

impl WorkQueue {
    fn push(&mut self, id: FunctionId) {
        if self.active.contains(&id) {
            self.dirty.insert(id);
        } else if self.queued.insert(id.clone()) {
            self.pending.push_back(id);
        }
    }

    fn pop(&mut self) -> Option<FunctionId> {
        let id = self.pending.pop_front()?;
        self.queued.remove(&id);
        self.active.insert(id.clone());
        Some(id)
    }

    fn done(&mut self, id: &FunctionId) {
        self.active.remove(id);
        if self.dirty.remove(id) {
            self.push(id.clone());
        }
    }
}
