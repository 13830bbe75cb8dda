// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Control plane wiring.
//!
//! Builds the store, scale controller, reconciler and admission gateway on
//! top of one orchestration backend, and owns the shutdown signal.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{InvokeError, ZeroWakeResult};
use crate::gateway::{AdmissionGateway, Forwarder, HttpForwarder, Invocation, InvocationResponse};
use crate::orchestrator::OrchestrationApi;
use crate::reconciler::Reconciler;
use crate::scale::{ScaleController, ScaleSettings};
use crate::spec::FunctionSpec;
use crate::status::{self, FunctionStatus, StatusReport};
use crate::store::DesiredStateStore;
use crate::types::FunctionId;

pub struct ControlPlane {
    config: Config,
    orchestrator: Arc<dyn OrchestrationApi>,
    store: Arc<DesiredStateStore>,
    scale: Arc<ScaleController>,
    reconciler: Arc<Reconciler>,
    gateway: Arc<AdmissionGateway>,
    shutdown: watch::Sender<bool>,
}

impl ControlPlane {
    /// Wire a control plane that forwards invocations over HTTP.
    pub fn new(config: Config, orchestrator: Arc<dyn OrchestrationApi>) -> ZeroWakeResult<Self> {
        let forwarder = HttpForwarder::new(
            config.gateway.forward_timeout,
            config.gateway.forward_connect_timeout,
        )?;
        Ok(Self::with_forwarder(config, orchestrator, Arc::new(forwarder)))
    }

    pub fn with_forwarder(
        config: Config,
        orchestrator: Arc<dyn OrchestrationApi>,
        forwarder: Arc<dyn Forwarder>,
    ) -> Self {
        let store = DesiredStateStore::new_shared();
        let backoff = config.reconciler.backoff;

        let scale = Arc::new(ScaleController::new(
            Arc::clone(&orchestrator),
            Arc::clone(&store),
            config.runtime.clone(),
            ScaleSettings::from_config(&config.gateway, backoff),
        ));
        let reconciler = Arc::new(
            Reconciler::new(
                Arc::clone(&orchestrator),
                Arc::clone(&store),
                config.runtime.clone(),
                backoff,
            )
            .with_scale_controller(Arc::clone(&scale)),
        );
        let gateway = Arc::new(AdmissionGateway::new(
            Arc::clone(&store),
            Arc::clone(&scale),
            forwarder,
        ));
        let (shutdown, _) = watch::channel(false);

        Self {
            config,
            orchestrator,
            store,
            scale,
            reconciler,
            gateway,
            shutdown,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<DesiredStateStore> {
        &self.store
    }

    pub fn scale(&self) -> &Arc<ScaleController> {
        &self.scale
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn gateway(&self) -> &Arc<AdmissionGateway> {
        &self.gateway
    }

    pub fn orchestrator(&self) -> &Arc<dyn OrchestrationApi> {
        &self.orchestrator
    }

    /// Load initial specs into the store. Returns how many were applied.
    pub fn seed(&self, functions: impl IntoIterator<Item = FunctionSpec>) -> usize {
        let mut count = 0;
        for spec in functions {
            self.store.apply(spec);
            count += 1;
        }
        count
    }

    pub fn apply(&self, spec: FunctionSpec) -> u64 {
        self.store.apply(spec)
    }

    pub fn delete(&self, id: &FunctionId) -> bool {
        self.store.delete(id)
    }

    /// Spawn the reconciler loop.
    pub fn start(&self) -> JoinHandle<()> {
        let reconciler = Arc::clone(&self.reconciler);
        let resync = self.config.reconciler.resync_interval;
        let shutdown = self.shutdown.subscribe();
        tokio::spawn(reconciler.run(resync, shutdown))
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub async fn invoke(
        &self,
        id: &FunctionId,
        invocation: Invocation,
    ) -> Result<InvocationResponse, InvokeError> {
        self.gateway.invoke(id, invocation).await
    }

    pub async fn status(&self) -> StatusReport {
        status::status_report(&self.store, &self.scale).await
    }

    pub async fn function_status(&self, id: &FunctionId) -> Option<FunctionStatus> {
        status::function_status(&self.store, &self.scale, id).await
    }
}
