//! `zw up` command - Start the gateway and reconciler.
//!
//! Seeds the desired-state store from the configuration file, starts the
//! reconciler loop, the metrics server and the HTTP gateway, and runs until
//! Ctrl+C.

use std::sync::Arc;
use std::time::Duration;

use zerowake_core::{ConfigLoader, ControlPlane, InMemoryOrchestrator, OrchestrationApi};

use crate::{http, metrics, Backend};

/// Readiness delay of the simulated cluster.
const SIMULATED_READINESS: Duration = Duration::from_millis(1500);

pub async fn execute(
    config_path: &str,
    foreground: bool,
    backend: Backend,
) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(config = %config_path, foreground = %foreground, ?backend, "Starting gateway");

    // Load and validate configuration - fail fast on invalid config
    let config = ConfigLoader::load_file(config_path)?;
    let listen_port = config.gateway.listen_port.value();
    let metrics_port = config.gateway.metrics_port.value();

    tracing::info!(
        functions = config.functions.len(),
        namespace = %config.gateway.namespace,
        "Configuration validated successfully"
    );

    let orchestrator = build_orchestrator(backend, &config.gateway.namespace).await?;
    tracing::info!(backend = orchestrator.name(), "Orchestration backend ready");

    let functions = config.functions.clone();
    let plane = Arc::new(ControlPlane::new(config, orchestrator)?);
    plane.seed(functions);
    let reconciler = plane.start();

    metrics::start_metrics_server(metrics_port, Arc::clone(&plane));

    if foreground {
        println!("╔══════════════════════════════════════════════════════════════╗");
        println!("║                     ZEROWAKE GATEWAY                         ║");
        println!("╠══════════════════════════════════════════════════════════════╣");
        for id in plane.store().ids() {
            let mode = match plane.store().spec(&id) {
                Ok(spec) if spec.is_zero_scalable() => "scale-to-zero",
                Ok(_) => "always-on",
                Err(_) => "-",
            };
            println!(
                "║ ○ {:<20} → http://localhost:{}/invoke/{} [{}]",
                id.as_str(),
                listen_port,
                id,
                mode
            );
        }
        println!("╚══════════════════════════════════════════════════════════════╝");
        println!();
        println!("Metrics on http://localhost:{}/metrics", metrics_port);
        println!("Press Ctrl+C to stop...");
        println!();
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };
    let served = http::serve(listen_port, Arc::clone(&plane), shutdown).await;

    tracing::info!("Shutting down gateway");
    plane.shutdown();
    let _ = reconciler.await;

    if foreground {
        println!();
        println!("Gateway stopped.");
    }

    served.map_err(|e| -> Box<dyn std::error::Error> { e })
}

async fn build_orchestrator(
    backend: Backend,
    namespace: &str,
) -> Result<Arc<dyn OrchestrationApi>, Box<dyn std::error::Error>> {
    match backend {
        Backend::Memory => Ok(Arc::new(InMemoryOrchestrator::new(SIMULATED_READINESS))),
        Backend::Kube => kube_orchestrator(namespace).await,
    }
}

#[cfg(feature = "kube")]
async fn kube_orchestrator(
    namespace: &str,
) -> Result<Arc<dyn OrchestrationApi>, Box<dyn std::error::Error>> {
    let orchestrator = zerowake_core::k8s::KubeOrchestrator::new(namespace).await?;
    Ok(Arc::new(orchestrator))
}

#[cfg(not(feature = "kube"))]
async fn kube_orchestrator(
    _namespace: &str,
) -> Result<Arc<dyn OrchestrationApi>, Box<dyn std::error::Error>> {
    Err("zw was built without the `kube` feature; rebuild with --features kube".into())
}
