//! `zw apply` command - Create or update functions on a running gateway.

use zerowake_core::ConfigLoader;

use crate::client::GatewayClient;

pub async fn execute(file: &str, gateway: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, gateway = %gateway, "Applying function specs");

    // Validate locally first so a bad file never reaches the gateway
    let specs = ConfigLoader::load_functions(file)?;
    let client = GatewayClient::new(gateway)?;

    for spec in &specs {
        let applied = client.apply(spec).await?;
        println!(
            "  • {} (replicas: {}..{}, generation: {})",
            spec.id,
            spec.min_replicas(),
            spec.max_replicas(),
            applied.generation
        );
    }

    println!();
    println!("✓ Applied {} function(s)", specs.len());
    Ok(())
}
