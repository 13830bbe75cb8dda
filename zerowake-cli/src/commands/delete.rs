//! `zw delete` command - Remove a function from a running gateway.

use crate::client::GatewayClient;

pub async fn execute(id: &str, gateway: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(function_id = %id, gateway = %gateway, "Deleting function");

    GatewayClient::new(gateway)?.delete(id).await?;
    println!("✓ {} deleted; its workload will be torn down", id);
    Ok(())
}
