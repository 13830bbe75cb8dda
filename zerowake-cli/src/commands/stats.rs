//! `zw stats` command - Show function status from a running gateway.

use std::time::Duration;

use zerowake_core::{FunctionStatus, StatusReport};

use crate::client::GatewayClient;
use crate::tui;

const WATCH_INTERVAL: Duration = Duration::from_secs(2);

pub async fn execute(
    gateway: &str,
    watch: bool,
    dashboard: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if dashboard {
        // Run the TUI dashboard
        tui::run_dashboard(gateway).await?;
        return Ok(());
    }

    let client = GatewayClient::new(gateway)?;
    loop {
        let report = client.status().await?;
        if watch {
            // Clear screen, cursor home
            print!("\x1B[2J\x1B[H");
        }
        print_report(&report);

        if !watch {
            return Ok(());
        }
        tokio::select! {
            _ = tokio::time::sleep(WATCH_INTERVAL) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

fn print_report(report: &StatusReport) {
    println!("╔══════════════════════════════════════════════════════════════════════════════╗");
    println!("║                            ZEROWAKE STATUS                                   ║");
    println!("╠═══════════════════╦════════════╦══════════╦═════════╦════════════════════════╣");
    println!("║ ID                ║ Scale      ║ Replicas ║ Waiters ║ Reconcile              ║");
    println!("╠═══════════════════╬════════════╬══════════╬═════════╬════════════════════════╣");

    for function in &report.functions {
        println!(
            "║ {:<17} ║ {:<10} ║ {:<8} ║ {:<7} ║ {:<22} ║",
            function.id.as_str(),
            scale_label(function),
            replicas_label(function),
            function.waiters,
            reconcile_label(function)
        );
    }

    println!("╚═══════════════════╩════════════╩══════════╩═════════╩════════════════════════╝");
    println!();
    println!("Total: {} function(s)", report.functions.len());

    for function in &report.functions {
        if let Some(error) = &function.last_error {
            println!("  ✗ {}: {}", function.id, error);
        }
    }
}

pub fn scale_label(function: &FunctionStatus) -> String {
    function
        .scale_state
        .map(|s| s.to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// `ready/desired`, or `?` when the platform could not be read.
pub fn replicas_label(function: &FunctionStatus) -> String {
    match (function.ready_replicas, function.desired_replicas) {
        (Some(ready), Some(desired)) => format!("{}/{}", ready, desired),
        _ => "?".to_string(),
    }
}

pub fn reconcile_label(function: &FunctionStatus) -> String {
    match function.observed_generation {
        Some(observed) => format!(
            "{} (gen {}/{})",
            function.phase.as_str(),
            observed,
            function.generation
        ),
        None => function.phase.as_str().to_string(),
    }
}
