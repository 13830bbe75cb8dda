// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `zw list` command - List functions from configuration.

use zerowake_core::{projector::code_hash, ConfigLoader};

pub async fn execute(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = ConfigLoader::load_file(config_path)?;

    if config.functions.is_empty() {
        println!("No functions defined in configuration.");
        return Ok(());
    }

    println!("╔══════════════════════════════════════════════════════════════════════════════╗");
    println!("║                           CONFIGURED FUNCTIONS                               ║");
    println!("╠═══════════════════╦════════════╦═══════════════════╦═════════════════════════╣");
    println!("║ ID                ║ Replicas   ║ Runtime           ║ Code (sha256)           ║");
    println!("╠═══════════════════╬════════════╬═══════════════════╬═════════════════════════╣");

    for func in &config.functions {
        let hash = code_hash(&func.code);
        println!(
            "║ {:<17} ║ {:<10} ║ {:<17} ║ {:<23} ║",
            func.id.as_str(),
            format!("{}..{}", func.min_replicas(), func.max_replicas()),
            func.runtime.as_str(),
            &hash[..12]
        );
    }

    println!("╚═══════════════════╩════════════╩═══════════════════╩═════════════════════════╝");
    println!();
    println!("Total: {} function(s)", config.functions.len());

    Ok(())
}
