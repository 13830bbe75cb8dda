// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `zw validate` command - Validate configuration file.

use zerowake_core::ConfigLoader;

pub async fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            let gateway = &config.gateway;
            println!("✓ Configuration is valid");
            println!();
            println!("Gateway Settings:");
            println!("  Listen Port:        {}", gateway.listen_port);
            println!("  Metrics Port:       {}", gateway.metrics_port);
            println!("  Namespace:          {}", gateway.namespace);
            println!("  Scale Timeout:      {}ms", gateway.scale_timeout.as_millis());
            println!("  Poll Interval:      {}ms", gateway.poll_interval.as_millis());
            println!("  Idle Timeout:       {}ms", gateway.idle_timeout.as_millis());
            println!(
                "  Resync Interval:    {}ms",
                config.reconciler.resync_interval.as_millis()
            );
            println!("  Runtime Image:      {}", config.runtime.image);
            println!();
            println!("Functions ({}):", config.functions.len());
            for func in &config.functions {
                println!(
                    "  - {} (runtime: {}, replicas: {}..{}, {})",
                    func.id,
                    func.runtime,
                    func.min_replicas(),
                    func.max_replicas(),
                    if func.is_zero_scalable() {
                        "scale-to-zero"
                    } else if func.wants_autoscaler() {
                        "cpu autoscaled"
                    } else {
                        "fixed"
                    }
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
