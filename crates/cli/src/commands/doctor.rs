//! `caduceus doctor` — Diagnose configuration and provider health.

use std::path::Path;
use std::time::Duration;

use caduceus_config::AppConfig;
use caduceus_providers::{ProviderSettings, build};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(15);

pub async fn run(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 Caduceus Doctor — System Diagnostics");
    println!("=======================================\n");

    let mut issues = 0;

    let config_path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| AppConfig::config_dir().join("config.toml"));
    if config_path.exists() {
        println!("  ✅ Config file found at {}", config_path.display());
    } else {
        println!("  ⚠️  No config file at {} — using defaults", config_path.display());
    }

    let config = match super::load_config(path) {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            println!("\n  ⚠️  1 issue(s) found. See above for details.");
            return Ok(());
        }
    };

    let settings = ProviderSettings::from_config(&config.provider);
    match build(&settings) {
        Ok(provider) => {
            println!("  ✅ Provider '{}' configured ({})", provider.name(), config.provider.model);
            match tokio::time::timeout(HEALTH_TIMEOUT, provider.health_check()).await {
                Ok(Ok(true)) => println!("  ✅ Provider reachable"),
                Ok(Ok(false)) => {
                    println!("  ❌ Provider responded but reported unhealthy");
                    issues += 1;
                }
                Ok(Err(e)) => {
                    println!("  ❌ Provider check failed: {e}");
                    issues += 1;
                }
                Err(_) => {
                    println!("  ❌ Provider check timed out after {}s", HEALTH_TIMEOUT.as_secs());
                    issues += 1;
                }
            }
        }
        Err(e) => {
            println!("  ❌ Provider not usable: {e}");
            issues += 1;
        }
    }

    let tools = caduceus_tools::default_registry();
    println!("  ✅ {} built-in calculators: {}", tools.len(), tools.names().join(", "));

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
