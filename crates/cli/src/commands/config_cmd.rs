//! `caduceus config` — Configuration commands.

use std::path::Path;

use caduceus_config::AppConfig;

pub fn print_default() {
    println!("# Save as {}", AppConfig::config_dir().join("config.toml").display());
    print!("{}", AppConfig::default_toml());
}

pub fn check(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    let config = match super::load_config(path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };

    println!("   ✅ Config parsed and validated");
    if !config.has_api_key() && config.provider.kind != "ollama" {
        println!("   ⚠️  No API key set (CADUCEUS_API_KEY, ANTHROPIC_API_KEY or OPENAI_API_KEY)");
    }

    println!();
    println!("   Provider:        {}", config.provider.kind);
    println!("   Model:           {}", config.provider.model);
    println!("   Max iterations:  {}", config.agent.max_iterations);
    println!("   Tool timeout:    {}s", config.agent.capability_timeout_secs);
    println!(
        "   Telemetry:       {}",
        if config.telemetry.enabled { "on" } else { "off" }
    );
    Ok(())
}
