//! `pagepilot doctor`: diagnose configuration and provider health.

use pagepilot_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 PagePilot Doctor: System Diagnostics");
    println!("========================================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("  ✅ Config file found at {}", config_path.display());
    } else {
        println!("  ℹ️  No config file, using defaults ({})", config_path.display());
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Config valid");
            config
        }
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            println!("\n  ⚠️  1 issue(s) found. See above for details.");
            return Ok(());
        }
    };

    let kind = config.default_provider;
    println!("  ℹ️  Provider: {kind}, model: {}", config.model_for(kind));

    match pagepilot_providers::build_provider(&config) {
        Ok(provider) => {
            println!("  ✅ Provider configured");
            match provider.health_check().await {
                Ok(true) => println!("  ✅ Provider reachable"),
                Ok(false) => {
                    println!("  ⚠️  Provider reported unhealthy");
                    issues += 1;
                }
                Err(e) => {
                    println!("  ❌ Provider health check failed: {e}");
                    issues += 1;
                }
            }
        }
        Err(e) => {
            println!("  ❌ {e}");
            issues += 1;
        }
    }

    if config.search.enabled {
        if config.search.api_key.is_some() {
            println!("  ✅ Web search configured");
        } else {
            println!("  ⚠️  Web search enabled without search.api_key");
            issues += 1;
        }
    }

    if config.approval.enabled {
        println!(
            "  ✅ Approval prompts on ({} whitelisted domain(s))",
            config.approval.whitelisted_domains.len()
        );
    } else {
        println!("  ⚠️  Approval prompts are disabled");
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
