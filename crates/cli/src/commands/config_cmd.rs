//! `pagepilot config`: configuration management commands.

use pagepilot_config::AppConfig;

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();

            if config.api_key_for(config.default_provider).is_none() {
                warnings.push(format!(
                    "No API key for provider '{}'{}",
                    config.default_provider,
                    config
                        .default_provider
                        .api_key_env()
                        .map(|var| format!(" (set {var} or PAGEPILOT_API_KEY)"))
                        .unwrap_or_default()
                ));
            }

            if config.search.enabled && config.search.api_key.is_none() {
                warnings.push("Web search is enabled but search.api_key is not set".to_string());
            }

            if !config.approval.enabled {
                warnings.push("Approval prompts are disabled; sensitive actions run unconfirmed".to_string());
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!("   Provider:     {}", config.default_provider);
            println!("   Model:        {}", config.model_for(config.default_provider));
            println!("   Max retries:  {}", config.workflow.max_retries);
            println!("   Max steps:    {}", config.workflow.max_steps);
            println!(
                "   Whitelist:    {}",
                config.approval.whitelisted_domains.join(", ")
            );
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let mut redacted = config.clone();
    redacted.api_key = redacted.api_key.map(|_| "[REDACTED]".into());
    for provider in redacted.providers.values_mut() {
        provider.api_key = provider.api_key.take().map(|_| "[REDACTED]".into());
    }
    redacted.search.api_key = redacted.search.api_key.map(|_| "[REDACTED]".into());
    println!("{}", toml::to_string_pretty(&redacted)?);
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}

pub async fn default() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::default_toml());
    Ok(())
}

#[cfg(test)]
mod tests {
    #[test]
    fn config_path_is_valid() {
        let path = pagepilot_config::AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains(".pagepilot"));
    }

    #[test]
    fn default_toml_parses_back() {
        let text = pagepilot_config::AppConfig::default_toml();
        let parsed: pagepilot_config::AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.workflow.max_retries, 2);
    }
}
