//! `hostbridge status` — Show the effective configuration.

use hostbridge_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("HostBridge Status");
    println!("=================");
    println!("  Config dir:     {}", AppConfig::config_dir().display());
    println!("  Log dir:        {}", config.log_dir().display());
    println!("  Provider:       {}", config.default_provider);
    println!("  Model:          {}", config.default_model);
    println!("  Temperature:    {}", config.default_temperature);
    println!("  Max steps:      {}", config.agent.max_steps);
    println!("  Max tool calls: {}", config.agent.max_tool_calls);
    println!("  Tool timeout:   {}s", config.bridge.tool_timeout_secs);
    println!("  Call workers:   {}", config.bridge.call_workers);
    println!("  Event flush:    {}ms", config.bridge.event_flush_ms);
    println!(
        "  API key:        {}",
        if config.has_api_key() { "configured" } else { "not set" }
    );

    let mut providers: Vec<&String> = config.providers.keys().collect();
    providers.sort();
    for name in providers {
        let kind = config.providers[name].resolved_kind(name);
        println!("  Backend:        {name} ({kind:?})");
    }

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file — run `hostbridge onboard` first");
    }

    Ok(())
}
