//! `companion config`: Configuration management commands.

use companion_config::AppConfig;

pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("Created config directory: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run `companion config init`.");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("Created config.toml at: {}", config_path.display());
    println!("   Set COMPANION_API_KEY to use the hosted backend,");
    println!("   or point OLLAMA_URL at a local model server.");
    Ok(())
}

/// Print the configuration as loaded, with env overrides applied.
pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{config:#?}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}
