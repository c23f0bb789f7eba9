//! `companion serve`: Start the conversation gateway.

use companion_config::AppConfig;

pub async fn run(
    port_override: Option<u16>,
    host_override: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }
    if let Some(host) = host_override {
        config.gateway.host = host;
    }

    println!("Companion Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Backend:   {:?}", config.backend.kind);
    println!(
        "   Voting:    n={}, auto-browsing={}",
        config.session.consistency_n, config.session.auto_browsing
    );

    companion_gateway::start(config).await?;

    Ok(())
}
