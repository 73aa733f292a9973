//! `murmur run`: poll the configured channels until Ctrl+C.

use std::path::Path;
use std::sync::Arc;

use murmur_agent::Orchestrator;
use murmur_channels::DiscordTransport;
use murmur_config::AppConfig;
use tokio::sync::watch;

pub async fn run(explicit: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load(explicit).map_err(|e| format!("Failed to load config: {e}"))?;

    let provider = murmur_providers::build_from_config(&config.provider)?;
    let transport = Arc::new(DiscordTransport::from_config(
        &config.discord,
        &config.agent.my_user_id,
    )?);
    let store = super::open_store(&config.memory).await?;

    let orchestrator = Arc::new(Orchestrator::from_config(&config, transport, store, provider)?);

    println!("🌀 murmur starting");
    println!("   Agent:     {} ({})", config.agent.name, config.agent.my_user_id);
    println!("   Channels:  {}", config.discord.channel_ids.join(", "));
    println!("   Provider:  {} / {}", config.provider.kind, config.provider.model);
    println!(
        "   Cooldown:  {}s to {}s",
        config.cooldown.min_delay_secs, config.cooldown.max_delay_secs
    );
    println!("   Memory:    {}", config.memory.backend);
    println!("   Press Ctrl+C to stop.\n");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    orchestrator.run(shutdown_rx).await;
    println!("👋 murmur stopped");
    Ok(())
}
