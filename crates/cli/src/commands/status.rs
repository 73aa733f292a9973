//! `murmur status`: show the config summary and store statistics.

use std::path::Path;

use murmur_config::AppConfig;
use murmur_core::store::ContextStore;

pub async fn run(explicit: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config =
        super::load_unvalidated(explicit).map_err(|e| format!("Failed to load config: {e}"))?;

    println!("🌀 murmur Status");
    println!("================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Agent:        {}", config.agent.name);
    println!("  User ID:      {}", non_empty(&config.agent.my_user_id));
    println!("  Channels:     {}", non_empty(&config.discord.channel_ids.join(", ")));
    println!("  Poll every:   {}s", config.discord.poll_interval_secs);
    println!("  Provider:     {}", config.provider.kind);
    println!("  Model:        {}", config.provider.model);
    println!("  Temperature:  {}", config.provider.temperature);
    println!(
        "  Cooldown:     {}s to {}s (fallback {}s)",
        config.cooldown.min_delay_secs,
        config.cooldown.max_delay_secs,
        config.cooldown.fallback_delay_secs
    );
    println!("  Context:      {} messages, {} chars", config.context.limit, config.context.budget_chars);
    println!(
        "  Retrieval:    {:?}, top {}",
        config.retrieval.strategy, config.retrieval.max_results
    );
    println!("  LLM intent:   {}", if config.agent.llm_intent { "enabled" } else { "disabled" });
    println!("  Memory:       {}", config.memory.backend);

    if config.memory.backend == "sqlite" {
        println!("  Database:     {}", config.memory.db_path().display());
    }

    match super::open_store(&config.memory).await {
        Ok(store) => match store.stats().await {
            Ok(stats) => {
                println!("\n  Messages:     {}", stats.messages);
                println!("  Fragments:    {}", stats.fragments);
                println!("  Channels:     {}", stats.channels);
            }
            Err(e) => println!("\n  ⚠️  Could not read store statistics: {e}"),
        },
        Err(e) => println!("\n  ⚠️  Could not open store: {e}"),
    }

    let config_path = super::config_path(explicit);
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file, run `murmur init` first");
    }

    Ok(())
}

fn non_empty(value: &str) -> &str {
    if value.is_empty() { "(not set)" } else { value }
}
