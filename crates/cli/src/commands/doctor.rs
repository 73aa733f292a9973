//! `murmur doctor`: diagnose config, transport, backend and store.

use std::path::Path;

use murmur_channels::DiscordTransport;
use murmur_core::channel::ChatTransport;
use murmur_core::provider::Provider;
use murmur_core::store::ContextStore;

pub async fn run(explicit: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🩺 murmur Doctor: System Diagnostics");
    println!("====================================\n");

    let mut issues = 0;

    let config_path = super::config_path(explicit);
    if config_path.exists() {
        println!("  ✅ Config file found at {}", config_path.display());
    } else {
        println!("  ⚠️  No config file, relying on defaults and environment (`murmur init` creates one)");
    }

    let config = match super::load_unvalidated(explicit) {
        Ok(config) => config,
        Err(e) => {
            println!("  ❌ Config unreadable: {e}");
            println!("\n  ⚠️  1 issue(s) found. See above for details.");
            return Ok(());
        }
    };

    match config.validate() {
        Ok(()) => println!("  ✅ Config valid"),
        Err(e) => {
            println!("  ❌ Config invalid: {e}");
            issues += 1;
        }
    }

    // Transport
    match DiscordTransport::from_config(&config.discord, &config.agent.my_user_id) {
        Ok(transport) => match transport.health_check().await {
            Ok(true) => println!("  ✅ Discord reachable, token accepted"),
            Ok(false) => {
                println!("  ❌ Discord rejected the token");
                issues += 1;
            }
            Err(e) => {
                println!("  ❌ Discord unreachable: {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ⚠️  Skipping Discord check: {e}");
            issues += 1;
        }
    }

    // Generative backend
    match murmur_providers::build_from_config(&config.provider) {
        Ok(provider) => match provider.health_check().await {
            Ok(true) => println!(
                "  ✅ Backend '{}' reachable (model {})",
                config.provider.kind, config.provider.model
            ),
            Ok(false) => {
                println!("  ❌ Backend '{}' rejected the request", config.provider.kind);
                issues += 1;
            }
            Err(e) => {
                println!("  ❌ Backend '{}' unreachable: {e}", config.provider.kind);
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ⚠️  Skipping backend check: {e}");
            issues += 1;
        }
    }

    // Store
    match super::open_store(&config.memory).await {
        Ok(store) => match store.stats().await {
            Ok(stats) => println!(
                "  ✅ Store '{}' open ({} messages, {} fragments)",
                store.name(),
                stats.messages,
                stats.fragments
            ),
            Err(e) => {
                println!("  ❌ Store query failed: {e}");
                issues += 1;
            }
        },
        Err(e) => {
            println!("  ❌ Store unavailable: {e}");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
