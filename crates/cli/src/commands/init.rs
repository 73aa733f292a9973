//! `murmur init`: write a default configuration file.

use std::path::Path;

use murmur_config::AppConfig;

pub async fn run(explicit: Option<&Path>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = super::config_path(explicit);

    println!("🌀 murmur: First-Time Setup");
    println!("===========================\n");

    if let Some(dir) = config_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir)?;
            println!("✅ Created config directory: {}", dir.display());
        } else {
            println!("  Config directory exists: {}", dir.display());
        }
    }

    if config_path.exists() && !force {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or re-run with --force to overwrite.\n");
        return Ok(());
    }

    std::fs::write(&config_path, AppConfig::default_toml())?;
    println!("✅ Wrote config.toml at: {}", config_path.display());
    println!("\n📝 Next steps:");
    println!("   1. Put DISCORD_USER_TOKEN, DISCORD_CHANNEL_ID and MY_USER_ID in .env or the config");
    println!("   2. Set GEMINI_API_KEY (or provider.api_key)");
    println!("   3. Run: murmur doctor");
    println!("   4. Run: murmur run\n");

    Ok(())
}
