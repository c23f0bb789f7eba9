//! `companion chips`: Memory chip management.

use companion_config::AppConfig;
use companion_core::memory::MemoryChip;
use companion_memory::ChipStore;

fn open_store() -> Result<ChipStore, Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    Ok(ChipStore::open(config.memory.chips_path()))
}

pub async fn list() -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store()?;
    let chips = store.list().await;

    println!("Memory chips ({})", store.path().display());
    if chips.is_empty() {
        println!("   (none)");
        return Ok(());
    }
    for chip in &chips {
        println!("  {:<16} {}", chip.name, chip.content);
        if !chip.keywords.is_empty() {
            println!("  {:<16} keywords: {}", "", chip.keywords.join(", "));
        }
    }
    Ok(())
}

pub async fn add(
    name: String,
    content: String,
    keywords: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    if name.trim().is_empty() {
        return Err("chip name must not be empty".into());
    }
    let store = open_store()?;
    let chip = MemoryChip::new(name.trim(), content, keywords);
    let kept = chip.keywords.len();
    let name = chip.name.clone();
    store.add(chip).await?;
    println!("Saved chip '{name}' ({kept} keywords)");
    Ok(())
}

pub async fn remove(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store()?;
    if store.remove(name).await? {
        println!("Removed chip '{name}'");
    } else {
        println!("No chip named '{name}'");
    }
    Ok(())
}

pub async fn clear(confirm: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !confirm {
        println!("This will delete ALL memory chips permanently.");
        println!("   Run with --confirm to proceed:");
        println!("   companion chips clear --confirm");
        return Ok(());
    }

    let store = open_store()?;
    store.clear().await?;
    println!("All memory chips cleared.");
    Ok(())
}
