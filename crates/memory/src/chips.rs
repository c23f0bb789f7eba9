//! Memory chips: small named facts persisted as a JSON file.
//!
//! The whole list is loaded on creation and rewritten on every mutation.
//! Writes go to a sibling temp file first and are renamed into place, so
//! readers of the file never see a partial list.

use companion_core::error::MemoryError;
use companion_core::memory::MemoryChip;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub struct ChipStore {
    path: PathBuf,
    chips: Arc<RwLock<Vec<MemoryChip>>>,
}

impl ChipStore {
    /// Open the store at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let chips = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = chips.len(), "Memory chips loaded");
        Self {
            path,
            chips: Arc::new(RwLock::new(chips)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> Vec<MemoryChip> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        match serde_json::from_str::<Vec<MemoryChip>>(&content) {
            Ok(chips) => chips
                .into_iter()
                .map(|c| MemoryChip::new(c.name, c.content, c.keywords))
                .collect(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable memory chip file");
                Vec::new()
            }
        }
    }

    fn persist(&self, chips: &[MemoryChip]) -> Result<(), MemoryError> {
        let fail = |reason: String| MemoryError::Persistence {
            path: self.path.display().to_string(),
            reason,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| fail(e.to_string()))?;
        }

        let json = serde_json::to_string_pretty(chips).map_err(|e| fail(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| fail(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| fail(e.to_string()))?;
        Ok(())
    }

    pub async fn list(&self) -> Vec<MemoryChip> {
        self.chips.read().await.clone()
    }

    /// Insert or replace the chip with the same name.
    pub async fn add(&self, chip: MemoryChip) -> Result<(), MemoryError> {
        let chip = MemoryChip::new(chip.name, chip.content, chip.keywords);
        let mut chips = self.chips.write().await;
        let mut next: Vec<MemoryChip> = chips.iter().filter(|c| c.name != chip.name).cloned().collect();
        next.push(chip);
        self.persist(&next)?;
        *chips = next;
        Ok(())
    }

    /// Remove a chip by name. Returns whether one existed.
    pub async fn remove(&self, name: &str) -> Result<bool, MemoryError> {
        let mut chips = self.chips.write().await;
        let next: Vec<MemoryChip> = chips.iter().filter(|c| c.name != name).cloned().collect();
        let removed = next.len() < chips.len();
        self.persist(&next)?;
        *chips = next;
        Ok(removed)
    }

    pub async fn clear(&self) -> Result<(), MemoryError> {
        let mut chips = self.chips.write().await;
        self.persist(&[])?;
        chips.clear();
        Ok(())
    }

    /// Contents of every chip whose keywords occur in `text`, in stored order.
    pub async fn match_for_text(&self, text: &str) -> Vec<String> {
        self.chips
            .read()
            .await
            .iter()
            .filter(|c| c.matches(text))
            .map(|c| c.content.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chip(name: &str, content: &str, keywords: &[&str]) -> MemoryChip {
        MemoryChip::new(name, content, keywords.iter().map(|k| k.to_string()).collect())
    }

    #[tokio::test]
    async fn add_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chips").join("memory_chips.json");

        let store = ChipStore::open(&path);
        store.add(chip("food", "User loves ramen.", &["ramen"])).await.unwrap();
        assert!(path.exists());

        let reopened = ChipStore::open(&path);
        let chips = reopened.list().await;
        assert_eq!(chips.len(), 1);
        assert_eq!(chips[0].content, "User loves ramen.");
    }

    #[tokio::test]
    async fn add_is_upsert_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChipStore::open(dir.path().join("c.json"));
        store.add(chip("pet", "Cat named Miso.", &["cat"])).await.unwrap();
        store.add(chip("food", "Likes ramen.", &["ramen"])).await.unwrap();
        store.add(chip("pet", "Cat named Tofu.", &["cat", "Tofu"])).await.unwrap();

        let chips = store.list().await;
        assert_eq!(chips.len(), 2);
        assert_eq!(chips[1].name, "pet");
        assert_eq!(chips[1].content, "Cat named Tofu.");
    }

    #[tokio::test]
    async fn keywords_capped_at_five() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChipStore::open(dir.path().join("c.json"));
        store
            .add(chip("many", "x", &["a", "b", "c", "d", "e", "f", "g"]))
            .await
            .unwrap();
        assert_eq!(store.list().await[0].keywords.len(), 5);
    }

    #[tokio::test]
    async fn remove_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        let store = ChipStore::open(&path);
        store.add(chip("a", "A", &["a"])).await.unwrap();
        store.add(chip("b", "B", &["b"])).await.unwrap();

        assert!(store.remove("a").await.unwrap());
        assert!(!store.remove("a").await.unwrap());
        assert_eq!(ChipStore::open(&path).list().await.len(), 1);

        store.clear().await.unwrap();
        assert!(ChipStore::open(&path).list().await.is_empty());
    }

    #[tokio::test]
    async fn match_is_case_sensitive_substring() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChipStore::open(dir.path().join("c.json"));
        store.add(chip("food", "User loves ramen.", &["ramen"])).await.unwrap();

        assert_eq!(store.match_for_text("I had ramen today").await, vec!["User loves ramen."]);
        assert!(store.match_for_text("I had Ramen today").await.is_empty());
    }

    #[tokio::test]
    async fn corrupted_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(ChipStore::open(&path).list().await.is_empty());
    }
}
