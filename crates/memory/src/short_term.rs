//! Short-term memory: a bounded log of recent turns.

use async_trait::async_trait;
use companion_core::memory::ShortTermStore;
use companion_core::message::Turn;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Keeps the last `capacity` turns; the oldest is evicted on overflow.
///
/// Salience is ignored here; promotion into long-term memory is decided
/// by [`crate::MemoryHub`].
pub struct RecentTurns {
    capacity: usize,
    entries: Arc<RwLock<VecDeque<Turn>>>,
}

impl RecentTurns {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for RecentTurns {
    fn default() -> Self {
        Self::new(50)
    }
}

#[async_trait]
impl ShortTermStore for RecentTurns {
    async fn append(&self, turn: Turn, _salience: f32) {
        let mut entries = self.entries.write().await;
        entries.push_back(turn);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    async fn recent(&self, n: usize) -> Vec<Turn> {
        let entries = self.entries.read().await;
        let start = entries.len().saturating_sub(n);
        entries.iter().skip(start).cloned().collect()
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recent_is_chronological() {
        let mem = RecentTurns::new(10);
        mem.append(Turn::user("one"), 0.2).await;
        mem.append(Turn::assistant("two"), 0.2).await;
        mem.append(Turn::user("three"), 0.2).await;

        let recent = mem.recent(2).await;
        assert_eq!(recent, vec![Turn::assistant("two"), Turn::user("three")]);
    }

    #[tokio::test]
    async fn evicts_oldest_when_full() {
        let mem = RecentTurns::new(3);
        for i in 0..5 {
            mem.append(Turn::user(format!("m{i}")), 0.2).await;
        }
        assert_eq!(mem.len().await, 3);
        let recent = mem.recent(10).await;
        assert_eq!(recent[0].content, "m2");
        assert_eq!(recent[2].content, "m4");
    }

    #[tokio::test]
    async fn clear_empties_log() {
        let mem = RecentTurns::default();
        mem.append(Turn::user("hi"), 0.6).await;
        mem.clear().await;
        assert!(mem.is_empty().await);
        assert!(mem.recent(12).await.is_empty());
    }
}
