//! Browsing contract: external sources for citation-augmented answers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use crate::error::BrowseError;

/// One fetched search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    /// Cleaned page text; empty when the fetch failed.
    #[serde(default)]
    pub text: String,
}

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Search and fetch up to `k` sources, in result order.
    async fn gather_sources(&self, query: &str, k: usize) -> Result<Vec<Source>, BrowseError>;
}
