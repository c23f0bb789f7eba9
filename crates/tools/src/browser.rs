//! Web browsing for citation-augmented answers.
//!
//! Searches the DuckDuckGo HTML endpoint, fetches the top hits
//! concurrently, and reduces each page to plain text. Results are cached
//! per normalized query for a fixed TTL.

use async_trait::async_trait;
use companion_config::BrowseConfig;
use companion_core::browse::{Source, SourceFetcher};
use companion_core::error::BrowseError;
use futures::future::join_all;
use regex_lite::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

const SEARCH_URL: &str = "https://duckduckgo.com/html/";
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Characters of page text kept per source.
pub const MAX_PAGE_CHARS: usize = 4000;

static NON_TEXT_BLOCKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript)\b.*?</(script|style|noscript)\s*>")
        .expect("valid non-text block regex")
});

static RESULT_ANCHOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<a\s[^>]*class="[^"]*result__a[^"]*"[^>]*>(.*?)</a>"#)
        .expect("valid result anchor regex")
});

static HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href="([^"]*)""#).expect("valid href regex")
});

static SNIPPET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)class="[^"]*result__snippet[^"]*"[^>]*>(.*?)</(a|div|span)>"#)
        .expect("valid snippet regex")
});

/// A search hit before its page has been fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

pub struct WebBrowser {
    enabled: bool,
    search_url: String,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, (Instant, Vec<Source>)>>,
    client: reqwest::Client,
}

impl WebBrowser {
    pub fn new(config: &BrowseConfig) -> Result<Self, BrowseError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BrowseError::Search(e.to_string()))?;

        Ok(Self {
            enabled: config.enabled,
            search_url: SEARCH_URL.to_string(),
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            cache: Mutex::new(HashMap::new()),
            client,
        })
    }

    /// Point searches at a different HTML endpoint.
    pub fn with_search_url(mut self, url: impl Into<String>) -> Self {
        self.search_url = url.into();
        self
    }

    async fn get(&self, url: &str, query: Option<&str>) -> Result<String, reqwest::Error> {
        let mut request = self.client.get(url);
        if let Some(q) = query {
            request = request.query(&[("q", q)]);
        }
        request.send().await?.error_for_status()?.text().await
    }

    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, BrowseError> {
        let html = self
            .get(&self.search_url, Some(query))
            .await
            .map_err(|e| BrowseError::Search(e.to_string()))?;
        Ok(parse_results(&html, max_results))
    }

    /// Page text, or an empty string when the fetch fails.
    pub async fn fetch_clean_text(&self, url: &str) -> String {
        match self.get(url, None).await {
            Ok(html) => clean_text(&html, MAX_PAGE_CHARS),
            Err(e) => {
                debug!(%url, error = %e, "Page fetch failed");
                String::new()
            }
        }
    }

    async fn cached(&self, key: &str) -> Option<Vec<Source>> {
        let cache = self.cache.lock().await;
        cache
            .get(key)
            .filter(|(at, _)| at.elapsed() < self.cache_ttl)
            .map(|(_, sources)| sources.clone())
    }
}

#[async_trait]
impl SourceFetcher for WebBrowser {
    async fn gather_sources(&self, query: &str, k: usize) -> Result<Vec<Source>, BrowseError> {
        if !self.enabled {
            return Err(BrowseError::Disabled);
        }

        let key = query.trim().to_lowercase();
        if let Some(sources) = self.cached(&key).await {
            debug!(query = %key, "Browse cache hit");
            return Ok(sources);
        }

        let hits = self.search(query, k).await?;
        if hits.is_empty() {
            warn!(query = %key, "Search returned no results");
        }

        let texts = join_all(hits.iter().map(|h| self.fetch_clean_text(&h.url))).await;
        let sources: Vec<Source> = hits
            .into_iter()
            .zip(texts)
            .map(|(hit, text)| Source {
                title: hit.title,
                url: hit.url,
                snippet: hit.snippet,
                text,
            })
            .collect();

        self.cache
            .lock()
            .await
            .insert(key, (Instant::now(), sources.clone()));
        Ok(sources)
    }
}

/// Extract up to `max_results` hits from a search results page.
pub fn parse_results(html: &str, max_results: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();

    for block in html.split("result__body").skip(1) {
        let Some(anchor) = RESULT_ANCHOR.captures(block) else {
            continue;
        };
        let url = anchor
            .get(0)
            .and_then(|m| HREF.captures(m.as_str()))
            .and_then(|c| c.get(1))
            .map(|m| normalize_url(&decode_entities(m.as_str())))
            .unwrap_or_default();
        let title = anchor
            .get(1)
            .map(|m| collapse_ws(&decode_entities(&strip_tags(m.as_str()))))
            .unwrap_or_default();
        let snippet = SNIPPET
            .captures(block)
            .and_then(|c| c.get(1))
            .map(|m| collapse_ws(&decode_entities(&strip_tags(m.as_str()))))
            .unwrap_or_default();

        if !url.is_empty() && !title.is_empty() {
            hits.push(SearchHit { title, url, snippet });
        }
        if hits.len() >= max_results {
            break;
        }
    }

    hits
}

/// Visible text of an HTML page, whitespace-collapsed and cut to `max_chars`.
pub fn clean_text(html: &str, max_chars: usize) -> String {
    let without_blocks = NON_TEXT_BLOCKS.replace_all(html, " ");
    let text = collapse_ws(&decode_entities(&strip_tags(&without_blocks)));
    text.chars().take(max_chars).collect()
}

fn strip_tags(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => {
                in_tag = true;
                out.push(' ');
            }
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

fn collapse_ws(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entities(input: &str) -> String {
    input
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

fn normalize_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("//") {
        format!("https://{rest}")
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS_PAGE: &str = r#"
<div class="results">
  <div class="result results_links results_links_deep web-result">
    <div class="links_main links_deep result__body">
      <h2 class="result__title">
        <a rel="nofollow" class="result__a" href="https://example.com/one">First &amp; <b>Best</b></a>
      </h2>
      <a class="result__snippet" href="https://example.com/one">Snippet   one</a>
    </div>
  </div>
  <div class="result">
    <div class="links_main result__body">
      <a rel="nofollow" class="result__a" href="//example.org/two">Second</a>
    </div>
  </div>
  <div class="result">
    <div class="links_main result__body">
      <a rel="nofollow" class="result__a" href="https://example.net/3">Third</a>
    </div>
  </div>
</div>"#;

    fn browser(enabled: bool) -> WebBrowser {
        WebBrowser::new(&BrowseConfig {
            enabled,
            ..BrowseConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn parses_titles_urls_and_snippets() {
        let hits = parse_results(RESULTS_PAGE, 5);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].title, "First & Best");
        assert_eq!(hits[0].url, "https://example.com/one");
        assert_eq!(hits[0].snippet, "Snippet one");
        assert_eq!(hits[1].url, "https://example.org/two");
        assert!(hits[1].snippet.is_empty());
    }

    #[test]
    fn parse_respects_max_results() {
        assert_eq!(parse_results(RESULTS_PAGE, 2).len(), 2);
        assert!(parse_results("<html>no results</html>", 3).is_empty());
    }

    #[test]
    fn clean_text_drops_scripts_and_collapses() {
        let html = "<html><head><style>p{}</style><script>var x = 1;</script></head>\
                    <body><p>Hello\n\n  <b>world</b></p><noscript>enable js</noscript></body></html>";
        assert_eq!(clean_text(html, 4000), "Hello world");
        assert_eq!(clean_text(html, 5), "Hello");
    }

    #[tokio::test]
    async fn disabled_browser_refuses() {
        let result = browser(false).gather_sources("news today", 3).await;
        assert!(matches!(result, Err(BrowseError::Disabled)));
    }

    #[tokio::test]
    async fn cached_sources_are_reused() {
        let b = browser(true).with_search_url("http://127.0.0.1:9/unreachable");
        let sources = vec![Source {
            title: "Cached".into(),
            url: "https://example.com".into(),
            snippet: String::new(),
            text: "body".into(),
        }];
        b.cache
            .lock()
            .await
            .insert("latest news".into(), (Instant::now(), sources.clone()));

        let got = b.gather_sources("  Latest News ", 3).await.unwrap();
        assert_eq!(got, sources);
    }
}
