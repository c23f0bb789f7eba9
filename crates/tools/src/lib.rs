//! External-world tools for Companion.
//!
//! Currently browsing: web search plus page text extraction, used for
//! citation-augmented answers.

pub mod browser;

pub use browser::{SearchHit, WebBrowser, clean_text, parse_results};
