//! Narrow interface to the document retrieval system. The vector store
//! and ingestion pipeline live outside this service; chat only needs
//! search and answer synthesis over returned snippets.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct DocSnippet {
    pub title: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    pub score: f64,
}

#[async_trait]
pub trait DocRetriever: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<DocSnippet>>;
    async fn synthesize(&self, query: &str, snippets: &[DocSnippet]) -> Result<String>;
}

/// Default retriever when no document store is wired up: every search
/// comes back empty, which the chat surface turns into a NO_ANSWER with
/// follow-up suggestions.
pub struct UnconfiguredRetriever;

#[async_trait]
impl DocRetriever for UnconfiguredRetriever {
    async fn search(&self, _query: &str, _top_k: usize) -> Result<Vec<DocSnippet>> {
        Ok(vec![])
    }

    async fn synthesize(&self, _query: &str, _snippets: &[DocSnippet]) -> Result<String> {
        anyhow::bail!("document retriever not configured")
    }
}
