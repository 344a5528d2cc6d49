//! Context Retriever
//!
//! Pulls a handful of knowledge-base snippets relevant to the user's text and
//! flattens them into a prompt context blob.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::db::KnowledgeStore;

pub struct ContextRetriever {
    store: Arc<dyn KnowledgeStore>,
    max_terms: usize,
    limit: usize,
}

impl ContextRetriever {
    pub fn new(store: Arc<dyn KnowledgeStore>, max_terms: usize, limit: usize) -> Self {
        Self { store, max_terms, limit }
    }

    /// First `max_terms` non-empty lower-cased terms of the text.
    pub fn extract_terms(text: &str, max_terms: usize) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|term| !term.is_empty())
            .take(max_terms)
            .map(|term| term.to_lowercase())
            .collect()
    }

    /// Build the context string. Never fails: a storage error yields "".
    pub async fn retrieve(&self, text: &str) -> String {
        let terms = Self::extract_terms(text, self.max_terms);
        if terms.is_empty() {
            return String::new();
        }

        let snippets = match self.store.find_snippets(&terms, self.limit).await {
            Ok(snippets) => snippets,
            Err(e) => {
                warn!(error = %e, "Knowledge lookup failed, continuing without context");
                return String::new();
            }
        };

        debug!(terms = ?terms, matched = snippets.len(), "Knowledge context retrieved");

        snippets
            .iter()
            .take(self.limit)
            .map(|s| format!("{}: {}", s.title, s.body))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
