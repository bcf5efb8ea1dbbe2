use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::PlayableMedia;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Invalid(String),
    #[error("couldn't determine details of {0}")]
    NotFound(String),
}

/// The media-resolution boundary. Each platform (YouTube page scraping,
/// archive.org metadata) implements this; failures surface to the
/// requesting connection as `status` notices and never touch the queue.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve a platform identifier into a playable item.
    async fn resolve(&self, identifier: &str) -> Result<PlayableMedia, ResolveError>;

    /// Free-text search, best match first.
    async fn search(&self, query: &str) -> Result<Vec<PlayableMedia>, ResolveError>;

    /// Resolved-details cache for persistence. Sources without a cache
    /// report nothing.
    fn cache_snapshot(&self) -> HashMap<String, PlayableMedia> {
        HashMap::new()
    }

    /// Seed the details cache from a persisted snapshot.
    fn prime_cache(&self, _entries: HashMap<String, PlayableMedia>) {}
}
