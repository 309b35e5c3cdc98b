//! Web-search and article-search seams.

use async_trait::async_trait;

use crate::error::Result;
use crate::search::{Article, ArticleQuery, SearchOutcome, SearchRequest};

/// Web-search provider. Implementations enforce the recency policy
/// internally: the decision comes back attached to the outcome.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, request: SearchRequest) -> Result<SearchOutcome>;

    async fn is_available(&self) -> bool {
        true
    }
}

/// Article-site search (RSS with scrape fallback on the vendor side).
#[async_trait]
pub trait ArticleSearch: Send + Sync {
    async fn search(&self, query: ArticleQuery) -> Result<Vec<Article>>;
}
