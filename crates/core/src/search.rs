//! Search-related wire types shared between the policy engine, the web
//! search adapter and the HTTP surface.

use serde::{Deserialize, Serialize};

/// Search category recognized by the recency policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchCategory {
    News,
    TechNews,
    Weather,
    Transport,
    Stocks,
    Sports,
    TechDocs,
    Tutorials,
    Shopping,
    Historical,
    General,
}

impl SearchCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchCategory::News => "news",
            SearchCategory::TechNews => "tech_news",
            SearchCategory::Weather => "weather",
            SearchCategory::Transport => "transport",
            SearchCategory::Stocks => "stocks",
            SearchCategory::Sports => "sports",
            SearchCategory::TechDocs => "tech_docs",
            SearchCategory::Tutorials => "tutorials",
            SearchCategory::Shopping => "shopping",
            SearchCategory::Historical => "historical",
            SearchCategory::General => "general",
        }
    }

    pub const ALL: [SearchCategory; 11] = [
        SearchCategory::News,
        SearchCategory::TechNews,
        SearchCategory::Weather,
        SearchCategory::Transport,
        SearchCategory::Stocks,
        SearchCategory::Sports,
        SearchCategory::TechDocs,
        SearchCategory::Tutorials,
        SearchCategory::Shopping,
        SearchCategory::Historical,
        SearchCategory::General,
    ];
}

impl std::fmt::Display for SearchCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SearchCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SearchCategory::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown search category: {s}"))
    }
}

/// How hard the recency rule binds for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecencyRequirement {
    /// Must use recency; requests beyond the cap are clamped.
    Mandatory,
    /// Should use recency; can be overridden with a justified reason.
    Recommended,
    /// Caller's choice.
    Optional,
    /// Must not use recency at all.
    Forbidden,
}

impl RecencyRequirement {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecencyRequirement::Mandatory => "mandatory",
            RecencyRequirement::Recommended => "recommended",
            RecencyRequirement::Optional => "optional",
            RecencyRequirement::Forbidden => "forbidden",
        }
    }
}

/// Outcome of enforcing the recency policy for one search call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub category: SearchCategory,
    pub requirement: RecencyRequirement,
    /// Final recency window in days; None means unfiltered.
    pub recency_days: Option<u32>,
    /// True when the output differs from what the caller asked for.
    pub enforced: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enforcement_reason: Option<String>,
    #[serde(default)]
    pub override_applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_reason: Option<String>,
}

/// Parameters for one web-search call.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub category: Option<SearchCategory>,
    pub recency_days: Option<u32>,
    pub override_reason: Option<String>,
    pub include_domains: Vec<String>,
    pub exclude_domains: Vec<String>,
    pub max_results: usize,
}

impl SearchRequest {
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: 5,
            ..Default::default()
        }
    }
}

/// Answer from the web-search adapter, with the policy that shaped it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub answer: String,
    pub sources: Vec<String>,
    pub category: SearchCategory,
    pub recency_days: Option<u32>,
    pub policy: PolicyDecision,
    #[serde(default)]
    pub from_cache: bool,
}

/// One article from the article-site adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub author: String,
}

/// Filters for one article-site search.
#[derive(Debug, Clone, Default)]
pub struct ArticleQuery {
    pub query: Option<String>,
    pub tags: Vec<String>,
    pub hubs: Vec<String>,
    pub days: Option<u32>,
    pub limit: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trip() {
        for cat in SearchCategory::ALL {
            let parsed: SearchCategory = cat.as_str().parse().unwrap();
            assert_eq!(parsed, cat);
        }
    }

    #[test]
    fn test_category_snake_case_serde() {
        let json = serde_json::to_string(&SearchCategory::TechNews).unwrap();
        assert_eq!(json, "\"tech_news\"");
    }
}
