//! Unified memory manager.
//!
//! The only entry point the pipeline uses: policy decides what to keep,
//! the manager routes writes to the right tier and merges reads.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use domovoy_core::{MemoryContext, MemoryEntry, MemoryKind, Result, Role};
use domovoy_policy::memory as policy;

use crate::recency_store::RecencyStore;
use crate::semantic::SemanticStore;

/// How `recall` combines the two tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecallStrategy {
    /// Recent store only, chronological.
    Recent,
    /// Semantic store only, by similarity.
    Semantic,
    /// Half from each, deduplicated by content, newest first.
    Hybrid,
}

impl std::str::FromStr for RecallStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "recent" => Ok(Self::Recent),
            "semantic" => Ok(Self::Semantic),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(format!("unknown recall strategy: {other}")),
        }
    }
}

/// Where one `remember` call landed.
#[derive(Debug, Clone, Serialize)]
pub struct RememberReceipt {
    pub saved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<MemoryKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<domovoy_core::Importance>,
    pub saved_to: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub short_term_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub long_term_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl RememberReceipt {
    fn filtered() -> Self {
        Self {
            saved: false,
            reason: Some("filtered_by_policy"),
            kind: None,
            importance: None,
            saved_to: Vec::new(),
            short_term_id: None,
            long_term_id: None,
            expires_at: None,
        }
    }
}

pub struct MemoryManager {
    recent: Arc<dyn RecencyStore>,
    semantic: Arc<dyn SemanticStore>,
    long_term_enabled: bool,
    min_similarity: f32,
}

impl MemoryManager {
    pub fn new(
        recent: Arc<dyn RecencyStore>,
        semantic: Arc<dyn SemanticStore>,
        long_term_enabled: bool,
        min_similarity: f32,
    ) -> Self {
        Self {
            recent,
            semantic,
            long_term_enabled,
            min_similarity,
        }
    }

    /// Remember content, with the policy deciding kind, importance,
    /// tiers and expiry.
    pub async fn remember(
        &self,
        user_id: &str,
        content: &str,
        role: Role,
        kind: Option<MemoryKind>,
        metadata: Option<Value>,
    ) -> Result<RememberReceipt> {
        let meta_map: Option<HashMap<String, Value>> = metadata.as_ref().and_then(|m| {
            m.as_object()
                .map(|obj| obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        });

        let kind = kind.unwrap_or_else(|| policy::classify(content, role, meta_map.as_ref()));

        if !policy::should_save(content, kind, role) {
            tracing::debug!(user_id, "memory filtered by policy");
            return Ok(RememberReceipt::filtered());
        }

        let importance = policy::importance(content, kind);
        let expires_at = policy::expiration(importance, Utc::now());

        let mut saved_to = Vec::new();
        let mut short_term_id = None;
        if policy::accepts_short_term(importance) {
            let id = self
                .recent
                .add(
                    user_id,
                    role,
                    content,
                    kind,
                    importance,
                    metadata.clone(),
                    expires_at,
                )
                .await?;
            short_term_id = Some(id);
            saved_to.push("short_term");
        }

        let mut long_term_id = None;
        if self.long_term_enabled && policy::accepts_long_term(importance) {
            let mut semantic_meta = metadata.clone().unwrap_or_else(|| serde_json::json!({}));
            if let Value::Object(ref mut map) = semantic_meta {
                map.insert("role".into(), Value::String(role.as_str().into()));
            }
            let id = self
                .semantic
                .add(
                    user_id,
                    content,
                    kind,
                    importance,
                    Some(semantic_meta),
                    None,
                    expires_at,
                )
                .await?;
            long_term_id = Some(id);
            saved_to.push("long_term");
        }

        tracing::info!(
            user_id,
            kind = kind.as_str(),
            importance = importance.as_str(),
            ?saved_to,
            "memory saved"
        );

        Ok(RememberReceipt {
            saved: true,
            reason: None,
            kind: Some(kind),
            importance: Some(importance),
            saved_to,
            short_term_id,
            long_term_id,
            expires_at,
        })
    }

    /// Remember one full conversation turn.
    pub async fn remember_turn(
        &self,
        user_id: &str,
        user_message: &str,
        assistant_message: &str,
        metadata: Option<Value>,
    ) -> Result<(RememberReceipt, RememberReceipt)> {
        let user = self
            .remember(user_id, user_message, Role::User, None, metadata.clone())
            .await?;
        let assistant = self
            .remember(user_id, assistant_message, Role::Assistant, None, metadata)
            .await?;
        Ok((user, assistant))
    }

    /// Persist a user rule: critical, never expiring, mirrored in the
    /// rules table.
    pub async fn remember_rule(
        &self,
        user_id: &str,
        rule_text: &str,
        rule_type: &str,
    ) -> Result<RememberReceipt> {
        let metadata = serde_json::json!({ "rule_type": rule_type });
        let receipt = self
            .remember(
                user_id,
                rule_text,
                Role::User,
                Some(MemoryKind::Rule),
                Some(metadata.clone()),
            )
            .await?;
        if receipt.saved {
            self.recent
                .add_rule(user_id, rule_text, rule_type, Some(metadata))
                .await?;
        }
        Ok(receipt)
    }

    /// Recall memories for a query.
    pub async fn recall(
        &self,
        user_id: &str,
        query: &str,
        kind: Option<MemoryKind>,
        strategy: RecallStrategy,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        match strategy {
            RecallStrategy::Recent => self.recent.get_recent(user_id, limit, kind).await,
            RecallStrategy::Semantic => {
                self.semantic
                    .search(user_id, query, kind, limit, self.min_similarity)
                    .await
            }
            RecallStrategy::Hybrid => {
                let half = (limit / 2).max(1);
                let recent = self.recent.get_recent(user_id, half, kind).await?;
                let semantic = self
                    .semantic
                    .search(user_id, query, kind, half, self.min_similarity)
                    .await?;

                let mut seen: HashSet<String> = HashSet::new();
                let mut merged: Vec<MemoryEntry> = Vec::new();
                for entry in recent.into_iter().chain(semantic) {
                    if seen.insert(entry.content.clone()) {
                        merged.push(entry);
                    }
                }
                merged.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                merged.truncate(limit);
                Ok(merged)
            }
        }
    }

    /// All active rules for a user.
    pub async fn rules(&self, user_id: &str) -> Result<Vec<MemoryEntry>> {
        self.semantic
            .get_by_kind(user_id, MemoryKind::Rule, 50)
            .await
    }

    /// Rules most relevant to a query.
    pub async fn search_rules(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        self.semantic
            .search(
                user_id,
                query,
                Some(MemoryKind::Rule),
                limit,
                self.min_similarity,
            )
            .await
    }

    /// Assemble the prompt context for one query.
    pub async fn build_context(&self, user_id: &str, query: &str) -> MemoryContext {
        let mut context = MemoryContext::default();

        match self.recent.get_recent(user_id, 10, None).await {
            Ok(recent) => context.recent_history = recent,
            Err(e) => context.error = Some(e.to_string()),
        }

        match self
            .semantic
            .search(user_id, query, None, 3, self.min_similarity)
            .await
        {
            Ok(relevant) => context.relevant_memories = relevant,
            Err(e) => context.error = Some(e.to_string()),
        }

        match self.rules(user_id).await {
            Ok(rules) => context.user_rules = rules,
            Err(e) => context.error = Some(e.to_string()),
        }

        match self.search_rules(user_id, query, 3).await {
            Ok(rules) => context.relevant_rules = rules,
            Err(e) => context.error = Some(e.to_string()),
        }

        tracing::debug!(
            user_id,
            recent = context.recent_history.len(),
            relevant = context.relevant_memories.len(),
            rules = context.user_rules.len(),
            "memory context built"
        );

        context
    }

    /// Remove expired entries from both tiers.
    pub async fn cleanup(&self, user_id: Option<&str>) -> Result<(u64, u64)> {
        let short = self.recent.cleanup_expired(user_id).await?;
        let long = self.semantic.cleanup_expired(user_id).await?;
        Ok((short, long))
    }

    pub async fn stats(&self, user_id: &str) -> Result<Value> {
        let short_count = self.recent.count(user_id).await?;
        let long = self.semantic.stats(user_id).await?;
        Ok(serde_json::json!({
            "user_id": user_id,
            "short_term": { "total": short_count },
            "long_term": long,
        }))
    }

    /// Coarse health signal for the health endpoint: both tiers must
    /// answer a trivial query.
    pub async fn health(&self) -> bool {
        let short_ok = self.recent.count("__health__").await.is_ok();
        let long_ok = self.semantic.stats("__health__").await.is_ok();
        short_ok && long_ok
    }
}
