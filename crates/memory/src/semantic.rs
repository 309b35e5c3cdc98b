//! Semantic memory tier.
//!
//! One vector collection per memory kind. The in-process implementation
//! here is the default for single-node deployments and tests; the
//! Qdrant-backed implementation lives in `qdrant_store`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use domovoy_core::{Embedder, Importance, MemoryEntry, MemoryKind, Result, Role};

use crate::embeddings::{cosine_similarity, l2_normalize};

/// Collections the semantic tier maintains, one per memory kind (errors
/// share the conversations collection).
pub const COLLECTIONS: [&str; 5] = ["conversations", "preferences", "rules", "facts", "actions"];

/// Operations of the semantic tier.
#[async_trait]
pub trait SemanticStore: Send + Sync {
    /// Store content with its embedding (computed if not supplied).
    /// Returns the memory id.
    #[allow(clippy::too_many_arguments)]
    async fn add(
        &self,
        user_id: &str,
        content: &str,
        kind: MemoryKind,
        importance: Importance,
        metadata: Option<Value>,
        embedding: Option<Vec<f32>>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<String>;

    /// Similarity search. Searches one collection when `kind` is given,
    /// all collections otherwise. Results carry their similarity and are
    /// sorted descending; entries under `min_similarity` are dropped.
    async fn search(
        &self,
        user_id: &str,
        query: &str,
        kind: Option<MemoryKind>,
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<MemoryEntry>>;

    /// Entries of one kind, without similarity ranking.
    async fn get_by_kind(
        &self,
        user_id: &str,
        kind: MemoryKind,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>>;

    /// Delete by id across all collections.
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Remove entries whose `expires_at` metadata has passed.
    async fn cleanup_expired(&self, user_id: Option<&str>) -> Result<u64>;

    /// Per-collection entry counts for a user.
    async fn stats(&self, user_id: &str) -> Result<Value>;
}

struct StoredVector {
    id: String,
    user_id: String,
    content: String,
    kind: MemoryKind,
    importance: Importance,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    metadata: HashMap<String, Value>,
    vector: Vec<f32>,
}

impl StoredVector {
    fn to_entry(&self, similarity: Option<f32>) -> MemoryEntry {
        MemoryEntry {
            id: self.id.clone(),
            user_id: self.user_id.clone(),
            role: self
                .metadata
                .get("role")
                .and_then(Value::as_str)
                .and_then(|r| r.parse().ok())
                .unwrap_or(Role::User),
            content: self.content.clone(),
            kind: self.kind,
            importance: self.importance,
            created_at: self.created_at,
            expires_at: self.expires_at,
            similarity,
            metadata: self.metadata.clone(),
        }
    }
}

/// In-process semantic store: per-collection vectors behind an async
/// lock, cosine similarity over L2-normalized embeddings.
pub struct InMemorySemanticStore {
    embedder: Arc<dyn Embedder>,
    collections: RwLock<HashMap<&'static str, Vec<StoredVector>>>,
}

impl InMemorySemanticStore {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        let mut collections = HashMap::new();
        for name in COLLECTIONS {
            collections.insert(name, Vec::new());
        }
        Self {
            embedder,
            collections: RwLock::new(collections),
        }
    }

    async fn embed_normalized(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = self.embedder.embed(text).await?;
        l2_normalize(&mut vector);
        Ok(vector)
    }
}

#[async_trait]
impl SemanticStore for InMemorySemanticStore {
    async fn add(
        &self,
        user_id: &str,
        content: &str,
        kind: MemoryKind,
        importance: Importance,
        metadata: Option<Value>,
        embedding: Option<Vec<f32>>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let mut vector = match embedding {
            Some(v) => v,
            None => self.embedder.embed(content).await?,
        };
        l2_normalize(&mut vector);

        let id = Uuid::new_v4().to_string();
        let metadata: HashMap<String, Value> = match metadata {
            Some(Value::Object(map)) => map.into_iter().collect(),
            _ => HashMap::new(),
        };

        let stored = StoredVector {
            id: id.clone(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            kind,
            importance,
            created_at: Utc::now(),
            expires_at,
            metadata,
            vector,
        };

        let mut collections = self.collections.write().await;
        collections
            .get_mut(kind.collection())
            .expect("collection exists")
            .push(stored);

        tracing::debug!(user_id, %id, kind = kind.as_str(), "added to semantic store");
        Ok(id)
    }

    async fn search(
        &self,
        user_id: &str,
        query: &str,
        kind: Option<MemoryKind>,
        limit: usize,
        min_similarity: f32,
    ) -> Result<Vec<MemoryEntry>> {
        let query_vector = self.embed_normalized(query).await?;
        let collections = self.collections.read().await;

        let names: Vec<&'static str> = match kind {
            Some(kind) => vec![kind.collection()],
            None => COLLECTIONS.to_vec(),
        };

        let mut results: Vec<MemoryEntry> = Vec::new();
        for name in names {
            let Some(stored) = collections.get(name) else {
                continue;
            };
            for entry in stored.iter().filter(|e| e.user_id == user_id) {
                let similarity = cosine_similarity(&query_vector, &entry.vector);
                if similarity >= min_similarity {
                    results.push(entry.to_entry(Some(similarity)));
                }
            }
        }

        results.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn get_by_kind(
        &self,
        user_id: &str,
        kind: MemoryKind,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(kind.collection())
            .map(|stored| {
                stored
                    .iter()
                    .filter(|e| e.user_id == user_id)
                    .take(limit)
                    .map(|e| e.to_entry(None))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut collections = self.collections.write().await;
        let mut deleted = false;
        for stored in collections.values_mut() {
            let before = stored.len();
            stored.retain(|e| e.id != id);
            deleted |= stored.len() < before;
        }
        Ok(deleted)
    }

    async fn cleanup_expired(&self, user_id: Option<&str>) -> Result<u64> {
        let now = Utc::now();
        let mut collections = self.collections.write().await;
        let mut deleted = 0u64;
        for stored in collections.values_mut() {
            let before = stored.len();
            stored.retain(|e| {
                let user_match = user_id.map_or(true, |u| e.user_id == u);
                let expired = e.expires_at.is_some_and(|t| t <= now);
                !(user_match && expired)
            });
            deleted += (before - stored.len()) as u64;
        }
        if deleted > 0 {
            tracing::info!(deleted, "cleaned up expired semantic entries");
        }
        Ok(deleted)
    }

    async fn stats(&self, user_id: &str) -> Result<Value> {
        let collections = self.collections.read().await;
        let mut per_collection = serde_json::Map::new();
        let mut total = 0usize;
        for (name, stored) in collections.iter() {
            let count = stored.iter().filter(|e| e.user_id == user_id).count();
            per_collection.insert((*name).to_string(), Value::from(count));
            total += count;
        }
        Ok(serde_json::json!({
            "collections": per_collection,
            "total": total,
        }))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Deterministic embedder for tests: projects character histograms
    /// into a small vector so related texts land near each other.
    pub struct HashEmbedder;

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut v = vec![0.0f32; 16];
            for (i, ch) in text.to_lowercase().chars().enumerate() {
                v[(ch as usize + i) % 16] += 1.0;
            }
            Ok(v)
        }

        fn dimensions(&self) -> usize {
            16
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::HashEmbedder;
    use super::*;
    use chrono::Duration;

    fn store() -> InMemorySemanticStore {
        InMemorySemanticStore::new(Arc::new(HashEmbedder))
    }

    #[tokio::test]
    async fn test_add_and_exact_search() {
        let store = store();
        store
            .add(
                "u",
                "люблю тёплый свет в спальне",
                MemoryKind::Preference,
                Importance::Critical,
                None,
                None,
                None,
            )
            .await
            .unwrap();

        let hits = store
            .search("u", "люблю тёплый свет в спальне", None, 5, 0.9)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].similarity.unwrap() > 0.99);
    }

    #[tokio::test]
    async fn test_search_respects_user_boundary() {
        let store = store();
        store
            .add("alice", "секретная заметка о свете", MemoryKind::Fact, Importance::High, None, None, None)
            .await
            .unwrap();

        let hits = store
            .search("bob", "секретная заметка о свете", None, 5, 0.5)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_kind_scoped_search() {
        let store = store();
        store
            .add("u", "всегда приглушай свет вечером", MemoryKind::Rule, Importance::Critical, None, None, None)
            .await
            .unwrap();
        store
            .add("u", "всегда приглушай свет вечером", MemoryKind::Fact, Importance::High, None, None, None)
            .await
            .unwrap();

        let rules = store
            .search("u", "всегда приглушай свет вечером", Some(MemoryKind::Rule), 5, 0.9)
            .await
            .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].kind, MemoryKind::Rule);
    }

    #[tokio::test]
    async fn test_threshold_filters_unrelated() {
        let store = store();
        store
            .add("u", "рецепт борща с чесноком", MemoryKind::Fact, Importance::High, None, None, None)
            .await
            .unwrap();

        let hits = store
            .search("u", "xyzzy 12345 qwerty", None, 5, 0.95)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_delete_across_collections() {
        let store = store();
        let id = store
            .add("u", "временная запись", MemoryKind::Action, Importance::High, None, None, None)
            .await
            .unwrap();
        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let store = store();
        store
            .add(
                "u",
                "запись с истёкшим сроком",
                MemoryKind::Conversation,
                Importance::Medium,
                None,
                None,
                Some(Utc::now() - Duration::hours(1)),
            )
            .await
            .unwrap();
        store
            .add("u", "вечное правило", MemoryKind::Rule, Importance::Critical, None, None, None)
            .await
            .unwrap();

        let deleted = store.cleanup_expired(Some("u")).await.unwrap();
        assert_eq!(deleted, 1);
        let stats = store.stats("u").await.unwrap();
        assert_eq!(stats["total"], 1);
    }

    #[tokio::test]
    async fn test_error_kind_lands_in_conversations() {
        let store = store();
        store
            .add("u", "ошибка при вызове сервиса", MemoryKind::Error, Importance::Medium, None, None, None)
            .await
            .unwrap();
        let stats = store.stats("u").await.unwrap();
        assert_eq!(stats["collections"]["conversations"], 1);
    }
}
