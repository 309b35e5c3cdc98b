//! Qdrant-backed semantic store.
//!
//! Cosine-distance collections, one per memory kind. Qdrant reports
//! cosine scores directly as similarities, so `min_similarity` maps to
//! its score threshold unchanged.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointStruct,
    PointsIdsList, ScrollPointsBuilder, SearchPointsBuilder, UpsertPointsBuilder,
    VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use domovoy_core::{Embedder, Importance, MemoryEntry, MemoryKind, ProxyError, Result, Role};

use crate::embeddings::l2_normalize;
use crate::semantic::{SemanticStore, COLLECTIONS};

pub struct QdrantSemanticStore {
    client: Qdrant,
    embedder: Arc<dyn Embedder>,
}

impl QdrantSemanticStore {
    /// Connect and ensure all collections exist.
    pub async fn connect(
        url: &str,
        api_key: Option<&str>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let mut builder = Qdrant::from_url(url);
        if let Some(key) = api_key {
            builder = builder.api_key(key.to_string());
        }
        let client = builder
            .build()
            .map_err(|e| ProxyError::Storage(format!("qdrant connect: {e}")))?;

        let store = Self { client, embedder };
        store.ensure_collections().await?;
        Ok(store)
    }

    async fn ensure_collections(&self) -> Result<()> {
        let dimensions = self.embedder.dimensions() as u64;
        for name in COLLECTIONS {
            let exists = self
                .client
                .collection_exists(name)
                .await
                .map_err(|e| ProxyError::Storage(format!("qdrant exists: {e}")))?;
            if !exists {
                self.client
                    .create_collection(
                        CreateCollectionBuilder::new(name)
                            .vectors_config(VectorParamsBuilder::new(dimensions, Distance::Cosine)),
                    )
                    .await
                    .map_err(|e| ProxyError::Storage(format!("qdrant create: {e}")))?;
                tracing::info!(collection = name, dimensions, "created qdrant collection");
            }
        }
        Ok(())
    }

    fn point_to_entry(
        id: String,
        payload: &HashMap<String, qdrant_client::qdrant::Value>,
        similarity: Option<f32>,
    ) -> MemoryEntry {
        let get_str =
            |key: &str| -> Option<String> { payload.get(key).and_then(qdrant_value_as_string) };

        let metadata: HashMap<String, Value> = get_str("extra")
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();

        MemoryEntry {
            id,
            user_id: get_str("user_id").unwrap_or_default(),
            role: get_str("role")
                .and_then(|r| r.parse().ok())
                .unwrap_or(Role::User),
            content: get_str("content").unwrap_or_default(),
            kind: get_str("memory_type")
                .and_then(|k| k.parse().ok())
                .unwrap_or(MemoryKind::Conversation),
            importance: get_str("importance")
                .and_then(|i| i.parse().ok())
                .unwrap_or(Importance::Medium),
            created_at: get_str("timestamp")
                .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(Utc::now),
            expires_at: get_str("expires_at")
                .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
                .map(|t| t.with_timezone(&Utc)),
            similarity,
            metadata,
        }
    }
}

fn qdrant_value_as_string(value: &qdrant_client::qdrant::Value) -> Option<String> {
    use qdrant_client::qdrant::value::Kind;
    match value.kind.as_ref()? {
        Kind::StringValue(s) => Some(s.clone()),
        Kind::IntegerValue(i) => Some(i.to_string()),
        Kind::DoubleValue(d) => Some(d.to_string()),
        Kind::BoolValue(b) => Some(b.to_string()),
        _ => None,
    }
}

fn point_id_to_string(id: &qdrant_client::qdrant::PointId) -> String {
    use qdrant_client::qdrant::point_id::PointIdOptions;
    match id.point_id_options.as_ref() {
        Some(PointIdOptions::Uuid(uuid)) => uuid.clone(),
        Some(PointIdOptions::Num(num)) => num.to_string(),
        None => String::new(),
    }
}

#[async_trait]
impl SemanticStore for QdrantSemanticStore {
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
        let mut payload_json = serde_json::json!({
            "user_id": user_id,
            "content": content,
            "memory_type": kind.as_str(),
            "importance": importance.as_str(),
            "timestamp": Utc::now().to_rfc3339(),
        });
        if let Some(expires_at) = expires_at {
            payload_json["expires_at"] = Value::String(expires_at.to_rfc3339());
        }
        if let Some(meta) = metadata {
            if let Some(role) = meta.get("role").and_then(Value::as_str) {
                payload_json["role"] = Value::String(role.to_string());
            }
            payload_json["extra"] = Value::String(meta.to_string());
        }

        let payload = Payload::try_from(payload_json)
            .map_err(|e| ProxyError::Storage(format!("qdrant payload: {e}")))?;

        let point = PointStruct::new(id.clone(), vector, payload);
        self.client
            .upsert_points(UpsertPointsBuilder::new(kind.collection(), vec![point]).wait(true))
            .await
            .map_err(|e| ProxyError::Storage(format!("qdrant upsert: {e}")))?;

        tracing::debug!(user_id, %id, collection = kind.collection(), "added to qdrant");
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
        let mut vector = self.embedder.embed(query).await?;
        l2_normalize(&mut vector);

        let collections: Vec<&'static str> = match kind {
            Some(kind) => vec![kind.collection()],
            None => COLLECTIONS.to_vec(),
        };

        let mut results = Vec::new();
        for collection in collections {
            let response = self
                .client
                .search_points(
                    SearchPointsBuilder::new(collection, vector.clone(), limit as u64)
                        .filter(Filter::must([Condition::matches(
                            "user_id",
                            user_id.to_string(),
                        )]))
                        .score_threshold(min_similarity)
                        .with_payload(true),
                )
                .await
                .map_err(|e| ProxyError::Storage(format!("qdrant search: {e}")))?;

            for point in response.result {
                let id = point.id.as_ref().map(point_id_to_string).unwrap_or_default();
                results.push(Self::point_to_entry(id, &point.payload, Some(point.score)));
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
        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(kind.collection())
                    .filter(Filter::must([Condition::matches(
                        "user_id",
                        user_id.to_string(),
                    )]))
                    .limit(limit as u32)
                    .with_payload(true),
            )
            .await
            .map_err(|e| ProxyError::Storage(format!("qdrant scroll: {e}")))?;

        Ok(response
            .result
            .into_iter()
            .map(|point| {
                let id = point.id.as_ref().map(point_id_to_string).unwrap_or_default();
                Self::point_to_entry(id, &point.payload, None)
            })
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut deleted = false;
        for collection in COLLECTIONS {
            let result = self
                .client
                .delete_points(
                    DeletePointsBuilder::new(collection)
                        .points(PointsIdsList {
                            ids: vec![id.to_string().into()],
                        })
                        .wait(true),
                )
                .await;
            deleted |= result.is_ok();
        }
        Ok(deleted)
    }

    async fn cleanup_expired(&self, user_id: Option<&str>) -> Result<u64> {
        let now = Utc::now();
        let mut deleted = 0u64;

        for collection in COLLECTIONS {
            let mut builder = ScrollPointsBuilder::new(collection)
                .limit(1000)
                .with_payload(true);
            if let Some(user) = user_id {
                builder =
                    builder.filter(Filter::must([Condition::matches("user_id", user.to_string())]));
            }

            let response = self
                .client
                .scroll(builder)
                .await
                .map_err(|e| ProxyError::Storage(format!("qdrant scroll: {e}")))?;

            let expired: Vec<qdrant_client::qdrant::PointId> = response
                .result
                .into_iter()
                .filter(|point| {
                    point
                        .payload
                        .get("expires_at")
                        .and_then(qdrant_value_as_string)
                        .and_then(|t| DateTime::parse_from_rfc3339(&t).ok())
                        .is_some_and(|t| t.with_timezone(&Utc) <= now)
                })
                .filter_map(|point| point.id)
                .collect();

            if !expired.is_empty() {
                deleted += expired.len() as u64;
                self.client
                    .delete_points(
                        DeletePointsBuilder::new(collection)
                            .points(PointsIdsList { ids: expired })
                            .wait(true),
                    )
                    .await
                    .map_err(|e| ProxyError::Storage(format!("qdrant delete: {e}")))?;
            }
        }

        if deleted > 0 {
            tracing::info!(deleted, "cleaned up expired qdrant entries");
        }
        Ok(deleted)
    }

    async fn stats(&self, user_id: &str) -> Result<Value> {
        let mut per_collection = serde_json::Map::new();
        let mut total = 0usize;
        for collection in COLLECTIONS {
            let response = self
                .client
                .scroll(
                    ScrollPointsBuilder::new(collection)
                        .filter(Filter::must([Condition::matches(
                            "user_id",
                            user_id.to_string(),
                        )]))
                        .limit(1000)
                        .with_payload(false),
                )
                .await
                .map_err(|e| ProxyError::Storage(format!("qdrant scroll: {e}")))?;
            let count = response.result.len();
            per_collection.insert(collection.to_string(), Value::from(count));
            total += count;
        }
        Ok(serde_json::json!({
            "collections": per_collection,
            "total": total,
        }))
    }
}
