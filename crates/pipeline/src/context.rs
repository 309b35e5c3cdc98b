//! Context resolution: home snapshot plus memory context.
//!
//! The resolver never fails the pipeline. Whatever cannot be fetched is
//! replaced with a degraded value carrying the error.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use domovoy_core::{HomeAutomation, HomeSnapshot, MemoryContext};
use domovoy_memory::MemoryManager;

use crate::intent::IntentAnalysis;

/// Everything later stages need to know about one command.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub user_id: String,
    pub command: String,
    pub intent: IntentAnalysis,
    pub home: Option<HomeSnapshot>,
    pub memory: Option<MemoryContext>,
}

struct CachedSnapshot {
    snapshot: HomeSnapshot,
    fetched_at: Instant,
}

pub struct ContextResolver {
    home: Arc<dyn HomeAutomation>,
    memory: Arc<MemoryManager>,
    cache: DashMap<String, CachedSnapshot>,
    cache_ttl: Duration,
}

impl ContextResolver {
    pub fn new(
        home: Arc<dyn HomeAutomation>,
        memory: Arc<MemoryManager>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            home,
            memory,
            cache: DashMap::new(),
            cache_ttl,
        }
    }

    pub async fn resolve(
        &self,
        user_id: &str,
        command: &str,
        intent: &IntentAnalysis,
    ) -> PipelineContext {
        let home = if intent.needs_home() {
            Some(self.home_snapshot(user_id).await)
        } else {
            None
        };

        let memory = if intent.needs_memory() {
            Some(self.memory.build_context(user_id, command).await)
        } else {
            None
        };

        tracing::info!(
            user_id,
            home_entities = home.as_ref().map(|h| h.total_entities).unwrap_or(0),
            relevant_memories = memory
                .as_ref()
                .map(|m| m.relevant_memories.len())
                .unwrap_or(0),
            "context resolved"
        );

        PipelineContext {
            user_id: user_id.to_string(),
            command: command.to_string(),
            intent: intent.clone(),
            home,
            memory,
        }
    }

    /// Snapshot with a short per-user TTL cache; a fetch failure returns
    /// a degraded snapshot instead of an error.
    async fn home_snapshot(&self, user_id: &str) -> HomeSnapshot {
        if let Some(cached) = self.cache.get(user_id) {
            if cached.fetched_at.elapsed() < self.cache_ttl {
                tracing::debug!(user_id, "using cached home context");
                return cached.snapshot.clone();
            }
        }

        match self.home.get_context().await {
            Ok(snapshot) => {
                self.cache.insert(
                    user_id.to_string(),
                    CachedSnapshot {
                        snapshot: snapshot.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                snapshot
            }
            Err(e) => {
                tracing::error!(user_id, error = %e, "failed to get home context");
                HomeSnapshot::degraded(e.to_string())
            }
        }
    }

    /// Entities from the resolved snapshot matching a domain/area filter.
    pub fn extract_entities(
        context: &PipelineContext,
        domain: Option<&str>,
        area: Option<&str>,
    ) -> Vec<Value> {
        context
            .home
            .as_ref()
            .map(|home| home.extract_entities(domain, area))
            .unwrap_or_default()
    }

    /// Plain-text rendering of the context for prompt building.
    pub fn format_for_llm(context: &PipelineContext) -> String {
        let mut parts = vec![format!("Намерение: {}", context.intent.intent)];

        if let Some(home) = &context.home {
            parts.push(format!(
                "\nУстройств в Home Assistant: {}",
                home.total_entities
            ));
            let areas = home.area_names();
            if !areas.is_empty() {
                parts.push(format!(
                    "Комнаты: {}",
                    areas.iter().take(10).cloned().collect::<Vec<_>>().join(", ")
                ));
            }
        }

        if let Some(memory) = &context.memory {
            if !memory.relevant_rules.is_empty() {
                parts.push("\nПравила пользователя:".to_string());
                for rule in memory.relevant_rules.iter().take(3) {
                    parts.push(format!("- {}", rule.content));
                }
            }
            if !memory.relevant_memories.is_empty() {
                parts.push("\nИз истории:".to_string());
                for entry in memory.relevant_memories.iter().take(2) {
                    let preview: String = entry.content.chars().take(100).collect();
                    parts.push(format!("- {preview}"));
                }
            }
        }

        parts.join("\n")
    }
}
