//! Session registry: creation, lookup, capacity and teardown.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use domovoy_core::{ProxyError, RealtimeConnector, Result, SessionSettings};

use crate::session::Session;
use crate::tools::ToolHandler;

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    max_sessions: usize,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
        }
    }

    /// Connect a model channel and start a session bound to a client
    /// sink.
    pub async fn create(
        &self,
        user_id: &str,
        settings: &SessionSettings,
        connector: &dyn RealtimeConnector,
        client_tx: mpsc::Sender<String>,
        tools: Arc<dyn ToolHandler>,
    ) -> Result<Arc<Session>> {
        if self.sessions.len() >= self.max_sessions {
            return Err(ProxyError::SessionFatal("max sessions reached".into()));
        }

        let channel = connector.connect(settings).await?;
        let id = format!("{user_id}_{}", uuid::Uuid::new_v4());
        let session = Session::start(&id, user_id, channel, client_tx, tools);
        self.sessions.insert(id.clone(), session.clone());

        tracing::info!(session_id = %id, user_id, "session created");
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| s.value().clone())
    }

    /// Remove and tear down one session.
    pub async fn remove(&self, id: &str) {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.teardown().await;
            tracing::info!(session_id = %id, "session removed");
        }
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn list(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    /// Tear down everything, for shutdown.
    pub async fn close_all(&self) {
        let ids = self.list();
        for id in ids {
            self.remove(&id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::NoTools;
    use async_trait::async_trait;
    use domovoy_core::ModelChannel;

    struct FakeConnector;

    #[async_trait]
    impl RealtimeConnector for FakeConnector {
        async fn connect(&self, _settings: &SessionSettings) -> Result<ModelChannel> {
            let (out_tx, _out_rx) = mpsc::channel(8);
            let (_in_tx, in_rx) = mpsc::channel(8);
            // The unused halves are dropped; sessions created from this
            // connector see a closed model stream, which is fine for
            // registry tests.
            Ok(ModelChannel::new(out_tx, in_rx))
        }
    }

    #[tokio::test]
    async fn test_create_get_remove() {
        let registry = SessionRegistry::new(4);
        let (client_tx, _client_rx) = mpsc::channel(8);

        let session = registry
            .create(
                "u",
                &SessionSettings::default(),
                &FakeConnector,
                client_tx,
                Arc::new(NoTools),
            )
            .await
            .unwrap();

        assert_eq!(registry.count(), 1);
        assert!(registry.get(session.id()).is_some());

        registry.remove(session.id()).await;
        assert_eq!(registry.count(), 0);
        assert!(registry.get(session.id()).is_none());
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let registry = SessionRegistry::new(1);
        let (client_tx, _rx) = mpsc::channel(8);
        registry
            .create(
                "u1",
                &SessionSettings::default(),
                &FakeConnector,
                client_tx,
                Arc::new(NoTools),
            )
            .await
            .unwrap();

        let (client_tx, _rx) = mpsc::channel(8);
        let err = registry
            .create(
                "u2",
                &SessionSettings::default(),
                &FakeConnector,
                client_tx,
                Arc::new(NoTools),
            )
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = SessionRegistry::new(4);
        for user in ["a", "b", "c"] {
            let (client_tx, _rx) = mpsc::channel(8);
            registry
                .create(
                    user,
                    &SessionSettings::default(),
                    &FakeConnector,
                    client_tx,
                    Arc::new(NoTools),
                )
                .await
                .unwrap();
        }
        assert_eq!(registry.count(), 3);
        registry.close_all().await;
        assert_eq!(registry.count(), 0);
    }
}
