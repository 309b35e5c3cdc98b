//! Two-tier memory with policy-driven storage decisions.
//!
//! - Recent-ordered tier: SQLite append log, bounded per user
//! - Semantic tier: vector collections per memory kind (Qdrant or
//!   in-process)
//! - `MemoryManager`: the single facade deciding what lands where
//! - Append-only audit log for executed actions

pub mod audit;
pub mod embeddings;
pub mod manager;
pub mod qdrant_store;
pub mod recency_store;
pub mod semantic;

pub use audit::{ActionLogRecord, AuditEntry, AuditLog};
pub use embeddings::CachingEmbedder;
pub use manager::{MemoryManager, RecallStrategy, RememberReceipt};
pub use qdrant_store::QdrantSemanticStore;
pub use recency_store::{RecencyStore, SqliteRecencyStore};
pub use semantic::{InMemorySemanticStore, SemanticStore, COLLECTIONS};
