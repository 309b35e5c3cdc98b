//! Tool-call seam for streaming sessions.

use async_trait::async_trait;
use serde_json::Value;

/// Executes model-requested tools mid-response. The server wires this to
/// pipeline-backed functionality; sessions only see the seam.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run one tool and return its output. Failures are reported as
    /// outputs too, so the model can recover in-conversation.
    async fn execute(&self, user_id: &str, name: &str, arguments: Value) -> Value;

    /// Called at teardown for a tool call that never got its result
    /// posted, so the attempt still lands in the audit trail.
    async fn record_abandoned(&self, user_id: &str, call_id: &str, name: &str) {
        tracing::warn!(user_id, call_id, name, "tool call abandoned at teardown");
    }
}

/// Handler for sessions configured without tools.
pub struct NoTools;

#[async_trait]
impl ToolHandler for NoTools {
    async fn execute(&self, _user_id: &str, name: &str, _arguments: Value) -> Value {
        serde_json::json!({ "error": format!("unknown tool: {name}") })
    }
}
