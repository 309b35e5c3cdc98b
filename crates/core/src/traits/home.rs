//! Home-automation adapter seam.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::home::HomeSnapshot;
use crate::plan::HomeAction;

/// The home-automation backend as the core sees it. The adapter enforces
/// the configured service allow-list; callers additionally consult
/// `needs_confirmation` before executing anything dangerous.
#[async_trait]
pub trait HomeAutomation: Send + Sync {
    /// Full snapshot: entities grouped by domain and area, areas list,
    /// total count.
    async fn get_context(&self) -> Result<HomeSnapshot>;

    /// Invoke one service call. Returns the affected entity states.
    /// Calls outside the allow-list fail with `PolicyRejected`.
    async fn call_service(&self, action: &HomeAction) -> Result<Value>;

    /// Submit an automation draft. The result is a reviewed-draft
    /// acknowledgement, not a live automation.
    async fn create_automation(&self, config: Value) -> Result<Value>;

    /// Whether `domain.service` is on the allow-list (wildcards apply).
    fn is_service_allowed(&self, service: &str) -> bool;

    /// Whether `domain.service` requires explicit user confirmation.
    fn needs_confirmation(&self, service: &str) -> bool;
}
