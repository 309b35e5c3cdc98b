//! Messaging-bot seam.

use async_trait::async_trait;

use crate::error::Result;

/// Outbound messaging channel (bot API). A disabled messenger reports
/// `false` from `send_message` instead of failing.
#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(
        &self,
        text: &str,
        parse_mode: &str,
        disable_preview: bool,
    ) -> Result<bool>;

    fn is_enabled(&self) -> bool;
}
