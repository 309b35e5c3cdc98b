//! Upstream realtime-channel seam.

use async_trait::async_trait;

use crate::error::Result;
use crate::realtime::{ModelChannel, SessionSettings};

/// Opens one duplex channel to the streaming model per session. The
/// connector sends the session configuration before handing the channel
/// over, so the first events a caller sees are already post-configure.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(&self, settings: &SessionSettings) -> Result<ModelChannel>;
}
