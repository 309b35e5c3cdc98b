//! Streaming session core.
//!
//! Per-session state machine wiring a client duplex channel to a model
//! duplex channel: ordered event forwarding through a bounded queue,
//! barge-in, tool-call plumbing, heartbeat and teardown.

pub mod registry;
pub mod session;
pub mod tools;

pub use registry::SessionRegistry;
pub use session::{Session, SessionState, HEARTBEAT};
pub use tools::{NoTools, ToolHandler};
