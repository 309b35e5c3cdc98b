//! Core types and trait seams for the voice assistant proxy.
//!
//! This crate provides the foundation shared by every other crate:
//! - The error taxonomy
//! - Conversation, memory, plan and response types
//! - The realtime wire protocol (client envelope and model events)
//! - Trait seams for all external collaborators
//! - The global fixed-window rate limiter

pub mod conversation;
pub mod error;
pub mod home;
pub mod plan;
pub mod rate_limit;
pub mod realtime;
pub mod response;
pub mod search;
pub mod traits;

pub use conversation::{Importance, MemoryContext, MemoryEntry, MemoryKind, Role};
pub use error::{ProxyError, Result};
pub use home::HomeSnapshot;
pub use plan::{ActionOutcome, ActionPlan, ExecutionReport, HomeAction, PlanKind};
pub use rate_limit::{RateDecision, RateLimiter};
pub use realtime::{
    ClientMessage, ModelChannel, ModelEvent, ModelEventKind, ProxyFrame, SessionSettings,
    EVENT_QUEUE_CAPACITY,
};
pub use response::{AudioPayload, Channel, ComposedResponse, PipelineMeta, StreamedResponse};
pub use search::{
    Article, ArticleQuery, PolicyDecision, RecencyRequirement, SearchCategory, SearchOutcome,
    SearchRequest,
};
pub use traits::{
    ArticleSearch, ChatMessage, ChatModel, ChatOutcome, ChatRequest, Embedder, HomeAutomation,
    Messenger, RealtimeConnector, SpeechSynthesizer, SynthesisRequest, SynthesizedAudio, WebSearch,
};
