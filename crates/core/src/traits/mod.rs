//! Trait seams for every external collaborator. The core never sees
//! vendor specifics; concrete implementations live in the integrations
//! crate and are injected at startup.

pub mod home;
pub mod llm;
pub mod messaging;
pub mod realtime;
pub mod search;
pub mod speech;

pub use home::HomeAutomation;
pub use llm::{ChatMessage, ChatModel, ChatOutcome, ChatRequest, Embedder};
pub use messaging::Messenger;
pub use realtime::RealtimeConnector;
pub use search::{ArticleSearch, WebSearch};
pub use speech::{SpeechSynthesizer, SynthesisRequest, SynthesizedAudio};
