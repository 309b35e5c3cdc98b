//! Concrete adapters for every external collaborator.
//!
//! Thin typed clients over HTTP and WebSocket. The rest of the system
//! only ever sees the trait seams defined in `domovoy-core`.

pub mod habr;
pub mod homeassistant;
pub mod openai;
pub mod perplexity;
pub mod realtime;
pub mod telegram;

pub use habr::HabrClient;
pub use homeassistant::HomeAssistantClient;
pub use openai::{decode_audio, encode_audio, OpenAiChatModel, OpenAiEmbedder, OpenAiSpeech};
pub use perplexity::PerplexityClient;
pub use realtime::OpenAiRealtimeConnector;
pub use telegram::TelegramClient;
