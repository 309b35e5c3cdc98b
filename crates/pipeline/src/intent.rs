//! Intent analysis: keyword fast path with a model fallback.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use domovoy_core::{ChatMessage, ChatModel, ChatRequest};

/// Confidence at or above which the fast path short-circuits the model.
pub const FAST_PATH_CONFIDENCE: f32 = 0.80;

/// What the user wants to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    HaControl,
    HaQuery,
    HaAutomation,
    WebSearch,
    HabrSearch,
    MemoryQuery,
    SetRule,
    GeneralChat,
    Unknown,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::HaControl => "ha_control",
            Intent::HaQuery => "ha_query",
            Intent::HaAutomation => "ha_automation",
            Intent::WebSearch => "web_search",
            Intent::HabrSearch => "habr_search",
            Intent::MemoryQuery => "memory_query",
            Intent::SetRule => "set_rule",
            Intent::GeneralChat => "general_chat",
            Intent::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resources a classified command needs downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    Homeassistant,
    Perplexity,
    Habr,
    Memory,
    None,
}

/// Classification result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentAnalysis {
    #[serde(rename = "type")]
    pub intent: Intent,
    pub confidence: f32,
    #[serde(default)]
    pub entities: Value,
    #[serde(default)]
    pub requires: Vec<Requirement>,
}

impl IntentAnalysis {
    pub fn needs_home(&self) -> bool {
        matches!(
            self.intent,
            Intent::HaControl | Intent::HaQuery | Intent::HaAutomation
        )
    }

    pub fn needs_memory(&self) -> bool {
        matches!(
            self.intent,
            Intent::MemoryQuery | Intent::HaControl | Intent::HaQuery
        )
    }

    pub fn needs_search(&self) -> bool {
        matches!(self.intent, Intent::WebSearch | Intent::HabrSearch)
    }
}

const HA_KEYWORDS: &[&str] = &[
    "включи", "выключи", "открой", "закрой", "установи", "запусти", "turn on", "turn off", "open",
    "close", "set ", "start", "stop",
];

const SEARCH_KEYWORDS: &[&str] = &[
    "найди",
    "поищи",
    "погугли",
    "что такое",
    "кто такой",
    "расскажи о",
    "search",
    "find",
    "google",
    "what is",
    "who is",
    "tell me about",
];

const HABR_KEYWORDS: &[&str] = &["habr", "хабр", "статья", "article"];

const MEMORY_KEYWORDS: &[&str] = &[
    "помнишь",
    "вспомни",
    "когда я",
    "в прошлый раз",
    "remember",
    "recall",
    "last time",
];

const RULE_KEYWORDS: &[&str] = &["запомни правило", "запомни:", "новое правило", "always remember"];

pub struct IntentAnalyzer {
    model: Arc<dyn ChatModel>,
}

impl IntentAnalyzer {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }

    /// Classify a command. The keyword fast path answers confident cases
    /// without touching the model.
    pub async fn analyze(&self, user_id: &str, command: &str) -> IntentAnalysis {
        if let Some(analysis) = Self::quick_classify(command) {
            tracing::info!(
                user_id,
                intent = analysis.intent.as_str(),
                confidence = analysis.confidence,
                "fast-path intent classification"
            );
            return analysis;
        }
        self.model_classify(user_id, command).await
    }

    /// Keyword classification; None when not confident enough.
    pub fn quick_classify(command: &str) -> Option<IntentAnalysis> {
        let command_lower = command.to_lowercase();
        let contains_any = |keywords: &[&str]| keywords.iter().any(|kw| command_lower.contains(kw));

        if contains_any(RULE_KEYWORDS) {
            return Some(IntentAnalysis {
                intent: Intent::SetRule,
                confidence: 0.90,
                entities: Value::Object(Default::default()),
                requires: vec![Requirement::Memory],
            });
        }
        if contains_any(HABR_KEYWORDS) {
            return Some(IntentAnalysis {
                intent: Intent::HabrSearch,
                confidence: 0.95,
                entities: Value::Object(Default::default()),
                requires: vec![Requirement::Habr],
            });
        }
        if contains_any(MEMORY_KEYWORDS) {
            return Some(IntentAnalysis {
                intent: Intent::MemoryQuery,
                confidence: 0.90,
                entities: Value::Object(Default::default()),
                requires: vec![Requirement::Memory],
            });
        }
        if contains_any(SEARCH_KEYWORDS) {
            return Some(IntentAnalysis {
                intent: Intent::WebSearch,
                confidence: 0.85,
                entities: Value::Object(Default::default()),
                requires: vec![Requirement::Perplexity],
            });
        }
        if contains_any(HA_KEYWORDS) {
            return Some(IntentAnalysis {
                intent: Intent::HaControl,
                confidence: 0.80,
                entities: Value::Object(Default::default()),
                requires: vec![Requirement::Homeassistant, Requirement::Memory],
            });
        }

        None
    }

    async fn model_classify(&self, user_id: &str, command: &str) -> IntentAnalysis {
        let system_prompt = r#"Ты — классификатор намерений пользователя для умного дома.

Доступные типы намерений:
- ha_control: Управление устройствами (включи свет, открой штору)
- ha_query: Запрос состояния (какая температура, горит ли свет)
- ha_automation: Создание автоматизаций (создай правило, автоматизируй)
- web_search: Поиск в интернете (найди информацию, что такое)
- habr_search: Поиск на Хабре (найди статью на Хабре)
- memory_query: Запрос из истории (помнишь, вспомни)
- set_rule: Установка правила (запомни, всегда)
- general_chat: Обычный разговор (привет, как дела)

Верни JSON:
{"type": "intent_type", "confidence": 0.95, "entities": {}, "requires": ["homeassistant"]}

Возможные requires: homeassistant, perplexity, habr, memory, none"#;

        let request = ChatRequest::new(vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(command),
        ])
        .with_temperature(0.1)
        .with_max_tokens(200);

        match self.model.complete(request).await {
            Ok(outcome) => match serde_json::from_str::<IntentAnalysis>(&outcome.content) {
                Ok(analysis) => {
                    tracing::info!(
                        user_id,
                        intent = analysis.intent.as_str(),
                        confidence = analysis.confidence,
                        "model intent classification"
                    );
                    analysis
                }
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "unparseable intent response");
                    Self::fallback()
                }
            },
            Err(e) => {
                tracing::error!(user_id, error = %e, "intent classification failed");
                Self::fallback()
            }
        }
    }

    fn fallback() -> IntentAnalysis {
        IntentAnalysis {
            intent: Intent::GeneralChat,
            confidence: 0.5,
            entities: Value::Object(Default::default()),
            requires: vec![Requirement::None],
        }
    }
}
