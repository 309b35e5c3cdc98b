//! Prompt assembly for the planning model.

use domovoy_config::AssistantConfig;

use crate::context::PipelineContext;

/// System prompt for the planning model: persona plus the action-plan
/// JSON contract.
pub fn planner_system_prompt(assistant: &AssistantConfig, context: &PipelineContext) -> String {
    let mut parts = vec![
        format!(
            "Ты — {}, умный голосовой ассистент для управления домом через Home Assistant.",
            assistant.name
        ),
        format!("Стиль: {}", assistant.style_list().join(", ")),
        format!("Язык: {}", assistant.language),
        String::new(),
        "Твои задачи:".to_string(),
        "1. Понимать естественные команды пользователя".to_string(),
        "2. Планировать действия в Home Assistant".to_string(),
        "3. Учитывать контекст и предпочтения пользователя".to_string(),
        "4. Запрашивать подтверждение для опасных действий".to_string(),
        String::new(),
        "Для управления домом возвращай JSON:".to_string(),
        r#"{"intent": "...", "actions": [{"domain": "...", "service": "...", "target": {...}}], "needs_confirmation": true/false, "response": "..."}"#.to_string(),
        String::new(),
        "ВАЖНО:".to_string(),
        "- НЕ выдумывай entity_id! Используй только те, что есть в контексте".to_string(),
        "- Опасные действия требуют подтверждения".to_string(),
        "- Для обычных вопросов возвращай текст".to_string(),
    ];

    if let Some(memory) = &context.memory {
        // Query-relevant rules only; the full rule set is unranked and
        // can crowd out the one rule that matters for this command.
        if !memory.relevant_rules.is_empty() {
            parts.push(String::new());
            parts.push("Правила пользователя:".to_string());
            for rule in memory.relevant_rules.iter().take(3) {
                parts.push(format!("- {}", rule.content));
            }
        }
    }

    parts.join("\n")
}

/// User message carrying the command and the resolved context summary.
pub fn planner_user_message(context: &PipelineContext) -> String {
    let mut parts = Vec::new();

    if let Some(home) = &context.home {
        parts.push("Контекст Home Assistant:".to_string());
        parts.push(format!("- Устройств: {}", home.total_entities));
        let areas = home.area_names();
        if !areas.is_empty() {
            parts.push(format!("- Комнат: {}", areas.len()));
        }
    }

    if let Some(memory) = &context.memory {
        if !memory.relevant_memories.is_empty() {
            parts.push(String::new());
            parts.push("Из истории:".to_string());
            for entry in memory.relevant_memories.iter().take(2) {
                let preview: String = entry.content.chars().take(100).collect();
                parts.push(format!("- {preview}"));
            }
        }
    }

    parts.push(String::new());
    parts.push(format!("Команда: {}", context.command));
    parts.join("\n")
}

/// Instructions for the streaming session, kept short for a voice
/// channel.
pub fn session_instructions(assistant: &AssistantConfig, rules: &[String]) -> String {
    let mut parts = vec![
        format!(
            "Ты — {}, умный голосовой ассистент для управления домом через Home Assistant.",
            assistant.name
        ),
        format!("Стиль общения: {}", assistant.style_list().join(", ")),
        format!("Язык: {}", assistant.language),
        String::new(),
        "Отвечай КРАТКО и ЕСТЕСТВЕННО, как в живом разговоре.".to_string(),
        "Это голосовой интерфейс - избегай длинных списков и форматирования.".to_string(),
    ];

    if !rules.is_empty() {
        parts.push(String::new());
        parts.push("Правила пользователя:".to_string());
        for rule in rules.iter().take(3) {
            parts.push(format!("- {rule}"));
        }
    }

    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intent::{Intent, IntentAnalysis};
    use serde_json::Value;

    fn context() -> PipelineContext {
        PipelineContext {
            user_id: "u".into(),
            command: "включи свет".into(),
            intent: IntentAnalysis {
                intent: Intent::HaControl,
                confidence: 0.8,
                entities: Value::Null,
                requires: vec![],
            },
            home: None,
            memory: None,
        }
    }

    fn rule_entry(content: &str) -> domovoy_core::MemoryEntry {
        domovoy_core::MemoryEntry {
            id: "1".into(),
            user_id: "u".into(),
            role: domovoy_core::Role::User,
            content: content.into(),
            kind: domovoy_core::MemoryKind::Rule,
            importance: domovoy_core::Importance::Critical,
            created_at: chrono::Utc::now(),
            expires_at: None,
            similarity: None,
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_system_prompt_carries_contract() {
        let prompt = planner_system_prompt(&AssistantConfig::default(), &context());
        assert!(prompt.contains("Домовой"));
        assert!(prompt.contains("needs_confirmation"));
        assert!(prompt.contains("НЕ выдумывай entity_id"));
    }

    #[test]
    fn test_system_prompt_uses_relevant_rules() {
        let mut ctx = context();
        let mut memory = domovoy_core::MemoryContext::default();
        memory.user_rules = vec![rule_entry("неважное правило про музыку")];
        memory.relevant_rules = vec![rule_entry("не включай свет ночью")];
        ctx.memory = Some(memory);

        let prompt = planner_system_prompt(&AssistantConfig::default(), &ctx);
        assert!(prompt.contains("не включай свет ночью"));
        assert!(!prompt.contains("неважное правило про музыку"));
    }

    #[test]
    fn test_user_message_ends_with_command() {
        let message = planner_user_message(&context());
        assert!(message.ends_with("Команда: включи свет"));
    }

    #[test]
    fn test_session_instructions_include_rules() {
        let instructions = session_instructions(
            &AssistantConfig::default(),
            &["не включай музыку ночью".to_string()],
        );
        assert!(instructions.contains("голосовой интерфейс"));
        assert!(instructions.contains("не включай музыку ночью"));
    }
}
