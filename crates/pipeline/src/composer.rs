//! Response composer: shapes one plan + execution report for a channel.

use base64::Engine;
use std::sync::Arc;
use tokio::sync::mpsc;

use domovoy_core::{
    ActionPlan, AudioPayload, Channel, ComposedResponse, ExecutionReport, PlanKind,
    SpeechSynthesizer, StreamedResponse, SynthesisRequest,
};

/// Voice responses get truncated above this many characters.
const VOICE_MAX_CHARS: usize = 500;
const VOICE_CONTINUATION: &str = "... (продолжение в текстовом виде)";

pub struct ResponseComposer {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    voice: String,
}

impl ResponseComposer {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, voice: impl Into<String>) -> Self {
        Self {
            synthesizer,
            voice: voice.into(),
        }
    }

    pub async fn compose(
        &self,
        user_id: &str,
        plan: &ActionPlan,
        execution: Option<&ExecutionReport>,
        channel: Channel,
        include_audio: bool,
    ) -> ComposedResponse {
        let text = Self::build_text(plan, execution, channel);

        let mut response = ComposedResponse {
            kind: plan.kind,
            intent: plan.intent.clone(),
            text,
            channel,
            execution: execution.cloned(),
            actions: Vec::new(),
            needs_confirmation: false,
            sources: Vec::new(),
            articles: Vec::new(),
            audio: None,
            audio_error: None,
            pipeline: None,
        };

        match plan.kind {
            PlanKind::SearchResponse => {
                response.sources = plan.sources.clone();
                response.articles = plan.articles.clone();
            }
            PlanKind::ActionPlan => {
                response.actions = plan.actions.clone();
                response.needs_confirmation = execution
                    .map(|report| report.needs_confirmation)
                    .unwrap_or(plan.needs_confirmation);
            }
            _ => {}
        }

        if channel == Channel::Voice && include_audio && !response.text.is_empty() {
            match self.synthesize(&response.text).await {
                Ok(audio) => response.audio = Some(audio),
                Err(e) => {
                    // The text answer still stands without audio.
                    tracing::error!(user_id, error = %e, "failed to generate audio");
                    response.audio_error = Some(e.to_string());
                }
            }
        }

        tracing::info!(
            user_id,
            text_length = response.text.chars().count(),
            has_audio = response.audio.is_some(),
            channel = channel.as_str(),
            "response composed"
        );
        response
    }

    fn build_text(
        plan: &ActionPlan,
        execution: Option<&ExecutionReport>,
        channel: Channel,
    ) -> String {
        let mut text = plan.response_text.clone();

        if let Some(report) = execution {
            if report.executed > 0 && !report.message.is_empty() {
                text = format!("{text}\n{}", report.message);
            } else if report.needs_confirmation {
                text = report.message.clone();
            }
        }

        match channel {
            Channel::Voice => Self::optimize_for_voice(&text),
            Channel::Telegram => Self::format_for_telegram(&text, plan),
            Channel::Text => text,
        }
    }

    /// Strip markdown, collapse blank runs, keep the text speakable.
    fn optimize_for_voice(text: &str) -> String {
        let mut text = text.replace("**", "").replace('*', "").replace('#', "");
        while text.contains("\n\n\n") {
            text = text.replace("\n\n\n", "\n\n");
        }
        let text = text.trim();

        if text.chars().count() > VOICE_MAX_CHARS {
            let truncated: String = text.chars().take(VOICE_MAX_CHARS).collect();
            format!("{truncated}{VOICE_CONTINUATION}")
        } else {
            text.to_string()
        }
    }

    /// Keep markdown and append sources/article links.
    fn format_for_telegram(text: &str, plan: &ActionPlan) -> String {
        let mut formatted = text.to_string();

        if plan.kind == PlanKind::SearchResponse {
            if !plan.sources.is_empty() {
                formatted.push_str("\n\n**Источники:**");
                for (i, source) in plan.sources.iter().take(5).enumerate() {
                    formatted.push_str(&format!("\n{}. {}", i + 1, source));
                }
            }
            if !plan.articles.is_empty() {
                formatted.push_str("\n\n**Статьи:**");
                for article in plan.articles.iter().take(5) {
                    formatted.push_str(&format!("\n• [{}]({})", article.title, article.link));
                }
            }
        }

        formatted
    }

    async fn synthesize(&self, text: &str) -> domovoy_core::Result<AudioPayload> {
        let request = SynthesisRequest::new(text, self.voice.clone());
        let audio = self.synthesizer.synthesize(request).await?;
        Ok(AudioPayload {
            data: base64::engine::general_purpose::STANDARD.encode(&audio.bytes),
            format: audio.format,
            size: audio.bytes.len(),
            duration_ms: audio.duration_ms,
            metadata: audio.metadata,
        })
    }

    /// Streaming composition: re-emit model chunks with accumulation,
    /// then a terminal marker.
    pub fn compose_stream(
        &self,
        mut chunks: mpsc::Receiver<String>,
        channel: Channel,
    ) -> mpsc::Receiver<StreamedResponse> {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            let mut accumulated = String::new();
            while let Some(chunk) = chunks.recv().await {
                accumulated.push_str(&chunk);
                if tx
                    .send(StreamedResponse::StreamChunk {
                        channel,
                        text: chunk,
                        accumulated: accumulated.clone(),
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
            let _ = tx
                .send(StreamedResponse::StreamComplete {
                    channel,
                    text: accumulated,
                })
                .await;
        });
        rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingSynth, FakeSynth};
    use domovoy_core::Article;

    fn composer() -> ResponseComposer {
        ResponseComposer::new(Arc::new(FakeSynth), "alloy")
    }

    #[test]
    fn test_voice_strips_markdown() {
        let out = ResponseComposer::optimize_for_voice("**Жирный** и *курсив* # заголовок");
        assert!(!out.contains('*'));
        assert!(!out.contains('#'));
    }

    #[test]
    fn test_voice_collapses_blank_runs() {
        let out = ResponseComposer::optimize_for_voice("а\n\n\n\nб");
        assert!(!out.contains("\n\n\n"));
    }

    #[test]
    fn test_voice_truncates_long_text() {
        let long = "слово ".repeat(200);
        let out = ResponseComposer::optimize_for_voice(&long);
        assert!(out.ends_with(VOICE_CONTINUATION));
        assert!(out.chars().count() <= VOICE_MAX_CHARS + VOICE_CONTINUATION.chars().count());
    }

    #[test]
    fn test_voice_short_text_unchanged() {
        let out = ResponseComposer::optimize_for_voice("Готово");
        assert_eq!(out, "Готово");
    }

    #[test]
    fn test_telegram_appends_sources_and_articles() {
        let mut plan = ActionPlan::new(PlanKind::SearchResponse, "web_search", "ответ");
        plan.sources = vec!["https://example.com/a".into()];
        plan.articles = vec![Article {
            title: "Статья".into(),
            link: "https://habr.com/1".into(),
            published: None,
            summary: String::new(),
            tags: vec![],
            author: String::new(),
        }];

        let out = ResponseComposer::format_for_telegram("ответ", &plan);
        assert!(out.contains("**Источники:**"));
        assert!(out.contains("[Статья](https://habr.com/1)"));
    }

    #[tokio::test]
    async fn test_voice_channel_gets_audio() {
        let plan = ActionPlan::text("general_chat", "Привет!");
        let response = composer()
            .compose("u", &plan, None, Channel::Voice, true)
            .await;
        let audio = response.audio.unwrap();
        assert!(audio.size > 0);
        assert_eq!(audio.format, "opus");
        assert!(response.audio_error.is_none());
    }

    #[tokio::test]
    async fn test_tts_failure_degrades_to_text() {
        let composer = ResponseComposer::new(Arc::new(FailingSynth), "alloy");
        let plan = ActionPlan::text("general_chat", "Привет!");
        let response = composer
            .compose("u", &plan, None, Channel::Voice, true)
            .await;
        assert!(response.audio.is_none());
        assert!(response.audio_error.is_some());
        assert_eq!(response.text, "Привет!");
    }

    #[tokio::test]
    async fn test_text_channel_skips_audio() {
        let plan = ActionPlan::text("general_chat", "Привет!");
        let response = composer()
            .compose("u", &plan, None, Channel::Text, true)
            .await;
        assert!(response.audio.is_none());
    }

    #[tokio::test]
    async fn test_execution_feedback_appended() {
        let plan = ActionPlan::new(PlanKind::ActionPlan, "ha_control", "Включаю свет");
        let mut report = ExecutionReport::default();
        report.executed = 1;
        report.message = "Выполнено действий: 1".into();

        let response = composer()
            .compose("u", &plan, Some(&report), Channel::Text, false)
            .await;
        assert!(response.text.contains("Включаю свет"));
        assert!(response.text.contains("Выполнено действий: 1"));
    }

    #[tokio::test]
    async fn test_confirmation_report_shapes_response() {
        let mut plan = ActionPlan::new(PlanKind::ActionPlan, "ha_control", "Открываю замок");
        plan.needs_confirmation = true;
        let report = ExecutionReport::confirmation_required("Это действие требует подтверждения");

        let response = composer()
            .compose("u", &plan, Some(&report), Channel::Text, false)
            .await;
        assert!(response.needs_confirmation);
        assert!(response.text.contains("подтверждения"));
    }

    #[tokio::test]
    async fn test_stream_composition_order() {
        let (tx, rx) = mpsc::channel(8);
        let mut out = composer().compose_stream(rx, Channel::Text);

        tx.send("При".to_string()).await.unwrap();
        tx.send("вет".to_string()).await.unwrap();
        drop(tx);

        match out.recv().await.unwrap() {
            StreamedResponse::StreamChunk { text, accumulated, .. } => {
                assert_eq!(text, "При");
                assert_eq!(accumulated, "При");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        match out.recv().await.unwrap() {
            StreamedResponse::StreamChunk { accumulated, .. } => {
                assert_eq!(accumulated, "Привет");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        match out.recv().await.unwrap() {
            StreamedResponse::StreamComplete { text, .. } => assert_eq!(text, "Привет"),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}
