//! Speech-synthesis seam.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Synthesis parameters.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice: String,
    pub format: String,
    pub speed: f32,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: voice.into(),
            format: "opus".to_string(),
            speed: 1.0,
        }
    }
}

/// Synthesized speech.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    pub format: String,
    pub duration_ms: u64,
    pub metadata: Value,
}

/// Text-to-speech provider.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, request: SynthesisRequest) -> Result<SynthesizedAudio>;

    async fn is_available(&self) -> bool {
        true
    }

    /// Split long text into synthesizable chunks at sentence boundaries.
    /// Text at or under `max_length` comes back as a single chunk equal
    /// to the input.
    fn split_for_synthesis(&self, text: &str, max_length: usize) -> Vec<String> {
        if text.chars().count() <= max_length {
            return vec![text.to_string()];
        }

        let mut chunks = Vec::new();
        let mut current = String::new();
        for sentence in text.split_inclusive(". ") {
            if current.chars().count() + sentence.chars().count() > max_length
                && !current.is_empty()
            {
                chunks.push(current.trim().to_string());
                current = String::new();
            }
            current.push_str(sentence);
        }
        if !current.trim().is_empty() {
            chunks.push(current.trim().to_string());
        }
        chunks
    }

    /// Rough duration estimate from word count at a normal speaking rate.
    fn estimate_duration_ms(&self, text: &str) -> u64 {
        const WORDS_PER_MINUTE: u64 = 150;
        let words = text.split_whitespace().count() as u64;
        words * 60_000 / WORDS_PER_MINUTE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSynth;

    #[async_trait]
    impl SpeechSynthesizer for NullSynth {
        async fn synthesize(&self, _request: SynthesisRequest) -> Result<SynthesizedAudio> {
            Ok(SynthesizedAudio {
                bytes: Vec::new(),
                format: "opus".into(),
                duration_ms: 0,
                metadata: Value::Null,
            })
        }
    }

    #[test]
    fn test_split_short_text_is_identity() {
        let synth = NullSynth;
        let chunks = synth.split_for_synthesis("Короткий текст.", 100);
        assert_eq!(chunks, vec!["Короткий текст.".to_string()]);
    }

    #[test]
    fn test_split_long_text_respects_limit() {
        let synth = NullSynth;
        let text = "Первое предложение. Второе предложение. Третье предложение. ".repeat(4);
        let chunks = synth.split_for_synthesis(&text, 80);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 80 + 2);
        }
    }

    #[test]
    fn test_duration_estimate() {
        let synth = NullSynth;
        // 150 words at 150 wpm is one minute.
        let text = vec!["слово"; 150].join(" ");
        assert_eq!(synth.estimate_duration_ms(&text), 60_000);
    }
}
