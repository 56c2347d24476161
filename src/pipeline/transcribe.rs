//! VLM interaction: one bitmap in, one unit of Markdown out.
//!
//! [`Transcriber`] is the seam between the worker pool and the network. The
//! pool never retries inside a call: a transcriber makes exactly one attempt
//! and reports success or a tagged [`TranscribeError`]. Retrying is the
//! pool's job (re-enqueue), so a slow unit never pins a worker slot while
//! it backs off.
//!
//! [`VisionTranscriber`] is the production implementation over any
//! `edgequake_llm` provider. It enforces its own per-call timeout; the pool
//! imposes none.

use crate::config::ConversionConfig;
use crate::error::TranscribeError;
use crate::pipeline::encode::encode_bitmap;
use crate::pipeline::postprocess::clean_unit_text;
use crate::pipeline::render::Bitmap;
use crate::prompts;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Text produced for one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcription {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl Transcription {
    /// A transcription without token accounting.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Turns a rendered unit into text with a single remote call.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, bitmap: &Bitmap) -> Result<Transcription, TranscribeError>;
}

/// Transcribes bitmaps with a vision-capable LLM provider.
pub struct VisionTranscriber {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    instruction: String,
    options: CompletionOptions,
    timeout: Duration,
}

impl VisionTranscriber {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ConversionConfig) -> Self {
        Self {
            provider,
            system_prompt: prompts::system_prompt(&config.task, config.system_prompt.as_deref()),
            instruction: prompts::user_instruction(&config.task),
            options: build_options(config),
            timeout: Duration::from_secs(config.api_timeout_secs.max(1)),
        }
    }
}

#[async_trait]
impl Transcriber for VisionTranscriber {
    async fn transcribe(&self, bitmap: &Bitmap) -> Result<Transcription, TranscribeError> {
        let image = encode_bitmap(bitmap).map_err(|e| TranscribeError::Encode(e.to_string()))?;

        let messages = vec![
            ChatMessage::system(self.system_prompt.as_str()),
            ChatMessage::user_with_images(self.instruction.as_str(), vec![image]),
        ];

        let response = tokio::time::timeout(
            self.timeout,
            self.provider.chat(&messages, Some(&self.options)),
        )
        .await
        .map_err(|_| TranscribeError::Timeout {
            secs: self.timeout.as_secs(),
        })?
        .map_err(|e| TranscribeError::Provider(e.to_string()))?;

        debug!(
            "Unit {}: {} input tokens, {} output tokens",
            bitmap.index, response.prompt_tokens, response.completion_tokens
        );

        Ok(Transcription {
            text: clean_unit_text(&response.content),
            input_tokens: response.prompt_tokens,
            output_tokens: response.completion_tokens,
        })
    }
}

/// Build `CompletionOptions` from the conversion config.
fn build_options(config: &ConversionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_options_defaults() {
        let config = ConversionConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn transcription_text_constructor() {
        let t = Transcription::text("hi");
        assert_eq!(t.text, "hi");
        assert_eq!(t.input_tokens, 0);
    }
}
