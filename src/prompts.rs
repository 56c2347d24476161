//! Prompts sent to the vision model.
//!
//! Callers can override the system prompt via
//! [`crate::config::ConversionConfig::system_prompt`]; the constants here are
//! used only when no override is provided. The per-unit user instruction is
//! always derived from [`TranscriptionTask`].

use crate::config::TranscriptionTask;

/// Default system prompt for verbatim transcription of one unit.
pub const TRANSCRIBE_SYSTEM_PROMPT: &str = r#"You are an expert document transcriber. You receive one image: a PDF page, a presentation slide, or a scanned picture.

Rules:

1. Reproduce ALL text exactly as written, in the reading order a human would use.
   Do not summarise, explain, or correct the wording.
2. Ignore page numbers, running headers and running footers.
3. Express structure as Markdown: # headings, - and 1. lists, GFM pipe tables,
   **bold** and *italic* where the page shows emphasis.
4. Render mathematical expressions as LaTeX: $inline$ and $$display$$.
5. For figures without text, write nothing.
6. Output ONLY the Markdown. No ```markdown fences, no commentary."#;

/// Default system prompt for translation; `{language}` is replaced at runtime.
pub const TRANSLATE_SYSTEM_PROMPT: &str = r#"You are an expert document translator. You receive one image: a PDF page, a presentation slide, or a scanned picture.

Rules:

1. Translate ALL text into {language}, in the reading order a human would use.
   Do not summarise or add explanations.
2. Ignore page numbers, running headers and running footers.
3. Keep the layout as Markdown: # headings, - and 1. lists, GFM pipe tables,
   **bold** and *italic* where the page shows emphasis.
4. Keep mathematical expressions, code and proper names untranslated.
5. Output ONLY the Markdown. No ```markdown fences, no commentary."#;

/// The system prompt for `task`, unless the caller supplied one.
pub fn system_prompt(task: &TranscriptionTask, custom: Option<&str>) -> String {
    if let Some(custom) = custom {
        return custom.to_string();
    }
    match task {
        TranscriptionTask::Transcribe => TRANSCRIBE_SYSTEM_PROMPT.to_string(),
        TranscriptionTask::Translate { target_language } => {
            TRANSLATE_SYSTEM_PROMPT.replace("{language}", target_language)
        }
    }
}

/// The short user-turn instruction that accompanies the image.
pub fn user_instruction(task: &TranscriptionTask) -> String {
    match task {
        TranscriptionTask::Transcribe => {
            "Transcribe this page verbatim. Ignore page numbers, headers and footers.".to_string()
        }
        TranscriptionTask::Translate { target_language } => format!(
            "Translate this page into {target_language}. Ignore page numbers, headers and footers."
        ),
    }
}
