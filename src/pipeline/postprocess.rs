//! Cleanup of raw model output before it becomes a unit result.
//!
//! Vision models occasionally wrap their answer in a ```` ```markdown ````
//! fence despite the prompt, answer with CRLF line endings, or leak
//! zero-width characters from the page. These rules fix those quirks without
//! touching the words. The assembler never edits text; all cleanup happens
//! here, per unit, inside the transcriber.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\n(.*?)\n?```$").unwrap());

const INVISIBLE: &[char] = &['\u{200B}', '\u{200C}', '\u{200D}', '\u{2060}', '\u{FEFF}', '\u{00AD}'];

/// Apply all cleanup rules in order: line endings, outer fence, invisible
/// characters, surrounding blank space.
pub fn clean_unit_text(raw: &str) -> String {
    let text = raw.replace("\r\n", "\n").replace('\r', "\n");
    let trimmed = text.trim();
    let unfenced = RE_OUTER_FENCE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |m| m.as_str());
    unfenced
        .chars()
        .filter(|c| !INVISIBLE.contains(c))
        .collect::<String>()
        .trim()
        .to_string()
}
