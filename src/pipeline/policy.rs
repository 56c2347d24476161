//! Post-hoc screening of transcribed text.
//!
//! Vision models sometimes fall into a loop and emit the same phrase until
//! they hit the token limit. Retrying rarely helps and would stall the whole
//! document on one unit, so a degenerate result is replaced by a visible
//! placeholder and accepted as final.
//!
//! Detection looks for any pattern of `min_period..=max_period` characters
//! that repeats back-to-back at least `min_repeats` times and contains at
//! least one alphanumeric character (so table rules, leader dots and
//! whitespace runs never trigger).

use crate::error::Doc2MdError;
use serde::{Deserialize, Serialize};

/// Thresholds for degenerate-repetition detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPolicy {
    /// Shortest repeating pattern considered, in characters. Default: 3.
    pub min_period: usize,
    /// Longest repeating pattern considered, in characters. Default: 200.
    pub max_period: usize,
    /// Back-to-back repetitions needed to flag the text. Default: 10.
    pub min_repeats: usize,
}

impl Default for ContentPolicy {
    fn default() -> Self {
        Self {
            min_period: 3,
            max_period: 200,
            min_repeats: 10,
        }
    }
}

/// Outcome of screening one unit's text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentVerdict {
    Accepted,
    Degenerate {
        /// Character offset where the repetition starts.
        offset: usize,
        /// Length of the repeating pattern in characters.
        period: usize,
        /// Number of back-to-back repetitions.
        repeats: usize,
    },
}

impl ContentPolicy {
    pub fn validate(&self) -> Result<(), Doc2MdError> {
        if self.min_period == 0 || self.max_period < self.min_period {
            return Err(Doc2MdError::InvalidConfig(format!(
                "content policy periods must satisfy 1 ≤ min ≤ max, got {}..={}",
                self.min_period, self.max_period
            )));
        }
        if self.min_repeats < 2 {
            return Err(Doc2MdError::InvalidConfig(
                "content policy min_repeats must be ≥ 2".into(),
            ));
        }
        Ok(())
    }

    /// Find the first degenerate repetition, scanning short periods first.
    pub fn screen(&self, text: &str) -> ContentVerdict {
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        let longest = self.max_period.min(n / self.min_repeats.max(1));

        for period in self.min_period.max(1)..=longest {
            let needed = (period * self.min_repeats.saturating_sub(1)).max(1);
            let mut run = 0usize;
            // A periodic run only ever shows rotations of one pattern, so a
            // pattern without alphanumerics stays rejected until the run breaks.
            let mut rejected = false;
            for i in 0..n - period {
                if chars[i] == chars[i + period] {
                    run += 1;
                    if run >= needed && !rejected {
                        let offset = i + 1 - run;
                        let pattern = &chars[offset..offset + period];
                        if !pattern.iter().any(|c| c.is_alphanumeric()) {
                            rejected = true;
                        } else {
                            let mut end = i + 1;
                            while end + period < n && chars[end] == chars[end + period] {
                                end += 1;
                            }
                            return ContentVerdict::Degenerate {
                                offset,
                                period,
                                repeats: (end - offset) / period + 1,
                            };
                        }
                    }
                } else {
                    run = 0;
                    rejected = false;
                }
            }
        }
        ContentVerdict::Accepted
    }
}

/// The text recorded in place of a degenerate unit.
pub fn placeholder(source_number: usize, period: usize, repeats: usize) -> String {
    format!(
        "<!-- unit {source_number}: model output discarded \
         (a {period}-character pattern repeated {repeats} times) -->"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_prose_is_accepted() {
        let text = "The quick brown fox jumps over the lazy dog. \
                    Pack my box with five dozen liquor jugs.";
        assert_eq!(ContentPolicy::default().screen(text), ContentVerdict::Accepted);
    }

    #[test]
    fn looping_phrase_is_degenerate() {
        let text = format!("# Intro\n\n{}", "and then ".repeat(40));
        match ContentPolicy::default().screen(&text) {
            ContentVerdict::Degenerate { period, repeats, offset } => {
                assert_eq!(period, 9);
                assert!(repeats >= 39, "repeats = {repeats}");
                assert!(offset >= 9, "offset = {offset}");
            }
            other => panic!("expected degenerate, got {other:?}"),
        }
    }

    #[test]
    fn table_rules_and_leader_dots_are_ignored() {
        let rule = format!("|{}|", "---|".repeat(30));
        let toc = format!("Chapter 1 {} 5", ".".repeat(80));
        let policy = ContentPolicy::default();
        assert_eq!(policy.screen(&rule), ContentVerdict::Accepted);
        assert_eq!(policy.screen(&toc), ContentVerdict::Accepted);
    }

    #[test]
    fn below_threshold_is_accepted() {
        let text = "la ".repeat(5);
        assert_eq!(ContentPolicy::default().screen(&text), ContentVerdict::Accepted);
    }

    #[test]
    fn short_and_empty_text() {
        let policy = ContentPolicy::default();
        assert_eq!(policy.screen(""), ContentVerdict::Accepted);
        assert_eq!(policy.screen("ab"), ContentVerdict::Accepted);
    }

    #[test]
    fn validate_rejects_bad_thresholds() {
        let bad = ContentPolicy {
            min_period: 5,
            max_period: 2,
            min_repeats: 10,
        };
        assert!(bad.validate().is_err());
        let bad = ContentPolicy {
            min_repeats: 1,
            ..ContentPolicy::default()
        };
        assert!(bad.validate().is_err());
        assert!(ContentPolicy::default().validate().is_ok());
    }

    #[test]
    fn placeholder_is_an_html_comment() {
        let p = placeholder(4, 9, 40);
        assert!(p.starts_with("<!--") && p.ends_with("-->"));
        assert!(p.contains("unit 4"));
    }
}
