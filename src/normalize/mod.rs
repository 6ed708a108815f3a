//! Text normalizer
//!
//! First hop of the pipeline: strips decorative glyphs and emoji, collapses
//! repeated punctuation/whitespace and expands trading abbreviations on word
//! boundaries. Deterministic and pure - same input, same output, no I/O.

use regex::Regex;
use std::collections::HashMap;

pub struct Normalizer {
    abbreviations: HashMap<String, String>,
    word_re: Regex,
    repeat_punct_re: Regex,
    whitespace_re: Regex,
}

impl Normalizer {
    pub fn new(abbreviations: HashMap<String, String>) -> Self {
        // Uppercase keys once so lookup is case-insensitive
        let abbreviations = abbreviations
            .into_iter()
            .map(|(k, v)| (k.to_uppercase(), v))
            .collect();
        Self {
            abbreviations,
            word_re: Regex::new(r"[A-Za-z]+").expect("static regex"),
            // The regex crate has no backreferences, so spell out a run of
            // each punctuation character instead of `([...])\1+`
            repeat_punct_re: Regex::new(
                r"!{2,}|\?{2,}|\.{2,}|,{2,}|;{2,}|:{2,}|\*{2,}|#{2,}|~{2,}|_{2,}|={2,}|\+{2,}|-{2,}",
            )
            .expect("static regex"),
            whitespace_re: Regex::new(r"\s+").expect("static regex"),
        }
    }

    /// Normalize raw alert text. Never fails; empty input yields "".
    pub fn normalize(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }

        // Keep printable ASCII only; emoji and decorative glyphs become spaces
        // so glued tokens still split
        let ascii: String = text
            .chars()
            .map(|c| {
                if c.is_ascii() && (!c.is_ascii_control() || c == '\n' || c == '\t') {
                    c
                } else {
                    ' '
                }
            })
            .collect();

        // "BUY!!!" -> "BUY!", "...." -> "."
        let collapsed = self
            .repeat_punct_re
            .replace_all(&ascii, |caps: &regex::Captures| caps[0][..1].to_string());

        // Word-boundary abbreviation expansion; the word regex can never
        // start inside a number, so prices are untouched
        let expanded = self.word_re.replace_all(&collapsed, |caps: &regex::Captures| {
            let word = &caps[0];
            match self.abbreviations.get(&word.to_uppercase()) {
                Some(expansion) => expansion.clone(),
                None => word.to_string(),
            }
        });

        self.whitespace_re
            .replace_all(&expanded, " ")
            .trim()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_abbreviations;

    fn normalizer() -> Normalizer {
        Normalizer::new(default_abbreviations())
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(normalizer().normalize(""), "");
    }

    #[test]
    fn test_strips_emoji_and_decoration() {
        let out = normalizer().normalize("🚀🚀 BUY EURUSD 🔥 @ 1.0850 ✅");
        assert_eq!(out, "BUY EURUSD @ 1.0850");
    }

    #[test]
    fn test_collapses_repeated_punctuation_and_whitespace() {
        let out = normalizer().normalize("SELL    GBPUSD!!!   now....");
        assert_eq!(out, "SELL GBPUSD! now.");
    }

    #[test]
    fn test_expands_abbreviations_on_word_boundary() {
        let out = normalizer().normalize("BUY EURUSD SL 1.0800 TP 1.0900");
        assert_eq!(out, "BUY EURUSD STOP LOSS 1.0800 TAKE PROFIT 1.0900");
    }

    #[test]
    fn test_abbreviation_is_case_insensitive() {
        let out = normalizer().normalize("sl 2345 tp 2330");
        assert_eq!(out, "STOP LOSS 2345 TAKE PROFIT 2330");
    }

    #[test]
    fn test_numbers_never_corrupted() {
        // "SL" must not match inside a longer token or a number
        let out = normalizer().normalize("TSLA 250.50 SLOW move");
        assert_eq!(out, "TSLA 250.50 SLOW move");
    }

    #[test]
    fn test_deterministic() {
        let n = normalizer();
        let input = "⚡BUY  GOLD   @ 2340!!! SL 2330";
        assert_eq!(n.normalize(input), n.normalize(input));
    }
}
