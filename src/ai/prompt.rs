//! Prompt construction and response scrubbing for the tag pipeline.

use crate::config::AiConfig;

/// Build the tag-cleanup prompt by embedding the raw text (from dictation or
/// the vision stage) into the configured template.
pub fn build_cleanup_prompt(config: &AiConfig, raw_text: &str) -> String {
    config.text_prompt_template.replace("{text_input}", raw_text)
}

/// Scrub a model response down to the bare keyword list.
///
/// Models sometimes ignore the "keywords only" instruction and prefix a
/// phrase like "Here are the keywords:". One pass strips the first matching
/// phrase (case-insensitive, head of the string only), then leading/trailing
/// colons, commas and whitespace, then embedded double quotes.
///
/// Only a single phrase is ever stripped; a doubled-up preamble keeps its
/// second layer.
pub fn strip_preamble(raw: &str, phrases: &[String]) -> String {
    let mut text = raw.trim().to_string();

    let lowered = text.to_lowercase();
    for phrase in phrases {
        if lowered.starts_with(&phrase.to_lowercase()) {
            text = text[phrase.len()..].trim().to_string();
            break;
        }
    }

    text.trim_matches(|c: char| c == ':' || c == ',' || c.is_whitespace())
        .replace('"', "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AiConfig;

    fn phrases() -> Vec<String> {
        AiConfig::default().preamble_phrases
    }

    #[test]
    fn test_cleanup_prompt_embeds_input() {
        let config = AiConfig::default();
        let prompt = build_cleanup_prompt(&config, "a dog at the beach");
        assert!(prompt.contains("a dog at the beach"));
        assert!(!prompt.contains("{text_input}"));
    }

    #[test]
    fn test_cleanup_prompt_handles_empty_input() {
        let config = AiConfig::default();
        let prompt = build_cleanup_prompt(&config, "");
        assert!(prompt.contains("Input Text: ''"));
    }

    #[test]
    fn test_strip_known_preamble() {
        assert_eq!(strip_preamble("Keywords: dog, cat", &phrases()), "dog, cat");
    }

    #[test]
    fn test_strip_is_noop_without_preamble() {
        assert_eq!(strip_preamble("dog, cat", &phrases()), "dog, cat");
    }

    #[test]
    fn test_strip_matches_case_insensitively() {
        assert_eq!(
            strip_preamble("here are the keywords: dog, beach", &phrases()),
            "dog, beach"
        );
    }

    #[test]
    fn test_strip_only_first_match_single_pass() {
        // One layer removed, the inner one survives
        assert_eq!(
            strip_preamble("Here are the keywords: Keywords: dog", &phrases()),
            "Keywords: dog"
        );
    }

    #[test]
    fn test_strip_trims_punctuation_and_quotes() {
        assert_eq!(
            strip_preamble("Tags: \"dog\", \"cat\",", &phrases()),
            "dog, cat"
        );
        assert_eq!(strip_preamble(" : dog : ", &phrases()), "dog");
    }

    #[test]
    fn test_strip_empty_response() {
        assert_eq!(strip_preamble("", &phrases()), "");
        assert_eq!(strip_preamble("Keywords:", &phrases()), "");
    }
}
