//! Configuration for the photo triage application.
//!
//! Values are loaded from `config.json` in the user config directory and
//! fall back to built-in defaults, so the app runs without any setup against
//! a local Ollama instance.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ai: AiConfig,
    pub audio: AudioConfig,
    pub dirs: DirConfig,
}

/// AI backend settings: endpoint, models, prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// Whether the text-cleanup and vision toggles start enabled.
    pub enabled_by_default: bool,
    /// Ollama generate endpoint.
    pub api_url: String,
    pub vision_model: String,
    pub text_model: String,
    /// Request timeout in seconds.
    pub api_timeout_secs: u64,
    /// Static prompt sent with every vision request.
    pub vision_prompt: String,
    /// `{text_input}`-parameterized template for the tag-cleanup request.
    pub text_prompt_template: String,
    /// Preamble phrases the model emits despite instructions; the first
    /// case-insensitive match is stripped from the head of a response.
    pub preamble_phrases: Vec<String>,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled_by_default: true,
            api_url: "http://localhost:11434/api/generate".to_string(),
            vision_model: "llava:7b".to_string(),
            text_model: "llama3.1:8b".to_string(),
            api_timeout_secs: 15,
            vision_prompt: concat!(
                "Your sole task is to analyze the provided image and generate a concise, ",
                "comma-separated list of 3 to 5 descriptive keywords. ",
                "Focus on the main subjects, setting, and any notable actions or attributes. ",
                "Do not add any introductory text, explanations, or any text other than the keywords themselves. ",
                "For example, if you see a picture of a dog on a beach, your output should be: ",
                "dog, beach, sunny, playing, water",
            )
            .to_string(),
            text_prompt_template: concat!(
                "Convert this text into a comma-separated list of keywords. ",
                "Output ONLY the keywords with commas between them. ",
                "Do NOT include ANY other text. ",
                "Do NOT say 'Here are the keywords' or any similar phrase. ",
                "Do NOT add explanations or introductions. ",
                "ONLY output the keywords themselves.\n\n",
                "Example Input: 'I think this is a picture of my friend Mason and his dog, ",
                "a golden retriever, playing at the park on a sunny day.'\n",
                "Example Output: mason, dog, golden retriever, park, sunny day, playing\n\n",
                "Input Text: '{text_input}'\n",
                "Keywords:",
            )
            .to_string(),
            preamble_phrases: [
                "Here are the keywords:",
                "Here are the keywords",
                "Keywords:",
                "The keywords are:",
                "Tags:",
                "Here you go:",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// Microphone capture and transcription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Seconds of silence after speech that end a phrase.
    pub pause_threshold_secs: f32,
    /// Hard cap on a single capture, in seconds.
    pub phrase_time_limit_secs: f32,
    /// RMS level below which a chunk counts as silence.
    pub silence_rms: f32,
    /// OpenAI-compatible transcription endpoint.
    pub transcribe_url: String,
    pub transcribe_model: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            pause_threshold_secs: 2.0,
            phrase_time_limit_secs: 12.0,
            silence_rms: 0.015,
            transcribe_url: "http://localhost:8000/v1/audio/transcriptions".to_string(),
            transcribe_model: "whisper-1".to_string(),
        }
    }
}

/// Names of the output locations created under the session folder on commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirConfig {
    pub kept_dir_name: String,
    pub deleted_dir_name: String,
    pub log_filename: String,
}

impl Default for DirConfig {
    fn default() -> Self {
        Self {
            kept_dir_name: "sorted_kept".to_string(),
            deleted_dir_name: "sorted_deleted".to_string(),
            log_filename: "photo_log.json".to_string(),
        }
    }
}

impl Config {
    /// Path of the on-disk config file.
    ///
    /// - Linux: ~/.config/photo-triage/config.json
    /// - macOS: ~/Library/Application Support/photo-triage/config.json
    /// - Windows: %APPDATA%\photo-triage\config.json
    pub fn path() -> Option<PathBuf> {
        let mut path = dirs::config_dir()?;
        path.push("photo-triage");
        path.push("config.json");
        Some(path)
    }

    /// Load the config file, falling back to defaults when it is missing or
    /// unreadable. A malformed file is logged and ignored rather than
    /// aborting startup.
    pub fn load() -> Self {
        let Some(path) = Self::path() else {
            return Self::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str(&text) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded configuration");
                    config
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Malformed config file, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}
