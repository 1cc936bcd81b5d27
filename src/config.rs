//! Configuration types for the dialogue orchestrator.

use crate::error::{DialogueError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Placeholder model name shipped in sample `.env` files.
const PLACEHOLDER_MODEL: &str = "Your-Model-Name-Here";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ColloquyConfig {
    /// Completion backend settings.
    pub llm: LlmConfig,
    /// Context and turn-taking behaviour.
    pub conversation: ConversationConfig,
    /// Utterance capture limits.
    pub listen: ListenConfig,
    /// WebSocket gateway settings.
    pub gateway: GatewayConfig,
}

/// OpenAI-compatible backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL, with or without the trailing `/v1`.
    pub api_url: String,
    /// Model identifier sent in every request.
    pub api_model: String,
    /// Bearer token. Empty means no `Authorization` header.
    pub api_key: String,
    /// Maximum tokens to generate per reply.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Whole-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:1234/v1".to_owned(),
            api_model: "local-model".to_owned(),
            api_key: String::new(),
            max_tokens: 150,
            temperature: 0.7,
            request_timeout_secs: 120,
        }
    }
}

impl LlmConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Conversation behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// Retained user/assistant pairs. History holds at most `2 * max_turns` turns.
    pub max_turns: usize,
    /// Instruction folded into the first rendered user turn.
    pub system_prompt: String,
    /// Re-enter listening automatically after each reply.
    pub continuous: bool,
    /// Spoken when the backend fails. Never stored in history.
    pub fallback_message: String,
    /// Spoken once when a console session starts. Never stored.
    pub greeting: Option<String>,
    /// Whole-utterance phrases that clear history.
    pub reset_phrases: Vec<String>,
    /// Spoken after a reset phrase.
    pub reset_confirmation: String,
    /// Whole-utterance phrases that end the session.
    pub exit_phrases: Vec<String>,
    /// Spoken before an exit phrase ends the session.
    pub farewell: String,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_turns: 20,
            system_prompt:
                "You are a helpful voice assistant. Keep responses brief (1-2 sentences)."
                    .to_owned(),
            continuous: true,
            fallback_message: "Sorry, I ran into a problem contacting the language model."
                .to_owned(),
            greeting: Some("Hello! How can I help you today?".to_owned()),
            reset_phrases: vec![
                "clear history".to_owned(),
                "reset conversation".to_owned(),
                "start over".to_owned(),
                "new conversation".to_owned(),
            ],
            reset_confirmation: "Conversation history cleared. Let's start fresh.".to_owned(),
            exit_phrases: vec![
                "quit".to_owned(),
                "exit".to_owned(),
                "bye".to_owned(),
                "goodbye".to_owned(),
            ],
            farewell: "Bye bye!".to_owned(),
        }
    }
}

/// Utterance capture limits handed to the transcript source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Seconds to wait for speech to begin. `None` waits indefinitely.
    pub timeout_secs: Option<u64>,
    /// Maximum length of a single utterance in seconds.
    pub max_utterance_secs: u64,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Some(8),
            max_utterance_secs: 15,
        }
    }
}

impl ListenConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn max_utterance(&self) -> Duration {
        Duration::from_secs(self.max_utterance_secs)
    }
}

/// WebSocket gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8765,
        }
    }
}

impl GatewayConfig {
    /// `host:port` suitable for `TcpListener::bind`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl ColloquyConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| DialogueError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| DialogueError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/colloquy/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("colloquy").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("colloquy")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/colloquy-config/config.toml")
        }
    }

    /// Apply backend overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply backend overrides using `lookup` to read variables.
    ///
    /// For each setting the first non-empty variable wins:
    /// - URL: `COLLOQUY_API_URL`, `LMSTUDIO_URL`, `BASE_URL`
    /// - model: `COLLOQUY_MODEL`, `LMSTUDIO_MODEL`, `MODEL_NAME`
    /// - key: `COLLOQUY_API_KEY`, `API_KEY`
    pub fn apply_env_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| lookup(*k))
                .map(|v| v.trim().to_owned())
                .find(|v| !v.is_empty())
        };

        if let Some(url) = first(&["COLLOQUY_API_URL", "LMSTUDIO_URL", "BASE_URL"]) {
            self.llm.api_url = strip_endpoint_path(&url);
        }
        if let Some(model) = first(&["COLLOQUY_MODEL", "LMSTUDIO_MODEL", "MODEL_NAME"]) {
            self.llm.api_model = model;
        }
        if let Some(key) = first(&["COLLOQUY_API_KEY", "API_KEY"]) {
            self.llm.api_key = key;
        }
    }

    /// Reject configurations that cannot produce a working session.
    ///
    /// # Errors
    ///
    /// Returns [`DialogueError::Config`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let model = self.llm.api_model.trim();
        if model.is_empty() {
            return Err(DialogueError::Config("llm.api_model is empty".to_owned()));
        }
        if model.contains(PLACEHOLDER_MODEL) {
            return Err(DialogueError::Config(format!(
                "llm.api_model is still the placeholder `{model}`; set the model your server has loaded"
            )));
        }
        if self.llm.api_url.trim().is_empty() {
            return Err(DialogueError::Config("llm.api_url is empty".to_owned()));
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(DialogueError::Config(
                "llm.request_timeout_secs must be greater than zero".to_owned(),
            ));
        }
        if self.conversation.max_turns == 0 {
            return Err(DialogueError::Config(
                "conversation.max_turns must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Reduce a full endpoint URL to its base (`.../v1/chat/completions` → `.../v1`).
fn strip_endpoint_path(url: &str) -> String {
    let url = url.trim_end_matches('/');
    url.strip_suffix("/chat/completions")
        .unwrap_or(url)
        .to_owned()
}
