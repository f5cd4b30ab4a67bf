// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::backend::generation::DEFAULT_SYSTEM_PROMPT;
use crate::infra::errors::SparrowError;
use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub rag: RagConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// OpenAI-compatible endpoint of the local model server.
    pub base_url: String,
    /// Loaded model id, e.g. "OpenVINO/Qwen3-8B-int4-ov".
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/v3".into(),
            model: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub system_prompt: String,
    pub include_history: bool,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub max_completion_tokens: Option<u32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            include_history: true,
            temperature: None,
            top_p: None,
            seed: None,
            max_tokens: None,
            max_completion_tokens: None,
        }
    }
}

/// Heuristic timing knobs for the token stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Identical tokens closer together than this are treated as redelivery.
    pub dedup_window_ms: u64,
    /// Pause between tearing down a subscription and opening the next one.
    pub resubscribe_grace_ms: u64,
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: 100,
            resubscribe_grace_ms: 100,
            channel_capacity: 1024,
        }
    }
}

impl StreamConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }

    pub fn resubscribe_grace(&self) -> Duration {
        Duration::from_millis(self.resubscribe_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub enabled: bool,
    pub limit: u32,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            limit: 5,
        }
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> Result<Self, SparrowError> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, SparrowError> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| SparrowError::Config(format!("{}: {e}", path.display())))
    }
}
