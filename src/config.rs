use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudioConfig {
    // LLM configuration (OpenAI-compatible: Ollama, LM Studio, vLLM, OpenAI, etc.)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    // Optional cheaper-model override for the trait extraction side channel
    #[serde(default)]
    pub extraction_model: Option<String>,

    // Server
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    // Database for interviews, traits, and generated outputs
    #[serde(default = "default_database_path")]
    pub database_path: String,

    // Interview defaults
    #[serde(default = "default_interviewer")]
    pub default_interviewer: String,
    #[serde(default = "default_mode")]
    pub default_mode: String,
}

fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_llm_model() -> String {
    "llama3.2".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

fn default_bind_addr() -> String {
    "127.0.0.1:8460".to_string()
}

fn default_database_path() -> String {
    "limn_studio.db".to_string()
}

fn default_interviewer() -> String {
    "aya".to_string()
}

fn default_mode() -> String {
    "first_meeting".to_string()
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            llm_timeout_secs: default_llm_timeout_secs(),
            extraction_model: None,
            bind_addr: default_bind_addr(),
            database_path: default_database_path(),
            default_interviewer: default_interviewer(),
            default_mode: default_mode(),
        }
    }
}

impl StudioConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("limn_config.toml")
    }

    /// Load config from limn_config.toml next to the executable
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<StudioConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config;
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    /// Save config to file (next to executable)
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();

        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = env::var("LLM_API_URL") {
            config.llm_api_url = url;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            config.llm_model = model;
        }

        if let Ok(key) = env::var("LLM_API_KEY") {
            config.llm_api_key = Some(key);
        }

        if let Ok(timeout) = env::var("LIMN_LLM_TIMEOUT_SECS") {
            if let Ok(seconds) = timeout.parse() {
                config.llm_timeout_secs = seconds;
            }
        }

        if let Ok(model) = env::var("LIMN_EXTRACTION_MODEL") {
            if !model.trim().is_empty() {
                config.extraction_model = Some(model);
            }
        }

        if let Ok(addr) = env::var("LIMN_BACKEND_BIND") {
            config.bind_addr = addr;
        }

        if let Ok(path) = env::var("LIMN_DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = path;
            }
        }

        if let Ok(id) = env::var("LIMN_DEFAULT_INTERVIEWER") {
            if !id.trim().is_empty() {
                config.default_interviewer = id;
            }
        }

        if let Ok(mode) = env::var("LIMN_DEFAULT_MODE") {
            if !mode.trim().is_empty() {
                config.default_mode = mode;
            }
        }

        config
    }
}
