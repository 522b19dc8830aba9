use anyhow::Result;
use config::{Config, ConfigError, Environment, File, Map};
use serde::{Deserialize, Serialize};
use std::env;

pub const API_KEY_VAR: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub llm: LLMConfig,
    pub memory: MemoryConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    pub endpoint: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Number of most recent turns sent upstream with each message
    pub history_window: usize,
    /// Upper bound on turns kept per user, 0 disables the cap
    pub max_stored_turns: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm: LLMConfig {
                endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
                model: "gpt-4o-mini".to_string(),
                max_tokens: 500,
                temperature: 0.3,
                timeout_secs: 30,
            },
            memory: MemoryConfig {
                history_window: 10,
                max_stored_turns: 0,
            },
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config_env = env::var("CONFIG_ENV").unwrap_or_else(|_| "default".to_string());
        Self::load(&format!("config/{}", config_env), None)
    }

    /// Layer defaults, the optional `config_file` and `APP_*` variables.
    /// `vars` replaces the process environment when given.
    pub fn load(config_file: &str, vars: Option<Map<String, String>>) -> Result<Self, ConfigError> {
        let defaults = Settings::default();

        let config = Config::builder()
            .set_default("llm.endpoint", defaults.llm.endpoint)?
            .set_default("llm.model", defaults.llm.model)?
            .set_default("llm.max_tokens", defaults.llm.max_tokens as u64)?
            .set_default("llm.temperature", defaults.llm.temperature as f64)?
            .set_default("llm.timeout_secs", defaults.llm.timeout_secs)?
            .set_default("memory.history_window", defaults.memory.history_window as u64)?
            .set_default("memory.max_stored_turns", defaults.memory.max_stored_turns as u64)?
            .set_default("server.host", defaults.server.host)?
            .set_default("server.port", defaults.server.port as u64)?
            .set_default("logging.level", defaults.logging.level)?
            .add_source(File::with_name(config_file).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(vars),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Read the provider credential. Startup must abort when this fails.
    pub fn api_key() -> Result<String> {
        match env::var(API_KEY_VAR) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(anyhow::anyhow!("{} environment variable not set", API_KEY_VAR)),
        }
    }
}
