use std::{fs, net::SocketAddr, path::Path, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use chatlog_provider::{ProviderConfig, ProviderType};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

/// Written by `chatlog start` when no config file exists yet.
pub const SKELETON_CONFIG: &str = r#"server:
  addr: 127.0.0.1:3000

database:
  path: data/chatlog.db

provider:
  type: openai
  api_key: ${OPENAI_API_KEY}
  # base_url: https://api.openai.com/v1
  timeout_secs: 60

chat:
  model: gpt-4o
  system_prompt: You are a helpful AI assistant.
  record_failures: false
"#;

fn default_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_db_path() -> String {
    "data/chatlog.db".to_string()
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Relative paths resolve against the config root
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl DatabaseConfig {
    pub fn resolve(&self, root: &Path) -> PathBuf {
        let path = PathBuf::from(&self.path);
        if path.is_absolute() {
            path
        } else {
            root.join(path)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Append a SYSTEM_ERROR event when the provider call fails
    #[serde(default)]
    pub record_failures: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            system_prompt: default_system_prompt(),
            max_tokens: None,
            record_failures: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatlogConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

pub fn load_config(path: &Path) -> Result<ChatlogConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    parse_config(&content).with_context(|| format!("invalid config file: {}", path.display()))
}

pub fn parse_config(content: &str) -> Result<ChatlogConfig> {
    let mut config: ChatlogConfig =
        serde_yaml::from_str(content).context("failed to parse yaml")?;
    resolve_config_env(&mut config);
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &ChatlogConfig) -> Result<()> {
    config
        .server
        .addr
        .parse::<SocketAddr>()
        .map_err(|e| anyhow!("invalid server.addr '{}': {e}", config.server.addr))?;

    if config.database.path.trim().is_empty() {
        return Err(anyhow!("database.path must not be empty"));
    }

    if config.chat.model.trim().is_empty() {
        return Err(anyhow!("chat.model must not be empty"));
    }

    if config.provider.provider_type == ProviderType::OpenAI
        && config
            .provider
            .api_key
            .as_deref()
            .map_or(true, |k| k.trim().is_empty())
    {
        return Err(anyhow!("provider.api_key is required for the openai provider"));
    }

    Ok(())
}

/// Write the skeleton config if none exists. Returns true when a file was created.
pub fn ensure_config(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config dir: {}", parent.display()))?;
    }
    fs::write(path, SKELETON_CONFIG)
        .with_context(|| format!("failed to write config file: {}", path.display()))?;
    Ok(true)
}

fn resolve_config_env(config: &mut ChatlogConfig) {
    config.server.addr = resolve_env_var(&config.server.addr);
    config.database.path = resolve_env_var(&config.database.path);

    if let Some(key) = &mut config.provider.api_key {
        *key = resolve_env_var(key);
    }
    if let Some(base_url) = &mut config.provider.base_url {
        *base_url = resolve_env_var(base_url);
    }

    config.chat.model = resolve_env_var(&config.chat.model);
}
