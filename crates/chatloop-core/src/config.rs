//! Configuration management for Chatloop
//!
//! Handles loading and saving the TOML configuration: the model endpoint,
//! orchestrator limits, and the MCP servers whose tools are registered.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::orchestrator::OrchestratorConfig;
use crate::provider::DEFAULT_OLLAMA_URL;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model endpoint settings
    #[serde(default)]
    pub model: ModelConfig,
    /// Tool-calling loop limits
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    /// Register the built-in calculation tools locally
    #[serde(default)]
    pub builtin_tools: bool,
    /// MCP servers keyed by name
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

impl Config {
    /// MCP servers that should be started, sorted by name
    pub fn enabled_mcp_servers(&self) -> Vec<(&str, &McpServerConfig)> {
        let mut servers: Vec<_> = self
            .mcp_servers
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(name, c)| (name.as_str(), c))
            .collect();
        servers.sort_by_key(|(name, _)| *name);
        servers
    }
}

/// Model endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Provider type; only "ollama" speaks to a real endpoint
    pub provider: String,
    /// Model to use
    pub model: String,
    /// Base URL for the API; falls back to `OLLAMA_HOST`, then localhost
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "llama3.1".to_string(),
            base_url: None,
            temperature: None,
        }
    }
}

impl ModelConfig {
    /// Base URL after applying the environment fallback
    pub fn effective_base_url(&self) -> String {
        if let Some(url) = &self.base_url {
            return url.clone();
        }
        match std::env::var("OLLAMA_HOST") {
            Ok(host) if !host.trim().is_empty() => normalize_host(host.trim()),
            _ => DEFAULT_OLLAMA_URL.to_string(),
        }
    }
}

/// `OLLAMA_HOST` is often given without a scheme
fn normalize_host(host: &str) -> String {
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

/// Orchestrator limits as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    /// Consecutive tool-call rounds allowed per query
    pub max_rounds: usize,
    /// Seconds to wait for one model response
    pub model_timeout_secs: u64,
    /// Seconds to wait for one tool invocation
    pub tool_timeout_secs: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            max_rounds: defaults.max_rounds,
            model_timeout_secs: defaults.model_timeout.as_secs(),
            tool_timeout_secs: defaults.tool_timeout.as_secs(),
        }
    }
}

impl OrchestratorSettings {
    pub fn to_orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_rounds: self.max_rounds,
            model_timeout: Duration::from_secs(self.model_timeout_secs),
            tool_timeout: Duration::from_secs(self.tool_timeout_secs),
        }
    }
}

/// MCP server launched as a subprocess speaking JSON-RPC over stdio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Executable to run
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Register tools as `mcp__{server}__{tool}` instead of the bare name
    #[serde(default)]
    pub prefix_tools: bool,
}

fn default_true() -> bool {
    true
}

impl McpServerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            enabled: true,
            prefix_tools: false,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_prefix_tools(mut self, prefix: bool) -> Self {
        self.prefix_tools = prefix;
        self
    }
}

/// Loads and saves the configuration file
pub struct ConfigManager {
    config_path: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Create a new config manager with default path
    pub fn new() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::with_path(config_path)
    }

    /// Create a config manager with a specific path; a missing file yields defaults
    pub fn with_path(config_path: PathBuf) -> Result<Self> {
        let config = if config_path.exists() {
            Self::load_from_path(&config_path)?
        } else {
            Config::default()
        };

        Ok(Self { config_path, config })
    }

    /// Get the default config path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Could not find config directory".to_string()))?;

        Ok(config_dir.join("chatloop").join("config.toml"))
    }

    fn load_from_path(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        toml::from_str(&content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Get the current configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get mutable access to configuration
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Serialize the current configuration
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(&self.config)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))
    }

    /// Save the current configuration to disk
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config dir: {}", e)))?;
        }

        let content = self.to_toml()?;
        std::fs::write(&self.config_path, content)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }
}
