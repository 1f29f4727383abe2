//! ralphd configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main ralphd configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Correction loop settings
    pub ralph: RalphConfig,

    /// Execution state and activity log locations
    pub state: StateConfig,

    /// Spec directory layout
    pub spec: SpecConfig,

    /// Warm execution host
    pub gateway: GatewayConfig,

    /// Text-generation collaborator for corrections
    pub llm: LlmConfig,

    /// Completion callbacks
    pub hooks: HooksConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .ralphd.yml
        let local_config = PathBuf::from(".ralphd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/ralphd/ralphd.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("ralphd").join("ralphd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialised
    ///
    /// Errors are swallowed: the full `load` reports them once logging is up.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates: Vec<PathBuf> = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from(".ralphd.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("ralphd").join("ralphd.yml"));
                }
                paths
            }
        };

        candidates
            .iter()
            .filter(|p| p.exists())
            .find_map(|p| Self::load_from_file(p).ok())
            .and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Correction loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RalphConfig {
    /// Correction cycles per task before it is blocked
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Hard timeout for each validation command in milliseconds
    #[serde(rename = "command-timeout-ms")]
    pub command_timeout_ms: u64,
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            command_timeout_ms: 120_000,
        }
    }
}

/// Execution state locations, relative to the spec directory unless absolute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub dir: PathBuf,

    #[serde(rename = "state-file")]
    pub state_file: String,

    #[serde(rename = "activity-log")]
    pub activity_log: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".ralphd"),
            state_file: "state.json".to_string(),
            activity_log: "activity.jsonl".to_string(),
        }
    }
}

impl StateConfig {
    /// State directory for a given spec directory
    pub fn resolve_dir(&self, spec_dir: &Path) -> PathBuf {
        if self.dir.is_absolute() {
            self.dir.clone()
        } else {
            spec_dir.join(&self.dir)
        }
    }
}

/// Spec directory layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpecConfig {
    /// Task list file inside the spec directory
    #[serde(rename = "tasks-file")]
    pub tasks_file: String,
}

impl Default for SpecConfig {
    fn default() -> Self {
        Self {
            tasks_file: "tasks.yml".to_string(),
        }
    }
}

/// Warm execution host settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Route commands through a running gateway when healthy
    pub enabled: bool,

    pub host: String,

    #[serde(rename = "preferred-port")]
    pub preferred_port: u16,

    /// How many consecutive ports to try when the preferred one is busy
    #[serde(rename = "port-attempts")]
    pub port_attempts: u16,

    /// Health check timeout in milliseconds
    #[serde(rename = "health-timeout-ms")]
    pub health_timeout_ms: u64,

    /// Slack on top of the command timeout for a Run round trip
    #[serde(rename = "request-timeout-ms")]
    pub request_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            preferred_port: 47821,
            port_attempts: 10,
            health_timeout_ms: 500,
            request_timeout_ms: 5_000,
        }
    }
}

impl GatewayConfig {
    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn request_slack(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Consult the model between the rule-based and fallback generators
    pub enabled: bool,

    /// Provider name (currently only "anthropic" supported)
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 4096,
            timeout_ms: 120_000,
        }
    }
}

impl LlmConfig {
    /// Check the API key variable is set; only meaningful when enabled
    pub fn validate(&self) -> Result<()> {
        if std::env::var(&self.api_key_env).is_err() {
            return Err(eyre::eyre!(
                "LLM API key not found. Set the {} environment variable.",
                self.api_key_env
            ));
        }
        Ok(())
    }
}

/// Completion callbacks
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    /// Shell command run after every `run`
    #[serde(rename = "on-complete")]
    pub on_complete: Option<String>,
}
