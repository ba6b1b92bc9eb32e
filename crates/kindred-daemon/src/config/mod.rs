use std::{env, fs, path::Path, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        if let Ok(path) = env::var("KINDRED_CONFIG") {
            return Self::from_path(Path::new(&path));
        }

        let project_root = env::var("KINDRED_ROOT").unwrap_or_else(|_| ".".to_string());
        let default_path = Path::new(&project_root).join("config/kindred.toml");
        if default_path.exists() {
            return Self::from_path(&default_path);
        }

        let example_path = Path::new(&project_root).join("config/kindred.example.toml");
        if example_path.exists() {
            tracing::warn!("Using example configuration at {:?}", example_path);
            return Self::from_path(&example_path);
        }

        Ok(Self::default())
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_toml(&contents).with_context(|| format!("invalid config: {:?}", path))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "BridgeConfig::default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "BridgeConfig::default_max_clients")]
    pub max_clients: usize,
}

impl BridgeConfig {
    fn default_listen_addr() -> String {
        "127.0.0.1:7777".into()
    }
    fn default_max_clients() -> usize {
        4
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            listen_addr: Self::default_listen_addr(),
            max_clients: Self::default_max_clients(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_url")]
    pub url: String,
    #[serde(default = "StorageConfig::default_auth_token_env")]
    pub auth_token_env: String,
}

impl StorageConfig {
    fn default_url() -> String {
        "file:kindred.db".into()
    }
    fn default_auth_token_env() -> String {
        "TURSO_AUTH_TOKEN".into()
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            auth_token_env: Self::default_auth_token_env(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "LlmConfig::default_provider")]
    pub provider: LlmProvider,
    #[serde(default = "LlmConfig::default_model")]
    pub model: String,
}

impl LlmConfig {
    fn default_provider() -> LlmProvider {
        LlmProvider::LmStudio {
            endpoint: "http://127.0.0.1:1234".into(),
        }
    }
    fn default_model() -> String {
        "qwen2.5-7b-instruct".into()
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Self::default_provider(),
            model: Self::default_model(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum LlmProvider {
    #[serde(rename = "lmstudio")]
    LmStudio { endpoint: String },
    #[serde(rename = "openrouter")]
    OpenRouter {
        /// API key - can be literal or read from env var if api_key_env is set
        #[serde(default)]
        api_key: Option<String>,
        /// Environment variable name containing the API key
        #[serde(default)]
        api_key_env: Option<String>,
        #[serde(default)]
        site_url: Option<String>,
        #[serde(default)]
        site_name: Option<String>,
    },
}

impl LlmProvider {
    /// Get the OpenRouter API key, checking env var if specified
    pub fn openrouter_api_key(&self) -> Option<String> {
        match self {
            LlmProvider::OpenRouter {
                api_key,
                api_key_env,
                ..
            } => {
                if let Some(env_name) = api_key_env {
                    if let Ok(key) = env::var(env_name) {
                        return Some(key);
                    }
                }
                api_key.clone()
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "TtsConfig::default_provider")]
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "TtsConfig::default_model")]
    pub model: String,
    #[serde(default = "TtsConfig::default_voice")]
    pub default_voice: String,
}

impl TtsConfig {
    fn default_provider() -> String {
        "null".into()
    }
    fn default_model() -> String {
        "tts-1".into()
    }
    fn default_voice() -> String {
        "alloy".into()
    }

    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| env::var(name).ok())
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: Self::default_provider(),
            endpoint: None,
            api_key_env: None,
            model: Self::default_model(),
            default_voice: Self::default_voice(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpeechConfig {
    #[serde(default = "SpeechConfig::default_settle_delay_ms")]
    pub settle_delay_ms: u64,
}

impl SpeechConfig {
    fn default_settle_delay_ms() -> u64 {
        150
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: Self::default_settle_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VideoConfig {
    #[serde(default = "VideoConfig::default_provider")]
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub replica_id: Option<String>,
    #[serde(default = "VideoConfig::default_simulated_connect_ms")]
    pub simulated_connect_ms: u64,
}

impl VideoConfig {
    fn default_provider() -> String {
        "simulated".into()
    }
    fn default_simulated_connect_ms() -> u64 {
        2000
    }

    pub fn simulated_connect_delay(&self) -> Duration {
        Duration::from_millis(self.simulated_connect_ms)
    }

    pub fn api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|name| env::var(name).ok())
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            provider: Self::default_provider(),
            endpoint: None,
            api_key_env: None,
            replica_id: None,
            simulated_connect_ms: Self::default_simulated_connect_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Character card imported when the store has no active character yet.
    #[serde(default)]
    pub character_file: Option<PathBuf>,
    #[serde(default = "SessionConfig::default_history_window")]
    pub history_window: usize,
    #[serde(default = "SessionConfig::default_context_window")]
    pub context_window: usize,
}

impl SessionConfig {
    fn default_history_window() -> usize {
        6
    }
    fn default_context_window() -> usize {
        10
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            character_file: None,
            history_window: Self::default_history_window(),
            context_window: Self::default_context_window(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.bridge.listen_addr, "127.0.0.1:7777");
        assert_eq!(config.session.history_window, 6);
        assert_eq!(config.session.context_window, 10);
        assert_eq!(config.speech.settle_delay(), Duration::from_millis(150));
        assert_eq!(config.video.provider, "simulated");
        assert!(matches!(config.llm.provider, LlmProvider::LmStudio { .. }));
    }

    #[test]
    fn parses_openrouter_provider() {
        let config = AppConfig::from_toml(
            r#"
            [llm]
            model = "meta-llama/llama-3.1-8b-instruct"

            [llm.provider]
            type = "openrouter"
            api_key = "sk-literal"

            [video]
            provider = "hosted"
            simulated_connect_ms = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.llm.model, "meta-llama/llama-3.1-8b-instruct");
        assert_eq!(
            config.llm.provider.openrouter_api_key().as_deref(),
            Some("sk-literal")
        );
        assert_eq!(config.video.provider, "hosted");
        assert_eq!(
            config.video.simulated_connect_delay(),
            Duration::from_millis(10)
        );
    }
}
