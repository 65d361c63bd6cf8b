use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub admin: AdminConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_instance_id")]
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Period between timestamp messages on each connection
    #[serde(default = "default_feed_interval_ms")]
    pub interval_ms: u64,
    /// Frames buffered per connection before a write counts as failed
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Expose /api/stats, /api/send and /api/prune
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_port() -> u16 {
    8080
}

fn default_instance_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_feed_interval_ms() -> u64 {
    3000
}

fn default_channel_capacity() -> usize {
    64
}

fn default_prune_interval_secs() -> u64 {
    60
}

fn default_max_age_secs() -> u64 {
    sse_hub::DEFAULT_MAX_AGE.as_secs()
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            instance_id: default_instance_id(),
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_feed_interval_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            prune_interval_secs: default_prune_interval_secs(),
            max_age_secs: default_max_age_secs(),
        }
    }
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
        }
    }
}

impl FeedConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl RegistryConfig {
    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_yaml(&content)?
        } else {
            Self::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Environment variables take precedence over the file
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(ms) = var("FEED_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.feed.interval_ms = ms;
        }
        if let Some(secs) = var("MAX_CONNECTION_AGE_SECS").and_then(|v| v.parse().ok()) {
            self.registry.max_age_secs = secs;
        }
        if let Some(secs) = var("PRUNE_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.registry.prune_interval_secs = secs;
        }
        if let Some(enabled) = var("ENABLE_ADMIN") {
            self.admin.enabled = enabled != "0" && enabled != "false";
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.feed.interval_ms == 0 {
            anyhow::bail!("feed.interval_ms must be greater than zero");
        }
        if self.registry.prune_interval_secs == 0 {
            anyhow::bail!("registry.prune_interval_secs must be greater than zero");
        }
        if self.feed.channel_capacity == 0 {
            anyhow::bail!("feed.channel_capacity must be greater than zero");
        }
        Ok(())
    }
}
