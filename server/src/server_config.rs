use config::{Config, ConfigError};
use lazy_static::lazy_static;
use serde::Deserialize;
use std::{env, path::Path, result::Result, time::Duration};
use uuid::Uuid;

use crate::state::{
    ingestion::merge_rules::IdentityPolicy,
    task_pool::{Backpressure, PoolSettings},
};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub default_lookback_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub endpoint: String,
    pub temperature: f64,
    #[serde(default)]
    pub strict_schema: bool,
    pub max_body_chars: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptLimits {
    pub rate_limit_per_sec: usize,
    pub refill_interval_ms: usize,
    pub refill_amount: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub key: String,
    pub prompt_limits: PromptLimits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmailSettings {
    pub page_size: u32,
    pub quota_per_second: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl HttpSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolsConfig {
    pub fetch: PoolSettings,
    pub extract: PoolSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub identity_fields: IdentityPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    pub cron: String,
    pub lookback_days: i64,
}

/// A mailbox the scheduler ingests for. The access token itself is read from
/// the named environment variable at connect time.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub user_id: Uuid,
    pub token_env: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub settings: Settings,
    pub model: ModelConfig,
    pub api: ApiConfig,
    pub gmail: GmailSettings,
    pub http: HttpSettings,
    pub pools: PoolsConfig,
    pub merge: MergeConfig,
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
}

impl ServerConfig {
    pub fn from_dir(root: &str) -> Result<Self, ConfigError> {
        let path = format!("{root}/config.toml");
        let mut server_config: ServerConfig = Config::builder()
            .add_source(config::File::with_name(&path))
            .add_source(config::Environment::with_prefix("APPLYTRACK").separator("__"))
            .build()?
            .try_deserialize()?;

        if let Ok(key) = env::var("LLM_API_KEY") {
            if !key.trim().is_empty() {
                server_config.api.key = key;
            }
        }

        Ok(server_config)
    }
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Server Config:\n{:?}\n\nModel: {} @ {}\n\nGmail: {:?}\n\nHttp: {:?}\n\nPools:\n  fetch {}\n  extract {}\n\nMerge: {:?}\n\nSchedule: {:?}\n\nAccounts:\n{}",
            self.settings,
            self.model.id,
            self.model.endpoint,
            self.gmail,
            self.http,
            self.pools.fetch,
            self.pools.extract,
            self.merge,
            self.schedule,
            self.accounts
                .iter()
                .map(|a| format!("{} -> ${}", a.user_id, a.token_env))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}

impl std::fmt::Display for PoolSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let strategy = match self.backpressure {
            Backpressure::BlockUntilCapacity => "block_until_capacity",
            Backpressure::RunInline => "run_inline",
            Backpressure::DropAndCount => "drop_and_count",
        };
        write!(
            f,
            "workers={} queue_depth={} backpressure={}",
            self.workers, self.queue_depth, strategy
        )
    }
}

pub fn config_root() -> String {
    env::var("APP_DIR").unwrap_or_else(|_| {
        let dir = env::var("CARGO_MANIFEST_DIR").unwrap_or_else(|_| ".".to_string());
        let parent = Path::new(&dir)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or(dir);
        format!("{}/config", parent)
    })
}

lazy_static! {
    pub static ref cfg: ServerConfig =
        ServerConfig::from_dir(&config_root()).expect("config.toml is required and must be valid");
}
