use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default = "default_links_config")]
    pub links: LinksConfig,
    #[serde(default = "default_audit_config")]
    pub audit: AuditConfig,
    #[serde(default = "default_health_config")]
    pub health: HealthConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    /// One token per bot instance; every listed bot polls independently.
    pub bot_tokens: Vec<String>,
    /// The only user id allowed to arm or cancel a broadcast.
    pub owner_id: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LinksConfig {
    #[serde(default = "default_channel_url")]
    pub channel_url: String,
    #[serde(default = "default_group_url")]
    pub group_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuditConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HealthConfig {
    #[serde(default = "default_health_port")]
    pub port: u16,
}

fn default_channel_url() -> String {
    "https://t.me/example".to_string()
}

fn default_group_url() -> String {
    "https://t.me/example_group".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("botdata.db")
}

fn default_health_port() -> u16 {
    10000
}

fn default_links_config() -> LinksConfig {
    LinksConfig {
        channel_url: default_channel_url(),
        group_url: default_group_url(),
    }
}

fn default_audit_config() -> AuditConfig {
    AuditConfig {
        database_path: default_db_path(),
    }
}

fn default_health_config() -> HealthConfig {
    HealthConfig {
        port: default_health_port(),
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).context("Failed to parse config file")?;

        config.telegram.bot_tokens = config
            .telegram
            .bot_tokens
            .iter()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .collect();

        if config.telegram.bot_tokens.is_empty() {
            bail!("[telegram] bot_tokens must contain at least one non-empty token");
        }

        reqwest::Url::parse(&config.links.channel_url)
            .with_context(|| format!("Invalid channel_url: {}", config.links.channel_url))?;
        reqwest::Url::parse(&config.links.group_url)
            .with_context(|| format!("Invalid group_url: {}", config.links.group_url))?;

        Ok(config)
    }
}
