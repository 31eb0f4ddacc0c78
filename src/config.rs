use anyhow::{Context, Result};
use serde::Deserialize;
use std::{env, fs};

use crate::auth::UserId;

/// Environment variable that overrides `auth.user_id` from the config file.
pub const USER_ID_ENV: &str = "UUID";

#[derive(Deserialize)]
pub struct Config {
    pub listen: ListenConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Deserialize)]
pub struct ListenConfig {
    pub ip: String,
    pub port: u16,
    pub allowed_proxy_ips: Option<Vec<String>>,
    pub tls: Option<TlsConfig>,
}

#[derive(Default, Deserialize)]
pub struct AuthConfig {
    /// Hyphenated UUID clients must embed in their request header.
    pub user_id: Option<String>,
}

#[derive(Deserialize)]
pub struct TlsConfig {
    pub cert_file: String,
    pub key_file: String,
}

pub fn load_config() -> Result<Config> {
    let content = fs::read_to_string("config.toml").context("Failed to read config.toml file")?;
    toml::from_str(&content).context("Failed to parse config.toml as valid TOML")
}

/// Resolves the authorized user id: the `UUID` environment variable wins
/// over the config file. Startup fails if neither is set or the value is
/// not a valid UUID.
pub fn resolve_user_id(config: &Config) -> Result<UserId> {
    let raw = env::var(USER_ID_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .or_else(|| config.auth.user_id.clone())
        .context("No user id configured (set auth.user_id in config.toml or the UUID env var)")?;
    raw.parse()
        .with_context(|| format!("Invalid user id {raw:?}"))
}
