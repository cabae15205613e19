use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::net::SocketAddr;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "postgres" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(format!("expected postgres or memory, got {}", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub app_env: String,
    pub store_backend: StoreBackend,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_connect_timeout_seconds: u64,
    pub db_idle_timeout_seconds: u64,
    pub db_max_lifetime_seconds: u64,
    pub token_key: [u8; 32],
    pub token_ttl_hours: u64,
    pub upload_dir: String,
    pub max_file_size: u64,
    pub seed_demo_data: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "0.0.0.0:3000");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;

        let app_env = env_or("APP_ENV", "development");
        if app_env != "development" && app_env != "production" {
            return Err(anyhow!(
                "invalid APP_ENV: expected development or production, got {}",
                app_env
            ));
        }

        let store_backend: StoreBackend = env_or_parse("STORE_BACKEND", "postgres")?;
        let database_url = match store_backend {
            StoreBackend::Postgres => Some(env_or_err("DATABASE_URL")?),
            StoreBackend::Memory => std::env::var("DATABASE_URL").ok(),
        };

        Ok(Self {
            http_addr,
            app_env,
            store_backend,
            database_url,
            db_max_connections: env_or_parse("DB_MAX_CONNECTIONS", "25")?,
            db_connect_timeout_seconds: env_or_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            db_idle_timeout_seconds: env_or_parse("DB_IDLE_TIMEOUT_SECONDS", "300")?,
            db_max_lifetime_seconds: env_or_parse("DB_MAX_LIFETIME_SECONDS", "1800")?,
            token_key: env_key_32("TOKEN_KEY")?,
            token_ttl_hours: check_token_ttl(env_or_parse("TOKEN_TTL_HOURS", "168")?)?,
            upload_dir: env_or("UPLOAD_DIR", "uploads"),
            max_file_size: env_or_parse("MAX_FILE_SIZE", "10485760")?,
            seed_demo_data: env_or_parse("SEED_DEMO_DATA", "false")?,
        })
    }

    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }
}

/// One year.
const MAX_TOKEN_TTL_HOURS: u64 = 24 * 365;

fn check_token_ttl(hours: u64) -> Result<u64> {
    if !(1..=MAX_TOKEN_TTL_HOURS).contains(&hours) {
        return Err(anyhow!(
            "invalid TOKEN_TTL_HOURS: expected 1..={}, got {}",
            MAX_TOKEN_TTL_HOURS,
            hours
        ));
    }
    Ok(hours)
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_err(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}

fn env_key_32(key: &str) -> Result<[u8; 32]> {
    let value = env_or_err(key)?;
    decode_key_32(&value).map_err(|err| anyhow!("invalid {}: {}", key, err))
}

pub fn decode_key_32(value: &str) -> Result<[u8; 32]> {
    let decoded = STANDARD.decode(value.trim().as_bytes())?;
    if decoded.len() != 32 {
        return Err(anyhow!("expected 32 bytes, got {}", decoded.len()));
    }
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&decoded);
    Ok(key_bytes)
}
