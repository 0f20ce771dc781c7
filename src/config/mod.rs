use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::net::SocketAddr;
use std::str::FromStr;

/// Which backends the process wires up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppMode {
    /// Postgres, Redis and S3.
    Api,
    /// In-memory repository and object store, no external services.
    Standalone,
}

impl FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "api" => Ok(Self::Api),
            "standalone" => Ok(Self::Standalone),
            other => Err(anyhow!("unknown APP_MODE: {}", other)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub app_mode: AppMode,
    pub database_url: Option<String>,
    pub migrations_dir: Option<String>,
    pub redis_url: String,
    pub s3_endpoint: String,
    pub s3_public_endpoint: Option<String>,
    pub s3_region: String,
    pub s3_bucket: String,
    pub db_max_connections: u32,
    pub db_connect_timeout_seconds: u64,
    pub db_idle_timeout_seconds: u64,
    pub db_max_lifetime_seconds: u64,
    pub paseto_access_key: [u8; 32],
    pub access_ttl_minutes: u64,
    pub image_max_bytes: u64,
    pub video_max_bytes: u64,
    pub stories_feed_cache_ttl_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "0.0.0.0:8080");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;
        let app_mode: AppMode = env_or("APP_MODE", "api").parse()?;

        let (database_url, s3_endpoint, s3_bucket) = match app_mode {
            AppMode::Api => (
                Some(env_or_err("DATABASE_URL")?),
                env_or_err("S3_ENDPOINT")?,
                env_or_err("S3_BUCKET")?,
            ),
            AppMode::Standalone => (
                std::env::var("DATABASE_URL").ok(),
                env_or("S3_ENDPOINT", "http://localhost:8080/media"),
                env_or("S3_BUCKET", "stories"),
            ),
        };

        let image_max_bytes: u64 = env_or_parse("IMAGE_MAX_BYTES", "10485760")?;
        let video_max_bytes: u64 = env_or_parse("VIDEO_MAX_BYTES", "52428800")?;
        if image_max_bytes == 0 || video_max_bytes == 0 {
            return Err(anyhow!("IMAGE_MAX_BYTES and VIDEO_MAX_BYTES must be greater than 0"));
        }

        Ok(Self {
            http_addr,
            app_mode,
            database_url,
            migrations_dir: std::env::var("MIGRATIONS_DIR").ok(),
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1/"),
            s3_endpoint,
            s3_public_endpoint: std::env::var("S3_PUBLIC_ENDPOINT").ok(),
            s3_region: env_or("S3_REGION", "fr-par"),
            s3_bucket,
            db_max_connections: env_or_parse("DB_MAX_CONNECTIONS", "25")?,
            db_connect_timeout_seconds: env_or_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            db_idle_timeout_seconds: env_or_parse("DB_IDLE_TIMEOUT_SECONDS", "300")?,
            db_max_lifetime_seconds: env_or_parse("DB_MAX_LIFETIME_SECONDS", "1800")?,
            paseto_access_key: env_key_32("PASETO_ACCESS_KEY")?,
            access_ttl_minutes: env_or_parse("ACCESS_TTL_MINUTES", "15")?,
            image_max_bytes,
            video_max_bytes,
            stories_feed_cache_ttl_seconds: env_or_parse("STORIES_FEED_CACHE_TTL_SECONDS", "60")?,
        })
    }
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
    decode_key_32(key, &value)
}

fn decode_key_32(key: &str, value: &str) -> Result<[u8; 32]> {
    let decoded = STANDARD
        .decode(value.as_bytes())
        .map_err(|err| anyhow!("invalid {}: {}", key, err))?;
    if decoded.len() != 32 {
        return Err(anyhow!("invalid {}: expected 32 bytes", key));
    }
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&decoded);
    Ok(key_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_must_decode_to_32_bytes() {
        let key = decode_key_32("K", "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=").unwrap();
        assert_eq!(&key, b"0123456789abcdef0123456789abcdef");

        let err = decode_key_32("K", "c2hvcnQ=").unwrap_err();
        assert_eq!(err.to_string(), "invalid K: expected 32 bytes");
    }

    #[test]
    fn app_mode_parses_known_values() {
        assert_eq!("api".parse::<AppMode>().unwrap(), AppMode::Api);
        assert_eq!("standalone".parse::<AppMode>().unwrap(), AppMode::Standalone);
        assert!("worker".parse::<AppMode>().is_err());
    }
}
