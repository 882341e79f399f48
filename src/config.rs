//! Environment-driven configuration. Every option has a logged default;
//! only the cache tier is required to be reachable at startup. Archive
//! credentials are optional; without them archival is disabled.

use std::{env, fmt::Display, str::FromStr, time::Duration};

use tracing::{info, warn};

const MIN_BROADCAST_INTERVAL_MS: u64 = 200;
const MAX_BROADCAST_INTERVAL_MS: u64 = 2000;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub base_url: String,
    pub cors_allowed_origins: String,
    pub broadcast_interval_ms: u64,
    pub chat_max_messages: i64,
    pub chat_max_length: usize,
    pub name_max_length: usize,
    pub session_ttl_hours: u64,
    pub post_reveal_ttl_hours: u64,
    pub archive_url: Option<String>,
    pub archive_token: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        let mut config = Self {
            port: try_load("RUST_PORT", "8080"),
            redis_url: try_load("REDIS_URL", "redis://127.0.0.1:6379"),
            base_url: try_load("BASE_URL", "https://revealtogether.com"),
            cors_allowed_origins: try_load("CORS_ALLOWED_ORIGINS", "*"),
            broadcast_interval_ms: try_load("BROADCAST_INTERVAL_MS", "500"),
            chat_max_messages: try_load("CHAT_MAX_MESSAGES", "500"),
            chat_max_length: try_load("CHAT_MAX_LENGTH", "280"),
            name_max_length: try_load("NAME_MAX_LENGTH", "50"),
            session_ttl_hours: try_load("SESSION_TTL_HOURS", "24"),
            post_reveal_ttl_hours: try_load("POST_REVEAL_TTL_HOURS", "1"),
            archive_url: env::var("ARCHIVE_URL").ok(),
            archive_token: env::var("ARCHIVE_TOKEN").ok(),
        };

        let clamped = config
            .broadcast_interval_ms
            .clamp(MIN_BROADCAST_INTERVAL_MS, MAX_BROADCAST_INTERVAL_MS);
        if clamped != config.broadcast_interval_ms {
            warn!(
                "BROADCAST_INTERVAL_MS {} outside {MIN_BROADCAST_INTERVAL_MS}..={MAX_BROADCAST_INTERVAL_MS}, using {clamped}",
                config.broadcast_interval_ms
            );
            config.broadcast_interval_ms = clamped;
        }

        config
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_hours * 3600)
    }

    pub fn post_reveal_ttl(&self) -> Duration {
        Duration::from_secs(self.post_reveal_ttl_hours * 3600)
    }

    pub fn allowed_origins(&self) -> Vec<String> {
        self.cors_allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        warn!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}
