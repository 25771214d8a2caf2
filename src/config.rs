use std::{env, fmt::Display, str::FromStr};

use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub api_url: String,
    pub app_id: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub redis_url: String,
    pub static_dir: String,
    pub host: String,
    pub port: u16,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub email_from_name: String,
    pub reminder_window_days: i64,
    pub cors_origin: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let app_id = env::var("BASE44_APP_ID").map_err(|_| ConfigError::Missing("BASE44_APP_ID"))?;
        let backend = BackendConfig {
            api_url: env::var("BASE44_API_URL").unwrap_or_else(|_| "https://base44.app".into()),
            app_id,
        };

        Ok(Self {
            backend,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into()),
            static_dir: env::var("STATIC_DIR").unwrap_or_else(|_| "dist".into()),
            host: env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: parse_or("APP_PORT", 8080),
            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".into()),
            ffprobe_path: env::var("FFPROBE_PATH").unwrap_or_else(|_| "ffprobe".into()),
            email_from_name: env::var("EMAIL_FROM_NAME")
                .unwrap_or_else(|_| "Pet Decoder AI".into()),
            reminder_window_days: parse_or("REMINDER_WINDOW_DAYS", 7),
            cors_origin: env::var("CORS_ORIGIN").ok().filter(|s| !s.is_empty()),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: FromStr + Display + Copy,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value '{raw}': {e}, using default {default}");
            default
        }),
        Err(_) => {
            info!("{key} not set, using default: {default}");
            default
        }
    }
}
