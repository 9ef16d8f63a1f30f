//! Service configuration.
//!
//! Everything is read once at startup and passed down explicitly; optional
//! delivery channels surface as `None` rather than as lazily-initialized
//! globals.

use chrono_tz::Tz;

use crate::notify::email::EmailConfig;
use crate::notify::push::WebPushConfig;
use crate::{Error, Result};

/// Top-level service configuration, assembled from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite database URL shared with the surrounding product.
    pub database_url: String,
    /// Authoritative time zone for "today"/"tomorrow" and dedup day keys.
    pub timezone: Tz,
    /// Public base URL used for email call-to-action links.
    pub base_url: String,
    /// Web push channel configuration; `None` means the channel is disabled.
    pub push: Option<WebPushConfig>,
    /// Email channel configuration; `None` means the channel is disabled.
    pub email: Option<EmailConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:tasktide.db?mode=rwc".to_string());

        let timezone = match std::env::var("REMINDER_TIMEZONE") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse::<Tz>()
                .map_err(|_| Error::config(format!("Unknown REMINDER_TIMEZONE: {}", raw)))?,
            _ => Tz::UTC,
        };

        let base_url = std::env::var("APP_BASE_URL")
            .ok()
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "http://localhost:3000".to_string());

        Ok(Self {
            database_url,
            timezone,
            base_url,
            push: WebPushConfig::from_env()?,
            email: EmailConfig::from_env()?,
        })
    }
}
