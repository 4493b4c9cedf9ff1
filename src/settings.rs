use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub checkin_base_url: Url,
    pub debug: bool,
    pub auth_token: String,
    pub enable_swagger: bool,
    pub port: u16,
    pub catalog_path: Option<String>,
    /// Minutes before an occurrence's start after which cancellation is
    /// rejected. Zero means cancellable up to the start itself.
    pub cancellation_cutoff_min: u32,
    /// How many weeks ahead occurrences may be listed and booked.
    pub booking_horizon_weeks: u8,
    pub lock_wait_ms: u64,
    pub reconcile_interval_secs: u64,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let config = Config::builder()
            // Load from environment variables with APP_ prefix
            .add_source(Environment::with_prefix("APP").separator("_"))
            .set_default("checkin_base_url", "http://localhost:8091")?
            .set_default("debug", false)?
            .set_default("auth_token", "default-token-change-me")?
            .set_default("enable_swagger", true)?
            .set_default("port", 8080)?
            .set_default("cancellation_cutoff_min", 0)?
            .set_default("booking_horizon_weeks", 6)?
            .set_default("lock_wait_ms", 2000)?
            .set_default("reconcile_interval_secs", 300)?
            .build()?;

        config.try_deserialize()
    }
}
