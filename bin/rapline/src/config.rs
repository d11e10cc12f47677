//! Process settings, read from the environment (and `.env`, loaded in main).

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Result};
use rl_core::models::DATABASE_NAME;

pub struct Settings {
    pub bind_addr: String,
    pub database_url: String,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: u64,
    pub store_timeout: Duration,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let default_db = format!("sqlite://{DATABASE_NAME}.sqlite3");
        Ok(Self {
            bind_addr: load("BIND_ADDR", "127.0.0.1:8080")?,
            database_url: load("DATABASE_URL", &default_db)?,
            upload_dir: load("UPLOAD_DIR", "./uploads")?,
            max_upload_bytes: load("MAX_UPLOAD_BYTES", "26214400")?,
            store_timeout: Duration::from_secs(load("STORE_TIMEOUT_SECS", "5")?),
        })
    }
}

fn load<T: FromStr>(key: &str, default: &str) -> Result<T>
where
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| {
        log::info!("{key} not set, using default: {default}");
        default.to_string()
    });
    raw.parse()
        .map_err(|e| anyhow!("invalid {key} value {raw:?}: {e}"))
}
