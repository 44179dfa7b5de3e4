//! Configuration resolution for erg-verify
//!
//! Oracle API key priority: Database → `ERG_ORACLE_API_KEY` → TOML.
//! A missing key is not fatal; oracle calls then degrade to human review.

use erg_common::config::TomlConfig;
use erg_common::Result;
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::services::vision_oracle::{
    OracleSettings, DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_REQUESTS_PER_MINUTE,
    DEFAULT_TIMEOUT_SECS,
};

/// Environment variable holding the oracle API key
pub const ORACLE_API_KEY_ENV: &str = "ERG_ORACLE_API_KEY";

/// Resolve the oracle API key from the three configuration tiers
pub async fn resolve_oracle_api_key(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> Result<Option<String>> {
    let db_key = crate::db::settings::get_oracle_api_key(db)
        .await?
        .filter(|k| is_valid_key(k));
    let env_key = std::env::var(ORACLE_API_KEY_ENV)
        .ok()
        .filter(|k| is_valid_key(k));
    let toml_key = toml_config
        .oracle
        .api_key
        .clone()
        .filter(|k| is_valid_key(k));

    let sources: Vec<&str> = [
        ("database", db_key.is_some()),
        ("environment", env_key.is_some()),
        ("TOML", toml_key.is_some()),
    ]
    .into_iter()
    .filter_map(|(name, present)| present.then_some(name))
    .collect();

    if sources.len() > 1 {
        warn!(
            "Oracle API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    if let Some(key) = db_key {
        info!("Oracle API key loaded from database");
        return Ok(Some(key));
    }
    if let Some(key) = env_key {
        info!("Oracle API key loaded from environment variable");
        return Ok(Some(key));
    }
    if let Some(key) = toml_key {
        info!("Oracle API key loaded from TOML config");
        return Ok(Some(key));
    }

    warn!(
        "Oracle API key not configured; every submission will go to human review. \
         Set it via POST /api/settings/oracle_api_key, {} or [oracle] api_key in config.toml",
        ORACLE_API_KEY_ENV
    );
    Ok(None)
}

/// Full oracle client settings: resolved key plus TOML overrides
pub async fn resolve_oracle_settings(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> Result<OracleSettings> {
    let oracle = &toml_config.oracle;

    Ok(OracleSettings {
        api_key: resolve_oracle_api_key(db, toml_config).await?,
        base_url: oracle
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        model: oracle.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        timeout: Duration::from_secs(oracle.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS).max(1)),
        requests_per_minute: oracle
            .requests_per_minute
            .unwrap_or(DEFAULT_REQUESTS_PER_MINUTE),
    })
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Where a key set through the API is mirrored
///
/// The existing config file if there is one, else the user config dir.
pub fn toml_sync_path() -> PathBuf {
    erg_common::config::find_config_file().unwrap_or_else(|| {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ergtally")
            .join("config.toml")
    })
}

/// Mirror the oracle API key into the TOML config
///
/// Best effort: the database copy is authoritative, so failures only warn.
pub fn sync_oracle_key_to_toml(key: &str, toml_path: &Path) {
    let mut config = if toml_path.exists() {
        match erg_common::config::load_toml_config(toml_path) {
            Ok(config) => config,
            Err(e) => {
                warn!("TOML sync skipped, existing file unreadable: {}", e);
                return;
            }
        }
    } else {
        TomlConfig::default()
    };

    config.oracle.api_key = Some(key.to_string());

    match erg_common::config::write_toml_config(&config, toml_path) {
        Ok(()) => info!("Oracle API key synced to TOML: {}", toml_path.display()),
        Err(e) => warn!("TOML write failed (database write succeeded): {}", e),
    }
}
