use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use config::{Config, Environment, File};
use serde::Deserialize;

const DEV_TOKEN_KEY: &str = "dev-only-symmetric-key-change-me!";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub token_symmetric_key: String,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub reservation_max_attempts: u32,
    pub environment: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8080".into(),
            database_url: "sqlite://./data/cinema.db".into(),
            token_symmetric_key: DEV_TOKEN_KEY.into(),
            access_token_ttl_seconds: 900,
            refresh_token_ttl_seconds: 86_400,
            reservation_max_attempts: 3,
            environment: "development".into(),
        }
    }
}

impl Settings {
    pub fn uses_dev_token_key(&self) -> bool {
        self.token_symmetric_key == DEV_TOKEN_KEY
    }
}

/// Defaults, then `server.toml` if present, then `APP__*` environment
/// variables. `DATABASE_URL` and `SERVER_BIND` are honoured when the
/// corresponding `APP__` variable is unset.
pub fn load_settings() -> anyhow::Result<Settings> {
    assemble_settings(Path::new("server.toml"), None)
}

/// `vars` replaces the process environment when given.
fn assemble_settings(
    file: &Path,
    vars: Option<HashMap<String, String>>,
) -> anyhow::Result<Settings> {
    let defaults = Settings::default();
    let fallback = |name: &str| match &vars {
        Some(vars) => vars.get(name).cloned(),
        None => std::env::var(name).ok(),
    };

    let builder = Config::builder()
        .set_default(
            "server_bind",
            fallback("SERVER_BIND").unwrap_or(defaults.server_bind),
        )?
        .set_default(
            "database_url",
            fallback("DATABASE_URL").unwrap_or(defaults.database_url),
        )?
        .set_default("token_symmetric_key", defaults.token_symmetric_key)?
        .set_default("access_token_ttl_seconds", defaults.access_token_ttl_seconds)?
        .set_default("refresh_token_ttl_seconds", defaults.refresh_token_ttl_seconds)?
        .set_default(
            "reservation_max_attempts",
            i64::from(defaults.reservation_max_attempts),
        )?
        .set_default("environment", defaults.environment)?
        .add_source(File::from(file).required(false))
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .source(vars.clone()),
        );

    builder
        .build()
        .context("failed to assemble settings")?
        .try_deserialize()
        .context("invalid settings")
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        return format!("sqlite://{}", path.replace('\\', "/"));
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(parent) = sqlite_path(database_url)
        .as_deref()
        .and_then(Path::parent)
        .map(Path::to_path_buf)
    else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(&parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    let path = database_url
        .strip_prefix("sqlite://")?
        .split('?')
        .next()
        .unwrap_or_default();
    (!path.is_empty()).then(|| PathBuf::from(path))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
