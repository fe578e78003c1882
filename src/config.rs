use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{info, warn};

use crate::error::AppError;

pub const DEFAULT_ADMIN_PASSWORD: &str = "admin123";

/// Loads `config/common.env`, the profile file and `.secrets.env`, in that
/// order. Later files override earlier ones.
pub fn load_environment() -> Result<(), dotenvy::Error> {
    let is_production =
        dotenvy::var("APP_PROFILE").unwrap_or_else(|_| "development".to_string()) == "production";

    let env_files = if is_production {
        ["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        ["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), dotenvy::Error> {
    if !Path::new(path).exists() {
        warn!("Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub busy_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://afterschool.db".to_string(),
            max_connections: 10,
            busy_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminSecret {
    Hash(String),
    Plain(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub admin_secret: AdminSecret,
    pub session_ttl_hours: i64,
    pub session_sweep_interval_secs: u64,
    pub seed_catalog: bool,
    pub static_dir: PathBuf,
    pub cors_allowed_origin: String,
    pub dependent_items_path: Option<PathBuf>,
    pub enforce_registration_window: bool,
    pub port: Option<u16>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            admin_secret: AdminSecret::Plain(DEFAULT_ADMIN_PASSWORD.to_string()),
            session_ttl_hours: 12,
            session_sweep_interval_secs: 3600,
            seed_catalog: true,
            static_dir: PathBuf::from("static"),
            cors_allowed_origin: "*".to_string(),
            dependent_items_path: None,
            enforce_registration_window: false,
            port: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let defaults = Self::default();

        let admin_secret = match (var("ADMIN_PASSWORD_HASH"), var("ADMIN_PASSWORD")) {
            (Some(hash), _) => AdminSecret::Hash(hash),
            (None, Some(password)) => AdminSecret::Plain(password),
            (None, None) => {
                warn!("ADMIN_PASSWORD not set, falling back to the default admin password");
                defaults.admin_secret
            }
        };

        Ok(Self {
            database: DatabaseConfig {
                url: var("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: parsed("DATABASE_MAX_CONNECTIONS")?
                    .unwrap_or(defaults.database.max_connections),
                busy_timeout_secs: parsed("DATABASE_BUSY_TIMEOUT_SECS")?
                    .unwrap_or(defaults.database.busy_timeout_secs),
            },
            admin_secret,
            session_ttl_hours: parsed("ADMIN_SESSION_TTL_HOURS")?
                .unwrap_or(defaults.session_ttl_hours),
            session_sweep_interval_secs: parsed("SESSION_SWEEP_INTERVAL_SECS")?
                .unwrap_or(defaults.session_sweep_interval_secs),
            seed_catalog: flag("SEED_CATALOG")?.unwrap_or(defaults.seed_catalog),
            static_dir: var("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.static_dir),
            cors_allowed_origin: var("CORS_ALLOWED_ORIGIN")
                .unwrap_or(defaults.cors_allowed_origin),
            dependent_items_path: var("DEPENDENT_ITEMS_PATH").map(PathBuf::from),
            enforce_registration_window: flag("ENFORCE_REGISTRATION_WINDOW")?
                .unwrap_or(defaults.enforce_registration_window),
            port: parsed("PORT")?,
        })
    }
}

// Unset and blank are the same thing.
fn var(key: &str) -> Option<String> {
    dotenvy::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T>(key: &str) -> Result<Option<T>, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    var(key)
        .map(|raw| {
            raw.parse::<T>().map_err(|e| {
                AppError::Internal(format!("Invalid value '{}' for {}: {}", raw, key, e))
            })
        })
        .transpose()
}

fn flag(key: &str) -> Result<Option<bool>, AppError> {
    var(key)
        .map(|raw| match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(AppError::Internal(format!(
                "Invalid value '{}' for {}: expected a boolean",
                raw, key
            ))),
        })
        .transpose()
}
