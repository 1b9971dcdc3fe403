use std::net::SocketAddr;
use std::path::PathBuf;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;

/// Application-level constants
pub const APP_NAME: &str = "RetinaScope";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_BIND: &str = "127.0.0.1:5000";
pub const DEFAULT_TOKEN_TTL_HOURS: i64 = 24;
/// One year. Larger values overflow token expiry arithmetic.
pub const MAX_TOKEN_TTL_HOURS: i64 = 8760;
pub const DEFAULT_PYTHON: &str = "python3";

/// Get the application data directory
/// ~/RetinaScope/ on all platforms, falling back to the working directory
/// when no home directory is known.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default SQLite database file.
pub fn default_db_path() -> PathBuf {
    app_data_dir().join("retinascope.db")
}

/// Default location of the training scripts.
pub fn default_scripts_dir() -> PathBuf {
    app_data_dir().join("scripts")
}

/// Log filter used when neither `RUST_LOG` nor `RETINASCOPE_LOG` is set.
pub fn default_log_filter() -> &'static str {
    "retinascope=info,tower_http=info"
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("{0} and {1} must be set together")]
    Incomplete(&'static str, &'static str),
}

/// Admin account created at startup when absent.
#[derive(Clone)]
pub struct SeedAdmin {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for SeedAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedAdmin").field("email", &self.email).finish_non_exhaustive()
    }
}

/// Server settings, read from `RETINASCOPE_*` environment variables.
#[derive(Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    /// `false` when the secret was generated for this process only.
    pub jwt_secret_configured: bool,
    pub token_ttl_hours: i64,
    pub scripts_dir: PathBuf,
    pub python: PathBuf,
    pub log_filter: String,
    pub seed_admin: Option<SeedAdmin>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind", &self.bind)
            .field("db_path", &self.db_path)
            .field("jwt_secret_configured", &self.jwt_secret_configured)
            .field("token_ttl_hours", &self.token_ttl_hours)
            .field("scripts_dir", &self.scripts_dir)
            .field("python", &self.python)
            .field("log_filter", &self.log_filter)
            .field("seed_admin", &self.seed_admin)
            .finish()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind_raw = get("RETINASCOPE_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind = bind_raw.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            key: "RETINASCOPE_BIND",
            value: bind_raw.clone(),
            reason: e.to_string(),
        })?;

        let token_ttl_hours = match get("RETINASCOPE_TOKEN_TTL_HOURS") {
            None => DEFAULT_TOKEN_TTL_HOURS,
            Some(raw) => match raw.parse::<i64>() {
                Ok(hours) if (1..=MAX_TOKEN_TTL_HOURS).contains(&hours) => hours,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "RETINASCOPE_TOKEN_TTL_HOURS",
                        value: raw,
                        reason: format!("expected between 1 and {MAX_TOKEN_TTL_HOURS} hours"),
                    })
                }
            },
        };

        let (jwt_secret, jwt_secret_configured) = match get("RETINASCOPE_JWT_SECRET") {
            Some(secret) if secret.len() < 16 => {
                return Err(ConfigError::Invalid {
                    key: "RETINASCOPE_JWT_SECRET",
                    value: "<redacted>".into(),
                    reason: "must be at least 16 characters".into(),
                })
            }
            Some(secret) => (secret, true),
            None => (generate_secret(), false),
        };

        let seed_admin = match (
            get("RETINASCOPE_SEED_ADMIN_EMAIL"),
            get("RETINASCOPE_SEED_ADMIN_PASSWORD"),
        ) {
            (Some(email), Some(password)) => Some(SeedAdmin { email, password }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Incomplete(
                    "RETINASCOPE_SEED_ADMIN_EMAIL",
                    "RETINASCOPE_SEED_ADMIN_PASSWORD",
                ))
            }
        };

        Ok(Self {
            bind,
            db_path: get("RETINASCOPE_DB_PATH").map_or_else(default_db_path, PathBuf::from),
            jwt_secret,
            jwt_secret_configured,
            token_ttl_hours,
            scripts_dir: get("RETINASCOPE_SCRIPTS_DIR").map_or_else(default_scripts_dir, PathBuf::from),
            python: PathBuf::from(get("RETINASCOPE_PYTHON").unwrap_or_else(|| DEFAULT_PYTHON.to_string())),
            log_filter: get("RETINASCOPE_LOG").unwrap_or_else(|| default_log_filter().to_string()),
            seed_admin,
        })
    }
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
