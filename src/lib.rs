pub mod analytics;
pub mod api;
pub mod authorization;
pub mod broadcast;
pub mod config;
pub mod core_state;
pub mod crypto;
pub mod db;
pub mod models;
pub mod training;

use std::sync::Arc;

use chrono::Utc;
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, SeedAdmin, ServerConfig};
use crate::core_state::{CoreError, CoreState};
use crate::models::enums::Role;
use crate::models::NewUser;

/// Startup failures. Anything after the listener is bound is logged instead.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Cannot create data directory {path}: {source}")]
    DataDir {
        path: String,
        source: std::io::Error,
    },
    #[error("State initialization failed: {0}")]
    Core(#[from] CoreError),
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the server until Ctrl-C.
pub async fn run() -> Result<(), RunError> {
    let config = ServerConfig::from_env()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .init();

    tracing::info!(config = ?config, "{} starting v{}", config::APP_NAME, config::APP_VERSION);
    if !config.jwt_secret_configured {
        tracing::warn!(
            "RETINASCOPE_JWT_SECRET is not set; tokens will not survive a restart"
        );
    }

    if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| RunError::DataDir {
            path: parent.display().to_string(),
            source,
        })?;
    }

    let core = Arc::new(CoreState::new(&config)?);
    if let Some(admin) = &config.seed_admin {
        seed_admin(&core, admin)?;
    }

    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    tracing::info!(addr = %listener.local_addr()?, "Listening");

    api::serve(listener, core, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Cannot listen for Ctrl-C");
        }
        tracing::info!("Shutdown requested");
    })
    .await?;

    tracing::info!("{} stopped", config::APP_NAME);
    Ok(())
}

/// Create the configured admin account unless that email is already taken.
fn seed_admin(core: &CoreState, admin: &SeedAdmin) -> Result<(), CoreError> {
    let conn = core.open_db()?;
    if db::get_user_by_email(&conn, &admin.email)?.is_some() {
        tracing::debug!(email = %admin.email, "Seed admin already present");
        return Ok(());
    }
    let user = db::insert_user(
        &conn,
        &NewUser {
            name: "Administrator".into(),
            email: admin.email.clone(),
            password_hash: crypto::hash_password(&admin.password),
            role: Role::Admin,
            specialty: None,
            department: None,
        },
        Utc::now(),
    )?;
    tracing::info!(user_id = %user.id, email = %user.email, "Seed admin created");
    Ok(())
}
