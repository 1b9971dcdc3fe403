//! Process-wide application state.
//!
//! Created once at startup and shared via `Arc` by every route handler,
//! the WebSocket tasks, and the training runner. Request handlers never
//! share a database connection: each one opens its own through
//! [`CoreState::open_db`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Duration;

use crate::broadcast::{Audience, ConnectionRegistry, WsOutgoing};
use crate::config::ServerConfig;
use crate::crypto::JwtSigner;
use crate::db;
use crate::training::{RunnerSettings, TrainingManager};

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    /// SQLite database file.
    db_path: PathBuf,
    /// Token issuer/verifier.
    jwt: JwtSigner,
    /// Open WebSocket connections.
    registry: Arc<RwLock<ConnectionRegistry>>,
    /// The single model-training run.
    training: TrainingManager,
}

impl CoreState {
    /// Build state from configuration. Runs migrations once so request
    /// handlers can open connections without checking the schema.
    pub fn new(config: &ServerConfig) -> Result<Self, CoreError> {
        let conn = db::open_database(&config.db_path)?;
        drop(conn);

        let registry = Arc::new(RwLock::new(ConnectionRegistry::new()));
        Ok(Self {
            db_path: config.db_path.clone(),
            jwt: JwtSigner::new(
                config.jwt_secret.as_bytes().to_vec(),
                Duration::hours(config.token_ttl_hours),
            ),
            training: TrainingManager::new(
                RunnerSettings {
                    python: config.python.clone(),
                    scripts_dir: config.scripts_dir.clone(),
                },
                registry.clone(),
            ),
            registry,
        })
    }

    /// Open a fresh connection to the application database.
    pub fn open_db(&self) -> Result<rusqlite::Connection, CoreError> {
        Ok(db::open_database(&self.db_path)?)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn jwt(&self) -> &JwtSigner {
        &self.jwt
    }

    pub fn training(&self) -> &TrainingManager {
        &self.training
    }

    // ── Connection registry ─────────────────────────────────

    pub fn read_registry(&self) -> Result<RwLockReadGuard<'_, ConnectionRegistry>, CoreError> {
        self.registry.read().map_err(|_| CoreError::LockPoisoned)
    }

    pub fn write_registry(&self) -> Result<RwLockWriteGuard<'_, ConnectionRegistry>, CoreError> {
        self.registry.write().map_err(|_| CoreError::LockPoisoned)
    }

    /// Fan an event out to connected clients. Failures are logged, never
    /// returned: a mutation that already committed stays successful.
    pub fn broadcast(&self, msg: WsOutgoing, audience: Audience) {
        match self.read_registry() {
            Ok(registry) => {
                let delivered = registry.broadcast(&msg, audience);
                tracing::debug!(delivered, "Broadcast sent");
            }
            Err(e) => tracing::error!(error = %e, "Broadcast skipped"),
        }
    }

    /// Close every WebSocket. Called on shutdown.
    pub fn shutdown(&self) {
        match self.write_registry() {
            Ok(mut registry) => {
                let closed = registry.close_all();
                tracing::info!(closed, "WebSocket connections closed");
            }
            Err(e) => tracing::error!(error = %e, "Could not close WebSocket connections"),
        }
        if self.training.stop().is_ok() {
            tracing::info!("Stopped running training process");
        }
    }
}

#[cfg(test)]
impl CoreState {
    /// State backed by a temporary on-disk database.
    pub(crate) fn for_tests(dir: &Path) -> Self {
        let config = ServerConfig::from_lookup(|key| match key {
            "RETINASCOPE_DB_PATH" => Some(dir.join("test.db").to_string_lossy().into_owned()),
            "RETINASCOPE_JWT_SECRET" => Some("test-secret-0123456789".into()),
            "RETINASCOPE_SCRIPTS_DIR" => Some(dir.to_string_lossy().into_owned()),
            _ => None,
        })
        .unwrap();
        Self::new(&config).unwrap()
    }
}

// ═══════════════════════════════════════════════════════════
// Error type
// ═══════════════════════════════════════════════════════════

/// Errors from CoreState operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Internal lock error")]
    LockPoisoned,
    #[error("Database error: {0}")]
    Database(#[from] db::DatabaseError),
}
