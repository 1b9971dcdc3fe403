//! Realtime fan-out to connected dashboards.
//!
//! Route handlers push an event after a successful mutation; the registry
//! forwards it to every open WebSocket whose role is in the event's
//! audience. Delivery is best-effort: a full channel drops the message and
//! a closed one is left for the socket's own cleanup to remove.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::models::enums::{AnalysisStatus, Role};
use crate::models::{ModelPerformance, Patient, RetinalAnalysis};
use crate::training::{ProgressEvent, RunStatus};

/// Roles that see clinical activity.
pub const CLINICIANS: &[Role] = &[Role::Doctor, Role::Admin];

/// Roles that see training runs.
pub const ADMINS: &[Role] = &[Role::Admin];

// ═══════════════════════════════════════════════════════════
// Wire messages
// ═══════════════════════════════════════════════════════════

/// Server → client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutgoing {
    /// Connection acknowledged.
    Welcome {
        connection_id: Uuid,
        user_id: Uuid,
        role: Role,
        server_time: String,
    },
    /// Client should answer with `pong`.
    Heartbeat { server_time: String },
    /// The bearer token behind this socket is about to expire
    /// (or has expired when `seconds_remaining == 0`).
    SessionExpiring { seconds_remaining: u32 },
    AnalysisCreated { analysis: RetinalAnalysis },
    AnalysisUpdated {
        analysis_id: Uuid,
        status: AnalysisStatus,
    },
    PatientCreated { patient: Patient },
    AiPerformanceUpdated { performance: ModelPerformance },
    TrainingProgress { run_id: Uuid, event: ProgressEvent },
    TrainingFinished {
        run_id: Uuid,
        status: RunStatus,
        exit_code: Option<i32>,
    },
}

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsIncoming {
    /// Heartbeat response.
    Pong {},
}

/// Who receives a broadcast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    All,
    Roles(&'static [Role]),
}

impl Audience {
    fn includes(&self, role: Role) -> bool {
        match self {
            Audience::All => true,
            Audience::Roles(roles) => roles.contains(&role),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// ConnectionRegistry
// ═══════════════════════════════════════════════════════════

#[derive(Debug)]
struct ClientConnection {
    user_id: Uuid,
    role: Role,
    tx: mpsc::Sender<WsOutgoing>,
    shutdown: Arc<Notify>,
}

/// Open WebSocket connections, keyed by connection id.
///
/// Lives inside `CoreState` behind a `RwLock`. Broadcasting only needs read
/// access since `try_send` works through a shared reference.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<Uuid, ClientConnection>,
}

/// What a socket task gets back from [`ConnectionRegistry::register`].
#[derive(Debug, Clone)]
pub struct Registration {
    pub connection_id: Uuid,
    /// Notified when the server is shutting down.
    pub shutdown: Arc<Notify>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, user_id: Uuid, role: Role, tx: mpsc::Sender<WsOutgoing>) -> Registration {
        let connection_id = Uuid::new_v4();
        let shutdown = Arc::new(Notify::new());
        self.connections.insert(
            connection_id,
            ClientConnection {
                user_id,
                role,
                tx,
                shutdown: shutdown.clone(),
            },
        );
        tracing::debug!(%connection_id, %user_id, role = %role, "WebSocket registered");
        Registration {
            connection_id,
            shutdown,
        }
    }

    pub fn unregister(&mut self, connection_id: &Uuid) -> bool {
        match self.connections.remove(connection_id) {
            Some(conn) => {
                tracing::debug!(%connection_id, user_id = %conn.user_id, "WebSocket unregistered");
                true
            }
            None => false,
        }
    }

    /// Send `msg` to every connection in `audience`. Returns how many
    /// channels accepted it.
    pub fn broadcast(&self, msg: &WsOutgoing, audience: Audience) -> usize {
        let mut delivered = 0;
        for (id, conn) in &self.connections {
            if !audience.includes(conn.role) {
                continue;
            }
            match conn.tx.try_send(msg.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(connection_id = %id, "WebSocket channel full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        delivered
    }

    /// Ask every socket task to close and forget them all.
    pub fn close_all(&mut self) -> usize {
        let count = self.connections.len();
        for conn in self.connections.values() {
            conn.shutdown.notify_one();
        }
        self.connections.clear();
        count
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat() -> WsOutgoing {
        WsOutgoing::Heartbeat {
            server_time: "2026-10-16T12:00:00Z".into(),
        }
    }

    #[test]
    fn broadcast_filters_by_role() {
        let mut registry = ConnectionRegistry::new();
        let (doctor_tx, mut doctor_rx) = mpsc::channel(4);
        let (patient_tx, mut patient_rx) = mpsc::channel(4);
        let (admin_tx, mut admin_rx) = mpsc::channel(4);
        registry.register(Uuid::new_v4(), Role::Doctor, doctor_tx);
        registry.register(Uuid::new_v4(), Role::Patient, patient_tx);
        registry.register(Uuid::new_v4(), Role::Admin, admin_tx);

        assert_eq!(registry.broadcast(&heartbeat(), Audience::Roles(CLINICIANS)), 2);
        assert!(doctor_rx.try_recv().is_ok());
        assert!(admin_rx.try_recv().is_ok());
        assert!(patient_rx.try_recv().is_err());

        assert_eq!(registry.broadcast(&heartbeat(), Audience::Roles(ADMINS)), 1);
        assert_eq!(registry.broadcast(&heartbeat(), Audience::All), 3);
    }

    #[test]
    fn full_channel_drops_message() {
        let mut registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        registry.register(Uuid::new_v4(), Role::Admin, tx);

        assert_eq!(registry.broadcast(&heartbeat(), Audience::All), 1);
        assert_eq!(registry.broadcast(&heartbeat(), Audience::All), 0);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_channel_stays_registered() {
        let mut registry = ConnectionRegistry::new();
        let (tx, rx) = mpsc::channel(1);
        let reg = registry.register(Uuid::new_v4(), Role::Doctor, tx);
        drop(rx);

        assert_eq!(registry.broadcast(&heartbeat(), Audience::All), 0);
        assert_eq!(registry.connection_count(), 1);
        assert!(registry.unregister(&reg.connection_id));
        assert!(!registry.unregister(&reg.connection_id));
    }

    #[tokio::test]
    async fn close_all_notifies_sockets() {
        let mut registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, _rx2) = mpsc::channel(1);
        let reg = registry.register(user, Role::Doctor, tx1);
        registry.register(user, Role::Doctor, tx2);
        assert_eq!(registry.connection_count(), 2);

        assert_eq!(registry.close_all(), 2);
        assert_eq!(registry.connection_count(), 0);
        // The permit was stored before anyone waited
        tokio::time::timeout(std::time::Duration::from_secs(1), reg.shutdown.notified())
            .await
            .unwrap();
    }

    #[test]
    fn outgoing_uses_snake_case_tags() {
        let json = serde_json::to_value(heartbeat()).unwrap();
        assert_eq!(json["type"], "heartbeat");

        let msg = WsOutgoing::AnalysisUpdated {
            analysis_id: Uuid::nil(),
            status: AnalysisStatus::Reviewed,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "analysis_updated");
        assert_eq!(json["status"], "reviewed");

        let msg = WsOutgoing::TrainingFinished {
            run_id: Uuid::nil(),
            status: RunStatus::Completed,
            exit_code: Some(0),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "training_finished");
        assert_eq!(json["status"], "completed");
    }

    #[test]
    fn incoming_pong_parses() {
        let msg: WsIncoming = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(msg, WsIncoming::Pong {});
        assert!(serde_json::from_str::<WsIncoming>(r#"{"type":"chat"}"#).is_err());
    }
}
