//! WebSocket layer for realtime dashboard events.
//!
//! Handles WebSocket upgrade, heartbeat (30s), session expiry (bound to the
//! bearer token's `exp`), and per-connection rate limiting (10 incoming
//! messages/sec).
//!
//! Connection lifecycle:
//! 1. Client calls `POST /api/auth/ws-ticket` to get a one-time ticket
//! 2. Client opens `GET /ws/connect?ticket=xxx`: ticket validated, WS upgraded
//! 3. Server registers the socket in the `ConnectionRegistry` and sends Welcome
//! 4. Broadcast events for the client's role are forwarded as they happen
//! 5. Heartbeat every 30s: 3 missed = disconnect
//! 6. Warning 60s before the token expires, close at expiry

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::api::error::ApiError;
use crate::api::extract::ApiQuery;
use crate::api::types::{ApiContext, TicketHolder};
use crate::broadcast::{WsIncoming, WsOutgoing};
use crate::core_state::CoreState;

/// Heartbeat interval: server sends Heartbeat every 30 seconds.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Warning sent this many seconds before session expiry.
const EXPIRY_WARNING: Duration = Duration::from_secs(60);

/// Disconnect after this many missed heartbeats (3 × 30s = 90s).
const MAX_MISSED_HEARTBEATS: u32 = 3;

/// Maximum incoming messages per second per connection.
const MAX_INCOMING_PER_SECOND: u32 = 10;

/// Outgoing queue per connection. Broadcasts to a full queue are dropped.
const OUTGOING_BUFFER: usize = 64;

/// Query parameters for WebSocket upgrade.
#[derive(Deserialize)]
pub struct WsAuthQuery {
    ticket: String,
}

// ═══════════════════════════════════════════════════════════
// WsSessionState: Testable session state
// ═══════════════════════════════════════════════════════════

/// Action returned by `WsSessionState::on_heartbeat_tick()`.
#[derive(Debug, PartialEq)]
pub(crate) enum HeartbeatAction {
    /// Send a heartbeat and continue.
    SendHeartbeat,
    /// Too many missed heartbeats: disconnect.
    HeartbeatTimeout,
}

/// Heartbeat, expiry and rate-limit bookkeeping for one socket, kept apart
/// from the I/O loop so it can be tested without a live connection.
pub(crate) struct WsSessionState {
    deadline: Instant,
    missed_heartbeats: u32,
    expiry_warned: bool,
    incoming_times: VecDeque<Instant>,
}

impl WsSessionState {
    fn new(deadline: Instant) -> Self {
        Self {
            deadline,
            missed_heartbeats: 0,
            expiry_warned: false,
            incoming_times: VecDeque::new(),
        }
    }

    /// Deadline for a socket opened from `holder`'s token.
    fn for_holder(holder: &TicketHolder) -> Self {
        let remaining = (holder.session_expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        Self::new(Instant::now() + remaining)
    }

    /// When the token behind this socket expires.
    fn deadline(&self) -> Instant {
        self.deadline
    }

    /// When the expiry warning is due. Immediately for short-lived tokens.
    fn warning_at(&self) -> Instant {
        self.deadline
            .checked_sub(EXPIRY_WARNING)
            .unwrap_or_else(Instant::now)
    }

    /// Seconds left on the token, the first time only.
    fn take_expiry_warning(&mut self) -> Option<u32> {
        if self.expiry_warned {
            return None;
        }
        self.expiry_warned = true;
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        Some(remaining.as_secs() as u32)
    }

    /// Called when a Pong is received from the client.
    fn on_pong(&mut self) {
        self.missed_heartbeats = 0;
    }

    /// Called on each heartbeat tick. Returns the action to take.
    fn on_heartbeat_tick(&mut self) -> HeartbeatAction {
        if self.missed_heartbeats >= MAX_MISSED_HEARTBEATS {
            return HeartbeatAction::HeartbeatTimeout;
        }

        // Normal: send heartbeat and increment miss counter
        self.missed_heartbeats += 1;
        HeartbeatAction::SendHeartbeat
    }

    /// Check incoming rate limit. Returns true if allowed.
    fn check_rate(&mut self) -> bool {
        check_incoming_rate(&mut self.incoming_times)
    }
}

/// WebSocket upgrade handler.
///
/// Validates the one-time ticket before upgrading the connection.
/// The ticket was obtained via `POST /api/auth/ws-ticket`.
pub async fn ws_upgrade(
    State(ctx): State<ApiContext>,
    ApiQuery(query): ApiQuery<WsAuthQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<impl IntoResponse, ApiError> {
    // Reject plain HTTP before the ticket is spent
    let ws = ws.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
    let holder = {
        let mut tickets = ctx
            .ws_tickets
            .lock()
            .map_err(|_| ApiError::Internal("ticket lock".into()))?;
        tickets.consume(&query.ticket).ok_or(ApiError::Unauthorized)?
    };

    tracing::info!(user_id = %holder.user_id, role = %holder.role, "WebSocket upgrade accepted");
    let core = ctx.core.clone();
    Ok(ws.on_upgrade(move |socket| handle_ws(socket, core, holder)))
}

/// Main WebSocket connection handler.
///
/// Spawns a sender task for channel→WS forwarding, then runs the
/// receive + heartbeat loop until disconnect, expiry or shutdown.
async fn handle_ws(socket: WebSocket, core: Arc<CoreState>, holder: TicketHolder) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, rx) = mpsc::channel::<WsOutgoing>(OUTGOING_BUFFER);

    let registration = match core.write_registry() {
        Ok(mut registry) => registry.register(holder.user_id, holder.role, tx.clone()),
        Err(e) => {
            tracing::error!(error = %e, "Could not register WebSocket");
            return;
        }
    };
    let connection_id = registration.connection_id;

    // Spawn sender task (reads from channel, writes to WebSocket)
    let sender_handle = tokio::spawn(async move {
        let mut sink = ws_sink;
        let mut rx = rx;
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::warn!(error = %e, "Unserializable WebSocket message");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let _ = tx
        .send(WsOutgoing::Welcome {
            connection_id,
            user_id: holder.user_id,
            role: holder.role,
            server_time: Utc::now().to_rfc3339(),
        })
        .await;

    // Main receive + heartbeat loop
    let mut session = WsSessionState::for_holder(&holder);
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // Consume initial immediate tick
    let expiry = tokio::time::sleep_until(session.deadline().into());
    tokio::pin!(expiry);
    let warning = tokio::time::sleep_until(session.warning_at().into());
    tokio::pin!(warning);

    loop {
        tokio::select! {
            msg = ws_stream.next() => {
                match msg {
                    Some(Ok(Message::Text(ref text))) => {
                        if !session.check_rate() {
                            continue;
                        }
                        match serde_json::from_str::<WsIncoming>(text) {
                            Ok(WsIncoming::Pong {}) => session.on_pong(),
                            Err(_) => {
                                tracing::debug!(%connection_id, "Ignoring unknown WebSocket message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {} // Ping/Pong handled by axum/tungstenite
                }
            }
            () = &mut expiry => {
                let _ = tx.send(WsOutgoing::SessionExpiring {
                    seconds_remaining: 0,
                }).await;
                tracing::info!(%connection_id, "WebSocket session expired");
                break;
            }
            () = &mut warning, if !session.expiry_warned => {
                if let Some(seconds_remaining) = session.take_expiry_warning() {
                    let _ = tx.send(WsOutgoing::SessionExpiring { seconds_remaining }).await;
                }
            }
            _ = heartbeat.tick() => {
                match session.on_heartbeat_tick() {
                    HeartbeatAction::HeartbeatTimeout => {
                        tracing::info!(
                            %connection_id,
                            "{MAX_MISSED_HEARTBEATS} missed heartbeats, disconnecting"
                        );
                        break;
                    }
                    HeartbeatAction::SendHeartbeat => {
                        let _ = tx.send(WsOutgoing::Heartbeat {
                            server_time: Utc::now().to_rfc3339(),
                        }).await;
                    }
                }
            }
            _ = registration.shutdown.notified() => {
                tracing::debug!(%connection_id, "WebSocket closing for shutdown");
                break;
            }
        }
    }

    // Cleanup: the registry holds a sender clone, so unregister before
    // waiting for the sender task to drain.
    if let Ok(mut registry) = core.write_registry() {
        registry.unregister(&connection_id);
    }
    drop(tx);
    let _ = sender_handle.await;

    tracing::info!(%connection_id, user_id = %holder.user_id, "WebSocket disconnected");
}

/// Check if an incoming message is within the rate limit (10/sec).
///
/// Returns `true` if allowed, `false` if rate-limited.
fn check_incoming_rate(timestamps: &mut VecDeque<Instant>) -> bool {
    let now = Instant::now();
    let one_sec_ago = now - Duration::from_secs(1);

    // Remove timestamps older than 1 second
    while let Some(&front) = timestamps.front() {
        if front < one_sec_ago {
            timestamps.pop_front();
        } else {
            break;
        }
    }

    if timestamps.len() as u32 >= MAX_INCOMING_PER_SECOND {
        return false;
    }

    timestamps.push_back(now);
    true
}
