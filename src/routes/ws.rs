//! WebSocket gateway — bidirectional frame relay.
//!
//! DESIGN
//! ======
//! On upgrade, resolves an identity (verified token or anonymous fallback),
//! registers a session, and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Broadcast frames from room peers → forward to client
//! - Idle deadline expiry → drop the connection
//!
//! Handler functions are pure business logic: they validate, call services,
//! and return an `Outcome`. The dispatch layer owns all outbound concerns —
//! reply to sender and fan-out to peers.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with connection id and identity
//! 2. Client sends frames → dispatch → handler returns Outcome
//! 3. Dispatch applies Outcome (reply / emit / both)
//! 4. Close or idle expiry → leave all rooms → drop session

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use rand::Rng;
use tokio::time::{Instant, sleep_until};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EngineError;
use crate::frame::{Data, Frame, Status};
use crate::services::chat::{self, ChatOutcome};
use crate::services::{mutation, notify, rooms};
use crate::state::{AppState, CLIENT_CHANNEL_DEPTH, Identity, Session};
use crate::store::{Cell, CellKind, CellPatch, ChatMessage};

// =============================================================================
// OUTCOME
// =============================================================================

/// One frame to fan out to room peers after a handler succeeds. The sender
/// is always excluded; its copy is the correlated reply.
struct Emit {
    board_id: String,
    frame: Frame,
}

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what — handlers never send frames directly.
enum Outcome {
    /// Send done+data to sender only.
    Reply(Data),
    /// Send empty done to sender only.
    Done,
    /// Fan out to room peers with no reply to sender. Used for typing
    /// indicators (ephemeral, no persistence).
    Emit(Vec<Emit>),
    /// Reply to sender and fan out to peers.
    ReplyAndEmit { reply: Data, emits: Vec<Emit> },
}

// =============================================================================
// UPGRADE
// =============================================================================

/// `GET /api/ws?token=...`. The token is optional: a missing or
/// unverifiable token yields an anonymous identity instead of a rejection.
pub async fn handle_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let (identity, display_name, is_admin) = match params.get("token") {
        Some(token) => match state.stores.sessions.verify(token).await {
            Ok(Some(user)) => (Identity::User(user.user_id), user.display_name, user.is_admin),
            Ok(None) => {
                warn!("ws: unverifiable token, falling back to anonymous");
                anonymous_identity()
            }
            Err(e) => {
                warn!(error = %e, "ws: token verification failed, falling back to anonymous");
                anonymous_identity()
            }
        },
        None => anonymous_identity(),
    };

    ws.on_upgrade(move |socket| run_ws(socket, state, identity, display_name, is_admin))
}

fn anonymous_identity() -> (Identity, String, bool) {
    let tag = format!("{:08x}", rand::rng().random::<u32>());
    (Identity::Anonymous(format!("anon-{tag}")), format!("Guest-{tag}"), false)
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, identity: Identity, display_name: String, is_admin: bool) {
    let connection_id = Uuid::new_v4();
    let identity_key = identity.key();

    // Per-connection channel for receiving broadcast frames from peers.
    let (client_tx, mut client_rx) = tokio::sync::mpsc::channel::<Frame>(CLIENT_CHANNEL_DEPTH);

    state
        .insert_session(Session {
            connection_id,
            identity,
            display_name: display_name.clone(),
            is_admin,
            mentions_enabled: true,
            joined: std::collections::HashSet::new(),
            tx: client_tx,
        })
        .await;

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("connection_id", connection_id.to_string())
        .with_data("identity", identity_key.clone())
        .with_data("display_name", display_name)
        .with_data("mode", state.config.mode.as_str());
    if send_frame(&mut socket, &welcome).await.is_err() {
        state.remove_session(connection_id).await;
        return;
    }

    info!(%connection_id, identity = %identity_key, "ws: client connected");

    let idle = state.config.idle_timeout;
    let mut deadline = Instant::now() + idle;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                deadline = Instant::now() + idle;
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, connection_id, &text).await;
                        let mut failed = false;
                        for frame in replies {
                            if send_frame(&mut socket, &frame).await.is_err() {
                                failed = true;
                                break;
                            }
                        }
                        if failed {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
            () = sleep_until(deadline) => {
                info!(%connection_id, "ws: idle timeout");
                break;
            }
        }
    }

    // Departure broadcasts go out while the session is still registered.
    rooms::leave_all(&state, connection_id).await;
    state.remove_session(connection_id).await;
    info!(%connection_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the
/// sender. Transport concerns stay in `run_ws`, so tests can exercise
/// dispatch end-to-end without a socket.
async fn process_inbound_text(state: &AppState, connection_id: Uuid, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%connection_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new())
                .with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    let Some(actor) = state.actor(connection_id).await else {
        return vec![req.error("session not found")];
    };

    // Stamp the sender identity; clients never set `from` themselves.
    req.from = Some(actor.identity.key());

    info!(%connection_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match req.prefix() {
        "room" => handle_room(state, connection_id, &req).await,
        "cell" => handle_cell(state, connection_id, &req).await,
        "chat" => handle_chat(state, connection_id, &req).await,
        "notify" => handle_notify(state, connection_id, &req).await,
        prefix => Err(EngineError::validation(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::Emit(emits)) => {
            apply_emits(state, connection_id, emits).await;
            vec![]
        }
        Ok(Outcome::ReplyAndEmit { reply, emits }) => {
            apply_emits(state, connection_id, emits).await;
            vec![req.done_with(reply)]
        }
        Err(e) => {
            warn!(
                %connection_id,
                board_id = req.board_id.as_deref().unwrap_or("-"),
                syscall = %req.syscall,
                error = %e,
                "ws: handler error"
            );
            vec![req.error_from(&e)]
        }
    }
}

async fn apply_emits(state: &AppState, connection_id: Uuid, emits: Vec<Emit>) {
    for emit in emits {
        rooms::broadcast(state, &emit.board_id, &emit.frame, Some(connection_id)).await;
    }
}

/// Resolve the board id a request targets: the frame's own `board_id` or a
/// `board_id` data field.
fn require_board_id(req: &Frame) -> Result<String, EngineError> {
    req.board_id
        .clone()
        .or_else(|| req.data_str("board_id").map(String::from))
        .ok_or_else(|| EngineError::validation("board_id required"))
}

/// Membership gate for board-scoped events. Returns the resolved board id.
async fn require_membership(state: &AppState, connection_id: Uuid, req: &Frame) -> Result<String, EngineError> {
    let board_id = state.cache.resolve(&require_board_id(req)?)?;
    if !rooms::is_member(state, connection_id, &board_id).await {
        return Err(EngineError::permission("join the board first"));
    }
    Ok(board_id)
}

// =============================================================================
// ROOM HANDLERS
// =============================================================================

async fn handle_room(state: &AppState, connection_id: Uuid, req: &Frame) -> Result<Outcome, EngineError> {
    match req.op() {
        "join" => {
            let board_id = require_board_id(req)?;
            let result = rooms::join(state, connection_id, &board_id, req.data_str("access_secret")).await?;

            // Join succeeded, so the board document is loadable.
            let doc = state.cache.get(&state.stores.boards, &result.board_id).await?;

            let mut reply = Data::new();
            reply.insert("board_id".into(), serde_json::json!(result.board_id));
            reply.insert("board".into(), serde_json::to_value(&doc).unwrap_or_default());
            reply.insert("presence".into(), serde_json::to_value(&result.presence).unwrap_or_default());
            Ok(Outcome::Reply(reply))
        }
        "leave" => {
            let board_id = require_board_id(req)?;
            rooms::leave(state, connection_id, &board_id).await;
            Ok(Outcome::Done)
        }
        op => Err(EngineError::validation(format!("unknown room op: {op}"))),
    }
}

// =============================================================================
// CELL HANDLERS
// =============================================================================

async fn handle_cell(state: &AppState, connection_id: Uuid, req: &Frame) -> Result<Outcome, EngineError> {
    let board_id = require_membership(state, connection_id, req).await?;
    let actor = state
        .actor(connection_id)
        .await
        .ok_or_else(|| EngineError::not_found("session"))?;
    let coords = || -> Result<(u32, u32), EngineError> {
        let row = req.data_u32("row").ok_or_else(|| EngineError::validation("row required"))?;
        let col = req.data_u32("col").ok_or_else(|| EngineError::validation("col required"))?;
        Ok((row, col))
    };

    let cell = match req.op() {
        "update" => {
            let (row, col) = coords()?;
            let kind = match req.data_str("kind") {
                None => None,
                Some("text") => Some(CellKind::Text),
                Some("image") => Some(CellKind::Image),
                Some(other) => return Err(EngineError::validation(format!("unknown cell kind: {other}"))),
            };
            let patch = CellPatch {
                value: req.data_str("value").map(String::from),
                marked: req.data_bool("marked"),
                kind,
            };
            mutation::update_cell(state, &board_id, row, col, patch, &actor).await?
        }
        "mark" => {
            let (row, col) = coords()?;
            let marked = req
                .data_bool("marked")
                .ok_or_else(|| EngineError::validation("marked required"))?;
            mutation::mark_cell(state, &board_id, row, col, marked, &actor).await?
        }
        op => return Err(EngineError::validation(format!("unknown cell op: {op}"))),
    };

    let data = cell_to_data(&cell);
    let emit = Emit {
        frame: Frame::request("cell:update", data.clone())
            .with_board_id(board_id.clone())
            .with_from(actor.identity.key()),
        board_id,
    };
    Ok(Outcome::ReplyAndEmit { reply: data, emits: vec![emit] })
}

// =============================================================================
// CHAT HANDLERS
// =============================================================================

async fn handle_chat(state: &AppState, connection_id: Uuid, req: &Frame) -> Result<Outcome, EngineError> {
    let board_id = require_membership(state, connection_id, req).await?;
    let actor = state
        .actor(connection_id)
        .await
        .ok_or_else(|| EngineError::not_found("session"))?;

    match req.op() {
        "send" => {
            let text = req
                .data_str("text")
                .ok_or_else(|| EngineError::validation("text required"))?;

            match chat::submit(state, &board_id, &actor, text).await? {
                ChatOutcome::Message(message) => {
                    let data = message_to_data(&message);
                    let emit = Emit {
                        frame: Frame::request("chat:message", data.clone())
                            .with_board_id(board_id.clone())
                            .with_from(actor.identity.key()),
                        board_id,
                    };
                    Ok(Outcome::ReplyAndEmit { reply: data, emits: vec![emit] })
                }
                ChatOutcome::System(message) => {
                    let data = message_to_data(&message);
                    let emit = Emit {
                        frame: Frame::request("chat:system", data.clone()).with_board_id(board_id.clone()),
                        board_id,
                    };
                    Ok(Outcome::ReplyAndEmit { reply: data, emits: vec![emit] })
                }
                ChatOutcome::CellResult { message, cell } => {
                    let cell_data = cell_to_data(&cell);
                    let mut emits = vec![Emit {
                        frame: Frame::request("cell:update", cell_data.clone())
                            .with_board_id(board_id.clone())
                            .with_from(actor.identity.key()),
                        board_id: board_id.clone(),
                    }];
                    if let Some(message) = &message {
                        emits.push(Emit {
                            frame: Frame::request("chat:system", message_to_data(message))
                                .with_board_id(board_id.clone()),
                            board_id,
                        });
                    }
                    Ok(Outcome::ReplyAndEmit { reply: cell_data, emits })
                }
                ChatOutcome::ChatCleared { scope, removed } => {
                    let mut data = Data::new();
                    data.insert("scope".into(), serde_json::json!(scope.as_str()));
                    data.insert("removed".into(), serde_json::json!(removed));
                    if scope == chat::ClearScope::Mine {
                        data.insert("actor".into(), serde_json::json!(actor.identity.key()));
                    }
                    let emit = Emit {
                        frame: Frame::request("chat:cleared", data.clone()).with_board_id(board_id.clone()),
                        board_id,
                    };
                    Ok(Outcome::ReplyAndEmit { reply: data, emits: vec![emit] })
                }
            }
        }
        "typing" => {
            // Ephemeral: fan out to peers, never persisted, no reply.
            let mut data = Data::new();
            data.insert("identity".into(), serde_json::json!(actor.identity.key()));
            data.insert("display_name".into(), serde_json::json!(actor.display_name));
            data.insert(
                "is_typing".into(),
                serde_json::json!(req.data_bool("is_typing").unwrap_or(true)),
            );
            let emit = Emit {
                frame: Frame::request("chat:typing", data)
                    .with_board_id(board_id.clone())
                    .with_from(actor.identity.key()),
                board_id,
            };
            Ok(Outcome::Emit(vec![emit]))
        }
        op => Err(EngineError::validation(format!("unknown chat op: {op}"))),
    }
}

// =============================================================================
// NOTIFY HANDLERS
// =============================================================================

async fn handle_notify(state: &AppState, connection_id: Uuid, req: &Frame) -> Result<Outcome, EngineError> {
    let actor = state
        .actor(connection_id)
        .await
        .ok_or_else(|| EngineError::not_found("session"))?;

    match req.op() {
        "read" => {
            let target = match req.data_str("id") {
                Some(raw) => {
                    let id = raw
                        .parse()
                        .map_err(|_| EngineError::validation("id must be a uuid"))?;
                    notify::ReadTarget::One(id)
                }
                None => notify::ReadTarget::All,
            };
            let read = notify::mark_read(state, &actor, target).await?;
            let mut data = Data::new();
            data.insert("read".into(), serde_json::json!(read));
            Ok(Outcome::Reply(data))
        }
        op => Err(EngineError::validation(format!("unknown notify op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn cell_to_data(cell: &Cell) -> Data {
    let mut data = Data::new();
    data.insert("row".into(), serde_json::json!(cell.row));
    data.insert("col".into(), serde_json::json!(cell.col));
    data.insert("value".into(), serde_json::json!(cell.value));
    data.insert("kind".into(), serde_json::json!(cell.kind));
    data.insert("marked".into(), serde_json::json!(cell.marked));
    data.insert("last_updated".into(), serde_json::json!(cell.last_updated));
    data.insert("updated_by".into(), serde_json::json!(cell.updated_by));
    data
}

fn message_to_data(message: &ChatMessage) -> Data {
    let mut data = Data::new();
    data.insert("id".into(), serde_json::json!(message.id));
    data.insert("actor".into(), serde_json::json!(message.actor));
    data.insert("actor_name".into(), serde_json::json!(message.actor_name));
    data.insert("text".into(), serde_json::json!(message.text));
    data.insert("command".into(), serde_json::json!(message.command));
    data.insert("mentions".into(), serde_json::json!(message.mentions));
    data.insert("ts".into(), serde_json::json!(message.ts));
    data
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.data_str("code").unwrap_or("-");
        let message = frame.data_str("message").unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
