//! Room Registry — board membership, presence, and fan-out.
//!
//! DESIGN
//! ======
//! A room is the set of live connections currently viewing one board; it is
//! created on first join and destroyed when the last member leaves. Join is
//! idempotent: re-joining an already-joined room returns presence without a
//! duplicate broadcast. Both join and leave emit their own membership
//! broadcasts so the disconnect path and the explicit `room:leave` path
//! behave identically.

use tracing::info;
use uuid::Uuid;

use crate::error::EngineError;
use crate::frame::{Data, Frame};
use crate::state::{AppState, PresenceEntry};

/// Result of a join: the current presence list and whether this call
/// actually added the connection (drives the joined broadcast).
#[derive(Debug)]
pub struct JoinResult {
    pub board_id: String,
    pub presence: Vec<PresenceEntry>,
    pub newly_joined: bool,
}

// =============================================================================
// JOIN / LEAVE
// =============================================================================

/// Join a board room.
///
/// Validates that the board exists and that the caller may view it: public
/// boards are open; private boards require ownership, the admin role, or a
/// matching access secret.
///
/// # Errors
///
/// Not-found for unknown boards, permission for denied access, validation
/// for malformed ids, and storage errors from the access lookup.
pub async fn join(
    state: &AppState,
    connection_id: Uuid,
    board_id: &str,
    access_secret: Option<&str>,
) -> Result<JoinResult, EngineError> {
    let board_id = state.cache.resolve(board_id)?;

    let actor = state
        .actor(connection_id)
        .await
        .ok_or_else(|| EngineError::not_found("session"))?;

    let access = state
        .stores
        .boards
        .get_board_access(&board_id)
        .await?
        .ok_or_else(|| EngineError::not_found(format!("board {board_id}")))?;

    let owns = actor
        .identity
        .user_id()
        .is_some_and(|uid| access.owner_id == Some(uid));
    let secret_matches = access
        .access_secret
        .as_deref()
        .is_some_and(|s| access_secret == Some(s));
    if !(access.is_public || actor.is_admin || owns || secret_matches) {
        return Err(EngineError::permission("board access denied"));
    }

    let newly_joined = {
        let mut rooms = state.rooms.write().await;
        rooms.entry(board_id.clone()).or_default().insert(connection_id)
    };

    if newly_joined {
        let mut sessions = state.sessions.write().await;
        if let Some(session) = sessions.get_mut(&connection_id) {
            session.joined.insert(board_id.clone());
        }
        drop(sessions);

        info!(%connection_id, %board_id, "room: joined");
        let mut data = Data::new();
        data.insert("identity".into(), serde_json::json!(actor.identity.key()));
        data.insert("display_name".into(), serde_json::json!(actor.display_name));
        let frame = Frame::request("room:join", data)
            .with_board_id(board_id.clone())
            .with_from(actor.identity.key());
        broadcast(state, &board_id, &frame, Some(connection_id)).await;
    }

    let presence = presence(state, &board_id).await;
    Ok(JoinResult { board_id, presence, newly_joined })
}

/// Leave a board room. No-op for non-members. Deletes emptied rooms and
/// broadcasts the departure to the remaining members.
pub async fn leave(state: &AppState, connection_id: Uuid, board_id: &str) {
    let Ok(board_id) = state.cache.resolve(board_id) else {
        return;
    };

    let was_member = {
        let mut rooms = state.rooms.write().await;
        let Some(members) = rooms.get_mut(&board_id) else {
            return;
        };
        let removed = members.remove(&connection_id);
        if members.is_empty() {
            rooms.remove(&board_id);
            info!(%board_id, "room: destroyed");
        }
        removed
    };

    if !was_member {
        return;
    }

    let actor = {
        let mut sessions = state.sessions.write().await;
        let Some(session) = sessions.get_mut(&connection_id) else {
            return;
        };
        session.joined.remove(&board_id);
        session.actor()
    };

    info!(%connection_id, %board_id, "room: left");
    let mut data = Data::new();
    data.insert("identity".into(), serde_json::json!(actor.identity.key()));
    data.insert("display_name".into(), serde_json::json!(actor.display_name));
    let frame = Frame::request("room:leave", data)
        .with_board_id(board_id.clone())
        .with_from(actor.identity.key());
    broadcast(state, &board_id, &frame, Some(connection_id)).await;
}

/// Leave every joined room. Used on disconnect.
pub async fn leave_all(state: &AppState, connection_id: Uuid) {
    let joined: Vec<String> = {
        let sessions = state.sessions.read().await;
        sessions
            .get(&connection_id)
            .map(|s| s.joined.iter().cloned().collect())
            .unwrap_or_default()
    };
    for board_id in joined {
        leave(state, connection_id, &board_id).await;
    }
}

// =============================================================================
// PRESENCE
// =============================================================================

/// Deduplicated presence list for a room. Two connections of the same
/// identity appear once.
pub async fn presence(state: &AppState, board_id: &str) -> Vec<PresenceEntry> {
    let rooms = state.rooms.read().await;
    let Some(members) = rooms.get(board_id) else {
        return Vec::new();
    };

    let sessions = state.sessions.read().await;
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for connection_id in members {
        let Some(session) = sessions.get(connection_id) else {
            continue;
        };
        let key = session.identity.key();
        if seen.insert(key.clone()) {
            out.push(PresenceEntry {
                identity: key,
                display_name: session.display_name.clone(),
                is_anonymous: session.identity.is_anonymous(),
            });
        }
    }
    out
}

/// Whether a connection is currently a member of a room.
pub async fn is_member(state: &AppState, connection_id: Uuid, board_id: &str) -> bool {
    let rooms = state.rooms.read().await;
    rooms
        .get(board_id)
        .is_some_and(|members| members.contains(&connection_id))
}

// =============================================================================
// BROADCAST
// =============================================================================

/// Broadcast a frame to every room member, optionally excluding one
/// connection. Best-effort: a member with a full delivery queue is skipped.
pub async fn broadcast(state: &AppState, board_id: &str, frame: &Frame, exclude: Option<Uuid>) {
    let members: Vec<Uuid> = {
        let rooms = state.rooms.read().await;
        let Some(members) = rooms.get(board_id) else {
            return;
        };
        members.iter().copied().collect()
    };

    let sessions = state.sessions.read().await;
    for connection_id in members {
        if exclude == Some(connection_id) {
            continue;
        }
        if let Some(session) = sessions.get(&connection_id) {
            let _ = session.tx.try_send(frame.clone());
        }
    }
}

#[cfg(test)]
#[path = "rooms_test.rs"]
mod tests;
