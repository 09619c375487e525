//! Notification Fan-out — targeted, board-scoped, and system-wide delivery.
//!
//! DESIGN
//! ======
//! Stateless: each call is independent. The persisted copy in the
//! notification store is authoritative (at-least-once overall); live
//! delivery over a recipient's connection queue is best-effort at-most-once.
//! Ordering is FIFO per recipient connection with no cross-recipient
//! guarantee — that is exactly what the per-connection mpsc queues give.

use uuid::Uuid;

use crate::error::EngineError;
use crate::frame::{Data, Frame};
use crate::state::{Actor, AppState};

/// What `notify:read` targets: one notification or all of them.
#[derive(Debug, Clone, Copy)]
pub enum ReadTarget {
    One(Uuid),
    All,
}

// =============================================================================
// DELIVERY
// =============================================================================

/// Persist a notification and push it to every live connection of the user.
///
/// # Errors
///
/// Storage errors from the create. Live delivery failures are not errors:
/// the stored copy remains authoritative for later retrieval.
pub async fn notify_user(
    state: &AppState,
    user_id: Uuid,
    message: &str,
    kind: &str,
    data: serde_json::Value,
) -> Result<Uuid, EngineError> {
    let id = state
        .stores
        .notifications
        .create(user_id, message, kind, &data)
        .await?;

    let mut payload = Data::new();
    payload.insert("id".into(), serde_json::json!(id));
    payload.insert("message".into(), serde_json::json!(message));
    payload.insert("kind".into(), serde_json::json!(kind));
    payload.insert("data".into(), data);
    let frame = Frame::request("notify:push", payload);

    let connections: Vec<Uuid> = {
        let by_identity = state.by_identity.read().await;
        by_identity
            .get(&user_id.to_string())
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default()
    };
    let sessions = state.sessions.read().await;
    for connection_id in connections {
        if let Some(session) = sessions.get(&connection_id) {
            let _ = session.tx.try_send(frame.clone());
        }
    }

    Ok(id)
}

/// Deliver a frame to every current room member, except one identity.
pub async fn notify_board(state: &AppState, board_id: &str, frame: &Frame, exclude_identity: Option<&str>) {
    let members: Vec<Uuid> = {
        let rooms = state.rooms.read().await;
        let Some(members) = rooms.get(board_id) else {
            return;
        };
        members.iter().copied().collect()
    };

    let sessions = state.sessions.read().await;
    for connection_id in members {
        let Some(session) = sessions.get(&connection_id) else {
            continue;
        };
        if exclude_identity.is_some_and(|key| session.identity.key() == key) {
            continue;
        }
        let _ = session.tx.try_send(frame.clone());
    }
}

/// Deliver a frame to every connected session regardless of room membership.
pub async fn broadcast_system(state: &AppState, frame: &Frame) {
    let sessions = state.sessions.read().await;
    for session in sessions.values() {
        let _ = session.tx.try_send(frame.clone());
    }
}

// =============================================================================
// READ STATE
// =============================================================================

/// Mark one or all of the actor's notifications as read.
///
/// # Errors
///
/// Permission for anonymous actors (no durable user id), not-found when a
/// specific id touches nothing, storage errors from the update.
pub async fn mark_read(state: &AppState, actor: &Actor, target: ReadTarget) -> Result<u64, EngineError> {
    let Some(user_id) = actor.identity.user_id() else {
        return Err(EngineError::permission("anonymous sessions have no notifications"));
    };

    let (id, touched) = match target {
        ReadTarget::One(id) => (Some(id), state.stores.notifications.mark_read(user_id, Some(id)).await?),
        ReadTarget::All => (None, state.stores.notifications.mark_read(user_id, None).await?),
    };

    if touched == 0 && id.is_some() {
        return Err(EngineError::not_found("notification"));
    }
    Ok(touched)
}

/// Convenience used by the chat processor for @-mentions.
pub async fn mention(state: &AppState, user_id: Uuid, board_id: &str, from: &str, text: &str) {
    let message = format!("{from} mentioned you");
    let data = serde_json::json!({ "board_id": board_id, "from": from, "text": text });
    if let Err(e) = notify_user(state, user_id, &message, "mention", data).await {
        tracing::warn!(error = %e, %user_id, %board_id, "mention notification failed");
    }
}

#[cfg(test)]
#[path = "notify_test.rs"]
mod tests;
