//! In-memory store implementations.
//!
//! DESIGN
//! ======
//! Mutex-guarded maps implementing every contract in `store`. Selected at
//! startup when `DATABASE_URL` is unset so the engine can run without a
//! database, and used throughout the test suite as inspectable fakes.
//! Not durable: process exit loses everything.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use super::{
    BoardAccess, BoardDoc, BoardStore, Cell, CellPatch, ChatLog, ChatMessage, ChatQuery, HistoryEntry, HistoryLog,
    NotificationStore, SessionVerifier, StoreError, VerifiedUser,
};
use crate::frame::now_ms;

// =============================================================================
// SESSION VERIFIER
// =============================================================================

/// Token → identity map.
#[derive(Default)]
pub struct MemorySessionVerifier {
    tokens: Mutex<HashMap<String, VerifiedUser>>,
}

impl MemorySessionVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_token(&self, token: impl Into<String>, user: VerifiedUser) {
        self.tokens
            .lock()
            .expect("verifier mutex poisoned")
            .insert(token.into(), user);
    }
}

#[async_trait::async_trait]
impl SessionVerifier for MemorySessionVerifier {
    async fn verify(&self, token: &str) -> Result<Option<VerifiedUser>, StoreError> {
        Ok(self
            .tokens
            .lock()
            .expect("verifier mutex poisoned")
            .get(token)
            .cloned())
    }
}

// =============================================================================
// BOARD STORE
// =============================================================================

struct BoardRecord {
    doc: BoardDoc,
    access: BoardAccess,
}

/// Board documents keyed by id. Writes mutate the stored document in place
/// under one lock, which gives the per-cell single-writer ordering the
/// contract requires.
#[derive(Default)]
pub struct MemoryBoardStore {
    boards: Mutex<HashMap<String, BoardRecord>>,
}

impl MemoryBoardStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a board with explicit access control.
    pub fn put_board(&self, doc: BoardDoc, access: BoardAccess) {
        let mut boards = self.boards.lock().expect("board mutex poisoned");
        boards.insert(doc.id.clone(), BoardRecord { doc, access });
    }

    /// Seed a public blank board.
    pub fn put_public_board(&self, id: &str, title: &str, size: u32) {
        self.put_board(
            BoardDoc::blank(id, title, size),
            BoardAccess { is_public: true, owner_id: None, access_secret: None },
        );
    }
}

#[async_trait::async_trait]
impl BoardStore for MemoryBoardStore {
    async fn get_by_id(&self, board_id: &str) -> Result<Option<BoardDoc>, StoreError> {
        let boards = self.boards.lock().expect("board mutex poisoned");
        Ok(boards.get(board_id).map(|r| r.doc.clone()))
    }

    async fn get_cell(&self, board_id: &str, row: u32, col: u32) -> Result<Option<Cell>, StoreError> {
        let boards = self.boards.lock().expect("board mutex poisoned");
        Ok(boards
            .get(board_id)
            .and_then(|r| r.doc.cell(row, col))
            .cloned())
    }

    async fn write_cell(
        &self,
        board_id: &str,
        row: u32,
        col: u32,
        patch: &CellPatch,
        actor: &str,
    ) -> Result<Cell, StoreError> {
        let mut boards = self.boards.lock().expect("board mutex poisoned");
        let record = boards
            .get_mut(board_id)
            .ok_or_else(|| StoreError::new(format!("board {board_id} missing")))?;
        let cell = record
            .doc
            .cell_mut(row, col)
            .ok_or_else(|| StoreError::new(format!("cell ({row},{col}) missing")))?;

        if let Some(value) = &patch.value {
            cell.value.clone_from(value);
        }
        if let Some(marked) = patch.marked {
            cell.marked = marked;
        }
        if let Some(kind) = patch.kind {
            cell.kind = kind;
        }
        cell.last_updated = now_ms();
        cell.updated_by = Some(actor.to_string());

        Ok(cell.clone())
    }

    async fn get_board_access(&self, board_id: &str) -> Result<Option<BoardAccess>, StoreError> {
        let boards = self.boards.lock().expect("board mutex poisoned");
        Ok(boards.get(board_id).map(|r| r.access.clone()))
    }
}

// =============================================================================
// HISTORY LOG
// =============================================================================

/// Append-only history, newest entries at the back.
#[derive(Default)]
pub struct MemoryHistoryLog {
    entries: Mutex<HashMap<String, Vec<HistoryEntry>>>,
}

impl MemoryHistoryLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entries recorded for a board. Test inspection hook.
    #[must_use]
    pub fn len(&self, board_id: &str) -> usize {
        self.entries
            .lock()
            .expect("history mutex poisoned")
            .get(board_id)
            .map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_empty(&self, board_id: &str) -> bool {
        self.len(board_id) == 0
    }
}

#[async_trait::async_trait]
impl HistoryLog for MemoryHistoryLog {
    async fn append(&self, board_id: &str, entry: &HistoryEntry) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().expect("history mutex poisoned");
        entries.entry(board_id.to_string()).or_default().push(entry.clone());
        Ok(())
    }

    async fn query(
        &self,
        board_id: &str,
        row: u32,
        col: u32,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let entries = self.entries.lock().expect("history mutex poisoned");
        let Some(board_entries) = entries.get(board_id) else {
            return Ok(Vec::new());
        };
        Ok(board_entries
            .iter()
            .rev()
            .filter(|e| e.row == row && e.col == col)
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }
}

// =============================================================================
// CHAT LOG
// =============================================================================

#[derive(Default)]
pub struct MemoryChatLog {
    messages: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl MemoryChatLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a board's messages, oldest first. Test inspection hook.
    #[must_use]
    pub fn messages(&self, board_id: &str) -> Vec<ChatMessage> {
        self.messages
            .lock()
            .expect("chat mutex poisoned")
            .get(board_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl ChatLog for MemoryChatLog {
    async fn append(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let mut messages = self.messages.lock().expect("chat mutex poisoned");
        messages
            .entry(message.board_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn query(&self, board_id: &str, query: &ChatQuery) -> Result<Vec<ChatMessage>, StoreError> {
        let messages = self.messages.lock().expect("chat mutex poisoned");
        let Some(board_messages) = messages.get(board_id) else {
            return Ok(Vec::new());
        };

        let mut window: Vec<&ChatMessage> = board_messages.iter().collect();
        if let Some(before) = query.before_id {
            if let Some(pos) = window.iter().position(|m| m.id == before) {
                window.truncate(pos);
            }
        }
        if let Some(after) = query.after_id {
            if let Some(pos) = window.iter().position(|m| m.id == after) {
                window.drain(..=pos);
            }
        }

        Ok(window
            .into_iter()
            .rev()
            .skip(usize::try_from(query.offset).unwrap_or(0))
            .take(usize::try_from(query.limit).unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn clear_board(&self, board_id: &str) -> Result<u64, StoreError> {
        let mut messages = self.messages.lock().expect("chat mutex poisoned");
        let removed = messages.remove(board_id).map_or(0, |m| m.len());
        Ok(removed as u64)
    }

    async fn clear_actor(&self, board_id: &str, actor: &str) -> Result<u64, StoreError> {
        let mut messages = self.messages.lock().expect("chat mutex poisoned");
        let Some(board_messages) = messages.get_mut(board_id) else {
            return Ok(0);
        };
        let before = board_messages.len();
        board_messages.retain(|m| m.actor != actor);
        Ok((before - board_messages.len()) as u64)
    }
}

// =============================================================================
// NOTIFICATION STORE
// =============================================================================

/// One stored notification. Exposed for test inspection.
#[derive(Debug, Clone)]
pub struct StoredNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    pub kind: String,
    pub data: serde_json::Value,
    pub read: bool,
}

#[derive(Default)]
pub struct MemoryNotificationStore {
    notifications: Mutex<Vec<StoredNotification>>,
}

impl MemoryNotificationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications stored for a user. Test inspection hook.
    #[must_use]
    pub fn for_user(&self, user_id: Uuid) -> Vec<StoredNotification> {
        self.notifications
            .lock()
            .expect("notification mutex poisoned")
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(
        &self,
        user_id: Uuid,
        message: &str,
        kind: &str,
        data: &serde_json::Value,
    ) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        self.notifications
            .lock()
            .expect("notification mutex poisoned")
            .push(StoredNotification {
                id,
                user_id,
                message: message.to_string(),
                kind: kind.to_string(),
                data: data.clone(),
                read: false,
            });
        Ok(id)
    }

    async fn mark_read(&self, user_id: Uuid, id: Option<Uuid>) -> Result<u64, StoreError> {
        let mut notifications = self.notifications.lock().expect("notification mutex poisoned");
        let mut touched = 0;
        for n in notifications.iter_mut() {
            if n.user_id == user_id && !n.read && id.is_none_or(|target| n.id == target) {
                n.read = true;
                touched += 1;
            }
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CellKind;

    #[tokio::test]
    async fn write_cell_applies_patch_fields() {
        let store = MemoryBoardStore::new();
        store.put_public_board("b", "Test", 3);

        let patch = CellPatch { value: Some("X".into()), marked: Some(true), kind: None };
        let cell = store.write_cell("b", 1, 2, &patch, "user-1").await.unwrap();

        assert_eq!(cell.value, "X");
        assert!(cell.marked);
        assert_eq!(cell.kind, CellKind::Text);
        assert_eq!(cell.updated_by.as_deref(), Some("user-1"));
        assert!(cell.last_updated > 0);

        let reread = store.get_cell("b", 1, 2).await.unwrap().unwrap();
        assert_eq!(reread.value, "X");
    }

    #[tokio::test]
    async fn write_cell_unknown_board_fails() {
        let store = MemoryBoardStore::new();
        let result = store.write_cell("nope", 0, 0, &CellPatch::default(), "u").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn history_query_is_newest_first_per_cell() {
        let log = MemoryHistoryLog::new();
        for (i, (row, col)) in [(0, 0), (0, 0), (1, 1)].iter().enumerate() {
            let entry = HistoryEntry {
                row: *row,
                col: *col,
                value: format!("v{i}"),
                marked: false,
                kind: CellKind::Text,
                ts: i as i64,
                actor: "u".into(),
            };
            log.append("b", &entry).await.unwrap();
        }

        let entries = log.query("b", 0, 0, 10, 0).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].value, "v1");
        assert_eq!(entries[1].value, "v0");
    }

    #[tokio::test]
    async fn chat_clear_actor_removes_only_that_actor() {
        let log = MemoryChatLog::new();
        for (actor, text) in [("a", "one"), ("b", "two"), ("a", "three")] {
            let msg = ChatMessage {
                id: Uuid::new_v4(),
                board_id: "b".into(),
                actor: actor.into(),
                actor_name: actor.into(),
                text: text.into(),
                command: None,
                mentions: Vec::new(),
                ts: 0,
            };
            log.append(&msg).await.unwrap();
        }

        let removed = log.clear_actor("b", "a").await.unwrap();
        assert_eq!(removed, 2);
        let remaining = log.messages("b");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].actor, "b");
    }

    #[tokio::test]
    async fn mark_read_all_and_single() {
        let store = MemoryNotificationStore::new();
        let user = Uuid::new_v4();
        let first = store
            .create(user, "hi", "mention", &serde_json::json!({}))
            .await
            .unwrap();
        store
            .create(user, "again", "mention", &serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(store.mark_read(user, Some(first)).await.unwrap(), 1);
        assert_eq!(store.mark_read(user, None).await.unwrap(), 1);
        assert_eq!(store.mark_read(user, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn verifier_round_trip() {
        let verifier = MemorySessionVerifier::new();
        let user_id = Uuid::new_v4();
        verifier.insert_token(
            "tok",
            VerifiedUser { user_id, display_name: "Ada".into(), is_admin: false },
        );

        let found = verifier.verify("tok").await.unwrap().unwrap();
        assert_eq!(found.user_id, user_id);
        assert!(verifier.verify("other").await.unwrap().is_none());
    }
}
