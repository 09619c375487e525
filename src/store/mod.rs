//! External-collaborator contracts.
//!
//! ARCHITECTURE
//! ============
//! The sync engine never owns persistence. Boards, history, chat lines,
//! notifications, and session tokens live behind the traits in this module,
//! held as `Arc<dyn Trait>` handles so the engine can run against Postgres
//! in production and in-memory fakes in dev mode and tests.
//!
//! Ordering obligation: `BoardStore::write_cell` must be transactional with
//! per-cell single-writer semantics. The mutation coordinator linearizes
//! same-cell broadcasts on top of that guarantee; it does not re-implement
//! it.

pub mod memory;
pub mod postgres;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ERROR
// =============================================================================

/// Opaque storage failure. The engine treats every store error as transient
/// and surfaces it generically; the cause string is for logs only.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct StoreError(String);

impl StoreError {
    pub fn new(cause: impl Into<String>) -> Self {
        Self(cause.into())
    }
}

// =============================================================================
// DOMAIN TYPES
// =============================================================================

/// Cell content kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellKind {
    Text,
    Image,
}

/// One grid position of a board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub row: u32,
    pub col: u32,
    pub value: String,
    pub kind: CellKind,
    pub marked: bool,
    /// Milliseconds since Unix epoch.
    pub last_updated: i64,
    /// Identity key of the last editor, if any.
    pub updated_by: Option<String>,
}

impl Cell {
    /// An empty unmarked text cell at the given position.
    #[must_use]
    pub fn blank(row: u32, col: u32) -> Self {
        Self { row, col, value: String::new(), kind: CellKind::Text, marked: false, last_updated: 0, updated_by: None }
    }
}

/// Partial cell update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CellPatch {
    pub value: Option<String>,
    pub marked: Option<bool>,
    pub kind: Option<CellKind>,
}

/// Cached projection of one board document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardDoc {
    pub id: String,
    pub title: String,
    /// Grid dimension: the board is `size × size`.
    pub size: u32,
    pub cells: Vec<Cell>,
    pub settings: serde_json::Value,
}

impl BoardDoc {
    /// A fresh `size × size` board of blank cells.
    #[must_use]
    pub fn blank(id: impl Into<String>, title: impl Into<String>, size: u32) -> Self {
        let mut cells = Vec::with_capacity((size * size) as usize);
        for row in 0..size {
            for col in 0..size {
                cells.push(Cell::blank(row, col));
            }
        }
        Self { id: id.into(), title: title.into(), size, cells, settings: serde_json::json!({}) }
    }

    #[must_use]
    pub fn cell(&self, row: u32, col: u32) -> Option<&Cell> {
        self.cells.iter().find(|c| c.row == row && c.col == col)
    }

    pub fn cell_mut(&mut self, row: u32, col: u32) -> Option<&mut Cell> {
        self.cells.iter_mut().find(|c| c.row == row && c.col == col)
    }
}

/// Access control projection for one board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardAccess {
    pub is_public: bool,
    pub owner_id: Option<Uuid>,
    /// Shared secret granting anonymous access to private boards.
    pub access_secret: Option<String>,
}

/// One immutable record of a past cell state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub row: u32,
    pub col: u32,
    pub value: String,
    pub marked: bool,
    pub kind: CellKind,
    pub ts: i64,
    /// Identity key of the actor.
    pub actor: String,
}

/// One stored chat line (plain text or a command's generated result).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub board_id: String,
    /// Identity key of the sender.
    pub actor: String,
    pub actor_name: String,
    pub text: String,
    /// Set when the line is a command's generated result.
    pub command: Option<String>,
    pub mentions: Vec<String>,
    pub ts: i64,
}

/// Chat query window.
#[derive(Debug, Clone, Default)]
pub struct ChatQuery {
    pub limit: i64,
    pub offset: i64,
    pub before_id: Option<Uuid>,
    pub after_id: Option<Uuid>,
}

/// Identity resolved from a bearer token.
#[derive(Debug, Clone)]
pub struct VerifiedUser {
    pub user_id: Uuid,
    pub display_name: String,
    pub is_admin: bool,
}

// =============================================================================
// CONTRACTS
// =============================================================================

/// Resolves bearer tokens to identities.
#[async_trait::async_trait]
pub trait SessionVerifier: Send + Sync {
    /// `None` means missing/expired/invalid; the gateway degrades to an
    /// anonymous identity rather than rejecting.
    async fn verify(&self, token: &str) -> Result<Option<VerifiedUser>, StoreError>;
}

/// Board documents and cells. Writes are transactional with per-cell
/// single-writer ordering.
#[async_trait::async_trait]
pub trait BoardStore: Send + Sync {
    async fn get_by_id(&self, board_id: &str) -> Result<Option<BoardDoc>, StoreError>;

    async fn get_cell(&self, board_id: &str, row: u32, col: u32) -> Result<Option<Cell>, StoreError>;

    async fn write_cell(
        &self,
        board_id: &str,
        row: u32,
        col: u32,
        patch: &CellPatch,
        actor: &str,
    ) -> Result<Cell, StoreError>;

    async fn get_board_access(&self, board_id: &str) -> Result<Option<BoardAccess>, StoreError>;
}

/// Append-only cell history.
#[async_trait::async_trait]
pub trait HistoryLog: Send + Sync {
    async fn append(&self, board_id: &str, entry: &HistoryEntry) -> Result<(), StoreError>;

    /// Newest-first entries for one cell.
    async fn query(
        &self,
        board_id: &str,
        row: u32,
        col: u32,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<HistoryEntry>, StoreError>;
}

/// Persisted chat lines.
#[async_trait::async_trait]
pub trait ChatLog: Send + Sync {
    async fn append(&self, message: &ChatMessage) -> Result<(), StoreError>;

    async fn query(&self, board_id: &str, query: &ChatQuery) -> Result<Vec<ChatMessage>, StoreError>;

    /// Remove every message on a board. Returns the number removed.
    async fn clear_board(&self, board_id: &str) -> Result<u64, StoreError>;

    /// Remove one actor's messages on a board. Returns the number removed.
    async fn clear_actor(&self, board_id: &str, actor: &str) -> Result<u64, StoreError>;
}

/// Persisted notifications. The stored copy is authoritative; live delivery
/// is best-effort on top.
#[async_trait::async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(
        &self,
        user_id: Uuid,
        message: &str,
        kind: &str,
        data: &serde_json::Value,
    ) -> Result<Uuid, StoreError>;

    /// Mark one notification (or all of a user's, when `id` is `None`) as
    /// read. Returns the number of rows touched.
    async fn mark_read(&self, user_id: Uuid, id: Option<Uuid>) -> Result<u64, StoreError>;
}

// =============================================================================
// BUNDLE
// =============================================================================

use std::sync::Arc;

/// Handle bundle injected into `AppState`.
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionVerifier>,
    pub boards: Arc<dyn BoardStore>,
    pub history: Arc<dyn HistoryLog>,
    pub chat: Arc<dyn ChatLog>,
    pub notifications: Arc<dyn NotificationStore>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_board_has_full_grid() {
        let doc = BoardDoc::blank("b", "Test", 5);
        assert_eq!(doc.cells.len(), 25);
        assert!(doc.cell(0, 0).is_some());
        assert!(doc.cell(4, 4).is_some());
        assert!(doc.cell(5, 0).is_none());
    }

    #[test]
    fn blank_cell_is_unmarked_text() {
        let cell = Cell::blank(2, 3);
        assert_eq!(cell.row, 2);
        assert_eq!(cell.col, 3);
        assert_eq!(cell.kind, CellKind::Text);
        assert!(!cell.marked);
        assert!(cell.value.is_empty());
    }

    #[test]
    fn cell_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&CellKind::Text).unwrap(), "\"text\"");
        assert_eq!(serde_json::to_string(&CellKind::Image).unwrap(), "\"image\"");
    }
}
