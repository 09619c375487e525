//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the live session table, room membership, the identity→connection
//! map used by notification fan-out, the board cache, and the store handle
//! bundle. Everything shared is behind an explicit lock: the engine runs on
//! the multi-threaded runtime, so none of these maps can rely on
//! single-threaded dispatch for safety.
//!
//! OWNERSHIP
//! =========
//! Sessions are owned here and indexed by connection id; rooms hold only
//! connection ids (weak references into the session table). Each session's
//! `tx` is the per-connection delivery queue, which is what gives FIFO
//! ordering per recipient.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::cache::{BoardCache, CacheConfig};
use crate::config::Config;
use crate::frame::Frame;
use crate::store::Stores;

/// Outbound queue depth per connection. Slow consumers drop frames rather
/// than stalling broadcasts.
pub const CLIENT_CHANNEL_DEPTH: usize = 256;

// =============================================================================
// IDENTITY
// =============================================================================

/// Who a connection is: an authenticated user or an anonymous tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    User(Uuid),
    Anonymous(String),
}

impl Identity {
    /// Stable string form used in `from` fields, history actor columns, and
    /// the identity→connection map.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Identity::User(id) => id.to_string(),
            Identity::Anonymous(tag) => tag.clone(),
        }
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Identity::Anonymous(_))
    }

    /// The user id, for identities that can receive persisted notifications.
    #[must_use]
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Identity::User(id) => Some(*id),
            Identity::Anonymous(_) => None,
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// One live connection. Created on upgrade, destroyed on disconnect, never
/// persisted.
pub struct Session {
    pub connection_id: Uuid,
    pub identity: Identity,
    pub display_name: String,
    pub is_admin: bool,
    /// Whether @-mentions of this session's name raise notifications.
    pub mentions_enabled: bool,
    /// Boards this connection has joined.
    pub joined: HashSet<String>,
    /// Per-connection delivery queue for outbound frames.
    pub tx: mpsc::Sender<Frame>,
}

impl Session {
    /// Snapshot the acting identity out of a session.
    #[must_use]
    pub fn actor(&self) -> Actor {
        Actor {
            identity: self.identity.clone(),
            display_name: self.display_name.clone(),
            is_admin: self.is_admin,
        }
    }
}

/// The identity performing an operation, detached from session bookkeeping
/// so services can hold it across awaits without the session lock.
#[derive(Debug, Clone)]
pub struct Actor {
    pub identity: Identity,
    pub display_name: String,
    pub is_admin: bool,
}

/// One presence-list entry, deduplicated by identity.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceEntry {
    pub identity: String,
    pub display_name: String,
    pub is_anonymous: bool,
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state. Clone is required by Axum — all inner fields
/// are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    /// Live sessions keyed by connection id.
    pub sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
    /// Room membership: board id → connection ids.
    pub rooms: Arc<RwLock<HashMap<String, HashSet<Uuid>>>>,
    /// Identity key → connection ids, for targeted notification delivery.
    pub by_identity: Arc<RwLock<HashMap<String, HashSet<Uuid>>>>,
    pub cache: BoardCache,
    pub stores: Stores,
    pub config: Arc<Config>,
}

impl AppState {
    #[must_use]
    pub fn new(stores: Stores, config: Config) -> Self {
        let cache = BoardCache::new(CacheConfig::from_config(&config));
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            rooms: Arc::new(RwLock::new(HashMap::new())),
            by_identity: Arc::new(RwLock::new(HashMap::new())),
            cache,
            stores,
            config: Arc::new(config),
        }
    }

    /// Register a session and link it in the identity map.
    pub async fn insert_session(&self, session: Session) {
        let connection_id = session.connection_id;
        let identity_key = session.identity.key();
        self.sessions.write().await.insert(connection_id, session);
        self.by_identity
            .write()
            .await
            .entry(identity_key)
            .or_default()
            .insert(connection_id);
    }

    /// Drop a session and unlink the identity map entry.
    pub async fn remove_session(&self, connection_id: Uuid) -> Option<Session> {
        let session = self.sessions.write().await.remove(&connection_id)?;
        let mut by_identity = self.by_identity.write().await;
        let key = session.identity.key();
        if let Some(connections) = by_identity.get_mut(&key) {
            connections.remove(&connection_id);
            if connections.is_empty() {
                by_identity.remove(&key);
            }
        }
        Some(session)
    }

    /// Snapshot a session's acting identity.
    pub async fn actor(&self, connection_id: Uuid) -> Option<Actor> {
        let sessions = self.sessions.read().await;
        sessions.get(&connection_id).map(Session::actor)
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
