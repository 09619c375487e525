//! Board State Cache — bounded in-memory projection of board documents.
//!
//! DESIGN
//! ======
//! Write-through-invalidate, never write-back: the mutation coordinator
//! calls `invalidate` right after every successful store write, so a cached
//! document is at worst `max_age` stale and never dirty.
//!
//! Admission: documents whose serialized size exceeds the per-entry ceiling
//! are never cached. Pruning removes expired entries first, then
//! oldest-inserted, until the entry count is under the capacity cap.
//!
//! Mode-aware id resolution also lives here: in UNIFIED mode every lookup
//! resolves to the single configured logical board id; in INDIVIDUAL mode
//! the requested id is sanitized against an explicit character allow-list.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::{Config, Mode};
use crate::error::EngineError;
use crate::store::{BoardDoc, BoardStore};

const MAX_BOARD_ID_LEN: usize = 64;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub mode: Mode,
    pub unified_board_id: String,
    pub max_age: Duration,
    pub capacity: usize,
    pub max_entry_bytes: usize,
}

impl CacheConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.mode,
            unified_board_id: config.unified_board_id.clone(),
            max_age: config.cache_max_age,
            capacity: config.cache_capacity,
            max_entry_bytes: config.cache_max_entry_bytes,
        }
    }
}

struct CacheEntry {
    doc: BoardDoc,
    inserted_at: Instant,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Insertion order, oldest at the front. Drives capacity eviction.
    order: VecDeque<String>,
}

#[derive(Clone)]
pub struct BoardCache {
    inner: Arc<Mutex<CacheInner>>,
    config: Arc<CacheConfig>,
}

// =============================================================================
// CACHE
// =============================================================================

impl BoardCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner { entries: HashMap::new(), order: VecDeque::new() })),
            config: Arc::new(config),
        }
    }

    /// Resolve a requested board id to the logical id used for storage and
    /// caching.
    ///
    /// # Errors
    ///
    /// In INDIVIDUAL mode, returns a validation error for empty, oversized,
    /// or non-allow-listed ids. UNIFIED mode never fails: every request maps
    /// to the one configured board.
    pub fn resolve(&self, requested: &str) -> Result<String, EngineError> {
        match self.config.mode {
            Mode::Unified => Ok(self.config.unified_board_id.clone()),
            Mode::Individual => {
                if requested.is_empty() || requested.len() > MAX_BOARD_ID_LEN {
                    return Err(EngineError::validation("invalid board id"));
                }
                if !requested
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
                {
                    return Err(EngineError::validation("board id contains invalid characters"));
                }
                Ok(requested.to_string())
            }
        }
    }

    /// Fetch a board document, serving from cache when fresh and loading
    /// through the board store on a miss.
    ///
    /// # Errors
    ///
    /// Validation error for a bad id, not-found for an unknown board, and
    /// storage errors from the load.
    pub async fn get(&self, store: &Arc<dyn BoardStore>, board_id: &str) -> Result<BoardDoc, EngineError> {
        let id = self.resolve(board_id)?;

        if let Some(doc) = self.lookup(&id) {
            return Ok(doc);
        }

        let doc = store
            .get_by_id(&id)
            .await?
            .ok_or_else(|| EngineError::not_found(format!("board {id}")))?;
        self.admit(&id, &doc);
        Ok(doc)
    }

    /// Return the cached document if present and younger than `max_age`.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<BoardDoc> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        let entry = inner.entries.get(id)?;
        if entry.inserted_at.elapsed() >= self.config.max_age {
            return None;
        }
        Some(entry.doc.clone())
    }

    /// Insert a document, subject to the admission policy.
    pub fn admit(&self, id: &str, doc: &BoardDoc) {
        let bytes = serde_json::to_vec(doc).map_or(usize::MAX, |v| v.len());
        if bytes > self.config.max_entry_bytes {
            debug!(board_id = %id, bytes, "cache: document over size ceiling, not admitted");
            return;
        }

        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        if inner.entries.remove(id).is_some() {
            inner.order.retain(|k| k != id);
        }
        inner
            .entries
            .insert(id.to_string(), CacheEntry { doc: doc.clone(), inserted_at: Instant::now() });
        inner.order.push_back(id.to_string());
        self.prune(&mut inner);
    }

    /// Drop an entry immediately. Called right after a successful mutation.
    pub fn invalidate(&self, board_id: &str) {
        let Ok(id) = self.resolve(board_id) else {
            return;
        };
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        if inner.entries.remove(&id).is_some() {
            inner.order.retain(|k| k != &id);
        }
    }

    /// Current entry count. Exposed for eviction assertions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Expired entries go first, then oldest-inserted, until under capacity.
    fn prune(&self, inner: &mut CacheInner) {
        if inner.entries.len() <= self.config.capacity {
            return;
        }

        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.inserted_at.elapsed() >= self.config.max_age)
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            inner.entries.remove(&key);
            inner.order.retain(|k| k != &key);
        }

        while inner.entries.len() > self.config.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
    }
}

#[cfg(test)]
#[path = "cache_test.rs"]
mod tests;
