//! Board Mutation Coordinator — validated, ordered cell changes.
//!
//! DESIGN
//! ======
//! The pipeline is validate → write → history → invalidate. Coordinates are
//! checked against the cached board document before any store traffic, so an
//! out-of-range mutation never reaches the store. The store write is
//! transactional with per-cell single-writer ordering (a storage
//! obligation); because the broadcast is emitted only after this function
//! returns, broadcast order matches commit order per cell.
//!
//! ERROR HANDLING
//! ==============
//! A history append failure after a committed write is logged and swallowed:
//! the mutation is durable at that point and must still be surfaced and
//! broadcast.

use tracing::{info, warn};

use crate::error::EngineError;
use crate::frame::now_ms;
use crate::state::{Actor, AppState};
use crate::store::{Cell, CellKind, CellPatch, HistoryEntry};

// =============================================================================
// OPERATIONS
// =============================================================================

/// Apply a patch to one cell.
///
/// # Errors
///
/// Validation for out-of-range coordinates or a malformed image value,
/// not-found for unknown boards, storage errors from the write.
pub async fn update_cell(
    state: &AppState,
    board_id: &str,
    row: u32,
    col: u32,
    patch: CellPatch,
    actor: &Actor,
) -> Result<Cell, EngineError> {
    let resolved = state.cache.resolve(board_id)?;
    let doc = state.cache.get(&state.stores.boards, &resolved).await?;

    if row >= doc.size || col >= doc.size {
        return Err(EngineError::validation(format!(
            "cell ({row},{col}) out of range for {size}x{size} board",
            size = doc.size
        )));
    }

    validate_image_value(&doc, row, col, &patch)?;

    let actor_key = actor.identity.key();
    let cell = state
        .stores
        .boards
        .write_cell(&resolved, row, col, &patch, &actor_key)
        .await?;

    let entry = HistoryEntry {
        row,
        col,
        value: cell.value.clone(),
        marked: cell.marked,
        kind: cell.kind,
        ts: now_ms(),
        actor: actor_key.clone(),
    };
    if let Err(e) = state.stores.history.append(&resolved, &entry).await {
        warn!(error = %e, board_id = %resolved, row, col, "history append failed after committed write");
    }

    state.cache.invalidate(&resolved);
    info!(board_id = %resolved, row, col, actor = %actor_key, "cell updated");
    Ok(cell)
}

/// Specialization touching only the `marked` flag.
///
/// # Errors
///
/// Same surface as [`update_cell`].
pub async fn mark_cell(
    state: &AppState,
    board_id: &str,
    row: u32,
    col: u32,
    marked: bool,
    actor: &Actor,
) -> Result<Cell, EngineError> {
    let patch = CellPatch { value: None, kind: None, marked: Some(marked) };
    update_cell(state, board_id, row, col, patch, actor).await
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Image-kind values must look like an image reference: http(s) URL or an
/// image data URI.
fn validate_image_value(
    doc: &crate::store::BoardDoc,
    row: u32,
    col: u32,
    patch: &CellPatch,
) -> Result<(), EngineError> {
    let Some(value) = &patch.value else {
        return Ok(());
    };
    if value.is_empty() {
        return Ok(());
    }

    let effective_kind = patch
        .kind
        .or_else(|| doc.cell(row, col).map(|c| c.kind))
        .unwrap_or(CellKind::Text);
    if effective_kind != CellKind::Image {
        return Ok(());
    }

    let ok = value.starts_with("http://") || value.starts_with("https://") || value.starts_with("data:image/");
    if ok {
        Ok(())
    } else {
        Err(EngineError::validation("image value must be an http(s) URL or image data URI"))
    }
}

#[cfg(test)]
#[path = "mutation_test.rs"]
mod tests;
