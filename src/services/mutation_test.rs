use super::*;
use crate::config::Mode;
use crate::state::Identity;
use crate::state::test_helpers::{seed_board, test_app_state};
use crate::store::BoardStore;
use uuid::Uuid;

fn user_actor() -> Actor {
    Actor { identity: Identity::User(Uuid::new_v4()), display_name: "Ada".into(), is_admin: false }
}

#[tokio::test]
async fn update_cell_applies_patch_and_records_history() {
    let (state, handles) = test_app_state(Mode::Individual);
    seed_board(&handles, "b", 5);
    let actor = user_actor();

    let patch = CellPatch { value: Some("BINGO".into()), marked: Some(true), kind: Some(CellKind::Text) };
    let cell = update_cell(&state, "b", 0, 0, patch, &actor).await.expect("update");

    assert_eq!(cell.row, 0);
    assert_eq!(cell.col, 0);
    assert_eq!(cell.value, "BINGO");
    assert!(cell.marked);
    assert_eq!(cell.updated_by, Some(actor.identity.key()));
    assert_eq!(handles.history.len("b"), 1);
}

#[tokio::test]
async fn out_of_range_coordinates_never_reach_the_store() {
    let (state, handles) = test_app_state(Mode::Individual);
    seed_board(&handles, "b", 5);
    let actor = user_actor();

    for (row, col) in [(5, 0), (0, 5), (99, 99)] {
        let patch = CellPatch { value: Some("X".into()), ..CellPatch::default() };
        let err = update_cell(&state, "b", row, col, patch, &actor).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "({row},{col}) should fail validation");
    }

    assert!(handles.history.is_empty("b"), "no history for rejected mutations");
    let untouched = handles.boards.get_cell("b", 0, 0).await.unwrap().unwrap();
    assert!(untouched.value.is_empty());
}

#[tokio::test]
async fn unknown_board_is_not_found() {
    let (state, _handles) = test_app_state(Mode::Individual);
    let actor = user_actor();

    let err = update_cell(&state, "ghost", 0, 0, CellPatch::default(), &actor)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn image_values_must_match_allowed_shapes() {
    let (state, handles) = test_app_state(Mode::Individual);
    seed_board(&handles, "b", 5);
    let actor = user_actor();

    for value in ["https://example.com/cat.png", "http://example.com/dog.jpg", "data:image/png;base64,AAAA"] {
        let patch = CellPatch { value: Some(value.into()), kind: Some(CellKind::Image), marked: None };
        update_cell(&state, "b", 1, 1, patch, &actor)
            .await
            .unwrap_or_else(|e| panic!("{value} should be accepted: {e}"));
    }

    for value in ["javascript:alert(1)", "file:///etc/passwd", "not a url"] {
        let patch = CellPatch { value: Some(value.into()), kind: Some(CellKind::Image), marked: None };
        let err = update_cell(&state, "b", 1, 1, patch, &actor).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)), "{value} should be rejected");
    }
}

#[tokio::test]
async fn image_shape_applies_to_existing_image_cells() {
    let (state, handles) = test_app_state(Mode::Individual);
    seed_board(&handles, "b", 5);
    let actor = user_actor();

    // Turn the cell into an image cell.
    let patch = CellPatch {
        value: Some("https://example.com/a.png".into()),
        kind: Some(CellKind::Image),
        marked: None,
    };
    update_cell(&state, "b", 2, 2, patch, &actor).await.expect("seed image cell");

    // A value-only patch against it still goes through image validation.
    let patch = CellPatch { value: Some("plain text".into()), kind: None, marked: None };
    let err = update_cell(&state, "b", 2, 2, patch, &actor).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn mark_cell_touches_only_marked() {
    let (state, handles) = test_app_state(Mode::Individual);
    seed_board(&handles, "b", 5);
    let actor = user_actor();

    let patch = CellPatch { value: Some("keep me".into()), ..CellPatch::default() };
    update_cell(&state, "b", 3, 3, patch, &actor).await.expect("set value");

    let cell = mark_cell(&state, "b", 3, 3, true, &actor).await.expect("mark");
    assert!(cell.marked);
    assert_eq!(cell.value, "keep me");

    let cell = mark_cell(&state, "b", 3, 3, false, &actor).await.expect("unmark");
    assert!(!cell.marked);
    assert_eq!(cell.value, "keep me");
}

#[tokio::test]
async fn cache_reflects_mutation_on_next_get() {
    let (state, handles) = test_app_state(Mode::Individual);
    seed_board(&handles, "b", 5);
    let actor = user_actor();

    // Warm the cache, then mutate.
    state.cache.get(&state.stores.boards, "b").await.expect("warm");
    let patch = CellPatch { value: Some("X".into()), marked: Some(true), kind: None };
    update_cell(&state, "b", 0, 0, patch, &actor).await.expect("update");

    // Invalidation forces a reload that carries the committed write.
    let doc = state.cache.get(&state.stores.boards, "b").await.expect("reload");
    let cell = doc.cell(0, 0).expect("cell exists");
    assert_eq!(cell.value, "X");
    assert!(cell.marked);
}

#[tokio::test]
async fn unified_mode_writes_to_shared_board() {
    let (state, handles) = test_app_state(Mode::Unified);
    seed_board(&handles, "unified", 5);
    let actor = user_actor();

    let patch = CellPatch { value: Some("shared".into()), ..CellPatch::default() };
    update_cell(&state, "whatever-id", 0, 0, patch, &actor).await.expect("update");

    let cell = handles.boards.get_cell("unified", 0, 0).await.unwrap().unwrap();
    assert_eq!(cell.value, "shared");
}
