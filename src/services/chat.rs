//! Chat & Command Processor.
//!
//! DESIGN
//! ======
//! A chat line starting with the command delimiter is parsed into
//! `{name, args}` and dispatched through a static command table; a
//! delimiter-prefixed line matching no known command is ordinary chat text,
//! not an error. Mode gating is checked before any command handler runs, so
//! a gated command fails with a permission error before any state change.
//!
//! PERSISTENCE ORDER
//! =================
//! Every accepted line — plain chat or a command's generated result — is
//! appended to the chat log before the caller broadcasts it. `clear` is the
//! one exception: neither of its forms produces a stored line.

use rand::Rng;
use tracing::info;

use crate::error::EngineError;
use crate::frame::now_ms;
use crate::services::{mutation, notify, rooms};
use crate::state::{Actor, AppState};
use crate::store::{Cell, CellKind, CellPatch, ChatMessage};

pub const COMMAND_DELIMITER: char = '/';
pub const MENTION_DELIMITER: char = '@';

const MAX_DICE: u32 = 100;
const MAX_SIDES: u32 = 1000;
const HISTORY_DISPLAY_LIMIT: i64 = 5;

// =============================================================================
// OUTCOME
// =============================================================================

/// What a submitted line produced. The gateway maps this onto reply and
/// broadcast frames.
#[derive(Debug)]
pub enum ChatOutcome {
    /// Plain chat text, stored and broadcast to the room.
    Message(ChatMessage),
    /// A command's generated result, stored and broadcast to the room.
    System(ChatMessage),
    /// A cell-mutating command: the cell change is broadcast as a cell
    /// update; `message` (when present) is also stored and broadcast.
    CellResult { message: Option<ChatMessage>, cell: Cell },
    /// `/clear all|my`: nothing stored, the room is told to drop lines.
    ChatCleared { scope: ClearScope, removed: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearScope {
    All,
    Mine,
}

impl ClearScope {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ClearScope::All => "all",
            ClearScope::Mine => "mine",
        }
    }
}

// =============================================================================
// COMMAND TABLE
// =============================================================================

enum CommandKind {
    Help,
    Users,
    Clear,
    Roll,
    History,
    Set,
    Mark,
    Unmark,
}

struct CommandSpec {
    name: &'static str,
    usage: &'static str,
    kind: CommandKind,
}

/// Dispatch table. Mode gating consults `Mode::allows_command` with the
/// entry name, so adding a command here is the only change needed.
const COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "help", usage: "/help", kind: CommandKind::Help },
    CommandSpec { name: "users", usage: "/users", kind: CommandKind::Users },
    CommandSpec { name: "clear", usage: "/clear all|my|row col", kind: CommandKind::Clear },
    CommandSpec { name: "roll", usage: "/roll NdM", kind: CommandKind::Roll },
    CommandSpec { name: "history", usage: "/history row col", kind: CommandKind::History },
    CommandSpec { name: "set", usage: "/set row col value", kind: CommandKind::Set },
    CommandSpec { name: "mark", usage: "/mark row col", kind: CommandKind::Mark },
    CommandSpec { name: "unmark", usage: "/unmark row col", kind: CommandKind::Unmark },
];

fn find_command(name: &str) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|c| c.name == name)
}

// =============================================================================
// SUBMIT
// =============================================================================

/// Process one submitted chat line.
///
/// # Errors
///
/// Validation for malformed commands, permission for mode-gated or
/// role-gated commands, not-found/storage errors from delegates.
pub async fn submit(state: &AppState, board_id: &str, actor: &Actor, raw: &str) -> Result<ChatOutcome, EngineError> {
    let board_id = state.cache.resolve(board_id)?;
    let text = raw.trim();
    if text.is_empty() {
        return Err(EngineError::validation("empty message"));
    }

    if let Some(rest) = text.strip_prefix(COMMAND_DELIMITER) {
        let mut tokens = rest.split_whitespace();
        if let Some(name) = tokens.next() {
            let name = name.to_ascii_lowercase();
            if let Some(spec) = find_command(&name) {
                if !state.config.mode.allows_command(spec.name) {
                    return Err(EngineError::permission(format!(
                        "command {name} is not available in {} mode",
                        state.config.mode.as_str()
                    )));
                }
                let args: Vec<&str> = tokens.collect();
                info!(board_id = %board_id, command = %name, actor = %actor.identity.key(), "chat: command");
                return run_command(state, &board_id, actor, spec, &args).await;
            }
        }
        // Unknown command name: falls through as ordinary chat text.
    }

    let mentions = extract_mentions(text);
    let message = build_message(&board_id, actor, text.to_string(), None, mentions.clone());
    state.stores.chat.append(&message).await?;
    fan_out_mentions(state, &board_id, actor, &mentions, text).await;
    Ok(ChatOutcome::Message(message))
}

async fn run_command(
    state: &AppState,
    board_id: &str,
    actor: &Actor,
    spec: &CommandSpec,
    args: &[&str],
) -> Result<ChatOutcome, EngineError> {
    match spec.kind {
        CommandKind::Help => {
            let list: Vec<&str> = COMMANDS.iter().map(|c| c.usage).collect();
            let text = format!("Commands: {}", list.join(", "));
            Ok(ChatOutcome::System(store_system(state, board_id, actor, "help", text).await?))
        }
        CommandKind::Users => {
            let presence = rooms::presence(state, board_id).await;
            let text = if presence.is_empty() {
                "No one is here.".to_string()
            } else {
                let names: Vec<&str> = presence.iter().map(|p| p.display_name.as_str()).collect();
                format!("Online ({}): {}", presence.len(), names.join(", "))
            };
            Ok(ChatOutcome::System(store_system(state, board_id, actor, "users", text).await?))
        }
        CommandKind::Roll => roll(state, board_id, actor, args).await,
        CommandKind::History => history(state, board_id, actor, args).await,
        CommandKind::Clear => clear(state, board_id, actor, args).await,
        CommandKind::Set => {
            let (row, col) = parse_coords(args, spec.usage)?;
            let value = args[2..].join(" ");
            if value.is_empty() {
                return Err(EngineError::validation(format!("usage: {}", spec.usage)));
            }
            let patch = CellPatch { value: Some(value.clone()), marked: None, kind: None };
            let cell = mutation::update_cell(state, board_id, row, col, patch, actor).await?;
            let text = format!("Set ({row},{col}) to \"{value}\"");
            let message = store_system(state, board_id, actor, "set", text).await?;
            Ok(ChatOutcome::CellResult { message: Some(message), cell })
        }
        CommandKind::Mark | CommandKind::Unmark => {
            let (row, col) = parse_coords(args, spec.usage)?;
            let marked = matches!(spec.kind, CommandKind::Mark);
            let cell = mutation::mark_cell(state, board_id, row, col, marked, actor).await?;
            let verb = if marked { "Marked" } else { "Unmarked" };
            let message = store_system(state, board_id, actor, spec.name, format!("{verb} ({row},{col})")).await?;
            Ok(ChatOutcome::CellResult { message: Some(message), cell })
        }
    }
}

// =============================================================================
// COMMAND HANDLERS
// =============================================================================

async fn roll(state: &AppState, board_id: &str, actor: &Actor, args: &[&str]) -> Result<ChatOutcome, EngineError> {
    let usage = || EngineError::validation("usage: /roll NdM");
    let spec = args.first().ok_or_else(usage)?;
    let (dice_str, sides_str) = spec.split_once(['d', 'D']).ok_or_else(usage)?;
    let dice: u32 = dice_str.parse().map_err(|_| usage())?;
    let sides: u32 = sides_str.parse().map_err(|_| usage())?;
    if dice == 0 || sides == 0 {
        return Err(usage());
    }

    let dice = dice.min(MAX_DICE);
    let sides = sides.min(MAX_SIDES);

    // ThreadRng is not Send; keep it scoped so it is gone before the await.
    let values: Vec<u32> = {
        let mut rng = rand::rng();
        (0..dice).map(|_| rng.random_range(1..=sides)).collect()
    };
    let total: u64 = values.iter().map(|v| u64::from(*v)).sum();
    let list: Vec<String> = values.iter().map(u32::to_string).collect();
    let text = format!("Rolled {dice}d{sides} = {total} ({})", list.join(", "));

    Ok(ChatOutcome::System(store_system(state, board_id, actor, "roll", text).await?))
}

async fn history(state: &AppState, board_id: &str, actor: &Actor, args: &[&str]) -> Result<ChatOutcome, EngineError> {
    let (row, col) = parse_coords(args, "/history row col")?;
    let entries = state
        .stores
        .history
        .query(board_id, row, col, HISTORY_DISPLAY_LIMIT, 0)
        .await?;

    let text = if entries.is_empty() {
        format!("No history for ({row},{col}).")
    } else {
        let lines: Vec<String> = entries
            .iter()
            .map(|e| {
                let mark = if e.marked { "[x]" } else { "[ ]" };
                format!("{mark} \"{}\" by {}", e.value, e.actor)
            })
            .collect();
        format!("History for ({row},{col}): {}", lines.join("; "))
    };

    Ok(ChatOutcome::System(store_system(state, board_id, actor, "history", text).await?))
}

async fn clear(state: &AppState, board_id: &str, actor: &Actor, args: &[&str]) -> Result<ChatOutcome, EngineError> {
    match args.first().copied() {
        Some("all") => {
            if actor.identity.is_anonymous() {
                return Err(EngineError::permission("clearing all chat requires a signed-in user"));
            }
            let removed = state.stores.chat.clear_board(board_id).await?;
            info!(%board_id, removed, "chat: cleared all");
            Ok(ChatOutcome::ChatCleared { scope: ClearScope::All, removed })
        }
        Some("my") => {
            let removed = state.stores.chat.clear_actor(board_id, &actor.identity.key()).await?;
            info!(%board_id, removed, "chat: cleared own");
            Ok(ChatOutcome::ChatCleared { scope: ClearScope::Mine, removed })
        }
        _ => {
            // Cell form: /clear row col blanks and unmarks one cell.
            let (row, col) = parse_coords(args, "/clear all|my|row col")?;
            let patch = CellPatch { value: Some(String::new()), marked: Some(false), kind: Some(CellKind::Text) };
            let cell = mutation::update_cell(state, board_id, row, col, patch, actor).await?;
            Ok(ChatOutcome::CellResult { message: None, cell })
        }
    }
}

// =============================================================================
// MENTIONS
// =============================================================================

/// Extract deduplicated `@name` tokens. A token is the delimiter followed by
/// one or more alphanumeric/underscore characters.
#[must_use]
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut prev_is_word = false;

    for (i, c) in text.char_indices() {
        if c == MENTION_DELIMITER && !prev_is_word {
            let rest = &text[i + c.len_utf8()..];
            let token: String = rest
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect();
            if !token.is_empty() && !out.contains(&token) {
                out.push(token);
            }
        }
        prev_is_word = c.is_ascii_alphanumeric() || c == '_';
    }
    out
}

/// Raise a notification for each mentioned name that resolves to a current
/// room member with mentions enabled, skipping the sender.
async fn fan_out_mentions(state: &AppState, board_id: &str, actor: &Actor, mentions: &[String], text: &str) {
    if mentions.is_empty() {
        return;
    }

    let members: Vec<uuid::Uuid> = {
        let rooms = state.rooms.read().await;
        rooms
            .get(board_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default()
    };

    let mut targets = Vec::new();
    {
        let sessions = state.sessions.read().await;
        for connection_id in members {
            let Some(session) = sessions.get(&connection_id) else {
                continue;
            };
            if !session.mentions_enabled || session.identity == actor.identity {
                continue;
            }
            let Some(user_id) = session.identity.user_id() else {
                continue;
            };
            let matched = mentions
                .iter()
                .any(|m| m.eq_ignore_ascii_case(&session.display_name));
            if matched && !targets.contains(&user_id) {
                targets.push(user_id);
            }
        }
    }

    for user_id in targets {
        notify::mention(state, user_id, board_id, &actor.display_name, text).await;
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn parse_coords(args: &[&str], usage: &str) -> Result<(u32, u32), EngineError> {
    let err = || EngineError::validation(format!("usage: {usage}"));
    let row: u32 = args.first().ok_or_else(err)?.parse().map_err(|_| err())?;
    let col: u32 = args.get(1).ok_or_else(err)?.parse().map_err(|_| err())?;
    Ok((row, col))
}

fn build_message(
    board_id: &str,
    actor: &Actor,
    text: String,
    command: Option<&str>,
    mentions: Vec<String>,
) -> ChatMessage {
    ChatMessage {
        id: uuid::Uuid::new_v4(),
        board_id: board_id.to_string(),
        actor: actor.identity.key(),
        actor_name: actor.display_name.clone(),
        text,
        command: command.map(String::from),
        mentions,
        ts: now_ms(),
    }
}

async fn store_system(
    state: &AppState,
    board_id: &str,
    actor: &Actor,
    command: &str,
    text: String,
) -> Result<ChatMessage, EngineError> {
    let message = build_message(board_id, actor, text, Some(command), Vec::new());
    state.stores.chat.append(&message).await?;
    Ok(message)
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
