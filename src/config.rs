//! Deployment configuration.
//!
//! DESIGN
//! ======
//! Everything is resolved from environment variables exactly once at process
//! start and injected by handle. In particular the deployment `Mode` is a
//! static two-state setting with no runtime transition; components receive
//! it at construction instead of re-reading the environment per call.

use std::time::Duration;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_UNIFIED_BOARD_ID: &str = "unified";
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_CACHE_MAX_AGE_SECS: u64 = 30;
const DEFAULT_CACHE_CAPACITY: usize = 128;
const DEFAULT_CACHE_MAX_ENTRY_BYTES: usize = 64 * 1024;

// =============================================================================
// MODE
// =============================================================================

/// Deployment-wide board mode, fixed at startup.
///
/// UNIFIED serves one shared board and restricts the externally reachable
/// command surface to an allow-list. INDIVIDUAL serves per-owner boards with
/// the full command set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Unified,
    Individual,
}

impl Mode {
    /// Parse from the `BOARD_MODE` env value. Unknown values fall back to
    /// INDIVIDUAL, the permissive default.
    #[must_use]
    pub fn from_env_value(value: &str) -> Self {
        if value.eq_ignore_ascii_case("unified") {
            Mode::Unified
        } else {
            Mode::Individual
        }
    }

    /// Whether a chat command may be dispatched under this mode.
    ///
    /// UNIFIED allows only the cell-mutation allow-list; everything else
    /// fails with a permission error before any state change.
    #[must_use]
    pub fn allows_command(self, name: &str) -> bool {
        match self {
            Mode::Individual => true,
            Mode::Unified => matches!(name, "set" | "clear" | "mark" | "unmark"),
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Unified => "unified",
            Mode::Individual => "individual",
        }
    }
}

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub port: u16,
    /// The single logical board id every lookup resolves to in UNIFIED mode.
    pub unified_board_id: String,
    /// Idle connections are dropped after this long without inbound traffic.
    pub idle_timeout: Duration,
    pub cache_max_age: Duration,
    pub cache_capacity: usize,
    pub cache_max_entry_bytes: usize,
}

impl Config {
    #[must_use]
    pub fn from_env() -> Self {
        let mode = std::env::var("BOARD_MODE")
            .map(|v| Mode::from_env_value(&v))
            .unwrap_or(Mode::Individual);

        Self {
            mode,
            port: env_parse("PORT", DEFAULT_PORT),
            unified_board_id: std::env::var("UNIFIED_BOARD_ID")
                .unwrap_or_else(|_| DEFAULT_UNIFIED_BOARD_ID.into()),
            idle_timeout: Duration::from_secs(env_parse("IDLE_TIMEOUT_SECS", DEFAULT_IDLE_TIMEOUT_SECS)),
            cache_max_age: Duration::from_secs(env_parse("CACHE_MAX_AGE_SECS", DEFAULT_CACHE_MAX_AGE_SECS)),
            cache_capacity: env_parse("CACHE_CAPACITY", DEFAULT_CACHE_CAPACITY),
            cache_max_entry_bytes: env_parse("CACHE_MAX_ENTRY_BYTES", DEFAULT_CACHE_MAX_ENTRY_BYTES),
        }
    }

    /// Defaults with an explicit mode. Used by tests and the dev fallback.
    #[must_use]
    pub fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            port: DEFAULT_PORT,
            unified_board_id: DEFAULT_UNIFIED_BOARD_ID.into(),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            cache_max_age: Duration::from_secs(DEFAULT_CACHE_MAX_AGE_SECS),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_max_entry_bytes: DEFAULT_CACHE_MAX_ENTRY_BYTES,
        }
    }
}

fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
