// SPDX-License-Identifier: AGPL-3.0

//! Logging and diagnostic utilities
//!
//! Thin layer over `tracing`: subscriber setup keyed on the `-v` count,
//! stable warning codes, and de-duplication of repeated coverage warnings.

use once_cell::sync::Lazy;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use tracing_subscriber::EnvFilter;

/// Error codes for warnings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ParsingError,
    InternalError,
    UnsupportedOpcode,
    LoopSynthesis,
    SolverError,
    ExplorationLimit,
    UnresolvedJump,
    RankingFunction,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCode::ParsingError => "parsing-error",
            ErrorCode::InternalError => "internal-error",
            ErrorCode::UnsupportedOpcode => "unsupported-opcode",
            ErrorCode::LoopSynthesis => "loop-synthesis",
            ErrorCode::SolverError => "solver-error",
            ErrorCode::ExplorationLimit => "exploration-limit",
            ErrorCode::UnresolvedJump => "unresolved-jump",
            ErrorCode::RankingFunction => "ranking-function",
        }
    }
}

/// Map a `-v` count to a default filter directive
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber. `RUST_LOG` takes precedence over the
/// verbosity count. Calling this twice is harmless.
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_for_verbosity(verbosity)));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Logger state for tracking unique messages
static UNIQUE_MESSAGES: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn messages() -> MutexGuard<'static, HashSet<String>> {
    UNIQUE_MESSAGES
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Check if a message has been logged (for unique logging)
pub fn is_logged(message: &str) -> bool {
    messages().contains(message)
}

/// Mark a message as logged; returns true the first time
fn mark_logged(message: &str) -> bool {
    messages().insert(message.to_string())
}

/// Log a warning with an error code
pub fn warn_code(error_code: ErrorCode, msg: &str) {
    tracing::warn!(code = error_code.code(), "{}", msg);
}

/// Log a warning once per distinct message
pub fn warn_once(error_code: ErrorCode, msg: &str) {
    if mark_logged(msg) {
        warn_code(error_code, msg);
    }
}

/// Clear all logged messages (useful for testing)
pub fn clear_logged_messages() {
    messages().clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_error_codes() {
        let codes = vec![
            ErrorCode::ParsingError,
            ErrorCode::InternalError,
            ErrorCode::UnsupportedOpcode,
            ErrorCode::LoopSynthesis,
            ErrorCode::SolverError,
            ErrorCode::ExplorationLimit,
            ErrorCode::UnresolvedJump,
            ErrorCode::RankingFunction,
        ];

        let unique: HashSet<_> = codes.iter().map(|c| c.code()).collect();
        assert_eq!(unique.len(), codes.len());
        for code in codes {
            assert!(!code.code().contains(' '));
        }
    }

    #[test]
    fn test_level_for_verbosity() {
        assert_eq!(level_for_verbosity(0), "warn");
        assert_eq!(level_for_verbosity(1), "info");
        assert_eq!(level_for_verbosity(2), "debug");
        assert_eq!(level_for_verbosity(7), "trace");
    }

    #[test]
    fn test_warn_once() {
        let msg = "warn once message for logs test";
        assert!(!is_logged(msg));

        warn_once(ErrorCode::UnsupportedOpcode, msg);
        assert!(is_logged(msg));

        // Second call is a no-op
        warn_once(ErrorCode::UnsupportedOpcode, msg);
        assert!(is_logged(msg));

        clear_logged_messages();
        assert!(!is_logged(msg));
    }


    #[test]
    fn test_init_twice() {
        init(0);
        init(3);
    }
}
