//! Engine error kinds
//!
//! Most failure conditions in this crate are expected and handled
//! internally (a parse stage missing, an extraction coming back empty,
//! one backend call failing). Only whole-pipeline terminal states reach
//! the caller, and they carry a kind so the CLI can map them to distinct
//! exit codes instead of string-matching messages.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// All four parser recovery stages were exhausted. The reviewer
    /// output is unusable; this must never be read as "code is valid".
    #[error("reviewer output unusable after {stages} recovery stages: {last_error}")]
    ParseFailure { stages: usize, last_error: String },

    /// No plausible code could be extracted from a reply. Treated as a
    /// no-op repair attempt by callers, never a crash.
    #[error("no plausible code found in model reply")]
    ExtractionEmpty,

    /// Transport failure or timeout talking to the model backend.
    #[error("model backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Every repair attempt was consumed without an accepted fix.
    #[error("repair exhausted after {attempts} attempts")]
    RepairExhausted { attempts: u32 },
}

impl EngineError {
    /// Exit code for the CLI surface. Parse failure and backend
    /// unreachability are the only exit-code-worthy kinds.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineError::ParseFailure { .. } => 2,
            EngineError::BackendUnavailable(_) => 3,
            EngineError::ExtractionEmpty | EngineError::RepairExhausted { .. } => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_distinguish_terminal_kinds() {
        let parse = EngineError::ParseFailure {
            stages: 4,
            last_error: "expected value".to_string(),
        };
        let backend = EngineError::BackendUnavailable("timeout".to_string());
        assert_ne!(parse.exit_code(), backend.exit_code());
    }

    #[test]
    fn test_display_mentions_kind() {
        let err = EngineError::RepairExhausted { attempts: 2 };
        assert!(err.to_string().contains("2 attempts"));
    }
}
