//! Pure rules engine for connect-N matches
//!
//! This module provides:
//! - Board representation and win detection (`board`)
//! - Ruleset validation and built-in presets (`config`)
//! - The match state machine: move application, draw detection, and
//!   turn-clock expiry (`state`)
//!
//! Everything here is side-effect free. Each function reads an immutable
//! input state and produces a new state plus a result value, so any number
//! of concurrent callers can invoke it without coordination.

pub mod board;
pub mod config;
pub mod state;

pub use board::{Board, Symbol};
pub use config::{preset_by_id, ConfigError, GameConfig, GamePreset, GAME_PRESETS};
pub use state::{
    apply_move, apply_move_token, is_turn_expired, resolve_timeout, MatchState, MatchStatus,
    MoveCommand, MoveEvent, MoveOutcome, MoveRejection, Seats,
};
