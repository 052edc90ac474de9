//! gridline: rules engine and competitive rating core for a connect-N board game
//!
//! The crate is split into four layers:
//! - `engine`: pure match state machine (board, move legality, win/draw
//!   detection, turn-clock expiry). No storage, no clocks of its own.
//! - `rating`: Elo settlement math and head-to-head counters.
//! - `storage`: SQLite persistence with optimistic revision checks and a
//!   transactional, idempotent round finalizer.
//! - `service`: room lifecycle and the move/timeout/resign/rematch handlers
//!   that tie the engine to storage.

pub mod engine;
pub mod rating;
pub mod service;
pub mod storage;
