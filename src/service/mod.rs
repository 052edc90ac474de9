//! Match orchestration on top of the engine and storage layers
//!
//! This module provides:
//! - Room lifecycle: create with a generated or custom code, join, rejoin
//! - Move handling that persists engine transitions and logs each move
//! - Turn-clock polling, resignation, and the two-step rematch handshake
//! - Rating queries (player, leaderboard, head-to-head, round events)
//!
//! Every entry point takes an explicit `now_ms` so callers control the
//! clock; `now_ms()` supplies wall time for production use. Concurrent
//! writers are serialized by the storage layer's revision check, and round
//! scoring is idempotent, so a move racing a timeout poll settles ratings
//! exactly once.

use rand::Rng;
use std::fmt;

use crate::engine::{
    self, ConfigError, GameConfig, MatchState, MatchStatus, MoveCommand, MoveEvent, MoveOutcome,
    MoveRejection, Symbol,
};
use crate::rating::{HeadToHead, PlayerRating, RatingEvent, RatingParams};
use crate::storage::{MatchRecord, MoveRecord, PlayerHistoryEntry, Storage, StorageError};

const ROOM_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ROOM_CODE_LEN: usize = 6;
const ROOM_CODE_MIN_LEN: usize = 3;
const ROOM_CODE_MAX_LEN: usize = 20;
const GENERATE_ATTEMPTS: usize = 5;

/// Errors surfaced by the service layer.
#[derive(Debug)]
pub enum ServiceError {
    Storage(StorageError),
    /// A concurrent writer updated the match first; retry with fresh state.
    Conflict { match_id: i64 },
    MatchNotFound { match_id: i64 },
    RoomNotFound { room_code: String },
    RoomFull { room_code: String },
    RoomCodeTaken { room_code: String },
    InvalidRoomCode { room_code: String },
    InvalidConfig(ConfigError),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Storage(e) => write!(f, "storage error: {}", e),
            ServiceError::Conflict { match_id } => {
                write!(f, "match {} was updated concurrently", match_id)
            }
            ServiceError::MatchNotFound { match_id } => write!(f, "no match with id {}", match_id),
            ServiceError::RoomNotFound { room_code } => write!(f, "no room {}", room_code),
            ServiceError::RoomFull { room_code } => write!(f, "room {} is full", room_code),
            ServiceError::RoomCodeTaken { room_code } => {
                write!(f, "room code {} is already in use", room_code)
            }
            ServiceError::InvalidRoomCode { room_code } => {
                write!(f, "invalid room code {:?}", room_code)
            }
            ServiceError::InvalidConfig(e) => write!(f, "invalid config: {}", e),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<StorageError> for ServiceError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::RevisionConflict { match_id, .. } => ServiceError::Conflict { match_id },
            other => ServiceError::Storage(other),
        }
    }
}

impl From<ConfigError> for ServiceError {
    fn from(e: ConfigError) -> Self {
        ServiceError::InvalidConfig(e)
    }
}

/// A freshly opened room, host seated as X, waiting for an opponent.
#[derive(Debug, Clone)]
pub struct RoomCreated {
    pub record: MatchRecord,
}

/// Result of joining a room, including which seat the player holds.
#[derive(Debug, Clone)]
pub struct RoomJoined {
    pub record: MatchRecord,
    pub symbol: Symbol,
}

/// What happened to a submitted move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveReport {
    Accepted { event: MoveEvent, status: MatchStatus },
    Rejected { reason: MoveRejection },
    NotSeated,
}

/// Result of a turn-clock poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeoutReport {
    /// The clock had expired; the match is now terminal.
    Expired { winner: Symbol },
    NotActive,
    StillRunning { remaining_ms: i64 },
}

/// Result of a resignation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResignReport {
    Resigned { winner: Symbol },
    NotActive,
    NotSeated,
}

/// Result of a rematch request or acceptance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RematchReport {
    /// The flag is set; the opponent may accept.
    Requested { by: Symbol },
    /// A new round is live.
    Started { round_number: i64 },
    NotTerminal,
    MissingOpponent,
    NotSeated,
    AlreadyRequested { by: Symbol },
    /// Accepting your own request is refused.
    OwnRequest,
    NotRequested,
}

/// Wall clock in epoch milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The front door for match play: owns the storage handle and the rating
/// tuning used when rounds settle.
pub struct MatchService {
    storage: Storage,
    params: RatingParams,
}

impl MatchService {
    /// Open the on-disk database with default rating parameters.
    pub fn open() -> Result<MatchService, ServiceError> {
        Ok(MatchService::with_storage(Storage::open()?))
    }

    pub fn with_storage(storage: Storage) -> MatchService {
        MatchService {
            storage,
            params: RatingParams::default(),
        }
    }

    pub fn with_params(mut self, params: RatingParams) -> MatchService {
        self.params = params;
        self
    }

    // === Rooms ===

    /// Open a room. The host takes the X seat and the match waits for an
    /// opponent. A requested code is normalized and must be free; with no
    /// request a fresh 6-character code is generated.
    pub fn create_room(
        &mut self,
        host_id: &str,
        config: GameConfig,
        room_code: Option<&str>,
        now_ms: i64,
    ) -> Result<RoomCreated, ServiceError> {
        config.validate()?;

        let mut state = MatchState::new(config, now_ms)?;
        state.status = MatchStatus::Waiting;
        state.seats.x = Some(host_id.to_string());

        if let Some(requested) = room_code {
            let code = normalize_room_code(requested)?;
            let record = match self.storage.insert_match(&code, &state, now_ms) {
                Ok(record) => record,
                Err(e) if is_unique_violation(&e) => {
                    return Err(ServiceError::RoomCodeTaken { room_code: code })
                }
                Err(e) => return Err(e.into()),
            };
            return Ok(RoomCreated { record });
        }

        // Collisions are vanishingly rare at 36^6 codes; a handful of
        // retries covers them.
        let mut last_code = String::new();
        for _ in 0..GENERATE_ATTEMPTS {
            let code = generate_room_code();
            match self.storage.insert_match(&code, &state, now_ms) {
                Ok(record) => return Ok(RoomCreated { record }),
                Err(e) if is_unique_violation(&e) => last_code = code,
                Err(e) => return Err(e.into()),
            }
        }

        Err(ServiceError::RoomCodeTaken {
            room_code: last_code,
        })
    }

    /// Join (or rejoin) a room by code. Filling the open O seat activates
    /// the match and starts X's clock; a seated player rejoining gets
    /// their existing seat back.
    pub fn join_room(
        &mut self,
        player_id: &str,
        room_code: &str,
        now_ms: i64,
    ) -> Result<RoomJoined, ServiceError> {
        let code = normalize_room_code(room_code)?;
        let mut record = self
            .storage
            .match_by_room_code(&code)?
            .ok_or(ServiceError::RoomNotFound { room_code: code })?;

        if let Some(symbol) = record.state.seats.symbol_of(player_id) {
            return Ok(RoomJoined { record, symbol });
        }

        if record.state.status != MatchStatus::Waiting || record.state.seats.o.is_some() {
            return Err(ServiceError::RoomFull {
                room_code: record.room_code,
            });
        }

        record.state.seats.o = Some(player_id.to_string());
        record.state.status = MatchStatus::Active;
        record.state.turn_deadline_at = now_ms + record.state.config.turn_time_ms();

        let record = self.storage.update_match(&record, now_ms)?;
        Ok(RoomJoined {
            record,
            symbol: Symbol::O,
        })
    }

    /// Load a match by id.
    pub fn match_record(&self, match_id: i64) -> Result<MatchRecord, ServiceError> {
        self.load(match_id)
    }

    /// Load a match by room code.
    pub fn match_by_room_code(&self, room_code: &str) -> Result<MatchRecord, ServiceError> {
        let code = normalize_room_code(room_code)?;
        self.storage
            .match_by_room_code(&code)?
            .ok_or(ServiceError::RoomNotFound { room_code: code })
    }

    // === Play ===

    /// Submit a move for a seated player.
    ///
    /// The engine decides legality; this method persists whatever state the
    /// engine hands back. A move that arrives after the deadline persists
    /// the forced timeout and settles the round, so the caller still sees
    /// the rejection but the match is already terminal.
    pub fn make_move(
        &mut self,
        match_id: i64,
        player_id: &str,
        cell_index: i64,
        now_ms: i64,
    ) -> Result<MoveReport, ServiceError> {
        let mut record = self.load(match_id)?;

        let symbol = match record.state.seats.symbol_of(player_id) {
            Some(symbol) => symbol,
            None => return Ok(MoveReport::NotSeated),
        };

        let before = record.state.clone();
        let outcome = engine::apply_move(
            &record.state,
            MoveCommand {
                cell_index,
                symbol,
                now_ms,
            },
        );

        match outcome {
            MoveOutcome::Rejected {
                reason: MoveRejection::TurnExpired,
                state,
            } => {
                record.state = state;
                record.rematch_requested_by = None;
                let record = self.storage.update_match(&record, now_ms)?;
                self.finalize(&record, now_ms)?;
                Ok(MoveReport::Rejected {
                    reason: MoveRejection::TurnExpired,
                })
            }
            MoveOutcome::Rejected { reason, .. } => Ok(MoveReport::Rejected { reason }),
            MoveOutcome::Accepted { event, state } => {
                record.state = state;
                record.last_move_index = Some(cell_index);
                if record.state.status.is_terminal() {
                    record.rematch_requested_by = None;
                }
                let record = self.storage.update_match(&record, now_ms)?;

                self.storage.insert_move(&MoveRecord {
                    match_id,
                    round_number: record.round_number,
                    turn_number: before.turn_number,
                    player_id: player_id.to_string(),
                    symbol,
                    cell_index,
                    played_at: now_ms,
                    deadline_at: before.turn_deadline_at,
                })?;

                if record.state.status.is_terminal() {
                    self.finalize(&record, now_ms)?;
                }
                Ok(MoveReport::Accepted {
                    event,
                    status: record.state.status,
                })
            }
        }
    }

    /// Poll the turn clock. Past the deadline this transitions the match
    /// to timeout, persists it, and settles the round.
    pub fn tick_timeout(
        &mut self,
        match_id: i64,
        now_ms: i64,
    ) -> Result<TimeoutReport, ServiceError> {
        let mut record = self.load(match_id)?;

        if record.state.status != MatchStatus::Active {
            return Ok(TimeoutReport::NotActive);
        }

        if !engine::is_turn_expired(&record.state, now_ms) {
            return Ok(TimeoutReport::StillRunning {
                remaining_ms: record.state.turn_deadline_at - now_ms,
            });
        }

        let winner = record.state.next_player.opponent();
        record.state = engine::resolve_timeout(&record.state, now_ms);
        record.rematch_requested_by = None;
        let record = self.storage.update_match(&record, now_ms)?;
        self.finalize(&record, now_ms)?;

        Ok(TimeoutReport::Expired { winner })
    }

    /// Resign an active match; the opponent wins and the round settles.
    pub fn resign(
        &mut self,
        match_id: i64,
        player_id: &str,
        now_ms: i64,
    ) -> Result<ResignReport, ServiceError> {
        let mut record = self.load(match_id)?;

        let symbol = match record.state.seats.symbol_of(player_id) {
            Some(symbol) => symbol,
            None => return Ok(ResignReport::NotSeated),
        };

        if record.state.status != MatchStatus::Active {
            return Ok(ResignReport::NotActive);
        }

        let winner = symbol.opponent();
        record.state.status = MatchStatus::Resigned;
        record.state.winner = Some(winner);
        record.rematch_requested_by = None;
        let record = self.storage.update_match(&record, now_ms)?;
        self.finalize(&record, now_ms)?;

        Ok(ResignReport::Resigned { winner })
    }

    // === Rematch ===

    /// Flag a rematch request on a finished round. The opponent accepts
    /// with `accept_rematch`.
    pub fn request_rematch(
        &mut self,
        match_id: i64,
        player_id: &str,
        now_ms: i64,
    ) -> Result<RematchReport, ServiceError> {
        let mut record = self.load(match_id)?;

        let symbol = match record.state.seats.symbol_of(player_id) {
            Some(symbol) => symbol,
            None => return Ok(RematchReport::NotSeated),
        };

        if !record.state.status.is_terminal() {
            return Ok(RematchReport::NotTerminal);
        }
        if !record.state.seats.both_assigned() {
            return Ok(RematchReport::MissingOpponent);
        }
        if let Some(by) = record.rematch_requested_by {
            return Ok(RematchReport::AlreadyRequested { by });
        }

        record.rematch_requested_by = Some(symbol);
        self.storage.update_match(&record, now_ms)?;
        Ok(RematchReport::Requested { by: symbol })
    }

    /// Accept the opponent's pending rematch request: reset the board,
    /// bump the round number, and start a fresh active round with X to
    /// move.
    pub fn accept_rematch(
        &mut self,
        match_id: i64,
        player_id: &str,
        now_ms: i64,
    ) -> Result<RematchReport, ServiceError> {
        let mut record = self.load(match_id)?;

        let symbol = match record.state.seats.symbol_of(player_id) {
            Some(symbol) => symbol,
            None => return Ok(RematchReport::NotSeated),
        };

        if !record.state.status.is_terminal() {
            return Ok(RematchReport::NotTerminal);
        }

        match record.rematch_requested_by {
            None => return Ok(RematchReport::NotRequested),
            Some(by) if by == symbol => return Ok(RematchReport::OwnRequest),
            Some(_) => {}
        }

        let seats = record.state.seats.clone();
        let mut state = MatchState::new(record.state.config.clone(), now_ms)?;
        state.seats = seats;

        record.state = state;
        record.round_number += 1;
        record.rematch_requested_by = None;
        record.last_move_index = None;
        let record = self.storage.update_match(&record, now_ms)?;

        Ok(RematchReport::Started {
            round_number: record.round_number,
        })
    }

    /// The move log of one round, in turn order.
    pub fn moves_for_round(
        &self,
        match_id: i64,
        round_number: i64,
    ) -> Result<Vec<MoveRecord>, ServiceError> {
        Ok(self.storage.moves_for_round(match_id, round_number)?)
    }

    // === Ratings ===

    pub fn player_rating(&self, player_id: &str) -> Result<Option<PlayerRating>, ServiceError> {
        Ok(self.storage.rating(player_id)?)
    }

    pub fn leaderboard(&self, limit: i64) -> Result<Vec<PlayerRating>, ServiceError> {
        Ok(self.storage.leaderboard(limit)?)
    }

    pub fn head_to_head(&self, a: &str, b: &str) -> Result<Option<HeadToHead>, ServiceError> {
        Ok(self.storage.head_to_head(a, b)?)
    }

    pub fn round_rating_events(
        &self,
        match_id: i64,
        round_number: i64,
    ) -> Result<Vec<RatingEvent>, ServiceError> {
        Ok(self.storage.rating_events_for_round(match_id, round_number)?)
    }

    /// A player's most recent finalized rounds, newest first.
    pub fn player_history(
        &self,
        player_id: &str,
        limit: i64,
    ) -> Result<Vec<PlayerHistoryEntry>, ServiceError> {
        Ok(self.storage.player_history(player_id, limit)?)
    }

    /// Soft-delete a finished match from history listings.
    pub fn archive_match(&mut self, match_id: i64, now_ms: i64) -> Result<bool, ServiceError> {
        self.load(match_id)?;
        Ok(self.storage.archive_match(match_id, now_ms)?)
    }

    // Private helpers

    fn load(&self, match_id: i64) -> Result<MatchRecord, ServiceError> {
        self.storage
            .match_by_id(match_id)?
            .ok_or(ServiceError::MatchNotFound { match_id })
    }

    fn finalize(&mut self, record: &MatchRecord, now_ms: i64) -> Result<(), ServiceError> {
        self.storage.finalize_round(
            record.id,
            record.round_number,
            &record.state.seats,
            record.state.status,
            record.state.winner,
            &self.params,
            now_ms,
        )?;
        Ok(())
    }
}

/// Uppercase and validate a caller-supplied room code: 3..=20 characters,
/// A-Z, 0-9, and hyphens.
fn normalize_room_code(raw: &str) -> Result<String, ServiceError> {
    let code = raw.trim().to_ascii_uppercase();

    let valid_len = (ROOM_CODE_MIN_LEN..=ROOM_CODE_MAX_LEN).contains(&code.len());
    let valid_chars = code
        .chars()
        .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '-');

    if !valid_len || !valid_chars {
        return Err(ServiceError::InvalidRoomCode {
            room_code: raw.to_string(),
        });
    }
    Ok(code)
}

fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())] as char)
        .collect()
}

fn is_unique_violation(error: &StorageError) -> bool {
    matches!(
        error,
        StorageError::Database(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
