//! Persistent match and rating storage using SQLite (rusqlite)
//!
//! This module provides:
//! - OS-standard data directory location (via `directories` crate)
//! - SQLite database with schema versioning
//! - Match records updated through an optimistic revision check, so at most
//!   one writer's transition survives a read-modify-write race
//! - A transactional, idempotent round finalizer: ratings, audit events,
//!   and head-to-head counters commit together or not at all

use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::PathBuf;

use crate::engine::{Board, GameConfig, MatchState, MatchStatus, Seats, Symbol};
use crate::rating::{
    settle_round, HeadToHead, PlayerRating, RatingAdjustment, RatingEvent, RatingParams,
    RoundResult,
};

/// Current schema version. Bump this when making schema changes.
/// Version history:
/// - v1: Initial schema with matches, ratings, rating_events, h2h_stats,
///   and moves tables
const SCHEMA_VERSION: u32 = 1;

/// Errors that can occur during storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// Database error from SQLite
    Database(rusqlite::Error),
    /// Could not determine data directory
    NoDataDirectory,
    /// Schema version mismatch (future version)
    FutureSchemaVersion { found: u32, supported: u32 },
    /// Failed to create data directory
    CreateDirFailed(std::io::Error),
    /// Migration failed
    MigrationFailed { from: u32, to: u32, reason: String },
    /// A concurrent writer updated the match first
    RevisionConflict { match_id: i64, revision: i64 },
    /// A stored row failed to decode back into engine types
    CorruptRecord { match_id: i64, reason: String },
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Database(e) => write!(f, "database error: {}", e),
            StorageError::NoDataDirectory => write!(f, "could not determine data directory"),
            StorageError::FutureSchemaVersion { found, supported } => {
                write!(
                    f,
                    "database schema version {} is newer than supported version {}",
                    found, supported
                )
            }
            StorageError::CreateDirFailed(e) => write!(f, "failed to create data directory: {}", e),
            StorageError::MigrationFailed { from, to, reason } => {
                write!(f, "migration from v{} to v{} failed: {}", from, to, reason)
            }
            StorageError::RevisionConflict { match_id, revision } => {
                write!(
                    f,
                    "match {} was updated concurrently (stale revision {})",
                    match_id, revision
                )
            }
            StorageError::CorruptRecord { match_id, reason } => {
                write!(f, "match {} failed to decode: {}", match_id, reason)
            }
        }
    }
}

impl std::error::Error for StorageError {}

impl From<rusqlite::Error> for StorageError {
    fn from(e: rusqlite::Error) -> Self {
        StorageError::Database(e)
    }
}

/// A persisted match: the engine state plus room bookkeeping that the
/// engine itself never reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRecord {
    pub id: i64,
    pub room_code: String,
    /// Current round; a rematch increments this and resets the state.
    pub round_number: i64,
    pub rematch_requested_by: Option<Symbol>,
    pub last_move_index: Option<i64>,
    /// Optimistic concurrency token; bumped on every update.
    pub revision: i64,
    /// Soft-delete marker; archived matches drop out of history queries.
    pub archived_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub state: MatchState,
}

/// One entry of a player's recent history: a finalized round seen from
/// that player's side, joined from the rating audit trail and the match
/// row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerHistoryEntry {
    pub match_id: i64,
    pub round_number: i64,
    pub room_code: String,
    pub opponent_id: String,
    pub result: RoundResult,
    pub elo_delta: i64,
    pub elo_after: i64,
    pub finished_at: i64,
}

/// One logged move, kept per round for history and replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRecord {
    pub match_id: i64,
    pub round_number: i64,
    pub turn_number: i64,
    pub player_id: String,
    pub symbol: Symbol,
    pub cell_index: i64,
    pub played_at: i64,
    /// The deadline that was in force when the move was played.
    pub deadline_at: i64,
}

/// The main storage handle for gridline data.
pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create the storage database.
    ///
    /// Uses OS-standard directories:
    /// - Linux: `$XDG_DATA_HOME/gridline/` or `~/.local/share/gridline/`
    /// - macOS: `~/Library/Application Support/gridline/`
    pub fn open() -> Result<Self, StorageError> {
        let data_dir = Self::data_dir()?;

        std::fs::create_dir_all(&data_dir).map_err(StorageError::CreateDirFailed)?;

        let db_path = data_dir.join("gridline.db");
        let conn = Connection::open(&db_path)?;

        let storage = Storage { conn };
        storage.initialize_schema()?;
        Ok(storage)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let storage = Storage { conn };
        storage.initialize_schema()?;
        Ok(storage)
    }

    /// Get the OS-standard data directory for gridline.
    pub fn data_dir() -> Result<PathBuf, StorageError> {
        ProjectDirs::from("", "", "gridline")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or(StorageError::NoDataDirectory)
    }

    // === Match records ===

    /// Insert a fresh match at revision 1 and round 1.
    pub fn insert_match(
        &self,
        room_code: &str,
        state: &MatchState,
        now_ms: i64,
    ) -> Result<MatchRecord, StorageError> {
        self.conn.execute(
            "INSERT INTO matches (room_code, size, win_length, turn_time_sec, preset_id, skin_id,
                                  status, board, player_x, player_o, next_player, winner,
                                  winning_line, round_number, turn_number, turn_deadline_at,
                                  rematch_requested_by, last_move_index, revision, archived_at,
                                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 1, ?14, ?15, NULL, NULL, 1, NULL, ?16, ?16)",
            params![
                room_code,
                state.config.size,
                state.config.win_length,
                state.config.turn_time_sec,
                state.config.preset_id,
                state.config.skin_id,
                state.status.as_str(),
                state.board.to_text(),
                state.seats.x,
                state.seats.o,
                state.next_player.as_str(),
                state.winner.map(Symbol::as_str),
                state.winning_line.as_deref().map(encode_line),
                state.turn_number,
                state.turn_deadline_at,
                now_ms,
            ],
        )?;

        let id = self.conn.last_insert_rowid();

        Ok(MatchRecord {
            id,
            room_code: room_code.to_string(),
            round_number: 1,
            rematch_requested_by: None,
            last_move_index: None,
            revision: 1,
            archived_at: None,
            created_at: now_ms,
            updated_at: now_ms,
            state: state.clone(),
        })
    }

    /// Load a match by id.
    pub fn match_by_id(&self, match_id: i64) -> Result<Option<MatchRecord>, StorageError> {
        self.query_match("SELECT * FROM matches WHERE id = ?1", params![match_id])
    }

    /// Load a match by its (already normalized) room code.
    pub fn match_by_room_code(&self, room_code: &str) -> Result<Option<MatchRecord>, StorageError> {
        self.query_match(
            "SELECT * FROM matches WHERE room_code = ?1",
            params![room_code],
        )
    }

    /// Write back a mutated match under an optimistic revision check.
    ///
    /// The update only lands if the stored revision still equals
    /// `record.revision`; otherwise a concurrent writer got there first and
    /// this returns `RevisionConflict`, leaving the row untouched. The
    /// config columns are never rewritten.
    pub fn update_match(
        &self,
        record: &MatchRecord,
        now_ms: i64,
    ) -> Result<MatchRecord, StorageError> {
        let state = &record.state;
        let affected = self.conn.execute(
            "UPDATE matches
             SET status = ?1, board = ?2, player_x = ?3, player_o = ?4, next_player = ?5,
                 winner = ?6, winning_line = ?7, round_number = ?8, turn_number = ?9,
                 turn_deadline_at = ?10, rematch_requested_by = ?11, last_move_index = ?12,
                 revision = revision + 1, updated_at = ?13
             WHERE id = ?14 AND revision = ?15",
            params![
                state.status.as_str(),
                state.board.to_text(),
                state.seats.x,
                state.seats.o,
                state.next_player.as_str(),
                state.winner.map(Symbol::as_str),
                state.winning_line.as_deref().map(encode_line),
                record.round_number,
                state.turn_number,
                state.turn_deadline_at,
                record.rematch_requested_by.map(Symbol::as_str),
                record.last_move_index,
                now_ms,
                record.id,
                record.revision,
            ],
        )?;

        if affected == 0 {
            return Err(StorageError::RevisionConflict {
                match_id: record.id,
                revision: record.revision,
            });
        }

        let mut updated = record.clone();
        updated.revision += 1;
        updated.updated_at = now_ms;
        Ok(updated)
    }

    /// Soft-delete a match so it stops appearing in history queries. The
    /// row itself stays; ratings already settled are untouched. Returns
    /// true if this call archived it, false if it already was.
    pub fn archive_match(&self, match_id: i64, now_ms: i64) -> Result<bool, StorageError> {
        let affected = self.conn.execute(
            "UPDATE matches SET archived_at = ?1 WHERE id = ?2 AND archived_at IS NULL",
            params![now_ms, match_id],
        )?;
        Ok(affected > 0)
    }

    // === Move log ===

    /// Append one move to the per-round log.
    pub fn insert_move(&self, record: &MoveRecord) -> Result<(), StorageError> {
        self.conn.execute(
            "INSERT INTO moves (match_id, round_number, turn_number, player_id, symbol,
                                cell_index, played_at, deadline_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.match_id,
                record.round_number,
                record.turn_number,
                record.player_id,
                record.symbol.as_str(),
                record.cell_index,
                record.played_at,
                record.deadline_at,
            ],
        )?;
        Ok(())
    }

    /// All moves of one round, in turn order.
    pub fn moves_for_round(
        &self,
        match_id: i64,
        round_number: i64,
    ) -> Result<Vec<MoveRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT match_id, round_number, turn_number, player_id, symbol, cell_index,
                    played_at, deadline_at
             FROM moves WHERE match_id = ?1 AND round_number = ?2 ORDER BY turn_number",
        )?;

        let rows = stmt.query_map(params![match_id, round_number], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, i64>(6)?,
                row.get::<_, i64>(7)?,
            ))
        })?;

        let mut moves = Vec::new();
        for row in rows {
            let (match_id, round_number, turn_number, player_id, symbol, cell_index, played_at, deadline_at) =
                row?;
            let symbol = Symbol::from_token(&symbol).ok_or_else(|| StorageError::CorruptRecord {
                match_id,
                reason: format!("unknown move symbol {:?}", symbol),
            })?;
            moves.push(MoveRecord {
                match_id,
                round_number,
                turn_number,
                player_id,
                symbol,
                cell_index,
                played_at,
                deadline_at,
            });
        }
        Ok(moves)
    }

    // === Ratings ===

    /// A player's rating record, if they have one.
    pub fn rating(&self, player_id: &str) -> Result<Option<PlayerRating>, StorageError> {
        read_rating(&self.conn, player_id)
    }

    /// Top rated players, best first. `limit` is clamped to 1..=100.
    pub fn leaderboard(&self, limit: i64) -> Result<Vec<PlayerRating>, StorageError> {
        let limit = limit.clamp(1, 100);
        let mut stmt = self.conn.prepare(
            "SELECT player_id, elo, games_played, provisional_until, updated_at
             FROM ratings ORDER BY elo DESC, player_id LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], rating_from_row)?;

        let mut ratings = Vec::new();
        for row in rows {
            ratings.push(row?);
        }
        Ok(ratings)
    }

    /// Head-to-head counters for a pair of players, in either order.
    pub fn head_to_head(&self, a: &str, b: &str) -> Result<Option<HeadToHead>, StorageError> {
        let (low, high) = HeadToHead::pair(a, b);
        read_head_to_head(&self.conn, &low, &high)
    }

    /// Audit events for one finalized round, oldest first.
    pub fn rating_events_for_round(
        &self,
        match_id: i64,
        round_number: i64,
    ) -> Result<Vec<RatingEvent>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT match_id, round_number, player_id, before_elo, after_elo, delta, result, created_at
             FROM rating_events WHERE match_id = ?1 AND round_number = ?2
             ORDER BY created_at, player_id",
        )?;

        let rows = stmt.query_map(params![match_id, round_number], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, i64>(7)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (match_id, round_number, player_id, before_elo, after_elo, delta, result, created_at) =
                row?;
            let result =
                RoundResult::from_token(&result).ok_or_else(|| StorageError::CorruptRecord {
                    match_id,
                    reason: format!("unknown round result {:?}", result),
                })?;
            events.push(RatingEvent {
                match_id,
                round_number,
                player_id,
                before_elo,
                after_elo,
                delta,
                result,
                created_at,
            });
        }
        Ok(events)
    }

    /// A player's most recent finalized rounds, newest first, skipping
    /// archived matches. `limit` is clamped to 1..=100.
    pub fn player_history(
        &self,
        player_id: &str,
        limit: i64,
    ) -> Result<Vec<PlayerHistoryEntry>, StorageError> {
        let limit = limit.clamp(1, 100);
        let mut stmt = self.conn.prepare(
            "SELECT e.match_id, e.round_number, e.result, e.delta, e.after_elo, e.created_at,
                    m.room_code, m.player_x, m.player_o
             FROM rating_events e
             JOIN matches m ON m.id = e.match_id
             WHERE e.player_id = ?1 AND m.archived_at IS NULL
             ORDER BY e.created_at DESC, e.round_number DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![player_id, limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, Option<String>>(8)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (match_id, round_number, result, elo_delta, elo_after, finished_at, room_code, player_x, player_o) =
                row?;
            let corrupt = |reason: String| StorageError::CorruptRecord { match_id, reason };

            let result = RoundResult::from_token(&result)
                .ok_or_else(|| corrupt(format!("unknown round result {:?}", result)))?;
            let opponent = if player_x.as_deref() == Some(player_id) {
                player_o
            } else {
                player_x
            };
            let opponent_id =
                opponent.ok_or_else(|| corrupt("finalized round with an open seat".to_string()))?;

            entries.push(PlayerHistoryEntry {
                match_id,
                round_number,
                room_code,
                opponent_id,
                result,
                elo_delta,
                elo_after,
                finished_at,
            });
        }
        Ok(entries)
    }

    /// Score a terminal round: update both ratings, write both audit
    /// events, and bump the pair's head-to-head row in one transaction.
    ///
    /// Returns true if this call performed the finalization. It is a silent
    /// no-op (false) when the round already has rating events — the
    /// idempotency guard that keeps a move racing a timeout poll from
    /// double-scoring — and when the outcome is not scorable or either
    /// seat is still open.
    pub fn finalize_round(
        &mut self,
        match_id: i64,
        round_number: i64,
        seats: &Seats,
        status: MatchStatus,
        winner: Option<Symbol>,
        params: &RatingParams,
        now_ms: i64,
    ) -> Result<bool, StorageError> {
        if !status.is_terminal() {
            return Ok(false);
        }

        let (x_id, o_id) = match (&seats.x, &seats.o) {
            (Some(x), Some(o)) => (x.clone(), o.clone()),
            _ => return Ok(false),
        };

        let tx = self.conn.transaction()?;

        let already_scored: bool = tx.query_row(
            "SELECT COUNT(*) > 0 FROM rating_events WHERE match_id = ?1 AND round_number = ?2",
            params![match_id, round_number],
            |row| row.get(0),
        )?;
        if already_scored {
            return Ok(false);
        }

        let x_rating = read_or_seed_rating(&tx, &x_id, params, now_ms)?;
        let o_rating = read_or_seed_rating(&tx, &o_id, params, now_ms)?;

        let settlement = match settle_round(&x_rating, &o_rating, status, winner, params) {
            Some(settlement) => settlement,
            None => return Ok(false),
        };

        write_adjustment(&tx, &settlement.x, match_id, round_number, now_ms)?;
        write_adjustment(&tx, &settlement.o, match_id, round_number, now_ms)?;

        let winner_id = winner.and_then(|symbol| seats.player(symbol)).map(str::to_string);
        let (low, high) = HeadToHead::pair(&x_id, &o_id);
        let mut h2h = read_head_to_head(&tx, &low, &high)?
            .unwrap_or_else(|| HeadToHead::new(&x_id, &o_id, now_ms));
        h2h.record(winner_id.as_deref(), now_ms);

        tx.execute(
            "INSERT OR REPLACE INTO h2h_stats
                 (player_low_id, player_high_id, low_wins, high_wins, draws, last_played_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                h2h.player_low_id,
                h2h.player_high_id,
                h2h.low_wins,
                h2h.high_wins,
                h2h.draws,
                h2h.last_played_at,
            ],
        )?;

        tx.commit()?;
        Ok(true)
    }

    // Private helper methods

    fn query_match(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Option<MatchRecord>, StorageError> {
        let raw = self
            .conn
            .query_row(sql, args, |row| {
                Ok(RawMatch {
                    id: row.get("id")?,
                    room_code: row.get("room_code")?,
                    size: row.get("size")?,
                    win_length: row.get("win_length")?,
                    turn_time_sec: row.get("turn_time_sec")?,
                    preset_id: row.get("preset_id")?,
                    skin_id: row.get("skin_id")?,
                    status: row.get("status")?,
                    board: row.get("board")?,
                    player_x: row.get("player_x")?,
                    player_o: row.get("player_o")?,
                    next_player: row.get("next_player")?,
                    winner: row.get("winner")?,
                    winning_line: row.get("winning_line")?,
                    round_number: row.get("round_number")?,
                    turn_number: row.get("turn_number")?,
                    turn_deadline_at: row.get("turn_deadline_at")?,
                    rematch_requested_by: row.get("rematch_requested_by")?,
                    last_move_index: row.get("last_move_index")?,
                    revision: row.get("revision")?,
                    archived_at: row.get("archived_at")?,
                    created_at: row.get("created_at")?,
                    updated_at: row.get("updated_at")?,
                })
            })
            .optional()?;

        raw.map(RawMatch::decode).transpose()
    }

    fn initialize_schema(&self) -> Result<(), StorageError> {
        let current_version = self.get_schema_version()?;

        if current_version == 0 {
            self.create_schema_v1()?;
        } else if current_version < SCHEMA_VERSION {
            self.migrate_schema(current_version)?;
        } else if current_version > SCHEMA_VERSION {
            return Err(StorageError::FutureSchemaVersion {
                found: current_version,
                supported: SCHEMA_VERSION,
            });
        }

        Ok(())
    }

    fn get_schema_version(&self) -> Result<u32, StorageError> {
        let table_exists: bool = self.conn.query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='meta'",
            [],
            |row| row.get(0),
        )?;

        if !table_exists {
            return Ok(0);
        }

        let version: u32 = self
            .conn
            .query_row("SELECT schema_version FROM meta LIMIT 1", [], |row| {
                row.get(0)
            })
            .unwrap_or(0);

        Ok(version)
    }

    fn create_schema_v1(&self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            r#"
            -- Meta table: schema version bookkeeping
            CREATE TABLE meta (
                schema_version INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            -- Match records: engine state flattened into columns, plus room
            -- bookkeeping. The config columns never change after insert.
            CREATE TABLE matches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                room_code TEXT NOT NULL UNIQUE,
                size INTEGER NOT NULL,
                win_length INTEGER NOT NULL,
                turn_time_sec INTEGER NOT NULL,
                preset_id TEXT,
                skin_id TEXT,
                status TEXT NOT NULL,
                board TEXT NOT NULL,
                player_x TEXT,
                player_o TEXT,
                next_player TEXT NOT NULL,
                winner TEXT,
                winning_line TEXT,
                round_number INTEGER NOT NULL,
                turn_number INTEGER NOT NULL,
                turn_deadline_at INTEGER NOT NULL,
                rematch_requested_by TEXT,
                last_move_index INTEGER,
                revision INTEGER NOT NULL,
                archived_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            -- Per-player skill records, created lazily on first rated result
            CREATE TABLE ratings (
                player_id TEXT PRIMARY KEY,
                elo INTEGER NOT NULL,
                games_played INTEGER NOT NULL,
                provisional_until INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX idx_ratings_elo ON ratings (elo);

            -- Audit trail of Elo adjustments. The primary key doubles as the
            -- idempotency guard: one event per (match, round, player).
            CREATE TABLE rating_events (
                match_id INTEGER NOT NULL,
                round_number INTEGER NOT NULL,
                player_id TEXT NOT NULL,
                before_elo INTEGER NOT NULL,
                after_elo INTEGER NOT NULL,
                delta INTEGER NOT NULL,
                result TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (match_id, round_number, player_id)
            );

            CREATE INDEX idx_rating_events_player ON rating_events (player_id, created_at);

            -- One counter row per unordered player pair (canonical ordering)
            CREATE TABLE h2h_stats (
                player_low_id TEXT NOT NULL,
                player_high_id TEXT NOT NULL,
                low_wins INTEGER NOT NULL,
                high_wins INTEGER NOT NULL,
                draws INTEGER NOT NULL,
                last_played_at INTEGER NOT NULL,
                PRIMARY KEY (player_low_id, player_high_id)
            );

            -- Per-round move log, for history and replay
            CREATE TABLE moves (
                match_id INTEGER NOT NULL,
                round_number INTEGER NOT NULL,
                turn_number INTEGER NOT NULL,
                player_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                cell_index INTEGER NOT NULL,
                played_at INTEGER NOT NULL,
                deadline_at INTEGER NOT NULL,
                PRIMARY KEY (match_id, round_number, turn_number)
            );
            "#,
        )?;

        let created_at = now_epoch_ms();
        self.conn.execute(
            "INSERT INTO meta (schema_version, created_at) VALUES (?1, ?2)",
            params![SCHEMA_VERSION, created_at],
        )?;

        Ok(())
    }

    fn migrate_schema(&self, from_version: u32) -> Result<(), StorageError> {
        // No migrations exist yet; v1 is the first schema.
        Err(StorageError::MigrationFailed {
            from: from_version,
            to: SCHEMA_VERSION,
            reason: format!("no migration path from version {}", from_version),
        })
    }
}

fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Encode a winning line as comma-separated cell indices.
fn encode_line(line: &[usize]) -> String {
    line.iter()
        .map(|index| index.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn decode_line(text: &str) -> Option<Vec<usize>> {
    text.split(',').map(|part| part.parse().ok()).collect()
}

fn rating_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PlayerRating> {
    Ok(PlayerRating {
        player_id: row.get(0)?,
        elo: row.get(1)?,
        games_played: row.get(2)?,
        provisional_until: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn read_rating(conn: &Connection, player_id: &str) -> Result<Option<PlayerRating>, StorageError> {
    let rating = conn
        .query_row(
            "SELECT player_id, elo, games_played, provisional_until, updated_at
             FROM ratings WHERE player_id = ?1",
            params![player_id],
            rating_from_row,
        )
        .optional()?;
    Ok(rating)
}

/// Fetch a rating inside the finalize transaction, inserting the seed row
/// on a player's first rated result.
fn read_or_seed_rating(
    tx: &Transaction<'_>,
    player_id: &str,
    rating_params: &RatingParams,
    now_ms: i64,
) -> Result<PlayerRating, StorageError> {
    if let Some(rating) = read_rating(tx, player_id)? {
        return Ok(rating);
    }

    let seeded = PlayerRating::seed(player_id, rating_params, now_ms);
    tx.execute(
        "INSERT INTO ratings (player_id, elo, games_played, provisional_until, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            seeded.player_id,
            seeded.elo,
            seeded.games_played,
            seeded.provisional_until,
            seeded.updated_at,
        ],
    )?;
    Ok(seeded)
}

fn write_adjustment(
    tx: &Transaction<'_>,
    adjustment: &RatingAdjustment,
    match_id: i64,
    round_number: i64,
    now_ms: i64,
) -> Result<(), StorageError> {
    tx.execute(
        "UPDATE ratings
         SET elo = ?1, games_played = ?2, provisional_until = ?3, updated_at = ?4
         WHERE player_id = ?5",
        params![
            adjustment.after_elo,
            adjustment.games_played,
            adjustment.provisional_until,
            now_ms,
            adjustment.player_id,
        ],
    )?;

    tx.execute(
        "INSERT INTO rating_events
             (match_id, round_number, player_id, before_elo, after_elo, delta, result, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            match_id,
            round_number,
            adjustment.player_id,
            adjustment.before_elo,
            adjustment.after_elo,
            adjustment.delta,
            adjustment.result.as_str(),
            now_ms,
        ],
    )?;

    Ok(())
}

fn read_head_to_head(
    conn: &Connection,
    low: &str,
    high: &str,
) -> Result<Option<HeadToHead>, StorageError> {
    let row = conn
        .query_row(
            "SELECT player_low_id, player_high_id, low_wins, high_wins, draws, last_played_at
             FROM h2h_stats WHERE player_low_id = ?1 AND player_high_id = ?2",
            params![low, high],
            |row| {
                Ok(HeadToHead {
                    player_low_id: row.get(0)?,
                    player_high_id: row.get(1)?,
                    low_wins: row.get(2)?,
                    high_wins: row.get(3)?,
                    draws: row.get(4)?,
                    last_played_at: row.get(5)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Raw column values for a match row; decoded into engine types separately
/// so decode failures surface as `CorruptRecord` rather than SQL errors.
struct RawMatch {
    id: i64,
    room_code: String,
    size: i64,
    win_length: i64,
    turn_time_sec: i64,
    preset_id: Option<String>,
    skin_id: Option<String>,
    status: String,
    board: String,
    player_x: Option<String>,
    player_o: Option<String>,
    next_player: String,
    winner: Option<String>,
    winning_line: Option<String>,
    round_number: i64,
    turn_number: i64,
    turn_deadline_at: i64,
    rematch_requested_by: Option<String>,
    last_move_index: Option<i64>,
    revision: i64,
    archived_at: Option<i64>,
    created_at: i64,
    updated_at: i64,
}

impl RawMatch {
    fn decode(self) -> Result<MatchRecord, StorageError> {
        let corrupt = |reason: String| StorageError::CorruptRecord {
            match_id: self.id,
            reason,
        };

        let status = MatchStatus::from_token(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status {:?}", self.status)))?;
        let next_player = Symbol::from_token(&self.next_player)
            .ok_or_else(|| corrupt(format!("unknown next player {:?}", self.next_player)))?;
        let board = Board::from_text(self.size as usize, &self.board)
            .ok_or_else(|| corrupt(format!("board text does not fit size {}", self.size)))?;

        let winner = match &self.winner {
            Some(token) => Some(
                Symbol::from_token(token)
                    .ok_or_else(|| corrupt(format!("unknown winner {:?}", token)))?,
            ),
            None => None,
        };
        let rematch_requested_by = match &self.rematch_requested_by {
            Some(token) => Some(
                Symbol::from_token(token)
                    .ok_or_else(|| corrupt(format!("unknown rematch requester {:?}", token)))?,
            ),
            None => None,
        };
        let winning_line = match &self.winning_line {
            Some(text) => Some(
                decode_line(text).ok_or_else(|| corrupt(format!("bad winning line {:?}", text)))?,
            ),
            None => None,
        };

        Ok(MatchRecord {
            id: self.id,
            room_code: self.room_code,
            round_number: self.round_number,
            rematch_requested_by,
            last_move_index: self.last_move_index,
            revision: self.revision,
            archived_at: self.archived_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
            state: MatchState {
                config: GameConfig {
                    size: self.size,
                    win_length: self.win_length,
                    turn_time_sec: self.turn_time_sec,
                    preset_id: self.preset_id,
                    skin_id: self.skin_id,
                },
                board,
                next_player,
                status,
                winner,
                winning_line,
                turn_number: self.turn_number,
                turn_deadline_at: self.turn_deadline_at,
                seats: Seats {
                    x: self.player_x,
                    o: self.player_o,
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MoveCommand;

    const NOW: i64 = 1_700_000_000_000;

    fn seated_state() -> MatchState {
        let mut state = MatchState::new(GameConfig::new(3, 3, 30), NOW).unwrap();
        state.seats.x = Some("alice".to_string());
        state.seats.o = Some("bob".to_string());
        state
    }

    fn insert(storage: &Storage, room_code: &str) -> MatchRecord {
        storage
            .insert_match(room_code, &seated_state(), NOW)
            .unwrap()
    }

    #[test]
    fn test_insert_and_load_roundtrip() {
        let storage = Storage::open_in_memory().unwrap();
        let record = insert(&storage, "ABC123");

        let loaded = storage.match_by_id(record.id).unwrap().unwrap();
        assert_eq!(loaded, record);

        let by_code = storage.match_by_room_code("ABC123").unwrap().unwrap();
        assert_eq!(by_code.id, record.id);

        assert!(storage.match_by_room_code("NOPE42").unwrap().is_none());
    }

    #[test]
    fn test_room_codes_are_unique() {
        let storage = Storage::open_in_memory().unwrap();
        insert(&storage, "ABC123");
        let dup = storage.insert_match("ABC123", &seated_state(), NOW);
        assert!(matches!(dup, Err(StorageError::Database(_))));
    }

    #[test]
    fn test_update_roundtrips_engine_state() {
        let storage = Storage::open_in_memory().unwrap();
        let mut record = insert(&storage, "ABC123");

        let outcome = crate::engine::apply_move(
            &record.state,
            MoveCommand {
                cell_index: 4,
                symbol: Symbol::X,
                now_ms: NOW + 1_000,
            },
        );
        record.state = outcome.state().clone();
        record.last_move_index = Some(4);

        let updated = storage.update_match(&record, NOW + 1_000).unwrap();
        assert_eq!(updated.revision, 2);

        let loaded = storage.match_by_id(record.id).unwrap().unwrap();
        assert_eq!(loaded, updated);
        assert_eq!(loaded.state.board.cell(4), Some(Symbol::X));
        assert_eq!(loaded.state.next_player, Symbol::O);
    }

    #[test]
    fn test_stale_revision_is_rejected() {
        let storage = Storage::open_in_memory().unwrap();
        let record = insert(&storage, "ABC123");

        // First writer wins.
        let mut first = record.clone();
        first.state.status = MatchStatus::Resigned;
        first.state.winner = Some(Symbol::O);
        storage.update_match(&first, NOW + 1_000).unwrap();

        // Second writer holds the stale revision and must lose.
        let mut second = record.clone();
        second.state.turn_number = 2;
        match storage.update_match(&second, NOW + 1_001) {
            Err(StorageError::RevisionConflict { match_id, revision }) => {
                assert_eq!(match_id, record.id);
                assert_eq!(revision, 1);
            }
            other => panic!("expected revision conflict, got {:?}", other),
        }

        // The losing write changed nothing.
        let loaded = storage.match_by_id(record.id).unwrap().unwrap();
        assert_eq!(loaded.state.status, MatchStatus::Resigned);
        assert_eq!(loaded.state.turn_number, 1);
    }

    #[test]
    fn test_winning_line_roundtrip() {
        let storage = Storage::open_in_memory().unwrap();
        let mut record = insert(&storage, "ABC123");
        record.state.status = MatchStatus::Won;
        record.state.winner = Some(Symbol::X);
        record.state.winning_line = Some(vec![0, 4, 8]);
        storage.update_match(&record, NOW + 1_000).unwrap();

        let loaded = storage.match_by_id(record.id).unwrap().unwrap();
        assert_eq!(loaded.state.winning_line, Some(vec![0, 4, 8]));
    }

    #[test]
    fn test_finalize_round_scores_both_players() {
        let mut storage = Storage::open_in_memory().unwrap();
        let record = insert(&storage, "ABC123");
        let params = RatingParams::default();

        let performed = storage
            .finalize_round(
                record.id,
                1,
                &record.state.seats,
                MatchStatus::Won,
                Some(Symbol::X),
                &params,
                NOW + 5_000,
            )
            .unwrap();
        assert!(performed);

        let alice = storage.rating("alice").unwrap().unwrap();
        let bob = storage.rating("bob").unwrap().unwrap();
        // Both seeded at 1200 with provisional K=32: winner +16, loser -16.
        assert_eq!(alice.elo, 1216);
        assert_eq!(bob.elo, 1184);
        assert_eq!(alice.games_played, 1);
        assert_eq!(bob.games_played, 1);
        assert_eq!(alice.provisional_until, 11);

        let events = storage.rating_events_for_round(record.id, 1).unwrap();
        assert_eq!(events.len(), 2);
        for event in &events {
            assert_eq!(event.before_elo + event.delta, event.after_elo);
            let expected = if event.player_id == "alice" {
                RoundResult::Win
            } else {
                RoundResult::Loss
            };
            assert_eq!(event.result, expected);
        }

        let h2h = storage.head_to_head("bob", "alice").unwrap().unwrap();
        assert_eq!(h2h.player_low_id, "alice");
        assert_eq!(h2h.player_high_id, "bob");
        assert_eq!(h2h.low_wins, 1);
        assert_eq!(h2h.high_wins, 0);
        assert_eq!(h2h.draws, 0);
    }

    #[test]
    fn test_finalize_round_is_idempotent() {
        let mut storage = Storage::open_in_memory().unwrap();
        let record = insert(&storage, "ABC123");
        let params = RatingParams::default();

        let first = storage
            .finalize_round(
                record.id,
                1,
                &record.state.seats,
                MatchStatus::Won,
                Some(Symbol::X),
                &params,
                NOW + 5_000,
            )
            .unwrap();
        let second = storage
            .finalize_round(
                record.id,
                1,
                &record.state.seats,
                MatchStatus::Won,
                Some(Symbol::X),
                &params,
                NOW + 6_000,
            )
            .unwrap();

        assert!(first);
        assert!(!second);

        // Exactly one event per participant, one rating mutation each.
        let events = storage.rating_events_for_round(record.id, 1).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(storage.rating("alice").unwrap().unwrap().elo, 1216);
        assert_eq!(storage.rating("alice").unwrap().unwrap().games_played, 1);
    }

    #[test]
    fn test_finalize_skips_non_terminal_and_open_seats() {
        let mut storage = Storage::open_in_memory().unwrap();
        let record = insert(&storage, "ABC123");
        let params = RatingParams::default();

        let active = storage
            .finalize_round(
                record.id,
                1,
                &record.state.seats,
                MatchStatus::Active,
                None,
                &params,
                NOW,
            )
            .unwrap();
        assert!(!active);

        let open_seats = Seats {
            x: Some("alice".to_string()),
            o: None,
        };
        let unseated = storage
            .finalize_round(
                record.id,
                1,
                &open_seats,
                MatchStatus::Won,
                Some(Symbol::X),
                &params,
                NOW,
            )
            .unwrap();
        assert!(!unseated);

        assert!(storage.rating("alice").unwrap().is_none());
        assert!(storage
            .rating_events_for_round(record.id, 1)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_finalize_separate_rounds_score_separately() {
        let mut storage = Storage::open_in_memory().unwrap();
        let record = insert(&storage, "ABC123");
        let params = RatingParams::default();

        storage
            .finalize_round(
                record.id,
                1,
                &record.state.seats,
                MatchStatus::Won,
                Some(Symbol::X),
                &params,
                NOW + 5_000,
            )
            .unwrap();
        let second_round = storage
            .finalize_round(
                record.id,
                2,
                &record.state.seats,
                MatchStatus::Draw,
                None,
                &params,
                NOW + 90_000,
            )
            .unwrap();
        assert!(second_round);

        assert_eq!(storage.rating("alice").unwrap().unwrap().games_played, 2);
        assert_eq!(
            storage.rating_events_for_round(record.id, 2).unwrap().len(),
            2
        );

        let h2h = storage.head_to_head("alice", "bob").unwrap().unwrap();
        assert_eq!(h2h.low_wins, 1);
        assert_eq!(h2h.draws, 1);
        assert_eq!(h2h.total_games(), 2);
    }

    #[test]
    fn test_leaderboard_orders_by_elo() {
        let mut storage = Storage::open_in_memory().unwrap();
        let params = RatingParams::default();

        let a = insert(&storage, "AAAAAA");
        storage
            .finalize_round(
                a.id,
                1,
                &a.state.seats,
                MatchStatus::Won,
                Some(Symbol::X),
                &params,
                NOW,
            )
            .unwrap();

        let board = storage.leaderboard(10).unwrap();
        assert_eq!(board.len(), 2);
        assert_eq!(board[0].player_id, "alice");
        assert_eq!(board[1].player_id, "bob");
        assert!(board[0].elo > board[1].elo);

        // Limit is clamped to at least one row.
        assert_eq!(storage.leaderboard(0).unwrap().len(), 1);
    }

    #[test]
    fn test_player_history_newest_first() {
        let mut storage = Storage::open_in_memory().unwrap();
        let record = insert(&storage, "ABC123");
        let params = RatingParams::default();

        storage
            .finalize_round(
                record.id,
                1,
                &record.state.seats,
                MatchStatus::Won,
                Some(Symbol::X),
                &params,
                NOW + 5_000,
            )
            .unwrap();
        storage
            .finalize_round(
                record.id,
                2,
                &record.state.seats,
                MatchStatus::Draw,
                None,
                &params,
                NOW + 90_000,
            )
            .unwrap();

        let history = storage.player_history("alice", 10).unwrap();
        assert_eq!(history.len(), 2);

        // Newest first: the draw of round 2, then the round-1 win.
        assert_eq!(history[0].round_number, 2);
        assert_eq!(history[0].result, RoundResult::Draw);
        assert_eq!(history[0].finished_at, NOW + 90_000);
        assert_eq!(history[1].round_number, 1);
        assert_eq!(history[1].result, RoundResult::Win);
        assert_eq!(history[1].elo_delta, 16);
        assert_eq!(history[1].elo_after, 1216);
        for entry in &history {
            assert_eq!(entry.match_id, record.id);
            assert_eq!(entry.room_code, "ABC123");
            assert_eq!(entry.opponent_id, "bob");
        }

        // The same rounds from the other side.
        let bob = storage.player_history("bob", 10).unwrap();
        assert_eq!(bob[1].result, RoundResult::Loss);
        assert_eq!(bob[1].opponent_id, "alice");

        assert_eq!(storage.player_history("alice", 1).unwrap().len(), 1);
        assert!(storage.player_history("mallory", 10).unwrap().is_empty());
    }

    #[test]
    fn test_archived_match_drops_out_of_history() {
        let mut storage = Storage::open_in_memory().unwrap();
        let record = insert(&storage, "ABC123");
        let params = RatingParams::default();

        storage
            .finalize_round(
                record.id,
                1,
                &record.state.seats,
                MatchStatus::Won,
                Some(Symbol::X),
                &params,
                NOW + 5_000,
            )
            .unwrap();

        assert!(storage.archive_match(record.id, NOW + 10_000).unwrap());
        // Archiving twice is a no-op.
        assert!(!storage.archive_match(record.id, NOW + 11_000).unwrap());

        assert!(storage.player_history("alice", 10).unwrap().is_empty());

        // The row, its ratings, and its events survive.
        let loaded = storage.match_by_id(record.id).unwrap().unwrap();
        assert_eq!(loaded.archived_at, Some(NOW + 10_000));
        assert_eq!(storage.rating("alice").unwrap().unwrap().elo, 1216);
        assert_eq!(storage.rating_events_for_round(record.id, 1).unwrap().len(), 2);
    }

    #[test]
    fn test_move_log_roundtrip() {
        let storage = Storage::open_in_memory().unwrap();
        let record = insert(&storage, "ABC123");

        for (turn_number, (player_id, symbol, cell_index)) in [
            ("alice", Symbol::X, 0),
            ("bob", Symbol::O, 4),
            ("alice", Symbol::X, 1),
        ]
        .into_iter()
        .enumerate()
        {
            storage
                .insert_move(&MoveRecord {
                    match_id: record.id,
                    round_number: 1,
                    turn_number: turn_number as i64 + 1,
                    player_id: player_id.to_string(),
                    symbol,
                    cell_index,
                    played_at: NOW + turn_number as i64 * 1_000,
                    deadline_at: NOW + 30_000,
                })
                .unwrap();
        }

        let moves = storage.moves_for_round(record.id, 1).unwrap();
        assert_eq!(moves.len(), 3);
        assert_eq!(moves[0].cell_index, 0);
        assert_eq!(moves[2].cell_index, 1);
        assert!(storage.moves_for_round(record.id, 2).unwrap().is_empty());
    }

    #[test]
    fn test_line_codec() {
        assert_eq!(encode_line(&[0, 4, 8]), "0,4,8");
        assert_eq!(decode_line("0,4,8"), Some(vec![0, 4, 8]));
        assert_eq!(decode_line("0,x,8"), None);
    }
}
