//! Match state machine
//!
//! `apply_move` is the single transition for player moves and
//! `resolve_timeout` converts an expired clock into a terminal state. Both
//! are pure: they read the current state plus an explicit wall-clock time
//! and return the next state, leaving concurrency control to the
//! persistence layer. Rule violations come back as data, never as errors.

use std::fmt;

use super::board::{Board, Symbol};
use super::config::{ConfigError, GameConfig};

/// Lifecycle status of a match.
///
/// `Waiting` is the pre-engine state of an open room; the engine never
/// produces it and treats it as not-active. The four terminal states accept
/// no further moves until a rematch re-initializes the round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    Waiting,
    Active,
    Won,
    Draw,
    Timeout,
    Resigned,
}

impl MatchStatus {
    /// True for states from which no further moves are accepted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MatchStatus::Won | MatchStatus::Draw | MatchStatus::Timeout | MatchStatus::Resigned
        )
    }

    /// Stable token form, used in storage rows.
    pub fn as_str(self) -> &'static str {
        match self {
            MatchStatus::Waiting => "waiting",
            MatchStatus::Active => "active",
            MatchStatus::Won => "won",
            MatchStatus::Draw => "draw",
            MatchStatus::Timeout => "timeout",
            MatchStatus::Resigned => "resigned",
        }
    }

    /// Parse the storage token form.
    pub fn from_token(token: &str) -> Option<MatchStatus> {
        match token {
            "waiting" => Some(MatchStatus::Waiting),
            "active" => Some(MatchStatus::Active),
            "won" => Some(MatchStatus::Won),
            "draw" => Some(MatchStatus::Draw),
            "timeout" => Some(MatchStatus::Timeout),
            "resigned" => Some(MatchStatus::Resigned),
            _ => None,
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seat assignments. A symbol may be unassigned while a room is open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Seats {
    pub x: Option<String>,
    pub o: Option<String>,
}

impl Seats {
    /// Which symbol a player occupies, if seated.
    pub fn symbol_of(&self, player_id: &str) -> Option<Symbol> {
        if self.x.as_deref() == Some(player_id) {
            Some(Symbol::X)
        } else if self.o.as_deref() == Some(player_id) {
            Some(Symbol::O)
        } else {
            None
        }
    }

    /// The player in a given seat, if assigned.
    pub fn player(&self, symbol: Symbol) -> Option<&str> {
        match symbol {
            Symbol::X => self.x.as_deref(),
            Symbol::O => self.o.as_deref(),
        }
    }

    /// True once both seats are taken.
    pub fn both_assigned(&self) -> bool {
        self.x.is_some() && self.o.is_some()
    }
}

/// The engine's working representation of one round of a match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchState {
    pub config: GameConfig,
    pub board: Board,
    pub next_player: Symbol,
    pub status: MatchStatus,
    pub winner: Option<Symbol>,
    /// Cell indices of the winning run, in line-traversal order.
    pub winning_line: Option<Vec<usize>>,
    /// Monotonically increasing move counter, starting at 1.
    pub turn_number: i64,
    /// Absolute deadline (epoch ms) for the current turn.
    pub turn_deadline_at: i64,
    pub seats: Seats,
}

impl MatchState {
    /// Fresh active state: empty board, X to move, turn 1, deadline
    /// `created_at_ms + T`. Fails hard on an invalid config; that is a
    /// programming mistake upstream, not a game event.
    pub fn new(config: GameConfig, created_at_ms: i64) -> Result<MatchState, ConfigError> {
        config.validate()?;

        Ok(MatchState {
            board: Board::empty(config.size as usize),
            next_player: Symbol::X,
            status: MatchStatus::Active,
            winner: None,
            winning_line: None,
            turn_number: 1,
            turn_deadline_at: created_at_ms + config.turn_time_ms(),
            seats: Seats::default(),
            config,
        })
    }

    /// Override the first mover (X by default).
    pub fn with_first_player(mut self, symbol: Symbol) -> MatchState {
        self.next_player = symbol;
        self
    }
}

/// A proposed move against the current state.
///
/// `cell_index` is deliberately signed: out-of-range client input is an
/// expected rule violation, not a type error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveCommand {
    pub cell_index: i64,
    pub symbol: Symbol,
    pub now_ms: i64,
}

/// Why a move was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveRejection {
    MatchNotActive,
    TurnExpired,
    InvalidSymbol,
    NotYourTurn,
    OutOfBounds,
    CellOccupied,
}

impl MoveRejection {
    /// Stable reason code for API layers.
    pub fn code(self) -> &'static str {
        match self {
            MoveRejection::MatchNotActive => "MATCH_NOT_ACTIVE",
            MoveRejection::TurnExpired => "TURN_EXPIRED",
            MoveRejection::InvalidSymbol => "INVALID_SYMBOL",
            MoveRejection::NotYourTurn => "NOT_YOUR_TURN",
            MoveRejection::OutOfBounds => "OUT_OF_BOUNDS",
            MoveRejection::CellOccupied => "CELL_OCCUPIED",
        }
    }
}

impl fmt::Display for MoveRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// What a successful move did to the match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveEvent {
    Moved,
    Won,
    Draw,
}

/// Result of `apply_move`. Both arms carry the state the caller must
/// persist: an expired move fails *and* transitions the match to timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    Accepted { event: MoveEvent, state: MatchState },
    Rejected { reason: MoveRejection, state: MatchState },
}

impl MoveOutcome {
    /// The state to persist, regardless of acceptance.
    pub fn state(&self) -> &MatchState {
        match self {
            MoveOutcome::Accepted { state, .. } => state,
            MoveOutcome::Rejected { state, .. } => state,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, MoveOutcome::Accepted { .. })
    }
}

/// True while the match is active and the supplied time is strictly past
/// the turn deadline.
pub fn is_turn_expired(state: &MatchState, now_ms: i64) -> bool {
    state.status == MatchStatus::Active && now_ms > state.turn_deadline_at
}

/// Apply a move with a typed symbol.
pub fn apply_move(state: &MatchState, command: MoveCommand) -> MoveOutcome {
    apply_checked(state, command.cell_index, Some(command.symbol), command.now_ms)
}

/// Apply a move whose symbol arrives as an untyped token, e.g. when
/// replaying a recorded transcript. An unrecognized token rejects with
/// `INVALID_SYMBOL` in the same check position the typed path skips.
pub fn apply_move_token(state: &MatchState, cell_index: i64, token: &str, now_ms: i64) -> MoveOutcome {
    apply_checked(state, cell_index, Symbol::from_token(token), now_ms)
}

fn apply_checked(
    state: &MatchState,
    cell_index: i64,
    symbol: Option<Symbol>,
    now_ms: i64,
) -> MoveOutcome {
    let reject = |reason| MoveOutcome::Rejected {
        reason,
        state: state.clone(),
    };

    if state.status != MatchStatus::Active {
        return reject(MoveRejection::MatchNotActive);
    }

    if is_turn_expired(state, now_ms) {
        // A late move both fails and forces the timeout transition; the
        // caller must persist the returned terminal state.
        return MoveOutcome::Rejected {
            reason: MoveRejection::TurnExpired,
            state: resolve_timeout(state, now_ms),
        };
    }

    let symbol = match symbol {
        Some(symbol) => symbol,
        None => return reject(MoveRejection::InvalidSymbol),
    };

    if symbol != state.next_player {
        return reject(MoveRejection::NotYourTurn);
    }

    if cell_index < 0 || cell_index >= state.board.cell_count() as i64 {
        return reject(MoveRejection::OutOfBounds);
    }

    let index = cell_index as usize;
    if state.board.cell(index).is_some() {
        return reject(MoveRejection::CellOccupied);
    }

    let mut next = state.clone();
    next.board.place(index, symbol);

    let line = next
        .board
        .detect_winning_line(state.config.win_length as usize, index);

    if !line.is_empty() {
        next.status = MatchStatus::Won;
        next.winner = Some(symbol);
        next.winning_line = Some(line);
        return MoveOutcome::Accepted {
            event: MoveEvent::Won,
            state: next,
        };
    }

    if next.board.is_full() {
        next.status = MatchStatus::Draw;
        next.winner = None;
        next.winning_line = None;
        return MoveOutcome::Accepted {
            event: MoveEvent::Draw,
            state: next,
        };
    }

    next.next_player = symbol.opponent();
    next.turn_number += 1;
    next.turn_deadline_at = now_ms + state.config.turn_time_ms();
    MoveOutcome::Accepted {
        event: MoveEvent::Moved,
        state: next,
    }
}

/// Resolve an expired clock: the player who was due to move loses.
///
/// Idempotent; any non-active state is returned unchanged, so redundant
/// timeout polls are safe.
pub fn resolve_timeout(state: &MatchState, now_ms: i64) -> MatchState {
    if state.status != MatchStatus::Active {
        return state.clone();
    }

    let mut next = state.clone();
    next.status = MatchStatus::Timeout;
    next.winner = Some(state.next_player.opponent());
    next.turn_deadline_at = now_ms;
    next
}
