//! Elo rating and head-to-head statistics
//!
//! This module provides:
//! - Standard logistic Elo with a provisional K-factor for new players
//! - Pure per-round settlement: both participants' adjustments computed
//!   together from a terminal outcome
//! - Canonically-ordered head-to-head counters per player pair
//!
//! Expected score: E_A = 1 / (1 + 10^((R_B - R_A)/400)). Delta is
//! round(K * (actual - expected)). Persistence and the per-round
//! idempotency guard live in the storage layer.

use crate::engine::{MatchStatus, Symbol};

/// Tuning values for the rating system. Product knobs, not structure:
/// callers may swap them without touching the math.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RatingParams {
    /// Seed rating for a player's first rated game.
    pub base_elo: i64,
    /// Steady-state K-factor.
    pub base_k: f64,
    /// K-factor while a player is provisional.
    pub provisional_k: f64,
    /// Rated games before a player leaves provisional status.
    pub provisional_games: i64,
}

impl Default for RatingParams {
    fn default() -> Self {
        RatingParams {
            base_elo: 1200,
            base_k: 24.0,
            provisional_k: 32.0,
            provisional_games: 12,
        }
    }
}

/// Per-player skill record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerRating {
    pub player_id: String,
    pub elo: i64,
    pub games_played: i64,
    /// Rated games left before leaving provisional status, floored at zero.
    pub provisional_until: i64,
    pub updated_at: i64,
}

impl PlayerRating {
    /// Fresh record at the base rating with zero games. Created lazily on a
    /// player's first terminal competitive result.
    pub fn seed(player_id: impl Into<String>, params: &RatingParams, now_ms: i64) -> PlayerRating {
        PlayerRating {
            player_id: player_id.into(),
            elo: params.base_elo,
            games_played: 0,
            provisional_until: params.provisional_games,
            updated_at: now_ms,
        }
    }

    pub fn is_provisional(&self, params: &RatingParams) -> bool {
        self.games_played < params.provisional_games
    }
}

/// Expected score for a player at `elo` against `opponent_elo`.
pub fn expected_score(elo: i64, opponent_elo: i64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent_elo - elo) as f64 / 400.0))
}

/// K-factor for a player with the given game count: provisional players
/// converge faster, established ones move less.
pub fn k_factor(params: &RatingParams, games_played: i64) -> f64 {
    if games_played < params.provisional_games {
        params.provisional_k
    } else {
        params.base_k
    }
}

/// Actual score pair (X, O) for a terminal outcome: draw is 0.5 each, a
/// decisive winner takes 1. Returns None when the outcome is not scorable
/// (non-terminal status, or terminal without a winner and not a draw).
pub fn score_pair(status: MatchStatus, winner: Option<Symbol>) -> Option<(f64, f64)> {
    if !status.is_terminal() {
        return None;
    }

    if status == MatchStatus::Draw {
        return Some((0.5, 0.5));
    }

    match winner {
        Some(Symbol::X) => Some((1.0, 0.0)),
        Some(Symbol::O) => Some((0.0, 1.0)),
        None => None,
    }
}

/// How one round ended from a single player's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundResult {
    Win,
    Loss,
    Draw,
}

impl RoundResult {
    /// Derive from an actual Elo score (1, 0, or 0.5).
    pub fn from_score(score: f64) -> RoundResult {
        if score == 1.0 {
            RoundResult::Win
        } else if score == 0.0 {
            RoundResult::Loss
        } else {
            RoundResult::Draw
        }
    }

    /// Stable token form, used in storage rows.
    pub fn as_str(self) -> &'static str {
        match self {
            RoundResult::Win => "win",
            RoundResult::Loss => "loss",
            RoundResult::Draw => "draw",
        }
    }

    /// Parse the storage token form.
    pub fn from_token(token: &str) -> Option<RoundResult> {
        match token {
            "win" => Some(RoundResult::Win),
            "loss" => Some(RoundResult::Loss),
            "draw" => Some(RoundResult::Draw),
            _ => None,
        }
    }
}

/// One participant's computed rating change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingAdjustment {
    pub player_id: String,
    pub before_elo: i64,
    pub after_elo: i64,
    pub delta: i64,
    pub result: RoundResult,
    /// Game count after this round.
    pub games_played: i64,
    pub provisional_until: i64,
}

/// Both participants' adjustments for one finalized round. Always applied
/// together; a one-sided application would break total-points conservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSettlement {
    pub x: RatingAdjustment,
    pub o: RatingAdjustment,
}

/// Compute both adjustments for a terminal outcome. Pure; the caller is
/// responsible for applying them atomically and at most once per round.
pub fn settle_round(
    x: &PlayerRating,
    o: &PlayerRating,
    status: MatchStatus,
    winner: Option<Symbol>,
    params: &RatingParams,
) -> Option<RoundSettlement> {
    let (x_score, o_score) = score_pair(status, winner)?;

    let x_expected = expected_score(x.elo, o.elo);
    let o_expected = expected_score(o.elo, x.elo);

    let x_delta = (k_factor(params, x.games_played) * (x_score - x_expected)).round() as i64;
    let o_delta = (k_factor(params, o.games_played) * (o_score - o_expected)).round() as i64;

    Some(RoundSettlement {
        x: adjust(x, x_delta, x_score, params),
        o: adjust(o, o_delta, o_score, params),
    })
}

fn adjust(rating: &PlayerRating, delta: i64, score: f64, params: &RatingParams) -> RatingAdjustment {
    let games_played = rating.games_played + 1;
    RatingAdjustment {
        player_id: rating.player_id.clone(),
        before_elo: rating.elo,
        after_elo: rating.elo + delta,
        delta,
        result: RoundResult::from_score(score),
        games_played,
        provisional_until: (params.provisional_games - games_played).max(0),
    }
}

/// Immutable audit record of one Elo adjustment. At most one row exists per
/// (match, round, player); that uniqueness is the double-scoring guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatingEvent {
    pub match_id: i64,
    pub round_number: i64,
    pub player_id: String,
    pub before_elo: i64,
    pub after_elo: i64,
    pub delta: i64,
    pub result: RoundResult,
    pub created_at: i64,
}

/// Win/loss/draw counters for an unordered pair of players. The pair is
/// stored canonically (lexicographically lower id first) so (A,B) and
/// (B,A) share one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadToHead {
    pub player_low_id: String,
    pub player_high_id: String,
    pub low_wins: i64,
    pub high_wins: i64,
    pub draws: i64,
    pub last_played_at: i64,
}

impl HeadToHead {
    /// Canonical (low, high) ordering for a pair of ids.
    pub fn pair(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    /// Zeroed counters for a pair, canonically ordered.
    pub fn new(a: &str, b: &str, now_ms: i64) -> HeadToHead {
        let (player_low_id, player_high_id) = Self::pair(a, b);
        HeadToHead {
            player_low_id,
            player_high_id,
            low_wins: 0,
            high_wins: 0,
            draws: 0,
            last_played_at: now_ms,
        }
    }

    /// Count one finalized result. `winner_id` of None records a draw.
    pub fn record(&mut self, winner_id: Option<&str>, now_ms: i64) {
        match winner_id {
            None => self.draws += 1,
            Some(id) if id == self.player_low_id => self.low_wins += 1,
            Some(_) => self.high_wins += 1,
        }
        self.last_played_at = now_ms;
    }

    pub fn total_games(&self) -> i64 {
        self.low_wins + self.high_wins + self.draws
    }
}
