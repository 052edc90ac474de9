//! Match configuration: the immutable per-match ruleset and its validation
//!
//! A config is created once when a room opens and never mutated. Invalid
//! configs are a caller programming mistake, so validation failures are hard
//! errors rather than in-band rule violations.

use once_cell::sync::Lazy;
use std::fmt;

pub const MIN_BOARD_SIZE: i64 = 3;
pub const MAX_BOARD_SIZE: i64 = 10;
pub const MIN_WIN_LENGTH: i64 = 3;
pub const MIN_TURN_TIME_SEC: i64 = 5;
pub const MAX_TURN_TIME_SEC: i64 = 180;

/// Why a config was rejected. `code()` yields the stable machine-checkable
/// form consumed by API layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A boundary value was not an integer (only reachable via `from_raw`).
    InvalidIntegerValue,
    /// Board size outside [3, 10].
    InvalidSize { size: i64 },
    /// Win length outside [3, size].
    InvalidWinLength { win_length: i64, size: i64 },
    /// Turn timer outside [5, 180] seconds.
    InvalidTurnTime { turn_time_sec: i64 },
}

impl ConfigError {
    /// Stable reason code.
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::InvalidIntegerValue => "INVALID_INTEGER_VALUE",
            ConfigError::InvalidSize { .. } => "INVALID_SIZE",
            ConfigError::InvalidWinLength { .. } => "INVALID_WIN_LENGTH",
            ConfigError::InvalidTurnTime { .. } => "INVALID_TURN_TIME",
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidIntegerValue => {
                write!(f, "size, win length, and turn time must be integers")
            }
            ConfigError::InvalidSize { size } => {
                write!(
                    f,
                    "board size {} must be between {} and {}",
                    size, MIN_BOARD_SIZE, MAX_BOARD_SIZE
                )
            }
            ConfigError::InvalidWinLength { win_length, size } => {
                write!(
                    f,
                    "win length {} must be between {} and board size {}",
                    win_length, MIN_WIN_LENGTH, size
                )
            }
            ConfigError::InvalidTurnTime { turn_time_sec } => {
                write!(
                    f,
                    "turn timer {}s must be between {}s and {}s",
                    turn_time_sec, MIN_TURN_TIME_SEC, MAX_TURN_TIME_SEC
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Immutable per-match ruleset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameConfig {
    /// Board side length N, 3..=10.
    pub size: i64,
    /// Run length W needed to win, 3..=size.
    pub win_length: i64,
    /// Per-turn clock in seconds, 5..=180.
    pub turn_time_sec: i64,
    /// Identifier of the preset this config came from, if any.
    pub preset_id: Option<String>,
    /// Cosmetic symbol skin; carried through but never interpreted here.
    pub skin_id: Option<String>,
}

impl GameConfig {
    pub fn new(size: i64, win_length: i64, turn_time_sec: i64) -> GameConfig {
        GameConfig {
            size,
            win_length,
            turn_time_sec,
            preset_id: None,
            skin_id: None,
        }
    }

    /// Build and validate a config from untyped boundary values (e.g. JSON
    /// numbers). Fractional or non-finite inputs fail with
    /// `INVALID_INTEGER_VALUE` before the range checks run.
    pub fn from_raw(size: f64, win_length: f64, turn_time_sec: f64) -> Result<GameConfig, ConfigError> {
        for value in [size, win_length, turn_time_sec] {
            if !value.is_finite() || value.fract() != 0.0 {
                return Err(ConfigError::InvalidIntegerValue);
            }
        }

        let config = GameConfig::new(size as i64, win_length as i64, turn_time_sec as i64);
        config.validate()?;
        Ok(config)
    }

    /// Check the ruleset invariants: 3 <= W <= N <= 10, 5 <= T <= 180.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size < MIN_BOARD_SIZE || self.size > MAX_BOARD_SIZE {
            return Err(ConfigError::InvalidSize { size: self.size });
        }

        if self.win_length < MIN_WIN_LENGTH || self.win_length > self.size {
            return Err(ConfigError::InvalidWinLength {
                win_length: self.win_length,
                size: self.size,
            });
        }

        if self.turn_time_sec < MIN_TURN_TIME_SEC || self.turn_time_sec > MAX_TURN_TIME_SEC {
            return Err(ConfigError::InvalidTurnTime {
                turn_time_sec: self.turn_time_sec,
            });
        }

        Ok(())
    }

    /// The turn clock in milliseconds.
    pub fn turn_time_ms(&self) -> i64 {
        self.turn_time_sec * 1000
    }
}

/// A named, ready-made ruleset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GamePreset {
    pub id: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub config: GameConfig,
}

/// Built-in presets offered at room creation.
pub static GAME_PRESETS: Lazy<Vec<GamePreset>> = Lazy::new(|| {
    fn preset(id: &'static str, size: i64, win_length: i64, turn_time_sec: i64) -> GameConfig {
        GameConfig {
            preset_id: Some(id.to_string()),
            ..GameConfig::new(size, win_length, turn_time_sec)
        }
    }

    vec![
        GamePreset {
            id: "classic-3",
            label: "Classic",
            description: "Quick and sharp. No room to hide.",
            config: preset("classic-3", 3, 3, 30),
        },
        GamePreset {
            id: "arena-5",
            label: "Arena",
            description: "More space. More schemes.",
            config: preset("arena-5", 5, 4, 30),
        },
        GamePreset {
            id: "marathon-10",
            label: "Marathon",
            description: "Settle in. This one's a war.",
            config: preset("marathon-10", 10, 5, 45),
        },
    ]
});

/// Look up a built-in preset by id.
pub fn preset_by_id(id: &str) -> Option<&'static GamePreset> {
    GAME_PRESETS.iter().find(|preset| preset.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_configs_across_the_grid() {
        for size in MIN_BOARD_SIZE..=MAX_BOARD_SIZE {
            for win_length in MIN_WIN_LENGTH..=size {
                for turn_time_sec in [MIN_TURN_TIME_SEC, 30, MAX_TURN_TIME_SEC] {
                    let config = GameConfig::new(size, win_length, turn_time_sec);
                    assert_eq!(config.validate(), Ok(()), "config {:?}", config);
                }
            }
        }
    }

    #[test]
    fn test_size_out_of_range() {
        assert_eq!(
            GameConfig::new(2, 3, 30).validate(),
            Err(ConfigError::InvalidSize { size: 2 })
        );
        assert_eq!(
            GameConfig::new(11, 3, 30).validate(),
            Err(ConfigError::InvalidSize { size: 11 })
        );
    }

    #[test]
    fn test_win_length_out_of_range() {
        assert_eq!(
            GameConfig::new(5, 2, 30).validate(),
            Err(ConfigError::InvalidWinLength { win_length: 2, size: 5 })
        );
        assert_eq!(
            GameConfig::new(5, 6, 30).validate(),
            Err(ConfigError::InvalidWinLength { win_length: 6, size: 5 })
        );
    }

    #[test]
    fn test_turn_time_out_of_range() {
        assert_eq!(
            GameConfig::new(3, 3, 4).validate(),
            Err(ConfigError::InvalidTurnTime { turn_time_sec: 4 })
        );
        assert_eq!(
            GameConfig::new(3, 3, 181).validate(),
            Err(ConfigError::InvalidTurnTime { turn_time_sec: 181 })
        );
    }

    #[test]
    fn test_from_raw_rejects_non_integers() {
        assert_eq!(
            GameConfig::from_raw(3.5, 3.0, 30.0),
            Err(ConfigError::InvalidIntegerValue)
        );
        assert_eq!(
            GameConfig::from_raw(3.0, 3.0, f64::NAN),
            Err(ConfigError::InvalidIntegerValue)
        );
    }

    #[test]
    fn test_from_raw_accepts_integral_values() {
        let config = GameConfig::from_raw(5.0, 4.0, 30.0).unwrap();
        assert_eq!(config, GameConfig::new(5, 4, 30));
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ConfigError::InvalidIntegerValue.code(), "INVALID_INTEGER_VALUE");
        assert_eq!(ConfigError::InvalidSize { size: 2 }.code(), "INVALID_SIZE");
        assert_eq!(
            ConfigError::InvalidWinLength { win_length: 2, size: 5 }.code(),
            "INVALID_WIN_LENGTH"
        );
        assert_eq!(
            ConfigError::InvalidTurnTime { turn_time_sec: 1 }.code(),
            "INVALID_TURN_TIME"
        );
    }

    #[test]
    fn test_presets_are_valid() {
        assert_eq!(GAME_PRESETS.len(), 3);
        for preset in GAME_PRESETS.iter() {
            assert_eq!(preset.config.validate(), Ok(()), "preset {}", preset.id);
            assert_eq!(preset.config.preset_id.as_deref(), Some(preset.id));
        }
    }

    #[test]
    fn test_preset_lookup() {
        assert_eq!(preset_by_id("classic-3").map(|p| p.config.size), Some(3));
        assert!(preset_by_id("unknown").is_none());
    }

    #[test]
    fn test_turn_time_ms() {
        assert_eq!(GameConfig::new(3, 3, 30).turn_time_ms(), 30_000);
    }
}
