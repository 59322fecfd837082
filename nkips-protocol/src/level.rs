//! Routing levels.
//!
//! Every level has two stable numbers: its wire mask (a single bit, used in
//! command and notification frames) and its position in the level list
//! (used to address matrix rows). Both come from [`LEVELS`]; nothing else
//! in the workspace should hard-code either.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A routable signal level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    MdVideo,
    SdiVideo,
    AesAudio1,
    AesAudio2,
    AnalogVideo,
    AnalogAudio1,
    AnalogAudio2,
    MachineControl,
}

/// Level table: (level, wire mask, display name, short name), in list order.
pub const LEVELS: [(Level, u32, &str, &str); 8] = [
    (Level::MdVideo, 1, "MD Video", "MD Vid"),
    (Level::SdiVideo, 2, "SDI Video", "SDI Vid"),
    (Level::AesAudio1, 4, "AES Audio 1", "AES Aud 1"),
    (Level::AesAudio2, 8, "AES Audio 2", "AES Aud 2"),
    (Level::AnalogVideo, 16, "Analog Video", "An Vid"),
    (Level::AnalogAudio1, 32, "Analog Audio 1", "An Aud 1"),
    (Level::AnalogAudio2, 64, "Analog Audio 2", "An Aud 2"),
    (Level::MachineControl, 128, "Machine Control", "Mach Ctrl"),
];

impl Level {
    /// All levels in list order.
    pub const ALL: [Level; 8] = [
        Level::MdVideo,
        Level::SdiVideo,
        Level::AesAudio1,
        Level::AesAudio2,
        Level::AnalogVideo,
        Level::AnalogAudio1,
        Level::AnalogAudio2,
        Level::MachineControl,
    ];

    /// Zero-based position in the level list.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Returns the level at a zero-based list position.
    pub fn from_index(index: usize) -> Option<Level> {
        LEVELS.get(index).map(|(level, ..)| *level)
    }

    /// Wire mask of this level.
    pub fn mask(self) -> u32 {
        LEVELS[self.index()].1
    }

    /// Looks up a level by its wire mask.
    pub fn from_mask(mask: u32) -> Result<Level, ProtocolError> {
        LEVELS
            .iter()
            .find(|(_, m, ..)| *m == mask)
            .map(|(level, ..)| *level)
            .ok_or(ProtocolError::UnknownLevelMask(mask))
    }

    /// Display name, as shown on router control panels.
    pub fn name(self) -> &'static str {
        LEVELS[self.index()].2
    }

    /// Abbreviated panel name.
    pub fn short_name(self) -> &'static str {
        LEVELS[self.index()].3
    }

    /// The first `count` levels in list order (clamped to the table size).
    pub fn first(count: usize) -> &'static [Level] {
        &Self::ALL[..count.min(Self::ALL.len())]
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Level {
    type Err = ProtocolError;

    /// Accepts the display name, the short name, the snake_case identifier,
    /// a 1-based list position or a `0x`-prefixed wire mask.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let normalized = squash(trimmed);

        if let Some(hex) = normalized.strip_prefix("0x") {
            let mask = u32::from_str_radix(hex, 16)
                .map_err(|_| ProtocolError::UnknownLevel(trimmed.to_string()))?;
            return Level::from_mask(mask);
        }

        if let Ok(position) = normalized.parse::<usize>() {
            return position
                .checked_sub(1)
                .and_then(Level::from_index)
                .ok_or_else(|| ProtocolError::UnknownLevel(trimmed.to_string()));
        }

        LEVELS
            .iter()
            .find(|(_, _, name, short)| squash(name) == normalized || squash(short) == normalized)
            .map(|(level, ..)| *level)
            .ok_or_else(|| ProtocolError::UnknownLevel(trimmed.to_string()))
    }
}

/// Lowercases and drops separators so "AES Audio 1", "aes-audio-1" and
/// "aes_audio1" compare equal.
fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}
