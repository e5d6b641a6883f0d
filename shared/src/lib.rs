use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_FREQUENCY: f64 = 440.0;
pub const DEFAULT_FREQUENCY_TOLERANCE: f64 = 150.0;
pub const DEFAULT_TARGET_BAND_MIN: f64 = 256.0;
pub const DEFAULT_TARGET_BAND_MAX: f64 = 2048.0;
pub const DEFAULT_SCORE_INCREMENT: u32 = 10;

/// Opaque connection identity assigned by the transport. Unique per live
/// connection and never reused while that connection is alive.
pub type ConnectionId = u32;

/// Gameplay tuning carried from the CLI into the round engine.
///
/// Tolerance and band are configuration rather than literals because they
/// changed between deployments; the defaults are the current live values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GameConfig {
    /// Maximum absolute frequency difference still counted as a match.
    pub frequency_tolerance: f64,
    /// Lower bound of the target draw band (inclusive).
    pub target_band_min: f64,
    /// Upper bound of the target draw band (exclusive).
    pub target_band_max: f64,
    /// Base score awarded for a match, before the streak bonus.
    pub score_increment: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            frequency_tolerance: DEFAULT_FREQUENCY_TOLERANCE,
            target_band_min: DEFAULT_TARGET_BAND_MIN,
            target_band_max: DEFAULT_TARGET_BAND_MAX,
            score_increment: DEFAULT_SCORE_INCREMENT,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Client -> server
    Connect {
        player_id: String,
    },
    Disconnect,
    StartRound,
    SubmitRound,
    PlayerUpdate {
        frequency: f64,
    },

    // Server -> client
    Connected {
        connection_id: ConnectionId,
    },
    GameStateUpdate {
        round_active: bool,
        target_frequency: f64,
        players: BTreeMap<ConnectionId, PlayerView>,
    },
    Disconnected {
        reason: String,
    },
}

/// Public projection of a player session, broadcast to every client.
///
/// Nothing here is private: clients render all of it, including other
/// players' live frequencies.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlayerView {
    pub id: String,
    pub name: String,
    pub score: u32,
    pub streak: u32,
    pub current_frequency: f64,
    pub is_matched: bool,
}
