//! Core type definitions for the playerstore layer.
//!
//! Identifiers are store-assigned integers, stable for the lifetime of a
//! world. The [`PlayerRecord`] is owned by the calling game logic; the
//! store façade only reads and writes its fields.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::items::ItemBlock;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Stable numeric identifier assigned by the store to a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlayerId(pub u32);

/// Identifier of the account a player belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u32);

/// Identifier of the game world a player lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorldId(pub u32);

/// Identifier of a guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GuildId(pub u32);

/// Identifier of a town.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TownId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Player flags
// ---------------------------------------------------------------------------

/// Named permission / behavior bits stored on a player row.
///
/// The discriminant is the bit index within [`PlayerFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PlayerFlag {
    /// Player cannot be attacked by other players.
    CannotBeAttacked = 0,
    /// Player cannot attack other players.
    CannotAttackPlayer = 1,
    /// Player does not gain combat infamy (skull / unjust tracking skips them).
    NotGainInFight = 2,
    /// Player shows up on special VIP lists.
    SpecialVip = 3,
    /// Player is ignored by monsters.
    IgnoredByMonsters = 4,
    /// Player never loses experience on death.
    NotGainExperience = 5,
}

/// Bit set of [`PlayerFlag`]s as persisted on the player row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerFlags(pub u64);

impl PlayerFlags {
    /// Whether the given flag bit is set.
    #[must_use]
    pub fn contains(self, flag: PlayerFlag) -> bool {
        self.0 & (1 << (flag as u8)) != 0
    }

    /// Return a copy with the given flag bit set.
    #[must_use]
    pub fn with(self, flag: PlayerFlag) -> Self {
        Self(self.0 | (1 << (flag as u8)))
    }
}

// ---------------------------------------------------------------------------
// Time windows
// ---------------------------------------------------------------------------

/// Trailing time window over which unjust kills are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnjustKillPeriod {
    /// Last 24 hours.
    Day,
    /// Last 7 days.
    Week,
    /// Last 30 days.
    Month,
}

impl UnjustKillPeriod {
    /// Window length in seconds.
    #[must_use]
    pub fn window_secs(self) -> i64 {
        match self {
            Self::Day => 24 * 60 * 60,
            Self::Week => 7 * 24 * 60 * 60,
            Self::Month => 30 * 24 * 60 * 60,
        }
    }
}

impl fmt::Display for UnjustKillPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Day => write!(f, "day"),
            Self::Week => write!(f, "week"),
            Self::Month => write!(f, "month"),
        }
    }
}

// ---------------------------------------------------------------------------
// Spatial
// ---------------------------------------------------------------------------

/// A position in the game world.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate.
    pub y: i32,
    /// Floor / height level.
    pub z: i32,
}

// ---------------------------------------------------------------------------
// Player record
// ---------------------------------------------------------------------------

/// The slice of player state this layer loads and saves.
///
/// Created and owned by the caller; [`crate::PlayerStore::load_player`]
/// fills it in and [`crate::PlayerStore::save_player`] persists it. The
/// façade never takes ownership.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlayerRecord {
    /// Store-assigned identifier. `None` until the record has been loaded
    /// or created.
    pub id: Option<PlayerId>,
    /// Display name, unique under case-insensitive comparison.
    pub name: String,
    /// Owning account.
    pub account_id: AccountId,
    /// World the player lives on.
    pub world_id: WorldId,
    /// Permission group.
    pub group_id: u32,
    /// Permission / behavior flag bits.
    pub flags: PlayerFlags,
    /// Character level.
    pub level: u32,
    /// Total experience points.
    pub experience: u64,
    /// Current health.
    pub health: i32,
    /// Maximum health.
    pub health_max: i32,
    /// Current mana.
    pub mana: i32,
    /// Maximum mana.
    pub mana_max: i32,
    /// Home town.
    pub town_id: TownId,
    /// Last known position.
    pub position: Position,
    /// Equipped / carried inventory as ordered slot blocks.
    pub inventory: Vec<ItemBlock>,
    /// Unix timestamp of the last login.
    pub last_login: i64,
    /// Unix timestamp of the last logout.
    pub last_logout: i64,
    /// Last IP the account connected from, as a packed IPv4 address.
    pub last_ip: u32,
}

impl Default for AccountId {
    fn default() -> Self {
        Self(0)
    }
}

impl Default for WorldId {
    fn default() -> Self {
        Self(0)
    }
}

impl Default for TownId {
    fn default() -> Self {
        Self(0)
    }
}

// ---------------------------------------------------------------------------
// Deaths
// ---------------------------------------------------------------------------

/// One death of a player, as recorded by game logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeathEntry {
    /// Unix timestamp of the death.
    pub time: i64,
    /// Display name of the killer (player or creature).
    pub killer_name: String,
    /// Killer's player identifier, when the killer is a player and the
    /// caller already resolved it. Resolved from the name cache otherwise.
    pub killer_id: Option<PlayerId>,
    /// Whether game rules flagged this kill as unjustified.
    pub unjustified: bool,
}

/// Ordered list of deaths, oldest first. Append-only from this layer's
/// perspective.
pub type DeathList = Vec<DeathEntry>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
