//! Transport-agnostic wire types shared between the simulation core and
//! whatever session layer drives it. Everything here is plain data with
//! stable serde names; the core never sees sockets and the transport
//! never sees grid internals.

use serde::{Deserialize, Serialize};

/// Single world-coordinate axis. The grid is unbounded in both directions.
pub type Coord = i32;

/// Two-dimensional world coordinates `(x, y)`.
pub type Coord2 = (Coord, Coord);

/// Server-assigned player identifier, stable for the lifetime of a session.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub u32);

impl core::fmt::Display for PlayerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "p{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellState {
    #[default]
    Covered,
    Uncovered,
}

impl CellState {
    pub const fn is_uncovered(self) -> bool {
        matches!(self, Self::Uncovered)
    }
}

/// Per-cell view inside a chunk. Absent optional fields mean the default:
/// covered, unowned, unflagged, mine identity hidden.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellView {
    pub x: Coord,
    pub y: Coord,
    #[serde(default, skip_serializing_if = "is_covered")]
    pub state: CellState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<PlayerId>,
    #[serde(default, skip_serializing_if = "core::ops::Not::not")]
    pub flag: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_mine: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjacent_mines: Option<u8>,
}

fn is_covered(state: &CellState) -> bool {
    !state.is_uncovered()
}

/// Sparse chunk payload: only cells with non-default state are listed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkView {
    pub x: Coord,
    pub y: Coord,
    pub cells: Vec<CellView>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerView {
    pub id: PlayerId,
    pub x: Coord,
    pub y: Coord,
    pub color: String,
    pub score: u32,
    pub alive: bool,
}

/// A cell revealed by a move, chord, spawn, or flood fill. A detonated
/// mine carries no adjacency count; counts are frozen for safe cells only.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UncoveredCell {
    pub x: Coord,
    pub y: Coord,
    pub is_mine: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjacent_mines: Option<u8>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellPos {
    pub x: Coord,
    pub y: Coord,
}

impl From<Coord2> for CellPos {
    fn from((x, y): Coord2) -> Self {
        Self { x, y }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FlagChange {
    pub x: Coord,
    pub y: Coord,
    pub flagged: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub id: PlayerId,
    pub score: u32,
}

/// Broadcast payload for everything that changes the visible board or a
/// player's standing. The tag names are part of the wire format.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GameUpdate {
    #[serde(rename_all = "camelCase")]
    Spawn {
        player_id: PlayerId,
        uncovered_cells: Vec<UncoveredCell>,
    },
    #[serde(rename_all = "camelCase")]
    Move {
        player_id: PlayerId,
        uncovered_cells: Vec<UncoveredCell>,
        score: u32,
    },
    #[serde(rename_all = "camelCase")]
    Death {
        player_id: PlayerId,
        mine_cell: CellPos,
        player_cells: Vec<CellPos>,
        uncovered_cells: Vec<UncoveredCell>,
        score: u32,
        final_score: u32,
    },
    #[serde(rename_all = "camelCase")]
    NoMoves {
        player_id: PlayerId,
        player_cells: Vec<CellPos>,
        uncovered_cells: Vec<UncoveredCell>,
        score: u32,
        final_score: u32,
    },
    #[serde(rename_all = "camelCase")]
    Flag {
        player_id: PlayerId,
        x: Coord,
        y: Coord,
        flagged: bool,
    },
    #[serde(rename_all = "camelCase")]
    AutoFlag {
        player_id: PlayerId,
        flags: Vec<FlagChange>,
    },
    #[serde(rename_all = "camelCase")]
    Respawn {
        player_id: PlayerId,
        x: Coord,
        y: Coord,
        uncovered_cells: Vec<UncoveredCell>,
    },
}

/// Outbound event surface of the simulation. The session layer decides
/// fan-out (broadcast vs. single session); the core only states what
/// happened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Event {
    #[serde(rename_all = "camelCase")]
    Init {
        player_id: PlayerId,
        player: PlayerView,
        active_players: Vec<PlayerView>,
    },
    PlayerJoined(PlayerView),
    PlayerLeft(PlayerId),
    GameUpdate(GameUpdate),
    #[serde(rename_all = "camelCase")]
    CellsCleared {
        player_id: PlayerId,
        cells: Vec<CellPos>,
    },
    #[serde(rename_all = "camelCase")]
    FlagsRemoved {
        player_id: PlayerId,
        flags: Vec<CellPos>,
    },
    #[serde(rename_all = "camelCase")]
    CellRecovered {
        player_id: PlayerId,
        x: Coord,
        y: Coord,
    },
    CellsUpdated {
        cells: Vec<CellView>,
    },
    #[serde(rename_all = "camelCase")]
    RecoveryComplete {
        player_id: PlayerId,
    },
    Chunks(Vec<ChunkView>),
    Leaderboard(Vec<ScoreEntry>),
}

/// Inbound intents, one per message the transport accepts from a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Intent {
    Move {
        x: Coord,
        y: Coord,
    },
    Flag {
        x: Coord,
        y: Coord,
    },
    Chord {
        x: Coord,
        y: Coord,
    },
    #[serde(rename_all = "camelCase")]
    RequestChunks {
        keys: Vec<Coord2>,
        #[serde(default)]
        include_mines: bool,
    },
    Leave,
}
