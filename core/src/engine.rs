//! Move resolution over the field: adjacency gating, chord resolution, and
//! flag deduction. Lifecycle side effects (death, scoring) live in
//! [`crate::game`]; everything here is pure board legality plus the grid
//! mutations a legal move implies.

use jirai_protocol::{PlayerId, UncoveredCell};
use smallvec::SmallVec;

use crate::field::{SpatialMineField, UncoverOutcome};
use crate::*;

/// What a legal chord did: either a reveal of every covered-unflagged
/// neighbor, or an auto-flag of the neighbors provably mined by
/// elimination.
#[derive(Clone, Debug, PartialEq)]
pub enum ChordResolution {
    Uncovered {
        cells: Vec<UncoveredCell>,
        mine_cell: Option<Coord2>,
    },
    AutoFlagged(Vec<Coord2>),
}

/// True when some neighbor of `pos` is an uncovered cell owned by `player`.
pub fn is_adjacent_to_territory(field: &SpatialMineField, player: PlayerId, pos: Coord2) -> bool {
    iter_neighbors(pos)
        .any(|neighbor| field.is_uncovered(neighbor) && field.owner(neighbor) == Some(player))
}

/// Uncovers a target adjacent to the player's territory. `force` bypasses
/// the adjacency gate for privileged paths (spawn reveals, debug tooling).
pub fn uncover_move(
    field: &mut SpatialMineField,
    player: PlayerId,
    pos: Coord2,
    force: bool,
) -> Result<UncoverOutcome> {
    if field.is_uncovered(pos) {
        return Err(GameError::AlreadyUncovered);
    }
    if !force && !is_adjacent_to_territory(field, player, pos) {
        return Err(GameError::NotAdjacent);
    }
    field.uncover(pos, player)
}

/// Toggles a flag on a covered cell adjacent to the player's territory.
pub fn toggle_flag(field: &mut SpatialMineField, player: PlayerId, pos: Coord2) -> Result<bool> {
    if !is_adjacent_to_territory(field, player, pos) {
        return Err(GameError::NotAdjacent);
    }
    field.toggle_flag(pos)
}

/// Resolves a chord on one of the player's numbered cells.
///
/// With a matching flag count every covered-unflagged neighbor is
/// uncovered. When flags fall short but every remaining covered neighbor is
/// a mine by elimination, those neighbors are auto-flagged instead; each
/// candidate is verified against its resolved identity first, and a
/// mismatch fails the whole chord without touching the board.
pub fn chord(
    field: &mut SpatialMineField,
    player: PlayerId,
    pos: Coord2,
) -> Result<ChordResolution> {
    if !field.is_uncovered(pos) || field.owner(pos) != Some(player) {
        return Err(GameError::NotOwnedUncovered);
    }

    let number = field.adjacent_mines(pos).unwrap_or(0);
    if number == 0 {
        return Err(GameError::NoAdjacentMines);
    }

    let mut flag_count = 0u8;
    let mut covered_unflagged: SmallVec<[Coord2; 8]> = SmallVec::new();
    for neighbor in iter_neighbors(pos) {
        if field.is_flagged(neighbor) {
            flag_count += 1;
        } else if !field.is_uncovered(neighbor) {
            covered_unflagged.push(neighbor);
        }
    }

    if flag_count == number {
        let mut cells = Vec::new();
        let mut mine_cell = None;
        for &target in &covered_unflagged {
            // An earlier neighbor's flood fill may have already opened this
            // one; that is not an error for the chord as a whole.
            if let Ok(outcome) = field.uncover(target, player) {
                if outcome.hit_mine && mine_cell.is_none() {
                    mine_cell = Some(target);
                }
                cells.extend(outcome.cells);
            }
        }
        return Ok(ChordResolution::Uncovered { cells, mine_cell });
    }

    if !covered_unflagged.is_empty() && flag_count + covered_unflagged.len() as u8 == number {
        // Provably mined by elimination; verify against committed identity
        // before flagging anything. Read-only on purpose: a failing chord
        // must not commit mine rolls either. Neighbors of a numbered cell
        // are always resolved already (activation covers them), so reading
        // loses nothing.
        for &target in &covered_unflagged {
            if !field.is_resolved_mine(target) {
                return Err(GameError::FlagCountMismatch);
            }
        }

        let mut flags = Vec::with_capacity(covered_unflagged.len());
        for &target in &covered_unflagged {
            if field.toggle_flag(target)? {
                flags.push(target);
            }
        }
        return Ok(ChordResolution::AutoFlagged(flags));
    }

    Err(GameError::FlagCountMismatch)
}

/// A player still has a legal move iff some cell of their territory has a
/// covered neighbor that is not a resolved mine. Deliberately reads the
/// committed mine state only; undecided cells count as playable.
pub fn has_legal_move(field: &SpatialMineField, player: PlayerId) -> bool {
    field.player_cells(player).iter().any(|&pos| {
        iter_neighbors(pos)
            .any(|neighbor| !field.is_uncovered(neighbor) && !field.is_resolved_mine(neighbor))
    })
}
