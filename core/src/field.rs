use hashbrown::{HashMap, HashSet};
use rand::prelude::*;
use smallvec::SmallVec;
use std::collections::VecDeque;

use jirai_protocol::{CellState, CellView, ChunkView, PlayerId, UncoveredCell};

use crate::*;

/// Mine-exclusion zone around an active player's anchor, measured in
/// Chebyshev distance. Consulted only when a cell's mine identity is first
/// resolved; never retroactive.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SafeZone {
    pub center: Coord2,
    pub radius: u32,
}

impl SafeZone {
    pub fn contains(&self, pos: Coord2) -> bool {
        chebyshev(self.center, pos) <= self.radius
    }
}

/// Result of uncovering a single cell, including everything a flood fill
/// opened from it.
#[derive(Clone, Debug, PartialEq)]
pub struct UncoverOutcome {
    pub hit_mine: bool,
    pub cells: Vec<UncoveredCell>,
}

/// Cells affected by clearing a dead player's ownership: the territory to
/// hand to the recovery scheduler, and neighbor flags orphaned by it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OwnershipClear {
    pub cells_to_reset: Vec<Coord2>,
    pub flags_to_remove: Vec<Coord2>,
}

/// Single source of truth for the unbounded grid: mine identity, cover
/// state, ownership, and flags, all as sparse maps where an absent key is
/// the default (covered, unowned, unflagged, mine undecided).
pub struct SpatialMineField {
    mine_probability: f64,
    chunk_size: Coord,
    activation_radius: Coord,
    rng: SmallRng,
    /// Memoized mine identities. Once present, an entry never changes until
    /// the cell is recovered.
    mines: HashMap<Coord2, bool>,
    uncovered: HashSet<Coord2>,
    owners: HashMap<Coord2, PlayerId>,
    flags: HashSet<Coord2>,
    /// Adjacent-mine counts frozen at first uncover.
    adjacency: HashMap<Coord2, u8>,
    safe_zones: Vec<SafeZone>,
    /// Cached mine-hidden chunk views; privileged reads bypass this.
    chunk_cache: HashMap<Coord2, ChunkView>,
}

impl SpatialMineField {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            mine_probability: config.mine_probability,
            chunk_size: config.chunk_size,
            activation_radius: config.activation_radius,
            rng: SmallRng::seed_from_u64(config.seed),
            mines: HashMap::new(),
            uncovered: HashSet::new(),
            owners: HashMap::new(),
            flags: HashSet::new(),
            adjacency: HashMap::new(),
            safe_zones: Vec::new(),
            chunk_cache: HashMap::new(),
        }
    }

    pub fn is_uncovered(&self, pos: Coord2) -> bool {
        self.uncovered.contains(&pos)
    }

    pub fn is_flagged(&self, pos: Coord2) -> bool {
        self.flags.contains(&pos)
    }

    pub fn owner(&self, pos: Coord2) -> Option<PlayerId> {
        self.owners.get(&pos).copied()
    }

    /// Whether the cell has been resolved as a mine. Peeks at committed
    /// state only; never rolls.
    pub fn is_resolved_mine(&self, pos: Coord2) -> bool {
        self.mines.get(&pos) == Some(&true)
    }

    /// Adjacent-mine count frozen at the cell's first uncover, if any.
    pub fn adjacent_mines(&self, pos: Coord2) -> Option<u8> {
        self.adjacency.get(&pos).copied()
    }

    fn in_safe_zone(&self, pos: Coord2) -> bool {
        self.safe_zones.iter().any(|zone| zone.contains(pos))
    }

    /// Replaces the active safe-zone set. Affects only future mine
    /// resolutions.
    pub fn set_safe_zones(&mut self, zones: Vec<SafeZone>) {
        self.safe_zones = zones;
    }

    /// Fixes the mine identity of a cell, rolling it on first call. Cells
    /// inside an active safe zone always fix as non-mine. Idempotent: once
    /// fixed the stored value is returned forever (until recovery).
    pub fn resolve_mine(&mut self, pos: Coord2) -> bool {
        if let Some(&is_mine) = self.mines.get(&pos) {
            return is_mine;
        }

        let is_mine = !self.in_safe_zone(pos) && self.rng.random::<f64>() < self.mine_probability;
        self.mines.insert(pos, is_mine);
        self.invalidate_around(pos);
        is_mine
    }

    /// Pre-resolves every undecided cell within a square radius, so that a
    /// freshly uncovered cell never counts against undecided neighbors.
    pub fn assign_mines_in_radius(&mut self, pos: Coord2, radius: Coord) {
        for neighbor in iter_square(pos, radius) {
            self.resolve_mine(neighbor);
        }
    }

    /// Resolves a cell's own identity and its neighborhood; for non-mines,
    /// freezes the adjacent-mine count on first activation.
    pub fn activate(&mut self, pos: Coord2) -> (bool, Option<u8>) {
        let is_mine = self.resolve_mine(pos);
        self.assign_mines_in_radius(pos, self.activation_radius);

        if is_mine {
            return (true, None);
        }

        let count = match self.adjacency.get(&pos) {
            Some(&count) => count,
            None => {
                let count = iter_neighbors(pos)
                    .filter(|&neighbor| self.is_resolved_mine(neighbor))
                    .count() as u8;
                self.adjacency.insert(pos, count);
                count
            }
        };
        (false, Some(count))
    }

    /// Uncovers a cell for a player, flood-filling through any connected
    /// zero-adjacency region. Returns every cell opened, origin first.
    pub fn uncover(&mut self, pos: Coord2, player: PlayerId) -> Result<UncoverOutcome> {
        if self.is_uncovered(pos) {
            return Err(GameError::AlreadyUncovered);
        }
        if self.is_flagged(pos) {
            return Err(GameError::Flagged);
        }

        let (hit_mine, adjacent) = self.activate(pos);
        self.uncovered.insert(pos);
        self.owners.insert(pos, player);
        self.invalidate_around(pos);

        let mut cells = vec![UncoveredCell {
            x: pos.0,
            y: pos.1,
            is_mine: hit_mine,
            adjacent_mines: adjacent,
        }];

        if adjacent == Some(0) {
            let mut visited: HashSet<Coord2> = HashSet::from_iter([pos]);
            let mut to_visit: VecDeque<_> = iter_neighbors(pos).collect();

            while let Some(visit_pos) = to_visit.pop_front() {
                if !visited.insert(visit_pos) {
                    continue;
                }
                if self.is_uncovered(visit_pos) || self.is_flagged(visit_pos) {
                    continue;
                }

                let (is_mine, visit_adjacent) = self.activate(visit_pos);
                if is_mine {
                    continue;
                }

                self.uncovered.insert(visit_pos);
                self.owners.insert(visit_pos, player);
                self.invalidate_around(visit_pos);
                cells.push(UncoveredCell {
                    x: visit_pos.0,
                    y: visit_pos.1,
                    is_mine: false,
                    adjacent_mines: visit_adjacent,
                });

                if visit_adjacent == Some(0) {
                    to_visit.extend(
                        iter_neighbors(visit_pos).filter(|neighbor| !visited.contains(neighbor)),
                    );
                }
            }
        }

        Ok(UncoverOutcome { hit_mine, cells })
    }

    /// Flips the flag bit on a covered cell, returning the new state.
    pub fn toggle_flag(&mut self, pos: Coord2) -> Result<bool> {
        if self.is_uncovered(pos) {
            return Err(GameError::AlreadyUncovered);
        }

        let flagged = if self.flags.remove(&pos) {
            false
        } else {
            self.flags.insert(pos);
            true
        };
        self.invalidate_around(pos);
        Ok(flagged)
    }

    /// Every cell currently owned by the player, in stable coordinate order.
    pub fn player_cells(&self, player: PlayerId) -> Vec<Coord2> {
        let mut cells: Vec<_> = self
            .owners
            .iter()
            .filter(|&(_, &owner)| owner == player)
            .map(|(&pos, _)| pos)
            .collect();
        cells.sort_unstable();
        cells
    }

    /// Enumerates a dead player's territory and clears any flag orphaned
    /// next to it. Cell state itself is reset later, cell by cell, via
    /// [`Self::recover`]; ownership entries stay until then so a second
    /// enumeration still finds not-yet-recovered cells.
    pub fn clear_ownership(&mut self, player: PlayerId) -> OwnershipClear {
        let cells_to_reset = self.player_cells(player);

        let mut orphaned: HashSet<Coord2> = HashSet::new();
        for &pos in &cells_to_reset {
            for neighbor in iter_neighbors(pos) {
                if self.is_flagged(neighbor) {
                    orphaned.insert(neighbor);
                }
            }
        }

        let mut flags_to_remove: Vec<_> = orphaned.into_iter().collect();
        flags_to_remove.sort_unstable();
        for &pos in &flags_to_remove {
            self.flags.remove(&pos);
            self.invalidate_around(pos);
        }

        OwnershipClear {
            cells_to_reset,
            flags_to_remove,
        }
    }

    fn has_uncovered_neighbor(&self, pos: Coord2) -> bool {
        iter_neighbors(pos).any(|neighbor| self.is_uncovered(neighbor))
    }

    fn has_foreign_territory_nearby(&self, pos: Coord2, player: PlayerId) -> bool {
        iter_square(pos, self.activation_radius)
            .any(|neighbor| self.owner(neighbor).is_some_and(|owner| owner != player))
    }

    /// Resets a cell to its pristine, undecided state and opportunistically
    /// un-resolves abandoned neighbors so stale mine rolls around vacated
    /// territory do not persist. The neighbor sweep is best effort.
    pub fn recover(&mut self, pos: Coord2, player: Option<PlayerId>) {
        self.owners.remove(&pos);
        self.uncovered.remove(&pos);
        self.flags.remove(&pos);
        self.mines.remove(&pos);
        self.adjacency.remove(&pos);
        self.invalidate_around(pos);

        for neighbor in iter_square(pos, self.activation_radius) {
            if !self.mines.contains_key(&neighbor) {
                continue;
            }
            if self.is_uncovered(neighbor) || self.owner(neighbor).is_some() {
                continue;
            }
            if self.has_uncovered_neighbor(neighbor) {
                continue;
            }
            if let Some(player) = player {
                if self.has_foreign_territory_nearby(neighbor, player) {
                    continue;
                }
            }

            self.mines.remove(&neighbor);
            self.adjacency.remove(&neighbor);
            self.invalidate_around(neighbor);
        }
    }

    /// Builds the sparse view of one chunk. Only cells with non-default
    /// state (or covered cells bordering uncovered ones, so clients can
    /// render edges) are listed. Mine identity of covered cells is included
    /// only under `include_mines`; those privileged reads bypass the cache.
    pub fn chunk(&mut self, chunk_pos: Coord2, include_mines: bool) -> ChunkView {
        if !include_mines
            && let Some(cached) = self.chunk_cache.get(&chunk_pos)
        {
            return cached.clone();
        }

        let mut cells = Vec::new();
        // Chunk keys arrive unvalidated from the wire; a key whose cells
        // fall outside the coordinate range is served empty.
        if let Some((origin_x, origin_y)) = chunk_origin(chunk_pos, self.chunk_size) {
            for local_y in 0..self.chunk_size {
                for local_x in 0..self.chunk_size {
                    let Some(pos) = origin_x
                        .checked_add(local_x)
                        .zip(origin_y.checked_add(local_y))
                    else {
                        continue;
                    };
                    if let Some(cell) = self.cell_view(pos, include_mines) {
                        cells.push(cell);
                    }
                }
            }
        }

        let view = ChunkView {
            x: chunk_pos.0,
            y: chunk_pos.1,
            cells,
        };
        if !include_mines {
            self.chunk_cache.insert(chunk_pos, view.clone());
        }
        view
    }

    /// Uncovered-cell view for client redraws (recovery reports neighbors
    /// whose rendering depends on a now-vacant cell).
    pub fn uncovered_view(&self, pos: Coord2) -> Option<CellView> {
        self.is_uncovered(pos)
            .then(|| self.cell_view(pos, false))
            .flatten()
    }

    fn cell_view(&self, pos: Coord2, include_mines: bool) -> Option<CellView> {
        let uncovered = self.is_uncovered(pos);
        let flagged = self.is_flagged(pos);
        let resolved = self.mines.contains_key(&pos);

        if !(uncovered || flagged || resolved || self.has_uncovered_neighbor(pos)) {
            return None;
        }

        let (is_mine, adjacent_mines) = if uncovered {
            (Some(self.is_resolved_mine(pos)), self.adjacent_mines(pos))
        } else if include_mines {
            (self.mines.get(&pos).copied(), None)
        } else {
            (None, None)
        };

        Some(CellView {
            x: pos.0,
            y: pos.1,
            state: if uncovered {
                CellState::Uncovered
            } else {
                CellState::Covered
            },
            owner: self.owner(pos),
            flag: flagged,
            is_mine,
            adjacent_mines,
        })
    }

    /// Drops cached chunks covering a cell and its 8-neighborhood, so a
    /// mutation on a chunk border also invalidates the chunks it bleeds
    /// into.
    fn invalidate_around(&mut self, pos: Coord2) {
        let mut seen: SmallVec<[Coord2; 4]> = SmallVec::new();
        for cell in core::iter::once(pos).chain(iter_neighbors(pos)) {
            let chunk = world_to_chunk(cell, self.chunk_size);
            if !seen.contains(&chunk) {
                seen.push(chunk);
                self.chunk_cache.remove(&chunk);
            }
        }
    }

    /// Test-only handle for pinning mine identities into known layouts.
    #[cfg(test)]
    pub(crate) fn force_mine(&mut self, pos: Coord2, is_mine: bool) {
        self.mines.insert(pos, is_mine);
        self.invalidate_around(pos);
    }
}
