use rand::prelude::*;
use web_time::Instant;

use jirai_protocol::{CellPos, Event, FlagChange, GameUpdate, Intent, PlayerId, UncoveredCell};

use crate::engine::{self, ChordResolution};
use crate::field::SpatialMineField;
use crate::player::{PlayerRegistry, find_spawn};
use crate::recovery::{RecoveryScheduler, Release};
use crate::*;

/// Spawn search draws from its own stream so mine rolls stay independent
/// of how many placements were tried.
const SPAWN_RNG_SALT: u64 = 0x5350_4157_4e21;

enum DeathCause {
    Mine(Coord2),
    NoMoves,
}

/// The authoritative simulation: owns the field, the player registry, and
/// the recovery scheduler. The transport layer constructs one instance,
/// feeds it intents and a periodic tick, and fans out the returned events.
pub struct Game {
    config: GameConfig,
    field: SpatialMineField,
    players: PlayerRegistry,
    recovery: RecoveryScheduler,
    rng: SmallRng,
}

impl Game {
    pub fn new(config: GameConfig) -> Self {
        Self {
            field: SpatialMineField::new(&config),
            players: PlayerRegistry::new(),
            recovery: RecoveryScheduler::new(&config),
            rng: SmallRng::seed_from_u64(config.seed ^ SPAWN_RNG_SALT),
            config,
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn field(&self) -> &SpatialMineField {
        &self.field
    }

    pub fn player(&self, id: PlayerId) -> Result<&Player> {
        self.players.get(id)
    }

    pub fn active_players(&self) -> Vec<jirai_protocol::PlayerView> {
        self.players.views()
    }

    pub fn leaderboard(&self) -> Event {
        Event::Leaderboard(self.players.leaderboard())
    }

    fn refresh_safe_zones(&mut self) {
        self.field
            .set_safe_zones(self.players.safe_zones(self.config.safe_radius));
    }

    /// Registers a new player: finds a spawn, reserves its safe zone, and
    /// performs the initial flood reveal. Returns the new id plus the
    /// events to deliver (`Init` to the joining session, the rest to
    /// everyone).
    pub fn join(&mut self) -> (PlayerId, Vec<Event>) {
        let spawn = find_spawn(&self.field, &self.players, &self.config, &mut self.rng);
        let id = self.players.register(spawn);
        // The new zone must be active before the first resolution around
        // the spawn point.
        self.refresh_safe_zones();

        let cells = self.spawn_reveal(id, spawn);

        let player = self.players.get(id).expect("player just registered");
        let view = player.view();
        let mut events = vec![
            Event::Init {
                player_id: id,
                player: view.clone(),
                active_players: self.players.views(),
            },
            Event::PlayerJoined(view),
        ];
        if !cells.is_empty() {
            events.push(Event::GameUpdate(GameUpdate::Spawn {
                player_id: id,
                uncovered_cells: cells,
            }));
        }
        (id, events)
    }

    /// Initial reveal at a spawn point, crediting one point per opened
    /// cell. The spawn site is inside the player's own safe zone, so this
    /// cannot detonate unless a last-resort placement relaxed validity.
    fn spawn_reveal(&mut self, id: PlayerId, spawn: Coord2) -> Vec<UncoveredCell> {
        match self.field.uncover(spawn, id) {
            Ok(outcome) => {
                if !outcome.hit_mine
                    && let Ok(player) = self.players.get_mut(id)
                {
                    player.add_score(outcome.cells.len() as u32);
                }
                outcome.cells
            }
            Err(reason) => {
                log::warn!("spawn reveal at {spawn:?} failed: {reason}");
                Vec::new()
            }
        }
    }

    /// Dispatches a wire intent onto the corresponding operation.
    pub fn handle(&mut self, id: PlayerId, intent: Intent, now: Instant) -> Result<Vec<Event>> {
        match intent {
            Intent::Move { x, y } => self.player_move(id, (x, y), false, now),
            Intent::Flag { x, y } => self.player_flag(id, (x, y)),
            Intent::Chord { x, y } => self.player_chord(id, (x, y), now),
            Intent::RequestChunks {
                keys,
                include_mines,
            } => Ok(vec![self.chunks(&keys, include_mines)]),
            Intent::Leave => Ok(self.leave(id)),
        }
    }

    /// Uncovers a covered cell adjacent to the player's territory. `force`
    /// bypasses the adjacency gate (privileged/debug paths only).
    pub fn player_move(
        &mut self,
        id: PlayerId,
        pos: Coord2,
        force: bool,
        now: Instant,
    ) -> Result<Vec<Event>> {
        if !self.players.get(id)?.alive {
            return Err(GameError::NotActive);
        }

        let outcome = engine::uncover_move(&mut self.field, id, pos, force)?;
        if outcome.hit_mine {
            return self.death(id, DeathCause::Mine(pos), outcome.cells, now);
        }

        let player = self.players.get_mut(id)?;
        player.add_score(outcome.cells.len() as u32);
        let score = player.score;

        if !engine::has_legal_move(&self.field, id) {
            return self.death(id, DeathCause::NoMoves, outcome.cells, now);
        }

        Ok(vec![Event::GameUpdate(GameUpdate::Move {
            player_id: id,
            uncovered_cells: outcome.cells,
            score,
        })])
    }

    pub fn player_flag(&mut self, id: PlayerId, pos: Coord2) -> Result<Vec<Event>> {
        if !self.players.get(id)?.alive {
            return Err(GameError::NotActive);
        }

        let flagged = engine::toggle_flag(&mut self.field, id, pos)?;
        Ok(vec![Event::GameUpdate(GameUpdate::Flag {
            player_id: id,
            x: pos.0,
            y: pos.1,
            flagged,
        })])
    }

    pub fn player_chord(&mut self, id: PlayerId, pos: Coord2, now: Instant) -> Result<Vec<Event>> {
        if !self.players.get(id)?.alive {
            return Err(GameError::NotAlive);
        }

        match engine::chord(&mut self.field, id, pos)? {
            ChordResolution::Uncovered { cells, mine_cell } => {
                if let Some(mine) = mine_cell {
                    return self.death(id, DeathCause::Mine(mine), cells, now);
                }

                let player = self.players.get_mut(id)?;
                player.add_score(cells.len() as u32);
                let score = player.score;

                if !engine::has_legal_move(&self.field, id) {
                    return self.death(id, DeathCause::NoMoves, cells, now);
                }

                Ok(vec![Event::GameUpdate(GameUpdate::Move {
                    player_id: id,
                    uncovered_cells: cells,
                    score,
                })])
            }
            ChordResolution::AutoFlagged(flags) => {
                Ok(vec![Event::GameUpdate(GameUpdate::AutoFlag {
                    player_id: id,
                    flags: flags
                        .into_iter()
                        .map(|(x, y)| FlagChange {
                            x,
                            y,
                            flagged: true,
                        })
                        .collect(),
                })])
            }
        }
    }

    pub fn chunks(&mut self, keys: &[Coord2], include_mines: bool) -> Event {
        Event::Chunks(
            keys.iter()
                .map(|&key| self.field.chunk(key, include_mines))
                .collect(),
        )
    }

    /// Removes a player entirely: any in-flight recovery is cancelled and
    /// their territory is returned to the pool immediately.
    pub fn leave(&mut self, id: PlayerId) -> Vec<Event> {
        self.recovery.cancel(id);

        // Ownership entries persist until each cell is recovered, so this
        // also catches cells a cancelled run never released.
        let clear = self.field.clear_ownership(id);
        for &pos in &clear.cells_to_reset {
            self.field.recover(pos, Some(id));
        }

        if self.players.remove(id).is_none() {
            return Vec::new();
        }
        self.refresh_safe_zones();

        let mut events = vec![Event::PlayerLeft(id)];
        if !clear.cells_to_reset.is_empty() {
            events.push(Event::CellsCleared {
                player_id: id,
                cells: clear.cells_to_reset.into_iter().map(CellPos::from).collect(),
            });
        }
        events
    }

    /// Periodic driver: promotes dead players past the respawn delay and
    /// advances recovery runs. Reference cadence is 1 Hz, but any cadence
    /// works; pacing derives from `now` alone.
    pub fn tick(&mut self, now: Instant) -> Vec<Event> {
        let mut events = Vec::new();

        for id in self
            .players
            .due_for_respawn(now, self.config.respawn_delay)
        {
            // Flush any straggling recovery before handing out new ground.
            if let Some(release) = self.recovery.finish(id) {
                events.extend(self.apply_release(release));
            }
            let residual = self.field.clear_ownership(id);
            for &pos in &residual.cells_to_reset {
                self.field.recover(pos, Some(id));
            }

            let spawn = find_spawn(&self.field, &self.players, &self.config, &mut self.rng);
            let Ok(player) = self.players.get_mut(id) else {
                continue;
            };
            player.respawn(spawn);
            self.refresh_safe_zones();

            let cells = self.spawn_reveal(id, spawn);
            events.push(Event::GameUpdate(GameUpdate::Respawn {
                player_id: id,
                x: spawn.0,
                y: spawn.1,
                uncovered_cells: cells,
            }));
        }

        for release in self.recovery.poll(now) {
            events.extend(self.apply_release(release));
        }
        events
    }

    /// Recovers released cells on the field and reports them, along with
    /// any uncovered neighbors whose rendered numbers may depend on the
    /// now-vacant cell.
    fn apply_release(&mut self, release: Release) -> Vec<Event> {
        let mut events = Vec::new();
        for &pos in &release.cells {
            self.field.recover(pos, Some(release.player_id));

            let updated: Vec<_> = iter_neighbors(pos)
                .filter_map(|neighbor| self.field.uncovered_view(neighbor))
                .collect();
            if !updated.is_empty() {
                events.push(Event::CellsUpdated { cells: updated });
            }
            events.push(Event::CellRecovered {
                player_id: release.player_id,
                x: pos.0,
                y: pos.1,
            });
        }
        if release.complete {
            events.push(Event::RecoveryComplete {
                player_id: release.player_id,
            });
        }
        events
    }

    /// Death transition shared by mine hits and no-moves exhaustion:
    /// capture the final score, drop the safe zone, clear ownership
    /// (reporting orphaned flags right away), and arm the recovery run.
    fn death(
        &mut self,
        id: PlayerId,
        cause: DeathCause,
        uncovered_cells: Vec<UncoveredCell>,
        now: Instant,
    ) -> Result<Vec<Event>> {
        let final_score = self.players.get_mut(id)?.die(now);
        self.refresh_safe_zones();

        let clear = self.field.clear_ownership(id);
        let mut events = Vec::new();
        if !clear.flags_to_remove.is_empty() {
            events.push(Event::FlagsRemoved {
                player_id: id,
                flags: clear.flags_to_remove.into_iter().map(CellPos::from).collect(),
            });
        }

        let player_cells: Vec<CellPos> = clear
            .cells_to_reset
            .iter()
            .copied()
            .map(CellPos::from)
            .collect();
        if let Some(release) = self.recovery.arm(id, clear.cells_to_reset, now) {
            debug_assert!(release.complete);
            events.push(Event::RecoveryComplete { player_id: id });
        }

        events.push(Event::GameUpdate(match cause {
            DeathCause::Mine(mine) => GameUpdate::Death {
                player_id: id,
                mine_cell: mine.into(),
                player_cells,
                uncovered_cells,
                score: 0,
                final_score,
            },
            DeathCause::NoMoves => GameUpdate::NoMoves {
                player_id: id,
                player_cells,
                uncovered_cells,
                score: 0,
                final_score,
            },
        }));
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use web_time::Duration;

    fn game() -> Game {
        Game::new(GameConfig::new(42))
    }

    fn t0() -> Instant {
        Instant::now()
    }

    /// Covered, unowned cells bordering the player's territory.
    fn frontier(game: &Game, id: PlayerId) -> Vec<Coord2> {
        let mut cells: Vec<Coord2> = game
            .field
            .player_cells(id)
            .into_iter()
            .flat_map(iter_neighbors)
            .filter(|&pos| !game.field.is_uncovered(pos))
            .collect();
        cells.sort_unstable();
        cells.dedup();
        cells
    }

    #[test]
    fn join_spawns_with_initial_reveal_and_scores_it() {
        let mut game = game();
        let (id, events) = game.join();

        let Event::Init {
            player_id,
            player,
            active_players,
        } = &events[0]
        else {
            panic!("first event must be init");
        };
        assert_eq!(*player_id, id);
        assert!(player.alive);
        assert_eq!(active_players.len(), 1);

        let opened = game.field.player_cells(id);
        assert!(!opened.is_empty());
        assert_eq!(game.player(id).unwrap().score, opened.len() as u32);
        assert!(events.iter().any(|event| matches!(
            event,
            Event::GameUpdate(GameUpdate::Spawn { player_id, .. }) if *player_id == id
        )));
    }

    #[test]
    fn spawn_reveal_never_detonates() {
        let mut game = game();
        for _ in 0..8 {
            let (id, _) = game.join();
            for pos in game.field.player_cells(id) {
                assert!(!game.field.is_resolved_mine(pos));
            }
        }
    }

    #[test]
    fn second_spawn_keeps_clear_of_existing_territory() {
        let mut game = game();
        let (first, _) = game.join();
        let (second, _) = game.join();

        let second_pos = game.player(second).unwrap().pos;
        let radius = game.config.safe_radius;
        for cell in game.field.player_cells(first) {
            assert!(
                chebyshev(cell, second_pos) > radius,
                "spawn {second_pos:?} overlaps territory at {cell:?}"
            );
        }
    }

    #[test]
    fn mine_hit_reports_final_score_and_arms_recovery() {
        let mut game = game();
        let now = t0();
        let (id, _) = game.join();

        // Pin the score, flag one frontier cell, then step on a mine
        // planted next door.
        game.players.get_mut(id).unwrap().score = 12;
        let boundary = frontier(&game, id);
        let flag_pos = boundary[0];
        let mine_pos = boundary[1];
        game.field.toggle_flag(flag_pos).unwrap();
        game.field.force_mine(mine_pos, true);

        let events = game.player_move(id, mine_pos, false, now).unwrap();

        let death = events
            .iter()
            .find_map(|event| match event {
                Event::GameUpdate(GameUpdate::Death {
                    final_score,
                    score,
                    mine_cell,
                    ..
                }) => Some((*final_score, *score, *mine_cell)),
                _ => None,
            })
            .expect("death update");
        assert_eq!(death, (12, 0, mine_pos.into()));

        let player = game.player(id).unwrap();
        assert!(!player.alive);
        assert_eq!(player.score, 0);

        // Orphaned flag is reported immediately, decoupled from recovery.
        assert!(events.iter().any(|event| matches!(
            event,
            Event::FlagsRemoved { flags, .. } if flags.contains(&flag_pos.into())
        )));
        assert!(!game.field.is_flagged(flag_pos));
        assert!(game.recovery.is_running(id));
    }

    #[test]
    fn walled_in_player_dies_of_no_moves() {
        let mut game = game();
        let now = t0();
        let (id, _) = game.join();
        let spawn_score = game.player(id).unwrap().score;

        // Mine every frontier cell except one target, and everything the
        // target would open onto.
        let boundary = frontier(&game, id);
        let target = boundary[0];
        for &pos in &boundary[1..] {
            game.field.force_mine(pos, true);
        }
        game.field.force_mine(target, false);
        for pos in iter_neighbors(target) {
            if !game.field.is_uncovered(pos) {
                game.field.force_mine(pos, true);
            }
        }

        let events = game.player_move(id, target, false, now).unwrap();
        let no_moves = events
            .iter()
            .find_map(|event| match event {
                Event::GameUpdate(GameUpdate::NoMoves { final_score, .. }) => Some(*final_score),
                _ => None,
            })
            .expect("no-moves update");
        assert_eq!(no_moves, spawn_score + 1);
        assert!(!game.player(id).unwrap().alive);
    }

    #[test]
    fn dead_players_cannot_act() {
        let mut game = game();
        let now = t0();
        let (id, _) = game.join();
        let mine_pos = frontier(&game, id)[0];
        game.field.force_mine(mine_pos, true);
        game.player_move(id, mine_pos, false, now).unwrap();

        assert_eq!(
            game.player_move(id, (500, 500), true, now),
            Err(GameError::NotActive)
        );
        assert_eq!(game.player_flag(id, (0, 0)), Err(GameError::NotActive));
        assert_eq!(
            game.player_chord(id, (0, 0), now),
            Err(GameError::NotAlive)
        );
    }

    #[test]
    fn recovery_releases_cells_and_respawn_follows() {
        let mut game = game();
        let now = t0();
        let (id, _) = game.join();
        let territory = game.field.player_cells(id);
        let mine_pos = frontier(&game, id)[0];
        game.field.force_mine(mine_pos, true);
        game.player_move(id, mine_pos, false, now).unwrap();

        // Past the ceiling every cell is back in the pool, with a single
        // completion signal.
        let events = game.tick(now + Duration::from_secs(15));
        let recovered = events
            .iter()
            .filter(|event| matches!(event, Event::CellRecovered { .. }))
            .count();
        // The detonated cell itself is part of the dead territory.
        assert_eq!(recovered, territory.len() + 1);
        assert_eq!(
            events
                .iter()
                .filter(|event| matches!(event, Event::RecoveryComplete { .. }))
                .count(),
            1
        );
        for pos in territory {
            assert_eq!(game.field.owner(pos), None);
            assert!(!game.field.is_uncovered(pos));
        }

        // Respawn after the full delay.
        let events = game.tick(now + Duration::from_secs(30));
        assert!(events.iter().any(|event| matches!(
            event,
            Event::GameUpdate(GameUpdate::Respawn { player_id, .. }) if *player_id == id
        )));
        let player = game.player(id).unwrap();
        assert!(player.alive);
        assert!(player.score > 0, "respawn reveal is scored");
    }

    #[test]
    fn leave_returns_territory_immediately() {
        let mut game = game();
        let (id, _) = game.join();
        let territory = game.field.player_cells(id);
        assert!(!territory.is_empty());

        let events = game.leave(id);
        assert!(events.contains(&Event::PlayerLeft(id)));
        assert!(events.iter().any(|event| matches!(
            event,
            Event::CellsCleared { cells, .. } if cells.len() == territory.len()
        )));
        for pos in territory {
            assert_eq!(game.field.owner(pos), None);
            assert!(!game.field.is_uncovered(pos));
        }
        assert!(game.player(id).is_err());
        assert!(game.active_players().is_empty());
    }

    #[test]
    fn chunk_requests_go_through_the_intent_surface() {
        let mut game = game();
        let now = t0();
        let (id, _) = game.join();
        let (cx, cy) = world_to_chunk(game.player(id).unwrap().pos, game.config.chunk_size);

        let events = game
            .handle(
                id,
                Intent::RequestChunks {
                    keys: vec![(cx, cy)],
                    include_mines: false,
                },
                now,
            )
            .unwrap();
        let Event::Chunks(chunks) = &events[0] else {
            panic!("expected chunks");
        };
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].cells.iter().any(|cell| cell.owner == Some(id)));
        // No covered-cell mine identity leaks to ordinary clients.
        assert!(
            chunks[0]
                .cells
                .iter()
                .filter(|cell| !cell.state.is_uncovered())
                .all(|cell| cell.is_mine.is_none())
        );
    }
}
