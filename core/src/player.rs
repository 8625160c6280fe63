use hashbrown::HashMap;
use rand::prelude::*;
use web_time::{Duration, Instant};

use jirai_protocol::{PlayerId, PlayerView, ScoreEntry};

use crate::field::{SafeZone, SpatialMineField};
use crate::*;

/// Display colors handed out round-robin as players join.
const COLORS: [&str; 15] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A", "#98D8C8", "#F7DC6F", "#BB8FCE", "#85C1E2",
    "#F8B739", "#52B788", "#E63946", "#F77F00", "#06FFA5", "#118AB2", "#EF476F",
];

#[derive(Clone, Debug)]
pub struct Player {
    pub id: PlayerId,
    /// Last spawn/uncover anchor; camera and safe-zone center, not literal
    /// movement.
    pub pos: Coord2,
    pub color: String,
    pub score: u32,
    pub alive: bool,
    pub died_at: Option<Instant>,
}

impl Player {
    fn new(id: PlayerId, pos: Coord2, color: String) -> Self {
        Self {
            id,
            pos,
            color,
            score: 0,
            alive: true,
            died_at: None,
        }
    }

    pub fn add_score(&mut self, points: u32) {
        self.score += points;
    }

    /// Marks the player dead, returning the score they died with. The live
    /// score resets to zero at the moment of death.
    pub fn die(&mut self, now: Instant) -> u32 {
        let final_score = self.score;
        self.score = 0;
        self.alive = false;
        self.died_at = Some(now);
        final_score
    }

    pub fn respawn(&mut self, pos: Coord2) {
        self.pos = pos;
        self.alive = true;
        self.died_at = None;
    }

    pub fn view(&self) -> PlayerView {
        PlayerView {
            id: self.id,
            x: self.pos.0,
            y: self.pos.1,
            color: self.color.clone(),
            score: self.score,
            alive: self.alive,
        }
    }
}

#[derive(Default)]
pub struct PlayerRegistry {
    players: HashMap<PlayerId, Player>,
    next_id: u32,
    color_index: usize,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, pos: Coord2) -> PlayerId {
        let id = PlayerId(self.next_id);
        self.next_id += 1;

        let color = COLORS[self.color_index % COLORS.len()].to_owned();
        self.color_index += 1;

        self.players.insert(id, Player::new(id, pos, color));
        id
    }

    pub fn remove(&mut self, id: PlayerId) -> Option<Player> {
        self.players.remove(&id)
    }

    pub fn get(&self, id: PlayerId) -> Result<&Player> {
        self.players.get(&id).ok_or(GameError::UnknownPlayer)
    }

    pub fn get_mut(&mut self, id: PlayerId) -> Result<&mut Player> {
        self.players.get_mut(&id).ok_or(GameError::UnknownPlayer)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// All players, id-ordered for stable iteration and wire output.
    fn ordered(&self) -> Vec<&Player> {
        let mut players: Vec<_> = self.players.values().collect();
        players.sort_unstable_by_key(|player| player.id);
        players
    }

    pub fn views(&self) -> Vec<PlayerView> {
        self.ordered().into_iter().map(Player::view).collect()
    }

    pub fn alive_positions(&self) -> Vec<Coord2> {
        self.ordered()
            .into_iter()
            .filter(|player| player.alive)
            .map(|player| player.pos)
            .collect()
    }

    /// Safe-zone set for the current alive players; recomputed by the game
    /// whenever the alive set changes.
    pub fn safe_zones(&self, radius: u32) -> Vec<SafeZone> {
        self.ordered()
            .into_iter()
            .filter(|player| player.alive)
            .map(|player| SafeZone {
                center: player.pos,
                radius,
            })
            .collect()
    }

    /// Dead players whose respawn delay has fully elapsed.
    pub fn due_for_respawn(&self, now: Instant, delay: Duration) -> Vec<PlayerId> {
        self.ordered()
            .into_iter()
            .filter(|player| {
                !player.alive
                    && player
                        .died_at
                        .is_some_and(|died_at| now.duration_since(died_at) >= delay)
            })
            .map(|player| player.id)
            .collect()
    }

    pub fn leaderboard(&self) -> Vec<ScoreEntry> {
        let mut entries: Vec<_> = self
            .ordered()
            .into_iter()
            .map(|player| ScoreEntry {
                id: player.id,
                score: player.score,
            })
            .collect();
        entries.sort_by_key(|entry| core::cmp::Reverse(entry.score));
        entries
    }
}

fn euclidean_offset(anchor: Coord2, angle: f64, distance: f64) -> Coord2 {
    let x = (anchor.0 as f64 + angle.cos() * distance).floor() as Coord;
    let y = (anchor.1 as f64 + angle.sin() * distance).floor() as Coord;
    (x, y)
}

/// Basic spawn validity: never on a resolved mine, never on claimed or
/// opened ground.
fn is_valid_site(field: &SpatialMineField, pos: Coord2) -> bool {
    !field.is_resolved_mine(pos) && !field.is_uncovered(pos) && field.owner(pos).is_none()
}

/// Whether any player's territory lies within `radius` of `pos`.
fn territory_nearby(field: &SpatialMineField, pos: Coord2, radius: u32) -> bool {
    field.owner(pos).is_some()
        || iter_square(pos, radius as Coord).any(|cell| field.owner(cell).is_some())
}

/// Picks a spawn site per the lifecycle rules: a bounded region around the
/// origin when the field is empty, otherwise a random distance and angle
/// from a random living player, keeping clear of existing territory.
/// Falls back, with decreasing pickiness, rather than failing.
pub(crate) fn find_spawn(
    field: &SpatialMineField,
    registry: &PlayerRegistry,
    config: &GameConfig,
    rng: &mut SmallRng,
) -> Coord2 {
    let anchors = registry.alive_positions();
    let span = config.origin_span;

    if anchors.is_empty() {
        for _ in 0..config.spawn_attempts {
            let pos = (
                rng.random_range(-span..=span),
                rng.random_range(-span..=span),
            );
            if is_valid_site(field, pos) {
                return pos;
            }
        }
        log::warn!("spawn search near origin exhausted, placing unconstrained");
        return (
            rng.random_range(-span..=span),
            rng.random_range(-span..=span),
        );
    }

    for _ in 0..config.spawn_attempts {
        let Some(&anchor) = anchors.choose(rng) else {
            break;
        };
        let distance = rng.random_range(config.spawn_min_distance..=config.spawn_max_distance);
        let angle = rng.random_range(0.0..core::f64::consts::TAU);
        let pos = euclidean_offset(anchor, angle, distance);

        if is_valid_site(field, pos) && !territory_nearby(field, pos, config.safe_radius) {
            return pos;
        }
    }

    // Fixed-distance fallback, dropping the territory clearance first and
    // validity last.
    let distance = (config.spawn_min_distance + config.spawn_max_distance) / 2.0;
    log::warn!("anchored spawn search exhausted, falling back to fixed distance");
    let mut last = None;
    for _ in 0..config.spawn_attempts {
        let Some(&anchor) = anchors.choose(rng) else {
            break;
        };
        let angle = rng.random_range(0.0..core::f64::consts::TAU);
        let pos = euclidean_offset(anchor, angle, distance);
        if is_valid_site(field, pos) {
            return pos;
        }
        last = Some(pos);
    }

    last.unwrap_or_default()
}
