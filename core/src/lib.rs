use serde::{Deserialize, Serialize};
use web_time::Duration;

pub use engine::*;
pub use error::*;
pub use field::*;
pub use game::*;
pub use player::*;
pub use recovery::*;
pub use types::*;

pub use jirai_protocol as protocol;
pub use jirai_protocol::PlayerId;

mod engine;
mod error;
mod field;
mod game;
mod player;
mod recovery;
mod types;

/// Tuning knobs for a world. `new` takes the only value without a sensible
/// default, the seed; everything else starts at the reference tuning.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GameConfig {
    /// Seed for mine resolution; spawn placement derives its own stream.
    pub seed: u64,
    pub mine_probability: f64,
    pub chunk_size: Coord,
    /// Chebyshev radius resolved eagerly around a first uncover.
    pub activation_radius: Coord,
    /// Chebyshev radius of each player's mine-free zone.
    pub safe_radius: u32,
    /// Half-width of the square the first player may spawn anywhere in.
    pub origin_span: Coord,
    pub spawn_min_distance: f64,
    pub spawn_max_distance: f64,
    /// Placement attempts per search phase before falling back.
    pub spawn_attempts: u32,
    pub respawn_delay: Duration,
    /// Grace period before a dead player's cells start returning.
    pub recovery_start_delay: Duration,
    pub recovery_base_delay: Duration,
    pub recovery_min_delay: Duration,
    pub recovery_decay: f64,
    /// Runs projected to outlast this switch to time-budgeted pacing.
    pub recovery_ceiling: Duration,
}

impl GameConfig {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            mine_probability: 0.19,
            chunk_size: 16,
            activation_radius: 3,
            safe_radius: 10,
            origin_span: 500,
            spawn_min_distance: 20.0,
            spawn_max_distance: 60.0,
            spawn_attempts: 100,
            respawn_delay: Duration::from_secs(30),
            recovery_start_delay: Duration::from_secs(2),
            recovery_base_delay: Duration::from_millis(50),
            recovery_min_delay: Duration::from_millis(10),
            recovery_decay: 0.95,
            recovery_ceiling: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_in_reference_tuning() {
        let config: GameConfig =
            serde_json::from_str(r#"{"seed":9,"mineProbability":0.25}"#).unwrap();
        assert_eq!(config.seed, 9);
        assert_eq!(config.mine_probability, 0.25);
        assert_eq!(config.chunk_size, 16);
        assert_eq!(config.respawn_delay, Duration::from_secs(30));
    }

    #[test]
    fn config_round_trips() {
        let config = GameConfig::new(7);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<GameConfig>(&json).unwrap(), config);
    }
}
