use hashbrown::HashMap;
use web_time::{Duration, Instant};

use jirai_protocol::PlayerId;

use crate::*;

/// Cells released by one poll of one player's run, and whether that run
/// just finished. Exactly one `complete` is reported per armed run.
#[derive(Clone, Debug, PartialEq)]
pub struct Release {
    pub player_id: PlayerId,
    pub cells: Vec<Coord2>,
    pub complete: bool,
}

#[derive(Copy, Clone, Debug)]
enum Mode {
    /// Geometrically decaying per-cell delay: fast, then faster.
    Staggered { next_fire: Instant, delay: Duration },
    /// Release pacing pinned to a fixed total budget; used when the decay
    /// sum would overshoot the ceiling, so wall-clock completion stays
    /// bounded regardless of territory size.
    Budgeted { started: Instant },
}

#[derive(Debug)]
struct Run {
    cells: Vec<Coord2>,
    released: usize,
    mode: Mode,
}

/// Time-distributed release of dead players' territory back to the covered
/// pool. Driven by [`RecoveryScheduler::poll`] against caller-supplied
/// instants; owns no timer and never sleeps.
pub struct RecoveryScheduler {
    start_delay: Duration,
    base_delay: Duration,
    min_delay: Duration,
    decay: f64,
    ceiling: Duration,
    runs: HashMap<PlayerId, Run>,
}

impl RecoveryScheduler {
    pub fn new(config: &GameConfig) -> Self {
        Self {
            start_delay: config.recovery_start_delay,
            base_delay: config.recovery_base_delay,
            min_delay: config.recovery_min_delay,
            decay: config.recovery_decay,
            ceiling: config.recovery_ceiling,
            runs: HashMap::new(),
        }
    }

    /// Total stagger time for `count` cells, capped at the ceiling (the
    /// exact sum does not matter past that point).
    fn stagger_total(&self, count: usize) -> Duration {
        let mut total = self.start_delay;
        let mut delay = self.base_delay;
        for _ in 0..count {
            total += delay;
            if total > self.ceiling {
                break;
            }
            delay = delay.mul_f64(self.decay).max(self.min_delay);
        }
        total
    }

    /// Arms a fresh run for a player, replacing any run still in flight.
    /// An empty cell list completes immediately and is returned as such.
    pub fn arm(&mut self, player_id: PlayerId, cells: Vec<Coord2>, now: Instant) -> Option<Release> {
        if cells.is_empty() {
            self.runs.remove(&player_id);
            return Some(Release {
                player_id,
                cells: Vec::new(),
                complete: true,
            });
        }

        let mode = if self.stagger_total(cells.len()) > self.ceiling {
            Mode::Budgeted {
                started: now + self.start_delay,
            }
        } else {
            Mode::Staggered {
                next_fire: now + self.start_delay + self.base_delay,
                delay: self.base_delay,
            }
        };

        self.runs.insert(
            player_id,
            Run {
                cells,
                released: 0,
                mode,
            },
        );
        None
    }

    /// Drops a player's run without releasing anything further. Returns the
    /// cells that were still pending, in release order.
    pub fn cancel(&mut self, player_id: PlayerId) -> Vec<Coord2> {
        self.runs
            .remove(&player_id)
            .map(|run| run.cells[run.released..].to_vec())
            .unwrap_or_default()
    }

    pub fn is_running(&self, player_id: PlayerId) -> bool {
        self.runs.contains_key(&player_id)
    }

    /// Releases everything a player still has pending, completing the run
    /// in one step.
    pub fn finish(&mut self, player_id: PlayerId) -> Option<Release> {
        self.runs.remove(&player_id).map(|run| Release {
            player_id,
            cells: run.cells[run.released..].to_vec(),
            complete: true,
        })
    }

    /// Advances every run to `now`, collecting due releases per player.
    pub fn poll(&mut self, now: Instant) -> Vec<Release> {
        let mut due: Vec<PlayerId> = self.runs.keys().copied().collect();
        due.sort_unstable();

        let mut releases = Vec::new();
        for player_id in due {
            let run = self.runs.get_mut(&player_id).expect("run just listed");
            let mut cells = Vec::new();

            match run.mode {
                Mode::Staggered {
                    mut next_fire,
                    mut delay,
                } => {
                    while next_fire <= now && run.released < run.cells.len() {
                        cells.push(run.cells[run.released]);
                        run.released += 1;
                        delay = delay.mul_f64(self.decay).max(self.min_delay);
                        next_fire += delay;
                    }
                    run.mode = Mode::Staggered { next_fire, delay };
                }
                Mode::Budgeted { started } => {
                    if now >= started {
                        let elapsed = now.duration_since(started);
                        let fraction =
                            (elapsed.as_secs_f64() / self.ceiling.as_secs_f64()).min(1.0);
                        let target = (fraction * run.cells.len() as f64).ceil() as usize;
                        let target = target.min(run.cells.len());
                        // Never re-release: the target is monotonic and the
                        // cursor only moves forward.
                        while run.released < target {
                            cells.push(run.cells[run.released]);
                            run.released += 1;
                        }
                    }
                }
            }

            let complete = run.released == run.cells.len();
            if complete {
                self.runs.remove(&player_id);
            }
            if !cells.is_empty() || complete {
                releases.push(Release {
                    player_id,
                    cells,
                    complete,
                });
            }
        }
        releases
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P1: PlayerId = PlayerId(1);

    fn scheduler() -> RecoveryScheduler {
        RecoveryScheduler::new(&GameConfig::default())
    }

    fn cells(n: usize) -> Vec<Coord2> {
        (0..n as Coord).map(|i| (i, 0)).collect()
    }

    #[test]
    fn empty_run_completes_immediately() {
        let mut scheduler = scheduler();
        let release = scheduler.arm(P1, Vec::new(), Instant::now()).unwrap();
        assert!(release.complete);
        assert!(release.cells.is_empty());
        assert!(!scheduler.is_running(P1));
    }

    #[test]
    fn staggered_run_releases_nothing_during_the_grace_delay() {
        let mut scheduler = scheduler();
        let start = Instant::now();
        assert!(scheduler.arm(P1, cells(5), start).is_none());

        assert!(scheduler.poll(start + Duration::from_millis(1900)).is_empty());
        assert!(scheduler.is_running(P1));
    }

    #[test]
    fn staggered_run_releases_in_order_and_completes_once() {
        let mut scheduler = scheduler();
        let start = Instant::now();
        scheduler.arm(P1, cells(5), start);

        let mut released = Vec::new();
        let mut completions = 0;
        for ms in (0..4000).step_by(25) {
            for release in scheduler.poll(start + Duration::from_millis(ms)) {
                released.extend(release.cells);
                if release.complete {
                    completions += 1;
                }
            }
        }

        assert_eq!(released, cells(5));
        assert_eq!(completions, 1);
        assert!(!scheduler.is_running(P1));
        // Nothing further once complete.
        assert!(scheduler.poll(start + Duration::from_secs(60)).is_empty());
    }

    #[test]
    fn large_runs_switch_to_the_time_budget() {
        let mut scheduler = scheduler();
        let start = Instant::now();
        // 2000 cells at >= 10ms each blows the 10s ceiling by a wide
        // margin.
        scheduler.arm(P1, cells(2000), start);

        let grace = Duration::from_secs(2);
        let ceiling = Duration::from_secs(10);

        // Halfway through the budget, about half the cells are out.
        let halfway: usize = scheduler
            .poll(start + grace + ceiling / 2)
            .into_iter()
            .map(|release| release.cells.len())
            .sum();
        assert!(halfway >= 1000);
        assert!(halfway <= 1010);

        // At the ceiling the run is done, exactly once, with every cell
        // released exactly once.
        let finals = scheduler.poll(start + grace + ceiling);
        assert_eq!(finals.len(), 1);
        assert!(finals[0].complete);
        assert_eq!(finals[0].cells.len(), 2000 - halfway);
        assert!(scheduler.poll(start + grace + ceiling * 2).is_empty());
    }

    #[test]
    fn rearming_replaces_the_previous_run() {
        let mut scheduler = scheduler();
        let start = Instant::now();
        scheduler.arm(P1, cells(5), start);
        scheduler.arm(P1, vec![(100, 100)], start);

        let released: Vec<_> = (0..4000)
            .step_by(50)
            .flat_map(|ms| scheduler.poll(start + Duration::from_millis(ms)))
            .flat_map(|release| release.cells)
            .collect();
        assert_eq!(released, vec![(100, 100)]);
    }

    #[test]
    fn cancel_returns_pending_cells_and_stops_the_run() {
        let mut scheduler = scheduler();
        let start = Instant::now();
        scheduler.arm(P1, cells(5), start);

        // Let a couple of cells out first.
        let out: usize = scheduler
            .poll(start + Duration::from_millis(2120))
            .into_iter()
            .map(|release| release.cells.len())
            .sum();
        assert!(out >= 1);

        let pending = scheduler.cancel(P1);
        assert_eq!(pending.len(), 5 - out);
        assert!(!scheduler.is_running(P1));
        assert!(scheduler.poll(start + Duration::from_secs(30)).is_empty());
    }

    #[test]
    fn finish_flushes_everything_with_a_single_completion() {
        let mut scheduler = scheduler();
        let start = Instant::now();
        scheduler.arm(P1, cells(3), start);

        let release = scheduler.finish(P1).unwrap();
        assert!(release.complete);
        assert_eq!(release.cells, cells(3));
        assert!(scheduler.finish(P1).is_none());
    }
}
