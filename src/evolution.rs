//! Generic population search.
//!
//! The engine knows nothing about grids: it sorts individuals by score,
//! breeds offspring from the top of each pool, and keeps the best. Several
//! pools evolve side by side; a pool that stops improving is restarted
//! from the best individual found so far.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;

/// A fitness value. Lower is better.
pub trait Score: Ord + Copy + Debug {
    /// True if no better score is possible.
    fn is_perfect(&self) -> bool;
}

/// A candidate solution.
pub trait Individual: Clone {
    type Score: Score;

    fn fitness(&self) -> Self::Score;

    /// Combines two parents into a child.
    fn pair(&self, other: &Self, rng: &mut Pcg32) -> Self;

    fn mutate(&mut self, rng: &mut Pcg32);
}

/// Search settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvolutionConfig {
    /// Individuals kept per pool.
    pub population_size: usize,
    /// Offspring bred per pool and epoch.
    pub n_offsprings: usize,
    pub max_epochs: usize,
    /// Pools evolving side by side.
    pub pools: usize,
    /// Replacements without improvement before a pool is restarted.
    pub restart_after: usize,
    pub seed: u64,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: 24,
            n_offsprings: 12,
            max_epochs: 1_000,
            pools: 3,
            restart_after: 40,
            seed: 0,
        }
    }
}

/// Fixed-size pool, kept sorted best first.
#[derive(Clone, Debug)]
pub struct Population<I: Individual> {
    members: Vec<(I::Score, I)>,
    size: usize,
    best: Option<I::Score>,
    stale: usize,
}

impl<I: Individual> Population<I> {
    /// The seed plus `size - 1` mutated copies of it.
    pub fn seeded(seed: &I, size: usize, rng: &mut Pcg32) -> Self {
        let size = size.max(1);
        let mut members = Vec::with_capacity(size);
        members.push((seed.fitness(), seed.clone()));
        for _ in 1..size {
            let mut variant = seed.clone();
            variant.mutate(rng);
            members.push((variant.fitness(), variant));
        }
        members.sort_by(|a, b| a.0.cmp(&b.0));

        Self {
            best: members.first().map(|m| m.0),
            members,
            size,
            stale: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn best(&self) -> Option<&I> {
        self.members.first().map(|m| &m.1)
    }

    pub fn best_score(&self) -> Option<I::Score> {
        self.members.first().map(|m| m.0)
    }

    /// Scores in rank order.
    pub fn scores(&self) -> impl Iterator<Item = I::Score> + '_ {
        self.members.iter().map(|m| m.0)
    }

    /// Replacements since the best score last improved.
    pub fn staleness(&self) -> usize {
        self.stale
    }

    /// Adds `offspring`, then drops the worst until the pool is back to
    /// size. Ties keep the incumbents ahead.
    pub fn replace(&mut self, offspring: Vec<I>) {
        self.members
            .extend(offspring.into_iter().map(|child| (child.fitness(), child)));
        self.members.sort_by(|a, b| a.0.cmp(&b.0));
        self.members.truncate(self.size);

        let current = self.best_score();
        if current < self.best || self.best.is_none() {
            self.best = current;
            self.stale = 0;
        } else {
            self.stale += 1;
        }
    }

    /// Picks two parents from the top `n` ranks.
    fn parents(&self, n: usize, rng: &mut Pcg32) -> (&I, &I) {
        let top = n.clamp(1, self.members.len());
        let first = rng.random_range(0..top);
        let second = rng.random_range(0..top);
        (&self.members[first].1, &self.members[second].1)
    }
}

/// Multi-pool evolution loop.
#[derive(Clone, Debug)]
pub struct Evolution<I: Individual> {
    config: EvolutionConfig,
    pools: Vec<Population<I>>,
    rng: Pcg32,
    epoch: usize,
    cancel: Option<Arc<AtomicBool>>,
}

impl<I: Individual> Evolution<I> {
    pub fn new(seed: &I, config: EvolutionConfig) -> Self {
        let mut rng = Pcg32::seed_from_u64(config.seed);
        let pools = (0..config.pools.max(1))
            .map(|_| Population::seeded(seed, config.population_size, &mut rng))
            .collect();
        Self {
            config,
            pools,
            rng,
            epoch: 0,
            cancel: None,
        }
    }

    pub fn set_cancel(&mut self, cancel: Arc<AtomicBool>) {
        self.cancel = Some(cancel);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn pools(&self) -> &[Population<I>] {
        &self.pools
    }

    /// Best individual across all pools.
    pub fn best(&self) -> Option<&I> {
        self.pools
            .iter()
            .filter_map(|pool| pool.members.first())
            .min_by(|a, b| a.0.cmp(&b.0))
            .map(|m| &m.1)
    }

    pub fn best_score(&self) -> Option<I::Score> {
        self.best().map(Individual::fitness)
    }

    /// One epoch: every pool breeds offspring from its top ranks and keeps
    /// the best. Stale pools restart from the overall best.
    pub fn step(&mut self) {
        let n_offsprings = self.config.n_offsprings;
        for pool in &mut self.pools {
            let offspring: Vec<I> = (0..n_offsprings)
                .map(|_| {
                    let (a, b) = pool.parents(n_offsprings, &mut self.rng);
                    let mut child = a.pair(b, &mut self.rng);
                    child.mutate(&mut self.rng);
                    child
                })
                .collect();
            pool.replace(offspring);
        }

        let restart_after = self.config.restart_after;
        if restart_after > 0 && self.pools.iter().any(|p| p.staleness() >= restart_after) {
            if let Some(best) = self.best().cloned() {
                for (i, pool) in self.pools.iter_mut().enumerate() {
                    if pool.staleness() >= restart_after {
                        log::debug!("epoch {}: restarting stale pool {}", self.epoch, i);
                        *pool = Population::seeded(&best, self.config.population_size, &mut self.rng);
                    }
                }
            }
        }
        self.epoch += 1;
    }

    /// Runs epochs until a perfect individual appears, the epoch budget is
    /// spent, or the cancel flag is raised. `progress` sees every epoch's
    /// best. Returns true on a perfect individual.
    pub fn run(&mut self, mut progress: impl FnMut(usize, &I)) -> bool {
        let mut last_best = self.best_score();
        while self.epoch < self.config.max_epochs {
            if self.best_score().is_some_and(|s| s.is_perfect()) {
                return true;
            }
            if self.is_cancelled() {
                log::debug!("evolution cancelled at epoch {}", self.epoch);
                return false;
            }

            self.step();

            let best_score = self.best_score();
            if best_score < last_best {
                log::info!("epoch {}: best {:?}", self.epoch, best_score);
                last_best = best_score;
            }
            if let Some(best) = self.best() {
                progress(self.epoch, best);
            }
        }
        self.best_score().is_some_and(|s| s.is_perfect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Score for u32 {
        fn is_perfect(&self) -> bool {
            *self == 0
        }
    }

    /// Walks towards a hidden target one random step at a time.
    #[derive(Clone, Debug)]
    struct Walker {
        position: i32,
        target: i32,
    }

    impl Individual for Walker {
        type Score = u32;

        fn fitness(&self) -> u32 {
            self.position.abs_diff(self.target)
        }

        fn pair(&self, other: &Self, _rng: &mut Pcg32) -> Self {
            if self.fitness() <= other.fitness() {
                self.clone()
            } else {
                other.clone()
            }
        }

        fn mutate(&mut self, rng: &mut Pcg32) {
            self.position += rng.random_range(-3..=3);
        }
    }

    fn walker() -> Walker {
        Walker {
            position: 0,
            target: 40,
        }
    }

    #[test]
    fn test_population_stays_sorted_and_sized() {
        let mut rng = Pcg32::seed_from_u64(1);
        let mut pool = Population::seeded(&walker(), 8, &mut rng);
        assert_eq!(pool.len(), 8);

        let children: Vec<Walker> = (0..5)
            .map(|i| Walker {
                position: 10 * i,
                target: 40,
            })
            .collect();
        pool.replace(children);

        assert_eq!(pool.len(), 8);
        let scores: Vec<u32> = pool.scores().collect();
        assert!(scores.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(pool.best_score(), Some(0));
        assert_eq!(pool.staleness(), 0);
    }

    #[test]
    fn test_staleness_counts_replacements_without_improvement() {
        let mut rng = Pcg32::seed_from_u64(2);
        let mut pool = Population::seeded(&walker(), 4, &mut rng);
        let worst = Walker {
            position: -1_000,
            target: 40,
        };
        pool.replace(vec![worst.clone()]);
        pool.replace(vec![worst]);
        assert_eq!(pool.staleness(), 2);
    }

    #[test]
    fn test_run_reaches_target() {
        let config = EvolutionConfig {
            max_epochs: 500,
            seed: 9,
            ..EvolutionConfig::default()
        };
        let mut evolution = Evolution::new(&walker(), config);
        let mut epochs_seen = 0;
        assert!(evolution.run(|_, _| epochs_seen += 1));
        assert_eq!(evolution.best_score(), Some(0));
        assert_eq!(epochs_seen, evolution.epoch());
    }

    #[test]
    fn test_cancelled_run_stops_immediately() {
        let mut evolution = Evolution::new(&walker(), EvolutionConfig::default());
        evolution.set_cancel(Arc::new(AtomicBool::new(true)));
        assert!(!evolution.run(|_, _| {}));
        assert_eq!(evolution.epoch(), 0);
    }

    #[test]
    fn test_epoch_budget_is_respected() {
        let config = EvolutionConfig {
            max_epochs: 3,
            ..EvolutionConfig::default()
        };
        let mut far = walker();
        far.target = 1_000_000;
        let mut evolution = Evolution::new(&far, config);
        assert!(!evolution.run(|_, _| {}));
        assert_eq!(evolution.epoch(), 3);
    }
}
