//! Packing states as evolvable individuals.
//!
//! An individual is a grid state plus the shapes it has not placed yet.
//! Mutation tears out a compact cluster of instances and greedily packs
//! the freed area again. Instances present before the individual was
//! seeded are never torn out.

use std::sync::Arc;

use rand::seq::IndexedRandom;
use rand::Rng;
use rand_pcg::Pcg32;

use crate::dual::DualPacker;
use crate::error::PackError;
use crate::evolution::{Individual, Score};
use crate::fitness::{FitnessCalculator, FitnessScore};
use crate::geometry::{distance_ranking, ranked_offsets, Coord};
use crate::grid::{Block, Grid, EMPTY, FIRST_ID};
use crate::packer::Packer;
use crate::shapes::{Shape, ShapeCounts};

/// Fewest instances a mutation removes.
const MIN_MUTATION: usize = 3;

/// Most instances a mutation removes.
const MAX_MUTATION: usize = 10;

impl Score for FitnessScore {
    fn is_perfect(&self) -> bool {
        self.is_solved()
    }
}

/// Inputs shared by every individual of one search.
#[derive(Debug)]
struct Shared {
    calculator: FitnessCalculator,
    ranking: Vec<Coord>,
    /// Ids placed before the search started, indexed by id.
    fixed: [bool; 256],
}

impl Shared {
    /// Every instance on `grids` right now becomes fixed.
    fn new(calculator: FitnessCalculator, grids: &[&Grid]) -> Arc<Self> {
        let mut fixed = [false; 256];
        for grid in grids {
            for (id, present) in grid.ids_present().into_iter().enumerate() {
                fixed[id] |= present && id >= FIRST_ID as usize;
            }
        }
        let radius = grids.first().map_or(0, |g| g.width() + g.height()) as i32;
        Arc::new(Self {
            calculator,
            ranking: distance_ranking(radius),
            fixed,
        })
    }

    /// Picks up to `count` movable instances clustered around a random one.
    fn cluster(&self, grid: &Grid, count: usize, rng: &mut Pcg32) -> (Vec<Block>, (usize, usize)) {
        let movable: Vec<Block> = grid
            .blocks()
            .into_iter()
            .filter(|b| !self.fixed[b.id as usize] && b.shape.is_some())
            .collect();
        let Some(center) = movable.choose(rng).map(Block::top_left) else {
            return (Vec::new(), (0, 0));
        };

        let mut picked: Vec<Block> = Vec::with_capacity(count);
        for (row, col) in ranked_offsets(&self.ranking, center, grid.width(), grid.height()) {
            if picked.len() == count {
                break;
            }
            let id = grid.get(row, col);
            if picked.iter().any(|b| b.id == id) {
                continue;
            }
            if let Some(block) = movable.iter().find(|b| b.id == id) {
                picked.push(block.clone());
            }
        }
        (picked, center)
    }

    /// Empty cells of `grid` ranked by distance from `center`.
    fn refill_order(&self, grid: &Grid, center: (usize, usize)) -> Vec<usize> {
        ranked_offsets(&self.ranking, center, grid.width(), grid.height())
            .filter(|&(row, col)| grid.get(row, col) == EMPTY)
            .map(|(row, col)| grid.index(row, col))
            .collect()
    }
}

fn mutation_size(rng: &mut Pcg32) -> usize {
    rng.random_range(MIN_MUTATION..=MAX_MUTATION)
}

/// A single-grid packing state.
#[derive(Clone, Debug)]
pub struct PackingIndividual {
    packer: Packer,
    remaining: ShapeCounts,
    score: FitnessScore,
    shared: Arc<Shared>,
}

impl PackingIndividual {
    /// Wraps the packer's current state; `remaining` are the shapes still
    /// to place. Every instance already placed stays fixed.
    pub fn new(packer: Packer, remaining: ShapeCounts, calculator: FitnessCalculator) -> Result<Self, PackError> {
        let shared = Shared::new(calculator, &[packer.state()?]);
        Self::build(packer, remaining, shared)
    }

    /// Fixes the instances already placed, then greedily places what it
    /// can from `remaining`. The greedy placements stay movable.
    pub fn seeded(
        mut packer: Packer,
        mut remaining: ShapeCounts,
        calculator: FitnessCalculator,
        rng: &mut Pcg32,
    ) -> Result<Self, PackError> {
        let shared = Shared::new(calculator, &[packer.state()?]);
        let placed = packer.random_fill(&mut remaining, rng)?;
        log::debug!("seed placed {placed} instances, {} left over", remaining.total());
        Self::build(packer, remaining, shared)
    }

    fn build(packer: Packer, remaining: ShapeCounts, shared: Arc<Shared>) -> Result<Self, PackError> {
        let score = shared.calculator.score(packer.state()?, &remaining);
        Ok(Self {
            packer,
            remaining,
            score,
            shared,
        })
    }

    pub fn packer(&self) -> &Packer {
        &self.packer
    }

    pub fn remaining(&self) -> &ShapeCounts {
        &self.remaining
    }

    pub fn into_packer(self) -> Packer {
        self.packer
    }

    fn rescore(&mut self) {
        if let Ok(grid) = self.packer.state() {
            self.score = self.shared.calculator.score(grid, &self.remaining);
        }
    }

    fn try_mutate(&mut self, rng: &mut Pcg32) -> Result<(), PackError> {
        let grid = self.packer.state()?;
        let (picked, center) = self.shared.cluster(grid, mutation_size(rng), rng);

        let grid = self.packer.state_mut()?;
        for block in &picked {
            for &(row, col) in &block.cells {
                grid.set(row, col, EMPTY);
            }
            if let Some(shape) = block.shape {
                self.remaining.give_back(shape);
            }
        }

        let order = self.shared.refill_order(grid, center);
        self.packer.greedy_fill(&mut self.remaining, rng, &order)?;
        Ok(())
    }
}

impl Individual for PackingIndividual {
    type Score = FitnessScore;

    fn fitness(&self) -> FitnessScore {
        self.score
    }

    /// Mutation-only search: the fitter parent is carried over as is.
    fn pair(&self, other: &Self, _rng: &mut Pcg32) -> Self {
        if self.score <= other.score {
            self.clone()
        } else {
            other.clone()
        }
    }

    fn mutate(&mut self, rng: &mut Pcg32) {
        if let Err(err) = self.try_mutate(rng) {
            log::warn!("mutation skipped: {err}");
        }
        self.rescore();
    }
}

/// A front/back packing state.
#[derive(Clone, Debug)]
pub struct DualIndividual {
    packer: DualPacker,
    remaining: ShapeCounts,
    score: FitnessScore,
    shared: Arc<Shared>,
}

impl DualIndividual {
    pub fn new(packer: DualPacker, remaining: ShapeCounts, calculator: FitnessCalculator) -> Result<Self, PackError> {
        let (front, back) = packer.states()?;
        let shared = Shared::new(calculator, &[front, back]);
        Self::build(packer, remaining, shared)
    }

    /// Like [`PackingIndividual::seeded`], placing mirrored pairs.
    pub fn seeded(
        mut packer: DualPacker,
        mut remaining: ShapeCounts,
        calculator: FitnessCalculator,
        rng: &mut Pcg32,
    ) -> Result<Self, PackError> {
        let (front, back) = packer.states()?;
        let shared = Shared::new(calculator, &[front, back]);
        let placed = packer.random_fill(&mut remaining, rng)?;
        log::debug!("seed placed {placed} pairs, {} left over", remaining.total());
        Self::build(packer, remaining, shared)
    }

    fn build(packer: DualPacker, remaining: ShapeCounts, shared: Arc<Shared>) -> Result<Self, PackError> {
        let (front, back) = packer.states()?;
        let score = shared.calculator.score_dual(front, back, &remaining);
        Ok(Self {
            packer,
            remaining,
            score,
            shared,
        })
    }

    pub fn packer(&self) -> &DualPacker {
        &self.packer
    }

    pub fn remaining(&self) -> &ShapeCounts {
        &self.remaining
    }

    pub fn into_packer(self) -> DualPacker {
        self.packer
    }

    fn rescore(&mut self) {
        if let Ok((front, back)) = self.packer.states() {
            self.score = self.shared.calculator.score_dual(front, back, &self.remaining);
        }
    }

    fn try_mutate(&mut self, rng: &mut Pcg32) -> Result<(), PackError> {
        let (front, _) = self.packer.states()?;
        let (picked, center) = self.shared.cluster(front, mutation_size(rng), rng);

        for block in &picked {
            self.packer.clear_instance(block.id)?;
            if let Some(shape) = block.shape {
                self.remaining.give_back(shape);
            }
        }

        let order = self.shared.refill_order(self.packer.front().state()?, center);
        self.packer.greedy_fill(&mut self.remaining, rng, &order)?;
        Ok(())
    }
}

impl Individual for DualIndividual {
    type Score = FitnessScore;

    fn fitness(&self) -> FitnessScore {
        self.score
    }

    fn pair(&self, other: &Self, _rng: &mut Pcg32) -> Self {
        if self.score <= other.score {
            self.clone()
        } else {
            other.clone()
        }
    }

    fn mutate(&mut self, rng: &mut Pcg32) {
        if let Err(err) = self.try_mutate(rng) {
            log::warn!("mutation skipped: {err}");
        }
        self.rescore();
    }
}

/// Shapes of `grid`'s instances, for seeding a remaining-count mapping.
pub fn placed_shapes(grid: &Grid) -> Vec<Shape> {
    grid.blocks().into_iter().filter_map(|b| b.shape).collect()
}
