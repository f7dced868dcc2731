//! Scoring of partially packed grids.
//!
//! A score is a tuple of non-negative penalties compared lexicographically;
//! lower is better and an all-zero prefix means the packing is complete.

use std::collections::BTreeMap;
use std::fmt;

use crate::grid::{Grid, EMPTY, FIRST_ID};
use crate::shapes::{ShapeCounts, ShapeKind};

/// Structured fitness, most significant component first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FitnessScore {
    /// Shape instances still waiting to be placed.
    pub empty_spaces: usize,
    /// Share of usable cells left empty, in permille.
    pub empty_area: u32,
    /// Total deviation from the per-kind parity, minimum and maximum
    /// targets.
    pub missed_targets: usize,
    /// Pairs of same-kind instances sharing an edge.
    pub warning_count: usize,
}

impl FitnessScore {
    /// Every shape placed, no empty cell left and every target met.
    /// Warnings are cosmetic.
    pub fn is_solved(&self) -> bool {
        self.empty_spaces == 0 && self.empty_area == 0 && self.missed_targets == 0
    }
}

impl fmt::Display for FitnessScore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} unplaced, {}‰ empty, {} missed, {} warnings",
            self.empty_spaces, self.empty_area, self.missed_targets, self.warning_count
        )
    }
}

/// Required parity of a per-kind instance count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Parity {
    Even,
    Odd,
}

impl Parity {
    pub fn matches(self, count: usize) -> bool {
        match self {
            Parity::Even => count % 2 == 0,
            Parity::Odd => count % 2 == 1,
        }
    }
}

/// Per-kind count targets. Built once and handed to the calculator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TargetConfig {
    pub parities: BTreeMap<ShapeKind, Parity>,
    pub minimums: BTreeMap<ShapeKind, usize>,
    pub maximums: BTreeMap<ShapeKind, usize>,
}

impl TargetConfig {
    pub fn with_parity(mut self, kind: ShapeKind, parity: Parity) -> Self {
        self.parities.insert(kind, parity);
        self
    }

    pub fn with_minimum(mut self, kind: ShapeKind, minimum: usize) -> Self {
        self.minimums.insert(kind, minimum);
        self
    }

    pub fn with_maximum(mut self, kind: ShapeKind, maximum: usize) -> Self {
        self.maximums.insert(kind, maximum);
        self
    }

    /// Penalty for placing `count` instances of `kind`.
    pub fn miss(&self, kind: ShapeKind, count: usize) -> usize {
        let mut missed = 0;
        if let Some(parity) = self.parities.get(&kind) {
            if !parity.matches(count) {
                missed += 1;
            }
        }
        if let Some(&minimum) = self.minimums.get(&kind) {
            missed += minimum.saturating_sub(count);
        }
        if let Some(&maximum) = self.maximums.get(&kind) {
            missed += count.saturating_sub(maximum);
        }
        missed
    }
}

/// Scores single grids or front/back pairs against fixed targets.
#[derive(Clone, Debug, Default)]
pub struct FitnessCalculator {
    targets: TargetConfig,
}

impl FitnessCalculator {
    pub fn new(targets: TargetConfig) -> Self {
        Self { targets }
    }

    pub fn targets(&self) -> &TargetConfig {
        &self.targets
    }

    /// Scores one grid given the shapes still unplaced.
    pub fn score(&self, grid: &Grid, remaining: &ShapeCounts) -> FitnessScore {
        FitnessScore {
            empty_spaces: remaining.total(),
            empty_area: empty_permille(&[grid]),
            missed_targets: self.missed_targets(grid),
            warning_count: warnings(grid),
        }
    }

    /// Scores a front/back pair. Targets apply to the front; the back
    /// holds the same instances mirrored.
    pub fn score_dual(&self, front: &Grid, back: &Grid, remaining: &ShapeCounts) -> FitnessScore {
        FitnessScore {
            empty_spaces: remaining.total(),
            empty_area: empty_permille(&[front, back]),
            missed_targets: self.missed_targets(front),
            warning_count: warnings(front) + warnings(back),
        }
    }

    fn missed_targets(&self, grid: &Grid) -> usize {
        let placed = placed_kinds(grid);
        ShapeKind::ALL
            .into_iter()
            .map(|kind| self.targets.miss(kind, placed.get(&kind).copied().unwrap_or(0)))
            .sum()
    }
}

/// Instances on `grid` per shape kind. Cells that do not form a
/// tetromino are not counted.
pub fn placed_kinds(grid: &Grid) -> BTreeMap<ShapeKind, usize> {
    let mut kinds = BTreeMap::new();
    for block in grid.blocks() {
        if let Some(shape) = block.shape {
            *kinds.entry(shape.kind()).or_insert(0) += 1;
        }
    }
    kinds
}

/// Number of distinct pairs of same-kind instances that share an edge.
pub fn warnings(grid: &Grid) -> usize {
    let mut kind_of = [None; 256];
    for block in grid.blocks() {
        kind_of[block.id as usize] = block.shape.map(|s| s.kind());
    }

    let mut pairs: Vec<(u8, u8)> = Vec::new();
    for row in 0..grid.height() {
        for col in 0..grid.width() {
            let id = grid.get(row, col);
            if id < FIRST_ID {
                continue;
            }
            let neighbours = [
                (col + 1 < grid.width()).then(|| grid.get(row, col + 1)),
                (row + 1 < grid.height()).then(|| grid.get(row + 1, col)),
            ];
            for other in neighbours.into_iter().flatten() {
                if other < FIRST_ID || other == id {
                    continue;
                }
                let same_kind = kind_of[id as usize].is_some()
                    && kind_of[id as usize] == kind_of[other as usize];
                let pair = (id.min(other), id.max(other));
                if same_kind && !pairs.contains(&pair) {
                    pairs.push(pair);
                }
            }
        }
    }
    pairs.len()
}

/// Empty share of the usable cells of all `grids`, in permille.
fn empty_permille(grids: &[&Grid]) -> u32 {
    let usable: usize = grids.iter().map(|g| g.usable_count()).sum();
    if usable == 0 {
        return 0;
    }
    let empty: usize = grids
        .iter()
        .map(|g| g.cells().iter().filter(|&&c| c == EMPTY).count())
        .sum();
    (empty * 1000).div_ceil(usable) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_grid_is_solved() {
        // a square beside a bar: different kinds, so nothing to warn about
        let grid = Grid::parse("AABBBB\nAA####").unwrap();
        let score = FitnessCalculator::default().score(&grid, &ShapeCounts::new());
        assert_eq!(score, FitnessScore::default());
        assert!(score.is_solved());

        // two interlocked L pieces touch, which warns but still solves
        let grid = Grid::parse("AAAB\nABBB").unwrap();
        let score = FitnessCalculator::default().score(&grid, &ShapeCounts::new());
        assert_eq!(score.warning_count, 1);
        assert!(score.is_solved());
    }

    #[test]
    fn test_partial_grid_penalties() {
        let grid = Grid::parse("AA..\nAA..").unwrap();
        let remaining: ShapeCounts = "O:1".parse().unwrap();
        let score = FitnessCalculator::default().score(&grid, &remaining);
        assert_eq!(score.empty_spaces, 1);
        assert_eq!(score.empty_area, 500);
        assert!(!score.is_solved());
        assert_eq!(score.to_string(), "1 unplaced, 500‰ empty, 0 missed, 0 warnings");
    }

    #[test]
    fn test_scores_order_lexicographically() {
        let nearly = FitnessScore {
            empty_spaces: 0,
            empty_area: 10,
            missed_targets: 5,
            warning_count: 9,
        };
        let far = FitnessScore {
            empty_spaces: 1,
            ..FitnessScore::default()
        };
        assert!(nearly < far);
        assert!(FitnessScore::default() < nearly);
    }

    #[test]
    fn test_target_penalties() {
        let targets = TargetConfig::default()
            .with_parity(ShapeKind::O, Parity::Even)
            .with_minimum(ShapeKind::T, 2)
            .with_maximum(ShapeKind::I, 1);
        assert_eq!(targets.miss(ShapeKind::O, 3), 1);
        assert_eq!(targets.miss(ShapeKind::O, 2), 0);
        assert_eq!(targets.miss(ShapeKind::T, 0), 2);
        assert_eq!(targets.miss(ShapeKind::I, 4), 3);
        assert_eq!(targets.miss(ShapeKind::S, 7), 0);

        // one square: odd, so the parity target is missed
        let grid = Grid::parse("AA\nAA").unwrap();
        let calculator = FitnessCalculator::new(targets);
        let score = calculator.score(&grid, &ShapeCounts::new());
        assert_eq!(score.missed_targets, 1 + 2);
        assert!(!score.is_solved());
    }

    #[test]
    fn test_touching_same_kind_warns() {
        // two squares side by side and a bar underneath
        let grid = Grid::parse("AABB\nAABB\nCCCC").unwrap();
        assert_eq!(warnings(&grid), 1);
        assert_eq!(placed_kinds(&grid)[&ShapeKind::O], 2);

        let grid = Grid::parse("AAAA\nBBBB").unwrap();
        assert_eq!(warnings(&grid), 1);

        let grid = Grid::parse("AA#BB\nAA#BB").unwrap();
        assert_eq!(warnings(&grid), 0);
    }

    #[test]
    fn test_dual_score_counts_both_faces() {
        let front = Grid::parse("AAAA\n....").unwrap();
        let back = Grid::parse("....\nAAAA").unwrap();
        let remaining: ShapeCounts = "I:1".parse().unwrap();
        let score = FitnessCalculator::default().score_dual(&front, &back, &remaining);
        assert_eq!(score.empty_spaces, 1);
        assert_eq!(score.empty_area, 500);
    }
}
