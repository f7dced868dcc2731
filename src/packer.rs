//! Single-grid backtracking packer.
//!
//! Key points of the search:
//! - The first empty cell in row-major order is always the target, so
//!   a placement covering it can only be anchored one way per rotation
//! - Shapes are tried in order of remaining demand; placements reaching
//!   fewer rows down are tried first to keep the packing compact
//! - A cell no shape can cover becomes a forced gap while the grid has
//!   slack (more empty cells than the remaining shapes need)
//! - Commit and undo write the grid buffer in place; every failed branch
//!   fully unwinds before the next candidate is tried

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_pcg::Pcg32;
use rustc_hash::FxHashMap;

use crate::error::PackError;
use crate::grid::{Block, Grid, BLOCKED, EMPTY, FIRST_ID, MAX_BLOCKS};
use crate::shapes::{Shape, ShapeCounts, ShapeKind, CELLS_PER_SHAPE};
use crate::Packing;

/// Attempt budget used when none is configured.
pub const DEFAULT_TRIES: usize = 100_000;

/// Buffer indices covered by one placement.
pub(crate) type Cells = [usize; CELLS_PER_SHAPE];

/// Packer settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackerOptions {
    /// Dead ends the search may hit before giving up.
    pub tries: usize,
    /// A placement may not cover rows on both sides of this boundary
    /// (rows `< split_row` and rows `>= split_row`).
    pub split_row: Option<usize>,
    /// Reject solutions leaving a region of forced gaps smaller than four
    /// cells.
    pub force_fours: bool,
    /// Shuffle the candidate order with this seed.
    pub shuffle_seed: Option<u64>,
}

impl Default for PackerOptions {
    fn default() -> Self {
        Self {
            tries: DEFAULT_TRIES,
            split_row: None,
            force_fours: false,
            shuffle_seed: None,
        }
    }
}

/// Legal anchors of one shape: true where the shape's bounding box can sit
/// with its top-left corner on that cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotMap {
    width: usize,
    height: usize,
    anchors: Vec<bool>,
}

impl SlotMap {
    fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            anchors: vec![false; width * height],
        }
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        row < self.height && col < self.width && self.anchors[row * self.width + col]
    }

    /// Number of legal anchors.
    pub fn count(&self) -> usize {
        self.anchors.iter().filter(|&&a| a).count()
    }

    /// Legal anchors as `(row, col)`, in row-major order.
    pub fn anchors(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let width = self.width;
        self.anchors
            .iter()
            .enumerate()
            .filter(|&(_, &a)| a)
            .map(move |(i, _)| (i / width, i % width))
    }
}

/// Slot maps keyed by oriented shape.
pub type SlotMaps = BTreeMap<Shape, SlotMap>;

/// Per-cell count of the slots that could cover each empty cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Coverage {
    width: usize,
    counts: Vec<u32>,
}

impl Coverage {
    /// Sentinel for a cell that is already filled or blocked.
    pub const FILLED: u32 = u32::MAX;

    pub fn get(&self, row: usize, col: usize) -> u32 {
        self.counts[row * self.width + col]
    }

    pub fn counts(&self) -> &[u32] {
        &self.counts
    }

    /// Lowest coverage on the grid; `FILLED` when nothing is left to cover.
    pub fn min(&self) -> u32 {
        self.counts.iter().copied().min().unwrap_or(Self::FILLED)
    }

    /// True if nothing is left to cover.
    pub fn is_filled(&self) -> bool {
        self.min() == Self::FILLED
    }

    /// True if some empty cell can no longer be covered.
    pub fn has_gap(&self) -> bool {
        self.min() == 0
    }

    /// The first cell (buffer index) holding the minimum coverage.
    pub fn first_min(&self) -> Option<usize> {
        let min = self.min();
        if min == Self::FILLED {
            return None;
        }
        self.counts.iter().position(|&c| c == min)
    }
}

/// Holds one grid's placement state and packs shapes into it.
///
/// After a failed `fill` the state is gone (`grid()` returns `None`) and
/// every operation that needs it reports [`PackError::Unsolved`].
#[derive(Clone, Debug)]
pub struct Packer {
    grid: Option<Grid>,
    tries: usize,
    split_row: Option<usize>,
    force_fours: bool,
    rng: Option<Pcg32>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Packer {
    /// A packer for a blank `width` x `height` grid.
    pub fn new(width: usize, height: usize) -> Self {
        Self::from_grid(Grid::new(width, height))
    }

    pub fn from_grid(grid: Grid) -> Self {
        Self::with_options(grid, &PackerOptions::default())
    }

    pub fn with_options(grid: Grid, options: &PackerOptions) -> Self {
        Self {
            grid: Some(grid),
            tries: options.tries,
            split_row: options.split_row,
            force_fours: options.force_fours,
            rng: options.shuffle_seed.map(Pcg32::seed_from_u64),
            cancel: None,
        }
    }

    /// Reads a grid from the text encoding.
    pub fn parse(text: &str) -> Result<Self, PackError> {
        Ok(Self::from_grid(Grid::parse(text)?))
    }

    /// The current state, or `None` once a fill has failed.
    pub fn grid(&self) -> Option<&Grid> {
        self.grid.as_ref()
    }

    /// The current state, or [`PackError::Unsolved`].
    pub fn state(&self) -> Result<&Grid, PackError> {
        self.grid.as_ref().ok_or(PackError::Unsolved)
    }

    pub(crate) fn state_mut(&mut self) -> Result<&mut Grid, PackError> {
        self.grid.as_mut().ok_or(PackError::Unsolved)
    }

    pub(crate) fn take_grid(&mut self) -> Option<Grid> {
        self.grid.take()
    }

    /// Replaces the state wholesale.
    pub fn set_grid(&mut self, grid: Grid) {
        self.grid = Some(grid);
    }

    pub fn tries(&self) -> usize {
        self.tries
    }

    pub fn set_tries(&mut self, tries: usize) {
        self.tries = tries;
    }

    pub fn split_row(&self) -> Option<usize> {
        self.split_row
    }

    pub fn set_split_row(&mut self, split_row: Option<usize>) {
        self.split_row = split_row;
    }

    pub fn set_force_fours(&mut self, force_fours: bool) {
        self.force_fours = force_fours;
    }

    /// Enables (with a seed) or disables shuffled candidate order.
    pub fn set_shuffle(&mut self, seed: Option<u64>) {
        self.rng = seed.map(Pcg32::seed_from_u64);
    }

    /// Installs a flag that aborts the search once raised.
    pub fn set_cancel(&mut self, cancel: Arc<AtomicBool>) {
        self.cancel = Some(cancel);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Fills every empty cell, placing exactly the shapes in `counts`.
    ///
    /// Cells that no remaining shape can cover become gaps (blocked) as
    /// long as the grid has room to spare. Of the completions found within
    /// the attempt budget, the one reaching the fewest rows down is kept;
    /// the search stops early once no completion could use fewer. Returns
    /// `Ok(false)` when no
    /// completion is found within the attempt budget; the state is then
    /// discarded. Fails with [`PackError::TooManyBlocks`] before touching
    /// anything if the ids would run past the 8-bit ceiling.
    pub fn fill(&mut self, counts: &ShapeCounts) -> Result<bool, PackError> {
        let grid = self.state()?;
        let used_ids = (grid.max_id() - BLOCKED) as usize;
        let requested = used_ids + counts.total();
        if requested > MAX_BLOCKS {
            return Err(PackError::TooManyBlocks { requested });
        }

        let Some(mut grid) = self.grid.take() else {
            return Err(PackError::Unsolved);
        };
        if self.tries == 0 {
            log::debug!("no attempts left, not searching");
            return Ok(false);
        }
        if grid.empty_count() % CELLS_PER_SHAPE != 0 {
            // leftover area must come out in whole pieces
            log::debug!("{} empty cells cannot be split into pieces", grid.empty_count());
            self.tries -= 1;
            return Ok(false);
        }

        let mut remaining = counts.clone();
        let mut gaps = Vec::new();
        let mut compact = Compact::new(&grid, counts.total() * CELLS_PER_SHAPE);
        let tries_before = self.tries;
        self.search(&mut grid, &mut remaining, used_ids + FIRST_ID as usize, &mut gaps, &mut compact);

        let Some(best) = compact.best else {
            log::debug!("fill failed after {} dead ends", tries_before - self.tries);
            return Ok(false);
        };
        log::info!(
            "filled {}x{} grid with {} blocks in {} rows ({} dead ends)",
            best.width(),
            best.height(),
            best.block_count(),
            best.used_rows(),
            tries_before - self.tries
        );
        self.grid = Some(best);
        Ok(true)
    }

    /// One step of the recursive search. Completions are offered to
    /// `compact`; returns true once one reaches its row floor, and
    /// otherwise leaves `grid`, `counts` and `gaps` as it found them.
    fn search(
        &mut self,
        grid: &mut Grid,
        counts: &mut ShapeCounts,
        next_id: usize,
        gaps: &mut Vec<usize>,
        compact: &mut Compact,
    ) -> bool {
        if self.tries == 0 || self.is_cancelled() {
            return false;
        }
        if compact.cannot_improve(grid) {
            return false;
        }

        let Some(target) = grid.first_empty() else {
            if counts.total() == 0 && (!self.force_fours || gaps_form_fours(grid, gaps)) {
                return compact.offer(grid);
            }
            self.tries -= 1;
            return false;
        };

        let empty = grid.empty_count();
        let needed = counts.total() * CELLS_PER_SHAPE;
        if needed > empty {
            self.tries -= 1;
            return false;
        }

        for (shape, cells) in self.candidates(grid, counts, target) {
            let Some(key) = counts.take(shape) else {
                continue;
            };
            commit(grid, &cells, next_id as u8);

            if self.search(grid, counts, next_id + 1, gaps, compact) {
                return true;
            }

            commit(grid, &cells, EMPTY);
            counts.restore(key);
            if self.tries == 0 {
                return false;
            }
        }

        if empty > needed {
            grid.set_idx(target, BLOCKED);
            gaps.push(target);
            if self.search(grid, counts, next_id, gaps, compact) {
                return true;
            }
            gaps.pop();
            grid.set_idx(target, EMPTY);
        }

        self.tries = self.tries.saturating_sub(1);
        false
    }

    /// Legal placements covering `target`, most demanded shapes first and,
    /// within one shape token, the ones reaching fewest rows down first.
    fn candidates(&mut self, grid: &Grid, counts: &ShapeCounts, target: usize) -> Vec<(Shape, Cells)> {
        let (row, col) = grid.position(target);
        let mut keys = counts.by_demand();
        if let Some(rng) = self.rng.as_mut() {
            keys.shuffle(rng);
            keys.sort_by(|a, b| b.1.cmp(&a.1));
        }

        let mut found: Vec<(Shape, Cells)> = Vec::new();
        for (key, _) in keys {
            let start = found.len();
            for shape in key.shapes() {
                for (x, y) in shape.cells() {
                    let Some(cells) = grid.placement(shape, row as i32 - y, col as i32 - x) else {
                        continue;
                    };
                    if !grid.is_free(&cells) || straddles(self.split_row, grid.width(), &cells) {
                        continue;
                    }
                    if found.iter().any(|&(s, c)| s == shape && c == cells) {
                        continue;
                    }
                    found.push((shape, cells));
                }
            }

            let group = &mut found[start..];
            if let Some(rng) = self.rng.as_mut() {
                group.shuffle(rng);
            }
            // cells are row-major, so the last one is the lowest
            group.sort_by_key(|(_, cells)| cells[CELLS_PER_SHAPE - 1] / grid.width());
        }
        found
    }

    /// Legal anchors for every oriented shape against the current state.
    pub fn find_slots(&self) -> Result<SlotMaps, PackError> {
        let shapes: Vec<Shape> = Shape::all().collect();
        self.find_slots_for(&shapes)
    }

    /// Legal anchors for the given shapes against the current state.
    pub fn find_slots_for(&self, shapes: &[Shape]) -> Result<SlotMaps, PackError> {
        Ok(slot_maps(self.state()?, self.split_row, shapes))
    }

    /// Counts, for every empty cell, how many slots cover it. Filled and
    /// blocked cells get [`Coverage::FILLED`].
    pub fn slot_coverage(&self, slots: &SlotMaps) -> Result<Coverage, PackError> {
        Ok(coverage(self.state()?, slots))
    }

    /// Upper bound on how many instances of each shape kind could still be
    /// placed: limited both by the empty area and by the cells that kind
    /// can reach at all.
    pub fn calculate_max_shape_counts(&self) -> Result<BTreeMap<ShapeKind, usize>, PackError> {
        let grid = self.state()?;
        let area_bound = grid.empty_count() / CELLS_PER_SHAPE;

        let mut bounds = BTreeMap::new();
        for kind in ShapeKind::ALL {
            let shapes: Vec<Shape> = kind.shapes().collect();
            let slots = self.find_slots_for(&shapes)?;
            let mut reachable = vec![false; grid.cells().len()];
            for (&shape, map) in &slots {
                for (row, col) in map.anchors() {
                    if let Some(cells) = grid.placement(shape, row as i32, col as i32) {
                        for idx in cells {
                            reachable[idx] = true;
                        }
                    }
                }
            }
            let reach_bound = reachable.iter().filter(|&&r| r).count() / CELLS_PER_SHAPE;
            bounds.insert(kind, area_bound.min(reach_bound));
        }
        Ok(bounds)
    }

    /// Reconstructs instance `id`, or `None` if it is not on the grid.
    pub fn create_block(&self, id: u8) -> Result<Option<Block>, PackError> {
        Ok(self.state()?.block(id))
    }

    /// Reconstructs every instance, ordered by id.
    pub fn create_blocks(&self) -> Result<Vec<Block>, PackError> {
        Ok(self.state()?.blocks())
    }

    /// Clears the instance covering `(row, col)` and returns its shape.
    pub fn remove_block(&mut self, row: usize, col: usize) -> Result<Shape, PackError> {
        let grid = self.state_mut()?;
        if row >= grid.height() || col >= grid.width() {
            return Err(PackError::NoBlockAt { row, col });
        }
        let id = grid.get(row, col);
        let block = grid.block(id).ok_or(PackError::NoBlockAt { row, col })?;
        let shape = block.shape.ok_or(PackError::UnknownShape { id })?;

        for (r, c) in block.cells {
            grid.set(r, c, EMPTY);
        }
        Ok(shape)
    }

    /// Renumbers instances from `FIRST_ID` upwards.
    ///
    /// With an explicit `order`, the listed ids come first in that order;
    /// everything else follows in row-major order of each block's first
    /// cell.
    pub fn sort_blocks(&mut self, order: Option<&[u8]>) -> Result<(), PackError> {
        let grid = self.state_mut()?;
        let mut blocks = grid.blocks();
        blocks.sort_by_key(Block::top_left);

        let mut sequence: Vec<u8> = Vec::with_capacity(blocks.len());
        if let Some(order) = order {
            for &id in order {
                if blocks.iter().any(|b| b.id == id) && !sequence.contains(&id) {
                    sequence.push(id);
                }
            }
        }
        for block in &blocks {
            if !sequence.contains(&block.id) {
                sequence.push(block.id);
            }
        }

        let mapping: FxHashMap<u8, u8> = sequence
            .into_iter()
            .enumerate()
            .map(|(i, old)| (old, FIRST_ID + i as u8))
            .collect();
        grid.relabel(&mapping);
        Ok(())
    }

    /// A new packer holding the left-right mirror of this one's grid.
    pub fn flip(&self) -> Packer {
        Packer {
            grid: self.grid.as_ref().map(Grid::flipped),
            ..self.clone()
        }
    }

    /// The text encoding of the current state.
    pub fn display(&self) -> Result<String, PackError> {
        self.state()?.display()
    }

    /// Greedy single pass: visits empty cells in random order and places
    /// whatever fits, decrementing `counts` for each placement. Returns
    /// the number of instances placed.
    pub fn random_fill(&mut self, counts: &mut ShapeCounts, rng: &mut Pcg32) -> Result<usize, PackError> {
        let mut order: Vec<usize> = self
            .state()?
            .cells()
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == EMPTY)
            .map(|(i, _)| i)
            .collect();
        order.shuffle(rng);
        self.greedy_fill(counts, rng, &order)
    }

    /// Greedy pass over `order` (buffer indices), trying shapes in random
    /// order at each still-empty cell.
    pub(crate) fn greedy_fill(
        &mut self,
        counts: &mut ShapeCounts,
        rng: &mut Pcg32,
        order: &[usize],
    ) -> Result<usize, PackError> {
        let split_row = self.split_row;
        let grid = self.state_mut()?;
        // ids freed by earlier removals are reused, lowest first
        let mut free_ids = grid.unused_ids().into_iter().peekable();
        let mut placed = 0;

        for &target in order {
            if counts.total() == 0 || free_ids.peek().is_none() {
                break;
            }
            if grid.get_idx(target) != EMPTY {
                continue;
            }
            let mut shapes = counts.available_shapes();
            shapes.shuffle(rng);
            if let Some((shape, cells)) = fitting_placement(grid, split_row, &shapes, target, rng) {
                let Some(id) = free_ids.next() else {
                    break;
                };
                commit(grid, &cells, id);
                counts.take(shape);
                placed += 1;
            }
        }
        Ok(placed)
    }
}

impl Packing for Packer {
    fn pack(&mut self, counts: Option<&ShapeCounts>) -> Result<bool, PackError> {
        self.fill(counts.ok_or(PackError::MissingCounts)?)
    }

    fn display(&self) -> Result<String, PackError> {
        Packer::display(self)
    }

    fn faces(&self) -> Result<(String, Option<String>), PackError> {
        Ok((Packer::display(self)?, None))
    }

    fn tries(&self) -> usize {
        self.tries
    }

    fn set_tries(&mut self, tries: usize) {
        self.tries = tries;
    }

    fn set_shuffle(&mut self, seed: Option<u64>) {
        Packer::set_shuffle(self, seed);
    }

    fn set_cancel(&mut self, cancel: Arc<AtomicBool>) {
        Packer::set_cancel(self, cancel);
    }
}

/// The completion using the fewest rows found so far.
#[derive(Debug)]
struct Compact {
    /// No completion can use fewer rows than this.
    floor: usize,
    best: Option<Grid>,
}

impl Compact {
    /// `needed` cells must still be covered on `grid`; they cannot fit
    /// above the row where that many empty cells have been seen.
    fn new(grid: &Grid, needed: usize) -> Self {
        let mut seen = 0;
        let mut rows = 0;
        for (row, cells) in grid.cells().chunks(grid.width().max(1)).enumerate() {
            if seen >= needed {
                break;
            }
            seen += cells.iter().filter(|&&c| c == EMPTY).count();
            rows = row + 1;
        }
        Self {
            floor: rows.max(grid.used_rows()),
            best: None,
        }
    }

    fn best_rows(&self) -> Option<usize> {
        self.best.as_ref().map(Grid::used_rows)
    }

    /// True once `grid` already reaches as far down as the best completion.
    fn cannot_improve(&self, grid: &Grid) -> bool {
        self.best_rows().is_some_and(|rows| grid.used_rows() >= rows)
    }

    /// Keeps `grid` if it is more compact. Returns true when nothing
    /// better can exist.
    fn offer(&mut self, grid: &Grid) -> bool {
        let rows = grid.used_rows();
        if self.best_rows().map_or(true, |best| rows < best) {
            log::debug!("completion in {rows} rows");
            self.best = Some(grid.clone());
        }
        rows <= self.floor
    }
}

/// Legal anchors of each shape in `shapes` on `grid`.
pub(crate) fn slot_maps(grid: &Grid, split_row: Option<usize>, shapes: &[Shape]) -> SlotMaps {
    let (width, height) = (grid.width(), grid.height());
    let mut slots = SlotMaps::new();
    for &shape in shapes {
        let mut map = SlotMap::new(width, height);
        for row in 0..height {
            for col in 0..width {
                map.anchors[row * width + col] = grid
                    .placement(shape, row as i32, col as i32)
                    .is_some_and(|cells| grid.is_free(&cells) && !straddles(split_row, width, &cells));
            }
        }
        slots.insert(shape, map);
    }
    slots
}

/// Per-cell slot coverage of `grid`.
pub(crate) fn coverage(grid: &Grid, slots: &SlotMaps) -> Coverage {
    let mut counts = vec![0u32; grid.cells().len()];
    for (&shape, map) in slots {
        for (row, col) in map.anchors() {
            if let Some(cells) = grid.placement(shape, row as i32, col as i32) {
                for idx in cells {
                    counts[idx] += 1;
                }
            }
        }
    }
    for (count, &value) in counts.iter_mut().zip(grid.cells()) {
        if value != EMPTY {
            *count = Coverage::FILLED;
        }
    }
    Coverage {
        width: grid.width(),
        counts,
    }
}

/// Writes `value` into every listed cell.
#[inline]
pub(crate) fn commit(grid: &mut Grid, cells: &[usize], value: u8) {
    for &idx in cells {
        grid.set_idx(idx, value);
    }
}

/// True if the placement has cells on both sides of the split boundary.
#[inline]
pub(crate) fn straddles(split_row: Option<usize>, width: usize, cells: &[usize]) -> bool {
    let Some(split) = split_row else {
        return false;
    };
    let above = cells.iter().any(|&idx| idx / width < split);
    let below = cells.iter().any(|&idx| idx / width >= split);
    above && below
}

/// First legal placement of any of `shapes` covering `target`, trying the
/// shape's own cells against the target in random order.
pub(crate) fn fitting_placement(
    grid: &Grid,
    split_row: Option<usize>,
    shapes: &[Shape],
    target: usize,
    rng: &mut Pcg32,
) -> Option<(Shape, Cells)> {
    let (row, col) = grid.position(target);
    for &shape in shapes {
        let mut offsets = shape.cells();
        offsets.shuffle(rng);
        for (x, y) in offsets {
            let Some(cells) = grid.placement(shape, row as i32 - y, col as i32 - x) else {
                continue;
            };
            if grid.is_free(&cells) && !straddles(split_row, grid.width(), &cells) {
                return Some((shape, cells));
            }
        }
    }
    None
}

/// True if every 4-connected region of gap cells has at least four cells.
fn gaps_form_fours(grid: &Grid, gaps: &[usize]) -> bool {
    let width = grid.width();
    let mut unvisited: Vec<usize> = gaps.to_vec();

    while let Some(start) = unvisited.pop() {
        let mut region = 1;
        let mut frontier = vec![start];
        while let Some(cell) = frontier.pop() {
            let (row, col) = grid.position(cell);
            let mut neighbours = Vec::with_capacity(4);
            if row > 0 {
                neighbours.push(cell - width);
            }
            if row + 1 < grid.height() {
                neighbours.push(cell + width);
            }
            if col > 0 {
                neighbours.push(cell - 1);
            }
            if col + 1 < width {
                neighbours.push(cell + 1);
            }
            for next in neighbours {
                if let Some(pos) = unvisited.iter().position(|&g| g == next) {
                    unvisited.swap_remove(pos);
                    frontier.push(next);
                    region += 1;
                }
            }
        }
        if region < CELLS_PER_SHAPE {
            return false;
        }
    }
    true
}
