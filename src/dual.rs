//! Dual-grid packer for two-sided sheets.
//!
//! Every instance is placed twice: once on the front and once, as its
//! mirror shape, on the back. Both placements carry the same instance id.
//! The search always branches on the most constrained cell of either face.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::seq::{IndexedRandom, SliceRandom};
use rand::SeedableRng;
use rand_pcg::Pcg32;
use rustc_hash::FxHashMap;

use crate::error::PackError;
use crate::grid::{Grid, BLOCKED, EMPTY, FIRST_ID, MAX_BLOCKS};
use crate::packer::{
    commit, coverage, fitting_placement, slot_maps, Cells, Coverage, Packer, PackerOptions,
    SlotMaps,
};
use crate::shapes::{Shape, ShapeCounts, CELLS_PER_SHAPE};
use crate::Packing;

/// One side of the sheet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Face {
    Front,
    Back,
}

impl Face {
    const fn index(self) -> usize {
        match self {
            Face::Front => 0,
            Face::Back => 1,
        }
    }

    const fn other(self) -> Face {
        match self {
            Face::Front => Face::Back,
            Face::Back => Face::Front,
        }
    }
}

/// Packs two grids of equal size and equal usable area in lockstep.
#[derive(Clone, Debug)]
pub struct DualPacker {
    front: Packer,
    back: Packer,
    tries: usize,
    rng: Option<Pcg32>,
    cancel: Option<Arc<AtomicBool>>,
}

impl DualPacker {
    /// Pairs two grids. Fails unless both have the same dimensions and the
    /// same number of usable cells.
    pub fn new(front: Grid, back: Grid) -> Result<Self, PackError> {
        Self::with_options(front, back, &PackerOptions::default())
    }

    pub fn with_options(front: Grid, back: Grid, options: &PackerOptions) -> Result<Self, PackError> {
        if (front.width(), front.height()) != (back.width(), back.height()) {
            return Err(PackError::DimensionMismatch {
                front: (front.width(), front.height()),
                back: (back.width(), back.height()),
            });
        }
        if front.usable_count() != back.usable_count() {
            return Err(PackError::DifferentSpaceCounts {
                front: front.usable_count(),
                back: back.usable_count(),
            });
        }

        Ok(Self {
            front: Packer::with_options(front, options),
            back: Packer::with_options(back, options),
            tries: options.tries,
            rng: options.shuffle_seed.map(Pcg32::seed_from_u64),
            cancel: None,
        })
    }

    /// Reads the combined encoding: the front rows stacked over the back
    /// rows, half each.
    pub fn parse(text: &str) -> Result<Self, PackError> {
        let combined = Grid::parse(text)?;
        let rows = combined.height() / 2;
        let (front, back) = combined.split_at_row(rows);
        Self::new(front, back)
    }

    /// Reads the two faces from separate encodings.
    pub fn parse_faces(front: &str, back: &str) -> Result<Self, PackError> {
        Self::new(Grid::parse(front)?, Grid::parse(back)?)
    }

    pub fn front(&self) -> &Packer {
        &self.front
    }

    pub fn back(&self) -> &Packer {
        &self.back
    }

    pub fn face(&self, face: Face) -> &Packer {
        match face {
            Face::Front => &self.front,
            Face::Back => &self.back,
        }
    }

    fn face_mut(&mut self, face: Face) -> &mut Packer {
        match face {
            Face::Front => &mut self.front,
            Face::Back => &mut self.back,
        }
    }

    pub fn tries(&self) -> usize {
        self.tries
    }

    pub fn set_tries(&mut self, tries: usize) {
        self.tries = tries;
    }

    pub fn set_shuffle(&mut self, seed: Option<u64>) {
        self.rng = seed.map(Pcg32::seed_from_u64);
    }

    pub fn set_cancel(&mut self, cancel: Arc<AtomicBool>) {
        self.cancel = Some(cancel);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Both faces, or [`PackError::Unsolved`] after a failed fill.
    pub fn states(&self) -> Result<(&Grid, &Grid), PackError> {
        Ok((self.front.state()?, self.back.state()?))
    }

    /// Front rows stacked over back rows.
    pub fn combined(&self) -> Result<Grid, PackError> {
        let (front, back) = self.states()?;
        front.stacked(back)
    }

    /// Covers both faces completely with mirrored pairs.
    ///
    /// With `counts`, exactly those front shapes are placed (their mirrors
    /// go on the back); without, any shapes will do. Returns `Ok(false)`
    /// when no completion is found within the attempt budget, leaving both
    /// faces unsolved.
    pub fn fill(&mut self, counts: Option<&ShapeCounts>) -> Result<bool, PackError> {
        let (front, back) = self.states()?;
        let used_ids = (front.max_id().max(back.max_id()) - BLOCKED) as usize;
        let front_empty = front.empty_count();
        let back_empty = back.empty_count();
        let needed = counts.map_or(front_empty / CELLS_PER_SHAPE, ShapeCounts::total);
        let requested = used_ids + needed;
        if requested > MAX_BLOCKS {
            return Err(PackError::TooManyBlocks { requested });
        }

        let (Some(front), Some(back)) = (self.front.take_grid(), self.back.take_grid()) else {
            return Err(PackError::Unsolved);
        };
        if self.tries == 0 {
            log::debug!("no attempts left, not searching");
            return Ok(false);
        }
        let exact = counts.map_or(true, |c| c.total() * CELLS_PER_SHAPE == front_empty);
        if front_empty != back_empty || front_empty % CELLS_PER_SHAPE != 0 || !exact {
            log::debug!("faces cannot be covered: {front_empty} and {back_empty} empty cells for {needed} pairs");
            self.tries -= 1;
            return Ok(false);
        }

        let split_rows = [self.front.split_row(), self.back.split_row()];
        let mut faces = [front, back];
        let mut remaining = counts.cloned();
        let tries_before = self.tries;
        let filled = self.search(&mut faces, &split_rows, &mut remaining, used_ids + FIRST_ID as usize);

        if filled {
            log::info!(
                "filled both faces with {} pairs ({} dead ends)",
                faces[0].block_count(),
                tries_before - self.tries
            );
            let [front, back] = faces;
            self.front.set_grid(front);
            self.back.set_grid(back);
        } else {
            log::debug!("dual fill failed after {} dead ends", tries_before - self.tries);
        }
        Ok(filled)
    }

    fn dead_end(&mut self) -> bool {
        self.tries = self.tries.saturating_sub(1);
        false
    }

    fn search(
        &mut self,
        faces: &mut [Grid; 2],
        split_rows: &[Option<usize>; 2],
        counts: &mut Option<ShapeCounts>,
        next_id: usize,
    ) -> bool {
        if self.tries == 0 || self.is_cancelled() {
            return false;
        }

        let front_shapes: Vec<Shape> = match counts {
            Some(counts) => counts.available_shapes(),
            None => Shape::all().collect(),
        };
        let back_shapes: Vec<Shape> = front_shapes.iter().map(|s| s.mirror()).collect();
        let slots: [SlotMaps; 2] = [
            slot_maps(&faces[0], split_rows[0], &front_shapes),
            slot_maps(&faces[1], split_rows[1], &back_shapes),
        ];
        let cover: [Coverage; 2] = [coverage(&faces[0], &slots[0]), coverage(&faces[1], &slots[1])];

        if cover.iter().any(Coverage::has_gap) {
            return self.dead_end();
        }
        if cover.iter().all(Coverage::is_filled) {
            if counts.as_ref().map_or(true, |c| c.total() == 0) {
                return true;
            }
            return self.dead_end();
        }

        let side = if cover[1].min() < cover[0].min() {
            Face::Back
        } else {
            Face::Front
        };
        let other = side.other();
        let Some(target) = cover[side.index()].first_min() else {
            return self.dead_end();
        };

        for shape in self.ranked_shapes(side, &slots[side.index()], counts.as_ref()) {
            let front_shape = match side {
                Face::Front => shape,
                Face::Back => shape.mirror(),
            };
            let mirror = shape.mirror();

            for cells in self.anchors_covering(&faces[side.index()], &slots[side.index()], shape, target) {
                let partners = scarce_first(&faces[other.index()], &slots[other.index()], &cover[other.index()], mirror);
                for partner in partners {
                    let key = match counts.as_mut() {
                        Some(counts) => match counts.take(front_shape) {
                            Some(key) => Some(key),
                            None => continue,
                        },
                        None => None,
                    };
                    commit(&mut faces[side.index()], &cells, next_id as u8);
                    commit(&mut faces[other.index()], &partner, next_id as u8);

                    if self.search(faces, split_rows, counts, next_id + 1) {
                        return true;
                    }

                    commit(&mut faces[side.index()], &cells, EMPTY);
                    commit(&mut faces[other.index()], &partner, EMPTY);
                    if let (Some(counts), Some(key)) = (counts.as_mut(), key) {
                        counts.restore(key);
                    }
                    if self.tries == 0 || self.is_cancelled() {
                        return false;
                    }
                }
            }
        }

        self.dead_end()
    }

    /// Shapes with slots on `side`, scarcest relative to demand first.
    fn ranked_shapes(&mut self, side: Face, slots: &SlotMaps, counts: Option<&ShapeCounts>) -> Vec<Shape> {
        let mut ranked: Vec<(Shape, usize, usize)> = slots
            .iter()
            .filter_map(|(&shape, map)| {
                let front_shape = match side {
                    Face::Front => shape,
                    Face::Back => shape.mirror(),
                };
                let available = map.count();
                let demand = counts.map_or(1, |c| c.demand(front_shape));
                (available > 0 && demand > 0).then_some((shape, available, demand))
            })
            .collect();

        if let Some(rng) = self.rng.as_mut() {
            ranked.shuffle(rng);
        }
        // available / demand, ascending, without dividing
        ranked.sort_by(|a, b| (a.1 * b.2).cmp(&(b.1 * a.2)));
        ranked.into_iter().map(|(shape, _, _)| shape).collect()
    }

    /// Legal placements of `shape` that cover `target`.
    fn anchors_covering(&mut self, grid: &Grid, slots: &SlotMaps, shape: Shape, target: usize) -> Vec<Cells> {
        let Some(map) = slots.get(&shape) else {
            return Vec::new();
        };
        let (row, col) = grid.position(target);
        let mut found: Vec<Cells> = shape
            .cells()
            .into_iter()
            .filter_map(|(x, y)| {
                let (r, c) = (row as i32 - y, col as i32 - x);
                if r < 0 || c < 0 || !map.get(r as usize, c as usize) {
                    return None;
                }
                grid.placement(shape, r, c)
            })
            .collect();
        if let Some(rng) = self.rng.as_mut() {
            found.shuffle(rng);
        }
        found
    }

    /// Reads the instance at `(row, col)` of `face` and clears it from both
    /// faces. Returns the shape as it lies on `face`.
    pub fn remove_block(&mut self, face: Face, row: usize, col: usize) -> Result<Shape, PackError> {
        let (front, back) = self.states()?;
        let grid = match face {
            Face::Front => front,
            Face::Back => back,
        };
        if row >= grid.height() || col >= grid.width() {
            return Err(PackError::NoBlockAt { row, col });
        }
        let id = grid.get(row, col);

        let shape = self.face_mut(face).remove_block(row, col)?;
        let partner = self.face_mut(face.other()).state_mut()?;
        if let Some(block) = partner.block(id) {
            if block.shape == Some(shape.mirror()) {
                for (r, c) in block.cells {
                    partner.set(r, c, EMPTY);
                }
            }
        }
        Ok(shape)
    }

    /// Clears instance `id` from both faces.
    pub(crate) fn clear_instance(&mut self, id: u8) -> Result<(), PackError> {
        for face in [Face::Front, Face::Back] {
            let grid = self.face_mut(face).state_mut()?;
            for cell in grid.block_cells(id) {
                grid.set(cell.0, cell.1, EMPTY);
            }
        }
        Ok(())
    }

    /// Renumbers the front in reading order, then gives each back instance
    /// the id of the first unclaimed front instance of its mirror shape.
    /// Back instances without a partner get fresh ids after the front's.
    pub fn sort_blocks(&mut self) -> Result<(), PackError> {
        self.states()?;
        self.front.sort_blocks(None)?;
        let front_blocks = self.front.create_blocks()?;
        let mut next_free = self.front.state()?.max_id() as usize + 1;

        let back = self.back.state_mut()?;
        let mut back_blocks = back.blocks();
        back_blocks.sort_by_key(|b| b.top_left());

        let mut claimed = vec![false; front_blocks.len()];
        let mut mapping: FxHashMap<u8, u8> = FxHashMap::default();
        for block in &back_blocks {
            let partner = front_blocks.iter().enumerate().position(|(i, front)| {
                !claimed[i] && front.shape.is_some() && front.shape.map(Shape::mirror) == block.shape
            });
            let new_id = match partner {
                Some(i) => {
                    claimed[i] = true;
                    front_blocks[i].id
                }
                None => {
                    if next_free > u8::MAX as usize {
                        return Err(PackError::TooManyBlocks {
                            requested: next_free - BLOCKED as usize,
                        });
                    }
                    next_free += 1;
                    (next_free - 1) as u8
                }
            };
            mapping.insert(block.id, new_id);
        }
        back.relabel(&mapping);
        Ok(())
    }

    /// The combined encoding, front over back.
    pub fn display(&self) -> Result<String, PackError> {
        self.combined()?.display()
    }

    /// Greedy mirrored pass over the front's empty cells in random order.
    /// Returns the number of pairs placed.
    pub fn random_fill(&mut self, counts: &mut ShapeCounts, rng: &mut Pcg32) -> Result<usize, PackError> {
        let mut order: Vec<usize> = self
            .front
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

    /// Greedy pass over front cells in `order`; each front placement is
    /// matched with a random legal mirror placement on the back.
    pub(crate) fn greedy_fill(
        &mut self,
        counts: &mut ShapeCounts,
        rng: &mut Pcg32,
        order: &[usize],
    ) -> Result<usize, PackError> {
        let split_rows = [self.front.split_row(), self.back.split_row()];
        let front = self.front.state_mut()?;
        let back = self.back.state_mut()?;
        // an id is free only when neither face uses it
        let back_ids = back.ids_present();
        let mut free_ids = front
            .unused_ids()
            .into_iter()
            .filter(|&id| !back_ids[id as usize])
            .peekable();
        let mut placed = 0;

        for &target in order {
            if counts.total() == 0 || free_ids.peek().is_none() {
                break;
            }
            if front.get_idx(target) != EMPTY {
                continue;
            }
            let mut shapes = counts.available_shapes();
            shapes.shuffle(rng);

            for shape in shapes {
                let Some((_, cells)) = fitting_placement(front, split_rows[0], &[shape], target, rng) else {
                    continue;
                };
                let mirror = shape.mirror();
                let partners: Vec<Cells> = slot_maps(back, split_rows[1], &[mirror])
                    .get(&mirror)
                    .map(|map| {
                        map.anchors()
                            .filter_map(|(r, c)| back.placement(mirror, r as i32, c as i32))
                            .collect()
                    })
                    .unwrap_or_default();
                let Some(partner) = partners.choose(rng).copied() else {
                    continue;
                };

                let Some(id) = free_ids.next() else {
                    break;
                };
                commit(front, &cells, id);
                commit(back, &partner, id);
                counts.take(shape);
                placed += 1;
                break;
            }
        }
        Ok(placed)
    }
}

/// Legal placements of `shape` on `grid`, the ones over the least covered
/// cells first.
fn scarce_first(grid: &Grid, slots: &SlotMaps, cover: &Coverage, shape: Shape) -> Vec<Cells> {
    let Some(map) = slots.get(&shape) else {
        return Vec::new();
    };
    let mut found: Vec<(u64, Cells)> = map
        .anchors()
        .filter_map(|(r, c)| grid.placement(shape, r as i32, c as i32))
        .map(|cells| {
            let weight = cells.iter().map(|&i| cover.counts()[i] as u64).sum();
            (weight, cells)
        })
        .collect();
    found.sort_by_key(|&(weight, _)| weight);
    found.into_iter().map(|(_, cells)| cells).collect()
}

impl Packing for DualPacker {
    fn pack(&mut self, counts: Option<&ShapeCounts>) -> Result<bool, PackError> {
        self.fill(counts)
    }

    fn display(&self) -> Result<String, PackError> {
        DualPacker::display(self)
    }

    fn faces(&self) -> Result<(String, Option<String>), PackError> {
        let (front, back) = self.states()?;
        Ok((front.display()?, Some(back.display()?)))
    }

    fn tries(&self) -> usize {
        self.tries
    }

    fn set_tries(&mut self, tries: usize) {
        self.tries = tries;
    }

    fn set_shuffle(&mut self, seed: Option<u64>) {
        DualPacker::set_shuffle(self, seed);
    }

    fn set_cancel(&mut self, cancel: Arc<AtomicBool>) {
        DualPacker::set_cancel(self, cancel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::ShapeKind;

    fn counts(text: &str) -> ShapeCounts {
        text.parse().unwrap()
    }

    /// Every front instance has exactly one back partner with the same id
    /// and the mirrored shape. Partner positions are not compared: the
    /// back placement is searched independently on its own face, so it
    /// need not sit on the horizontally mirrored cells.
    fn assert_mirror_consistent(dual: &DualPacker) {
        let (front, back) = dual.states().unwrap();
        let front_blocks = front.blocks();
        let back_blocks = back.blocks();
        assert_eq!(front_blocks.len(), back_blocks.len());
        for block in &front_blocks {
            let shape = block.shape.expect("front block is a tetromino");
            let partners: Vec<_> = back_blocks.iter().filter(|b| b.id == block.id).collect();
            assert_eq!(partners.len(), 1, "id {}", block.id);
            assert_eq!(partners[0].shape, Some(shape.mirror()), "id {}", block.id);
        }
    }

    #[test]
    fn test_fill_with_counts() {
        let mut dual = DualPacker::parse_faces("....\n....", "....\n....").unwrap();
        assert!(dual.fill(Some(&counts("L:2"))).unwrap());

        let (front, back) = dual.states().unwrap();
        assert_eq!(front.empty_count(), 0);
        assert_eq!(back.empty_count(), 0);
        for block in front.blocks() {
            assert_eq!(block.shape.map(Shape::kind), Some(ShapeKind::L));
        }
        for block in back.blocks() {
            assert_eq!(block.shape.map(Shape::kind), Some(ShapeKind::J));
        }
        assert_mirror_consistent(&dual);
    }

    #[test]
    fn test_fill_without_counts() {
        let blank = "....\n....\n....\n....";
        let mut dual = DualPacker::parse_faces(blank, blank).unwrap();
        assert!(dual.fill(None).unwrap());
        assert_eq!(dual.states().unwrap().0.block_count(), 4);
        assert_mirror_consistent(&dual);
    }

    #[test]
    fn test_faces_with_different_blocked_cells() {
        let mut dual = DualPacker::parse_faces("#....\n....#", "....#\n#....").unwrap();
        assert!(dual.fill(Some(&counts("I:2"))).unwrap());
        assert_mirror_consistent(&dual);
        assert_eq!(dual.states().unwrap().1.get(0, 4), BLOCKED);
    }

    #[test]
    fn test_different_space_counts_fail_at_construction() {
        let err = DualPacker::parse_faces("....\n....", "....\n...#").unwrap_err();
        assert_eq!(err, PackError::DifferentSpaceCounts { front: 8, back: 7 });
        assert!(err.to_string().contains("different space counts"));
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = DualPacker::parse_faces("....\n....", "........").unwrap_err();
        assert_eq!(
            err,
            PackError::DimensionMismatch {
                front: (4, 2),
                back: (8, 1)
            }
        );
    }

    #[test]
    fn test_unfillable_pair_spends_an_attempt() {
        let mut dual = DualPacker::parse_faces("....\n....", "....\n....").unwrap();
        dual.set_tries(3);
        assert!(!dual.fill(Some(&counts("O:1"))).unwrap());
        assert_eq!(dual.tries(), 2);
        assert_eq!(dual.display(), Err(PackError::Unsolved));
    }

    #[test]
    fn test_too_many_pairs() {
        let mut dual = DualPacker::new(Grid::new(20, 20), Grid::new(20, 20)).unwrap();
        let err = dual.fill(Some(&counts("O:255"))).unwrap_err();
        assert_eq!(err, PackError::TooManyBlocks { requested: 255 });
        assert!(dual.states().is_ok());
    }

    #[test]
    fn test_combined_display_and_parse() {
        let text = "AAAB\nABBB\nABBB\nAAAB\n";
        let dual = DualPacker::parse(text).unwrap();
        assert_eq!(dual.display().unwrap(), text);
        assert_eq!(dual.states().unwrap().0.height(), 2);
    }

    #[test]
    fn test_sort_blocks_pairs_mirrors() {
        let mut dual = DualPacker::parse_faces("AAAB\nABBB", "ABBB\nAAAB").unwrap();
        dual.sort_blocks().unwrap();
        insta::assert_snapshot!(dual.display().unwrap().trim_end(), @r"
        AAAB
        ABBB
        BAAA
        BBBA
        ");
    }

    #[test]
    fn test_remove_block_clears_partner() {
        let mut dual = DualPacker::parse_faces("AAAA\nBBBB", "BBBB\nAAAA").unwrap();
        let shape = dual.remove_block(Face::Front, 0, 2).unwrap();
        assert_eq!(shape, Shape::new(ShapeKind::I, 0));
        assert_eq!(dual.display().unwrap(), "....\nBBBB\nBBBB\n....\n");

        assert_eq!(
            dual.remove_block(Face::Back, 1, 0),
            Err(PackError::NoBlockAt { row: 1, col: 0 })
        );
    }

    #[test]
    fn test_random_fill_keeps_pairs() {
        let blank = "......\n......\n......\n......";
        let mut dual = DualPacker::parse_faces(blank, blank).unwrap();
        let mut remaining = counts("T:2, S:2, I:2");
        let mut rng = Pcg32::seed_from_u64(11);

        let placed = dual.random_fill(&mut remaining, &mut rng).unwrap();
        assert!(placed >= 1);
        assert_eq!(remaining.total(), 6 - placed);
        assert_mirror_consistent(&dual);
    }
}
