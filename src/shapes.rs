//! Tetromino definitions, the shape lookup table, and shape-count
//! requirements.
//!
//! Each shape is defined as a set of cell offsets, normalized to start at
//! the origin. Rotations are generated from the reference cells by
//! repeated quarter turns; the first rotation that produces a given cell
//! set is the canonical one for that set.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use rustc_hash::FxHashMap;

use crate::error::PackError;
use crate::geometry::{all_orientations, normalize_to_origin, Coord, NUM_ROTATIONS};

/// Number of cells in every shape.
pub const CELLS_PER_SHAPE: usize = 4;

/// Normalized cells of one oriented shape.
pub type ShapeCells = [Coord; CELLS_PER_SHAPE];

/// The seven tetromino forms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShapeKind {
    O,
    I,
    L,
    J,
    S,
    Z,
    T,
}

impl ShapeKind {
    pub const ALL: [ShapeKind; 7] = [
        ShapeKind::O,
        ShapeKind::I,
        ShapeKind::L,
        ShapeKind::J,
        ShapeKind::S,
        ShapeKind::Z,
        ShapeKind::T,
    ];

    /// The single-letter name of this shape.
    pub const fn letter(self) -> char {
        match self {
            ShapeKind::O => 'O',
            ShapeKind::I => 'I',
            ShapeKind::L => 'L',
            ShapeKind::J => 'J',
            ShapeKind::S => 'S',
            ShapeKind::Z => 'Z',
            ShapeKind::T => 'T',
        }
    }

    pub fn from_letter(letter: char) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.letter() == letter.to_ascii_uppercase())
    }

    /// Number of distinct rotations. Rotation `r` and `r % rotations()`
    /// describe the same cells.
    pub const fn rotations(self) -> u8 {
        match self {
            ShapeKind::O => 1,
            ShapeKind::I | ShapeKind::S | ShapeKind::Z => 2,
            ShapeKind::L | ShapeKind::J | ShapeKind::T => 4,
        }
    }

    /// The horizontally flipped counterpart. Self-inverse.
    pub const fn mirror(self) -> Self {
        match self {
            ShapeKind::L => ShapeKind::J,
            ShapeKind::J => ShapeKind::L,
            ShapeKind::S => ShapeKind::Z,
            ShapeKind::Z => ShapeKind::S,
            other => other,
        }
    }

    /// Every distinct rotation of this shape.
    pub fn shapes(self) -> impl Iterator<Item = Shape> {
        (0..self.rotations()).map(move |rotation| Shape {
            kind: self,
            rotation,
        })
    }

    const fn index(self) -> usize {
        self as usize
    }

    /// Hand-authored reference cells (rotation 0).
    const fn reference(self) -> &'static [Coord] {
        match self {
            // square
            ShapeKind::O => &[(0, 0), (1, 0), (0, 1), (1, 1)],
            // horizontal bar
            ShapeKind::I => &[(0, 0), (1, 0), (2, 0), (3, 0)],
            // upright bar, foot to the right
            ShapeKind::L => &[(0, 0), (0, 1), (0, 2), (1, 2)],
            // upright bar, foot to the left
            ShapeKind::J => &[(1, 0), (1, 1), (1, 2), (0, 2)],
            ShapeKind::S => &[(1, 0), (2, 0), (0, 1), (1, 1)],
            ShapeKind::Z => &[(0, 0), (1, 0), (1, 1), (2, 1)],
            // bar with the stem pointing down
            ShapeKind::T => &[(0, 0), (1, 0), (2, 0), (1, 1)],
        }
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// One oriented tetromino: a kind plus its canonical rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Shape {
    kind: ShapeKind,
    rotation: u8,
}

impl Shape {
    /// Creates a shape, collapsing rotations that symmetry makes equal.
    pub const fn new(kind: ShapeKind, rotation: u8) -> Self {
        Self {
            kind,
            rotation: (rotation % NUM_ROTATIONS as u8) % kind.rotations(),
        }
    }

    pub const fn kind(self) -> ShapeKind {
        self.kind
    }

    pub const fn rotation(self) -> u8 {
        self.rotation
    }

    /// Every distinct oriented shape (19 in total).
    pub fn all() -> impl Iterator<Item = Shape> {
        ShapeKind::ALL.into_iter().flat_map(ShapeKind::shapes)
    }

    /// Normalized cells, sorted in row-major order.
    pub fn cells(self) -> ShapeCells {
        CATALOG.orientations[self.kind.index()][self.rotation as usize]
    }

    /// Width and height of the bounding box.
    pub fn extent(self) -> (usize, usize) {
        let cells = self.cells();
        let width = cells.iter().map(|&(x, _)| x).max().unwrap_or(0) + 1;
        let height = cells.iter().map(|&(_, y)| y).max().unwrap_or(0) + 1;
        (width as usize, height as usize)
    }

    /// The horizontally flipped shape.
    ///
    /// Flipping after `r` quarter turns equals `r` turns the other way
    /// after flipping, and every reference shape flips onto its mirror
    /// kind's reference.
    pub const fn mirror(self) -> Self {
        let turns = NUM_ROTATIONS as u8;
        Self::new(self.kind.mirror(), (turns - self.rotation) % turns)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.kind.letter(), self.rotation)
    }
}

/// Static shape tables, built once on first use.
struct Catalog {
    orientations: [[ShapeCells; NUM_ROTATIONS]; ShapeKind::ALL.len()],
    lookup: FxHashMap<ShapeCells, Shape>,
}

impl Catalog {
    fn build() -> Self {
        let mut orientations = [[[(0, 0); CELLS_PER_SHAPE]; NUM_ROTATIONS]; ShapeKind::ALL.len()];
        let mut lookup = FxHashMap::default();

        for kind in ShapeKind::ALL {
            for (rotation, cells) in all_orientations(kind.reference()).into_iter().enumerate() {
                let mut fixed = [(0, 0); CELLS_PER_SHAPE];
                fixed.copy_from_slice(&cells);
                orientations[kind.index()][rotation] = fixed;

                // first registration wins, so symmetric duplicates map to
                // the lowest rotation
                lookup.entry(fixed).or_insert(Shape {
                    kind,
                    rotation: rotation as u8,
                });
            }
        }

        Self {
            orientations,
            lookup,
        }
    }
}

static CATALOG: LazyLock<Catalog> = LazyLock::new(Catalog::build);

/// Translates cells so the minimum x and y are zero, in row-major order.
pub fn canonicalize(cells: &[Coord]) -> Vec<Coord> {
    normalize_to_origin(cells.to_vec())
}

/// Classifies an arbitrary group of cells.
///
/// Returns `None` unless the cells form one of the 19 oriented tetrominoes.
pub fn lookup(cells: &[Coord]) -> Option<Shape> {
    if cells.len() != CELLS_PER_SHAPE {
        return None;
    }
    let normalized = canonicalize(cells);
    let mut key = [(0, 0); CELLS_PER_SHAPE];
    key.copy_from_slice(&normalized);
    CATALOG.lookup.get(&key).copied()
}

/// The mirror pairing used for double-sided packing.
pub const fn mirror(kind: ShapeKind) -> ShapeKind {
    kind.mirror()
}

/// A shape-count token: a bare kind (any rotation) or a pinned rotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeKey {
    kind: ShapeKind,
    rotation: Option<u8>,
}

impl ShapeKey {
    /// Accepts any rotation of `kind`.
    pub const fn any(kind: ShapeKind) -> Self {
        Self {
            kind,
            rotation: None,
        }
    }

    /// Accepts exactly `shape`.
    pub const fn pinned(shape: Shape) -> Self {
        Self {
            kind: shape.kind,
            rotation: Some(shape.rotation),
        }
    }

    pub const fn kind(self) -> ShapeKind {
        self.kind
    }

    pub const fn rotation(self) -> Option<u8> {
        self.rotation
    }

    pub fn accepts(self, shape: Shape) -> bool {
        shape.kind == self.kind && self.rotation.map_or(true, |r| r == shape.rotation)
    }

    /// The oriented shapes this key allows.
    pub fn shapes(self) -> Vec<Shape> {
        match self.rotation {
            Some(rotation) => vec![Shape::new(self.kind, rotation)],
            None => self.kind.shapes().collect(),
        }
    }

    /// The key a mirrored placement consumes on the other face.
    pub const fn mirror(self) -> Self {
        match self.rotation {
            Some(rotation) => Self::pinned(Shape::new(self.kind, rotation).mirror()),
            None => Self::any(self.kind.mirror()),
        }
    }
}

impl fmt::Display for ShapeKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.rotation {
            Some(rotation) => write!(f, "{}{}", self.kind.letter(), rotation),
            None => write!(f, "{}", self.kind.letter()),
        }
    }
}

impl FromStr for ShapeKey {
    type Err = PackError;

    fn from_str(token: &str) -> Result<Self, PackError> {
        let bad = || PackError::InvalidShapeToken(token.to_owned());
        let mut chars = token.trim().chars();
        let kind = chars.next().and_then(ShapeKind::from_letter).ok_or_else(bad)?;
        match (chars.next(), chars.next()) {
            (None, _) => Ok(Self::any(kind)),
            (Some(digit @ '0'..='3'), None) => {
                let rotation = digit as u8 - b'0';
                Ok(Self::pinned(Shape::new(kind, rotation)))
            }
            _ => Err(bad()),
        }
    }
}

/// Required number of instances per shape token.
///
/// Consumed by the search as placements are committed; what is left is
/// the catalog of shapes still needed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShapeCounts(BTreeMap<ShapeKey, usize>);

impl ShapeCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the count for `key`, replacing any previous value.
    pub fn insert(&mut self, key: ShapeKey, count: usize) {
        self.0.insert(key, count);
    }

    pub fn get(&self, key: ShapeKey) -> usize {
        self.0.get(&key).copied().unwrap_or(0)
    }

    /// Total number of instances still required.
    pub fn total(&self) -> usize {
        self.0.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ShapeKey, usize)> + '_ {
        self.0.iter().map(|(&key, &count)| (key, count))
    }

    /// Keys with a remaining count, most demanded first. Ties keep key
    /// order.
    pub fn by_demand(&self) -> Vec<(ShapeKey, usize)> {
        let mut keys: Vec<_> = self.iter().filter(|&(_, count)| count > 0).collect();
        keys.sort_by(|a, b| b.1.cmp(&a.1));
        keys
    }

    /// The key that a placement of `shape` would consume. Pinned keys are
    /// preferred over bare ones.
    pub fn key_for(&self, shape: Shape) -> Option<ShapeKey> {
        let pinned = ShapeKey::pinned(shape);
        let bare = ShapeKey::any(shape.kind());
        [pinned, bare]
            .into_iter()
            .find(|&key| self.get(key) > 0)
    }

    /// Remaining demand for `shape` across the keys that accept it.
    pub fn demand(&self, shape: Shape) -> usize {
        self.get(ShapeKey::pinned(shape)) + self.get(ShapeKey::any(shape.kind()))
    }

    /// Consumes one instance of `shape`, returning the key it came from.
    pub fn take(&mut self, shape: Shape) -> Option<ShapeKey> {
        let key = self.key_for(shape)?;
        if let Some(count) = self.0.get_mut(&key) {
            *count -= 1;
        }
        Some(key)
    }

    /// Undoes a `take` that returned `key`.
    pub fn restore(&mut self, key: ShapeKey) {
        *self.0.entry(key).or_insert(0) += 1;
    }

    /// Returns a removed instance of `shape` to the pool. It goes back to
    /// its pinned key when one is tracked, otherwise to the bare key.
    pub fn give_back(&mut self, shape: Shape) {
        let pinned = ShapeKey::pinned(shape);
        let key = if self.0.contains_key(&pinned) {
            pinned
        } else {
            ShapeKey::any(shape.kind())
        };
        self.restore(key);
    }

    /// Oriented shapes that can still be placed.
    pub fn available_shapes(&self) -> Vec<Shape> {
        Shape::all().filter(|&s| self.key_for(s).is_some()).collect()
    }

    /// Total count per kind, ignoring pinned rotations.
    pub fn per_kind(&self) -> BTreeMap<ShapeKind, usize> {
        let mut kinds = BTreeMap::new();
        for (key, count) in self.iter() {
            *kinds.entry(key.kind()).or_insert(0) += count;
        }
        kinds
    }
}

impl FromIterator<(ShapeKey, usize)> for ShapeCounts {
    fn from_iter<It: IntoIterator<Item = (ShapeKey, usize)>>(iter: It) -> Self {
        let mut counts = Self::new();
        for (key, count) in iter {
            *counts.0.entry(key).or_insert(0) += count;
        }
        counts
    }
}

impl fmt::Display for ShapeCounts {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, (key, count)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}:{}", key, count)?;
        }
        Ok(())
    }
}

/// Parses `"L:1, O:1, T2:3"`. Repeated tokens add up.
impl FromStr for ShapeCounts {
    type Err = PackError;

    fn from_str(text: &str) -> Result<Self, PackError> {
        text.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| {
                let (token, count) = entry
                    .split_once(':')
                    .ok_or_else(|| PackError::InvalidCount(entry.to_owned()))?;
                let count = count
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| PackError::InvalidCount(entry.to_owned()))?;
                Ok((token.parse::<ShapeKey>()?, count))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::mirror_x;

    #[test]
    fn test_every_rotation_is_recognized() {
        for kind in ShapeKind::ALL {
            for rotation in 0..4 {
                let shape = Shape::new(kind, rotation);
                assert_eq!(lookup(&shape.cells()), Some(shape), "{kind} rotation {rotation}");
            }
        }
    }

    #[test]
    fn test_distinct_rotation_counts() {
        assert_eq!(Shape::all().count(), 19);
        for kind in ShapeKind::ALL {
            let mut seen: Vec<ShapeCells> = kind.shapes().map(Shape::cells).collect();
            seen.sort();
            seen.dedup();
            assert_eq!(seen.len(), kind.rotations() as usize, "{kind}");
        }
    }

    #[test]
    fn test_symmetric_rotation_collapses_to_first() {
        assert_eq!(Shape::new(ShapeKind::O, 3), Shape::new(ShapeKind::O, 0));
        assert_eq!(Shape::new(ShapeKind::I, 3).rotation(), 1);
        assert_eq!(Shape::new(ShapeKind::S, 2).rotation(), 0);
        assert_eq!(Shape::new(ShapeKind::T, 3).rotation(), 3);
    }

    #[test]
    fn test_lookup_ignores_translation_and_order() {
        let cells = [(7, 4), (5, 3), (6, 3), (6, 4)];
        assert_eq!(lookup(&cells), Some(Shape::new(ShapeKind::Z, 0)));
    }

    #[test]
    fn test_lookup_rejects_non_tetrominoes() {
        assert_eq!(lookup(&[(0, 0), (1, 0), (2, 0)]), None);
        assert_eq!(lookup(&[(0, 0), (2, 0), (4, 0), (6, 0)]), None);
    }

    #[test]
    fn test_mirror_matches_geometry() {
        for shape in Shape::all() {
            let flipped: Vec<Coord> = shape.cells().into_iter().map(mirror_x).collect();
            assert_eq!(lookup(&flipped), Some(shape.mirror()), "{shape}");
        }
    }

    #[test]
    fn test_mirror_is_self_inverse() {
        for kind in ShapeKind::ALL {
            assert_eq!(mirror(mirror(kind)), kind);
        }
        for shape in Shape::all() {
            assert_eq!(shape.mirror().mirror(), shape);
        }
        assert_eq!(mirror(ShapeKind::L), ShapeKind::J);
        assert_eq!(mirror(ShapeKind::S), ShapeKind::Z);
        assert_eq!(mirror(ShapeKind::T), ShapeKind::T);
    }

    #[test]
    fn test_shape_key_tokens() {
        let bare: ShapeKey = "L".parse().unwrap();
        assert_eq!(bare, ShapeKey::any(ShapeKind::L));
        assert!(bare.accepts(Shape::new(ShapeKind::L, 3)));

        let pinned: ShapeKey = "I3".parse().unwrap();
        assert_eq!(pinned.to_string(), "I1");
        assert!(!pinned.accepts(Shape::new(ShapeKind::I, 0)));

        assert!("X".parse::<ShapeKey>().is_err());
        assert!("L4".parse::<ShapeKey>().is_err());
        assert!("L12".parse::<ShapeKey>().is_err());
    }

    #[test]
    fn test_shape_counts_parse_and_display() {
        let counts: ShapeCounts = "L:1, O:1, T2:3".parse().unwrap();
        assert_eq!(counts.total(), 5);
        assert_eq!(counts.to_string(), "O:1, L:1, T2:3");
        assert!("L1".parse::<ShapeCounts>().is_err());
        assert!("L:x".parse::<ShapeCounts>().is_err());
    }

    #[test]
    fn test_take_prefers_pinned_key() {
        let mut counts: ShapeCounts = "L:1, L2:1".parse().unwrap();
        let l2 = Shape::new(ShapeKind::L, 2);
        assert_eq!(counts.take(l2), Some(ShapeKey::pinned(l2)));
        assert_eq!(counts.take(l2), Some(ShapeKey::any(ShapeKind::L)));
        assert_eq!(counts.take(l2), None);
        assert_eq!(counts.total(), 0);

        counts.give_back(l2);
        assert_eq!(counts.get(ShapeKey::pinned(l2)), 1);
    }

    #[test]
    fn test_by_demand_orders_descending() {
        let counts: ShapeCounts = "T:1, I:3, O:1, S:0".parse().unwrap();
        let order: Vec<String> = counts
            .by_demand()
            .into_iter()
            .map(|(key, _)| key.to_string())
            .collect();
        assert_eq!(order, vec!["I", "O", "T"]);
    }
}
