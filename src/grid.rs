//! Grid representation and the text encoding.
//!
//! The grid is a flat row-major buffer with one byte per cell: `0` for an
//! empty cell, `1` for a permanently blocked cell, and `2..=255` for the
//! instance id of a placed shape.

use std::collections::BTreeMap;
use std::str::FromStr;

use rustc_hash::FxHashMap;

use crate::error::PackError;
use crate::geometry::Coord;
use crate::shapes::{lookup, Shape, CELLS_PER_SHAPE};

/// An empty, available cell.
pub const EMPTY: u8 = 0;

/// A cell that can never hold a shape.
pub const BLOCKED: u8 = 1;

/// The id given to the first placed instance.
pub const FIRST_ID: u8 = 2;

/// Most instances a single grid can hold (ids `2..=255`).
pub const MAX_BLOCKS: usize = (u8::MAX - FIRST_ID + 1) as usize;

/// Highest id the text encoding can represent.
pub const MAX_DISPLAY_ID: u8 = 62;

/// Character used for `FIRST_ID`; later ids follow by codepoint.
const FIRST_ID_CHAR: u8 = b'A';

/// Input-only marker for a cell whose content is not decided yet.
const UNKNOWN_CHAR: char = '?';

/// A fixed-size puzzle grid.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Grid {
    width: usize,
    height: usize,
    cells: Vec<u8>,
}

/// One placed instance reconstructed from the grid buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub id: u8,
    /// `(row, col)` cells in row-major order.
    pub cells: Vec<(usize, usize)>,
    /// `None` when the cells do not form a tetromino.
    pub shape: Option<Shape>,
}

impl Block {
    fn new(id: u8, cells: Vec<(usize, usize)>) -> Self {
        let coords: Vec<Coord> = cells
            .iter()
            .map(|&(row, col)| (col as i32, row as i32))
            .collect();
        Self {
            id,
            shape: lookup(&coords),
            cells,
        }
    }

    /// The first cell in row-major order.
    pub fn top_left(&self) -> (usize, usize) {
        self.cells.first().copied().unwrap_or((0, 0))
    }
}

impl Grid {
    /// Creates a blank grid with every cell empty.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: vec![EMPTY; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// The raw row-major buffer.
    pub fn cells(&self) -> &[u8] {
        &self.cells
    }

    /// Converts `(row, col)` to a buffer index.
    #[inline(always)]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.width + col
    }

    /// Converts a buffer index to `(row, col)`.
    #[inline(always)]
    pub fn position(&self, cell_index: usize) -> (usize, usize) {
        (cell_index / self.width, cell_index % self.width)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.cells[self.index(row, col)]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: u8) {
        let idx = self.index(row, col);
        self.cells[idx] = value;
    }

    #[inline]
    pub(crate) fn get_idx(&self, cell_index: usize) -> u8 {
        self.cells[cell_index]
    }

    #[inline]
    pub(crate) fn set_idx(&mut self, cell_index: usize, value: u8) {
        self.cells[cell_index] = value;
    }

    pub fn empty_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c == EMPTY).count()
    }

    /// Cells that are not permanently blocked.
    pub fn usable_count(&self) -> usize {
        self.cells.iter().filter(|&&c| c != BLOCKED).count()
    }

    /// First empty cell in row-major order.
    pub fn first_empty(&self) -> Option<usize> {
        self.cells.iter().position(|&c| c == EMPTY)
    }

    /// Highest instance id present, or `BLOCKED` when there is none.
    pub fn max_id(&self) -> u8 {
        self.cells
            .iter()
            .copied()
            .filter(|&c| c >= FIRST_ID)
            .max()
            .unwrap_or(BLOCKED)
    }

    /// Which cell values occur in the buffer, indexed by value.
    pub fn ids_present(&self) -> [bool; 256] {
        let mut seen = [false; 256];
        for &c in &self.cells {
            seen[c as usize] = true;
        }
        seen
    }

    /// Number of distinct instances.
    pub fn block_count(&self) -> usize {
        self.ids_present()[FIRST_ID as usize..]
            .iter()
            .filter(|&&s| s)
            .count()
    }

    /// Instance ids not in use, lowest first.
    pub fn unused_ids(&self) -> Vec<u8> {
        let seen = self.ids_present();
        (FIRST_ID..=u8::MAX).filter(|&id| !seen[id as usize]).collect()
    }

    /// Buffer indices of `shape` anchored with its bounding box at
    /// `(row, col)`, or `None` if any cell falls outside the grid.
    pub fn placement(&self, shape: Shape, row: i32, col: i32) -> Option<[usize; CELLS_PER_SHAPE]> {
        let mut indices = [0; CELLS_PER_SHAPE];
        for (slot, (x, y)) in indices.iter_mut().zip(shape.cells()) {
            let (r, c) = (row + y, col + x);
            if r < 0 || c < 0 || r as usize >= self.height || c as usize >= self.width {
                return None;
            }
            *slot = self.index(r as usize, c as usize);
        }
        Some(indices)
    }

    /// True if every listed cell is empty.
    #[inline]
    pub fn is_free(&self, indices: &[usize]) -> bool {
        indices.iter().all(|&i| self.cells[i] == EMPTY)
    }

    /// Cells of instance `id`, in row-major order.
    pub fn block_cells(&self, id: u8) -> Vec<(usize, usize)> {
        self.cells
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c == id)
            .map(|(i, _)| self.position(i))
            .collect()
    }

    /// Reconstructs one instance, or `None` if `id` is not on the grid.
    pub fn block(&self, id: u8) -> Option<Block> {
        if id < FIRST_ID {
            return None;
        }
        let cells = self.block_cells(id);
        if cells.is_empty() {
            None
        } else {
            Some(Block::new(id, cells))
        }
    }

    /// Reconstructs every instance, ordered by id.
    pub fn blocks(&self) -> Vec<Block> {
        let mut groups: BTreeMap<u8, Vec<(usize, usize)>> = BTreeMap::new();
        for (i, &c) in self.cells.iter().enumerate() {
            if c >= FIRST_ID {
                groups.entry(c).or_default().push(self.position(i));
            }
        }
        groups
            .into_iter()
            .map(|(id, cells)| Block::new(id, cells))
            .collect()
    }

    /// Rewrites instance ids through `mapping`; unmapped ids are kept.
    pub fn relabel(&mut self, mapping: &FxHashMap<u8, u8>) {
        for cell in &mut self.cells {
            if let Some(&new_id) = mapping.get(cell) {
                *cell = new_id;
            }
        }
    }

    /// Rows from the top down to the lowest row holding an instance.
    pub fn used_rows(&self) -> usize {
        self.cells
            .iter()
            .rposition(|&c| c >= FIRST_ID)
            .map_or(0, |i| i / self.width + 1)
    }

    /// Mirrors the grid left to right.
    pub fn flipped(&self) -> Grid {
        let mut flipped = self.clone();
        for row in flipped.cells.chunks_mut(self.width.max(1)) {
            row.reverse();
        }
        flipped
    }

    /// Stacks `below` under this grid.
    pub fn stacked(&self, below: &Grid) -> Result<Grid, PackError> {
        if self.width != below.width {
            return Err(PackError::DimensionMismatch {
                front: (self.width, self.height),
                back: (below.width, below.height),
            });
        }
        let mut cells = self.cells.clone();
        cells.extend_from_slice(&below.cells);
        Ok(Grid {
            width: self.width,
            height: self.height + below.height,
            cells,
        })
    }

    /// Splits the grid into the first `rows` rows and the rest.
    pub fn split_at_row(&self, rows: usize) -> (Grid, Grid) {
        let at = (rows * self.width).min(self.cells.len());
        let top = Grid {
            width: self.width,
            height: at / self.width.max(1),
            cells: self.cells[..at].to_vec(),
        };
        let bottom = Grid {
            width: self.width,
            height: self.height - top.height,
            cells: self.cells[at..].to_vec(),
        };
        (top, bottom)
    }

    /// Encodes the grid as text, one line per row.
    ///
    /// `.` is empty, `#` is blocked, and instance ids map onto `A`, `B`,
    /// ... by codepoint. Fails if an id is above `MAX_DISPLAY_ID`.
    pub fn display(&self) -> Result<String, PackError> {
        let mut output = String::with_capacity((self.width + 1) * self.height);
        for row in self.cells.chunks(self.width.max(1)) {
            for &value in row {
                output.push(cell_char(value)?);
            }
            output.push('\n');
        }
        Ok(output)
    }

    /// Decodes the text encoding. `?` is accepted as an undecided cell and
    /// is read as empty. Blank lines are ignored.
    pub fn parse(text: &str) -> Result<Grid, PackError> {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim_end)
            .filter(|line| !line.is_empty())
            .collect();

        let width = lines.first().map_or(0, |line| line.chars().count());
        if width == 0 {
            return Err(PackError::EmptyGrid);
        }

        let mut cells = Vec::with_capacity(width * lines.len());
        for (row, line) in lines.iter().enumerate() {
            let found = line.chars().count();
            if found != width {
                return Err(PackError::RaggedRows {
                    row,
                    expected: width,
                    found,
                });
            }
            for (col, ch) in line.chars().enumerate() {
                cells.push(char_value(ch).ok_or(PackError::InvalidCell { row, col, ch })?);
            }
        }

        Ok(Grid {
            width,
            height: lines.len(),
            cells,
        })
    }
}

impl FromStr for Grid {
    type Err = PackError;

    fn from_str(text: &str) -> Result<Self, PackError> {
        Grid::parse(text)
    }
}

fn cell_char(value: u8) -> Result<char, PackError> {
    match value {
        EMPTY => Ok('.'),
        BLOCKED => Ok('#'),
        id if id <= MAX_DISPLAY_ID => Ok(char::from(FIRST_ID_CHAR + (id - FIRST_ID))),
        id => Err(PackError::DisplayOverflow { id }),
    }
}

fn char_value(ch: char) -> Option<u8> {
    let last = FIRST_ID_CHAR + (MAX_DISPLAY_ID - FIRST_ID);
    match ch {
        '.' | UNKNOWN_CHAR => Some(EMPTY),
        '#' => Some(BLOCKED),
        c if c.is_ascii() && (FIRST_ID_CHAR..=last).contains(&(c as u8)) => {
            Some(c as u8 - FIRST_ID_CHAR + FIRST_ID)
        }
        _ => None,
    }
}
