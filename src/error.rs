//! Error taxonomy for packing.
//!
//! Search exhaustion and cancellation are not errors: they come back as
//! `Ok(false)` from the fill operations.

use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PackError {
    #[error("Maximum 254 blocks in packer ({requested} requested)")]
    TooManyBlocks { requested: usize },

    #[error("Front and back have different space counts ({front} vs {back})")]
    DifferentSpaceCounts { front: usize, back: usize },

    #[error("Front is {front:?} but back is {back:?} (width, height)")]
    DimensionMismatch {
        front: (usize, usize),
        back: (usize, usize),
    },

    #[error("Too many blocks to display: id {id} exceeds 62")]
    DisplayOverflow { id: u8 },

    #[error("Packer state is unsolved")]
    Unsolved,

    #[error("No block at row {row}, column {col}")]
    NoBlockAt { row: usize, col: usize },

    #[error("Block {id} is not a tetromino")]
    UnknownShape { id: u8 },

    #[error("Shape counts are required for this packing mode")]
    MissingCounts,

    #[error("Invalid cell {ch:?} at row {row}, column {col}")]
    InvalidCell { row: usize, col: usize, ch: char },

    #[error("Row {row} has {found} cells, expected {expected}")]
    RaggedRows {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("Grid has no cells")]
    EmptyGrid,

    #[error("Invalid shape token {0:?}")]
    InvalidShapeToken(String),

    #[error("Invalid shape count {0:?}")]
    InvalidCount(String),
}
