//! Tetromino Packing Library
//!
//! Packs the seven tetrominoes into rectangular grids with blocked cells,
//! on one face or on both faces of a two-sided sheet, by backtracking with
//! an evolutionary fallback.

pub mod dual;
pub mod error;
pub mod evolution;
pub mod fitness;
pub mod geometry;
pub mod grid;
pub mod individual;
pub mod packer;
pub mod report;
pub mod shapes;
pub mod worker;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub use dual::{DualPacker, Face};
pub use error::PackError;
pub use grid::Grid;
pub use packer::{Packer, PackerOptions};
pub use shapes::{Shape, ShapeCounts, ShapeKey, ShapeKind};

/// Erases the difference between single and two-sided packing for
/// dynamic dispatch.
///
/// Single grids need shape counts; two-sided sheets can also be covered
/// with any shapes.
pub trait Packing {
    /// Runs the backtracking search. `Ok(false)` means the attempt budget
    /// ran out (or the cancel flag was raised) and the state is gone.
    fn pack(&mut self, counts: Option<&ShapeCounts>) -> Result<bool, PackError>;

    /// The text encoding of the whole state.
    fn display(&self) -> Result<String, PackError>;

    /// Front encoding, plus the back encoding for two-sided sheets.
    fn faces(&self) -> Result<(String, Option<String>), PackError>;

    fn tries(&self) -> usize;

    fn set_tries(&mut self, tries: usize);

    /// Seeds (or disables) shuffled candidate order.
    fn set_shuffle(&mut self, seed: Option<u64>);

    fn set_cancel(&mut self, cancel: Arc<AtomicBool>);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packers() -> Vec<Box<dyn Packing>> {
        let single: Box<dyn Packing> = Box::new(Packer::parse("....\n....").unwrap());
        let dual: Box<dyn Packing> = Box::new(DualPacker::parse("....\n....\n....\n....").unwrap());
        vec![single, dual]
    }

    #[test]
    fn test_packing_through_trait_objects() {
        let counts: ShapeCounts = "I:2".parse().unwrap();
        for mut packer in packers() {
            assert!(packer.pack(Some(&counts)).unwrap());
            let (front, back) = packer.faces().unwrap();
            assert_eq!(front, "AAAA\nBBBB\n");
            if let Some(back) = back {
                assert!(!back.contains('.'));
            }
        }
    }

    #[test]
    fn test_single_grid_needs_counts() {
        let mut packer: Box<dyn Packing> = Box::new(Packer::new(4, 1));
        assert_eq!(packer.pack(None), Err(PackError::MissingCounts));
    }

    #[test]
    fn test_cancel_flag_stops_search() {
        for mut packer in packers() {
            packer.set_cancel(Arc::new(AtomicBool::new(true)));
            let tries = packer.tries();
            assert!(!packer.pack(Some(&"I:2".parse().unwrap())).unwrap());
            assert_eq!(packer.tries(), tries);
        }
    }
}
