//! Tetromino Packer
//!
//! Packs tetrominoes into grids read from text files: `.` is an empty
//! cell, `#` a blocked one, and letters are shapes already in place. Two
//! files make a two-sided sheet whose faces are packed with mirrored
//! shapes.

use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use tetropack::packer::{Coverage, SlotMaps};
use tetropack::worker::{self, Job, JobEvent, Mode};
use tetropack::{Grid, Packer, PackerOptions, ShapeCounts, ShapeKind};

/// Packs tetromino jigsaw puzzles.
#[derive(Parser)]
#[command(name = "tetropack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fill a grid (or a front/back pair) with tetrominoes.
    Fill {
        /// Front grid file.
        front: PathBuf,
        /// Back grid file for a two-sided sheet.
        #[arg(long)]
        back: Option<PathBuf>,
        /// Required shapes, e.g. "L:1, O:1, T2:3".
        #[arg(long)]
        counts: Option<ShapeCounts>,
        /// Dead ends allowed per backtracking round.
        #[arg(long, default_value_t = tetropack::packer::DEFAULT_TRIES)]
        tries: usize,
        /// Backtracking rounds.
        #[arg(long, default_value_t = 3)]
        rounds: usize,
        /// Row boundary no shape may straddle.
        #[arg(long)]
        split_row: Option<usize>,
        /// Reject gap regions smaller than four cells.
        #[arg(long)]
        force_fours: bool,
        /// Seed for shuffled search and evolution.
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long, default_value_t = Mode::Auto)]
        mode: Mode,
        /// Evolution epoch budget.
        #[arg(long, default_value_t = 1_000)]
        epochs: usize,
        /// Write the result to this file.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Print how many slots cover each empty cell.
    Slots { grid: PathBuf },
    /// Print how many of each shape could still fit.
    MaxCounts { grid: PathBuf },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Command::Fill {
            front,
            back,
            counts,
            tries,
            rounds,
            split_row,
            force_fours,
            seed,
            mode,
            epochs,
            report,
        } => {
            let options = PackerOptions {
                tries,
                split_row,
                force_fours,
                shuffle_seed: seed,
            };
            read_job(&front, back.as_deref(), counts).and_then(|mut job| {
                job.mode = mode;
                job.options = options;
                job.rounds = rounds;
                job.evolution.max_epochs = epochs;
                job.evolution.seed = seed.unwrap_or(0);
                job.report = report;
                run_fill(job)
            })
        }
        Command::Slots { grid } => run_slots(&grid),
        Command::MaxCounts { grid } => run_max_counts(&grid),
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn read_job(front: &Path, back: Option<&Path>, counts: Option<ShapeCounts>) -> Result<Job, Box<dyn Error>> {
    let front = fs::read_to_string(front)?;
    let back = back.map(fs::read_to_string).transpose()?;
    Ok(Job::new(front, back, counts))
}

/// Runs a fill job in the background and prints its progress and result.
fn run_fill(job: Job) -> Result<bool, Box<dyn Error>> {
    let handle = worker::spawn(job);

    let mut outcome = None;
    for event in handle.events().iter() {
        match event {
            JobEvent::Progress(progress) => match progress.score {
                Some(score) => eprintln!("{} {}: {}", progress.mode, progress.step, score),
                None => eprintln!("{} {}: {} attempts", progress.mode, progress.step, progress.attempts),
            },
            terminal => {
                outcome = Some(terminal);
                break;
            }
        }
    }

    match outcome.or_else(|| handle.wait()) {
        Some(JobEvent::Finished(result)) => {
            println!("{}", result.summary);
            print!("{}", result.front);
            if let Some(back) = &result.back {
                println!();
                print!("{}", back);
            }
            Ok(result.filled)
        }
        Some(JobEvent::Failed(err)) => Err(err.into()),
        _ => Err("packing worker stopped without a result".into()),
    }
}

fn run_slots(path: &Path) -> Result<bool, Box<dyn Error>> {
    let packer = Packer::from_grid(Grid::parse(&fs::read_to_string(path)?)?);
    let slots = packer.find_slots()?;
    let coverage = packer.slot_coverage(&slots)?;
    print!("{}", format_coverage(packer.state()?, &coverage));
    print!("{}", format_slot_counts(&slots));
    Ok(!coverage.has_gap())
}

fn run_max_counts(path: &Path) -> Result<bool, Box<dyn Error>> {
    let packer = Packer::from_grid(Grid::parse(&fs::read_to_string(path)?)?);
    print!("{}", format_max_counts(&packer.calculate_max_shape_counts()?));
    Ok(true)
}

/// Coverage map: a digit per empty cell (`+` above nine), `#` for blocked
/// cells and `=` for cells already holding a shape.
fn format_coverage(grid: &Grid, coverage: &Coverage) -> String {
    let mut output = String::new();
    for row in 0..grid.height() {
        for col in 0..grid.width() {
            let ch = match (grid.get(row, col), coverage.get(row, col)) {
                (tetropack::grid::BLOCKED, _) => '#',
                (_, Coverage::FILLED) => '=',
                (_, count) => char::from_digit(count, 10).unwrap_or('+'),
            };
            output.push(ch);
        }
        output.push('\n');
    }
    output
}

fn format_slot_counts(slots: &SlotMaps) -> String {
    slots
        .iter()
        .filter(|(_, map)| map.count() > 0)
        .map(|(shape, map)| format!("{}: {}\n", shape, map.count()))
        .collect()
}

fn format_max_counts(counts: &BTreeMap<ShapeKind, usize>) -> String {
    counts
        .iter()
        .map(|(kind, count)| format!("{}: {}\n", kind, count))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coverage_map_snapshot() {
        let packer = Packer::parse("AA..\nAA.#\n....").unwrap();
        let slots = packer.find_slots().unwrap();
        let coverage = packer.slot_coverage(&slots).unwrap();

        let mut output = format_coverage(packer.state().unwrap(), &coverage);
        output.push_str(&format_slot_counts(&slots));
        insta::assert_snapshot!(output.trim_end(), @r"
        ==31
        ==5#
        2463
        I0: 1
        L0: 1
        L1: 1
        J0: 1
        J2: 1
        T2: 1
        ");
    }

    #[test]
    fn test_max_counts_listing() {
        let packer = Packer::new(4, 2);
        let listing = format_max_counts(&packer.calculate_max_shape_counts().unwrap());
        assert_eq!(listing, "O: 2\nI: 2\nL: 2\nJ: 2\nS: 1\nZ: 1\nT: 2\n");
    }

    #[test]
    fn test_cli_parses_fill() {
        let cli = Cli::try_parse_from([
            "tetropack",
            "fill",
            "front.txt",
            "--counts",
            "L:1, O:1",
            "--mode",
            "backtrack",
            "--split-row",
            "2",
        ])
        .unwrap();
        match cli.command {
            Command::Fill {
                counts,
                mode,
                split_row,
                tries,
                ..
            } => {
                assert_eq!(counts.map(|c| c.total()), Some(2));
                assert_eq!(mode, Mode::Backtrack);
                assert_eq!(split_row, Some(2));
                assert_eq!(tries, tetropack::packer::DEFAULT_TRIES);
            }
            _ => panic!("expected the fill command"),
        }
    }
}
