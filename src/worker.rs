//! Background packing jobs.
//!
//! A job owns its own copy of the puzzle text and runs on a dedicated
//! thread. The caller receives progress and a terminal event over a
//! channel and may raise the cancel flag at any time; a cancelled job
//! stops at the next attempt or epoch boundary and sends nothing more.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{unbounded, Receiver, Sender};
use rand::SeedableRng;
use rand_pcg::Pcg32;

use crate::dual::DualPacker;
use crate::error::PackError;
use crate::evolution::{Evolution, EvolutionConfig, Individual};
use crate::fitness::{FitnessCalculator, FitnessScore, TargetConfig};
use crate::grid::Grid;
use crate::individual::{DualIndividual, PackingIndividual};
use crate::packer::{Packer, PackerOptions};
use crate::report;
use crate::shapes::ShapeCounts;
use crate::Packing;

/// How a job searches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Rounds of bounded backtracking, reshuffled each round.
    Backtrack,
    /// Evolutionary search seeded from a greedy fill.
    Evolve,
    /// Backtracking first, evolution if that runs dry.
    Auto,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Mode::Backtrack => "backtrack",
            Mode::Evolve => "evolve",
            Mode::Auto => "auto",
        };
        f.write_str(name)
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, String> {
        match name {
            "backtrack" => Ok(Mode::Backtrack),
            "evolve" => Ok(Mode::Evolve),
            "auto" => Ok(Mode::Auto),
            other => Err(format!("unknown mode {other:?} (expected backtrack, evolve or auto)")),
        }
    }
}

/// Everything a job needs. Cloned into the worker thread.
#[derive(Clone, Debug)]
pub struct Job {
    /// Front grid in the text encoding.
    pub front: String,
    /// Back grid for a two-sided sheet.
    pub back: Option<String>,
    pub counts: Option<ShapeCounts>,
    pub mode: Mode,
    pub options: PackerOptions,
    /// Backtracking rounds before giving up (or falling back).
    pub rounds: usize,
    pub evolution: EvolutionConfig,
    pub targets: TargetConfig,
    /// Where to write the finished result.
    pub report: Option<PathBuf>,
}

impl Job {
    pub fn new(front: impl Into<String>, back: Option<String>, counts: Option<ShapeCounts>) -> Self {
        Self {
            front: front.into(),
            back,
            counts,
            mode: Mode::Auto,
            options: PackerOptions::default(),
            rounds: 3,
            evolution: EvolutionConfig::default(),
            targets: TargetConfig::default(),
            report: None,
        }
    }

    /// A fresh packer for the job's puzzle.
    fn packer(&self) -> Result<Box<dyn Packing>, PackError> {
        let front = Grid::parse(&self.front)?;
        let packer: Box<dyn Packing> = match &self.back {
            Some(back) => Box::new(DualPacker::with_options(front, Grid::parse(back)?, &self.options)?),
            None => Box::new(Packer::with_options(front, &self.options)),
        };
        Ok(packer)
    }
}

/// Periodic status of a running job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Progress {
    pub mode: Mode,
    /// Backtracking round or evolution epoch.
    pub step: usize,
    /// Backtracking attempts spent so far.
    pub attempts: usize,
    pub score: Option<FitnessScore>,
    pub front: String,
    pub back: Option<String>,
}

/// Outcome of a job that ran to completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobResult {
    pub filled: bool,
    pub summary: String,
    pub front: String,
    pub back: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobEvent {
    Progress(Progress),
    Finished(JobResult),
    Failed(PackError),
}

/// Handle to a running job.
#[derive(Debug)]
pub struct JobHandle {
    events: Receiver<JobEvent>,
    cancel: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl JobHandle {
    pub fn events(&self) -> &Receiver<JobEvent> {
        &self.events
    }

    /// Asks the job to stop. It will send no further events.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Blocks until the job ends, discarding progress. Returns the terminal
    /// event, or `None` if the job was cancelled.
    pub fn wait(self) -> Option<JobEvent> {
        let terminal = self
            .events
            .iter()
            .find(|event| !matches!(event, JobEvent::Progress(_)));
        if self.thread.join().is_err() {
            log::warn!("packing worker panicked");
        }
        terminal
    }
}

/// Starts `job` on its own thread.
pub fn spawn(job: Job) -> JobHandle {
    let (sender, events) = unbounded();
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);

    let thread = thread::spawn(move || work(&job, &flag, &sender));
    JobHandle {
        events,
        cancel,
        thread,
    }
}

fn work(job: &Job, cancel: &Arc<AtomicBool>, sender: &Sender<JobEvent>) {
    let outcome = run(job, cancel, |progress| {
        // a dropped receiver just means nobody is listening any more
        let _ = sender.send(JobEvent::Progress(progress));
    });
    if cancel.load(Ordering::Relaxed) {
        return;
    }

    let event = match outcome {
        Ok(Some(result)) => {
            if let Some(path) = &job.report {
                if let Err(err) = report::save(path, &result) {
                    log::warn!("failed to write report {}: {err}", path.display());
                }
            }
            JobEvent::Finished(result)
        }
        Ok(None) => return,
        Err(err) => JobEvent::Failed(err),
    };
    let _ = sender.send(event);
}

/// Runs `job` on the current thread. Returns `Ok(None)` when cancelled.
pub fn run(
    job: &Job,
    cancel: &Arc<AtomicBool>,
    mut on_progress: impl FnMut(Progress),
) -> Result<Option<JobResult>, PackError> {
    match job.mode {
        Mode::Backtrack => backtrack(job, cancel, &mut on_progress),
        Mode::Evolve => evolve(job, cancel, &mut on_progress),
        Mode::Auto => match backtrack(job, cancel, &mut on_progress)? {
            Some(result) if !result.filled && job.counts.is_none() => {
                log::warn!("no shape counts given, skipping the evolutionary fallback");
                Ok(Some(result))
            }
            Some(result) if !result.filled => {
                log::info!("backtracking ran dry, falling back to evolution");
                evolve(job, cancel, &mut on_progress)
            }
            other => Ok(other),
        },
    }
}

fn backtrack(
    job: &Job,
    cancel: &Arc<AtomicBool>,
    on_progress: &mut impl FnMut(Progress),
) -> Result<Option<JobResult>, PackError> {
    let started = Instant::now();
    let mut attempts = 0;

    for round in 0..job.rounds.max(1) {
        if cancel.load(Ordering::Relaxed) {
            return Ok(None);
        }

        let mut packer = job.packer()?;
        if round > 0 || job.options.shuffle_seed.is_some() {
            let base = job.options.shuffle_seed.unwrap_or(0);
            packer.set_shuffle(Some(base.wrapping_add(round as u64)));
        }
        packer.set_cancel(Arc::clone(cancel));

        let tries = packer.tries();
        let filled = packer.pack(job.counts.as_ref())?;
        attempts += tries - packer.tries();
        if cancel.load(Ordering::Relaxed) {
            return Ok(None);
        }

        if filled {
            let (front, back) = packer.faces()?;
            return Ok(Some(JobResult {
                filled: true,
                summary: format!(
                    "filled by backtracking in {:.2?} (round {}, {} attempts)",
                    started.elapsed(),
                    round + 1,
                    attempts
                ),
                front,
                back,
            }));
        }

        log::debug!("round {} exhausted after {} attempts", round + 1, attempts);
        on_progress(Progress {
            mode: Mode::Backtrack,
            step: round + 1,
            attempts,
            score: None,
            front: job.front.clone(),
            back: job.back.clone(),
        });
    }

    Ok(Some(JobResult {
        filled: false,
        summary: format!(
            "no packing found by backtracking in {:.2?} ({} attempts)",
            started.elapsed(),
            attempts
        ),
        front: job.front.clone(),
        back: job.back.clone(),
    }))
}

fn evolve(
    job: &Job,
    cancel: &Arc<AtomicBool>,
    on_progress: &mut impl FnMut(Progress),
) -> Result<Option<JobResult>, PackError> {
    let remaining = job.counts.clone().ok_or(PackError::MissingCounts)?;
    let mut rng = Pcg32::seed_from_u64(job.evolution.seed);
    let calculator = FitnessCalculator::new(job.targets.clone());
    let front = Grid::parse(&job.front)?;

    match &job.back {
        Some(back) => {
            let packer = DualPacker::with_options(front, Grid::parse(back)?, &job.options)?;
            let seed = DualIndividual::seeded(packer, remaining, calculator, &mut rng)?;
            evolve_from(&seed, job, cancel, on_progress, |best| best.packer().faces())
        }
        None => {
            let packer = Packer::with_options(front, &job.options);
            let seed = PackingIndividual::seeded(packer, remaining, calculator, &mut rng)?;
            evolve_from(&seed, job, cancel, on_progress, |best| best.packer().faces())
        }
    }
}

fn evolve_from<I>(
    seed: &I,
    job: &Job,
    cancel: &Arc<AtomicBool>,
    on_progress: &mut impl FnMut(Progress),
    faces: impl Fn(&I) -> Result<(String, Option<String>), PackError>,
) -> Result<Option<JobResult>, PackError>
where
    I: Individual<Score = FitnessScore>,
{
    let started = Instant::now();
    let mut evolution = Evolution::new(seed, job.evolution.clone());
    evolution.set_cancel(Arc::clone(cancel));

    let solved = evolution.run(|epoch, best| {
        match faces(best) {
            Ok((front, back)) => on_progress(Progress {
                mode: Mode::Evolve,
                step: epoch,
                attempts: 0,
                score: Some(best.fitness()),
                front,
                back,
            }),
            Err(err) => log::warn!("epoch {epoch}: progress not reported: {err}"),
        }
    });
    if cancel.load(Ordering::Relaxed) {
        return Ok(None);
    }

    let best = evolution.best().ok_or(PackError::Unsolved)?;
    let (front, back) = faces(best)?;
    let verb = if solved { "filled" } else { "best effort" };
    Ok(Some(JobResult {
        filled: solved,
        summary: format!(
            "{verb} by evolution in {:.2?} after {} epochs: {}",
            started.elapsed(),
            evolution.epoch(),
            best.fitness()
        ),
        front,
        back,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(front: &str, back: Option<&str>, counts: &str, mode: Mode) -> Job {
        let mut job = Job::new(front, back.map(str::to_owned), Some(counts.parse().unwrap()));
        job.mode = mode;
        job
    }

    #[test]
    fn test_mode_names() {
        for mode in [Mode::Backtrack, Mode::Evolve, Mode::Auto] {
            assert_eq!(mode.to_string().parse::<Mode>(), Ok(mode));
        }
        assert!("greedy".parse::<Mode>().is_err());
    }

    #[test]
    fn test_backtrack_job_finishes() {
        let handle = spawn(job("....\n....\n....\n....", None, "O:4", Mode::Backtrack));
        match handle.wait() {
            Some(JobEvent::Finished(result)) => {
                assert!(result.filled);
                assert!(!result.front.contains('.'));
                assert_eq!(result.back, None);
                assert!(result.summary.starts_with("filled by backtracking"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_dual_job_returns_both_faces() {
        let handle = spawn(job("....\n....", Some("....\n...."), "L:2", Mode::Backtrack));
        match handle.wait() {
            Some(JobEvent::Finished(result)) => {
                assert!(result.filled);
                let back = result.back.expect("back face");
                assert!(!back.contains('.'));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_configuration_error_fails_the_job() {
        let handle = spawn(job("....\n....", None, "O:255", Mode::Backtrack));
        assert_eq!(
            handle.wait(),
            Some(JobEvent::Failed(PackError::TooManyBlocks { requested: 255 }))
        );
    }

    #[test]
    fn test_evolve_needs_counts() {
        let mut job = Job::new("....", None, None);
        job.mode = Mode::Evolve;
        let cancel = Arc::new(AtomicBool::new(false));
        assert_eq!(run(&job, &cancel, |_| {}), Err(PackError::MissingCounts));
    }

    /// A seed whose greedy pass leaves part of `counts` unplaced.
    fn incomplete_greedy_seed(grid: &str, counts: &ShapeCounts) -> u64 {
        (0..100)
            .find(|&seed| {
                let mut packer = Packer::parse(grid).unwrap();
                let mut remaining = counts.clone();
                packer.random_fill(&mut remaining, &mut Pcg32::seed_from_u64(seed)).unwrap();
                remaining.total() > 0
            })
            .expect("some greedy pass gets stuck")
    }

    #[test]
    fn test_auto_falls_back_to_evolution() {
        let grid = "....\n....\n....\n....";
        let mut job = job(grid, None, "O:4", Mode::Auto);
        job.options.tries = 0;
        job.evolution.seed = incomplete_greedy_seed(grid, job.counts.as_ref().unwrap());

        let cancel = Arc::new(AtomicBool::new(false));
        let mut rounds = 0;
        let result = run(&job, &cancel, |progress| {
            if progress.mode == Mode::Backtrack {
                rounds += 1;
            }
        })
        .unwrap()
        .unwrap();
        assert_eq!(rounds, job.rounds);
        // no square fits anywhere after the greedy pass, so filling the grid
        // means mutation tore greedy placements out and re-placed them
        assert!(result.filled);
        assert!(result.summary.contains("by evolution"));
        assert!(!result.front.contains('.'));
    }

    #[test]
    fn test_auto_without_counts_reports_exhaustion() {
        let grid = "...\n...\n...";
        let mut job = Job::new(grid, Some(grid.to_owned()), None);
        job.mode = Mode::Auto;
        job.rounds = 2;
        let cancel = Arc::new(AtomicBool::new(false));
        let result = run(&job, &cancel, |_| {}).unwrap().unwrap();
        assert!(!result.filled);
        assert_eq!(result.front, job.front);
    }

    #[test]
    fn test_cancelled_job_reports_nothing() {
        let job = job("....\n....\n....\n....", None, "O:4", Mode::Auto);
        let cancel = Arc::new(AtomicBool::new(true));
        let mut events = 0;
        assert_eq!(run(&job, &cancel, |_| events += 1), Ok(None));
        assert_eq!(events, 0);
    }
}
