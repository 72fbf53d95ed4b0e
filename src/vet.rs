//! The vet harness: drives batches of emulations against freshly
//! randomized scenarios, classifies each run into a category, accumulates
//! stratified statistics, and retains a bounded sample of failures.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::emu::{emulate, EmulationResult, ErrorKind, RuntimeError};
use crate::object::Assembled;
use crate::scenario::{ScenarioContext, REPORT_SENTINEL};

/// Per-category accumulation: outcomes plus an error-kind histogram.
#[derive(Debug, Clone, Default)]
pub struct VetTestCase {
    pub successes: u32,
    pub fails: u32,
    pub total_errors: usize,
    pub error_frequency: HashMap<ErrorKind, usize>,
}

/// A retained failure. The recorded seed reproduces the scenario.
#[derive(Debug)]
pub struct VetSnapshot {
    pub category: String,
    pub seed: u64,
    pub result: EmulationResult,
}

/// One batch of emulations against a single assembly, accumulating
/// per-category statistics and a bounded list of failure snapshots.
#[derive(Debug)]
pub struct VetSession {
    pub assignment: String,
    pub total_count: u32,
    pub correct_count: u32,
    pub test_cases: BTreeMap<String, VetTestCase>,
    pub failed_snapshots: Vec<VetSnapshot>,
    rng: StdRng,
}

impl VetSession {
    pub fn new(assignment: &str, seed: u64) -> Self {
        Self {
            assignment: assignment.to_string(),
            total_count: 0,
            correct_count: 0,
            test_cases: BTreeMap::new(),
            failed_snapshots: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Fold one emulation into the session. Synthesizes a
    /// `NoAnswerReported` error when the grading interrupt never ran. A
    /// result with no scenario context at all is fatal: the assembly
    /// never invoked the setup interrupt, so nothing can be vetted.
    pub fn record(&mut self, result: &mut EmulationResult) -> Result<()> {
        self.total_count += 1;

        let (category, correct) = match &result.context {
            Some(ScenarioContext::Rotation(p)) => {
                let answered = p.reported_offset != REPORT_SENTINEL;
                let correct = p.reported_offset == p.solution_offset;
                let category = format!(
                    "P1-{}CW-{}-{}offset",
                    p.rotation.label(),
                    if p.flipped { "flipped" } else { "notFlipped" },
                    p.solution_offset
                );
                if !answered {
                    result.errors.push(RuntimeError {
                        kind: ErrorKind::NoAnswerReported,
                        message: "No call was made to swi 583".to_string(),
                    });
                }
                (category, correct)
            }
            Some(ScenarioContext::BoundingBox(p)) => {
                let answered = p.reported_answer != REPORT_SENTINEL;
                let correct = p.reported_answer == p.solution;
                let category = format!(
                    "P1-{}-{}-{}-{}hLines-{}vLines",
                    p.obscurity.label(),
                    p.spacing.label(),
                    p.geometry.label(),
                    p.h_line_count,
                    p.v_line_count
                );
                if !answered {
                    result.errors.push(RuntimeError {
                        kind: ErrorKind::NoAnswerReported,
                        message: "No call was made to swi 599".to_string(),
                    });
                }
                (category, correct)
            }
            None => bail!(
                "scenario setup software interrupt was never invoked by the assembly; \
                 cannot vet this emulation"
            ),
        };

        if correct {
            self.correct_count += 1;
        }

        {
            let case = self.test_cases.entry(category.clone()).or_default();
            for error in &result.errors {
                *case.error_frequency.entry(error.kind).or_insert(0) += 1;
            }
            case.total_errors += result.errors.len();
            if correct {
                case.successes += 1;
            } else {
                case.fails += 1;
            }
        }

        if !correct {
            self.retain_snapshot(category, result);
        }

        Ok(())
    }

    /// Bounded retention: with `n` snapshots already held for a
    /// category, the next failure is captured with probability 0.75^n,
    /// so the first failure of a category is always kept.
    fn retain_snapshot(&mut self, category: String, result: &EmulationResult) {
        let held = self
            .failed_snapshots
            .iter()
            .filter(|s| s.category == category)
            .count();
        let draw: f64 = self.rng.gen();
        if draw <= 0.75f64.powi(held as i32) {
            self.failed_snapshots.push(VetSnapshot {
                category,
                seed: result.seed,
                result: result.clone(),
            });
        }
    }
}

impl fmt::Display for VetSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.total_count.max(1) as f64;
        let avg_errors = self
            .test_cases
            .values()
            .map(|c| c.total_errors as f64)
            .sum::<f64>()
            / total;

        writeln!(f, "\n+====[ VET RESULTS ]====+")?;
        writeln!(f, "Vet for {}.", self.assignment)?;
        writeln!(f, "Summary:")?;
        writeln!(f, " - Performed {} tests.", self.total_count)?;
        writeln!(
            f,
            " - Of those, {} were successful ({:.3}% success rate).",
            self.correct_count,
            self.correct_count as f64 / total * 100.0
        )?;
        writeln!(
            f,
            " - For each evaluation, on average there were {avg_errors:.3} errors."
        )?;

        writeln!(f, "\nTest Cases ({}):", self.test_cases.len())?;
        for (category, case) in &self.test_cases {
            writeln!(
                f,
                " - {}: Successes: {}; Fails: {}; Error Count: {}",
                category, case.successes, case.fails, case.total_errors
            )?;
            let mut frequency: Vec<_> = case.error_frequency.iter().collect();
            frequency.sort_by_key(|(kind, _)| kind.to_string());
            for (kind, count) in frequency {
                writeln!(
                    f,
                    "   + Error: {}; Count: {} ({:.3}%)",
                    kind,
                    count,
                    *count as f64 / (case.total_errors.max(1)) as f64 * 100.0
                )?;
            }
        }

        // categories are not mutually exclusive across dimensions: the
        // same counts are regrouped by each position of the hyphen key
        let mut dimensions: BTreeMap<&str, (u32, u32)> = BTreeMap::new();
        for (category, case) in &self.test_cases {
            for token in category.split('-').skip(1) {
                let entry = dimensions.entry(token).or_default();
                entry.0 += case.successes;
                entry.1 += case.fails;
            }
        }
        writeln!(f, "\nBy dimension:")?;
        for (token, (successes, fails)) in dimensions {
            writeln!(f, " - {token}: Successes: {successes}; Fails: {fails}")?;
        }

        writeln!(
            f,
            "\nRetained {} failure snapshot(s).",
            self.failed_snapshots.len()
        )
    }
}

#[derive(Debug, Clone)]
pub struct VetOptions {
    /// Emulations per batch; the vet default is 100,000.
    pub samples: usize,
    /// Runtime instruction budget per emulation.
    pub runtime_limit: u32,
    /// Errors tolerated per emulation before it is halted.
    pub error_tolerance: usize,
    /// Master seed; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for VetOptions {
    fn default() -> Self {
        Self {
            samples: 100_000,
            runtime_limit: 100_000,
            error_tolerance: 5,
            seed: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchStats {
    pub samples: usize,
    pub di_min: u32,
    pub di_max: u32,
    pub di_mean: f64,
    pub static_instructions: usize,
    /// Set when the batch aborted after more than 10 runs hit the
    /// runtime limit.
    pub halted_infinite: bool,
}

#[derive(Debug)]
pub struct VetReport {
    pub session: VetSession,
    pub stats: BatchStats,
    pub last: EmulationResult,
}

/// Vet an assembly: up to `options.samples` emulations, each against a
/// fresh deep copy of the assembled memory and a fresh scenario seed.
pub fn run_vet(assembled: &Assembled, assignment: &str, options: &VetOptions) -> Result<VetReport> {
    let mut master = master_rng(options);
    let session_seed = master.gen();
    let mut session = VetSession::new(assignment, session_seed);
    let (stats, last) = run_batch(assembled, Some(&mut session), &mut master, options)?;
    Ok(VetReport {
        session,
        stats,
        last,
    })
}

/// Single-emulation mode: no vetting, just run once and summarize.
pub fn run_once(assembled: &Assembled, options: &VetOptions) -> Result<(BatchStats, EmulationResult)> {
    let mut master = master_rng(options);
    let options = VetOptions {
        samples: 1,
        ..options.clone()
    };
    run_batch(assembled, None, &mut master, &options)
}

fn master_rng(options: &VetOptions) -> StdRng {
    match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn run_batch(
    assembled: &Assembled,
    mut session: Option<&mut VetSession>,
    master: &mut StdRng,
    options: &VetOptions,
) -> Result<(BatchStats, EmulationResult)> {
    let samples = options.samples.max(1);
    let mut di_min = options.runtime_limit;
    let mut di_max = 0u32;
    let mut di_sum = 0f64;
    let mut infinite_count = 0u32;
    let mut halted_infinite = false;
    let mut completed = 0;
    let mut last: Option<EmulationResult> = None;

    for i in 0..samples {
        let memory = assembled.memory.deep_clone();
        let seed: u64 = master.gen();
        let mut result = emulate(
            assembled.text_start,
            memory,
            options.runtime_limit,
            options.error_tolerance,
            seed,
        );
        completed = i + 1;

        di_sum += f64::from(result.di);
        di_min = di_min.min(result.di);
        di_max = di_max.max(result.di);

        if result.last_error_kind() == Some(ErrorKind::RuntimeLimitExceeded) {
            infinite_count += 1;
            if infinite_count > 10 {
                // treated as an infinitely looping assembly; report on
                // the partial batch
                halted_infinite = true;
                last = Some(result);
                break;
            }
        }

        if let Some(session) = session.as_deref_mut() {
            session.record(&mut result)?;
        }

        if samples > 10_000 && i % (samples / 10) == 0 {
            println!(
                "Progress: Completed {}% ({} emulations)",
                i / (samples / 100),
                i
            );
        }

        last = Some(result);
    }

    let stats = BatchStats {
        samples: completed,
        di_min,
        di_max,
        di_mean: di_sum / completed as f64,
        static_instructions: assembled.static_instruction_count(),
        halted_infinite,
    };
    let last = last.expect("batch runs at least one emulation");
    Ok((stats, last))
}

/// General (non-vet) result banner, also used for the partial summary of
/// an aborted batch.
pub fn print_general_results(name: &str, stats: &BatchStats, errors: Option<&[RuntimeError]>) {
    if stats.halted_infinite {
        println!("\n+====[ HALTED DUE TO TOO MANY INFINITE LOOPS ]====+");
    }
    println!("\n+====[ EMULATION RESULTS ]====+");
    println!("Emulation of {name}.");
    println!("Summary:");
    println!(" - Performed {} tests.", stats.samples);
    println!(
        " - {} SI; {:5.2} average DI (min: {}, max: {})",
        stats.static_instructions, stats.di_mean, stats.di_min, stats.di_max
    );
    if let Some(errors) = errors {
        println!(" - Total errors generated: {}", errors.len());
        println!("\nAll errors:");
        for error in errors {
            println!(" - {error}");
        }
    }
}
