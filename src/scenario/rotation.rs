//! The rotation-puzzle scenario (interrupts 582/583).
//!
//! A "square" is eight 2-bit color cells packed into 16 bits, cell *i* at
//! bit position `2i`. The guest receives a reference square followed by
//! eight candidate squares; exactly one candidate is the reference with a
//! flip and a rotation applied, and the guest must report that
//! candidate's byte offset.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use super::{ScenarioContext, REPORT_SENTINEL};
use crate::emu::{Emulator, ErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    /// Category-key token.
    pub fn label(self) -> &'static str {
        match self {
            Rotation::R0 => "0Rot",
            Rotation::R90 => "90Rot",
            Rotation::R180 => "180Rot",
            Rotation::R270 => "270Rot",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RotationPuzzle {
    pub reference: u32,
    pub candidates: [u32; 8],
    /// Byte offset of the solution within the candidate block.
    pub solution_offset: u32,
    pub rotation: Rotation,
    pub flipped: bool,
    pub reported_offset: u32,
}

fn cell(square: u32, i: u32) -> u32 {
    (square >> (2 * (i % 8))) & 0x3
}

/// One clockwise quarter turn.
pub(crate) fn rotate_quarter(square: u32) -> u32 {
    ((square >> 4) | ((square & 0xF) << 12)) & 0xFFFF
}

/// Mirror reflection fixing cell 0: `out[k] = in[(8 - k) % 8]`.
pub(crate) fn flip_square(square: u32) -> u32 {
    let mut out = 0;
    for k in 0..8 {
        out |= cell(square, (8 - k) % 8) << (2 * k);
    }
    out
}

/// Rejection-sample a square in which no two cyclically adjacent cells
/// share a color.
fn gen_square(rng: &mut StdRng) -> u32 {
    loop {
        let t = rng.gen_range(0..65536u32);
        if (0..8).all(|i| cell(t, i) != cell(t, i + 1)) {
            return t;
        }
    }
}

/// Whether `candidate` is some rotation of the reference or of its flip.
pub(crate) fn is_transform_of(reference: u32, candidate: u32) -> bool {
    let mut square = candidate;
    for _ in 0..4 {
        square = rotate_quarter(square);
        if square == reference {
            return true;
        }
    }
    let mut square = flip_square(candidate);
    for _ in 0..4 {
        square = rotate_quarter(square);
        if square == reference {
            return true;
        }
    }
    false
}

impl RotationPuzzle {
    /// Generate a reference, place its flipped/rotated form at a random
    /// candidate slot, and fill the remaining slots with distractors that
    /// match no transform of the reference. Distractor sampling carries a
    /// watchdog: after 1000 consecutive rejections the RNG is re-seeded.
    pub fn generate(rng: &mut StdRng) -> Self {
        let reference = gen_square(rng);
        let solution_offset = 4 * rng.gen_range(0..8u32);
        let flipped = rng.gen_range(0..2) == 0;
        let rotation = match rng.gen_range(0..4u32) {
            0 => Rotation::R0,
            1 => Rotation::R90,
            2 => Rotation::R180,
            _ => Rotation::R270,
        };

        // flip first, then rotate
        let mut solution = reference;
        if flipped {
            solution = flip_square(solution);
        }
        solution = match rotation {
            Rotation::R0 => solution,
            Rotation::R90 => (solution >> 4) | ((solution & 0xF) << 12),
            Rotation::R180 => (solution >> 8) | ((solution & 0xFF) << 8),
            Rotation::R270 => (solution >> 12) | ((solution & 0xFFF) << 4),
        };

        let mut candidates = [0u32; 8];
        candidates[(solution_offset / 4) as usize] = solution;

        for slot in 0..8 {
            if slot == (solution_offset / 4) as usize {
                continue;
            }
            let mut watchdog = 0;
            loop {
                let t = gen_square(rng);
                if !is_transform_of(reference, t) {
                    candidates[slot] = t;
                    break;
                }
                watchdog += 1;
                if watchdog > 1000 {
                    watchdog = 0;
                    warn!("randomization watchdog intervened");
                    let reseed: u64 = rng.gen();
                    *rng = StdRng::seed_from_u64(reseed);
                }
            }
        }

        RotationPuzzle {
            reference,
            candidates,
            solution_offset,
            rotation,
            flipped,
            reported_offset: REPORT_SENTINEL,
        }
    }
}

impl Emulator {
    pub(crate) fn swi_rotation_setup(&mut self) {
        if !self.regs.is_initialized(1) {
            self.report_error(
                ErrorKind::SoftwareInterruptParameter,
                "register $1 uninitialized for swi 582 call. \
                 $1 should hold the reference memory pointer",
            );
        }

        let puzzle = RotationPuzzle::generate(&mut self.rng);

        let base = self.regs.raw(1);
        self.mem_write(base, puzzle.reference, 0xFFFF_FFFF);
        for (i, &candidate) in puzzle.candidates.iter().enumerate() {
            self.mem_write(base.wrapping_add(4 + 4 * i as u32), candidate, 0xFFFF_FFFF);
        }

        self.ctx = Some(ScenarioContext::Rotation(puzzle));
    }

    pub(crate) fn swi_rotation_grade(&mut self) {
        if !matches!(self.ctx, Some(ScenarioContext::Rotation(_))) {
            self.report_error(
                ErrorKind::InvalidSoftwareInterrupt,
                "cannot use swi 583 with the previous swi call(s)",
            );
            return;
        }
        if !self.regs.is_initialized(3) {
            self.report_error(
                ErrorKind::SoftwareInterruptParameter,
                "register $3 uninitialized for swi 583 call. $3 should hold the \
                 byte offset of the solution from the first candidate",
            );
        }

        let reported = self.reg_access(3);
        let solution = match self.ctx.as_mut() {
            Some(ScenarioContext::Rotation(p)) => {
                p.reported_offset = reported;
                p.solution_offset
            }
            _ => unreachable!(),
        };

        if reported > 28 || reported % 4 != 0 {
            self.report_error(
                ErrorKind::SoftwareInterruptParameterValue,
                format!(
                    "0x{reported:X} is an invalid solution for swi 583. \
                     Must be in [0, 28] and word aligned (multiple of four)"
                ),
            );
            return;
        }

        self.reg_write(6, solution);
    }
}
