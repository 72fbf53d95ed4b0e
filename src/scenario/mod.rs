//! The scenario engine: software-interrupt dispatch and the per-assignment
//! problem generators, solvers, and answer graders.
//!
//! A scenario is created by a setup interrupt (582, 598), which writes a
//! randomized problem instance into guest memory and attaches a context to
//! the emulation; the matching grading interrupt (583, 599) reads the
//! guest's reported answer and hands back the ground truth. The vet
//! harness consumes the context after the run.

mod pile;
mod rotation;

pub use pile::{Geometry, Obscurity, PilePuzzle, Spacing};
pub use rotation::{Rotation, RotationPuzzle};

use crate::emu::Emulator;

/// Value a scenario's reported-answer slot holds until the grading
/// interrupt runs; distinguishes "never answered" from any real answer.
pub const REPORT_SENTINEL: u32 = 0x1234_5678;

/// Tagged scenario handle attached to an emulation by the first setup
/// interrupt. Grading interrupts match on the variant and reject
/// mismatches.
#[derive(Debug, Clone)]
pub enum ScenarioContext {
    Rotation(RotationPuzzle),
    BoundingBox(PilePuzzle),
}

impl Emulator {
    /// Unknown interrupt codes are deliberately a no-op.
    pub(crate) fn dispatch_swi(&mut self, code: u32) {
        match code {
            582 => self.swi_rotation_setup(),
            583 => self.swi_rotation_grade(),
            598 => self.swi_pile_setup(),
            599 => self.swi_pile_grade(),
            _ => {}
        }
    }
}
