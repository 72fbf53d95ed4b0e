//! A MIPS-1 assembler and emulator for statistically vetting student
//! assembly against randomized test scenarios.
//!
//! The pipeline: [`assemble`] turns source text into a paged memory
//! image plus label and line metadata; [`emulate`] runs the image on a
//! Von-Neumann core with initialization tracking and a two-way
//! instruction/data cache; [`run_vet`] drives batches of emulations
//! whose `swi` instructions pull randomized problem instances from the
//! scenario engine, then classifies and accumulates the outcomes.

mod asm;
mod emu;
pub mod isa;
mod mem;
mod object;
mod parse;
mod scenario;
mod utils;
mod vet;

pub use asm::{assemble, AssembleOption, AssemblySettings};
pub use emu::{
    emulate, BranchInfo, EmulationResult, ErrorKind, RegisterFile, RuntimeError, EXIT_PC,
    STACK_POINTER_SEED,
};
pub use mem::{MemoryPage, PageRef, SystemMemory, PAGE_WORDS};
pub use object::{AsmError, Assembled, LabelMap, MemoryImage, SourceLine};
pub use scenario::{
    Geometry, Obscurity, PilePuzzle, Rotation, RotationPuzzle, ScenarioContext, Spacing,
    REPORT_SENTINEL,
};
pub use utils::parse_literal;
pub use vet::{
    print_general_results, run_once, run_vet, BatchStats, VetOptions, VetReport, VetSession,
    VetSnapshot, VetTestCase,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assemble_then_emulate() {
        let out = assemble(
            ".text\naddi $1, $0, 40\naddi $2, $0, 2\nadd $3, $1, $2\n",
            AssemblySettings::default(),
            AssembleOption::default(),
        );
        assert_eq!(out.error_count(), 0);
        let result = emulate(out.text_start, out.memory, 100_000, 5, 0);
        assert_eq!(result.reg_read(3), Some(42));
    }
}
