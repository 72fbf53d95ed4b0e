//! The emulator core: register file, HI/LO, the fetch/decode/execute
//! loop, and runtime error accounting.
//!
//! The machine is a Von-Neumann model over [`SystemMemory`]; programs may
//! rewrite their own text. Two resident pages act as an instruction cache
//! and a data cache. An instruction fetch replaces the instruction cache
//! on any miss; the data cache uses a two-strike policy, surviving one
//! miss (for small straddling accesses) and being evicted on the second
//! consecutive one.

use std::collections::HashMap;
use std::fmt;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::trace;

use crate::isa::{self, fn_code, op_code, Decoded};
use crate::mem::{PageRef, SystemMemory};
use crate::scenario::ScenarioContext;

/// PC value that terminates emulation; `$31` is seeded with it.
pub const EXIT_PC: u32 = 0xFFFF_FFFF;
pub const STACK_POINTER_SEED: u32 = 0x0010_0000;

/// Runtime error kinds. `Display` is the symbolic name; the paired
/// message carries PC, DI, and contextual values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ErrorKind {
    #[error("UninitializedMemoryAccess")]
    UninitializedMemoryAccess,
    #[error("UninitializedRegisterAccess")]
    UninitializedRegisterAccess,
    #[error("RuntimeLimitExceeded")]
    RuntimeLimitExceeded,
    #[error("InvalidInstruction")]
    InvalidInstruction,
    #[error("IllegalRegisterWrite")]
    IllegalRegisterWrite,
    #[error("ErrorLimitReached")]
    ErrorLimitReached,
    #[error("ShiftOverflow")]
    ShiftOverflow,
    #[error("HiLoUninitializedAccess")]
    HiLoUninitializedAccess,
    #[error("SoftwareInterruptParameter")]
    SoftwareInterruptParameter,
    #[error("InvalidSoftwareInterrupt")]
    InvalidSoftwareInterrupt,
    #[error("SoftwareInterruptParameterValue")]
    SoftwareInterruptParameterValue,
    #[error("NoAnswerReported")]
    NoAnswerReported,
}

#[derive(Debug, Clone)]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}; {}", self.kind, self.message)
    }
}

/// Per-branch bookkeeping, keyed by the branch instruction's PC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BranchInfo {
    pub total: u32,
    pub taken: u32,
}

/// 32 registers with a one-bit-per-register initialization bitmap.
/// Reset seeds `$0` (permanent zero), `$29` (stack pointer), and `$31`
/// (terminal return sentinel); everything else starts uninitialized.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    regs: [u32; 32],
    init: u32,
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterFile {
    pub fn new() -> Self {
        let mut regs = [0u32; 32];
        regs[29] = STACK_POINTER_SEED;
        regs[31] = EXIT_PC;
        Self {
            regs,
            init: 0x1 | 0x1 << 29 | 0x1 << 31,
        }
    }

    pub fn is_initialized(&self, reg: usize) -> bool {
        (self.init >> reg) & 0x1 == 0x1
    }

    /// Initialized read; `None` when no write has reached the register.
    pub fn read(&self, reg: usize) -> Option<u32> {
        self.is_initialized(reg).then(|| self.regs[reg])
    }

    pub fn init_mask(&self) -> u32 {
        self.init
    }

    pub(crate) fn raw(&self, reg: usize) -> u32 {
        self.regs[reg]
    }

    pub(crate) fn set(&mut self, reg: usize, value: u32) {
        self.init |= 0x1 << reg;
        self.regs[reg] = value;
    }
}

/// The persistent outcome of one emulation. Owns the final memory and
/// registers; the scenario context is consumed by the vet harness.
#[derive(Debug, Clone)]
pub struct EmulationResult {
    pub memory: SystemMemory,
    pub registers: RegisterFile,
    pub di: u32,
    pub context: Option<ScenarioContext>,
    pub branch_analysis: HashMap<u32, BranchInfo>,
    pub errors: Vec<RuntimeError>,
    /// Seed of the per-run RNG; retained snapshots are reproducible from it.
    pub seed: u64,
}

impl EmulationResult {
    pub fn mem_read(&self, addr: u32) -> Option<u32> {
        self.memory.read(addr)
    }

    pub fn reg_read(&self, reg: usize) -> Option<u32> {
        self.registers.read(reg)
    }

    pub fn last_error_kind(&self) -> Option<ErrorKind> {
        self.errors.last().map(|e| e.kind)
    }
}

pub(crate) struct Emulator {
    pub(crate) memory: SystemMemory,
    pub(crate) pc: u32,
    pub(crate) regs: RegisterFile,
    hi: u32,
    lo: u32,
    hilo_filled: bool,
    icache: Option<PageRef>,
    dcache: Option<PageRef>,
    d_missed: bool,
    di: u32,
    runtime_limit: u32,
    branch_info: HashMap<u32, BranchInfo>,
    pub(crate) ctx: Option<ScenarioContext>,
    errors: Vec<RuntimeError>,
    pub(crate) rng: StdRng,
    seed: u64,
}

enum CacheAccess {
    Miss,
    Hit(u32),
    Uninitialized,
}

impl Emulator {
    fn new(memory: SystemMemory, runtime_limit: u32, seed: u64) -> Self {
        Self {
            memory,
            pc: 0,
            regs: RegisterFile::new(),
            hi: 0,
            lo: 0,
            hilo_filled: false,
            icache: None,
            dcache: None,
            d_missed: false,
            di: 0,
            runtime_limit,
            branch_info: HashMap::new(),
            ctx: None,
            errors: Vec::new(),
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    pub(crate) fn report_error(&mut self, kind: ErrorKind, message: impl fmt::Display) {
        self.errors.push(RuntimeError {
            kind,
            message: format!(
                "ERROR: pc=0x{:X} di={} message={}",
                self.pc,
                self.di + 1,
                message
            ),
        });
    }

    fn report_uninitialized_memory(&mut self, addr: u32) {
        self.report_error(
            ErrorKind::UninitializedMemoryAccess,
            format!("0x{addr:X} ({addr}) was accessed before it was initialized"),
        );
    }

    fn probe_cache(cache: &Option<PageRef>, addr: u32) -> CacheAccess {
        let Some(page) = cache else {
            return CacheAccess::Miss;
        };
        let page = page.borrow();
        if addr >> 12 != page.page_id() {
            return CacheAccess::Miss;
        }
        let (value, initialized) = page.read(addr);
        if initialized {
            CacheAccess::Hit(value)
        } else {
            CacheAccess::Uninitialized
        }
    }

    /// Word read through the caches. A data-access fault is reported as
    /// `UninitializedMemoryAccess` and the caller continues with zero; a
    /// fetch fault is not an error — running past initialized text
    /// terminates the emulation cleanly.
    fn mem_access(&mut self, addr: u32, is_instr: bool) -> Option<u32> {
        match Self::probe_cache(&self.icache, addr) {
            CacheAccess::Hit(v) => return Some(v),
            CacheAccess::Uninitialized => {
                if !is_instr {
                    self.report_uninitialized_memory(addr);
                }
                return None;
            }
            CacheAccess::Miss => {}
        }

        match Self::probe_cache(&self.dcache, addr) {
            CacheAccess::Hit(v) => {
                self.d_missed = false;
                return Some(v);
            }
            CacheAccess::Uninitialized => {
                if !is_instr {
                    self.report_uninitialized_memory(addr);
                }
                return None;
            }
            CacheAccess::Miss => {}
        }

        let Some(page) = self.memory.page(addr >> 12) else {
            if !is_instr {
                self.report_uninitialized_memory(addr);
            }
            return None;
        };
        let (value, initialized) = page.borrow().read(addr);
        if !initialized {
            if !is_instr {
                self.report_uninitialized_memory(addr);
            }
            return None;
        }

        if is_instr {
            // fetch cannot tolerate misses
            self.icache = Some(page);
        } else if self.d_missed {
            // second consecutive miss flushes the data cache
            self.dcache = Some(page);
        } else {
            self.d_missed = true;
        }

        Some(value)
    }

    /// Masked word write. Data and mask must be pre-shifted into their
    /// byte lanes. Cached pages alias the page table, so writing through
    /// a cache keeps the table coherent.
    pub(crate) fn mem_write(&mut self, addr: u32, data: u32, mask: u32) {
        if let Some(cache) = &self.icache {
            let mut page = cache.borrow_mut();
            if addr >> 12 == page.page_id() {
                // the instruction cache is not flushed by a write
                page.write(addr, data, mask);
                return;
            }
        }
        if let Some(cache) = &self.dcache {
            let mut page = cache.borrow_mut();
            if addr >> 12 == page.page_id() {
                page.write(addr, data, mask);
                drop(page);
                self.d_missed = false;
                return;
            }
        }
        self.memory
            .page_or_create(addr)
            .borrow_mut()
            .write(addr, data, mask);
    }

    pub(crate) fn reg_access(&mut self, reg: usize) -> u32 {
        if !self.regs.is_initialized(reg) {
            self.report_error(
                ErrorKind::UninitializedRegisterAccess,
                format!("${reg} was accessed before it was initialized"),
            );
            return 0;
        }
        self.regs.raw(reg)
    }

    pub(crate) fn reg_write(&mut self, reg: usize, value: u32) {
        if reg == 0 {
            self.report_error(
                ErrorKind::IllegalRegisterWrite,
                "$0 is immutable and cannot be written to",
            );
            return;
        }
        self.regs.set(reg, value);
    }

    fn run(mut self, start_addr: u32, error_tolerance: usize) -> EmulationResult {
        self.pc = start_addr & !0x3;

        loop {
            if self.pc == EXIT_PC {
                break;
            }
            if self.errors.len() >= error_tolerance {
                self.report_error(
                    ErrorKind::ErrorLimitReached,
                    format!(
                        "maximum of {error_tolerance} errors has been exceeded, stopping emulation"
                    ),
                );
                break;
            }
            if self.di > self.runtime_limit {
                self.report_error(
                    ErrorKind::RuntimeLimitExceeded,
                    format!(
                        "maximum runtime instruction count of {} exceeded",
                        self.runtime_limit
                    ),
                );
                break;
            }

            let Some(word) = self.mem_access(self.pc, true) else {
                // ran past initialized text: terminate cleanly
                break;
            };

            let inst = isa::decode(word);
            if word == 0 {
                // no-op
            } else if inst.op == op_code::RTYPE {
                trace!("pc={:#010x} di={} {}", self.pc, self.di, fn_code::name_of(inst.funct));
                self.exec_r_type(&inst);
            } else if inst.op == op_code::J || inst.op == op_code::JAL {
                trace!("pc={:#010x} di={} {}", self.pc, self.di, op_code::name_of(inst.op));
                self.exec_j_type(&inst);
            } else {
                trace!("pc={:#010x} di={} {}", self.pc, self.di, op_code::name_of(inst.op));
                self.exec_i_type(&inst);
            }

            self.di += 1;
            self.pc = self.pc.wrapping_add(4);
        }

        EmulationResult {
            memory: self.memory,
            registers: self.regs,
            di: self.di,
            context: self.ctx,
            branch_analysis: self.branch_info,
            errors: self.errors,
            seed: self.seed,
        }
    }

    fn exec_r_type(&mut self, inst: &Decoded) {
        let (x, y, z) = (inst.rs as usize, inst.rt as usize, inst.rd as usize);
        match inst.funct {
            fn_code::ADD => {
                let v = (self.reg_access(x) as i32).wrapping_add(self.reg_access(y) as i32);
                self.reg_write(z, v as u32);
            }
            fn_code::ADDU => {
                let v = self.reg_access(x).wrapping_add(self.reg_access(y));
                self.reg_write(z, v);
            }
            fn_code::SUB => {
                let v = (self.reg_access(x) as i32).wrapping_sub(self.reg_access(y) as i32);
                self.reg_write(z, v as u32);
            }
            fn_code::SUBU => {
                let v = self.reg_access(x).wrapping_sub(self.reg_access(y));
                self.reg_write(z, v);
            }
            fn_code::AND => {
                let v = self.reg_access(x) & self.reg_access(y);
                self.reg_write(z, v);
            }
            fn_code::OR => {
                let v = self.reg_access(x) | self.reg_access(y);
                self.reg_write(z, v);
            }
            fn_code::XOR => {
                let v = self.reg_access(x) ^ self.reg_access(y);
                self.reg_write(z, v);
            }
            fn_code::SLT => {
                let v = ((self.reg_access(x) as i32) < (self.reg_access(y) as i32)) as u32;
                self.reg_write(z, v);
            }
            fn_code::SLTU => {
                let v = (self.reg_access(x) < self.reg_access(y)) as u32;
                self.reg_write(z, v);
            }
            fn_code::MULT => {
                let r = (self.reg_access(x) as i32 as i64)
                    .wrapping_mul(self.reg_access(y) as i32 as i64);
                self.hi = (r >> 32) as u32;
                self.lo = r as u32;
                self.hilo_filled = true;
            }
            fn_code::MULTU => {
                let r = u64::from(self.reg_access(x)) * u64::from(self.reg_access(y));
                self.hi = (r >> 32) as u32;
                self.lo = r as u32;
                self.hilo_filled = true;
            }
            fn_code::DIV => {
                let a = self.reg_access(x) as i32;
                let b = self.reg_access(y) as i32;
                if b == 0 {
                    self.report_error(ErrorKind::InvalidInstruction, "division by zero");
                } else {
                    self.lo = a.wrapping_div(b) as u32;
                    self.hi = a.wrapping_rem(b) as u32;
                    self.hilo_filled = true;
                }
            }
            fn_code::DIVU => {
                let a = self.reg_access(x);
                let b = self.reg_access(y);
                if b == 0 {
                    self.report_error(ErrorKind::InvalidInstruction, "division by zero");
                } else {
                    self.lo = a / b;
                    self.hi = a % b;
                    self.hilo_filled = true;
                }
            }
            fn_code::MFHI => {
                if !self.hilo_filled {
                    self.report_error(
                        ErrorKind::HiLoUninitializedAccess,
                        "mfhi used on uninitialized result",
                    );
                }
                let hi = self.hi;
                self.reg_write(z, hi);
            }
            fn_code::MFLO => {
                if !self.hilo_filled {
                    self.report_error(
                        ErrorKind::HiLoUninitializedAccess,
                        "mflo used on uninitialized result",
                    );
                }
                let lo = self.lo;
                self.reg_write(z, lo);
            }
            fn_code::JR => {
                // minus four accounts for the loop's PC increment
                self.pc = self.reg_access(x).wrapping_sub(4);
            }
            fn_code::SLL => {
                let v = self.reg_access(x) << inst.shamt;
                self.reg_write(z, v);
            }
            fn_code::SRL => {
                let v = self.reg_access(x) >> inst.shamt;
                self.reg_write(z, v);
            }
            fn_code::SRA => {
                let v = (self.reg_access(x) as i32) >> inst.shamt;
                self.reg_write(z, v as u32);
            }
            fn_code::SLLV => {
                let amount = self.variable_shift_amount(y);
                let v = self.reg_access(x) << amount;
                self.reg_write(z, v);
            }
            fn_code::SRLV => {
                let amount = self.variable_shift_amount(y);
                let v = self.reg_access(x) >> amount;
                self.reg_write(z, v);
            }
            fn_code::SRAV => {
                let amount = self.variable_shift_amount(y);
                let v = (self.reg_access(x) as i32) >> amount;
                self.reg_write(z, v as u32);
            }
            _ => {
                self.report_error(
                    ErrorKind::InvalidInstruction,
                    format!(
                        "0x{:X} is not a valid function for an R-type instruction",
                        inst.funct
                    ),
                );
            }
        }
    }

    fn variable_shift_amount(&mut self, reg: usize) -> u32 {
        let amount = self.reg_access(reg);
        if amount > 31 {
            self.report_error(
                ErrorKind::ShiftOverflow,
                format!("{amount} is larger than the maximum shift amount of 31"),
            );
        }
        amount & 0x1F
    }

    fn exec_i_type(&mut self, inst: &Decoded) {
        // the first-written operand (destination or store value) lives in
        // the rs slot; the second (source or base) in the rt slot
        let x = inst.rt as usize;
        let z = inst.rs as usize;
        let imm = inst.imm;
        match inst.op {
            op_code::ADDI | op_code::ADDIU => {
                // both variants sign-extend; no overflow trap is raised
                let imm = imm as u16 as i16 as i32 as u32;
                let v = self.reg_access(x).wrapping_add(imm);
                self.reg_write(z, v);
            }
            op_code::ANDI => {
                let v = self.reg_access(x) & imm;
                self.reg_write(z, v);
            }
            op_code::ORI => {
                let v = self.reg_access(x) | imm;
                self.reg_write(z, v);
            }
            op_code::SLTI => {
                let v = ((self.reg_access(x) as i32) < i32::from(imm as u16 as i16)) as u32;
                self.reg_write(z, v);
            }
            op_code::SLTIU => {
                let v = (self.reg_access(x) < imm) as u32;
                self.reg_write(z, v);
            }
            op_code::LUI => {
                self.reg_write(z, imm << 16);
            }
            op_code::BEQ => {
                let taken = self.reg_access(z) == self.reg_access(x);
                self.note_branch(taken);
                if taken {
                    self.pc = (imm << 2).wrapping_sub(4);
                }
            }
            op_code::BNE => {
                let taken = self.reg_access(z) != self.reg_access(x);
                self.note_branch(taken);
                if taken {
                    self.pc = (imm << 2).wrapping_sub(4);
                }
            }
            op_code::LW => {
                let addr = self.reg_access(x).wrapping_add(imm);
                let v = self.mem_access(addr, false).unwrap_or(0);
                self.reg_write(z, v);
            }
            op_code::LB => {
                let addr = self.reg_access(x).wrapping_add(imm);
                let v = self.mem_access(addr, false).unwrap_or(0);
                let byte = (v >> ((addr % 4) * 8)) as u8;
                self.reg_write(z, byte as i8 as i32 as u32);
            }
            op_code::LBU => {
                let addr = self.reg_access(x).wrapping_add(imm);
                let v = self.mem_access(addr, false).unwrap_or(0);
                self.reg_write(z, (v >> ((addr % 4) * 8)) & 0xFF);
            }
            op_code::SW => {
                let addr = self.reg_access(x).wrapping_add(imm);
                let v = self.reg_access(z);
                self.mem_write(addr, v, 0xFFFF_FFFF);
            }
            op_code::SB => {
                let addr = self.reg_access(x).wrapping_add(imm);
                let lane = (addr % 4) * 8;
                let v = (self.reg_access(z) & 0xFF) << lane;
                self.mem_write(addr, v, 0xFF << lane);
            }
            op_code::SWI => {
                self.dispatch_swi(imm);
            }
            _ => {
                self.report_error(
                    ErrorKind::InvalidInstruction,
                    format!("0x{:X} is not a valid opcode for an instruction", inst.op),
                );
            }
        }
    }

    fn exec_j_type(&mut self, inst: &Decoded) {
        if inst.op == op_code::JAL {
            // the return address steps over the injected NOP
            let ret = self.pc.wrapping_add(8);
            self.reg_write(31, ret);
        }
        self.pc = (inst.target << 2).wrapping_sub(4);
    }

    fn note_branch(&mut self, taken: bool) {
        let info = self.branch_info.entry(self.pc).or_default();
        info.total += 1;
        if taken {
            info.taken += 1;
        }
    }
}

/// Run one emulation to completion. `seed` drives the scenario engine's
/// RNG and is recorded in the result for reproduction.
pub fn emulate(
    start_addr: u32,
    memory: SystemMemory,
    runtime_limit: u32,
    error_tolerance: usize,
    seed: u64,
) -> EmulationResult {
    Emulator::new(memory, runtime_limit, seed).run(start_addr, error_tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{assemble, AssembleOption, AssemblySettings};

    fn run(src: &str) -> EmulationResult {
        run_with(src, 100_000, 5)
    }

    fn run_with(src: &str, limit: u32, etol: usize) -> EmulationResult {
        let out = assemble(src, AssemblySettings::default(), AssembleOption::default());
        assert!(
            out.errors.is_empty(),
            "assembly failed: {:?}",
            out.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>()
        );
        emulate(out.text_start, out.memory, limit, etol, 1)
    }

    #[test]
    fn add_program() {
        let r = run("\n.text\naddi $1, $0, 5\naddi $2, $0, 7\nadd $3, $1, $2\n");
        assert_eq!(r.reg_read(3), Some(12));
        assert_eq!(r.di, 3);
        assert!(r.errors.is_empty());
    }

    #[test]
    fn addi_negative_immediate_wraps() {
        let r = run(".text\naddi $1, $0, -1\n");
        assert_eq!(r.reg_read(1), Some(0xFFFF_FFFF));
    }

    #[test]
    fn registers_seeded_at_reset() {
        let regs = RegisterFile::new();
        assert_eq!(regs.read(0), Some(0));
        assert_eq!(regs.read(29), Some(STACK_POINTER_SEED));
        assert_eq!(regs.read(31), Some(EXIT_PC));
        assert_eq!(regs.read(1), None);
        assert_eq!(regs.init_mask(), 0x1 | 0x1 << 29 | 0x1 << 31);
    }

    #[test]
    fn writes_to_zero_register_are_errors() {
        let r = run(".text\nadd $0, $31, $31\n");
        assert_eq!(r.errors.len(), 1);
        assert_eq!(r.errors[0].kind, ErrorKind::IllegalRegisterWrite);
        assert_eq!(r.reg_read(0), Some(0));
    }

    #[test]
    fn uninitialized_register_read_is_an_error() {
        let r = run(".text\nadd $2, $1, $1\n");
        assert_eq!(r.errors.len(), 2); // one per read
        assert!(r
            .errors
            .iter()
            .all(|e| e.kind == ErrorKind::UninitializedRegisterAccess));
        assert_eq!(r.reg_read(2), Some(0));
    }

    #[test]
    fn runtime_limit_halts_infinite_loop() {
        let r = run_with(".text\nloop: beq $0, $0, loop\n", 50, 5);
        assert_eq!(r.last_error_kind(), Some(ErrorKind::RuntimeLimitExceeded));
        assert!(r.di <= 51); // DI may overshoot the budget by one
    }

    #[test]
    fn branch_taken_jumps_to_label() {
        let r = run(".text\nbeq $0, $0, skip\naddi $1, $0, 1\nskip: addi $2, $0, 2\n");
        assert_eq!(r.reg_read(1), None); // skipped
        assert_eq!(r.reg_read(2), Some(2));
    }

    #[test]
    fn branch_analysis_counts_total_and_taken() {
        let r = run(concat!(
            ".text\n",
            "addi $1, $0, 2\n",
            "loop: addi $1, $1, -1\n",
            "bne $1, $0, loop\n",
        ));
        let info = r.branch_analysis[&0x1008];
        assert_eq!(info.total, 2);
        assert_eq!(info.taken, 1);
    }

    #[test]
    fn uninitialized_memory_read_reports_once() {
        let r = run(".text\nlui $1, 0x8000\nori $1, $1, 0\nlw $2, 0($1)\n");
        assert_eq!(r.di, 3);
        assert_eq!(r.errors.len(), 1);
        assert_eq!(r.errors[0].kind, ErrorKind::UninitializedMemoryAccess);
        // lui places the immediate in the upper half
        assert_eq!(r.reg_read(1), Some(0x8000_0000));
    }

    #[test]
    fn store_then_load_round_trips() {
        let r = run(".text\naddi $1, $0, 0x7F0\nsw $31, 0($1)\nlw $2, 0($1)\n");
        assert_eq!(r.reg_read(2), Some(EXIT_PC));
        assert_eq!(r.mem_read(0x7F0), Some(EXIT_PC));
    }

    #[test]
    fn byte_store_touches_one_lane() {
        let r = run(concat!(
            ".text\n",
            "addi $1, $0, 0x100\n",
            "sw $0, 0($1)\n",
            "addi $2, $0, 0xAB\n",
            "sb $2, 1($1)\n",
            "lw $3, 0($1)\n",
            "lbu $4, 1($1)\n",
            "lb $5, 1($1)\n",
        ));
        assert_eq!(r.reg_read(3), Some(0x0000_AB00));
        assert_eq!(r.reg_read(4), Some(0xAB));
        assert_eq!(r.reg_read(5), Some(0xFFFF_FFAB)); // sign-extended
    }

    #[test]
    fn jal_writes_return_address_and_jr_returns() {
        let r = run(concat!(
            ".text\n",
            "add $20, $31, $0\n", // save the exit sentinel
            "jal sub\n",
            "addi $2, $0, 2\n",
            "jr $20\n",
            "sub: addi $1, $0, 1\n",
            "jr $31\n",
        ));
        assert!(r.errors.is_empty());
        assert_eq!(r.reg_read(1), Some(1));
        assert_eq!(r.reg_read(2), Some(2));
        // jal at 0x1004 stores pc + 8, stepping over the injected NOP
        assert_eq!(r.reg_read(31), Some(0x100C));
    }

    #[test]
    fn mult_and_move_from_hi_lo() {
        let r = run(concat!(
            ".text\n",
            "addi $1, $0, -3\n",
            "addi $2, $0, 4\n",
            "mult $1, $2\n",
            "mflo $3\n",
            "mfhi $4\n",
        ));
        assert_eq!(r.reg_read(3), Some((-12i32) as u32));
        assert_eq!(r.reg_read(4), Some(0xFFFF_FFFF));
        assert!(r.errors.is_empty());
    }

    #[test]
    fn div_quotient_and_remainder() {
        let r = run(concat!(
            ".text\n",
            "addi $1, $0, 17\n",
            "addi $2, $0, 5\n",
            "div $1, $2\n",
            "mflo $3\n",
            "mfhi $4\n",
        ));
        assert_eq!(r.reg_read(3), Some(3));
        assert_eq!(r.reg_read(4), Some(2));
    }

    #[test]
    fn division_by_zero_is_reported() {
        let r = run(".text\naddi $1, $0, 9\ndiv $1, $0\n");
        assert_eq!(r.errors.len(), 1);
        assert_eq!(r.errors[0].kind, ErrorKind::InvalidInstruction);
    }

    #[test]
    fn mfhi_before_mult_is_an_error() {
        let r = run(".text\nmfhi $1\n");
        assert_eq!(r.errors.len(), 1);
        assert_eq!(r.errors[0].kind, ErrorKind::HiLoUninitializedAccess);
        assert_eq!(r.reg_read(1), Some(0));
    }

    #[test]
    fn shifts_execute_at_both_bounds() {
        let r = run(concat!(
            ".text\n",
            "addi $1, $0, 1\n",
            "sll $2, $1, 31\n",
            "sll $3, $1, 0\n",
            "srl $4, $2, 31\n",
            "sra $5, $2, 31\n",
        ));
        assert_eq!(r.reg_read(2), Some(0x8000_0000));
        assert_eq!(r.reg_read(3), Some(1));
        assert_eq!(r.reg_read(4), Some(1));
        assert_eq!(r.reg_read(5), Some(0xFFFF_FFFF));
    }

    #[test]
    fn variable_shift_over_31_reports_and_masks() {
        let r = run(concat!(
            ".text\n",
            "addi $1, $0, 1\n",
            "addi $2, $0, 33\n",
            "sllv $3, $1, $2\n",
        ));
        assert_eq!(r.errors.len(), 1);
        assert_eq!(r.errors[0].kind, ErrorKind::ShiftOverflow);
        assert_eq!(r.reg_read(3), Some(2)); // 33 & 0x1F == 1
    }

    #[test]
    fn slt_family_compares_as_documented() {
        let r = run(concat!(
            ".text\n",
            "addi $1, $0, -1\n",
            "slti $2, $1, 0\n",   // signed: -1 < 0
            "sltiu $3, $1, 0\n",  // unsigned: 0xFFFFFFFF < 0 is false
            "addi $4, $0, 3\n",
            "slt $5, $4, $1\n",   // 3 < -1 is false
            "sltu $6, $4, $1\n",  // 3 < 0xFFFFFFFF is true
        ));
        assert_eq!(r.reg_read(2), Some(1));
        assert_eq!(r.reg_read(3), Some(0));
        assert_eq!(r.reg_read(5), Some(0));
        assert_eq!(r.reg_read(6), Some(1));
    }

    #[test]
    fn error_tolerance_halts_emulation() {
        // every iteration reads an uninitialized register
        let r = run_with(".text\nloop: add $2, $1, $1\nbeq $0, $0, loop\n", 1000, 5);
        assert_eq!(r.last_error_kind(), Some(ErrorKind::ErrorLimitReached));
        assert!(r.errors.len() >= 5);
    }

    #[test]
    fn fetch_past_initialized_text_halts_cleanly() {
        // jump into unmapped space; the failed fetch ends the run
        let r = run_with(".text\nj 0x4000\n", 100, 3);
        assert!(r.errors.is_empty());
        assert_eq!(r.di, 1);
    }

    #[test]
    fn unknown_swi_codes_are_ignored() {
        let r = run(".text\nswi 9999\n");
        assert!(r.errors.is_empty());
        assert!(r.context.is_none());
        assert_eq!(r.di, 1);
    }

    #[test]
    fn program_can_rewrite_its_own_text() {
        // store a word into the delay slot... of the program itself:
        // overwrite the upcoming instruction with `addi $5, $0, 7`
        let patch = crate::isa::encode_i(op_code::ADDI, 5, 0, 7);
        let src = format!(
            ".text\nlui $1, {}\nori $1, $1, {}\naddi $2, $0, 0x1010\nsw $1, 0($2)\nnop\n",
            (patch >> 16) & 0xFFFF,
            patch & 0xFFFF,
        );
        let r = run(&src);
        assert_eq!(r.reg_read(5), Some(7));
    }

    #[test]
    fn two_strike_data_cache_policy() {
        let out = assemble(
            // two data pages, plus enough stores to initialize both
            ".data\na: .alloc 1024\nb: .alloc 1024\n.text\nnop\n",
            AssemblySettings::default(),
            AssembleOption::default(),
        );
        assert!(out.errors.is_empty());
        let mut emu = Emulator::new(out.memory, 100, 7);
        let page_a = 0x8000u32;
        let page_b = 0x9000u32;

        // first data access: miss, loads nothing, sets the strike flag
        assert!(emu.mem_access(page_a, false).is_some());
        assert!(emu.dcache.is_none());
        assert!(emu.d_missed);

        // second consecutive miss: the data cache is replaced
        assert!(emu.mem_access(page_b, false).is_some());
        assert_eq!(
            emu.dcache.as_ref().map(|p| p.borrow().page_id()),
            Some(page_b >> 12)
        );

        // a hit on the cached page clears the strike flag
        assert!(emu.mem_access(page_b + 4, false).is_some());
        assert!(!emu.d_missed);

        // a single miss at the page boundary does not evict
        assert!(emu.mem_access(page_a + 4, false).is_some());
        assert!(emu.d_missed);
        assert_eq!(
            emu.dcache.as_ref().map(|p| p.borrow().page_id()),
            Some(page_b >> 12)
        );
    }

    #[test]
    fn cache_writes_alias_backing_pages() {
        let out = assemble(
            ".data\na: .alloc 1024\n.text\nnop\n",
            AssemblySettings::default(),
            AssembleOption::default(),
        );
        let mut emu = Emulator::new(out.memory, 100, 7);
        // pull the page into the data cache (two strikes)
        emu.mem_access(0x8000, false);
        emu.mem_access(0x8000, false);
        emu.mem_write(0x8010, 0x55, 0xFFFF_FFFF);
        // read bypassing the cache: the backing page must see the write
        assert_eq!(emu.memory.read(0x8010), Some(0x55));
    }

    #[test]
    fn di_stays_within_budget_plus_one() {
        for limit in [0u32, 1, 10] {
            let r = run_with(".text\nloop: beq $0, $0, loop\n", limit, 50);
            assert!(r.di <= limit + 1, "di={} limit={}", r.di, limit);
        }
    }
}
