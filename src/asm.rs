//! Two-pass assembler for the MIPS-1 subset.
//!
//! The source is split into a data queue and a text queue by the `.data`
//! and `.text` directives. The data pass lays out directives and binds
//! data labels; text pass 1 walks instruction lines to bind text labels
//! (a `jal` occupies two words because a NOP is injected after it); text
//! pass 2 tokenizes each line through the pest grammar and emits machine
//! words. Errors are collected, not short-circuited: the assembler keeps
//! going so one run reports everything it can.

use std::collections::HashMap;

use tracing::debug;

use crate::isa::{encode_i, encode_j, encode_r, fn_code, op_code};
use crate::mem::SystemMemory;
use crate::object::{AsmError, Assembled, LabelMap, MemoryImage, SourceLine};
use crate::parse::{self, Operand, TextLine};

#[derive(Debug, Clone, Copy)]
pub struct AssemblySettings {
    /// Start of the text segment; must be a multiple of 4.
    pub text_start: u32,
    /// Start of the data segment; must be a multiple of 4.
    pub data_start: u32,
}

impl Default for AssemblySettings {
    fn default() -> Self {
        Self {
            text_start: 0x1000,
            data_start: 0x8000,
        }
    }
}

#[derive(Default)]
pub struct AssembleOption {
    verbose: bool,
}

impl AssembleOption {
    pub fn set_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

const SPACE_BYTE_CAP: u32 = 65536 * 4;
const ALLOC_WORD_CAP: u32 = 65536;

/// Transform assembly source into a paged memory image plus metadata.
/// Deterministic for any fixed source; a non-empty error list means the
/// output memory must not be emulated.
pub fn assemble(src: &str, settings: AssemblySettings, option: AssembleOption) -> Assembled {
    let mut asm = Assembler {
        settings,
        option,
        labels: LabelMap::new(),
        errors: Vec::new(),
    };

    let (data_lines, text_lines) = split_sections(src);
    let data_image = asm.assemble_data(&data_lines);
    let parsed_text = asm.parse_text(&text_lines);
    asm.extract_text_labels(&parsed_text);
    let (text_image, line_map) = asm.assemble_text(&parsed_text);

    if text_image.overlaps(&data_image) {
        asm.error(
            &SourceLine {
                number: 0,
                text: "{overall file}".to_string(),
            },
            "assembled text and data memory overlaps, change the settings and assemble again",
        );
    }

    let mut memory = SystemMemory::new();
    memory.insert_image(&text_image);
    memory.insert_image(&data_image);

    Assembled {
        memory,
        labels: asm.labels,
        lines: line_map,
        errors: asm.errors,
        text_start: asm.settings.text_start,
    }
}

enum Section {
    None,
    Data,
    Text,
}

fn split_sections(src: &str) -> (Vec<SourceLine>, Vec<SourceLine>) {
    let mut section = Section::None;
    let mut data = Vec::new();
    let mut text = Vec::new();

    for (i, raw) in src.split('\n').enumerate() {
        let mut line = raw.trim_matches([' ', '\t', '\r']).replace('\t', " ");

        for (directive, next) in [(".data", Section::Data), (".text", Section::Text)] {
            if line == directive || line.starts_with(&format!("{directive} ")) {
                section = next;
                line = line[directive.len()..].trim_start().to_string();
                break;
            }
        }
        if line.is_empty() {
            continue;
        }

        let source = SourceLine {
            number: i + 1, // lines are 1-indexed
            text: line,
        };
        match section {
            Section::Data => data.push(source),
            Section::Text => text.push(source),
            Section::None => {}
        }
    }

    (data, text)
}

fn strip_comment(line: &str) -> &str {
    line.split('#')
        .next()
        .unwrap_or_default()
        .trim_matches([' ', '\t'])
}

struct Assembler {
    settings: AssemblySettings,
    option: AssembleOption,
    labels: LabelMap,
    errors: Vec<AsmError>,
}

impl Assembler {
    fn error(&mut self, line: &SourceLine, message: &str) {
        self.errors.push(AsmError {
            line: line.clone(),
            message: message.to_string(),
        });
    }

    fn literal(&mut self, s: &str, line: &SourceLine) -> u32 {
        match crate::utils::parse_literal(s, &self.labels) {
            Ok(v) => v,
            Err(e) => {
                self.error(line, &e.to_string());
                0
            }
        }
    }

    // ---- data pass -------------------------------------------------------

    fn assemble_data(&mut self, lines: &[SourceLine]) -> MemoryImage {
        let mut image = MemoryImage::new(self.settings.data_start);
        let mut cursor = self.settings.data_start;

        for line in lines {
            let stripped = strip_comment(&line.text);
            if stripped.is_empty() {
                continue;
            }

            let parsed = match parse::parse_data_line(stripped) {
                Ok(p) => p,
                Err(e) => {
                    debug!(line = line.number, "data line rejected: {e}");
                    self.error(
                        line,
                        "invalid data allocation, expected \"LabelName: .dataType value\"",
                    );
                    continue;
                }
            };

            if parsed.values.is_empty() {
                self.error(
                    line,
                    "data allocations must have at least 3 terms, expected \
                     \"LabelName: .dataType value\"",
                );
                continue;
            }

            if self.labels.contains_key(&parsed.label) {
                self.error(line, &format!("label \"{}\" already declared", parsed.label));
            }

            match parsed.directive.to_ascii_lowercase().as_str() {
                ".byte" => {
                    self.labels.insert(parsed.label.clone(), cursor);
                    for value in &parsed.values {
                        let v = self.literal(value, line);
                        if v > 0xFF && v < 0xFFFF_FF80 {
                            // outside [-128, 255]
                            self.error(line, &format!("\"{value}\" overflows a byte"));
                        }
                        image.insert(cursor, v & 0xFF);
                        cursor += 1;
                    }
                }
                ".halfword" => {
                    cursor = (cursor + 1) & !0x1;
                    self.labels.insert(parsed.label.clone(), cursor);
                    for value in &parsed.values {
                        let v = self.literal(value, line);
                        if v > 0xFFFF && v < 0xFFFF_8000 {
                            // outside 16-bit signed or unsigned range
                            self.error(line, &format!("\"{value}\" overflows a half word"));
                        }
                        image.insert(cursor, v & 0xFFFF);
                        cursor += 2;
                    }
                }
                ".word" => {
                    cursor = (cursor + 3) & !0x3;
                    self.labels.insert(parsed.label.clone(), cursor);
                    for value in &parsed.values {
                        let v = self.literal(value, line);
                        image.insert(cursor, v);
                        cursor += 4;
                    }
                }
                ".space" => {
                    self.labels.insert(parsed.label.clone(), cursor);
                    if parsed.values.len() != 1 {
                        self.error(line, ".space takes a single byte count");
                        continue;
                    }
                    let v = self.literal(&parsed.values[0], line);
                    if v >= SPACE_BYTE_CAP {
                        self.error(line, "allocations larger than 256KiB are prohibited");
                        continue;
                    }
                    for offset in 0..v {
                        image.insert(cursor + offset, 0);
                    }
                    cursor += v;
                }
                ".alloc" => {
                    cursor = (cursor + 3) & !0x3;
                    self.labels.insert(parsed.label.clone(), cursor);
                    if parsed.values.len() != 1 {
                        self.error(line, ".alloc takes a single word count");
                        continue;
                    }
                    let v = self.literal(&parsed.values[0], line);
                    if v >= ALLOC_WORD_CAP {
                        self.error(line, "allocations larger than 256KiB are prohibited");
                        continue;
                    }
                    for offset in 0..v {
                        image.insert(cursor + offset * 4, 0);
                    }
                    cursor += v * 4;
                }
                _ => {
                    self.error(
                        line,
                        "invalid data type. Valid data types are \
                         .byte, .halfword, .word, .space, and .alloc",
                    );
                    // bind the label anyway to avoid cascading errors in
                    // the text passes
                    self.labels.insert(parsed.label.clone(), cursor);
                }
            }
        }

        image
    }

    // ---- text passes -----------------------------------------------------

    fn parse_text(&mut self, lines: &[SourceLine]) -> Vec<(SourceLine, Option<TextLine>)> {
        lines
            .iter()
            .map(|line| match parse::parse_text_line(&line.text) {
                Ok(t) => (line.clone(), Some(t)),
                Err(e) => {
                    debug!(line = line.number, "text line rejected: {e}");
                    (line.clone(), None)
                }
            })
            .collect()
    }

    /// Pass 1: bind text labels, advancing 4 bytes per instruction line
    /// and 8 for `jal` (the emitted NOP counts).
    fn extract_text_labels(&mut self, parsed: &[(SourceLine, Option<TextLine>)]) {
        let mut addr = self.settings.text_start;
        for (line, text) in parsed {
            let Some(text) = text else {
                addr += 4; // an unparsable line still occupies a word
                continue;
            };
            if let Some(label) = &text.label {
                if text.mnemonic.is_none() {
                    self.error(line, "cannot declare labels on lines without assembly operations");
                }
                if self.labels.contains_key(label) {
                    self.error(line, &format!("label \"{label}\" already declared"));
                }
                self.labels.insert(label.clone(), addr);
            }
            if let Some(mnemonic) = &text.mnemonic {
                addr += 4;
                if mnemonic.eq_ignore_ascii_case("jal") {
                    addr += 4;
                }
            }
        }
    }

    /// Pass 2: emit machine words against the full label table.
    fn assemble_text(
        &mut self,
        parsed: &[(SourceLine, Option<TextLine>)],
    ) -> (MemoryImage, HashMap<u32, SourceLine>) {
        let mut image = MemoryImage::new(self.settings.text_start);
        let mut line_map = HashMap::new();
        let mut addr = self.settings.text_start;

        for (line, text) in parsed {
            let (mnemonic, operands) = match text {
                Some(t) => match &t.mnemonic {
                    Some(m) => (m.as_str(), t.operands.as_slice()),
                    None => continue, // empty or label-only line
                },
                None => {
                    self.error(line, "invalid instruction syntax");
                    image.insert(addr, 0);
                    line_map.insert(addr, line.clone());
                    addr += 4;
                    continue;
                }
            };

            let lower = mnemonic.to_ascii_lowercase();
            let word = self.encode_instruction(&lower, mnemonic, operands, line);
            if self.option.verbose {
                debug!("{addr:#08x}: {word:08x} {}", line.text);
            }
            image.insert(addr, word);
            line_map.insert(addr, line.clone());
            if lower == "jal" {
                addr += 4;
                image.insert(addr, 0);
            }
            addr += 4;
        }

        (image, line_map)
    }

    fn encode_instruction(
        &mut self,
        lower: &str,
        raw: &str,
        ops: &[Operand],
        line: &SourceLine,
    ) -> u32 {
        match lower {
            "add" => {
                let r = self.extract_r_type(ops, line, 3);
                encode_r(r[1], r[2], r[0], 0, fn_code::ADD)
            }
            "addu" => {
                let r = self.extract_r_type(ops, line, 3);
                encode_r(r[1], r[2], r[0], 0, fn_code::ADDU)
            }
            "sub" => {
                let r = self.extract_r_type(ops, line, 3);
                encode_r(r[1], r[2], r[0], 0, fn_code::SUB)
            }
            "subu" => {
                let r = self.extract_r_type(ops, line, 3);
                encode_r(r[1], r[2], r[0], 0, fn_code::SUBU)
            }
            "and" => {
                let r = self.extract_r_type(ops, line, 3);
                encode_r(r[1], r[2], r[0], 0, fn_code::AND)
            }
            "or" => {
                let r = self.extract_r_type(ops, line, 3);
                encode_r(r[1], r[2], r[0], 0, fn_code::OR)
            }
            "xor" => {
                let r = self.extract_r_type(ops, line, 3);
                encode_r(r[1], r[2], r[0], 0, fn_code::XOR)
            }
            "slt" => {
                let r = self.extract_r_type(ops, line, 3);
                encode_r(r[1], r[2], r[0], 0, fn_code::SLT)
            }
            "sltu" => {
                let r = self.extract_r_type(ops, line, 3);
                encode_r(r[1], r[2], r[0], 0, fn_code::SLTU)
            }
            "sllv" => {
                let r = self.extract_r_type(ops, line, 3);
                encode_r(r[1], r[2], r[0], 0, fn_code::SLLV)
            }
            "srlv" => {
                let r = self.extract_r_type(ops, line, 3);
                encode_r(r[1], r[2], r[0], 0, fn_code::SRLV)
            }
            "srav" => {
                let r = self.extract_r_type(ops, line, 3);
                encode_r(r[1], r[2], r[0], 0, fn_code::SRAV)
            }
            "addi" => {
                let (regs, imm) = self.extract_standard_i(ops, line, 0xFFFF_0000, true);
                encode_i(op_code::ADDI, regs[0], regs[1], imm)
            }
            "addiu" => {
                let (regs, imm) = self.extract_standard_i(ops, line, 0xFFFF_0000, true);
                encode_i(op_code::ADDIU, regs[0], regs[1], imm)
            }
            "andi" => {
                let (regs, imm) = self.extract_standard_i(ops, line, 0xFFFF_0000, false);
                encode_i(op_code::ANDI, regs[0], regs[1], imm)
            }
            "ori" => {
                let (regs, imm) = self.extract_standard_i(ops, line, 0xFFFF_0000, false);
                encode_i(op_code::ORI, regs[0], regs[1], imm)
            }
            "slti" => {
                let (regs, imm) = self.extract_standard_i(ops, line, 0xFFFF_0000, true);
                encode_i(op_code::SLTI, regs[0], regs[1], imm)
            }
            "sltiu" => {
                let (regs, imm) = self.extract_standard_i(ops, line, 0xFFFF_0000, false);
                encode_i(op_code::SLTIU, regs[0], regs[1], imm)
            }
            "beq" => {
                // branch targets are packed as address / 4; an 18-bit
                // mask covers the pre-division range
                let (regs, imm) = self.extract_standard_i(ops, line, 0xFFFC_0000, false);
                encode_i(op_code::BEQ, regs[0], regs[1], imm / 4)
            }
            "bne" => {
                let (regs, imm) = self.extract_standard_i(ops, line, 0xFFFC_0000, false);
                encode_i(op_code::BNE, regs[0], regs[1], imm / 4)
            }
            "sll" => {
                let (regs, v) = self.extract_standard_i(ops, line, 0xFFFF_0000, false);
                let v = self.check_shift(v, line);
                encode_r(regs[1], 0, regs[0], v, fn_code::SLL)
            }
            "srl" => {
                let (regs, v) = self.extract_standard_i(ops, line, 0xFFFF_0000, false);
                let v = self.check_shift(v, line);
                encode_r(regs[1], 0, regs[0], v, fn_code::SRL)
            }
            "sra" => {
                let (regs, v) = self.extract_standard_i(ops, line, 0xFFFF_0000, false);
                let v = self.check_shift(v, line);
                encode_r(regs[1], 0, regs[0], v, fn_code::SRA)
            }
            "jr" => {
                let r = self.extract_r_type(ops, line, 1);
                encode_r(r[0], 0, 0, 0, fn_code::JR)
            }
            "mfhi" => {
                let r = self.extract_r_type(ops, line, 1);
                encode_r(r[0], 0, r[0], 0, fn_code::MFHI)
            }
            "mflo" => {
                let r = self.extract_r_type(ops, line, 1);
                encode_r(r[0], 0, r[0], 0, fn_code::MFLO)
            }
            "mult" => {
                let r = self.extract_r_type(ops, line, 2);
                encode_r(r[0], r[1], r[0], 0, fn_code::MULT)
            }
            "multu" => {
                let r = self.extract_r_type(ops, line, 2);
                encode_r(r[0], r[1], r[0], 0, fn_code::MULTU)
            }
            "div" => {
                let r = self.extract_r_type(ops, line, 2);
                encode_r(r[0], r[1], r[0], 0, fn_code::DIV)
            }
            "divu" => {
                let r = self.extract_r_type(ops, line, 2);
                encode_r(r[0], r[1], r[0], 0, fn_code::DIVU)
            }
            "lw" => {
                let (regs, v) = self.extract_special_i(ops, line);
                encode_i(op_code::LW, regs[0], regs[1], v)
            }
            "lb" => {
                let (regs, v) = self.extract_special_i(ops, line);
                encode_i(op_code::LB, regs[0], regs[1], v)
            }
            "lbu" => {
                let (regs, v) = self.extract_special_i(ops, line);
                encode_i(op_code::LBU, regs[0], regs[1], v)
            }
            "sw" => {
                let (regs, v) = self.extract_special_i(ops, line);
                encode_i(op_code::SW, regs[0], regs[1], v)
            }
            "sb" => {
                let (regs, v) = self.extract_special_i(ops, line);
                encode_i(op_code::SB, regs[0], regs[1], v)
            }
            "lui" => {
                let (reg, v) = self.extract_lui(ops, line);
                encode_i(op_code::LUI, reg, 0, v)
            }
            "j" => {
                let v = self.jump_target(ops, line);
                encode_j(op_code::J, v / 4)
            }
            "jal" => {
                let v = self.jump_target(ops, line);
                encode_j(op_code::JAL, v / 4)
            }
            "swi" => {
                let v = self.jump_target(ops, line);
                encode_i(op_code::SWI, 0, 0, v)
            }
            "nop" => 0,
            _ => {
                self.error(
                    line,
                    &format!(
                        "invalid opcode \"{raw}\". Note that this assembler only supports \
                         the MIPS core ISA and does not support pseudo-opcodes"
                    ),
                );
                0
            }
        }
    }

    // ---- operand extraction ---------------------------------------------

    fn register_from_str(&mut self, s: &str, line: &SourceLine) -> Option<u32> {
        if s.is_empty() {
            self.error(line, "missing register, cannot omit registers");
            return None;
        }
        let Some(rest) = s.strip_prefix(['$', 't']) else {
            self.error(line, "registers are marked with a preceding '$' or 't'");
            return None;
        };
        let Ok(v) = rest.parse::<u32>() else {
            self.error(
                line,
                &format!("the specified register \"{s}\" is not a valid numeric register"),
            );
            return None;
        };
        if v > 31 {
            self.error(line, "invalid register. Registers are between $0 and $31");
            return None;
        }
        Some(v)
    }

    fn register(&mut self, op: &Operand, line: &SourceLine) -> Option<u32> {
        match op {
            Operand::Reg(s) | Operand::Literal(s) => self.register_from_str(s, line),
            Operand::Mem { .. } => {
                self.error(line, "registers are marked with a preceding '$' or 't'");
                None
            }
        }
    }

    fn literal_operand(&mut self, op: &Operand, line: &SourceLine) -> u32 {
        match op {
            Operand::Reg(s) | Operand::Literal(s) => self.literal(s, line),
            Operand::Mem { .. } => {
                self.error(line, "expected a literal value, got a memory operand");
                0
            }
        }
    }

    fn extract_r_type(&mut self, ops: &[Operand], line: &SourceLine, num: usize) -> [u32; 3] {
        if ops.len() != num {
            let message = match num {
                3 => {
                    "this register-type instruction must have 3 registers in the form \
                     \"opcode $1, $2, $3\""
                }
                2 => {
                    "this register-type instruction must have 2 registers in the form \
                     \"opcode $1, $2\""
                }
                _ => {
                    "this register-type instruction must have 1 register in the form \
                     \"opcode $1\""
                }
            };
            self.error(line, message);
            return [0; 3];
        }

        let mut ret = [0u32; 3];
        for (i, op) in ops.iter().enumerate() {
            match self.register(op, line) {
                Some(v) => ret[i] = v,
                None => return [0; 3],
            }
        }
        ret
    }

    /// `opcode $1, $2, value`. The `_signed` flag distinguishes
    /// sign-extending immediates; it is carried for future range
    /// enforcement and does not currently affect validation.
    fn extract_standard_i(
        &mut self,
        ops: &[Operand],
        line: &SourceLine,
        max_mask: u32,
        _signed: bool,
    ) -> ([u32; 2], u32) {
        if ops.len() != 3 {
            self.error(
                line,
                "immediate-type instructions must have 2 registers and one immediate \
                 in the form \"opcode $1, $2, [value]\"",
            );
            return ([0; 2], 0);
        }

        let mut regs = [0u32; 2];
        for i in 0..2 {
            match self.register(&ops[i], line) {
                Some(v) => regs[i] = v,
                None => return ([0; 2], 0),
            }
        }

        let v = self.literal_operand(&ops[2], line);
        if (v & max_mask) != max_mask && (v & max_mask) != 0x0 {
            self.error(line, "immediate value does not fit into 16 bits");
            return (regs, 0);
        }

        (regs, v)
    }

    /// `opcode $1, literal($2)`.
    fn extract_special_i(&mut self, ops: &[Operand], line: &SourceLine) -> ([u32; 2], u32) {
        if ops.len() != 2 {
            self.error(
                line,
                "invalid format. This instruction requires the format \
                 \"opcode $1, literal($2)\"",
            );
            return ([0; 2], 0);
        }

        let mut regs = [0u32; 2];
        match self.register(&ops[0], line) {
            Some(v) => regs[0] = v,
            None => return ([0; 2], 0),
        }

        let Operand::Mem { offset, base } = &ops[1] else {
            self.error(
                line,
                "invalid format, missing parenthesis-wrapped register. This instruction \
                 requires the format \"opcode $1, literal($2)\"",
            );
            return ([0; 2], 0);
        };
        let (offset, base) = (offset.clone(), base.clone());
        match self.register_from_str(&base, line) {
            Some(v) => regs[1] = v,
            None => return ([0; 2], 0),
        }

        let v = self.literal(&offset, line);
        (regs, v)
    }

    fn extract_lui(&mut self, ops: &[Operand], line: &SourceLine) -> (u32, u32) {
        if ops.len() != 2 {
            self.error(
                line,
                "LUI instructions must have 1 register and one immediate \
                 in the form \"lui $1, [value]\"",
            );
            return (0, 0);
        }
        let Some(reg) = self.register(&ops[0], line) else {
            return (0, 0);
        };
        let v = self.literal_operand(&ops[1], line);
        if (v & 0xFFFF_0000) != 0xFFFF_0000 && (v & 0xFFFF_0000) != 0x0 {
            self.error(line, "immediate value does not fit into 16 bits");
            return (reg, 0);
        }
        (reg, v)
    }

    fn jump_target(&mut self, ops: &[Operand], line: &SourceLine) -> u32 {
        match ops.first() {
            Some(op) => self.literal_operand(op, line),
            None => {
                self.error(line, "expected a literal, got nothing");
                0
            }
        }
    }

    fn check_shift(&mut self, v: u32, line: &SourceLine) -> u32 {
        if v > 31 {
            self.error(
                line,
                "cannot shift by more than 31 bits and cannot be a negative number",
            );
            v & 0x1F
        } else {
            v
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa;

    fn asm(src: &str) -> Assembled {
        assemble(src, AssemblySettings::default(), AssembleOption::default())
    }

    fn asm_ok(src: &str) -> Assembled {
        let out = asm(src);
        assert!(
            out.errors.is_empty(),
            "unexpected assembly errors: {:?}",
            out.errors.iter().map(|e| e.to_string()).collect::<Vec<_>>()
        );
        out
    }

    #[test]
    fn three_instruction_program() {
        let out = asm_ok("\n.text\naddi $1, $0, 5\naddi $2, $0, 7\nadd $3, $1, $2\n");
        assert_eq!(
            out.memory.read(0x1000),
            Some(isa::encode_i(op_code::ADDI, 1, 0, 5))
        );
        assert_eq!(
            out.memory.read(0x1004),
            Some(isa::encode_i(op_code::ADDI, 2, 0, 7))
        );
        assert_eq!(
            out.memory.read(0x1008),
            Some(isa::encode_r(1, 2, 3, 0, fn_code::ADD))
        );
        assert_eq!(out.static_instruction_count(), 3);
    }

    #[test]
    fn assembly_is_deterministic() {
        let src = ".data\nbuf: .alloc 4\n.text\nlw $2, buf($0)\nsw $2, 0($29)\n";
        let a = asm_ok(src);
        let b = asm_ok(src);
        assert_eq!(a.labels, b.labels);
        for addr in a.lines.keys() {
            assert_eq!(a.memory.read(*addr), b.memory.read(*addr));
        }
    }

    #[test]
    fn labels_and_branch_encoding() {
        let out = asm_ok(".text\nstart: addi $1, $0, 1\nbeq $1, $0, start\n");
        assert_eq!(out.labels["start"], 0x1000);
        // branch immediate holds target address / 4
        assert_eq!(
            out.memory.read(0x1004),
            Some(isa::encode_i(op_code::BEQ, 1, 0, 0x1000 / 4))
        );
    }

    #[test]
    fn jal_injects_a_nop_and_shifts_following_labels() {
        let out = asm_ok(".text\njal sub\naddi $1, $0, 1\nsub: addi $2, $0, 2\n");
        assert_eq!(out.labels["sub"], 0x100C);
        assert_eq!(
            out.memory.read(0x1000),
            Some(isa::encode_j(op_code::JAL, 0x100C / 4))
        );
        assert_eq!(out.memory.read(0x1004), Some(0)); // injected NOP
        assert_eq!(
            out.memory.read(0x1008),
            Some(isa::encode_i(op_code::ADDI, 1, 0, 1))
        );
    }

    #[test]
    fn register_aliases_and_case() {
        let out = asm_ok(".text\nADD t3, t1, t2\n");
        assert_eq!(out.memory.read(0x1000), Some(isa::encode_r(1, 2, 3, 0, fn_code::ADD)));
    }

    #[test]
    fn memory_operands() {
        let out = asm_ok(".data\nbuf: .alloc 2\n.text\nlw $2, buf($0)\nsw $2, 4(t0)\n");
        assert_eq!(
            out.memory.read(0x1000),
            Some(isa::encode_i(op_code::LW, 2, 0, 0x8000))
        );
        assert_eq!(
            out.memory.read(0x1004),
            Some(isa::encode_i(op_code::SW, 2, 0, 4))
        );
    }

    #[test]
    fn shift_encoding_and_bounds() {
        let out = asm_ok(".text\nsll $1, $2, 31\nsll $1, $2, 0\n");
        assert_eq!(
            out.memory.read(0x1000),
            Some(isa::encode_r(2, 0, 1, 31, fn_code::SLL))
        );
        assert_eq!(
            out.memory.read(0x1004),
            Some(isa::encode_r(2, 0, 1, 0, fn_code::SLL))
        );

        let bad = asm(".text\nsll $1, $2, 32\n");
        assert_eq!(bad.error_count(), 1);
    }

    #[test]
    fn swi_and_jumps() {
        let out = asm_ok(".text\nloop: swi 582\nj loop\n");
        assert_eq!(
            out.memory.read(0x1000),
            Some(isa::encode_i(op_code::SWI, 0, 0, 582))
        );
        assert_eq!(
            out.memory.read(0x1004),
            Some(isa::encode_j(op_code::J, 0x1000 / 4))
        );
    }

    #[test]
    fn lui_takes_full_upper_range() {
        let out = asm_ok(".text\nlui $1, 0x8000\n");
        assert_eq!(
            out.memory.read(0x1000),
            Some(isa::encode_i(op_code::LUI, 1, 0, 0x8000))
        );
    }

    #[test]
    fn immediate_overflow_is_an_error() {
        assert_eq!(asm(".text\naddi $1, $0, 0x10000\n").error_count(), 1);
        assert_eq!(asm(".text\naddi $1, $0, -1\n").error_count(), 0);
        assert_eq!(asm(".text\nandi $1, $0, 0xFFFF\n").error_count(), 0);
    }

    #[test]
    fn duplicate_labels_are_an_error() {
        let out = asm(".data\nlabel: .word 1\nlabel: .word 2\n");
        assert_eq!(out.error_count(), 1);

        let out = asm(".text\nx: nop\nx: nop\n");
        assert_eq!(out.error_count(), 1);

        let out = asm(".data\ny: .word 1\n.text\ny: nop\n");
        assert_eq!(out.error_count(), 1);
    }

    #[test]
    fn label_on_empty_text_line_is_an_error() {
        let out = asm(".text\nnothing:\n");
        assert_eq!(out.error_count(), 1);
    }

    #[test]
    fn invalid_registers_are_errors() {
        assert_eq!(asm(".text\nadd $32, $0, $0\n").error_count(), 1);
        assert_eq!(asm(".text\nadd x1, $0, $0\n").error_count(), 1);
        assert_eq!(asm(".text\nadd $1, $0\n").error_count(), 1);
    }

    #[test]
    fn unknown_mnemonic_is_an_error() {
        let out = asm(".text\nmove $1, $2\n");
        assert_eq!(out.error_count(), 1);
        assert!(out.errors[0].message.contains("invalid opcode"));
    }

    #[test]
    fn byte_directive_layout_and_range() {
        let out = asm_ok(".data\nbytes: .byte 1, 2, -1, 255\n");
        assert_eq!(out.labels["bytes"], 0x8000);
        // little-end lane order: 1, 2, 0xFF, 0xFF
        assert_eq!(out.memory.read(0x8000), Some(0xFFFF_0201));

        assert_eq!(asm(".data\nb: .byte -128\n").error_count(), 0);
        assert_eq!(asm(".data\nb: .byte 255\n").error_count(), 0);
        assert_eq!(asm(".data\nb: .byte 256\n").error_count(), 1);
        assert_eq!(asm(".data\nb: .byte -129\n").error_count(), 1);
    }

    #[test]
    fn halfword_aligns_and_checks_range() {
        let out = asm_ok(".data\nb: .byte 1\nh: .halfword 0x1234\n");
        assert_eq!(out.labels["b"], 0x8000);
        assert_eq!(out.labels["h"], 0x8002);
        assert_eq!(out.memory.read(0x8000), Some(0x1234_0001));

        assert_eq!(asm(".data\nh: .halfword 65535\n").error_count(), 0);
        assert_eq!(asm(".data\nh: .halfword -32768\n").error_count(), 0);
        assert_eq!(asm(".data\nh: .halfword 65536\n").error_count(), 1);
    }

    #[test]
    fn word_list_is_laid_out_sequentially() {
        let out = asm_ok(".data\nb: .byte 1\nw: .word 10, 20, 30\n");
        assert_eq!(out.labels["w"], 0x8004);
        assert_eq!(out.memory.read(0x8004), Some(10));
        assert_eq!(out.memory.read(0x8008), Some(20));
        assert_eq!(out.memory.read(0x800C), Some(30));
    }

    #[test]
    fn word_values_may_reference_earlier_labels() {
        let out = asm_ok(".data\nfirst: .word 1\nptr: .word first\n");
        assert_eq!(out.memory.read(0x8004), Some(0x8000));
    }

    #[test]
    fn space_and_alloc_reserve_zeroed_memory() {
        let out = asm_ok(".data\ngap: .space 6\nbuf: .alloc 2\n");
        assert_eq!(out.labels["gap"], 0x8000);
        assert_eq!(out.labels["buf"], 0x8008); // 6 bytes then word alignment
        assert_eq!(out.memory.read(0x8000), Some(0));
        assert_eq!(out.memory.read(0x8008), Some(0));
        assert_eq!(out.memory.read(0x800C), Some(0));
    }

    #[test]
    fn oversized_reservations_are_errors() {
        assert_eq!(asm(".data\ns: .space 262144\n").error_count(), 1);
        assert_eq!(asm(".data\ns: .space 262143\n").error_count(), 0);
        assert_eq!(asm(".data\na: .alloc 65536\n").error_count(), 1);
    }

    #[test]
    fn missing_colon_or_value_is_an_error() {
        assert_eq!(asm(".data\nlabel .word 1\n").error_count(), 1);
        assert_eq!(asm(".data\nlabel: .word\n").error_count(), 1);
        assert_eq!(asm(".data\nlabel: .float 1\n").error_count(), 1);
    }

    #[test]
    fn overlapping_sections_are_an_error() {
        let out = assemble(
            ".data\nbuf: .alloc 8\n.text\nnop\n",
            AssemblySettings {
                text_start: 0x1000,
                data_start: 0x1004,
            },
            AssembleOption::default(),
        );
        assert_eq!(out.error_count(), 1);
        assert!(out.errors[0].message.contains("overlaps"));
    }

    #[test]
    fn unresolved_label_is_an_error() {
        let out = asm(".text\nj nowhere\n");
        assert_eq!(out.error_count(), 1);
        assert!(out.errors[0].message.contains("unresolved label"));
    }

    #[test]
    fn lines_before_any_section_are_ignored() {
        let out = asm_ok("nop\n.text\nnop\n");
        assert_eq!(out.static_instruction_count(), 1);
    }
}
