//! Instruction set definition for the MIPS-1 integer core.
//!
//! Three machine-word layouts exist:
//!
//! - R-type (op = 0): `[op:6][rs:5][rt:5][rd:5][shamt:5][funct:6]`
//! - I-type:          `[op:6][rs:5][rt:5][imm:16]`
//! - J-type:          `[op:6][target:26]`
//!
//! The synthetic `SWI` opcode is I-typed; its immediate is the interrupt
//! code that selects a scenario handler.

macro_rules! define_code {
    {
        @mod $modname:ident;
        @type $typ:ty;
        $( $cname:ident = $cval:expr; )*
    } => {
        pub mod $modname {
            $(pub const $cname : $typ = $cval; )*
            #[allow(unused)]
            pub fn name_of(code: $typ) -> &'static str {
                match code {
                    $($cname => stringify!($cname), )*
                    _ => "no name"
                }
            }
        }
    };
}

define_code! {
    @mod op_code;
    @type u32;
    RTYPE = 0x00;
    J = 0x02;
    JAL = 0x03;
    BEQ = 0x04;
    BNE = 0x05;
    ADDI = 0x08;
    ADDIU = 0x09;
    SLTI = 0x0A;
    SLTIU = 0x0B;
    ANDI = 0x0C;
    ORI = 0x0D;
    LUI = 0x0F;
    LB = 0x20;
    LW = 0x23;
    LBU = 0x24;
    SB = 0x28;
    SW = 0x2B;
    SWI = 0x2F;
}

define_code! {
    @mod fn_code;
    @type u32;
    SLL = 0x00;
    SRL = 0x02;
    SRA = 0x03;
    SLLV = 0x04;
    SRLV = 0x05;
    SRAV = 0x06;
    JR = 0x08;
    MFHI = 0x10;
    MFLO = 0x12;
    MULT = 0x18;
    MULTU = 0x19;
    DIV = 0x1A;
    DIVU = 0x1B;
    ADD = 0x20;
    ADDU = 0x21;
    SUB = 0x22;
    SUBU = 0x23;
    AND = 0x24;
    OR = 0x25;
    XOR = 0x26;
    SLT = 0x2A;
    SLTU = 0x2B;
}

/// Raw fields of a decoded machine word. All fields are extracted
/// unconditionally; which ones carry meaning depends on the opcode shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decoded {
    pub op: u32,
    pub rs: u32,
    pub rt: u32,
    pub rd: u32,
    pub shamt: u32,
    pub funct: u32,
    pub imm: u32,
    pub target: u32,
}

pub fn decode(word: u32) -> Decoded {
    Decoded {
        op: word >> 26,
        rs: (word >> 21) & 0x1F,
        rt: (word >> 16) & 0x1F,
        rd: (word >> 11) & 0x1F,
        shamt: (word >> 6) & 0x1F,
        funct: word & 0x3F,
        imm: word & 0xFFFF,
        target: word & 0x03FF_FFFF,
    }
}

pub fn encode_r(rs: u32, rt: u32, rd: u32, shamt: u32, funct: u32) -> u32 {
    ((rs & 0x1F) << 21)
        | ((rt & 0x1F) << 16)
        | ((rd & 0x1F) << 11)
        | ((shamt & 0x1F) << 6)
        | (funct & 0x3F)
}

pub fn encode_i(op: u32, rs: u32, rt: u32, imm: u32) -> u32 {
    (op << 26) | ((rs & 0x1F) << 21) | ((rt & 0x1F) << 16) | (imm & 0xFFFF)
}

pub fn encode_j(op: u32, target: u32) -> u32 {
    (op << 26) | (target & 0x03FF_FFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn r_type_layout() {
        // add $3, $1, $2 with the destination in rd
        let w = encode_r(1, 2, 3, 0, fn_code::ADD);
        assert_eq!(w, (1 << 21) | (2 << 16) | (3 << 11) | 0x20);
        let d = decode(w);
        assert_eq!(d.op, op_code::RTYPE);
        assert_eq!((d.rs, d.rt, d.rd), (1, 2, 3));
        assert_eq!(d.funct, fn_code::ADD);
    }

    #[test]
    fn i_type_layout() {
        let w = encode_i(op_code::ADDI, 1, 0, 0xFFFB);
        let d = decode(w);
        assert_eq!(d.op, op_code::ADDI);
        assert_eq!((d.rs, d.rt), (1, 0));
        assert_eq!(d.imm, 0xFFFB);
    }

    #[test]
    fn j_type_layout() {
        let w = encode_j(op_code::JAL, 0x1000 / 4);
        let d = decode(w);
        assert_eq!(d.op, op_code::JAL);
        assert_eq!(d.target, 0x400);
    }

    #[test]
    fn swi_is_i_typed() {
        let w = encode_i(op_code::SWI, 0, 0, 582);
        let d = decode(w);
        assert_eq!(d.op, op_code::SWI);
        assert_eq!(d.imm, 582);
    }

    #[test]
    fn encode_decode_round_trip() {
        for &w in &[
            encode_r(31, 7, 15, 31, fn_code::SRAV),
            encode_i(op_code::SW, 4, 29, 0x8000),
            encode_i(op_code::BNE, 1, 2, 0x402),
            encode_j(op_code::J, 0x03FF_FFFF),
        ] {
            let d = decode(w);
            let back = match d.op {
                op_code::RTYPE => encode_r(d.rs, d.rt, d.rd, d.shamt, d.funct),
                op_code::J | op_code::JAL => encode_j(d.op, d.target),
                _ => encode_i(d.op, d.rs, d.rt, d.imm),
            };
            assert_eq!(back, w);
        }
    }

    #[test]
    fn masks_clip_out_of_range_fields() {
        // a shift amount of 32 must not leak into the funct field
        let w = encode_r(0, 0, 1, 32, fn_code::SLL);
        assert_eq!(decode(w).shamt, 0);
        assert_eq!(decode(w).funct, fn_code::SLL);
    }

    #[test]
    fn name_lookup() {
        assert_eq!(op_code::name_of(op_code::SWI), "SWI");
        assert_eq!(fn_code::name_of(fn_code::MULT), "MULT");
        assert_eq!(fn_code::name_of(0x3F), "no name");
    }
}
