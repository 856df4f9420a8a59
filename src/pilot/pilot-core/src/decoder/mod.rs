mod opcodes;
mod rm;

use log::debug;

use crate::control::{
    AluOp, BranchCond, BranchDest, Bus, ControlWord, DataSize, DecodedInst, InterruptCond, MicroKind,
    MicroSpec, SrcControl,
};

pub use rm::RmMode;

/// Translates one instruction at a time into a `DecodedInst`
///
/// `decode` consumes the opcode word and reports how many extension words the
/// instruction still needs. Those are appended with `push_word` before `finish`
/// hands the record over.
pub struct Decoder {
    inst: DecodedInst,
    rm_ops: u8,
    words_to_read: u8,
    prefix: Option<MicroKind>, // repeat prefix of the previous instruction
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            inst: DecodedInst::default(),
            rm_ops: 0,
            words_to_read: 0,
            prefix: None,
        }
    }

    /// Forgets the previous instruction, as after a pipeline flush
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn inst(&self) -> &DecodedInst {
        &self.inst
    }

    pub fn words_to_read(&self) -> u8 {
        self.words_to_read
    }

    /// The last finished instruction was a REPI or REPR prefix
    pub fn in_repeat_prefix(&self) -> bool {
        self.prefix.is_some()
    }

    /// Decodes the opcode word fetched from `addr`
    pub fn decode(&mut self, opcode: u16, addr: u32) {
        self.inst = DecodedInst::default();
        self.inst.inst_pgc = addr;
        // An empty vector always has room for the opcode
        let _ = self.inst.words.push(opcode);
        self.rm_ops = 0;
        self.words_to_read = 0;

        let rule = opcodes::lookup(opcode);
        if let Err(reason) = (rule.handler)(self, opcode) {
            debug!(
                "Illegal opcode {:04x} at {:06x} ({}: {})",
                opcode, addr, rule.name, reason
            );
            self.illegal();
        }
    }

    /// Builds the record that redirects execute into the interrupt sequence
    pub fn decode_interrupt(&mut self, cond: InterruptCond, next_pc: u32) {
        self.inst = DecodedInst::default();
        self.inst.inst_pgc = next_pc;
        self.inst.interrupt = true;
        self.inst.interrupt_cond = cond;
        self.rm_ops = 0;
        self.words_to_read = 0;
    }

    /// Appends an extension word
    pub fn push_word(&mut self, word: u16) {
        if self.words_to_read == 0 {
            return;
        }
        if self.inst.words.push(word).is_ok() {
            self.words_to_read -= 1;
        }
    }

    /// Completes the instruction whose last word ends at `end_addr`
    pub fn finish(&mut self, end_addr: u32) -> DecodedInst {
        if !self.inst.interrupt && self.inst.branch_dest != BranchDest::Illegal {
            self.inst.inst_pgc = end_addr;
        }
        self.prefix = self
            .inst
            .repeat_op
            .map(|spec| spec.kind)
            .filter(|kind| kind.is_prefix_repeat());
        self.inst.clone()
    }

    /// Static target of a branch whose destination is known from its words
    pub fn predicted_target(&self) -> Option<u32> {
        let inst = &self.inst;
        if !inst.branch || inst.interrupt {
            return None;
        }
        let opcode = inst.word(0);
        let pgc = inst.inst_pgc;
        match inst.branch_dest {
            BranchDest::Mar if inst.run_after.is_none() && inst.run_before.is_none() => {
                // JR cc / CR.S
                if opcode & 0xE000 != 0xE000 || opcode & 0xF000 == 0xF000 {
                    return None;
                }
                Some(relative_target(pgc, opcode))
            }
            BranchDest::Mar => match inst.run_after.map(|spec| spec.kind) {
                Some(MicroKind::IndPgcWithImmShift) => Some(relative_target(pgc, opcode)),
                _ => None,
            },
            BranchDest::Hml => {
                let hml = hml(inst.word(0), inst.word(1));
                if hml & 1 == 0 {
                    Some(hml)
                } else {
                    Some(pgc.wrapping_add(hml) & 0xFF_FFFE)
                }
            }
            BranchDest::Restart => Some(restart_vector(opcode)),
            BranchDest::DivZero | BranchDest::Illegal => None,
        }
    }

    fn core(&mut self) -> &mut ControlWord {
        &mut self.inst.core_op
    }

    fn queue_words(&mut self, count: u8) {
        self.words_to_read += count;
    }

    fn set_branch(&mut self, cond: BranchCond, dest: BranchDest) {
        self.inst.branch = true;
        self.inst.branch_cond = cond;
        self.inst.branch_dest = dest;
    }

    fn check_no_prefix(&self) -> Result<(), &'static str> {
        match self.prefix {
            None => Ok(()),
            Some(_) => Err("branch after repeat prefix"),
        }
    }

    /// Turns the instruction into a call through the illegal-opcode vector
    fn illegal(&mut self) {
        let words = self.inst.words.clone();
        let inst_pgc = self.inst.inst_pgc;
        self.inst = DecodedInst {
            words,
            inst_pgc,
            ..DecodedInst::default()
        };
        self.words_to_read = 0;
        self.set_branch(BranchCond::AlwaysCall, BranchDest::Illegal);
    }

    /// Sets a plain `0 | src -> dest` move
    fn load_into(&mut self, src: SrcControl, dest: Bus, size: DataSize) {
        let core = self.core();
        core.op = AluOp::Or;
        core.srcs[0] = SrcControl::new(Bus::Zero, size);
        core.srcs[1] = src;
        core.dest = dest;
    }

    fn attach_before(&mut self, spec: MicroSpec) -> Result<(), &'static str> {
        if self.inst.run_before.is_some() {
            return Err("operand microcode slot already in use");
        }
        self.inst.run_before = Some(spec);
        Ok(())
    }

    fn attach_after(&mut self, spec: MicroSpec) -> Result<(), &'static str> {
        if self.inst.run_after.is_some() {
            return Err("operand microcode slot already in use");
        }
        self.inst.run_after = Some(spec);
        Ok(())
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// PGC plus the sign-extended low opcode byte, in words
pub fn relative_target(pgc: u32, opcode: u16) -> u32 {
    let disp = DataSize::Byte.extend(opcode as u32, true) << 1;
    pgc.wrapping_add(disp) & 0xFF_FFFE
}

/// 24-bit HML operand: high byte in the opcode, low 16 bits in the next word
pub fn hml(high: u16, low: u16) -> u32 {
    ((high as u32 & 0xFF) << 16) | low as u32
}

pub fn restart_vector(opcode: u16) -> u32 {
    crate::constants::vectors::RESTART_BASE | ((opcode as u32 & 0xFF) << 4)
}

#[cfg(test)]
mod decoder_tests {
    use super::*;
    use crate::constants::flags;
    use crate::control::{MemLatch, ZeroMode};

    fn decode(words: &[u16]) -> (DecodedInst, u8) {
        let mut decoder = Decoder::new();
        decoder.decode(words[0], 0x1000);
        let needed = decoder.words_to_read();
        for word in &words[1..] {
            decoder.push_word(*word);
        }
        (decoder.finish(0x1000 + 2 * words.len() as u32), needed)
    }

    #[test]
    fn test_nop() {
        let (inst, needed) = decode(&[0x0000]);
        assert_eq!(needed, 0);
        assert_eq!(inst.core_op.op, AluOp::Off);
        assert_eq!(inst.core_op.dest, Bus::Zero);
        assert!(!inst.branch);
        assert_eq!(inst.run_before, None);
        assert_eq!(inst.run_after, None);
        assert_eq!(inst.repeat_op, None);
        assert_eq!(inst.inst_pgc, 0x1002);
    }

    #[test]
    fn test_halt() {
        let (inst, _) = decode(&[0x0001]);
        assert!(inst.disable_clk);
        assert!(!inst.branch);
    }

    #[test]
    fn test_unmatched_opcode_is_illegal() {
        let (inst, needed) = decode(&[0xFC00]);
        assert_eq!(needed, 0);
        assert!(inst.branch);
        assert_eq!(inst.branch_cond, BranchCond::AlwaysCall);
        assert_eq!(inst.branch_dest, BranchDest::Illegal);
        assert_eq!(inst.core_op.op, AluOp::Off);
        // The pushed address is the offending opcode itself
        assert_eq!(inst.inst_pgc, 0x1000);
    }

    #[test]
    fn test_add_immediate_byte() {
        let (inst, needed) = decode(&[0x38C0, 0x0005]);
        assert_eq!(needed, 1);
        let core = inst.core_op;
        assert_eq!(core.op, AluOp::Add);
        assert_eq!(core.srcs[0].location, Bus::L(0));
        assert_eq!(core.srcs[1].location, Bus::Imm1);
        assert_eq!(core.srcs[1].size, DataSize::Byte);
        assert_eq!(core.dest, Bus::L(0));
        assert_eq!(core.flag_mask, flags::SZVCX);
        assert_eq!(inst.rm2_offset, 2);
    }

    #[test]
    fn test_compare_discards_result() {
        // CP.W r1, r2
        let (inst, _) = decode(&[0x69C8]);
        let core = inst.core_op;
        assert_eq!(core.srcs[0].location, Bus::RegOpcode);
        assert_eq!(core.srcs[1].location, Bus::W(2));
        assert!(core.srcs[1].sign_extend);
        assert!(core.negate);
        assert!(core.invert_carries);
        assert_eq!(core.dest, Bus::Zero);
    }

    #[test]
    fn test_register_source_form_writes_register() {
        // SUB.B r3, (P2)
        let (inst, _) = decode(&[0x0300 | 0x2080 | 0x0A]);
        let core = inst.core_op;
        assert_eq!(core.dest, Bus::RegOpcode);
        assert_eq!(core.srcs[1].location, Bus::MemData);
        assert_eq!(
            inst.run_before,
            Some(MicroSpec::new(MicroKind::IndReg, DataSize::Byte).with_select(2))
        );
    }

    #[test]
    fn test_rmw_memory_writes_back_through_mar() {
        // ADD.W (P1), r2 : op4 = 8
        let (inst, _) = decode(&[0x7206]);
        let core = inst.core_op;
        assert_eq!(core.srcs[0].location, Bus::MemData);
        assert_eq!(core.srcs[1].location, Bus::RegOpcode);
        assert_eq!(core.dest, Bus::MemData);
        assert_eq!(core.mem_latch, MemLatch::Half2Mar);
        assert!(core.is_16bit);
        assert!(!inst.run_before.unwrap().is_write);
    }

    #[test]
    fn test_rmw_long_memory_rewinds_mar() {
        // ADD.P (P1), r2
        let (inst, _) = decode(&[0xB206]);
        assert_eq!(inst.core_op.mem_latch, MemLatch::None);
        assert_eq!(inst.run_after.unwrap().kind, MicroKind::IndMarRewind);
        assert!(inst.run_after.unwrap().is_write);
    }

    #[test]
    fn test_two_operand_load_offsets() {
        // LD.W (abs16), (P1+d16)
        let src = 0x05; // P1 + displacement
        let dest = 0x29; // absolute 16-bit
        let (inst, needed) = decode(&[0x5000 | (dest << 6) | src, 0x0010, 0x2000]);
        assert_eq!(needed, 2);
        assert_eq!(inst.run_before.unwrap().kind, MicroKind::IndRegWithImm);
        let after = inst.run_after.unwrap();
        assert_eq!(after.kind, MicroKind::IndImmRm);
        assert!(after.is_write);
        assert!(after.is_second());
        assert_eq!(inst.rm2_offset, 2);
        assert_eq!(inst.core_op.dest, Bus::MemData);
    }

    #[test]
    fn test_load_irl_and_flag_ops_reachable() {
        let (inst, _) = decode(&[0xDB05]);
        assert_eq!(inst.core_op.dest, Bus::Irl);
        assert_eq!(inst.core_op.srcs[1].location, Bus::Imm0);

        let (inst, _) = decode(&[0xDF12]);
        assert_eq!(inst.core_op.dest, Bus::F);
        assert_eq!(inst.core_op.srcs[0].location, Bus::Zero);
        assert_eq!(inst.core_op.srcs[1].location, Bus::Imm0);

        let (inst, _) = decode(&[0xDC7F]);
        assert_eq!(inst.core_op.op, AluOp::And);
        assert_eq!(inst.core_op.srcs[0].location, Bus::F);
    }

    #[test]
    fn test_bit_test() {
        // BIT 3, L1
        let (inst, _) = decode(&[0xD304]);
        let core = inst.core_op;
        assert_eq!(core.srcs[0].location, Bus::L(1));
        assert_eq!(core.srcs[1].location, Bus::DmxImm);
        assert_eq!(core.z_mode, ZeroMode::BitTest);
        assert_eq!(core.dest, Bus::Zero);

        // SET P0, L1
        let (inst, _) = decode(&[0xD8C4]);
        assert_eq!(inst.core_op.srcs[1].location, Bus::DmxP0);
        assert_eq!(inst.core_op.dest, Bus::L(1));
        assert_eq!(inst.core_op.op, AluOp::Or);
    }

    #[test]
    fn test_repeat_prefix_blocks_branches() {
        let mut decoder = Decoder::new();
        decoder.decode(0xFE03, 0x1000);
        let repi = decoder.finish(0x1002);
        assert_eq!(repi.repeat_op.map(|spec| spec.kind), Some(MicroKind::Repi));

        decoder.decode(0xEE04, 0x1002);
        assert_eq!(decoder.inst().branch_dest, BranchDest::Illegal);
        decoder.finish(0x1004);

        // Prefix is gone once a non-prefix instruction was decoded
        decoder.decode(0xEE04, 0x1004);
        assert_eq!(decoder.inst().branch_dest, BranchDest::Mar);
    }

    #[test]
    fn test_repr_allows_nested_repeat() {
        let mut decoder = Decoder::new();
        decoder.decode(0xF200, 0x1000);
        decoder.finish(0x1002);
        decoder.decode(0xFE01, 0x1002);
        assert_eq!(
            decoder.inst().repeat_op.map(|spec| spec.kind),
            Some(MicroKind::Repi)
        );
        decoder.finish(0x1004);
        decoder.decode(0xF300, 0x1004);
        assert_eq!(decoder.inst().branch_dest, BranchDest::Illegal);
    }

    #[test]
    fn test_multiply() {
        // MULS.B r1, L2
        let (inst, _) = decode(&[0x0948]);
        assert_eq!(inst.core_op.dest, Bus::FactorB);
        assert_eq!(inst.core_op.srcs[1].location, Bus::L(2));
        assert_eq!(inst.run_after.unwrap().kind, MicroKind::MulLdFactorA);
        let repeat = inst.repeat_op.unwrap();
        assert_eq!(repeat.kind, MicroKind::MulShiftProductLo);
        assert_eq!(repeat.reg_select, 0x18);
    }

    #[test]
    fn test_divide_decodes() {
        let (inst, _) = decode(&[0x0988]);
        assert_eq!(inst.run_after.unwrap().kind, MicroKind::DivTestDividendHi);
        assert_eq!(inst.branch_dest, BranchDest::DivZero);
        assert_eq!(inst.branch_cond, BranchCond::Djnz);
    }

    #[test]
    fn test_predicted_targets() {
        let mut decoder = Decoder::new();

        // JR.S -2 words
        decoder.decode(0xEEFE, 0x1000);
        decoder.finish(0x1002);
        assert_eq!(decoder.predicted_target(), Some(0x0FFE));

        // JP 0x123456 (absolute)
        decoder.decode(0xF812, 0x1000);
        decoder.push_word(0x3456);
        decoder.finish(0x1004);
        assert_eq!(decoder.predicted_target(), Some(0x123456));

        // CR.L relative
        decoder.decode(0xF900, 0x1000);
        decoder.push_word(0x0011);
        decoder.finish(0x1004);
        assert_eq!(decoder.predicted_target(), Some(0x1014));

        // RST 0x21
        decoder.decode(0xFF21, 0x1000);
        decoder.finish(0x1002);
        assert_eq!(decoder.predicted_target(), Some(0xFFD210));

        // DJNZ r1
        decoder.decode(0xF1FE, 0x1000);
        decoder.finish(0x1002);
        assert_eq!(decoder.predicted_target(), Some(0x0FFE));

        // JP (P1) has no static target
        decoder.decode(0xFA06, 0x1000);
        decoder.finish(0x1002);
        assert_eq!(decoder.predicted_target(), None);
    }

    #[test]
    fn test_interrupt_record() {
        let mut decoder = Decoder::new();
        decoder.decode_interrupt(InterruptCond::Irq3, 0x2000);
        let inst = decoder.finish(0x9999);
        assert!(inst.interrupt);
        assert!(!inst.branch);
        assert_eq!(inst.core_op.op, AluOp::Off);
        assert_eq!(inst.inst_pgc, 0x2000);
    }
}
