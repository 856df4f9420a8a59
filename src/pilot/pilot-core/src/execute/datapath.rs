use super::ExecuteUnit;
use crate::constants::address_space::{ADDRESS_MASK, PGC_MASK};
use crate::constants::registers::{PRODUCT_HIGH, REPEAT_ACTIVE, REPEAT_COUNT_MASK};
use crate::control::{Bus, DataSize, SrcControl};
use crate::decoder::hml;
use crate::error::CoreError;
use crate::registers::Registers;

/// Index word whose width field names no register view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllegalIndex;

fn reg_field(word: u32, shift: u32) -> usize {
    ((word >> shift) & 0x7) as usize
}

/// 16-bit field, or 24 bits with the high byte taken from the following word
fn immediate(low: u32, high: u32, size: DataSize) -> u32 {
    match size {
        DataSize::Long => ((high & 0xFF) << 16) | low,
        _ => low,
    }
}

/// Register named by an index word, extended to its own width
///
/// Bits 8-10 select the register, bit 11 asks for sign extension and bits
/// 14-15 give the width.
fn index_register(regs: &Registers, word: u32) -> Result<u32, IllegalIndex> {
    let size = DataSize::from_bits((word >> 14) as u16).ok_or(IllegalIndex)?;
    let reg = reg_field(word, 8);
    Ok(size.extend(regs.read(reg, size), word & 0x0800 != 0))
}

impl ExecuteUnit {
    fn operand_size(&self) -> u32 {
        let srcs = &self.control.srcs;
        let uses_sp = srcs.iter().any(|src| src.location == Bus::P(7));
        match srcs[1].size {
            // The stack stays word aligned
            DataSize::Byte if uses_sp => 2,
            DataSize::Byte => 1,
            DataSize::Word => 2,
            DataSize::Long => 4,
        }
    }

    fn factor_a_sign(&self, regs: &Registers, size: DataSize) -> u32 {
        if regs.factor_a & size.sign_bit() != 0 {
            size.mask()
        } else {
            0
        }
    }

    /// Value driven onto the bus by `src`
    pub(super) fn read_bus(&self, regs: &Registers, src: SrcControl) -> Result<u32, IllegalIndex> {
        let inst = &self.inst;
        let w = |index: usize| inst.word(index) as u32;
        let off = inst.rm2_offset as usize;
        let width = self.control.srcs[0].size;

        let value = match src.location {
            Bus::Zero => 0,
            Bus::Size => self.operand_size(),
            Bus::NumBits => self.control.srcs[1].size.bits(),
            Bus::L(i) => regs.read(i as usize, DataSize::Byte),
            Bus::M(i) => regs.read_high_byte(i as usize),
            Bus::W(i) => regs.read(i as usize, DataSize::Word),
            Bus::P(i) => regs.read(i as usize, DataSize::Long),
            Bus::F => regs.flags() as u32,
            Bus::Irl => regs.irl() as u32,
            Bus::Wf => regs.wf as u32,
            Bus::Pgc => regs.pgc,
            Bus::ProductHigh => regs.read(PRODUCT_HIGH, width),
            Bus::LatchRepi => regs.repi as u32,
            Bus::LatchRepr => regs.repr as u32,
            Bus::FactorA => regs.factor_a,
            Bus::FactorASign => self.factor_a_sign(regs, src.size),
            Bus::FactorASignInv => !self.factor_a_sign(regs, src.size) & src.size.mask(),
            Bus::FactorB => regs.factor_b,
            Bus::MemAddr => self.mem_addr,
            Bus::MemData => self.mem_data,
            Bus::Imm0 => immediate(w(0), w(1), src.size),
            Bus::Imm1 => immediate(w(1), w(2), src.size),
            Bus::ImmHml => hml(inst.word(0), inst.word(1)),
            Bus::ImmHmlRm => hml(inst.word(2), inst.word(1)),
            Bus::Sfi1 => (w(0) >> 2) & 0xF,
            Bus::Sfi2 => (w(0) >> 8) & 0xF,
            Bus::Rm1 => immediate(w(off), w(off + 1), src.size),
            Bus::RmHml => hml(inst.word(off + 1), inst.word(off)),
            Bus::RegOpcode => regs.read(reg_field(w(0), 8), width),
            Bus::BaseReg => regs.read(reg_field(w(1), 2), DataSize::Long),
            Bus::IndexReg => index_register(regs, w(1))?,
            Bus::AbsIndexReg => index_register(regs, w(2))?,
            Bus::BaseRegRm => regs.read(reg_field(w(off), 2), DataSize::Long),
            Bus::IndexRegRm => index_register(regs, w(off))?,
            Bus::AbsIndexRegRm => index_register(regs, w(off + 1))?,
            Bus::RepeatReg => regs.read((regs.repr & 0x7) as usize, width),
            Bus::DmxImm => 1 << ((w(0) >> 8) & 0x7),
            Bus::DmxP0 => 1 << ((regs.regs[0] >> 8) & 0x7),
        };
        Ok(value)
    }

    /// Latches `value` into `dest`; `Zero` discards it
    pub(super) fn write_bus(&mut self, regs: &mut Registers, dest: Bus, value: u32) -> Result<(), CoreError> {
        let width = self.control.srcs[0].size;
        match dest {
            Bus::L(i) => regs.write(i as usize, DataSize::Byte, value),
            Bus::M(i) => regs.write_high_byte(i as usize, value),
            Bus::W(i) => regs.write(i as usize, DataSize::Word, value),
            Bus::P(i) => regs.write(i as usize, DataSize::Long, value),
            Bus::F => regs.set_flags(value as u8),
            Bus::Irl => regs.set_irl(value as u8),
            Bus::Wf => regs.wf = value as u16,
            Bus::Pgc => regs.pgc = value & PGC_MASK,
            Bus::ProductHigh => regs.write(PRODUCT_HIGH, width, value),
            Bus::LatchRepi => regs.repi = (value as u8) & REPEAT_COUNT_MASK,
            Bus::LatchRepr => regs.repr = ((value >> 8) & 0x7) as u8 | REPEAT_ACTIVE,
            Bus::FactorA => regs.factor_a = value & ADDRESS_MASK,
            Bus::FactorB => regs.factor_b = value & ADDRESS_MASK,
            Bus::MemAddr => self.mem_addr = value & ADDRESS_MASK,
            Bus::MemData => self.mem_data = value,
            Bus::RegOpcode => regs.write(reg_field(self.inst.word(0) as u32, 8), width, value),
            Bus::RepeatReg => {
                if value & width.mask() == 0 {
                    regs.repr &= 0x7;
                }
                regs.write((regs.repr & 0x7) as usize, width, value);
            }
            Bus::Zero => {}
            Bus::Size
            | Bus::NumBits
            | Bus::FactorASign
            | Bus::FactorASignInv
            | Bus::Imm0
            | Bus::Imm1
            | Bus::ImmHml
            | Bus::ImmHmlRm
            | Bus::Sfi1
            | Bus::Sfi2
            | Bus::Rm1
            | Bus::RmHml
            | Bus::BaseReg
            | Bus::IndexReg
            | Bus::AbsIndexReg
            | Bus::BaseRegRm
            | Bus::IndexRegRm
            | Bus::AbsIndexRegRm
            | Bus::DmxImm
            | Bus::DmxP0 => return Err(CoreError::MicrocodeFault("read-only bus used as a destination")),
        }
        Ok(())
    }
}
