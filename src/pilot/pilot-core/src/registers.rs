use crate::constants::{address_space, flags, registers};
use crate::control::DataSize;

/// Architectural register file
///
/// General registers are 24 bits wide. The narrower views alias slices of them:
/// L0-3 are the low bytes of registers 0-3, M0-3 the second bytes, W0-7 the low
/// halves and P0-7 the full registers, with P7 doubling as SP.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Registers {
    pub regs: [u32; 8],
    pub wf: u16,         // F in the low byte, IRL in bits 8-10
    pub pgc: u32,        // program counter of the executing instruction
    pub repi: u8,        // immediate repeat counter (5 bits)
    pub repr: u8,        // repeat register index, bit 3 marks it active
    pub factor_a: u32,   // multiplicand
    pub factor_b: u32,   // multiplier, shifted out one bit per pass
    pub latch_aux: bool, // auxiliary carry / zero latch
    pub disable_clk: bool,
}

impl Registers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn flags(&self) -> u8 {
        self.wf as u8
    }

    pub fn set_flags(&mut self, value: u8) {
        self.wf = (self.wf & 0xFF00) | value as u16;
    }

    pub fn flag(&self, mask: u8) -> bool {
        self.flags() & mask != 0
    }

    pub fn irl(&self) -> u8 {
        ((self.wf & flags::IRL_MASK) >> flags::IRL_SHIFT) as u8
    }

    pub fn set_irl(&mut self, level: u8) {
        self.wf = (self.wf & !flags::IRL_MASK) | (((level & 0x7) as u16) << flags::IRL_SHIFT);
    }

    pub fn sp(&self) -> u32 {
        self.regs[registers::STACK_POINTER]
    }

    pub fn set_sp(&mut self, value: u32) {
        self.regs[registers::STACK_POINTER] = value & address_space::ADDRESS_MASK;
    }

    /// Reads the low `size` bits of a general register
    pub fn read(&self, index: usize, size: DataSize) -> u32 {
        self.regs[index & 0x7] & size.mask()
    }

    /// Writes the low `size` bits of a general register, keeping the rest
    pub fn write(&mut self, index: usize, size: DataSize, value: u32) {
        let reg = &mut self.regs[index & 0x7];
        *reg = (*reg & !size.mask()) | (value & size.mask());
    }

    /// M view: bits 8-15 of registers 0-3
    pub fn read_high_byte(&self, index: usize) -> u32 {
        (self.regs[index & 0x3] >> 8) & 0xFF
    }

    pub fn write_high_byte(&mut self, index: usize, value: u32) {
        let reg = &mut self.regs[index & 0x3];
        *reg = (*reg & !0xFF00) | ((value & 0xFF) << 8);
    }

    /// L0-3 followed by M0-3, the order used by 8-bit register operands
    pub fn read_byte(&self, index: usize) -> u32 {
        if index & 0x4 == 0 {
            self.read(index & 0x3, DataSize::Byte)
        } else {
            self.read_high_byte(index & 0x3)
        }
    }
}
