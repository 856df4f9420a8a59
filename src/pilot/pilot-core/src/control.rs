use heapless::Vec;

use crate::constants::pipeline::MAX_INST_WORDS;

/// Operand width on the internal data bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSize {
    Byte,
    Word,
    Long,
}

impl DataSize {
    /// Decodes the two-bit width field used by most opcodes
    pub fn from_bits(bits: u16) -> Option<DataSize> {
        match bits & 0x3 {
            0 => Some(DataSize::Byte),
            1 => Some(DataSize::Word),
            2 => Some(DataSize::Long),
            _ => None,
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            DataSize::Byte => 8,
            DataSize::Word => 16,
            DataSize::Long => 24,
        }
    }

    pub fn mask(self) -> u32 {
        (1 << self.bits()) - 1
    }

    pub fn sign_bit(self) -> u32 {
        1 << (self.bits() - 1)
    }

    /// Truncates `value` to this width, optionally sign-extending into 32 bits
    pub fn extend(self, value: u32, sign_extend: bool) -> u32 {
        let value = value & self.mask();
        if sign_extend && value & self.sign_bit() != 0 {
            value | !self.mask()
        } else {
            value
        }
    }
}

impl Default for DataSize {
    fn default() -> Self {
        DataSize::Long
    }
}

/// Every source or destination reachable from the ALU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bus {
    Zero,
    Size,    // operand size in bytes, used for auto-indexing
    NumBits, // operand size in bits, used to seed loops
    L(u8),
    M(u8),
    F,
    Irl,
    W(u8),
    Wf,
    P(u8), // P(7) is SP
    Pgc,
    ProductHigh,
    LatchRepi,
    LatchRepr,
    FactorA,
    FactorASign,    // sign extension of FACTOR_A for signed multiplies
    FactorASignInv, // complement of the above, for the negated first pass
    FactorB,
    MemAddr,
    MemData,
    Imm0,
    Imm1,
    ImmHml,
    ImmHmlRm,
    Sfi1,
    Sfi2,
    Rm1,
    RmHml,
    RegOpcode, // register named by opcode bits 8-10
    BaseReg,
    IndexReg,
    AbsIndexReg,
    BaseRegRm,
    IndexRegRm,
    AbsIndexRegRm,
    RepeatReg,
    DmxImm,
    DmxP0,
}

impl Default for Bus {
    fn default() -> Self {
        Bus::Zero
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Off,
    Add,
    And,
    Or,
    Xor,
}

impl Default for AluOp {
    fn default() -> Self {
        AluOp::Off
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shifter {
    None,
    Left,
    LeftCarry,
    LeftBarrel,
    RightLogical,
    RightArith,
    RightCarry,
    RightBarrel,
    Swap,
}

impl Default for Shifter {
    fn default() -> Self {
        Shifter::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZeroMode {
    Normal,
    Accumulate,
    BitTest,
    SaveToAux,
}

impl Default for ZeroMode {
    fn default() -> Self {
        ZeroMode::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowMode {
    Normal,
    ShifterCarry,
    Clear,
}

impl Default for OverflowMode {
    fn default() -> Self {
        OverflowMode::Normal
    }
}

/// When the memory address register is loaded for the current step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemLatch {
    None,
    Half1,
    Half2,
    Half2Mar,
}

impl Default for MemLatch {
    fn default() -> Self {
        MemLatch::None
    }
}

/// Direction of a memory access and where write data comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemData {
    Read,
    ReadHigh, // merge a byte into MDR bits 16-23
    WriteFromSrc2,
    WriteFromDest,
    WriteFromMdr,
    WriteFromMdrHigh,
}

impl MemData {
    pub fn is_write(self) -> bool {
        !matches!(self, MemData::Read | MemData::ReadHigh)
    }
}

impl Default for MemData {
    fn default() -> Self {
        MemData::Read
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SrcControl {
    pub location: Bus,
    pub size: DataSize,
    pub sign_extend: bool,
}

impl SrcControl {
    pub fn new(location: Bus, size: DataSize) -> Self {
        Self {
            location,
            size,
            sign_extend: false,
        }
    }

    pub fn signed(location: Bus, size: DataSize) -> Self {
        Self {
            location,
            size,
            sign_extend: true,
        }
    }
}

/// One cycle's worth of datapath control
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlWord {
    pub srcs: [SrcControl; 2],
    pub dest: Bus,
    pub op: AluOp,
    pub add1: bool,
    pub add_carry: bool,
    pub negate: bool,
    pub and_with_overflow: bool,
    pub shifter: Shifter,
    pub aux_as_extend: bool, // carry in and out through latch_aux
    pub flag_mask: u8,
    pub invert_carries: bool,
    pub z_mode: ZeroMode,
    pub v_mode: OverflowMode,
    pub mem_latch: MemLatch,
    pub suppress: bool, // compute the address but skip the access
    pub mem_data: MemData,
    pub is_16bit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchCond {
    Le,
    Gt,
    Lt,
    Ge,
    Ule,
    Ugt,
    C,
    Nc,
    M,
    P,
    Ov,
    Nov,
    Z,
    Nz,
    Always,
    AlwaysCall,
    Djnz,
}

impl BranchCond {
    /// Condition field of JR cc (opcode bits 8-11)
    pub fn from_field(field: u16) -> BranchCond {
        match field & 0xF {
            0 => BranchCond::Le,
            1 => BranchCond::Gt,
            2 => BranchCond::Lt,
            3 => BranchCond::Ge,
            4 => BranchCond::Ule,
            5 => BranchCond::Ugt,
            6 => BranchCond::C,
            7 => BranchCond::Nc,
            8 => BranchCond::M,
            9 => BranchCond::P,
            10 => BranchCond::Ov,
            11 => BranchCond::Nov,
            12 => BranchCond::Z,
            13 => BranchCond::Nz,
            14 => BranchCond::Always,
            _ => BranchCond::AlwaysCall,
        }
    }
}

impl Default for BranchCond {
    fn default() -> Self {
        BranchCond::Always
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptCond {
    Nmi,
    Irq1,
    Irq2,
    Irq3,
    Irq4,
    Irq5,
    Irq6,
    Irq7,
}

impl InterruptCond {
    pub fn from_level(level: u8) -> Option<InterruptCond> {
        match level {
            0 => Some(InterruptCond::Nmi),
            1 => Some(InterruptCond::Irq1),
            2 => Some(InterruptCond::Irq2),
            3 => Some(InterruptCond::Irq3),
            4 => Some(InterruptCond::Irq4),
            5 => Some(InterruptCond::Irq5),
            6 => Some(InterruptCond::Irq6),
            7 => Some(InterruptCond::Irq7),
            _ => None,
        }
    }

    pub fn level(self) -> u8 {
        match self {
            InterruptCond::Nmi => 0,
            InterruptCond::Irq1 => 1,
            InterruptCond::Irq2 => 2,
            InterruptCond::Irq3 => 3,
            InterruptCond::Irq4 => 4,
            InterruptCond::Irq5 => 5,
            InterruptCond::Irq6 => 6,
            InterruptCond::Irq7 => 7,
        }
    }
}

impl Default for InterruptCond {
    fn default() -> Self {
        InterruptCond::Nmi
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchDest {
    Mar,
    Hml,
    Restart,
    DivZero,
    Illegal,
}

impl BranchDest {
    /// Guest exceptions save WF like an interrupt
    pub fn is_exception(self) -> bool {
        matches!(self, BranchDest::DivZero | BranchDest::Illegal)
    }
}

impl Default for BranchDest {
    fn default() -> Self {
        BranchDest::Mar
    }
}

/// Entry points of the microcode catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicroKind {
    IndImm,
    IndImm0,
    IndImmRm,
    IndImmWithBits,
    IndReg,
    IndRegPostInc,
    IndRegPreDec,
    IndRegWithImm,
    IndRegWithBits,
    IndPgcWithImm,
    IndPgcWithImmRm,
    IndPgcWithImmShift,
    IndPgcWithHml,
    IndPgcWithHmlRm,
    IndMarAuto,
    IndMarPostAuto,
    IndMarRewind,
    PostAutoIdx,
    Repi,
    RepiLoop,
    Repr,
    AdjustPgc,
    MulLdFactorA,
    MulLdProductLo,
    MulLdProductHi,
    MulDivLdRepi,
    MulShiftProductLo,
    MulShiftProductHi,
    MulShiftFactorB,
    MulAddProductLo,
    MulAddProductHi,
    DivTestDividendHi,
    DivTestFactorB,
    DivShiftDividendLo,
    DivShiftDividendHi,
    DivSubFactorB,
    DivAddDividendLoCarry,
    DivStProductLo,
    DivStProductHi,
    PushPgcIndSpAuto,
    PushPgcWrPgc,
    PushWfIndSpAuto,
    PushWfWrWf,
}

impl MicroKind {
    /// Prefix repeats replay the following instruction instead of looping in place
    pub fn is_prefix_repeat(self) -> bool {
        matches!(self, MicroKind::Repi | MicroKind::Repr)
    }
}

/// Microcode spec register-select bits
pub mod select {
    pub const REG_MASK: u8 = 0x07;
    pub const SHORT: u8 = 0x08; // 16-bit sign-extended field, or signed multiply
    pub const SECOND: u8 = 0x10; // second RM operand, or first multiply pass
}

/// Names one microcode entry together with its parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicroSpec {
    pub kind: MicroKind,
    pub reg_select: u8,
    pub size: DataSize,
    pub is_write: bool,
    pub suppress: bool,
}

impl MicroSpec {
    pub fn new(kind: MicroKind, size: DataSize) -> Self {
        Self {
            kind,
            reg_select: 0,
            size,
            is_write: false,
            suppress: false,
        }
    }

    pub fn with_select(mut self, reg_select: u8) -> Self {
        self.reg_select = reg_select;
        self
    }

    pub fn writing(mut self) -> Self {
        self.is_write = true;
        self
    }

    pub fn suppressed(mut self, suppress: bool) -> Self {
        self.suppress = suppress;
        self
    }

    pub fn reg(&self) -> usize {
        (self.reg_select & select::REG_MASK) as usize
    }

    pub fn is_short(&self) -> bool {
        self.reg_select & select::SHORT != 0
    }

    pub fn is_second(&self) -> bool {
        self.reg_select & select::SECOND != 0
    }
}

/// Continuation of a microcode chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Continue(MicroSpec),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MicroEntry {
    pub op: ControlWord,
    pub next: Next,
}

/// Fully decoded instruction handed from decode to execute
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedInst {
    pub words: Vec<u16, MAX_INST_WORDS>,
    pub inst_pgc: u32,
    pub run_before: Option<MicroSpec>,
    pub core_op: ControlWord,
    pub run_after: Option<MicroSpec>,
    pub repeat_op: Option<MicroSpec>,
    pub branch: bool,
    pub interrupt: bool,
    pub branch_cond: BranchCond,
    pub interrupt_cond: InterruptCond,
    pub branch_dest: BranchDest,
    pub rm2_offset: u8,
    pub disable_clk: bool,
    pub predicted: bool,
}

impl DecodedInst {
    /// Extension word `index`, or zero when the instruction is shorter
    pub fn word(&self, index: usize) -> u16 {
        self.words.get(index).copied().unwrap_or(0)
    }
}
