use crate::constants::{flags, registers};
use crate::control::{
    AluOp, Bus, ControlWord, DataSize, MemData, MemLatch, MicroEntry, MicroKind, MicroSpec, Next,
    OverflowMode, Shifter, SrcControl, ZeroMode,
};
use crate::error::CoreError;

/// Looks up the control word for `spec` and the entry that follows it
pub fn entry(spec: &MicroSpec) -> Result<MicroEntry, CoreError> {
    let entry = match spec.kind {
        MicroKind::IndImm => ind_imm(spec, Bus::Imm1),
        MicroKind::IndImmRm => ind_imm(spec, Bus::Rm1),
        MicroKind::IndImm0 => ind_imm0(spec),
        MicroKind::IndReg => ind_reg(spec),
        MicroKind::IndRegPostInc => ind_reg_post_inc(spec),
        MicroKind::IndRegPreDec => ind_reg_pre_dec(spec),
        MicroKind::IndRegWithImm => ind_reg_with_imm(spec),
        MicroKind::IndRegWithBits => ind_reg_with_bits(spec),
        MicroKind::IndImmWithBits => ind_imm_with_bits(spec),
        MicroKind::IndPgcWithImm => ind_pgc_with_imm(spec),
        MicroKind::IndPgcWithImmShift => ind_pgc_with_imm_shift(spec),
        MicroKind::IndPgcWithImmRm => ind_pgc_with_imm_rm(spec),
        MicroKind::IndPgcWithHml => ind_pgc_with(spec, Bus::ImmHml),
        MicroKind::IndPgcWithHmlRm => ind_pgc_with(
            spec,
            if spec.is_second() {
                Bus::RmHml
            } else {
                Bus::ImmHmlRm
            },
        ),
        MicroKind::IndMarAuto => mar_auto(spec),
        MicroKind::IndMarPostAuto => mar_post_auto(spec),
        MicroKind::IndMarRewind => mar_rewind(spec),
        MicroKind::PostAutoIdx => post_auto_idx(spec),
        MicroKind::Repi | MicroKind::RepiLoop => repi(spec),
        MicroKind::Repr => repr(spec),
        MicroKind::AdjustPgc => adjust_pgc(spec),
        MicroKind::MulLdFactorA => mul_ld_factor_a(spec),
        MicroKind::MulLdProductLo => mul_ld_product_lo(spec),
        MicroKind::MulLdProductHi => mul_ld_product_hi(spec),
        MicroKind::MulDivLdRepi => muldiv_ld_repi(spec),
        MicroKind::MulShiftProductLo => mul_shift_product_lo(spec),
        MicroKind::MulShiftProductHi => mul_shift_product_hi(spec),
        MicroKind::MulShiftFactorB => mul_shift_factor_b(spec),
        MicroKind::MulAddProductLo => mul_add_product_lo(spec),
        MicroKind::MulAddProductHi => mul_add_product_hi(spec),
        MicroKind::PushPgcIndSpAuto => push_ind_sp_auto(spec, MicroKind::PushPgcWrPgc, DataSize::Long),
        MicroKind::PushPgcWrPgc => push_write(spec, Bus::Pgc, DataSize::Long),
        MicroKind::PushWfIndSpAuto => push_ind_sp_auto(spec, MicroKind::PushWfWrWf, DataSize::Word),
        MicroKind::PushWfWrWf => push_write(spec, Bus::Wf, DataSize::Word),
        kind @ (MicroKind::DivTestDividendHi
        | MicroKind::DivTestFactorB
        | MicroKind::DivShiftDividendLo
        | MicroKind::DivShiftDividendHi
        | MicroKind::DivSubFactorB
        | MicroKind::DivAddDividendLoCarry
        | MicroKind::DivStProductLo
        | MicroKind::DivStProductHi) => return Err(CoreError::NotImplemented(kind)),
    };
    Ok(entry)
}

/// Entry every other one starts from: no ALU work, a plain access of `spec.size`
///
/// Unsuppressed 24-bit accesses continue with the high byte at MAR + 2.
fn base(spec: &MicroSpec) -> MicroEntry {
    let op = ControlWord {
        srcs: [
            SrcControl::new(Bus::Zero, DataSize::Long),
            SrcControl::new(Bus::Zero, spec.size),
        ],
        is_16bit: spec.size != DataSize::Byte,
        mem_data: if spec.is_write {
            MemData::WriteFromMdr
        } else {
            MemData::Read
        },
        suppress: spec.suppress,
        ..ControlWord::default()
    };
    let next = if spec.size == DataSize::Long && !spec.suppress {
        Next::Continue(MicroSpec {
            kind: MicroKind::IndMarAuto,
            size: DataSize::Byte,
            ..*spec
        })
    } else {
        Next::Done
    };
    MicroEntry { op, next }
}

fn continue_with(spec: &MicroSpec, kind: MicroKind, size: DataSize) -> Next {
    Next::Continue(MicroSpec {
        kind,
        size,
        ..*spec
    })
}

/// Address operand: a 16-bit sign-extended or a 24-bit field
fn address_field(location: Bus, spec: &MicroSpec) -> SrcControl {
    if spec.is_short() {
        SrcControl::signed(location, DataSize::Word)
    } else {
        SrcControl::new(location, DataSize::Long)
    }
}

fn ind_imm(spec: &MicroSpec, location: Bus) -> MicroEntry {
    let mut prg = base(spec);
    prg.op.srcs[0] = address_field(location, spec);
    prg.op.mem_latch = MemLatch::Half1;
    prg
}

fn ind_imm0(spec: &MicroSpec) -> MicroEntry {
    let mut prg = base(spec);
    prg.op.srcs[0] = SrcControl::new(Bus::Imm0, DataSize::Byte);
    prg.op.mem_latch = MemLatch::Half1;
    prg
}

fn ind_reg(spec: &MicroSpec) -> MicroEntry {
    let mut prg = base(spec);
    prg.op.srcs[0] = SrcControl::new(Bus::P(spec.reg() as u8), DataSize::Long);
    prg.op.mem_latch = MemLatch::Half1;
    prg
}

fn ind_reg_post_inc(spec: &MicroSpec) -> MicroEntry {
    let mut prg = ind_reg(spec);
    prg.next = if spec.size == DataSize::Long {
        continue_with(spec, MicroKind::IndMarPostAuto, DataSize::Byte)
    } else {
        continue_with(spec, MicroKind::PostAutoIdx, spec.size)
    };
    prg
}

/// `reg - SIZE -> reg`, then access the new address
fn ind_reg_pre_dec(spec: &MicroSpec) -> MicroEntry {
    let mut prg = ind_reg(spec);
    prg.op.srcs[1].location = Bus::Size;
    prg.op.negate = true;
    prg.op.op = AluOp::Add;
    prg.op.dest = prg.op.srcs[0].location;
    prg.op.mem_latch = MemLatch::Half2;
    prg
}

fn ind_reg_with_imm(spec: &MicroSpec) -> MicroEntry {
    let mut prg = ind_reg(spec);
    let location = if spec.is_second() { Bus::Rm1 } else { Bus::Imm1 };
    prg.op.srcs[1] = SrcControl::signed(location, DataSize::Word);
    prg.op.op = AluOp::Add;
    prg.op.mem_latch = MemLatch::Half2;
    prg
}

fn ind_reg_with_bits(spec: &MicroSpec) -> MicroEntry {
    let mut prg = base(spec);
    let (base_reg, index_reg) = if spec.is_second() {
        (Bus::BaseRegRm, Bus::IndexRegRm)
    } else {
        (Bus::BaseReg, Bus::IndexReg)
    };
    prg.op.srcs[0] = SrcControl::new(base_reg, DataSize::Long);
    prg.op.srcs[1] = SrcControl::new(index_reg, DataSize::Long);
    prg.op.op = AluOp::Add;
    prg.op.mem_latch = MemLatch::Half2;
    prg
}

fn ind_imm_with_bits(spec: &MicroSpec) -> MicroEntry {
    let mut prg = base(spec);
    let (address, index_reg) = if spec.is_second() {
        (Bus::RmHml, Bus::AbsIndexRegRm)
    } else {
        (Bus::ImmHmlRm, Bus::AbsIndexReg)
    };
    prg.op.srcs[0] = SrcControl::new(address, DataSize::Long);
    prg.op.srcs[1] = SrcControl::new(index_reg, DataSize::Long);
    prg.op.op = AluOp::Add;
    prg.op.mem_latch = MemLatch::Half2;
    prg
}

fn ind_pgc_with_imm(spec: &MicroSpec) -> MicroEntry {
    let mut prg = base(spec);
    prg.op.srcs[0] = SrcControl::new(Bus::Pgc, DataSize::Long);
    prg.op.srcs[1] = SrcControl::signed(Bus::Imm0, DataSize::Byte);
    prg.op.op = AluOp::Add;
    prg.op.mem_latch = MemLatch::Half2;
    prg
}

/// Word-scaled PGC-relative address, computed into MAR without an access
fn ind_pgc_with_imm_shift(spec: &MicroSpec) -> MicroEntry {
    let mut prg = ind_pgc_with_imm(spec);
    prg.op.shifter = Shifter::Left;
    prg.op.suppress = true;
    prg.next = Next::Done;
    prg
}

fn ind_pgc_with_imm_rm(spec: &MicroSpec) -> MicroEntry {
    let mut prg = base(spec);
    let location = if spec.is_second() { Bus::Rm1 } else { Bus::Imm1 };
    prg.op.srcs[0] = SrcControl::new(Bus::Pgc, DataSize::Long);
    prg.op.srcs[1] = address_field(location, spec);
    prg.op.op = AluOp::Add;
    prg.op.mem_latch = MemLatch::Half2;
    prg
}

fn ind_pgc_with(spec: &MicroSpec, location: Bus) -> MicroEntry {
    let mut prg = base(spec);
    prg.op.srcs[0] = SrcControl::new(Bus::Pgc, DataSize::Long);
    prg.op.srcs[1] = SrcControl::new(location, DataSize::Long);
    prg.op.op = AluOp::Add;
    prg.op.mem_latch = MemLatch::Half2;
    prg
}

/// Second cycle of a 24-bit access: the byte at MAR + 2 holds bits 16-23
fn mar_auto(spec: &MicroSpec) -> MicroEntry {
    let mut prg = base(&MicroSpec {
        size: DataSize::Byte,
        ..*spec
    });
    prg.op.srcs[0] = SrcControl::new(Bus::MemAddr, DataSize::Long);
    prg.op.srcs[1] = SrcControl::new(Bus::Size, DataSize::Word);
    prg.op.op = AluOp::Add;
    prg.op.mem_latch = MemLatch::Half2;
    prg.op.mem_data = if spec.is_write {
        MemData::WriteFromMdrHigh
    } else {
        MemData::ReadHigh
    };
    prg
}

fn mar_post_auto(spec: &MicroSpec) -> MicroEntry {
    let mut prg = mar_auto(spec);
    prg.next = continue_with(spec, MicroKind::PostAutoIdx, DataSize::Long);
    prg
}

/// Steps MAR back to the low word of a 24-bit operand and writes MDR there
fn mar_rewind(spec: &MicroSpec) -> MicroEntry {
    let mut prg = base(spec);
    prg.op.srcs[0] = SrcControl::new(Bus::MemAddr, DataSize::Long);
    prg.op.srcs[1] = SrcControl::new(Bus::Size, DataSize::Word);
    prg.op.negate = true;
    prg.op.op = AluOp::Add;
    prg.op.mem_latch = MemLatch::Half2;
    prg.op.mem_data = MemData::WriteFromMdr;
    prg.op.is_16bit = true;
    prg
}

fn post_auto_idx(spec: &MicroSpec) -> MicroEntry {
    let mut prg = ind_reg(spec);
    prg.op.srcs[1].location = Bus::Size;
    prg.op.op = AluOp::Add;
    prg.op.dest = prg.op.srcs[0].location;
    prg.op.mem_latch = MemLatch::None;
    prg.next = Next::Done;
    prg
}

/// Decrement the immediate repeat latch; `latch_aux` is set when it hits zero
fn repi(spec: &MicroSpec) -> MicroEntry {
    let mut prg = base(spec);
    prg.op.srcs[0] = SrcControl::new(Bus::LatchRepi, DataSize::Byte);
    prg.op.srcs[1] = SrcControl::signed(Bus::Zero, DataSize::Byte);
    prg.op.op = AluOp::Add;
    prg.op.add1 = true;
    prg.op.negate = true;
    prg.op.z_mode = ZeroMode::SaveToAux;
    prg.op.dest = Bus::LatchRepi;
    prg.next = Next::Done;
    prg
}

/// Decrement the register named by the REPR latch
fn repr(spec: &MicroSpec) -> MicroEntry {
    let mut prg = base(spec);
    prg.op.srcs[0] = SrcControl::new(Bus::RepeatReg, DataSize::Long);
    prg.op.srcs[1] = SrcControl::signed(Bus::Zero, DataSize::Long);
    prg.op.op = AluOp::Add;
    prg.op.add1 = true;
    prg.op.negate = true;
    prg.op.dest = Bus::RepeatReg;
    prg.next = Next::Done;
    prg
}

fn adjust_pgc(spec: &MicroSpec) -> MicroEntry {
    let mut prg = base(spec);
    prg.op.srcs[0] = SrcControl::new(Bus::Pgc, DataSize::Long);
    prg.op.srcs[1] = SrcControl::new(Bus::Size, DataSize::Word);
    prg.op.op = AluOp::Add;
    prg.op.negate = true;
    prg.op.dest = Bus::Pgc;
    prg.next = Next::Done;
    prg
}

/// `0 | src -> dest` at `spec.size`, then `next`
fn mul_load(spec: &MicroSpec, src: Bus, dest: Bus, next: Next) -> MicroEntry {
    let mut prg = base(spec);
    prg.op.srcs[0] = SrcControl::new(Bus::Zero, spec.size);
    prg.op.srcs[1] = SrcControl::new(src, spec.size);
    prg.op.op = AluOp::Or;
    prg.op.dest = dest;
    prg.next = next;
    prg
}

fn mul_ld_factor_a(spec: &MicroSpec) -> MicroEntry {
    let next = continue_with(spec, MicroKind::MulLdProductLo, spec.size);
    mul_load(spec, Bus::RegOpcode, Bus::FactorA, next)
}

fn mul_ld_product_lo(spec: &MicroSpec) -> MicroEntry {
    let next = continue_with(spec, MicroKind::MulLdProductHi, spec.size);
    mul_load(spec, Bus::Zero, Bus::RegOpcode, next)
}

fn mul_ld_product_hi(spec: &MicroSpec) -> MicroEntry {
    let next = continue_with(spec, MicroKind::MulDivLdRepi, spec.size);
    mul_load(spec, Bus::Zero, Bus::ProductHigh, next)
}

fn muldiv_ld_repi(spec: &MicroSpec) -> MicroEntry {
    let mut prg = mul_load(spec, Bus::NumBits, Bus::LatchRepi, Next::Done);
    prg.op.srcs[0] = SrcControl::new(Bus::Zero, DataSize::Byte);
    prg
}

/// One-bit left shift of `reg` through `latch_aux`
fn mul_shift(spec: &MicroSpec, reg: Bus, shifter: Shifter, next: MicroKind) -> MicroEntry {
    let mut prg = mul_load(spec, reg, reg, continue_with(spec, next, spec.size));
    prg.op.shifter = shifter;
    prg.op.aux_as_extend = true;
    prg
}

fn mul_shift_product_lo(spec: &MicroSpec) -> MicroEntry {
    mul_shift(spec, Bus::RegOpcode, Shifter::Left, MicroKind::MulShiftProductHi)
}

fn mul_shift_product_hi(spec: &MicroSpec) -> MicroEntry {
    mul_shift(spec, Bus::ProductHigh, Shifter::LeftCarry, MicroKind::MulShiftFactorB)
}

/// The multiplier bit shifted out of FACTOR_B lands in V
fn mul_shift_factor_b(spec: &MicroSpec) -> MicroEntry {
    let mut prg = mul_shift(spec, Bus::FactorB, Shifter::LeftCarry, MicroKind::MulAddProductLo);
    prg.op.v_mode = OverflowMode::ShifterCarry;
    prg.op.flag_mask = flags::OVERFLOW;
    prg
}

fn mul_add_product_lo(spec: &MicroSpec) -> MicroEntry {
    let mut prg = base(spec);
    prg.op.srcs[0] = SrcControl::new(Bus::RegOpcode, spec.size);
    prg.op.srcs[1] = SrcControl {
        location: Bus::FactorA,
        size: spec.size,
        sign_extend: spec.is_short(),
    };
    prg.op.op = AluOp::Add;
    // The first pass of a signed multiply subtracts the multiplicand
    prg.op.negate = spec.is_second();
    prg.op.and_with_overflow = true;
    prg.op.aux_as_extend = true;
    prg.op.flag_mask = flags::ZERO;
    prg.op.dest = Bus::RegOpcode;
    prg.next = continue_with(spec, MicroKind::MulAddProductHi, spec.size);
    prg
}

fn mul_add_product_hi(spec: &MicroSpec) -> MicroEntry {
    let mut prg = base(spec);
    let extension = match (spec.is_short(), spec.is_second()) {
        (false, _) => Bus::Zero,
        (true, false) => Bus::FactorASign,
        (true, true) => Bus::FactorASignInv,
    };
    prg.op.srcs[0] = SrcControl::new(Bus::ProductHigh, spec.size);
    prg.op.srcs[1] = SrcControl::new(extension, spec.size);
    prg.op.op = AluOp::Add;
    prg.op.add_carry = true;
    prg.op.and_with_overflow = true;
    prg.op.aux_as_extend = true;
    prg.op.z_mode = ZeroMode::Accumulate;
    prg.op.v_mode = OverflowMode::Clear;
    prg.op.flag_mask = flags::SIGN | flags::ZERO | flags::OVERFLOW | flags::CARRY;
    prg.op.dest = Bus::ProductHigh;
    prg.next = continue_with(spec, MicroKind::RepiLoop, DataSize::Byte);
    prg
}

/// `SP - SIZE -> SP`, latching the new SP as the address for `write`
fn push_ind_sp_auto(spec: &MicroSpec, write: MicroKind, size: DataSize) -> MicroEntry {
    let spec = MicroSpec {
        size,
        reg_select: registers::STACK_POINTER as u8,
        ..*spec
    };
    let mut prg = ind_reg_pre_dec(&spec);
    prg.op.suppress = true;
    prg.next = Next::Continue(MicroSpec {
        kind: write,
        suppress: false,
        is_write: true,
        ..spec
    });
    prg
}

fn push_write(spec: &MicroSpec, src: Bus, size: DataSize) -> MicroEntry {
    let spec = MicroSpec {
        size,
        is_write: true,
        ..*spec
    };
    let mut prg = base(&spec);
    prg.op.srcs[0] = SrcControl::new(src, size);
    prg.op.srcs[1] = SrcControl::new(Bus::Zero, size);
    prg.op.op = AluOp::Or;
    prg.op.mem_latch = MemLatch::Half2Mar;
    prg.op.mem_data = MemData::WriteFromDest;
    prg
}
