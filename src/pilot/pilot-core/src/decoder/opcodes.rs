use super::Decoder;
use crate::constants::flags;
use crate::control::{
    AluOp, BranchCond, BranchDest, Bus, DataSize, MicroKind, MicroSpec, OverflowMode, Shifter, SrcControl,
    ZeroMode,
};

type Handler = fn(&mut Decoder, u16) -> Result<(), &'static str>;

/// One decode rule: `opcode & mask == value` selects `handler`
pub(super) struct Rule {
    pub mask: u16,
    pub value: u16,
    pub name: &'static str,
    pub handler: Handler,
}

const fn rule(mask: u16, value: u16, name: &'static str, handler: Handler) -> Rule {
    Rule {
        mask,
        value,
        name,
        handler,
    }
}

/// Decode rules in priority order; the first match wins
///
/// Rules are grouped by instruction class and every class ends in a catch-all,
/// so an opcode never falls through into another class.
pub(super) static RULES: &[Rule] = &[
    // Branch class
    rule(0xFF00, 0xFF00, "RST", rst),
    rule(0xFFE0, 0xFE00, "REPI", repi),
    rule(0xF8FF, 0xF000, "REPR", repr),
    rule(0xF880, 0xF080, "DJNZ", djnz),
    rule(0xF000, 0xE000, "JR", jr),
    rule(0xFF00, 0xF800, "JP hml", jp_hml),
    rule(0xFF00, 0xF900, "CALL hml", call_hml),
    rule(0xFFC0, 0xFA00, "JP rm", jp_rm),
    rule(0xFFC0, 0xFA40, "JEA", jea),
    rule(0xFFC0, 0xFB00, "CALL rm", call_rm),
    rule(0xFFC0, 0xFB40, "CEA", cea),
    rule(0xE000, 0xE000, "branch", invalid),
    // Bit class
    rule(0xFFF8, 0xDB00, "LD IRL", ld_irl),
    rule(0xFC00, 0xDC00, "F op", flag_op),
    rule(0xF800, 0xD000, "bit imm", bit_imm),
    rule(0xF800, 0xD800, "bit P0", bit_p0),
    // Miscellaneous loads
    rule(0xF800, 0xC000, "LD.P hml", ld_hml),
    rule(0xF800, 0xC800, "LDQ", ldq),
    // Arithmetic and logic
    rule(0x38C0, 0x38C0, "arith imm", arith_imm),
    rule(0x2000, 0x2000, "arith", arith),
    // Main load group
    rule(0xF0C0, 0x90C0, "LEA", lea),
    rule(0xB8C0, 0x18C0, "LDSX", ldsx),
    rule(0x30C0, 0x10C0, "load", invalid),
    rule(0x3000, 0x1000, "LD", ld),
    // Everything else
    rule(0xFFFF, 0x0000, "NOP", nop),
    rule(0xFFFF, 0x0001, "HALT", halt),
    rule(0x8FC0, 0x0100, "LD F", ld_flags),
    rule(0x8FC0, 0x0700, "LD rm,F", st_flags),
    rule(0x3840, 0x0040, "ADQ", adq),
    rule(0x38C0, 0x0080, "shift", shift),
    rule(0x3FC0, 0x0800, "TST", tst),
    rule(0x3FC0, 0x0840, "CPL", cpl),
    rule(0x3FC0, 0x0880, "NEG", neg),
    rule(0x3F00, 0x0800, "NGX", ngx),
    rule(0x3880, 0x0800, "MUL", mul),
    rule(0x38C0, 0x0880, "DIV", div),
    rule(0x0000, 0x0000, "other", invalid),
];

static CATCH_ALL: Rule = rule(0x0000, 0x0000, "unmatched", invalid);

pub(super) fn lookup(opcode: u16) -> &'static Rule {
    match RULES.iter().find(|rule| opcode & rule.mask == rule.value) {
        Some(rule) => rule,
        None => &CATCH_ALL,
    }
}

fn opcode_size(opcode: u16) -> Result<DataSize, &'static str> {
    DataSize::from_bits(opcode >> 14).ok_or("reserved operand size")
}

fn rm_field(opcode: u16) -> u8 {
    (opcode & 0x3F) as u8
}

fn invalid(_d: &mut Decoder, _opcode: u16) -> Result<(), &'static str> {
    Err("no such instruction")
}

fn rst(d: &mut Decoder, _opcode: u16) -> Result<(), &'static str> {
    d.check_no_prefix()?;
    d.set_branch(BranchCond::AlwaysCall, BranchDest::Restart);
    Ok(())
}

fn repi(d: &mut Decoder, _opcode: u16) -> Result<(), &'static str> {
    if d.prefix == Some(MicroKind::Repi) {
        return Err("repeat after REPI");
    }
    d.load_into(
        SrcControl::new(Bus::Imm0, DataSize::Byte),
        Bus::LatchRepi,
        DataSize::Byte,
    );
    let core = d.core();
    core.add1 = true;
    core.z_mode = ZeroMode::SaveToAux;
    d.inst.repeat_op = Some(MicroSpec::new(MicroKind::Repi, DataSize::Byte));
    Ok(())
}

fn repr(d: &mut Decoder, _opcode: u16) -> Result<(), &'static str> {
    if d.prefix == Some(MicroKind::Repi) {
        return Err("repeat after REPI");
    }
    d.load_into(
        SrcControl::new(Bus::Imm0, DataSize::Word),
        Bus::LatchRepr,
        DataSize::Long,
    );
    d.inst.run_before = Some(MicroSpec::new(MicroKind::AdjustPgc, DataSize::Long));
    d.inst.repeat_op = Some(MicroSpec::new(MicroKind::Repr, DataSize::Long));
    Ok(())
}

fn djnz(d: &mut Decoder, _opcode: u16) -> Result<(), &'static str> {
    d.check_no_prefix()?;
    let core = d.core();
    core.op = AluOp::Add;
    core.srcs[0] = SrcControl::new(Bus::RegOpcode, DataSize::Long);
    core.srcs[1] = SrcControl::new(Bus::Zero, DataSize::Long);
    core.add1 = true;
    core.negate = true;
    core.z_mode = ZeroMode::SaveToAux;
    core.dest = Bus::RegOpcode;
    d.inst.run_after = Some(
        MicroSpec::new(MicroKind::IndPgcWithImmShift, DataSize::Long).suppressed(true),
    );
    d.set_branch(BranchCond::Djnz, BranchDest::Mar);
    Ok(())
}

fn jr(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    d.check_no_prefix()?;
    let core = d.core();
    core.op = AluOp::Add;
    core.srcs[0] = SrcControl::new(Bus::Pgc, DataSize::Long);
    core.srcs[1] = SrcControl::signed(Bus::Imm0, DataSize::Byte);
    core.shifter = Shifter::Left;
    core.dest = Bus::MemAddr;
    d.set_branch(BranchCond::from_field(opcode >> 8), BranchDest::Mar);
    Ok(())
}

fn hml_branch(d: &mut Decoder, cond: BranchCond) -> Result<(), &'static str> {
    d.check_no_prefix()?;
    d.queue_words(1);
    d.inst.run_after =
        Some(MicroSpec::new(MicroKind::IndPgcWithHml, DataSize::Long).suppressed(true));
    d.set_branch(cond, BranchDest::Hml);
    Ok(())
}

fn jp_hml(d: &mut Decoder, _opcode: u16) -> Result<(), &'static str> {
    hml_branch(d, BranchCond::Always)
}

fn call_hml(d: &mut Decoder, _opcode: u16) -> Result<(), &'static str> {
    hml_branch(d, BranchCond::AlwaysCall)
}

/// Branch to the 24-bit value of an RM operand
fn rm_branch(d: &mut Decoder, opcode: u16, cond: BranchCond) -> Result<(), &'static str> {
    d.check_no_prefix()?;
    d.decode_rm(rm_field(opcode), false, false, DataSize::Long)?;
    let core = d.core();
    core.op = AluOp::Or;
    core.srcs[0] = SrcControl::new(Bus::Zero, DataSize::Long);
    core.dest = Bus::MemAddr;
    d.set_branch(cond, BranchDest::Mar);
    Ok(())
}

/// Branch to the effective address of a memory operand
fn ea_branch(d: &mut Decoder, opcode: u16, cond: BranchCond) -> Result<(), &'static str> {
    d.check_no_prefix()?;
    d.core().suppress = true;
    let mode = d.decode_rm(rm_field(opcode), false, false, DataSize::Long)?;
    if !mode.is_memory() {
        return Err("effective address of a non-memory operand");
    }
    d.core().suppress = false;
    d.set_branch(cond, BranchDest::Mar);
    Ok(())
}

fn jp_rm(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    rm_branch(d, opcode, BranchCond::Always)
}

fn jea(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    ea_branch(d, opcode, BranchCond::Always)
}

fn call_rm(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    rm_branch(d, opcode, BranchCond::AlwaysCall)
}

fn cea(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    ea_branch(d, opcode, BranchCond::AlwaysCall)
}

fn ld_irl(d: &mut Decoder, _opcode: u16) -> Result<(), &'static str> {
    d.load_into(
        SrcControl::new(Bus::Imm0, DataSize::Byte),
        Bus::Irl,
        DataSize::Byte,
    );
    Ok(())
}

fn flag_op(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    let core = d.core();
    core.srcs[0] = SrcControl::new(Bus::F, DataSize::Byte);
    core.srcs[1] = SrcControl::new(Bus::Imm0, DataSize::Byte);
    core.dest = Bus::F;
    core.op = match (opcode >> 8) & 0x3 {
        0 => AluOp::And,
        1 => AluOp::Xor,
        2 => AluOp::Or,
        _ => {
            core.srcs[0].location = Bus::Zero;
            AluOp::Or
        }
    };
    Ok(())
}

/// BIT/CHG/RES/SET on an 8-bit operand against the one-hot mask on `mask`
fn bit_op(d: &mut Decoder, opcode: u16, mask: Bus) -> Result<(), &'static str> {
    let sub = (opcode >> 6) & 0x3;
    d.decode_rm(rm_field(opcode), sub != 0, true, DataSize::Byte)?;
    let core = d.core();
    core.srcs[1] = SrcControl::new(mask, DataSize::Byte);
    core.flag_mask = flags::ZERO;
    core.z_mode = ZeroMode::BitTest;
    match sub {
        0 => {
            core.op = AluOp::Or;
            core.dest = Bus::Zero;
        }
        1 => core.op = AluOp::Xor,
        2 => {
            core.op = AluOp::And;
            core.add1 = true;
            core.negate = true;
        }
        _ => core.op = AluOp::Or,
    }
    Ok(())
}

fn bit_imm(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    bit_op(d, opcode, Bus::DmxImm)
}

fn bit_p0(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    bit_op(d, opcode, Bus::DmxP0)
}

fn ld_hml(d: &mut Decoder, _opcode: u16) -> Result<(), &'static str> {
    d.queue_words(1);
    d.load_into(
        SrcControl::new(Bus::ImmHml, DataSize::Long),
        Bus::RegOpcode,
        DataSize::Long,
    );
    Ok(())
}

fn ldq(d: &mut Decoder, _opcode: u16) -> Result<(), &'static str> {
    d.load_into(
        SrcControl::signed(Bus::Imm0, DataSize::Byte),
        Bus::RegOpcode,
        DataSize::Long,
    );
    Ok(())
}

/// Sets the ALU operation of an arithmetic/logic opcode; `true` for CP
fn arith_operation(d: &mut Decoder, operation: u16) -> bool {
    let core = d.core();
    match operation & 0x7 {
        op @ 0..=3 => {
            core.op = AluOp::Add;
            core.add_carry = op & 1 != 0;
            core.negate = op & 2 != 0;
            core.invert_carries = op & 2 != 0;
            core.flag_mask = flags::SZVCX;
            false
        }
        4 => {
            core.op = AluOp::And;
            core.flag_mask = flags::SZVC;
            false
        }
        5 => {
            core.op = AluOp::Xor;
            core.flag_mask = flags::SZVC;
            false
        }
        6 => {
            core.op = AluOp::Or;
            core.flag_mask = flags::SZVC;
            false
        }
        _ => {
            core.op = AluOp::Add;
            core.negate = true;
            core.invert_carries = true;
            core.flag_mask = flags::SZVC;
            true
        }
    }
}

fn arith(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    let operation = ((opcode & 0x00C0) >> 6) | ((opcode & 0x1800) >> 9);
    let size = opcode_size(opcode)?;
    let is_compare = arith_operation(d, operation);
    let rm = rm_field(opcode);

    if operation & 0x8 == 0 {
        // reg op= rm
        d.decode_rm(rm, false, false, size)?;
        let core = d.core();
        core.srcs[1].sign_extend = is_compare;
        core.srcs[0] = SrcControl::new(Bus::RegOpcode, size);
        core.dest = if is_compare { Bus::Zero } else { Bus::RegOpcode };
    } else {
        // rm op= reg
        d.decode_rm(rm, true, true, size)?;
        d.core().srcs[1] = SrcControl::new(Bus::RegOpcode, size);
    }
    Ok(())
}

fn arith_imm(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    let size = opcode_size(opcode)?;
    let is_compare = arith_operation(d, (opcode & 0x0700) >> 8);

    let location = if size == DataSize::Long {
        d.queue_words(2);
        Bus::ImmHmlRm
    } else {
        d.queue_words(1);
        Bus::Imm1
    };
    d.core().srcs[1] = SrcControl {
        location,
        size,
        sign_extend: is_compare,
    };

    // The RM operand's extension words follow the immediate
    d.rm_ops += 1;
    d.decode_rm(rm_field(opcode), !is_compare, true, size)?;
    if is_compare {
        d.core().dest = Bus::Zero;
    }
    Ok(())
}

fn lea(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    d.core().suppress = true;
    let mode = d.decode_rm(rm_field(opcode), false, false, DataSize::Long)?;
    if !mode.is_memory() {
        return Err("effective address of a non-memory operand");
    }
    let core = d.core();
    core.suppress = false;
    core.op = AluOp::Or;
    core.srcs[0] = SrcControl::new(Bus::Zero, DataSize::Long);
    core.srcs[1] = SrcControl::new(Bus::MemAddr, DataSize::Long);
    core.dest = Bus::RegOpcode;
    Ok(())
}

fn ldsx(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    let size = opcode_size(opcode)?;
    d.decode_rm(rm_field(opcode), false, false, size)?;
    let core = d.core();
    core.op = AluOp::Or;
    core.srcs[0] = SrcControl::new(Bus::Zero, DataSize::Long);
    core.srcs[1].sign_extend = true;
    core.dest = Bus::RegOpcode;
    Ok(())
}

fn ld(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    let size = opcode_size(opcode)?;
    let core = d.core();
    core.op = AluOp::Or;
    core.srcs[0] = SrcControl::new(Bus::Zero, size);
    d.decode_rm(rm_field(opcode), false, false, size)?;
    d.decode_rm(((opcode >> 6) & 0x3F) as u8, true, false, size)?;
    Ok(())
}

fn nop(_d: &mut Decoder, _opcode: u16) -> Result<(), &'static str> {
    Ok(())
}

fn halt(d: &mut Decoder, _opcode: u16) -> Result<(), &'static str> {
    d.inst.disable_clk = true;
    Ok(())
}

fn flags_bus(size: DataSize) -> Result<Bus, &'static str> {
    match size {
        DataSize::Byte => Ok(Bus::F),
        DataSize::Word => Ok(Bus::Wf),
        DataSize::Long => Err("flags are at most 16 bits"),
    }
}

fn ld_flags(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    let size = opcode_size(opcode)?;
    let dest = flags_bus(size)?;
    let core = d.core();
    core.op = AluOp::Or;
    core.srcs[0] = SrcControl::new(Bus::Zero, size);
    d.decode_rm(rm_field(opcode), false, false, size)?;
    d.core().dest = dest;
    Ok(())
}

fn st_flags(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    let size = opcode_size(opcode)?;
    let src = flags_bus(size)?;
    let core = d.core();
    core.op = AluOp::Or;
    core.srcs[0] = SrcControl::new(Bus::Zero, size);
    core.srcs[1] = SrcControl::new(src, size);
    d.decode_rm(rm_field(opcode), true, false, size)?;
    Ok(())
}

/// Decodes a read-modify-write RM operand as ALU input 2, with input 1 zero
fn unary_rmw(d: &mut Decoder, opcode: u16, size: DataSize) -> Result<(), &'static str> {
    d.decode_rm(rm_field(opcode), true, true, size)?;
    let core = d.core();
    core.srcs[1] = core.srcs[0];
    core.srcs[0] = SrcControl::new(Bus::Zero, size);
    Ok(())
}

fn adq(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    let size = opcode_size(opcode)?;
    d.decode_rm(rm_field(opcode), true, true, size)?;
    let core = d.core();
    core.op = AluOp::Add;
    core.srcs[1] = SrcControl::new(Bus::Sfi2, size);
    core.add1 = true;
    core.negate = opcode & 0x0080 != 0;
    core.invert_carries = core.negate;
    core.flag_mask = flags::SZVC;
    Ok(())
}

fn shift(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    let size = opcode_size(opcode)?;
    unary_rmw(d, opcode, size)?;
    let core = d.core();
    core.op = AluOp::Or;
    core.flag_mask = flags::SZVCX;
    core.shifter = match (opcode >> 8) & 0x7 {
        0 => Shifter::LeftCarry,
        1 => Shifter::RightCarry,
        2 => Shifter::LeftBarrel,
        3 => Shifter::RightBarrel,
        4 => Shifter::Left,
        5 => Shifter::RightArith,
        6 => Shifter::Swap,
        _ => Shifter::RightLogical,
    };
    Ok(())
}

fn tst(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    let size = opcode_size(opcode)?;
    d.decode_rm(rm_field(opcode), false, false, size)?;
    let core = d.core();
    core.op = AluOp::And;
    core.srcs[0] = SrcControl::new(Bus::P(0), size);
    core.flag_mask = flags::SZV;
    core.v_mode = OverflowMode::ShifterCarry;
    core.dest = Bus::Zero;
    Ok(())
}

/// CPL, NEG and NGX: `0 | transform(rm) -> rm`
fn negation(d: &mut Decoder, opcode: u16, add1: bool, add_carry: bool) -> Result<(), &'static str> {
    let size = opcode_size(opcode)?;
    unary_rmw(d, opcode, size)?;
    let core = d.core();
    core.op = AluOp::Or;
    core.add1 = add1;
    core.add_carry = add_carry;
    core.negate = true;
    core.invert_carries = add_carry;
    core.flag_mask = flags::SZV;
    core.v_mode = OverflowMode::ShifterCarry;
    Ok(())
}

fn cpl(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    negation(d, opcode, true, false)
}

fn neg(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    negation(d, opcode, false, false)
}

fn ngx(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    negation(d, opcode, false, true)
}

/// Loads FACTOR_B from the RM operand and sets up the shift-and-add loop
fn muldiv_common(d: &mut Decoder, opcode: u16) -> Result<DataSize, &'static str> {
    let size = opcode_size(opcode)?;
    let core = d.core();
    core.op = AluOp::Or;
    core.srcs[0] = SrcControl::new(Bus::Zero, size);
    d.decode_rm(rm_field(opcode), false, false, size)?;
    d.core().dest = Bus::FactorB;
    Ok(size)
}

fn mul(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    let size = muldiv_common(d, opcode)?;
    d.attach_after(MicroSpec::new(MicroKind::MulLdFactorA, size))?;
    let select = (((opcode >> 3) & 0x8) | ((opcode >> 2) & 0x10)) as u8;
    d.inst.repeat_op = Some(MicroSpec::new(MicroKind::MulShiftProductLo, size).with_select(select));
    Ok(())
}

fn div(d: &mut Decoder, opcode: u16) -> Result<(), &'static str> {
    let size = muldiv_common(d, opcode)?;
    d.core().z_mode = ZeroMode::SaveToAux;
    d.attach_after(MicroSpec::new(MicroKind::DivTestDividendHi, size))?;
    let select = ((opcode >> 3) & 0x8) as u8;
    d.inst.repeat_op = Some(MicroSpec::new(MicroKind::DivShiftDividendLo, size).with_select(select));
    d.set_branch(BranchCond::Djnz, BranchDest::DivZero);
    Ok(())
}
