mod alu;
mod datapath;

use log::{debug, trace, warn};

use crate::constants::address_space::{ADDRESS_MASK, PGC_MASK};
use crate::constants::{flags, vectors};
use crate::control::{
    select, AluOp, BranchCond, BranchDest, Bus, ControlWord, DataSize, DecodedInst,
    InterruptCond, MemData, MemLatch, MicroKind, MicroSpec, Next,
};
use crate::decoder::{hml, restart_vector};
use crate::error::CoreError;
use crate::interconnect::ExecutePorts;
use crate::memory::MemoryController;
use crate::microcode;
use crate::registers::Registers;

pub use alu::{operate, AluResult};
pub use datapath::IllegalIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExecPhase {
    Half1Ready,
    Half1MemWait,
    Half1OperandLatch,
    Half1MemPrepare,
    Half1MemAssert,
    Half2Ready,
    Half2ResultLatch,
    Half2MemPrepare,
    Half2MemAssert,
    Half2Advance,
}

/// Which repeat mechanism a finished pass belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepeatKind {
    Prefix,   // REPI
    Register, // REPR
    Loop,     // multiply shift-and-add
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Sequence {
    WaitNextIns,
    WaitCachedIns,
    EvalControl,
    RunBefore,
    CoreOp,
    CoreOpExecuted,
    RunAfter,
    FinalSteps,
    LoopOp,
    RepeatOp,
    RepeatRegOp,
    RepeatTest(RepeatKind),
    SignalInterrupt,
    SignalBranch,
    PushPgc,
    PushWf,
}

/// Execute stage
///
/// Each cycle runs one control word: operands are latched and Half1 memory
/// accesses started in the first half, the ALU result is written back and
/// Half2 accesses started in the second. The sequencer then picks the control
/// word for the next cycle.
pub struct ExecuteUnit {
    inst: DecodedInst,    // working copy of the executing instruction
    cached: DecodedInst,  // pristine copy replayed by the repeat logic
    control: ControlWord, // control word of the current cycle
    micro: Option<MicroSpec>,
    repeat_type: Option<MicroSpec>,
    repeat_reg_type: Option<MicroSpec>,
    latches: [u32; 2],
    alu_out: u32,
    used_z: bool,
    mem_addr: u32,
    mem_data: u32,
    waiting: bool,     // an access is in flight
    pending: MemData,  // direction of the access in flight
    branch_target: u32,
    phase: ExecPhase,
    seq: Sequence,
}

impl ExecuteUnit {
    pub fn new() -> Self {
        Self {
            inst: DecodedInst::default(),
            cached: DecodedInst::default(),
            control: ControlWord::default(),
            micro: None,
            repeat_type: None,
            repeat_reg_type: None,
            latches: [0; 2],
            alu_out: 0,
            used_z: false,
            mem_addr: 0,
            mem_data: 0,
            waiting: false,
            pending: MemData::Read,
            branch_target: 0,
            phase: ExecPhase::Half2Advance,
            seq: Sequence::WaitNextIns,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn mem_addr(&self) -> u32 {
        self.mem_addr
    }

    pub fn mem_data(&self) -> u32 {
        self.mem_data
    }

    /// No instruction is in flight
    pub fn is_idle(&self) -> bool {
        self.seq == Sequence::WaitNextIns && !self.waiting
    }

    fn uses_mem_data(&self) -> bool {
        let control = &self.control;
        control.srcs[0].location == Bus::MemData
            || control.srcs[1].location == Bus::MemData
            || control.dest == Bus::MemData
    }

    fn update_backoff(&self, ports: &mut ExecutePorts<'_>) {
        let wants_bus = self.control.mem_latch != MemLatch::None && !self.control.suppress;
        *ports.memory_backoff = wants_bus || self.waiting;
    }

    /// Picks up a completed access
    fn collect<M: MemoryController>(&mut self, memctl: &M) {
        if !self.waiting || !memctl.data_ready() {
            return;
        }
        self.waiting = false;
        let data = memctl.get_data() as u32;
        match self.pending {
            MemData::Read => self.mem_data = data,
            MemData::ReadHigh => self.mem_data = (self.mem_data & 0xFFFF) | ((data & 0xFF) << 16),
            _ => {}
        }
    }

    /// Starts the access described by the current control word
    fn assert_access<M: MemoryController>(&mut self, memctl: &mut M) -> bool {
        if self.waiting {
            return false;
        }
        let control = &self.control;
        let accepted = if control.mem_data.is_write() {
            memctl.write_assert(control.is_16bit, self.mem_addr, self.mem_data as u16)
        } else {
            memctl.read_assert(control.is_16bit, self.mem_addr)
        };
        if accepted {
            self.waiting = true;
            self.pending = control.mem_data;
            self.control.mem_latch = MemLatch::None;
        }
        accepted
    }

    /// Loads MDR with write data for this half
    fn prepare_write_data(&mut self, half1: bool) -> Result<(), CoreError> {
        match self.control.mem_data {
            MemData::Read | MemData::ReadHigh | MemData::WriteFromMdr => {}
            MemData::WriteFromSrc2 if half1 => self.mem_data = self.latches[1],
            MemData::WriteFromSrc2 => {
                return Err(CoreError::MicrocodeFault("ALU input 2 is only latched in the first half"))
            }
            MemData::WriteFromDest if half1 => {
                return Err(CoreError::MicrocodeFault("ALU result is not ready in the first half"))
            }
            MemData::WriteFromDest => self.mem_data = self.alu_out,
            MemData::WriteFromMdrHigh => self.mem_data = (self.mem_data >> 16) & 0xFF,
        }
        Ok(())
    }

    pub fn half1<M: MemoryController>(
        &mut self,
        halted: bool,
        regs: &mut Registers,
        memctl: &mut M,
        mut ports: ExecutePorts<'_>,
    ) -> Result<(), CoreError> {
        if halted {
            return Ok(());
        }

        if self.phase == ExecPhase::Half1Ready {
            self.phase = ExecPhase::Half1MemWait;
        }

        if self.phase == ExecPhase::Half1MemWait {
            self.collect(memctl);
            if self.waiting && self.uses_mem_data() {
                self.update_backoff(&mut ports);
                return Ok(());
            }
            self.phase = ExecPhase::Half1OperandLatch;
        }

        if self.phase == ExecPhase::Half1OperandLatch {
            self.latch_operands(regs);
            self.phase = ExecPhase::Half1MemPrepare;
        }

        if self.phase == ExecPhase::Half1MemPrepare {
            if self.control.mem_latch == MemLatch::Half1 {
                self.mem_addr = self.latches[0] & ADDRESS_MASK;
                self.prepare_write_data(true)?;
            }
            self.phase = ExecPhase::Half1MemAssert;
        }

        if self.phase == ExecPhase::Half1MemAssert {
            if self.control.mem_latch == MemLatch::Half1 && !self.control.suppress {
                self.collect(memctl);
                if !self.assert_access(memctl) {
                    self.update_backoff(&mut ports);
                    return Ok(());
                }
            }
            self.phase = ExecPhase::Half2Ready;
        }

        self.update_backoff(&mut ports);
        Ok(())
    }

    pub fn half2<M: MemoryController>(
        &mut self,
        halted: bool,
        regs: &mut Registers,
        memctl: &mut M,
        mut ports: ExecutePorts<'_>,
    ) -> Result<(), CoreError> {
        if halted {
            return Ok(());
        }

        if self.phase == ExecPhase::Half2Ready {
            self.phase = ExecPhase::Half2ResultLatch;
        }

        if self.phase == ExecPhase::Half2ResultLatch {
            if let Some(result) = alu::operate(&self.control, self.latches, regs.flags(), regs.latch_aux) {
                self.alu_out = result.value;
                self.used_z = result.used_z;
                regs.latch_aux = result.aux;
                regs.set_flags(result.flags);
                self.write_bus(regs, self.control.dest, result.value)?;
                self.control.op = AluOp::Off;
            }
            self.phase = ExecPhase::Half2MemPrepare;
        }

        if self.phase == ExecPhase::Half2MemPrepare {
            match self.control.mem_latch {
                MemLatch::Half2 => {
                    self.mem_addr = self.alu_out & ADDRESS_MASK;
                    self.prepare_write_data(false)?;
                }
                MemLatch::Half2Mar => self.prepare_write_data(false)?,
                _ => {}
            }
            self.phase = ExecPhase::Half2MemAssert;
        }

        if self.phase == ExecPhase::Half2MemAssert {
            let latched = matches!(self.control.mem_latch, MemLatch::Half2 | MemLatch::Half2Mar);
            if latched && !self.control.suppress {
                self.collect(memctl);
                if !self.assert_access(memctl) {
                    return Ok(());
                }
            }
            self.phase = ExecPhase::Half2Advance;
        }

        if self.phase == ExecPhase::Half2Advance {
            self.advance(regs, &mut ports)?;
            self.update_backoff(&mut ports);
            self.phase = ExecPhase::Half1Ready;
        }
        Ok(())
    }

    fn latch_operands(&mut self, regs: &mut Registers) {
        for i in 0..2 {
            match self.read_bus(regs, self.control.srcs[i]) {
                Ok(value) => self.latches[i] = value,
                Err(IllegalIndex) => {
                    self.raise_illegal(regs);
                    return;
                }
            }
        }
    }

    /// Abandons the instruction and calls the illegal-opcode vector instead
    fn raise_illegal(&mut self, regs: &mut Registers) {
        debug!("Illegal index word in instruction at {:06x}", self.inst.inst_pgc);
        let length = 2 * self.inst.words.len() as u32;
        regs.pgc = self.inst.inst_pgc.wrapping_sub(length) & PGC_MASK;
        self.inst.branch = true;
        self.inst.branch_cond = BranchCond::AlwaysCall;
        self.inst.branch_dest = BranchDest::Illegal;
        self.inst.predicted = false;
        self.control.op = AluOp::Off;
        self.control.mem_latch = MemLatch::None;
        self.micro = None;
        self.repeat_type = None;
        self.repeat_reg_type = None;
        self.seq = Sequence::SignalBranch;
    }

    /// Moves the next microcode entry into the control word
    ///
    /// Returns `true` while the chain has further entries.
    fn run_micro(&mut self) -> Result<bool, CoreError> {
        let spec = match self.micro.take() {
            Some(spec) => spec,
            None => {
                self.control = ControlWord::default();
                return Ok(false);
            }
        };
        let entry = microcode::entry(&spec)?;
        trace!("Microcode {:?}", spec.kind);
        self.control = entry.op;
        match entry.next {
            Next::Continue(next) => {
                self.micro = Some(next);
                Ok(true)
            }
            Next::Done => Ok(false),
        }
    }

    fn redirect(&mut self, ports: &mut ExecutePorts<'_>, addr: u32) {
        let addr = addr & PGC_MASK;
        debug!("Execute redirects to {:06x}", addr);
        ports.execute_branch.force(addr);
        ports.resteer.force(addr);
        ports.inst_in.clear();
    }

    fn branch_taken(&self, regs: &Registers) -> bool {
        let f = regs.flags();
        let overflow = f & flags::OVERFLOW != 0;
        let carry = f & flags::CARRY != 0;
        let zero = f & flags::ZERO != 0;
        let sign = f & flags::SIGN != 0;

        match self.inst.branch_cond {
            BranchCond::Le => zero || sign != overflow,
            BranchCond::Gt => !zero && sign == overflow,
            BranchCond::Lt => sign != overflow,
            BranchCond::Ge => sign == overflow,
            BranchCond::Ule => carry || zero,
            BranchCond::Ugt => !carry && !zero,
            BranchCond::C => carry,
            BranchCond::Nc => !carry,
            BranchCond::M => sign,
            BranchCond::P => !sign,
            BranchCond::Ov => overflow,
            BranchCond::Nov => !overflow,
            BranchCond::Z => zero,
            BranchCond::Nz => !zero,
            BranchCond::Always | BranchCond::AlwaysCall => true,
            BranchCond::Djnz => !regs.latch_aux,
        }
    }

    fn branch_addr(&self) -> u32 {
        let inst = &self.inst;
        let addr = match inst.branch_dest {
            BranchDest::Mar => self.mem_addr,
            BranchDest::Hml => {
                let target = hml(inst.word(0), inst.word(1));
                // Odd targets are PGC-relative and already sit in MAR
                if target & 1 == 0 {
                    target
                } else {
                    self.mem_addr
                }
            }
            BranchDest::Restart => restart_vector(inst.word(0)),
            BranchDest::DivZero => vectors::DIV_ZERO,
            BranchDest::Illegal => vectors::ILLEGAL,
        };
        addr & PGC_MASK
    }

    fn interrupt_accepted(&self, regs: &Registers) -> bool {
        match self.inst.interrupt_cond {
            InterruptCond::Nmi => true,
            cond => regs.irl() <= cond.level(),
        }
    }

    fn start_push(&mut self, kind: MicroKind) {
        self.micro = Some(MicroSpec::new(kind, DataSize::Long));
    }

    /// Selects the control word for the next cycle
    fn advance(&mut self, regs: &mut Registers, ports: &mut ExecutePorts<'_>) -> Result<(), CoreError> {
        loop {
            match self.seq {
                Sequence::WaitNextIns => match ports.inst_in.take() {
                    Some(inst) => {
                        self.write_bus(regs, Bus::Pgc, inst.inst_pgc)?;
                        self.cached = inst.clone();
                        self.inst = inst;
                        self.seq = Sequence::EvalControl;
                    }
                    None => {
                        self.control = ControlWord::default();
                        return Ok(());
                    }
                },
                Sequence::WaitCachedIns => {
                    self.inst = self.cached.clone();
                    self.seq = Sequence::EvalControl;
                }
                Sequence::EvalControl => {
                    self.seq = if self.inst.branch && self.inst.branch_dest == BranchDest::Illegal {
                        Sequence::SignalBranch
                    } else if let Some(spec) = self.inst.run_before {
                        self.micro = Some(spec);
                        Sequence::RunBefore
                    } else {
                        Sequence::CoreOp
                    };
                }
                Sequence::RunBefore => {
                    if !self.run_micro()? {
                        self.seq = Sequence::CoreOp;
                    }
                    return Ok(());
                }
                Sequence::CoreOp => {
                    self.control = self.inst.core_op;
                    self.seq = Sequence::CoreOpExecuted;
                    return Ok(());
                }
                Sequence::CoreOpExecuted => {
                    self.seq = match self.inst.run_after {
                        Some(spec) => {
                            self.micro = Some(spec);
                            Sequence::RunAfter
                        }
                        None => Sequence::FinalSteps,
                    };
                }
                Sequence::RunAfter => {
                    if !self.run_micro()? {
                        self.seq = Sequence::FinalSteps;
                    }
                    return Ok(());
                }
                Sequence::FinalSteps => self.final_steps(regs, ports),
                Sequence::LoopOp => {
                    if !self.run_micro()? {
                        self.seq = Sequence::RepeatTest(RepeatKind::Loop);
                    }
                    return Ok(());
                }
                Sequence::RepeatOp => {
                    if !self.run_micro()? {
                        self.seq = Sequence::RepeatTest(RepeatKind::Prefix);
                    }
                    return Ok(());
                }
                Sequence::RepeatRegOp => {
                    if !self.run_micro()? {
                        self.seq = Sequence::RepeatTest(RepeatKind::Register);
                    }
                    return Ok(());
                }
                Sequence::RepeatTest(kind) => self.repeat_test(kind, regs),
                Sequence::SignalInterrupt => {
                    if self.interrupt_accepted(regs) {
                        debug!("Taking {:?}", self.inst.interrupt_cond);
                        *ports.interrupt_request = None;
                        regs.disable_clk = false;
                        let level = self.inst.interrupt_cond.level() as u32;
                        self.branch_target = vectors::INTERRUPT_BASE | (level << 4);
                        self.start_push(MicroKind::PushPgcIndSpAuto);
                        self.seq = Sequence::PushPgc;
                    } else {
                        debug!("Dropping masked {:?}", self.inst.interrupt_cond);
                        *ports.interrupt_request = None;
                        if regs.disable_clk {
                            self.redirect(ports, self.inst.inst_pgc);
                        }
                        self.seq = Sequence::WaitNextIns;
                    }
                }
                Sequence::SignalBranch => self.signal_branch(regs, ports),
                Sequence::PushPgc => {
                    if !self.run_micro()? {
                        if self.inst.interrupt || self.inst.branch_dest.is_exception() {
                            self.start_push(MicroKind::PushWfIndSpAuto);
                            self.seq = Sequence::PushWf;
                        } else {
                            if !self.inst.predicted {
                                self.redirect(ports, self.branch_target);
                            }
                            self.seq = Sequence::WaitNextIns;
                        }
                    }
                    return Ok(());
                }
                Sequence::PushWf => {
                    if !self.run_micro()? {
                        self.redirect(ports, self.branch_target);
                        self.seq = Sequence::WaitNextIns;
                    }
                    return Ok(());
                }
            }
        }
    }

    fn final_steps(&mut self, regs: &mut Registers, ports: &mut ExecutePorts<'_>) {
        self.seq = if self.inst.branch {
            Sequence::SignalBranch
        } else if let Some(spec) = self.inst.repeat_op {
            if spec.kind == MicroKind::Repr {
                self.repeat_reg_type = Some(spec);
                self.inst.repeat_op = None;
                Sequence::WaitNextIns
            } else if spec.kind.is_prefix_repeat() {
                self.repeat_type = Some(spec);
                self.inst.repeat_op = None;
                Sequence::WaitNextIns
            } else {
                self.micro = Some(spec);
                Sequence::LoopOp
            }
        } else if let Some(spec) = self.repeat_type {
            self.micro = Some(spec);
            Sequence::RepeatOp
        } else if self.inst.interrupt {
            Sequence::SignalInterrupt
        } else if let Some(spec) = self.repeat_reg_type {
            self.micro = Some(spec);
            Sequence::RepeatRegOp
        } else if self.inst.disable_clk {
            debug!("HALT at {:06x}", self.inst.inst_pgc);
            regs.disable_clk = true;
            self.redirect(ports, self.inst.inst_pgc);
            Sequence::WaitNextIns
        } else {
            Sequence::WaitNextIns
        };
    }

    fn repeat_test(&mut self, kind: RepeatKind, regs: &Registers) {
        self.seq = match kind {
            RepeatKind::Prefix if self.used_z => {
                self.repeat_type = None;
                Sequence::FinalSteps
            }
            RepeatKind::Register if self.used_z || regs.flag(flags::ZERO) => {
                self.repeat_reg_type = None;
                Sequence::FinalSteps
            }
            RepeatKind::Prefix | RepeatKind::Register => Sequence::WaitCachedIns,
            RepeatKind::Loop if self.used_z => {
                self.inst.repeat_op = None;
                Sequence::FinalSteps
            }
            RepeatKind::Loop => {
                // Only the first pass of a signed multiply subtracts
                self.micro = self.inst.repeat_op.map(|spec| MicroSpec {
                    reg_select: spec.reg_select & !select::SECOND,
                    ..spec
                });
                Sequence::LoopOp
            }
        };
    }

    fn signal_branch(&mut self, regs: &Registers, ports: &mut ExecutePorts<'_>) {
        let predicted = self.inst.predicted;
        if self.branch_taken(regs) {
            // MAR is reused by the pushes, so the target is taken first
            self.branch_target = self.branch_addr();
            if self.inst.branch_dest.is_exception() {
                warn!(
                    "{:?} exception at {:06x}",
                    self.inst.branch_dest, self.inst.inst_pgc
                );
            }
            if self.inst.branch_cond == BranchCond::AlwaysCall {
                self.start_push(MicroKind::PushPgcIndSpAuto);
                self.seq = Sequence::PushPgc;
                return;
            }
            if !predicted {
                self.redirect(ports, self.branch_target);
            }
        } else if predicted {
            self.redirect(ports, self.inst.inst_pgc);
        }
        self.seq = Sequence::WaitNextIns;
    }
}

impl Default for ExecuteUnit {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod execute_tests {
    use super::*;
    use crate::control::SrcControl;
    use crate::interconnect::Interconnect;
    use crate::memory::{BusController, MemoryType, Ram};

    struct Rig {
        unit: ExecuteUnit,
        regs: Registers,
        bus: BusController<Ram<0x1000>>,
        ic: Interconnect,
    }

    impl Rig {
        fn new() -> Self {
            let mut regs = Registers::new();
            regs.set_sp(0x800);
            Self {
                unit: ExecuteUnit::new(),
                regs,
                bus: BusController::new(Ram::new()),
                ic: Interconnect::new(),
            }
        }

        fn cycle(&mut self) -> Result<(), CoreError> {
            let halted = self.regs.disable_clk && self.ic.interrupt_request.is_none();
            self.unit
                .half1(halted, &mut self.regs, &mut self.bus, self.ic.execute_ports())?;
            self.bus.tick();
            self.unit
                .half2(halted, &mut self.regs, &mut self.bus, self.ic.execute_ports())?;
            self.bus.tick();
            Ok(())
        }

        fn run(&mut self, inst: DecodedInst, cycles: usize) {
            assert!(self.ic.decoded.offer(inst));
            for _ in 0..cycles {
                self.cycle().unwrap();
            }
        }
    }

    fn inst_at(addr: u32, words: &[u16], core_op: ControlWord) -> DecodedInst {
        let mut inst = DecodedInst::default();
        for word in words {
            inst.words.push(*word).unwrap();
        }
        inst.inst_pgc = addr;
        inst.core_op = core_op;
        inst
    }

    fn load(src: SrcControl, dest: Bus, size: DataSize) -> ControlWord {
        ControlWord {
            srcs: [SrcControl::new(Bus::Zero, size), src],
            op: AluOp::Or,
            dest,
            flag_mask: flags::SZ,
            ..ControlWord::default()
        }
    }

    #[test]
    fn test_core_op_writes_register() {
        let mut rig = Rig::new();
        let op = load(SrcControl::new(Bus::Imm1, DataSize::Word), Bus::W(2), DataSize::Word);
        rig.run(inst_at(0x102, &[0x0000, 0x8001], op), 4);
        assert_eq!(rig.regs.regs[2], 0x8001);
        assert_eq!(rig.regs.flags() & flags::SIGN, flags::SIGN);
        assert_eq!(rig.regs.pgc, 0x102);
        assert!(rig.unit.is_idle());
    }

    #[test]
    fn test_memory_operand_is_read_first() {
        let mut rig = Rig::new();
        rig.bus.memory_mut().load_words(0x200, &[0xBEEF]);
        rig.regs.regs[3] = 0x200;
        let mut inst = inst_at(
            0x102,
            &[0x0000],
            load(SrcControl::new(Bus::MemData, DataSize::Word), Bus::W(1), DataSize::Word),
        );
        inst.run_before = Some(MicroSpec::new(MicroKind::IndReg, DataSize::Word).with_select(3));
        rig.run(inst, 6);
        assert_eq!(rig.regs.regs[1], 0xBEEF);
    }

    #[test]
    fn test_long_read_merges_high_byte() {
        let mut rig = Rig::new();
        rig.bus = BusController::new(Ram::new()).with_wait_states(2);
        rig.bus.memory_mut().load(0x300, &[0x56, 0x34, 0x12]);
        rig.regs.regs[4] = 0x300;
        let mut inst = inst_at(
            0x102,
            &[0x0000],
            load(SrcControl::new(Bus::MemData, DataSize::Long), Bus::P(1), DataSize::Long),
        );
        inst.run_before = Some(MicroSpec::new(MicroKind::IndReg, DataSize::Long).with_select(4));
        rig.run(inst, 16);
        assert_eq!(rig.regs.regs[1], 0x123456);
    }

    #[test]
    fn test_long_write_splits() {
        let mut rig = Rig::new();
        rig.regs.regs[2] = 0xABCDEF;
        let mut inst = inst_at(
            0x102,
            &[0x0000, 0x0400],
            load(SrcControl::new(Bus::P(2), DataSize::Long), Bus::MemData, DataSize::Long),
        );
        inst.run_after = Some(
            MicroSpec::new(MicroKind::IndImm, DataSize::Long)
                .with_select(select::SHORT)
                .writing(),
        );
        rig.run(inst, 8);
        let ram = rig.bus.memory();
        assert_eq!(ram.read_word(0x400), 0xCDEF);
        assert_eq!(ram.read(0x402), Some(0xAB));
    }

    #[test]
    fn test_call_pushes_return_address() {
        let mut rig = Rig::new();
        let mut inst = inst_at(0x1234, &[0xF900, 0x0500], ControlWord::default());
        inst.branch = true;
        inst.branch_cond = BranchCond::AlwaysCall;
        inst.branch_dest = BranchDest::Hml;
        rig.run(inst, 10);

        assert_eq!(rig.regs.sp(), 0x7FC);
        let ram = rig.bus.memory();
        assert_eq!(ram.read_word(0x7FC), 0x1234);
        assert_eq!(ram.read(0x7FE), Some(0x00));
        assert_eq!(rig.ic.execute_branch.take(), Some(0x000500));
        assert_eq!(rig.ic.resteer.take(), Some(0x000500));
    }

    #[test]
    fn test_predicted_branch_not_redirected() {
        let mut rig = Rig::new();
        let mut inst = inst_at(0x1002, &[0xEE02], ControlWord::default());
        inst.core_op = ControlWord {
            srcs: [
                SrcControl::new(Bus::Pgc, DataSize::Long),
                SrcControl::signed(Bus::Imm0, DataSize::Byte),
            ],
            op: AluOp::Add,
            shifter: crate::control::Shifter::Left,
            dest: Bus::MemAddr,
            ..ControlWord::default()
        };
        inst.branch = true;
        inst.branch_cond = BranchCond::Always;
        inst.predicted = true;
        rig.run(inst.clone(), 4);
        assert_eq!(rig.unit.mem_addr(), 0x1006);
        assert!(rig.ic.execute_branch.is_empty());

        // A mispredicted conditional falls through
        let mut rig = Rig::new();
        inst.branch_cond = BranchCond::Z;
        rig.run(inst.clone(), 4);
        assert_eq!(rig.ic.execute_branch.take(), Some(0x1002));

        // An unpredicted taken branch redirects
        let mut rig = Rig::new();
        inst.branch_cond = BranchCond::Nz;
        inst.predicted = false;
        rig.run(inst, 4);
        assert_eq!(rig.ic.execute_branch.take(), Some(0x1006));
    }

    #[test]
    fn test_illegal_pushes_pgc_and_wf() {
        let mut rig = Rig::new();
        rig.regs.wf = 0x0345;
        let mut inst = inst_at(0x1000, &[0xFC00], ControlWord::default());
        inst.branch = true;
        inst.branch_cond = BranchCond::AlwaysCall;
        inst.branch_dest = BranchDest::Illegal;
        rig.run(inst, 12);

        assert_eq!(rig.regs.sp(), 0x7FA);
        let ram = rig.bus.memory();
        assert_eq!(ram.read_word(0x7FA), 0x0345);
        assert_eq!(ram.read_word(0x7FC), 0x1000);
        assert_eq!(rig.ic.execute_branch.take(), Some(vectors::ILLEGAL));
    }

    #[test]
    fn test_bad_index_word_is_illegal() {
        let mut rig = Rig::new();
        let mut inst = inst_at(
            0x1006,
            &[0x0000, 0xC000],
            load(SrcControl::new(Bus::MemData, DataSize::Word), Bus::W(1), DataSize::Word),
        );
        inst.run_before = Some(MicroSpec::new(MicroKind::IndRegWithBits, DataSize::Word));
        rig.run(inst, 14);
        assert_eq!(rig.bus.memory().read_word(0x7FC), 0x1002);
        assert_eq!(rig.ic.execute_branch.take(), Some(vectors::ILLEGAL));
    }

    #[test]
    fn test_halt_then_nmi() {
        let mut rig = Rig::new();
        let mut inst = inst_at(0x2002, &[0x0001], ControlWord::default());
        inst.disable_clk = true;
        rig.run(inst, 3);
        assert!(rig.regs.disable_clk);
        assert_eq!(rig.ic.execute_branch.take(), Some(0x2002));
        rig.ic.resteer.clear();

        rig.ic.interrupt_request = Some(InterruptCond::Nmi);
        let mut irq = DecodedInst::default();
        irq.interrupt = true;
        irq.interrupt_cond = InterruptCond::Nmi;
        irq.inst_pgc = 0x2002;
        rig.run(irq, 12);

        assert!(!rig.regs.disable_clk);
        assert_eq!(rig.ic.interrupt_request, None);
        assert_eq!(rig.ic.execute_branch.take(), Some(vectors::INTERRUPT_BASE));
        assert_eq!(rig.bus.memory().read_word(0x7FC), 0x2002);
    }

    #[test]
    fn test_masked_interrupt_is_dropped() {
        let mut rig = Rig::new();
        rig.regs.set_irl(5);
        rig.ic.interrupt_request = Some(InterruptCond::Irq3);
        let mut irq = DecodedInst::default();
        irq.interrupt = true;
        irq.interrupt_cond = InterruptCond::Irq3;
        rig.run(irq, 4);
        assert_eq!(rig.ic.interrupt_request, None);
        assert!(rig.ic.execute_branch.is_empty());
        assert_eq!(rig.regs.sp(), 0x800);
    }

    #[test]
    fn test_divide_reports_missing_microcode() {
        let mut rig = Rig::new();
        let mut inst = inst_at(0x1002, &[0x0988], ControlWord::default());
        inst.run_after = Some(MicroSpec::new(MicroKind::DivTestDividendHi, DataSize::Byte));
        assert!(rig.ic.decoded.offer(inst));
        let mut result = Ok(());
        for _ in 0..4 {
            result = rig.cycle();
            if result.is_err() {
                break;
            }
        }
        assert_eq!(result, Err(CoreError::NotImplemented(MicroKind::DivTestDividendHi)));
    }

    #[test]
    fn test_backoff_follows_bus_use() {
        let mut rig = Rig::new();
        let mut inst = inst_at(
            0x102,
            &[0x0000],
            load(SrcControl::new(Bus::MemData, DataSize::Word), Bus::W(1), DataSize::Word),
        );
        inst.run_before = Some(MicroSpec::new(MicroKind::IndReg, DataSize::Word).with_select(3));
        assert!(rig.ic.decoded.offer(inst));
        rig.cycle().unwrap();
        // The operand read is due in the next cycle
        assert!(rig.ic.memory_backoff);
        for _ in 0..4 {
            rig.cycle().unwrap();
        }
        assert!(!rig.ic.memory_backoff);
    }
}
