use super::Decoder;
use crate::control::{select, Bus, DataSize, MemData, MemLatch, MicroKind, MicroSpec};

/// Addressing mode selected by a 6-bit RM specifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RmMode {
    ShortImmediate,
    PreDecrement(u8),
    RegisterIndexed,
    AbsoluteIndexed,
    PgcRelative { long: bool },
    Absolute { long: bool },
    Immediate { long: bool },
    PostIncrement(u8),
    Indirect(u8),
    Displacement(u8),
    Register(u8),
    Invalid,
}

impl RmMode {
    /// Classifies `rm`; immediates only exist for operands that are read
    pub fn classify(rm: u8, readable: bool) -> RmMode {
        let reg = (rm >> 2) & 0x7;
        let long = rm & 0x04 != 0;
        if readable && rm & 0x03 == 0x03 {
            RmMode::ShortImmediate
        } else if rm & 0x23 == 0x22 {
            RmMode::PreDecrement(reg)
        } else if rm & 0x3B == 0x39 {
            if long {
                RmMode::AbsoluteIndexed
            } else {
                RmMode::RegisterIndexed
            }
        } else if rm & 0x3B == 0x31 {
            RmMode::PgcRelative { long }
        } else if rm & 0x3B == 0x29 {
            RmMode::Absolute { long }
        } else if readable && rm & 0x3B == 0x21 {
            RmMode::Immediate { long }
        } else if rm & 0x23 == 0x20 {
            RmMode::PostIncrement(reg)
        } else if rm & 0x23 == 0x02 {
            RmMode::Indirect(reg)
        } else if rm & 0x23 == 0x01 {
            RmMode::Displacement(reg)
        } else if rm & 0x23 == 0x00 {
            RmMode::Register(reg)
        } else {
            RmMode::Invalid
        }
    }

    pub fn is_memory(self) -> bool {
        matches!(
            self,
            RmMode::PreDecrement(_)
                | RmMode::RegisterIndexed
                | RmMode::AbsoluteIndexed
                | RmMode::PgcRelative { .. }
                | RmMode::Absolute { .. }
                | RmMode::PostIncrement(_)
                | RmMode::Indirect(_)
                | RmMode::Displacement(_)
        )
    }

    /// Extension words consumed by the mode
    pub fn extra_words(self) -> u8 {
        match self {
            RmMode::AbsoluteIndexed => 2,
            RmMode::RegisterIndexed | RmMode::Displacement(_) => 1,
            RmMode::PgcRelative { long } | RmMode::Absolute { long } | RmMode::Immediate { long } => {
                if long {
                    2
                } else {
                    1
                }
            }
            _ => 0,
        }
    }
}

/// Register-direct operand of the given width
pub fn register_bus(reg: u8, size: DataSize) -> Bus {
    match size {
        DataSize::Byte if reg < 4 => Bus::L(reg),
        DataSize::Byte => Bus::M(reg - 4),
        DataSize::Word => Bus::W(reg),
        DataSize::Long => Bus::P(reg),
    }
}

impl Decoder {
    /// Decodes an RM operand into the core control word and operand microcode
    ///
    /// `is_left` operands feed ALU input 1, other readable operands input 2.
    /// A left destination is read, modified and written back; a destination that
    /// is not left is written only.
    pub(super) fn decode_rm(
        &mut self,
        rm: u8,
        is_dest: bool,
        is_left: bool,
        size: DataSize,
    ) -> Result<RmMode, &'static str> {
        self.rm_ops += 1;
        let second = self.rm_ops > 1;
        if self.rm_ops == 2 {
            self.inst.rm2_offset = 1 + self.words_to_read;
        }

        let slot = if is_left {
            Some(0)
        } else if !is_dest {
            Some(1)
        } else {
            None
        };
        if let Some(i) = slot {
            self.inst.core_op.srcs[i].size = size;
            self.inst.core_op.srcs[i].sign_extend = false;
        }

        let mode = RmMode::classify(rm, slot.is_some());
        self.queue_words(mode.extra_words());

        if mode.is_memory() {
            return self.decode_memory_rm(mode, slot, is_dest, is_left, size, second);
        }
        if is_dest && matches!(mode, RmMode::ShortImmediate | RmMode::Immediate { .. }) {
            return Err("immediate operand used as destination");
        }

        let src = match mode {
            RmMode::ShortImmediate => {
                if second {
                    Bus::Sfi2
                } else {
                    Bus::Sfi1
                }
            }
            RmMode::Immediate { long } => {
                if let Some(i) = slot {
                    let src = &mut self.inst.core_op.srcs[i];
                    src.size = if long { DataSize::Long } else { DataSize::Word };
                    src.sign_extend = !long;
                }
                if second {
                    Bus::Rm1
                } else {
                    Bus::Imm1
                }
            }
            RmMode::Register(reg) => {
                let bus = register_bus(reg, size);
                if is_dest {
                    self.inst.core_op.dest = bus;
                }
                bus
            }
            _ => return Err("invalid RM specifier"),
        };
        if let Some(i) = slot {
            self.inst.core_op.srcs[i].location = src;
        }
        Ok(mode)
    }

    fn decode_memory_rm(
        &mut self,
        mode: RmMode,
        slot: Option<usize>,
        is_dest: bool,
        is_left: bool,
        size: DataSize,
        second: bool,
    ) -> Result<RmMode, &'static str> {
        let (kind, mut reg_select) = match mode {
            RmMode::PreDecrement(reg) => (MicroKind::IndRegPreDec, reg),
            RmMode::RegisterIndexed => (MicroKind::IndRegWithBits, 0),
            RmMode::AbsoluteIndexed => (MicroKind::IndImmWithBits, 0),
            RmMode::PgcRelative { long } => (
                MicroKind::IndPgcWithImmRm,
                if long { 0 } else { select::SHORT },
            ),
            RmMode::Absolute { long } => (
                if second {
                    MicroKind::IndImmRm
                } else {
                    MicroKind::IndImm
                },
                if long { 0 } else { select::SHORT },
            ),
            RmMode::PostIncrement(reg) => (MicroKind::IndRegPostInc, reg),
            RmMode::Indirect(reg) => (MicroKind::IndReg, reg),
            RmMode::Displacement(reg) => (MicroKind::IndRegWithImm, reg),
            _ => return Err("not a memory operand"),
        };
        if second {
            reg_select |= select::SECOND;
        }

        if let Some(i) = slot {
            self.inst.core_op.srcs[i].location = Bus::MemData;
        }

        let suppress = self.inst.core_op.suppress;
        let spec = MicroSpec::new(kind, size)
            .with_select(reg_select)
            .suppressed(suppress);

        if is_dest && is_left {
            // Read, then write the result back to the same address
            let core = &mut self.inst.core_op;
            core.dest = Bus::MemData;
            if size == DataSize::Long {
                // MAR has moved on to the high byte, rewind it for the write
                self.attach_after(
                    MicroSpec::new(MicroKind::IndMarRewind, size)
                        .writing()
                        .suppressed(suppress),
                )?;
            } else {
                core.mem_latch = MemLatch::Half2Mar;
                core.mem_data = MemData::WriteFromDest;
                core.is_16bit = size != DataSize::Byte;
            }
            self.attach_before(spec)?;
        } else if is_dest {
            self.inst.core_op.dest = Bus::MemData;
            self.attach_after(spec.writing())?;
        } else {
            self.attach_before(spec)?;
        }
        Ok(mode)
    }
}
