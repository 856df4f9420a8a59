use crate::constants::address_space::ADDRESS_MASK;
use crate::constants::flags;
use crate::control::{AluOp, ControlWord, DataSize, OverflowMode, Shifter, SrcControl, ZeroMode};

/// Everything one ALU pass writes back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluResult {
    pub value: u32,
    pub flags: u8,
    pub aux: bool,     // new latch_aux
    pub used_z: bool,  // zero test seen by the repeat logic
}

fn extend(src: SrcControl, latch: u32) -> u32 {
    src.size.extend(latch, src.sign_extend)
}

/// Runs `control` over the two input latches
///
/// Returns `None` when the ALU is off for this step.
pub fn operate(control: &ControlWord, latches: [u32; 2], flags_in: u8, aux_in: bool) -> Option<AluResult> {
    if control.op == AluOp::Off {
        return None;
    }

    let width = control.srcs[0].size;
    let mask = width.mask();
    let sign = width.sign_bit();

    let a = extend(control.srcs[0], latches[0]);
    let mut b = extend(control.srcs[1], latches[1]);
    let b_orig = b;
    let carry_in = if control.aux_as_extend {
        aux_in
    } else {
        flags_in & flags::EXTEND != 0
    };

    if control.add1 || (control.add_carry && carry_in) {
        b = b.wrapping_add(1);
    }
    let b_pre = b;

    let mut negate_of_zero = false;
    if control.negate {
        negate_of_zero = b & mask == 0;
        b = (!b).wrapping_add(1);
    }
    if control.and_with_overflow && flags_in & flags::OVERFLOW == 0 {
        b = 0;
        negate_of_zero = false;
    }

    let (b, shifter_carry) = shift(
        control.shifter,
        control.srcs[1].size,
        b,
        carry_in,
        control.invert_carries,
    );

    let (value, carry) = match control.op {
        AluOp::Add => {
            let mut value = a.wrapping_add(b) & ADDRESS_MASK;
            let mut wide = (a & mask) as u64 + (b & mask) as u64;
            let decimal = width == DataSize::Byte && flags_in & flags::DECIMAL != 0;
            if decimal && (a ^ b ^ value) & 0x08 != 0 {
                value = (value + 0x10) & ADDRESS_MASK;
                wide += 0x10;
            }
            let carry = (wide >> width.bits()) & 1 != 0 || negate_of_zero;
            (value, carry ^ control.invert_carries)
        }
        AluOp::And => ((a & b) & ADDRESS_MASK, shifter_carry),
        AluOp::Or => ((a | b) & ADDRESS_MASK, shifter_carry),
        AluOp::Xor => ((a ^ b) & ADDRESS_MASK, shifter_carry),
        AluOp::Off => return None,
    };

    let zero = value & mask == 0;
    let mut source = 0u8;
    let mut aux = aux_in;
    let mut used_z = zero;

    if value & sign != 0 {
        source |= flags::SIGN;
    }

    let overflow = match control.v_mode {
        OverflowMode::Normal if control.op == AluOp::Add => {
            if control.negate {
                (a ^ b_pre) & (a ^ value) & sign != 0
            } else {
                (a ^ value) & (b ^ value) & sign != 0
            }
        }
        // Even parity for logic operations
        OverflowMode::Normal => (value & mask).count_ones() % 2 == 0,
        OverflowMode::ShifterCarry => shifter_carry,
        OverflowMode::Clear => false,
    };
    if overflow {
        source |= flags::OVERFLOW;
    }

    if carry {
        source |= flags::CARRY | flags::EXTEND;
    }
    if control.aux_as_extend {
        aux = carry;
    }

    match control.z_mode {
        ZeroMode::Normal => {
            if zero {
                source |= flags::ZERO;
            }
        }
        ZeroMode::Accumulate => {
            used_z = zero && flags_in & flags::ZERO != 0;
            if used_z {
                source |= flags::ZERO;
            }
        }
        ZeroMode::BitTest => {
            used_z = a & b_orig == 0;
            if used_z {
                source |= flags::ZERO;
            }
        }
        ZeroMode::SaveToAux => aux = zero,
    }

    Some(AluResult {
        value,
        flags: (flags_in & !control.flag_mask) | (source & control.flag_mask),
        aux,
        used_z,
    })
}

/// One-bit shift or swap on ALU input 2, returning the shifted-out bit
fn shift(shifter: Shifter, size: DataSize, value: u32, carry_in: bool, invert: bool) -> (u32, bool) {
    let msb = value & size.sign_bit() != 0;
    let lsb = value & 1 != 0;
    let inject = match shifter {
        Shifter::LeftCarry | Shifter::RightCarry => carry_in,
        Shifter::LeftBarrel | Shifter::RightArith => msb,
        Shifter::RightBarrel => lsb,
        _ => false,
    } as u32;

    match shifter {
        Shifter::None => (value, false),
        Shifter::Left | Shifter::LeftCarry | Shifter::LeftBarrel => ((value << 1) | inject, msb ^ invert),
        Shifter::RightLogical | Shifter::RightArith | Shifter::RightCarry | Shifter::RightBarrel => {
            let shifted = ((value & size.mask()) >> 1) | (inject << (size.bits() - 1));
            (shifted, lsb ^ invert)
        }
        Shifter::Swap => {
            let swapped = match size {
                DataSize::Byte => ((value & 0xF0) >> 4) | ((value & 0x0F) << 4),
                DataSize::Word => ((value & 0xFF00) >> 8) | ((value & 0x00FF) << 8),
                DataSize::Long => ((value & 0xFF_0000) >> 16) | (value & 0xFF00) | ((value & 0xFF) << 16),
            };
            (swapped, false)
        }
    }
}

#[cfg(test)]
mod alu_tests {
    use super::*;
    use crate::control::Bus;

    fn add(size: DataSize) -> ControlWord {
        ControlWord {
            srcs: [SrcControl::new(Bus::Zero, size), SrcControl::new(Bus::Zero, size)],
            op: AluOp::Add,
            flag_mask: flags::SZVCX,
            ..ControlWord::default()
        }
    }

    fn sub(size: DataSize) -> ControlWord {
        ControlWord {
            negate: true,
            invert_carries: true,
            ..add(size)
        }
    }

    #[test]
    fn test_off_does_nothing() {
        let control = ControlWord::default();
        assert_eq!(operate(&control, [1, 2], 0, false), None);
    }

    #[test]
    fn test_add_byte_carry() {
        let r = operate(&add(DataSize::Byte), [0xFF, 0x05], 0, false).unwrap();
        assert_eq!(r.value & 0xFF, 0x04);
        assert_eq!(r.flags & flags::CARRY, flags::CARRY);
        assert_eq!(r.flags & flags::EXTEND, flags::EXTEND);
        assert_eq!(r.flags & flags::ZERO, 0);
        assert_eq!(r.flags & flags::OVERFLOW, 0);
    }

    #[test]
    fn test_add_signed_overflow() {
        let r = operate(&add(DataSize::Word), [0x7FFF, 0x0001], 0, false).unwrap();
        assert_eq!(r.value, 0x8000);
        assert_eq!(r.flags & (flags::SIGN | flags::OVERFLOW), flags::SIGN | flags::OVERFLOW);
        assert_eq!(r.flags & flags::CARRY, 0);
    }

    #[test]
    fn test_subtract_borrow() {
        let r = operate(&sub(DataSize::Byte), [0x03, 0x05], 0, false).unwrap();
        assert_eq!(r.value & 0xFF, 0xFE);
        assert_ne!(r.flags & flags::CARRY, 0);

        let r = operate(&sub(DataSize::Byte), [0x05, 0x05], 0, false).unwrap();
        assert_ne!(r.flags & flags::ZERO, 0);
        assert_eq!(r.flags & flags::CARRY, 0);

        // Subtracting zero never borrows
        let r = operate(&sub(DataSize::Byte), [0x05, 0x00], 0, false).unwrap();
        assert_eq!(r.value & 0xFF, 0x05);
        assert_eq!(r.flags & flags::CARRY, 0);
    }

    #[test]
    fn test_subtract_overflow() {
        // 0x80 - 1 = 0x7F overflows
        let r = operate(&sub(DataSize::Byte), [0x80, 0x01], 0, false).unwrap();
        assert_ne!(r.flags & flags::OVERFLOW, 0);
        let r = operate(&sub(DataSize::Byte), [0x10, 0x01], 0, false).unwrap();
        assert_eq!(r.flags & flags::OVERFLOW, 0);
    }

    #[test]
    fn test_add_with_extend() {
        let mut control = add(DataSize::Byte);
        control.add_carry = true;
        let r = operate(&control, [0x10, 0x01], flags::EXTEND, false).unwrap();
        assert_eq!(r.value, 0x12);
        let r = operate(&control, [0x10, 0x01], 0, false).unwrap();
        assert_eq!(r.value, 0x11);
    }

    #[test]
    fn test_decimal_adjust() {
        let r = operate(&add(DataSize::Byte), [0x04, 0x04], flags::DECIMAL, false).unwrap();
        assert_eq!(r.value, 0x18);
        let r = operate(&add(DataSize::Byte), [0x04, 0x04], 0, false).unwrap();
        assert_eq!(r.value, 0x08);
        let r = operate(&add(DataSize::Byte), [0x01, 0x01], flags::DECIMAL, false).unwrap();
        assert_eq!(r.value, 0x02);
    }

    #[test]
    fn test_flag_mask_keeps_other_bits() {
        let mut control = add(DataSize::Byte);
        control.flag_mask = flags::ZERO;
        let r = operate(&control, [0xFF, 0x01], flags::OVERFLOW | flags::SIGN, false).unwrap();
        assert_eq!(r.flags, flags::OVERFLOW | flags::SIGN | flags::ZERO);
    }

    #[test]
    fn test_shifts() {
        let mut control = ControlWord {
            srcs: [
                SrcControl::new(Bus::Zero, DataSize::Byte),
                SrcControl::new(Bus::Zero, DataSize::Byte),
            ],
            op: AluOp::Or,
            flag_mask: flags::SZVCX,
            ..ControlWord::default()
        };

        control.shifter = Shifter::RightArith;
        let r = operate(&control, [0, 0x81], 0, false).unwrap();
        assert_eq!(r.value, 0xC0);
        assert_ne!(r.flags & flags::CARRY, 0);

        control.shifter = Shifter::RightLogical;
        let r = operate(&control, [0, 0x81], 0, false).unwrap();
        assert_eq!(r.value, 0x40);

        control.shifter = Shifter::LeftCarry;
        let r = operate(&control, [0, 0x81], flags::EXTEND, false).unwrap();
        assert_eq!(r.value & 0xFF, 0x03);
        assert_ne!(r.flags & flags::CARRY, 0);

        control.shifter = Shifter::RightBarrel;
        let r = operate(&control, [0, 0x01], 0, false).unwrap();
        assert_eq!(r.value, 0x80);

        control.shifter = Shifter::Swap;
        let r = operate(&control, [0, 0x12], 0, false).unwrap();
        assert_eq!(r.value, 0x21);
    }

    #[test]
    fn test_swap_widths() {
        assert_eq!(shift(Shifter::Swap, DataSize::Word, 0x1234, false, false).0, 0x3412);
        assert_eq!(shift(Shifter::Swap, DataSize::Long, 0x123456, false, false).0, 0x563412);
    }

    #[test]
    fn test_logic_parity() {
        let control = ControlWord {
            srcs: [
                SrcControl::new(Bus::Zero, DataSize::Byte),
                SrcControl::new(Bus::Zero, DataSize::Byte),
            ],
            op: AluOp::Xor,
            flag_mask: flags::OVERFLOW,
            ..ControlWord::default()
        };
        let r = operate(&control, [0x03, 0x00], 0, false).unwrap();
        assert_ne!(r.flags & flags::OVERFLOW, 0);
        let r = operate(&control, [0x07, 0x00], 0, false).unwrap();
        assert_eq!(r.flags & flags::OVERFLOW, 0);
    }

    #[test]
    fn test_bit_test_uses_mask() {
        let control = ControlWord {
            srcs: [
                SrcControl::new(Bus::Zero, DataSize::Byte),
                SrcControl::new(Bus::Zero, DataSize::Byte),
            ],
            op: AluOp::Or,
            z_mode: ZeroMode::BitTest,
            flag_mask: flags::ZERO,
            ..ControlWord::default()
        };
        let r = operate(&control, [0x08, 0x08], 0, false).unwrap();
        assert_eq!(r.flags, 0);
        let r = operate(&control, [0x08, 0x04], 0, false).unwrap();
        assert_eq!(r.flags, flags::ZERO);
        assert!(r.used_z);
    }

    #[test]
    fn test_zero_to_aux() {
        let control = ControlWord {
            srcs: [
                SrcControl::new(Bus::Zero, DataSize::Byte),
                SrcControl::signed(Bus::Zero, DataSize::Byte),
            ],
            op: AluOp::Add,
            add1: true,
            negate: true,
            z_mode: ZeroMode::SaveToAux,
            ..ControlWord::default()
        };
        let r = operate(&control, [0x02, 0], flags::ZERO, false).unwrap();
        assert_eq!(r.value & 0xFF, 0x01);
        assert!(!r.aux);
        assert!(!r.used_z);
        assert_eq!(r.flags, flags::ZERO);

        let r = operate(&control, [0x01, 0], 0, false).unwrap();
        assert_eq!(r.value & 0xFF, 0);
        assert!(r.aux);
        assert!(r.used_z);
        assert_eq!(r.flags, 0);
    }

    #[test]
    fn test_and_with_overflow_gates_operand() {
        let mut control = add(DataSize::Byte);
        control.and_with_overflow = true;
        let r = operate(&control, [0x10, 0x05], 0, false).unwrap();
        assert_eq!(r.value, 0x10);
        let r = operate(&control, [0x10, 0x05], flags::OVERFLOW, false).unwrap();
        assert_eq!(r.value, 0x15);
    }

    #[test]
    fn test_aux_carry_chain() {
        let mut control = add(DataSize::Byte);
        control.aux_as_extend = true;
        control.add_carry = true;
        let r = operate(&control, [0x80, 0x80], 0, true).unwrap();
        assert_eq!(r.value & 0xFF, 0x01);
        assert!(r.aux);
    }

    #[test]
    fn test_sign_extended_negative_operand() {
        let mut control = add(DataSize::Long);
        control.srcs[1] = SrcControl::signed(Bus::Zero, DataSize::Byte);
        let r = operate(&control, [0x1000, 0xFE], 0, false).unwrap();
        assert_eq!(r.value, 0x0FFE);
    }
}
