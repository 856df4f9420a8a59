// Bits of the F register (low byte of WF)
pub mod flags {
    pub const EXTEND: u8 = 0x01;
    pub const DECIMAL: u8 = 0x02;
    pub const OVERFLOW: u8 = 0x04;
    pub const CARRY: u8 = 0x08;
    pub const ZERO: u8 = 0x40;
    pub const SIGN: u8 = 0x80;

    // Write masks used by the decoder
    pub const SZ: u8 = SIGN | ZERO;
    pub const SZV: u8 = SIGN | ZERO | OVERFLOW;
    pub const SZVC: u8 = SIGN | ZERO | OVERFLOW | CARRY;
    pub const SZVCX: u8 = SIGN | ZERO | OVERFLOW | CARRY | EXTEND;

    // Interrupt request level lives in WF bits 8-10
    pub const IRL_MASK: u16 = 0x0700;
    pub const IRL_SHIFT: u16 = 8;
}

pub mod vectors {
    pub const INTERRUPT_BASE: u32 = 0xFFCF00;
    pub const DIV_ZERO: u32 = 0xFFCFD0;
    pub const ILLEGAL: u32 = 0xFFCFE0;
    pub const RESTART_BASE: u32 = 0xFFD000;

    // Power-on entry shares the RST 0 vector
    pub const RESET: u32 = RESTART_BASE;
}

pub mod address_space {
    pub const ADDRESS_MASK: u32 = 0xFF_FFFF;
    pub const PGC_MASK: u32 = 0xFF_FFFE;
    pub const WORD_ADDRESS_MASK: u32 = 0x7F_FFFF;
}

pub mod pipeline {
    // Prefetch queue depth in words
    pub const PREFETCH_DEPTH: usize = 5;

    // Longest instruction in words (opcode plus extension words)
    pub const MAX_INST_WORDS: usize = 5;

    // Upper bound on entries in any single microcode chain
    pub const MAX_CHAIN_LENGTH: usize = 8;
}

// Register indices with a fixed role
pub mod registers {
    pub const PRODUCT_HIGH: usize = 0;
    pub const STACK_POINTER: usize = 7;
    pub const REPEAT_ACTIVE: u8 = 0x08;
    pub const REPEAT_COUNT_MASK: u8 = 0x1F;
}
